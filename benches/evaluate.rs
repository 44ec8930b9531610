use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use statute::{
    EngineConfig, Executor, InMemoryData, LawContext, LawParser, RuleIndex, Subject,
};

const ACTIONS: &[&str] = &[
    "голосовать",
    "создавать законы",
    "создавать партии",
    "удалять законы",
    "модерировать",
];

/// Build an index with `n` laws spread over the action vocabulary. Every
/// fifth law is a prohibition gated on a high rating so checks walk past it.
fn build_index(n: usize) -> RuleIndex {
    let parser = LawParser::default();
    let texts: Vec<(String, String)> = (0..n)
        .map(|i| {
            let action = ACTIONS[i % ACTIONS.len()];
            let text = if i % 5 == 4 {
                format!("Пользователь не с рейтингом > 1000; {action}")
            } else {
                format!("Пользователь член партии с рейтингом > {i}; {action}")
            };
            (format!("law-{i}"), text)
        })
        .collect();
    RuleIndex::from_laws(&parser, texts.iter().map(|(n, t)| (n.as_str(), t.as_str()))).unwrap()
}

fn bench_check_permission(c: &mut Criterion) {
    let mut group = c.benchmark_group("check_permission");
    let subject = Subject::new(1, "anna").with_party(3, "Зелёные").with_rating(500);
    let ctx = LawContext::default();

    for &n in &[5, 50, 500] {
        let index = build_index(n);
        group.bench_function(&format!("{n}_laws"), |b| {
            b.iter(|| index.check_permission(black_box(Some(&subject)), "vote", &ctx));
        });
        group.bench_function(&format!("{n}_laws_explain"), |b| {
            b.iter(|| index.explain(black_box(Some(&subject)), "vote", &ctx));
        });
    }

    group.finish();
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");
    let parser = LawParser::default();

    for (name, text) in [
        ("short", "Пользователь член партии голосовать"),
        (
            "placeholders",
            "Пользователь; [ПОЛЬЗОВАТЕЛЬ]:ivan; [ПАРТИЯ]:Зелёные; с рейтингом >= [ЧИСЛО]:50; голосовать",
        ),
        (
            "grouped",
            "Правитель (член партии (с рейтингом > 10)); создавать законы; удалять законы; модерировать",
        ),
    ] {
        group.bench_function(name, |b| b.iter(|| parser.parse(black_box(text))));
    }

    group.finish();
}

fn bench_script(c: &mut Criterion) {
    let mut group = c.benchmark_group("script");
    let executor = Executor::new(Arc::new(InMemoryData::new()), &EngineConfig::default());
    let ctx = LawContext::for_user(1, "create_party").set("founding_members", vec![1, 2, 3, 4]);

    let trivial = "def apply():\n    return {'action': 'allow'}\n";
    let loop_heavy = r#"
def apply():
    total = 0
    for i in range(1000):
        if i % 3 == 0:
            total += i
    members = context.data.get('founding_members', [])
    return {'action': 'info', 'message': f"{total}:{len(members)}"}
"#;

    group.bench_function("trivial", |b| b.iter(|| executor.execute(black_box(trivial), &ctx)));
    group.bench_function("loop_1000", |b| {
        b.iter(|| executor.execute(black_box(loop_heavy), &ctx));
    });

    group.finish();
}

criterion_group!(benches, bench_check_permission, bench_parse, bench_script);
criterion_main!(benches);
