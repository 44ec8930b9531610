use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use criterion::{criterion_group, criterion_main, Criterion};
use statute::{EngineConfig, InMemoryData, LawContext, LawEngine, Subject, Trigger};

fn build_shared_engine() -> Arc<LawEngine> {
    let engine = LawEngine::new(Arc::new(InMemoryData::new()), EngineConfig::default());
    for i in 0..20 {
        engine
            .compile_and_register(
                i,
                &format!("Пользователь член партии с рейтингом > {i}; голосовать"),
                vec![],
                true,
            )
            .unwrap();
    }
    engine
        .compile_and_register(
            100,
            "def apply():\n    if context.user_id is None:\n        return {'action': 'deny'}\n    return {'action': 'allow'}\n",
            vec![Trigger::on_actions(["vote"])],
            true,
        )
        .unwrap();
    Arc::new(engine)
}

fn run_threads<F>(threads: usize, iters: u64, work: F) -> Duration
where
    F: Fn() + Send + Sync + 'static,
{
    let work = Arc::new(work);
    let per_thread = iters / threads as u64;
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let work = Arc::clone(&work);
            thread::spawn(move || {
                let start = Instant::now();
                for _ in 0..per_thread {
                    work();
                }
                start.elapsed()
            })
        })
        .collect();

    let mut max_elapsed = Duration::ZERO;
    for h in handles {
        let elapsed = h.join().unwrap();
        if elapsed > max_elapsed {
            max_elapsed = elapsed;
        }
    }
    max_elapsed
}

fn bench_throughput(c: &mut Criterion) {
    let thread_counts = [1, 2, 4, 8];

    let mut group = c.benchmark_group("throughput");
    group.measurement_time(Duration::from_secs(5));

    for &threads in &thread_counts {
        let engine = build_shared_engine();
        group.bench_function(&format!("check_permission_{threads}_threads"), |b| {
            b.iter_custom(|iters| {
                let engine = Arc::clone(&engine);
                let subject = Subject::new(1, "anna").with_party(2, "Зелёные").with_rating(50);
                let ctx = LawContext::default();
                run_threads(threads, iters, move || {
                    let _ = engine.check_permission(Some(&subject), "vote", &ctx);
                })
            });
        });

        let engine = build_shared_engine();
        group.bench_function(&format!("trigger_{threads}_threads"), |b| {
            b.iter_custom(|iters| {
                let engine = Arc::clone(&engine);
                let ctx = LawContext::for_user(1, "vote");
                run_threads(threads, iters, move || {
                    let _ = engine.trigger(&ctx);
                })
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_throughput);
criterion_main!(benches);
