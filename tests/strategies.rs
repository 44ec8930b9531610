use proptest::prelude::*;
use statute::Decision;

// --- Russian profile vocabulary ---
// Subjects map to ordinary or privileged users; every action phrase has a
// canonical id. Conditions are drawn from the known condition vocabulary.

pub const SUBJECTS: &[&str] = &["Пользователь", "Правитель", "Администратор"];
pub const ACTIONS: &[&str] = &[
    "голосовать",
    "создавать законы",
    "создавать партии",
    "быть лидером партии",
    "удалять законы",
    "модерировать",
];
const RATING_OPS: &[&str] = &[">", "<", ">=", "<=", "=="];
const FILLER: &[&str] = &["завтра", "всегда", "в понедельник", "без ограничений"];
const IMPORTS: &[&str] = &[
    "import os",
    "import sys as system",
    "from os import path",
    "from subprocess import run, call",
];

/// A generated law text together with the pieces it was assembled from.
#[derive(Debug, Clone)]
pub struct LawText {
    pub text: String,
    pub subject: &'static str,
    pub conditions: Vec<String>,
    pub actions: Vec<&'static str>,
    pub negated: bool,
}

/// A condition phrase, with a numeric threshold for rating conditions.
pub fn arb_condition() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("член партии".to_owned()),
        Just("имеет право".to_owned()),
        (prop::sample::select(RATING_OPS), 0_u32..100)
            .prop_map(|(op, n)| format!("с рейтингом {op} {n}")),
    ]
}

/// A well-formed law: one subject, optional negation, up to two conditions,
/// one to three actions, clauses separated by `;`.
pub fn arb_law() -> impl Strategy<Value = LawText> {
    (
        prop::sample::select(SUBJECTS),
        prop::collection::vec(arb_condition(), 0..3),
        prop::collection::vec(prop::sample::select(ACTIONS), 1..4),
        any::<bool>(),
    )
        .prop_map(|(subject, conditions, actions, negated)| {
            let mut head = subject.to_owned();
            if negated {
                head.push_str(" не");
            }
            let mut parts = vec![head];
            parts.extend(conditions.iter().cloned());
            parts.extend(actions.iter().map(|a| (*a).to_owned()));
            LawText {
                text: parts.join("; "),
                subject,
                conditions,
                actions,
                negated,
            }
        })
}

/// Text built from conditions, actions and free words but no subject phrase.
pub fn arb_subjectless_text() -> impl Strategy<Value = String> {
    let piece = prop_oneof![
        arb_condition(),
        prop::sample::select(ACTIONS).prop_map(str::to_owned),
        prop::sample::select(FILLER).prop_map(str::to_owned),
    ];
    (
        prop::collection::vec(piece, 0..6),
        prop::sample::select(&[" ", "; ", ", "][..]),
    )
        .prop_map(|(pieces, sep)| pieces.join(sep))
}

/// A script that would be harmless apart from one import statement placed
/// at a random position, either at module level or inside `apply()`.
pub fn arb_import_script() -> impl Strategy<Value = String> {
    (prop::sample::select(IMPORTS), 0_usize..=3, any::<bool>()).prop_map(
        |(import, at, nested)| {
            let mut body = vec!["count = 1", "count = count + 2", "label = 'ok'"];
            body.insert(at, import);
            if nested {
                let mut script = String::from("def apply():\n");
                for line in body {
                    script.push_str("    ");
                    script.push_str(line);
                    script.push('\n');
                }
                script.push_str("    return {'action': 'allow'}\n");
                script
            } else {
                let mut script = body.join("\n");
                script.push_str("\n\ndef apply():\n    return {'action': 'allow'}\n");
                script
            }
        },
    )
}

/// A script with no forbidden constructs whose `apply()` returns a decision
/// literal, paired with the decision it should produce.
pub fn arb_decision_script() -> impl Strategy<Value = (String, Decision)> {
    let text = "[a-zA-Z0-9 ]{0,16}";
    let decision = prop_oneof![
        Just(Decision::Allow),
        Just(Decision::NoAction),
        text.prop_map(|reason| Decision::Deny { reason }),
        text.prop_map(|message| Decision::Info { message }),
        prop::collection::btree_map("[a-z]{1,6}", any::<i32>(), 0..4).prop_map(|changes| {
            Decision::Modify {
                changes: changes
                    .into_iter()
                    .map(|(key, value)| (key, serde_json::Value::from(value)))
                    .collect(),
            }
        }),
    ];
    (decision, any::<bool>(), 0_u8..4).prop_map(|(decision, via_local, loops)| {
        let literal = decision_literal(&decision);
        let mut script = format!("def apply():\n    total = 0\n    for i in range({loops}):\n        total += i\n");
        if via_local {
            script.push_str(&format!("    decision = {literal}\n    return decision\n"));
        } else {
            script.push_str(&format!("    return {literal}\n"));
        }
        (script, decision)
    })
}

fn decision_literal(decision: &Decision) -> String {
    match decision {
        Decision::Allow => "{'action': 'allow'}".to_owned(),
        Decision::NoAction => "{'action': 'no_action'}".to_owned(),
        Decision::Deny { reason } => format!("{{'action': 'deny', 'reason': '{reason}'}}"),
        Decision::Info { message } => format!("{{'action': 'info', 'message': '{message}'}}"),
        Decision::Modify { changes } => {
            let entries: Vec<String> = changes.iter().map(|(k, v)| format!("'{k}': {v}")).collect();
            format!("{{'action': 'modify', 'changes': {{{}}}}}", entries.join(", "))
        }
    }
}
