use std::sync::Arc;
use std::thread;
use std::time::Duration;

use statute::{
    Decision, EngineConfig, InMemoryData, Interrupt, LawContext, LawEngine, Subject, Trigger,
};

fn engine() -> Arc<LawEngine> {
    Arc::new(LawEngine::new(
        Arc::new(InMemoryData::new()),
        EngineConfig::default(),
    ))
}

#[test]
fn permission_checks_across_threads() {
    let engine = engine();
    engine
        .compile_and_register(1, "Пользователь член партии голосовать", vec![], true)
        .unwrap();
    engine
        .compile_and_register(2, "Правитель модерировать", vec![], true)
        .unwrap();

    let cases = [
        (Subject::new(1, "member").with_party(3, "Зелёные"), "vote", true),
        (Subject::new(2, "loner"), "vote", false),
        (Subject::new(3, "ruler").with_admin(true), "moderate", true),
        (Subject::new(4, "citizen"), "moderate", false),
    ];

    let handles: Vec<_> = cases
        .into_iter()
        .map(|(subject, action, expected)| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for _ in 0..200 {
                    let allowed =
                        engine.check_permission(Some(&subject), action, &LawContext::default());
                    assert_eq!(allowed, expected, "{} {action}", subject.username);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn registration_while_checking() {
    let engine = engine();
    engine
        .compile_and_register(1, "Пользователь голосовать", vec![], true)
        .unwrap();
    let user = Subject::new(1, "anna");

    let writer = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            for id in 2..50 {
                engine
                    .compile_and_register(id, "Пользователь создавать законы", vec![], true)
                    .unwrap();
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let user = user.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    // Every snapshot contains the first law, whatever else has landed.
                    let index = engine.rule_index();
                    assert!(index.check_permission(Some(&user), "vote", &LawContext::default()));
                    assert_eq!(index.rules_for("vote").len(), 1);
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(engine.rule_index().rules_for("create_law").len(), 48);
}

#[test]
fn concurrent_triggers_are_tracked() {
    let engine = engine();
    engine
        .compile_and_register(
            1,
            "def apply():\n    api.log_action('seen', str(context.user_id))\n    return {'action': 'allow'}\n",
            vec![Trigger::on_actions(["vote"])],
            true,
        )
        .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|user_id| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                let results = engine.trigger(&LawContext::for_user(user_id, "vote"));
                assert_eq!(results.len(), 1);
                assert_eq!(results[0].result, Some(Decision::Allow));
                assert_eq!(results[0].logs, vec![format!("seen - {user_id}")]);
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    let stats = engine.tracker().statistics(1);
    assert_eq!(stats.total, 8);
    assert_eq!(stats.successful, 8);
}

#[test]
fn watchdog_interrupts_a_runaway_law() {
    let engine = engine();
    engine
        .compile_and_register(
            1,
            "def apply():\n    n = 0\n    while True:\n        n += 1\n",
            vec![Trigger::on_actions(["vote"])],
            true,
        )
        .unwrap();

    let interrupt = Interrupt::new();
    let watchdog = {
        let interrupt = interrupt.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            interrupt.trigger();
        })
    };

    let results = engine.trigger_with(&LawContext::for_user(1, "vote"), &interrupt);
    watchdog.join().unwrap();
    assert_eq!(results.len(), 1);
    assert!(!results[0].success);
    assert_eq!(results[0].error.as_deref(), Some("execution interrupted"));
}

#[test]
fn re_registration_across_paths_lands_in_one_table() {
    let engine = engine();
    let script = "def apply():\n    return {'action': 'allow'}\n";

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for i in 0..100 {
                    if (i + t) % 2 == 0 {
                        engine
                            .compile_and_register(1, "Пользователь голосовать", vec![], true)
                            .unwrap();
                    } else {
                        engine
                            .compile_and_register(1, script, vec![Trigger::on_actions(["vote"])], true)
                            .unwrap();
                    }
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    let as_rule = !engine.rule_index().rules_for("vote").is_empty();
    let as_script = engine.status(1).registered;
    assert!(as_rule != as_script, "rule: {as_rule}, script: {as_script}");
}

#[test]
fn persisted_toggles_from_many_threads_stay_consistent() {
    let engine = engine();
    engine
        .compile_and_register(1, "Пользователь голосовать", vec![], true)
        .unwrap();
    let user = Subject::new(1, "anna");

    let togglers: Vec<_> = (0..4)
        .map(|t| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for i in 0..100 {
                    if (i + t) % 2 == 0 {
                        engine.deactivate_persisted(1).unwrap();
                    } else {
                        engine.activate_persisted(1).unwrap();
                    }
                }
            })
        })
        .collect();
    for toggler in togglers {
        toggler.join().unwrap();
    }

    engine.activate(1);
    assert!(engine.check_permission(Some(&user), "vote", &LawContext::default()));
    engine.deactivate(1);
    assert!(!engine.check_permission(Some(&user), "vote", &LawContext::default()));
    assert!(engine.is_registered(1));
}
