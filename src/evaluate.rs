use std::time::Instant;

use crate::types::{ActionRule, Condition, LawContext, PermissionReport, Subject, SubjectKind};

/// First rule (in stored, priority-descending order) whose subject predicate
/// and every condition hold.
pub(crate) fn first_match<'r>(
    rules: &'r [ActionRule],
    subject: Option<&Subject>,
    ctx: &LawContext,
) -> Option<&'r ActionRule> {
    rules.iter().find(|rule| rule_matches(rule, subject, ctx))
}

pub(crate) fn evaluate_detailed(
    action: &str,
    rules: &[ActionRule],
    subject: Option<&Subject>,
    ctx: &LawContext,
) -> PermissionReport {
    let start = Instant::now();
    let mut considered = 0;
    let mut matched = None;
    for rule in rules {
        considered += 1;
        if rule_matches(rule, subject, ctx) {
            matched = Some(rule.clone());
            break;
        }
    }
    PermissionReport::new(action, matched, considered, rules.len(), start.elapsed())
}

fn rule_matches(rule: &ActionRule, subject: Option<&Subject>, ctx: &LawContext) -> bool {
    subject_matches(rule.subject_kind, subject)
        && rule
            .conditions
            .iter()
            .all(|c| condition_holds(c, subject, ctx))
}

fn subject_matches(kind: SubjectKind, subject: Option<&Subject>) -> bool {
    match kind {
        SubjectKind::Ordinary => subject.is_some(),
        SubjectKind::Privileged => subject.is_some_and(|s| s.admin),
        SubjectKind::Unrestricted => true,
    }
}

/// Anonymous subjects read as no party, rating 0 and an empty username.
/// Conditions outside the known vocabulary hold.
fn condition_holds(condition: &Condition, subject: Option<&Subject>, _ctx: &LawContext) -> bool {
    match condition {
        Condition::HasParty(expected) => subject.is_some_and(Subject::has_party) == *expected,
        Condition::Rating { op, threshold } => {
            let rating = subject.map_or(0, |s| s.rating);
            op.holds(&rating, threshold)
        }
        Condition::UsernameEquals(name) => subject.map_or("", |s| s.username.as_str()) == name,
        Condition::PartyNameEquals(name) => subject
            .and_then(|s| s.party_name.as_deref())
            .is_some_and(|party| party == name),
        Condition::HasBasePermission | Condition::NumberValue(_) | Condition::Other { .. } => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CompareOp, Value};

    fn rule(kind: SubjectKind, conditions: Vec<Condition>, allow: bool) -> ActionRule {
        ActionRule {
            action_name: "vote".into(),
            subject_type: String::new(),
            subject_kind: kind,
            conditions,
            allow,
            priority: u32::from(!allow),
            source_law: String::new(),
        }
    }

    fn holds(condition: Condition, subject: Option<&Subject>) -> bool {
        condition_holds(&condition, subject, &LawContext::default())
    }

    #[test]
    fn subject_predicates() {
        let user = Subject::new(1, "anna");
        let admin = Subject::new(2, "root").with_admin(true);
        assert!(subject_matches(SubjectKind::Ordinary, Some(&user)));
        assert!(!subject_matches(SubjectKind::Ordinary, None));
        assert!(!subject_matches(SubjectKind::Privileged, Some(&user)));
        assert!(subject_matches(SubjectKind::Privileged, Some(&admin)));
        assert!(subject_matches(SubjectKind::Unrestricted, None));
    }

    #[test]
    fn party_membership() {
        let member = Subject::new(1, "a").with_party(4, "Green");
        let loner = Subject::new(2, "b");
        assert!(holds(Condition::HasParty(true), Some(&member)));
        assert!(!holds(Condition::HasParty(true), Some(&loner)));
        assert!(holds(Condition::HasParty(false), Some(&loner)));
        assert!(!holds(Condition::HasParty(true), None));
    }

    #[test]
    fn rating_comparisons() {
        let s = Subject::new(1, "a").with_rating(50);
        let gt = |t| Condition::Rating {
            op: CompareOp::Gt,
            threshold: t,
        };
        assert!(holds(gt(49), Some(&s)));
        assert!(!holds(gt(50), Some(&s)));
        assert!(holds(
            Condition::Rating {
                op: CompareOp::Lt,
                threshold: 1
            },
            None
        ));
    }

    #[test]
    fn name_equality() {
        let s = Subject::new(1, "ivan").with_party(2, "Зелёные");
        assert!(holds(Condition::UsernameEquals("ivan".into()), Some(&s)));
        assert!(!holds(Condition::UsernameEquals("petr".into()), Some(&s)));
        assert!(holds(Condition::PartyNameEquals("Зелёные".into()), Some(&s)));
        assert!(!holds(Condition::PartyNameEquals("Зелёные".into()), None));
    }

    #[test]
    fn unknown_conditions_hold() {
        assert!(holds(
            Condition::Other {
                kind: "registered_before".into(),
                value: Value::String("2020-01-01".into())
            },
            None
        ));
        assert!(holds(Condition::NumberValue(3), None));
        assert!(holds(Condition::HasBasePermission, None));
    }

    #[test]
    fn first_match_short_circuits() {
        let rules = vec![
            rule(SubjectKind::Ordinary, vec![Condition::HasParty(true)], false),
            rule(SubjectKind::Ordinary, vec![], true),
        ];
        let member = Subject::new(1, "a").with_party(1, "P");
        let loner = Subject::new(2, "b");
        let ctx = LawContext::default();
        assert!(!first_match(&rules, Some(&member), &ctx).unwrap().allow);
        assert!(first_match(&rules, Some(&loner), &ctx).unwrap().allow);
        assert!(first_match(&rules, None, &ctx).is_none());
    }

    #[test]
    fn detailed_counts_considered_rules() {
        let rules = vec![
            rule(SubjectKind::Privileged, vec![], false),
            rule(SubjectKind::Ordinary, vec![], true),
        ];
        let user = Subject::new(1, "a");
        let report = evaluate_detailed("vote", &rules, Some(&user), &LawContext::default());
        assert!(report.allowed());
        assert_eq!(report.rules_considered(), 2);
        assert_eq!(report.rules_total(), 2);
    }
}
