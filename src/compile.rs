use crate::types::{
    ActionRule, Clause, CompareOp, CompileError, Condition, ConditionKind, LanguageConfig,
    LawStructure, Parameter, ParsedLaw, PlaceholderKind,
};

/// Compile a parsed law into one [`ActionRule`] per top-level action.
///
/// Nested groups are informational only and do not contribute rules.
pub(crate) fn compile(
    law: &ParsedLaw,
    law_name: &str,
    config: &LanguageConfig,
) -> Result<Vec<ActionRule>, CompileError> {
    if !law.is_valid() {
        return Err(CompileError::InvalidLaw {
            law: law_name.to_owned(),
            issues: law.errors.clone(),
        });
    }

    let structure = &law.structure;
    let subject_type = structure.subjects.first().cloned().unwrap_or_default();
    let subject_kind = config.subject_kind(&subject_type);
    let conditions = extract_conditions(structure, config);
    let negated = structure.negation;

    let rules: Vec<ActionRule> = structure
        .actions
        .iter()
        .map(|action| ActionRule {
            action_name: config.canonical_action(&action.phrase),
            subject_type: subject_type.clone(),
            subject_kind,
            conditions: conditions.clone(),
            allow: !negated,
            priority: u32::from(negated),
            source_law: law_name.to_owned(),
        })
        .collect();

    tracing::debug!(law = law_name, rules = rules.len(), negated, "compiled law");
    Ok(rules)
}

fn extract_conditions(structure: &LawStructure, config: &LanguageConfig) -> Vec<Condition> {
    let mut conditions = Vec::new();

    for clause in &structure.conditions {
        match config.condition_kind(&clause.phrase) {
            Some(ConditionKind::HasParty) => conditions.push(Condition::HasParty(true)),
            Some(ConditionKind::HasBasePermission) => {
                conditions.push(Condition::HasBasePermission);
            }
            Some(kind) => {
                if let Some(op) = rating_op(kind) {
                    conditions.extend(
                        numeric_parameters(clause)
                            .map(|threshold| Condition::Rating { op, threshold }),
                    );
                }
            }
            None => {}
        }
    }

    for (kind, value) in &structure.values {
        match kind {
            PlaceholderKind::User => conditions.push(Condition::UsernameEquals(value.clone())),
            PlaceholderKind::Party => conditions.push(Condition::PartyNameEquals(value.clone())),
            PlaceholderKind::Number => {
                if let Ok(n) = value.trim().parse::<i64>() {
                    conditions.push(Condition::NumberValue(n));
                }
            }
            PlaceholderKind::String | PlaceholderKind::Date => {}
        }
    }

    conditions
}

fn rating_op(kind: ConditionKind) -> Option<CompareOp> {
    match kind {
        ConditionKind::RatingGt => Some(CompareOp::Gt),
        ConditionKind::RatingLt => Some(CompareOp::Lt),
        ConditionKind::RatingGte => Some(CompareOp::Gte),
        ConditionKind::RatingLte => Some(CompareOp::Lte),
        ConditionKind::RatingEq => Some(CompareOp::Eq),
        ConditionKind::HasParty | ConditionKind::HasBasePermission => None,
    }
}

/// VALUE parameters that parse as integers; anything else is dropped.
fn numeric_parameters(clause: &Clause) -> impl Iterator<Item = i64> + '_ {
    clause.parameters.iter().filter_map(|p| match p {
        Parameter::Value { value, .. } => value.trim().parse::<i64>().ok(),
        Parameter::Operator { .. } => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::LawParser;
    use crate::types::SubjectKind;

    fn compile_text(text: &str) -> Result<Vec<ActionRule>, CompileError> {
        let parser = LawParser::default();
        compile(&parser.parse(text), "test law", parser.config())
    }

    #[test]
    fn party_member_vote() {
        let rules = compile_text("Пользователь член партии голосовать").unwrap();
        assert_eq!(rules.len(), 1);
        let rule = &rules[0];
        assert_eq!(rule.action_name, "vote");
        assert_eq!(rule.subject_type, "Пользователь");
        assert_eq!(rule.subject_kind, SubjectKind::Ordinary);
        assert_eq!(rule.conditions, vec![Condition::HasParty(true)]);
        assert!(rule.allow);
        assert_eq!(rule.priority, 0);
        assert_eq!(rule.source_law, "test law");
    }

    #[test]
    fn negation_compiles_to_priority_deny() {
        let rules = compile_text("Пользователь не голосовать").unwrap();
        assert!(!rules[0].allow);
        assert_eq!(rules[0].priority, 1);
    }

    #[test]
    fn one_rule_per_action_sharing_conditions() {
        let rules =
            compile_text("Правитель с рейтингом > 10; создавать законы; удалять законы").unwrap();
        let names: Vec<&str> = rules.iter().map(|r| r.action_name.as_str()).collect();
        assert_eq!(names, vec!["create_law", "delete_law"]);
        for rule in &rules {
            assert_eq!(rule.subject_kind, SubjectKind::Privileged);
            assert_eq!(
                rule.conditions,
                vec![Condition::Rating {
                    op: CompareOp::Gt,
                    threshold: 10
                }]
            );
        }
    }

    #[test]
    fn non_numeric_rating_is_dropped() {
        let rules = compile_text("Пользователь с рейтингом < много голосовать").unwrap();
        assert!(rules[0].conditions.is_empty());
    }

    #[test]
    fn placeholder_values_become_conditions() {
        let rules = compile_text(
            "Пользователь; [ПОЛЬЗОВАТЕЛЬ]:ivan; [ПАРТИЯ]:Зелёные; [ЧИСЛО]:7; голосовать",
        )
        .unwrap();
        assert_eq!(
            rules[0].conditions,
            vec![
                Condition::NumberValue(7),
                Condition::UsernameEquals("ivan".into()),
                Condition::PartyNameEquals("Зелёные".into()),
            ]
        );
    }

    #[test]
    fn unmapped_action_is_slugged() {
        let mut config = crate::LanguageConfig::russian();
        config.keywords.actions.push("Подавать Петиции".into());
        let parser = LawParser::new(config);
        let law = parser.parse("Пользователь Подавать Петиции");
        let rules = compile(&law, "petitions", parser.config()).unwrap();
        assert_eq!(rules[0].action_name, "подавать_петиции");
    }

    #[test]
    fn invalid_law_is_rejected() {
        let err = compile_text("член партии голосовать").unwrap_err();
        assert_eq!(
            err,
            CompileError::InvalidLaw {
                law: "test law".into(),
                issues: vec![crate::parse::ParseIssue::NoSubjects],
            }
        );
    }

    #[test]
    fn conditions_without_actions_compile_to_nothing() {
        assert!(compile_text("Пользователь член партии").unwrap().is_empty());
    }
}
