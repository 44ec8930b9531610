use std::fmt;

use serde::{Deserialize, Serialize};

use super::language::SubjectKind;
use super::value::{CompareOp, Value};

/// A single predicate of an [`ActionRule`].
///
/// Serialized as `{"type": ..., "value": ...}`. Condition types outside the
/// known vocabulary are kept as [`Condition::Other`] and evaluate to `true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawCondition", into = "RawCondition")]
pub enum Condition {
    HasParty(bool),
    HasBasePermission,
    Rating { op: CompareOp, threshold: i64 },
    UsernameEquals(String),
    PartyNameEquals(String),
    NumberValue(i64),
    Other { kind: String, value: Value },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawCondition {
    #[serde(rename = "type")]
    kind: String,
    value: Value,
}

fn rating_suffix(op: CompareOp) -> &'static str {
    match op {
        CompareOp::Eq => "eq",
        CompareOp::Neq => "neq",
        CompareOp::Gt => "gt",
        CompareOp::Gte => "gte",
        CompareOp::Lt => "lt",
        CompareOp::Lte => "lte",
    }
}

impl Condition {
    /// The `type` tag of this condition, e.g. `has_party` or `rating_gt`.
    #[must_use]
    pub fn kind(&self) -> String {
        match self {
            Condition::HasParty(_) => "has_party".to_owned(),
            Condition::HasBasePermission => "has_base_permission".to_owned(),
            Condition::Rating { op, .. } => format!("rating_{}", rating_suffix(*op)),
            Condition::UsernameEquals(_) => "username_equals".to_owned(),
            Condition::PartyNameEquals(_) => "party_name_equals".to_owned(),
            Condition::NumberValue(_) => "number_value".to_owned(),
            Condition::Other { kind, .. } => kind.clone(),
        }
    }

    #[must_use]
    pub fn value(&self) -> Value {
        match self {
            Condition::HasParty(v) => Value::Bool(*v),
            Condition::HasBasePermission => Value::Bool(true),
            Condition::Rating { threshold, .. } | Condition::NumberValue(threshold) => {
                Value::Int(*threshold)
            }
            Condition::UsernameEquals(s) | Condition::PartyNameEquals(s) => Value::String(s.clone()),
            Condition::Other { value, .. } => value.clone(),
        }
    }
}

impl From<RawCondition> for Condition {
    fn from(raw: RawCondition) -> Self {
        let rating_op = raw.kind.strip_prefix("rating_").and_then(|suffix| {
            [
                CompareOp::Eq,
                CompareOp::Neq,
                CompareOp::Gt,
                CompareOp::Gte,
                CompareOp::Lt,
                CompareOp::Lte,
            ]
            .into_iter()
            .find(|op| rating_suffix(*op) == suffix)
        });
        match (raw.kind.as_str(), &raw.value, rating_op) {
            ("has_party", Value::Bool(v), _) => Condition::HasParty(*v),
            ("has_base_permission", _, _) => Condition::HasBasePermission,
            (_, Value::Int(threshold), Some(op)) => Condition::Rating {
                op,
                threshold: *threshold,
            },
            ("username_equals", Value::String(s), _) => Condition::UsernameEquals(s.clone()),
            ("party_name_equals", Value::String(s), _) => Condition::PartyNameEquals(s.clone()),
            ("number_value", Value::Int(n), _) => Condition::NumberValue(*n),
            _ => Condition::Other {
                kind: raw.kind,
                value: raw.value,
            },
        }
    }
}

impl From<Condition> for RawCondition {
    fn from(condition: Condition) -> Self {
        RawCondition {
            kind: condition.kind(),
            value: condition.value(),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.kind(), self.value())
    }
}

/// A compiled permission rule for one canonical action.
///
/// Owned by a [`RuleIndex`](super::RuleIndex) and never mutated after
/// insertion; re-registration replaces the whole index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRule {
    pub action_name: String,
    /// The subject phrase as written in the law.
    pub subject_type: String,
    pub subject_kind: SubjectKind,
    pub conditions: Vec<Condition>,
    pub allow: bool,
    /// Higher values are evaluated first.
    pub priority: u32,
    pub source_law: String,
}

impl fmt::Display for ActionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = if self.allow { "allow" } else { "deny" };
        write!(
            f,
            "{verb} {} for '{}' (priority {}, {} conditions)",
            self.action_name,
            self.subject_type,
            self.priority,
            self.conditions.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_and_value() {
        let c = Condition::Rating {
            op: CompareOp::Gt,
            threshold: 10,
        };
        assert_eq!(c.kind(), "rating_gt");
        assert_eq!(c.value(), Value::Int(10));
        assert_eq!(Condition::HasParty(true).to_string(), "has_party = true");
    }

    #[test]
    fn serde_shape() {
        let json = serde_json::to_string(&Condition::UsernameEquals("ivan".into())).unwrap();
        assert_eq!(json, r#"{"type":"username_equals","value":"ivan"}"#);

        let c: Condition = serde_json::from_str(r#"{"type":"rating_lte","value":5}"#).unwrap();
        assert_eq!(
            c,
            Condition::Rating {
                op: CompareOp::Lte,
                threshold: 5
            }
        );
    }

    #[test]
    fn unknown_type_is_kept() {
        let c: Condition =
            serde_json::from_str(r#"{"type":"registered_before","value":"2020-01-01"}"#).unwrap();
        assert_eq!(c.kind(), "registered_before");
        assert!(matches!(c, Condition::Other { .. }));
    }

    #[test]
    fn rule_display() {
        let rule = ActionRule {
            action_name: "vote".into(),
            subject_type: "Пользователь".into(),
            subject_kind: SubjectKind::Ordinary,
            conditions: vec![Condition::HasParty(true)],
            allow: false,
            priority: 1,
            source_law: String::new(),
        };
        assert_eq!(
            rule.to_string(),
            "deny vote for 'Пользователь' (priority 1, 1 conditions)"
        );
    }
}
