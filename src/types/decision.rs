use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use super::law::LawId;

/// Reason used when a deny decision carries none.
pub const DEFAULT_DENY_REASON: &str = "action denied by law";
/// Message used when an info decision carries none.
pub const DEFAULT_INFO_MESSAGE: &str = "information from the law system";

/// The structured outcome of one law script.
///
/// Serialized with an `action` tag, e.g. `{"action": "deny", "reason": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Deny { reason: String },
    Modify { changes: Map<String, Json> },
    Info { message: String },
    NoAction,
}

impl Decision {
    /// The `action` tag of this decision.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Deny { .. } => "deny",
            Decision::Modify { .. } => "modify",
            Decision::Info { .. } => "info",
            Decision::NoAction => "no_action",
        }
    }

    /// Short human-readable label for logs and admin views.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Decision::Allow => "allowed".to_owned(),
            Decision::Deny { reason } => format!("denied: {reason}"),
            Decision::Modify { changes } => {
                let keys: Vec<&str> = changes.keys().map(String::as_str).collect();
                format!("modified: {}", keys.join(", "))
            }
            Decision::Info { message } => format!("info: {message}"),
            Decision::NoAction => "no action".to_owned(),
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Outcome of executing one law. `result` is set exactly when `success` is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Set by the manager; `None` for direct executor calls.
    pub law_id: Option<LawId>,
    pub success: bool,
    pub error: Option<String>,
    pub result: Option<Decision>,
    /// Messages recorded through `api.log_action`.
    #[serde(default)]
    pub logs: Vec<String>,
}

impl ExecutionResult {
    #[must_use]
    pub fn ok(decision: Decision, logs: Vec<String>) -> Self {
        Self {
            law_id: None,
            success: true,
            error: None,
            result: Some(decision),
            logs,
        }
    }

    #[must_use]
    pub fn failed(error: impl Into<String>, logs: Vec<String>) -> Self {
        Self {
            law_id: None,
            success: false,
            error: Some(error.into()),
            result: None,
            logs,
        }
    }

    #[must_use]
    pub fn with_law_id(mut self, law_id: LawId) -> Self {
        self.law_id = Some(law_id);
        self
    }
}

/// A trigger batch folded into a single answer for the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[must_use]
pub struct Verdict {
    pub allowed: bool,
    pub reason: Option<String>,
    pub modifications: Map<String, Json>,
    pub info_messages: Vec<String>,
}

impl Default for Verdict {
    fn default() -> Self {
        Self {
            allowed: true,
            reason: None,
            modifications: Map::new(),
            info_messages: Vec::new(),
        }
    }
}

impl Verdict {
    /// Fold results in order. Failed executions are ignored; the first deny
    /// wins and stops the fold; modify changes merge with later keys winning;
    /// info messages accumulate.
    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a ExecutionResult>) -> Self {
        let mut verdict = Self::default();
        for decision in results
            .into_iter()
            .filter(|r| r.success)
            .filter_map(|r| r.result.as_ref())
        {
            match decision {
                Decision::Deny { reason } => {
                    verdict.allowed = false;
                    verdict.reason = Some(reason.clone());
                    break;
                }
                Decision::Modify { changes } => {
                    verdict
                        .modifications
                        .extend(changes.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                Decision::Info { message } => verdict.info_messages.push(message.clone()),
                Decision::Allow | Decision::NoAction => {}
            }
        }
        verdict
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.allowed, &self.reason) {
            (false, Some(reason)) => write!(f, "denied: {reason}")?,
            (false, None) => write!(f, "denied")?,
            (true, _) => write!(f, "allowed")?,
        }
        if !self.modifications.is_empty() {
            write!(f, ", {} modifications", self.modifications.len())?;
        }
        if !self.info_messages.is_empty() {
            write!(f, ", {} messages", self.info_messages.len())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn modify(value: Json) -> Decision {
        match value {
            Json::Object(changes) => Decision::Modify { changes },
            _ => unreachable!(),
        }
    }

    #[test]
    fn decision_wire_shape() {
        let deny = Decision::Deny { reason: "x".into() };
        assert_eq!(
            serde_json::to_value(&deny).unwrap(),
            json!({"action": "deny", "reason": "x"})
        );
        let none: Decision = serde_json::from_value(json!({"action": "no_action"})).unwrap();
        assert_eq!(none, Decision::NoAction);
    }

    #[test]
    fn describe_labels() {
        assert_eq!(Decision::Allow.describe(), "allowed");
        assert_eq!(modify(json!({"weight": 2})).describe(), "modified: weight");
        assert_eq!(Decision::NoAction.to_string(), "no action");
    }

    #[test]
    fn first_deny_wins() {
        let results = vec![
            ExecutionResult::ok(Decision::Info { message: "a".into() }, vec![]),
            ExecutionResult::ok(Decision::Deny { reason: "first".into() }, vec![]),
            ExecutionResult::ok(Decision::Deny { reason: "second".into() }, vec![]),
            ExecutionResult::ok(Decision::Info { message: "b".into() }, vec![]),
        ];
        let verdict = Verdict::from_results(&results);
        assert!(!verdict.allowed);
        assert_eq!(verdict.reason.as_deref(), Some("first"));
        assert_eq!(verdict.info_messages, vec!["a"]);
    }

    #[test]
    fn modifications_merge_and_failures_are_ignored() {
        let results = vec![
            ExecutionResult::ok(modify(json!({"a": 1, "b": 1})), vec![]),
            ExecutionResult::failed("boom", vec![]),
            ExecutionResult::ok(modify(json!({"b": 2})), vec![]),
        ];
        let verdict = Verdict::from_results(&results);
        assert!(verdict.allowed);
        assert_eq!(verdict.modifications.get("a"), Some(&json!(1)));
        assert_eq!(verdict.modifications.get("b"), Some(&json!(2)));
        assert_eq!(verdict.to_string(), "allowed, 2 modifications");
    }

    #[test]
    fn empty_batch_allows() {
        let verdict = Verdict::from_results(&Vec::<ExecutionResult>::new());
        assert_eq!(verdict, Verdict::default());
    }
}
