use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::context::LawContext;

pub type LawId = i64;

/// The reserved action a host raises on every scheduled tick.
pub const TIME_CHECK_ACTION: &str = "time_check";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TriggerError {
    #[error("action trigger must list at least one action")]
    NoActions,

    #[error("malformed trigger list: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Schedule {
    Daily,
    Weekly,
    Monthly,
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Daily => write!(f, "daily"),
            Schedule::Weekly => write!(f, "weekly"),
            Schedule::Monthly => write!(f, "monthly"),
        }
    }
}

/// When a registered law runs. Persisted as
/// `{"type": "action", "actions": [...]}` or `{"type": "time", "schedule": "daily"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Trigger {
    Action { actions: Vec<String> },
    Time { schedule: Schedule },
}

impl Trigger {
    #[must_use]
    pub fn on_actions<I, S>(actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Trigger::Action {
            actions: actions.into_iter().map(Into::into).collect(),
        }
    }

    /// Time triggers ignore their schedule here: the host decides when to
    /// raise [`TIME_CHECK_ACTION`].
    #[must_use]
    pub fn matches(&self, context: &LawContext) -> bool {
        match self {
            Trigger::Action { actions } => actions.iter().any(|a| *a == context.action),
            Trigger::Time { .. } => context.action == TIME_CHECK_ACTION,
        }
    }

    /// # Errors
    ///
    /// Returns [`TriggerError::NoActions`] for an action trigger with an empty list.
    pub fn validate(&self) -> Result<(), TriggerError> {
        match self {
            Trigger::Action { actions } if actions.is_empty() => Err(TriggerError::NoActions),
            _ => Ok(()),
        }
    }

    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Trigger::Action { actions } => format!("On actions: {}", actions.join(", ")),
            Trigger::Time { schedule } => match schedule {
                Schedule::Daily => "Daily".to_owned(),
                Schedule::Weekly => "Weekly".to_owned(),
                Schedule::Monthly => "Monthly".to_owned(),
            },
        }
    }

    /// Parse and validate a persisted trigger list.
    ///
    /// # Errors
    ///
    /// Returns [`TriggerError`] when the JSON does not describe valid triggers.
    pub fn parse_list(input: &str) -> Result<Vec<Trigger>, TriggerError> {
        let triggers: Vec<Trigger> =
            serde_json::from_str(input).map_err(|e| TriggerError::Malformed(e.to_string()))?;
        validate_triggers(&triggers)?;
        Ok(triggers)
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// # Errors
///
/// Returns the first invalid trigger's [`TriggerError`].
pub fn validate_triggers(triggers: &[Trigger]) -> Result<(), TriggerError> {
    triggers.iter().try_for_each(Trigger::validate)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

/// A persisted law as the host stores it. `text` is either law text for the
/// rule path or a script for the trigger path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LawRecord {
    pub id: LawId,
    pub name: String,
    pub text: String,
    #[serde(default)]
    pub author_id: Option<i64>,
    #[serde(default)]
    pub party_id: Option<i64>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    #[serde(default)]
    pub validation_status: ValidationStatus,
    #[serde(default)]
    pub execution_count: u64,
    #[serde(default)]
    pub last_executed: Option<DateTime<Utc>>,
}

impl LawRecord {
    #[must_use]
    pub fn new(id: LawId, name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            text: text.into(),
            author_id: None,
            party_id: None,
            active: true,
            triggers: Vec::new(),
            validation_status: ValidationStatus::Pending,
            execution_count: 0,
            last_executed: None,
        }
    }

    #[must_use]
    pub fn with_triggers(mut self, triggers: Vec<Trigger>) -> Self {
        self.triggers = triggers;
        self
    }

    #[must_use]
    pub fn with_author(mut self, author_id: i64, party_id: Option<i64>) -> Self {
        self.author_id = Some(author_id);
        self.party_id = party_id;
        self
    }

    #[must_use]
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: ValidationStatus) -> Self {
        self.validation_status = status;
        self
    }

    #[must_use]
    pub fn is_script(&self) -> bool {
        !self.triggers.is_empty()
    }

    /// Rejected records are never registered. Pending ones are, and their
    /// `active` flag decides whether they take effect.
    #[must_use]
    pub fn is_admissible(&self) -> bool {
        self.validation_status != ValidationStatus::Rejected
    }
}
