use std::fmt;
use std::time::Duration;

use super::rule::ActionRule;

/// Detailed permission check returned by
/// [`RuleIndex::explain()`](super::index::RuleIndex::explain).
///
/// Contains the rule that decided the check (if any), how many rules were
/// tried, and the wall-clock duration of the check.
#[derive(Debug, Clone)]
#[must_use]
pub struct PermissionReport {
    action: String,
    matched: Option<ActionRule>,
    rules_considered: usize,
    rules_total: usize,
    duration: Duration,
}

impl PermissionReport {
    pub(crate) fn new(
        action: &str,
        matched: Option<ActionRule>,
        rules_considered: usize,
        rules_total: usize,
        duration: Duration,
    ) -> Self {
        Self {
            action: action.to_owned(),
            matched,
            rules_considered,
            rules_total,
            duration,
        }
    }

    /// Same answer as [`RuleIndex::check_permission()`](super::index::RuleIndex::check_permission).
    #[must_use]
    pub fn allowed(&self) -> bool {
        self.matched.as_ref().is_some_and(|r| r.allow)
    }

    #[must_use]
    pub fn action(&self) -> &str {
        &self.action
    }

    /// The deciding rule; `None` means the default deny applied.
    #[must_use]
    pub fn matched_rule(&self) -> Option<&ActionRule> {
        self.matched.as_ref()
    }

    #[must_use]
    pub fn rules_considered(&self) -> usize {
        self.rules_considered
    }

    #[must_use]
    pub fn rules_total(&self) -> usize {
        self.rules_total
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl fmt::Display for PermissionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.allowed() { "allowed" } else { "denied" };
        write!(f, "{}: {verdict}", self.action)?;
        match &self.matched {
            Some(rule) => write!(f, " by {rule}")?,
            None => write!(f, " by default")?,
        }
        write!(
            f,
            ", considered {}/{} rules, duration: {:?}",
            self.rules_considered, self.rules_total, self.duration
        )
    }
}
