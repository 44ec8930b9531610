use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::StatuteError;
use crate::script::{validate_script, Executor, Interrupt};
use crate::tracker::ExecutionTracker;
use crate::types::{
    validate_triggers, EngineConfig, ExecutionResult, LawContext, LawId, LawRecord, Trigger,
};

/// Descriptive data carried alongside a registered law.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LawMetadata {
    pub name: String,
    pub author_id: Option<i64>,
    pub party_id: Option<i64>,
}

impl From<&LawRecord> for LawMetadata {
    fn from(record: &LawRecord) -> Self {
        Self {
            name: record.name.clone(),
            author_id: record.author_id,
            party_id: record.party_id,
        }
    }
}

/// What [`LawManager::status`] reports. Unknown ids report as unregistered
/// and inactive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LawStatus {
    pub id: LawId,
    pub registered: bool,
    pub active: bool,
    pub metadata: LawMetadata,
    pub triggers: Vec<Trigger>,
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone)]
pub(crate) struct RegisteredLaw {
    pub(crate) id: LawId,
    pub(crate) metadata: LawMetadata,
    pub(crate) code: Arc<str>,
    pub(crate) triggers: Vec<Trigger>,
    pub(crate) active: bool,
}

impl RegisteredLaw {
    /// Validate triggers and script, producing a law ready for the table.
    pub(crate) fn new(
        id: LawId,
        metadata: LawMetadata,
        code: &str,
        triggers: Vec<Trigger>,
        active: bool,
    ) -> Result<Self, StatuteError> {
        validate_triggers(&triggers)?;
        validate_script(code)?;
        Ok(Self {
            id,
            metadata,
            code: code.into(),
            triggers,
            active,
        })
    }

    pub(crate) fn from_record(record: &LawRecord) -> Result<Self, StatuteError> {
        Self::new(
            record.id,
            LawMetadata::from(record),
            &record.text,
            record.triggers.clone(),
            record.active,
        )
    }

    fn matches(&self, context: &LawContext) -> bool {
        self.active && self.triggers.iter().any(|t| t.matches(context))
    }
}

/// Registration order is evaluation order.
#[derive(Debug, Clone, Default)]
pub(crate) struct LawTable {
    laws: Vec<Arc<RegisteredLaw>>,
}

impl LawTable {
    fn position(&self, id: LawId) -> Option<usize> {
        self.laws.iter().position(|l| l.id == id)
    }

    fn get(&self, id: LawId) -> Option<&RegisteredLaw> {
        self.laws.iter().find(|l| l.id == id).map(|law| &**law)
    }

    fn upsert(&mut self, law: RegisteredLaw) {
        let law = Arc::new(law);
        match self.position(law.id) {
            Some(i) => self.laws[i] = law,
            None => self.laws.push(law),
        }
    }
}

/// The registered-law table and the trigger loop over it.
///
/// Readers take a snapshot of the table at the start of every
/// [`trigger`](Self::trigger); writers serialize on one lock, build a new
/// table and swap it in, so an evaluation never observes a half-applied
/// change.
pub struct LawManager {
    executor: Executor,
    config: EngineConfig,
    table: RwLock<Arc<LawTable>>,
    writer: Mutex<()>,
    failures: Mutex<HashMap<LawId, u32>>,
    tracker: ExecutionTracker,
}

impl LawManager {
    pub fn new(executor: Executor, config: &EngineConfig) -> Self {
        Self {
            executor,
            config: config.clone(),
            table: RwLock::new(Arc::new(LawTable::default())),
            writer: Mutex::new(()),
            failures: Mutex::new(HashMap::new()),
            tracker: ExecutionTracker::new(config.history_limit),
        }
    }

    fn snapshot(&self) -> Arc<LawTable> {
        Arc::clone(&self.table.read())
    }

    /// Apply `change` to a copy of the table and publish it.
    fn update<R>(&self, change: impl FnOnce(&mut LawTable) -> R) -> R {
        let _writer = self.writer.lock();
        let mut next = LawTable::clone(&self.snapshot());
        let out = change(&mut next);
        *self.table.write() = Arc::new(next);
        out
    }

    /// Register (or re-register) a script law.
    ///
    /// # Errors
    ///
    /// Returns [`StatuteError::Trigger`] for malformed triggers and
    /// [`StatuteError::Validation`] when the script fails the safety gate.
    /// The table is unchanged on error.
    pub fn register(
        &self,
        law_id: LawId,
        code: &str,
        triggers: Vec<Trigger>,
        active: bool,
    ) -> Result<(), StatuteError> {
        let law = RegisteredLaw::new(law_id, LawMetadata::default(), code, triggers, active)?;
        self.insert(law);
        Ok(())
    }

    /// Register a persisted law, keeping its name and authorship.
    ///
    /// # Errors
    ///
    /// As for [`register`](Self::register), plus [`StatuteError::Rejected`]
    /// for records whose validation status is rejected.
    pub fn register_record(&self, record: &LawRecord) -> Result<(), StatuteError> {
        if !record.is_admissible() {
            return Err(StatuteError::Rejected(record.id));
        }
        self.insert(RegisteredLaw::from_record(record)?);
        Ok(())
    }

    pub(crate) fn insert(&self, law: RegisteredLaw) {
        info!(law_id = law.id, active = law.active, "law registered");
        self.failures.lock().remove(&law.id);
        self.update(|table| table.upsert(law));
    }

    /// Replace the whole table in one swap.
    pub(crate) fn replace_all(&self, laws: Vec<RegisteredLaw>) {
        let _writer = self.writer.lock();
        let table = LawTable {
            laws: laws.into_iter().map(Arc::new).collect(),
        };
        self.failures.lock().clear();
        *self.table.write() = Arc::new(table);
    }

    /// Returns `false` when the law is not registered.
    pub fn activate(&self, law_id: LawId) -> bool {
        self.failures.lock().remove(&law_id);
        self.set_active(law_id, true)
    }

    /// Returns `false` when the law is not registered.
    pub fn deactivate(&self, law_id: LawId) -> bool {
        self.set_active(law_id, false)
    }

    pub(crate) fn set_active(&self, law_id: LawId, active: bool) -> bool {
        let found = self.update(|table| match table.position(law_id) {
            Some(i) => {
                let mut law = RegisteredLaw::clone(&table.laws[i]);
                law.active = active;
                table.laws[i] = Arc::new(law);
                true
            }
            None => false,
        });
        if found {
            info!(law_id, active, "law activation changed");
        }
        found
    }

    /// Remove a law entirely. Returns `false` when it was not registered.
    pub fn unregister(&self, law_id: LawId) -> bool {
        self.failures.lock().remove(&law_id);
        let removed = self.update(|table| {
            let before = table.laws.len();
            table.laws.retain(|l| l.id != law_id);
            table.laws.len() != before
        });
        if removed {
            info!(law_id, "law unregistered");
        }
        removed
    }

    #[must_use]
    pub fn status(&self, law_id: LawId) -> LawStatus {
        let table = self.snapshot();
        let Some(law) = table.get(law_id) else {
            return LawStatus {
                id: law_id,
                ..LawStatus::default()
            };
        };
        LawStatus {
            id: law_id,
            registered: true,
            active: law.active,
            metadata: law.metadata.clone(),
            triggers: law.triggers.clone(),
            consecutive_failures: self.failures.lock().get(&law_id).copied().unwrap_or(0),
        }
    }

    /// Ids of every registered law, in evaluation order.
    #[must_use]
    pub fn law_ids(&self) -> Vec<LawId> {
        self.snapshot().laws.iter().map(|l| l.id).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot().laws.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn tracker(&self) -> &ExecutionTracker {
        &self.tracker
    }

    /// Run every active law with a trigger matching `context`.
    ///
    /// Each law is executed independently; a failing law yields a failed
    /// [`ExecutionResult`] and the rest still run. At most
    /// `max_laws_per_action` laws run per call.
    #[must_use]
    pub fn trigger(&self, context: &LawContext) -> Vec<ExecutionResult> {
        self.trigger_with(context, &Interrupt::new())
    }

    /// Like [`trigger`](Self::trigger), with a host-controlled interrupt
    /// shared by every execution in the batch.
    #[must_use]
    pub fn trigger_with(&self, context: &LawContext, interrupt: &Interrupt) -> Vec<ExecutionResult> {
        let table = self.snapshot();
        let matching: Vec<&RegisteredLaw> = table
            .laws
            .iter()
            .map(|law| &**law)
            .filter(|law| law.matches(context))
            .collect();
        let limit = self.config.max_laws_per_action;
        if matching.len() > limit {
            warn!(
                action = %context.action,
                matching = matching.len(),
                limit,
                "too many laws for one action; extra laws skipped"
            );
        }

        let mut results = Vec::with_capacity(matching.len().min(limit));
        for law in matching.into_iter().take(limit) {
            let result = self
                .executor
                .execute_with(&law.code, context, interrupt)
                .with_law_id(law.id);
            if self.config.detailed_logging {
                debug!(law_id = law.id, action = %context.action, success = result.success, "law executed");
            }
            self.tracker.track(&result);
            self.record_outcome(law.id, result.success);
            results.push(result);
        }
        results
    }

    fn record_outcome(&self, law_id: LawId, success: bool) {
        let failures = {
            let mut counts = self.failures.lock();
            if success {
                counts.remove(&law_id);
                return;
            }
            let count = counts.entry(law_id).or_insert(0);
            *count += 1;
            *count
        };
        if self.config.auto_deactivate_on_error && failures >= self.config.error_threshold {
            warn!(law_id, failures, "law deactivated after repeated failures");
            self.set_active(law_id, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::InMemoryData;
    use crate::types::{Decision, Schedule, TIME_CHECK_ACTION};

    const ALLOW: &str = "def apply():\n    return {'action': 'allow'}\n";
    const BROKEN: &str = "def apply():\n    return missing_name\n";

    fn manager(config: &EngineConfig) -> LawManager {
        LawManager::new(Executor::new(Arc::new(InMemoryData::new()), config), config)
    }

    fn on(actions: &[&str]) -> Vec<Trigger> {
        vec![Trigger::on_actions(actions.iter().copied())]
    }

    #[test]
    fn lifecycle() {
        let m = manager(&EngineConfig::default());
        assert!(!m.status(1).registered);

        m.register(1, ALLOW, on(&["vote"]), false).unwrap();
        let status = m.status(1);
        assert!(status.registered && !status.active);
        assert!(m.trigger(&LawContext::new("vote")).is_empty());

        assert!(m.activate(1));
        assert_eq!(m.trigger(&LawContext::new("vote")).len(), 1);
        assert!(m.trigger(&LawContext::new("post_news")).is_empty());

        assert!(m.deactivate(1));
        assert!(m.unregister(1));
        assert!(!m.unregister(1));
        assert!(!m.activate(1));
        assert!(m.is_empty());
    }

    #[test]
    fn registration_rejects_unsafe_scripts_and_bad_triggers() {
        let m = manager(&EngineConfig::default());
        let err = m
            .register(1, "import os\ndef apply():\n    pass\n", on(&["vote"]), true)
            .unwrap_err();
        assert!(matches!(err, StatuteError::Validation(_)));
        let err = m
            .register(1, ALLOW, vec![Trigger::Action { actions: vec![] }], true)
            .unwrap_err();
        assert!(matches!(err, StatuteError::Trigger(_)));
        assert!(m.is_empty());
    }

    #[test]
    fn failing_law_does_not_affect_others() {
        let m = manager(&EngineConfig::default());
        m.register(1, BROKEN, on(&["vote"]), true).unwrap();
        m.register(2, ALLOW, on(&["vote"]), true).unwrap();

        let results = m.trigger(&LawContext::for_user(5, "vote"));
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].law_id, Some(1));
        assert!(!results[0].success);
        assert_eq!(results[0].error.as_deref(), Some("name 'missing_name' is not defined"));
        assert_eq!(results[1].law_id, Some(2));
        assert_eq!(results[1].result, Some(Decision::Allow));
        assert_eq!(m.tracker().statistics(1).failed, 1);
    }

    #[test]
    fn time_triggers_fire_on_time_check() {
        let m = manager(&EngineConfig::default());
        m.register(
            1,
            ALLOW,
            vec![Trigger::Time {
                schedule: Schedule::Daily,
            }],
            true,
        )
        .unwrap();
        assert!(m.trigger(&LawContext::new("vote")).is_empty());
        assert_eq!(m.trigger(&LawContext::new(TIME_CHECK_ACTION)).len(), 1);
    }

    #[test]
    fn repeated_failures_deactivate() {
        let config = EngineConfig {
            error_threshold: 2,
            ..EngineConfig::default()
        };
        let m = manager(&config);
        m.register(1, BROKEN, on(&["vote"]), true).unwrap();
        let ctx = LawContext::new("vote");

        assert_eq!(m.trigger(&ctx).len(), 1);
        assert_eq!(m.status(1).consecutive_failures, 1);
        assert_eq!(m.trigger(&ctx).len(), 1);
        let status = m.status(1);
        assert!(!status.active);
        assert_eq!(status.consecutive_failures, 2);
        assert!(m.trigger(&ctx).is_empty());

        assert!(m.activate(1));
        assert_eq!(m.status(1).consecutive_failures, 0);
    }

    #[test]
    fn auto_deactivation_can_be_disabled() {
        let config = EngineConfig {
            error_threshold: 1,
            auto_deactivate_on_error: false,
            ..EngineConfig::default()
        };
        let m = manager(&config);
        m.register(1, BROKEN, on(&["vote"]), true).unwrap();
        let _ = m.trigger(&LawContext::new("vote"));
        assert!(m.status(1).active);
    }

    #[test]
    fn batch_is_capped() {
        let config = EngineConfig {
            max_laws_per_action: 2,
            ..EngineConfig::default()
        };
        let m = manager(&config);
        for id in 1..=3 {
            m.register(id, ALLOW, on(&["vote"]), true).unwrap();
        }
        let ids: Vec<_> = m
            .trigger(&LawContext::new("vote"))
            .iter()
            .map(|r| r.law_id)
            .collect();
        assert_eq!(ids, vec![Some(1), Some(2)]);
    }

    #[test]
    fn re_registration_keeps_position() {
        let m = manager(&EngineConfig::default());
        m.register(1, ALLOW, on(&["vote"]), true).unwrap();
        m.register(2, ALLOW, on(&["vote"]), true).unwrap();
        m.register(1, ALLOW, on(&["post"]), true).unwrap();
        assert_eq!(m.law_ids(), vec![1, 2]);
        assert_eq!(m.status(1).triggers, on(&["post"]));
    }

    #[test]
    fn record_metadata_is_reported() {
        let m = manager(&EngineConfig::default());
        let record = LawRecord::new(4, "Voting law", ALLOW)
            .with_author(9, Some(3))
            .with_triggers(on(&["vote"]));
        m.register_record(&record).unwrap();
        let status = m.status(4);
        assert_eq!(status.metadata.name, "Voting law");
        assert_eq!(status.metadata.author_id, Some(9));
        assert_eq!(status.metadata.party_id, Some(3));
    }
}
