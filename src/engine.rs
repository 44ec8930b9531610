use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{info, warn};

use crate::error::StatuteError;
use crate::manager::{LawManager, LawStatus, RegisteredLaw};
use crate::parse::LawParser;
use crate::script::{DataSource, Executor, Interrupt};
use crate::store::LawStore;
use crate::tracker::ExecutionTracker;
use crate::types::{
    ActionRule, EngineConfig, ExecutionResult, LawContext, LawId, LawRecord, ParsedLaw,
    PermissionReport, RuleIndex, Subject, Trigger, Verdict,
};

/// A natural-language law compiled into permission rules.
#[derive(Debug, Clone)]
struct RuleLaw {
    id: LawId,
    active: bool,
    rules: Vec<ActionRule>,
}

/// Registered rule laws plus the index built from the active ones.
#[derive(Debug, Clone, Default)]
struct RuleState {
    laws: Vec<RuleLaw>,
    index: Arc<RuleIndex>,
}

impl RuleState {
    fn with_laws(laws: Vec<RuleLaw>) -> Self {
        let mut index = RuleIndex::new();
        for law in laws.iter().filter(|l| l.active) {
            for rule in &law.rules {
                index.insert(rule.clone());
            }
        }
        Self {
            laws,
            index: Arc::new(index),
        }
    }

    fn position(&self, id: LawId) -> Option<usize> {
        self.laws.iter().position(|l| l.id == id)
    }
}

/// Outcome of [`LawEngine::reload`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadSummary {
    pub rule_laws: usize,
    pub script_laws: usize,
    /// Laws left out, with the reason.
    pub skipped: Vec<(LawId, String)>,
}

/// The host-facing facade over both law paths.
///
/// Laws without triggers are natural-language permission laws: they are
/// parsed, compiled and merged into a [`RuleIndex`] answered by
/// [`check_permission`](Self::check_permission). Laws with triggers are
/// scripts run by [`trigger`](Self::trigger).
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use statute::{EngineConfig, InMemoryData, LawContext, LawEngine, Subject, Trigger};
///
/// let engine = LawEngine::new(Arc::new(InMemoryData::new()), EngineConfig::default());
/// engine.compile_and_register(1, "Пользователь член партии голосовать", vec![], true).unwrap();
/// engine
///     .compile_and_register(
///         2,
///         "def apply():\n    return {'action': 'info', 'message': 'counted'}\n",
///         vec![Trigger::on_actions(["vote"])],
///         true,
///     )
///     .unwrap();
///
/// let member = Subject::new(7, "anna").with_party(3, "Green");
/// assert!(engine.check_permission(Some(&member), "vote", &LawContext::default()));
///
/// let verdict = engine.check(&LawContext::for_user(7, "vote"));
/// assert!(verdict.allowed);
/// assert_eq!(verdict.info_messages, vec!["counted"]);
/// ```
pub struct LawEngine {
    parser: LawParser,
    rules: RwLock<Arc<RuleState>>,
    writer: Mutex<()>,
    manager: LawManager,
    store: Option<Arc<dyn LawStore>>,
}

impl LawEngine {
    pub fn new(data: Arc<dyn DataSource>, config: EngineConfig) -> Self {
        let executor = Executor::new(data, &config);
        Self {
            parser: LawParser::default(),
            rules: RwLock::new(Arc::new(RuleState::default())),
            writer: Mutex::new(()),
            manager: LawManager::new(executor, &config),
            store: None,
        }
    }

    #[must_use]
    pub fn with_parser(mut self, parser: LawParser) -> Self {
        self.parser = parser;
        self
    }

    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn LawStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn parser(&self) -> &LawParser {
        &self.parser
    }

    #[must_use]
    pub fn parse(&self, text: &str) -> ParsedLaw {
        self.parser.parse(text)
    }

    /// The current rule index. Later registrations do not affect a snapshot
    /// already taken.
    #[must_use]
    pub fn rule_index(&self) -> Arc<RuleIndex> {
        Arc::clone(&self.rules.read().index)
    }

    #[must_use]
    pub fn tracker(&self) -> &ExecutionTracker {
        self.manager.tracker()
    }

    /// Apply `change` to a copy of the rule laws and publish the rebuilt
    /// index. The guard shows the caller holds `self.writer`, which covers
    /// every change spanning the rule state and the script table.
    fn update_rules<R>(
        &self,
        _writer: &MutexGuard<'_, ()>,
        change: impl FnOnce(&mut Vec<RuleLaw>) -> R,
    ) -> R {
        let mut laws = self.rules.read().laws.clone();
        let out = change(&mut laws);
        *self.rules.write() = Arc::new(RuleState::with_laws(laws));
        out
    }

    fn compile_rules(&self, name: &str, text: &str) -> Result<Vec<ActionRule>, StatuteError> {
        let parsed = self.parser.parse(text);
        Ok(crate::compile::compile(&parsed, name, self.parser.config())?)
    }

    /// Register a law on the path its triggers select: no triggers means a
    /// permission law, otherwise a script. Re-registering an id replaces it.
    ///
    /// # Errors
    ///
    /// [`StatuteError::Compile`] for permission laws that do not parse;
    /// [`StatuteError::Validation`] or [`StatuteError::Trigger`] for scripts.
    pub fn compile_and_register(
        &self,
        law_id: LawId,
        text: &str,
        triggers: Vec<Trigger>,
        active: bool,
    ) -> Result<(), StatuteError> {
        let record = LawRecord::new(law_id, law_id.to_string(), text)
            .with_triggers(triggers)
            .with_active(active);
        self.register_record(&record)
    }

    /// [`compile_and_register`](Self::compile_and_register) for a persisted
    /// record, keeping its name.
    ///
    /// # Errors
    ///
    /// As for [`compile_and_register`](Self::compile_and_register), plus
    /// [`StatuteError::Rejected`] for records whose validation status is
    /// rejected.
    pub fn register_record(&self, record: &LawRecord) -> Result<(), StatuteError> {
        if !record.is_admissible() {
            return Err(StatuteError::Rejected(record.id));
        }
        if record.is_script() {
            let law = RegisteredLaw::from_record(record)?;
            let writer = self.writer.lock();
            self.remove_rule_law(&writer, record.id);
            self.manager.insert(law);
            return Ok(());
        }
        let rules = self.compile_rules(&record.name, &record.text)?;
        let law = RuleLaw {
            id: record.id,
            active: record.active,
            rules,
        };
        let writer = self.writer.lock();
        self.manager.unregister(record.id);
        self.update_rules(&writer, |laws| match laws.iter().position(|l| l.id == law.id) {
            Some(i) => laws[i] = law,
            None => laws.push(law),
        });
        drop(writer);
        info!(law_id = record.id, name = %record.name, "permission law registered");
        Ok(())
    }

    fn remove_rule_law(&self, writer: &MutexGuard<'_, ()>, law_id: LawId) -> bool {
        if self.rules.read().position(law_id).is_none() {
            return false;
        }
        self.update_rules(writer, |laws| {
            laws.retain(|l| l.id != law_id);
            true
        })
    }

    fn set_active_locked(&self, writer: &MutexGuard<'_, ()>, law_id: LawId, active: bool) -> bool {
        if self.rules.read().position(law_id).is_none() {
            return if active {
                self.manager.activate(law_id)
            } else {
                self.manager.deactivate(law_id)
            };
        }
        self.update_rules(writer, |laws| {
            laws.iter_mut()
                .filter(|l| l.id == law_id)
                .for_each(|l| l.active = active);
            true
        })
    }

    /// Returns `false` when no law has this id.
    pub fn activate(&self, law_id: LawId) -> bool {
        let writer = self.writer.lock();
        self.set_active_locked(&writer, law_id, true)
    }

    /// Returns `false` when no law has this id.
    pub fn deactivate(&self, law_id: LawId) -> bool {
        let writer = self.writer.lock();
        self.set_active_locked(&writer, law_id, false)
    }

    /// Returns `false` when no law has this id.
    pub fn unregister(&self, law_id: LawId) -> bool {
        let writer = self.writer.lock();
        self.remove_rule_law(&writer, law_id) || self.manager.unregister(law_id)
    }

    #[must_use]
    pub fn is_registered(&self, law_id: LawId) -> bool {
        let _writer = self.writer.lock();
        self.rules.read().position(law_id).is_some() || self.manager.status(law_id).registered
    }

    fn is_active(&self, _writer: &MutexGuard<'_, ()>, law_id: LawId) -> Option<bool> {
        let rules = self.rules.read();
        if let Some(i) = rules.position(law_id) {
            return Some(rules.laws[i].active);
        }
        drop(rules);
        let status = self.manager.status(law_id);
        status.registered.then_some(status.active)
    }

    /// Status of a script law. Permission laws report through
    /// [`is_registered`](Self::is_registered) and the rule index.
    #[must_use]
    pub fn status(&self, law_id: LawId) -> LawStatus {
        self.manager.status(law_id)
    }

    /// Activate in memory and persist the flag, restoring the previous state
    /// if the store write fails.
    ///
    /// # Errors
    ///
    /// [`StatuteError::UnknownLaw`] for unregistered ids, [`StatuteError::Store`]
    /// when the write fails.
    pub fn activate_persisted(&self, law_id: LawId) -> Result<(), StatuteError> {
        self.set_active_persisted(law_id, true)
    }

    /// # Errors
    ///
    /// As for [`activate_persisted`](Self::activate_persisted).
    pub fn deactivate_persisted(&self, law_id: LawId) -> Result<(), StatuteError> {
        self.set_active_persisted(law_id, false)
    }

    fn set_active_persisted(&self, law_id: LawId, active: bool) -> Result<(), StatuteError> {
        // Held through the store write so the rollback target stays current.
        let writer = self.writer.lock();
        let previous = self
            .is_active(&writer, law_id)
            .ok_or(StatuteError::UnknownLaw(law_id))?;
        self.set_active_locked(&writer, law_id, active);
        let Some(store) = &self.store else {
            return Ok(());
        };
        if let Err(err) = store.set_active(law_id, active) {
            self.set_active_locked(&writer, law_id, previous);
            warn!(law_id, error = %err, "persisting activation failed; rolled back");
            return Err(err.into());
        }
        Ok(())
    }

    /// Rebuild both law tables from the store.
    ///
    /// # Errors
    ///
    /// [`StatuteError::NoStore`] without a store, [`StatuteError::Store`] when
    /// loading fails. Individual laws that fail to compile are skipped and
    /// listed in the summary.
    pub fn reload(&self) -> Result<ReloadSummary, StatuteError> {
        let store = self.store.as_ref().ok_or(StatuteError::NoStore)?;
        let records = store.load_laws()?;
        Ok(self.load(&records))
    }

    /// Replace every registered law with `records`, in order.
    pub fn load(&self, records: &[LawRecord]) -> ReloadSummary {
        let mut summary = ReloadSummary::default();
        let mut rule_laws = Vec::new();
        let mut scripts = Vec::new();
        for record in records {
            let outcome = if !record.is_admissible() {
                Err(StatuteError::Rejected(record.id))
            } else if record.is_script() {
                RegisteredLaw::from_record(record).map(|law| scripts.push(law))
            } else {
                self.compile_rules(&record.name, &record.text).map(|rules| {
                    rule_laws.push(RuleLaw {
                        id: record.id,
                        active: record.active,
                        rules,
                    });
                })
            };
            if let Err(err) = outcome {
                warn!(law_id = record.id, error = %err, "law skipped during reload");
                summary.skipped.push((record.id, err.to_string()));
            }
        }
        summary.rule_laws = rule_laws.len();
        summary.script_laws = scripts.len();

        {
            let _writer = self.writer.lock();
            *self.rules.write() = Arc::new(RuleState::with_laws(rule_laws));
            self.manager.replace_all(scripts);
        }
        info!(
            rule_laws = summary.rule_laws,
            script_laws = summary.script_laws,
            skipped = summary.skipped.len(),
            "laws reloaded"
        );
        summary
    }

    /// Default-closed permission check against the current rule index.
    #[must_use]
    pub fn check_permission(
        &self,
        subject: Option<&Subject>,
        action: &str,
        context: &LawContext,
    ) -> bool {
        self.rule_index().check_permission(subject, action, context)
    }

    #[must_use]
    pub fn permissions_for(
        &self,
        subject: Option<&Subject>,
        context: &LawContext,
    ) -> BTreeMap<String, bool> {
        self.rule_index().permissions_for(subject, context)
    }

    pub fn explain(
        &self,
        subject: Option<&Subject>,
        action: &str,
        context: &LawContext,
    ) -> PermissionReport {
        self.rule_index().explain(subject, action, context)
    }

    /// Run every matching script law. See [`LawManager::trigger`].
    #[must_use]
    pub fn trigger(&self, context: &LawContext) -> Vec<ExecutionResult> {
        self.trigger_with(context, &Interrupt::new())
    }

    #[must_use]
    pub fn trigger_with(&self, context: &LawContext, interrupt: &Interrupt) -> Vec<ExecutionResult> {
        let results = self.manager.trigger_with(context, interrupt);
        if let Some(store) = &self.store {
            for law_id in results.iter().filter_map(|r| r.law_id) {
                if let Err(err) = store.record_execution(law_id, context.timestamp) {
                    warn!(law_id, error = %err, "failed to record execution");
                }
            }
        }
        results
    }

    /// Trigger and fold the batch into one [`Verdict`].
    pub fn check(&self, context: &LawContext) -> Verdict {
        Verdict::from_results(&self.trigger(context))
    }
}
