//! The host persistence seam.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use thiserror::Error;

use crate::types::{LawId, LawRecord};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("law {0} not found in store")]
    NotFound(LawId),

    #[error("store backend failed: {0}")]
    Backend(String),
}

/// Where the host keeps its laws.
pub trait LawStore: Send + Sync {
    /// Every persisted law, active or not.
    fn load_laws(&self) -> Result<Vec<LawRecord>, StoreError>;

    fn set_active(&self, law_id: LawId, active: bool) -> Result<(), StoreError>;

    /// Bookkeeping after a law ran. Stores that do not track executions can
    /// keep the default.
    fn record_execution(&self, _law_id: LawId, _at: DateTime<Utc>) -> Result<(), StoreError> {
        Ok(())
    }
}

/// A [`LawStore`] kept in memory.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    laws: RwLock<BTreeMap<LawId, LawRecord>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new(records: impl IntoIterator<Item = LawRecord>) -> Self {
        Self {
            laws: RwLock::new(records.into_iter().map(|r| (r.id, r)).collect()),
        }
    }

    /// Insert or replace a record.
    pub fn insert(&self, record: LawRecord) {
        self.laws.write().insert(record.id, record);
    }

    #[must_use]
    pub fn get(&self, law_id: LawId) -> Option<LawRecord> {
        self.laws.read().get(&law_id).cloned()
    }
}

impl LawStore for InMemoryStore {
    fn load_laws(&self) -> Result<Vec<LawRecord>, StoreError> {
        Ok(self.laws.read().values().cloned().collect())
    }

    fn set_active(&self, law_id: LawId, active: bool) -> Result<(), StoreError> {
        let mut laws = self.laws.write();
        let record = laws.get_mut(&law_id).ok_or(StoreError::NotFound(law_id))?;
        record.active = active;
        Ok(())
    }

    fn record_execution(&self, law_id: LawId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut laws = self.laws.write();
        let record = laws.get_mut(&law_id).ok_or(StoreError::NotFound(law_id))?;
        record.execution_count += 1;
        record.last_executed = Some(at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_activation_and_executions() {
        let store = InMemoryStore::new([LawRecord::new(1, "a", "text").with_active(false)]);
        store.set_active(1, true).unwrap();
        let now = Utc::now();
        store.record_execution(1, now).unwrap();
        let record = store.get(1).unwrap();
        assert!(record.active);
        assert_eq!(record.execution_count, 1);
        assert_eq!(record.last_executed, Some(now));
        assert_eq!(store.set_active(2, true), Err(StoreError::NotFound(2)));
    }
}
