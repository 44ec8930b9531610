use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::types::{ExecutionResult, LawId};

/// One tracked law execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedExecution {
    pub law_id: Option<LawId>,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub result: ExecutionResult,
}

/// Per-law execution counts. `success_rate` is a percentage rounded to two
/// decimals, `0.0` when the law has no tracked executions.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct LawStatistics {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub success_rate: f64,
}

/// Bounded, thread-safe execution history.
///
/// When the history grows past its limit it is cut to the newest half.
#[derive(Debug)]
pub struct ExecutionTracker {
    limit: usize,
    executions: Mutex<VecDeque<TrackedExecution>>,
}

impl ExecutionTracker {
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            executions: Mutex::new(VecDeque::new()),
        }
    }

    pub fn track(&self, result: &ExecutionResult) {
        let entry = TrackedExecution {
            law_id: result.law_id,
            timestamp: Utc::now(),
            success: result.success,
            result: result.clone(),
        };
        let mut executions = self.executions.lock();
        executions.push_back(entry);
        if executions.len() > self.limit {
            let keep = self.limit / 2;
            let excess = executions.len() - keep;
            executions.drain(..excess);
        }
    }

    /// The newest `limit` executions, oldest first.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<TrackedExecution> {
        let executions = self.executions.lock();
        let skip = executions.len().saturating_sub(limit);
        executions.iter().skip(skip).cloned().collect()
    }

    #[must_use]
    pub fn statistics(&self, law_id: LawId) -> LawStatistics {
        let executions = self.executions.lock();
        let (total, successful) = executions
            .iter()
            .filter(|e| e.law_id == Some(law_id))
            .fold((0, 0), |(total, ok), e| (total + 1, ok + usize::from(e.success)));
        if total == 0 {
            return LawStatistics::default();
        }
        let rate = successful as f64 / total as f64 * 100.0;
        LawStatistics {
            total,
            successful,
            failed: total - successful,
            success_rate: (rate * 100.0).round() / 100.0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.executions.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.executions.lock().is_empty()
    }

    pub fn clear(&self) {
        self.executions.lock().clear();
    }
}
