//! Law definition, parsing and sandboxed execution.
//!
//! Two kinds of law share one engine:
//!
//! - **Permission laws** are natural-language phrases such as
//!   `"Пользователь член партии голосовать"`. [`LawParser`] tokenizes them
//!   against a [`LanguageConfig`], they compile into prioritized
//!   [`ActionRule`]s, and a [`RuleIndex`] answers default-closed permission
//!   checks.
//! - **Script laws** are small programs defining `apply()`. The
//!   [`Executor`] vets them with [`validate_code`] and runs them in a
//!   tree-walking interpreter whose only access to the host is the `api`
//!   capability object backed by a [`DataSource`]. [`LawManager`] runs the
//!   scripts whose [`Trigger`]s match an event.
//!
//! [`LawEngine`] fronts both paths for a host application.

mod compile;
mod engine;
mod error;
mod evaluate;
mod manager;
pub mod parse;
pub mod script;
#[cfg(feature = "binary-cache")]
pub mod serial;
mod store;
mod tracker;
mod types;

pub use engine::{LawEngine, ReloadSummary};
pub use error::StatuteError;
pub use manager::{LawManager, LawMetadata, LawStatus};
pub use parse::{LawParser, ParseIssue, ParseWarning, parse};
pub use script::{
    DataError, DataSource, Executor, GovernmentRecord, InMemoryData, Interrupt, PartyRecord,
    RuntimeError, UserRecord, ValidationError, validate_code,
};
pub use store::{InMemoryStore, LawStore, StoreError};
pub use tracker::{ExecutionTracker, LawStatistics, TrackedExecution};
pub use types::{
    ActionRule, Clause, CompareOp, CompileError, Condition, ConditionKind, ConfigError,
    DEFAULT_DENY_REASON, DEFAULT_INFO_MESSAGE, Decision, EngineConfig, ExecutionResult,
    GroupMarkers, Keywords, LanguageConfig, LawContext, LawId, LawRecord, LawStructure,
    OperatorCategory, OperatorEntry, Operators, Parameter, ParsedLaw, PermissionReport,
    PlaceholderKind, RuleIndex, Schedule, Subject, SubjectKind, TIME_CHECK_ACTION, Token,
    TokenKind, Trigger, TriggerError, ValidationStatus, Value, Verdict, validate_triggers,
};
