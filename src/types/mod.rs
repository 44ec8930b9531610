mod config;
mod context;
mod decision;
mod error;
mod index;
mod language;
mod law;
mod report;
mod rule;
mod structure;
mod subject;
mod token;
mod value;

pub use config::EngineConfig;
pub use context::LawContext;
pub use decision::{
    DEFAULT_DENY_REASON, DEFAULT_INFO_MESSAGE, Decision, ExecutionResult, Verdict,
};
pub use error::CompileError;
pub use index::RuleIndex;
pub use language::{
    ConditionKind, ConfigError, GroupMarkers, Keywords, LanguageConfig, Operators, SubjectKind,
};
pub use law::{
    LawId, LawRecord, Schedule, TIME_CHECK_ACTION, Trigger, TriggerError, ValidationStatus,
    validate_triggers,
};
pub use report::PermissionReport;
pub use rule::{ActionRule, Condition};
pub use structure::{Clause, LawStructure, OperatorEntry, Parameter, ParsedLaw};
pub use subject::Subject;
pub use token::{OperatorCategory, PlaceholderKind, Token, TokenKind};
pub use value::{CompareOp, Value};
