use thiserror::Error;

use crate::script::ValidationError;
use crate::store::StoreError;
use crate::types::{CompileError, ConfigError, LawId, TriggerError};

/// Unified error for the fallible administrative operations of
/// [`LawEngine`](crate::LawEngine) and [`LawManager`](crate::LawManager).
///
/// Law evaluation itself never fails: permission checks return `bool` and
/// script executions report failures inside their
/// [`ExecutionResult`](crate::ExecutionResult).
#[derive(Debug, Error)]
pub enum StatuteError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Trigger(#[from] TriggerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("no law store configured")]
    NoStore,

    #[error("law {0} is not registered")]
    UnknownLaw(LawId),

    #[error("law {0} was rejected by validation")]
    Rejected(LawId),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[cfg(feature = "binary-cache")]
    #[error(transparent)]
    Serialize(#[from] crate::serial::SerializeError),

    #[cfg(feature = "binary-cache")]
    #[error(transparent)]
    Deserialize(#[from] crate::serial::DeserializeError),
}
