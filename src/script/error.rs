use thiserror::Error;

/// Why a script failed the safety gate. The `Display` text is what authors
/// see, so it always names the offending construct and its line.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("syntax error at line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("forbidden statement '{statement}' at line {line}")]
    ForbiddenStatement { statement: &'static str, line: usize },

    #[error("forbidden name '{name}' at line {line}")]
    ForbiddenName { name: String, line: usize },

    #[error("access to private attribute '{attr}' at line {line}")]
    PrivateAttribute { attr: String, line: usize },

    #[error("forbidden call to '{name}' at line {line}")]
    ForbiddenCall { name: String, line: usize },
}

impl ValidationError {
    pub(crate) fn syntax(line: usize, message: impl Into<String>) -> Self {
        ValidationError::Syntax {
            line,
            message: message.into(),
        }
    }
}

/// Failure reported by a host [`DataSource`](super::DataSource).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct DataError(pub String);

impl DataError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A failure while running an already-validated script.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RuntimeError {
    #[error("name '{0}' is not defined")]
    Name(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("value error: {0}")]
    Value(String),

    #[error("key error: {0}")]
    Key(String),

    #[error("index error: {0}")]
    Index(String),

    #[error("'{type_name}' object has no attribute '{attr}'")]
    Attribute { type_name: String, attr: String },

    #[error("division by zero")]
    ZeroDivision,

    #[error("integer overflow")]
    Overflow,

    #[error("'{0}' is read-only")]
    ReadOnly(String),

    #[error("{0}")]
    Raised(String),

    #[error("execution interrupted")]
    Interrupted,

    #[error("maximum call depth of {limit} exceeded")]
    RecursionLimit { limit: usize },

    #[error("data access failed: {0}")]
    Data(#[from] DataError),

    #[error("script must define an entry point `apply()`")]
    MissingEntryPoint,

    #[error("script defines the entry point `apply()` more than once")]
    DuplicateEntryPoint,

    #[error("entry point `apply` must be a function taking no arguments")]
    EntryPointSignature,

    #[error("invalid decision: {0}")]
    InvalidDecision(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_messages_name_the_construct() {
        let err = ValidationError::ForbiddenStatement {
            statement: "import",
            line: 1,
        };
        assert_eq!(err.to_string(), "forbidden statement 'import' at line 1");
        let err = ValidationError::PrivateAttribute {
            attr: "__class__".into(),
            line: 3,
        };
        assert_eq!(err.to_string(), "access to private attribute '__class__' at line 3");
    }

    #[test]
    fn runtime_messages() {
        assert_eq!(
            RuntimeError::Name("x".into()).to_string(),
            "name 'x' is not defined"
        );
        assert_eq!(
            RuntimeError::MissingEntryPoint.to_string(),
            "script must define an entry point `apply()`"
        );
        assert_eq!(
            RuntimeError::from(DataError::new("db down")).to_string(),
            "data access failed: db down"
        );
        assert_eq!(
            RuntimeError::RecursionLimit { limit: 64 }.to_string(),
            "maximum call depth of 64 exceeded"
        );
    }
}
