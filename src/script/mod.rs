//! Sandboxed law scripts.
//!
//! Scripts are written in a small indentation-structured language. Source is
//! lexed and parsed into an AST, vetted by the validator, and run by a
//! tree-walking interpreter whose only window on the host is the `api`
//! capability object and the read-only `context`.

mod api;
mod ast;
mod builtins;
mod error;
mod executor;
mod format;
mod interp;
mod lexer;
mod parser;
mod validate;
mod value;

pub use api::{DataSource, GovernmentRecord, InMemoryData, PartyRecord, UserRecord};
pub use error::{DataError, RuntimeError, ValidationError};
pub use executor::{ENTRY_POINT, Executor, Interrupt};
pub use validate::{VALID_MESSAGE, validate_code, validate_script};
