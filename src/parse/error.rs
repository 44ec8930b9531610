use std::fmt;

use serde::{Deserialize, Serialize};

/// Structural problems that make a law invalid. Recorded on
/// [`ParsedLaw::errors`](crate::ParsedLaw) and surfaced to the author; never
/// fatal to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParseIssue {
    Empty,
    NoSubjects,
    NoActionsOrConditions,
    NestingTooDeep { limit: usize },
}

impl fmt::Display for ParseIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseIssue::Empty => write!(f, "empty law text"),
            ParseIssue::NoSubjects => write!(f, "no subjects found in law"),
            ParseIssue::NoActionsOrConditions => {
                write!(f, "no actions or conditions found in law")
            }
            ParseIssue::NestingTooDeep { limit } => {
                write!(f, "groups nested deeper than {limit} levels")
            }
        }
    }
}

impl std::error::Error for ParseIssue {}

/// Advisory findings. Warnings never affect validity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParseWarning {
    UnclosedGroup { line: usize, column: usize },
    UnexpectedGroupEnd { line: usize, column: usize },
    UnrecognizedText { text: String },
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseWarning::UnclosedGroup { line, column } => {
                write!(f, "group opened at {line}:{column} is never closed")
            }
            ParseWarning::UnexpectedGroupEnd { line, column } => {
                write!(f, "unexpected group end at {line}:{column}")
            }
            ParseWarning::UnrecognizedText { text } => write!(f, "unrecognized text '{text}'"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_display() {
        assert_eq!(ParseIssue::NoSubjects.to_string(), "no subjects found in law");
        assert_eq!(
            ParseIssue::NoActionsOrConditions.to_string(),
            "no actions or conditions found in law"
        );
        assert_eq!(
            ParseIssue::NestingTooDeep { limit: 4 }.to_string(),
            "groups nested deeper than 4 levels"
        );
    }

    #[test]
    fn warning_display() {
        let w = ParseWarning::UnclosedGroup { line: 1, column: 5 };
        assert_eq!(w.to_string(), "group opened at 1:5 is never closed");
        let w = ParseWarning::UnrecognizedText { text: "foo".into() };
        assert_eq!(w.to_string(), "unrecognized text 'foo'");
    }
}
