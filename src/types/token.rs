use std::fmt;

use serde::{Deserialize, Serialize};

/// Lexical category of a [`Token`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Subject,
    Condition,
    Action,
    Modifier,
    Value,
    Placeholder,
    Operator,
    Delimiter,
    GroupStart,
    GroupEnd,
    Unknown,
}

/// The five fixed placeholder kinds a law text may carry, e.g. `[ЧИСЛО]:42`.
///
/// The marker text of each kind is language specific and comes from
/// [`LanguageConfig::placeholders`](crate::LanguageConfig).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaceholderKind {
    Number,
    String,
    User,
    Party,
    Date,
}

impl PlaceholderKind {
    pub const ALL: [PlaceholderKind; 5] = [
        PlaceholderKind::Number,
        PlaceholderKind::String,
        PlaceholderKind::User,
        PlaceholderKind::Party,
        PlaceholderKind::Date,
    ];

    /// Whether the payload runs to the end of its fragment (free text) rather
    /// than being a single word.
    #[must_use]
    pub fn takes_rest_of_fragment(self) -> bool {
        matches!(
            self,
            PlaceholderKind::String | PlaceholderKind::User | PlaceholderKind::Party
        )
    }
}

impl fmt::Display for PlaceholderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlaceholderKind::Number => "NUMBER",
            PlaceholderKind::String => "STRING",
            PlaceholderKind::User => "USER",
            PlaceholderKind::Party => "PARTY",
            PlaceholderKind::Date => "DATE",
        };
        f.write_str(name)
    }
}

/// Which operator table an operator token was matched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatorCategory {
    Comparison,
    Logical,
}

/// A single classified fragment of law text. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    pub value: String,
    /// Set on VALUE tokens produced from a `[KIND]:payload` placeholder.
    pub original: Option<PlaceholderKind>,
    /// Set on OPERATOR tokens.
    pub operator: Option<OperatorCategory>,
    /// Byte offset of the token in the source text.
    pub position: usize,
    pub line: usize,
    pub column: usize,
}

impl Token {
    pub(crate) fn new(kind: TokenKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
            original: None,
            operator: None,
            position: 0,
            line: 1,
            column: 1,
        }
    }

    #[must_use]
    pub(crate) fn at(mut self, position: usize, line: usize, column: usize) -> Self {
        self.position = position;
        self.line = line;
        self.column = column;
        self
    }

    #[must_use]
    pub fn is_placeholder_value(&self) -> bool {
        self.kind == TokenKind::Value && self.original.is_some()
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.original {
            Some(kind) => write!(f, "{:?}([{kind}]:{})", self.kind, self.value),
            None => write!(f, "{:?}({})", self.kind, self.value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_payload_extent() {
        assert!(!PlaceholderKind::Number.takes_rest_of_fragment());
        assert!(!PlaceholderKind::Date.takes_rest_of_fragment());
        assert!(PlaceholderKind::User.takes_rest_of_fragment());
    }

    #[test]
    fn display() {
        let mut token = Token::new(TokenKind::Value, "42");
        token.original = Some(PlaceholderKind::Number);
        assert_eq!(token.to_string(), "Value([NUMBER]:42)");
        assert_eq!(Token::new(TokenKind::Action, "vote").to_string(), "Action(vote)");
    }
}
