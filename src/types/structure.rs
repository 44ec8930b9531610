use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::token::{OperatorCategory, PlaceholderKind, Token};
use crate::parse::{ParseIssue, ParseWarning};

/// One parameter following a condition or action phrase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Parameter {
    Value {
        value: String,
        placeholder: Option<PlaceholderKind>,
    },
    Operator {
        symbol: String,
        category: Option<OperatorCategory>,
    },
}

impl Parameter {
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Parameter::Value { value, .. } => value,
            Parameter::Operator { symbol, .. } => symbol,
        }
    }
}

/// A condition or action phrase with the parameters that followed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clause {
    pub phrase: String,
    pub parameters: Vec<Parameter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorEntry {
    pub symbol: String,
    pub category: Option<OperatorCategory>,
    /// Index of the operator token within its parse level.
    pub position: usize,
}

/// Structure tree produced by the structural parser. Nested bracket groups
/// are parsed independently into `groups`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LawStructure {
    pub subjects: Vec<String>,
    pub conditions: Vec<Clause>,
    pub actions: Vec<Clause>,
    pub operators: Vec<OperatorEntry>,
    /// Placeholder payloads keyed by kind; the last occurrence wins.
    pub values: BTreeMap<PlaceholderKind, String>,
    pub groups: Vec<LawStructure>,
    /// Set when any operator at this level is a negation word.
    pub negation: bool,
}

impl LawStructure {
    /// Well-formed means subjects plus at least one condition or action.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        !self.subjects.is_empty() && !(self.conditions.is_empty() && self.actions.is_empty())
    }

    /// Re-serialize the recognized phrases as law text: subjects, then
    /// conditions and actions with their parameters, space separated.
    #[must_use]
    pub fn to_law_text(&self) -> String {
        let mut parts: Vec<&str> = self.subjects.iter().map(String::as_str).collect();
        for clause in self.conditions.iter().chain(&self.actions) {
            parts.push(&clause.phrase);
            parts.extend(clause.parameters.iter().map(Parameter::text));
        }
        parts.join(" ")
    }
}

/// Result of a single parse call.
///
/// `is_valid()` holds exactly when `errors` is empty; warnings never affect
/// validity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedLaw {
    pub raw_text: String,
    pub tokens: Vec<Token>,
    pub structure: LawStructure,
    pub errors: Vec<ParseIssue>,
    pub warnings: Vec<ParseWarning>,
    pub language: String,
}

impl ParsedLaw {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Human-readable summary of what the law says, or of why it failed.
    #[must_use]
    pub fn to_readable_text(&self) -> String {
        if !self.is_valid() {
            let messages: Vec<String> = self.errors.iter().map(ToString::to_string).collect();
            return format!("Parse error: {}", messages.join("; "));
        }
        let s = &self.structure;
        let mut lines = Vec::new();
        if !s.subjects.is_empty() {
            lines.push(format!("Subjects: {}", s.subjects.join(", ")));
        }
        if !s.conditions.is_empty() {
            let phrases: Vec<&str> = s.conditions.iter().map(|c| c.phrase.as_str()).collect();
            lines.push(format!("Conditions: {}", phrases.join("; ")));
        }
        if !s.actions.is_empty() {
            let phrases: Vec<&str> = s.actions.iter().map(|a| a.phrase.as_str()).collect();
            lines.push(format!("Actions: {}", phrases.join("; ")));
        }
        lines.join("\n")
    }
}

impl fmt::Display for ParsedLaw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ParsedLaw({} tokens, {} subjects, {} conditions, {} actions, {})",
            self.tokens.len(),
            self.structure.subjects.len(),
            self.structure.conditions.len(),
            self.structure.actions.len(),
            if self.is_valid() { "valid" } else { "invalid" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clause(phrase: &str, params: &[&str]) -> Clause {
        Clause {
            phrase: phrase.to_owned(),
            parameters: params
                .iter()
                .map(|p| Parameter::Value {
                    value: (*p).to_owned(),
                    placeholder: None,
                })
                .collect(),
        }
    }

    #[test]
    fn well_formedness() {
        let mut s = LawStructure::default();
        assert!(!s.is_well_formed());
        s.subjects.push("User".into());
        assert!(!s.is_well_formed());
        s.actions.push(clause("vote", &[]));
        assert!(s.is_well_formed());
    }

    #[test]
    fn law_text_includes_parameters() {
        let s = LawStructure {
            subjects: vec!["Пользователь".into()],
            conditions: vec![clause("с рейтингом >", &["50"])],
            actions: vec![clause("голосовать", &[])],
            ..LawStructure::default()
        };
        assert_eq!(s.to_law_text(), "Пользователь с рейтингом > 50 голосовать");
    }
}
