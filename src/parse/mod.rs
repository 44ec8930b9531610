mod error;
mod parser;
mod tokenizer;

use std::sync::Arc;

pub use error::{ParseIssue, ParseWarning};
pub use parser::MAX_GROUP_DEPTH;
pub use tokenizer::Tokenizer;

use crate::types::{LanguageConfig, ParsedLaw, Token};
use parser::StructuralParser;

/// Tokenizer plus structural parser bound to one language profile.
///
/// Cheap to clone; the profile is shared.
#[derive(Debug, Clone)]
pub struct LawParser {
    config: Arc<LanguageConfig>,
    tokenizer: Tokenizer,
}

impl Default for LawParser {
    fn default() -> Self {
        Self::new(LanguageConfig::default())
    }
}

impl LawParser {
    #[must_use]
    pub fn new(config: LanguageConfig) -> Self {
        Self::with_shared(Arc::new(config))
    }

    #[must_use]
    pub fn with_shared(config: Arc<LanguageConfig>) -> Self {
        let tokenizer = Tokenizer::new(&config);
        Self { config, tokenizer }
    }

    #[must_use]
    pub fn config(&self) -> &LanguageConfig {
        &self.config
    }

    #[must_use]
    pub fn tokenize(&self, text: &str) -> Vec<Token> {
        self.tokenizer.tokenize(text, &self.config)
    }

    /// Tokenize, parse and validate `text`. Never fails: structural problems
    /// are recorded on [`ParsedLaw::errors`].
    #[must_use]
    pub fn parse(&self, text: &str) -> ParsedLaw {
        let tokens = self.tokenize(text);

        let mut parser = StructuralParser::new(&tokens, &self.config);
        let structure = parser.parse();
        let warnings = parser.warnings;
        let mut errors = parser.errors;

        if tokens.is_empty() {
            errors.push(ParseIssue::Empty);
        }
        if structure.subjects.is_empty() {
            errors.push(ParseIssue::NoSubjects);
        }
        if structure.conditions.is_empty() && structure.actions.is_empty() {
            errors.push(ParseIssue::NoActionsOrConditions);
        }

        tracing::debug!(
            subjects = structure.subjects.len(),
            conditions = structure.conditions.len(),
            actions = structure.actions.len(),
            errors = errors.len(),
            warnings = warnings.len(),
            "parsed law text"
        );

        ParsedLaw {
            raw_text: text.to_owned(),
            tokens,
            structure,
            errors,
            warnings,
            language: self.config.language.clone(),
        }
    }
}

/// Parse law text with the default (Russian) language profile.
#[must_use]
pub fn parse(text: &str) -> ParsedLaw {
    LawParser::default().parse(text)
}
