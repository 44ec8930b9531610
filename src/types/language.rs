use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::token::{OperatorCategory, PlaceholderKind, TokenKind};

/// Errors raised while loading or validating a language profile or engine
/// configuration. Fatal for the affected profile only.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("language profile '{language}' defines no delimiters")]
    NoDelimiters { language: String },

    #[error("delimiter '{0}' must be a single character")]
    InvalidDelimiter(String),

    #[error("group marker '{0}' must be a single character")]
    InvalidGroupMarker(String),

    #[error("language profile '{language}' has no marker for placeholder {kind}")]
    MissingPlaceholder {
        language: String,
        kind: PlaceholderKind,
    },

    #[error("unknown language profile '{0}'")]
    UnknownLanguage(String),
}

/// Who a rule applies to, resolved from the subject phrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    /// Any present (non-anonymous) user.
    Ordinary,
    /// A present user carrying the administrator flag.
    Privileged,
    /// No subject predicate at all; also matches anonymous requests.
    Unrestricted,
}

/// The known condition vocabulary a condition phrase can map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    HasParty,
    HasBasePermission,
    RatingGt,
    RatingLt,
    RatingGte,
    RatingLte,
    RatingEq,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Keywords {
    pub subjects: Vec<String>,
    pub conditions: Vec<String>,
    pub actions: Vec<String>,
    pub modifiers: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Operators {
    pub comparison: Vec<String>,
    pub logical: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMarkers {
    pub start: Vec<String>,
    pub end: Vec<String>,
}

impl Default for GroupMarkers {
    fn default() -> Self {
        Self {
            start: strings(&["(", "["]),
            end: strings(&[")", "]"]),
        }
    }
}

/// Declarative vocabulary driving the tokenizer, the structural parser and the
/// rule compiler. Loaded once and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageConfig {
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub keywords: Keywords,
    #[serde(default)]
    pub operators: Operators,
    #[serde(default = "default_delimiters")]
    pub delimiters: Vec<String>,
    #[serde(default)]
    pub group_markers: GroupMarkers,
    #[serde(default = "default_negation_words")]
    pub negation_words: Vec<String>,
    #[serde(default = "default_conditional_words")]
    pub conditional_words: Vec<String>,
    #[serde(default)]
    pub action_mappings: BTreeMap<String, String>,
    #[serde(default)]
    pub subject_mappings: BTreeMap<String, SubjectKind>,
    #[serde(default)]
    pub condition_mappings: BTreeMap<String, ConditionKind>,
    #[serde(default = "russian_placeholders")]
    pub placeholders: BTreeMap<PlaceholderKind, String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_owned()).collect()
}

fn pairs<V: Copy>(items: &[(&str, V)]) -> BTreeMap<String, V> {
    items.iter().map(|(k, v)| ((*k).to_owned(), *v)).collect()
}

fn default_language() -> String {
    "universal".to_owned()
}

fn default_delimiters() -> Vec<String> {
    strings(&[";", ",", "."])
}

fn default_negation_words() -> Vec<String> {
    strings(&["not", "не"])
}

fn default_conditional_words() -> Vec<String> {
    strings(&["if", "если"])
}

fn russian_placeholders() -> BTreeMap<PlaceholderKind, String> {
    BTreeMap::from([
        (PlaceholderKind::Number, "[ЧИСЛО]".to_owned()),
        (PlaceholderKind::String, "[СТРОКА]".to_owned()),
        (PlaceholderKind::User, "[ПОЛЬЗОВАТЕЛЬ]".to_owned()),
        (PlaceholderKind::Party, "[ПАРТИЯ]".to_owned()),
        (PlaceholderKind::Date, "[ДАТА]".to_owned()),
    ])
}

fn english_placeholders() -> BTreeMap<PlaceholderKind, String> {
    BTreeMap::from([
        (PlaceholderKind::Number, "[NUMBER]".to_owned()),
        (PlaceholderKind::String, "[STRING]".to_owned()),
        (PlaceholderKind::User, "[USER]".to_owned()),
        (PlaceholderKind::Party, "[PARTY]".to_owned()),
        (PlaceholderKind::Date, "[DATE]".to_owned()),
    ])
}

impl Default for LanguageConfig {
    fn default() -> Self {
        Self::russian()
    }
}

impl LanguageConfig {
    /// The built-in Russian profile used by the civic platform.
    #[must_use]
    pub fn russian() -> Self {
        use ConditionKind::*;
        Self {
            language: "russian".to_owned(),
            keywords: Keywords {
                subjects: strings(&["Пользователь", "Правитель", "Администратор"]),
                conditions: strings(&[
                    "член партии",
                    "имеет право",
                    "с рейтингом >",
                    "с рейтингом <",
                    "с рейтингом >=",
                    "с рейтингом <=",
                    "с рейтингом ==",
                ]),
                actions: strings(&[
                    "голосовать",
                    "создавать законы",
                    "создавать партии",
                    "быть лидером партии",
                    "удалять законы",
                    "модерировать",
                ]),
                modifiers: strings(&["если", "и", "или", "не"]),
            },
            operators: Operators {
                comparison: strings(&[">", "<", ">=", "<=", "==", "!="]),
                logical: strings(&["и", "или", "не"]),
            },
            delimiters: default_delimiters(),
            group_markers: GroupMarkers::default(),
            negation_words: strings(&["не"]),
            conditional_words: strings(&["если"]),
            action_mappings: pairs(&[
                ("голосовать", "vote"),
                ("создавать законы", "create_law"),
                ("создавать партии", "create_party"),
                ("быть лидером партии", "be_party_leader"),
                ("удалять законы", "delete_law"),
                ("модерировать", "moderate"),
                ("имеет право", "has_permission"),
            ])
            .into_iter()
            .map(|(k, v)| (k, v.to_owned()))
            .collect(),
            subject_mappings: pairs(&[
                ("Пользователь", SubjectKind::Ordinary),
                ("Правитель", SubjectKind::Privileged),
                ("Администратор", SubjectKind::Privileged),
            ]),
            condition_mappings: pairs(&[
                ("член партии", HasParty),
                ("имеет право", HasBasePermission),
                ("с рейтингом >", RatingGt),
                ("с рейтингом <", RatingLt),
                ("с рейтингом >=", RatingGte),
                ("с рейтингом <=", RatingLte),
                ("с рейтингом ==", RatingEq),
            ]),
            placeholders: russian_placeholders(),
        }
    }

    /// The built-in English profile.
    #[must_use]
    pub fn english() -> Self {
        use ConditionKind::*;
        Self {
            language: "english".to_owned(),
            keywords: Keywords {
                subjects: strings(&["User", "Admin", "Guest", "Member"]),
                conditions: strings(&[
                    "has permission",
                    "member of",
                    "with rating >",
                    "with rating <",
                ]),
                actions: strings(&["vote", "create", "delete", "modify"]),
                modifiers: strings(&["if", "and", "or", "not"]),
            },
            operators: Operators {
                comparison: strings(&[">", "<", ">=", "<=", "==", "!="]),
                logical: strings(&["and", "or", "not"]),
            },
            delimiters: default_delimiters(),
            group_markers: GroupMarkers::default(),
            negation_words: strings(&["not"]),
            conditional_words: strings(&["if"]),
            action_mappings: ["vote", "create", "delete", "modify"]
                .iter()
                .map(|a| ((*a).to_owned(), (*a).to_owned()))
                .collect(),
            subject_mappings: pairs(&[
                ("User", SubjectKind::Ordinary),
                ("Member", SubjectKind::Ordinary),
                ("Admin", SubjectKind::Privileged),
                ("Guest", SubjectKind::Unrestricted),
            ]),
            condition_mappings: pairs(&[
                ("member of", HasParty),
                ("has permission", HasBasePermission),
                ("with rating >", RatingGt),
                ("with rating <", RatingLt),
            ]),
            placeholders: english_placeholders(),
        }
    }

    /// Look up a built-in profile by name.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownLanguage`] for anything but `russian` or `english`.
    pub fn builtin(language: &str) -> Result<Self, ConfigError> {
        match language {
            "russian" => Ok(Self::russian()),
            "english" => Ok(Self::english()),
            other => Err(ConfigError::UnknownLanguage(other.to_owned())),
        }
    }

    /// Parse and validate a JSON profile.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on malformed JSON or an invalid profile.
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a YAML profile.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on malformed YAML or an invalid profile.
    pub fn from_yaml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a profile from a `.json`, `.yml` or `.yaml` file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on I/O, format, or validation failure.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path)?;
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("yml") || e.eq_ignore_ascii_case("yaml"));
        if is_yaml {
            Self::from_yaml_str(&input)
        } else {
            Self::from_json_str(&input)
        }
    }

    /// Check the structural requirements the tokenizer relies on.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.delimiters.is_empty() {
            return Err(ConfigError::NoDelimiters {
                language: self.language.clone(),
            });
        }
        if let Some(bad) = self.delimiters.iter().find(|d| d.chars().count() != 1) {
            return Err(ConfigError::InvalidDelimiter(bad.clone()));
        }
        if let Some(bad) = self
            .group_markers
            .start
            .iter()
            .chain(&self.group_markers.end)
            .find(|m| m.chars().count() != 1)
        {
            return Err(ConfigError::InvalidGroupMarker(bad.clone()));
        }
        for kind in PlaceholderKind::ALL {
            if !self.placeholders.contains_key(&kind) {
                return Err(ConfigError::MissingPlaceholder {
                    language: self.language.clone(),
                    kind,
                });
            }
        }
        Ok(())
    }

    /// Characters the tokenizer splits on, keeping them as tokens.
    pub(crate) fn split_chars(&self) -> Vec<char> {
        self.delimiters
            .iter()
            .chain(&self.group_markers.start)
            .chain(&self.group_markers.end)
            .filter_map(|s| s.chars().next())
            .collect()
    }

    pub(crate) fn operator_category(&self, text: &str) -> Option<OperatorCategory> {
        if self.operators.comparison.iter().any(|o| o == text) {
            Some(OperatorCategory::Comparison)
        } else if self.operators.logical.iter().any(|o| o == text) {
            Some(OperatorCategory::Logical)
        } else {
            None
        }
    }

    /// Keyword categories are checked in a fixed order: subjects, conditions,
    /// actions, modifiers.
    pub(crate) fn keyword_kind(&self, text: &str) -> Option<TokenKind> {
        let k = &self.keywords;
        [
            (&k.subjects, TokenKind::Subject),
            (&k.conditions, TokenKind::Condition),
            (&k.actions, TokenKind::Action),
            (&k.modifiers, TokenKind::Modifier),
        ]
        .into_iter()
        .find(|(list, _)| list.iter().any(|w| w == text))
        .map(|(_, kind)| kind)
    }

    pub(crate) fn placeholder_for_marker(&self, text: &str) -> Option<PlaceholderKind> {
        self.placeholders
            .iter()
            .find(|(_, marker)| marker.as_str() == text)
            .map(|(kind, _)| *kind)
    }

    #[must_use]
    pub fn is_negation(&self, word: &str) -> bool {
        self.negation_words.iter().any(|w| w == word)
    }

    /// Canonical action id for an action phrase, falling back to a lower-cased,
    /// space-to-underscore slug when the phrase has no mapping.
    #[must_use]
    pub fn canonical_action(&self, phrase: &str) -> String {
        self.action_mappings
            .get(phrase)
            .cloned()
            .unwrap_or_else(|| phrase.to_lowercase().replace(' ', "_"))
    }

    /// Subject phrases with no mapping apply to anyone.
    #[must_use]
    pub fn subject_kind(&self, phrase: &str) -> SubjectKind {
        self.subject_mappings
            .get(phrase)
            .copied()
            .unwrap_or(SubjectKind::Unrestricted)
    }

    #[must_use]
    pub fn condition_kind(&self, phrase: &str) -> Option<ConditionKind> {
        self.condition_mappings.get(phrase).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_profiles_validate() {
        LanguageConfig::russian().validate().unwrap();
        LanguageConfig::english().validate().unwrap();
    }

    #[test]
    fn unknown_builtin() {
        let err = LanguageConfig::builtin("klingon").unwrap_err();
        assert_eq!(err.to_string(), "unknown language profile 'klingon'");
    }

    #[test]
    fn canonical_action_uses_mapping_then_slug() {
        let config = LanguageConfig::russian();
        assert_eq!(config.canonical_action("голосовать"), "vote");
        assert_eq!(config.canonical_action("Подавать Петиции"), "подавать_петиции");
    }

    #[test]
    fn operators_take_precedence_over_modifiers() {
        let config = LanguageConfig::russian();
        assert_eq!(config.operator_category("не"), Some(OperatorCategory::Logical));
        assert_eq!(config.keyword_kind("не"), Some(TokenKind::Modifier));
        assert_eq!(config.operator_category(">="), Some(OperatorCategory::Comparison));
    }

    #[test]
    fn json_profile_fills_defaults() {
        let config = LanguageConfig::from_json_str(
            r#"{"language": "test", "keywords": {"subjects": ["Citizen"]}}"#,
        )
        .unwrap();
        assert_eq!(config.delimiters, vec![";", ",", "."]);
        assert_eq!(config.keyword_kind("Citizen"), Some(TokenKind::Subject));
        assert_eq!(
            config.placeholder_for_marker("[ЧИСЛО]"),
            Some(PlaceholderKind::Number)
        );
    }

    #[test]
    fn yaml_profile() {
        let yaml = "language: mini\nkeywords:\n  actions: [vote]\naction_mappings:\n  vote: cast_vote\n";
        let config = LanguageConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.canonical_action("vote"), "cast_vote");
    }

    #[test]
    fn empty_delimiters_rejected() {
        let err = LanguageConfig::from_json_str(r#"{"language": "x", "delimiters": []}"#)
            .unwrap_err();
        assert_eq!(err.to_string(), "language profile 'x' defines no delimiters");
    }

    #[test]
    fn multi_char_delimiter_rejected() {
        let err = LanguageConfig::from_json_str(r#"{"delimiters": [";;"]}"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDelimiter(d) if d == ";;"));
    }

    #[test]
    fn missing_placeholder_rejected() {
        let err = LanguageConfig::from_json_str(r#"{"placeholders": {"number": "[N]"}}"#)
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingPlaceholder { kind: PlaceholderKind::String, .. }
        ));
    }

    #[test]
    fn from_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.yaml");
        std::fs::write(&path, "language: filed\n").unwrap();
        let config = LanguageConfig::from_file(&path).unwrap();
        assert_eq!(config.language, "filed");
    }
}
