use crate::types::{
    Clause, LanguageConfig, LawStructure, OperatorEntry, Parameter, Token, TokenKind,
};

use super::error::{ParseIssue, ParseWarning};

/// Maximum depth of nested bracket groups.
pub const MAX_GROUP_DEPTH: usize = 32;

/// Left-to-right structural parser over an immutable token slice. Groups are
/// parsed by recursing on index ranges of the same slice.
pub(crate) struct StructuralParser<'a> {
    tokens: &'a [Token],
    config: &'a LanguageConfig,
    pub(crate) warnings: Vec<ParseWarning>,
    pub(crate) errors: Vec<ParseIssue>,
}

impl<'a> StructuralParser<'a> {
    pub(crate) fn new(tokens: &'a [Token], config: &'a LanguageConfig) -> Self {
        Self {
            tokens,
            config,
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub(crate) fn parse(&mut self) -> LawStructure {
        self.parse_level(0, self.tokens.len(), 0)
    }

    fn parse_level(&mut self, start: usize, end: usize, depth: usize) -> LawStructure {
        let mut structure = LawStructure::default();
        let mut i = start;

        while i < end {
            let token = &self.tokens[i];
            match token.kind {
                TokenKind::Subject => {
                    structure.subjects.push(token.value.clone());
                    i += 1;
                }
                TokenKind::Condition | TokenKind::Action => {
                    let (clause, next) = self.clause(i, end);
                    if token.kind == TokenKind::Condition {
                        structure.conditions.push(clause);
                    } else {
                        structure.actions.push(clause);
                    }
                    i = next;
                }
                TokenKind::Operator => {
                    structure.operators.push(OperatorEntry {
                        symbol: token.value.clone(),
                        category: token.operator,
                        position: i - start,
                    });
                    if self.config.is_negation(&token.value) {
                        structure.negation = true;
                    }
                    i += 1;
                }
                TokenKind::GroupStart => {
                    let close = self.matching_end(i, end);
                    let inner_end = close.unwrap_or(end);
                    if close.is_none() {
                        self.warnings.push(ParseWarning::UnclosedGroup {
                            line: token.line,
                            column: token.column,
                        });
                    }
                    if inner_end > i + 1 {
                        if depth + 1 >= MAX_GROUP_DEPTH {
                            let issue = ParseIssue::NestingTooDeep {
                                limit: MAX_GROUP_DEPTH,
                            };
                            if !self.errors.contains(&issue) {
                                self.errors.push(issue);
                            }
                        } else {
                            let group = self.parse_level(i + 1, inner_end, depth + 1);
                            structure.groups.push(group);
                        }
                    }
                    i = close.map_or(end, |c| c + 1);
                }
                TokenKind::GroupEnd => {
                    self.warnings.push(ParseWarning::UnexpectedGroupEnd {
                        line: token.line,
                        column: token.column,
                    });
                    i += 1;
                }
                TokenKind::Value => {
                    match token.original {
                        Some(kind) => {
                            structure.values.insert(kind, token.value.clone());
                        }
                        None => self.warnings.push(ParseWarning::UnrecognizedText {
                            text: token.value.clone(),
                        }),
                    }
                    i += 1;
                }
                TokenKind::Modifier
                | TokenKind::Placeholder
                | TokenKind::Delimiter
                | TokenKind::Unknown => i += 1,
            }
        }

        structure
    }

    /// Consume a condition/action phrase and the VALUE/OPERATOR tokens that
    /// follow it. Returns the clause and the index of the boundary token.
    fn clause(&self, at: usize, end: usize) -> (Clause, usize) {
        let mut clause = Clause {
            phrase: self.tokens[at].value.clone(),
            parameters: Vec::new(),
        };
        let mut i = at + 1;
        while i < end {
            let token = &self.tokens[i];
            let parameter = match token.kind {
                TokenKind::Value => Parameter::Value {
                    value: token.value.clone(),
                    placeholder: token.original,
                },
                TokenKind::Operator => Parameter::Operator {
                    symbol: token.value.clone(),
                    category: token.operator,
                },
                _ => break,
            };
            clause.parameters.push(parameter);
            i += 1;
        }
        (clause, i)
    }

    /// Index of the GROUP_END balancing the GROUP_START at `open`.
    fn matching_end(&self, open: usize, end: usize) -> Option<usize> {
        let mut depth = 0_usize;
        for (i, token) in self.tokens[open..end].iter().enumerate() {
            match token.kind {
                TokenKind::GroupStart => depth += 1,
                TokenKind::GroupEnd => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(open + i);
                    }
                }
                _ => {}
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::Tokenizer;
    use crate::types::PlaceholderKind;

    fn structure(text: &str) -> (LawStructure, Vec<ParseWarning>) {
        let config = LanguageConfig::russian();
        let tokens = Tokenizer::new(&config).tokenize(text, &config);
        let mut parser = StructuralParser::new(&tokens, &config);
        let s = parser.parse();
        (s, parser.warnings)
    }

    #[test]
    fn subject_condition_action() {
        let (s, warnings) = structure("Пользователь член партии голосовать");
        assert_eq!(s.subjects, vec!["Пользователь"]);
        assert_eq!(s.conditions.len(), 1);
        assert_eq!(s.conditions[0].phrase, "член партии");
        assert!(s.conditions[0].parameters.is_empty());
        assert_eq!(s.actions[0].phrase, "голосовать");
        assert!(!s.negation);
        assert!(warnings.is_empty());
    }

    #[test]
    fn condition_parameters_stop_at_delimiter() {
        let (s, _) = structure("Пользователь с рейтингом > 50; голосовать");
        assert_eq!(s.conditions[0].parameters.len(), 1);
        assert_eq!(s.conditions[0].parameters[0].text(), "50");
        assert_eq!(s.actions.len(), 1);
    }

    #[test]
    fn placeholder_as_parameter_is_not_a_value() {
        let (s, _) = structure("Пользователь с рейтингом > [ЧИСЛО]:10 голосовать");
        assert_eq!(
            s.conditions[0].parameters[0],
            Parameter::Value {
                value: "10".into(),
                placeholder: Some(PlaceholderKind::Number)
            }
        );
        assert!(s.values.is_empty());
    }

    #[test]
    fn standalone_placeholder_values_last_wins() {
        let (s, _) = structure("Пользователь; [ПОЛЬЗОВАТЕЛЬ]:anna; [ПОЛЬЗОВАТЕЛЬ]:boris; голосовать");
        assert_eq!(s.values.get(&PlaceholderKind::User).map(String::as_str), Some("boris"));
    }

    #[test]
    fn negation_sets_flag() {
        let (s, _) = structure("Пользователь не голосовать");
        assert!(s.negation);
        assert_eq!(s.operators.len(), 1);
        assert_eq!(s.operators[0].position, 1);
    }

    #[test]
    fn nested_groups_are_balanced() {
        let (s, warnings) =
            structure("Пользователь (член партии (с рейтингом > 5) создавать законы) голосовать");
        assert_eq!(s.groups.len(), 1);
        let outer = &s.groups[0];
        assert_eq!(outer.conditions[0].phrase, "член партии");
        assert_eq!(outer.groups.len(), 1);
        assert_eq!(outer.groups[0].conditions[0].phrase, "с рейтингом >");
        assert_eq!(outer.actions[0].phrase, "создавать законы");
        assert_eq!(s.actions[0].phrase, "голосовать");
        assert!(warnings.is_empty());
    }

    #[test]
    fn unclosed_group_warns() {
        let (s, warnings) = structure("Пользователь (голосовать");
        assert_eq!(s.groups.len(), 1);
        assert!(matches!(warnings[0], ParseWarning::UnclosedGroup { .. }));
    }

    #[test]
    fn stray_group_end_warns() {
        let (_, warnings) = structure("Пользователь) голосовать");
        assert!(matches!(warnings[0], ParseWarning::UnexpectedGroupEnd { .. }));
    }

    #[test]
    fn excessive_nesting_is_an_error() {
        let text = format!(
            "Пользователь {}голосовать{}",
            "(".repeat(MAX_GROUP_DEPTH + 1),
            ")".repeat(MAX_GROUP_DEPTH + 1)
        );
        let config = LanguageConfig::russian();
        let tokens = Tokenizer::new(&config).tokenize(&text, &config);
        let mut parser = StructuralParser::new(&tokens, &config);
        parser.parse();
        assert_eq!(
            parser.errors,
            vec![ParseIssue::NestingTooDeep {
                limit: MAX_GROUP_DEPTH
            }]
        );
    }
}
