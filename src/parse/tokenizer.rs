use winnow::error::ModalResult;
use winnow::prelude::*;
use winnow::token::take_while;

use crate::types::{LanguageConfig, PlaceholderKind, Token, TokenKind};

// -- Placeholder payloads ---------------------------------------------------

fn number_payload<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    take_while(1.., |c: char| c.is_ascii_digit()).parse_next(input)
}

fn date_payload<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    (
        take_while(4, |c: char| c.is_ascii_digit()),
        '-',
        take_while(2, |c: char| c.is_ascii_digit()),
        '-',
        take_while(2, |c: char| c.is_ascii_digit()),
    )
        .take()
        .parse_next(input)
}

/// Validate a placeholder payload. NUMBER and DATE must match their whole
/// payload; textual kinds accept any non-empty text.
fn placeholder_payload(kind: PlaceholderKind, payload: &str) -> Option<String> {
    let payload = payload.trim();
    match kind {
        PlaceholderKind::Number => number_payload.parse(payload).ok().map(str::to_owned),
        PlaceholderKind::Date => date_payload.parse(payload).ok().map(str::to_owned),
        PlaceholderKind::String | PlaceholderKind::User | PlaceholderKind::Party => {
            (!payload.is_empty()).then(|| payload.to_owned())
        }
    }
}

// -- Source positions -------------------------------------------------------

struct LineIndex<'a> {
    text: &'a str,
    starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    fn new(text: &'a str) -> Self {
        let starts = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self { text, starts }
    }

    /// 1-based line and column (in characters) of a byte offset.
    fn locate(&self, offset: usize) -> (usize, usize) {
        let line = self.starts.partition_point(|&s| s <= offset);
        let start = self.starts[line - 1];
        let column = self.text[start..offset].chars().count() + 1;
        (line, column)
    }
}

// -- Tokenizer --------------------------------------------------------------

/// Permissive tokenizer: never fails, unrecognized text becomes VALUE tokens.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    split_chars: Vec<char>,
    max_phrase_words: usize,
}

impl Tokenizer {
    #[must_use]
    pub fn new(config: &LanguageConfig) -> Self {
        let k = &config.keywords;
        let max_phrase_words = k
            .subjects
            .iter()
            .chain(&k.conditions)
            .chain(&k.actions)
            .chain(&k.modifiers)
            .chain(&config.operators.comparison)
            .chain(&config.operators.logical)
            .chain(config.placeholders.values())
            .map(|p| p.split_whitespace().count())
            .max()
            .unwrap_or(1)
            .max(1);
        Self {
            split_chars: config.split_chars(),
            max_phrase_words,
        }
    }

    /// Split `text` on delimiter and group-marker characters (kept as tokens)
    /// and classify every non-empty fragment.
    #[must_use]
    pub fn tokenize(&self, text: &str, config: &LanguageConfig) -> Vec<Token> {
        let lines = LineIndex::new(text);
        let mut tokens = Vec::new();
        let mut fragment_start = 0;
        let mut skip_until = 0;

        for (offset, ch) in text.char_indices() {
            if offset < skip_until {
                continue;
            }
            // Placeholder markers such as `[ЧИСЛО]` reuse group-marker characters.
            if let Some(marker) = config
                .placeholders
                .values()
                .find(|m| !m.is_empty() && text[offset..].starts_with(m.as_str()))
            {
                skip_until = offset + marker.len();
                continue;
            }
            if self.split_chars.contains(&ch) {
                self.fragment(text, fragment_start, offset, config, &lines, &mut tokens);
                let (line, column) = lines.locate(offset);
                let token = classify_exact(&ch.to_string(), config).at(offset, line, column);
                tokens.push(token);
                fragment_start = offset + ch.len_utf8();
            }
        }
        self.fragment(text, fragment_start, text.len(), config, &lines, &mut tokens);

        tracing::debug!(count = tokens.len(), "tokenized law text");
        tokens
    }

    fn fragment(
        &self,
        text: &str,
        start: usize,
        end: usize,
        config: &LanguageConfig,
        lines: &LineIndex<'_>,
        out: &mut Vec<Token>,
    ) {
        let raw = &text[start..end];
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return;
        }
        let offset = start + (raw.len() - raw.trim_start().len());

        // A fragment that matches as a whole keeps the first-match-wins order.
        let whole = placeholder_value(trimmed, config).unwrap_or_else(|| classify_exact(trimmed, config));
        if whole.kind != TokenKind::Value || whole.original.is_some() {
            let (line, column) = lines.locate(offset);
            out.push(whole.at(offset, line, column));
            return;
        }

        self.segment(trimmed, offset, config, lines, out);
    }

    /// Longest-phrase-first segmentation of a fragment into words. Adjacent
    /// unmatched words merge into a single VALUE token.
    fn segment(
        &self,
        fragment: &str,
        base: usize,
        config: &LanguageConfig,
        lines: &LineIndex<'_>,
        out: &mut Vec<Token>,
    ) {
        let words: Vec<(usize, &str)> = fragment
            .split_whitespace()
            .map(|w| (w.as_ptr() as usize - fragment.as_ptr() as usize, w))
            .collect();

        let mut pending: Option<(usize, usize)> = None;
        let flush = |pending: &mut Option<(usize, usize)>, out: &mut Vec<Token>| {
            if let Some((from, to)) = pending.take() {
                let (line, column) = lines.locate(base + from);
                out.push(Token::new(TokenKind::Value, &fragment[from..to]).at(base + from, line, column));
            }
        };

        let mut i = 0;
        while i < words.len() {
            let (word_offset, _) = words[i];

            // `[KIND]:payload`; textual payloads run to the end of the fragment.
            if let Some(token) = placeholder_value(&fragment[word_offset..], config) {
                if token.original.is_some_and(PlaceholderKind::takes_rest_of_fragment) {
                    flush(&mut pending, out);
                    let (line, column) = lines.locate(base + word_offset);
                    out.push(token.at(base + word_offset, line, column));
                    return;
                }
            }
            if let Some(token) = placeholder_value(words[i].1, config) {
                flush(&mut pending, out);
                let (line, column) = lines.locate(base + word_offset);
                out.push(token.at(base + word_offset, line, column));
                i += 1;
                continue;
            }

            let longest = (1..=self.max_phrase_words.min(words.len() - i))
                .rev()
                .find_map(|n| {
                    let phrase = words[i..i + n]
                        .iter()
                        .map(|(_, w)| *w)
                        .collect::<Vec<_>>()
                        .join(" ");
                    let token = classify_exact(&phrase, config);
                    (token.kind != TokenKind::Value).then_some((n, token))
                });

            match longest {
                Some((n, token)) => {
                    flush(&mut pending, out);
                    let (line, column) = lines.locate(base + word_offset);
                    out.push(token.at(base + word_offset, line, column));
                    i += n;
                }
                None => {
                    let word_end = word_offset + words[i].1.len();
                    pending = Some(match pending {
                        Some((from, _)) => (from, word_end),
                        None => (word_offset, word_end),
                    });
                    i += 1;
                }
            }
        }
        flush(&mut pending, out);
    }
}

/// Recognize `[MARKER]:payload` at the start of `text`.
fn placeholder_value(text: &str, config: &LanguageConfig) -> Option<Token> {
    config.placeholders.iter().find_map(|(kind, marker)| {
        let payload = text.strip_prefix(marker.as_str())?.strip_prefix(':')?;
        let value = placeholder_payload(*kind, payload)?;
        let mut token = Token::new(TokenKind::Value, value);
        token.original = Some(*kind);
        Some(token)
    })
}

/// Exact-match classification in precedence order: group markers,
/// delimiters, operators, keywords, bare placeholder markers, free text.
fn classify_exact(text: &str, config: &LanguageConfig) -> Token {
    if config.group_markers.start.iter().any(|m| m == text) {
        return Token::new(TokenKind::GroupStart, text);
    }
    if config.group_markers.end.iter().any(|m| m == text) {
        return Token::new(TokenKind::GroupEnd, text);
    }
    if config.delimiters.iter().any(|d| d == text) {
        return Token::new(TokenKind::Delimiter, text);
    }
    if let Some(category) = config.operator_category(text) {
        let mut token = Token::new(TokenKind::Operator, text);
        token.operator = Some(category);
        return token;
    }
    if let Some(kind) = config.keyword_kind(text) {
        return Token::new(kind, text);
    }
    if config.placeholder_for_marker(text).is_some() {
        return Token::new(TokenKind::Placeholder, text);
    }
    Token::new(TokenKind::Value, text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OperatorCategory;

    fn tokenize(text: &str) -> Vec<Token> {
        let config = LanguageConfig::russian();
        Tokenizer::new(&config).tokenize(text, &config)
    }

    fn kinds(tokens: &[Token]) -> Vec<TokenKind> {
        tokens.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn space_separated_phrases() {
        let tokens = tokenize("Пользователь член партии голосовать");
        assert_eq!(
            kinds(&tokens),
            vec![TokenKind::Subject, TokenKind::Condition, TokenKind::Action]
        );
        assert_eq!(tokens[1].value, "член партии");
        assert_eq!(tokens[2].column, 26);
    }

    #[test]
    fn delimiters_are_kept() {
        let tokens = tokenize("Пользователь; голосовать");
        assert_eq!(
            kinds(&tokens),
            vec![TokenKind::Subject, TokenKind::Delimiter, TokenKind::Action]
        );
        assert_eq!(tokens[1].value, ";");
        assert_eq!(tokens[2].position, "Пользователь; ".len());
    }

    #[test]
    fn number_placeholder() {
        let tokens = tokenize("с рейтингом > [ЧИСЛО]:50");
        assert_eq!(kinds(&tokens), vec![TokenKind::Condition, TokenKind::Value]);
        assert_eq!(tokens[1].value, "50");
        assert_eq!(tokens[1].original, Some(PlaceholderKind::Number));
    }

    #[test]
    fn non_numeric_number_placeholder_is_free_text() {
        let tokens = tokenize("[ЧИСЛО]:abc");
        assert_eq!(kinds(&tokens), vec![TokenKind::Value]);
        assert_eq!(tokens[0].original, None);
    }

    #[test]
    fn text_placeholder_takes_rest_of_fragment() {
        let tokens = tokenize("Пользователь [ПАРТИЯ]:Зелёные и друзья; голосовать");
        assert_eq!(tokens[1].value, "Зелёные и друзья");
        assert_eq!(tokens[1].original, Some(PlaceholderKind::Party));
        assert_eq!(tokens[2].kind, TokenKind::Delimiter);
        assert_eq!(tokens[3].kind, TokenKind::Action);
    }

    #[test]
    fn date_placeholder() {
        let tokens = tokenize("[ДАТА]:2024-03-01");
        assert_eq!(tokens[0].value, "2024-03-01");
        assert_eq!(tokens[0].original, Some(PlaceholderKind::Date));
        assert_eq!(tokenize("[ДАТА]:2024-3-1")[0].original, None);
    }

    #[test]
    fn bare_placeholder_marker() {
        let tokens = tokenize("[ЧИСЛО]");
        assert_eq!(kinds(&tokens), vec![TokenKind::Placeholder]);
    }

    #[test]
    fn group_markers_split_words() {
        let tokens = tokenize("Пользователь (член партии) голосовать");
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::Subject,
                TokenKind::GroupStart,
                TokenKind::Condition,
                TokenKind::GroupEnd,
                TokenKind::Action
            ]
        );
    }

    #[test]
    fn negation_is_an_operator() {
        let tokens = tokenize("Пользователь не голосовать");
        assert_eq!(tokens[1].kind, TokenKind::Operator);
        assert_eq!(tokens[1].operator, Some(OperatorCategory::Logical));
    }

    #[test]
    fn unknown_words_merge_into_one_value() {
        let tokens = tokenize("Пользователь очень важный голосовать");
        assert_eq!(
            kinds(&tokens),
            vec![TokenKind::Subject, TokenKind::Value, TokenKind::Action]
        );
        assert_eq!(tokens[1].value, "очень важный");
    }

    #[test]
    fn tracks_lines() {
        let tokens = tokenize("Пользователь;\nголосовать");
        assert_eq!(tokens[2].line, 2);
        assert_eq!(tokens[2].column, 1);
    }

    #[test]
    fn empty_text_has_no_tokens() {
        assert!(tokenize("  ;  ").iter().all(|t| t.kind == TokenKind::Delimiter));
        assert!(tokenize("").is_empty());
    }
}
