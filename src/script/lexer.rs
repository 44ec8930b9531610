use winnow::ascii::digit1;
use winnow::combinator::opt;
use winnow::error::ModalResult;
use winnow::prelude::*;
use winnow::token::{one_of, take_while};

use super::error::ValidationError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Tok {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    /// Body of an f-string with escapes already processed; braces intact.
    FStr(String),
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub(crate) tok: Tok,
    pub(crate) line: usize,
}

/// Longest first.
const OPERATORS: &[&str] = &[
    "**=", "//=", "**", "//", "==", "!=", "<=", ">=", "+=", "-=", "*=", "/=", "%=", "->", "+",
    "-", "*", "/", "%", "<", ">", "=", "(", ")", "[", "]", "{", "}", ",", ":", ".", ";",
];

fn identifier<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    (
        one_of(|c: char| c.is_alphabetic() || c == '_'),
        take_while(0.., |c: char| c.is_alphanumeric() || c == '_'),
    )
        .take()
        .parse_next(input)
}

fn number<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    (
        digit1,
        opt(('.', take_while(0.., |c: char| c.is_ascii_digit()))),
        opt((one_of(['e', 'E']), opt(one_of(['+', '-'])), digit1)),
    )
        .take()
        .parse_next(input)
}

/// Turn script source into a token stream with explicit NEWLINE, INDENT and
/// DEDENT tokens. Newlines inside brackets are insignificant.
pub(crate) fn tokenize(src: &str) -> Result<Vec<Spanned>, ValidationError> {
    let mut lexer = Lexer {
        rest: src,
        line: 1,
        tokens: Vec::new(),
        indents: vec![0],
        depth: 0,
        at_line_start: true,
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

struct Lexer<'a> {
    rest: &'a str,
    line: usize,
    tokens: Vec<Spanned>,
    indents: Vec<usize>,
    depth: usize,
    at_line_start: bool,
}

impl<'a> Lexer<'a> {
    fn advance(&mut self, bytes: usize) {
        self.line += self.rest[..bytes].matches('\n').count();
        self.rest = &self.rest[bytes..];
    }

    fn push(&mut self, tok: Tok) {
        self.tokens.push(Spanned {
            tok,
            line: self.line,
        });
    }

    fn error(&self, message: impl Into<String>) -> ValidationError {
        ValidationError::syntax(self.line, message)
    }

    fn ends_logical_line(&self) -> bool {
        matches!(
            self.tokens.last().map(|t| &t.tok),
            None | Some(Tok::Newline | Tok::Indent | Tok::Dedent)
        )
    }

    fn run(&mut self) -> Result<(), ValidationError> {
        loop {
            if self.at_line_start && self.depth == 0 {
                if !self.indentation()? {
                    break;
                }
                continue;
            }

            let ws = self.rest.len() - self.rest.trim_start_matches([' ', '\t', '\r']).len();
            self.advance(ws);

            let Some(c) = self.rest.chars().next() else {
                break;
            };
            match c {
                '#' => {
                    let end = self.rest.find('\n').unwrap_or(self.rest.len());
                    self.advance(end);
                }
                '\\' if self.rest[1..].starts_with('\n') || self.rest[1..].starts_with("\r\n") => {
                    let len = if self.rest[1..].starts_with('\n') { 2 } else { 3 };
                    self.advance(len);
                }
                '\n' => {
                    if self.depth == 0 && !self.ends_logical_line() {
                        self.push(Tok::Newline);
                    }
                    self.advance(1);
                    if self.depth == 0 {
                        self.at_line_start = true;
                    }
                }
                '\'' | '"' => self.string(false, false)?,
                c if c.is_ascii_digit() => self.number()?,
                c if c.is_alphabetic() || c == '_' => self.word()?,
                _ => self.operator()?,
            }
        }

        if self.depth > 0 {
            return Err(self.error("unexpected end of input inside brackets"));
        }
        if !self.ends_logical_line() {
            self.push(Tok::Newline);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent);
        }
        self.push(Tok::Eof);
        Ok(())
    }

    /// Handle the indentation of a new logical line. Returns `false` at end of input.
    fn indentation(&mut self) -> Result<bool, ValidationError> {
        let mut width = 0;
        let mut bytes = 0;
        for c in self.rest.chars() {
            match c {
                ' ' => width += 1,
                '\t' => width = (width / 8 + 1) * 8,
                _ => break,
            }
            bytes += 1;
        }
        let after = &self.rest[bytes..];
        if after.is_empty() {
            self.advance(bytes);
            return Ok(false);
        }
        if after.starts_with('\n') || after.starts_with("\r\n") || after.starts_with('#') {
            let end = after.find('\n').map_or(after.len(), |i| i + 1);
            self.advance(bytes + end);
            return Ok(true);
        }
        self.advance(bytes);
        self.at_line_start = false;

        let current = self.indents.last().copied().unwrap_or(0);
        if width > current {
            self.indents.push(width);
            self.push(Tok::Indent);
        } else {
            while width < self.indents.last().copied().unwrap_or(0) {
                self.indents.pop();
                self.push(Tok::Dedent);
            }
            if width != self.indents.last().copied().unwrap_or(0) {
                return Err(self.error("unindent does not match any outer indentation level"));
            }
        }
        Ok(true)
    }

    fn number(&mut self) -> Result<(), ValidationError> {
        let mut input = self.rest;
        let text = number
            .parse_next(&mut input)
            .map_err(|_| self.error("invalid number literal"))?;
        let tok = if text.contains(['.', 'e', 'E']) {
            Tok::Float(text.parse().map_err(|_| self.error("invalid float literal"))?)
        } else {
            Tok::Int(
                text.parse()
                    .map_err(|_| self.error("integer literal too large"))?,
            )
        };
        if input.starts_with(|c: char| c.is_alphabetic() || c == '_') {
            return Err(self.error("invalid decimal literal"));
        }
        self.push(tok);
        self.advance(text.len());
        Ok(())
    }

    fn word(&mut self) -> Result<(), ValidationError> {
        let mut input = self.rest;
        let text = identifier
            .parse_next(&mut input)
            .map_err(|_| self.error("invalid identifier"))?;
        if input.starts_with(['\'', '"']) {
            let lower = text.to_ascii_lowercase();
            if matches!(lower.as_str(), "f" | "r" | "fr" | "rf") {
                self.advance(text.len());
                return self.string(lower.contains('f'), lower.contains('r'));
            }
        }
        self.push(Tok::Name(text.to_owned()));
        self.advance(text.len());
        Ok(())
    }

    fn operator(&mut self) -> Result<(), ValidationError> {
        let Some(op) = OPERATORS.iter().find(|op| self.rest.starts_with(**op)) else {
            let c = self.rest.chars().next().unwrap_or(' ');
            return Err(self.error(format!("invalid character '{c}'")));
        };
        match *op {
            "(" | "[" | "{" => self.depth += 1,
            ")" | "]" | "}" => {
                if self.depth == 0 {
                    return Err(self.error(format!("unmatched '{op}'")));
                }
                self.depth -= 1;
            }
            _ => {}
        }
        self.push(Tok::Op(op));
        self.advance(op.len());
        Ok(())
    }

    fn string(&mut self, formatted: bool, raw: bool) -> Result<(), ValidationError> {
        let start_line = self.line;
        let quote = if self.rest.starts_with("'''") {
            "'''"
        } else if self.rest.starts_with("\"\"\"") {
            "\"\"\""
        } else if self.rest.starts_with('\'') {
            "'"
        } else {
            "\""
        };
        let triple = quote.len() == 3;
        let body_start = quote.len();

        let mut value = String::new();
        let mut chars = self.rest[body_start..].char_indices();
        let end = loop {
            let Some((i, c)) = chars.next() else {
                return Err(ValidationError::syntax(start_line, "unterminated string literal"));
            };
            if self.rest[body_start + i..].starts_with(quote) {
                break body_start + i + quote.len();
            }
            match c {
                '\n' if !triple => {
                    return Err(ValidationError::syntax(start_line, "unterminated string literal"));
                }
                '\\' => {
                    let Some((_, next)) = chars.next() else {
                        return Err(ValidationError::syntax(
                            start_line,
                            "unterminated string literal",
                        ));
                    };
                    if raw {
                        value.push('\\');
                        value.push(next);
                        continue;
                    }
                    match next {
                        'n' => value.push('\n'),
                        't' => value.push('\t'),
                        'r' => value.push('\r'),
                        '0' => value.push('\0'),
                        '\\' | '\'' | '"' => value.push(next),
                        '\n' => {}
                        other => {
                            value.push('\\');
                            value.push(other);
                        }
                    }
                }
                c => value.push(c),
            }
        };

        let tok = if formatted {
            Tok::FStr(value)
        } else {
            Tok::Str(value)
        };
        self.tokens.push(Spanned {
            tok,
            line: start_line,
        });
        self.advance(end);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Tok> {
        tokenize(src).unwrap().into_iter().map(|s| s.tok).collect()
    }

    #[test]
    fn simple_statement() {
        assert_eq!(
            toks("x = 1"),
            vec![
                Tok::Name("x".into()),
                Tok::Op("="),
                Tok::Int(1),
                Tok::Newline,
                Tok::Eof
            ]
        );
    }

    #[test]
    fn indentation_blocks() {
        let tokens = toks("def f():\n    return 1\n\n# done\nx = 2\n");
        assert!(tokens.contains(&Tok::Indent));
        let dedent = tokens.iter().position(|t| *t == Tok::Dedent).unwrap();
        assert_eq!(tokens[dedent + 1], Tok::Name("x".into()));
    }

    #[test]
    fn newlines_inside_brackets_are_ignored() {
        let tokens = toks("x = {\n  'a': 1,\n}\n");
        assert_eq!(tokens.iter().filter(|t| **t == Tok::Newline).count(), 1);
    }

    #[test]
    fn strings_and_fstrings() {
        assert_eq!(toks("'a\\nb'")[0], Tok::Str("a\nb".into()));
        assert_eq!(toks("f\"{x}!\"")[0], Tok::FStr("{x}!".into()));
        assert_eq!(toks("r'\\d'")[0], Tok::Str("\\d".into()));
        assert_eq!(toks("'''one\ntwo'''")[0], Tok::Str("one\ntwo".into()));
    }

    #[test]
    fn numbers() {
        assert_eq!(toks("3.5")[0], Tok::Float(3.5));
        assert_eq!(toks("1e3")[0], Tok::Float(1000.0));
        assert_eq!(toks("42")[0], Tok::Int(42));
    }

    #[test]
    fn operators_longest_first() {
        assert_eq!(
            toks("a //= b ** 2")[1..4],
            [Tok::Op("//="), Tok::Name("b".into()), Tok::Op("**")]
        );
    }

    #[test]
    fn tracks_lines() {
        let tokens = tokenize("x = 1\n\ny = 'a'\n").unwrap();
        let y = tokens
            .iter()
            .find(|t| t.tok == Tok::Name("y".into()))
            .unwrap();
        assert_eq!(y.line, 3);
    }

    #[test]
    fn errors() {
        assert!(matches!(
            tokenize("x = 'open"),
            Err(ValidationError::Syntax { line: 1, .. })
        ));
        assert!(tokenize("x = (1").is_err());
        assert!(tokenize("x = 1)").is_err());
        assert!(tokenize("x = $").is_err());
        assert!(tokenize("if x:\n        a\n    b\n").is_err());
    }
}
