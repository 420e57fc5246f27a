//! Tokenizer for template source.
//!
//! Literal text is returned as whole runs; everything between the action
//! delimiters is split into small tokens. Trim markers (`{{- ` and ` -}}`)
//! are applied here, so the parser only ever sees already-trimmed text, and
//! comments (`{{/* ... */}}`) never produce a token at all.
//!
//! The tokenizer is lazy and cheap to clone: cloning forks it at the current
//! position, and a fresh tokenizer over the same source always yields the
//! same tokens.

use crate::ast::{span, Span};
use crate::error::LexError;

pub const DEFAULT_LEFT_DELIM: &str = "{{";
pub const DEFAULT_RIGHT_DELIM: &str = "}}";

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Text(String),
    ActionStart, // {{
    ActionEnd,   // }}

    // Keywords
    Range,
    If,
    Else,
    End,
    With,
    Break,
    Continue,
    True,
    False,
    Nil,

    // Symbols
    Pipe,    // |
    LParen,  // (
    RParen,  // )
    Comma,   // ,
    Declare, // :=
    Assign,  // =
    Dot,     // .

    // Data
    Field(String),    // .Name
    Variable(String), // $name, or `$` alone
    Ident(String),
    StringLit(String),
    Int(i64),
    Float(f64),
}

impl TokenKind {
    pub fn from_ident(s: &str) -> TokenKind {
        match s {
            "range" => TokenKind::Range,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "end" => TokenKind::End,
            "with" => TokenKind::With,
            "break" => TokenKind::Break,
            "continue" => TokenKind::Continue,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "nil" => TokenKind::Nil,
            _ => TokenKind::Ident(s.to_string()),
        }
    }

    /// Short description for syntax errors.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Text(_) => "text".to_string(),
            TokenKind::ActionStart => "action start".to_string(),
            TokenKind::ActionEnd => "end of action".to_string(),
            TokenKind::Range => "`range`".to_string(),
            TokenKind::If => "`if`".to_string(),
            TokenKind::Else => "`else`".to_string(),
            TokenKind::End => "`end`".to_string(),
            TokenKind::With => "`with`".to_string(),
            TokenKind::Break => "`break`".to_string(),
            TokenKind::Continue => "`continue`".to_string(),
            TokenKind::True => "`true`".to_string(),
            TokenKind::False => "`false`".to_string(),
            TokenKind::Nil => "`nil`".to_string(),
            TokenKind::Pipe => "`|`".to_string(),
            TokenKind::LParen => "`(`".to_string(),
            TokenKind::RParen => "`)`".to_string(),
            TokenKind::Comma => "`,`".to_string(),
            TokenKind::Declare => "`:=`".to_string(),
            TokenKind::Assign => "`=`".to_string(),
            TokenKind::Dot => "`.`".to_string(),
            TokenKind::Field(name) => format!("field `.{name}`"),
            TokenKind::Variable(name) => format!("variable `{name}`"),
            TokenKind::Ident(name) => format!("identifier `{name}`"),
            TokenKind::StringLit(s) => format!("string {s:?}"),
            TokenKind::Int(i) => format!("number {i}"),
            TokenKind::Float(x) => format!("number {x}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, offset: usize, len: usize) -> Self {
        Self {
            kind,
            span: span(offset, len),
        }
    }
}

/// Whitespace removed by trim markers.
fn is_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

#[derive(Debug, Clone)]
pub struct Tokenizer<'a> {
    input: &'a str,
    cursor: usize,
    in_action: bool,
    /// A ` -}}` was seen; strip leading whitespace from the next text run.
    trim_next: bool,
    /// Offset of the delimiter that opened the current action.
    action_start: usize,
    left: &'a str,
    right: &'a str,
    done: bool,
}

impl<'a> Tokenizer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self::with_delims(input, DEFAULT_LEFT_DELIM, DEFAULT_RIGHT_DELIM)
    }

    pub fn with_delims(input: &'a str, left: &'a str, right: &'a str) -> Self {
        Self {
            input,
            cursor: 0,
            in_action: false,
            trim_next: false,
            action_start: 0,
            left,
            right,
            done: false,
        }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.cursor..]
    }

    fn advance(&mut self, n: usize) {
        self.cursor += n;
    }

    /// Does the text at `at` open an action with a left trim marker?
    fn has_left_trim(&self, at: usize) -> bool {
        let after = &self.input[at + self.left.len()..];
        let mut chars = after.chars();
        chars.next() == Some('-') && chars.next().is_some_and(is_space)
    }

    pub fn next_token(&mut self) -> Option<Result<Token, LexError>> {
        if self.in_action {
            self.lex_action()
        } else {
            self.lex_text()
        }
    }

    fn lex_text(&mut self) -> Option<Result<Token, LexError>> {
        loop {
            if self.trim_next {
                let rest = self.remaining();
                let trimmed = rest.trim_start_matches(is_space);
                self.advance(rest.len() - trimmed.len());
                self.trim_next = false;
            }

            let rest = self.remaining();
            if rest.is_empty() {
                return None;
            }

            let Some(idx) = rest.find(self.left) else {
                let start = self.cursor;
                self.advance(rest.len());
                return Some(Ok(Token::new(
                    TokenKind::Text(rest.to_string()),
                    start,
                    rest.len(),
                )));
            };

            if idx > 0 {
                let start = self.cursor;
                let mut text = &rest[..idx];
                if self.has_left_trim(start + idx) {
                    text = text.trim_end_matches(is_space);
                }
                self.advance(idx);
                if !text.is_empty() {
                    return Some(Ok(Token::new(
                        TokenKind::Text(text.to_string()),
                        start,
                        idx,
                    )));
                }
            }

            match self.open_action() {
                Ok(Some(token)) => return Some(Ok(token)),
                // A comment: nothing to emit, keep scanning text.
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }

    /// Consume a left delimiter at the cursor. Returns `None` for a comment.
    fn open_action(&mut self) -> Result<Option<Token>, LexError> {
        let start = self.cursor;
        let left_trim = self.has_left_trim(start);
        self.advance(self.left.len());
        if left_trim {
            self.advance(1);
        }

        let rest = self.remaining();
        let body = rest.trim_start_matches(is_space);
        if body.starts_with("/*") {
            self.advance(rest.len() - body.len());
            self.skip_comment(start)?;
            return Ok(None);
        }

        self.in_action = true;
        self.action_start = start;
        Ok(Some(Token::new(
            TokenKind::ActionStart,
            start,
            self.cursor - start,
        )))
    }

    /// Cursor sits on `/*`. The comment must be followed directly by the
    /// right delimiter, optionally with a trim marker.
    fn skip_comment(&mut self, start: usize) -> Result<(), LexError> {
        let unterminated = LexError::UnterminatedComment {
            span: span(start, self.left.len()),
        };
        let rest = self.remaining();
        let Some(end) = rest.find("*/") else {
            return Err(unterminated);
        };
        self.advance(end + 2);

        let rest = self.remaining();
        let after_space = rest.trim_start_matches(is_space);
        let skipped = rest.len() - after_space.len();
        if skipped > 0 && after_space.starts_with('-') && after_space[1..].starts_with(self.right) {
            self.advance(skipped + 1 + self.right.len());
            self.trim_next = true;
            Ok(())
        } else if after_space.starts_with(self.right) {
            self.advance(skipped + self.right.len());
            Ok(())
        } else {
            Err(unterminated)
        }
    }

    fn lex_action(&mut self) -> Option<Result<Token, LexError>> {
        let rest = self.remaining();
        let trimmed = rest.trim_start_matches(is_space);
        let skipped = rest.len() - trimmed.len();
        self.advance(skipped);

        let rest = self.remaining();
        let start = self.cursor;
        if rest.is_empty() {
            return Some(Err(LexError::UnterminatedAction {
                close: self.right.to_string(),
                span: span(self.action_start, self.left.len()),
            }));
        }

        // Action ends
        if skipped > 0 && rest.starts_with('-') && rest[1..].starts_with(self.right) {
            let len = 1 + self.right.len();
            self.advance(len);
            self.in_action = false;
            self.trim_next = true;
            return Some(Ok(Token::new(TokenKind::ActionEnd, start, len)));
        }
        if rest.starts_with(self.right) {
            self.advance(self.right.len());
            self.in_action = false;
            return Some(Ok(Token::new(TokenKind::ActionEnd, start, self.right.len())));
        }

        // Symbols
        if rest.starts_with(":=") {
            self.advance(2);
            return Some(Ok(Token::new(TokenKind::Declare, start, 2)));
        }
        let symbol = match rest.as_bytes()[0] {
            b'|' => Some(TokenKind::Pipe),
            b'(' => Some(TokenKind::LParen),
            b')' => Some(TokenKind::RParen),
            b',' => Some(TokenKind::Comma),
            b'=' => Some(TokenKind::Assign),
            _ => None,
        };
        if let Some(kind) = symbol {
            self.advance(1);
            return Some(Ok(Token::new(kind, start, 1)));
        }

        let mut chars = rest.chars();
        let first = chars.next()?;
        let second = chars.next();

        match first {
            '"' => Some(self.lex_quoted(start)),
            '`' => Some(self.lex_raw(start)),
            '.' => {
                if second.is_some_and(|c| c.is_alphanumeric() || c == '_') {
                    let name = take_ident(&rest[1..]);
                    self.advance(1 + name.len());
                    Some(Ok(Token::new(
                        TokenKind::Field(name.to_string()),
                        start,
                        1 + name.len(),
                    )))
                } else {
                    self.advance(1);
                    Some(Ok(Token::new(TokenKind::Dot, start, 1)))
                }
            }
            '$' => {
                let name = take_ident(&rest[1..]);
                let len = 1 + name.len();
                self.advance(len);
                Some(Ok(Token::new(
                    TokenKind::Variable(rest[..len].to_string()),
                    start,
                    len,
                )))
            }
            c if c.is_ascii_digit()
                || ((c == '-' || c == '+') && second.is_some_and(|d| d.is_ascii_digit())) =>
            {
                Some(self.lex_number(start))
            }
            c if is_ident_start(c) => {
                let ident = take_ident(rest);
                self.advance(ident.len());
                Some(Ok(Token::new(
                    TokenKind::from_ident(ident),
                    start,
                    ident.len(),
                )))
            }
            c => Some(Err(LexError::UnexpectedChar {
                found: c,
                span: span(start, c.len_utf8()),
            })),
        }
    }

    fn lex_quoted(&mut self, start: usize) -> Result<Token, LexError> {
        let rest = self.remaining();
        let mut value = String::new();
        let mut chars = rest.char_indices().skip(1);
        while let Some((i, c)) = chars.next() {
            match c {
                '"' => {
                    self.advance(i + 1);
                    return Ok(Token::new(TokenKind::StringLit(value), start, i + 1));
                }
                '\\' => match chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, 't')) => value.push('\t'),
                    Some((_, 'r')) => value.push('\r'),
                    Some((_, esc)) => value.push(esc),
                    None => break,
                },
                '\n' => break,
                c => value.push(c),
            }
        }
        Err(LexError::UnterminatedString {
            span: span(start, 1),
        })
    }

    fn lex_raw(&mut self, start: usize) -> Result<Token, LexError> {
        let rest = &self.remaining()[1..];
        match rest.find('`') {
            Some(end) => {
                let value = rest[..end].to_string();
                self.advance(end + 2);
                Ok(Token::new(TokenKind::StringLit(value), start, end + 2))
            }
            None => Err(LexError::UnterminatedString {
                span: span(start, 1),
            }),
        }
    }

    fn lex_number(&mut self, start: usize) -> Result<Token, LexError> {
        let rest = self.remaining();
        let bytes = rest.as_bytes();
        let mut len = 0;
        if matches!(bytes[0], b'-' | b'+') {
            len += 1;
        }
        let mut is_float = false;
        while len < bytes.len() {
            match bytes[len] {
                b'0'..=b'9' | b'_' => len += 1,
                b'.' | b'e' | b'E' => {
                    is_float = true;
                    len += 1;
                    if len < bytes.len() && matches!(bytes[len], b'-' | b'+') && bytes[len - 1] != b'.' {
                        len += 1;
                    }
                }
                _ => break,
            }
        }

        // `3abc` or `3.Foo` is one malformed token, not a number and a name.
        let tail = take_ident(&rest[len..]);
        if !tail.is_empty() {
            let len = len + tail.len();
            return Err(LexError::BadNumber {
                text: rest[..len].to_string(),
                span: span(start, len),
            });
        }

        let text = &rest[..len];
        let digits = text.replace('_', "");
        let kind = if is_float {
            digits.parse::<f64>().ok().map(TokenKind::Float)
        } else {
            digits.parse::<i64>().ok().map(TokenKind::Int)
        };
        match kind {
            Some(kind) => {
                self.advance(len);
                Ok(Token::new(kind, start, len))
            }
            None => Err(LexError::BadNumber {
                text: text.to_string(),
                span: span(start, len),
            }),
        }
    }
}

impl Iterator for Tokenizer<'_> {
    type Item = Result<Token, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = self.next_token();
        if matches!(item, Some(Err(_)) | None) {
            self.done = true;
        }
        item
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn take_ident(s: &str) -> &str {
    let len = s
        .char_indices()
        .find(|(_, c)| !(c.is_alphanumeric() || *c == '_'))
        .map_or(s.len(), |(i, _)| i);
    &s[..len]
}

/// Tokenize `source` with the default delimiters.
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    Tokenizer::new(source).collect()
}
