// Licensed under the Apache-2.0 license

//! Hand-written lexer for SystemRDL source text.
//!
//! Produces the token stream the recursive-descent parser consumes. Comments
//! (`//` and `/* */`) are skipped and not preserved.

use crate::diag::{Diagnostic, DiagnosticKind, Span};
use crate::token::{Token, TokenKind, KEYWORDS};

/// Multi-character operators, longest first so that `+=` wins over `+`.
const PUNCT2: &[&str] = &[
    "+=", "%=", "->", "::", "<<", ">>", "<=", ">=", "==", "!=", "&&", "||", "**", "~^", "^~",
];

const PUNCT1: &str = "{}()[]@;:,.=+-*/%&|^~!?<>#'";

struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
    column: u32,
}

/// Lex `src` into a token vector. Returns a `SyntaxError` diagnostic on the
/// first unrecognized construct.
pub fn lex(src: &str) -> Result<Vec<Token>, Diagnostic> {
    let mut lexer = Lexer {
        src: src.as_bytes(),
        pos: 0,
        line: 1,
        column: 0,
    };
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next_token()? {
        tokens.push(token);
    }
    Ok(tokens)
}

impl<'a> Lexer<'a> {
    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.src.get(self.pos + ahead).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.column = 0;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn error(&self, message: String) -> Diagnostic {
        Diagnostic::new(
            DiagnosticKind::SyntaxError,
            Span::new(self.line, self.column),
            message,
        )
    }

    fn skip_trivia(&mut self) -> Result<(), Diagnostic> {
        loop {
            match self.peek() {
                Some(c) if c.is_ascii_whitespace() => {
                    self.bump();
                }
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    let start = Span::new(self.line, self.column);
                    self.bump();
                    self.bump();
                    loop {
                        match self.peek() {
                            Some(b'*') if self.peek_at(1) == Some(b'/') => {
                                self.bump();
                                self.bump();
                                break;
                            }
                            Some(_) => {
                                self.bump();
                            }
                            None => {
                                return Err(Diagnostic::new(
                                    DiagnosticKind::SyntaxError,
                                    start,
                                    "unterminated block comment",
                                ));
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn next_token(&mut self) -> Result<Option<Token>, Diagnostic> {
        self.skip_trivia()?;
        let Some(c) = self.peek() else {
            return Ok(None);
        };
        let line = self.line;
        let column = self.column;
        let offset = self.pos;

        if c == b'"' {
            let text = self.lex_string()?;
            return Ok(Some(Token {
                kind: TokenKind::StrLit,
                text,
                line,
                column,
                offset,
                end: self.pos,
            }));
        }

        if c.is_ascii_digit() || c == b'\'' {
            return self.lex_number(line, column, offset).map(Some);
        }

        if c.is_ascii_alphabetic() || c == b'_' {
            while let Some(c) = self.peek() {
                if c.is_ascii_alphanumeric() || c == b'_' {
                    self.bump();
                } else {
                    break;
                }
            }
            let text = std::str::from_utf8(&self.src[offset..self.pos])
                .unwrap_or_default()
                .to_string();
            let kind = if KEYWORDS.contains(&text.as_str()) {
                TokenKind::Keyword
            } else {
                TokenKind::Ident
            };
            return Ok(Some(Token {
                kind,
                text,
                line,
                column,
                offset,
                end: self.pos,
            }));
        }

        for punct in PUNCT2 {
            if self.src[self.pos..].starts_with(punct.as_bytes()) {
                self.bump();
                self.bump();
                return Ok(Some(Token {
                    kind: TokenKind::Punct,
                    text: (*punct).to_string(),
                    line,
                    column,
                    offset,
                    end: self.pos,
                }));
            }
        }
        if PUNCT1.contains(c as char) {
            self.bump();
            return Ok(Some(Token {
                kind: TokenKind::Punct,
                text: (c as char).to_string(),
                line,
                column,
                offset,
                end: self.pos,
            }));
        }

        Err(self.error(format!("unexpected character '{}'", c as char)))
    }

    fn lex_string(&mut self) -> Result<String, Diagnostic> {
        let start = Span::new(self.line, self.column);
        self.bump(); // opening quote
        let mut text = String::new();
        loop {
            match self.bump() {
                Some(b'"') => return Ok(text),
                Some(b'\\') => match self.bump() {
                    Some(b'n') => text.push('\n'),
                    Some(b't') => text.push('\t'),
                    Some(b'"') => text.push('"'),
                    Some(b'\\') => text.push('\\'),
                    Some(other) => {
                        text.push('\\');
                        text.push(other as char);
                    }
                    None => {
                        return Err(Diagnostic::new(
                            DiagnosticKind::SyntaxError,
                            start,
                            "unterminated string literal",
                        ));
                    }
                },
                Some(other) => text.push(other as char),
                None => {
                    return Err(Diagnostic::new(
                        DiagnosticKind::SyntaxError,
                        start,
                        "unterminated string literal",
                    ));
                }
            }
        }
    }

    /// Lexes decimal, `0x`/`0b`, and Verilog-sized (`4'hF`, `'b101`)
    /// literals. The full literal text is kept; decoding happens in the
    /// expression evaluator, where width errors get a proper diagnostic.
    fn lex_number(&mut self, line: u32, column: u32, offset: usize) -> Result<Token, Diagnostic> {
        let mut sized = false;
        if self.peek() == Some(b'\'') {
            sized = true;
            self.bump();
            self.lex_based_digits()?;
        } else {
            // Leading decimal digits: either the whole literal, a 0x/0b
            // prefix, or the width of a sized literal.
            if self.peek() == Some(b'0')
                && matches!(self.peek_at(1), Some(b'x') | Some(b'X') | Some(b'b') | Some(b'B'))
                && self.peek_at(2).is_some_and(|c| c.is_ascii_alphanumeric())
            {
                self.bump();
                self.bump();
                while self
                    .peek()
                    .is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_')
                {
                    self.bump();
                }
            } else {
                while self.peek().is_some_and(|c| c.is_ascii_digit() || c == b'_') {
                    self.bump();
                }
                if self.peek() == Some(b'\'') {
                    sized = true;
                    self.bump();
                    self.lex_based_digits()?;
                }
            }
        }
        let text = std::str::from_utf8(&self.src[offset..self.pos])
            .unwrap_or_default()
            .to_string();
        Ok(Token {
            kind: if sized {
                TokenKind::SizedNumber
            } else {
                TokenKind::Number
            },
            text,
            line,
            column,
            offset,
            end: self.pos,
        })
    }

    fn lex_based_digits(&mut self) -> Result<(), Diagnostic> {
        match self.peek() {
            Some(b'h') | Some(b'H') | Some(b'd') | Some(b'D') | Some(b'b') | Some(b'B')
            | Some(b'o') | Some(b'O') => {
                self.bump();
            }
            _ => {
                return Err(self.error("expected base character after ' in sized literal".into()));
            }
        }
        if !self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_')
        {
            return Err(self.error("expected digits in sized literal".into()));
        }
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_')
        {
            self.bump();
        }
        Ok(())
    }
}
