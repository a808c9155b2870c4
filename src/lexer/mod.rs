//! Character stream to token stream (spec §4.5).

mod token;

pub use token::{Token, TokenKind};

use crate::vm::RuntimeError;

pub struct Lexer<'a> {
    bytes: &'a [u8],
    pos: usize,
    pub line: u32,
    pub source_name: String,
}

fn is_name_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

fn is_name_continue(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str, source_name: impl Into<String>) -> Self {
        Lexer {
            bytes: source.as_bytes(),
            pos: 0,
            line: 1,
            source_name: source_name.into(),
        }
    }

    fn peek(&self) -> u8 {
        *self.bytes.get(self.pos).unwrap_or(&0)
    }

    fn peek_at(&self, offset: usize) -> u8 {
        *self.bytes.get(self.pos + offset).unwrap_or(&0)
    }

    fn advance(&mut self) -> u8 {
        let c = self.peek();
        self.pos += 1;
        c
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    /// `\r\n` or `\n\r` counts as a single newline.
    fn newline(&mut self) {
        let c = self.advance();
        debug_assert!(c == b'\n' || c == b'\r');
        if (self.peek() == b'\n' || self.peek() == b'\r') && self.peek() != c {
            self.advance();
        }
        self.line += 1;
    }

    fn error(&self, msg: impl Into<String>) -> RuntimeError {
        RuntimeError::syntax(&self.source_name, self.line, msg.into())
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), RuntimeError> {
        loop {
            match self.peek() {
                b' ' | b'\t' => {
                    self.advance();
                }
                b'\n' | b'\r' => self.newline(),
                b'-' if self.peek_at(1) == b'-' => {
                    self.pos += 2;
                    if self.peek() == b'[' {
                        if let Some(level) = self.long_bracket_level() {
                            self.read_long_bracket(level)?;
                            continue;
                        }
                    }
                    while !self.at_end() && self.peek() != b'\n' && self.peek() != b'\r' {
                        self.advance();
                    }
                }
                _ => break,
            }
        }
        Ok(())
    }

    /// If positioned at `[`, check for `[`, then `=`*, then `[`; returns
    /// the `=` count and consumes the opening bracket on success,
    /// otherwise leaves position untouched.
    fn long_bracket_level(&mut self) -> Option<usize> {
        let start = self.pos;
        debug_assert_eq!(self.peek(), b'[');
        let mut p = start + 1;
        let mut level = 0;
        while self.bytes.get(p) == Some(&b'=') {
            level += 1;
            p += 1;
        }
        if self.bytes.get(p) == Some(&b'[') {
            self.pos = p + 1;
            Some(level)
        } else {
            self.pos = start;
            None
        }
    }

    fn read_long_bracket(&mut self, level: usize) -> Result<String, RuntimeError> {
        // A newline immediately following the opening bracket is skipped.
        if self.peek() == b'\n' || self.peek() == b'\r' {
            self.newline();
        }
        let mut out = Vec::new();
        loop {
            if self.at_end() {
                return Err(self.error("unfinished long bracket"));
            }
            if self.peek() == b']' {
                let save = self.pos;
                self.pos += 1;
                let mut count = 0;
                while self.peek() == b'=' {
                    count += 1;
                    self.pos += 1;
                }
                if count == level && self.peek() == b']' {
                    self.pos += 1;
                    return Ok(String::from_utf8_lossy(&out).into_owned());
                }
                self.pos = save;
                out.push(self.advance());
            } else if self.peek() == b'\n' || self.peek() == b'\r' {
                out.push(b'\n');
                self.newline();
            } else {
                out.push(self.advance());
            }
        }
    }

    pub fn next_token(&mut self) -> Result<Token, RuntimeError> {
        self.skip_whitespace_and_comments()?;
        let line = self.line;
        if self.at_end() {
            return Ok(Token::eof(line));
        }
        let c = self.peek();
        if is_name_start(c) {
            return Ok(self.read_name(line));
        }
        if c.is_ascii_digit() || (c == b'.' && self.peek_at(1).is_ascii_digit()) {
            return self.read_number(line);
        }
        if c == b'"' || c == b'\'' {
            return self.read_short_string(line);
        }
        if c == b'[' && (self.peek_at(1) == b'[' || self.peek_at(1) == b'=') {
            if let Some(level) = self.long_bracket_level() {
                let text = self.read_long_bracket(level)?;
                return Ok(Token {
                    kind: TokenKind::String,
                    text,
                    number: 0.0,
                    line,
                });
            }
        }
        self.read_symbol(line)
    }

    fn read_name(&mut self, line: u32) -> Token {
        let start = self.pos;
        while is_name_continue(self.peek()) {
            self.advance();
        }
        let text = String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned();
        let kind = TokenKind::keyword_from_str(&text).unwrap_or(TokenKind::Name);
        Token {
            kind,
            text,
            number: 0.0,
            line,
        }
    }

    fn read_number(&mut self, line: u32) -> Result<Token, RuntimeError> {
        let start = self.pos;
        if self.peek() == b'0' && matches!(self.peek_at(1), b'x' | b'X') {
            self.pos += 2;
            while self.peek().is_ascii_hexdigit() {
                self.advance();
            }
            let text = String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned();
            let n = i64::from_str_radix(&text[2..], 16)
                .map_err(|_| self.error(format!("malformed number near '{}'", text)))? as f64;
            return Ok(Token {
                kind: TokenKind::Number,
                text,
                number: n,
                line,
            });
        }
        while self.peek().is_ascii_digit() {
            self.advance();
        }
        if self.peek() == b'.' {
            self.advance();
            while self.peek().is_ascii_digit() {
                self.advance();
            }
        }
        if matches!(self.peek(), b'e' | b'E') {
            self.advance();
            if matches!(self.peek(), b'+' | b'-') {
                self.advance();
            }
            while self.peek().is_ascii_digit() {
                self.advance();
            }
        }
        let text = String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned();
        let n: f64 = text
            .parse()
            .map_err(|_| self.error(format!("malformed number near '{}'", text)))?;
        Ok(Token {
            kind: TokenKind::Number,
            text,
            number: n,
            line,
        })
    }

    fn read_short_string(&mut self, line: u32) -> Result<Token, RuntimeError> {
        let quote = self.advance();
        let mut out = Vec::new();
        loop {
            if self.at_end() {
                return Err(self.error("unfinished string"));
            }
            let c = self.peek();
            if c == quote {
                self.advance();
                break;
            }
            if c == b'\n' || c == b'\r' {
                return Err(self.error("unfinished string"));
            }
            if c == b'\\' {
                self.advance();
                let esc = self.peek();
                match esc {
                    b'n' => {
                        out.push(b'\n');
                        self.advance();
                    }
                    b't' => {
                        out.push(b'\t');
                        self.advance();
                    }
                    b'r' => {
                        out.push(b'\r');
                        self.advance();
                    }
                    b'a' => {
                        out.push(0x07);
                        self.advance();
                    }
                    b'b' => {
                        out.push(0x08);
                        self.advance();
                    }
                    b'f' => {
                        out.push(0x0c);
                        self.advance();
                    }
                    b'v' => {
                        out.push(0x0b);
                        self.advance();
                    }
                    b'0' => {
                        out.push(0);
                        self.advance();
                    }
                    b'\\' => {
                        out.push(b'\\');
                        self.advance();
                    }
                    b'\'' => {
                        out.push(b'\'');
                        self.advance();
                    }
                    b'"' => {
                        out.push(b'"');
                        self.advance();
                    }
                    b'\n' | b'\r' => {
                        out.push(b'\n');
                        self.newline();
                    }
                    d if d.is_ascii_digit() => {
                        let mut val: u32 = 0;
                        let mut n = 0;
                        while n < 3 && self.peek().is_ascii_digit() {
                            val = val * 10 + (self.advance() - b'0') as u32;
                            n += 1;
                        }
                        out.push(val as u8);
                    }
                    _ => return Err(self.error("invalid escape sequence")),
                }
            } else {
                out.push(self.advance());
            }
        }
        Ok(Token {
            kind: TokenKind::String,
            text: String::from_utf8_lossy(&out).into_owned(),
            number: 0.0,
            line,
        })
    }

    fn read_symbol(&mut self, line: u32) -> Result<Token, RuntimeError> {
        let c = self.advance();
        let kind = match c {
            b'+' => TokenKind::Plus,
            b'-' => TokenKind::Minus,
            b'*' => TokenKind::Star,
            b'/' => TokenKind::Slash,
            b'%' => TokenKind::Percent,
            b'^' => TokenKind::Caret,
            b'#' => TokenKind::Hash,
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b'{' => TokenKind::LBrace,
            b'}' => TokenKind::RBrace,
            b'[' => TokenKind::LBracket,
            b']' => TokenKind::RBracket,
            b';' => TokenKind::Semicolon,
            b':' => TokenKind::Colon,
            b',' => TokenKind::Comma,
            b'=' => {
                if self.peek() == b'=' {
                    self.advance();
                    TokenKind::Eq
                } else {
                    TokenKind::Assign
                }
            }
            b'~' => {
                if self.peek() == b'=' {
                    self.advance();
                    TokenKind::Ne
                } else {
                    return Err(self.error("unexpected symbol near '~'"));
                }
            }
            b'<' => {
                if self.peek() == b'=' {
                    self.advance();
                    TokenKind::Le
                } else {
                    TokenKind::Lt
                }
            }
            b'>' => {
                if self.peek() == b'=' {
                    self.advance();
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }
            }
            b'.' => {
                if self.peek() == b'.' {
                    self.advance();
                    if self.peek() == b'.' {
                        self.advance();
                        TokenKind::Ellipsis
                    } else {
                        TokenKind::Concat
                    }
                } else {
                    TokenKind::Dot
                }
            }
            other => {
                return Err(self.error(format!(
                    "unexpected symbol near '{}'",
                    other as char
                )));
            }
        };
        Ok(Token {
            kind,
            text: String::new(),
            number: 0.0,
            line,
        })
    }
}
