//! Lexer for lpy source text.
//!
//! Besides ordinary tokens the lexer produces the layout tokens the
//! parser relies on: `Newline` at the end of every logical line and
//! `Indent` / `Dedent` whenever the indentation level changes. Lines
//! inside parentheses are joined, blank and comment-only lines produce
//! nothing.

use crate::error::CoreError;
use crate::span::Location;

/// Kind of a token produced by the lexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    // Layout
    Newline,
    Indent,
    Dedent,
    Eof,

    // Identifiers and literals
    Name(String),
    Int(i64),
    Str(String),

    // Punctuation
    LParen,   // (
    RParen,   // )
    Comma,    // ,
    Colon,    // :
    Dot,      // .
    Assign,   // =

    // Operators
    Plus,     // +
    Minus,    // -
    Star,     // *
    Slash,    // /
    Percent,  // %
    EqEq,     // ==
    NotEq,    // !=
    Less,     // <
    LessEq,   // <=
    Greater,  // >
    GreaterEq,// >=

    // Keywords
    Def,
    Return,
    If,
    Elif,
    Else,
    While,
    Pass,
}

impl TokenKind {
    /// Human readable description used in parse errors.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Newline => "end of line".to_string(),
            TokenKind::Indent => "indent".to_string(),
            TokenKind::Dedent => "dedent".to_string(),
            TokenKind::Eof => "end of input".to_string(),
            TokenKind::Name(name) => format!("name '{name}'"),
            TokenKind::Int(value) => format!("integer {value}"),
            TokenKind::Str(_) => "string literal".to_string(),
            TokenKind::LParen => "'('".to_string(),
            TokenKind::RParen => "')'".to_string(),
            TokenKind::Comma => "','".to_string(),
            TokenKind::Colon => "':'".to_string(),
            TokenKind::Dot => "'.'".to_string(),
            TokenKind::Assign => "'='".to_string(),
            TokenKind::Plus => "'+'".to_string(),
            TokenKind::Minus => "'-'".to_string(),
            TokenKind::Star => "'*'".to_string(),
            TokenKind::Slash => "'/'".to_string(),
            TokenKind::Percent => "'%'".to_string(),
            TokenKind::EqEq => "'=='".to_string(),
            TokenKind::NotEq => "'!='".to_string(),
            TokenKind::Less => "'<'".to_string(),
            TokenKind::LessEq => "'<='".to_string(),
            TokenKind::Greater => "'>'".to_string(),
            TokenKind::GreaterEq => "'>='".to_string(),
            TokenKind::Def => "'def'".to_string(),
            TokenKind::Return => "'return'".to_string(),
            TokenKind::If => "'if'".to_string(),
            TokenKind::Elif => "'elif'".to_string(),
            TokenKind::Else => "'else'".to_string(),
            TokenKind::While => "'while'".to_string(),
            TokenKind::Pass => "'pass'".to_string(),
        }
    }
}

/// A single token with its kind and location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub loc: Location,
}

/// Lex a source string into tokens. The last token is always `Eof`.
pub fn lex(source: &str) -> Result<Vec<Token>, CoreError> {
    let mut lexer = Lexer {
        chars: source.as_bytes(),
        index: 0,
        line: 1,
        line_start: 0,
        at_line_start: true,
        paren_depth: 0,
        indents: vec![0],
        tokens: Vec::new(),
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

struct Lexer<'src> {
    chars: &'src [u8],
    index: usize,
    line: u32,
    line_start: usize,
    at_line_start: bool,
    paren_depth: usize,
    indents: Vec<u32>,
    tokens: Vec<Token>,
}

impl<'src> Lexer<'src> {
    fn run(&mut self) -> Result<(), CoreError> {
        loop {
            if self.at_line_start && self.paren_depth == 0 {
                let mut width = 0;
                while let Some(b' ' | b'\t') = self.peek_char() {
                    self.consume_char();
                    width += 1;
                }
                match self.peek_char() {
                    None => break,
                    Some(b'#') => {
                        self.skip_comment();
                        continue;
                    }
                    Some(b'\r') => {
                        self.consume_char();
                        continue;
                    }
                    Some(b'\n') => {
                        self.newline();
                        continue;
                    }
                    Some(_) => {
                        self.at_line_start = false;
                        self.indent_to(width)?;
                    }
                }
            }

            let Some(ch) = self.peek_char() else {
                break;
            };
            let start = self.index;
            match ch {
                b' ' | b'\t' | b'\r' => self.consume_char(),
                b'#' => self.skip_comment(),
                b'\n' => {
                    if self.paren_depth == 0 {
                        self.simple_token(TokenKind::Newline, start, start + 1);
                        self.at_line_start = true;
                    }
                    self.newline();
                }
                b'(' => {
                    self.consume_char();
                    self.paren_depth += 1;
                    self.simple_token(TokenKind::LParen, start, self.index);
                }
                b')' => {
                    self.consume_char();
                    self.paren_depth = self.paren_depth.saturating_sub(1);
                    self.simple_token(TokenKind::RParen, start, self.index);
                }
                b',' => self.single(TokenKind::Comma),
                b':' => self.single(TokenKind::Colon),
                b'.' => self.single(TokenKind::Dot),
                b'+' => self.single(TokenKind::Plus),
                b'-' => self.single(TokenKind::Minus),
                b'*' => self.single(TokenKind::Star),
                b'/' => self.single(TokenKind::Slash),
                b'%' => self.single(TokenKind::Percent),
                b'=' => self.with_equal(TokenKind::Assign, TokenKind::EqEq),
                b'<' => self.with_equal(TokenKind::Less, TokenKind::LessEq),
                b'>' => self.with_equal(TokenKind::Greater, TokenKind::GreaterEq),
                b'!' => {
                    if self.peek_next() == Some(b'=') {
                        self.consume_char();
                        self.consume_char();
                        self.simple_token(TokenKind::NotEq, start, self.index);
                    } else {
                        return Err(self.error(start, "unexpected character '!'"));
                    }
                }
                b'"' | b'\'' => self.lex_string(ch)?,
                b'0'..=b'9' => self.lex_number()?,
                _ if is_ident_start(ch) => self.lex_ident_or_keyword(),
                _ => {
                    return Err(self.error(start, "unexpected character"));
                }
            }
        }

        // Close the last logical line and every open block.
        let end = self.index;
        if !matches!(
            self.tokens.last().map(|tok| &tok.kind),
            None | Some(TokenKind::Newline)
        ) {
            self.simple_token(TokenKind::Newline, end, end);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.simple_token(TokenKind::Dedent, end, end);
        }
        self.simple_token(TokenKind::Eof, end, end);
        Ok(())
    }

    fn indent_to(&mut self, width: u32) -> Result<(), CoreError> {
        let start = self.index;
        let current = self.indents.last().copied().unwrap_or(0);
        if width > current {
            self.indents.push(width);
            self.simple_token(TokenKind::Indent, start, start);
            return Ok(());
        }
        while width < self.indents.last().copied().unwrap_or(0) {
            self.indents.pop();
            self.simple_token(TokenKind::Dedent, start, start);
        }
        if width != self.indents.last().copied().unwrap_or(0) {
            return Err(self.error(
                start,
                "unindent does not match any outer indentation level",
            ));
        }
        Ok(())
    }

    fn single(&mut self, kind: TokenKind) {
        let start = self.index;
        self.consume_char();
        self.simple_token(kind, start, self.index);
    }

    fn with_equal(&mut self, plain: TokenKind, with_equal: TokenKind) {
        let start = self.index;
        self.consume_char();
        if self.peek_char() == Some(b'=') {
            self.consume_char();
            self.simple_token(with_equal, start, self.index);
        } else {
            self.simple_token(plain, start, self.index);
        }
    }

    fn simple_token(&mut self, kind: TokenKind, start: usize, end: usize) {
        let loc = Location::new(
            self.line,
            (start - self.line_start) as u32,
            self.line,
            (end - self.line_start) as u32,
        );
        self.tokens.push(Token { kind, loc });
    }

    fn error(&self, at: usize, message: &str) -> CoreError {
        CoreError::Lex {
            line: self.line,
            col: (at - self.line_start) as u32,
            message: message.to_string(),
        }
    }

    fn lex_string(&mut self, quote: u8) -> Result<(), CoreError> {
        let start = self.index;
        self.consume_char();

        let mut content = Vec::new();
        while let Some(ch) = self.peek_char() {
            match ch {
                b'\n' => break,
                _ if ch == quote => {
                    self.consume_char();
                    let value = String::from_utf8_lossy(&content).into_owned();
                    self.simple_token(TokenKind::Str(value), start, self.index);
                    return Ok(());
                }
                b'\\' => {
                    self.consume_char();
                    let escaped = match self.peek_char() {
                        Some(b'n') => b'\n',
                        Some(b't') => b'\t',
                        Some(b'r') => b'\r',
                        Some(b'0') => b'\0',
                        Some(b'\\') => b'\\',
                        Some(b'\'') => b'\'',
                        Some(b'"') => b'"',
                        _ => return Err(self.error(self.index, "invalid escape sequence")),
                    };
                    self.consume_char();
                    content.push(escaped);
                }
                _ => {
                    content.push(ch);
                    self.consume_char();
                }
            }
        }

        Err(self.error(start, "unterminated string literal"))
    }

    fn lex_number(&mut self) -> Result<(), CoreError> {
        let start = self.index;
        let mut digits = String::new();
        while let Some(ch) = self.peek_char() {
            match ch {
                b'0'..=b'9' => digits.push(ch as char),
                b'_' => {}
                _ => break,
            }
            self.consume_char();
        }
        let value = digits
            .parse::<i64>()
            .map_err(|_| self.error(start, "integer literal is too large"))?;
        self.simple_token(TokenKind::Int(value), start, self.index);
        Ok(())
    }

    fn lex_ident_or_keyword(&mut self) {
        let start = self.index;
        while let Some(ch) = self.peek_char() {
            if is_ident_continue(ch) {
                self.consume_char();
            } else {
                break;
            }
        }

        let text = String::from_utf8_lossy(&self.chars[start..self.index]);
        let kind = match text.as_ref() {
            "def" => TokenKind::Def,
            "return" => TokenKind::Return,
            "if" => TokenKind::If,
            "elif" => TokenKind::Elif,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "pass" => TokenKind::Pass,
            _ => TokenKind::Name(text.into_owned()),
        };
        self.simple_token(kind, start, self.index);
    }

    fn skip_comment(&mut self) {
        while let Some(ch) = self.peek_char() {
            if ch == b'\n' {
                break;
            }
            self.consume_char();
        }
    }

    fn newline(&mut self) {
        self.consume_char();
        self.line += 1;
        self.line_start = self.index;
    }

    fn peek_char(&self) -> Option<u8> {
        self.chars.get(self.index).copied()
    }

    fn peek_next(&self) -> Option<u8> {
        self.chars.get(self.index + 1).copied()
    }

    fn consume_char(&mut self) {
        if self.index < self.chars.len() {
            self.index += 1;
        }
    }
}

fn is_ident_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_'
}

fn is_ident_continue(ch: u8) -> bool {
    is_ident_start(ch) || ch.is_ascii_digit()
}
