use crate::error::ScriptError;
use crate::script::ast::Pos;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    Ident(String),
    Number(f64),
    Str(String),
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Semi,
    Dot,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    Assign,
    EqEq,
    EqEqEq,
    NotEq,
    NotEqEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub(crate) kind: TokenKind,
    pub(crate) pos: Pos,
}

pub(crate) struct Lexer<'a> {
    input: &'a [u8],
    pos: usize,
    line: u32,
    line_start: usize,
}

impl<'a> Lexer<'a> {
    pub(crate) fn new(src: &'a str) -> Self {
        Self {
            input: src.as_bytes(),
            pos: 0,
            line: 1,
            line_start: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<u8> {
        self.input.get(self.pos + 1).copied()
    }

    fn here(&self) -> Pos {
        Pos {
            line: self.line,
            column: (self.pos - self.line_start) as u32,
        }
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
            self.line_start = self.pos;
        }
        Some(b)
    }

    fn eat(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn skip_ws_and_comments(&mut self) -> Result<(), ScriptError> {
        loop {
            while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r' | 0x0C)) {
                self.bump();
            }

            if self.peek() == Some(b'/') && self.peek2() == Some(b'/') {
                while let Some(b) = self.bump() {
                    if b == b'\n' {
                        break;
                    }
                }
                continue;
            }

            if self.peek() == Some(b'/') && self.peek2() == Some(b'*') {
                let start = self.here();
                self.bump();
                self.bump();
                loop {
                    match (self.peek(), self.peek2()) {
                        (Some(b'*'), Some(b'/')) => {
                            self.bump();
                            self.bump();
                            break;
                        }
                        (Some(_), _) => {
                            self.bump();
                        }
                        (None, _) => {
                            return Err(ScriptError::new("unterminated block comment", start));
                        }
                    }
                }
                continue;
            }

            return Ok(());
        }
    }

    pub(crate) fn next_token(&mut self) -> Result<Token, ScriptError> {
        self.skip_ws_and_comments()?;

        let pos = self.here();
        let Some(b) = self.peek() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                pos,
            });
        };

        let kind = match b {
            b if is_ident_start(b) => TokenKind::Ident(self.lex_ident()),
            b'0'..=b'9' => self.lex_number(pos)?,
            b'"' | b'\'' => self.lex_string(pos)?,
            _ => {
                self.bump();
                match b {
                    b'(' => TokenKind::LParen,
                    b')' => TokenKind::RParen,
                    b'{' => TokenKind::LBrace,
                    b'}' => TokenKind::RBrace,
                    b',' => TokenKind::Comma,
                    b';' => TokenKind::Semi,
                    b'.' => TokenKind::Dot,
                    b'+' => TokenKind::Plus,
                    b'-' => TokenKind::Minus,
                    b'*' => TokenKind::Star,
                    b'/' => TokenKind::Slash,
                    b'%' => TokenKind::Percent,
                    b'!' => {
                        if self.eat(b'=') {
                            if self.eat(b'=') {
                                TokenKind::NotEqEq
                            } else {
                                TokenKind::NotEq
                            }
                        } else {
                            TokenKind::Bang
                        }
                    }
                    b'=' => {
                        if self.eat(b'=') {
                            if self.eat(b'=') {
                                TokenKind::EqEqEq
                            } else {
                                TokenKind::EqEq
                            }
                        } else {
                            TokenKind::Assign
                        }
                    }
                    b'<' => {
                        if self.eat(b'=') {
                            TokenKind::Le
                        } else {
                            TokenKind::Lt
                        }
                    }
                    b'>' => {
                        if self.eat(b'=') {
                            TokenKind::Ge
                        } else {
                            TokenKind::Gt
                        }
                    }
                    b'&' if self.eat(b'&') => TokenKind::AndAnd,
                    b'|' if self.eat(b'|') => TokenKind::OrOr,
                    _ => {
                        let shown = if b.is_ascii_graphic() {
                            format!("`{}`", b as char)
                        } else {
                            format!("byte 0x{b:02x}")
                        };
                        return Err(ScriptError::new(format!("unexpected character {shown}"), pos));
                    }
                }
            }
        };

        Ok(Token { kind, pos })
    }

    fn lex_ident(&mut self) -> String {
        let start = self.pos;
        while matches!(self.peek(), Some(b) if is_ident_part(b)) {
            self.bump();
        }
        String::from_utf8_lossy(&self.input[start..self.pos]).into_owned()
    }

    fn lex_number(&mut self, pos: Pos) -> Result<TokenKind, ScriptError> {
        let start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.bump();
        }
        if self.peek() == Some(b'.') && matches!(self.peek2(), Some(b'0'..=b'9')) {
            self.bump();
            while matches!(self.peek(), Some(b'0'..=b'9')) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some(b) if is_ident_start(b)) {
            return Err(ScriptError::new("identifier directly after number", self.here()));
        }
        let text = String::from_utf8_lossy(&self.input[start..self.pos]);
        text.parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| ScriptError::new("invalid number literal", pos))
    }

    fn lex_string(&mut self, pos: Pos) -> Result<TokenKind, ScriptError> {
        let Some(quote) = self.bump() else {
            return Err(ScriptError::new("unterminated string literal", pos));
        };
        let mut out = Vec::new();
        loop {
            match self.bump() {
                None | Some(b'\n') => {
                    return Err(ScriptError::new("unterminated string literal", pos));
                }
                Some(b) if b == quote => break,
                Some(b'\\') => {
                    let escaped = match self.bump() {
                        Some(b'n') => b'\n',
                        Some(b't') => b'\t',
                        Some(b'r') => b'\r',
                        Some(b'0') => 0,
                        Some(b @ (b'\\' | b'\'' | b'"')) => b,
                        _ => return Err(ScriptError::new("invalid escape sequence", self.here())),
                    };
                    out.push(escaped);
                }
                Some(b) => out.push(b),
            }
        }
        Ok(TokenKind::Str(String::from_utf8_lossy(&out).into_owned()))
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'$'
}

fn is_ident_part(b: u8) -> bool {
    is_ident_start(b) || b.is_ascii_digit()
}
