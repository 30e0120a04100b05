use crate::diagnostic::Diagnostic;
use crate::span::{Span, Spanned};

use super::lexeme::Lexeme;

pub struct Lexer<'src> {
    source: &'src [u8],
    file_id: u16,
    pos: usize,
    diagnostics: Vec<Diagnostic>,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str, file_id: u16) -> Self {
        Self {
            source: source.as_bytes(),
            file_id,
            pos: 0,
            diagnostics: Vec::new(),
        }
    }

    pub fn tokenize(mut self) -> (Vec<Spanned<Lexeme>>, Vec<Diagnostic>) {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token();
            let is_eof = tok.node == Lexeme::Eof;
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        (tokens, self.diagnostics)
    }

    fn next_token(&mut self) -> Spanned<Lexeme> {
        loop {
            self.skip_whitespace_and_comments();

            if self.pos >= self.source.len() {
                return self.make_token(Lexeme::Eof, self.pos, self.pos);
            }

            let start = self.pos;
            let ch = self.source[self.pos];

            if is_ident_start(ch) {
                return self.scan_ident();
            }

            if ch.is_ascii_digit() {
                return self.scan_number(start);
            }

            if ch == b'%' || ch == b'@' {
                return self.scan_name(start, ch);
            }

            if let Some(tok) = self.scan_symbol(start) {
                return tok;
            }
            // scan_symbol recorded an error, try again
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            while self.pos < self.source.len() && self.source[self.pos].is_ascii_whitespace() {
                self.pos += 1;
            }
            if self.pos + 1 < self.source.len()
                && self.source[self.pos] == b'/'
                && self.source[self.pos + 1] == b'/'
            {
                while self.pos < self.source.len() && self.source[self.pos] != b'\n' {
                    self.pos += 1;
                }
                continue;
            }
            break;
        }
    }

    fn scan_ident(&mut self) -> Spanned<Lexeme> {
        let start = self.pos;
        while self.pos < self.source.len() && is_ident_continue(self.source[self.pos]) {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.source[start..self.pos])
            .unwrap()
            .to_string();
        self.make_token(Lexeme::Ident(text), start, self.pos)
    }

    fn scan_number(&mut self, start: usize) -> Spanned<Lexeme> {
        while self.pos < self.source.len() && self.source[self.pos].is_ascii_digit() {
            self.pos += 1;
        }
        let mut is_float = false;
        if self.pos + 1 < self.source.len()
            && self.source[self.pos] == b'.'
            && self.source[self.pos + 1].is_ascii_digit()
        {
            is_float = true;
            self.pos += 1;
            while self.pos < self.source.len() && self.source[self.pos].is_ascii_digit() {
                self.pos += 1;
            }
        }
        let text = std::str::from_utf8(&self.source[start..self.pos]).unwrap();
        if is_float {
            match text.parse::<f64>() {
                Ok(value) => self.make_token(Lexeme::Float(value), start, self.pos),
                Err(_) => {
                    self.error("invalid float literal", start);
                    self.make_token(Lexeme::Float(0.0), start, self.pos)
                }
            }
        } else {
            match text.parse::<i64>() {
                Ok(value) => self.make_token(Lexeme::Int(value), start, self.pos),
                Err(_) => {
                    self.error("integer literal out of range", start);
                    self.make_token(Lexeme::Int(0), start, self.pos)
                }
            }
        }
    }

    fn scan_name(&mut self, start: usize, sigil: u8) -> Spanned<Lexeme> {
        self.pos += 1;
        let name_start = self.pos;
        while self.pos < self.source.len() && is_ident_continue(self.source[self.pos]) {
            self.pos += 1;
        }
        if self.pos == name_start {
            self.error("expected a name after the sigil", start);
        }
        let name = std::str::from_utf8(&self.source[name_start..self.pos])
            .unwrap()
            .to_string();
        let lexeme = if sigil == b'%' {
            Lexeme::ValueName(name)
        } else {
            Lexeme::SymbolName(name)
        };
        self.make_token(lexeme, start, self.pos)
    }

    fn scan_symbol(&mut self, start: usize) -> Option<Spanned<Lexeme>> {
        let ch = self.source[self.pos];
        if ch == b'-' && self.pos + 1 < self.source.len() && self.source[self.pos + 1] == b'>' {
            self.pos += 2;
            return Some(self.make_token(Lexeme::Arrow, start, self.pos));
        }
        let lexeme = match ch {
            b'(' => Lexeme::LParen,
            b')' => Lexeme::RParen,
            b'{' => Lexeme::LBrace,
            b'}' => Lexeme::RBrace,
            b'[' => Lexeme::LBracket,
            b']' => Lexeme::RBracket,
            b'<' => Lexeme::LAngle,
            b'>' => Lexeme::RAngle,
            b',' => Lexeme::Comma,
            b':' => Lexeme::Colon,
            b'=' => Lexeme::Equal,
            b'-' => Lexeme::Minus,
            b'?' => Lexeme::Question,
            _ => {
                self.error(&format!("unexpected character '{}'", ch as char), start);
                self.pos += 1;
                return None;
            }
        };
        self.pos += 1;
        Some(self.make_token(lexeme, start, self.pos))
    }

    fn make_token(&self, lexeme: Lexeme, start: usize, end: usize) -> Spanned<Lexeme> {
        Spanned::new(lexeme, Span::new(self.file_id, start as u32, end as u32))
    }

    fn error(&mut self, message: &str, start: usize) {
        self.diagnostics.push(Diagnostic::error(
            message.to_string(),
            Span::new(self.file_id, start as u32, (start + 1) as u32),
        ));
    }
}

fn is_ident_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_'
}

fn is_ident_continue(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || ch == b'_'
}
