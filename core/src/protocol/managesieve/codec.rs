/*
 * codec.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Tagliacarte, a cross-platform email client.
 *
 * Tagliacarte is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Tagliacarte is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Tagliacarte.  If not, see <http://www.gnu.org/licenses/>.
 */

//! ManageSieve wire codec (RFC 5804 section 4).
//!
//! Outgoing commands are assembled with [`RequestBuilder`]: atoms go out bare, strings as
//! quoted strings or non-synchronizing literals (`{n+}\r\n...`). Incoming bytes are read with
//! [`Parser`], a cursor over the receive buffer that never consumes anything it cannot
//! complete: running out of data yields [`ParseError::Incomplete`] so the caller keeps
//! buffering, anything else that does not fit the grammar yields [`ParseError::Malformed`].
//!
//! Literal lengths are byte counts. The server may send `{n}` or `{n+}`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;

/// Strings longer than this are sent as literals even when they would quote cleanly.
const MAX_QUOTED_LEN: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The buffer ends before the construct does. Not an error yet.
    #[error("need more data")]
    Incomplete,
    /// The bytes cannot be part of a valid response.
    #[error("{0}")]
    Malformed(String),
}

pub type ParseResult<T> = Result<T, ParseError>;

fn malformed<T>(what: &str, at: &[u8]) -> ParseResult<T> {
    let preview: String = String::from_utf8_lossy(&at[..at.len().min(32)]).into_owned();
    Err(ParseError::Malformed(format!("{} near {:?}", what, preview)))
}

/// One lexical item of a server response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Atom(String),
    /// Quoted string or literal, already unescaped.
    String(String),
    Space,
    LineBreak,
    OpenParen,
    CloseParen,
}

/// Decode the first token of `buffer`, returning it with the number of bytes it occupied.
pub fn decode_token(buffer: &[u8]) -> ParseResult<(Token, usize)> {
    let mut parser = Parser::new(buffer);
    let token = parser.next_token()?;
    Ok((token, parser.position()))
}

fn is_atom_char(c: u8) -> bool {
    !matches!(c, b' ' | b'\r' | b'\n' | b'(' | b')' | b'"' | b'{' | b'[' | b']') && c > 0x1f && c != 0x7f
}

/// Cursor over received bytes.
#[derive(Debug)]
pub struct Parser<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    pub fn is_line_break(&self) -> bool {
        self.rest().starts_with(b"\r\n")
    }

    pub fn extract_line_break(&mut self) -> ParseResult<()> {
        let rest = self.rest();
        if rest.starts_with(b"\r\n") {
            self.pos += 2;
            return Ok(());
        }
        if b"\r\n".starts_with(rest) {
            return Err(ParseError::Incomplete);
        }
        malformed("line break expected", rest)
    }

    pub fn is_space(&self) -> bool {
        self.rest().first() == Some(&b' ')
    }

    pub fn extract_space(&mut self) -> ParseResult<()> {
        self.extract_char(b' ')
    }

    pub fn is_char(&self, c: u8) -> bool {
        self.rest().first() == Some(&c)
    }

    pub fn extract_char(&mut self, c: u8) -> ParseResult<()> {
        match self.rest().first() {
            None => Err(ParseError::Incomplete),
            Some(&b) if b == c => {
                self.pos += 1;
                Ok(())
            }
            Some(_) => malformed(&format!("{:?} expected", c as char), self.rest()),
        }
    }

    pub fn is_quoted(&self) -> bool {
        self.is_char(b'"')
    }

    pub fn is_literal(&self) -> bool {
        self.is_char(b'{')
    }

    pub fn is_string(&self) -> bool {
        self.is_quoted() || self.is_literal()
    }

    pub fn is_atom(&self) -> bool {
        self.rest().first().is_some_and(|&c| is_atom_char(c))
    }

    /// Case-insensitive test of what comes next, without consuming it.
    pub fn starts_with_ci(&self, prefix: &[u8]) -> bool {
        let rest = self.rest();
        rest.len() >= prefix.len() && rest[..prefix.len()].eq_ignore_ascii_case(prefix)
    }

    pub fn extract_atom(&mut self) -> ParseResult<String> {
        let rest = self.rest();
        match rest.iter().position(|&c| !is_atom_char(c)) {
            None => Err(ParseError::Incomplete),
            Some(0) => malformed("atom expected", rest),
            Some(n) => {
                let atom = std::str::from_utf8(&rest[..n])
                    .map_err(|_| ParseError::Malformed("atom is not UTF-8".to_string()))?;
                self.pos += n;
                Ok(atom.to_string())
            }
        }
    }

    /// Quoted string: `"` chars `"`, where only `\\` and `\"` are valid escapes.
    pub fn extract_quoted(&mut self) -> ParseResult<String> {
        let rest = self.rest();
        match rest.first() {
            None => return Err(ParseError::Incomplete),
            Some(b'"') => {}
            Some(_) => return malformed("quoted string expected", rest),
        }
        let mut out = Vec::new();
        let mut i = 1;
        loop {
            match rest.get(i) {
                None => return Err(ParseError::Incomplete),
                Some(b'"') => break,
                Some(b'\\') => match rest.get(i + 1) {
                    None => return Err(ParseError::Incomplete),
                    Some(&c) if c == b'"' || c == b'\\' => {
                        out.push(c);
                        i += 2;
                    }
                    Some(_) => return malformed("invalid escape in quoted string", &rest[i..]),
                },
                Some(b'\r') | Some(b'\n') => return malformed("line break in quoted string", &rest[i..]),
                Some(&c) => {
                    out.push(c);
                    i += 1;
                }
            }
        }
        let s = String::from_utf8(out)
            .map_err(|_| ParseError::Malformed("quoted string is not UTF-8".to_string()))?;
        self.pos += i + 1;
        Ok(s)
    }

    /// Literal: `{n}` or `{n+}`, CRLF, then exactly n bytes.
    pub fn extract_literal_bytes(&mut self) -> ParseResult<&'a [u8]> {
        let rest = self.rest();
        match rest.first() {
            None => return Err(ParseError::Incomplete),
            Some(b'{') => {}
            Some(_) => return malformed("literal expected", rest),
        }
        let mut i = 1;
        let mut len: usize = 0;
        while let Some(&c) = rest.get(i) {
            if !c.is_ascii_digit() {
                break;
            }
            len = len
                .checked_mul(10)
                .and_then(|l| l.checked_add((c - b'0') as usize))
                .ok_or_else(|| ParseError::Malformed("literal length overflow".to_string()))?;
            i += 1;
        }
        if i == rest.len() {
            return Err(ParseError::Incomplete);
        }
        if i == 1 {
            return malformed("literal length expected", rest);
        }
        if rest[i] == b'+' {
            i += 1;
        }
        match rest.get(i) {
            None => return Err(ParseError::Incomplete),
            Some(b'}') => i += 1,
            Some(_) => return malformed("'}' expected", &rest[i..]),
        }
        let after = &rest[i..];
        if after.len() < 2 {
            if b"\r\n".starts_with(after) {
                return Err(ParseError::Incomplete);
            }
            return malformed("line break after literal header expected", after);
        }
        if &after[..2] != b"\r\n" {
            return malformed("line break after literal header expected", after);
        }
        i += 2;
        if rest.len() - i < len {
            return Err(ParseError::Incomplete);
        }
        let bytes = &rest[i..i + len];
        self.pos += i + len;
        Ok(bytes)
    }

    pub fn extract_literal(&mut self) -> ParseResult<String> {
        let start = self.pos;
        let bytes = self.extract_literal_bytes()?;
        match std::str::from_utf8(bytes) {
            Ok(s) => Ok(s.to_string()),
            Err(_) => {
                self.pos = start;
                Err(ParseError::Malformed("literal is not UTF-8".to_string()))
            }
        }
    }

    /// Quoted string or literal.
    pub fn extract_string(&mut self) -> ParseResult<String> {
        match self.rest().first() {
            None => Err(ParseError::Incomplete),
            Some(b'"') => self.extract_quoted(),
            Some(b'{') => self.extract_literal(),
            Some(_) => malformed("string expected", self.rest()),
        }
    }

    pub fn next_token(&mut self) -> ParseResult<Token> {
        match self.rest().first() {
            None => Err(ParseError::Incomplete),
            Some(b' ') => {
                self.pos += 1;
                Ok(Token::Space)
            }
            Some(b'\r') => {
                self.extract_line_break()?;
                Ok(Token::LineBreak)
            }
            Some(b'(') => {
                self.pos += 1;
                Ok(Token::OpenParen)
            }
            Some(b')') => {
                self.pos += 1;
                Ok(Token::CloseParen)
            }
            Some(b'"') | Some(b'{') => self.extract_string().map(Token::String),
            Some(_) => self.extract_atom().map(Token::Atom),
        }
    }
}

fn needs_literal(s: &str) -> bool {
    s.len() > MAX_QUOTED_LEN || s.bytes().any(|b| matches!(b, b'\r' | b'\n' | b'"' | 0))
}

fn push_quoted(buf: &mut Vec<u8>, s: &str) {
    buf.push(b'"');
    for b in s.bytes() {
        if b == b'"' || b == b'\\' {
            buf.push(b'\\');
        }
        buf.push(b);
    }
    buf.push(b'"');
}

/// Builds one command line. Arguments are separated by a single space; [`build`](Self::build)
/// appends the terminating CRLF.
#[derive(Debug, Default)]
pub struct RequestBuilder {
    buf: Vec<u8>,
}

impl RequestBuilder {
    pub fn new(command: &str) -> Self {
        Self { buf: command.as_bytes().to_vec() }
    }

    fn separate(&mut self) {
        if !self.buf.is_empty() {
            self.buf.push(b' ');
        }
    }

    pub fn atom(mut self, atom: &str) -> Self {
        self.separate();
        self.buf.extend_from_slice(atom.as_bytes());
        self
    }

    pub fn number(mut self, n: u64) -> Self {
        self.separate();
        self.buf.extend_from_slice(n.to_string().as_bytes());
        self
    }

    pub fn quoted(mut self, s: &str) -> Self {
        self.separate();
        push_quoted(&mut self.buf, s);
        self
    }

    /// Non-synchronizing literal; the header carries the UTF-8 byte length.
    pub fn literal(mut self, s: &str) -> Self {
        self.separate();
        self.buf.extend_from_slice(format!("{{{}+}}\r\n", s.len()).as_bytes());
        self.buf.extend_from_slice(s.as_bytes());
        self
    }

    /// Quoted when safe, literal otherwise.
    pub fn string(self, s: &str) -> Self {
        if needs_literal(s) {
            self.literal(s)
        } else {
            self.quoted(s)
        }
    }

    /// `["a", "b"]`
    pub fn string_list(mut self, items: &[&str]) -> Self {
        self.separate();
        self.buf.push(b'[');
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.buf.extend_from_slice(b", ");
            }
            push_quoted(&mut self.buf, item);
        }
        self.buf.push(b']');
        self
    }

    /// Raw bytes as a quoted base64 string (SASL payloads). Empty input gives `""`.
    pub fn base64(self, data: &[u8]) -> Self {
        let encoded = encode_base64(data);
        self.quoted(&encoded)
    }

    pub fn build(mut self) -> Vec<u8> {
        self.buf.extend_from_slice(b"\r\n");
        self.buf
    }
}

pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

pub fn decode_base64(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(data.trim())
}

/// Rewrite every line terminator in a script to CRLF: CRLF, lone CR, lone LF, NEL, FF,
/// LINE SEPARATOR and PARAGRAPH SEPARATOR.
pub fn normalize_line_endings(script: &str) -> String {
    let mut out = String::with_capacity(script.len() + script.len() / 32);
    let mut chars = script.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push_str("\r\n");
            }
            '\n' | '\u{0085}' | '\u{000C}' | '\u{2028}' | '\u{2029}' => out.push_str("\r\n"),
            c => out.push(c),
        }
    }
    out
}
