/*
 * response_code.rs
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

//! Response codes: the parenthesised annotation after OK/NO/BYE (RFC 5804 section 1.3).

use std::fmt;

use super::codec::{ParseError, ParseResult, Parser, Token};
use crate::uri::{has_sieve_scheme, parse_sieve_url, sieve_url};

/// Target of a REFERRAL. The port is `None` when the URL does not name one;
/// the caller picks the default (4190).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Referral {
    hostname: String,
    port: Option<u16>,
}

impl Referral {
    pub fn new(hostname: impl Into<String>, port: Option<u16>) -> Self {
        Self { hostname: hostname.into(), port }
    }

    /// Parse `sieve://host[:port][/path]`. The scheme is required.
    pub fn parse(url: &str) -> Option<Self> {
        if !has_sieve_scheme(url) {
            return None;
        }
        let (hostname, port) = parse_sieve_url(url)?;
        Some(Self { hostname, port })
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn url(&self) -> String {
        sieve_url(&self.hostname, self.port)
    }
}

impl fmt::Display for Referral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaKind {
    /// Plain `QUOTA`.
    Unspecified,
    MaxScripts,
    MaxSize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseCode {
    /// Base64 SASL data (server-final message of SCRAM).
    Sasl(String),
    Referral(Referral),
    Quota(QuotaKind),
    TryLater,
    AuthTooWeak,
    EncryptNeeded,
    TransitionNeeded,
    Active,
    Nonexistent,
    AlreadyExists,
    Warnings,
    Tag(String),
    Unknown { name: String, arguments: Vec<String> },
}

impl ResponseCode {
    /// Build a code from its items, the first being the code name.
    pub fn from_items(mut items: Vec<String>) -> Option<Self> {
        if items.is_empty() {
            return None;
        }
        let name = items.remove(0);
        let first_arg = items.first().cloned();
        let code = match name.to_ascii_uppercase().as_str() {
            "SASL" => ResponseCode::Sasl(first_arg.unwrap_or_default()),
            "REFERRAL" => match first_arg.as_deref().and_then(Referral::parse) {
                Some(referral) => ResponseCode::Referral(referral),
                None => ResponseCode::Unknown { name, arguments: items },
            },
            "QUOTA" => ResponseCode::Quota(QuotaKind::Unspecified),
            "QUOTA/MAXSCRIPTS" => ResponseCode::Quota(QuotaKind::MaxScripts),
            "QUOTA/MAXSIZE" => ResponseCode::Quota(QuotaKind::MaxSize),
            "TRYLATER" => ResponseCode::TryLater,
            "AUTH-TOO-WEAK" => ResponseCode::AuthTooWeak,
            "ENCRYPT-NEEDED" => ResponseCode::EncryptNeeded,
            "TRANSITION-NEEDED" => ResponseCode::TransitionNeeded,
            "ACTIVE" => ResponseCode::Active,
            "NONEXISTENT" => ResponseCode::Nonexistent,
            "ALREADYEXISTS" => ResponseCode::AlreadyExists,
            "WARNINGS" => ResponseCode::Warnings,
            "TAG" => ResponseCode::Tag(first_arg.unwrap_or_default()),
            _ => ResponseCode::Unknown { name, arguments: items },
        };
        Some(code)
    }

    pub fn name(&self) -> &str {
        match self {
            ResponseCode::Sasl(_) => "SASL",
            ResponseCode::Referral(_) => "REFERRAL",
            ResponseCode::Quota(QuotaKind::Unspecified) => "QUOTA",
            ResponseCode::Quota(QuotaKind::MaxScripts) => "QUOTA/MAXSCRIPTS",
            ResponseCode::Quota(QuotaKind::MaxSize) => "QUOTA/MAXSIZE",
            ResponseCode::TryLater => "TRYLATER",
            ResponseCode::AuthTooWeak => "AUTH-TOO-WEAK",
            ResponseCode::EncryptNeeded => "ENCRYPT-NEEDED",
            ResponseCode::TransitionNeeded => "TRANSITION-NEEDED",
            ResponseCode::Active => "ACTIVE",
            ResponseCode::Nonexistent => "NONEXISTENT",
            ResponseCode::AlreadyExists => "ALREADYEXISTS",
            ResponseCode::Warnings => "WARNINGS",
            ResponseCode::Tag(_) => "TAG",
            ResponseCode::Unknown { name, .. } => name,
        }
    }

    pub fn sasl_payload(&self) -> Option<&str> {
        match self {
            ResponseCode::Sasl(data) => Some(data),
            _ => None,
        }
    }

    pub fn referral(&self) -> Option<&Referral> {
        match self {
            ResponseCode::Referral(referral) => Some(referral),
            _ => None,
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseCode::Sasl(data) | ResponseCode::Tag(data) => write!(f, "{} {:?}", self.name(), data),
            ResponseCode::Referral(referral) => write!(f, "REFERRAL {:?}", referral.url()),
            ResponseCode::Unknown { name, arguments } => {
                f.write_str(name)?;
                for arg in arguments {
                    write!(f, " {:?}", arg)?;
                }
                Ok(())
            }
            _ => f.write_str(self.name()),
        }
    }
}

/// Parse `"(" code *(SP item) ")"`. Nested parentheses are flattened into the item list.
/// Cyrus quotes the code name, so strings are accepted in every position.
pub(crate) fn parse_response_code(parser: &mut Parser<'_>) -> ParseResult<Option<ResponseCode>> {
    parser.extract_char(b'(')?;
    let mut items = Vec::new();
    let mut depth = 1usize;
    while depth > 0 {
        match parser.next_token()? {
            Token::Atom(s) | Token::String(s) => items.push(s),
            Token::Space => {}
            Token::OpenParen => depth += 1,
            Token::CloseParen => depth -= 1,
            Token::LineBreak => {
                return Err(ParseError::Malformed("unterminated response code".to_string()));
            }
        }
    }
    Ok(ResponseCode::from_items(items))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> ParseResult<Option<ResponseCode>> {
        parse_response_code(&mut Parser::new(s.as_bytes()))
    }

    #[test]
    fn referral_with_port() {
        let code = parse(r#"(REFERRAL "sieve://c3.mail.example.com:2000")"#).unwrap().unwrap();
        let referral = code.referral().unwrap();
        assert_eq!(referral.hostname(), "c3.mail.example.com");
        assert_eq!(referral.port(), Some(2000));
    }

    #[test]
    fn referral_without_port() {
        let code = parse(r#"(REFERRAL "sieve://c3.mail.example.com")"#).unwrap().unwrap();
        let referral = code.referral().unwrap();
        assert_eq!(referral.hostname(), "c3.mail.example.com");
        assert_eq!(referral.port(), None);
    }

    #[test]
    fn referral_garbage_is_unknown() {
        let code = parse(r#"(REFERRAL "sieve://:x")"#).unwrap().unwrap();
        assert!(matches!(code, ResponseCode::Unknown { ref name, .. } if name == "REFERRAL"));
    }

    #[test]
    fn referral_multibyte_url_is_unknown() {
        let code = parse("(REFERRAL \"abcdefg\u{e9}\")").unwrap().unwrap();
        assert!(matches!(code, ResponseCode::Unknown { ref name, .. } if name == "REFERRAL"));
        let code = parse("(REFERRAL \"c3.mail.example.com\")").unwrap().unwrap();
        assert!(code.referral().is_none());
    }

    #[test]
    fn quota_variants() {
        assert_eq!(parse("(QUOTA)").unwrap(), Some(ResponseCode::Quota(QuotaKind::Unspecified)));
        assert_eq!(parse("(QUOTA/MAXSCRIPTS)").unwrap(), Some(ResponseCode::Quota(QuotaKind::MaxScripts)));
        assert_eq!(parse("(quota/maxsize)").unwrap(), Some(ResponseCode::Quota(QuotaKind::MaxSize)));
    }

    #[test]
    fn quoted_code_name() {
        let code = parse(r#"("SASL" "dj1ybUY5cHFWOFM3c3VBb1pXamE0ZEpSa0ZzS1E9")"#).unwrap().unwrap();
        assert_eq!(code.sasl_payload(), Some("dj1ybUY5cHFWOFM3c3VBb1pXamE0ZEpSa0ZzS1E9"));
    }

    #[test]
    fn unknown_keeps_arguments() {
        let code = parse(r#"(X-VENDOR (a "b") c)"#).unwrap().unwrap();
        assert_eq!(
            code,
            ResponseCode::Unknown {
                name: "X-VENDOR".to_string(),
                arguments: vec!["a".to_string(), "b".to_string(), "c".to_string()],
            }
        );
        assert_eq!(code.to_string(), "X-VENDOR \"a\" \"b\" \"c\"");
    }

    #[test]
    fn partial_code_needs_more_data() {
        assert_eq!(parse("(TRYLA"), Err(ParseError::Incomplete));
        assert!(matches!(parse("(TRYLATER\r\n"), Err(ParseError::Malformed(_))));
    }
}
