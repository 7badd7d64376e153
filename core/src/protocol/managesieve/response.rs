/*
 * response.rs
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

//! Typed server responses and their parsers.
//!
//! Every parser works on a [`Parser`] positioned at the start of the response and either
//! consumes the whole response (up to and including the CRLF of the OK/NO/BYE line) or
//! fails. On `Incomplete` the caller discards the parser and retries once more bytes arrived.

use std::collections::BTreeMap;

use super::codec::{ParseError, ParseResult, Parser};
use super::response_code::{parse_response_code, ResponseCode};
use crate::error::SieveError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    No,
    Bye,
}

/// The OK/NO/BYE line that ends every response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusResponse {
    pub status: Status,
    pub code: Option<ResponseCode>,
    pub message: String,
}

impl StatusResponse {
    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// Convert a NO or BYE into the matching error. Referrals win over the status.
    pub fn into_error(self) -> SieveError {
        if let Some(ResponseCode::Referral(referral)) = self.code {
            return SieveError::Referral(referral);
        }
        match self.status {
            Status::Bye => SieveError::Bye { code: self.code, message: self.message },
            _ => SieveError::Server { code: self.code, message: self.message },
        }
    }
}

/// Server capabilities: capability name (upper case) to optional value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    entries: BTreeMap<String, Option<String>>,
}

impl Capabilities {
    pub fn insert(&mut self, name: &str, value: Option<String>) {
        self.entries.insert(name.to_ascii_uppercase(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_uppercase())
    }

    /// `None` if absent, `Some(None)` if present without value.
    pub fn get(&self, name: &str) -> Option<Option<&str>> {
        self.entries.get(&name.to_ascii_uppercase()).map(|v| v.as_deref())
    }

    fn value(&self, name: &str) -> Option<&str> {
        self.get(name).flatten()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    pub fn implementation(&self) -> Option<&str> {
        self.value("IMPLEMENTATION")
    }

    /// Advertised SASL mechanisms, upper case. Empty after authentication.
    pub fn sasl_mechanisms(&self) -> Vec<String> {
        self.value("SASL")
            .map(|v| v.split_whitespace().map(|m| m.to_ascii_uppercase()).collect())
            .unwrap_or_default()
    }

    pub fn supports_sasl(&self, mechanism: &str) -> bool {
        self.sasl_mechanisms().iter().any(|m| m.eq_ignore_ascii_case(mechanism))
    }

    pub fn sieve_extensions(&self) -> Vec<&str> {
        self.value("SIEVE").map(|v| v.split_whitespace().collect()).unwrap_or_default()
    }

    pub fn starttls(&self) -> bool {
        self.has("STARTTLS")
    }

    pub fn version(&self) -> Option<&str> {
        self.value("VERSION")
    }

    pub fn max_redirects(&self) -> Option<u32> {
        self.value("MAXREDIRECTS").and_then(|v| v.trim().parse().ok())
    }

    pub fn notify_methods(&self) -> Vec<&str> {
        self.value("NOTIFY").map(|v| v.split_whitespace().collect()).unwrap_or_default()
    }

    pub fn language(&self) -> &str {
        self.value("LANGUAGE").unwrap_or("i-default")
    }

    pub fn owner(&self) -> Option<&str> {
        self.value("OWNER")
    }

    fn version_at_least_1(&self) -> bool {
        self.version()
            .and_then(|v| v.trim().split('.').next())
            .and_then(|major| major.parse::<u32>().ok())
            .is_some_and(|major| major >= 1)
    }

    /// RFC 5804 servers (VERSION 1.0) implement RENAMESCRIPT, NOOP and CHECKSCRIPT.
    pub fn can_rename(&self) -> bool {
        self.version_at_least_1() || self.has("RENAMESCRIPT") || self.has("RENAME")
    }

    pub fn can_noop(&self) -> bool {
        self.version_at_least_1() || self.has("NOOP")
    }

    pub fn can_check_script(&self) -> bool {
        self.version_at_least_1() || self.has("CHECKSCRIPT")
    }
}

/// One LISTSCRIPTS entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptInfo {
    pub name: String,
    pub active: bool,
}

/// Result of a completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Plain OK (possibly with code and text, e.g. `OK (WARNINGS) "..."`).
    Status(StatusResponse),
    Capabilities(Capabilities),
    Scripts(Vec<ScriptInfo>),
    Script(String),
}

/// One step of an AUTHENTICATE exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaslStep {
    /// Base64 challenge line from the server.
    Challenge(String),
    Done(StatusResponse),
}

/// `("OK" / "NO" / "BYE") [SP "(" code ")"] [SP string] CRLF`
pub fn parse_status(p: &mut Parser<'_>) -> ParseResult<StatusResponse> {
    let word = p.extract_atom()?;
    let status = match word.to_ascii_uppercase().as_str() {
        "OK" => Status::Ok,
        "NO" => Status::No,
        "BYE" => Status::Bye,
        _ => return Err(ParseError::Malformed(format!("OK, NO or BYE expected, got {:?}", word))),
    };
    let mut code = None;
    let mut message = String::new();
    if p.is_space() {
        p.extract_space()?;
        if p.is_char(b'(') {
            code = parse_response_code(p)?;
            if p.is_space() {
                p.extract_space()?;
            }
        }
        if p.is_string() {
            message = p.extract_string()?;
        }
    }
    p.extract_line_break()?;
    Ok(StatusResponse { status, code, message })
}

/// Capability listing (`"NAME" [SP "value"] CRLF` lines) followed by a status line.
pub fn parse_capabilities(p: &mut Parser<'_>) -> ParseResult<(Capabilities, StatusResponse)> {
    let mut capabilities = Capabilities::default();
    while p.is_string() {
        let name = p.extract_string()?;
        let mut value = None;
        if p.is_space() {
            p.extract_space()?;
            if !p.is_char(b'\r') {
                value = Some(p.extract_string()?);
            }
        }
        p.extract_line_break()?;
        capabilities.insert(&name, value);
    }
    let status = parse_status(p)?;
    Ok((capabilities, status))
}

/// LISTSCRIPTS: `name [SP "ACTIVE"] CRLF` lines followed by a status line.
pub fn parse_script_list(p: &mut Parser<'_>) -> ParseResult<(Vec<ScriptInfo>, StatusResponse)> {
    let mut scripts = Vec::new();
    while p.is_string() {
        let name = p.extract_string()?;
        let mut active = false;
        if p.is_space() {
            p.extract_space()?;
            let flag = p.extract_atom()?;
            if !flag.eq_ignore_ascii_case("ACTIVE") {
                return Err(ParseError::Malformed(format!("ACTIVE expected, got {:?}", flag)));
            }
            active = true;
        }
        p.extract_line_break()?;
        scripts.push(ScriptInfo { name, active });
    }
    let status = parse_status(p)?;
    Ok((scripts, status))
}

/// GETSCRIPT: `string CRLF` then status; a NO carries no script.
pub fn parse_script(p: &mut Parser<'_>) -> ParseResult<(Option<String>, StatusResponse)> {
    let mut script = None;
    if p.is_string() {
        script = Some(p.extract_string()?);
        p.extract_line_break()?;
    }
    let status = parse_status(p)?;
    Ok((script, status))
}

pub fn parse_sasl_step(p: &mut Parser<'_>) -> ParseResult<SaslStep> {
    if p.is_string() {
        let challenge = p.extract_string()?;
        p.extract_line_break()?;
        return Ok(SaslStep::Challenge(challenge));
    }
    parse_status(p).map(SaslStep::Done)
}
