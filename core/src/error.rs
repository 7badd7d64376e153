/*
 * error.rs
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

//! Error type shared by the ManageSieve session, transport and autoconfig.

use std::io;

use thiserror::Error;

use crate::protocol::managesieve::response_code::{Referral, ResponseCode};
use crate::sasl::SaslError;

/// Errors surfaced to callers of the session API.
#[derive(Debug, Error)]
pub enum SieveError {
    /// Socket level failure (connect refused, reset, write error).
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// The server certificate was rejected during the TLS handshake.
    /// Kept apart from `Transport` so the caller can offer a trust decision.
    #[error("certificate validation failed for {host}: {reason}")]
    Certificate { host: String, reason: String },

    /// The connection was closed locally (disconnect or logout) before the request completed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The connection died underneath a pending request.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The server sent bytes that do not form a valid response.
    #[error("malformed response: {0}")]
    Protocol(String),

    /// The server answered `NO`.
    #[error("{}", describe("server refused", .code, .message))]
    Server {
        code: Option<ResponseCode>,
        message: String,
    },

    /// The server answered `BYE` and is closing the connection.
    #[error("{}", describe("server closed connection", .code, .message))]
    Bye {
        code: Option<ResponseCode>,
        message: String,
    },

    /// The server asked the client to reconnect elsewhere.
    #[error("referred to {0}")]
    Referral(Referral),

    #[error("request timed out")]
    Timeout,

    #[error("authentication failed: {0}")]
    Sasl(#[from] SaslError),

    /// Invalid use of the API (wrong state, unsupported operation).
    #[error("{0}")]
    Client(String),

    #[error("already running")]
    AlreadyRunning,

    #[error("configuration error: {0}")]
    Config(String),
}

impl SieveError {
    pub fn client(msg: impl Into<String>) -> Self {
        SieveError::Client(msg.into())
    }

    /// Response code attached to a `NO` or `BYE`, if any.
    pub fn response_code(&self) -> Option<&ResponseCode> {
        match self {
            SieveError::Server { code, .. } | SieveError::Bye { code, .. } => code.as_ref(),
            _ => None,
        }
    }

    /// True for errors after which the connection can no longer be used.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            SieveError::Server { .. } | SieveError::Client(_) | SieveError::AlreadyRunning | SieveError::Config(_)
        )
    }
}

fn describe(prefix: &str, code: &Option<ResponseCode>, message: &str) -> String {
    match (code, message.is_empty()) {
        (Some(code), true) => format!("{} ({})", prefix, code),
        (Some(code), false) => format!("{} ({}): {}", prefix, code, message),
        (None, true) => prefix.to_string(),
        (None, false) => format!("{}: {}", prefix, message),
    }
}
