/*
 * mechanism.rs
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

//! SASL mechanism names and metadata.

use super::scram::ScramHash;

/// Supported SASL mechanisms (client-side).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaslMechanism {
    /// PLAIN (RFC 4616) – requires TLS.
    Plain,
    /// Legacy LOGIN – requires TLS.
    Login,
    /// CRAM-MD5 (RFC 2195) – challenge-response.
    CramMd5,
    /// SCRAM-SHA-1 (RFC 5802).
    ScramSha1,
    /// SCRAM-SHA-256 (RFC 7677).
    ScramSha256,
    /// SCRAM-SHA-512.
    ScramSha512,
    /// EXTERNAL (RFC 4422 appendix A) – identity from the TLS client certificate.
    External,
    /// XOAUTH2 – OAuth2 bearer token (Gmail, Outlook).
    XOAuth2,
    /// OAUTHBEARER (RFC 7628).
    OAuthBearer,
}

/// Order used when the server offers several mechanisms and none is forced.
/// Token and certificate based mechanisms are never picked automatically.
const AUTOMATIC_PREFERENCE: &[SaslMechanism] = &[
    SaslMechanism::ScramSha512,
    SaslMechanism::ScramSha256,
    SaslMechanism::ScramSha1,
    SaslMechanism::CramMd5,
    SaslMechanism::Plain,
    SaslMechanism::Login,
];

impl SaslMechanism {
    pub fn name(&self) -> &'static str {
        match self {
            SaslMechanism::Plain => "PLAIN",
            SaslMechanism::Login => "LOGIN",
            SaslMechanism::CramMd5 => "CRAM-MD5",
            SaslMechanism::ScramSha1 => "SCRAM-SHA-1",
            SaslMechanism::ScramSha256 => "SCRAM-SHA-256",
            SaslMechanism::ScramSha512 => "SCRAM-SHA-512",
            SaslMechanism::External => "EXTERNAL",
            SaslMechanism::XOAuth2 => "XOAUTH2",
            SaslMechanism::OAuthBearer => "OAUTHBEARER",
        }
    }

    /// Mechanisms that put the secret on the wire in the clear.
    pub fn requires_tls(&self) -> bool {
        matches!(
            self,
            SaslMechanism::Plain | SaslMechanism::Login | SaslMechanism::XOAuth2 | SaslMechanism::OAuthBearer
        )
    }

    pub(crate) fn scram_hash(&self) -> Option<ScramHash> {
        match self {
            SaslMechanism::ScramSha1 => Some(ScramHash::Sha1),
            SaslMechanism::ScramSha256 => Some(ScramHash::Sha256),
            SaslMechanism::ScramSha512 => Some(ScramHash::Sha512),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_uppercase().as_str() {
            "PLAIN" => Some(SaslMechanism::Plain),
            "LOGIN" => Some(SaslMechanism::Login),
            "CRAM-MD5" => Some(SaslMechanism::CramMd5),
            "SCRAM-SHA-1" => Some(SaslMechanism::ScramSha1),
            "SCRAM-SHA-256" => Some(SaslMechanism::ScramSha256),
            "SCRAM-SHA-512" => Some(SaslMechanism::ScramSha512),
            "EXTERNAL" => Some(SaslMechanism::External),
            "XOAUTH2" => Some(SaslMechanism::XOAuth2),
            "OAUTHBEARER" => Some(SaslMechanism::OAuthBearer),
            _ => None,
        }
    }

    /// Best password mechanism among those the server advertises. LOGIN only as last resort.
    pub fn select<S: AsRef<str>>(offered: &[S]) -> Option<Self> {
        let offered: Vec<SaslMechanism> = offered.iter().filter_map(|m| Self::from_name(m.as_ref())).collect();
        AUTOMATIC_PREFERENCE.iter().copied().find(|m| offered.contains(m))
    }
}

impl std::fmt::Display for SaslMechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
