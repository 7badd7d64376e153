/*
 * mod.rs
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

//! SASL client: PLAIN, LOGIN, CRAM-MD5, SCRAM-SHA-1/256/512, EXTERNAL, XOAUTH2, OAUTHBEARER.
//!
//! [`SaslClient`] works on raw bytes; base64 framing is the protocol's job.
//! - `initial_response` (sent with AUTHENTICATE, `None` when the mechanism waits for a challenge)
//! - `respond` (one call per server challenge)
//! - `verify_success` (additional data carried by the final OK, e.g. the SCRAM server signature)

mod mechanism;
mod plain;
mod scram;
mod xoauth2;

use std::fmt;

use hmac::Mac;
use thiserror::Error;
use tracing::warn;

pub use mechanism::SaslMechanism;
pub use plain::encode_plain;
pub use scram::{ScramClient, ScramHash};
pub use xoauth2::{oauthbearer_initial_response, xoauth2_initial_response};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SaslError {
    pub message: String,
}

impl SaslError {
    pub fn new(message: String) -> Self {
        Self { message }
    }

    pub fn invalid(msg: &str) -> Self {
        Self { message: msg.to_string() }
    }
}

/// Authentication identity. `secret` is the password, or the access token for the OAuth
/// mechanisms. `authzid` is the optional identity to act as.
#[derive(Clone, Default)]
pub struct Credentials {
    pub username: String,
    pub secret: String,
    pub authzid: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self { username: username.into(), secret: secret.into(), authzid: None }
    }

    pub fn with_authzid(mut self, authzid: impl Into<String>) -> Self {
        self.authzid = Some(authzid.into());
        self
    }

    fn authzid(&self) -> &str {
        self.authzid.as_deref().unwrap_or("")
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"***")
            .field("authzid", &self.authzid)
            .finish()
    }
}

/// Client state for one authentication exchange.
#[derive(Debug)]
pub enum SaslClient {
    Plain(Credentials),
    Login { credentials: Credentials, step: u8 },
    CramMd5(Credentials),
    Scram(ScramClient),
    External(Credentials),
    XOAuth2(Credentials),
    OAuthBearer(Credentials),
}

impl SaslClient {
    pub fn new(mechanism: SaslMechanism, credentials: Credentials) -> Result<Self, SaslError> {
        Ok(match mechanism {
            SaslMechanism::Plain => SaslClient::Plain(credentials),
            SaslMechanism::Login => SaslClient::Login { credentials, step: 0 },
            SaslMechanism::CramMd5 => SaslClient::CramMd5(credentials),
            SaslMechanism::ScramSha1 | SaslMechanism::ScramSha256 | SaslMechanism::ScramSha512 => {
                let hash = mechanism
                    .scram_hash()
                    .ok_or_else(|| SaslError::invalid("not a SCRAM mechanism"))?;
                SaslClient::Scram(ScramClient::new(
                    hash,
                    &credentials.username,
                    &credentials.secret,
                    credentials.authzid.as_deref(),
                )?)
            }
            SaslMechanism::External => SaslClient::External(credentials),
            SaslMechanism::XOAuth2 => SaslClient::XOAuth2(credentials),
            SaslMechanism::OAuthBearer => SaslClient::OAuthBearer(credentials),
        })
    }

    pub fn mechanism(&self) -> SaslMechanism {
        match self {
            SaslClient::Plain(_) => SaslMechanism::Plain,
            SaslClient::Login { .. } => SaslMechanism::Login,
            SaslClient::CramMd5(_) => SaslMechanism::CramMd5,
            SaslClient::Scram(scram) => match scram.hash() {
                ScramHash::Sha1 => SaslMechanism::ScramSha1,
                ScramHash::Sha256 => SaslMechanism::ScramSha256,
                ScramHash::Sha512 => SaslMechanism::ScramSha512,
            },
            SaslClient::External(_) => SaslMechanism::External,
            SaslClient::XOAuth2(_) => SaslMechanism::XOAuth2,
            SaslClient::OAuthBearer(_) => SaslMechanism::OAuthBearer,
        }
    }

    /// Initial response, if the mechanism sends one. `Some(empty)` is an explicit empty response.
    pub fn initial_response(&mut self) -> Option<Vec<u8>> {
        match self {
            SaslClient::Plain(c) => Some(encode_plain(c.authzid(), &c.username, &c.secret)),
            SaslClient::Login { .. } | SaslClient::CramMd5(_) => None,
            SaslClient::Scram(scram) => Some(scram.client_first()),
            SaslClient::External(c) => Some(c.authzid().as_bytes().to_vec()),
            SaslClient::XOAuth2(c) => Some(xoauth2_initial_response(&c.username, &c.secret)),
            SaslClient::OAuthBearer(c) => Some(oauthbearer_initial_response(&c.username, &c.secret)),
        }
    }

    /// Answer one decoded server challenge.
    pub fn respond(&mut self, challenge: &[u8]) -> Result<Vec<u8>, SaslError> {
        match self {
            SaslClient::Plain(c) => {
                if challenge.is_empty() {
                    Ok(encode_plain(c.authzid(), &c.username, &c.secret))
                } else {
                    Err(SaslError::invalid("unexpected PLAIN challenge"))
                }
            }
            SaslClient::Login { credentials, step } => login_respond(credentials, step, challenge),
            SaslClient::CramMd5(c) => cram_md5_response(&c.username, &c.secret, challenge),
            SaslClient::Scram(scram) => {
                if scram.awaiting_server_final() {
                    scram.verify_server_final(challenge)?;
                    Ok(Vec::new())
                } else {
                    scram.client_final(challenge)
                }
            }
            SaslClient::External(_) => {
                if challenge.is_empty() {
                    Ok(Vec::new())
                } else {
                    Err(SaslError::invalid("unexpected EXTERNAL challenge"))
                }
            }
            SaslClient::XOAuth2(_) | SaslClient::OAuthBearer(_) => {
                warn!("OAuth authentication error: {}", String::from_utf8_lossy(challenge));
                Ok(xoauth2::error_acknowledgement(matches!(self, SaslClient::OAuthBearer(_))))
            }
        }
    }

    /// Called on the final OK with the data of its `(SASL "...")` code, if any.
    pub fn verify_success(&mut self, additional: Option<&[u8]>) -> Result<(), SaslError> {
        match self {
            SaslClient::Scram(scram) => {
                if scram.is_verified() {
                    return Ok(());
                }
                match additional {
                    Some(data) => scram.verify_server_final(data),
                    None => Err(SaslError::invalid("server did not prove knowledge of the password")),
                }
            }
            _ => Ok(()),
        }
    }
}

/// LOGIN: the server prompts "Username:" then "Password:". Prompts that cannot be
/// recognised are answered in that order.
fn login_respond(credentials: &Credentials, step: &mut u8, challenge: &[u8]) -> Result<Vec<u8>, SaslError> {
    let prompt = String::from_utf8_lossy(challenge).to_lowercase();
    let answer = if prompt.contains("username") || (*step == 0 && !prompt.contains("password")) {
        credentials.username.as_bytes().to_vec()
    } else if prompt.contains("password") || *step == 1 {
        credentials.secret.as_bytes().to_vec()
    } else {
        return Err(SaslError::invalid("unexpected LOGIN challenge"));
    };
    *step += 1;
    Ok(answer)
}

fn cram_md5_response(authcid: &str, password: &str, challenge: &[u8]) -> Result<Vec<u8>, SaslError> {
    let mut mac = HmacMd5::new_from_slice(password.as_bytes()).map_err(|_| SaslError::invalid("invalid HMAC key"))?;
    mac.update(challenge);
    let digest = mac.finalize().into_bytes();
    Ok(format!("{} {}", authcid, bytes_to_hex(&digest)).into_bytes())
}

fn bytes_to_hex(b: &[u8]) -> String {
    const HEX: &[u8] = b"0123456789abcdef";
    let mut s = String::with_capacity(b.len() * 2);
    for &x in b {
        s.push(HEX[(x >> 4) as usize] as char);
        s.push(HEX[(x & 15) as usize] as char);
    }
    s
}

type HmacMd5 = hmac::Hmac<md5::Md5>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cram_md5_rfc2195() {
        let challenge = b"<1896.697170952@postoffice.reston.mci.net>";
        let response = cram_md5_response("tim", "tanstaaftanstaaf", challenge).unwrap();
        assert_eq!(response, b"tim b913a602c7eda7a495b4e6e7334d3890".to_vec());
    }

    #[test]
    fn login_prompts() {
        let mut client = SaslClient::new(SaslMechanism::Login, Credentials::new("blubb", "bla")).unwrap();
        assert_eq!(client.initial_response(), None);
        assert_eq!(client.respond(b"Username:").unwrap(), b"blubb".to_vec());
        assert_eq!(client.respond(b"Password:").unwrap(), b"bla".to_vec());
        assert!(client.respond(b"What?").is_err());
    }

    #[test]
    fn plain_initial() {
        let mut client = SaslClient::new(SaslMechanism::Plain, Credentials::new("user", "pencil")).unwrap();
        assert_eq!(client.initial_response(), Some(b"\0user\0pencil".to_vec()));
        assert!(client.verify_success(None).is_ok());
    }

    #[test]
    fn external_sends_authzid() {
        let mut client = SaslClient::new(SaslMechanism::External, Credentials::default()).unwrap();
        assert_eq!(client.initial_response(), Some(Vec::new()));
        let mut client =
            SaslClient::new(SaslMechanism::External, Credentials::default().with_authzid("admin")).unwrap();
        assert_eq!(client.initial_response(), Some(b"admin".to_vec()));
    }

    #[test]
    fn oauth_error_challenge_is_acknowledged() {
        let mut client = SaslClient::new(SaslMechanism::OAuthBearer, Credentials::new("u", "t")).unwrap();
        assert_eq!(client.respond(br#"{"status":"invalid_token"}"#).unwrap(), vec![0x01]);
        let mut client = SaslClient::new(SaslMechanism::XOAuth2, Credentials::new("u", "t")).unwrap();
        assert_eq!(client.respond(br#"{"status":"400"}"#).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn scram_requires_server_proof() {
        let mut client = SaslClient::new(SaslMechanism::ScramSha256, Credentials::new("user", "pencil")).unwrap();
        assert_eq!(client.mechanism(), SaslMechanism::ScramSha256);
        assert!(client.verify_success(None).is_err());
    }

    #[test]
    fn credentials_debug_hides_secret() {
        let dbg = format!("{:?}", Credentials::new("me", "hunter2"));
        assert!(!dbg.contains("hunter2"));
    }
}
