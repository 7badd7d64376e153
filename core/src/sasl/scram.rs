/*
 * scram.rs
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

//! SCRAM-SHA-1 / SCRAM-SHA-256 / SCRAM-SHA-512 SASL client (RFC 5802, 7677).
//! No channel binding; SASLprep is not applied to the password.

use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

use super::SaslError;
use crate::protocol::managesieve::codec::{decode_base64, encode_base64};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScramHash {
    Sha1,
    Sha256,
    Sha512,
}

impl ScramHash {
    fn hi(self, password: &[u8], salt: &[u8], iterations: u32) -> Vec<u8> {
        match self {
            ScramHash::Sha1 => {
                let mut out = [0u8; 20];
                pbkdf2_hmac::<Sha1>(password, salt, iterations, &mut out);
                out.to_vec()
            }
            ScramHash::Sha256 => {
                let mut out = [0u8; 32];
                pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut out);
                out.to_vec()
            }
            ScramHash::Sha512 => {
                let mut out = [0u8; 64];
                pbkdf2_hmac::<Sha512>(password, salt, iterations, &mut out);
                out.to_vec()
            }
        }
    }

    fn hmac(self, key: &[u8], data: &[u8]) -> Result<Vec<u8>, SaslError> {
        match self {
            ScramHash::Sha1 => mac::<Hmac<Sha1>>(key, data),
            ScramHash::Sha256 => mac::<Hmac<Sha256>>(key, data),
            ScramHash::Sha512 => mac::<Hmac<Sha512>>(key, data),
        }
    }

    /// Constant-time check of `tag` against HMAC(key, data).
    fn verify_hmac(self, key: &[u8], data: &[u8], tag: &[u8]) -> Result<(), SaslError> {
        match self {
            ScramHash::Sha1 => verify_mac::<Hmac<Sha1>>(key, data, tag),
            ScramHash::Sha256 => verify_mac::<Hmac<Sha256>>(key, data, tag),
            ScramHash::Sha512 => verify_mac::<Hmac<Sha512>>(key, data, tag),
        }
    }

    fn h(self, data: &[u8]) -> Vec<u8> {
        match self {
            ScramHash::Sha1 => Sha1::digest(data).to_vec(),
            ScramHash::Sha256 => Sha256::digest(data).to_vec(),
            ScramHash::Sha512 => Sha512::digest(data).to_vec(),
        }
    }
}

fn mac<M: Mac + KeyInit>(key: &[u8], data: &[u8]) -> Result<Vec<u8>, SaslError> {
    let mut mac = <M as Mac>::new_from_slice(key).map_err(|_| SaslError::invalid("invalid HMAC key"))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn verify_mac<M: Mac + KeyInit>(key: &[u8], data: &[u8], tag: &[u8]) -> Result<(), SaslError> {
    let mut mac = <M as Mac>::new_from_slice(key).map_err(|_| SaslError::invalid("invalid HMAC key"))?;
    mac.update(data);
    mac.verify_slice(tag).map_err(|_| SaslError::invalid("server signature mismatch"))
}

/// Upper bound on the server-chosen PBKDF2 iteration count.
pub const MAX_ITERATIONS: u32 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Initial,
    ClientFirstSent,
    ClientFinalSent,
    Verified,
}

/// Client side of one SCRAM exchange.
#[derive(Clone)]
pub struct ScramClient {
    hash: ScramHash,
    username: String,
    password: String,
    gs2_header: String,
    client_nonce: String,
    client_first_bare: String,
    server_key: Vec<u8>,
    auth_message: String,
    stage: Stage,
}

impl std::fmt::Debug for ScramClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScramClient")
            .field("hash", &self.hash)
            .field("username", &self.username)
            .field("stage", &self.stage)
            .finish()
    }
}

impl ScramClient {
    pub fn new(hash: ScramHash, username: &str, password: &str, authzid: Option<&str>) -> Result<Self, SaslError> {
        let nonce = generate_nonce()?;
        Ok(Self::with_nonce(hash, username, password, authzid, &nonce))
    }

    /// Fixed client nonce, for reproducible exchanges.
    pub fn with_nonce(hash: ScramHash, username: &str, password: &str, authzid: Option<&str>, nonce: &str) -> Self {
        let gs2_header = match authzid {
            Some(a) if !a.is_empty() => format!("n,a={},", sasl_name(a)),
            _ => "n,,".to_string(),
        };
        Self {
            hash,
            username: username.to_string(),
            password: password.to_string(),
            gs2_header,
            client_nonce: nonce.to_string(),
            client_first_bare: format!("n={},r={}", sasl_name(username), nonce),
            server_key: Vec::new(),
            auth_message: String::new(),
            stage: Stage::Initial,
        }
    }

    /// gs2-header + client-first-bare.
    pub fn client_first(&mut self) -> Vec<u8> {
        self.stage = Stage::ClientFirstSent;
        format!("{}{}", self.gs2_header, self.client_first_bare).into_bytes()
    }

    /// Build client-final-message from the decoded server-first-message.
    pub fn client_final(&mut self, server_first: &[u8]) -> Result<Vec<u8>, SaslError> {
        if self.stage != Stage::ClientFirstSent {
            return Err(SaslError::invalid("unexpected SCRAM server-first message"));
        }
        let server_first = std::str::from_utf8(server_first).map_err(|_| SaslError::invalid("server-first not UTF-8"))?;
        let (nonce, salt_b64, iterations) = parse_server_first(server_first)?;
        if !nonce.starts_with(&self.client_nonce) || nonce.len() == self.client_nonce.len() {
            return Err(SaslError::invalid("server nonce must extend client nonce"));
        }
        let salt = decode_base64(&salt_b64).map_err(|_| SaslError::invalid("invalid salt base64"))?;
        let iterations: u32 = iterations.parse().map_err(|_| SaslError::invalid("invalid iteration count"))?;
        if iterations == 0 {
            return Err(SaslError::invalid("invalid iteration count"));
        }
        if iterations > MAX_ITERATIONS {
            return Err(SaslError::new(format!("iteration count {} exceeds {}", iterations, MAX_ITERATIONS)));
        }

        let salted_password = self.hash.hi(self.password.as_bytes(), &salt, iterations);
        let client_key = self.hash.hmac(&salted_password, b"Client Key")?;
        let stored_key = self.hash.h(&client_key);
        let server_key = self.hash.hmac(&salted_password, b"Server Key")?;

        let client_final_no_proof = format!("c={},r={}", encode_base64(self.gs2_header.as_bytes()), nonce);
        let auth_message = format!("{},{},{}", self.client_first_bare, server_first, client_final_no_proof);
        let client_signature = self.hash.hmac(&stored_key, auth_message.as_bytes())?;
        let client_proof = xor(&client_key, &client_signature);

        self.server_key = server_key;
        self.auth_message = auth_message;
        self.stage = Stage::ClientFinalSent;
        Ok(format!("{},p={}", client_final_no_proof, encode_base64(&client_proof)).into_bytes())
    }

    /// Check the decoded server-final-message (`v=...` or `e=...`).
    pub fn verify_server_final(&mut self, server_final: &[u8]) -> Result<(), SaslError> {
        if self.stage != Stage::ClientFinalSent {
            return Err(SaslError::invalid("unexpected SCRAM server-final message"));
        }
        let server_final = std::str::from_utf8(server_final).map_err(|_| SaslError::invalid("server-final not UTF-8"))?;
        let mut verifier = None;
        for part in server_final.split(',') {
            if let Some(e) = part.strip_prefix("e=") {
                return Err(SaslError::new(format!("server rejected authentication: {}", e)));
            }
            if let Some(v) = part.strip_prefix("v=") {
                verifier = Some(v);
            }
        }
        let verifier = verifier.ok_or_else(|| SaslError::invalid("missing v in server-final"))?;
        let signature = decode_base64(verifier).map_err(|_| SaslError::invalid("invalid server signature base64"))?;
        self.hash.verify_hmac(&self.server_key, self.auth_message.as_bytes(), &signature)?;
        self.stage = Stage::Verified;
        Ok(())
    }

    pub fn is_verified(&self) -> bool {
        self.stage == Stage::Verified
    }

    pub fn hash(&self) -> ScramHash {
        self.hash
    }

    /// True between client-final and the server's verifier.
    pub fn awaiting_server_final(&self) -> bool {
        self.stage == Stage::ClientFinalSent
    }
}

/// 18 random bytes, base64: 24 printable characters without commas.
fn generate_nonce() -> Result<String, SaslError> {
    let mut bytes = [0u8; 18];
    getrandom::getrandom(&mut bytes).map_err(|e| SaslError::new(format!("nonce generation failed: {}", e)))?;
    Ok(encode_base64(&bytes))
}

fn sasl_name(s: &str) -> String {
    s.replace('=', "=3D").replace(',', "=2C")
}

fn parse_server_first(input: &str) -> Result<(String, String, String), SaslError> {
    let mut r = None;
    let mut s = None;
    let mut i = None;
    for part in input.split(',') {
        if let Some(v) = part.strip_prefix("r=") {
            r = Some(v.to_string());
        } else if let Some(v) = part.strip_prefix("s=") {
            s = Some(v.to_string());
        } else if let Some(v) = part.strip_prefix("i=") {
            i = Some(v.to_string());
        } else if part.starts_with("m=") {
            return Err(SaslError::invalid("unsupported SCRAM extension"));
        }
    }
    let r = r.ok_or_else(|| SaslError::invalid("missing r in server-first"))?;
    let s = s.ok_or_else(|| SaslError::invalid("missing s in server-first"))?;
    let i = i.ok_or_else(|| SaslError::invalid("missing i in server-first"))?;
    Ok((r, s, i))
}

fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b.iter()).map(|(x, y)| x ^ y).collect()
}
