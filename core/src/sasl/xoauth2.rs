/*
 * xoauth2.rs
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

//! OAuth2 bearer token mechanisms: XOAUTH2 and OAUTHBEARER (RFC 7628).
//!
//! Both are single-shot. On failure the server sends one challenge carrying a JSON error
//! document; the client must answer it (empty for XOAUTH2, `\x01` for OAUTHBEARER) and
//! the server then completes with NO.
//!
//! ```text
//! XOAUTH2:     user={user}\x01auth=Bearer {token}\x01\x01
//! OAUTHBEARER: n,a={user},\x01auth=Bearer {token}\x01\x01
//! ```
//!
//! See <https://developers.google.com/gmail/imap/xoauth2-protocol>

/// Build the raw XOAUTH2 initial response (before base64 encoding).
pub fn xoauth2_initial_response(user: &str, access_token: &str) -> Vec<u8> {
    format!("user={}\x01auth=Bearer {}\x01\x01", user, access_token).into_bytes()
}

/// Build the raw OAUTHBEARER initial response. `,` and `=` in the user are escaped
/// as in SCRAM saslnames.
pub fn oauthbearer_initial_response(user: &str, access_token: &str) -> Vec<u8> {
    let user = user.replace('=', "=3D").replace(',', "=2C");
    format!("n,a={},\x01auth=Bearer {}\x01\x01", user, access_token).into_bytes()
}

/// Client answer to the error challenge, which aborts the exchange.
pub fn error_acknowledgement(oauthbearer: bool) -> Vec<u8> {
    if oauthbearer {
        vec![0x01]
    } else {
        Vec::new()
    }
}
