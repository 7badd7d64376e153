/*
 * uri.rs
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

//! sieve:// URLs (RFC 5804 section 3): sieve://[user@]host[:port][/owner/script].
//! Used for account identifiers and for REFERRAL targets.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

/// Default ManageSieve port.
pub const DEFAULT_PORT: u16 = 4190;

const SCHEME: &str = "sieve://";

/// Userinfo in authority: encode @ and other reserved so one @ separates userinfo from host.
const USERINFO: &AsciiSet = &CONTROLS.add(b'@').add(b':').add(b'%').add(b'/').add(b'?').add(b'#').add(b'[').add(b']').add(b' ');

fn host_for_authority(host: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]", host)
    } else {
        host.to_string()
    }
}

/// sieve://host or sieve://host:port.
pub fn sieve_url(host: &str, port: Option<u16>) -> String {
    match port {
        Some(port) => format!("{}{}:{}", SCHEME, host_for_authority(host), port),
        None => format!("{}{}", SCHEME, host_for_authority(host)),
    }
}

/// Account URL: sieve://user@host:port, user percent-encoded.
pub fn account_url(user: &str, host: &str, port: u16) -> String {
    let userinfo = utf8_percent_encode(user, USERINFO).to_string();
    format!("{}{}@{}:{}", SCHEME, userinfo, host_for_authority(host), port)
}

/// User part of an account URL, decoded.
pub fn account_user(url: &str) -> Option<String> {
    let authority = authority(url)?;
    let (userinfo, _) = authority.rsplit_once('@')?;
    Some(percent_decode_str(userinfo).decode_utf8_lossy().into_owned())
}

/// True if `url` starts with `sieve://`, in any case.
pub fn has_sieve_scheme(url: &str) -> bool {
    url.get(..SCHEME.len()).is_some_and(|prefix| prefix.eq_ignore_ascii_case(SCHEME))
}

fn authority(url: &str) -> Option<&str> {
    let rest = if has_sieve_scheme(url) {
        &url[SCHEME.len()..]
    } else if url.contains("://") {
        return None;
    } else {
        url
    };
    Some(rest.split('/').next().unwrap_or(rest))
}

/// Host and optional port of a sieve URL. Userinfo and path are dropped.
/// A bare `host[:port]` without scheme is accepted.
pub fn parse_sieve_url(url: &str) -> Option<(String, Option<u16>)> {
    let authority = authority(url.trim())?;
    let hostport = match authority.rsplit_once('@') {
        Some((_, hostport)) => hostport,
        None => authority,
    };
    let (host, port) = if let Some(bracketed) = hostport.strip_prefix('[') {
        let (host, after) = bracketed.split_once(']')?;
        let port = match after {
            "" => None,
            _ => Some(after.strip_prefix(':')?),
        };
        (host, port)
    } else {
        match hostport.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (hostport, None),
        }
    };
    if host.is_empty() {
        return None;
    }
    let port = match port {
        Some(p) => Some(p.parse::<u16>().ok()?),
        None => None,
    };
    Some((host.to_string(), port))
}
