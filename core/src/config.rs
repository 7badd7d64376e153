/*
 * config.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Tagliacarte.
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

//! Sieve account settings: connection options per account, stored in ~/.tagliacarte/sieve.xml
//! so we do not touch the UI's config.xml. Passwords are never written here.
//! All XML read/write uses the quick_xml parser/writer; no regex or hand parsing.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;

use crate::error::SieveError;
use crate::net::{Endpoint, ProxyConfig};
use crate::sasl::{Credentials, SaslMechanism};
use crate::uri::{account_url, DEFAULT_PORT};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// When to negotiate STARTTLS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsMode {
    /// Never; credentials may cross the network in the clear.
    Disabled,
    /// When the server advertises STARTTLS.
    Opportunistic,
    /// Fail unless the connection is secured.
    #[default]
    Required,
}

impl TlsMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TlsMode::Disabled => "disabled",
            TlsMode::Opportunistic => "opportunistic",
            TlsMode::Required => "required",
        }
    }
}

impl FromStr for TlsMode {
    type Err = SieveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disabled" | "none" | "off" => Ok(TlsMode::Disabled),
            "opportunistic" => Ok(TlsMode::Opportunistic),
            "required" | "on" => Ok(TlsMode::Required),
            other => Err(SieveError::Config(format!("unknown TLS mode {:?}", other))),
        }
    }
}

/// Which SASL mechanism `establish` uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaslPreference {
    /// Strongest mechanism both sides support.
    #[default]
    Default,
    /// Do not authenticate.
    None,
    Forced(SaslMechanism),
}

impl fmt::Display for SaslPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaslPreference::Default => write!(f, "default"),
            SaslPreference::None => write!(f, "none"),
            SaslPreference::Forced(mechanism) => write!(f, "{}", mechanism.name()),
        }
    }
}

impl FromStr for SaslPreference {
    type Err = SieveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("default") {
            Ok(SaslPreference::Default)
        } else if s.eq_ignore_ascii_case("none") {
            Ok(SaslPreference::None)
        } else {
            SaslMechanism::from_name(s)
                .map(SaslPreference::Forced)
                .ok_or_else(|| SieveError::Config(format!("unknown SASL mechanism {:?}", s)))
        }
    }
}

/// Per-session connection options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Per-request timeout; also bounds connect and the TLS handshake.
    pub timeout: Duration,
    /// Idle interval after which a keep-alive is sent. `None` disables keep-alive.
    pub keep_alive: Option<Duration>,
    pub tls: TlsMode,
    pub sasl: SaslPreference,
    pub proxy: Option<ProxyConfig>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            keep_alive: None,
            tls: TlsMode::default(),
            sasl: SaslPreference::default(),
            proxy: None,
        }
    }
}

/// One Sieve account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountConfig {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub authzid: Option<String>,
    pub options: ClientOptions,
}

impl AccountConfig {
    pub fn new(id: impl Into<String>, host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port: DEFAULT_PORT,
            username: username.into(),
            authzid: None,
            options: ClientOptions::default(),
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port).with_proxy(self.options.proxy.clone())
    }

    /// `sieve://user@host:port`, the key used for credential lookup.
    pub fn url(&self) -> String {
        account_url(&self.username, &self.host, self.port)
    }

    /// Credentials for this account with the given password or token.
    pub fn credentials(&self, secret: impl Into<String>) -> Credentials {
        let credentials = Credentials::new(self.username.clone(), secret);
        match &self.authzid {
            Some(authzid) => credentials.with_authzid(authzid.clone()),
            None => credentials,
        }
    }
}

/// Default config directory: ~/.tagliacarte.
pub fn default_config_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from).map(|h| h.join(".tagliacarte"))
}

/// Default accounts path: ~/.tagliacarte/sieve.xml.
pub fn default_accounts_path() -> Option<PathBuf> {
    default_config_dir().map(|d| d.join("sieve.xml"))
}

fn xml_error(e: impl fmt::Display) -> SieveError {
    SieveError::Config(format!("XML error: {}", e))
}

fn parse_number<T: FromStr>(element: &str, text: &str) -> Result<T, SieveError> {
    text.parse()
        .map_err(|_| SieveError::Config(format!("invalid <{}> value {:?}", element, text)))
}

fn parse_bool(text: &str) -> bool {
    matches!(text.to_ascii_lowercase().as_str(), "true" | "yes" | "1")
}

#[derive(Default)]
struct ProxyFields {
    host: Option<String>,
    port: Option<u16>,
    remote_dns: bool,
}

fn set_field(account: &mut AccountConfig, proxy: &mut ProxyFields, element: &str, text: String) -> Result<(), SieveError> {
    match element {
        "id" => account.id = text,
        "host" => account.host = text,
        "port" => account.port = parse_number(element, &text)?,
        "username" => account.username = text,
        "authzid" => account.authzid = Some(text).filter(|s| !s.is_empty()),
        "tls" => account.options.tls = text.parse()?,
        "sasl" => account.options.sasl = text.parse()?,
        "timeout" => account.options.timeout = Duration::from_secs(parse_number(element, &text)?),
        "keep-alive" => {
            let secs: u64 = parse_number(element, &text)?;
            account.options.keep_alive = Some(Duration::from_secs(secs)).filter(|d| !d.is_zero());
        }
        "proxy-host" => proxy.host = Some(text),
        "proxy-port" => proxy.port = Some(parse_number(element, &text)?),
        "proxy-remote-dns" => proxy.remote_dns = parse_bool(&text),
        _ => {}
    }
    Ok(())
}

fn finish_account(mut account: AccountConfig, proxy: ProxyFields) -> Result<AccountConfig, SieveError> {
    if account.host.is_empty() {
        return Err(SieveError::Config(format!("account {:?} has no host", account.id)));
    }
    if account.id.is_empty() {
        account.id = account.url();
    }
    account.options.proxy = match (proxy.host, proxy.port) {
        (Some(host), Some(port)) => Some(ProxyConfig { host, port, remote_dns: proxy.remote_dns }),
        (Some(_), None) => return Err(SieveError::Config("proxy host without port".to_string())),
        _ => None,
    };
    Ok(account)
}

/// Parse accounts XML. Expects <sieve><account><id>..</id><host>..</host>...</account>...</sieve>.
pub fn parse_accounts(content: &str) -> Result<Vec<AccountConfig>, SieveError> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut out = Vec::new();
    let mut current: Option<(AccountConfig, ProxyFields)> = None;
    let mut element_name = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Err(e) => return Err(xml_error(e)),
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) => {
                let name = e.name();
                let name = String::from_utf8_lossy(name.as_ref()).into_owned();
                if name == "account" {
                    current = Some((AccountConfig::new("", "", ""), ProxyFields::default()));
                } else if current.is_some() {
                    element_name = name;
                }
            }
            Ok(Event::Text(e)) => {
                let Some((account, proxy)) = current.as_mut() else { continue };
                if element_name.is_empty() {
                    continue;
                }
                let text = e.unescape().map_err(xml_error)?.trim().to_string();
                set_field(account, proxy, &element_name, text)?;
                element_name.clear();
            }
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"account" {
                    if let Some((account, proxy)) = current.take() {
                        out.push(finish_account(account, proxy)?);
                    }
                }
                element_name.clear();
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

/// Load accounts from `path`. A missing file is an empty list.
pub fn load_accounts(path: &Path) -> Result<Vec<AccountConfig>, SieveError> {
    let content = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(SieveError::Config(format!("{}: {}", path.display(), e))),
    };
    parse_accounts(&content)
}

fn write_element<W: std::io::Write>(writer: &mut Writer<W>, name: &str, text: &str) -> Result<(), SieveError> {
    writer.write_event(Event::Start(BytesStart::new(name))).map_err(xml_error)?;
    writer.write_event(Event::Text(BytesText::new(text))).map_err(xml_error)?;
    writer.write_event(Event::End(BytesEnd::new(name))).map_err(xml_error)?;
    Ok(())
}

/// Build accounts XML into a byte vector (UTF-8).
pub fn accounts_to_xml(accounts: &[AccountConfig]) -> Result<Vec<u8>, SieveError> {
    let mut out = Vec::new();
    let mut writer = Writer::new_with_indent(&mut out, b' ', 2);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(xml_error)?;
    writer.write_event(Event::Start(BytesStart::new("sieve"))).map_err(xml_error)?;
    for account in accounts {
        writer.write_event(Event::Start(BytesStart::new("account"))).map_err(xml_error)?;
        write_element(&mut writer, "id", &account.id)?;
        write_element(&mut writer, "host", &account.host)?;
        write_element(&mut writer, "port", &account.port.to_string())?;
        write_element(&mut writer, "username", &account.username)?;
        if let Some(authzid) = &account.authzid {
            write_element(&mut writer, "authzid", authzid)?;
        }
        let options = &account.options;
        write_element(&mut writer, "tls", options.tls.as_str())?;
        write_element(&mut writer, "sasl", &options.sasl.to_string())?;
        write_element(&mut writer, "timeout", &options.timeout.as_secs().to_string())?;
        if let Some(keep_alive) = options.keep_alive {
            write_element(&mut writer, "keep-alive", &keep_alive.as_secs().to_string())?;
        }
        if let Some(proxy) = &options.proxy {
            write_element(&mut writer, "proxy-host", &proxy.host)?;
            write_element(&mut writer, "proxy-port", &proxy.port.to_string())?;
            write_element(&mut writer, "proxy-remote-dns", if proxy.remote_dns { "true" } else { "false" })?;
        }
        writer.write_event(Event::End(BytesEnd::new("account"))).map_err(xml_error)?;
    }
    writer.write_event(Event::End(BytesEnd::new("sieve"))).map_err(xml_error)?;
    Ok(out)
}

/// Write all accounts to `path`, creating the directory if needed. Rejects U+0000 in any value.
pub fn save_accounts(path: &Path, accounts: &[AccountConfig]) -> Result<(), SieveError> {
    for account in accounts {
        let fields = [&account.id, &account.host, &account.username];
        if fields.iter().any(|s| s.contains('\0')) || account.authzid.as_deref().is_some_and(|s| s.contains('\0')) {
            return Err(SieveError::Config("account values must not contain NUL (U+0000)".to_string()));
        }
    }
    let xml = accounts_to_xml(accounts)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| SieveError::Config(e.to_string()))?;
    }
    fs::write(path, xml).map_err(|e| SieveError::Config(format!("{}: {}", path.display(), e)))
}
