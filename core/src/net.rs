/*
 * net.rs
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

//! Transport for the session: plain TCP (optionally through a SOCKS5 proxy) that can be
//! upgraded in place to TLS once the server accepted STARTTLS.
//!
//! The session only sees [`Transport`] and [`Connector`], so tests and embedders can
//! substitute their own streams.

use std::fmt;
use std::future::Future;
use std::io;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream as TokioTlsStream;
use tokio_rustls::rustls::client::ClientConfig;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::RootCertStore;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::error::SieveError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Byte stream carrying one ManageSieve connection.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {
    /// True once the stream is protected by TLS.
    fn is_secure(&self) -> bool;

    /// Wrap this stream in TLS, verifying the certificate for `host`.
    fn upgrade_tls(self: Box<Self>, host: String) -> BoxFuture<'static, Result<Box<dyn Transport>, SieveError>>;
}

/// Opens transports to endpoints.
pub trait Connector: Send + Sync {
    fn connect(&self, endpoint: &Endpoint) -> BoxFuture<'static, Result<Box<dyn Transport>, SieveError>>;
}

/// SOCKS5 proxy (RFC 1928), no authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    /// Let the proxy resolve the target host name.
    pub remote_dns: bool,
}

/// Where to connect: host, port and optional proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub proxy: Option<ProxyConfig>,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port, proxy: None }
    }

    pub fn with_proxy(mut self, proxy: Option<ProxyConfig>) -> Self {
        self.proxy = proxy;
        self
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)?;
        if let Some(proxy) = &self.proxy {
            write!(f, " via socks5 {}:{}", proxy.host, proxy.port)?;
        }
        Ok(())
    }
}

/// Build a root certificate store: platform native certs first, then webpki-roots as fallback.
fn build_root_store() -> RootCertStore {
    let mut root_store = RootCertStore::empty();
    if let Ok(certs) = rustls_native_certs::load_native_certs() {
        for cert in certs {
            let _ = root_store.add(cert);
        }
    }
    if root_store.is_empty() {
        root_store.roots = webpki_roots::TLS_SERVER_ROOTS.iter().cloned().collect();
    }
    root_store
}

fn default_client_config() -> Arc<ClientConfig> {
    let config = ClientConfig::builder()
        .with_root_certificates(build_root_store())
        .with_no_client_auth();
    Arc::new(config)
}

static DEFAULT_CONNECTOR: std::sync::OnceLock<TlsConnector> = std::sync::OnceLock::new();

fn default_connector() -> &'static TlsConnector {
    DEFAULT_CONNECTOR.get_or_init(|| TlsConnector::from(default_client_config()))
}

/// Certificate problems become [`SieveError::Certificate`]; everything else stays a transport error.
fn tls_error(host: &str, e: io::Error) -> SieveError {
    let rustls_error = e.get_ref().and_then(|inner| inner.downcast_ref::<rustls::Error>());
    match rustls_error {
        Some(rustls::Error::InvalidCertificate(reason)) => SieveError::Certificate {
            host: host.to_string(),
            reason: format!("{:?}", reason),
        },
        _ => SieveError::Transport(e),
    }
}

/// Async TLS stream (wraps tokio-rustls client TlsStream over TcpStream).
pub struct TlsStreamWrapper {
    inner: TokioTlsStream<TcpStream>,
}

impl AsyncRead for TlsStreamWrapper {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TlsStreamWrapper {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

impl Transport for TlsStreamWrapper {
    fn is_secure(&self) -> bool {
        true
    }

    fn upgrade_tls(self: Box<Self>, _host: String) -> BoxFuture<'static, Result<Box<dyn Transport>, SieveError>> {
        Box::pin(async { Err(SieveError::client("TLS is already active")) })
    }
}

/// Plain TCP stream, upgraded with STARTTLS.
pub struct PlainStream {
    inner: TcpStream,
}

impl PlainStream {
    pub async fn connect(host: &str, port: u16) -> io::Result<Self> {
        let tcp = TcpStream::connect((host, port)).await?;
        Ok(Self { inner: tcp })
    }

    /// Connect directly or through the endpoint's proxy.
    pub async fn connect_endpoint(endpoint: &Endpoint) -> io::Result<Self> {
        match &endpoint.proxy {
            None => Self::connect(&endpoint.host, endpoint.port).await,
            Some(proxy) => {
                let tcp = socks5_connect(proxy, &endpoint.host, endpoint.port).await?;
                Ok(Self { inner: tcp })
            }
        }
    }

    /// Upgrade this plain stream to TLS (after STARTTLS command accepted).
    pub async fn upgrade_to_tls(self, host: &str) -> Result<TlsStreamWrapper, SieveError> {
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| SieveError::client(format!("invalid host name {:?}", host)))?;
        let tls = default_connector()
            .connect(server_name, self.inner)
            .await
            .map_err(|e| tls_error(host, e))?;
        Ok(TlsStreamWrapper { inner: tls })
    }
}

impl AsyncRead for PlainStream {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for PlainStream {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

impl Transport for PlainStream {
    fn is_secure(&self) -> bool {
        false
    }

    fn upgrade_tls(self: Box<Self>, host: String) -> BoxFuture<'static, Result<Box<dyn Transport>, SieveError>> {
        Box::pin(async move {
            let tls = self.upgrade_to_tls(&host).await?;
            Ok(Box::new(tls) as Box<dyn Transport>)
        })
    }
}

/// Connects with tokio TCP, through SOCKS5 when the endpoint names a proxy.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect(&self, endpoint: &Endpoint) -> BoxFuture<'static, Result<Box<dyn Transport>, SieveError>> {
        let endpoint = endpoint.clone();
        Box::pin(async move {
            debug!("connecting to {}", endpoint);
            let stream = PlainStream::connect_endpoint(&endpoint).await?;
            Ok(Box::new(stream) as Box<dyn Transport>)
        })
    }
}

fn socks_error(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::Other, msg)
}

fn socks5_reply_message(code: u8) -> &'static str {
    match code {
        0x01 => "general failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unknown error",
    }
}

/// SOCKS5 CONNECT through `proxy` to `host:port`.
async fn socks5_connect(proxy: &ProxyConfig, host: &str, port: u16) -> io::Result<TcpStream> {
    let mut tcp = TcpStream::connect((proxy.host.as_str(), proxy.port)).await?;

    tcp.write_all(&[0x05, 0x01, 0x00]).await?;
    let mut choice = [0u8; 2];
    tcp.read_exact(&mut choice).await?;
    if choice != [0x05, 0x00] {
        return Err(socks_error("SOCKS5 proxy requires authentication".to_string()));
    }

    let mut request = vec![0x05, 0x01, 0x00];
    if proxy.remote_dns {
        let name = host.as_bytes();
        if name.len() > 255 {
            return Err(socks_error("host name too long for SOCKS5".to_string()));
        }
        request.push(0x03);
        request.push(name.len() as u8);
        request.extend_from_slice(name);
    } else {
        let addr = tokio::net::lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| socks_error(format!("cannot resolve {}", host)))?;
        match addr.ip() {
            IpAddr::V4(ip) => {
                request.push(0x01);
                request.extend_from_slice(&ip.octets());
            }
            IpAddr::V6(ip) => {
                request.push(0x04);
                request.extend_from_slice(&ip.octets());
            }
        }
    }
    request.extend_from_slice(&port.to_be_bytes());
    tcp.write_all(&request).await?;

    let mut head = [0u8; 4];
    tcp.read_exact(&mut head).await?;
    if head[0] != 0x05 {
        return Err(socks_error("not a SOCKS5 proxy".to_string()));
    }
    if head[1] != 0x00 {
        return Err(socks_error(format!("SOCKS5 connect failed: {}", socks5_reply_message(head[1]))));
    }
    let address_len = match head[3] {
        0x01 => 4,
        0x04 => 16,
        0x03 => {
            let mut len = [0u8; 1];
            tcp.read_exact(&mut len).await?;
            len[0] as usize
        }
        _ => return Err(socks_error("invalid SOCKS5 reply".to_string())),
    };
    let mut bound = vec![0u8; address_len + 2];
    tcp.read_exact(&mut bound).await?;
    Ok(tcp)
}
