/*
 * autoconfig.rs
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

//! Server discovery: connect to every candidate at once and report the first one that
//! greets like a ManageSieve server. The other probes are aborted (their sockets closed)
//! before the callback runs. Failed candidates are not retried.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, info};

use super::codec::{ParseError, Parser};
use super::response::{parse_capabilities, Capabilities};
use crate::config::DEFAULT_TIMEOUT;
use crate::error::SieveError;
use crate::net::{Connector, Endpoint, ProxyConfig, TcpConnector, Transport};

/// The candidate that answered first.
#[derive(Debug, Clone)]
pub struct ProbeSuccess {
    pub endpoint: Endpoint,
    pub capabilities: Capabilities,
}

pub struct AutoConfig {
    candidates: Vec<Endpoint>,
    connector: Arc<dyn Connector>,
    timeout: Duration,
    running: Mutex<Option<AbortHandle>>,
}

impl Default for AutoConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl AutoConfig {
    pub fn new() -> Self {
        Self::with_connector(Arc::new(TcpConnector))
    }

    pub fn with_connector(connector: Arc<dyn Connector>) -> Self {
        Self { candidates: Vec::new(), connector, timeout: DEFAULT_TIMEOUT, running: Mutex::new(None) }
    }

    /// Limit for connecting and for receiving the greeting, per candidate.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn add_host(&mut self, host: impl Into<String>, port: u16, proxy: Option<ProxyConfig>) {
        self.candidates.push(Endpoint::new(host, port).with_proxy(proxy));
    }

    pub fn candidates(&self) -> &[Endpoint] {
        &self.candidates
    }

    pub fn is_running(&self) -> bool {
        let running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        running.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Start probing. `on_complete` receives the first success, or the last failure once
    /// every candidate has failed. It is not called after [`AutoConfig::cancel`].
    pub fn run<F>(&self, on_complete: F) -> Result<(), SieveError>
    where
        F: FnOnce(Result<ProbeSuccess, SieveError>) + Send + 'static,
    {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.as_ref().is_some_and(|task| !task.is_finished()) {
            return Err(SieveError::AlreadyRunning);
        }
        let candidates = self.candidates.clone();
        let connector = Arc::clone(&self.connector);
        let timeout = self.timeout;
        let task = tokio::spawn(async move {
            on_complete(race(candidates, connector, timeout).await);
        });
        *running = Some(task.abort_handle());
        Ok(())
    }

    /// Abort all outstanding probes. Safe to call when not running.
    pub fn cancel(&self) {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = running.take() {
            debug!("autoconfig cancelled");
            task.abort();
        }
    }
}

async fn race(
    candidates: Vec<Endpoint>,
    connector: Arc<dyn Connector>,
    timeout: Duration,
) -> Result<ProbeSuccess, SieveError> {
    if candidates.is_empty() {
        return Err(SieveError::client("no candidate servers"));
    }
    let mut probes = JoinSet::new();
    for endpoint in candidates {
        probes.spawn(probe(Arc::clone(&connector), endpoint, timeout));
    }
    let mut last_error = None;
    while let Some(joined) = probes.join_next().await {
        match joined {
            Ok(Ok(success)) => {
                probes.abort_all();
                while probes.join_next().await.is_some() {}
                info!("found ManageSieve server at {}", success.endpoint);
                return Ok(success);
            }
            Ok(Err(e)) => {
                debug!("probe failed: {}", e);
                last_error = Some(e);
            }
            Err(e) => last_error = Some(SieveError::client(format!("probe task failed: {}", e))),
        }
    }
    Err(last_error.unwrap_or_else(|| SieveError::client("no candidate servers")))
}

async fn probe(connector: Arc<dyn Connector>, endpoint: Endpoint, timeout: Duration) -> Result<ProbeSuccess, SieveError> {
    debug!("probing {}", endpoint);
    let mut transport = tokio::time::timeout(timeout, connector.connect(&endpoint))
        .await
        .map_err(|_| SieveError::Timeout)??;
    let capabilities = tokio::time::timeout(timeout, read_greeting(&mut transport))
        .await
        .map_err(|_| SieveError::Timeout)??;
    let _ = transport.shutdown().await;
    Ok(ProbeSuccess { endpoint, capabilities })
}

async fn read_greeting(transport: &mut Box<dyn Transport>) -> Result<Capabilities, SieveError> {
    let mut buffer = BytesMut::with_capacity(1024);
    loop {
        if transport.read_buf(&mut buffer).await? == 0 {
            return Err(SieveError::ConnectionLost("closed before greeting".to_string()));
        }
        let mut parser = Parser::new(&buffer[..]);
        match parse_capabilities(&mut parser) {
            Ok((capabilities, status)) if status.is_ok() => return Ok(capabilities),
            Ok((_, status)) => return Err(status.into_error()),
            Err(ParseError::Incomplete) => continue,
            Err(ParseError::Malformed(msg)) => return Err(SieveError::Protocol(msg)),
        }
    }
}
