/*
 * session.rs
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

//! ManageSieve session: connect, STARTTLS, AUTHENTICATE and the script commands.
//!
//! Pattern follows the other protocol clients: the connection lives in a spawned task and
//! [`Session`] is the caller-side state machine. Each operation queues a request and awaits
//! its result; [`Session::add_request`] queues without awaiting, so several requests can be
//! pipelined (they are still sent one at a time). Referrals are reported, never followed.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::client::{ClientHandle, DisconnectReason, PendingResponse};
use super::request::{Command, RequestKind, SaslExchange};
use super::response::{Capabilities, Response, ScriptInfo};
use super::response_code::Referral;
use crate::config::{ClientOptions, SaslPreference, TlsMode};
use crate::error::SieveError;
use crate::net::{Connector, Endpoint, TcpConnector};
use crate::sasl::{Credentials, SaslClient, SaslMechanism};

/// Scratch script used to check syntax on servers without CHECKSCRIPT.
const CHECK_SCRIPT_NAME: &str = "TMP_FILE_DELETE_ME";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    TlsNegotiating,
    Authenticating,
    Ready,
    Disconnecting,
    /// The server sent a REFERRAL; reconnect to [`Session::referral`].
    Referred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsState {
    None,
    Upgrading,
    Active,
}

/// Notifications from the connection, delivered on the channel from [`Session::take_events`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Capabilities from the initial greeting.
    Greeting(Capabilities),
    /// Capabilities re-issued after STARTTLS or returned by CAPABILITY.
    CapabilitiesChanged(Capabilities),
    Referral(Referral),
    /// The connection was idle and a keep-alive was sent.
    Idle,
    /// A request timed out; the connection is being closed.
    Timeout,
    Disconnected(DisconnectReason),
}

pub struct Session {
    options: ClientOptions,
    connector: Arc<dyn Connector>,
    state: SessionState,
    tls: TlsState,
    endpoint: Option<Endpoint>,
    capabilities: Option<Capabilities>,
    referral: Option<Referral>,
    client: Option<ClientHandle>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<SessionEvent>>,
}

impl Session {
    /// Session using plain TCP (and the SOCKS5 proxy from `options`, if any).
    pub fn new(options: ClientOptions) -> Self {
        Self::with_connector(options, Arc::new(TcpConnector))
    }

    pub fn with_connector(options: ClientOptions, connector: Arc<dyn Connector>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            options,
            connector,
            state: SessionState::Disconnected,
            tls: TlsState::None,
            endpoint: None,
            capabilities: None,
            referral: None,
            client: None,
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    /// The event receiver. Only the first call returns it; events span reconnects.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.events_rx.take()
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn state(&self) -> SessionState {
        match &self.client {
            Some(client) if !client.is_alive() && self.state != SessionState::Referred => SessionState::Disconnected,
            _ => self.state,
        }
    }

    pub fn tls_state(&self) -> TlsState {
        self.tls
    }

    pub fn is_secure(&self) -> bool {
        self.tls == TlsState::Active
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    /// Capabilities as last reported by the server.
    pub fn server_capabilities(&self) -> Option<&Capabilities> {
        self.capabilities.as_ref()
    }

    /// Target of the last REFERRAL received.
    pub fn referral(&self) -> Option<&Referral> {
        self.referral.as_ref()
    }

    /// Open the transport and wait for the server greeting. Nothing is sent before the
    /// greeting has been read.
    pub async fn connect(&mut self, endpoint: Endpoint) -> Result<Capabilities, SieveError> {
        if !matches!(self.state(), SessionState::Disconnected | SessionState::Referred) {
            return Err(SieveError::client("session is already connected"));
        }
        self.client = None;
        self.capabilities = None;
        self.referral = None;
        self.tls = TlsState::None;
        self.state = SessionState::Connecting;
        info!("connecting to {}", endpoint);

        let connecting = tokio::time::timeout(self.options.timeout, self.connector.connect(&endpoint));
        let transport = match connecting.await {
            Ok(Ok(transport)) => transport,
            Ok(Err(e)) => {
                self.state = SessionState::Disconnected;
                return Err(e);
            }
            Err(_) => {
                self.state = SessionState::Disconnected;
                return Err(SieveError::Timeout);
            }
        };
        if transport.is_secure() {
            self.tls = TlsState::Active;
        }
        let (client, greeting) = ClientHandle::spawn(
            transport,
            endpoint.host.clone(),
            self.options.timeout,
            self.options.keep_alive,
            self.events_tx.clone(),
        );
        self.client = Some(client);
        self.endpoint = Some(endpoint);

        let greeting = match self.settle(greeting.await).await {
            Ok(response) => response,
            Err(e) => {
                if self.state != SessionState::Referred {
                    self.disconnect().await;
                }
                return Err(e);
            }
        };
        let capabilities = match greeting {
            Response::Capabilities(capabilities) => capabilities,
            other => return Err(self.unexpected(other).await),
        };
        if capabilities.implementation().is_none() {
            warn!("server greeting has no IMPLEMENTATION capability");
        }
        debug!("connected, server capabilities: {:?}", capabilities);
        self.capabilities = Some(capabilities.clone());
        self.state = SessionState::Ready;
        Ok(capabilities)
    }

    /// STARTTLS, then the TLS handshake, then the capabilities seen over TLS.
    /// Capabilities seen before the upgrade are discarded.
    pub async fn start_tls(&mut self) -> Result<Capabilities, SieveError> {
        if self.state() != SessionState::Ready || self.tls != TlsState::None {
            return Err(SieveError::client("STARTTLS requires an established plaintext session"));
        }
        if !self.capabilities.as_ref().is_some_and(|c| c.starttls()) {
            return Err(SieveError::client("server does not support STARTTLS"));
        }
        self.state = SessionState::TlsNegotiating;
        self.tls = TlsState::Upgrading;
        let previous = self.capabilities.take();
        let result = self.submit(Command::StartTls).await;
        match self.settle(result).await {
            Ok(Response::Capabilities(capabilities)) => {
                info!("TLS established");
                self.tls = TlsState::Active;
                self.capabilities = Some(capabilities.clone());
                self.resume();
                Ok(capabilities)
            }
            Ok(other) => {
                self.tls = TlsState::None;
                Err(self.unexpected(other).await)
            }
            Err(e) => {
                // NO leaves the connection in plaintext
                self.tls = TlsState::None;
                if self.client.is_some() {
                    self.capabilities = previous;
                }
                self.resume();
                Err(e)
            }
        }
    }

    /// Authenticate with `mechanism`, or the strongest mechanism the server offers.
    /// A failure is returned as is; the session does not retry.
    pub async fn authenticate(
        &mut self,
        mechanism: Option<SaslMechanism>,
        credentials: Credentials,
    ) -> Result<(), SieveError> {
        if self.state() != SessionState::Ready {
            return Err(SieveError::client("AUTHENTICATE requires an established session"));
        }
        let offered = self.capabilities.as_ref().map(|c| c.sasl_mechanisms()).unwrap_or_default();
        let mechanism = match mechanism {
            Some(m) if offered.iter().any(|o| o.eq_ignore_ascii_case(m.name())) => m,
            Some(m) => return Err(SieveError::client(format!("SASL mechanism {} not supported by server", m))),
            None => SaslMechanism::select(&offered)
                .ok_or_else(|| SieveError::client("no supported SASL mechanism offered by server"))?,
        };
        if mechanism.requires_tls() && !self.is_secure() {
            warn!("{} over an unencrypted connection", mechanism);
        }
        let client = SaslClient::new(mechanism, credentials)?;
        debug!("authenticating with {}", mechanism);
        self.state = SessionState::Authenticating;
        let pending = self.enqueue(RequestKind::Authenticate(SaslExchange::new(client)));
        let result = self.settle(pending.await).await;
        self.resume();
        result.map(|_| ())
    }

    /// connect, then STARTTLS per [`TlsMode`], then authenticate per [`SaslPreference`].
    pub async fn establish(
        &mut self,
        endpoint: Endpoint,
        credentials: Option<Credentials>,
    ) -> Result<Capabilities, SieveError> {
        let mut capabilities = self.connect(endpoint).await?;
        if !self.is_secure() {
            match self.options.tls {
                TlsMode::Disabled => {}
                TlsMode::Opportunistic if !capabilities.starttls() => {
                    warn!("server does not offer STARTTLS, continuing without TLS");
                }
                TlsMode::Required if !capabilities.starttls() => {
                    self.disconnect().await;
                    return Err(SieveError::client("server does not offer STARTTLS"));
                }
                TlsMode::Opportunistic | TlsMode::Required => {
                    capabilities = self.start_tls().await?;
                }
            }
        }
        let mechanism = match self.options.sasl {
            SaslPreference::None => return Ok(capabilities),
            SaslPreference::Default => None,
            SaslPreference::Forced(mechanism) => Some(mechanism),
        };
        let credentials = match credentials {
            Some(c) => c,
            None => return Err(SieveError::client("credentials required")),
        };
        self.authenticate(mechanism, credentials).await?;
        Ok(capabilities)
    }

    /// Queue a command without waiting for it. Requests run in the order they were added.
    /// Results are not inspected by the session, so a referral or fatal error here only
    /// shows up in the state once the connection has ended.
    pub fn add_request(&self, command: Command) -> PendingResponse {
        self.enqueue(RequestKind::Command(command))
    }

    /// CAPABILITY. Updates the cached capabilities.
    pub async fn capabilities(&mut self) -> Result<Capabilities, SieveError> {
        match self.request(Command::Capability).await? {
            Response::Capabilities(capabilities) => {
                self.capabilities = Some(capabilities.clone());
                Ok(capabilities)
            }
            other => Err(self.unexpected(other).await),
        }
    }

    pub async fn list_scripts(&mut self) -> Result<Vec<ScriptInfo>, SieveError> {
        match self.request(Command::ListScripts).await? {
            Response::Scripts(scripts) => Ok(scripts),
            other => Err(self.unexpected(other).await),
        }
    }

    pub async fn get_script(&mut self, name: &str) -> Result<String, SieveError> {
        match self.request(Command::GetScript { name: name.to_string() }).await? {
            Response::Script(script) => Ok(script),
            other => Err(self.unexpected(other).await),
        }
    }

    pub async fn put_script(&mut self, name: &str, script: &str) -> Result<(), SieveError> {
        let command = Command::PutScript { name: name.to_string(), script: script.to_string() };
        self.request(command).await.map(|_| ())
    }

    /// Syntax check without storing. Servers without CHECKSCRIPT get the script uploaded
    /// under a scratch name that is deleted again.
    pub async fn check_script(&mut self, script: &str) -> Result<(), SieveError> {
        if self.supports(|c| c.can_check_script()) {
            return self.request(Command::CheckScript { script: script.to_string() }).await.map(|_| ());
        }
        if script.trim().is_empty() {
            return Ok(());
        }
        self.put_script(CHECK_SCRIPT_NAME, script).await?;
        self.delete_script(CHECK_SCRIPT_NAME).await
    }

    /// Make `name` the active script. An empty name deactivates all scripts.
    pub async fn set_active(&mut self, name: &str) -> Result<(), SieveError> {
        self.request(Command::SetActive { name: name.to_string() }).await.map(|_| ())
    }

    pub async fn delete_script(&mut self, name: &str) -> Result<(), SieveError> {
        self.request(Command::DeleteScript { name: name.to_string() }).await.map(|_| ())
    }

    /// RENAMESCRIPT, or on older servers: GETSCRIPT, PUTSCRIPT under the new name,
    /// SETACTIVE if the old script was active, DELETESCRIPT.
    pub async fn rename_script(&mut self, old_name: &str, new_name: &str) -> Result<(), SieveError> {
        if self.supports(|c| c.can_rename()) {
            let command = Command::RenameScript { old_name: old_name.to_string(), new_name: new_name.to_string() };
            return self.request(command).await.map(|_| ());
        }
        let active = self.list_scripts().await?.iter().any(|s| s.active && s.name == old_name);
        let script = self.get_script(old_name).await?;
        self.put_script(new_name, &script).await?;
        if active {
            self.set_active(new_name).await?;
        }
        self.delete_script(old_name).await
    }

    /// HAVESPACE: Ok if a script of `size` bytes named `name` would fit.
    pub async fn have_space(&mut self, name: &str, size: u64) -> Result<(), SieveError> {
        self.request(Command::HaveSpace { name: name.to_string(), size }).await.map(|_| ())
    }

    /// NOOP, or CAPABILITY on servers without NOOP.
    pub async fn noop(&mut self, tag: Option<&str>) -> Result<(), SieveError> {
        if self.supports(|c| c.can_noop()) {
            self.request(Command::Noop(tag.map(str::to_string))).await.map(|_| ())
        } else {
            self.capabilities().await.map(|_| ())
        }
    }

    /// LOGOUT, then close the connection. A session that is not connected is left as is.
    pub async fn logout(&mut self) -> Result<(), SieveError> {
        let client = match self.client.take() {
            Some(client) if client.is_alive() => client,
            _ => {
                self.mark_disconnected();
                return Ok(());
            }
        };
        self.state = SessionState::Disconnecting;
        let result = client.enqueue(RequestKind::Command(Command::Logout)).await;
        client.disconnect().await;
        self.mark_disconnected();
        info!("logged out");
        match result {
            Ok(_) | Err(SieveError::ConnectionClosed) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Close the connection and fail anything still queued. Safe to call in any state.
    pub async fn disconnect(&mut self) {
        if let Some(client) = self.client.take() {
            self.state = SessionState::Disconnecting;
            client.disconnect().await;
        }
        self.mark_disconnected();
    }

    fn mark_disconnected(&mut self) {
        self.state = SessionState::Disconnected;
        self.tls = TlsState::None;
    }

    fn supports(&self, check: impl Fn(&Capabilities) -> bool) -> bool {
        self.capabilities.as_ref().is_some_and(check)
    }

    fn resume(&mut self) {
        if self.client.as_ref().is_some_and(|c| c.is_alive()) {
            self.state = SessionState::Ready;
        }
    }

    fn enqueue(&self, kind: RequestKind) -> PendingResponse {
        match &self.client {
            Some(client) => client.enqueue(kind),
            None => PendingResponse::closed(),
        }
    }

    fn submit(&self, command: Command) -> PendingResponse {
        self.enqueue(RequestKind::Command(command))
    }

    /// Run one command on a ready session.
    async fn request(&mut self, command: Command) -> Result<Response, SieveError> {
        if self.state() != SessionState::Ready {
            return Err(SieveError::client(format!("{} requires an established session", command.name())));
        }
        let result = self.submit(command).await;
        self.settle(result).await
    }

    /// Apply the session-level consequences of a result: a referral moves to `Referred`,
    /// fatal errors close the connection.
    async fn settle(&mut self, result: Result<Response, SieveError>) -> Result<Response, SieveError> {
        let error = match result {
            Ok(response) => return Ok(response),
            Err(error) => error,
        };
        if let SieveError::Referral(referral) = &error {
            info!("referred to {}", referral);
            self.referral = Some(referral.clone());
            if let Some(client) = self.client.take() {
                client.disconnect().await;
            }
            self.state = SessionState::Referred;
            self.tls = TlsState::None;
        } else if error.is_fatal() {
            debug!("closing session after {}", error);
            self.disconnect().await;
        }
        Err(error)
    }

    async fn unexpected(&mut self, response: Response) -> SieveError {
        let error = SieveError::Protocol(format!("unexpected response {:?}", response));
        self.disconnect().await;
        error
    }
}
