/*
 * client.rs
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

//! Connection task: one tokio task per connection owns the transport, the receive buffer,
//! the request queue and the watchdog. Callers talk to it through [`ClientHandle`].
//!
//! The head of the queue is the only request ever written to the socket; the next one is
//! rendered only after the head's response has been fully consumed.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use super::codec::{ParseError, Parser};
use super::request::{Command, Request, RequestKind, Step, TlsResync};
use super::response::{parse_status, Response, Status};
use super::session::SessionEvent;
use super::watchdog::{WatchDog, WatchDogEvent};
use crate::error::SieveError;
use crate::net::Transport;

/// Why a connection task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect()` was called, or every handle was dropped.
    Requested,
    /// LOGOUT completed.
    Logout,
    /// The server closed the socket.
    ClosedByServer,
    ServerBye(String),
    Transport(String),
    Protocol(String),
    Timeout,
    Certificate(String),
}

impl DisconnectReason {
    /// Error given to requests still queued when the connection ends.
    fn pending_error(&self) -> SieveError {
        match self {
            DisconnectReason::Requested | DisconnectReason::Logout => SieveError::ConnectionClosed,
            other => SieveError::ConnectionLost(other.to_string()),
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Requested => write!(f, "disconnected"),
            DisconnectReason::Logout => write!(f, "logged out"),
            DisconnectReason::ClosedByServer => write!(f, "connection closed by server"),
            DisconnectReason::ServerBye(msg) => write!(f, "{}", msg),
            DisconnectReason::Transport(msg) => write!(f, "transport error: {}", msg),
            DisconnectReason::Protocol(msg) => write!(f, "protocol error: {}", msg),
            DisconnectReason::Timeout => write!(f, "request timed out"),
            DisconnectReason::Certificate(msg) => write!(f, "certificate rejected: {}", msg),
        }
    }
}

pub(crate) enum ClientCommand {
    Enqueue(Request),
    /// Close the connection; the sender fires once the task has shut down.
    Disconnect(oneshot::Sender<()>),
}

/// Result of a queued request. Resolves exactly once; a dropped connection task
/// resolves it with [`SieveError::ConnectionClosed`].
pub struct PendingResponse {
    rx: oneshot::Receiver<Result<Response, SieveError>>,
}

impl PendingResponse {
    /// Already failed: there is no connection to queue on.
    pub(crate) fn closed() -> Self {
        let (_, rx) = oneshot::channel();
        Self { rx }
    }
}

impl Future for PendingResponse {
    type Output = Result<Response, SieveError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(SieveError::ConnectionClosed)))
    }
}

/// Handle to the connection task. Cheaply cloneable (just the channel sender).
#[derive(Clone)]
pub(crate) struct ClientHandle {
    command_tx: mpsc::UnboundedSender<ClientCommand>,
}

impl ClientHandle {
    /// Start the task on a freshly connected transport. The returned response is the
    /// server greeting, which is queued before anything the caller adds.
    pub fn spawn(
        transport: Box<dyn Transport>,
        host: String,
        timeout: Duration,
        keep_alive: Option<Duration>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> (Self, PendingResponse) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (reply, rx) = oneshot::channel();
        let mut queue = VecDeque::new();
        queue.push_back(Request::new(RequestKind::Greeting, Some(reply)));
        let task = ClientTask {
            transport: Some(transport),
            host,
            buffer: BytesMut::with_capacity(4096),
            queue,
            commands: command_rx,
            events,
            watchdog: WatchDog::new(timeout, keep_alive),
            can_noop: false,
            disconnect_acks: Vec::new(),
        };
        tokio::spawn(task.run());
        (Self { command_tx }, PendingResponse { rx })
    }

    pub fn enqueue(&self, kind: RequestKind) -> PendingResponse {
        let (reply, rx) = oneshot::channel();
        // If the task is gone the request is dropped with its reply sender, which resolves
        // the receiver as closed.
        let _ = self.command_tx.send(ClientCommand::Enqueue(Request::new(kind, Some(reply))));
        PendingResponse { rx }
    }

    pub fn is_alive(&self) -> bool {
        !self.command_tx.is_closed()
    }

    /// Close the connection and wait for the task to finish. Returns at once if it already has.
    pub async fn disconnect(&self) {
        let (done, wait) = oneshot::channel();
        if self.command_tx.send(ClientCommand::Disconnect(done)).is_ok() {
            let _ = wait.await;
        }
    }
}

enum Wake {
    Command(Option<ClientCommand>),
    Read(io::Result<usize>),
    Timer(WatchDogEvent),
}

struct ClientTask {
    transport: Option<Box<dyn Transport>>,
    host: String,
    buffer: BytesMut,
    queue: VecDeque<Request>,
    commands: mpsc::UnboundedReceiver<ClientCommand>,
    events: mpsc::UnboundedSender<SessionEvent>,
    watchdog: WatchDog,
    can_noop: bool,
    disconnect_acks: Vec<oneshot::Sender<()>>,
}

impl ClientTask {
    async fn run(mut self) {
        let reason = self.serve().await;
        self.shutdown(reason).await;
    }

    async fn serve(&mut self) -> DisconnectReason {
        loop {
            if let Err(reason) = self.transmit_head().await {
                return reason;
            }
            let transport = match self.transport.as_mut() {
                Some(t) => t,
                None => return DisconnectReason::ClosedByServer,
            };
            let wake = tokio::select! {
                command = self.commands.recv() => Wake::Command(command),
                read = transport.read_buf(&mut self.buffer) => Wake::Read(read),
                event = self.watchdog.wait() => Wake::Timer(event),
            };
            let outcome = match wake {
                Wake::Command(None) => Err(DisconnectReason::Requested),
                Wake::Command(Some(ClientCommand::Enqueue(request))) => {
                    trace!("queued {} ({} pending)", request.describe(), self.queue.len());
                    self.queue.push_back(request);
                    Ok(())
                }
                Wake::Command(Some(ClientCommand::Disconnect(done))) => {
                    self.disconnect_acks.push(done);
                    Err(DisconnectReason::Requested)
                }
                Wake::Read(Ok(0)) => Err(DisconnectReason::ClosedByServer),
                Wake::Read(Ok(n)) => {
                    trace!("S: {} bytes", n);
                    self.process_buffer().await
                }
                Wake::Read(Err(e)) => Err(DisconnectReason::Transport(e.to_string())),
                Wake::Timer(WatchDogEvent::Timeout) => {
                    warn!("request to {} timed out", self.host);
                    if let Some(request) = self.queue.pop_front() {
                        request.complete(Err(SieveError::Timeout));
                    }
                    self.emit(SessionEvent::Timeout);
                    Err(DisconnectReason::Timeout)
                }
                Wake::Timer(WatchDogEvent::Idle) => {
                    self.keep_alive();
                    Ok(())
                }
            };
            if let Err(reason) = outcome {
                return reason;
            }
        }
    }

    /// Write the head request if it is not already on the wire.
    async fn transmit_head(&mut self) -> Result<(), DisconnectReason> {
        let head = match self.queue.front_mut() {
            Some(head) if !head.is_in_flight() => head,
            _ => return Ok(()),
        };
        let wire = head.render();
        self.watchdog.on_start();
        let bytes = match wire {
            Some(bytes) => bytes,
            None => return Ok(()),
        };
        trace!("C: {}", head.describe());
        let transport = self.transport.as_mut().ok_or(DisconnectReason::ClosedByServer)?;
        transport
            .write_all(&bytes)
            .await
            .map_err(|e| DisconnectReason::Transport(e.to_string()))?;
        transport.flush().await.map_err(|e| DisconnectReason::Transport(e.to_string()))
    }

    /// Hand buffered bytes to the head request until the buffer holds only a partial response.
    async fn process_buffer(&mut self) -> Result<(), DisconnectReason> {
        while !self.buffer.is_empty() {
            let head = match self.queue.front_mut() {
                Some(head) if head.is_in_flight() => head,
                _ => return self.unsolicited(),
            };
            let mut parser = Parser::new(&self.buffer[..]);
            let step = match head.on_response(&mut parser) {
                Ok(step) => step,
                Err(ParseError::Incomplete) => return Ok(()),
                Err(ParseError::Malformed(msg)) => {
                    warn!("malformed response from {}: {}", self.host, msg);
                    if let Some(request) = self.queue.pop_front() {
                        request.complete(Err(SieveError::Protocol(msg.clone())));
                    }
                    return Err(DisconnectReason::Protocol(msg));
                }
            };
            let consumed = parser.position();
            self.buffer.advance(consumed);
            match step {
                Step::Continue => self.transmit_head().await?,
                Step::Complete(result) => {
                    self.watchdog.on_stop();
                    if let Some(request) = self.queue.pop_front() {
                        self.complete(request, result).await?;
                    }
                }
                Step::Closed(error) => {
                    self.note_error(&error);
                    let reason = DisconnectReason::ServerBye(error.to_string());
                    if let Some(request) = self.queue.pop_front() {
                        request.complete(Err(error));
                    }
                    return Err(reason);
                }
            }
        }
        Ok(())
    }

    /// Data with nothing in flight. Only a BYE is acceptable (server-side idle timeout).
    fn unsolicited(&mut self) -> Result<(), DisconnectReason> {
        let mut parser = Parser::new(&self.buffer[..]);
        match parse_status(&mut parser) {
            Err(ParseError::Incomplete) => Ok(()),
            Ok(status) if status.status == Status::Bye => {
                let error = status.into_error();
                self.note_error(&error);
                Err(DisconnectReason::ServerBye(error.to_string()))
            }
            Ok(_) | Err(ParseError::Malformed(_)) => {
                Err(DisconnectReason::Protocol("unsolicited data from server".to_string()))
            }
        }
    }

    async fn complete(&mut self, request: Request, result: Result<Response, SieveError>) -> Result<(), DisconnectReason> {
        match &result {
            Ok(Response::Capabilities(capabilities)) => {
                self.can_noop = capabilities.can_noop();
                let event = match request.kind() {
                    RequestKind::Greeting => SessionEvent::Greeting(capabilities.clone()),
                    _ => SessionEvent::CapabilitiesChanged(capabilities.clone()),
                };
                self.emit(event);
            }
            Err(error) => self.note_error(error),
            Ok(_) => {}
        }
        let starttls = result.is_ok() && matches!(request.kind(), RequestKind::Command(Command::StartTls));
        let logout = result.is_ok() && matches!(request.kind(), RequestKind::Command(Command::Logout));
        if starttls {
            return self.upgrade(request).await;
        }
        request.complete(result);
        if logout {
            return Err(DisconnectReason::Logout);
        }
        Ok(())
    }

    /// STARTTLS was accepted: handshake, then resync capabilities. The STARTTLS caller
    /// receives the capabilities seen over TLS.
    async fn upgrade(&mut self, request: Request) -> Result<(), DisconnectReason> {
        if !self.buffer.is_empty() {
            let msg = "data received before TLS handshake".to_string();
            request.complete(Err(SieveError::Protocol(msg.clone())));
            return Err(DisconnectReason::Protocol(msg));
        }
        let transport = match self.transport.take() {
            Some(t) => t,
            None => {
                request.complete(Err(SieveError::ConnectionClosed));
                return Err(DisconnectReason::ClosedByServer);
            }
        };
        debug!("starting TLS with {}", self.host);
        let handshake = tokio::time::timeout(self.watchdog.timeout(), transport.upgrade_tls(self.host.clone()));
        let result = match handshake.await {
            Ok(result) => result,
            Err(_) => Err(SieveError::Timeout),
        };
        match result {
            Ok(secure) => {
                self.transport = Some(secure);
                let reply = request.into_reply();
                self.queue.push_front(Request::new(RequestKind::TlsResync(TlsResync::new()), reply));
                Ok(())
            }
            Err(error) => {
                let reason = match &error {
                    SieveError::Certificate { reason, .. } => DisconnectReason::Certificate(reason.clone()),
                    SieveError::Timeout => DisconnectReason::Timeout,
                    other => DisconnectReason::Transport(other.to_string()),
                };
                request.complete(Err(error));
                Err(reason)
            }
        }
    }

    fn keep_alive(&mut self) {
        if !self.queue.is_empty() {
            return;
        }
        let command = if self.can_noop { Command::Noop(None) } else { Command::Capability };
        debug!("connection to {} idle, sending {}", self.host, command.name());
        self.queue.push_back(Request::new(RequestKind::Command(command), None));
        self.emit(SessionEvent::Idle);
    }

    fn note_error(&self, error: &SieveError) {
        if let SieveError::Referral(referral) = error {
            info!("{} refers client to {}", self.host, referral);
            self.emit(SessionEvent::Referral(referral.clone()));
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    async fn shutdown(mut self, reason: DisconnectReason) {
        self.watchdog.cancel();
        self.commands.close();
        if let Some(mut transport) = self.transport.take() {
            let _ = tokio::time::timeout(self.watchdog.timeout(), transport.shutdown()).await;
        }
        info!("connection to {} ended: {}", self.host, reason);
        for request in self.queue.drain(..) {
            request.complete(Err(reason.pending_error()));
        }
        while let Ok(command) = self.commands.try_recv() {
            match command {
                ClientCommand::Enqueue(request) => request.complete(Err(reason.pending_error())),
                ClientCommand::Disconnect(done) => self.disconnect_acks.push(done),
            }
        }
        self.emit(SessionEvent::Disconnected(reason));
        for done in self.disconnect_acks.drain(..) {
            let _ = done.send(());
        }
    }
}
