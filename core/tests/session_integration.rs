/*
 * session_integration.rs
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

//! Session and autoconfig against a scripted in-memory server.
//! Run: cargo test -p tagliacarte_sieve --test session_integration

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tagliacarte_sieve::net::BoxFuture;
use tagliacarte_sieve::protocol::managesieve::Response;
use tagliacarte_sieve::{
    AccountConfig, AutoConfig, ClientOptions, Command, Connector, Credentials, DisconnectReason, Endpoint, SaslPreference,
    Session, SessionEvent, SessionRegistry, SessionState, SieveError, TlsMode, Transport,
};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream, ReadBuf};
use tokio::sync::{mpsc, oneshot, Notify};

const DOVECOT: &str = "\"IMPLEMENTATION\" \"Dovecot Pigeonhole\"\r\n\
\"SIEVE\" \"fileinto reject envelope vacation\"\r\n\
\"NOTIFY\" \"mailto\"\r\n\
\"SASL\" \"PLAIN LOGIN\"\r\n\
\"STARTTLS\"\r\n\
\"VERSION\" \"1.0\"\r\n\
OK \"Dovecot ready.\"\r\n";

const OLD_SERVER: &str = "\"IMPLEMENTATION\" \"Cyrus timsieved v2.2\"\r\n\"SASL\" \"PLAIN\"\r\nOK\r\n";

struct MemoryTransport {
    stream: DuplexStream,
    secure: bool,
    upgraded: Arc<Notify>,
}

impl AsyncRead for MemoryTransport {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for MemoryTransport {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

impl Transport for MemoryTransport {
    fn is_secure(&self) -> bool {
        self.secure
    }

    fn upgrade_tls(self: Box<Self>, _host: String) -> BoxFuture<'static, Result<Box<dyn Transport>, SieveError>> {
        let this = *self;
        Box::pin(async move {
            this.upgraded.notify_one();
            Ok(Box::new(MemoryTransport { stream: this.stream, secure: true, upgraded: this.upgraded })
                as Box<dyn Transport>)
        })
    }
}

/// Server end of one fake connection.
struct FakeServer {
    endpoint: Endpoint,
    stream: BufReader<DuplexStream>,
    upgraded: Arc<Notify>,
}

impl FakeServer {
    async fn line(&mut self) -> String {
        let mut line = String::new();
        self.stream.read_line(&mut line).await.unwrap();
        line
    }

    async fn expect(&mut self, line: &str) {
        assert_eq!(self.line().await, line);
    }

    async fn send(&mut self, data: &str) {
        self.stream.write_all(data.as_bytes()).await.unwrap();
    }

    /// Nothing more was sent by the client.
    async fn assert_quiet(&mut self) {
        let mut line = String::new();
        let read = tokio::time::timeout(Duration::from_millis(50), self.stream.read_line(&mut line)).await;
        assert!(read.is_err(), "unexpected client data: {:?}", line);
    }

    /// The client closed its end.
    async fn is_closed(&mut self) -> bool {
        let mut buf = [0u8; 64];
        loop {
            match tokio::time::timeout(Duration::from_secs(1), self.stream.read(&mut buf)).await {
                Ok(Ok(0)) => return true,
                Ok(Ok(_)) => continue,
                Ok(Err(_)) => return true,
                Err(_) => return false,
            }
        }
    }
}

struct FakeConnector {
    servers: mpsc::UnboundedSender<FakeServer>,
    refused: Vec<String>,
}

impl Connector for FakeConnector {
    fn connect(&self, endpoint: &Endpoint) -> BoxFuture<'static, Result<Box<dyn Transport>, SieveError>> {
        if self.refused.contains(&endpoint.host) {
            return Box::pin(async {
                Err(SieveError::Transport(io::Error::new(io::ErrorKind::ConnectionRefused, "refused")))
            });
        }
        let (client, server) = tokio::io::duplex(64 * 1024);
        let upgraded = Arc::new(Notify::new());
        let _ = self.servers.send(FakeServer {
            endpoint: endpoint.clone(),
            stream: BufReader::new(server),
            upgraded: Arc::clone(&upgraded),
        });
        Box::pin(async move {
            Ok(Box::new(MemoryTransport { stream: client, secure: false, upgraded }) as Box<dyn Transport>)
        })
    }
}

fn fake(refused: &[&str]) -> (Arc<FakeConnector>, mpsc::UnboundedReceiver<FakeServer>) {
    let (servers, rx) = mpsc::unbounded_channel();
    let refused = refused.iter().map(|s| s.to_string()).collect();
    (Arc::new(FakeConnector { servers, refused }), rx)
}

fn endpoint() -> Endpoint {
    Endpoint::new("sieve.example.com", 4190)
}

async fn connected(greeting: &str, options: ClientOptions) -> (Session, FakeServer) {
    let (connector, mut servers) = fake(&[]);
    let mut session = Session::with_connector(options, connector);
    let (capabilities, server) = tokio::join!(session.connect(endpoint()), async {
        let mut server = servers.recv().await.unwrap();
        server.send(greeting).await;
        server
    });
    capabilities.unwrap();
    (session, server)
}

#[tokio::test]
async fn requests_go_out_one_at_a_time_in_order() {
    let (session, mut server) = connected(DOVECOT, ClientOptions::default()).await;
    assert_eq!(session.state(), SessionState::Ready);

    let first = session.add_request(Command::ListScripts);
    let second = session.add_request(Command::GetScript { name: "main".into() });
    let third = session.add_request(Command::SetActive { name: "main".into() });

    server.expect("LISTSCRIPTS\r\n").await;
    server.assert_quiet().await;
    server.send("\"main\" ACTIVE\r\nOK\r\n").await;

    server.expect("GETSCRIPT \"main\"\r\n").await;
    server.assert_quiet().await;
    server.send("{5}\r\nkeep;\r\nOK\r\n").await;

    server.expect("SETACTIVE \"main\"\r\n").await;
    server.send("OK\r\n").await;

    assert!(matches!(first.await, Ok(Response::Scripts(s)) if s.len() == 1 && s[0].active));
    assert_eq!(second.await.unwrap(), Response::Script("keep;".to_string()));
    assert!(matches!(third.await, Ok(Response::Status(_))));
}

#[tokio::test]
async fn no_fails_only_its_request() {
    let (mut session, mut server) = connected(DOVECOT, ClientOptions::default()).await;
    let (result, _) = tokio::join!(session.delete_script("main"), async {
        server.expect("DELETESCRIPT \"main\"\r\n").await;
        server.send("NO (ACTIVE) \"You may not delete an active script\"\r\n").await;
    });
    let err = result.unwrap_err();
    assert!(!err.is_fatal());
    assert_eq!(session.state(), SessionState::Ready);

    let (result, _) = tokio::join!(session.have_space("main", 100), async {
        server.expect("HAVESPACE \"main\" 100\r\n").await;
        server.send("OK\r\n").await;
    });
    result.unwrap();
}

#[tokio::test]
async fn disconnect_is_idempotent() {
    let (mut session, mut server) = connected(DOVECOT, ClientOptions::default()).await;
    let mut events = session.take_events().unwrap();
    let pending = session.add_request(Command::ListScripts);
    server.expect("LISTSCRIPTS\r\n").await;

    session.disconnect().await;
    assert!(matches!(pending.await, Err(SieveError::ConnectionClosed)));
    assert_eq!(session.state(), SessionState::Disconnected);
    session.disconnect().await;
    assert_eq!(session.state(), SessionState::Disconnected);

    assert!(matches!(events.recv().await, Some(SessionEvent::Greeting(_))));
    assert_eq!(events.recv().await, Some(SessionEvent::Disconnected(DisconnectReason::Requested)));
    assert!(events.try_recv().is_err());
    assert!(server.is_closed().await);
    assert!(matches!(session.list_scripts().await, Err(SieveError::Client(_))));
}

#[tokio::test]
async fn bye_fails_queue() {
    let (mut session, mut server) = connected(DOVECOT, ClientOptions::default()).await;
    let first = session.add_request(Command::ListScripts);
    let second = session.add_request(Command::ListScripts);
    server.expect("LISTSCRIPTS\r\n").await;
    server.send("BYE \"Too many invalid commands\"\r\n").await;
    assert!(matches!(first.await, Err(SieveError::Bye { .. })));
    assert!(matches!(second.await, Err(SieveError::ConnectionLost(_))));
    assert_eq!(session.state(), SessionState::Disconnected);
    session.disconnect().await;
}

#[tokio::test]
async fn referral_is_reported_not_followed() {
    let (mut session, mut server) = connected(DOVECOT, ClientOptions::default()).await;
    let mut events = session.take_events().unwrap();
    let (result, _) = tokio::join!(
        session.authenticate(None, Credentials::new("user", "pencil")),
        async {
            server.expect("AUTHENTICATE \"PLAIN\" \"AHVzZXIAcGVuY2ls\"\r\n").await;
            server.send("NO (REFERRAL \"sieve://c3.mail.example.com:2000\") \"Try c3\"\r\n").await;
        }
    );
    match result {
        Err(SieveError::Referral(referral)) => {
            assert_eq!(referral.hostname(), "c3.mail.example.com");
            assert_eq!(referral.port(), Some(2000));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(session.state(), SessionState::Referred);
    assert_eq!(session.referral().map(|r| r.hostname()), Some("c3.mail.example.com"));
    assert!(server.is_closed().await);

    assert!(matches!(events.recv().await, Some(SessionEvent::Greeting(_))));
    assert!(matches!(events.recv().await, Some(SessionEvent::Referral(r)) if r.port() == Some(2000)));
}

#[tokio::test]
async fn starttls_replaces_capabilities() {
    let (mut session, mut server) = connected(DOVECOT, ClientOptions::default()).await;
    let (result, _) = tokio::join!(session.start_tls(), async {
        server.expect("STARTTLS\r\n").await;
        server.send("OK \"Begin TLS negotiation now.\"\r\n").await;
        server.upgraded.notified().await;
        server.send("\"IMPLEMENTATION\" \"Dovecot Pigeonhole\"\r\n\"SASL\" \"PLAIN\"\r\nOK\r\n").await;
        server.expect("CAPABILITY\r\n").await;
        server.send("\"IMPLEMENTATION\" \"Dovecot Pigeonhole\"\r\n\"SASL\" \"PLAIN SCRAM-SHA-1\"\r\nOK\r\n").await;
        server.expect("NOOP \"STARTTLS-SYNC\"\r\n").await;
        server.send("OK (TAG \"STARTTLS-SYNC\") \"Done\"\r\n").await;
    });
    let capabilities = result.unwrap();
    assert!(!capabilities.starttls());
    assert!(capabilities.supports_sasl("SCRAM-SHA-1"));
    assert!(session.is_secure());
    assert_eq!(session.server_capabilities(), Some(&capabilities));
    assert!(matches!(session.start_tls().await, Err(SieveError::Client(_))));
}

#[tokio::test]
async fn starttls_on_server_that_needs_capability() {
    let greeting = "\"IMPLEMENTATION\" \"Cyrus timsieved v2.2\"\r\n\"SASL\" \"PLAIN\"\r\n\"STARTTLS\"\r\nOK\r\n";
    let (mut session, mut server) = connected(greeting, ClientOptions::default()).await;
    let (result, _) = tokio::join!(session.start_tls(), async {
        server.expect("STARTTLS\r\n").await;
        server.send("OK\r\n").await;
        server.upgraded.notified().await;
        server.expect("CAPABILITY\r\n").await;
        server.send("\"IMPLEMENTATION\" \"Cyrus timsieved v2.2\"\r\n\"SASL\" \"PLAIN CRAM-MD5\"\r\nOK\r\n").await;
        server.expect("NOOP \"STARTTLS-SYNC\"\r\n").await;
        server.send("NO \"Unrecognized command\"\r\n").await;
    });
    let capabilities = result.unwrap();
    assert!(capabilities.supports_sasl("CRAM-MD5"));
    assert!(session.is_secure());
    assert_eq!(session.state(), SessionState::Ready);

    let (result, _) = tokio::join!(session.capabilities(), async {
        server.expect("CAPABILITY\r\n").await;
        server.send("\"IMPLEMENTATION\" \"Cyrus timsieved v2.2\"\r\nOK\r\n").await;
    });
    assert_eq!(result.unwrap().implementation(), Some("Cyrus timsieved v2.2"));
}

#[tokio::test]
async fn establish_with_plain() {
    let options = ClientOptions { tls: TlsMode::Disabled, ..ClientOptions::default() };
    let (connector, mut servers) = fake(&[]);
    let mut session = Session::with_connector(options, connector);
    let (result, mut server) = tokio::join!(
        session.establish(endpoint(), Some(Credentials::new("user", "pencil"))),
        async {
            let mut server = servers.recv().await.unwrap();
            server.send(DOVECOT).await;
            server.expect("AUTHENTICATE \"PLAIN\" \"AHVzZXIAcGVuY2ls\"\r\n").await;
            server.send("OK \"Logged in.\"\r\n").await;
            server
        }
    );
    assert_eq!(result.unwrap().implementation(), Some("Dovecot Pigeonhole"));
    assert_eq!(session.state(), SessionState::Ready);

    let (result, _) = tokio::join!(session.logout(), async {
        server.expect("LOGOUT\r\n").await;
        server.send("OK \"Logout completed.\"\r\n").await;
        assert!(server.is_closed().await);
    });
    result.unwrap();
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn establish_requires_starttls() {
    let options = ClientOptions { sasl: SaslPreference::None, ..ClientOptions::default() };
    let (connector, mut servers) = fake(&[]);
    let mut session = Session::with_connector(options, connector);
    let (result, _) = tokio::join!(session.establish(endpoint(), None), async {
        let mut server = servers.recv().await.unwrap();
        server.send(OLD_SERVER).await;
        server
    });
    assert!(matches!(result, Err(SieveError::Client(_))));
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn forced_mechanism_must_be_offered() {
    let (mut session, _server) = connected(DOVECOT, ClientOptions::default()).await;
    let result = session.authenticate(Some(tagliacarte_sieve::SaslMechanism::CramMd5), Credentials::new("u", "p")).await;
    assert!(matches!(result, Err(SieveError::Client(msg)) if msg.contains("CRAM-MD5")));
    assert_eq!(session.state(), SessionState::Ready);
}

#[tokio::test]
async fn rename_without_renamescript() {
    let (mut session, mut server) = connected(OLD_SERVER, ClientOptions::default()).await;
    let (result, _) = tokio::join!(session.rename_script("old", "new"), async {
        server.expect("LISTSCRIPTS\r\n").await;
        server.send("\"old\" ACTIVE\r\n\"other\"\r\nOK\r\n").await;
        server.expect("GETSCRIPT \"old\"\r\n").await;
        server.send("{5}\r\nkeep;\r\nOK\r\n").await;
        server.expect("PUTSCRIPT \"new\" {5+}\r\n").await;
        server.expect("keep;\r\n").await;
        server.send("OK\r\n").await;
        server.expect("SETACTIVE \"new\"\r\n").await;
        server.send("OK\r\n").await;
        server.expect("DELETESCRIPT \"old\"\r\n").await;
        server.send("OK\r\n").await;
    });
    result.unwrap();
}

#[tokio::test]
async fn check_without_checkscript() {
    let (mut session, mut server) = connected(OLD_SERVER, ClientOptions::default()).await;
    session.check_script("  \r\n").await.unwrap();
    let (result, _) = tokio::join!(session.check_script("keep;"), async {
        server.expect("PUTSCRIPT \"TMP_FILE_DELETE_ME\" {5+}\r\n").await;
        server.expect("keep;\r\n").await;
        server.send("OK\r\n").await;
        server.expect("DELETESCRIPT \"TMP_FILE_DELETE_ME\"\r\n").await;
        server.send("OK\r\n").await;
    });
    result.unwrap();

    let (result, _) = tokio::join!(session.noop(None), async {
        server.expect("CAPABILITY\r\n").await;
        server.send(OLD_SERVER).await;
    });
    result.unwrap();
}

#[tokio::test(start_paused = true)]
async fn timeout_fails_request_and_disconnects() {
    let (mut session, _server) = connected(DOVECOT, ClientOptions::default()).await;
    let mut events = session.take_events().unwrap();
    assert!(matches!(session.list_scripts().await, Err(SieveError::Timeout)));
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(matches!(events.recv().await, Some(SessionEvent::Greeting(_))));
    assert_eq!(events.recv().await, Some(SessionEvent::Timeout));
    assert_eq!(events.recv().await, Some(SessionEvent::Disconnected(DisconnectReason::Timeout)));
}

#[tokio::test]
async fn autoconfig_first_greeting_wins() {
    let (connector, mut servers) = fake(&[]);
    let mut autoconfig = AutoConfig::with_connector(connector);
    autoconfig.add_host("a.example.com", 4190, None);
    autoconfig.add_host("b.example.com", 4190, None);
    autoconfig.add_host("c.example.com", 2000, None);

    let (tx, rx) = oneshot::channel();
    autoconfig
        .run(move |result| {
            let _ = tx.send(result);
        })
        .unwrap();
    assert!(matches!(autoconfig.run(|_| {}), Err(SieveError::AlreadyRunning)));

    let mut losers = Vec::new();
    for _ in 0..3 {
        let mut server = servers.recv().await.unwrap();
        if server.endpoint.host == "b.example.com" {
            server.send(DOVECOT).await;
        }
        losers.push(server);
    }
    let success = rx.await.unwrap().unwrap();
    assert_eq!(success.endpoint.host, "b.example.com");
    assert_eq!(success.endpoint.port, 4190);
    assert!(success.capabilities.starttls());
    for server in losers.iter_mut() {
        assert!(server.is_closed().await, "{} left open", server.endpoint);
    }
}

#[tokio::test]
async fn autoconfig_fails_after_all_candidates() {
    let (connector, _servers) = fake(&["a.example.com", "b.example.com"]);
    let mut autoconfig = AutoConfig::with_connector(connector);
    autoconfig.add_host("a.example.com", 4190, None);
    autoconfig.add_host("b.example.com", 4190, None);
    let (tx, rx) = oneshot::channel();
    autoconfig
        .run(move |result| {
            let _ = tx.send(result);
        })
        .unwrap();
    assert!(matches!(rx.await.unwrap(), Err(SieveError::Transport(_))));
}

#[tokio::test]
async fn autoconfig_cancel_closes_probes() {
    let (connector, mut servers) = fake(&[]);
    let mut autoconfig = AutoConfig::with_connector(connector);
    autoconfig.add_host("a.example.com", 4190, None);
    let (tx, mut rx) = oneshot::channel();
    autoconfig
        .run(move |result| {
            let _ = tx.send(result);
        })
        .unwrap();
    let mut server = servers.recv().await.unwrap();
    autoconfig.cancel();
    assert!(server.is_closed().await);
    assert!(rx.try_recv().is_err());
    assert!(!autoconfig.is_running());
}

#[tokio::test]
async fn registry_replaces_and_closes_sessions() {
    let (connector, mut servers) = fake(&[]);
    let mut registry = SessionRegistry::with_connector(connector);
    let mut account = AccountConfig::new("work", "sieve.example.com", "user");
    account.options.tls = TlsMode::Disabled;
    account.options.sasl = SaslPreference::None;

    let (opened, mut first) = tokio::join!(registry.open(&account, None), async {
        let mut server = servers.recv().await.unwrap();
        server.send(DOVECOT).await;
        server
    });
    assert_eq!(opened.unwrap().state(), SessionState::Ready);
    assert_eq!(registry.ids(), vec!["work".to_string()]);

    let (opened, mut second) = tokio::join!(registry.open(&account, None), async {
        let mut server = servers.recv().await.unwrap();
        server.send(OLD_SERVER).await;
        server
    });
    opened.unwrap();
    assert!(first.is_closed().await);
    assert_eq!(registry.len(), 1);
    assert_eq!(
        registry.get("work").and_then(|s| s.server_capabilities()).and_then(|c| c.implementation()),
        Some("Cyrus timsieved v2.2")
    );

    registry.close_all().await;
    assert!(registry.is_empty());
    assert!(second.is_closed().await);
}
