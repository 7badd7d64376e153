/*
 * request.rs
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

//! Requests: what goes on the wire for each command and how its response is read.
//!
//! A [`Request`] is rendered when it reaches the head of the queue, then fed the receive
//! buffer until it reports a [`Step`]. Most commands take exactly one round trip;
//! AUTHENTICATE loops through [`Step::Continue`] once per SASL challenge, and so does the
//! capability resync after STARTTLS. The reply
//! channel is consumed on completion, so each request resolves exactly once.

use tokio::sync::oneshot;

use super::codec::{decode_base64, normalize_line_endings, ParseResult, Parser, RequestBuilder};
use super::response::{
    parse_capabilities, parse_sasl_step, parse_script, parse_script_list, parse_status, Capabilities, Response,
    SaslStep, Status, StatusResponse,
};
use crate::error::SieveError;
use crate::sasl::{SaslClient, SaslError};

/// ManageSieve commands other than AUTHENTICATE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Capability,
    StartTls,
    Logout,
    /// NOOP with optional tag echoed back in a TAG response code.
    Noop(Option<String>),
    HaveSpace { name: String, size: u64 },
    PutScript { name: String, script: String },
    CheckScript { script: String },
    ListScripts,
    /// An empty name deactivates all scripts.
    SetActive { name: String },
    GetScript { name: String },
    DeleteScript { name: String },
    RenameScript { old_name: String, new_name: String },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Capability => "CAPABILITY",
            Command::StartTls => "STARTTLS",
            Command::Logout => "LOGOUT",
            Command::Noop(_) => "NOOP",
            Command::HaveSpace { .. } => "HAVESPACE",
            Command::PutScript { .. } => "PUTSCRIPT",
            Command::CheckScript { .. } => "CHECKSCRIPT",
            Command::ListScripts => "LISTSCRIPTS",
            Command::SetActive { .. } => "SETACTIVE",
            Command::GetScript { .. } => "GETSCRIPT",
            Command::DeleteScript { .. } => "DELETESCRIPT",
            Command::RenameScript { .. } => "RENAMESCRIPT",
        }
    }

    pub fn render(&self) -> Vec<u8> {
        let b = RequestBuilder::new(self.name());
        match self {
            Command::Capability | Command::StartTls | Command::Logout | Command::ListScripts => b,
            Command::Noop(None) => b,
            Command::Noop(Some(tag)) => b.string(tag),
            Command::HaveSpace { name, size } => b.string(name).number(*size),
            Command::PutScript { name, script } => b.string(name).literal(&normalize_line_endings(script)),
            Command::CheckScript { script } => b.literal(&normalize_line_endings(script)),
            Command::SetActive { name } | Command::GetScript { name } | Command::DeleteScript { name } => {
                b.string(name)
            }
            Command::RenameScript { old_name, new_name } => b.string(old_name).string(new_name),
        }
        .build()
    }

    fn on_response(&self, p: &mut Parser<'_>) -> ParseResult<Step> {
        Ok(match self {
            Command::Capability => {
                let (capabilities, status) = parse_capabilities(p)?;
                finish(status, |_| Response::Capabilities(capabilities))
            }
            Command::ListScripts => {
                let (scripts, status) = parse_script_list(p)?;
                finish(status, |_| Response::Scripts(scripts))
            }
            Command::GetScript { .. } => match parse_script(p)? {
                (Some(script), status) => finish(status, |_| Response::Script(script)),
                (None, status) if status.is_ok() => {
                    Step::Complete(Err(SieveError::Protocol("GETSCRIPT succeeded without a script".to_string())))
                }
                (None, status) => finish(status, Response::Status),
            },
            Command::Logout => {
                let status = parse_status(p)?;
                match status.status {
                    Status::Ok | Status::Bye => Step::Complete(Ok(Response::Status(status))),
                    Status::No => Step::Complete(Err(status.into_error())),
                }
            }
            _ => finish(parse_status(p)?, Response::Status),
        })
    }
}

/// Outcome of feeding a response to the in-flight request.
#[derive(Debug)]
pub(crate) enum Step {
    Complete(Result<Response, SieveError>),
    /// BYE: the request fails with this error and the connection ends.
    Closed(SieveError),
    /// More round trips follow (SASL, resync); render again.
    Continue,
}

fn finish(status: StatusResponse, ok: impl FnOnce(StatusResponse) -> Response) -> Step {
    match status.status {
        Status::Ok => Step::Complete(Ok(ok(status))),
        Status::No => Step::Complete(Err(status.into_error())),
        Status::Bye => Step::Closed(status.into_error()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SaslStage {
    Start,
    Waiting,
    Respond,
}

/// AUTHENTICATE driven by a [`SaslClient`]. Every client message after the command line is
/// a quoted base64 string; a local mechanism failure cancels with `"*"` and the request
/// then fails with that error instead of the server's NO.
#[derive(Debug)]
pub struct SaslExchange {
    client: SaslClient,
    stage: SaslStage,
    challenge: Option<Result<Vec<u8>, SaslError>>,
    failure: Option<SaslError>,
}

impl SaslExchange {
    pub fn new(client: SaslClient) -> Self {
        Self { client, stage: SaslStage::Start, challenge: None, failure: None }
    }

    fn render(&mut self) -> Vec<u8> {
        match self.stage {
            SaslStage::Start => {
                self.stage = SaslStage::Waiting;
                let b = RequestBuilder::new("AUTHENTICATE").quoted(self.client.mechanism().name());
                match self.client.initial_response() {
                    Some(initial) => b.base64(&initial).build(),
                    None => b.build(),
                }
            }
            SaslStage::Waiting | SaslStage::Respond => {
                self.stage = SaslStage::Waiting;
                let answer = match self.challenge.take() {
                    Some(Ok(challenge)) => self.client.respond(&challenge),
                    Some(Err(e)) => Err(e),
                    None => Err(SaslError::invalid("no challenge to answer")),
                };
                match answer {
                    Ok(bytes) => RequestBuilder::default().base64(&bytes).build(),
                    Err(e) => {
                        self.failure = Some(e);
                        RequestBuilder::default().quoted("*").build()
                    }
                }
            }
        }
    }

    fn on_response(&mut self, p: &mut Parser<'_>) -> ParseResult<Step> {
        let status = match parse_sasl_step(p)? {
            SaslStep::Challenge(encoded) => {
                self.challenge =
                    Some(decode_base64(&encoded).map_err(|_| SaslError::invalid("invalid base64 in SASL challenge")));
                self.stage = SaslStage::Respond;
                return Ok(Step::Continue);
            }
            SaslStep::Done(status) => status,
        };
        Ok(match status.status {
            Status::Ok => {
                let additional = match status.code.as_ref().and_then(|c| c.sasl_payload()) {
                    Some(encoded) => match decode_base64(encoded) {
                        Ok(data) => Some(data),
                        Err(_) => {
                            return Ok(Step::Complete(Err(SaslError::invalid("invalid base64 in SASL code").into())));
                        }
                    },
                    None => None,
                };
                match self.client.verify_success(additional.as_deref()) {
                    Ok(()) => Step::Complete(Ok(Response::Status(status))),
                    Err(e) => Step::Complete(Err(e.into())),
                }
            }
            Status::No => match self.failure.take() {
                Some(e) => Step::Complete(Err(e.into())),
                None => Step::Complete(Err(status.into_error())),
            },
            Status::Bye => Step::Closed(status.into_error()),
        })
    }
}

/// Tag of the NOOP that ends the capability resync.
pub(crate) const TLS_SYNC_TAG: &str = "STARTTLS-SYNC";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResyncStage {
    Capability,
    Listing,
    Sync,
    Draining,
}

/// Capabilities after the TLS handshake. Servers should re-issue them unasked, but old
/// Cyrus only answers an explicit CAPABILITY, so one or two listings may arrive. An explicit
/// CAPABILITY is sent, then a tagged NOOP; its answer (OK, or NO from servers without NOOP)
/// follows every listing still due, and the last listing seen wins.
#[derive(Debug)]
pub(crate) struct TlsResync {
    stage: ResyncStage,
    capabilities: Option<Capabilities>,
}

impl TlsResync {
    pub fn new() -> Self {
        Self { stage: ResyncStage::Capability, capabilities: None }
    }

    fn render(&mut self) -> Option<Vec<u8>> {
        match self.stage {
            ResyncStage::Capability => {
                self.stage = ResyncStage::Listing;
                Some(Command::Capability.render())
            }
            ResyncStage::Sync => {
                self.stage = ResyncStage::Draining;
                Some(Command::Noop(Some(TLS_SYNC_TAG.to_string())).render())
            }
            ResyncStage::Listing | ResyncStage::Draining => None,
        }
    }

    fn on_response(&mut self, p: &mut Parser<'_>) -> ParseResult<Step> {
        let (capabilities, status) = parse_capabilities(p)?;
        if status.status == Status::Bye {
            return Ok(Step::Closed(status.into_error()));
        }
        if self.stage == ResyncStage::Listing {
            if !status.is_ok() {
                return Ok(Step::Complete(Err(status.into_error())));
            }
            self.capabilities = Some(capabilities);
            self.stage = ResyncStage::Sync;
            return Ok(Step::Continue);
        }
        if !capabilities.is_empty() && status.is_ok() {
            self.capabilities = Some(capabilities);
            return Ok(Step::Continue);
        }
        let capabilities = self.capabilities.take().unwrap_or_default();
        Ok(Step::Complete(Ok(Response::Capabilities(capabilities))))
    }
}

pub(crate) enum RequestKind {
    /// The server speaks first: capability listing after connect.
    Greeting,
    /// Capability listing after STARTTLS.
    TlsResync(TlsResync),
    Command(Command),
    Authenticate(SaslExchange),
}

pub(crate) type Reply = oneshot::Sender<Result<Response, SieveError>>;

/// A queued request and the channel its result goes to.
pub(crate) struct Request {
    kind: RequestKind,
    reply: Option<Reply>,
    in_flight: bool,
}

impl Request {
    pub fn new(kind: RequestKind, reply: Option<Reply>) -> Self {
        Self { kind, reply, in_flight: false }
    }

    /// Wire form of the next client message. `None` for the greeting, which only listens.
    pub fn render(&mut self) -> Option<Vec<u8>> {
        self.in_flight = true;
        match &mut self.kind {
            RequestKind::Greeting => None,
            RequestKind::TlsResync(resync) => resync.render(),
            RequestKind::Command(command) => Some(command.render()),
            RequestKind::Authenticate(exchange) => Some(exchange.render()),
        }
    }

    pub fn on_response(&mut self, p: &mut Parser<'_>) -> ParseResult<Step> {
        let step = match &mut self.kind {
            RequestKind::Greeting => {
                let (capabilities, status) = parse_capabilities(p)?;
                finish(status, |_| Response::Capabilities(capabilities))
            }
            RequestKind::TlsResync(resync) => resync.on_response(p)?,
            RequestKind::Command(command) => command.on_response(p)?,
            RequestKind::Authenticate(exchange) => exchange.on_response(p)?,
        };
        if matches!(step, Step::Continue) {
            self.in_flight = false;
        }
        Ok(step)
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn kind(&self) -> &RequestKind {
        &self.kind
    }

    /// Log line for the request without secrets.
    pub fn describe(&self) -> String {
        match &self.kind {
            RequestKind::Greeting => "greeting".to_string(),
            RequestKind::TlsResync(_) => "CAPABILITY after STARTTLS".to_string(),
            RequestKind::Command(command) => command.name().to_string(),
            RequestKind::Authenticate(exchange) => {
                format!("AUTHENTICATE \"{}\" ***", exchange.client.mechanism().name())
            }
        }
    }

    pub fn into_reply(mut self) -> Option<Reply> {
        self.reply.take()
    }

    /// Deliver the result. Consumes the request.
    pub fn complete(mut self, result: Result<Response, SieveError>) {
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::managesieve::response_code::ResponseCode;
    use crate::sasl::{Credentials, SaslMechanism, ScramClient, ScramHash};

    fn feed(request: &mut Request, data: &[u8]) -> Step {
        let mut p = Parser::new(data);
        let step = request.on_response(&mut p).unwrap();
        assert!(p.is_empty(), "response not fully consumed");
        step
    }

    fn auth(client: SaslClient) -> Request {
        Request::new(RequestKind::Authenticate(SaslExchange::new(client)), None)
    }

    fn render(request: &mut Request) -> String {
        String::from_utf8(request.render().unwrap()).unwrap()
    }

    #[test]
    fn command_wire_forms() {
        assert_eq!(Command::Capability.render(), b"CAPABILITY\r\n".to_vec());
        assert_eq!(Command::Noop(Some("STARTTLS-SYNC-42".into())).render(), b"NOOP \"STARTTLS-SYNC-42\"\r\n".to_vec());
        assert_eq!(
            Command::HaveSpace { name: "myscript".into(), size: 999999 }.render(),
            b"HAVESPACE \"myscript\" 999999\r\n".to_vec()
        );
        assert_eq!(
            Command::PutScript { name: "foo".into(), script: "keep;\nstop;".into() }.render(),
            b"PUTSCRIPT \"foo\" {12+}\r\nkeep;\r\nstop;\r\n".to_vec()
        );
        assert_eq!(Command::SetActive { name: String::new() }.render(), b"SETACTIVE \"\"\r\n".to_vec());
        assert_eq!(
            Command::RenameScript { old_name: "a".into(), new_name: "b".into() }.render(),
            b"RENAMESCRIPT \"a\" \"b\"\r\n".to_vec()
        );
    }

    #[test]
    fn no_is_local_bye_is_fatal() {
        let mut r = Request::new(RequestKind::Command(Command::DeleteScript { name: "x".into() }), None);
        r.render();
        match feed(&mut r, b"NO (ACTIVE) \"You may not delete an active script\"\r\n") {
            Step::Complete(Err(SieveError::Server { code, .. })) => assert_eq!(code, Some(ResponseCode::Active)),
            other => panic!("unexpected {:?}", other),
        }
        let mut r = Request::new(RequestKind::Command(Command::ListScripts), None);
        r.render();
        assert!(matches!(feed(&mut r, b"BYE \"Too many errors\"\r\n"), Step::Closed(SieveError::Bye { .. })));
    }

    #[test]
    fn logout_accepts_ok_and_bye() {
        let mut r = Request::new(RequestKind::Command(Command::Logout), None);
        r.render();
        assert!(matches!(feed(&mut r, b"BYE\r\n"), Step::Complete(Ok(_))));
    }

    #[test]
    fn incomplete_leaves_request_untouched() {
        let mut r = Request::new(RequestKind::Command(Command::ListScripts), None);
        r.render();
        let mut p = Parser::new(b"\"a\" ACTIVE\r\n\"b\"");
        assert!(r.on_response(&mut p).is_err());
        assert!(r.is_in_flight());
        assert!(matches!(feed(&mut r, b"\"a\" ACTIVE\r\n\"b\"\r\nOK\r\n"), Step::Complete(Ok(Response::Scripts(s))) if s.len() == 2));
    }

    #[test]
    fn plain_wire() {
        let client = SaslClient::new(SaslMechanism::Plain, Credentials::new("user", "pencil")).unwrap();
        let mut r = auth(client);
        assert_eq!(render(&mut r), "AUTHENTICATE \"PLAIN\" \"AHVzZXIAcGVuY2ls\"\r\n");
        assert!(matches!(feed(&mut r, b"OK\r\n"), Step::Complete(Ok(_))));

        let client = SaslClient::new(SaslMechanism::Plain, Credentials::new("user2", "abc§123")).unwrap();
        let mut r = auth(client);
        assert_eq!(render(&mut r), "AUTHENTICATE \"PLAIN\" \"AHVzZXIyAGFiY8KnMTIz\"\r\n");
    }

    #[test]
    fn external_wire() {
        let client = SaslClient::new(SaslMechanism::External, Credentials::default()).unwrap();
        let mut r = auth(client);
        assert_eq!(render(&mut r), "AUTHENTICATE \"EXTERNAL\" \"\"\r\n");
    }

    #[test]
    fn login_wire() {
        let client = SaslClient::new(SaslMechanism::Login, Credentials::new("blubb", "bla")).unwrap();
        let mut r = auth(client);
        assert_eq!(render(&mut r), "AUTHENTICATE \"LOGIN\"\r\n");
        assert!(matches!(feed(&mut r, b"\"VXNlcm5hbWU6\"\r\n"), Step::Continue));
        assert!(!r.is_in_flight());
        assert_eq!(render(&mut r), "\"Ymx1YmI=\"\r\n");
        assert!(matches!(feed(&mut r, b"\"UGFzc3dvcmQ6\"\r\n"), Step::Continue));
        assert_eq!(render(&mut r), "\"Ymxh\"\r\n");
        assert!(matches!(feed(&mut r, b"OK\r\n"), Step::Complete(Ok(_))));
    }

    fn scram_sha1() -> Request {
        let scram = ScramClient::with_nonce(ScramHash::Sha1, "user", "pencil", None, "fyko+d2lbbFgONRv9qkxdawL");
        auth(SaslClient::Scram(scram))
    }

    const SHA1_SERVER_FIRST: &[u8] =
        b"\"cj1meWtvK2QybGJiRmdPTlJ2OXFreGRhd0wzcmZjTkhZSlkxWlZ2V1ZzN2oscz1RU1hDUitRNnNlazhiZjkyLGk9NDA5Ng==\"\r\n";
    const SHA1_CLIENT_FINAL: &str = "\"Yz1iaXdzLHI9ZnlrbytkMmxiYkZnT05Sdjlxa3hkYXdMM3JmY05IWUpZMVpWdldWczdqLHA9djBYOHYzQnoyVDBDSkdiSlF5RjBYK0hJNFRzPQ==\"\r\n";

    #[test]
    fn scram_sha1_short_form() {
        let mut r = scram_sha1();
        assert_eq!(
            render(&mut r),
            "AUTHENTICATE \"SCRAM-SHA-1\" \"biwsbj11c2VyLHI9ZnlrbytkMmxiYkZnT05Sdjlxa3hkYXdM\"\r\n"
        );
        assert!(matches!(feed(&mut r, SHA1_SERVER_FIRST), Step::Continue));
        assert_eq!(render(&mut r), SHA1_CLIENT_FINAL);
        assert!(matches!(
            feed(&mut r, b"OK (SASL \"dj1ybUY5cHFWOFM3c3VBb1pXamE0ZEpSa0ZzS1E9\")\r\n"),
            Step::Complete(Ok(_))
        ));
    }

    #[test]
    fn scram_sha1_long_form() {
        let mut r = scram_sha1();
        render(&mut r);
        feed(&mut r, SHA1_SERVER_FIRST);
        render(&mut r);
        assert!(matches!(feed(&mut r, b"\"dj1ybUY5cHFWOFM3c3VBb1pXamE0ZEpSa0ZzS1E9\"\r\n"), Step::Continue));
        assert_eq!(render(&mut r), "\"\"\r\n");
        assert!(matches!(feed(&mut r, b"OK\r\n"), Step::Complete(Ok(_))));
    }

    #[test]
    fn scram_sha1_forged_server_signature() {
        let mut r = scram_sha1();
        render(&mut r);
        feed(&mut r, SHA1_SERVER_FIRST);
        render(&mut r);
        assert!(matches!(
            feed(&mut r, b"OK (SASL \"dj1BQUFBQUFBQUFBQUFBQUFBQUFBQUFBQUFBQUE9\")\r\n"),
            Step::Complete(Err(SieveError::Sasl(_)))
        ));
    }

    #[test]
    fn scram_sha256_wire() {
        let scram = ScramClient::with_nonce(ScramHash::Sha256, "user", "pencil", None, "rOprNGfwEbeRWgbNEkqO");
        let mut r = auth(SaslClient::Scram(scram));
        assert_eq!(
            render(&mut r),
            "AUTHENTICATE \"SCRAM-SHA-256\" \"biwsbj11c2VyLHI9ck9wck5HZndFYmVSV2diTkVrcU8=\"\r\n"
        );
        feed(&mut r, b"\"cj1yT3ByTkdmd0ViZVJXZ2JORWtxTyVodllEcFdVYTJSYVRDQWZ1eEZJbGopaE5sRiRrMCxzPVcyMlphSjBTTlk3c29Fc1VFamI2Z1E9PSxpPTQwOTY=\"\r\n");
        assert_eq!(
            render(&mut r),
            "\"Yz1iaXdzLHI9ck9wck5HZndFYmVSV2diTkVrcU8laHZZRHBXVWEyUmFUQ0FmdXhGSWxqKWhObEYkazAscD1kSHpiWmFwV0lrNGpVaE4rVXRlOXl0YWc5empmTUhnc3FtbWl6N0FuZFZRPQ==\"\r\n"
        );
        assert!(matches!(
            feed(&mut r, b"OK (SASL \"dj02cnJpVFJCaTIzV3BSUi93dHVwK21NaFVaVW4vZEI1bkxUSlJzamw5NUc0PQ==\")\r\n"),
            Step::Complete(Ok(_))
        ));
    }

    #[test]
    fn mechanism_failure_cancels_exchange() {
        let scram = ScramClient::with_nonce(ScramHash::Sha1, "user", "pencil", None, "fyko+d2lbbFgONRv9qkxdawL");
        let mut r = auth(SaslClient::Scram(scram));
        render(&mut r);
        // r=other nonce
        feed(&mut r, b"\"cj1vdGhlcixzPVFTWENSK1E2c2VrOGJmOTIsaT00MDk2\"\r\n");
        assert_eq!(render(&mut r), "\"*\"\r\n");
        match feed(&mut r, b"NO \"Authentication cancelled\"\r\n") {
            Step::Complete(Err(SieveError::Sasl(e))) => assert!(e.message.contains("nonce")),
            other => panic!("unexpected {:?}", other),
        }
    }

    fn resync() -> Request {
        Request::new(RequestKind::TlsResync(TlsResync::new()), None)
    }

    #[test]
    fn resync_keeps_last_of_two_listings() {
        let mut r = resync();
        assert_eq!(render(&mut r), "CAPABILITY\r\n");
        assert!(matches!(feed(&mut r, b"\"IMPLEMENTATION\" \"one\"\r\nOK\r\n"), Step::Continue));
        assert_eq!(render(&mut r), "NOOP \"STARTTLS-SYNC\"\r\n");
        assert!(matches!(feed(&mut r, b"\"IMPLEMENTATION\" \"two\"\r\nOK\r\n"), Step::Continue));
        assert_eq!(r.render(), None);
        match feed(&mut r, b"OK (TAG \"STARTTLS-SYNC\") \"Done\"\r\n") {
            Step::Complete(Ok(Response::Capabilities(c))) => assert_eq!(c.implementation(), Some("two")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn resync_single_listing_and_no_noop() {
        let mut r = resync();
        render(&mut r);
        assert!(matches!(feed(&mut r, b"\"IMPLEMENTATION\" \"cyrus\"\r\nOK\r\n"), Step::Continue));
        render(&mut r);
        match feed(&mut r, b"NO \"Unrecognized command\"\r\n") {
            Step::Complete(Ok(Response::Capabilities(c))) => assert_eq!(c.implementation(), Some("cyrus")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn resync_bye_closes() {
        let mut r = resync();
        render(&mut r);
        assert!(matches!(feed(&mut r, b"BYE \"TLS failure\"\r\n"), Step::Closed(SieveError::Bye { .. })));
    }

    #[test]
    fn describe_hides_credentials() {
        let client = SaslClient::new(SaslMechanism::Plain, Credentials::new("user", "pencil")).unwrap();
        let r = auth(client);
        assert_eq!(r.describe(), "AUTHENTICATE \"PLAIN\" ***");
    }

    #[tokio::test]
    async fn completes_exactly_once() {
        let (tx, rx) = oneshot::channel();
        let r = Request::new(RequestKind::Command(Command::Capability), Some(tx));
        r.complete(Err(SieveError::ConnectionClosed));
        assert!(matches!(rx.await, Ok(Err(SieveError::ConnectionClosed))));
    }
}
