//! Mock implementations for testing.
//!
//! [`ScriptedSession`] drives a [`SessionEngine`] by hand and records the
//! actions it emits. [`MockServer`] is an in-memory SMTP server reached
//! through [`MockConnector`], for exercising the client driver without
//! sockets.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::auth::AuthMethod;
use crate::config::{ConnectionMode, SmtpConfig, TlsConfig};
use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};
use crate::message::{Message, DATA_TERMINATOR};
use crate::reply::ReplyHandle;
use crate::session::{SessionAction, SessionEngine, TransportEvent};
use crate::transport::{SmtpTransport, TransportConnector};
use crate::types::EmailAddress;

/// Canned server replies.
pub mod replies {
    /// Service ready greeting.
    pub const GREETING: &str = "220 mock.test ESMTP ready\r\n";
    /// EHLO reply advertising pipelining.
    pub const EHLO_PIPELINING: &str = "250-mock.test\r\n250-PIPELINING\r\n250 8BITMIME\r\n";
    /// EHLO reply without extensions.
    pub const EHLO_BASIC: &str = "250 mock.test\r\n";
}

/// Returns a plain-text configuration for `smtp.test` announcing `x`.
pub fn test_config() -> SmtpConfig {
    SmtpConfig {
        host: "smtp.test".to_string(),
        port: 25,
        mode: ConnectionMode::Plain,
        client_name: "x".to_string(),
        tls: TlsConfig::default(),
        username: None,
        password: None,
        auth_method: AuthMethod::None,
        connect_timeout: std::time::Duration::from_secs(5),
        response_timeout: std::time::Duration::from_secs(5),
        send_timeout: std::time::Duration::from_secs(5),
    }
}

/// Builds a one-recipient text message.
///
/// # Panics
///
/// Panics if either address is invalid.
pub fn test_message(from: &str, to: &str) -> Message {
    let build = || -> SmtpResult<Message> {
        Message::builder()
            .from(EmailAddress::new(from)?)
            .to(EmailAddress::new(to)?)
            .subject("Test")
            .text("Hello.\r\n")
            .build()
    };
    match build() {
        Ok(message) => message,
        Err(e) => panic!("invalid test message: {}", e),
    }
}

/// Session engine driven by hand, with every emitted action recorded.
#[derive(Debug)]
pub struct ScriptedSession {
    engine: SessionEngine,
    writes: Vec<Vec<u8>>,
    /// `implicit_tls` flag of each requested connect.
    pub connects: Vec<bool>,
    /// Requested TLS upgrades.
    pub tls_upgrades: usize,
    /// Requested disconnects.
    pub disconnects: usize,
    /// Collected error notices.
    pub notices: Vec<SmtpError>,
}

impl ScriptedSession {
    /// Creates a session for `config`.
    pub fn new(config: SmtpConfig) -> Self {
        Self {
            engine: SessionEngine::new(Arc::new(config)),
            writes: Vec::new(),
            connects: Vec::new(),
            tls_upgrades: 0,
            disconnects: 0,
            notices: Vec::new(),
        }
    }

    /// Returns the engine.
    pub fn engine(&self) -> &SessionEngine {
        &self.engine
    }

    /// Returns the engine mutably; call [`pump`](Self::pump) afterwards.
    pub fn engine_mut(&mut self) -> &mut SessionEngine {
        &mut self.engine
    }

    /// Submits a message.
    pub fn submit(&mut self, message: Message) -> ReplyHandle {
        let handle = self.engine.submit(message);
        self.pump();
        handle
    }

    /// Connects without a submission.
    pub fn connect_to_server(&mut self) {
        self.engine.connect_to_server();
        self.pump();
    }

    /// Delivers a transport event.
    pub fn event(&mut self, event: TransportEvent) {
        self.engine.handle_event(event);
        self.pump();
    }

    /// Delivers server bytes.
    pub fn feed(&mut self, data: &str) {
        self.event(TransportEvent::DataAvailable(data.as_bytes().to_vec()));
    }

    /// Reports the connection as established.
    pub fn connected(&mut self) {
        self.event(TransportEvent::Connected);
    }

    /// Reports the connection as closed.
    pub fn disconnected(&mut self) {
        self.event(TransportEvent::Disconnected);
    }

    /// Reports a transport failure followed by the disconnect.
    pub fn fail(&mut self, error: SmtpError) {
        self.event(TransportEvent::Error(error));
        self.disconnected();
    }

    /// Records pending actions and notices.
    pub fn pump(&mut self) {
        while let Some(action) = self.engine.poll_action() {
            match action {
                SessionAction::Connect { implicit_tls } => self.connects.push(implicit_tls),
                SessionAction::Write(bytes) => self.writes.push(bytes),
                SessionAction::StartTls => self.tls_upgrades += 1,
                SessionAction::Disconnect => self.disconnects += 1,
            }
        }
        while let Some(notice) = self.engine.poll_notice() {
            self.notices.push(notice);
        }
    }

    /// Returns and clears the writes recorded so far.
    pub fn take_writes(&mut self) -> Vec<String> {
        self.writes
            .drain(..)
            .map(|w| String::from_utf8_lossy(&w).into_owned())
            .collect()
    }

    /// Returns true if a notice of `kind` was raised.
    pub fn has_notice(&self, kind: SmtpErrorKind) -> bool {
        self.notices.iter().any(|n| n.kind() == kind)
    }
}

/// Behavior and recordings of a [`MockServer`].
#[derive(Debug, Default)]
struct MockServerState {
    starttls: bool,
    pipelining: bool,
    accept_auth: bool,
    refuse_connections: bool,
    mute: bool,
    hangups: usize,
    rejected: HashSet<String>,
    connects: usize,
    commands: Vec<String>,
    messages: Vec<Vec<u8>>,
}

/// In-memory SMTP server shared by every [`MockTransport`] it accepts.
#[derive(Debug, Clone)]
pub struct MockServer {
    state: Arc<Mutex<MockServerState>>,
}

impl Default for MockServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockServer {
    /// Creates a server advertising PIPELINING and accepting any login.
    pub fn new() -> Self {
        let state = MockServerState {
            pipelining: true,
            accept_auth: true,
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Advertises STARTTLS until the connection is encrypted.
    pub fn with_starttls(self) -> Self {
        self.lock().starttls = true;
        self
    }

    /// Stops advertising PIPELINING.
    pub fn without_pipelining(self) -> Self {
        self.lock().pipelining = false;
        self
    }

    /// Rejects every AUTH attempt with 535.
    pub fn rejecting_auth(self) -> Self {
        self.lock().accept_auth = false;
        self
    }

    /// Answers `RCPT TO:<address>` with 550.
    pub fn rejecting_recipient(self, address: &str) -> Self {
        self.lock().rejected.insert(address.to_string());
        self
    }

    /// Refuses every connection attempt.
    pub fn refusing_connections(self) -> Self {
        self.lock().refuse_connections = true;
        self
    }

    /// Never answers anything after the greeting.
    pub fn muted(self) -> Self {
        self.lock().mute = true;
        self
    }

    /// Closes the connection instead of answering the next `count` DATA commands.
    pub fn hanging_up_on_data(self, count: usize) -> Self {
        self.lock().hangups = count;
        self
    }

    /// Returns the number of accepted connections.
    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    /// Returns every command line received, in order.
    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    /// Returns the content of every accepted message.
    pub fn messages(&self) -> Vec<Vec<u8>> {
        self.lock().messages.clone()
    }

    /// Returns a connector to this server.
    pub fn connector(&self) -> MockConnector {
        MockConnector {
            server: self.clone(),
        }
    }
}

/// Connector handing out [`MockTransport`]s.
#[derive(Debug, Clone)]
pub struct MockConnector {
    server: MockServer,
}

#[async_trait]
impl TransportConnector for MockConnector {
    async fn connect(
        &self,
        config: &SmtpConfig,
        implicit_tls: bool,
    ) -> SmtpResult<Box<dyn SmtpTransport>> {
        {
            let mut state = self.server.lock();
            if state.refuse_connections {
                return Err(SmtpError::connection(format!(
                    "Connection refused to {}",
                    config.address()
                )));
            }
            state.connects += 1;
        }

        let mut transport = MockTransport::new(self.server.clone());
        transport.tls = implicit_tls;
        Ok(Box::new(transport))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthStage {
    None,
    LoginUser,
    LoginPass,
    CramResponse,
}

/// One connection to a [`MockServer`].
#[derive(Debug)]
pub struct MockTransport {
    server: MockServer,
    inbound: Vec<u8>,
    line: Vec<u8>,
    data: Option<Vec<u8>>,
    auth: AuthStage,
    accepted_recipients: usize,
    tls: bool,
    closed: bool,
}

impl MockTransport {
    fn new(server: MockServer) -> Self {
        Self {
            server,
            inbound: replies::GREETING.as_bytes().to_vec(),
            line: Vec::new(),
            data: None,
            auth: AuthStage::None,
            accepted_recipients: 0,
            tls: false,
            closed: false,
        }
    }

    fn reply(&mut self, text: &str) {
        if !self.server.lock().mute {
            self.inbound.extend_from_slice(text.as_bytes());
        }
    }

    fn receive(&mut self, byte: u8) {
        if let Some(data) = self.data.as_mut() {
            data.push(byte);
            if data.ends_with(DATA_TERMINATOR) {
                let content = self.data.take().unwrap_or_default();
                let id = {
                    let mut state = self.server.lock();
                    state.messages.push(content);
                    state.messages.len()
                };
                self.accepted_recipients = 0;
                self.reply(&format!("250 2.0.0 queued as {}\r\n", id));
            }
            return;
        }

        self.line.push(byte);
        if self.line.ends_with(b"\r\n") {
            let line = String::from_utf8_lossy(&self.line[..self.line.len() - 2]).into_owned();
            self.line.clear();
            self.command(&line);
        }
    }

    fn command(&mut self, line: &str) {
        self.server.lock().commands.push(line.to_string());

        if self.auth != AuthStage::None {
            let stage = self.auth;
            self.auth = AuthStage::None;
            match stage {
                AuthStage::LoginUser => {
                    self.auth = AuthStage::LoginPass;
                    self.reply("334 UGFzc3dvcmQ6\r\n");
                }
                _ => self.auth_result(),
            }
            return;
        }

        let upper = line.to_ascii_uppercase();
        let verb = upper.split([' ', ':']).next().unwrap_or("");
        match verb {
            "EHLO" => {
                let (starttls, pipelining) = {
                    let state = self.server.lock();
                    (state.starttls && !self.tls, state.pipelining)
                };
                let mut reply = String::from("250-mock.test\r\n");
                if starttls {
                    reply.push_str("250-STARTTLS\r\n");
                }
                if pipelining {
                    reply.push_str("250-PIPELINING\r\n");
                }
                reply.push_str("250 AUTH PLAIN LOGIN CRAM-MD5\r\n");
                self.reply(&reply);
            }
            "STARTTLS" => self.reply("220 2.0.0 ready to start TLS\r\n"),
            "AUTH" => match upper.split(' ').nth(1).unwrap_or("") {
                "PLAIN" => self.auth_result(),
                "LOGIN" => {
                    self.auth = AuthStage::LoginUser;
                    self.reply("334 VXNlcm5hbWU6\r\n");
                }
                "CRAM-MD5" => {
                    self.auth = AuthStage::CramResponse;
                    self.reply("334 PDEyMzQ1QG1vY2sudGVzdD4=\r\n");
                }
                _ => self.reply("504 5.5.4 unrecognized mechanism\r\n"),
            },
            "MAIL" => {
                self.accepted_recipients = 0;
                self.reply("250 2.1.0 ok\r\n");
            }
            "RCPT" => {
                let address = line
                    .find('<')
                    .and_then(|start| line[start + 1..].split('>').next())
                    .unwrap_or("")
                    .to_string();
                if self.server.lock().rejected.contains(&address) {
                    self.reply("550 5.1.1 mailbox unavailable\r\n");
                } else {
                    self.accepted_recipients += 1;
                    self.reply("250 2.1.5 ok\r\n");
                }
            }
            "DATA" => {
                let hang_up = {
                    let mut state = self.server.lock();
                    if state.hangups > 0 {
                        state.hangups -= 1;
                        true
                    } else {
                        false
                    }
                };
                if hang_up {
                    self.closed = true;
                } else if self.accepted_recipients == 0 {
                    self.reply("554 5.5.1 no valid recipients\r\n");
                } else {
                    self.data = Some(Vec::new());
                    self.reply("354 end data with <CR><LF>.<CR><LF>\r\n");
                }
            }
            "RSET" => {
                self.accepted_recipients = 0;
                self.reply("250 2.0.0 ok\r\n");
            }
            "NOOP" => self.reply("250 2.0.0 ok\r\n"),
            "QUIT" => {
                self.reply("221 2.0.0 bye\r\n");
                self.closed = true;
            }
            _ => self.reply("500 5.5.2 command not recognized\r\n"),
        }
    }

    fn auth_result(&mut self) {
        if self.server.lock().accept_auth {
            self.reply("235 2.7.0 authenticated\r\n");
        } else {
            self.reply("535 5.7.8 authentication failed\r\n");
        }
    }
}

#[async_trait]
impl SmtpTransport for MockTransport {
    async fn write_all(&mut self, data: &[u8]) -> SmtpResult<()> {
        if self.closed {
            return Err(SmtpError::transport("Broken pipe"));
        }
        for &byte in data {
            self.receive(byte);
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> SmtpResult<usize> {
        if self.inbound.is_empty() {
            if self.closed {
                return Ok(0);
            }
            // Nothing will arrive until the client writes again.
            std::future::pending::<()>().await;
        }

        let n = buf.len().min(self.inbound.len());
        buf[..n].copy_from_slice(&self.inbound[..n]);
        self.inbound.drain(..n);
        Ok(n)
    }

    async fn upgrade_tls(&mut self, _host: &str, _tls: &TlsConfig) -> SmtpResult<()> {
        if self.tls {
            return Err(SmtpError::tls("Connection already uses TLS"));
        }
        self.tls = true;
        Ok(())
    }

    fn is_tls(&self) -> bool {
        self.tls
    }

    async fn close(&mut self) -> SmtpResult<()> {
        self.closed = true;
        self.inbound.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read_string(transport: &mut MockTransport) -> String {
        let mut buf = [0u8; 512];
        let n = transport.read(&mut buf).await.unwrap();
        String::from_utf8_lossy(&buf[..n]).into_owned()
    }

    #[tokio::test]
    async fn test_mock_server_transaction() {
        let server = MockServer::new().rejecting_recipient("nobody@test");
        let mut transport = MockTransport::new(server.clone());

        assert_eq!(read_string(&mut transport).await, replies::GREETING);
        transport
            .write_all(b"MAIL FROM:<a@test>\r\nRCPT TO:<nobody@test>\r\nRCPT TO:<b@test>\r\nDATA\r\n")
            .await
            .unwrap();
        let replies = read_string(&mut transport).await;
        assert!(replies.contains("550 5.1.1"));
        assert!(replies.ends_with("354 end data with <CR><LF>.<CR><LF>\r\n"));

        transport.write_all(b"Subject: x\r\n\r\nhi\r\n.\r\n").await.unwrap();
        assert_eq!(read_string(&mut transport).await, "250 2.0.0 queued as 1\r\n");
        assert_eq!(server.messages().len(), 1);
        assert_eq!(server.commands().len(), 4);
    }

    #[tokio::test]
    async fn test_mock_server_quit_closes() {
        let mut transport = MockTransport::new(MockServer::new());
        read_string(&mut transport).await;
        transport.write_all(b"QUIT\r\n").await.unwrap();
        assert_eq!(read_string(&mut transport).await, "221 2.0.0 bye\r\n");
        assert_eq!(read_string(&mut transport).await, "");
        assert!(transport.write_all(b"NOOP\r\n").await.is_err());
    }

    #[tokio::test]
    async fn test_mock_connector_refuses() {
        let server = MockServer::new().refusing_connections();
        let err = server
            .connector()
            .connect(&test_config(), false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::ConnectionRefused);
        assert_eq!(server.connects(), 0);
    }

    #[test]
    fn test_scripted_session_records_actions() {
        let mut session = ScriptedSession::new(test_config());
        session.connect_to_server();
        assert_eq!(session.connects, vec![false]);
        session.connected();
        session.feed(replies::GREETING);
        assert_eq!(session.take_writes(), vec!["EHLO x\r\n"]);
        assert!(session.take_writes().is_empty());
    }

    #[test]
    fn test_test_message() {
        let message = test_message("a@test", "b@test");
        assert_eq!(message.sender().address(), "a@test");
        assert_eq!(message.to().len(), 1);
    }
}
