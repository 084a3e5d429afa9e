//! SMTP session state machine.
//!
//! [`SessionEngine`] owns the mail queue and the protocol state of exactly
//! one connection. It performs no I/O: the driver feeds it
//! [`TransportEvent`]s and carries out the [`SessionAction`]s it emits
//! (connect, write, upgrade to TLS, disconnect). Session-level failures are
//! reported as notices; per-message results go to each message's
//! [`ReplyHandle`].
//!
//! Messages are processed strictly one after another. With `PIPELINING`
//! the MAIL/RCPT/DATA commands of one message go out in a single write;
//! otherwise each command waits for the previous reply.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::auth::{AuthMethod, Authenticator, Credentials};
use crate::config::{ConnectionMode, SmtpConfig};
use crate::errors::{SmtpError, SmtpResult};
use crate::message::Message;
use crate::observability::{SmtpMetrics, Timer};
use crate::protocol::{codes, EsmtpCapabilities, Reply, ReplyParser, SmtpCommand};
use crate::reply::{ReplyHandle, ReplyOutcome, ReplyRef};

/// Protocol state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No connection.
    Disconnected,
    /// Connection requested, not yet established.
    Connecting,
    /// Waiting for the 220 greeting.
    AwaitingServiceReady,
    /// EHLO sent.
    AwaitingCapabilities,
    /// STARTTLS sent, or TLS handshake in progress.
    AwaitingStartTlsAck,
    /// AUTH PLAIN sent.
    AwaitingAuthPlainResult,
    /// AUTH LOGIN sent.
    AwaitingAuthLoginUserAck,
    /// LOGIN username sent.
    AwaitingAuthLoginPassAck,
    /// LOGIN password sent.
    AwaitingAuthLoginResult,
    /// AUTH CRAM-MD5 sent.
    AwaitingAuthCramChallenge,
    /// CRAM-MD5 response sent.
    AwaitingAuthCramResult,
    /// Idle, connection open.
    Ready,
    /// RSET sent.
    AwaitingResetAck,
    /// NOOP sent.
    AwaitingNoopAck,
    /// A mail transaction is in progress.
    SendingMail,
    /// Disconnect requested or QUIT sent.
    Closing,
}

impl SessionState {
    /// Returns true while the session is being established.
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            SessionState::Connecting
                | SessionState::AwaitingServiceReady
                | SessionState::AwaitingCapabilities
                | SessionState::AwaitingStartTlsAck
        ) || self.is_authenticating()
    }

    /// Returns true during any authentication exchange.
    pub fn is_authenticating(&self) -> bool {
        matches!(
            self,
            SessionState::AwaitingAuthPlainResult
                | SessionState::AwaitingAuthLoginUserAck
                | SessionState::AwaitingAuthLoginPassAck
                | SessionState::AwaitingAuthLoginResult
                | SessionState::AwaitingAuthCramChallenge
                | SessionState::AwaitingAuthCramResult
        )
    }
}

/// Events delivered by the transport driver.
#[derive(Debug)]
pub enum TransportEvent {
    /// The connection (TLS-wrapped for implicit TLS) is established.
    Connected,
    /// The STARTTLS handshake completed.
    TlsEstablished,
    /// Bytes received from the server.
    DataAvailable(Vec<u8>),
    /// The connection is fully closed.
    Disconnected,
    /// A transport operation failed; `Disconnected` follows.
    Error(SmtpError),
}

/// Work the driver must perform for the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Open a connection, TLS-wrapped if `implicit_tls`.
    Connect {
        /// Wrap the socket in TLS before the greeting.
        implicit_tls: bool,
    },
    /// Write these bytes.
    Write(Vec<u8>),
    /// Upgrade the open connection to TLS.
    StartTls,
    /// Close the connection.
    Disconnect,
}

/// Progress of a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPhase {
    /// Waiting in the queue.
    Initial,
    /// MAIL/RCPT/DATA written, replies outstanding.
    SendingCommands,
    /// Content written, final reply outstanding.
    SendingData,
}

/// A submitted message and its transaction progress.
#[derive(Debug)]
pub struct QueueEntry {
    message: Message,
    payload: Option<Vec<u8>>,
    commands: VecDeque<SmtpCommand>,
    awaited: VecDeque<u16>,
    phase: EntryPhase,
    reply: ReplyRef,
    failure: Option<Reply>,
    timer: Option<Timer>,
}

impl QueueEntry {
    /// Creates an entry in the `Initial` phase.
    pub fn new(message: Message, reply: ReplyRef) -> Self {
        Self {
            message,
            payload: None,
            commands: VecDeque::new(),
            awaited: VecDeque::new(),
            phase: EntryPhase::Initial,
            reply,
            failure: None,
            timer: None,
        }
    }

    /// Returns the message.
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Returns the current phase.
    pub fn phase(&self) -> EntryPhase {
        self.phase
    }

    /// Returns the reply codes still expected for the command phase.
    pub fn awaited_codes(&self) -> impl Iterator<Item = &u16> {
        self.awaited.iter()
    }

    /// Returns true once the caller dropped the handle.
    pub fn is_abandoned(&self) -> bool {
        !self.reply.is_alive()
    }

    fn in_flight(&self) -> bool {
        self.phase != EntryPhase::Initial
    }

    /// Builds the envelope commands and enters `SendingCommands`.
    fn start(&mut self, payload: Vec<u8>) {
        self.payload = Some(payload);
        self.commands
            .push_back(SmtpCommand::MailFrom(self.message.sender().address().to_string()));
        self.awaited.push_back(codes::OK);
        for recipient in self.message.recipients() {
            self.commands
                .push_back(SmtpCommand::RcptTo(recipient.address().to_string()));
            self.awaited.push_back(codes::OK);
        }
        self.commands.push_back(SmtpCommand::Data);
        self.awaited.push_back(codes::START_MAIL_INPUT);
        self.phase = EntryPhase::SendingCommands;
        self.timer = Some(Timer::start("smtp.transaction"));
    }

    fn resolve(&mut self, outcome: ReplyOutcome, metrics: &SmtpMetrics) {
        match self.timer.take() {
            Some(timer) => metrics.record_message(!outcome.is_error, timer.stop()),
            None => metrics.record_message_failure(),
        }

        if !self.reply.resolve(outcome) {
            #[cfg(feature = "tracing")]
            tracing::trace!("Reply handle dropped, result discarded");
        }
    }
}

/// Event-driven SMTP client session.
#[derive(Debug)]
pub struct SessionEngine {
    config: Arc<SmtpConfig>,
    metrics: Arc<SmtpMetrics>,
    state: SessionState,
    queue: VecDeque<QueueEntry>,
    parser: ReplyParser,
    capabilities: EsmtpCapabilities,
    encrypted: bool,
    tls_pending: bool,
    quit_sent: bool,
    reconnect_suppressed: bool,
    actions: VecDeque<SessionAction>,
    notices: VecDeque<SmtpError>,
}

impl SessionEngine {
    /// Creates a disconnected session.
    pub fn new(config: Arc<SmtpConfig>) -> Self {
        Self::with_metrics(config, Arc::new(SmtpMetrics::new()))
    }

    /// Creates a disconnected session reporting into `metrics`.
    pub fn with_metrics(config: Arc<SmtpConfig>, metrics: Arc<SmtpMetrics>) -> Self {
        Self {
            config,
            metrics,
            state: SessionState::Disconnected,
            queue: VecDeque::new(),
            parser: ReplyParser::new(),
            capabilities: EsmtpCapabilities::default(),
            encrypted: false,
            tls_pending: false,
            quit_sent: false,
            reconnect_suppressed: false,
            actions: VecDeque::new(),
            notices: VecDeque::new(),
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SmtpConfig {
        &self.config
    }

    /// Returns the metrics collector.
    pub fn metrics(&self) -> &Arc<SmtpMetrics> {
        &self.metrics
    }

    /// Returns the number of queued messages, the one in flight included.
    pub fn queue_size(&self) -> usize {
        self.queue.len()
    }

    /// Returns the capabilities of the last EHLO reply.
    pub fn capabilities(&self) -> &EsmtpCapabilities {
        &self.capabilities
    }

    /// Returns true if the connection is encrypted.
    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// Returns true while a server reply is outstanding.
    pub fn is_awaiting_response(&self) -> bool {
        match self.state {
            SessionState::Disconnected | SessionState::Connecting | SessionState::Ready => false,
            SessionState::AwaitingStartTlsAck => !self.tls_pending,
            SessionState::Closing => self.quit_sent,
            _ => true,
        }
    }

    /// Takes the next action for the driver.
    pub fn poll_action(&mut self) -> Option<SessionAction> {
        self.actions.pop_front()
    }

    /// Takes the next session-level error notice.
    pub fn poll_notice(&mut self) -> Option<SmtpError> {
        self.notices.pop_front()
    }

    /// Queues a message and returns the handle its result is delivered to.
    pub fn submit(&mut self, message: Message) -> ReplyHandle {
        let (handle, reply) = ReplyHandle::new();
        self.enqueue(message, reply);
        handle
    }

    /// Queues a message whose handle was created by the caller.
    ///
    /// Connects if disconnected; starts the transaction if idle.
    pub fn enqueue(&mut self, message: Message, reply: ReplyRef) {
        self.prune_abandoned();
        self.queue.push_back(QueueEntry::new(message, reply));
        self.reconnect_suppressed = false;

        match self.state {
            SessionState::Disconnected => self.connect(),
            SessionState::Ready => self.process_next_mail(),
            _ => {}
        }
    }

    /// Connects without waiting for a submission.
    pub fn connect_to_server(&mut self) {
        self.prune_abandoned();
        self.reconnect_suppressed = false;
        if self.state == SessionState::Disconnected {
            self.connect();
        }
    }

    /// Sends RSET on an idle session.
    pub fn command_reset(&mut self) -> SmtpResult<()> {
        self.require_ready("RSET")?;
        self.send(SmtpCommand::Rset);
        self.set_state(SessionState::AwaitingResetAck);
        Ok(())
    }

    /// Sends NOOP on an idle session.
    pub fn command_noop(&mut self) -> SmtpResult<()> {
        self.require_ready("NOOP")?;
        self.send(SmtpCommand::Noop);
        self.set_state(SessionState::AwaitingNoopAck);
        Ok(())
    }

    /// Sends QUIT and closes the connection once the server answers 221.
    ///
    /// Queued messages stay queued; the next submission reconnects.
    pub fn command_quit(&mut self) -> SmtpResult<()> {
        match self.state {
            SessionState::Disconnected | SessionState::Closing => Ok(()),
            SessionState::SendingMail => Err(SmtpError::protocol(
                "Cannot quit during a mail transaction",
            )),
            SessionState::Connecting => {
                self.reconnect_suppressed = true;
                self.disconnect();
                Ok(())
            }
            SessionState::AwaitingStartTlsAck if self.tls_pending => {
                self.reconnect_suppressed = true;
                self.disconnect();
                Ok(())
            }
            _ => {
                self.reconnect_suppressed = true;
                self.send(SmtpCommand::Quit);
                self.quit_sent = true;
                self.set_state(SessionState::Closing);
                Ok(())
            }
        }
    }

    /// Fails every queued message and closes the session.
    pub fn shutdown(&mut self) {
        let error = SmtpError::transport("Session shut down");
        for mut entry in self.queue.drain(..) {
            entry.resolve(ReplyOutcome::from_error(&error), &self.metrics);
        }

        if self.state == SessionState::SendingMail {
            self.reconnect_suppressed = true;
            self.disconnect();
        } else if self.command_quit().is_err() {
            self.disconnect();
        }
    }

    /// Advances the state machine with one transport event.
    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.on_connected(),
            TransportEvent::TlsEstablished => self.on_tls_established(),
            TransportEvent::DataAvailable(bytes) => self.on_data(&bytes),
            TransportEvent::Disconnected => self.on_disconnected(),
            TransportEvent::Error(error) => self.on_error(error),
        }
    }

    fn on_connected(&mut self) {
        if self.state != SessionState::Connecting {
            #[cfg(feature = "tracing")]
            tracing::trace!(state = ?self.state, "Ignoring connect event");
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(address = %self.config.address(), "Connected to SMTP server");

        self.metrics.record_connection_result(true);
        self.encrypted = self.config.mode == ConnectionMode::ImplicitTls;
        self.set_state(SessionState::AwaitingServiceReady);
    }

    fn on_tls_established(&mut self) {
        if self.state != SessionState::AwaitingStartTlsAck || !self.tls_pending {
            #[cfg(feature = "tracing")]
            tracing::trace!(state = ?self.state, "Ignoring TLS event");
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("TLS upgrade complete");

        self.tls_pending = false;
        self.encrypted = true;
        self.metrics.record_tls_upgrade();
        self.parser.reset();
        self.send_ehlo();
    }

    fn on_data(&mut self, bytes: &[u8]) {
        self.parser.push(bytes);
        loop {
            match self.parser.next_reply() {
                None => break,
                Some(Ok(reply)) => self.on_reply(reply),
                Some(Err(error)) => {
                    self.fail_session(error);
                    break;
                }
            }
        }
    }

    fn on_error(&mut self, error: SmtpError) {
        #[cfg(feature = "tracing")]
        tracing::warn!(state = ?self.state, error = %error, "Transport error");

        if self.state == SessionState::Connecting {
            self.metrics.record_connection_result(false);
        }

        if let Some(entry) = self.queue.front_mut().filter(|e| e.in_flight()) {
            entry.resolve(ReplyOutcome::from_error(&error), &self.metrics);
            self.queue.pop_front();
            return;
        }

        if self.state.is_setup() {
            self.reconnect_suppressed = true;
        }
        if self.state != SessionState::Closing {
            self.notices.push_back(error);
        }
    }

    fn on_disconnected(&mut self) {
        if self.state == SessionState::Disconnected {
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(state = ?self.state, queued = self.queue.len(), "Disconnected");

        if let Some(entry) = self.queue.front_mut().filter(|e| e.in_flight()) {
            let error = SmtpError::transport("Connection closed during mail transaction");
            entry.resolve(ReplyOutcome::from_error(&error), &self.metrics);
            self.queue.pop_front();
        }

        if self.state.is_setup() && !self.reconnect_suppressed {
            self.reconnect_suppressed = true;
            self.notices.push_back(SmtpError::connection(
                "Connection closed before the session was established",
            ));
        }

        self.parser.reset();
        self.capabilities = EsmtpCapabilities::default();
        self.encrypted = false;
        self.tls_pending = false;
        self.quit_sent = false;
        self.set_state(SessionState::Disconnected);

        if !self.queue.is_empty() && !self.reconnect_suppressed {
            self.metrics.record_reconnect();
            self.connect();
        }
    }

    fn on_reply(&mut self, reply: Reply) {
        #[cfg(feature = "tracing")]
        tracing::debug!(code = reply.code, message = %reply.first_line(), "Received SMTP reply");

        if reply.is_negative() {
            self.notices.push_back(reply.to_error());
        }

        match self.state {
            SessionState::AwaitingServiceReady => {
                if reply.code == codes::SERVICE_READY {
                    self.send_ehlo();
                } else {
                    self.fail_session(
                        SmtpError::connection(format!("Unexpected greeting: {}", reply))
                            .with_smtp_code(reply.code),
                    );
                }
            }
            SessionState::AwaitingCapabilities => {
                if reply.code != codes::OK {
                    self.fail_session(
                        SmtpError::protocol(format!("EHLO rejected: {}", reply))
                            .with_smtp_code(reply.code),
                    );
                    return;
                }

                self.capabilities = EsmtpCapabilities::from_reply(&reply);
                if self.config.mode == ConnectionMode::StartTls && !self.encrypted {
                    self.send(SmtpCommand::StartTls);
                    self.set_state(SessionState::AwaitingStartTlsAck);
                } else {
                    self.login();
                }
            }
            SessionState::AwaitingStartTlsAck => {
                if self.tls_pending {
                    self.fail_session(SmtpError::tls("Reply received during TLS handshake"));
                } else if reply.code == codes::SERVICE_READY {
                    self.tls_pending = true;
                    self.actions.push_back(SessionAction::StartTls);
                } else {
                    self.fail_session(
                        SmtpError::tls(format!("STARTTLS rejected: {}", reply))
                            .with_smtp_code(reply.code),
                    );
                }
            }
            SessionState::AwaitingAuthPlainResult
            | SessionState::AwaitingAuthLoginResult
            | SessionState::AwaitingAuthCramResult => {
                if reply.code == codes::AUTH_SUCCESS {
                    self.authenticated(true);
                } else {
                    self.auth_failed(&reply);
                }
            }
            SessionState::AwaitingAuthLoginUserAck => {
                self.auth_step(&reply, SessionState::AwaitingAuthLoginPassAck, |_, c| {
                    Ok(Authenticator::login_username(c))
                });
            }
            SessionState::AwaitingAuthLoginPassAck => {
                self.auth_step(&reply, SessionState::AwaitingAuthLoginResult, |_, c| {
                    Ok(Authenticator::login_password(c))
                });
            }
            SessionState::AwaitingAuthCramChallenge => {
                self.auth_step(&reply, SessionState::AwaitingAuthCramResult, |r, c| {
                    Authenticator::cram_md5_response(r.first_line(), c)
                });
            }
            SessionState::Ready => {
                if reply.code == codes::SERVICE_UNAVAILABLE {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Server is closing the idle connection");
                    self.disconnect();
                } else if !reply.is_negative() {
                    self.notices.push_back(SmtpError::protocol(format!(
                        "Unsolicited reply: {}",
                        reply
                    )));
                }
            }
            SessionState::AwaitingResetAck | SessionState::AwaitingNoopAck => {
                if reply.code != codes::OK && !reply.is_negative() {
                    self.notices.push_back(SmtpError::protocol(format!(
                        "Unexpected reply: {}",
                        reply
                    )));
                }
                self.set_state(SessionState::Ready);
                self.process_next_mail();
            }
            SessionState::SendingMail => self.on_mail_reply(reply),
            SessionState::Closing => {
                if reply.code == codes::SERVICE_CLOSING && self.quit_sent {
                    self.actions.push_back(SessionAction::Disconnect);
                }
            }
            SessionState::Disconnected | SessionState::Connecting => {
                self.notices.push_back(SmtpError::protocol(format!(
                    "Reply without connection: {}",
                    reply
                )));
            }
        }
    }

    fn on_mail_reply(&mut self, reply: Reply) {
        let pipelining = self.capabilities.pipelining;
        let Some(entry) = self.queue.front_mut() else {
            self.notices
                .push_back(SmtpError::protocol(format!("Reply without transaction: {}", reply)));
            self.set_state(SessionState::Ready);
            return;
        };

        match entry.phase {
            EntryPhase::Initial => {
                self.notices
                    .push_back(SmtpError::protocol(format!("Reply before transaction: {}", reply)));
            }
            EntryPhase::SendingCommands => {
                let expected = entry.awaited.pop_front();
                if expected != Some(reply.code) && entry.failure.is_none() {
                    entry.failure = Some(reply.clone());
                    if !pipelining {
                        entry.awaited.clear();
                        entry.commands.clear();
                    }
                }

                if let Some(failure) = &entry.failure {
                    if !entry.awaited.is_empty() {
                        return;
                    }
                    let outcome = ReplyOutcome::rejected(failure.code, failure.text());
                    entry.resolve(outcome, &self.metrics);
                    self.queue.pop_front();

                    if reply.code == codes::START_MAIL_INPUT {
                        // The server now expects content; closing is the only way out.
                        self.disconnect();
                    } else {
                        self.send(SmtpCommand::Rset);
                        self.set_state(SessionState::AwaitingResetAck);
                    }
                    return;
                }

                if entry.awaited.is_empty() {
                    let payload = entry.payload.take().unwrap_or_default();
                    entry.phase = EntryPhase::SendingData;

                    #[cfg(feature = "tracing")]
                    tracing::debug!(bytes = payload.len(), "Sending message content");

                    self.actions.push_back(SessionAction::Write(payload));
                } else if let Some(next) = entry.commands.pop_front() {
                    self.send(next);
                }
            }
            EntryPhase::SendingData => {
                let outcome = ReplyOutcome::from_reply(reply.code, reply.text());
                entry.resolve(outcome, &self.metrics);
                self.queue.pop_front();
                self.process_next_mail();
            }
        }
    }

    /// Starts the next live message, or goes idle.
    fn process_next_mail(&mut self) {
        let pipelining = self.capabilities.pipelining;

        loop {
            let Some(entry) = self.queue.front_mut() else {
                self.set_state(SessionState::Ready);
                return;
            };

            if entry.in_flight() {
                return;
            }

            if entry.is_abandoned() {
                #[cfg(feature = "tracing")]
                tracing::trace!("Skipping message with dropped handle");
                self.queue.pop_front();
                continue;
            }

            let payload = match entry.message.to_bytes() {
                Ok(payload) => payload,
                Err(error) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(error = %error, "Message serialization failed");
                    entry.resolve(ReplyOutcome::from_error(&error), &self.metrics);
                    self.queue.pop_front();
                    continue;
                }
            };

            entry.start(payload);
            let batch: Vec<SmtpCommand> = if pipelining {
                entry.commands.drain(..).collect()
            } else {
                entry.commands.pop_front().into_iter().collect()
            };

            self.set_state(SessionState::SendingMail);
            self.send_batch(batch);
            return;
        }
    }

    fn login(&mut self) {
        let method = self.config.auth_method;
        let credentials = match (method, self.config.credentials()) {
            (AuthMethod::None, _) => {
                self.authenticated(false);
                return;
            }
            (_, Some(credentials)) => credentials,
            (_, None) => {
                self.auth_failed_with(SmtpError::authentication("No credentials configured"));
                return;
            }
        };

        #[cfg(feature = "tracing")]
        {
            if !self.capabilities.supports_auth(method) {
                tracing::debug!(method = %method, "Auth mechanism not advertised, trying anyway");
            }
            if method.exposes_password() && !self.encrypted {
                tracing::warn!(method = %method, "Sending credentials over an unencrypted connection");
            }
        }

        let (command, next) = match method {
            AuthMethod::Plain => (
                SmtpCommand::AuthPlain(Authenticator::plain_initial_response(&credentials)),
                SessionState::AwaitingAuthPlainResult,
            ),
            AuthMethod::Login => (SmtpCommand::AuthLogin, SessionState::AwaitingAuthLoginUserAck),
            _ => (SmtpCommand::AuthCramMd5, SessionState::AwaitingAuthCramChallenge),
        };
        self.send(command);
        self.set_state(next);
    }

    /// Answers a 334 continuation with the payload `respond` computes.
    fn auth_step<F>(&mut self, reply: &Reply, next: SessionState, respond: F)
    where
        F: FnOnce(&Reply, &Credentials) -> SmtpResult<String>,
    {
        if reply.code != codes::AUTH_CONTINUE {
            self.auth_failed(reply);
            return;
        }

        let Some(credentials) = self.config.credentials() else {
            self.auth_failed_with(SmtpError::authentication("No credentials configured"));
            return;
        };

        match respond(reply, &credentials) {
            Ok(response) => {
                self.send(SmtpCommand::AuthResponse(response));
                self.set_state(next);
            }
            Err(error) => self.auth_failed_with(error),
        }
    }

    fn authenticated(&mut self, attempted: bool) {
        if attempted {
            #[cfg(feature = "tracing")]
            tracing::info!(method = %self.config.auth_method, "Authenticated");
            self.metrics.record_auth_attempt(true);
        }
        self.set_state(SessionState::Ready);
        self.process_next_mail();
    }

    fn auth_failed(&mut self, reply: &Reply) {
        self.auth_failed_with(
            SmtpError::authentication(format!("Authentication failed: {}", reply))
                .with_smtp_code(reply.code),
        );
    }

    fn auth_failed_with(&mut self, error: SmtpError) {
        self.metrics.record_auth_attempt(false);
        self.fail_session(error);
    }

    /// Reports a session-level failure and drops the connection.
    ///
    /// No automatic reconnect follows until the next submission.
    fn fail_session(&mut self, error: SmtpError) {
        #[cfg(feature = "tracing")]
        tracing::warn!(state = ?self.state, error = %error, "SMTP session failed");

        if let Some(entry) = self.queue.front_mut().filter(|e| e.in_flight()) {
            entry.resolve(ReplyOutcome::from_error(&error), &self.metrics);
            self.queue.pop_front();
        }

        self.reconnect_suppressed = true;
        self.notices.push_back(error);
        self.disconnect();
    }

    /// Drops waiting entries whose handle is gone. In-flight entries stay
    /// until their replies are drained.
    fn prune_abandoned(&mut self) {
        self.queue.retain(|entry| entry.in_flight() || !entry.is_abandoned());
    }

    fn require_ready(&self, command: &str) -> SmtpResult<()> {
        if self.state == SessionState::Ready {
            Ok(())
        } else {
            Err(SmtpError::protocol(format!(
                "Cannot send {} in state {:?}",
                command, self.state
            )))
        }
    }

    fn connect(&mut self) {
        let implicit_tls = self.config.mode == ConnectionMode::ImplicitTls;

        #[cfg(feature = "tracing")]
        tracing::debug!(address = %self.config.address(), implicit_tls, "Connecting");

        self.metrics.record_connection_started();
        self.set_state(SessionState::Connecting);
        self.actions.push_back(SessionAction::Connect { implicit_tls });
    }

    fn disconnect(&mut self) {
        self.set_state(SessionState::Closing);
        self.actions.push_back(SessionAction::Disconnect);
    }

    fn send_ehlo(&mut self) {
        self.capabilities = EsmtpCapabilities::default();
        self.send(SmtpCommand::Ehlo(self.config.client_name.clone()));
        self.set_state(SessionState::AwaitingCapabilities);
    }

    fn send(&mut self, command: SmtpCommand) {
        self.send_batch(vec![command]);
    }

    /// Writes commands with a single write.
    fn send_batch(&mut self, commands: Vec<SmtpCommand>) {
        let mut bytes = Vec::new();
        for command in &commands {
            #[cfg(feature = "tracing")]
            tracing::debug!(command = %command, "Sending SMTP command");
            bytes.extend_from_slice(&command.to_wire());
        }
        if !bytes.is_empty() {
            self.actions.push_back(SessionAction::Write(bytes));
        }
    }

    fn set_state(&mut self, next: SessionState) {
        #[cfg(feature = "tracing")]
        if self.state != next {
            tracing::trace!(from = ?self.state, to = ?next, "Session state change");
        }
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionMode;
    use crate::errors::SmtpErrorKind;
    use crate::mime::MimePart;
    use crate::mocks::{replies, test_config, test_message, ScriptedSession};
    use crate::types::EmailAddress;

    fn greet(session: &mut ScriptedSession, ehlo: &str) {
        session.connected();
        session.feed(replies::GREETING);
        session.feed(ehlo);
    }

    #[test]
    fn test_pipelined_send() {
        let mut session = ScriptedSession::new(test_config());
        let handle = session.submit(test_message("s", "r"));
        assert_eq!(session.connects, vec![false]);

        session.connected();
        session.feed("220 ok\r\n");
        assert_eq!(session.take_writes(), vec!["EHLO x\r\n"]);

        session.feed("250-PIPELINING\r\n250 OK\r\n");
        assert_eq!(
            session.take_writes(),
            vec!["MAIL FROM:<s>\r\nRCPT TO:<r>\r\nDATA\r\n"]
        );
        assert_eq!(session.engine().state(), SessionState::SendingMail);

        session.feed("250\r\n250\r\n354\r\n");
        let writes = session.take_writes();
        assert_eq!(writes.len(), 1);
        assert!(writes[0].ends_with("\r\n.\r\n"));
        assert!(writes[0].contains("To: <r>\r\n"));
        assert!(!handle.is_resolved());

        session.feed("250 ok\r\n");
        assert!(handle.is_resolved());
        assert!(!handle.is_error());
        assert_eq!(handle.response_code(), 250);
        assert_eq!(session.engine().state(), SessionState::Ready);
        assert_eq!(session.engine().queue_size(), 0);
        assert!(session.notices.is_empty());
    }

    #[test]
    fn test_commands_wait_without_pipelining() {
        let mut session = ScriptedSession::new(test_config());
        let message = Message::builder()
            .from(EmailAddress::new("s").unwrap())
            .to(EmailAddress::new("r1").unwrap())
            .cc(EmailAddress::new("r2").unwrap())
            .text("hi")
            .build()
            .unwrap();
        let handle = session.submit(message);
        greet(&mut session, "250 OK\r\n");
        assert_eq!(session.take_writes(), vec!["EHLO x\r\n", "MAIL FROM:<s>\r\n"]);

        session.feed("250\r\n");
        assert_eq!(session.take_writes(), vec!["RCPT TO:<r1>\r\n"]);
        session.feed("250\r\n");
        assert_eq!(session.take_writes(), vec!["RCPT TO:<r2>\r\n"]);
        session.feed("250\r\n");
        assert_eq!(session.take_writes(), vec!["DATA\r\n"]);
        session.feed("354 go ahead\r\n");
        assert!(session.take_writes()[0].ends_with("\r\n.\r\n"));
        session.feed("250 queued\r\n");
        assert_eq!(handle.response_text(), "queued");
    }

    #[test]
    fn test_login_auth_failure() {
        let config = SmtpConfig::builder()
            .host("smtp.test")
            .mode(ConnectionMode::Plain)
            .client_name("x")
            .credentials("user", "pass")
            .auth_method(AuthMethod::Login)
            .build()
            .unwrap();
        let mut session = ScriptedSession::new(config);
        let handle = session.submit(test_message("s", "r"));

        session.connected();
        session.feed("220\r\n");
        session.feed("250\r\n");
        session.feed("334\r\n");
        session.feed("334\r\n");
        session.feed("535\r\n");

        assert_eq!(
            session.take_writes(),
            vec!["EHLO x\r\n", "AUTH LOGIN\r\n", "dXNlcg==\r\n", "cGFzcw==\r\n"]
        );
        assert!(session.has_notice(SmtpErrorKind::AuthenticationFailed));
        assert_eq!(session.disconnects, 1);
        assert_eq!(session.engine().state(), SessionState::Closing);

        session.disconnected();
        assert_eq!(session.engine().state(), SessionState::Disconnected);
        assert_eq!(session.connects.len(), 1);
        assert!(!handle.is_resolved());
        assert!(session.take_writes().is_empty());
        assert_eq!(session.engine().metrics().snapshot().auth_failed, 1);
    }

    #[test]
    fn test_submit_after_auth_failure_reconnects() {
        let mut config = test_config();
        config.username = Some("user".into());
        config.password = Some(secrecy::SecretString::new("pass".into()));
        config.auth_method = AuthMethod::Plain;
        let mut session = ScriptedSession::new(config);
        session.submit(test_message("s", "r"));
        greet(&mut session, "250 OK\r\n");
        session.feed("535 5.7.8 bad credentials\r\n");
        session.disconnected();
        assert_eq!(session.connects.len(), 1);

        session.submit(test_message("s", "r2"));
        assert_eq!(session.connects.len(), 2);
        assert_eq!(session.engine().state(), SessionState::Connecting);
    }

    #[test]
    fn test_plain_auth() {
        let mut config = test_config();
        config.username = Some("user".into());
        config.password = Some(secrecy::SecretString::new("pass".into()));
        config.auth_method = AuthMethod::Plain;
        let mut session = ScriptedSession::new(config);
        session.submit(test_message("s", "r"));
        greet(&mut session, "250-AUTH PLAIN LOGIN\r\n250 PIPELINING\r\n");

        assert_eq!(
            session.take_writes(),
            vec!["EHLO x\r\n", "AUTH PLAIN AHVzZXIAcGFzcw==\r\n"]
        );
        session.feed("235 2.7.0 accepted\r\n");
        assert_eq!(
            session.take_writes(),
            vec!["MAIL FROM:<s>\r\nRCPT TO:<r>\r\nDATA\r\n"]
        );
        assert_eq!(session.engine().metrics().snapshot().auth_successful, 1);
    }

    #[test]
    fn test_cram_md5_auth() {
        let mut config = test_config();
        config.username = Some("tim".into());
        config.password = Some(secrecy::SecretString::new("tanstaaftanstaaf".into()));
        config.auth_method = AuthMethod::CramMd5;
        let mut session = ScriptedSession::new(config);
        session.connect_to_server();
        greet(&mut session, "250 AUTH CRAM-MD5\r\n");
        assert_eq!(session.take_writes(), vec!["EHLO x\r\n", "AUTH CRAM-MD5\r\n"]);

        session.feed("334 PDE4OTYuNjk3MTcwOTUyQHBvc3RvZmZpY2UucmVzdG9uLm1jaS5uZXQ+\r\n");
        assert_eq!(
            session.take_writes(),
            vec!["dGltIGI5MTNhNjAyYzdlZGE3YTQ5NWI0ZTZlNzMzNGQzODkw\r\n"]
        );
        session.feed("235 ok\r\n");
        assert_eq!(session.engine().state(), SessionState::Ready);
    }

    #[test]
    fn test_starttls_renegotiates_capabilities() {
        let mut config = test_config();
        config.mode = ConnectionMode::StartTls;
        let mut session = ScriptedSession::new(config);
        session.submit(test_message("s", "r"));
        greet(&mut session, "250-STARTTLS\r\n250 8BITMIME\r\n");
        assert_eq!(session.take_writes(), vec!["EHLO x\r\n", "STARTTLS\r\n"]);
        assert!(session.engine().capabilities().starttls);

        session.feed("220 go ahead\r\n");
        assert_eq!(session.tls_upgrades, 1);
        assert!(!session.engine().is_awaiting_response());

        session.event(TransportEvent::TlsEstablished);
        assert!(session.engine().is_encrypted());
        assert!(!session.engine().capabilities().starttls);
        assert_eq!(session.take_writes(), vec!["EHLO x\r\n"]);

        session.feed("250-PIPELINING\r\n250 SIZE 1000\r\n");
        assert_eq!(session.engine().capabilities().size, Some(1000));
        assert_eq!(
            session.take_writes(),
            vec!["MAIL FROM:<s>\r\nRCPT TO:<r>\r\nDATA\r\n"]
        );
        assert_eq!(session.engine().metrics().snapshot().tls_upgrades, 1);
    }

    #[test]
    fn test_starttls_rejected() {
        let mut config = test_config();
        config.mode = ConnectionMode::StartTls;
        let mut session = ScriptedSession::new(config);
        session.submit(test_message("s", "r"));
        greet(&mut session, "250 OK\r\n");
        session.feed("454 TLS not available\r\n");

        assert!(session.has_notice(SmtpErrorKind::TlsHandshakeFailed));
        assert!(session.has_notice(SmtpErrorKind::ServerError));
        assert_eq!(session.disconnects, 1);
        assert_eq!(session.tls_upgrades, 0);
    }

    #[test]
    fn test_implicit_tls() {
        let mut config = test_config();
        config.mode = ConnectionMode::ImplicitTls;
        let mut session = ScriptedSession::new(config);
        session.submit(test_message("s", "r"));
        assert_eq!(session.connects, vec![true]);

        session.connected();
        assert!(session.engine().is_encrypted());
        session.feed(replies::GREETING);
        session.feed("250 OK\r\n");
        assert_eq!(
            session.take_writes(),
            vec!["EHLO x\r\n", "MAIL FROM:<s>\r\n"]
        );
    }

    #[test]
    fn test_reconnect_on_drop() {
        let mut session = ScriptedSession::new(test_config());
        let first = session.submit(test_message("s", "r1"));
        let second = session.submit(test_message("s", "r2"));
        greet(&mut session, replies::EHLO_PIPELINING);
        session.feed("250\r\n");

        session.disconnected();
        assert!(first.is_error());
        assert_eq!(first.response_code(), -1);
        assert_eq!(session.engine().queue_size(), 1);
        assert_eq!(session.connects.len(), 2);
        assert_eq!(session.engine().state(), SessionState::Connecting);
        assert_eq!(session.engine().metrics().snapshot().reconnects, 1);

        session.take_writes();
        greet(&mut session, replies::EHLO_PIPELINING);
        assert_eq!(
            session.take_writes(),
            vec!["EHLO x\r\n", "MAIL FROM:<s>\r\nRCPT TO:<r2>\r\nDATA\r\n"]
        );
        session.feed("250\r\n250\r\n354\r\n");
        session.feed("250 ok\r\n");
        assert!(!second.is_error());
    }

    #[test]
    fn test_messages_share_one_connection() {
        let mut session = ScriptedSession::new(test_config());
        let first = session.submit(test_message("s", "r1"));
        let second = session.submit(test_message("s", "r2"));
        greet(&mut session, replies::EHLO_PIPELINING);
        session.feed("250\r\n250\r\n354\r\n");
        session.feed("250 first\r\n");
        assert_eq!(first.response_text(), "first");

        let writes = session.take_writes();
        assert_eq!(
            writes.last().map(String::as_str),
            Some("MAIL FROM:<s>\r\nRCPT TO:<r2>\r\nDATA\r\n")
        );
        session.feed("250\r\n250\r\n354\r\n");
        session.feed("250 second\r\n");
        assert_eq!(second.response_text(), "second");
        assert_eq!(session.connects.len(), 1);
    }

    #[test]
    fn test_dropped_handle_is_drained() {
        let mut session = ScriptedSession::new(test_config());
        let first = session.submit(test_message("s", "r1"));
        let second = session.submit(test_message("s", "r2"));
        greet(&mut session, replies::EHLO_PIPELINING);
        session.take_writes();
        drop(first);

        session.feed("250\r\n250\r\n354\r\n");
        let writes = session.take_writes();
        assert_eq!(writes.len(), 1);
        assert!(writes[0].ends_with("\r\n.\r\n"));

        session.feed("250 ok\r\n");
        assert_eq!(
            session.take_writes(),
            vec!["MAIL FROM:<s>\r\nRCPT TO:<r2>\r\nDATA\r\n"]
        );
        session.feed("250\r\n250\r\n354\r\n250 done\r\n");
        assert_eq!(second.response_text(), "done");
    }

    #[test]
    fn test_dropped_handle_before_start_is_skipped() {
        let mut session = ScriptedSession::new(test_config());
        let handle = session.submit(test_message("s", "r"));
        drop(handle);
        greet(&mut session, replies::EHLO_PIPELINING);

        assert_eq!(session.take_writes(), vec!["EHLO x\r\n"]);
        assert_eq!(session.engine().state(), SessionState::Ready);
        assert_eq!(session.engine().queue_size(), 0);
    }

    #[test]
    fn test_reconnect_prunes_withdrawn_messages() {
        let mut session = ScriptedSession::new(test_config());
        let withdrawn = session.submit(test_message("s", "r1"));
        session.fail(SmtpError::connection("refused"));
        assert_eq!(session.engine().state(), SessionState::Disconnected);
        assert_eq!(session.engine().queue_size(), 1);

        drop(withdrawn);
        let kept = session.submit(test_message("s", "r2"));
        assert_eq!(session.engine().queue_size(), 1);

        greet(&mut session, replies::EHLO_PIPELINING);
        assert_eq!(
            session.take_writes().last().map(String::as_str),
            Some("MAIL FROM:<s>\r\nRCPT TO:<r2>\r\nDATA\r\n")
        );
        assert!(!kept.is_resolved());
    }

    #[test]
    fn test_rejected_recipient_drains_then_resets() {
        let mut session = ScriptedSession::new(test_config());
        let handle = session.submit(test_message("s", "nobody"));
        greet(&mut session, replies::EHLO_PIPELINING);
        session.take_writes();

        session.feed("250\r\n550 5.1.1 no such user\r\n");
        assert!(!handle.is_resolved());
        session.feed("554 no valid recipients\r\n");

        assert!(handle.is_error());
        assert_eq!(handle.response_code(), 550);
        assert_eq!(handle.response_text(), "5.1.1 no such user");
        assert_eq!(session.take_writes(), vec!["RSET\r\n"]);
        assert_eq!(session.engine().state(), SessionState::AwaitingResetAck);
        assert!(session.has_notice(SmtpErrorKind::ClientError));

        session.feed("250 reset\r\n");
        assert_eq!(session.engine().state(), SessionState::Ready);
    }

    #[test]
    fn test_drained_data_acceptance_drops_connection() {
        let mut session = ScriptedSession::new(test_config());
        let handle = session.submit(test_message("s", "nobody"));
        greet(&mut session, replies::EHLO_PIPELINING);
        session.take_writes();

        session.feed("250\r\n550 no\r\n354 go\r\n");
        assert_eq!(handle.response_code(), 550);
        assert!(session.take_writes().is_empty());
        assert_eq!(session.disconnects, 1);
        assert_eq!(session.engine().state(), SessionState::Closing);
    }

    #[test]
    fn test_rejection_without_pipelining() {
        let mut session = ScriptedSession::new(test_config());
        let handle = session.submit(test_message("s", "r"));
        greet(&mut session, "250 OK\r\n");
        session.take_writes();

        session.feed("451 4.3.0 try later\r\n");
        assert!(handle.is_error());
        assert_eq!(handle.response_code(), 451);
        assert_eq!(session.take_writes(), vec!["RSET\r\n"]);
        assert!(session.has_notice(SmtpErrorKind::ServerError));
    }

    #[test]
    fn test_data_rejected_after_content() {
        let mut session = ScriptedSession::new(test_config());
        let handle = session.submit(test_message("s", "r"));
        greet(&mut session, replies::EHLO_PIPELINING);
        session.feed("250\r\n250\r\n354\r\n554 5.7.1 spam\r\n");

        assert!(handle.is_error());
        assert_eq!(handle.response_code(), 554);
        assert_eq!(session.engine().state(), SessionState::Ready);
        assert_eq!(session.engine().metrics().snapshot().messages_failed, 1);
    }

    #[test]
    fn test_serialization_failure_skips_wire() {
        let dir = tempfile::tempdir().unwrap();
        let message = Message::builder()
            .from(EmailAddress::new("s").unwrap())
            .to(EmailAddress::new("r").unwrap())
            .part(MimePart::attachment(dir.path().join("gone.bin")))
            .build()
            .unwrap();

        let mut session = ScriptedSession::new(test_config());
        let handle = session.submit(message);
        greet(&mut session, replies::EHLO_PIPELINING);

        assert_eq!(session.take_writes(), vec!["EHLO x\r\n"]);
        assert!(handle.is_error());
        assert_eq!(handle.response_code(), -1);
        assert_eq!(
            handle.outcome().unwrap().error_kind,
            Some(SmtpErrorKind::SerializationError)
        );
        assert_eq!(session.engine().state(), SessionState::Ready);
    }

    #[test]
    fn test_transport_timeout_mid_transaction() {
        let mut session = ScriptedSession::new(test_config());
        let handle = session.submit(test_message("s", "r"));
        greet(&mut session, replies::EHLO_PIPELINING);
        assert!(session.engine().is_awaiting_response());

        session.fail(SmtpError::timeout(
            SmtpErrorKind::ResponseTimeout,
            "No reply within 60s",
        ));
        assert_eq!(handle.response_code(), -1);
        assert_eq!(handle.response_text(), "No reply within 60s");
        assert_eq!(
            handle.outcome().unwrap().error_kind,
            Some(SmtpErrorKind::ResponseTimeout)
        );
        assert_eq!(session.engine().state(), SessionState::Disconnected);
        assert_eq!(session.connects.len(), 1);
    }

    #[test]
    fn test_greeting_rejected_suppresses_reconnect() {
        let mut session = ScriptedSession::new(test_config());
        session.submit(test_message("s", "r"));
        session.connected();
        session.feed("554 no service\r\n");
        assert!(session.has_notice(SmtpErrorKind::ConnectionRefused));
        session.disconnected();
        assert_eq!(session.connects.len(), 1);
        assert_eq!(session.engine().queue_size(), 1);

        session.engine_mut().connect_to_server();
        session.pump();
        assert_eq!(session.connects.len(), 2);
    }

    #[test]
    fn test_connect_failure() {
        let mut session = ScriptedSession::new(test_config());
        let handle = session.submit(test_message("s", "r"));
        session.fail(SmtpError::timeout(
            SmtpErrorKind::ConnectionTimeout,
            "connect timed out",
        ));

        assert!(session.has_notice(SmtpErrorKind::ConnectionTimeout));
        assert!(!handle.is_resolved());
        assert_eq!(session.connects.len(), 1);
        assert_eq!(session.engine().metrics().snapshot().connections_failed, 1);
    }

    #[test]
    fn test_replies_split_across_reads() {
        let mut session = ScriptedSession::new(test_config());
        session.connect_to_server();
        session.connected();
        session.feed("22");
        assert!(session.take_writes().is_empty());
        session.feed("0 ready\r\n250-PIPE");
        assert_eq!(session.take_writes(), vec!["EHLO x\r\n"]);
        session.feed("LINING\r\n250 OK\r\n");
        assert!(session.engine().capabilities().pipelining);
        assert_eq!(session.engine().state(), SessionState::Ready);
    }

    #[test]
    fn test_malformed_reply_fails_session() {
        let mut session = ScriptedSession::new(test_config());
        session.connect_to_server();
        session.connected();
        session.feed("hello there\r\n");
        assert!(session.has_notice(SmtpErrorKind::ProtocolViolation));
        assert_eq!(session.disconnects, 1);
    }

    #[test]
    fn test_reset_and_noop() {
        let mut session = ScriptedSession::new(test_config());
        assert!(session.engine_mut().command_noop().is_err());

        session.connect_to_server();
        greet(&mut session, "250 OK\r\n");
        session.take_writes();

        session.engine_mut().command_reset().unwrap();
        session.pump();
        assert_eq!(session.take_writes(), vec!["RSET\r\n"]);
        assert_eq!(session.engine().state(), SessionState::AwaitingResetAck);
        session.feed("250 ok\r\n");
        assert_eq!(session.engine().state(), SessionState::Ready);

        session.engine_mut().command_noop().unwrap();
        session.pump();
        assert_eq!(session.take_writes(), vec!["NOOP\r\n"]);
        session.feed("500 what\r\n");
        assert_eq!(session.engine().state(), SessionState::Ready);
        assert!(session.has_notice(SmtpErrorKind::ClientError));
    }

    #[test]
    fn test_submit_during_noop_waits() {
        let mut session = ScriptedSession::new(test_config());
        session.connect_to_server();
        greet(&mut session, replies::EHLO_PIPELINING);
        session.engine_mut().command_noop().unwrap();
        session.pump();
        session.take_writes();

        let handle = session.submit(test_message("s", "r"));
        assert!(session.take_writes().is_empty());
        session.feed("250 ok\r\n");
        assert_eq!(
            session.take_writes(),
            vec!["MAIL FROM:<s>\r\nRCPT TO:<r>\r\nDATA\r\n"]
        );
        assert!(!handle.is_resolved());
    }

    #[test]
    fn test_quit_waits_for_221() {
        let mut session = ScriptedSession::new(test_config());
        session.connect_to_server();
        greet(&mut session, "250 OK\r\n");
        session.take_writes();

        session.engine_mut().command_quit().unwrap();
        session.pump();
        assert_eq!(session.take_writes(), vec!["QUIT\r\n"]);
        assert_eq!(session.disconnects, 0);
        assert!(session.engine().is_awaiting_response());

        session.feed("221 bye\r\n");
        assert_eq!(session.disconnects, 1);
        session.disconnected();
        assert_eq!(session.engine().state(), SessionState::Disconnected);
        assert_eq!(session.connects.len(), 1);
    }

    #[test]
    fn test_quit_refused_mid_transaction() {
        let mut session = ScriptedSession::new(test_config());
        session.submit(test_message("s", "r"));
        greet(&mut session, replies::EHLO_PIPELINING);
        assert!(session.engine_mut().command_quit().is_err());
    }

    #[test]
    fn test_shutdown_resolves_queue() {
        let mut session = ScriptedSession::new(test_config());
        let first = session.submit(test_message("s", "r1"));
        let second = session.submit(test_message("s", "r2"));
        greet(&mut session, replies::EHLO_PIPELINING);

        session.engine_mut().shutdown();
        session.pump();
        assert!(first.is_error());
        assert!(second.is_error());
        assert_eq!(session.engine().queue_size(), 0);
        assert_eq!(session.disconnects, 1);

        session.disconnected();
        assert_eq!(session.connects.len(), 1);
    }

    #[test]
    fn test_unsolicited_reply_in_ready() {
        let mut session = ScriptedSession::new(test_config());
        session.connect_to_server();
        greet(&mut session, "250 OK\r\n");
        session.feed("500 stray\r\n");
        assert!(session.has_notice(SmtpErrorKind::ClientError));
        assert_eq!(session.engine().state(), SessionState::Ready);

        session.feed("250 stray\r\n");
        assert!(session.has_notice(SmtpErrorKind::ProtocolViolation));
        assert_eq!(session.engine().state(), SessionState::Ready);
        assert_eq!(session.disconnects, 0);
    }

    #[test]
    fn test_service_unavailable_closes_idle_session() {
        let mut session = ScriptedSession::new(test_config());
        session.connect_to_server();
        greet(&mut session, "250 OK\r\n");
        session.feed("421 4.4.2 idle timeout\r\n");
        assert!(session.has_notice(SmtpErrorKind::ServerError));
        assert_eq!(session.disconnects, 1);

        session.disconnected();
        assert_eq!(session.engine().state(), SessionState::Disconnected);
        assert_eq!(session.connects.len(), 1);

        session.submit(test_message("s", "r"));
        assert_eq!(session.connects.len(), 2);
    }

    #[test]
    fn test_bcc_is_rcpt_only() {
        let message = Message::builder()
            .from(EmailAddress::new("s").unwrap())
            .to(EmailAddress::new("alice").unwrap())
            .bcc(EmailAddress::new("carol").unwrap())
            .text("hi")
            .build()
            .unwrap();

        let mut session = ScriptedSession::new(test_config());
        session.submit(message);
        greet(&mut session, replies::EHLO_PIPELINING);
        assert_eq!(
            session.take_writes().last().map(String::as_str),
            Some("MAIL FROM:<s>\r\nRCPT TO:<alice>\r\nRCPT TO:<carol>\r\nDATA\r\n")
        );

        session.feed("250\r\n250\r\n250\r\n354\r\n");
        let content = session.take_writes().remove(0);
        assert!(content.contains("To: <alice>"));
        assert!(!content.contains("carol"));
    }
}
