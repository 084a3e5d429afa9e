//! Asynchronous SMTP client.
//!
//! [`SmtpClient`] spawns a driver task that owns one [`SessionEngine`] and
//! its transport. The driver carries out the engine's actions, applies the
//! configured timeouts, and publishes session-level errors on a broadcast
//! channel. Each submitted message gets its own [`ReplyHandle`].

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{timeout, timeout_at, Instant};

use crate::config::SmtpConfig;
use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};
use crate::message::Message;
use crate::observability::{MetricsSnapshot, SmtpMetrics};
use crate::protocol::EsmtpCapabilities;
use crate::reply::{ReplyHandle, ReplyOutcome, ReplyRef};
use crate::session::{SessionAction, SessionEngine, SessionState, TransportEvent};
use crate::transport::{SmtpTransport, TcpConnector, TransportConnector};

/// Bytes requested per socket read.
const READ_BUFFER_SIZE: usize = 8192;

/// Default capacity of the notice channel.
const DEFAULT_NOTICE_CAPACITY: usize = 64;

/// Snapshot of the session as seen by the driver.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    /// Protocol state.
    pub state: SessionState,
    /// Messages queued, the one in flight included.
    pub queue_size: usize,
    /// True if the connection is encrypted.
    pub encrypted: bool,
    /// Capabilities of the last EHLO reply.
    pub capabilities: EsmtpCapabilities,
}

enum ClientCommand {
    Submit(Message, ReplyRef),
    Connect,
    Reset(oneshot::Sender<SmtpResult<()>>),
    Noop(oneshot::Sender<SmtpResult<()>>),
    Quit(oneshot::Sender<SmtpResult<()>>),
    Shutdown(oneshot::Sender<()>),
    Status(oneshot::Sender<SessionStatus>),
}

/// Handle to a running SMTP session.
///
/// Dropping the last handle shuts the session down; queued messages are
/// resolved with an error.
#[derive(Debug)]
pub struct SmtpClient {
    config: Arc<SmtpConfig>,
    commands: mpsc::UnboundedSender<ClientCommand>,
    notices: broadcast::Sender<SmtpError>,
    metrics: Arc<SmtpMetrics>,
}

impl SmtpClient {
    /// Starts a session over TCP for `config`.
    ///
    /// Must be called within a Tokio runtime. No connection is opened until
    /// the first submission or [`connect_to_server`](Self::connect_to_server).
    pub fn new(config: SmtpConfig) -> SmtpResult<Self> {
        Self::builder().config(config).build()
    }

    /// Creates a builder for the SMTP client.
    pub fn builder() -> SmtpClientBuilder {
        SmtpClientBuilder::default()
    }

    /// Queues a message and returns the handle its result is delivered to.
    pub fn submit(&self, message: Message) -> SmtpResult<ReplyHandle> {
        let (handle, reply) = ReplyHandle::new();
        self.dispatch(ClientCommand::Submit(message, reply))?;
        Ok(handle)
    }

    /// Queues a message and waits for its result.
    ///
    /// Fails with the session error when the session gives up before the
    /// message is sent (connection refused, greeting or credentials
    /// rejected). The message is withdrawn from the queue in that case.
    pub async fn send(&self, message: Message) -> SmtpResult<ReplyOutcome> {
        let mut notices = self.notices.subscribe();
        let handle = self.submit(message)?;

        loop {
            tokio::select! {
                outcome = handle.finished() => return Ok(outcome),
                notice = notices.recv() => {
                    let notice = match notice {
                        Ok(notice) => Some(notice),
                        Err(broadcast::error::RecvError::Lagged(_)) => None,
                        Err(broadcast::error::RecvError::Closed) => {
                            return Ok(handle.finished().await)
                        }
                    };
                    if let Some(error) = self.stalled(&handle, notice, &mut notices).await? {
                        return Err(error);
                    }
                }
            }
        }
    }

    /// Connects without waiting for a submission.
    pub fn connect_to_server(&self) -> SmtpResult<()> {
        self.dispatch(ClientCommand::Connect)
    }

    /// Sends RSET; fails unless the session is idle.
    pub async fn reset(&self) -> SmtpResult<()> {
        self.request(ClientCommand::Reset).await?
    }

    /// Sends NOOP; fails unless the session is idle.
    pub async fn noop(&self) -> SmtpResult<()> {
        self.request(ClientCommand::Noop).await?
    }

    /// Sends QUIT; queued messages wait for the next submission.
    pub async fn quit(&self) -> SmtpResult<()> {
        self.request(ClientCommand::Quit).await?
    }

    /// Fails every queued message and waits until the connection is closed.
    pub async fn shutdown(&self) -> SmtpResult<()> {
        self.request(ClientCommand::Shutdown).await
    }

    /// Returns the session status.
    pub async fn status(&self) -> SmtpResult<SessionStatus> {
        self.request(ClientCommand::Status).await
    }

    /// Returns the number of queued messages, the one in flight included.
    pub async fn queue_size(&self) -> SmtpResult<usize> {
        Ok(self.status().await?.queue_size)
    }

    /// Subscribes to session-level error notices.
    pub fn notifications(&self) -> broadcast::Receiver<SmtpError> {
        self.notices.subscribe()
    }

    /// Returns a snapshot of the session metrics.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SmtpConfig {
        &self.config
    }

    /// Returns the session error if the session stopped with `handle` still
    /// pending and no reconnect scheduled.
    ///
    /// Notices published in the same driver step as `notice` are already
    /// queued once the status reply arrives; the last of them is the cause.
    async fn stalled(
        &self,
        handle: &ReplyHandle,
        notice: Option<SmtpError>,
        notices: &mut broadcast::Receiver<SmtpError>,
    ) -> SmtpResult<Option<SmtpError>> {
        let status = self.status().await?;
        if status.state != SessionState::Disconnected || handle.is_resolved() {
            return Ok(None);
        }

        let mut cause = notice;
        loop {
            match notices.try_recv() {
                Ok(notice) => cause = Some(notice),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("Session stopped before the message was sent");

        Ok(Some(cause.unwrap_or_else(|| {
            SmtpError::transport("Session stopped before the message was sent")
        })))
    }

    fn dispatch(&self, command: ClientCommand) -> SmtpResult<()> {
        self.commands
            .send(command)
            .map_err(|_| SmtpError::transport("Session driver has stopped"))
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> ClientCommand,
    ) -> SmtpResult<T> {
        let (tx, rx) = oneshot::channel();
        self.dispatch(make(tx))?;
        rx.await
            .map_err(|_| SmtpError::transport("Session driver has stopped"))
    }
}

/// Builder for [`SmtpClient`].
#[derive(Debug, Default)]
pub struct SmtpClientBuilder {
    config: Option<SmtpConfig>,
    connector: Option<Arc<dyn TransportConnector>>,
    metrics: Option<Arc<SmtpMetrics>>,
    notice_capacity: Option<usize>,
}

impl SmtpClientBuilder {
    /// Sets the configuration.
    pub fn config(mut self, config: SmtpConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Sets the connector; defaults to [`TcpConnector`].
    pub fn connector(mut self, connector: impl TransportConnector + 'static) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Shares a metrics collector.
    pub fn metrics(mut self, metrics: Arc<SmtpMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Sets how many notices a lagging subscriber may miss.
    pub fn notice_capacity(mut self, capacity: usize) -> Self {
        self.notice_capacity = Some(capacity);
        self
    }

    /// Validates the configuration and spawns the session driver.
    pub fn build(self) -> SmtpResult<SmtpClient> {
        let config = self
            .config
            .ok_or_else(|| SmtpError::configuration("Configuration is required"))?;
        config.validate()?;

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            SmtpError::configuration("SmtpClient must be created within a Tokio runtime")
                .with_cause(e)
        })?;

        let config = Arc::new(config);
        let metrics = self.metrics.unwrap_or_default();
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(TcpConnector) as Arc<dyn TransportConnector>);
        let capacity = self
            .notice_capacity
            .unwrap_or(DEFAULT_NOTICE_CAPACITY)
            .max(1);

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (notice_tx, _) = broadcast::channel(capacity);

        let driver = SessionDriver {
            engine: SessionEngine::with_metrics(config.clone(), metrics.clone()),
            config: config.clone(),
            connector,
            transport: None,
            commands: command_rx,
            notices: notice_tx.clone(),
            deadline: None,
            shutdown_waiters: Vec::new(),
        };
        runtime.spawn(driver.run());

        #[cfg(feature = "tracing")]
        tracing::info!(address = %config.address(), mode = ?config.mode, "SMTP client started");

        Ok(SmtpClient {
            config,
            commands: command_tx,
            notices: notice_tx,
            metrics,
        })
    }
}

enum Step {
    Command(Option<ClientCommand>),
    Read(SmtpResult<Vec<u8>>),
}

/// Owns the engine and the transport; runs until every client handle is gone.
struct SessionDriver {
    engine: SessionEngine,
    config: Arc<SmtpConfig>,
    connector: Arc<dyn TransportConnector>,
    transport: Option<Box<dyn SmtpTransport>>,
    commands: mpsc::UnboundedReceiver<ClientCommand>,
    notices: broadcast::Sender<SmtpError>,
    deadline: Option<Instant>,
    shutdown_waiters: Vec<oneshot::Sender<()>>,
}

impl SessionDriver {
    async fn run(mut self) {
        loop {
            self.settle().await;

            let step = tokio::select! {
                command = self.commands.recv() => Step::Command(command),
                read = read_from(self.transport.as_mut(), self.deadline, self.config.response_timeout) => Step::Read(read),
            };

            match step {
                Step::Command(Some(command)) => self.apply(command),
                Step::Command(None) => break,
                Step::Read(Ok(bytes)) if bytes.is_empty() => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Server closed the connection");
                    self.close_transport().await;
                }
                Step::Read(Ok(bytes)) => {
                    self.deadline = None;
                    self.engine.handle_event(TransportEvent::DataAvailable(bytes));
                }
                Step::Read(Err(error)) => self.fail_transport(error).await,
            }
        }

        self.engine.shutdown();
        self.settle().await;
        if let Some(mut transport) = self.transport.take() {
            let _ = transport.close().await;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("SMTP session driver stopped");
    }

    /// Performs pending actions until the engine is quiet.
    async fn settle(&mut self) {
        while let Some(action) = self.engine.poll_action() {
            match action {
                SessionAction::Connect { implicit_tls } => self.connect(implicit_tls).await,
                SessionAction::Write(bytes) => self.write(&bytes).await,
                SessionAction::StartTls => self.start_tls().await,
                SessionAction::Disconnect => self.close_transport().await,
            }
        }

        while let Some(notice) = self.engine.poll_notice() {
            // No subscribers is not an error.
            let _ = self.notices.send(notice);
        }

        if self.engine.is_awaiting_response() {
            if self.deadline.is_none() {
                self.deadline = Some(Instant::now() + self.config.response_timeout);
            }
        } else {
            self.deadline = None;
        }

        if self.engine.state() == SessionState::Disconnected {
            for waiter in self.shutdown_waiters.drain(..) {
                let _ = waiter.send(());
            }
        }
    }

    fn apply(&mut self, command: ClientCommand) {
        match command {
            ClientCommand::Submit(message, reply) => self.engine.enqueue(message, reply),
            ClientCommand::Connect => self.engine.connect_to_server(),
            ClientCommand::Reset(tx) => {
                let _ = tx.send(self.engine.command_reset());
            }
            ClientCommand::Noop(tx) => {
                let _ = tx.send(self.engine.command_noop());
            }
            ClientCommand::Quit(tx) => {
                let _ = tx.send(self.engine.command_quit());
            }
            ClientCommand::Shutdown(tx) => {
                self.engine.shutdown();
                self.shutdown_waiters.push(tx);
            }
            ClientCommand::Status(tx) => {
                let _ = tx.send(SessionStatus {
                    state: self.engine.state(),
                    queue_size: self.engine.queue_size(),
                    encrypted: self.engine.is_encrypted(),
                    capabilities: self.engine.capabilities().clone(),
                });
            }
        }
    }

    async fn connect(&mut self, implicit_tls: bool) {
        let limit = self.config.connect_timeout;
        let result = timeout(limit, self.connector.connect(&self.config, implicit_tls)).await;

        match result {
            Ok(Ok(transport)) => {
                self.transport = Some(transport);
                self.engine.handle_event(TransportEvent::Connected);
            }
            Ok(Err(error)) => self.fail_transport(error).await,
            Err(_) => {
                self.fail_transport(SmtpError::timeout(
                    SmtpErrorKind::ConnectionTimeout,
                    format!(
                        "No connection to {} within {}",
                        self.config.address(),
                        humantime::format_duration(limit)
                    ),
                ))
                .await
            }
        }
    }

    async fn write(&mut self, bytes: &[u8]) {
        let limit = self.config.send_timeout;
        let Some(transport) = self.transport.as_mut() else {
            self.fail_transport(SmtpError::transport("Not connected")).await;
            return;
        };

        match timeout(limit, transport.write_all(bytes)).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => self.fail_transport(error).await,
            Err(_) => {
                self.fail_transport(SmtpError::timeout(
                    SmtpErrorKind::SendDataTimeout,
                    format!("Write not completed within {}", humantime::format_duration(limit)),
                ))
                .await
            }
        }
    }

    async fn start_tls(&mut self) {
        let limit = self.config.connect_timeout;
        let Some(transport) = self.transport.as_mut() else {
            self.fail_transport(SmtpError::transport("Not connected")).await;
            return;
        };

        let upgrade = transport.upgrade_tls(&self.config.host, &self.config.tls);
        match timeout(limit, upgrade).await {
            Ok(Ok(())) => self.engine.handle_event(TransportEvent::TlsEstablished),
            Ok(Err(error)) => self.fail_transport(error).await,
            Err(_) => {
                self.fail_transport(SmtpError::timeout(
                    SmtpErrorKind::ConnectionTimeout,
                    format!(
                        "TLS handshake not completed within {}",
                        humantime::format_duration(limit)
                    ),
                ))
                .await
            }
        }
    }

    /// Reports `error`, then the disconnect it implies.
    async fn fail_transport(&mut self, error: SmtpError) {
        if let Some(mut transport) = self.transport.take() {
            let _ = transport.close().await;
        }
        self.engine.handle_event(TransportEvent::Error(error));
        self.engine.handle_event(TransportEvent::Disconnected);
    }

    async fn close_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(_error) = transport.close().await {
                #[cfg(feature = "tracing")]
                tracing::debug!(error = %_error, "Error while closing connection");
            }
        }
        self.engine.handle_event(TransportEvent::Disconnected);
    }
}

/// Reads from the transport, failing once `deadline` passes.
///
/// Never completes without a transport.
async fn read_from(
    transport: Option<&mut Box<dyn SmtpTransport>>,
    deadline: Option<Instant>,
    limit: Duration,
) -> SmtpResult<Vec<u8>> {
    let Some(transport) = transport else {
        return std::future::pending().await;
    };

    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let n = match deadline {
        Some(deadline) => timeout_at(deadline, transport.read(&mut buf))
            .await
            .map_err(|_| {
                SmtpError::timeout(
                    SmtpErrorKind::ResponseTimeout,
                    format!("No reply within {}", humantime::format_duration(limit)),
                )
            })??,
        None => transport.read(&mut buf).await?,
    };
    buf.truncate(n);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthMethod;
    use crate::config::ConnectionMode;
    use crate::mocks::{test_config, test_message, MockServer};

    fn client(server: &MockServer, config: SmtpConfig) -> SmtpClient {
        SmtpClient::builder()
            .config(config)
            .connector(server.connector())
            .build()
            .unwrap()
    }

    async fn next_notice(rx: &mut broadcast::Receiver<SmtpError>) -> SmtpError {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no notice")
            .unwrap()
    }

    async fn wait_for_state(client: &SmtpClient, state: SessionState) {
        for _ in 0..200 {
            if client.status().await.unwrap().state == state {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("session never reached {:?}", state);
    }

    #[tokio::test]
    async fn test_send_and_wait() {
        let server = MockServer::new();
        let client = client(&server, test_config());

        let outcome = client
            .send(test_message("a@test", "b@test"))
            .await
            .unwrap();
        assert!(!outcome.is_error);
        assert_eq!(outcome.response_code, 250);
        assert_eq!(outcome.response_text, "2.0.0 queued as 1");

        let messages = server.messages();
        assert_eq!(messages.len(), 1);
        assert!(String::from_utf8_lossy(&messages[0]).contains("Subject: Test\r\n"));
        assert!(server.commands().contains(&"EHLO x".to_string()));
        assert_eq!(client.metrics().messages_sent, 1);
    }

    #[tokio::test]
    async fn test_rejected_recipient() {
        let server = MockServer::new().rejecting_recipient("nobody@test");
        let client = client(&server, test_config());
        let mut notices = client.notifications();

        let outcome = client
            .send(test_message("a@test", "nobody@test"))
            .await
            .unwrap();
        assert!(outcome.is_error);
        assert_eq!(outcome.response_code, 550);
        assert_eq!(next_notice(&mut notices).await.kind(), SmtpErrorKind::ClientError);

        let outcome = client
            .send(test_message("a@test", "b@test"))
            .await
            .unwrap();
        assert!(!outcome.is_error);
        assert!(server.commands().contains(&"RSET".to_string()));
        assert_eq!(server.connects(), 1);
    }

    #[tokio::test]
    async fn test_auth_failure_keeps_message_queued() {
        let server = MockServer::new().rejecting_auth();
        let mut config = test_config();
        config.username = Some("user".to_string());
        config.password = Some(secrecy::SecretString::new("pass".to_string()));
        config.auth_method = AuthMethod::Login;
        let client = client(&server, config);
        let mut notices = client.notifications();

        let handle = client.submit(test_message("a@test", "b@test")).unwrap();
        loop {
            if next_notice(&mut notices).await.kind() == SmtpErrorKind::AuthenticationFailed {
                break;
            }
        }
        wait_for_state(&client, SessionState::Disconnected).await;

        assert!(!handle.is_resolved());
        assert_eq!(client.queue_size().await.unwrap(), 1);
        assert!(!server.commands().iter().any(|c| c.starts_with("MAIL")));
        assert_eq!(client.metrics().auth_failed, 1);
    }

    #[tokio::test]
    async fn test_send_fails_on_rejected_credentials() {
        let server = MockServer::new().rejecting_auth();
        let mut config = test_config();
        config.username = Some("user".to_string());
        config.password = Some(secrecy::SecretString::new("pass".to_string()));
        config.auth_method = AuthMethod::Login;
        let client = client(&server, config);

        let err = tokio::time::timeout(
            Duration::from_secs(3),
            client.send(test_message("a@test", "b@test")),
        )
        .await
        .expect("send did not return")
        .unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::AuthenticationFailed);
        assert!(!server.commands().iter().any(|c| c.starts_with("MAIL")));

        // The failed message is withdrawn rather than retried later.
        client.connect_to_server().unwrap();
        assert_eq!(client.queue_size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_send_fails_on_refused_connection() {
        let server = MockServer::new().refusing_connections();
        let client = client(&server, test_config());

        let err = tokio::time::timeout(
            Duration::from_secs(3),
            client.send(test_message("a@test", "b@test")),
        )
        .await
        .expect("send did not return")
        .unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::ConnectionRefused);
    }

    #[tokio::test]
    async fn test_reconnects_after_hang_up() {
        let server = MockServer::new().hanging_up_on_data(1);
        let client = client(&server, test_config());

        let first = client.submit(test_message("a@test", "b@test")).unwrap();
        let second = client.submit(test_message("a@test", "c@test")).unwrap();

        let first = first.finished().await;
        assert!(first.is_error);
        assert_eq!(first.response_code, -1);

        let second = second.finished().await;
        assert!(!second.is_error);
        assert_eq!(server.connects(), 2);
        assert_eq!(client.metrics().reconnects, 1);
    }

    #[tokio::test]
    async fn test_response_timeout() {
        let server = MockServer::new().muted();
        let mut config = test_config();
        config.response_timeout = Duration::from_millis(50);
        let client = client(&server, config);
        let mut notices = client.notifications();

        client.connect_to_server().unwrap();
        let notice = next_notice(&mut notices).await;
        assert_eq!(notice.kind(), SmtpErrorKind::ResponseTimeout);
        wait_for_state(&client, SessionState::Disconnected).await;
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let server = MockServer::new().refusing_connections();
        let client = client(&server, test_config());
        let mut notices = client.notifications();

        let handle = client.submit(test_message("a@test", "b@test")).unwrap();
        assert_eq!(
            next_notice(&mut notices).await.kind(),
            SmtpErrorKind::ConnectionRefused
        );
        assert!(!handle.is_resolved());
        assert_eq!(client.metrics().connections_failed, 1);
    }

    #[tokio::test]
    async fn test_starttls() {
        let server = MockServer::new().with_starttls();
        let mut config = test_config();
        config.mode = ConnectionMode::StartTls;
        let client = client(&server, config);

        let outcome = client
            .send(test_message("a@test", "b@test"))
            .await
            .unwrap();
        assert!(!outcome.is_error);

        let status = client.status().await.unwrap();
        assert!(status.encrypted);
        assert!(!status.capabilities.starttls);
        let commands = server.commands();
        assert_eq!(commands.iter().filter(|c| *c == "EHLO x").count(), 2);
        assert!(commands.contains(&"STARTTLS".to_string()));
    }

    #[tokio::test]
    async fn test_noop_reset_quit() {
        let server = MockServer::new();
        let client = client(&server, test_config());
        assert!(client.noop().await.is_err());

        client.connect_to_server().unwrap();
        wait_for_state(&client, SessionState::Ready).await;
        client.noop().await.unwrap();
        wait_for_state(&client, SessionState::Ready).await;
        client.reset().await.unwrap();
        wait_for_state(&client, SessionState::Ready).await;

        client.quit().await.unwrap();
        wait_for_state(&client, SessionState::Disconnected).await;
        assert_eq!(
            server.commands(),
            vec!["EHLO x", "NOOP", "RSET", "QUIT"]
        );
    }

    #[tokio::test]
    async fn test_shutdown_fails_queue() {
        let server = MockServer::new().muted();
        let mut config = test_config();
        config.response_timeout = Duration::from_millis(50);
        let client = client(&server, config);

        let handle = client.submit(test_message("a@test", "b@test")).unwrap();
        client.shutdown().await.unwrap();

        assert!(handle.is_error());
        assert_eq!(handle.response_text(), "Session shut down");
        assert_eq!(client.status().await.unwrap().queue_size, 0);
    }

    #[tokio::test]
    async fn test_drop_resolves_pending() {
        let server = MockServer::new().muted();
        let client = client(&server, test_config());
        let handle = client.submit(test_message("a@test", "b@test")).unwrap();
        drop(client);

        let outcome = tokio::time::timeout(Duration::from_secs(2), handle.finished())
            .await
            .unwrap();
        assert!(outcome.is_error);
        assert_eq!(outcome.error_kind, Some(SmtpErrorKind::TransportError));
    }

    #[test]
    fn test_build_requires_runtime() {
        let err = SmtpClient::new(test_config()).unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::ConfigurationInvalid);
    }

    #[test]
    fn test_build_requires_config() {
        let err = SmtpClient::builder().build().unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::ConfigurationInvalid);
    }
}
