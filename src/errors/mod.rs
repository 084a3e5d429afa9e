//! Error types for the SMTP session engine.
//!
//! Errors are split the same way the session reports them:
//! - session-level failures (connect, TLS, greeting, authentication) travel
//!   on the client's notification channel;
//! - per-message failures resolve only the affected [`crate::ReplyHandle`].

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Result type for SMTP operations.
pub type SmtpResult<T> = Result<T, SmtpError>;

/// SMTP error kinds categorizing different failure modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SmtpErrorKind {
    // Connection errors
    /// Connection was refused or could not be opened.
    ConnectionRefused,
    /// Opening the connection (or its TLS handshake) timed out.
    ConnectionTimeout,
    /// The server did not answer within the response timeout.
    ResponseTimeout,
    /// Writing to the socket did not finish within the send timeout.
    SendDataTimeout,
    /// Socket-level failure on an established connection.
    TransportError,

    // TLS errors
    /// TLS handshake failed.
    TlsHandshakeFailed,

    // Authentication errors
    /// The server rejected an authentication step.
    AuthenticationFailed,

    // Protocol errors
    /// Transient negative reply (4xx).
    ServerError,
    /// Permanent negative reply (5xx).
    ClientError,
    /// Unexpected code for the current state, or a malformed reply line.
    ProtocolViolation,

    // Message errors
    /// Reading an attachment source failed while serializing.
    SerializationError,
    /// Address is empty or contains forbidden characters.
    InvalidAddress,
    /// Header name or value would break the header block.
    InvalidHeader,

    // Configuration errors
    /// Configuration is invalid.
    ConfigurationInvalid,
}

impl SmtpErrorKind {
    /// Returns true if resubmitting after this error can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SmtpErrorKind::ConnectionRefused
                | SmtpErrorKind::ConnectionTimeout
                | SmtpErrorKind::ResponseTimeout
                | SmtpErrorKind::SendDataTimeout
                | SmtpErrorKind::TransportError
                | SmtpErrorKind::ServerError
        )
    }

    /// Returns true for failures that concern the whole session rather than a
    /// single message.
    pub fn is_session_level(&self) -> bool {
        matches!(
            self,
            SmtpErrorKind::ConnectionRefused
                | SmtpErrorKind::ConnectionTimeout
                | SmtpErrorKind::TlsHandshakeFailed
                | SmtpErrorKind::AuthenticationFailed
                | SmtpErrorKind::ConfigurationInvalid
        )
    }
}

impl fmt::Display for SmtpErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SmtpErrorKind::ConnectionRefused => write!(f, "Connection refused"),
            SmtpErrorKind::ConnectionTimeout => write!(f, "Connection timed out"),
            SmtpErrorKind::ResponseTimeout => write!(f, "Response timed out"),
            SmtpErrorKind::SendDataTimeout => write!(f, "Send timed out"),
            SmtpErrorKind::TransportError => write!(f, "Transport error"),
            SmtpErrorKind::TlsHandshakeFailed => write!(f, "TLS handshake failed"),
            SmtpErrorKind::AuthenticationFailed => write!(f, "Authentication failed"),
            SmtpErrorKind::ServerError => write!(f, "Server error"),
            SmtpErrorKind::ClientError => write!(f, "Client error"),
            SmtpErrorKind::ProtocolViolation => write!(f, "Protocol violation"),
            SmtpErrorKind::SerializationError => write!(f, "Serialization error"),
            SmtpErrorKind::InvalidAddress => write!(f, "Invalid address"),
            SmtpErrorKind::InvalidHeader => write!(f, "Invalid header"),
            SmtpErrorKind::ConfigurationInvalid => write!(f, "Invalid configuration"),
        }
    }
}

/// Enhanced SMTP status code (RFC 3463).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhancedStatusCode {
    /// Class (2=success, 4=temporary, 5=permanent).
    pub class: u8,
    /// Subject (e.g., 1=addressing, 2=mailbox, 3=mail system).
    pub subject: u16,
    /// Detail code.
    pub detail: u16,
}

impl EnhancedStatusCode {
    /// Creates a new enhanced status code.
    pub fn new(class: u8, subject: u16, detail: u16) -> Self {
        Self { class, subject, detail }
    }

    /// Parses an enhanced status code from a string (e.g., "5.1.1").
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split('.');
        let class = parts.next()?.parse().ok()?;
        let subject = parts.next()?.parse().ok()?;
        let detail = parts.next()?.parse().ok()?;
        if parts.next().is_some() || !(2..=5).contains(&class) {
            return None;
        }
        Some(Self { class, subject, detail })
    }

    /// Parses the enhanced code a reply text starts with, if any.
    pub fn from_reply_text(text: &str) -> Option<Self> {
        text.split_whitespace().next().and_then(Self::parse)
    }

    /// Returns true if this is a temporary failure.
    pub fn is_temporary(&self) -> bool {
        self.class == 4
    }

    /// Returns true if this is a permanent failure.
    pub fn is_permanent(&self) -> bool {
        self.class == 5
    }
}

impl fmt::Display for EnhancedStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.class, self.subject, self.detail)
    }
}

/// SMTP error with detailed information.
#[derive(Error, Debug, Clone)]
pub struct SmtpError {
    /// Error kind.
    kind: SmtpErrorKind,
    /// Human-readable message.
    message: String,
    /// SMTP reply code if available.
    smtp_code: Option<u16>,
    /// Enhanced status code if available.
    enhanced_code: Option<EnhancedStatusCode>,
    /// Underlying cause.
    #[source]
    cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl SmtpError {
    /// Creates a new SMTP error.
    pub fn new(kind: SmtpErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            smtp_code: None,
            enhanced_code: None,
            cause: None,
        }
    }

    /// Sets the SMTP reply code.
    pub fn with_smtp_code(mut self, code: u16) -> Self {
        self.smtp_code = Some(code);
        self
    }

    /// Sets the enhanced status code.
    pub fn with_enhanced_code(mut self, code: EnhancedStatusCode) -> Self {
        self.enhanced_code = Some(code);
        self
    }

    /// Sets the underlying cause.
    pub fn with_cause<E: std::error::Error + Send + Sync + 'static>(mut self, cause: E) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// Returns the error kind.
    pub fn kind(&self) -> SmtpErrorKind {
        self.kind
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the SMTP reply code if available.
    pub fn smtp_code(&self) -> Option<u16> {
        self.smtp_code
    }

    /// Returns the enhanced status code if available.
    pub fn enhanced_code(&self) -> Option<&EnhancedStatusCode> {
        self.enhanced_code.as_ref()
    }

    /// Returns true if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        if let Some(code) = self.smtp_code {
            return (400..500).contains(&code);
        }
        self.kind.is_retryable()
    }

    // Convenience constructors

    /// Creates a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::ConnectionRefused, message)
    }

    /// Creates a timeout error.
    pub fn timeout(kind: SmtpErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message)
    }

    /// Creates a TLS error.
    pub fn tls(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::TlsHandshakeFailed, message)
    }

    /// Creates an authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::AuthenticationFailed, message)
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::ProtocolViolation, message)
    }

    /// Creates a socket-level transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::TransportError, message)
    }

    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::SerializationError, message)
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(SmtpErrorKind::ConfigurationInvalid, message)
    }

    /// Creates an error from a negative server reply.
    ///
    /// 4xx maps to [`SmtpErrorKind::ServerError`], 5xx to
    /// [`SmtpErrorKind::ClientError`], anything else is a protocol violation.
    pub fn from_reply(code: u16, text: impl Into<String>) -> Self {
        let text = text.into();
        let kind = match code / 100 {
            4 => SmtpErrorKind::ServerError,
            5 => SmtpErrorKind::ClientError,
            _ => SmtpErrorKind::ProtocolViolation,
        };
        let mut error = Self::new(kind, text).with_smtp_code(code);
        error.enhanced_code = EnhancedStatusCode::from_reply_text(&error.message);
        error
    }
}

impl fmt::Display for SmtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(code) = self.smtp_code {
            write!(f, " (SMTP {})", code)?;
        }
        if let Some(enhanced) = &self.enhanced_code {
            write!(f, " [{}]", enhanced)?;
        }
        Ok(())
    }
}

impl From<std::io::Error> for SmtpError {
    fn from(err: std::io::Error) -> Self {
        SmtpError::transport(err.to_string()).with_cause(err)
    }
}
