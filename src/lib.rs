//! # SMTP Session Library
//!
//! An asynchronous outbound SMTP client built around a sans-IO session
//! state machine:
//! - One connection per session, with a FIFO queue of outgoing messages
//! - Command pipelining when the server advertises `PIPELINING`
//! - Transport security (STARTTLS, implicit TLS)
//! - PLAIN, LOGIN and CRAM-MD5 authentication
//! - MIME message trees with file-backed attachments, streamed on send
//! - Per-message reply handles and session-level error notifications
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use integrations_smtp_session::{EmailAddress, Message, SmtpClient, SmtpConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SmtpConfig::builder()
//!         .host("smtp.example.com")
//!         .port(587)
//!         .credentials("user@example.com", "password")
//!         .build()?;
//!
//!     let client = SmtpClient::new(config)?;
//!
//!     let message = Message::builder()
//!         .from(EmailAddress::with_name("sender@example.com", "Sender")?)
//!         .to(EmailAddress::new("recipient@example.com")?)
//!         .subject("Hello from Rust!")
//!         .text("This is a test email.")
//!         .build()?;
//!
//!     let outcome = client.send(message).await?;
//!     println!("{} {}", outcome.response_code, outcome.response_text);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod config;
pub mod errors;
pub mod types;

// Message construction
pub mod codec;
pub mod message;
pub mod mime;

// Protocol layer
pub mod auth;
pub mod protocol;

// Session
pub mod reply;
pub mod session;

// Transport layer
pub mod transport;

// Observability
pub mod observability;

// Client
pub mod client;

// Mocks for testing
pub mod mocks;

// Re-exports for convenience
pub use auth::{AuthMethod, Credentials};
pub use client::{SessionStatus, SmtpClient, SmtpClientBuilder};
pub use codec::HeaderEncoding;
pub use config::{ConnectionMode, PeerVerification, SmtpConfig, SmtpConfigBuilder, TlsConfig};
pub use errors::{EnhancedStatusCode, SmtpError, SmtpErrorKind, SmtpResult};
pub use message::{Message, MessageBuilder};
pub use mime::{MimePart, MultipartKind, TransferEncoding};
pub use observability::{MetricsSnapshot, SmtpMetrics};
pub use protocol::{EsmtpCapabilities, Reply, SmtpCommand};
pub use reply::{ReplyHandle, ReplyOutcome};
pub use session::{SessionAction, SessionEngine, SessionState, TransportEvent};
pub use transport::{SmtpTransport, TcpConnector, TransportConnector};
pub use types::EmailAddress;
