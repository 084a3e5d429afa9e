//! Per-message delivery results.
//!
//! [`ReplyHandle`] is returned to the caller on submission and owns the
//! shared result cell. The session keeps only a [`ReplyRef`], a weak
//! reference that is upgraded on every access; dropping the handle detaches
//! the result without touching the wire exchange.

use std::sync::{Arc, Mutex, Weak};
use tokio::sync::Notify;

use crate::errors::{SmtpError, SmtpErrorKind};

/// Response code recorded for failures with no server reply.
pub const NO_RESPONSE_CODE: i32 = -1;

/// Final result of one submitted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyOutcome {
    /// True unless the server accepted the message.
    pub is_error: bool,
    /// SMTP reply code, or -1 when the failure was not a server reply.
    pub response_code: i32,
    /// Reply text or error description.
    pub response_text: String,
    /// Error classification for failures that were not a plain reply.
    pub error_kind: Option<SmtpErrorKind>,
}

impl ReplyOutcome {
    /// Outcome from a server reply; anything but 250 is an error.
    pub fn from_reply(code: u16, text: impl Into<String>) -> Self {
        Self {
            is_error: code != 250,
            response_code: i32::from(code),
            response_text: text.into(),
            error_kind: None,
        }
    }

    /// Outcome for a reply that broke off the transaction.
    pub fn rejected(code: u16, text: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::from_reply(code, text)
        }
    }

    /// Outcome from a local or transport failure.
    pub fn from_error(error: &SmtpError) -> Self {
        Self {
            is_error: true,
            response_code: NO_RESPONSE_CODE,
            response_text: error.message().to_string(),
            error_kind: Some(error.kind()),
        }
    }
}

#[derive(Debug, Default)]
struct ReplyShared {
    outcome: Mutex<Option<ReplyOutcome>>,
    notify: Notify,
}

impl ReplyShared {
    fn get(&self) -> Option<ReplyOutcome> {
        match self.outcome.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Caller-owned handle to the result of a submitted message.
#[derive(Debug)]
pub struct ReplyHandle {
    shared: Arc<ReplyShared>,
}

impl ReplyHandle {
    /// Creates an unresolved handle and the session-side reference to it.
    pub fn new() -> (Self, ReplyRef) {
        let shared = Arc::new(ReplyShared::default());
        let weak = Arc::downgrade(&shared);
        (Self { shared }, ReplyRef { shared: weak })
    }

    /// Returns true once the message has a final result.
    pub fn is_resolved(&self) -> bool {
        self.shared.get().is_some()
    }

    /// Returns true if resolved with an error.
    pub fn is_error(&self) -> bool {
        self.shared.get().map(|o| o.is_error).unwrap_or(false)
    }

    /// Returns the response code, 0 while unresolved.
    pub fn response_code(&self) -> i32 {
        self.shared.get().map(|o| o.response_code).unwrap_or(0)
    }

    /// Returns the response text, empty while unresolved.
    pub fn response_text(&self) -> String {
        self.shared.get().map(|o| o.response_text).unwrap_or_default()
    }

    /// Returns the outcome if resolved.
    pub fn outcome(&self) -> Option<ReplyOutcome> {
        self.shared.get()
    }

    /// Waits until the message is resolved.
    pub async fn finished(&self) -> ReplyOutcome {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a resolve in between is not lost.
            notified.as_mut().enable();

            if let Some(outcome) = self.shared.get() {
                return outcome;
            }
            notified.await;
        }
    }
}

/// Non-owning reference held by the session.
#[derive(Debug, Clone)]
pub struct ReplyRef {
    shared: Weak<ReplyShared>,
}

impl ReplyRef {
    /// Returns true while the caller still holds the handle.
    pub fn is_alive(&self) -> bool {
        self.shared.strong_count() > 0
    }

    /// Stores the outcome and wakes waiters.
    ///
    /// Returns false when the handle is gone or already resolved.
    pub fn resolve(&self, outcome: ReplyOutcome) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };

        {
            let mut guard = match shared.outcome.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if guard.is_some() {
                return false;
            }
            *guard = Some(outcome);
        }

        shared.notify.notify_waiters();
        true
    }
}
