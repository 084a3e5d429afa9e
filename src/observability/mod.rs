//! Metrics for SMTP sessions.
//!
//! Counters are plain atomics shared between the session driver and the
//! caller. Logging goes through `tracing` behind the `tracing` feature.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// SMTP metrics collector.
#[derive(Debug, Default)]
pub struct SmtpMetrics {
    /// Messages accepted by the server.
    pub messages_sent: AtomicU64,
    /// Messages resolved with an error.
    pub messages_failed: AtomicU64,
    /// Total connection attempts.
    pub connection_attempts: AtomicU64,
    /// Successful connections.
    pub connections_successful: AtomicU64,
    /// Failed connections.
    pub connections_failed: AtomicU64,
    /// Total authentication attempts.
    pub auth_attempts: AtomicU64,
    /// Successful authentications.
    pub auth_successful: AtomicU64,
    /// Failed authentications.
    pub auth_failed: AtomicU64,
    /// STARTTLS upgrades completed.
    pub tls_upgrades: AtomicU64,
    /// Automatic reconnects for a non-empty queue.
    pub reconnects: AtomicU64,
    /// Sum of per-message latencies in milliseconds.
    pub latency_ms_total: AtomicU64,
}

impl SmtpMetrics {
    /// Creates a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a resolved message and how long its transaction took.
    pub fn record_message(&self, success: bool, latency: Duration) {
        if success {
            self.messages_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.messages_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.latency_ms_total
            .fetch_add(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Records a message that failed before any transaction started.
    pub fn record_message_failure(&self) {
        self.messages_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a started connection attempt.
    pub fn record_connection_started(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Records the result of a connection attempt.
    pub fn record_connection_result(&self, success: bool) {
        if success {
            self.connections_successful.fetch_add(1, Ordering::Relaxed);
        } else {
            self.connections_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records an authentication attempt.
    pub fn record_auth_attempt(&self, success: bool) {
        self.auth_attempts.fetch_add(1, Ordering::Relaxed);
        if success {
            self.auth_successful.fetch_add(1, Ordering::Relaxed);
        } else {
            self.auth_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records a TLS upgrade.
    pub fn record_tls_upgrade(&self) {
        self.tls_upgrades.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an automatic reconnect.
    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_failed: self.messages_failed.load(Ordering::Relaxed),
            connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
            connections_successful: self.connections_successful.load(Ordering::Relaxed),
            connections_failed: self.connections_failed.load(Ordering::Relaxed),
            auth_attempts: self.auth_attempts.load(Ordering::Relaxed),
            auth_successful: self.auth_successful.load(Ordering::Relaxed),
            auth_failed: self.auth_failed.load(Ordering::Relaxed),
            tls_upgrades: self.tls_upgrades.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            latency_ms_total: self.latency_ms_total.load(Ordering::Relaxed),
        }
    }

    /// Resets all metrics.
    pub fn reset(&self) {
        for counter in [
            &self.messages_sent,
            &self.messages_failed,
            &self.connection_attempts,
            &self.connections_successful,
            &self.connections_failed,
            &self.auth_attempts,
            &self.auth_successful,
            &self.auth_failed,
            &self.tls_upgrades,
            &self.reconnects,
            &self.latency_ms_total,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Messages accepted by the server.
    pub messages_sent: u64,
    /// Messages resolved with an error.
    pub messages_failed: u64,
    /// Total connection attempts.
    pub connection_attempts: u64,
    /// Successful connections.
    pub connections_successful: u64,
    /// Failed connections.
    pub connections_failed: u64,
    /// Total authentication attempts.
    pub auth_attempts: u64,
    /// Successful authentications.
    pub auth_successful: u64,
    /// Failed authentications.
    pub auth_failed: u64,
    /// STARTTLS upgrades completed.
    pub tls_upgrades: u64,
    /// Automatic reconnects.
    pub reconnects: u64,
    /// Sum of per-message latencies in milliseconds.
    pub latency_ms_total: u64,
}

impl MetricsSnapshot {
    /// Returns the message success rate.
    pub fn success_rate(&self) -> f64 {
        let total = self.messages_sent + self.messages_failed;
        if total == 0 {
            1.0
        } else {
            self.messages_sent as f64 / total as f64
        }
    }

    /// Returns the connection success rate.
    pub fn connection_success_rate(&self) -> f64 {
        if self.connection_attempts == 0 {
            1.0
        } else {
            self.connections_successful as f64 / self.connection_attempts as f64
        }
    }

    /// Returns the authentication success rate.
    pub fn auth_success_rate(&self) -> f64 {
        if self.auth_attempts == 0 {
            1.0
        } else {
            self.auth_successful as f64 / self.auth_attempts as f64
        }
    }

    /// Returns the mean transaction latency, if any message completed.
    pub fn average_latency(&self) -> Option<Duration> {
        let total = self.messages_sent + self.messages_failed;
        if total == 0 {
            None
        } else {
            Some(Duration::from_millis(self.latency_ms_total / total))
        }
    }

    /// Formats the snapshot as JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Timer for measuring operation duration.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    name: String,
}

impl Timer {
    /// Creates and starts a new timer.
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the elapsed time.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stops the timer and returns the duration.
    pub fn stop(self) -> Duration {
        let elapsed = self.start.elapsed();

        #[cfg(feature = "tracing")]
        tracing::debug!(
            timer = %self.name,
            duration_ms = elapsed.as_millis(),
            "Timer stopped"
        );

        elapsed
    }
}
