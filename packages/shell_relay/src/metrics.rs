//! Relay metrics for observability
//!
//! Session counters exposed on `/metrics` and summarized on `/health`.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use terminal_bridge::{SessionError, StreamError};

/// Relay-wide metrics
#[derive(Debug, Default)]
pub struct RelayMetrics {
    // Session metrics
    /// Currently running sessions
    pub active_sessions: AtomicU64,
    /// Sessions accepted since start
    pub sessions_opened: AtomicU64,
    /// Sessions whose process exited
    pub sessions_completed: AtomicU64,
    /// Sessions that ended because the client went away
    pub sessions_abandoned: AtomicU64,
    /// Sessions that closed with an error
    pub sessions_failed: AtomicU64,

    // Failure breakdown
    pub handshake_failures: AtomicU64,
    pub client_failures: AtomicU64,
    pub stream_failures: AtomicU64,
    /// Sessions force-closed by shutdown
    pub shutdown_closures: AtomicU64,

    /// Relay start time (for uptime calculation)
    start_time: Option<Instant>,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn session_opened(&self) {
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
    }

    /// Record how a session ended.
    pub fn session_closed(&self, outcome: &Result<(), SessionError>) {
        self.active_sessions.fetch_sub(1, Ordering::Relaxed);
        let counter = match outcome {
            Ok(()) => &self.sessions_completed,
            Err(SessionError::Stream(StreamError::ClientClosed)) => &self.sessions_abandoned,
            Err(e) => {
                self.sessions_failed.fetch_add(1, Ordering::Relaxed);
                match e {
                    SessionError::Handshake(_) => &self.handshake_failures,
                    SessionError::Client(_) => &self.client_failures,
                    SessionError::Stream(_) => &self.stream_failures,
                    SessionError::Shutdown => &self.shutdown_closures,
                }
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// Create a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            sessions: SessionMetrics {
                active: self.active_sessions.load(Ordering::Relaxed),
                opened: self.sessions_opened.load(Ordering::Relaxed),
                completed: self.sessions_completed.load(Ordering::Relaxed),
                abandoned: self.sessions_abandoned.load(Ordering::Relaxed),
                failed: self.sessions_failed.load(Ordering::Relaxed),
            },
            failures: FailureMetrics {
                handshake: self.handshake_failures.load(Ordering::Relaxed),
                client: self.client_failures.load(Ordering::Relaxed),
                stream: self.stream_failures.load(Ordering::Relaxed),
                shutdown: self.shutdown_closures.load(Ordering::Relaxed),
            },
        }
    }
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub sessions: SessionMetrics,
    pub failures: FailureMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub active: u64,
    pub opened: u64,
    pub completed: u64,
    pub abandoned: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureMetrics {
    pub handshake: u64,
    pub client: u64,
    pub stream: u64,
    pub shutdown: u64,
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub active_sessions: u64,
    /// Cluster identifiers with a constructed client ("" is the default cluster)
    pub cached_clusters: Vec<String>,
    pub uptime_secs: u64,
}
