//! Session transport seam
//!
//! A session is a bidirectional channel of text frames between the relay and
//! one remote client. The receiving and sending halves are driven
//! concurrently, so they are separate traits.

use async_trait::async_trait;

/// Close reason sent when the remote process ends cleanly.
pub const PROCESS_EXITED: &str = "Process exited";

/// How a session ended, as seen by the remote client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseStatus {
    /// The remote process exited.
    Normal,
    /// Handshake, client resolution or relay failure.
    Error,
}

impl CloseStatus {
    /// Session-level close code.
    pub const fn code(self) -> u16 {
        match self {
            CloseStatus::Normal => 1,
            CloseStatus::Error => 2,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(message: impl ToString) -> Self {
        Self(message.to_string())
    }
}

/// Inbound half of a session.
#[async_trait]
pub trait SessionReceiver: Send {
    /// Next text frame from the client, or `None` once the client has gone.
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;
}

/// Outbound half of a session.
#[async_trait]
pub trait SessionSender: Send {
    async fn send(&mut self, frame: String) -> Result<(), TransportError>;

    /// Close the session with a status and a human-readable reason.
    async fn close(&mut self, status: CloseStatus, reason: &str) -> Result<(), TransportError>;
}
