//! Terminal Bridge - relay an interactive container shell to a remote session
//!
//! This crate drives one terminal session end-to-end: it decodes the `bind`
//! handshake, resolves a cached execution client for the requested cluster,
//! starts an exec stream against the target container and relays stdin,
//! stdout and resize events until either side terminates.
//!
//! It has no HTTP or cluster-API dependencies. The session transport is
//! abstracted by [`SessionReceiver`] / [`SessionSender`], client construction
//! by [`ClientFactory`], and the exec stream by [`ExecBackend`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use terminal_bridge::{ClientCache, SessionConfig, SessionOrchestrator};
//! # use terminal_bridge::{ClientFactory, ClientError, ExecBackend, ExecTarget, StreamError, TerminalBridge};
//! # use terminal_bridge::{SessionReceiver, SessionSender};
//! # #[derive(Clone)] struct Client;
//! # struct Factory;
//! # #[async_trait::async_trait]
//! # impl ClientFactory for Factory {
//! #     type Client = Client;
//! #     async fn create_client(&self, _: &str) -> Result<Client, ClientError> { Ok(Client) }
//! # }
//! # struct Backend;
//! # #[async_trait::async_trait]
//! # impl ExecBackend for Backend {
//! #     type Client = Client;
//! #     async fn stream(&self, _: &Client, _: &ExecTarget, _: TerminalBridge) -> Result<(), StreamError> { Ok(()) }
//! # }
//! # async fn example(receiver: impl SessionReceiver, sender: impl SessionSender) {
//! let cache = Arc::new(ClientCache::new(Factory));
//! let orchestrator = SessionOrchestrator::new(cache, Backend, SessionConfig::default());
//!
//! let shutdown = tokio_util::sync::CancellationToken::new();
//! let outcome = orchestrator.run_session(receiver, sender, &shutdown).await;
//! # let _ = outcome;
//! # }
//! ```

pub mod bridge;
mod cache;
mod error;
mod exec;
mod handshake;
mod orchestrator;
pub mod protocol;
mod transport;
mod utf8;

#[cfg(test)]
mod test_helpers;

pub use bridge::{
    BridgeConfig, BridgeInlet, BridgeOutlet, ResizeQueue, StdinReader, StdoutWriter,
    TerminalBridge, TerminalOutput, TerminalSizeSource, terminal_bridge,
};
pub use cache::{ClientCache, ClientFactory};
pub use error::{ClientError, HandshakeError, SessionError, StreamError};
pub use exec::{ExecBackend, ExecTarget};
pub use handshake::{decode_handshake, receive_handshake};
pub use orchestrator::{SessionConfig, SessionOrchestrator};
pub use protocol::{AttachRequest, ClientFrame, ResizeEvent, ServerFrame};
pub use transport::{
    CloseStatus, PROCESS_EXITED, SessionReceiver, SessionSender, TransportError,
};
