//! Session Orchestrator
//!
//! Drives one session through `AwaitingHandshake -> Attaching -> Streaming ->
//! Closed`. Every path ends in exactly one `close` on the session sender.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bridge::{BridgeConfig, relay_inbound, relay_outbound, terminal_bridge};
use crate::cache::{ClientCache, ClientFactory};
use crate::error::{SessionError, StreamError};
use crate::exec::{ExecBackend, ExecTarget};
use crate::handshake::receive_handshake;
use crate::transport::{CloseStatus, PROCESS_EXITED, SessionReceiver, SessionSender};

/// Per-session settings shared by every session of a relay.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Command started in the target container.
    pub command: Vec<String>,
    pub bridge: BridgeConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command: vec!["/bin/sh".to_string()],
            bridge: BridgeConfig::default(),
        }
    }
}

pub struct SessionOrchestrator<F: ClientFactory, B> {
    cache: Arc<ClientCache<F>>,
    backend: B,
    config: SessionConfig,
}

impl<F, B> SessionOrchestrator<F, B>
where
    F: ClientFactory,
    B: ExecBackend<Client = F::Client>,
{
    pub fn new(cache: Arc<ClientCache<F>>, backend: B, config: SessionConfig) -> Self {
        Self {
            cache,
            backend,
            config,
        }
    }

    pub fn cache(&self) -> &Arc<ClientCache<F>> {
        &self.cache
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Run a session to completion and close it.
    ///
    /// The session closes with [`CloseStatus::Normal`] and "Process exited"
    /// when the remote process ends, and with [`CloseStatus::Error`] and the
    /// error text otherwise. Cancelling `shutdown` force-closes the session.
    pub async fn run_session<R, S>(
        &self,
        mut receiver: R,
        mut sender: S,
        shutdown: &CancellationToken,
    ) -> Result<(), SessionError>
    where
        R: SessionReceiver,
        S: SessionSender,
    {
        let outcome = tokio::select! {
            biased;
            _ = shutdown.cancelled() => Err(SessionError::Shutdown),
            outcome = self.drive(&mut receiver, &mut sender) => outcome,
        };

        let (status, reason) = match &outcome {
            Ok(()) => {
                info!("Terminal session ended, process exited");
                (CloseStatus::Normal, PROCESS_EXITED.to_string())
            }
            Err(SessionError::Stream(StreamError::ClientClosed)) => {
                info!("Terminal session closed by client");
                (CloseStatus::Error, StreamError::ClientClosed.to_string())
            }
            Err(e) => {
                warn!(kind = e.kind(), error = %e, "Terminal session failed");
                (CloseStatus::Error, e.to_string())
            }
        };

        if let Err(e) = sender.close(status, &reason).await {
            debug!(error = %e, "Failed to close session");
        }

        outcome
    }

    async fn drive<R, S>(&self, receiver: &mut R, sender: &mut S) -> Result<(), SessionError>
    where
        R: SessionReceiver,
        S: SessionSender,
    {
        let request = receive_handshake(receiver).await?;
        info!(
            cluster = %request.cluster,
            namespace = %request.namespace,
            pod = %request.pod,
            container = %request.container,
            "Attaching terminal session"
        );

        let client = self.cache.get_client(&request.cluster).await?;
        let target = ExecTarget::new(&request, &self.config.command);
        let (bridge, mut inlet, mut outlet) = terminal_bridge(&self.config.bridge);

        debug!(exec = %target, command = ?target.command, "Starting exec stream");
        let stream = self.backend.stream(&client, &target, bridge);
        let inbound = relay_inbound(receiver, &mut inlet);
        let outbound = relay_outbound(sender, &mut outlet, self.config.bridge.write_timeout);
        tokio::pin!(stream, inbound, outbound);

        let mut output_drained = false;
        let result = loop {
            tokio::select! {
                biased;
                res = &mut stream => break res.map_err(SessionError::from),
                res = &mut outbound, if !output_drained => match res {
                    Ok(()) => output_drained = true,
                    Err(e) => break Err(e.into()),
                },
                err = &mut inbound => break Err(err),
            }
        };
        result?;

        // The bridge went away with the stream; deliver what it queued.
        if !output_drained {
            outbound.await?;
        }
        Ok(())
    }
}
