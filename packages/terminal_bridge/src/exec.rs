use async_trait::async_trait;

use crate::bridge::TerminalBridge;
use crate::error::StreamError;
use crate::protocol::AttachRequest;

/// Container and command an exec stream is opened against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecTarget {
    pub namespace: String,
    pub pod: String,
    /// `None` lets the cluster pick the pod's default container.
    pub container: Option<String>,
    pub command: Vec<String>,
}

impl ExecTarget {
    pub fn new(request: &AttachRequest, command: &[String]) -> Self {
        Self {
            namespace: request.namespace.clone(),
            pod: request.pod.clone(),
            container: (!request.container.is_empty()).then(|| request.container.clone()),
            command: command.to_vec(),
        }
    }
}

impl std::fmt::Display for ExecTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.container {
            Some(container) => write!(f, "{}/{}/{}", self.namespace, self.pod, container),
            None => write!(f, "{}/{}", self.namespace, self.pod),
        }
    }
}

/// Opens an interactive exec stream and relays it through a [`TerminalBridge`].
///
/// `stream` returns once the remote process ends (`Ok`), or when the exec
/// connection or the bridge fails. The bridge is owned by the stream and
/// dropped when it returns.
#[async_trait]
pub trait ExecBackend: Send + Sync + 'static {
    type Client: Send + Sync;

    async fn stream(
        &self,
        client: &Self::Client,
        target: &ExecTarget,
        bridge: TerminalBridge,
    ) -> Result<(), StreamError>;
}
