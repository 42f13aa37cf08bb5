use std::time::Duration;

/// Longest excerpt of an offending frame quoted back in an error.
const EXCERPT_LEN: usize = 64;

/// The first message of a session could not be turned into an attach request.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("session closed before handshake")]
    Closed,

    #[error("can't receive handshake: {0}")]
    Receive(String),

    #[error("can't decode handshake ({reason}): {raw}")]
    MalformedHandshake { reason: String, raw: String },

    #[error("expected 'bind' message, got '{operation}'")]
    UnexpectedOperation { operation: String },

    #[error("session is already attached, unexpected 'bind' message")]
    AlreadyAttached,
}

impl HandshakeError {
    pub(crate) fn malformed(reason: impl ToString, raw: &str) -> Self {
        Self::MalformedHandshake {
            reason: reason.to_string(),
            raw: excerpt(raw),
        }
    }
}

/// Resolving or constructing the execution client for a cluster failed.
///
/// Never cached: the next attach for the same cluster retries from scratch.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    #[error("can't resolve credentials for cluster {}: {reason}", cluster_label(.cluster))]
    ConfigResolution { cluster: String, reason: String },

    #[error("can't construct client for cluster {}: {reason}", cluster_label(.cluster))]
    ClientConstruction { cluster: String, reason: String },
}

impl ClientError {
    pub fn config_resolution(cluster: &str, reason: impl ToString) -> Self {
        Self::ConfigResolution {
            cluster: cluster.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn client_construction(cluster: &str, reason: impl ToString) -> Self {
        Self::ClientConstruction {
            cluster: cluster.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Failure while relaying between the session and the exec stream.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("session closed by client")]
    ClientClosed,

    #[error("session receive failed: {0}")]
    Receive(String),

    #[error("session write failed: {0}")]
    Send(String),

    #[error("session write timed out after {0:?}")]
    SendTimeout(Duration),

    #[error("client is not keeping up with output (stalled for {0:?})")]
    OutputStalled(Duration),

    #[error("exec stream is not keeping up with input (stalled for {0:?})")]
    InputStalled(Duration),

    #[error("session output closed")]
    OutputClosed,

    #[error("exec stream failed: {0}")]
    Exec(String),

    #[error("{0}")]
    Process(String),
}

/// Anything that ends a session abnormally. `Display` is the close reason.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("server is shutting down")]
    Shutdown,
}

impl SessionError {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Handshake(_) => "handshake",
            SessionError::Client(ClientError::ConfigResolution { .. }) => "config_resolution",
            SessionError::Client(ClientError::ClientConstruction { .. }) => "client_construction",
            SessionError::Stream(_) => "stream",
            SessionError::Shutdown => "shutdown",
        }
    }
}

fn cluster_label(cluster: &str) -> String {
    if cluster.is_empty() {
        "(default)".to_string()
    } else {
        format!("'{}'", cluster)
    }
}

fn excerpt(raw: &str) -> String {
    if raw.chars().count() <= EXCERPT_LEN {
        return raw.to_string();
    }
    let mut cut: String = raw.chars().take(EXCERPT_LEN).collect();
    cut.push('…');
    cut
}
