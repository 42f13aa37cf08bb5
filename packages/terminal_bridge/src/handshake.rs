//! Handshake decoding: the first frame of a session names the container to
//! attach to. Existence of the pod or container is not checked here; that
//! surfaces when the exec stream starts.

use serde::Deserialize;
use tracing::debug;

use crate::error::HandshakeError;
use crate::protocol::{AttachRequest, BIND_OPERATION};
use crate::transport::SessionReceiver;

#[derive(Deserialize)]
struct RawHandshake {
    operation: Option<String>,
    cluster: Option<String>,
    namespace: Option<String>,
    pod: Option<String>,
    container: Option<String>,
}

/// Decode the first frame of a session into an [`AttachRequest`].
pub fn decode_handshake(raw: &str) -> Result<AttachRequest, HandshakeError> {
    let handshake: RawHandshake =
        serde_json::from_str(raw).map_err(|e| HandshakeError::malformed(e, raw))?;

    let operation = handshake
        .operation
        .ok_or_else(|| HandshakeError::malformed("missing field `operation`", raw))?;
    if operation != BIND_OPERATION {
        return Err(HandshakeError::UnexpectedOperation { operation });
    }

    let namespace = required(handshake.namespace, "namespace", raw)?;
    let pod = required(handshake.pod, "pod", raw)?;
    let container = handshake
        .container
        .ok_or_else(|| HandshakeError::malformed("missing field `container`", raw))?;

    if namespace.is_empty() {
        return Err(HandshakeError::malformed("field `namespace` is empty", raw));
    }
    if pod.is_empty() {
        return Err(HandshakeError::malformed("field `pod` is empty", raw));
    }

    Ok(AttachRequest {
        cluster: handshake.cluster.unwrap_or_default(),
        namespace,
        pod,
        container,
    })
}

/// Receive exactly one frame from the session and decode it.
pub async fn receive_handshake<R>(receiver: &mut R) -> Result<AttachRequest, HandshakeError>
where
    R: SessionReceiver + ?Sized,
{
    let raw = match receiver.recv().await {
        Some(Ok(raw)) => raw,
        Some(Err(e)) => return Err(HandshakeError::Receive(e.to_string())),
        None => return Err(HandshakeError::Closed),
    };
    debug!(frame = %raw, "Received handshake");
    decode_handshake(&raw)
}

fn required(value: Option<String>, field: &str, raw: &str) -> Result<String, HandshakeError> {
    value.ok_or_else(|| HandshakeError::malformed(format!("missing field `{}`", field), raw))
}
