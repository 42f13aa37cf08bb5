//! JSON frames exchanged with the remote client.
//!
//! Every frame is an object tagged by `operation`:
//!
//! ```text
//! -> {"operation":"bind","cluster":"","namespace":"default","pod":"demo","container":"shell"}
//! -> {"operation":"stdin","data":"ls\n"}
//! -> {"operation":"resize","rows":40,"cols":120}
//! <- {"operation":"stdout","data":"..."}
//! ```

use serde::{Deserialize, Serialize};

/// Operation token of the handshake frame.
pub const BIND_OPERATION: &str = "bind";

/// A `stdin` payload consisting of exactly this character closes the remote
/// shell's stdin without ending the session.
pub const END_OF_TRANSMISSION: &str = "\u{0004}";

/// Target of a session, decoded from the `bind` handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachRequest {
    /// Cluster identifier; empty selects the default cluster.
    pub cluster: String,
    pub namespace: String,
    pub pod: String,
    /// Empty selects the pod's default container.
    pub container: String,
}

/// Terminal geometry requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeEvent {
    pub rows: u16,
    pub cols: u16,
}

/// Frames the client may send once the session is attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "lowercase")]
pub enum ClientFrame {
    Bind,
    Stdin { data: String },
    Resize { rows: u16, cols: u16 },
}

/// Frames the relay sends to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "lowercase")]
pub enum ServerFrame {
    Stdout { data: String },
}
