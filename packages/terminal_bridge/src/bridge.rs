//! Terminal Bridge
//!
//! The exec stream sees one [`TerminalBridge`] that plays three roles:
//!
//! - input source: [`StdinReader`], an [`AsyncRead`] over `stdin` frames
//! - output sink: [`StdoutWriter`], framing raw output as `stdout` frames
//! - size source: [`ResizeQueue`], a FIFO of `resize` frames
//!
//! The session side of the bridge is a [`BridgeInlet`] (fed by the inbound
//! relay) and a [`BridgeOutlet`] (drained by the outbound relay). All queues
//! are bounded and strictly FIFO in each direction.

use async_trait::async_trait;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use std::time::Duration;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tracing::{debug, warn};

use crate::error::{HandshakeError, SessionError, StreamError};
use crate::protocol::{ClientFrame, END_OF_TRANSMISSION, ResizeEvent, ServerFrame};
use crate::transport::{SessionReceiver, SessionSender};
use crate::utf8::Utf8StreamDecoder;

const RESIZE_QUEUE_CAPACITY: usize = 16;

/// Queue sizes and the write bound for one bridge.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Pending `stdin` chunks before the inbound relay waits on the exec stream.
    pub input_capacity: usize,
    /// Pending `stdout` frames before writes start waiting on the client.
    pub output_capacity: usize,
    /// How long a write may wait on a full queue (input or output), or on the
    /// transport, before the stream fails.
    pub write_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            input_capacity: 64,
            output_capacity: 256,
            write_timeout: Duration::from_secs(10),
        }
    }
}

/// Create a bridge and its two session-facing ends.
pub fn terminal_bridge(config: &BridgeConfig) -> (TerminalBridge, BridgeInlet, BridgeOutlet) {
    let (stdin_tx, stdin_rx) = mpsc::channel(config.input_capacity.max(1));
    let (resize_tx, resize_rx) = mpsc::channel(RESIZE_QUEUE_CAPACITY);
    let (frame_tx, frame_rx) = mpsc::channel(config.output_capacity.max(1));

    let bridge = TerminalBridge {
        stdin: StdinReader {
            rx: stdin_rx,
            chunk: Vec::new(),
            pos: 0,
        },
        stdout: StdoutWriter {
            tx: frame_tx,
            decoder: Utf8StreamDecoder::new(),
            write_timeout: config.write_timeout,
        },
        sizes: ResizeQueue { rx: resize_rx },
    };
    let inlet = BridgeInlet {
        stdin_tx: Some(stdin_tx),
        resize_tx,
        input_timeout: config.write_timeout,
    };
    let outlet = BridgeOutlet { rx: frame_rx };

    (bridge, inlet, outlet)
}

// =============================================================================
// Exec-facing roles
// =============================================================================

/// Output sink role: bytes produced by the remote process.
#[async_trait]
pub trait TerminalOutput: Send {
    async fn write_output(&mut self, data: &[u8]) -> Result<(), StreamError>;

    /// Flush anything held back at end of stream.
    async fn finish_output(&mut self) -> Result<(), StreamError>;
}

/// Terminal-size source role.
#[async_trait]
pub trait TerminalSizeSource: Send {
    /// Next geometry requested by the client. `None` once the session can
    /// no longer produce sizes.
    async fn next_size(&mut self) -> Option<ResizeEvent>;
}

/// The capability object handed to an exec stream.
pub struct TerminalBridge {
    stdin: StdinReader,
    stdout: StdoutWriter,
    sizes: ResizeQueue,
}

impl TerminalBridge {
    /// Split into the three roles so they can be driven concurrently.
    pub fn into_parts(self) -> (StdinReader, StdoutWriter, ResizeQueue) {
        (self.stdin, self.stdout, self.sizes)
    }
}

impl AsyncRead for TerminalBridge {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdin).poll_read(cx, buf)
    }
}

#[async_trait]
impl TerminalOutput for TerminalBridge {
    async fn write_output(&mut self, data: &[u8]) -> Result<(), StreamError> {
        self.stdout.write_output(data).await
    }

    async fn finish_output(&mut self) -> Result<(), StreamError> {
        self.stdout.finish_output().await
    }
}

#[async_trait]
impl TerminalSizeSource for TerminalBridge {
    async fn next_size(&mut self) -> Option<ResizeEvent> {
        self.sizes.next_size().await
    }
}

/// Input source role. Reads return bytes in arrival order; end-of-input from
/// the client (or the session going away) reads as EOF.
pub struct StdinReader {
    rx: mpsc::Receiver<Vec<u8>>,
    chunk: Vec<u8>,
    pos: usize,
}

impl AsyncRead for StdinReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        while this.pos >= this.chunk.len() {
            match ready!(this.rx.poll_recv(cx)) {
                Some(chunk) => {
                    this.chunk = chunk;
                    this.pos = 0;
                }
                None => return Poll::Ready(Ok(())),
            }
        }

        let n = buf.remaining().min(this.chunk.len() - this.pos);
        buf.put_slice(&this.chunk[this.pos..this.pos + n]);
        this.pos += n;
        Poll::Ready(Ok(()))
    }
}

impl StdinReader {
    /// Stop accepting input. Queued chunks still read, then EOF.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

/// Output sink: frames raw bytes as `stdout` messages.
pub struct StdoutWriter {
    tx: mpsc::Sender<String>,
    decoder: Utf8StreamDecoder,
    write_timeout: Duration,
}

impl StdoutWriter {
    async fn send_frame(&mut self, data: String) -> Result<(), StreamError> {
        let frame = serde_json::to_string(&ServerFrame::Stdout { data })
            .map_err(|e| StreamError::Send(e.to_string()))?;
        match self.tx.send_timeout(frame, self.write_timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(StreamError::OutputStalled(self.write_timeout)),
            Err(SendTimeoutError::Closed(_)) => Err(StreamError::OutputClosed),
        }
    }
}

#[async_trait]
impl TerminalOutput for StdoutWriter {
    async fn write_output(&mut self, data: &[u8]) -> Result<(), StreamError> {
        let text = self.decoder.decode(data);
        if text.is_empty() {
            return Ok(());
        }
        self.send_frame(text).await
    }

    async fn finish_output(&mut self) -> Result<(), StreamError> {
        let rest = self.decoder.finish();
        if rest.is_empty() {
            return Ok(());
        }
        self.send_frame(rest).await
    }
}

/// Size source: resize events in the order the client sent them.
pub struct ResizeQueue {
    rx: mpsc::Receiver<ResizeEvent>,
}

impl ResizeQueue {
    /// Stop accepting sizes. Queued events still drain, then `next_size`
    /// returns `None`.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

#[async_trait]
impl TerminalSizeSource for ResizeQueue {
    async fn next_size(&mut self) -> Option<ResizeEvent> {
        self.rx.recv().await
    }
}

// =============================================================================
// Session-facing ends
// =============================================================================

/// Feeds client input into the bridge.
pub struct BridgeInlet {
    stdin_tx: Option<mpsc::Sender<Vec<u8>>>,
    resize_tx: mpsc::Sender<ResizeEvent>,
    input_timeout: Duration,
}

impl BridgeInlet {
    /// Queue a `stdin` payload. The end-of-transmission sentinel closes the
    /// exec stream's stdin; anything after it is dropped.
    ///
    /// Fails with [`StreamError::InputStalled`] when the queue stays full for
    /// the whole write timeout.
    pub async fn push_stdin(&mut self, data: String) -> Result<(), StreamError> {
        if data == END_OF_TRANSMISSION {
            if self.stdin_tx.take().is_some() {
                debug!("Client signalled end of input");
            }
            return Ok(());
        }
        if data.is_empty() {
            return Ok(());
        }
        let Some(tx) = self.stdin_tx.as_ref() else {
            debug!(bytes = data.len(), "Dropping input after end of input");
            return Ok(());
        };
        match tx.send_timeout(data.into_bytes(), self.input_timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(StreamError::InputStalled(self.input_timeout)),
            Err(SendTimeoutError::Closed(_)) => {
                debug!("Exec stream stopped reading input");
                self.stdin_tx = None;
                Ok(())
            }
        }
    }

    /// Queue a resize. Zero-sized geometry is ignored, as are sizes sent
    /// after the exec stream stopped reading them.
    pub async fn push_resize(&mut self, size: ResizeEvent) -> Result<(), StreamError> {
        if size.rows == 0 || size.cols == 0 {
            debug!(rows = size.rows, cols = size.cols, "Ignoring empty resize");
            return Ok(());
        }
        match self.resize_tx.send_timeout(size, self.input_timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(StreamError::InputStalled(self.input_timeout)),
            Err(SendTimeoutError::Closed(size)) => {
                debug!(rows = size.rows, cols = size.cols, "Exec stream stopped reading sizes");
                Ok(())
            }
        }
    }

    /// Whether input is still flowing to the exec stream.
    pub fn stdin_open(&self) -> bool {
        self.stdin_tx.is_some()
    }
}

/// Framed output waiting to be written to the session.
pub struct BridgeOutlet {
    rx: mpsc::Receiver<String>,
}

impl BridgeOutlet {
    /// Next framed message, or `None` once every writer is gone and the
    /// queue is drained.
    pub async fn next_frame(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

// =============================================================================
// Relays
// =============================================================================

/// Dispatch inbound frames into the bridge until the session ends.
///
/// Only returns on failure or client close; it never ends a healthy session.
/// A queue that stays full past the write timeout is a failure, so a stuck
/// exec stream cannot hide the client going away.
pub(crate) async fn relay_inbound<R>(receiver: &mut R, inlet: &mut BridgeInlet) -> SessionError
where
    R: SessionReceiver + ?Sized,
{
    loop {
        let text = match receiver.recv().await {
            Some(Ok(text)) => text,
            Some(Err(e)) => return StreamError::Receive(e.to_string()).into(),
            None => return StreamError::ClientClosed.into(),
        };

        let pushed = match serde_json::from_str::<ClientFrame>(&text) {
            Ok(ClientFrame::Stdin { data }) => inlet.push_stdin(data).await,
            Ok(ClientFrame::Resize { rows, cols }) => {
                inlet.push_resize(ResizeEvent { rows, cols }).await
            }
            Ok(ClientFrame::Bind) => {
                warn!("Client sent 'bind' on an attached session");
                return HandshakeError::AlreadyAttached.into();
            }
            Err(e) => {
                debug!(error = %e, "Ignoring undecodable session frame");
                Ok(())
            }
        };
        if let Err(e) = pushed {
            return e.into();
        }
    }
}

/// Write framed output to the session until every writer is gone.
pub(crate) async fn relay_outbound<S>(
    sender: &mut S,
    outlet: &mut BridgeOutlet,
    write_timeout: Duration,
) -> Result<(), StreamError>
where
    S: SessionSender + ?Sized,
{
    while let Some(frame) = outlet.next_frame().await {
        match tokio::time::timeout(write_timeout, sender.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(StreamError::Send(e.to_string())),
            Err(_) => return Err(StreamError::SendTimeout(write_timeout)),
        }
    }
    Ok(())
}
