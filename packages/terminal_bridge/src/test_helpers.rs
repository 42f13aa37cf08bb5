//! In-memory sessions, client factories and exec backends for tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::{Notify, mpsc};

use crate::bridge::{TerminalBridge, TerminalOutput, TerminalSizeSource};
use crate::cache::ClientFactory;
use crate::error::{ClientError, StreamError};
use crate::exec::{ExecBackend, ExecTarget};
use crate::protocol::{ResizeEvent, ServerFrame};
use crate::transport::{CloseStatus, SessionReceiver, SessionSender, TransportError};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// In-memory session transport
// =============================================================================

/// What the server side of a memory session produced.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SessionEvent {
    Frame(String),
    Closed { status: CloseStatus, reason: String },
}

/// The browser end of a memory session.
pub(crate) struct ClientEnd {
    to_server: Option<mpsc::UnboundedSender<Result<String, TransportError>>>,
    from_server: mpsc::UnboundedReceiver<SessionEvent>,
}

pub(crate) struct MemoryReceiver {
    rx: mpsc::UnboundedReceiver<Result<String, TransportError>>,
}

pub(crate) struct MemorySender {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

pub(crate) fn memory_session() -> (ClientEnd, MemoryReceiver, MemorySender) {
    let (to_server, server_rx) = mpsc::unbounded_channel();
    let (server_tx, from_server) = mpsc::unbounded_channel();
    (
        ClientEnd {
            to_server: Some(to_server),
            from_server,
        },
        MemoryReceiver { rx: server_rx },
        MemorySender { tx: server_tx },
    )
}

impl ClientEnd {
    pub(crate) fn send_text(&self, text: &str) {
        if let Some(tx) = &self.to_server {
            let _ = tx.send(Ok(text.to_string()));
        }
    }

    pub(crate) fn send_error(&self, message: &str) {
        if let Some(tx) = &self.to_server {
            let _ = tx.send(Err(TransportError::new(message)));
        }
    }

    pub(crate) fn bind(&self, cluster: &str, namespace: &str, pod: &str, container: &str) {
        let frame = serde_json::json!({
            "operation": "bind",
            "cluster": cluster,
            "namespace": namespace,
            "pod": pod,
            "container": container,
        });
        self.send_text(&frame.to_string());
    }

    pub(crate) fn send_stdin(&self, data: &str) {
        let frame = serde_json::json!({ "operation": "stdin", "data": data });
        self.send_text(&frame.to_string());
    }

    pub(crate) fn send_resize(&self, rows: u16, cols: u16) {
        let frame = serde_json::json!({ "operation": "resize", "rows": rows, "cols": cols });
        self.send_text(&frame.to_string());
    }

    /// Stop sending while still watching what the server does.
    pub(crate) fn hang_up(&mut self) {
        self.to_server = None;
    }

    pub(crate) fn try_next_event(&mut self) -> Option<SessionEvent> {
        self.from_server.try_recv().ok()
    }

    /// Next event, or `None` once the server dropped its sender.
    pub(crate) async fn next_event(&mut self) -> Option<SessionEvent> {
        tokio::time::timeout(EVENT_TIMEOUT, self.from_server.recv())
            .await
            .expect("timed out waiting for session event")
    }

    pub(crate) async fn next_stdout(&mut self) -> String {
        match self.next_event().await {
            Some(SessionEvent::Frame(frame)) => stdout_data(&frame),
            other => panic!("Expected stdout frame, got {:?}", other),
        }
    }

    /// Skip output until the session closes.
    pub(crate) async fn expect_closed(&mut self) -> (CloseStatus, String) {
        let (_, status, reason) = self.collect_until_closed().await;
        (status, reason)
    }

    /// Concatenated stdout data followed by the close.
    pub(crate) async fn collect_until_closed(&mut self) -> (String, CloseStatus, String) {
        let mut output = String::new();
        loop {
            match self.next_event().await {
                Some(SessionEvent::Frame(frame)) => output.push_str(&stdout_data(&frame)),
                Some(SessionEvent::Closed { status, reason }) => return (output, status, reason),
                None => panic!("Session ended without a close"),
            }
        }
    }
}

fn stdout_data(frame: &str) -> String {
    match serde_json::from_str::<ServerFrame>(frame).expect("server frame") {
        ServerFrame::Stdout { data } => data,
    }
}

#[async_trait]
impl SessionReceiver for MemoryReceiver {
    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        self.rx.recv().await
    }
}

#[async_trait]
impl SessionSender for MemorySender {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        self.tx
            .send(SessionEvent::Frame(frame))
            .map_err(|_| TransportError::new("client gone"))
    }

    async fn close(&mut self, status: CloseStatus, reason: &str) -> Result<(), TransportError> {
        self.tx
            .send(SessionEvent::Closed {
                status,
                reason: reason.to_string(),
            })
            .map_err(|_| TransportError::new("client gone"))
    }
}

// =============================================================================
// Client factory
// =============================================================================

#[derive(Debug)]
pub(crate) struct FakeCluster {
    pub cluster: String,
    pub serial: usize,
}

pub(crate) type FakeClient = Arc<FakeCluster>;

/// Counts construction attempts and can be told to be slow or to fail.
#[derive(Default)]
pub(crate) struct CountingFactory {
    attempts: AtomicUsize,
    delay: Option<Duration>,
    failures_left: AtomicUsize,
    always_fail: Option<String>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
}

impl CountingFactory {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn failing_first(self, failures: usize) -> Self {
        self.failures_left.store(failures, Ordering::SeqCst);
        self
    }

    pub(crate) fn always_failing(mut self, reason: &str) -> Self {
        self.always_fail = Some(reason.to_string());
        self
    }

    /// Hold construction for `cluster` until the returned gate is notified.
    pub(crate) fn gate(&self, cluster: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates
            .lock()
            .unwrap()
            .insert(cluster.to_string(), gate.clone());
        gate
    }

    pub(crate) fn constructions(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClientFactory for CountingFactory {
    type Client = FakeClient;

    async fn create_client(&self, cluster: &str) -> Result<FakeClient, ClientError> {
        let serial = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;

        let gate = self.gates.lock().unwrap().get(cluster).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(reason) = &self.always_fail {
            return Err(ClientError::config_resolution(cluster, reason));
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ClientError::config_resolution(cluster, "injected failure"));
        }

        Ok(Arc::new(FakeCluster {
            cluster: cluster.to_string(),
            serial,
        }))
    }
}

// =============================================================================
// Exec backend
// =============================================================================

/// How a [`ScriptedBackend`] stream behaves once started.
pub(crate) enum Script {
    /// Echo stdin to stdout and exit cleanly at end of input.
    Echo,
    /// Fail immediately with a process error.
    Fail(String),
    /// Never exit on its own.
    Hang,
}

pub(crate) struct ScriptedBackend {
    script: Script,
    targets: Mutex<Vec<ExecTarget>>,
    sizes: Mutex<Vec<ResizeEvent>>,
    started: Notify,
}

impl ScriptedBackend {
    pub(crate) fn new(script: Script) -> Self {
        Self {
            script,
            targets: Mutex::new(Vec::new()),
            sizes: Mutex::new(Vec::new()),
            started: Notify::new(),
        }
    }

    pub(crate) fn targets(&self) -> Vec<ExecTarget> {
        self.targets.lock().unwrap().clone()
    }

    pub(crate) fn starts(&self) -> usize {
        self.targets.lock().unwrap().len()
    }

    pub(crate) fn sizes(&self) -> Vec<ResizeEvent> {
        self.sizes.lock().unwrap().clone()
    }

    pub(crate) async fn wait_started(&self) {
        tokio::time::timeout(EVENT_TIMEOUT, self.started.notified())
            .await
            .expect("exec stream never started");
    }

    async fn echo(&self, bridge: TerminalBridge) -> Result<(), StreamError> {
        let (mut stdin, mut stdout, mut sizes) = bridge.into_parts();
        let mut buf = [0u8; 1024];
        loop {
            tokio::select! {
                biased;
                Some(size) = sizes.next_size() => self.sizes.lock().unwrap().push(size),
                read = stdin.read(&mut buf) => {
                    let n = read.map_err(|e| StreamError::Exec(e.to_string()))?;
                    if n == 0 {
                        break;
                    }
                    stdout.write_output(&buf[..n]).await?;
                }
            }
        }
        stdout.finish_output().await
    }
}

#[async_trait]
impl ExecBackend for ScriptedBackend {
    type Client = FakeClient;

    async fn stream(
        &self,
        _client: &FakeClient,
        target: &ExecTarget,
        bridge: TerminalBridge,
    ) -> Result<(), StreamError> {
        self.targets.lock().unwrap().push(target.clone());
        self.started.notify_one();

        match &self.script {
            Script::Echo => self.echo(bridge).await,
            Script::Fail(message) => Err(StreamError::Process(message.clone())),
            Script::Hang => {
                let _bridge = bridge;
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}
