//! Exec streams against pods through kube-rs.

use async_trait::async_trait;
use futures::{SinkExt, Stream, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::Client;
use kube::api::{Api, AttachParams, TerminalSize};
use std::fmt::Display;
use std::io;
use terminal_bridge::{
    ExecBackend, ExecTarget, ResizeQueue, StdinReader, StreamError, TerminalBridge,
    TerminalOutput, TerminalSizeSource,
};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

const INPUT_BUFFER_BYTES: usize = 4096;

/// Runs the session command with `Api<Pod>::exec`, stdin and TTY attached.
#[derive(Debug, Default, Clone)]
pub struct KubeExecBackend;

#[async_trait]
impl ExecBackend for KubeExecBackend {
    type Client = Client;

    async fn stream(
        &self,
        client: &Client,
        target: &ExecTarget,
        bridge: TerminalBridge,
    ) -> Result<(), StreamError> {
        let pods: Api<Pod> = Api::namespaced(client.clone(), &target.namespace);
        // kube-rs rejects stderr together with a TTY; the TTY merges it into stdout.
        let mut params = AttachParams::interactive_tty();
        if let Some(container) = &target.container {
            params = params.container(container.as_str());
        }

        let mut attached = pods
            .exec(&target.pod, target.command.clone(), &params)
            .await
            .map_err(|e| StreamError::Exec(e.to_string()))?;
        info!(exec = %target, "Exec stream established");

        let (mut stdin, mut stdout, mut sizes) = bridge.into_parts();

        let mut sources = Vec::new();
        if let Some(out) = attached.stdout() {
            sources.push(ReaderStream::new(out).boxed());
        }
        if let Some(err) = attached.stderr() {
            sources.push(ReaderStream::new(err).boxed());
        }
        let remote_stdin = attached.stdin();
        let size_tx = attached.terminal_size();
        let status = attached.take_status();

        {
            let output = pump_output(futures::stream::select_all(sources), &mut stdout);
            let input = pump_input(remote_stdin, &mut stdin);
            let resize = pump_sizes(size_tx, &mut sizes);
            tokio::pin!(output, input, resize);

            let mut input_done = false;
            let mut resize_done = false;
            loop {
                tokio::select! {
                    res = &mut output => {
                        res?;
                        break;
                    }
                    _ = &mut input, if !input_done => input_done = true,
                    _ = &mut resize, if !resize_done => resize_done = true,
                }
            }
        }
        stdin.close();
        sizes.close();

        let status = match status {
            Some(status) => status.await,
            None => None,
        };
        stream_outcome(status, attached.join().await)
    }
}

/// Decide how a finished exec stream ended. A dropped connection with no
/// final status is a stream failure, not a clean exit.
fn stream_outcome<E: Display>(
    status: Option<Status>,
    joined: Result<(), E>,
) -> Result<(), StreamError> {
    match (status, joined) {
        (Some(status), joined) => {
            if let Err(e) = joined {
                debug!(error = %e, "Exec connection ended with error after final status");
            }
            exit_result(&status)
        }
        (None, Ok(())) => Ok(()),
        (None, Err(e)) => Err(StreamError::Exec(e.to_string())),
    }
}

/// Translate the final exec status into the stream outcome.
fn exit_result(status: &Status) -> Result<(), StreamError> {
    if status.status.as_deref() != Some("Failure") {
        return Ok(());
    }
    let message = status
        .message
        .clone()
        .or_else(|| status.reason.clone())
        .unwrap_or_else(|| "command failed".to_string());
    Err(StreamError::Process(message))
}

/// Copy remote output into the bridge until every source ends.
async fn pump_output<S, B, W>(mut sources: S, sink: &mut W) -> Result<(), StreamError>
where
    S: Stream<Item = io::Result<B>> + Unpin,
    B: AsRef<[u8]>,
    W: TerminalOutput + ?Sized,
{
    while let Some(chunk) = sources.next().await {
        let chunk = chunk.map_err(|e| StreamError::Exec(e.to_string()))?;
        sink.write_output(chunk.as_ref()).await?;
    }
    sink.finish_output().await
}

/// Copy client input to the remote stdin, then stop accepting input.
async fn pump_input<W>(remote: Option<W>, stdin: &mut StdinReader)
where
    W: AsyncWrite + Unpin,
{
    if let Some(remote) = remote {
        copy_input(remote, stdin).await;
    }
    stdin.close();
}

/// Closes the remote stdin at end of input.
async fn copy_input<W>(mut remote: W, stdin: &mut StdinReader)
where
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; INPUT_BUFFER_BYTES];
    loop {
        let n = match stdin.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(error = %e, "Input read failed");
                break;
            }
        };
        if let Err(e) = remote.write_all(&buf[..n]).await {
            debug!(error = %e, "Remote stdin closed");
            return;
        }
        if let Err(e) = remote.flush().await {
            debug!(error = %e, "Remote stdin flush failed");
            return;
        }
    }
    debug!("Closing remote stdin");
    if let Err(e) = remote.shutdown().await {
        debug!(error = %e, "Failed to close remote stdin");
    }
}

/// Forward terminal sizes in order until either side goes away, then stop
/// accepting sizes.
async fn pump_sizes<T>(tx: Option<T>, sizes: &mut ResizeQueue)
where
    T: futures::Sink<TerminalSize> + Unpin,
{
    if let Some(mut tx) = tx {
        while let Some(size) = sizes.next_size().await {
            let size = TerminalSize {
                width: size.cols,
                height: size.rows,
            };
            if tx.send(size).await.is_err() {
                debug!("Remote stopped accepting terminal sizes");
                break;
            }
        }
    }
    sizes.close();
}
