//! WebSocket transport for terminal sessions.
//!
//! Adapts the two halves of an axum [`WebSocket`](axum::extract::ws::WebSocket)
//! to the session transport traits. Session close codes are mapped into the
//! application range (`4000 + code`), since WebSocket reserves codes below 4000.

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use terminal_bridge::{CloseStatus, SessionReceiver, SessionSender, TransportError};
use tracing::debug;

/// First application-defined WebSocket close code.
pub const CLOSE_CODE_BASE: u16 = 4000;

/// Close-frame payload limit (125 bytes) minus the status code.
const MAX_CLOSE_REASON_BYTES: usize = 123;

/// Inbound half: yields text frames, absorbing control frames.
pub struct WsReceiver<S> {
    stream: S,
}

impl<S> WsReceiver<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl<S> SessionReceiver for WsReceiver<S>
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin + Send,
{
    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                    Ok(text) => return Some(Ok(text.to_string())),
                    Err(_) => debug!(len = bytes.len(), "Ignoring non-UTF-8 binary frame"),
                },
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "Client sent close frame");
                    return None;
                }
                Ok(Message::Ping(_) | Message::Pong(_)) => {}
                Err(e) => return Some(Err(TransportError::new(e))),
            }
        }
    }
}

/// Outbound half: writes text frames and the final close frame.
pub struct WsSender<S> {
    sink: S,
}

impl<S> WsSender<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl<S> SessionSender for WsSender<S>
where
    S: Sink<Message> + Unpin + Send,
    S::Error: Display,
{
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        self.sink
            .send(Message::Text(frame.into()))
            .await
            .map_err(TransportError::new)
    }

    async fn close(&mut self, status: CloseStatus, reason: &str) -> Result<(), TransportError> {
        let frame = close_frame(status, reason);
        let result = self
            .sink
            .send(Message::Close(Some(frame)))
            .await
            .map_err(TransportError::new);
        let _ = self.sink.close().await;
        result
    }
}

pub fn close_frame(status: CloseStatus, reason: &str) -> CloseFrame {
    CloseFrame {
        code: CLOSE_CODE_BASE + status.code(),
        reason: truncate_reason(reason).to_owned().into(),
    }
}

fn truncate_reason(reason: &str) -> &str {
    if reason.len() <= MAX_CLOSE_REASON_BYTES {
        return reason;
    }
    let mut end = MAX_CLOSE_REASON_BYTES;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;

    #[test]
    fn close_codes_map_into_application_range() {
        let normal = close_frame(CloseStatus::Normal, "Process exited");
        assert_eq!(normal.code, 4001);
        assert_eq!(normal.reason.as_str(), "Process exited");

        let error = close_frame(CloseStatus::Error, "server is shutting down");
        assert_eq!(error.code, 4002);
    }

    #[test]
    fn long_reasons_are_truncated_on_char_boundary() {
        let reason = "é".repeat(100);
        let frame = close_frame(CloseStatus::Error, &reason);
        assert!(frame.reason.len() <= MAX_CLOSE_REASON_BYTES);
        assert_eq!(frame.reason.len(), 122);
        assert!(frame.reason.as_str().chars().all(|c| c == 'é'));
    }

    #[tokio::test]
    async fn receiver_skips_control_frames() {
        let (tx, rx) = mpsc::unbounded::<Result<Message, axum::Error>>();
        let mut receiver = WsReceiver::new(rx);

        tx.unbounded_send(Ok(Message::Ping(vec![1].into()))).unwrap();
        tx.unbounded_send(Ok(Message::Text(r#"{"operation":"stdin"}"#.into())))
            .unwrap();
        tx.unbounded_send(Ok(Message::Binary(b"bin".to_vec().into())))
            .unwrap();
        tx.unbounded_send(Ok(Message::Binary(vec![0xff, 0xfe].into())))
            .unwrap();
        tx.unbounded_send(Ok(Message::Close(None))).unwrap();

        assert_eq!(
            receiver.recv().await.unwrap().unwrap(),
            r#"{"operation":"stdin"}"#
        );
        assert_eq!(receiver.recv().await.unwrap().unwrap(), "bin");
        assert!(receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn receiver_surfaces_transport_errors() {
        let (tx, rx) = mpsc::unbounded::<Result<Message, axum::Error>>();
        let mut receiver = WsReceiver::new(rx);

        tx.unbounded_send(Err(axum::Error::new(std::io::Error::other("reset"))))
            .unwrap();
        drop(tx);

        let err = receiver.recv().await.unwrap().unwrap_err();
        assert!(err.to_string().contains("reset"));
        assert!(receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn sender_writes_text_then_close() {
        let (tx, mut rx) = mpsc::unbounded::<Message>();
        let mut sender = WsSender::new(tx);

        sender.send("frame".to_string()).await.unwrap();
        sender
            .close(CloseStatus::Normal, "Process exited")
            .await
            .unwrap();

        match rx.next().await {
            Some(Message::Text(text)) => assert_eq!(text.as_str(), "frame"),
            other => panic!("Expected text frame, got {:?}", other),
        }
        match rx.next().await {
            Some(Message::Close(Some(frame))) => {
                assert_eq!(frame.code, 4001);
                assert_eq!(frame.reason.as_str(), "Process exited");
            }
            other => panic!("Expected close frame, got {:?}", other),
        }
        assert!(rx.next().await.is_none());
    }

    #[tokio::test]
    async fn sender_fails_once_peer_is_gone() {
        let (tx, rx) = mpsc::unbounded::<Message>();
        drop(rx);
        let mut sender = WsSender::new(tx);
        assert!(sender.send("lost".to_string()).await.is_err());
    }
}
