use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{WebSocket, rejection::WebSocketUpgradeRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use tracing::{Instrument, info, info_span};
use uuid::Uuid;

use crate::AppState;
use crate::websocket_session::{WsReceiver, WsSender};

/// Terminal session endpoint. Refuses new sessions once shutdown has begun.
pub async fn terminal_handler(
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if state.sessions.is_closed() {
        return (StatusCode::SERVICE_UNAVAILABLE, "server is shutting down").into_response();
    }
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let sessions = state.sessions.clone();
    ws.on_upgrade(move |socket| sessions.track_future(handle_session(socket, state)))
}

async fn handle_session(socket: WebSocket, state: AppState) {
    let session_id = Uuid::new_v4();
    let span = info_span!("session", id = %session_id);

    async move {
        info!("Terminal session connected");
        state.metrics.session_opened();

        let (sink, stream) = socket.split();
        let outcome = state
            .relay
            .run_session(
                WsReceiver::new(stream),
                WsSender::new(sink),
                &state.session_shutdown,
            )
            .await;

        state.metrics.session_closed(&outcome);
    }
    .instrument(span)
    .await
}
