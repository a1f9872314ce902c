//! Listener WebSocket endpoint.
//!
//! Browsers connect to `/ws/{device_id}?token=...` and then only receive
//! `VERIFICATION_CODE` messages. Inbound frames other than ping and close are
//! ignored.

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::Response,
    routing::get,
    Router,
};
use codebridge_core::{AdmissionError, ChannelHandle, CloseReason, ListenerId, ListenerSession};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::server::AppState;

/// Messages buffered per listener before sends start failing with `Full`.
const OUTBOUND_BUFFER: usize = 32;

/// Create the WebSocket router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws/:device_id", get(listener_websocket_handler))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct ListenerQuery {
    pub token: Option<String>,
}

/// GET /ws/:device_id
///
/// The token is checked after the upgrade so a rejected listener sees a
/// policy-violation close frame rather than a bare HTTP error.
#[instrument(skip(ws, state, query))]
async fn listener_websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
    Query(query): Query<ListenerQuery>,
) -> Response {
    debug!("Listener WebSocket connection request");

    let listener = ListenerId::from(device_id);
    ws.on_upgrade(move |socket| handle_listener_socket(socket, state, listener, query.token))
}

fn close_message(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}

/// Drive one listener connection until either side closes it.
async fn handle_listener_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    listener: ListenerId,
    token: Option<String>,
) {
    let (mut sender, mut receiver) = socket.split();
    let (handle, mut outbound) = ChannelHandle::new(OUTBOUND_BUFFER);
    let mut session = ListenerSession::new(state.registry.clone(), listener.clone());

    let account = match session
        .admit(state.verifier.as_ref(), token.as_deref(), Arc::new(handle))
        .await
    {
        Ok(account) => account,
        Err(err) => {
            let frame = match err {
                AdmissionError::ShuttingDown => close_message(close_code::AWAY, "server shutting down"),
                _ => close_message(close_code::POLICY, "invalid token"),
            };
            if let Err(e) = sender.send(frame).await {
                debug!(listener = %listener, error = %e, "Failed to send rejection close frame");
            }
            return;
        }
    };

    info!(account = %account, listener = %listener, "Listener WebSocket established");

    loop {
        tokio::select! {
            outgoing = outbound.recv() => match outgoing {
                Some(message) => {
                    let text = match serde_json::to_string(&message) {
                        Ok(text) => text,
                        Err(e) => {
                            error!(error = %e, "Failed to serialize listener message");
                            continue;
                        }
                    };
                    if let Err(e) = sender.send(Message::Text(text)).await {
                        warn!(account = %account, listener = %listener, error = %e, "Listener write failed");
                        break;
                    }
                }
                None => {
                    let frame = match outbound.close_reason() {
                        Some(CloseReason::Shutdown) => close_message(close_code::AWAY, "server shutting down"),
                        Some(CloseReason::Superseded) | None => {
                            close_message(close_code::NORMAL, "replaced by a newer connection")
                        }
                    };
                    if let Err(e) = sender.send(frame).await {
                        debug!(error = %e, "Failed to send close frame");
                    }
                    break;
                }
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = sender.send(Message::Pong(data)).await {
                        warn!(error = %e, "Failed to send pong");
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!(account = %account, listener = %listener, "Listener closed connection");
                    break;
                }
                Some(Err(e)) => {
                    debug!(account = %account, listener = %listener, error = %e, "Listener socket error");
                    break;
                }
                Some(Ok(_)) => {}
            }
        }
    }

    session.close();
    info!(account = %account, listener = %listener, "Listener WebSocket closed");
}
