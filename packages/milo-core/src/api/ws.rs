//! WebSocket push channel (`GET /ws`).
//!
//! Client-to-server frames are ignored except `Close`; the server only ever
//! pushes [`Event`](crate::events::Event) frames, JSON-encoded one per text
//! message, in the order the broadcaster delivers them to this subscriber.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;

use crate::api::AppState;

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

/// Main WebSocket connection handler: registers a subscriber with the
/// broadcaster, forwards every delivered event to the client, and tears the
/// subscription down on disconnect or a force-close from the connection
/// manager.
async fn handle_ws(mut socket: WebSocket, state: AppState) {
    let conn_guard = state.ws_manager.register();
    let cancel_token = conn_guard.cancel_token().clone();
    let mut subscriber = state.broadcaster.subscribe();

    tracing::info!(connection = %conn_guard.id(), "ws connection established");

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                tracing::info!(connection = %conn_guard.id(), "ws connection force-closed");
                break;
            }
            event = subscriber.recv() => {
                let Some(event) = event else {
                    break;
                };
                match serde_json::to_string(&event) {
                    Ok(json) => {
                        if socket.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "failed to serialize event for ws push"),
                }
            }
            frame = socket.recv() => {
                match frame {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    _ => {} // client-to-server frames are otherwise ignored
                }
            }
        }
    }

    state.broadcaster.unsubscribe(subscriber.id);
}
