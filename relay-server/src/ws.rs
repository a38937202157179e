use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use relay_core::command_result::OutboundChannel;
use relay_core::{ConnectionContext, Event};

use crate::state::AppState;

/// Upgrades an incoming HTTP request to a WebSocket and hands the connection
/// off to [`handle_socket`]. The underlying transport framing (text frames
/// carrying JSON arrays) is the only thing this module is concerned with —
/// admission logic lives entirely in `relay_core`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, addr))
}

/// Writes frames produced by the admission pipeline back onto a WebSocket
/// sink, via an mpsc channel so the pipeline never touches the sink
/// directly — the sink is driven by one dedicated writer task per
/// connection.
struct WsOutboundChannel {
    tx: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl OutboundChannel for WsOutboundChannel {
    async fn send_text(&self, text: String) {
        let _ = self.tx.send(text);
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, addr: SocketAddr) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let ctx = ConnectionContext::new(addr.ip(), Arc::new(WsOutboundChannel { tx }));

    tracing::info!(remote = %addr, "connection opened");

    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => {
                if let Err(err) = dispatch_message(&state, &ctx, &text).await {
                    tracing::warn!(error = %err, "admission pipeline returned an error");
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    tracing::info!(remote = %addr, "connection closed");
    writer.abort();
}

/// Parses `["EVENT", <event>]` client frames and feeds them to the
/// admission pipeline. Any other message shape (unknown command, malformed
/// JSON) is logged and otherwise ignored — the wire protocol beyond event
/// submission is out of this crate's scope.
async fn dispatch_message(
    state: &Arc<AppState>,
    ctx: &ConnectionContext,
    text: &str,
) -> relay_shared::RelayResult<()> {
    let frame: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(err) => {
            tracing::debug!(error = %err, "received malformed frame");
            return Ok(());
        }
    };

    let Some(array) = frame.as_array() else {
        tracing::debug!("received non-array frame");
        return Ok(());
    };

    match array.first().and_then(|v| v.as_str()) {
        Some("EVENT") => {
            let Some(event_json) = array.get(1) else {
                tracing::debug!("EVENT frame missing payload");
                return Ok(());
            };
            let event: Event = match serde_json::from_value(event_json.clone()) {
                Ok(event) => event,
                Err(err) => {
                    tracing::debug!(error = %err, "EVENT frame failed to parse");
                    return Ok(());
                }
            };
            state.pipeline.handle(event, ctx).await
        }
        other => {
            tracing::debug!(command = ?other, "ignoring unsupported client command");
            Ok(())
        }
    }
}
