// =============================================================================
// WebSocket Handler: subscriber connections
// =============================================================================
//
// Clients connect to `/ws` and receive one JSON message per completed bar.
// The outbound half is handed to the SubscriberRegistry; this handler keeps
// only the inbound half, reading it solely to notice the client going away.
// =============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::app_state::AppState;
use crate::broadcast::{Subscriber, SubscriberId};

/// Outbound half of an upgraded subscriber socket.
pub type WsSubscriber = SplitSink<WebSocket, Message>;

impl Subscriber for WsSubscriber {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.send(Message::Text(text))
            .await
            .context("websocket write failed")
    }

    async fn close(&mut self) {
        if let Err(e) = SinkExt::close(self).await {
            debug!(error = %e, "websocket close failed");
        }
    }
}

/// Axum handler for the WebSocket upgrade request. Any origin is accepted.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_subscriber(socket, state))
}

/// Register the socket and wait for it to close.
async fn handle_subscriber(socket: WebSocket, state: Arc<AppState>) {
    let id = SubscriberId::new();
    let (sender, mut receiver) = socket.split();
    state.registry.add(id, sender).await;

    loop {
        match receiver.next().await {
            Some(Ok(Message::Close(_))) => {
                info!(subscriber = %id, "close frame received; disconnecting");
                break;
            }
            Some(Ok(_)) => {
                // No inbound protocol; pings are answered by the socket.
            }
            Some(Err(e)) => {
                warn!(subscriber = %id, error = %e, "subscriber read error; disconnecting");
                break;
            }
            None => {
                info!(subscriber = %id, "subscriber stream ended");
                break;
            }
        }
    }

    state.registry.remove(id).await;
}
