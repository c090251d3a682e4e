//! Mesh gateway WebSocket handler.
//!
//! Runs for the lifetime of one gateway connection: acks and pings are
//! answered right here, channel messages are handed to the inbound worker so
//! a slow Discord post never stalls ack processing.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{FutureExt, SinkExt, StreamExt};
use tokio::sync::mpsc;

use super::link::MeshLink;
use super::protocol::{BridgeMessage, GatewayMessage};
use crate::queue::panic_message;
use crate::relay::BridgeCore;
use crate::routing::MeshChannel;

/// One channel message waiting to be relayed to Discord.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundText {
    pub channel: MeshChannel,
    pub text: String,
}

/// Spawn the worker that relays inbound mesh text, one message at a time.
/// A panic while handling one message is logged and the worker moves on.
pub fn spawn_inbound_worker(core: BridgeCore) -> mpsc::UnboundedSender<InboundText> {
    let (tx, mut rx) = mpsc::unbounded_channel::<InboundText>();
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match AssertUnwindSafe(core.on_mesh_message(msg.channel, &msg.text))
                .catch_unwind()
                .await
            {
                Ok(outcome) => {
                    tracing::debug!(channel_idx = %msg.channel, outcome = ?outcome, "Mesh message handled");
                }
                Err(panic) => {
                    tracing::error!(
                        channel_idx = %msg.channel,
                        panic = panic_message(&*panic),
                        "Mesh message handler panicked"
                    );
                }
            }
        }
    });
    tx
}

/// Handle a single gateway WebSocket connection.
pub async fn handle_gateway_socket(
    socket: WebSocket,
    link: Arc<MeshLink>,
    inbound: mpsc::UnboundedSender<InboundText>,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<BridgeMessage>();
    let conn_id = link.attach(tx.clone());
    tracing::info!(conn = %conn_id, "Mesh gateway connected");

    // ── Sender Task ───────────────────────────────────────────────────────

    let sender_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize gateway message: {}", e);
                }
            }
        }
    });

    // ── Process Messages ──────────────────────────────────────────────────

    while let Some(msg_result) = ws_receiver.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match serde_json::from_str::<GatewayMessage>(&text) {
                Ok(msg) => dispatch(&link, &inbound, &tx, msg),
                Err(e) => {
                    tracing::warn!(conn = %conn_id, error = %e, "Failed to parse gateway message");
                    let _ = tx.send(BridgeMessage::Error {
                        message: format!("Invalid message format: {}", e),
                    });
                }
            },
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::warn!(conn = %conn_id, error = %e, "Mesh gateway socket error");
                break;
            }
            _ => {}
        }
    }

    // ── Cleanup ───────────────────────────────────────────────────────────

    link.detach(conn_id);
    sender_task.abort();
    tracing::info!(conn = %conn_id, "Mesh gateway disconnected");
}

fn dispatch(
    link: &MeshLink,
    inbound: &mpsc::UnboundedSender<InboundText>,
    outbound: &mpsc::UnboundedSender<BridgeMessage>,
    msg: GatewayMessage,
) {
    match msg {
        GatewayMessage::ChannelMessage { channel_idx, text } => {
            tracing::debug!(channel_idx = channel_idx, "Mesh channel message");
            if inbound
                .send(InboundText {
                    channel: MeshChannel(channel_idx),
                    text,
                })
                .is_err()
            {
                tracing::error!("Inbound worker is gone, dropping mesh message");
            }
        }
        GatewayMessage::Ack { id } => link.resolve(&id, Ok(())),
        GatewayMessage::Error {
            id: Some(id),
            message,
        } => link.resolve(&id, Err(message)),
        GatewayMessage::Error { id: None, message } => {
            tracing::warn!(message = message.as_str(), "Mesh gateway reported an error");
        }
        GatewayMessage::Ping => {
            let _ = outbound.send(BridgeMessage::Pong);
        }
    }
}
