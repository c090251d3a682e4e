//! Discord gateway client.
//!
//! Holds one session at a time: Hello → Identify → heartbeat loop, with
//! dispatch events handed to [`super::events`]. Any failure or server
//! reconnect request ends the session and the outer loop reconnects with
//! exponential backoff (up to 60 seconds).

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

use super::api::DiscordApi;
use super::events;
use super::types::{
    GatewayPayload, Hello, Interaction, MessageCreate, Ready, INTENT_GUILDS,
    INTENT_GUILD_MESSAGES, INTENT_MESSAGE_CONTENT, OP_DISPATCH, OP_HEARTBEAT,
    OP_HEARTBEAT_ACK, OP_HELLO, OP_IDENTIFY, OP_INVALID_SESSION, OP_RECONNECT,
};
use crate::error::{Error, Result};
use crate::relay::BridgeCore;

const GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// Keep a gateway session alive forever.
pub async fn run(api: Arc<DiscordApi>, core: BridgeCore) {
    let mut backoff = Duration::from_secs(1);
    let max_backoff = Duration::from_secs(60);

    loop {
        tracing::info!("Connecting to Discord gateway...");

        match run_session(&api, &core).await {
            Ok(()) => {
                tracing::info!("Discord gateway session ended");
                backoff = Duration::from_secs(1);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Discord gateway session failed");
            }
        }

        tracing::info!(
            backoff_secs = backoff.as_secs(),
            "Reconnecting to Discord after backoff..."
        );
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(max_backoff);
    }
}

fn frame(op: i32, d: serde_json::Value) -> WsMessage {
    WsMessage::Text(json!({ "op": op, "d": d }).to_string())
}

async fn run_session(api: &Arc<DiscordApi>, core: &BridgeCore) -> Result<()> {
    let (ws_stream, _) = connect_async(GATEWAY_URL).await?;
    let (mut write, mut read) = ws_stream.split();

    // ── Hello ─────────────────────────────────────────────────────────────

    let hello: Hello = match read.next().await {
        Some(Ok(WsMessage::Text(text))) => {
            let payload: GatewayPayload = serde_json::from_str(&text)?;
            if payload.op != OP_HELLO {
                return Err(Error::Gateway(format!("expected Hello, got op {}", payload.op)));
            }
            serde_json::from_value(payload.d.unwrap_or_default())?
        }
        Some(Ok(other)) => {
            return Err(Error::Gateway(format!("unexpected first frame: {:?}", other)));
        }
        Some(Err(e)) => return Err(e.into()),
        None => return Err(Error::Gateway("closed before Hello".to_string())),
    };

    // ── Identify ──────────────────────────────────────────────────────────

    let identify = json!({
        "token": api.token(),
        "intents": INTENT_GUILDS | INTENT_GUILD_MESSAGES | INTENT_MESSAGE_CONTENT,
        "properties": {
            "os": std::env::consts::OS,
            "browser": "mesh-bridge",
            "device": "mesh-bridge",
        },
    });
    write.send(frame(OP_IDENTIFY, identify)).await?;

    // ── Event loop ────────────────────────────────────────────────────────

    let mut sequence: Option<u64> = None;
    let mut heartbeat_acked = true;
    let mut heartbeat = tokio::time::interval(Duration::from_millis(hello.heartbeat_interval));
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if !heartbeat_acked {
                    return Err(Error::Gateway("heartbeat not acknowledged".to_string()));
                }
                write.send(frame(OP_HEARTBEAT, json!(sequence))).await?;
                heartbeat_acked = false;
            }

            msg = read.next() => {
                let text = match msg {
                    Some(Ok(WsMessage::Text(text))) => text,
                    Some(Ok(WsMessage::Close(close))) => {
                        tracing::info!(frame = ?close, "Discord gateway closed the connection");
                        return Ok(());
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(()),
                };

                let payload: GatewayPayload = match serde_json::from_str(&text) {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to parse gateway payload");
                        continue;
                    }
                };
                if payload.s.is_some() {
                    sequence = payload.s;
                }

                match payload.op {
                    OP_DISPATCH => dispatch(api, core, payload),
                    OP_HEARTBEAT_ACK => heartbeat_acked = true,
                    OP_HEARTBEAT => {
                        write.send(frame(OP_HEARTBEAT, json!(sequence))).await?;
                    }
                    OP_RECONNECT => {
                        tracing::info!("Discord requested reconnect");
                        return Ok(());
                    }
                    OP_INVALID_SESSION => {
                        return Err(Error::Gateway("session invalidated".to_string()));
                    }
                    op => tracing::debug!(op = op, "Unhandled gateway opcode"),
                }
            }
        }
    }
}

/// Route one dispatch event. Message and interaction handling run on their
/// own tasks so a slow mesh send never blocks heartbeats.
fn dispatch(api: &Arc<DiscordApi>, core: &BridgeCore, payload: GatewayPayload) {
    let event = payload.t.unwrap_or_default();
    let data = payload.d.unwrap_or_default();

    match event.as_str() {
        "READY" => match serde_json::from_value::<Ready>(data) {
            Ok(ready) => {
                tracing::info!(
                    user = ready.user.username.as_str(),
                    session = ready.session_id.as_str(),
                    "Logged in to Discord"
                );
                if let Some(app) = ready.application {
                    api.learn_application_id(&app.id);
                }
            }
            Err(e) => tracing::warn!(error = %e, "Malformed READY"),
        },
        "MESSAGE_CREATE" => match serde_json::from_value::<MessageCreate>(data) {
            Ok(msg) => {
                tokio::spawn(events::on_message(api.clone(), core.clone(), msg));
            }
            Err(e) => tracing::warn!(error = %e, "Malformed MESSAGE_CREATE"),
        },
        "INTERACTION_CREATE" => match serde_json::from_value::<Interaction>(data) {
            Ok(interaction) => {
                tokio::spawn(events::on_interaction(api.clone(), core.clone(), interaction));
            }
            Err(e) => tracing::warn!(error = %e, "Malformed INTERACTION_CREATE"),
        },
        _ => {}
    }
}
