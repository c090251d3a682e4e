//! Mesh gateway protocol message definitions.
//!
//! A radio gateway process owns the serial/BLE link to the node and attaches
//! to the bridge over a WebSocket at `/mesh`. Both directions are JSON text
//! frames tagged by `type`.

use serde::{Deserialize, Serialize};

// ── Gateway → Bridge ──────────────────────────────────────────────────────────

/// Messages sent from the radio gateway to the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayMessage {
    /// A text message heard on a mesh channel.
    ChannelMessage {
        /// Missing index means the public channel.
        #[serde(default)]
        channel_idx: u8,
        text: String,
    },

    /// A command completed on the radio.
    Ack { id: String },

    /// A command failed on the radio, or the gateway reports a problem.
    Error {
        #[serde(default)]
        id: Option<String>,
        message: String,
    },

    /// Keep-alive.
    Ping,
}

// ── Bridge → Gateway ──────────────────────────────────────────────────────────

/// Messages sent from the bridge to the radio gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeMessage {
    /// Transmit text on a channel. Answered by `ack` or `error` with the same id.
    SendChannelText {
        id: String,
        channel_idx: u8,
        text: String,
    },

    /// Transmit a flood advertisement.
    SendFloodAdvert { id: String },

    /// Response to ping.
    Pong,

    /// The bridge could not understand a gateway frame.
    Error { message: String },
}
