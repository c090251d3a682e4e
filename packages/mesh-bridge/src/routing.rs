//! Static routing between Discord channels and mesh channel indices.
//!
//! Both directions are plain hash lookups built once at startup. The table is
//! never mutated afterwards. "No route" and "route to index 0" are distinct
//! outcomes: the former is `None`, the latter `Some(MeshChannel(0))`.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

/// A Discord channel snowflake.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ChatChannelId(String);

impl ChatChannelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChatChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChatChannelId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A mesh radio channel index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct MeshChannel(pub u8);

impl fmt::Display for MeshChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable bidirectional routing table.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    to_mesh: HashMap<ChatChannelId, MeshChannel>,
    to_chat: HashMap<MeshChannel, ChatChannelId>,
    default_chat: Option<ChatChannelId>,
}

impl RoutingTable {
    pub fn new(
        to_mesh: HashMap<ChatChannelId, MeshChannel>,
        to_chat: HashMap<MeshChannel, ChatChannelId>,
        default_chat: Option<ChatChannelId>,
    ) -> Self {
        Self {
            to_mesh,
            to_chat,
            default_chat,
        }
    }

    /// Mesh index a Discord channel is bridged to, or `None` if it is not bridged.
    pub fn mesh_index_for(&self, channel: &ChatChannelId) -> Option<MeshChannel> {
        self.to_mesh.get(channel).copied()
    }

    /// Discord channel a mesh index delivers to. Unmapped indices fall back to
    /// the default destination; `None` only when neither exists.
    pub fn chat_channel_for(&self, index: MeshChannel) -> Option<&ChatChannelId> {
        self.to_chat.get(&index).or(self.default_chat.as_ref())
    }

    pub fn default_chat(&self) -> Option<&ChatChannelId> {
        self.default_chat.as_ref()
    }

    /// True when the table cannot route anything in either direction.
    pub fn is_empty(&self) -> bool {
        self.to_mesh.is_empty() && self.to_chat.is_empty() && self.default_chat.is_none()
    }
}
