//! Narrow seams to the two networks.
//!
//! The relay core only ever talks to Discord and to the radio through these
//! traits. `discord::DiscordApi` and `mesh::MeshLink` are the production
//! implementations.

use async_trait::async_trait;

use crate::error::Result;
use crate::routing::{ChatChannelId, MeshChannel};

/// A Discord channel as far as routing cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatChannel {
    pub id: ChatChannelId,
    /// Whether plain text messages can be posted here.
    pub text_based: bool,
}

/// Outbound calls into the mesh radio.
#[async_trait]
pub trait MeshTransport: Send + Sync {
    async fn send_channel_text(&self, channel: MeshChannel, text: &str) -> Result<()>;

    async fn send_flood_advert(&self) -> Result<()>;
}

/// Outbound calls into Discord.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send(&self, channel: &ChatChannelId, text: &str) -> Result<()>;

    /// `None` when the channel does not exist or is not visible to the bot.
    async fn fetch_channel(&self, channel: &ChatChannelId) -> Result<Option<ChatChannel>>;
}
