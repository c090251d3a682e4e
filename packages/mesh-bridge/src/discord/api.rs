//! Discord REST client.
//!
//! Covers the handful of endpoints the bridge needs: posting messages,
//! looking up channels and answering interactions.

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;

use super::types::{
    AllowedMentions, Channel, CreateMessage, CALLBACK_DEFERRED_CHANNEL_MESSAGE, FLAG_EPHEMERAL,
};
use crate::error::{Error, Result};
use crate::routing::ChatChannelId;
use crate::transport::{ChatChannel, ChatTransport};

pub const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

pub struct DiscordApi {
    client: Client,
    base_url: String,
    token: String,
    /// From config, or learned from READY.
    application_id: RwLock<Option<String>>,
}

impl DiscordApi {
    pub fn new(token: &str, application_id: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(format!(
                "DiscordBot (mesh-bridge, {})",
                env!("CARGO_PKG_VERSION")
            ))
            .build()?;

        Ok(Self {
            client,
            base_url: DISCORD_API_BASE.to_string(),
            token: token.strip_prefix("Bot ").unwrap_or(token).to_string(),
            application_id: RwLock::new(application_id),
        })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Remember the application id unless one was configured.
    pub fn learn_application_id(&self, id: &str) {
        let mut current = self.application_id.write();
        if current.is_none() {
            tracing::info!(application_id = id, "Using application id from READY");
            *current = Some(id.to_string());
        }
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header("Authorization", format!("Bot {}", self.token))
    }

    /// Acknowledge an interaction with an ephemeral "thinking" state.
    pub async fn defer_interaction(&self, interaction_id: &str, token: &str) -> Result<()> {
        let url = format!(
            "{}/interactions/{}/{}/callback",
            self.base_url, interaction_id, token
        );
        let body = json!({
            "type": CALLBACK_DEFERRED_CHANNEL_MESSAGE,
            "data": { "flags": FLAG_EPHEMERAL },
        });
        let resp = self.client.post(&url).json(&body).send().await?;
        check(resp).await.map(|_| ())
    }

    /// Replace the deferred reply's content.
    pub async fn edit_interaction_reply(
        &self,
        application_id: &str,
        token: &str,
        content: &str,
    ) -> Result<()> {
        let configured = self.application_id.read().clone();
        let app = configured.as_deref().unwrap_or(application_id);
        let url = format!(
            "{}/webhooks/{}/{}/messages/@original",
            self.base_url, app, token
        );
        let body = CreateMessage {
            content,
            allowed_mentions: AllowedMentions::default(),
        };
        let resp = self.client.patch(&url).json(&body).send().await?;
        check(resp).await.map(|_| ())
    }
}

#[async_trait]
impl ChatTransport for DiscordApi {
    async fn send(&self, channel: &ChatChannelId, text: &str) -> Result<()> {
        let url = format!("{}/channels/{}/messages", self.base_url, channel);
        let body = CreateMessage {
            content: text,
            allowed_mentions: AllowedMentions::default(),
        };
        let resp = self
            .authorized(self.client.post(&url))
            .json(&body)
            .send()
            .await?;
        check(resp).await?;
        tracing::debug!(channel = %channel, len = text.len(), "Posted to Discord");
        Ok(())
    }

    async fn fetch_channel(&self, channel: &ChatChannelId) -> Result<Option<ChatChannel>> {
        let url = format!("{}/channels/{}", self.base_url, channel);
        let resp = self.authorized(self.client.get(&url)).send().await?;

        if matches!(resp.status(), StatusCode::NOT_FOUND | StatusCode::FORBIDDEN) {
            return Ok(None);
        }

        let found: Channel = check(resp).await?.json().await?;
        Ok(Some(ChatChannel {
            id: ChatChannelId::new(found.id.clone()),
            text_based: found.is_text_based(),
        }))
    }
}

/// Turn a non-success response into [`Error::Discord`].
async fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    #[derive(Deserialize)]
    struct ApiError {
        message: Option<String>,
    }

    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiError>(&body)
        .ok()
        .and_then(|e| e.message)
        .unwrap_or(body);

    Err(Error::Discord {
        status: status.as_u16(),
        message,
    })
}
