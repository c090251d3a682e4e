//! Turns Discord events into core calls and renders the replies.

use std::sync::Arc;

use super::api::DiscordApi;
use super::types::{Interaction, MessageCreate, SlashCommand};
use crate::relay::{BridgeCore, Reply, COMMAND_FAILED};
use crate::routing::ChatChannelId;
use crate::transport::ChatTransport;

/// A plain message: always-forward relay or prefix command. Replies go to
/// the same channel.
pub async fn on_message(api: Arc<DiscordApi>, core: BridgeCore, msg: MessageCreate) {
    tracing::debug!(message = msg.id.as_str(), channel = msg.channel_id.as_str(), "Discord message");
    let chat = msg.to_chat_message();

    if let Some(text) = core.on_chat_message(&chat).await.text() {
        if let Err(e) = api.send(&chat.channel, text).await {
            tracing::error!(channel = %chat.channel, error = %e, "Failed to post command reply");
        }
    }
}

/// A slash command. The reply is deferred first since a chunked send can
/// take longer than Discord's response window.
pub async fn on_interaction(api: Arc<DiscordApi>, core: BridgeCore, interaction: Interaction) {
    let Some(command) = interaction.command() else {
        return;
    };

    if let Err(e) = api
        .defer_interaction(&interaction.id, &interaction.token)
        .await
    {
        tracing::error!(error = %e, "Failed to defer interaction");
        return;
    }

    let reply = run_command(&core, &interaction, command).await;
    let text = reply.text().unwrap_or(COMMAND_FAILED);

    if let Err(e) = api
        .edit_interaction_reply(&interaction.application_id, &interaction.token, text)
        .await
    {
        tracing::error!(error = %e, "Failed to edit interaction reply");
    }
}

async fn run_command(core: &BridgeCore, interaction: &Interaction, command: SlashCommand) -> Reply {
    match command {
        SlashCommand::Bridge(action) => core.handle_bridge(&interaction.actor(), action),
        SlashCommand::Advert => core.handle_advert().await,
        SlashCommand::Send { message } => match &interaction.channel_id {
            Some(channel) => {
                core.on_send_command(
                    &ChatChannelId::new(channel.clone()),
                    &interaction.display_name(),
                    &message,
                )
                .await
            }
            None => Reply::Rejected(COMMAND_FAILED.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FileConfig;
    use crate::transport::testing::{RecordingChat, RecordingMesh};

    fn core() -> (BridgeCore, RecordingMesh) {
        let mut settings = FileConfig::parse(
            r#"{ "DISCORD_TOKEN": "t", "DISCORD_TO_MESH_ROUTES": { "C9": 2 } }"#,
        )
        .unwrap()
        .into_settings()
        .unwrap();
        settings.chunk_delay = std::time::Duration::ZERO;
        let mesh = RecordingMesh::default();
        let core = BridgeCore::new(
            &settings,
            Arc::new(mesh.clone()),
            Arc::new(RecordingChat::default()),
        );
        (core, mesh)
    }

    fn interaction(body: serde_json::Value) -> Interaction {
        let mut base = serde_json::json!({
            "id": "I1",
            "application_id": "A1",
            "type": 2,
            "token": "tok",
            "channel_id": "C9",
            "member": { "user": { "id": "U1", "username": "alice" }, "roles": [], "permissions": "0" }
        });
        base.as_object_mut()
            .unwrap()
            .extend(body.as_object().unwrap().clone());
        serde_json::from_value(base).unwrap()
    }

    #[tokio::test]
    async fn test_slash_send_runs_through_core() {
        let (core, mesh) = core();
        let i = interaction(serde_json::json!({
            "data": { "name": "send", "options": [{ "name": "message", "value": "hello" }] }
        }));

        let reply = run_command(&core, &i, i.command().unwrap()).await;
        assert_eq!(reply.text(), Some("Sent to mesh channel 2: hello"));
        assert_eq!(mesh.texts(), vec![(2, "alice: hello".to_string())]);
    }

    #[tokio::test]
    async fn test_slash_bridge_requires_authorization() {
        let (core, _) = core();
        let i = interaction(serde_json::json!({
            "data": { "name": "bridge", "options": [{ "name": "pause" }] }
        }));

        let reply = run_command(&core, &i, i.command().unwrap()).await;
        assert_eq!(reply.text(), Some("Not authorized."));
        assert!(!core.gate().is_paused());
    }

    #[tokio::test]
    async fn test_unknown_slash_command_ignored() {
        let i = interaction(serde_json::json!({ "data": { "name": "ping" } }));
        assert!(i.command().is_none());
    }
}
