//! The relay core.
//!
//! One `BridgeCore` is built at startup and cloned into every handler. It owns
//! the gate, the flood governor, the send queue and the routing table, and it
//! is the only thing that enqueues mesh transmissions.
//!
//! Outbound (Discord → mesh):
//! gate → flood governor → routing → normalize → chunk → send queue.
//!
//! Inbound (mesh → Discord):
//! reaction filter → gate → routing → Discord.
//!
//! Command handlers return a [`Reply`] that the Discord side renders.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::chunking::ChunkEnvelope;
use crate::config::{Admonish, BridgeSettings};
use crate::flood::{FloodDecision, FloodGovernor};
use crate::gate::{Actor, Authorizer, BridgeGate, BridgeState};
use crate::normalize::normalize;
use crate::queue::{SendHandle, SendQueue};
use crate::react::is_reaction_echo;
use crate::routing::{ChatChannelId, MeshChannel, RoutingTable};
use crate::transport::{ChatChannel, ChatTransport, MeshTransport};

const NOT_MAPPED: &str = "This channel is not mapped to a mesh channel.";
const PAUSED_SEND: &str = "Bridge is paused; not sending to mesh.";
const PAUSED_ADVERT: &str = "Bridge is paused; not sending advert to mesh.";
const FLOOD_ACTIVE: &str = "Flood protection active; try again in a bit.";
const NOT_AUTHORIZED: &str = "Not authorized.";
pub const COMMAND_FAILED: &str = "Something went wrong handling that command.";

/// What a handler wants said back to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Success(String),
    Rejected(String),
    /// Nothing to say.
    Silent,
}

impl Reply {
    pub fn text(&self) -> Option<&str> {
        match self {
            Reply::Success(t) | Reply::Rejected(t) => Some(t),
            Reply::Silent => None,
        }
    }
}

/// A plain Discord message as seen by the bridge.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub channel: ChatChannelId,
    /// Nickname if set, otherwise username.
    pub display_name: String,
    pub content: String,
    pub from_bot: bool,
    pub in_guild: bool,
}

/// `/bridge` subcommands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeAction {
    Status,
    Pause,
    Resume,
}

impl BridgeAction {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "status" => Some(BridgeAction::Status),
            "pause" => Some(BridgeAction::Pause),
            "resume" => Some(BridgeAction::Resume),
            _ => None,
        }
    }
}

/// What happened to one inbound mesh message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    Delivered(ChatChannelId),
    ReactionEcho,
    Paused,
    Unrouted,
    /// A destination existed but delivery failed.
    Failed,
}

/// Settings the core consults on every message.
#[derive(Debug, Clone)]
struct RelayOptions {
    mesh_max_len: usize,
    chunk_delay: Duration,
    always_forward: HashSet<ChatChannelId>,
    command_prefix: String,
    keyword_routes: Vec<(String, ChatChannelId)>,
    admonish: Option<Admonish>,
}

/// Snapshot for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CoreStatus {
    pub bridge: BridgeState,
    pub queue_depth: usize,
    pub flood_sources: usize,
}

#[derive(Clone)]
pub struct BridgeCore {
    routes: Arc<RoutingTable>,
    gate: BridgeGate,
    flood: FloodGovernor,
    queue: SendQueue,
    mesh: Arc<dyn MeshTransport>,
    chat: Arc<dyn ChatTransport>,
    /// Route targets already confirmed to exist and accept text.
    channels: Arc<DashMap<ChatChannelId, ChatChannel>>,
    options: Arc<RelayOptions>,
}

impl BridgeCore {
    /// Build the core and start its send-queue worker. Must be called inside a
    /// Tokio runtime.
    pub fn new(
        settings: &BridgeSettings,
        mesh: Arc<dyn MeshTransport>,
        chat: Arc<dyn ChatTransport>,
    ) -> Self {
        Self {
            routes: Arc::new(settings.routes.clone()),
            gate: BridgeGate::new(Authorizer::new(settings.admin_roles.iter().cloned())),
            flood: FloodGovernor::new(settings.flood.clone()),
            queue: SendQueue::start(),
            mesh,
            chat,
            channels: Arc::new(DashMap::new()),
            options: Arc::new(RelayOptions {
                mesh_max_len: settings.mesh_max_len,
                chunk_delay: settings.chunk_delay,
                always_forward: settings.always_forward.clone(),
                command_prefix: settings.command_prefix.clone(),
                keyword_routes: settings.keyword_routes.clone(),
                admonish: settings.admonish.clone(),
            }),
        }
    }

    pub fn gate(&self) -> &BridgeGate {
        &self.gate
    }

    pub fn status(&self) -> CoreStatus {
        CoreStatus {
            bridge: self.gate.status(),
            queue_depth: self.queue.depth(),
            flood_sources: self.flood.tracked_sources(),
        }
    }

    // ── Mesh → Discord ────────────────────────────────────────────────────

    /// Relay one channel message received from the radio.
    pub async fn on_mesh_message(&self, channel: MeshChannel, text: &str) -> InboundOutcome {
        if is_reaction_echo(text) {
            tracing::debug!(channel_idx = %channel, text = text, "Ignored mesh reaction echo");
            return InboundOutcome::ReactionEcho;
        }

        if self.gate.is_paused() {
            tracing::debug!(channel_idx = %channel, "Bridge paused; dropping mesh->discord message");
            return InboundOutcome::Paused;
        }

        for (keyword, dest) in &self.options.keyword_routes {
            if text.contains(keyword.as_str()) {
                self.deliver(dest, text).await;
            }
        }

        if let Some(admonish) = &self.options.admonish {
            if admonish.triggered_by(text) {
                self.admonish(channel, admonish).await;
            }
        }

        let Some(dest) = self.routes.chat_channel_for(channel) else {
            tracing::debug!(channel_idx = %channel, "No Discord route for mesh channel, dropping");
            return InboundOutcome::Unrouted;
        };

        if self.deliver(dest, text).await {
            InboundOutcome::Delivered(dest.clone())
        } else {
            InboundOutcome::Failed
        }
    }

    async fn admonish(&self, channel: MeshChannel, admonish: &Admonish) {
        let mesh = self.mesh.clone();
        let gate = self.gate.clone();
        let reply = admonish.reply.clone();
        let handle = self.queue.enqueue(format!("admonish ch={}", channel), async move {
            if gate.is_paused() {
                tracing::debug!(channel_idx = %channel, "Bridge paused before admonish, dropping");
                return Ok(());
            }
            mesh.send_channel_text(channel, &reply).await
        });
        if let Err(e) = handle.wait().await {
            tracing::error!(error = %e, "Admonish send was not queued");
        }
        if self.gate.is_paused() {
            return;
        }

        if let Some(dest) = self.routes.chat_channel_for(channel) {
            self.deliver(dest, &admonish.reply).await;
        }
    }

    /// Post `text` into a Discord channel after checking it accepts text.
    async fn deliver(&self, dest: &ChatChannelId, text: &str) -> bool {
        if !self.channels.contains_key(dest) {
            match self.chat.fetch_channel(dest).await {
                Ok(Some(channel)) if channel.text_based => {
                    self.channels.insert(dest.clone(), channel);
                }
                Ok(_) => {
                    tracing::error!(channel = %dest, "Route target missing or not text-based");
                    return false;
                }
                Err(e) => {
                    tracing::error!(channel = %dest, error = %e, "Failed to fetch route target");
                    return false;
                }
            }
        }

        tracing::debug!(channel = %dest, "Delivering mesh text to Discord");
        match self.chat.send(dest, text).await {
            Ok(()) => true,
            Err(e) => {
                // Look the channel up again next time; it may have been deleted.
                self.channels.remove(dest);
                tracing::error!(channel = %dest, error = %e, "Failed to deliver to Discord");
                false
            }
        }
    }

    // ── Discord → mesh ────────────────────────────────────────────────────

    /// Queue one logical message for the mesh.
    ///
    /// The whole message, inter-chunk delays included, is one queue task, so
    /// its chunks go out contiguously. A failing chunk is logged and the rest
    /// still go out. The gate is re-checked before every chunk.
    pub fn relay_to_mesh(&self, channel: MeshChannel, text: &str) -> Option<SendHandle> {
        let envelope = ChunkEnvelope::encode(&normalize(text), self.options.mesh_max_len);
        if envelope.is_empty() {
            return None;
        }

        let total = envelope.len();
        let units = envelope.units();
        let mesh = self.mesh.clone();
        let gate = self.gate.clone();
        let delay = self.options.chunk_delay;

        tracing::debug!(
            channel_idx = %channel,
            parts = total,
            max_len = self.options.mesh_max_len,
            "Queueing mesh send"
        );

        let handle = self.queue.enqueue(format!("send ch={} parts={}", channel, total), async move {
            if total == 1 {
                if gate.is_paused() {
                    tracing::debug!(channel_idx = %channel, "Bridge paused before transmission, dropping");
                    return Ok(());
                }
                return mesh.send_channel_text(channel, &units[0]).await;
            }

            for (i, unit) in units.iter().enumerate() {
                let part = i + 1;
                if gate.is_paused() {
                    tracing::debug!(
                        channel_idx = %channel,
                        part = part,
                        total = total,
                        "Bridge paused mid-message, dropping remaining chunks"
                    );
                    break;
                }

                tracing::debug!(channel_idx = %channel, part = part, total = total, len = unit.len(), "Mesh chunk");
                if let Err(e) = mesh.send_channel_text(channel, unit).await {
                    tracing::error!(
                        channel_idx = %channel,
                        part = part,
                        total = total,
                        error = %e,
                        "Mesh chunk send failed"
                    );
                }

                if part < total && !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            Ok(())
        });

        Some(handle)
    }

    /// Run the flood governor for `source`, posting the one-time warning.
    async fn flood_allows(&self, source: &ChatChannelId) -> bool {
        match self.flood.check(source) {
            FloodDecision::Allow => true,
            FloodDecision::Deny => false,
            FloodDecision::DenyAndWarn => {
                if let Err(e) = self.chat.send(source, &self.flood.warning_text()).await {
                    tracing::error!(channel = %source, error = %e, "Flood protect: failed to post warning");
                }
                false
            }
        }
    }

    /// Shared tail of every send command.
    pub async fn handle_send(&self, channel: MeshChannel, author_name: &str, text: &str) -> Reply {
        if text.trim().is_empty() {
            return Reply::Rejected("Message required".to_string());
        }
        if self.gate.is_paused() {
            return Reply::Rejected(PAUSED_SEND.to_string());
        }

        if let Some(handle) = self.relay_to_mesh(channel, &format!("{}: {}", author_name, text)) {
            if let Err(e) = handle.wait().await {
                tracing::error!(error = %e, "Mesh send was not queued");
                return Reply::Rejected(COMMAND_FAILED.to_string());
            }
        }

        Reply::Success(format!("Sent to mesh channel {}: {}", channel, text))
    }

    /// `/advert` and `{prefix}advert`.
    pub async fn handle_advert(&self) -> Reply {
        if self.gate.is_paused() {
            return Reply::Rejected(PAUSED_ADVERT.to_string());
        }

        let mesh = self.mesh.clone();
        let gate = self.gate.clone();
        let (sent_tx, sent_rx) = oneshot::channel();
        let handle = self.queue.enqueue("flood advert", async move {
            if gate.is_paused() {
                tracing::debug!("Bridge paused before advert, dropping");
                let _ = sent_tx.send(false);
                return Ok(());
            }
            let _ = sent_tx.send(true);
            mesh.send_flood_advert().await
        });
        if let Err(e) = handle.wait().await {
            tracing::error!(error = %e, "Advert was not queued");
            return Reply::Rejected(COMMAND_FAILED.to_string());
        }
        if let Ok(false) = sent_rx.await {
            return Reply::Rejected(PAUSED_ADVERT.to_string());
        }

        Reply::Success("Sending Flood Advert!".to_string())
    }

    /// `/bridge status|pause|resume`. Every subcommand requires authorization.
    pub fn handle_bridge(&self, actor: &Actor, action: Option<BridgeAction>) -> Reply {
        if !self.gate.is_authorized(actor) {
            return Reply::Rejected(NOT_AUTHORIZED.to_string());
        }

        let result = match action {
            Some(BridgeAction::Status) => return Reply::Success(self.gate.status().describe()),
            Some(BridgeAction::Pause) => self
                .gate
                .pause(actor)
                .map(|_| "Bridge paused. Forwarding is stopped."),
            Some(BridgeAction::Resume) => self
                .gate
                .resume(actor)
                .map(|_| "Bridge resumed. Forwarding is active."),
            None => return Reply::Rejected("Unknown subcommand.".to_string()),
        };

        match result {
            Ok(text) => Reply::Success(text.to_string()),
            Err(_) => Reply::Rejected(NOT_AUTHORIZED.to_string()),
        }
    }

    /// `/send message:<text>` issued in `channel`.
    pub async fn on_send_command(
        &self,
        channel: &ChatChannelId,
        author_name: &str,
        text: &str,
    ) -> Reply {
        if self.gate.is_paused() {
            return Reply::Rejected(PAUSED_SEND.to_string());
        }
        if !self.flood_allows(channel).await {
            return Reply::Rejected(FLOOD_ACTIVE.to_string());
        }
        let Some(index) = self.routes.mesh_index_for(channel) else {
            return Reply::Rejected(NOT_MAPPED.to_string());
        };

        // Mirror what is being sent into the channel itself.
        if let Err(e) = self
            .chat
            .send(channel, &format!("{}: {}", author_name, text))
            .await
        {
            tracing::warn!(channel = %channel, error = %e, "Failed to echo /send into channel");
        }

        self.handle_send(index, author_name, text).await
    }

    /// Any plain guild message: always-forward relay or a prefix command.
    pub async fn on_chat_message(&self, msg: &ChatMessage) -> Reply {
        if msg.from_bot || !msg.in_guild {
            return Reply::Silent;
        }

        let prefix = self.options.command_prefix.as_str();

        if self.options.always_forward.contains(&msg.channel) {
            self.forward_always(msg, prefix).await;
            return Reply::Silent;
        }

        let Some(rest) = msg.content.strip_prefix(prefix) else {
            return Reply::Silent;
        };

        let mut args = rest.split_whitespace();
        let command = args.next().map(str::to_lowercase).unwrap_or_default();

        match command.as_str() {
            "advert" => self.handle_advert().await,
            "send" => {
                if self.gate.is_paused() {
                    return Reply::Rejected(PAUSED_SEND.to_string());
                }
                if !self.flood_allows(&msg.channel).await {
                    return Reply::Silent;
                }
                let Some(index) = self.routes.mesh_index_for(&msg.channel) else {
                    return Reply::Rejected(NOT_MAPPED.to_string());
                };
                let text = args.collect::<Vec<_>>().join(" ");
                self.handle_send(index, &msg.display_name, &text).await
            }
            _ => Reply::Silent,
        }
    }

    async fn forward_always(&self, msg: &ChatMessage, prefix: &str) {
        if self.gate.is_paused() {
            tracing::debug!(channel = %msg.channel, "Bridge paused; dropping always-forward message");
            return;
        }
        if !self.flood_allows(&msg.channel).await {
            return;
        }
        let Some(index) = self.routes.mesh_index_for(&msg.channel) else {
            tracing::debug!(channel = %msg.channel, "Always-forward channel not mapped");
            return;
        };
        if msg.content.starts_with(prefix) {
            return;
        }
        let content = msg.content.trim();
        if content.is_empty() {
            return;
        }

        let text = format!("{}: {}", msg.display_name, content);
        if let Some(handle) = self.relay_to_mesh(index, &text) {
            if let Err(e) = handle.wait().await {
                tracing::error!(error = %e, "Always-forward send was not queued");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::config::FileConfig;
    use crate::transport::testing::{MeshCall, RecordingChat, RecordingMesh};

    fn settings() -> BridgeSettings {
        let mut settings = FileConfig::parse(
            r##"{
                "DISCORD_TOKEN": "t",
                "DISCORD_CHANNEL_ID": "C1",
                "DISCORD_TO_MESH_ROUTES": { "C9": 2, "CA": 3 },
                "DISCORD_ROUTES": { "2": "C9" },
                "DISCORD_ALWAYS_FORWARD_CHANNEL_IDS": ["CA"],
                "BRIDGE_ADMIN_ROLE_IDS": ["admins"],
                "MESH_MAXLEN": 40,
                "MESH_CHUNK_DELAY_MS": 0,
                "KEYWORD_ROUTES": { "#meshmonday": "C77" },
                "ADMONISH": { "WORDS": ["darn"] }
            }"##,
        )
        .unwrap()
        .into_settings()
        .unwrap();
        settings.chunk_delay = Duration::ZERO;
        settings
    }

    fn core_with(mesh: RecordingMesh, chat: RecordingChat, settings: &BridgeSettings) -> BridgeCore {
        BridgeCore::new(settings, Arc::new(mesh), Arc::new(chat))
    }

    fn message(channel: &str, content: &str) -> ChatMessage {
        ChatMessage {
            channel: ChatChannelId::from(channel),
            display_name: "alice".to_string(),
            content: content.to_string(),
            from_bot: false,
            in_guild: true,
        }
    }

    fn admin() -> Actor {
        Actor {
            id: "U2".to_string(),
            tag: "root".to_string(),
            roles: vec!["admins".to_string()],
            permissions: None,
        }
    }

    #[tokio::test]
    async fn test_inbound_routing() {
        let chat = RecordingChat::default();
        let core = core_with(RecordingMesh::default(), chat.clone(), &settings());

        assert_eq!(
            core.on_mesh_message(MeshChannel(2), "hi from 2").await,
            InboundOutcome::Delivered(ChatChannelId::from("C9"))
        );
        assert_eq!(
            core.on_mesh_message(MeshChannel(5), "hi from 5").await,
            InboundOutcome::Delivered(ChatChannelId::from("C1"))
        );
        assert_eq!(
            chat.sent(),
            vec![
                ("C9".to_string(), "hi from 2".to_string()),
                ("C1".to_string(), "hi from 5".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_inbound_without_default_is_dropped() {
        let mut settings = settings();
        settings.routes = RoutingTable::new(
            HashMap::new(),
            HashMap::from([(MeshChannel(2), ChatChannelId::from("C9"))]),
            None,
        );
        let chat = RecordingChat::default();
        let core = core_with(RecordingMesh::default(), chat.clone(), &settings);

        assert_eq!(
            core.on_mesh_message(MeshChannel(7), "anyone?").await,
            InboundOutcome::Unrouted
        );
        assert!(chat.sent().is_empty());
    }

    #[tokio::test]
    async fn test_inbound_reaction_echo_suppressed() {
        let chat = RecordingChat::default();
        let core = core_with(RecordingMesh::default(), chat.clone(), &settings());

        assert_eq!(
            core.on_mesh_message(MeshChannel(2), "😀@[Alice]xp8q7fcc").await,
            InboundOutcome::ReactionEcho
        );
        assert!(chat.sent().is_empty());
    }

    #[tokio::test]
    async fn test_inbound_suppressed_while_paused() {
        let chat = RecordingChat::default();
        let core = core_with(RecordingMesh::default(), chat.clone(), &settings());

        core.gate().pause(&admin()).unwrap();
        assert_eq!(
            core.on_mesh_message(MeshChannel(2), "hello").await,
            InboundOutcome::Paused
        );
        assert!(chat.sent().is_empty());

        core.gate().resume(&admin()).unwrap();
        assert!(matches!(
            core.on_mesh_message(MeshChannel(2), "hello").await,
            InboundOutcome::Delivered(_)
        ));
    }

    #[tokio::test]
    async fn test_inbound_to_non_text_channel_fails() {
        let chat = RecordingChat {
            voice_channels: ["C9".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let core = core_with(RecordingMesh::default(), chat.clone(), &settings());

        assert_eq!(
            core.on_mesh_message(MeshChannel(2), "hello").await,
            InboundOutcome::Failed
        );
        assert!(chat.sent().is_empty());
    }

    #[tokio::test]
    async fn test_keyword_route_and_admonish() {
        let mesh = RecordingMesh::default();
        let chat = RecordingChat::default();
        let core = core_with(mesh.clone(), chat.clone(), &settings());

        core.on_mesh_message(MeshChannel(2), "#meshmonday check in").await;
        assert_eq!(
            chat.sent(),
            vec![
                ("C77".to_string(), "#meshmonday check in".to_string()),
                ("C9".to_string(), "#meshmonday check in".to_string()),
            ]
        );

        assert!(mesh.texts().is_empty());

        core.on_mesh_message(MeshChannel(2), "well DARN it").await;
        assert_eq!(mesh.texts(), vec![(2, "Language!!!".to_string())]);
        let sent = chat.sent();
        assert_eq!(sent[2], ("C9".to_string(), "Language!!!".to_string()));
        assert_eq!(sent[3], ("C9".to_string(), "well DARN it".to_string()));
    }

    #[tokio::test]
    async fn test_slash_send_echoes_and_relays() {
        let mesh = RecordingMesh::default();
        let chat = RecordingChat::default();
        let core = core_with(mesh.clone(), chat.clone(), &settings());

        let reply = core
            .on_send_command(&ChatChannelId::from("C9"), "alice", "hello mesh")
            .await;
        assert_eq!(
            reply,
            Reply::Success("Sent to mesh channel 2: hello mesh".to_string())
        );
        assert_eq!(mesh.texts(), vec![(2, "alice: hello mesh".to_string())]);
        assert_eq!(
            chat.sent(),
            vec![("C9".to_string(), "alice: hello mesh".to_string())]
        );
    }

    #[tokio::test]
    async fn test_slash_send_in_unmapped_channel() {
        let mesh = RecordingMesh::default();
        let core = core_with(mesh.clone(), RecordingChat::default(), &settings());

        let reply = core
            .on_send_command(&ChatChannelId::from("C404"), "alice", "hello")
            .await;
        assert_eq!(reply.text(), Some(NOT_MAPPED));
        assert!(mesh.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_long_message_is_chunked_in_order() {
        let mesh = RecordingMesh::default();
        let core = core_with(mesh.clone(), RecordingChat::default(), &settings());

        let text = "one two three four five six seven eight nine ten eleven twelve";
        core.handle_send(MeshChannel(2), "alice", text).await;

        let texts = mesh.texts();
        assert!(texts.len() > 1);
        for (i, (channel, unit)) in texts.iter().enumerate() {
            assert_eq!(*channel, 2);
            assert!(unit.len() <= 40);
            assert!(unit.ends_with(&format!(" {}/{}", i + 1, texts.len())));
        }
    }

    #[tokio::test]
    async fn test_concurrent_messages_do_not_interleave() {
        let mesh = RecordingMesh::default();
        let core = core_with(mesh.clone(), RecordingChat::default(), &settings());

        let a = core.relay_to_mesh(MeshChannel(2), &"a".repeat(200)).unwrap();
        let b = core.relay_to_mesh(MeshChannel(3), &"b".repeat(200)).unwrap();
        a.wait().await.unwrap();
        b.wait().await.unwrap();

        let channels: Vec<u8> = mesh.texts().iter().map(|(c, _)| *c).collect();
        let split = channels.iter().position(|c| *c == 3).unwrap();
        assert!(channels[..split].iter().all(|c| *c == 2));
        assert!(channels[split..].iter().all(|c| *c == 3));
    }

    #[tokio::test]
    async fn test_failed_chunk_does_not_stop_the_rest() {
        let mesh = RecordingMesh {
            fail_marker: Some(" 2/".to_string()),
            ..Default::default()
        };
        let core = core_with(mesh.clone(), RecordingChat::default(), &settings());

        core.relay_to_mesh(MeshChannel(2), &"z".repeat(100))
            .unwrap()
            .wait()
            .await
            .unwrap();

        let texts = mesh.texts();
        assert!(texts.iter().all(|(_, t)| !t.contains(" 2/")));
        assert!(texts.iter().any(|(_, t)| t.contains(" 1/")));
        assert!(texts.iter().any(|(_, t)| t.contains(" 3/")));
    }

    #[tokio::test]
    async fn test_always_forward_flood_governor() {
        let mesh = RecordingMesh::default();
        let chat = RecordingChat::default();
        let core = core_with(mesh.clone(), chat.clone(), &settings());

        for i in 0..8 {
            let reply = core.on_chat_message(&message("CA", &format!("msg {}", i))).await;
            assert_eq!(reply, Reply::Silent);
        }

        assert_eq!(mesh.texts().len(), 6);
        assert_eq!(mesh.texts()[0], (3, "alice: msg 0".to_string()));
        let warnings: Vec<_> = chat
            .sent()
            .into_iter()
            .filter(|(c, t)| c == "CA" && t.contains("flood protection"))
            .collect();
        assert_eq!(warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_always_forward_skips_commands_bots_and_blank() {
        let mesh = RecordingMesh::default();
        let core = core_with(mesh.clone(), RecordingChat::default(), &settings());

        core.on_chat_message(&message("CA", "!send nope")).await;
        core.on_chat_message(&message("CA", "   ")).await;
        let mut bot = message("CA", "beep");
        bot.from_bot = true;
        core.on_chat_message(&bot).await;
        let mut dm = message("CA", "psst");
        dm.in_guild = false;
        core.on_chat_message(&dm).await;

        assert!(mesh.texts().is_empty());
    }

    #[tokio::test]
    async fn test_prefix_commands() {
        let mesh = RecordingMesh::default();
        let core = core_with(mesh.clone(), RecordingChat::default(), &settings());

        let reply = core.on_chat_message(&message("C9", "!send  hi   there")).await;
        assert_eq!(reply, Reply::Success("Sent to mesh channel 2: hi there".to_string()));

        let reply = core.on_chat_message(&message("C9", "!ADVERT")).await;
        assert_eq!(reply, Reply::Success("Sending Flood Advert!".to_string()));

        let reply = core.on_chat_message(&message("C404", "!send hi")).await;
        assert_eq!(reply.text(), Some(NOT_MAPPED));

        let reply = core.on_chat_message(&message("C9", "!send")).await;
        assert_eq!(reply, Reply::Rejected("Message required".to_string()));

        assert_eq!(core.on_chat_message(&message("C9", "just chatting")).await, Reply::Silent);
        assert_eq!(core.on_chat_message(&message("C9", "!bridge pause")).await, Reply::Silent);

        assert_eq!(
            *mesh.calls.lock(),
            vec![
                MeshCall::Text(MeshChannel(2), "alice: hi there".to_string()),
                MeshCall::Advert,
            ]
        );
    }

    #[tokio::test]
    async fn test_paused_bridge_rejects_outbound() {
        let mesh = RecordingMesh::default();
        let core = core_with(mesh.clone(), RecordingChat::default(), &settings());
        core.gate().pause(&admin()).unwrap();

        assert_eq!(core.handle_advert().await.text(), Some(PAUSED_ADVERT));
        assert_eq!(
            core.on_send_command(&ChatChannelId::from("C9"), "alice", "hi").await.text(),
            Some(PAUSED_SEND)
        );
        core.on_chat_message(&message("CA", "forward me")).await;
        assert!(mesh.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_bridge_command_authorization() {
        let core = core_with(RecordingMesh::default(), RecordingChat::default(), &settings());
        let member = Actor {
            id: "U1".to_string(),
            tag: "alice".to_string(),
            roles: vec![],
            permissions: Some(0x400),
        };

        assert_eq!(
            core.handle_bridge(&member, Some(BridgeAction::Pause)).text(),
            Some(NOT_AUTHORIZED)
        );
        assert!(!core.gate().is_paused());

        assert_eq!(
            core.handle_bridge(&admin(), Some(BridgeAction::Pause)),
            Reply::Success("Bridge paused. Forwarding is stopped.".to_string())
        );
        let status = core.handle_bridge(&admin(), Some(BridgeAction::Status));
        assert!(status.text().unwrap().starts_with("Bridge status: **PAUSED** by **root**"));

        assert_eq!(
            core.handle_bridge(&admin(), Some(BridgeAction::Resume)),
            Reply::Success("Bridge resumed. Forwarding is active.".to_string())
        );
        assert_eq!(
            core.handle_bridge(&admin(), None),
            Reply::Rejected("Unknown subcommand.".to_string())
        );
        assert_eq!(core.status().bridge, BridgeState::Running);
    }

    /// Park the send queue behind a task that finishes when the returned
    /// sender fires.
    fn hold_queue(core: &BridgeCore) -> oneshot::Sender<()> {
        let (release, held) = oneshot::channel::<()>();
        core.queue.enqueue("hold", async move {
            let _ = held.await;
            Ok(())
        });
        release
    }

    async fn wait_for_depth(core: &BridgeCore, depth: usize) {
        while core.queue.depth() < depth {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_pause_mid_message_drops_remaining_chunks() {
        let mut settings = settings();
        settings.chunk_delay = Duration::from_millis(50);
        let mesh = RecordingMesh::default();
        let core = core_with(mesh.clone(), RecordingChat::default(), &settings);

        let handle = core.relay_to_mesh(MeshChannel(2), &"z".repeat(100)).unwrap();
        while mesh.texts().is_empty() {
            tokio::task::yield_now().await;
        }
        core.gate().pause(&admin()).unwrap();
        handle.wait().await.unwrap();

        let texts = mesh.texts();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].1.contains(" 1/"));
    }

    #[tokio::test]
    async fn test_single_unit_dropped_when_paused_before_transmission() {
        let mesh = RecordingMesh::default();
        let core = core_with(mesh.clone(), RecordingChat::default(), &settings());

        let release = hold_queue(&core);
        let handle = core.relay_to_mesh(MeshChannel(2), "short one").unwrap();
        core.gate().pause(&admin()).unwrap();
        release.send(()).unwrap();
        handle.wait().await.unwrap();

        assert!(mesh.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_advert_dropped_when_paused_while_queued() {
        let mesh = RecordingMesh::default();
        let core = core_with(mesh.clone(), RecordingChat::default(), &settings());

        let release = hold_queue(&core);
        let advert = tokio::spawn({
            let core = core.clone();
            async move { core.handle_advert().await }
        });
        wait_for_depth(&core, 2).await;
        core.gate().pause(&admin()).unwrap();
        release.send(()).unwrap();

        assert_eq!(advert.await.unwrap(), Reply::Rejected(PAUSED_ADVERT.to_string()));
        assert!(mesh.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_admonish_dropped_when_paused_while_queued() {
        let mesh = RecordingMesh::default();
        let chat = RecordingChat::default();
        let core = core_with(mesh.clone(), chat.clone(), &settings());

        let release = hold_queue(&core);
        let inbound = tokio::spawn({
            let core = core.clone();
            async move { core.on_mesh_message(MeshChannel(2), "darn").await }
        });
        wait_for_depth(&core, 2).await;
        core.gate().pause(&admin()).unwrap();
        release.send(()).unwrap();
        inbound.await.unwrap();

        assert!(mesh.calls.lock().is_empty());
        assert!(chat.sent().iter().all(|(_, t)| t != "Language!!!"));
    }

    #[tokio::test]
    async fn test_route_target_lookup_is_cached() {
        let chat = RecordingChat::default();
        let core = core_with(RecordingMesh::default(), chat.clone(), &settings());

        core.on_mesh_message(MeshChannel(2), "first").await;
        core.on_mesh_message(MeshChannel(2), "second").await;
        core.on_mesh_message(MeshChannel(5), "third").await;

        assert_eq!(*chat.fetched.lock(), vec!["C9".to_string(), "C1".to_string()]);
        assert_eq!(chat.sent().len(), 3);
    }

    #[tokio::test]
    async fn test_whitespace_only_send_rejected() {
        let mesh = RecordingMesh::default();
        let core = core_with(mesh.clone(), RecordingChat::default(), &settings());

        assert_eq!(
            core.handle_send(MeshChannel(2), "alice", " \t ").await,
            Reply::Rejected("Message required".to_string())
        );
        assert!(mesh.calls.lock().is_empty());
    }
}
