//! Discord API and gateway payloads, limited to the fields the bridge reads.

use serde::{Deserialize, Serialize};

use crate::gate::Actor;
use crate::relay::{BridgeAction, ChatMessage};
use crate::routing::ChatChannelId;

// ── Gateway ───────────────────────────────────────────────────────────────────

pub const OP_DISPATCH: i32 = 0;
pub const OP_HEARTBEAT: i32 = 1;
pub const OP_IDENTIFY: i32 = 2;
pub const OP_RECONNECT: i32 = 7;
pub const OP_INVALID_SESSION: i32 = 9;
pub const OP_HELLO: i32 = 10;
pub const OP_HEARTBEAT_ACK: i32 = 11;

pub const INTENT_GUILDS: u64 = 1 << 0;
pub const INTENT_GUILD_MESSAGES: u64 = 1 << 9;
pub const INTENT_MESSAGE_CONTENT: u64 = 1 << 15;

/// Raw gateway frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayPayload {
    pub op: i32,
    #[serde(default)]
    pub d: Option<serde_json::Value>,
    #[serde(default)]
    pub s: Option<u64>,
    #[serde(default)]
    pub t: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hello {
    pub heartbeat_interval: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Ready {
    pub user: User,
    pub session_id: String,
    #[serde(default)]
    pub application: Option<PartialApplication>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartialApplication {
    pub id: String,
}

// ── Objects ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub discriminator: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

impl User {
    /// `name#1234` for legacy accounts, plain username otherwise.
    pub fn tag(&self) -> String {
        match self.discriminator.as_deref() {
            Some(d) if !d.is_empty() && d != "0" => format!("{}#{}", self.username, d),
            _ => self.username.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Member {
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub nick: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    /// Resolved permissions; only present on interaction payloads.
    #[serde(default)]
    pub permissions: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Channel {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: u8,
}

impl Channel {
    /// Channel types that accept plain text messages.
    pub fn is_text_based(&self) -> bool {
        matches!(self.kind, 0 | 1 | 2 | 3 | 5 | 10 | 11 | 12 | 13)
    }
}

/// `MESSAGE_CREATE` dispatch.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageCreate {
    pub id: String,
    pub channel_id: String,
    #[serde(default)]
    pub guild_id: Option<String>,
    pub author: User,
    #[serde(default)]
    pub member: Option<Member>,
    #[serde(default)]
    pub content: String,
}

impl MessageCreate {
    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage {
            channel: ChatChannelId::new(self.channel_id.clone()),
            display_name: display_name(self.member.as_ref(), &self.author),
            content: self.content.clone(),
            from_bot: self.author.bot,
            in_guild: self.guild_id.is_some(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateMessage<'a> {
    pub content: &'a str,
    /// Never ping anyone from relayed text.
    pub allowed_mentions: AllowedMentions,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AllowedMentions {
    pub parse: Vec<String>,
}

// ── Interactions ──────────────────────────────────────────────────────────────

pub const INTERACTION_APPLICATION_COMMAND: u8 = 2;
pub const CALLBACK_DEFERRED_CHANNEL_MESSAGE: u8 = 5;
pub const FLAG_EPHEMERAL: u64 = 1 << 6;

/// `INTERACTION_CREATE` dispatch.
#[derive(Debug, Clone, Deserialize)]
pub struct Interaction {
    pub id: String,
    pub application_id: String,
    #[serde(rename = "type")]
    pub kind: u8,
    pub token: String,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub member: Option<Member>,
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub data: Option<CommandData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandData {
    pub name: String,
    #[serde(default)]
    pub options: Vec<CommandOption>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandOption {
    pub name: String,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    #[serde(default)]
    pub options: Vec<CommandOption>,
}

/// A chat-input command the bridge understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    Send { message: String },
    Advert,
    Bridge(Option<BridgeAction>),
}

impl Interaction {
    pub fn command(&self) -> Option<SlashCommand> {
        if self.kind != INTERACTION_APPLICATION_COMMAND {
            return None;
        }
        let data = self.data.as_ref()?;
        match data.name.as_str() {
            "send" => {
                let message = data
                    .options
                    .iter()
                    .find(|o| o.name == "message")
                    .and_then(|o| o.value.as_ref())
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                Some(SlashCommand::Send { message })
            }
            "advert" => Some(SlashCommand::Advert),
            "bridge" => Some(SlashCommand::Bridge(
                data.options
                    .first()
                    .and_then(|sub| BridgeAction::parse(&sub.name)),
            )),
            _ => None,
        }
    }

    fn invoking_user(&self) -> User {
        self.member
            .as_ref()
            .and_then(|m| m.user.clone())
            .or_else(|| self.user.clone())
            .unwrap_or_default()
    }

    pub fn actor(&self) -> Actor {
        let user = self.invoking_user();
        let member = self.member.clone().unwrap_or_default();
        Actor {
            id: user.id.clone(),
            tag: user.tag(),
            roles: member.roles,
            permissions: member.permissions.and_then(|p| p.parse().ok()),
        }
    }

    pub fn display_name(&self) -> String {
        display_name(self.member.as_ref(), &self.invoking_user())
    }
}

fn display_name(member: Option<&Member>, user: &User) -> String {
    member
        .and_then(|m| m.nick.clone())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| user.username.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_create_translation() {
        let msg: MessageCreate = serde_json::from_value(serde_json::json!({
            "id": "m1",
            "channel_id": "C9",
            "guild_id": "G1",
            "author": { "id": "U1", "username": "alice" },
            "member": { "nick": "Al", "roles": [] },
            "content": "hello"
        }))
        .unwrap();

        let chat = msg.to_chat_message();
        assert_eq!(chat.channel.as_str(), "C9");
        assert_eq!(chat.display_name, "Al");
        assert!(chat.in_guild);
        assert!(!chat.from_bot);
    }

    #[test]
    fn test_dm_from_bot() {
        let msg: MessageCreate = serde_json::from_value(serde_json::json!({
            "id": "m1",
            "channel_id": "D1",
            "author": { "id": "B1", "username": "robot", "bot": true },
            "content": "beep"
        }))
        .unwrap();

        let chat = msg.to_chat_message();
        assert_eq!(chat.display_name, "robot");
        assert!(!chat.in_guild);
        assert!(chat.from_bot);
    }

    #[test]
    fn test_slash_command_parsing() {
        let interaction: Interaction = serde_json::from_value(serde_json::json!({
            "id": "I1",
            "application_id": "A1",
            "type": 2,
            "token": "tok",
            "channel_id": "C9",
            "member": {
                "user": { "id": "U1", "username": "alice", "discriminator": "0" },
                "roles": ["R1"],
                "permissions": "32"
            },
            "data": { "name": "bridge", "options": [{ "name": "pause" }] }
        }))
        .unwrap();

        assert_eq!(
            interaction.command(),
            Some(SlashCommand::Bridge(Some(BridgeAction::Pause)))
        );
        let actor = interaction.actor();
        assert_eq!(actor.tag, "alice");
        assert_eq!(actor.roles, vec!["R1".to_string()]);
        assert_eq!(actor.permissions, Some(0x20));
        assert_eq!(interaction.display_name(), "alice");
    }

    #[test]
    fn test_send_command_message_option() {
        let interaction: Interaction = serde_json::from_value(serde_json::json!({
            "id": "I1",
            "application_id": "A1",
            "type": 2,
            "token": "tok",
            "user": { "id": "U1", "username": "bob", "discriminator": "1234" },
            "data": { "name": "send", "options": [{ "name": "message", "value": "hi all" }] }
        }))
        .unwrap();

        assert_eq!(
            interaction.command(),
            Some(SlashCommand::Send {
                message: "hi all".to_string()
            })
        );
        assert_eq!(interaction.actor().tag, "bob#1234");
    }

    #[test]
    fn test_text_based_channel_types() {
        let text = Channel { id: "1".into(), kind: 0 };
        let category = Channel { id: "2".into(), kind: 4 };
        let forum = Channel { id: "3".into(), kind: 15 };
        assert!(text.is_text_based());
        assert!(!category.is_text_based());
        assert!(!forum.is_text_based());
    }
}
