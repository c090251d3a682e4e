//! Bridge configuration.
//!
//! Read once at startup from a JSON file whose keys follow the bridge's
//! existing deployment format (`DISCORD_TOKEN`, `DISCORD_ROUTES`, ...), then
//! validated into typed [`BridgeSettings`]. Any problem here is fatal.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::flood::FloodConfig;
use crate::routing::{ChatChannelId, MeshChannel, RoutingTable};

/// Default mesh unit budget in bytes.
const DEFAULT_MESH_MAXLEN: u64 = 160;

/// Smallest unit budget that still leaves room for payload after a suffix.
const MIN_MESH_MAXLEN: u64 = 16;

const DEFAULT_CHUNK_DELAY_MS: u64 = 1500;

const DEFAULT_ACK_TIMEOUT_MS: u64 = 10_000;

const DEFAULT_COMMAND_PREFIX: &str = "!";

const DEFAULT_ADMONISH_REPLY: &str = "Language!!!";

/// A number that may also be written as a numeric string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Numeric {
    Int(u64),
    Text(String),
}

impl Numeric {
    fn to_u64(&self, key: &str) -> Result<u64> {
        match self {
            Numeric::Int(n) => Ok(*n),
            Numeric::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("{} must be a number, got {:?}", key, s))),
        }
    }
}

/// A single string or a list of strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

/// `FLOOD_PROTECT` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct FloodSection {
    pub window_seconds: Option<Numeric>,
    pub max_messages_per_window: Option<Numeric>,
    pub cooldown_seconds: Option<Numeric>,
    pub warn_in_channel: Option<bool>,
}

/// `ADMONISH` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AdmonishSection {
    #[serde(default)]
    pub words: Vec<String>,
    pub reply: Option<String>,
}

/// The config file as written on disk.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct FileConfig {
    pub discord_token: Option<String>,
    /// Discord application id, used to edit deferred interaction replies.
    pub client_id: Option<String>,
    /// Destination for mesh indices without an explicit route.
    pub discord_channel_id: Option<String>,
    #[serde(default)]
    pub discord_to_mesh_routes: HashMap<String, Numeric>,
    #[serde(default)]
    pub discord_routes: HashMap<String, String>,
    pub discord_always_forward_channel_ids: Option<OneOrMany>,
    pub discord_always_forward_channel_id: Option<OneOrMany>,
    #[serde(default)]
    pub bridge_admin_role_ids: Vec<String>,
    /// Command prefix for text commands.
    #[serde(rename = "identifier")]
    pub identifier: Option<String>,
    pub mesh_maxlen: Option<Numeric>,
    pub mesh_chunk_delay_ms: Option<Numeric>,
    pub mesh_ack_timeout_ms: Option<Numeric>,
    #[serde(default)]
    pub flood_protect: FloodSection,
    #[serde(default)]
    pub keyword_routes: HashMap<String, String>,
    pub discord_channel_id_meshmonday: Option<String>,
    pub admonish: Option<AdmonishSection>,
    #[serde(default)]
    pub debug: bool,
}

/// Reply sent back to the mesh when a listed word shows up.
#[derive(Debug, Clone)]
pub struct Admonish {
    /// Lowercased trigger words.
    pub words: Vec<String>,
    pub reply: String,
}

impl Admonish {
    pub fn triggered_by(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.words.iter().any(|w| lowered.contains(w.as_str()))
    }
}

/// Validated runtime settings.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub discord_token: String,
    pub application_id: Option<String>,
    pub routes: RoutingTable,
    pub always_forward: HashSet<ChatChannelId>,
    pub admin_roles: Vec<String>,
    pub command_prefix: String,
    pub mesh_max_len: usize,
    pub chunk_delay: Duration,
    pub mesh_ack_timeout: Duration,
    pub flood: FloodConfig,
    /// Keyword → extra Discord destination for inbound mesh text.
    pub keyword_routes: Vec<(String, ChatChannelId)>,
    pub admonish: Option<Admonish>,
    pub debug: bool,
}

impl FileConfig {
    /// Read and parse the config file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        serde_json::from_str(contents)
            .map_err(|e| Error::Config(format!("malformed config JSON: {}", e)))
    }

    /// Validate into typed settings.
    pub fn into_settings(self) -> Result<BridgeSettings> {
        let discord_token = self
            .discord_token
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| Error::Config("DISCORD_TOKEN is required".to_string()))?;

        let mut to_mesh = HashMap::new();
        for (channel, index) in &self.discord_to_mesh_routes {
            let key = format!("DISCORD_TO_MESH_ROUTES.{}", channel);
            let index = u8::try_from(index.to_u64(&key)?)
                .map_err(|_| Error::Config(format!("{} is not a valid mesh channel index", key)))?;
            to_mesh.insert(ChatChannelId::new(channel.clone()), MeshChannel(index));
        }

        let mut to_chat = HashMap::new();
        for (index, channel) in self.discord_routes {
            let index: u8 = index.trim().parse().map_err(|_| {
                Error::Config(format!("DISCORD_ROUTES key {:?} is not a mesh channel index", index))
            })?;
            to_chat.insert(MeshChannel(index), ChatChannelId::new(channel));
        }

        let default_chat = self
            .discord_channel_id
            .filter(|c| !c.trim().is_empty())
            .map(ChatChannelId::new);

        let routes = RoutingTable::new(to_mesh, to_chat, default_chat);
        if routes.is_empty() {
            return Err(Error::Config(
                "no routes configured: set DISCORD_TO_MESH_ROUTES, DISCORD_ROUTES or DISCORD_CHANNEL_ID"
                    .to_string(),
            ));
        }

        let always_forward = self
            .discord_always_forward_channel_ids
            .or(self.discord_always_forward_channel_id)
            .map(OneOrMany::into_vec)
            .unwrap_or_default()
            .into_iter()
            .map(ChatChannelId::new)
            .collect();

        let command_prefix = self
            .identifier
            .unwrap_or_else(|| DEFAULT_COMMAND_PREFIX.to_string());
        if command_prefix.is_empty() {
            return Err(Error::Config("identifier must not be empty".to_string()));
        }

        let mesh_max_len = match &self.mesh_maxlen {
            Some(n) => n.to_u64("MESH_MAXLEN")?,
            None => DEFAULT_MESH_MAXLEN,
        };
        if mesh_max_len < MIN_MESH_MAXLEN {
            return Err(Error::Config(format!(
                "MESH_MAXLEN must be at least {}",
                MIN_MESH_MAXLEN
            )));
        }

        let chunk_delay = match &self.mesh_chunk_delay_ms {
            Some(n) => n.to_u64("MESH_CHUNK_DELAY_MS")?,
            None => DEFAULT_CHUNK_DELAY_MS,
        };

        let ack_timeout = match &self.mesh_ack_timeout_ms {
            Some(n) => n.to_u64("MESH_ACK_TIMEOUT_MS")?,
            None => DEFAULT_ACK_TIMEOUT_MS,
        };

        let flood = self.flood_protect.into_flood_config()?;

        let mut keyword_routes: Vec<(String, ChatChannelId)> = self
            .keyword_routes
            .into_iter()
            .filter(|(k, _)| !k.is_empty())
            .map(|(k, c)| (k, ChatChannelId::new(c)))
            .collect();
        if let Some(channel) = self.discord_channel_id_meshmonday {
            if !keyword_routes.iter().any(|(k, _)| k == "#meshmonday") {
                keyword_routes.push(("#meshmonday".to_string(), ChatChannelId::new(channel)));
            }
        }
        keyword_routes.sort_by(|a, b| a.0.cmp(&b.0));

        let admonish = self.admonish.and_then(|section| {
            let words: Vec<String> = section
                .words
                .iter()
                .map(|w| w.trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect();
            (!words.is_empty()).then(|| Admonish {
                words,
                reply: section
                    .reply
                    .unwrap_or_else(|| DEFAULT_ADMONISH_REPLY.to_string()),
            })
        });

        Ok(BridgeSettings {
            discord_token,
            application_id: self.client_id.filter(|c| !c.is_empty()),
            routes,
            always_forward,
            admin_roles: self.bridge_admin_role_ids,
            command_prefix,
            mesh_max_len: mesh_max_len as usize,
            chunk_delay: Duration::from_millis(chunk_delay),
            mesh_ack_timeout: Duration::from_millis(ack_timeout),
            flood,
            keyword_routes,
            admonish,
            debug: self.debug,
        })
    }
}

impl FloodSection {
    fn into_flood_config(self) -> Result<FloodConfig> {
        let secs = |value: &Option<Numeric>, key: &str, default: u64| -> Result<u64> {
            let n = match value {
                Some(v) => v.to_u64(key)?,
                None => default,
            };
            Ok(n.max(1))
        };

        Ok(FloodConfig {
            window: Duration::from_secs(secs(&self.window_seconds, "FLOOD_PROTECT.WINDOW_SECONDS", 15)?),
            max_messages: secs(
                &self.max_messages_per_window,
                "FLOOD_PROTECT.MAX_MESSAGES_PER_WINDOW",
                6,
            )? as usize,
            cooldown: Duration::from_secs(secs(
                &self.cooldown_seconds,
                "FLOOD_PROTECT.COOLDOWN_SECONDS",
                60,
            )?),
            warn_in_channel: self.warn_in_channel != Some(false),
        })
    }
}
