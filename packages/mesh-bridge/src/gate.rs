//! Pause/resume control over both relay directions.
//!
//! The gate starts RUNNING. Only authorized actors may flip it. While PAUSED
//! every relay path drops its message just before the side-effecting send;
//! inbound traffic is still read, just not forwarded.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::RwLock;
use serde::Serialize;

/// Discord ADMINISTRATOR permission bit (0x8).
pub const PERMISSION_ADMINISTRATOR: u64 = 0x8;

/// Discord MANAGE_GUILD permission bit (0x20).
pub const PERMISSION_MANAGE_GUILD: u64 = 0x20;

/// The Discord member issuing a command.
#[derive(Debug, Clone, Default)]
pub struct Actor {
    pub id: String,
    /// Display tag recorded when pausing.
    pub tag: String,
    pub roles: Vec<String>,
    /// Resolved permission bitfield, when Discord supplied one.
    pub permissions: Option<u64>,
}

/// Decides who may control the bridge.
#[derive(Debug, Clone, Default)]
pub struct Authorizer {
    admin_roles: HashSet<String>,
}

impl Authorizer {
    pub fn new(admin_roles: impl IntoIterator<Item = String>) -> Self {
        Self {
            admin_roles: admin_roles.into_iter().collect(),
        }
    }

    /// Administrator or Manage Guild, or any allow-listed role.
    pub fn is_authorized(&self, actor: &Actor) -> bool {
        let elevated = actor
            .permissions
            .is_some_and(|p| p & (PERMISSION_ADMINISTRATOR | PERMISSION_MANAGE_GUILD) != 0);
        elevated || actor.roles.iter().any(|r| self.admin_roles.contains(r))
    }
}

/// Current gate state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BridgeState {
    Running,
    Paused {
        paused_by: String,
        paused_at: DateTime<Utc>,
    },
}

impl BridgeState {
    pub fn is_paused(&self) -> bool {
        matches!(self, BridgeState::Paused { .. })
    }

    /// Human-readable status line for chat replies.
    pub fn describe(&self) -> String {
        match self {
            BridgeState::Running => "Bridge status: **RUNNING**".to_string(),
            BridgeState::Paused {
                paused_by,
                paused_at,
            } => format!(
                "Bridge status: **PAUSED** by **{}** at **{}**",
                paused_by,
                paused_at.to_rfc3339_opts(SecondsFormat::Millis, true)
            ),
        }
    }
}

/// The actor was not allowed to change the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unauthorized;

/// Process-wide pause/resume state machine.
#[derive(Clone)]
pub struct BridgeGate {
    state: Arc<RwLock<BridgeState>>,
    authorizer: Authorizer,
}

impl BridgeGate {
    pub fn new(authorizer: Authorizer) -> Self {
        Self {
            state: Arc::new(RwLock::new(BridgeState::Running)),
            authorizer,
        }
    }

    pub fn is_authorized(&self, actor: &Actor) -> bool {
        self.authorizer.is_authorized(actor)
    }

    /// Any state → PAUSED, recording who and when.
    pub fn pause(&self, actor: &Actor) -> Result<BridgeState, Unauthorized> {
        if !self.is_authorized(actor) {
            tracing::warn!(actor = actor.id.as_str(), "Unauthorized bridge pause attempt");
            return Err(Unauthorized);
        }

        let paused_by = if actor.tag.is_empty() {
            "unknown".to_string()
        } else {
            actor.tag.clone()
        };
        let next = BridgeState::Paused {
            paused_by,
            paused_at: Utc::now(),
        };
        *self.state.write() = next.clone();

        tracing::info!(actor = actor.tag.as_str(), "Bridge paused");
        Ok(next)
    }

    /// Any state → RUNNING.
    pub fn resume(&self, actor: &Actor) -> Result<BridgeState, Unauthorized> {
        if !self.is_authorized(actor) {
            tracing::warn!(actor = actor.id.as_str(), "Unauthorized bridge resume attempt");
            return Err(Unauthorized);
        }

        *self.state.write() = BridgeState::Running;
        tracing::info!(actor = actor.tag.as_str(), "Bridge resumed");
        Ok(BridgeState::Running)
    }

    pub fn status(&self) -> BridgeState {
        self.state.read().clone()
    }

    pub fn is_paused(&self) -> bool {
        self.state.read().is_paused()
    }
}
