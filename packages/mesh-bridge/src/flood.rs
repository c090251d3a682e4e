//! Per-source flood protection for Discord → mesh traffic.
//!
//! Each Discord channel gets a sliding window of recent send instants. When
//! the window holds more than `max_messages`, the source enters a cooldown
//! during which everything is denied without touching the window. The first
//! message at or after the cooldown's end is evaluated fresh.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::routing::ChatChannelId;

/// Flood governor parameters.
#[derive(Debug, Clone)]
pub struct FloodConfig {
    pub window: Duration,
    pub max_messages: usize,
    pub cooldown: Duration,
    /// Post one warning into the channel when a cooldown starts.
    pub warn_in_channel: bool,
}

impl Default for FloodConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(15),
            max_messages: 6,
            cooldown: Duration::from_secs(60),
            warn_in_channel: true,
        }
    }
}

/// Outcome of a flood check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloodDecision {
    Allow,
    Deny,
    /// Denied, and this is the one warning owed for the cooldown just entered.
    DenyAndWarn,
}

impl FloodDecision {
    pub fn is_allowed(self) -> bool {
        matches!(self, FloodDecision::Allow)
    }
}

/// Tracking state for one source.
#[derive(Debug, Default)]
pub struct FloodRecord {
    window: VecDeque<Instant>,
    cooldown_until: Option<Instant>,
    warned_until: Option<Instant>,
}

/// Per-source rate limiter. Records are created lazily and never evicted.
#[derive(Clone)]
pub struct FloodGovernor {
    config: FloodConfig,
    records: Arc<DashMap<ChatChannelId, FloodRecord>>,
}

impl FloodGovernor {
    pub fn new(config: FloodConfig) -> Self {
        Self {
            config,
            records: Arc::new(DashMap::new()),
        }
    }

    /// Check a message from `source` arriving now.
    pub fn check(&self, source: &ChatChannelId) -> FloodDecision {
        self.check_at(source, Instant::now())
    }

    /// Check a message from `source` arriving at `now`.
    pub fn check_at(&self, source: &ChatChannelId, now: Instant) -> FloodDecision {
        // The entry guard holds the shard lock for the whole read-then-write.
        let mut record = self.records.entry(source.clone()).or_default();

        if let Some(until) = record.cooldown_until {
            if now < until {
                tracing::debug!(
                    source = %source,
                    remaining_secs = (until - now).as_secs_f64().ceil() as u64,
                    "Flood protect: dropping discord->mesh during cooldown"
                );
                return FloodDecision::Deny;
            }
            record.cooldown_until = None;
        }

        let window = self.config.window;
        while let Some(&oldest) = record.window.front() {
            if now.saturating_duration_since(oldest) > window {
                record.window.pop_front();
            } else {
                break;
            }
        }
        record.window.push_back(now);

        if record.window.len() <= self.config.max_messages {
            return FloodDecision::Allow;
        }

        let until = now + self.config.cooldown;
        record.cooldown_until = Some(until);
        record.window.clear();

        tracing::info!(
            source = %source,
            cooldown_secs = self.config.cooldown.as_secs(),
            "Flood protect: entering cooldown"
        );

        let warning_outstanding = record.warned_until.is_some_and(|w| w > now);
        if self.config.warn_in_channel && !warning_outstanding {
            record.warned_until = Some(until);
            FloodDecision::DenyAndWarn
        } else {
            FloodDecision::Deny
        }
    }

    /// Number of sources seen so far.
    pub fn tracked_sources(&self) -> usize {
        self.records.len()
    }

    /// The user-visible notice posted when a cooldown starts.
    pub fn warning_text(&self) -> String {
        format!(
            "⚠️ Bridge flood protection: pausing forwarding to Meshcore for {}s (too many messages).",
            self.config.cooldown.as_secs_f64().ceil() as u64
        )
    }
}
