//! The bridge side of the radio gateway connection.
//!
//! At most one gateway is attached at a time; a new connection replaces the
//! old one. Every command carries a fresh id and the caller waits until the
//! gateway acknowledges it, rejects it, or the ack timeout expires.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use super::protocol::BridgeMessage;
use crate::error::{Error, Result};
use crate::routing::MeshChannel;
use crate::transport::MeshTransport;

type AckResult = std::result::Result<(), String>;

struct Attached {
    conn_id: Uuid,
    tx: mpsc::UnboundedSender<BridgeMessage>,
}

pub struct MeshLink {
    attached: RwLock<Option<Attached>>,
    pending: DashMap<String, oneshot::Sender<AckResult>>,
    ack_timeout: Duration,
}

impl MeshLink {
    pub fn new(ack_timeout: Duration) -> Self {
        Self {
            attached: RwLock::new(None),
            pending: DashMap::new(),
            ack_timeout,
        }
    }

    /// Make `tx` the active gateway. Returns the connection id to pass to
    /// [`MeshLink::detach`].
    pub fn attach(&self, tx: mpsc::UnboundedSender<BridgeMessage>) -> Uuid {
        let conn_id = Uuid::new_v4();
        let previous = self.attached.write().replace(Attached { conn_id, tx });
        if let Some(previous) = previous {
            tracing::warn!(replaced = %previous.conn_id, "Mesh gateway replaced by new connection");
        }
        conn_id
    }

    /// Drop the gateway if it is still the active one and fail its pending
    /// commands.
    pub fn detach(&self, conn_id: Uuid) {
        let mut attached = self.attached.write();
        if attached.as_ref().is_some_and(|a| a.conn_id == conn_id) {
            *attached = None;
            drop(attached);

            let ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
            for id in ids {
                self.resolve(&id, Err("gateway disconnected".to_string()));
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.attached.read().is_some()
    }

    pub fn pending_acks(&self) -> usize {
        self.pending.len()
    }

    /// Complete a pending command. Unknown ids are ignored.
    pub fn resolve(&self, id: &str, outcome: AckResult) {
        match self.pending.remove(id) {
            Some((_, waiter)) => {
                let _ = waiter.send(outcome);
            }
            None => tracing::debug!(id = id, "Ack for unknown or expired mesh command"),
        }
    }

    async fn request(&self, build: impl FnOnce(String) -> BridgeMessage) -> Result<()> {
        let tx = self
            .attached
            .read()
            .as_ref()
            .map(|a| a.tx.clone())
            .ok_or(Error::MeshNotConnected)?;

        let id = Uuid::new_v4().to_string();
        let (waiter, done) = oneshot::channel();
        self.pending.insert(id.clone(), waiter);

        if tx.send(build(id.clone())).is_err() {
            self.pending.remove(&id);
            return Err(Error::MeshNotConnected);
        }

        match tokio::time::timeout(self.ack_timeout, done).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(message))) => Err(Error::MeshRejected(message)),
            Ok(Err(_)) => Err(Error::MeshNotConnected),
            Err(_) => {
                self.pending.remove(&id);
                Err(Error::MeshTimeout(id))
            }
        }
    }
}

#[async_trait]
impl MeshTransport for MeshLink {
    async fn send_channel_text(&self, channel: MeshChannel, text: &str) -> Result<()> {
        self.request(|id| BridgeMessage::SendChannelText {
            id,
            channel_idx: channel.0,
            text: text.to_string(),
        })
        .await
    }

    async fn send_flood_advert(&self) -> Result<()> {
        self.request(|id| BridgeMessage::SendFloodAdvert { id }).await
    }
}
