//! Event fan-out to connected participants.
//!
//! Each connection registers an unbounded channel drained by its writer
//! task, so a slow or dead socket can never stall delivery to the others.
//! Send failures are reported back to the caller, which runs the normal
//! disconnect path for those participants.

use std::collections::HashMap;

use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::protocol::Event;

pub type PeerTx = mpsc::UnboundedSender<String>;

pub struct Broadcaster {
    peers: RwLock<HashMap<Uuid, PeerTx>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, id: Uuid, tx: PeerTx) {
        self.peers.write().await.insert(id, tx);
    }

    pub async fn unregister(&self, id: Uuid) {
        self.peers.write().await.remove(&id);
    }

    /// Serialize once, deliver to everyone. Returns the ids whose channels
    /// are gone; delivery to the rest is unaffected.
    pub async fn broadcast(&self, event: &Event) -> Vec<Uuid> {
        self.fan_out(event, None).await
    }

    pub async fn broadcast_except(&self, except: Uuid, event: &Event) -> Vec<Uuid> {
        self.fan_out(event, Some(except)).await
    }

    /// Deliver to a single participant (welcome, error replies, pull
    /// responses). Returns false if their channel is gone.
    pub async fn send_to(&self, id: Uuid, event: &Event) -> bool {
        let Some(json) = render(event) else {
            return false;
        };
        match self.peers.read().await.get(&id) {
            Some(tx) => tx.send(json).is_ok(),
            None => false,
        }
    }

    async fn fan_out(&self, event: &Event, except: Option<Uuid>) -> Vec<Uuid> {
        let Some(json) = render(event) else {
            return Vec::new();
        };

        let peers = self.peers.read().await;
        let mut dead = Vec::new();
        for (id, tx) in peers.iter() {
            if Some(*id) == except {
                continue;
            }
            if tx.send(json.clone()).is_err() {
                tracing::warn!(participant = %id, "delivery failed, treating as disconnect");
                dead.push(*id);
            }
        }
        dead
    }
}

fn render(event: &Event) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(json) => Some(json),
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize event");
            None
        }
    }
}
