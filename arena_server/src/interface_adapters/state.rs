use crate::use_cases::{CommandRelay, WorldUpdate};
use axum::extract::ws::Utf8Bytes;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

#[derive(Clone)]
pub struct AppState {
    // Directed commands in, server events and world updates out.
    pub relay: CommandRelay,
    // Serialized world updates, shared across all connections.
    pub world_bytes_tx: broadcast::Sender<Utf8Bytes>,
    // Latest world update for lag recovery.
    pub world_latest_tx: watch::Sender<LatestWorld>,
}

/// Most recent world update, decoded for replica resync and serialized for forwarding.
#[derive(Debug, Clone)]
pub struct LatestWorld {
    pub update: Option<Arc<WorldUpdate>>,
    pub bytes: Utf8Bytes,
}

impl LatestWorld {
    pub fn empty() -> Self {
        Self {
            update: None,
            bytes: Utf8Bytes::from(""),
        }
    }
}
