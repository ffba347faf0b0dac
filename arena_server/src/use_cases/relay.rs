// Command relay: directed sender->authority channel plus authority->observer broadcasts.
//
// Delivery is fire-and-forget and at-most-once in both directions. Commands from one sender
// arrive in send order because each connection owns a single `DirectedSender`; nothing is
// promised across senders or across the event/world/status channels.

use std::fmt;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use super::types::{ArenaStatus, Command, GameEvent, JoinAck, ServerEvent, WorldUpdate};
use crate::domain::EntityId;

/// Channel capacities for one arena session.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Capacity for inbound directed commands.
    pub input_channel_capacity: usize,
    /// Capacity for broadcast server events.
    pub event_broadcast_capacity: usize,
    /// Capacity for broadcast world snapshots.
    pub world_broadcast_capacity: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayError {
    /// Inbound channel was full; the command was dropped.
    Dropped,
    /// The world task is gone.
    Closed,
    /// The authority refused the request (join only).
    Rejected,
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::Dropped => write!(f, "command dropped"),
            RelayError::Closed => write!(f, "relay closed"),
            RelayError::Rejected => write!(f, "request rejected by authority"),
        }
    }
}

#[derive(Clone)]
pub struct CommandRelay {
    input_tx: mpsc::Sender<GameEvent>,
    events_tx: broadcast::Sender<ServerEvent>,
    world_tx: broadcast::Sender<WorldUpdate>,
    status_tx: watch::Sender<ArenaStatus>,
}

impl CommandRelay {
    /// Builds the channel set. The receiver belongs to the world task.
    pub fn new(settings: &RelaySettings) -> (Self, mpsc::Receiver<GameEvent>) {
        let (input_tx, input_rx) = mpsc::channel::<GameEvent>(settings.input_channel_capacity);
        let (events_tx, _events_rx) =
            broadcast::channel::<ServerEvent>(settings.event_broadcast_capacity);
        let (world_tx, _world_rx) =
            broadcast::channel::<WorldUpdate>(settings.world_broadcast_capacity);
        let (status_tx, _status_rx) = watch::channel(ArenaStatus::default());

        let relay = Self {
            input_tx,
            events_tx,
            world_tx,
            status_tx,
        };
        (relay, input_rx)
    }

    /// Sender handle stamped with the participant id of one connection.
    pub fn directed(&self, sender: EntityId) -> DirectedSender {
        DirectedSender {
            sender,
            tx: self.input_tx.clone(),
        }
    }

    /// Asks the authority to spawn a participant and waits for its id.
    pub async fn join(&self, display_name: String) -> Result<JoinAck, RelayError> {
        let (reply, ack) = oneshot::channel();
        self.input_tx
            .send(GameEvent::Join { display_name, reply })
            .await
            .map_err(|_| RelayError::Closed)?;
        // The authority drops the reply sender when it refuses the join.
        ack.await.map_err(|_| RelayError::Rejected)
    }

    /// Broadcasts to every current observer; returns how many were listening.
    pub fn broadcast(&self, event: ServerEvent) -> usize {
        self.events_tx.send(event).unwrap_or(0)
    }

    pub fn publish_world(&self, update: WorldUpdate) -> usize {
        self.world_tx.send(update).unwrap_or(0)
    }

    /// Publishes only when the status actually changed.
    pub fn publish_status(&self, status: ArenaStatus) -> bool {
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        })
    }

    pub fn status(&self) -> ArenaStatus {
        *self.status_tx.borrow()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ServerEvent> {
        self.events_tx.subscribe()
    }

    pub fn subscribe_world(&self) -> broadcast::Receiver<WorldUpdate> {
        self.world_tx.subscribe()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ArenaStatus> {
        self.status_tx.subscribe()
    }
}

pub struct DirectedSender {
    sender: EntityId,
    tx: mpsc::Sender<GameEvent>,
}

impl DirectedSender {
    pub fn sender(&self) -> EntityId {
        self.sender
    }

    /// Fire-and-forget. A full channel drops the command instead of blocking the caller.
    pub fn send(&self, command: Command) -> Result<(), RelayError> {
        let event = GameEvent::Command {
            sender: self.sender,
            command,
        };
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(RelayError::Dropped),
            Err(TrySendError::Closed(_)) => Err(RelayError::Closed),
        }
    }

    /// Waits for capacity instead of dropping. Used for `Leave`, which must not be lost.
    pub async fn send_wait(&self, command: Command) -> Result<(), RelayError> {
        self.tx
            .send(GameEvent::Command {
                sender: self.sender,
                command,
            })
            .await
            .map_err(|_| RelayError::Closed)
    }
}
