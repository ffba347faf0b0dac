// Use-case level inputs/outputs for the authoritative world task.

use tokio::sync::oneshot;

use crate::domain::{
    Change, Color, EntityId, EntityKind, ParticipantSnapshot, ProjectileSnapshot, Vec2,
};

/// Everything that reaches the world task through the directed channel.
#[derive(Debug)]
pub enum GameEvent {
    // Spawn request from a fresh connection; the only message with a reply.
    Join {
        display_name: String,
        reply: oneshot::Sender<JoinAck>,
    },
    Command {
        sender: EntityId,
        command: Command,
    },
}

/// Untrusted participant commands, re-validated by the authority on arrival.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Leave,
    SubmitText { text: String },
    Move { direction: Vec2 },
    Shoot { direction: Vec2, speed: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinAck {
    pub participant_id: EntityId,
    pub color: Color,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Win,
    Lose,
}

impl Outcome {
    pub fn text(self) -> &'static str {
        match self {
            Outcome::Win => "You Win",
            Outcome::Lose => "You Lose",
        }
    }
}

/// Authority-to-observer broadcasts.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Spawned {
        entity_id: EntityId,
        kind: EntityKind,
        owner_id: Option<EntityId>,
    },
    Despawned {
        entity_id: EntityId,
    },
    EchoText {
        from: EntityId,
        text: String,
    },
    HealthChanged {
        participant_id: EntityId,
        change: Change<i32>,
    },
    ColorChanged {
        participant_id: EntityId,
        change: Change<Color>,
    },
    // Addressed to one participant; other observers drop it.
    AnnounceResult {
        to: EntityId,
        outcome: Outcome,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchState {
    Waiting,
    Running,
    // `winner: None` is a tie: the last participants died in the same step.
    Ended { winner: Option<EntityId> },
}

/// Coarse session status published on the watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaStatus {
    pub match_state: MatchState,
    pub alive: usize,
}

impl Default for ArenaStatus {
    fn default() -> Self {
        Self {
            match_state: MatchState::Waiting,
            alive: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorldUpdate {
    pub tick: u64,
    pub participants: Vec<ParticipantSnapshot>,
    pub projectiles: Vec<ProjectileSnapshot>,
}
