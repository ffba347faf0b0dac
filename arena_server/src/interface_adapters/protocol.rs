// Wire protocol DTOs and conversions for public arena server messages.

use crate::domain::{Color, EntityKind, ParticipantSnapshot, ProjectileSnapshot, Vec2};
use crate::use_cases::{ArenaStatus, Command, MatchState, Outcome, ServerEvent, WorldUpdate};
use serde::{Deserialize, Serialize};

/// Messages the server sends to connected clients over the WebSocket.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerMessage {
    // Assigned identity for the connection after Join is accepted.
    Identity {
        participant_id: u64,
        color: ColorDto,
    },
    Spawned {
        entity_id: u64,
        kind: EntityKindDto,
        owner_id: Option<u64>,
    },
    Despawned {
        entity_id: u64,
    },
    EchoText {
        from: u64,
        text: String,
    },
    HealthChanged {
        participant_id: u64,
        seq: u64,
        previous: i32,
        current: i32,
    },
    ColorChanged {
        participant_id: u64,
        seq: u64,
        previous: ColorDto,
        current: ColorDto,
    },
    // Only ever sent to the participant it concerns.
    AnnounceResult {
        outcome: OutcomeDto,
        text: String,
    },
    // Snapshot of the world for a given tick.
    WorldUpdate(WorldUpdateDto),
    MatchState(ArenaStatusDto),
}

/// Messages the client sends to the server over the WebSocket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientMessage {
    // Initial handshake; everything else is ignored until it is accepted.
    Join(JoinPayload),
    SubmitText(SubmitTextPayload),
    Move(MoveDto),
    Shoot(ShootDto),
    Leave,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JoinPayload {
    pub display_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitTextPayload {
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MoveDto {
    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShootDto {
    pub x: f32,
    pub y: f32,
    // Clamped by the server; omitted means slowest allowed.
    #[serde(default)]
    pub speed: f32,
}

impl ClientMessage {
    /// The command this message maps to once the connection has joined.
    pub fn into_command(self) -> Option<Command> {
        match self {
            ClientMessage::Join(_) => None,
            ClientMessage::SubmitText(p) => Some(Command::SubmitText { text: p.text }),
            ClientMessage::Move(m) => Some(Command::Move {
                direction: Vec2::new(m.x, m.y),
            }),
            ClientMessage::Shoot(s) => Some(Command::Shoot {
                direction: Vec2::new(s.x, s.y),
                speed: s.speed,
            }),
            ClientMessage::Leave => Some(Command::Leave),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ColorDto {
    Red,
    Green,
    Blue,
    Yellow,
    Magenta,
    Cyan,
    White,
}

impl From<Color> for ColorDto {
    fn from(color: Color) -> Self {
        match color {
            Color::Red => ColorDto::Red,
            Color::Green => ColorDto::Green,
            Color::Blue => ColorDto::Blue,
            Color::Yellow => ColorDto::Yellow,
            Color::Magenta => ColorDto::Magenta,
            Color::Cyan => ColorDto::Cyan,
            Color::White => ColorDto::White,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntityKindDto {
    Participant,
    Projectile,
}

impl From<EntityKind> for EntityKindDto {
    fn from(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Participant => EntityKindDto::Participant,
            EntityKind::Projectile => EntityKindDto::Projectile,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OutcomeDto {
    Win,
    Lose,
}

impl From<Outcome> for OutcomeDto {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Win => OutcomeDto::Win,
            Outcome::Lose => OutcomeDto::Lose,
        }
    }
}

impl From<ServerEvent> for ServerMessage {
    fn from(event: ServerEvent) -> Self {
        match event {
            ServerEvent::Spawned {
                entity_id,
                kind,
                owner_id,
            } => ServerMessage::Spawned {
                entity_id,
                kind: kind.into(),
                owner_id,
            },
            ServerEvent::Despawned { entity_id } => ServerMessage::Despawned { entity_id },
            ServerEvent::EchoText { from, text } => ServerMessage::EchoText { from, text },
            ServerEvent::HealthChanged {
                participant_id,
                change,
            } => ServerMessage::HealthChanged {
                participant_id,
                seq: change.seq,
                previous: change.previous,
                current: change.current,
            },
            ServerEvent::ColorChanged {
                participant_id,
                change,
            } => ServerMessage::ColorChanged {
                participant_id,
                seq: change.seq,
                previous: change.previous.into(),
                current: change.current.into(),
            },
            ServerEvent::AnnounceResult { outcome, .. } => ServerMessage::AnnounceResult {
                outcome: outcome.into(),
                text: outcome.text().to_string(),
            },
        }
    }
}

/// Snapshot of the world sent to clients on each tick.
#[derive(Debug, Clone, Serialize)]
pub struct WorldUpdateDto {
    pub tick: u64,
    pub participants: Vec<ParticipantStateDto>,
    pub projectiles: Vec<ProjectileStateDto>,
}

impl From<&WorldUpdate> for WorldUpdateDto {
    fn from(update: &WorldUpdate) -> Self {
        Self {
            tick: update.tick,
            participants: update
                .participants
                .iter()
                .map(ParticipantStateDto::from)
                .collect(),
            projectiles: update
                .projectiles
                .iter()
                .map(ProjectileStateDto::from)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ParticipantStateDto {
    pub id: u64,
    pub x: f32,
    pub y: f32,
    pub hp: i32,
    pub color: ColorDto,
    // Sequence numbers of `hp` and `color`, comparable with HealthChanged/ColorChanged `seq`.
    pub health_seq: u64,
    pub color_seq: u64,
}

impl From<&ParticipantSnapshot> for ParticipantStateDto {
    fn from(p: &ParticipantSnapshot) -> Self {
        Self {
            id: p.id,
            x: p.x,
            y: p.y,
            hp: p.hp,
            color: p.color.into(),
            health_seq: p.health_seq,
            color_seq: p.color_seq,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectileStateDto {
    pub id: u64,
    pub owner_id: u64,
    pub x: f32,
    pub y: f32,
}

impl From<&ProjectileSnapshot> for ProjectileStateDto {
    fn from(p: &ProjectileSnapshot) -> Self {
        Self {
            id: p.id,
            owner_id: p.owner_id,
            x: p.x,
            y: p.y,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MatchStateDto {
    Waiting,
    Running,
    Ended { winner: Option<u64> },
}

impl From<MatchState> for MatchStateDto {
    fn from(state: MatchState) -> Self {
        match state {
            MatchState::Waiting => MatchStateDto::Waiting,
            MatchState::Running => MatchStateDto::Running,
            MatchState::Ended { winner } => MatchStateDto::Ended { winner },
        }
    }
}

/// Session status for clients and the `/arena` endpoint.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ArenaStatusDto {
    pub state: MatchStateDto,
    pub alive: usize,
}

impl From<ArenaStatus> for ArenaStatusDto {
    fn from(status: ArenaStatus) -> Self {
        Self {
            state: status.match_state.into(),
            alive: status.alive,
        }
    }
}
