// Use cases layer: application workflows for the arena server.

pub mod arena;
pub mod combat;
pub mod game;
pub mod observer;
pub mod projectiles;
pub mod relay;
pub mod types;

pub use arena::{Arena, ArenaSettings, ColorReclaim};
pub use game::{WorldSettings, world_task};
pub use observer::ObserverView;
pub use relay::{CommandRelay, DirectedSender, RelayError, RelaySettings};
pub use types::{ArenaStatus, Command, GameEvent, MatchState, Outcome, ServerEvent, WorldUpdate};
