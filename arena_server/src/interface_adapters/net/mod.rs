// Network adapter modules split by client sockets vs plain HTTP routes.

pub mod client;
pub mod internal;

pub use client::{spawn_world_serializer, ws_handler};
pub use internal::arena_status_handler;
