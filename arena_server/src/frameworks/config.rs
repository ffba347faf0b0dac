use crate::use_cases::ColorReclaim;
use std::{env, time::Duration};
use tracing::warn;

// Runtime/server constants (not gameplay tuning).

pub fn http_port() -> u16 {
    env::var("ARENA_SERVER_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3001)
}

pub fn color_reclaim() -> ColorReclaim {
    match env::var("ARENA_COLOR_RECLAIM").as_deref() {
        Ok("reset") => ColorReclaim::OnReset,
        Ok("disconnect") | Err(_) => ColorReclaim::OnDisconnect,
        Ok(other) => {
            warn!(value = other, "unknown ARENA_COLOR_RECLAIM; using disconnect");
            ColorReclaim::OnDisconnect
        }
    }
}

pub fn tick_interval() -> Duration {
    let hz = env::var("ARENA_TICK_HZ")
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .filter(|hz| (1..=1000).contains(hz))
        .unwrap_or(DEFAULT_TICK_HZ);
    Duration::from_secs(1) / hz
}

pub const DEFAULT_TICK_HZ: u32 = 60;
pub const INPUT_CHANNEL_CAPACITY: usize = 1024;
pub const EVENT_BROADCAST_CAPACITY: usize = 256;
pub const WORLD_BROADCAST_CAPACITY: usize = 128;
