// Framework bootstrap for the arena server runtime.

use crate::domain::PALETTE;
use crate::frameworks::config;
use crate::interface_adapters::net::{arena_status_handler, spawn_world_serializer, ws_handler};
use crate::interface_adapters::state::{AppState, LatestWorld};
use crate::use_cases::{ArenaSettings, CommandRelay, RelaySettings, WorldSettings, world_task};

use axum::{Router, extract::ws::Utf8Bytes, routing::get};
use std::net::SocketAddr;
use std::{io::Result, sync::Arc};
use tokio::sync::{broadcast, watch};

fn init_runtime() {
    let _ = dotenvy::dotenv();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = matches!(std::env::var("LOG_FORMAT").as_deref(), Ok("json"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }

    std::panic::set_hook(Box::new(|info| {
        let backtrace = std::backtrace::Backtrace::capture();
        tracing::error!(%info, ?backtrace, "panic");
    }));
}

pub async fn run(listener: tokio::net::TcpListener) -> Result<()> {
    let address = listener.local_addr()?;
    let state = build_state();

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/arena", get(arena_status_handler))
        .with_state(state);

    tracing::info!(%address, "listening");

    axum::serve(listener, app).await.inspect_err(|e| {
        tracing::error!(error = %e, "server error");
    })
}

pub async fn run_with_config() -> Result<()> {
    init_runtime();

    let address = SocketAddr::from(([127, 0, 0, 1], config::http_port()));

    let listener = tokio::net::TcpListener::bind(address)
        .await
        .inspect_err(|e| {
            tracing::error!(%address, error = %e, "failed to bind");
        })?;

    run(listener).await
}

fn build_state() -> Arc<AppState> {
    let (relay, input_rx) = CommandRelay::new(&RelaySettings {
        input_channel_capacity: config::INPUT_CHANNEL_CAPACITY,
        event_broadcast_capacity: config::EVENT_BROADCAST_CAPACITY,
        world_broadcast_capacity: config::WORLD_BROADCAST_CAPACITY,
    });

    let settings = WorldSettings {
        arena: ArenaSettings {
            color_reclaim: config::color_reclaim(),
            ..ArenaSettings::default()
        },
        palette: PALETTE.to_vec(),
        tick_interval: config::tick_interval(),
    };
    tracing::debug!(
        color_reclaim = ?settings.arena.color_reclaim,
        tick_ms = settings.tick_interval.as_millis() as u64,
        "arena configured"
    );

    // The world task is the only owner of authoritative state.
    tokio::spawn(world_task(input_rx, relay.clone(), settings));

    let (world_bytes_tx, _world_bytes_rx) =
        broadcast::channel::<Utf8Bytes>(config::WORLD_BROADCAST_CAPACITY);
    let (world_latest_tx, _world_latest_rx) = watch::channel(LatestWorld::empty());

    let state = AppState {
        relay,
        world_bytes_tx,
        world_latest_tx,
    };
    spawn_world_serializer(&state);
    Arc::new(state)
}

