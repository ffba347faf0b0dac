use crate::interface_adapters::protocol::{
    ArenaStatusDto, ClientMessage, ServerMessage, WorldUpdateDto,
};
use crate::interface_adapters::state::{AppState, LatestWorld};
use crate::use_cases::{
    ArenaStatus, Command, DirectedSender, ObserverView, RelayError, ServerEvent, WorldUpdate,
};

use axum::{
    Error,
    extract::{
        State,
        ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade, close_code},
    },
    response::IntoResponse,
};
use futures::SinkExt;
use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};
use tokio::sync::{broadcast, watch};
use tokio::time::timeout;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

#[derive(Debug)]
enum NetError {
    // Categorizes connection lifecycle failures so callers can decide policy.
    #[allow(dead_code)]
    Ws(axum::Error),
    #[allow(dead_code)]
    Serialization(serde_json::Error),
    InputClosed,
    EventsClosed,
    WorldUpdatesClosed,
    StatusClosed,
    JoinRequired,
    JoinTimeout,
    JoinRejected,
    ClosedBeforeJoin,
}

impl From<axum::Error> for NetError {
    fn from(e: axum::Error) -> Self {
        NetError::Ws(e)
    }
}

pub async fn world_update_serializer(
    mut world_rx: broadcast::Receiver<WorldUpdate>,
    world_bytes_tx: broadcast::Sender<Utf8Bytes>,
    world_latest_tx: watch::Sender<LatestWorld>,
) {
    // Serialize each world update once and broadcast the shared bytes.
    loop {
        match world_rx.recv().await {
            Ok(update) => {
                let msg = ServerMessage::WorldUpdate(WorldUpdateDto::from(&update));
                let txt = match serde_json::to_string(&msg) {
                    Ok(txt) => txt,
                    Err(e) => {
                        error!(error = ?e, "failed to serialize world update");
                        continue;
                    }
                };

                let bytes = Utf8Bytes::from(txt);
                // The latest update doubles as the lag recovery snapshot.
                world_latest_tx.send_replace(LatestWorld {
                    update: Some(Arc::new(update)),
                    bytes: bytes.clone(),
                });
                let _ = world_bytes_tx.send(bytes);
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(
                    missed = n,
                    "world serializer lagged; skipping to latest update"
                );
            }
            Err(broadcast::error::RecvError::Closed) => {
                warn!("world updates channel closed; serializer exiting");
                break;
            }
        }
    }
}

pub fn spawn_world_serializer(state: &AppState) {
    tokio::spawn(world_update_serializer(
        state.relay.subscribe_world(),
        state.world_bytes_tx.clone(),
        state.world_latest_tx.clone(),
    ));
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

// Process-unique id for correlating logs before a participant id exists.
fn next_conn_id() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let span = info_span!(
        "conn",
        conn_id = next_conn_id(),
        participant_id = tracing::field::Empty
    );
    serve_connection(socket, state, span.clone())
        .instrument(span)
        .await;
}

async fn serve_connection(mut socket: WebSocket, state: Arc<AppState>, span: Span) {
    let mut ctx = match bootstrap_connection(&mut socket, &state).await {
        Ok(ctx) => ctx,
        Err(NetError::ClosedBeforeJoin) => {
            info!("client disconnected before join handshake");
            return;
        }
        Err(e) => {
            warn!(error = ?e, "failed to bootstrap connection");
            return;
        }
    };

    span.record("participant_id", ctx.directed.sender());
    info!(display_name = %ctx.display_name, "client connected");

    if let Err(e) = run_client_loop(&mut socket, &mut ctx).await {
        warn!(error = ?e, "client loop exited with error");
    }
}

async fn send_message(socket: &mut WebSocket, msg: &ServerMessage) -> Result<usize, NetError> {
    let txt = serde_json::to_string(msg).map_err(NetError::Serialization)?;
    let bytes = txt.len();
    socket
        .send(Message::Text(txt.into()))
        .await
        .map_err(NetError::Ws)?;
    Ok(bytes)
}

#[derive(Debug, Default)]
struct ConnStats {
    msgs_in: u64,
    msgs_out: u64,
    bytes_in: u64,
    bytes_out: u64,
    invalid_json: u32,
    lag_recovery_count: u64,
}

impl ConnStats {
    fn sent(&mut self, bytes: usize) {
        self.msgs_out += 1;
        self.bytes_out += bytes as u64;
    }
}

struct ConnCtx {
    directed: DirectedSender,
    display_name: String,
    view: ObserverView,
    events_rx: broadcast::Receiver<ServerEvent>,
    world_bytes_rx: broadcast::Receiver<Utf8Bytes>,
    world_latest_rx: watch::Receiver<LatestWorld>,
    status_rx: watch::Receiver<ArenaStatus>,
    stats: ConnStats,

    last_input_full_log: Instant,
    last_world_lag_log: Instant,
    last_invalid_input_log: Instant,

    close_frame: Option<CloseFrame>,
}

async fn bootstrap_connection(
    socket: &mut WebSocket,
    state: &AppState,
) -> Result<ConnCtx, NetError> {
    // Subscribe before joining so this connection sees its own spawn and color.
    let events_rx = state.relay.subscribe_events();
    let world_bytes_rx = state.world_bytes_tx.subscribe();
    let world_latest_rx = state.world_latest_tx.subscribe();
    let status_rx = state.relay.subscribe_status();

    let (display_name, join_bytes) =
        match timeout(JOIN_HANDSHAKE_TIMEOUT, read_join_handshake(socket)).await {
            Ok(result) => result?,
            Err(_) => {
                let _ = send_close_with_reason(socket, close_code::POLICY, "join timeout").await;
                return Err(NetError::JoinTimeout);
            }
        };

    let ack = match state.relay.join(display_name.clone()).await {
        Ok(ack) => ack,
        Err(RelayError::Rejected) => {
            let _ = send_close_with_reason(socket, close_code::POLICY, "join rejected").await;
            return Err(NetError::JoinRejected);
        }
        Err(_) => {
            let _ = send_close_with_reason(socket, close_code::ERROR, "arena unavailable").await;
            return Err(NetError::InputClosed);
        }
    };
    let directed = state.relay.directed(ack.participant_id);

    let mut stats = ConnStats {
        msgs_in: 1,
        bytes_in: join_bytes,
        ..ConnStats::default()
    };

    // If anything after Join fails, compensate with Leave to avoid a spawned ghost.
    let identity = ServerMessage::Identity {
        participant_id: ack.participant_id,
        color: ack.color.into(),
    };
    let initial_status = ServerMessage::MatchState(ArenaStatusDto::from(*status_rx.borrow()));
    for msg in [identity, initial_status] {
        match send_message(socket, &msg).await {
            Ok(bytes) => stats.sent(bytes),
            Err(e) => {
                directed
                    .send_wait(Command::Leave)
                    .await
                    .map_err(|_| NetError::InputClosed)?;
                return Err(e);
            }
        }
    }

    let now = Instant::now() - LOG_THROTTLE;
    Ok(ConnCtx {
        view: ObserverView::new(ack.participant_id),
        directed,
        display_name,
        events_rx,
        world_bytes_rx,
        world_latest_rx,
        status_rx,
        stats,

        last_input_full_log: now,
        last_world_lag_log: now,
        last_invalid_input_log: now,

        close_frame: None,
    })
}

enum LoopControl {
    Continue,
    Disconnect,
}

const LOG_THROTTLE: Duration = Duration::from_secs(2);
const MAX_INVALID_JSON: u32 = 10;
const JOIN_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

async fn send_close_with_reason(
    socket: &mut WebSocket,
    code: u16,
    reason: &'static str,
) -> Result<(), NetError> {
    socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await
        .map_err(NetError::Ws)?;
    socket.close().await.map_err(NetError::Ws)
}

// Waits for the first meaningful client message, which must be a Join.
async fn read_join_handshake(socket: &mut WebSocket) -> Result<(String, u64), NetError> {
    loop {
        let Some(incoming) = socket.recv().await else {
            return Err(NetError::ClosedBeforeJoin);
        };

        match incoming.map_err(NetError::Ws)? {
            Message::Text(text) => {
                return match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::Join(payload)) => {
                        Ok((payload.display_name, text.len() as u64))
                    }
                    Ok(_) => {
                        let _ = send_close_with_reason(socket, close_code::POLICY, "join required")
                            .await;
                        Err(NetError::JoinRequired)
                    }
                    Err(_) => {
                        let _ = send_close_with_reason(
                            socket,
                            close_code::POLICY,
                            "invalid join payload",
                        )
                        .await;
                        Err(NetError::JoinRequired)
                    }
                };
            }
            Message::Binary(_) => {
                let _ = send_close_with_reason(
                    socket,
                    close_code::UNSUPPORTED,
                    "binary messages not supported",
                )
                .await;
                return Err(NetError::JoinRequired);
            }
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => return Err(NetError::ClosedBeforeJoin),
        }
    }
}

fn should_log(last: &mut Instant) -> bool {
    if last.elapsed() >= LOG_THROTTLE {
        *last = Instant::now();
        true
    } else {
        false
    }
}

async fn run_client_loop(socket: &mut WebSocket, ctx: &mut ConnCtx) -> Result<(), NetError> {
    let participant_id = ctx.directed.sender();

    // Split borrows so `tokio::select!` can hold them concurrently.
    let ConnCtx {
        directed,
        view,
        events_rx,
        world_bytes_rx,
        world_latest_rx,
        status_rx,
        stats,
        last_input_full_log,
        last_world_lag_log,
        last_invalid_input_log,
        close_frame,
        ..
    } = ctx;

    let mut fatal: Option<NetError> = None;

    loop {
        let disconnect: bool = tokio::select! {
            incoming = socket.recv() => {
                match handle_incoming_ws(
                    incoming,
                    directed,
                    stats,
                    last_input_full_log,
                    last_invalid_input_log,
                    close_frame,
                ) {
                    Ok(LoopControl::Continue) => false,
                    Ok(LoopControl::Disconnect) => true,
                    Err(e) => {
                        fatal = Some(e);
                        true
                    }
                }
            }

            event = events_rx.recv() => {
                match event {
                    // Events addressed to someone else, or stale replica changes, stay here.
                    Ok(event) if !view.apply(&event) => false,
                    Ok(event) => {
                        let msg = ServerMessage::from(event);
                        match send_message(socket, &msg).await {
                            Ok(bytes) => {
                                stats.sent(bytes);
                                false
                            }
                            Err(err) => {
                                warn!(error = ?err, "failed to send server event");
                                true
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        // Delivery is at-most-once. Catch replicas up so late stragglers older
                        // than the snapshot the client already holds are not forwarded.
                        warn!(participant_id, missed = n, "server events lagged; events dropped");
                        resync_view(view, &world_latest_rx.borrow());
                        false
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        fatal = Some(NetError::EventsClosed);
                        true
                    }
                }
            }

            world_msg = world_bytes_rx.recv() => {
                match world_msg {
                    Ok(bytes) => match forward_world_bytes(bytes, socket, stats).await {
                        LoopControl::Continue => false,
                        LoopControl::Disconnect => true,
                    },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        if should_log(last_world_lag_log) {
                            warn!(missed = n, "world updates lagged; sending snapshot");
                        }

                        let latest = world_latest_rx.borrow().clone();
                        resync_view(view, &latest);
                        if latest.bytes.is_empty() {
                            false
                        } else {
                            stats.lag_recovery_count += 1;
                            match forward_world_bytes(latest.bytes, socket, stats).await {
                                LoopControl::Continue => false,
                                LoopControl::Disconnect => true,
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        fatal = Some(NetError::WorldUpdatesClosed);
                        true
                    }
                }
            }

            changed = status_rx.changed() => {
                match changed {
                    Ok(()) => {
                        let status = *status_rx.borrow_and_update();
                        let msg = ServerMessage::MatchState(status.into());
                        match send_message(socket, &msg).await {
                            Ok(bytes) => {
                                stats.sent(bytes);
                                false
                            }
                            Err(err) => {
                                warn!(error = ?err, "failed to send arena state");
                                true
                            }
                        }
                    }
                    Err(_) => {
                        warn!(participant_id, "status channel closed; disconnecting");
                        fatal = Some(NetError::StatusClosed);
                        true
                    }
                }
            }
        };

        if disconnect {
            if let Some(frame) = close_frame.take() {
                let _ = socket.send(Message::Close(Some(frame))).await;
            }
            if let Err(err) = socket.close().await.map_err(NetError::Ws) {
                debug!(error = ?err, "socket close error");
            }
            break;
        }
    }

    if let Err(e) = disconnect_cleanup(directed, view, stats).await {
        warn!(error = ?e, "error during disconnect cleanup");
        if fatal.is_none() {
            fatal = Some(e);
        }
    }

    match fatal {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn handle_incoming_ws(
    incoming: Option<Result<Message, Error>>,
    directed: &DirectedSender,
    stats: &mut ConnStats,
    last_input_full_log: &mut Instant,
    last_invalid_input_log: &mut Instant,
    close_frame: &mut Option<CloseFrame>,
) -> Result<LoopControl, NetError> {
    let participant_id = directed.sender();
    match incoming {
        Some(Ok(Message::Text(text))) => {
            stats.msgs_in += 1;
            stats.bytes_in += text.len() as u64;

            let msg = match serde_json::from_str::<ClientMessage>(&text) {
                Ok(msg) => msg,
                Err(parse_err) => {
                    stats.invalid_json += 1;
                    if should_log(last_invalid_input_log) {
                        warn!(
                            participant_id,
                            bytes = text.len(),
                            error = %parse_err,
                            "failed to parse client message"
                        );
                    }
                    if stats.invalid_json > MAX_INVALID_JSON {
                        *close_frame = Some(CloseFrame {
                            code: close_code::POLICY,
                            reason: "too many invalid messages".into(),
                        });
                        return Ok(LoopControl::Disconnect);
                    }
                    return Ok(LoopControl::Continue);
                }
            };

            let Some(command) = msg.into_command() else {
                if should_log(last_invalid_input_log) {
                    warn!(participant_id, "duplicate join ignored");
                }
                return Ok(LoopControl::Continue);
            };
            // Leave is sent once, by the disconnect cleanup.
            if command == Command::Leave {
                return Ok(LoopControl::Disconnect);
            }

            match directed.send(command) {
                Ok(()) => Ok(LoopControl::Continue),
                Err(RelayError::Dropped) => {
                    if should_log(last_input_full_log) {
                        warn!(participant_id, "input channel full; dropping command");
                    }
                    Ok(LoopControl::Continue)
                }
                Err(_) => Err(NetError::InputClosed),
            }
        }
        Some(Ok(Message::Binary(_))) => {
            *close_frame = Some(CloseFrame {
                code: close_code::UNSUPPORTED,
                reason: "binary messages not supported".into(),
            });
            Ok(LoopControl::Disconnect)
        }
        Some(Ok(Message::Ping(_) | Message::Pong(_))) => Ok(LoopControl::Continue),
        Some(Ok(Message::Close(_))) => Ok(LoopControl::Disconnect),
        Some(Err(e)) => {
            warn!(participant_id, error = %e, "websocket recv error");
            Ok(LoopControl::Disconnect)
        }
        None => {
            info!(participant_id, "websocket closed");
            Ok(LoopControl::Disconnect)
        }
    }
}

fn resync_view(view: &mut ObserverView, latest: &LatestWorld) {
    if let Some(update) = &latest.update {
        view.observe_snapshot(update);
    }
}

async fn forward_world_bytes(
    world_msg: Utf8Bytes,
    socket: &mut WebSocket,
    stats: &mut ConnStats,
) -> LoopControl {
    let bytes_len = world_msg.len();
    match socket.send(Message::Text(world_msg)).await {
        Ok(()) => {
            stats.sent(bytes_len);
            LoopControl::Continue
        }
        Err(err) => {
            warn!(error = ?err, "failed to send world update");
            LoopControl::Disconnect
        }
    }
}

async fn disconnect_cleanup(
    directed: &DirectedSender,
    view: &mut ObserverView,
    stats: &ConnStats,
) -> Result<(), NetError> {
    // Leave must not be dropped on a full channel, so wait for capacity.
    directed
        .send_wait(Command::Leave)
        .await
        .map_err(|_| NetError::InputClosed)?;

    debug!(
        participant_id = directed.sender(),
        outcome = ?view.outcome(),
        msgs_in = stats.msgs_in,
        msgs_out = stats.msgs_out,
        bytes_in = stats.bytes_in,
        bytes_out = stats.bytes_out,
        invalid_json = stats.invalid_json,
        lag_recovery_count = stats.lag_recovery_count,
        "connection stats"
    );
    info!(participant_id = directed.sender(), "client disconnected");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Change, Color, ParticipantSnapshot};

    fn update_with_health_seq(health_seq: u64, hp: i32) -> WorldUpdate {
        WorldUpdate {
            tick: 1,
            participants: vec![ParticipantSnapshot {
                id: 2,
                x: 0.0,
                y: 0.0,
                hp,
                color: Color::Red,
                health_seq,
                color_seq: 1,
            }],
            projectiles: Vec::new(),
        }
    }

    #[tokio::test]
    async fn when_update_is_serialized_then_latest_keeps_it_for_lag_recovery() {
        let (world_tx, world_rx) = broadcast::channel(4);
        let (bytes_tx, mut bytes_rx) = broadcast::channel(4);
        let (latest_tx, latest_rx) = watch::channel(LatestWorld::empty());
        tokio::spawn(world_update_serializer(world_rx, bytes_tx, latest_tx));

        world_tx
            .send(update_with_health_seq(3, 70))
            .expect("serializer subscribed");
        let bytes = timeout(Duration::from_secs(1), bytes_rx.recv())
            .await
            .expect("bytes in time")
            .expect("bytes channel open");
        assert!(bytes.as_str().contains("\"health_seq\":3"));

        let latest = latest_rx.borrow().clone();
        assert_eq!(latest.bytes.as_str(), bytes.as_str());
        assert_eq!(latest.update.map(|u| u.tick), Some(1));
    }

    #[test]
    fn when_events_lag_then_resync_keeps_older_changes_from_being_forwarded() {
        let mut view = ObserverView::new(1);
        assert!(view.apply(&ServerEvent::HealthChanged {
            participant_id: 2,
            change: Change {
                seq: 1,
                previous: 100,
                current: 90,
            },
        }));

        let latest = LatestWorld {
            update: Some(Arc::new(update_with_health_seq(3, 70))),
            bytes: Utf8Bytes::from("{}"),
        };
        resync_view(&mut view, &latest);

        // Seq 2 was already superseded by the snapshot the client received.
        assert!(!view.apply(&ServerEvent::HealthChanged {
            participant_id: 2,
            change: Change {
                seq: 2,
                previous: 90,
                current: 80,
            },
        }));
        assert!(view.apply(&ServerEvent::HealthChanged {
            participant_id: 2,
            change: Change {
                seq: 4,
                previous: 70,
                current: 60,
            },
        }));
    }
}
