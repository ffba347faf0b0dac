use super::arena::{Arena, ArenaSettings};
use super::projectiles::{ExpiryTimer, TokioExpiryTimer};
use super::relay::CommandRelay;
use super::types::GameEvent;
use crate::domain::{Color, ColorPool};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::info;

#[derive(Debug, Clone)]
pub struct WorldSettings {
    pub arena: ArenaSettings,
    pub palette: Vec<Color>,
    pub tick_interval: Duration,
}

/// The single authoritative task. Runs for as long as the runtime does.
pub async fn world_task(
    mut input_rx: mpsc::Receiver<GameEvent>,
    relay: CommandRelay,
    settings: WorldSettings,
) {
    let (expired_tx, mut expired_rx) = mpsc::unbounded_channel();
    let mut arena = Arena::new(
        settings.arena,
        ColorPool::new(&settings.palette),
        TokioExpiryTimer::new(expired_tx),
    );
    arena.reset_session();

    // Authority clock for cooldowns and projectile spawn times.
    let started = Instant::now();
    let dt = settings.tick_interval.as_secs_f32();
    let mut interval = tokio::time::interval(settings.tick_interval);

    info!(
        tick_ms = settings.tick_interval.as_millis() as u64,
        palette = settings.palette.len(),
        "world task started"
    );

    loop {
        tokio::select! {
            maybe_event = input_rx.recv() => {
                let Some(event) = maybe_event else {
                    info!("input channel closed; world task exiting");
                    break;
                };
                arena.handle(event, started.elapsed());
                flush(&mut arena, &relay);
            }
            Some(projectile_id) = expired_rx.recv() => {
                arena.expire(projectile_id);
                flush(&mut arena, &relay);
            }
            _ = interval.tick() => {
                let update = arena.step(dt);
                // Events from this step go out ahead of the snapshot that reflects them.
                flush(&mut arena, &relay);
                relay.publish_world(update);
            }
        }
    }
}

fn flush<T: ExpiryTimer>(arena: &mut Arena<T>, relay: &CommandRelay) {
    for event in arena.drain_events() {
        relay.broadcast(event);
    }

    let status = arena.status();
    if relay.publish_status(status) {
        info!(
            match_state = ?status.match_state,
            alive = status.alive,
            "arena status changed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PALETTE;
    use crate::use_cases::relay::RelaySettings;
    use crate::use_cases::types::{Command, MatchState, ServerEvent};

    fn spawn_world() -> CommandRelay {
        let (relay, input_rx) = CommandRelay::new(&RelaySettings {
            input_channel_capacity: 64,
            event_broadcast_capacity: 64,
            world_broadcast_capacity: 8,
        });
        tokio::spawn(world_task(
            input_rx,
            relay.clone(),
            WorldSettings {
                arena: ArenaSettings::default(),
                palette: PALETTE.to_vec(),
                tick_interval: Duration::from_millis(10),
            },
        ));
        relay
    }

    #[tokio::test]
    async fn when_two_participants_join_then_match_starts_with_distinct_colors() {
        let relay = spawn_world();
        let mut status_rx = relay.subscribe_status();

        let first = relay.join("First".to_string()).await.expect("join");
        let second = relay.join("Second".to_string()).await.expect("join");

        assert_ne!(first.participant_id, second.participant_id);
        assert_ne!(first.color, second.color);

        let status = *tokio::time::timeout(
            Duration::from_secs(1),
            status_rx.wait_for(|s| s.alive == 2),
        )
        .await
        .expect("status in time")
        .expect("status channel open");
        assert_eq!(status.match_state, MatchState::Running);
    }

    #[tokio::test]
    async fn when_text_is_submitted_then_every_observer_gets_the_echo() {
        let relay = spawn_world();
        let mut events = relay.subscribe_events();

        let ack = relay.join("Talker".to_string()).await.expect("join");
        relay
            .directed(ack.participant_id)
            .send(Command::SubmitText {
                text: "Hello".to_string(),
            })
            .expect("send");

        let echo = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if let Ok(ServerEvent::EchoText { from, text }) = events.recv().await {
                    return (from, text);
                }
            }
        })
        .await
        .expect("echo in time");
        assert_eq!(echo, (ack.participant_id, "Hello".to_string()));
    }

    #[tokio::test]
    async fn when_world_runs_then_snapshots_include_joined_participants() {
        let relay = spawn_world();
        let mut world = relay.subscribe_world();
        let ack = relay.join("Pilot".to_string()).await.expect("join");

        let seen = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if let Ok(update) = world.recv().await {
                    if update.participants.iter().any(|p| p.id == ack.participant_id) {
                        return update;
                    }
                }
            }
        })
        .await
        .expect("snapshot in time");
        assert_eq!(seen.participants[0].color, ack.color);
    }

    #[tokio::test]
    async fn when_participant_leaves_then_it_is_despawned_for_observers() {
        let relay = spawn_world();
        let mut events = relay.subscribe_events();
        let ack = relay.join("Leaver".to_string()).await.expect("join");

        relay
            .directed(ack.participant_id)
            .send_wait(Command::Leave)
            .await
            .expect("leave");

        let despawned = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if let Ok(ServerEvent::Despawned { entity_id }) = events.recv().await {
                    return entity_id;
                }
            }
        })
        .await
        .expect("despawn in time");
        assert_eq!(despawned, ack.participant_id);
    }
}
