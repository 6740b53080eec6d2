//! Collaborators for the headless bot: a scene that only logs and a player
//! that walks a circle around the spawn point.

use std::f32::consts::TAU;
use std::future::Future;
use std::time::{Duration, Instant};

use arena_sync::client::ConnectionState;
use arena_sync::presence::{LocalPlayer, PresenceSync, Scene};
use arena_sync::protocol::{DisplayIdentity, ParticipantId, Transform};

/// Frame rate of the bot's update loop.
pub const FRAME: Duration = Duration::from_millis(16);

/// Scene with no visuals; avatar handles are just the ids.
#[derive(Debug, Default)]
pub struct LoggingScene {
    spawned: u64,
    despawned: u64,
}

impl LoggingScene {
    pub fn live(&self) -> u64 {
        self.spawned - self.despawned
    }
}

impl Scene for LoggingScene {
    type Handle = ParticipantId;

    fn spawn_avatar(
        &mut self,
        id: &ParticipantId,
        identity: &DisplayIdentity,
        transform: &Transform,
    ) -> ParticipantId {
        self.spawned += 1;
        log::info!(
            "+ {} ({id}) #{:06X} at {:?}",
            identity.name,
            identity.color,
            transform.position
        );
        id.clone()
    }

    fn move_avatar(&mut self, handle: &mut ParticipantId, transform: &Transform) {
        log::trace!("~ {handle} -> {:?}", transform.position);
    }

    fn despawn_avatar(&mut self, handle: ParticipantId) {
        self.despawned += 1;
        log::info!("- {handle}");
    }
}

/// Walks a circle of `radius` at `speed` rad/s, facing along the path.
#[derive(Debug, Clone)]
pub struct CirclingPlayer {
    center: [f32; 3],
    radius: f32,
    speed: f32,
    angle: f32,
}

impl CirclingPlayer {
    pub fn new(center: [f32; 3], radius: f32, speed: f32) -> Self {
        Self {
            center,
            radius,
            speed,
            angle: 0.0,
        }
    }

    pub fn advance(&mut self, elapsed: Duration) {
        self.angle = (self.angle + self.speed * elapsed.as_secs_f32()).rem_euclid(TAU);
    }
}

impl LocalPlayer for CirclingPlayer {
    fn transform(&self) -> Transform {
        let [cx, cy, cz] = self.center;
        let position = [
            cx + self.radius * self.angle.cos(),
            cy,
            cz + self.radius * self.angle.sin(),
        ];
        // Yaw tangent to the circle.
        let yaw = -(self.angle + TAU / 4.0);
        Transform::new(position, [0.0, yaw, 0.0])
    }
}

/// Why [`run_until`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Shutdown,
    Disconnected,
    Deadline,
}

/// Drive pump and tick once per frame until `shutdown` resolves, the relay
/// connection closes, or `deadline` passes.
///
/// `shutdown` is polled across every frame, so a signal that fires while a
/// frame is being processed is still seen at the next wait.
pub async fn run_until<F>(
    sync: &mut PresenceSync<LoggingScene>,
    scene: &mut LoggingScene,
    player: &mut CirclingPlayer,
    deadline: Option<Instant>,
    shutdown: F,
) -> StopReason
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut frames = tokio::time::interval(FRAME);
    let mut last_frame = Instant::now();
    let mut last_count = 0;

    loop {
        tokio::select! {
            _ = frames.tick() => {}
            _ = &mut shutdown => return StopReason::Shutdown,
        }

        let now = Instant::now();
        player.advance(now - last_frame);
        last_frame = now;

        sync.pump(scene);
        if sync.connection_state() == ConnectionState::Disconnected {
            log::info!("Relay connection closed");
            return StopReason::Disconnected;
        }
        sync.tick(now, &*player);

        let count = sync.player_count();
        if count != last_count {
            if let Some(local) = sync.local_identity() {
                log::info!("Playing as {} ({}), players: {count}", local.identity.name, local.id);
            }
            last_count = count;
        }

        if deadline.is_some_and(|deadline| now >= deadline) {
            return StopReason::Deadline;
        }
    }
}
