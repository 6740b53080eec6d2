//! Client-side presence: remote avatars driven by relay events.
//!
//! ## Architecture
//!
//! ```text
//! Relay events ──► SyncClient::poll_event()
//!                        │
//!                        ▼
//!               PresenceSync::pump()
//!                        │
//!                        ▼
//!               AvatarSet::apply()  ──► Scene::{spawn,move,despawn}_avatar
//!
//! LocalPlayer::transform()
//!       │
//!       ▼
//! PresenceSync::tick()  (rate-limited: 20Hz)
//!       │
//!       ▼
//! ClientMessage::State ──► relay
//! ```
//!
//! Everything here runs on the caller's frame loop; `pump` and `tick` never
//! wait on the network.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::client::{ClientConfig, ClientError, ConnectionState, SyncClient, SyncEvent};
use crate::protocol::{ClientMessage, DisplayIdentity, ParticipantId, ServerMessage, Transform};

// ───────────────────────────────────────────────────────────────────
// Collaborator traits
// ───────────────────────────────────────────────────────────────────

/// Source of the local participant's transform, read once per report.
pub trait LocalPlayer {
    fn transform(&self) -> Transform;
}

impl LocalPlayer for Transform {
    fn transform(&self) -> Transform {
        *self
    }
}

/// The rendering side that owns avatar visuals.
pub trait Scene {
    /// Whatever the scene needs to find an avatar again.
    type Handle;

    fn spawn_avatar(
        &mut self,
        id: &ParticipantId,
        identity: &DisplayIdentity,
        transform: &Transform,
    ) -> Self::Handle;

    /// Called after a remote transform changed. Scenes that read
    /// [`RemoteAvatar::transform`] every frame can ignore it.
    fn move_avatar(&mut self, _handle: &mut Self::Handle, _transform: &Transform) {}

    fn despawn_avatar(&mut self, handle: Self::Handle);
}

// ───────────────────────────────────────────────────────────────────
// Remote avatars
// ───────────────────────────────────────────────────────────────────

/// A remote participant as seen by this client.
#[derive(Debug)]
pub struct RemoteAvatar<H> {
    pub id: ParticipantId,
    pub identity: DisplayIdentity,
    /// Last transform received.
    pub transform: Transform,
    pub handle: H,
}

/// Own identity as assigned by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    pub id: ParticipantId,
    pub identity: DisplayIdentity,
}

/// What a relay event did to the avatar set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    Welcomed { spawned: usize },
    Spawned(ParticipantId),
    Moved(ParticipantId),
    Despawned(ParticipantId),
    /// Duplicate join, self-reference, or an event for an untracked id.
    Ignored,
}

/// Remote avatars keyed by participant id.
///
/// Only ids the relay has announced and not yet reported gone are ever
/// tracked; every event is guarded by an existence check, so duplicates and
/// late events are harmless.
#[derive(Debug)]
pub struct AvatarSet<H> {
    avatars: HashMap<ParticipantId, RemoteAvatar<H>>,
    local: Option<LocalIdentity>,
}

impl<H> Default for AvatarSet<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> AvatarSet<H> {
    pub fn new() -> Self {
        Self {
            avatars: HashMap::new(),
            local: None,
        }
    }

    /// Reconcile one relay event into the set and the scene.
    pub fn apply<S>(&mut self, event: &ServerMessage, scene: &mut S) -> Reconciled
    where
        S: Scene<Handle = H> + ?Sized,
    {
        match event {
            ServerMessage::Welcome {
                id,
                name,
                color,
                participants,
            } => {
                self.local = Some(LocalIdentity {
                    id: id.clone(),
                    identity: DisplayIdentity::new(name.clone(), *color),
                });

                let mut spawned = 0;
                for participant in participants {
                    if self.spawn(&participant.id, participant.identity(), participant.state, scene) {
                        spawned += 1;
                    }
                }
                log::info!("Welcomed as {name} ({id}), {spawned} participant(s) present");
                Reconciled::Welcomed { spawned }
            }

            ServerMessage::Join { id, name, color } => {
                let identity = DisplayIdentity::new(name.clone(), *color);
                if self.spawn(id, identity, Transform::SPAWN, scene) {
                    log::info!("{name} ({id}) joined");
                    Reconciled::Spawned(id.clone())
                } else {
                    Reconciled::Ignored
                }
            }

            ServerMessage::State { id, state } => match self.avatars.get_mut(id) {
                Some(avatar) => {
                    avatar.transform = *state;
                    scene.move_avatar(&mut avatar.handle, state);
                    Reconciled::Moved(id.clone())
                }
                None => {
                    log::trace!("Discarding state for untracked participant {id}");
                    Reconciled::Ignored
                }
            },

            ServerMessage::Leave { id } => match self.avatars.remove(id) {
                Some(avatar) => {
                    log::info!("{} ({id}) left", avatar.identity.name);
                    scene.despawn_avatar(avatar.handle);
                    Reconciled::Despawned(id.clone())
                }
                None => Reconciled::Ignored,
            },
        }
    }

    fn spawn<S>(
        &mut self,
        id: &ParticipantId,
        identity: DisplayIdentity,
        transform: Transform,
        scene: &mut S,
    ) -> bool
    where
        S: Scene<Handle = H> + ?Sized,
    {
        if self.avatars.contains_key(id) || self.is_local(id) {
            return false;
        }
        let handle = scene.spawn_avatar(id, &identity, &transform);
        self.avatars.insert(
            id.clone(),
            RemoteAvatar {
                id: id.clone(),
                identity,
                transform,
                handle,
            },
        );
        true
    }

    /// Despawn every avatar and forget the local identity.
    /// Returns the number of avatars removed.
    pub fn clear<S>(&mut self, scene: &mut S) -> usize
    where
        S: Scene<Handle = H> + ?Sized,
    {
        let count = self.avatars.len();
        for (_, avatar) in self.avatars.drain() {
            scene.despawn_avatar(avatar.handle);
        }
        self.local = None;
        count
    }

    fn is_local(&self, id: &ParticipantId) -> bool {
        self.local.as_ref().is_some_and(|local| &local.id == id)
    }

    pub fn get(&self, id: &ParticipantId) -> Option<&RemoteAvatar<H>> {
        self.avatars.get(id)
    }

    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.avatars.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RemoteAvatar<H>> {
        self.avatars.values()
    }

    pub fn len(&self) -> usize {
        self.avatars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.avatars.is_empty()
    }

    pub fn local(&self) -> Option<&LocalIdentity> {
        self.local.as_ref()
    }
}

// ───────────────────────────────────────────────────────────────────
// Publish throttle
// ───────────────────────────────────────────────────────────────────

/// Minimum-interval gate for outgoing state reports.
#[derive(Debug, Clone)]
pub struct PublishThrottle {
    interval: Duration,
    last_sent: Option<Instant>,
}

impl PublishThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: None,
        }
    }

    /// Whether a report may go out at `now`.
    pub fn ready(&self, now: Instant) -> bool {
        match self.last_sent {
            Some(last) => now.saturating_duration_since(last) >= self.interval,
            None => true,
        }
    }

    pub fn mark(&mut self, now: Instant) {
        self.last_sent = Some(now);
    }

    /// Forget the last send so the next report goes out immediately.
    pub fn reset(&mut self) {
        self.last_sent = None;
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

// ───────────────────────────────────────────────────────────────────
// Presence sync: connection, avatars and throttle together
// ───────────────────────────────────────────────────────────────────

/// Keeps a scene's remote avatars in sync with the relay and publishes the
/// local player's transform.
pub struct PresenceSync<S: Scene> {
    client: SyncClient,
    avatars: AvatarSet<S::Handle>,
    throttle: PublishThrottle,
}

impl<S: Scene> PresenceSync<S> {
    pub fn new(config: ClientConfig) -> Self {
        let throttle = PublishThrottle::new(config.publish_interval());
        Self {
            client: SyncClient::new(config),
            avatars: AvatarSet::new(),
            throttle,
        }
    }

    /// Connect to `endpoint`, tearing down any previous connection first.
    pub async fn connect(&mut self, endpoint: &str, scene: &mut S) -> Result<(), ClientError> {
        self.disconnect(scene);
        self.throttle.reset();
        self.client.connect(endpoint).await
    }

    /// Apply every pending relay event. Returns the number of events handled.
    pub fn pump(&mut self, scene: &mut S) -> usize {
        let mut handled = 0;
        while let Some(event) = self.client.poll_event() {
            handled += 1;
            match event {
                SyncEvent::Message(message) => {
                    self.avatars.apply(&message, scene);
                }
                SyncEvent::Closed => self.teardown(scene),
            }
        }
        handled
    }

    /// Publish the local transform if the connection is open and the
    /// minimum interval has passed. Returns `true` if a report was queued.
    pub fn tick<P>(&mut self, now: Instant, player: &P) -> bool
    where
        P: LocalPlayer + ?Sized,
    {
        if self.client.connection_state() != ConnectionState::Open || !self.throttle.ready(now) {
            return false;
        }
        self.throttle.mark(now);
        self.client.send(&ClientMessage::state(player.transform()))
    }

    /// Close the connection and despawn every remote avatar.
    pub fn disconnect(&mut self, scene: &mut S) {
        if self.client.close() {
            self.teardown(scene);
        }
    }

    fn teardown(&mut self, scene: &mut S) {
        let removed = self.avatars.clear(scene);
        log::debug!("Tore down {removed} remote avatar(s)");
    }

    /// Remote avatars plus the local player while connected.
    pub fn player_count(&self) -> usize {
        let local = usize::from(self.client.connection_state() == ConnectionState::Open);
        self.avatars.len() + local
    }

    pub fn local_identity(&self) -> Option<&LocalIdentity> {
        self.avatars.local()
    }

    pub fn avatars(&self) -> &AvatarSet<S::Handle> {
        &self.avatars
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.client.connection_state()
    }

    pub fn client(&self) -> &SyncClient {
        &self.client
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ParticipantSnapshot;

    /// Scene that hands out numbered handles and records calls.
    #[derive(Default)]
    struct RecordingScene {
        next: u32,
        live: Vec<u32>,
        spawned: Vec<ParticipantId>,
        moves: usize,
        despawned: Vec<u32>,
    }

    impl Scene for RecordingScene {
        type Handle = u32;

        fn spawn_avatar(&mut self, id: &ParticipantId, _: &DisplayIdentity, _: &Transform) -> u32 {
            self.next += 1;
            self.live.push(self.next);
            self.spawned.push(id.clone());
            self.next
        }

        fn move_avatar(&mut self, _: &mut u32, _: &Transform) {
            self.moves += 1;
        }

        fn despawn_avatar(&mut self, handle: u32) {
            self.live.retain(|h| *h != handle);
            self.despawned.push(handle);
        }
    }

    fn id(raw: &str) -> ParticipantId {
        ParticipantId::new(raw)
    }

    fn join(raw: &str) -> ServerMessage {
        ServerMessage::join(id(raw), &DisplayIdentity::new(format!("P{raw}"), 0x123456))
    }

    fn snapshot(raw: &str, position: [f32; 3]) -> ParticipantSnapshot {
        ParticipantSnapshot {
            id: id(raw),
            name: format!("P{raw}"),
            color: 0xABCDEF,
            state: Transform::new(position, [0.0; 3]),
        }
    }

    #[test]
    fn test_welcome_spawns_existing_but_not_self() {
        let mut scene = RecordingScene::default();
        let mut set = AvatarSet::new();
        let welcome = ServerMessage::welcome(
            id("3"),
            &DisplayIdentity::new("Player 3", 1),
            vec![snapshot("1", [1.0, 2.0, 3.0]), snapshot("3", [0.0; 3]), snapshot("2", [0.0; 3])],
        );

        assert_eq!(set.apply(&welcome, &mut scene), Reconciled::Welcomed { spawned: 2 });
        assert_eq!(set.len(), 2);
        assert!(!set.contains(&id("3")));
        let mut listed: Vec<&str> = set.iter().map(|avatar| avatar.id.as_str()).collect();
        listed.sort_unstable();
        assert_eq!(listed, ["1", "2"]);
        assert_eq!(set.get(&id("1")).unwrap().transform.position, [1.0, 2.0, 3.0]);
        assert_eq!(set.local().unwrap().identity.name, "Player 3");
    }

    #[test]
    fn test_duplicate_join_spawns_once() {
        let mut scene = RecordingScene::default();
        let mut set = AvatarSet::new();

        assert_eq!(set.apply(&join("7"), &mut scene), Reconciled::Spawned(id("7")));
        assert_eq!(set.apply(&join("7"), &mut scene), Reconciled::Ignored);
        assert_eq!(set.len(), 1);
        assert_eq!(scene.spawned.len(), 1);
        assert_eq!(set.get(&id("7")).unwrap().transform, Transform::SPAWN);
    }

    #[test]
    fn test_state_updates_tracked_avatar() {
        let mut scene = RecordingScene::default();
        let mut set = AvatarSet::new();
        set.apply(&join("1"), &mut scene);

        let state = Transform::new([1.0, 2.0, 3.0], [0.0, 0.0, 0.0]);
        assert_eq!(
            set.apply(&ServerMessage::state(id("1"), state), &mut scene),
            Reconciled::Moved(id("1"))
        );
        assert_eq!(set.get(&id("1")).unwrap().transform, state);
        assert_eq!(scene.moves, 1);
    }

    #[test]
    fn test_no_resurrection_after_leave() {
        let mut scene = RecordingScene::default();
        let mut set = AvatarSet::new();
        set.apply(&join("1"), &mut scene);

        assert_eq!(set.apply(&ServerMessage::leave(id("1")), &mut scene), Reconciled::Despawned(id("1")));
        let late = ServerMessage::state(id("1"), Transform::new([9.0; 3], [0.0; 3]));
        assert_eq!(set.apply(&late, &mut scene), Reconciled::Ignored);

        assert!(set.is_empty());
        assert!(scene.live.is_empty());
        assert_eq!(scene.spawned.len(), 1);
    }

    #[test]
    fn test_leave_for_unknown_is_ignored() {
        let mut scene = RecordingScene::default();
        let mut set: AvatarSet<u32> = AvatarSet::new();
        assert_eq!(set.apply(&ServerMessage::leave(id("x")), &mut scene), Reconciled::Ignored);
        assert!(scene.despawned.is_empty());
    }

    #[test]
    fn test_clear_despawns_everything_once() {
        let mut scene = RecordingScene::default();
        let mut set = AvatarSet::new();
        for raw in ["1", "2", "3"] {
            set.apply(&join(raw), &mut scene);
        }

        assert_eq!(set.clear(&mut scene), 3);
        assert_eq!(set.clear(&mut scene), 0);
        assert_eq!(scene.despawned.len(), 3);
        assert!(scene.live.is_empty());
        assert!(set.local().is_none());
    }

    #[test]
    fn test_throttle_allows_once_per_interval() {
        let mut throttle = PublishThrottle::new(Duration::from_millis(50));
        assert_eq!(throttle.interval(), Duration::from_millis(50));
        let start = Instant::now();

        assert!(throttle.ready(start));
        throttle.mark(start);
        assert!(!throttle.ready(start + Duration::from_millis(10)));
        assert!(!throttle.ready(start + Duration::from_millis(49)));
        assert!(throttle.ready(start + Duration::from_millis(50)));

        throttle.reset();
        assert!(throttle.ready(start));
    }

    #[test]
    fn test_tick_is_noop_while_disconnected() {
        let mut sync: PresenceSync<RecordingScene> = PresenceSync::new(ClientConfig::default());
        assert!(sync.client().endpoint().is_none());
        assert!(!sync.tick(Instant::now(), &Transform::SPAWN));
        assert_eq!(sync.player_count(), 0);
        assert!(sync.local_identity().is_none());
    }

    #[test]
    fn test_disconnect_when_idle_does_nothing() {
        let mut scene = RecordingScene::default();
        let mut sync: PresenceSync<RecordingScene> = PresenceSync::new(ClientConfig::default());
        sync.disconnect(&mut scene);
        assert_eq!(sync.pump(&mut scene), 0);
        assert!(scene.despawned.is_empty());
        assert_eq!(sync.connection_state(), ConnectionState::Disconnected);
    }
}
