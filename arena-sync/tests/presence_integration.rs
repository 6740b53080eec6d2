//! Integration tests for client-side presence.
//!
//! These tests connect `PresenceSync` instances to a real relay (or to a
//! scripted WebSocket peer) and verify avatar reconciliation, rate-limited
//! publishing and teardown through the full network stack.

use std::collections::HashSet;
use std::time::Instant;

use arena_sync::client::{ClientConfig, ConnectionState};
use arena_sync::presence::{PresenceSync, Scene};
use arena_sync::protocol::{
    DisplayIdentity, ParticipantId, ParticipantSnapshot, ServerMessage, Transform,
};
use arena_sync::server::{RelayConfig, RelayServer};
use futures_util::{SinkExt, StreamExt};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message;

/// Scene that keeps handles as participant ids.
#[derive(Default)]
struct TestScene {
    live: HashSet<ParticipantId>,
    spawns: usize,
    despawns: usize,
}

impl Scene for TestScene {
    type Handle = ParticipantId;

    fn spawn_avatar(
        &mut self,
        id: &ParticipantId,
        _identity: &DisplayIdentity,
        _transform: &Transform,
    ) -> ParticipantId {
        assert!(self.live.insert(id.clone()), "double spawn for {id}");
        self.spawns += 1;
        id.clone()
    }

    fn despawn_avatar(&mut self, handle: ParticipantId) {
        assert!(self.live.remove(&handle), "despawn of unknown {handle}");
        self.despawns += 1;
    }
}

struct Player {
    sync: PresenceSync<TestScene>,
    scene: TestScene,
}

impl Player {
    async fn connect(url: &str) -> Self {
        let mut player = Player {
            sync: PresenceSync::new(ClientConfig::default()),
            scene: TestScene::default(),
        };
        player.sync.connect(url, &mut player.scene).await.unwrap();
        player
            .pump_until(|sync| sync.local_identity().is_some())
            .await;
        player
    }

    fn id(&self) -> ParticipantId {
        self.sync.local_identity().unwrap().id.clone()
    }

    /// Pump relay events until `done` holds, failing after two seconds.
    async fn pump_until<F>(&mut self, done: F)
    where
        F: Fn(&PresenceSync<TestScene>) -> bool,
    {
        let reached = timeout(Duration::from_secs(2), async {
            loop {
                self.sync.pump(&mut self.scene);
                if done(&self.sync) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(reached.is_ok(), "condition not reached in time");
    }
}

/// Start a relay on a free port, return its endpoint URL.
async fn start_test_relay() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = RelayServer::new(RelayConfig::default());
    tokio::spawn(async move {
        server.serve(listener).await.unwrap();
    });
    format!("ws://127.0.0.1:{port}/ws")
}

#[tokio::test]
async fn test_presence_round_trip() {
    let url = start_test_relay().await;

    let mut a = Player::connect(&url).await;
    let mut b = Player::connect(&url).await;
    let (a_id, b_id) = (a.id(), b.id());

    assert_eq!(a.sync.client().endpoint(), Some(url.as_str()));
    assert_eq!(a.sync.local_identity().unwrap().identity.name, "Red");
    assert_eq!(b.sync.local_identity().unwrap().identity.name, "Blue");

    // B learned about A from its welcome, A about B from the join.
    assert!(b.sync.avatars().contains(&a_id));
    a.pump_until(|sync| sync.avatars().contains(&b_id)).await;
    assert_eq!(a.sync.player_count(), 2);
    assert_eq!(b.sync.player_count(), 2);

    let target = Transform::new([1.0, 2.0, 3.0], [0.0, 0.0, 0.0]);
    assert!(a.sync.tick(Instant::now(), &target));
    let a_key = a_id.clone();
    b.pump_until(move |sync| {
        sync.avatars()
            .get(&a_key)
            .is_some_and(|avatar| avatar.transform == target)
    })
    .await;

    a.sync.disconnect(&mut a.scene);
    assert_eq!(a.sync.connection_state(), ConnectionState::Disconnected);
    assert!(a.scene.live.is_empty());
    assert_eq!(a.sync.player_count(), 0);

    b.pump_until(|sync| sync.avatars().is_empty()).await;
    assert!(b.scene.live.is_empty());
    assert_eq!(b.sync.player_count(), 1);
}

#[tokio::test]
async fn test_tick_is_rate_limited() {
    let url = start_test_relay().await;

    let (mut observer, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    observer.next().await.unwrap().unwrap(); // welcome

    let mut a = Player::connect(&url).await;
    observer.next().await.unwrap().unwrap(); // join

    let start = Instant::now();
    let player = Transform::new([2.0, 0.0, 2.0], [0.0; 3]);
    let sent = (0..10)
        .filter(|i| a.sync.tick(start + Duration::from_millis(*i), &player))
        .count();
    assert_eq!(sent, 1);

    let first = timeout(Duration::from_secs(2), observer.next()).await.unwrap();
    assert!(matches!(first, Some(Ok(Message::Text(_)))));
    let extra = timeout(Duration::from_millis(200), observer.next()).await;
    assert!(extra.is_err(), "throttled tick reached the relay");

    assert!(a.sync.tick(start + Duration::from_millis(60), &player));
}

#[tokio::test]
async fn test_connection_loss_tears_down_once() {
    // Scripted peer: welcome with one participant, a join, then hang up.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let welcome = ServerMessage::welcome(
            ParticipantId::new("1"),
            &DisplayIdentity::new("Red", 0xE53935),
            vec![ParticipantSnapshot {
                id: ParticipantId::new("2"),
                name: "Blue".into(),
                color: 0x1E88E5,
                state: Transform::SPAWN,
            }],
        );
        let join = ServerMessage::join(ParticipantId::new("3"), &DisplayIdentity::new("Player 3", 0x33AA55));
        for event in [welcome, join] {
            ws.send(Message::text(event.encode().unwrap())).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        ws.close(None).await.unwrap();
    });

    let mut player = Player::connect(&format!("ws://127.0.0.1:{port}/ws")).await;
    player.pump_until(|sync| sync.avatars().len() == 2).await;
    assert_eq!(player.scene.spawns, 2);

    player
        .pump_until(|sync| sync.connection_state() == ConnectionState::Disconnected)
        .await;
    assert!(player.sync.avatars().is_empty());
    assert!(player.scene.live.is_empty());
    assert_eq!(player.scene.despawns, 2);

    player.sync.disconnect(&mut player.scene);
    player.sync.pump(&mut player.scene);
    assert_eq!(player.scene.despawns, 2);
    assert!(!player.sync.tick(Instant::now(), &Transform::SPAWN));
}

#[tokio::test]
async fn test_reconnect_replaces_previous_session() {
    let url = start_test_relay().await;

    let _other = Player::connect(&url).await;
    let mut player = Player::connect(&url).await;
    let first_id = player.id();
    assert_eq!(player.sync.avatars().len(), 1);

    player.sync.connect(&url, &mut player.scene).await.unwrap();
    assert_eq!(player.scene.despawns, 1);
    assert!(player.sync.local_identity().is_none());

    player.pump_until(|sync| sync.local_identity().is_some()).await;
    assert_ne!(player.id(), first_id);
    // The old session may still be listed until its leave arrives.
    let stale = first_id.clone();
    player
        .pump_until(move |sync| sync.avatars().len() == 1 && !sync.avatars().contains(&stale))
        .await;
}
