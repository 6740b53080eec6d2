//! # arena-sync - Real-time presence relay for multiplayer arenas
//!
//! Provides a WebSocket relay that tracks connected participants and fans
//! out their transforms, plus the client side that turns the relay's event
//! stream into remote avatars in a local scene.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     WebSocket      ┌──────────────┐
//! │ PresenceSync │ ◄─────────────────► │ RelayServer  │
//! │ (per player) │     JSON frames     │ (central)    │
//! └──────┬───────┘                     └──────┬───────┘
//!        │                                    │
//!        ▼                                    ▼
//! ┌──────────────┐                     ┌──────────────┐
//! │ AvatarSet    │                     │ Participant  │
//! │ → Scene      │                     │ Registry     │
//! └──────────────┘                     └──────┬───────┘
//!                                             │
//!                                     ┌───────┴───────┐
//!                                     │ fan_out       │
//!                                     │ (try_send)    │
//!                                     └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: JSON wire messages
//! - [`identity`]: Display name/color allocation
//! - [`registry`]: Authoritative participant registry
//! - [`broadcast`]: Non-blocking fan-out to per-connection outboxes
//! - [`server`]: WebSocket relay server
//! - [`client`]: WebSocket client connection
//! - [`presence`]: Remote avatar reconciliation and rate-limited publishing

pub mod protocol;
pub mod identity;
pub mod registry;
pub mod broadcast;
pub mod server;
pub mod client;
pub mod presence;

// Re-exports for convenience
pub use protocol::{
    ClientMessage, DisplayIdentity, ParticipantId, ParticipantSnapshot, ProtocolError,
    ServerMessage, Transform,
};
pub use identity::{allocate_identity, RESERVED_IDENTITIES};
pub use registry::{Admission, Participant, ParticipantRegistry};
pub use broadcast::{fan_out, BroadcastStats, Delivery, FanOutReport, Frame, Outbox};
pub use server::{Relay, RelayConfig, RelayError, RelayServer, RelayStats};
pub use client::{ClientConfig, ClientError, ConnectionState, SyncClient, SyncEvent};
pub use presence::{
    AvatarSet, LocalIdentity, LocalPlayer, PresenceSync, PublishThrottle, Reconciled,
    RemoteAvatar, Scene,
};
