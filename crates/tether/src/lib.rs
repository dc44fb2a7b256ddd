//! # Tether
//!
//! Server-authoritative state synchronization for small multiplayer rooms.
//!
//! A room on the server owns the canonical state of its players: position,
//! rotation, display name and skin. Clients send intents
//! (`updatePosition`, `changeSkin`); the room applies them and replicates
//! the result as snapshots and incremental patches. On the client, a
//! [`Reconciler`](tether_client::Reconciler) turns the replicated state into
//! spawned, smoothed and dressed presentation objects.
//!
//! ## Crates
//!
//! | Crate | Role |
//! |---|---|
//! | `tether-schema` | Replicated state, change tracking, patches |
//! | `tether-transport` | WebSocket listener and connector |
//! | `tether-protocol` | Envelopes, system and room messages, codec |
//! | `tether-tick` | Patch tick scheduler, send rate limiter |
//! | `tether-room` | Room actors and the room manager |
//! | `tether-client` | Session client, replica, reconciliation loop |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tether::prelude::*;
//!
//! # async fn run() -> Result<(), TetherError> {
//! let server = TetherServer::builder().bind("0.0.0.0:8080").build().await?;
//! server.run().await
//! # }
//! ```

mod config;
mod error;
mod handler;
mod server;

pub use config::{BIND_ENV, ConfigError, ServerConfig};
pub use error::TetherError;
pub use server::{TetherServer, TetherServerBuilder};

/// Everything a server or client application usually needs.
pub mod prelude {
    pub use crate::{
        BIND_ENV, ConfigError, ServerConfig, TetherError, TetherServer, TetherServerBuilder,
    };

    pub use tether_client::settings::{join_options_from_settings, selector_from_settings};
    pub use tether_client::{
        ClientConfig, ClientError, ClientState, EntityRole, IntentSink, JsonFileSettings,
        LocalPrediction, MemorySettings, MotionFlags, Presentation, ReconcileConfig, Reconciler,
        Replica, SessionClient, SettingsError, SettingsStore,
    };
    pub use tether_protocol::{
        ClientMessage, JoinOptions, PROTOCOL_VERSION, RoomId, RoomListEntry, RoomSelector,
        ServerMessage,
    };
    pub use tether_room::{RoomConfig, RoomError};
    pub use tether_schema::{
        ChangeEvent, Player, RoomState, SessionId, SkinCatalog, SpawnRing, Transform, Vec3,
    };
    pub use tether_tick::RateLimiter;
    pub use tether_transport::TransportError;
}
