//! Client side of Tether.
//!
//! - [`SessionClient`]: connects, joins a room, sends intents, leaves.
//! - [`Replica`]: the client's copy of room state, fed from the session.
//! - [`Reconciler`]: keeps presentation objects converged with the replica.
//! - [`SettingsStore`]: per-installation player settings.
//!
//! A driver ties them together once per frame:
//!
//! ```rust,ignore
//! let updates = client.drain_updates();
//! replica.apply_all(updates);
//! reconciler.tick(replica.state(), dt, &mut scene, &physics, &mut client);
//! ```
//!
//! When the client drops to [`ClientState::Disconnected`], the driver calls
//! [`Reconciler::clear`] and [`Replica::clear`].

mod error;
mod reconcile;
mod replica;
mod session;
pub mod settings;

pub use error::ClientError;
pub use reconcile::{
    EntityRole, IntentSink, LocalPrediction, MirrorEntry, MotionFlags, Presentation,
    ReconcileConfig, Reconciler, TickReport,
};
pub use replica::Replica;
pub use session::{ClientConfig, ClientState, SessionClient};
pub use settings::{JsonFileSettings, MemorySettings, SettingsError, SettingsStore};
