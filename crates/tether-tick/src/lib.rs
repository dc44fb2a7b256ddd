//! Timing primitives for Tether.
//!
//! - [`TickScheduler`] drives a room's patch cadence: changes are coalesced
//!   between ticks and flushed once per tick, and every Nth tick is marked
//!   as a keyframe. A rate of 0 selects event-driven mode, where the
//!   scheduler never fires and the room flushes on every mutation instead.
//! - [`RateLimiter`] bounds how often a client sends position intents,
//!   measured in elapsed time rather than in calls or frames.
//!
//! Both read time through `tokio::time`, so tests can run them under
//! `start_paused` and advance the clock by hand.

mod rate_limit;
mod scheduler;

pub use rate_limit::RateLimiter;
pub use scheduler::{TickConfig, TickInfo, TickScheduler};
