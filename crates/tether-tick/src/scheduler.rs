//! Patch cadence: a fixed-rate tick with a keyframe every N ticks.

use std::time::Duration;

use rand::Rng;
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

/// Cadence settings for a [`TickScheduler`].
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Patch flushes per second. 0 flushes on every change instead.
    pub rate_hz: u32,

    /// Every this many ticks, the tick is marked as a keyframe (a full
    /// snapshot goes out). 0 never marks one.
    pub keyframe_every: u64,

    /// Upper bound of a random delay before the first tick, so rooms
    /// created together do not flush on the same turn.
    pub start_jitter: Duration,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            rate_hz: 0,
            keyframe_every: 0,
            start_jitter: Duration::from_millis(2),
        }
    }
}

impl TickConfig {
    pub const MAX_RATE_HZ: u32 = 128;

    pub fn with_rate(rate_hz: u32) -> Self {
        Self {
            rate_hz,
            ..Default::default()
        }
    }

    pub fn keyframes(mut self, every: u64) -> Self {
        self.keyframe_every = every;
        self
    }

    /// Time between ticks, or `None` when flushing on change.
    pub fn period(&self) -> Option<Duration> {
        let rate = self.rate_hz.min(Self::MAX_RATE_HZ);
        (rate > 0).then(|| Duration::from_nanos(1_000_000_000 / u64::from(rate)))
    }
}

/// One fired tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickInfo {
    /// Starts at 1.
    pub tick: u64,
    pub dt: Duration,
    /// A full snapshot is due on this tick.
    pub keyframe: bool,
    /// Intervals dropped because the tick fired late.
    pub skipped: u64,
}

/// Fires ticks at a fixed rate.
///
/// A late tick moves the schedule forward rather than firing catch-up
/// ticks: one flush already covers every change since the previous one.
/// [`wait_for_tick`](Self::wait_for_tick) is cancel-safe.
pub struct TickScheduler {
    period: Option<Duration>,
    keyframe_every: u64,
    fired: u64,
    due: Option<Instant>,
}

impl TickScheduler {
    pub fn new(config: TickConfig) -> Self {
        if config.rate_hz > TickConfig::MAX_RATE_HZ {
            warn!(
                rate_hz = config.rate_hz,
                max = TickConfig::MAX_RATE_HZ,
                "patch rate clamped"
            );
        }
        let period = config.period();
        let due = period.map(|p| Instant::now() + p + jitter(config.start_jitter));
        debug!(
            period_ms = period.map(|p| p.as_secs_f64() * 1000.0),
            keyframe_every = config.keyframe_every,
            "tick scheduler ready"
        );

        Self {
            period,
            keyframe_every: config.keyframe_every,
            fired: 0,
            due,
        }
    }

    pub fn with_rate(rate_hz: u32) -> Self {
        Self::new(TickConfig::with_rate(rate_hz))
    }

    /// Resolves when the next tick is due. Never resolves when flushing on
    /// change.
    pub async fn wait_for_tick(&mut self) -> TickInfo {
        let (Some(due), Some(dt)) = (self.due, self.period) else {
            return std::future::pending().await;
        };
        time::sleep_until(due).await;

        let now = Instant::now();
        self.fired += 1;

        let late = now.saturating_duration_since(due);
        let skipped = u64::try_from(late.as_nanos() / dt.as_nanos()).unwrap_or(u64::MAX);
        if skipped > 0 {
            warn!(tick = self.fired, skipped, "tick late, skipping ahead");
            self.due = Some(now + dt);
        } else {
            self.due = Some(due + dt);
        }

        let keyframe = self.keyframe_every > 0 && self.fired % self.keyframe_every == 0;
        trace!(tick = self.fired, keyframe, "tick");

        TickInfo {
            tick: self.fired,
            dt,
            keyframe,
            skipped,
        }
    }

    /// True when there is no tick and changes go out immediately.
    pub fn flushes_on_change(&self) -> bool {
        self.period.is_none()
    }

    pub fn ticks_fired(&self) -> u64 {
        self.fired
    }

    pub fn period(&self) -> Option<Duration> {
        self.period
    }
}

fn jitter(max: Duration) -> Duration {
    let max_us = u64::try_from(max.as_micros()).unwrap_or(u64::MAX);
    if max_us == 0 {
        Duration::ZERO
    } else {
        Duration::from_micros(rand::rng().random_range(0..max_us))
    }
}
