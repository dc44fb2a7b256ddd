//! Integration tests for the tick scheduler and the rate limiter.
//!
//! Runs with paused time: `sleep_until` resolves as soon as the runtime
//! auto-advances the clock, and `tokio::time::advance` moves it by hand.

use std::time::Duration;

use tether_tick::{RateLimiter, TickConfig, TickScheduler};
use tokio::time::{self, Instant};

fn steady(rate: u32) -> TickScheduler {
    TickScheduler::new(TickConfig {
        start_jitter: Duration::ZERO,
        ..TickConfig::with_rate(rate)
    })
}

// =========================================================================
// TickConfig
// =========================================================================

#[test]
fn test_default_config_flushes_on_change() {
    let cfg = TickConfig::default();
    assert_eq!(cfg.rate_hz, 0);
    assert_eq!(cfg.period(), None);
    assert!(TickScheduler::new(cfg).flushes_on_change());
}

#[test]
fn test_20hz_is_50ms() {
    assert_eq!(
        TickConfig::with_rate(20).period(),
        Some(Duration::from_millis(50))
    );
}

#[test]
fn test_excessive_rate_is_clamped() {
    let max = TickConfig::with_rate(TickConfig::MAX_RATE_HZ).period();
    assert_eq!(TickConfig::with_rate(10_000).period(), max);
}

// =========================================================================
// TickScheduler
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_first_tick_after_one_period() {
    let mut s = steady(20);
    let start = Instant::now();

    let info = s.wait_for_tick().await;
    assert_eq!(info.tick, 1);
    assert_eq!(info.dt, Duration::from_millis(50));
    assert_eq!(info.skipped, 0);
    assert!(!info.keyframe);
    assert_eq!(Instant::now() - start, Duration::from_millis(50));
}

#[tokio::test(start_paused = true)]
async fn test_keyframe_marks_every_nth_tick() {
    let mut s = TickScheduler::new(TickConfig {
        start_jitter: Duration::ZERO,
        ..TickConfig::with_rate(20).keyframes(3)
    });
    let mut marks = Vec::new();
    for _ in 0..7 {
        marks.push(s.wait_for_tick().await.keyframe);
    }
    assert_eq!(marks, [false, false, true, false, false, true, false]);
    assert_eq!(s.ticks_fired(), 7);
}

#[tokio::test(start_paused = true)]
async fn test_late_tick_skips_ahead_instead_of_bursting() {
    let mut s = steady(20);
    s.wait_for_tick().await;

    // A room stuck for 3.5 periods.
    time::advance(Duration::from_millis(175)).await;
    let late = s.wait_for_tick().await;
    assert_eq!(late.tick, 2);
    assert_eq!(late.skipped, 2);

    // The next tick is a full period after the late one, not immediate.
    let before = Instant::now();
    s.wait_for_tick().await;
    assert_eq!(Instant::now() - before, Duration::from_millis(50));
}

#[tokio::test(start_paused = true)]
async fn test_flush_on_change_never_ticks() {
    let mut s = TickScheduler::with_rate(0);
    let result = time::timeout(Duration::from_secs(10), s.wait_for_tick()).await;
    assert!(result.is_err());
    assert_eq!(s.ticks_fired(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_tick_is_cancel_safe() {
    let mut s = steady(20);
    let cancelled = time::timeout(Duration::from_millis(10), s.wait_for_tick()).await;
    assert!(cancelled.is_err());
    assert_eq!(s.ticks_fired(), 0);

    assert_eq!(s.wait_for_tick().await.tick, 1);
}

// =========================================================================
// RateLimiter
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_rate_limiter_bounds_sends_regardless_of_call_rate() {
    let interval = Duration::from_millis(50);
    let window = Duration::from_secs(2);
    let mut limiter = RateLimiter::new(interval);

    // Caller asks every millisecond, far more often than allowed.
    let start = Instant::now();
    let mut sent = 0u32;
    while Instant::now() - start <= window {
        if limiter.try_acquire() {
            sent += 1;
        }
        time::advance(Duration::from_millis(1)).await;
    }

    let bound = (window.as_millis() / interval.as_millis()) as u32 + 1;
    assert!(sent <= bound, "sent {sent}, bound {bound}");
    assert_eq!(sent, bound);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limiter_allows_again_after_interval() {
    let mut limiter = RateLimiter::new(Duration::from_millis(50));
    assert!(limiter.try_acquire());
    time::advance(Duration::from_millis(49)).await;
    assert!(!limiter.try_acquire());
    time::advance(Duration::from_millis(1)).await;
    assert!(limiter.try_acquire());
}
