//! Time sources and the cancellable periodic tick.
//!
//! Trackers never read ambient time directly. They are handed a [`Clock`] and
//! read both monotonic and wall-clock time through it, which lets tests run on
//! tokio's paused clock or on a [`ManualClock`].

use chrono::{DateTime, Utc};
use std::cell::Cell;
use std::ops::ControlFlow;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::trace;

/// A source of the current time.
pub trait Clock {
    /// Monotonic instant used for elapsed-time accounting.
    fn now(&self) -> Instant;

    /// Wall-clock instant used for lap timestamps and sessions.
    fn wall_time(&self) -> DateTime<Utc>;
}

/// The production clock.
///
/// Monotonic time comes from `tokio::time::Instant`, which follows the runtime's
/// clock, so a paused test runtime makes this clock virtual as well.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall_time(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    wall_origin: DateTime<Utc>,
    offset: Cell<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            wall_origin: Utc::now(),
            offset: Cell::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.offset.set(self.offset.get() + by);
    }

    pub fn advance_millis(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.offset.get()
    }

    fn wall_time(&self) -> DateTime<Utc> {
        let offset = chrono::Duration::from_std(self.offset.get()).unwrap_or(chrono::Duration::zero());
        self.wall_origin + offset
    }
}

/// Owns the periodic sampling task of a running tracker.
///
/// The handle is the single source of truth for "is a tick pending". Dropping
/// it aborts the task, and because trackers are driven on a single-threaded
/// `LocalSet`, an aborted task is never polled again.
#[derive(Debug)]
pub struct TickHandle {
    task: JoinHandle<()>,
}

impl TickHandle {
    /// Spawns a local task that calls `on_tick` every `period`, starting one
    /// period from now, until it returns `ControlFlow::Break`.
    ///
    /// # Panics
    /// Panics when called outside of a `tokio::task::LocalSet`.
    pub(crate) fn spawn<F>(period: Duration, mut on_tick: F) -> Self
    where
        F: FnMut() -> ControlFlow<()> + 'static,
    {
        let task = tokio::task::spawn_local(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if on_tick().is_break() {
                    trace!("Tick loop ended by its owner.");
                    break;
                }
            }
        });
        Self { task }
    }

    pub fn cancel(self) {
        drop(self);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for TickHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
