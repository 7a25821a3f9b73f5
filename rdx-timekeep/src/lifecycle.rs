//! The lifecycle shared by every time-tracking module.
//!
//! A module moves through `idle → running → paused → finished`. The
//! transitions, the elapsed-time accounting and ownership of the pending tick
//! all live in [`Lifecycle`], which `Timer` and `Stopwatch` compose. What a tick
//! computes and what else a reset clears is left to each tracker.

use crate::events::{EventSink, TrackerEvent};
use crate::repository::SessionRepository;
use crate::span::TimeSpan;
use crate::time::{Clock, SystemClock, TickHandle};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

/// The default sampling period of a running tracker.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(10);

/// The lifecycle state of a module.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleState {
    #[default]
    Idle,
    Running,
    Paused,
    /// Terminal until `reset`.
    Finished,
}

impl ModuleState {
    pub fn name(&self) -> &'static str {
        match self {
            ModuleState::Idle => "idle",
            ModuleState::Running => "running",
            ModuleState::Paused => "paused",
            ModuleState::Finished => "finished",
        }
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which concrete tracker a module is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    Timer,
    Stopwatch,
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ModuleKind::Timer => "timer",
            ModuleKind::Stopwatch => "stopwatch",
        })
    }
}

/// The command contract shared by timers and stopwatches.
///
/// Every transition is total: calling one where it does not apply is a silent
/// no-op rather than an error. Trackers are cheap handles with interior
/// mutability, so commands take `&self`.
pub trait TimeModule {
    fn kind(&self) -> ModuleKind;

    fn state(&self) -> ModuleState;

    /// `idle → running` or `paused → running`.
    fn start(&self);

    /// `running → paused`.
    fn pause(&self);

    /// Any state `→ finished`. Always emits `stop`.
    fn stop(&self);

    /// Any state `→ idle`, restoring the construction-time baseline.
    fn reset(&self);

    /// What a display shows right now: remaining time for a timer, elapsed
    /// time for a stopwatch.
    fn display_time(&self) -> TimeSpan;
}

/// Construction-time collaborators of a tracker.
#[derive(Clone)]
pub struct TrackerOptions {
    pub clock: Rc<dyn Clock>,
    pub sink: Rc<dyn EventSink>,
    pub tick_interval: Duration,
}

impl TrackerOptions {
    pub fn with_clock(mut self, clock: Rc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sink(mut self, sink: Rc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub(crate) fn publish_all(&self, events: impl IntoIterator<Item = TrackerEvent>) {
        for event in events {
            self.sink.publish(&event);
        }
    }
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            clock: Rc::new(SystemClock),
            sink: Rc::new(()),
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }
}

impl fmt::Debug for TrackerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackerOptions")
            .field("tick_interval", &self.tick_interval)
            .finish_non_exhaustive()
    }
}

/// State machine and accounting shared by both trackers.
///
/// Live elapsed is `now - started_at + accumulated_ms` while running and
/// `accumulated_ms` otherwise.
#[derive(Debug, Default)]
pub(crate) struct Lifecycle {
    state: ModuleState,
    started_at: Option<Instant>,
    accumulated_ms: u64,
    ticker: Option<TickHandle>,
}

impl Lifecycle {
    pub(crate) fn state(&self) -> ModuleState {
        self.state
    }

    pub(crate) fn is_running(&self) -> bool {
        self.state == ModuleState::Running
    }

    /// Enters `running` from `idle` or `paused`. Returns `false` when the guard
    /// rejects the transition.
    pub(crate) fn begin(&mut self, now: Instant) -> bool {
        match self.state {
            ModuleState::Idle | ModuleState::Paused => {
                self.state = ModuleState::Running;
                self.started_at = Some(now);
                true
            }
            ModuleState::Running | ModuleState::Finished => false,
        }
    }

    /// Takes ownership of the tick task for the current running interval.
    pub(crate) fn arm(&mut self, ticker: TickHandle) {
        self.ticker = Some(ticker);
    }

    /// Leaves `running` for `paused`, folding the interval into the total.
    /// Returns the accumulated elapsed milliseconds, or `None` if not running.
    pub(crate) fn suspend(&mut self, now: Instant) -> Option<u64> {
        if !self.is_running() {
            return None;
        }
        self.fold(now);
        self.state = ModuleState::Paused;
        self.cancel_ticks();
        Some(self.accumulated_ms)
    }

    /// Enters `finished` from any state.
    pub(crate) fn finish(&mut self, now: Instant) {
        if self.is_running() {
            self.fold(now);
        }
        self.state = ModuleState::Finished;
        self.cancel_ticks();
    }

    /// Returns to `idle` with nothing accumulated.
    pub(crate) fn rewind(&mut self) {
        self.state = ModuleState::Idle;
        self.started_at = None;
        self.accumulated_ms = 0;
        self.cancel_ticks();
    }

    pub(crate) fn live_elapsed_ms(&self, now: Instant) -> u64 {
        let running = self
            .started_at
            .map(|started| now.saturating_duration_since(started).as_millis())
            .unwrap_or(0);
        self.accumulated_ms
            .saturating_add(u64::try_from(running).unwrap_or(u64::MAX))
    }

    pub(crate) fn accumulated_ms(&self) -> u64 {
        self.accumulated_ms
    }

    /// True while a tick task is owned and has not yet exited.
    pub(crate) fn has_pending_tick(&self) -> bool {
        self.ticker.as_ref().is_some_and(|ticker| !ticker.is_finished())
    }

    fn fold(&mut self, now: Instant) {
        self.accumulated_ms = self.live_elapsed_ms(now);
        self.started_at = None;
    }

    fn cancel_ticks(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.cancel();
        }
    }
}

/// Saves a finished session if a repository is attached. Failures are logged
/// and never reach the caller.
pub(crate) fn persist<T>(repository: Option<&Rc<dyn SessionRepository<T>>>, session: &T, what: &str) {
    if let Some(repository) = repository {
        if let Err(err) = repository.save(session) {
            warn!("Failed to save {what} session: {err:#}");
        }
    }
}
