//! The stopwatch and its laps.

use crate::common::LapId;
use crate::error::{Result, TimekeepError};
use crate::events::TrackerEvent;
use crate::lifecycle::{persist, Lifecycle, ModuleKind, ModuleState, TimeModule, TrackerOptions};
use crate::repository::{SessionRepository, StopwatchSession};
use crate::span::TimeSpan;
use crate::time::TickHandle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::ops::ControlFlow;
use std::rc::{Rc, Weak};
use tracing::{debug, trace};

/// A checkpoint recorded while the stopwatch runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lap {
    pub id: LapId,
    /// 1-based, contiguous, in recording order.
    pub lap_number: u32,
    /// Time since the previous lap, or since the start for the first one.
    pub lap_time: TimeSpan,
    /// Elapsed time when the lap was recorded.
    pub total_time: TimeSpan,
    pub timestamp: DateTime<Utc>,
}

/// Summary of the laps recorded so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LapStats {
    pub count: usize,
    /// Shortest lap; the earliest one wins a tie.
    pub best: Option<Lap>,
    /// Longest lap; the earliest one wins a tie.
    pub worst: Option<Lap>,
    pub average: TimeSpan,
}

impl LapStats {
    pub fn from_laps(laps: &[Lap]) -> Self {
        if laps.is_empty() {
            return Self::default();
        }
        let mut best = &laps[0];
        let mut worst = &laps[0];
        let mut total_ms = 0u64;
        for lap in laps {
            let ms = lap.lap_time.as_millis();
            if ms < best.lap_time.as_millis() {
                best = lap;
            }
            if ms > worst.lap_time.as_millis() {
                worst = lap;
            }
            total_ms += ms;
        }
        Self {
            count: laps.len(),
            best: Some(best.clone()),
            worst: Some(worst.clone()),
            average: TimeSpan::from_millis(total_ms / laps.len() as u64),
        }
    }
}

/// The 1-based number of the lap following `recorded` laps, saturating at
/// `u32::MAX`.
fn next_lap_number(recorded: usize) -> u32 {
    u32::try_from(recorded).map_or(u32::MAX, |count| count.saturating_add(1))
}

/// Counts up from zero and records laps.
///
/// Like `Timer`, a `Stopwatch` is a clonable handle whose tick task runs on the
/// current `LocalSet`.
#[derive(Clone)]
pub struct Stopwatch {
    shared: Rc<StopwatchShared>,
}

struct StopwatchShared {
    core: RefCell<StopwatchCore>,
    options: TrackerOptions,
    repository: RefCell<Option<Rc<dyn SessionRepository<StopwatchSession>>>>,
}

#[derive(Default)]
struct StopwatchCore {
    lifecycle: Lifecycle,
    elapsed: TimeSpan,
    laps: Vec<Lap>,
    session: Option<StopwatchSession>,
}

impl StopwatchCore {
    fn close_session(&mut self, finished_at: DateTime<Utc>, completed: bool) -> Option<StopwatchSession> {
        let mut session = self.session.take()?;
        session.finished_at = Some(finished_at);
        session.total_time = self.elapsed;
        session.laps = self.laps.clone();
        session.completed = completed;
        Some(session)
    }
}

impl Stopwatch {
    /// Creates an idle stopwatch using the system clock and discarding events.
    pub fn new() -> Self {
        Self::with_options(TrackerOptions::default())
    }

    pub fn with_options(options: TrackerOptions) -> Self {
        Self {
            shared: Rc::new(StopwatchShared {
                core: RefCell::new(StopwatchCore::default()),
                options,
                repository: RefCell::new(None),
            }),
        }
    }

    /// Attaches a repository that receives each closed session.
    pub fn attach_repository(&self, repository: Rc<dyn SessionRepository<StopwatchSession>>) {
        *self.shared.repository.borrow_mut() = Some(repository);
    }

    /// Elapsed time as of the last sample or transition.
    pub fn elapsed(&self) -> TimeSpan {
        self.shared.core.borrow().elapsed
    }

    /// A copy of the recorded laps.
    pub fn laps(&self) -> Vec<Lap> {
        self.shared.core.borrow().laps.clone()
    }

    pub fn lap_stats(&self) -> LapStats {
        LapStats::from_laps(&self.shared.core.borrow().laps)
    }

    /// True while a tick task is scheduled.
    pub fn has_pending_tick(&self) -> bool {
        self.shared.core.borrow().lifecycle.has_pending_tick()
    }

    /// Records a lap at the last sampled elapsed time.
    ///
    /// Fails with [`TimekeepError::InvalidState`] unless the stopwatch is
    /// running; nothing is recorded in that case.
    pub fn add_lap(&self) -> Result<Lap> {
        let wall = self.shared.options.clock.wall_time();
        let lap = {
            let mut core = self.shared.core.borrow_mut();
            let state = core.lifecycle.state();
            if state != ModuleState::Running {
                return Err(TimekeepError::InvalidState {
                    operation: "add a lap",
                    kind: ModuleKind::Stopwatch,
                    state,
                });
            }

            let total_ms = core.elapsed.as_millis();
            let previous_ms = core.laps.last().map_or(0, |lap| lap.total_time.as_millis());
            let lap = Lap {
                id: LapId::new(),
                lap_number: next_lap_number(core.laps.len()),
                lap_time: TimeSpan::from_millis(total_ms.saturating_sub(previous_ms)),
                total_time: core.elapsed,
                timestamp: wall,
            };
            core.laps.push(lap.clone());
            debug!("Lap {} recorded: {} (total {}).", lap.lap_number, lap.lap_time, lap.total_time);
            lap
        };
        self.shared.options.publish_all([TrackerEvent::Lap(lap.clone())]);
        Ok(lap)
    }

    fn on_tick(shared: &Weak<StopwatchShared>) -> ControlFlow<()> {
        let Some(shared) = shared.upgrade() else {
            return ControlFlow::Break(());
        };
        let now = shared.options.clock.now();
        let elapsed = {
            let mut core = shared.core.borrow_mut();
            if !core.lifecycle.is_running() {
                return ControlFlow::Break(());
            }
            core.elapsed = TimeSpan::from_millis(core.lifecycle.live_elapsed_ms(now));
            trace!("Stopwatch tick: {} elapsed.", core.elapsed);
            core.elapsed
        };
        shared.options.publish_all([TrackerEvent::Tick(elapsed)]);
        ControlFlow::Continue(())
    }

    fn save_session(&self, session: Option<StopwatchSession>) {
        if let Some(session) = session {
            persist(self.shared.repository.borrow().as_ref(), &session, "stopwatch");
        }
    }
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeModule for Stopwatch {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Stopwatch
    }

    fn state(&self) -> ModuleState {
        self.shared.core.borrow().lifecycle.state()
    }

    fn start(&self) {
        let options = &self.shared.options;
        let now = options.clock.now();
        {
            let mut core = self.shared.core.borrow_mut();
            if !core.lifecycle.begin(now) {
                return;
            }
            if core.session.is_none() {
                core.session = Some(StopwatchSession::open(options.clock.wall_time()));
            }
            let weak = Rc::downgrade(&self.shared);
            core.lifecycle
                .arm(TickHandle::spawn(options.tick_interval, move || Self::on_tick(&weak)));
            debug!("Stopwatch started at {}.", core.elapsed);
        }
        options.publish_all([TrackerEvent::Start]);
    }

    fn pause(&self) {
        let now = self.shared.options.clock.now();
        let elapsed = {
            let mut core = self.shared.core.borrow_mut();
            let Some(elapsed_ms) = core.lifecycle.suspend(now) else {
                return;
            };
            core.elapsed = TimeSpan::from_millis(elapsed_ms);
            debug!("Stopwatch paused at {}.", core.elapsed);
            core.elapsed
        };
        self.shared
            .options
            .publish_all([TrackerEvent::Tick(elapsed), TrackerEvent::Pause]);
    }

    fn stop(&self) {
        let options = &self.shared.options;
        let now = options.clock.now();
        let closed = {
            let mut core = self.shared.core.borrow_mut();
            core.lifecycle.finish(now);
            core.elapsed = TimeSpan::from_millis(core.lifecycle.accumulated_ms());
            debug!("Stopwatch stopped at {} with {} laps.", core.elapsed, core.laps.len());
            core.close_session(options.clock.wall_time(), true)
        };
        options.publish_all([TrackerEvent::Stop]);
        self.save_session(closed);
    }

    fn reset(&self) {
        let options = &self.shared.options;
        let now = options.clock.now();
        let wall = options.clock.wall_time();
        let abandoned = {
            let mut core = self.shared.core.borrow_mut();
            core.elapsed = TimeSpan::from_millis(core.lifecycle.live_elapsed_ms(now));
            core.lifecycle.rewind();
            let abandoned = core.close_session(wall, false);
            core.elapsed = TimeSpan::ZERO;
            core.laps.clear();
            debug!("Stopwatch reset.");
            abandoned
        };
        options.publish_all([TrackerEvent::Reset]);
        self.save_session(abandoned);
    }

    fn display_time(&self) -> TimeSpan {
        self.elapsed()
    }
}

impl fmt::Debug for Stopwatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.shared.core.borrow();
        f.debug_struct("Stopwatch")
            .field("state", &core.lifecycle.state())
            .field("elapsed", &core.elapsed)
            .field("laps", &core.laps.len())
            .finish()
    }
}
