//! The countdown timer.

use crate::events::TrackerEvent;
use crate::lifecycle::{persist, Lifecycle, ModuleKind, ModuleState, TimeModule, TrackerOptions};
use crate::repository::{SessionRepository, TimerSession};
use crate::span::TimeSpan;
use crate::time::TickHandle;
use std::cell::RefCell;
use std::fmt;
use std::ops::ControlFlow;
use std::rc::{Rc, Weak};
use tokio::time::Instant;
use tracing::{debug, info, trace};

const TIME_UP_EVENTS: [TrackerEvent; 3] = [
    TrackerEvent::Tick(TimeSpan::ZERO),
    TrackerEvent::Stop,
    TrackerEvent::TimeUp,
];

/// Counts down from a fixed duration to zero.
///
/// `Timer` is a cheap, clonable handle; clones drive the same countdown. While
/// running it samples every `tick_interval`, publishing `tick(remaining)`. When
/// the remaining time reaches zero it finishes on its own, publishing
/// `tick → stop → timeUp`.
///
/// Starting a timer spawns its tick task with `spawn_local`, so it must be
/// driven inside a `tokio::task::LocalSet`.
#[derive(Clone)]
pub struct Timer {
    shared: Rc<TimerShared>,
}

struct TimerShared {
    core: RefCell<TimerCore>,
    options: TrackerOptions,
    repository: RefCell<Option<Rc<dyn SessionRepository<TimerSession>>>>,
}

struct TimerCore {
    lifecycle: Lifecycle,
    duration: TimeSpan,
    remaining: TimeSpan,
    session: Option<TimerSession>,
    paused_at: Option<Instant>,
}

impl TimerCore {
    fn remaining_at(&self, now: Instant) -> TimeSpan {
        let total = self.duration.as_millis();
        TimeSpan::from_millis(total.saturating_sub(self.lifecycle.live_elapsed_ms(now)))
    }

    fn close_session(&mut self, shared: &TimerShared, completed: bool) -> Option<TimerSession> {
        let mut session = self.session.take()?;
        if let Some(paused_at) = self.paused_at.take() {
            let now = shared.options.clock.now();
            session.paused_ms += now.saturating_duration_since(paused_at).as_millis() as u64;
        }
        session.finished_at = Some(shared.options.clock.wall_time());
        session.completed = completed;
        Some(session)
    }

    /// Finishes a countdown that has run out and closes its session.
    fn expire(&mut self, shared: &TimerShared, now: Instant) -> Option<TimerSession> {
        self.lifecycle.finish(now);
        self.remaining = TimeSpan::ZERO;
        self.close_session(shared, true)
    }
}

impl Timer {
    /// Creates an idle timer using the system clock and discarding events.
    pub fn new(duration: TimeSpan) -> Self {
        Self::with_options(duration, TrackerOptions::default())
    }

    pub fn with_options(duration: TimeSpan, options: TrackerOptions) -> Self {
        Self {
            shared: Rc::new(TimerShared {
                core: RefCell::new(TimerCore {
                    lifecycle: Lifecycle::default(),
                    duration,
                    remaining: duration,
                    session: None,
                    paused_at: None,
                }),
                options,
                repository: RefCell::new(None),
            }),
        }
    }

    /// Attaches a repository that receives each closed session.
    pub fn attach_repository(&self, repository: Rc<dyn SessionRepository<TimerSession>>) {
        *self.shared.repository.borrow_mut() = Some(repository);
    }

    /// The fixed duration this timer counts down from.
    pub fn duration(&self) -> TimeSpan {
        self.shared.core.borrow().duration
    }

    /// The remaining time as of the last sample or transition.
    pub fn remaining(&self) -> TimeSpan {
        self.shared.core.borrow().remaining
    }

    /// True while a tick task is scheduled.
    pub fn has_pending_tick(&self) -> bool {
        self.shared.core.borrow().lifecycle.has_pending_tick()
    }

    fn on_tick(shared: &Weak<TimerShared>) -> ControlFlow<()> {
        let Some(shared) = shared.upgrade() else {
            return ControlFlow::Break(());
        };
        let now = shared.options.clock.now();

        let (events, closed) = {
            let mut core = shared.core.borrow_mut();
            if !core.lifecycle.is_running() {
                return ControlFlow::Break(());
            }
            core.remaining = core.remaining_at(now);
            trace!("Timer tick: {} remaining.", core.remaining);

            if core.remaining.is_zero() {
                (TIME_UP_EVENTS.to_vec(), Some(core.expire(&shared, now)))
            } else {
                (vec![TrackerEvent::Tick(core.remaining)], None)
            }
        };

        shared.options.publish_all(events);
        match closed {
            Some(session) => {
                Self::time_up(&shared, session);
                ControlFlow::Break(())
            }
            None => ControlFlow::Continue(()),
        }
    }

    fn time_up(shared: &TimerShared, session: Option<TimerSession>) {
        info!("Timer finished: time is up.");
        if let Some(session) = session {
            persist(shared.repository.borrow().as_ref(), &session, "timer");
        }
    }
}

impl TimeModule for Timer {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Timer
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
            if let Some(paused_at) = core.paused_at.take() {
                let paused = now.saturating_duration_since(paused_at).as_millis() as u64;
                if let Some(session) = core.session.as_mut() {
                    session.paused_ms += paused;
                }
            }
            if core.session.is_none() {
                core.session = Some(TimerSession::open(core.duration, options.clock.wall_time()));
            }
            let weak = Rc::downgrade(&self.shared);
            core.lifecycle
                .arm(TickHandle::spawn(options.tick_interval, move || Self::on_tick(&weak)));
            debug!("Timer started with {} remaining.", core.remaining);
        }
        options.publish_all([TrackerEvent::Start]);
    }

    fn pause(&self) {
        let now = self.shared.options.clock.now();
        let (events, expired) = {
            let mut core = self.shared.core.borrow_mut();
            if !core.lifecycle.is_running() {
                return;
            }
            // Ran out between ticks: finish instead of freezing at zero.
            if core.remaining_at(now).is_zero() {
                (TIME_UP_EVENTS.to_vec(), Some(core.expire(&self.shared, now)))
            } else {
                let Some(elapsed) = core.lifecycle.suspend(now) else {
                    return;
                };
                core.remaining = core.duration.saturating_sub(TimeSpan::from_millis(elapsed));
                core.paused_at = Some(now);
                debug!("Timer paused with {} remaining.", core.remaining);
                // The final tick carries the frozen value so displays settle on it.
                (vec![TrackerEvent::Tick(core.remaining), TrackerEvent::Pause], None)
            }
        };
        self.shared.options.publish_all(events);
        if let Some(session) = expired {
            Self::time_up(&self.shared, session);
        }
    }

    fn stop(&self) {
        let now = self.shared.options.clock.now();
        let closed = {
            let mut core = self.shared.core.borrow_mut();
            core.lifecycle.finish(now);
            core.remaining = core.remaining_at(now);
            debug!("Timer stopped with {} remaining.", core.remaining);
            core.close_session(&self.shared, false)
        };
        self.shared.options.publish_all([TrackerEvent::Stop]);
        if let Some(session) = closed {
            persist(self.shared.repository.borrow().as_ref(), &session, "timer");
        }
    }

    fn reset(&self) {
        let abandoned = {
            let mut core = self.shared.core.borrow_mut();
            core.lifecycle.rewind();
            core.remaining = core.duration;
            let abandoned = core.close_session(&self.shared, false);
            core.paused_at = None;
            debug!("Timer reset to {}.", core.duration);
            abandoned
        };
        self.shared.options.publish_all([TrackerEvent::Reset]);
        if let Some(session) = abandoned {
            persist(self.shared.repository.borrow().as_ref(), &session, "timer");
        }
    }

    fn display_time(&self) -> TimeSpan {
        self.remaining()
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.shared.core.borrow();
        f.debug_struct("Timer")
            .field("state", &core.lifecycle.state())
            .field("duration", &core.duration)
            .field("remaining", &core.remaining)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventKind, EventLog};
    use crate::repository::InMemoryRepository;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio::task::LocalSet;
    use tokio::time::sleep;

    fn timer_with_log(duration: TimeSpan) -> (Timer, Rc<EventLog>) {
        let log = Rc::new(EventLog::new());
        let timer = Timer::with_options(duration, TrackerOptions::default().with_sink(log.clone()));
        (timer, log)
    }

    #[test]
    fn initial_state() {
        let timer = Timer::new(TimeSpan::new(0, 5, 0, 0));
        assert_eq!(timer.state(), ModuleState::Idle);
        assert_eq!(timer.duration(), TimeSpan::new(0, 5, 0, 0));
        assert_eq!(timer.remaining(), timer.duration());
        assert_eq!(timer.kind(), ModuleKind::Timer);
    }

    #[test]
    fn pause_and_stop_without_start() {
        let (timer, log) = timer_with_log(TimeSpan::from_secs(5));
        timer.pause();
        assert_eq!(timer.state(), ModuleState::Idle);
        assert!(log.events().is_empty());

        timer.stop();
        assert_eq!(timer.state(), ModuleState::Finished);
        assert_eq!(log.names(), vec!["stop"]);
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_ignored() {
        LocalSet::new()
            .run_until(async {
                let (timer, log) = timer_with_log(TimeSpan::new(0, 5, 0, 0));
                timer.start();
                timer.start();
                assert_eq!(timer.state(), ModuleState::Running);
                assert_eq!(log.count(EventKind::Start), 1);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn counts_down_while_running() {
        LocalSet::new()
            .run_until(async {
                let (timer, log) = timer_with_log(TimeSpan::from_secs(10));
                timer.start();
                sleep(Duration::from_millis(3_000)).await;

                let remaining = timer.remaining().as_millis();
                assert!((6_990..=7_010).contains(&remaining), "remaining {remaining}");
                assert!(log.count(EventKind::Tick) > 0);

                let ticks = log.ticks();
                assert!(ticks.windows(2).all(|pair| pair[0] >= pair[1]));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn pause_emits_frozen_tick_then_pause() {
        LocalSet::new()
            .run_until(async {
                let (timer, log) = timer_with_log(TimeSpan::from_secs(10));
                timer.start();
                sleep(Duration::from_millis(2_505)).await;
                log.clear();

                timer.pause();
                assert_eq!(
                    log.events(),
                    vec![
                        TrackerEvent::Tick(TimeSpan::from_millis(7_495)),
                        TrackerEvent::Pause
                    ]
                );
                assert_eq!(timer.remaining(), TimeSpan::from_millis(7_495));
                assert!(!timer.has_pending_tick());

                sleep(Duration::from_millis(5_000)).await;
                assert_eq!(timer.remaining(), TimeSpan::from_millis(7_495));
                assert_eq!(log.count(EventKind::Tick), 1);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn finishing_emits_tick_stop_time_up() {
        LocalSet::new()
            .run_until(async {
                let (timer, log) = timer_with_log(TimeSpan::from_millis(50));
                timer.start();
                sleep(Duration::from_millis(200)).await;

                assert_eq!(timer.state(), ModuleState::Finished);
                assert_eq!(timer.remaining(), TimeSpan::ZERO);
                assert_eq!(
                    log.transitions(),
                    vec!["start", "tick", "stop", "timeUp"]
                );
                assert_eq!(log.ticks().last(), Some(&TimeSpan::ZERO));
                assert!(!timer.has_pending_tick());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn zero_duration_finishes_on_first_tick() {
        LocalSet::new()
            .run_until(async {
                let (timer, log) = timer_with_log(TimeSpan::ZERO);
                timer.start();
                sleep(Duration::from_millis(20)).await;
                assert_eq!(timer.state(), ModuleState::Finished);
                assert_eq!(log.count(EventKind::TimeUp), 1);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn finished_timer_ignores_start_until_reset() {
        LocalSet::new()
            .run_until(async {
                let (timer, log) = timer_with_log(TimeSpan::from_secs(1));
                timer.start();
                timer.stop();
                timer.start();
                assert_eq!(timer.state(), ModuleState::Finished);
                assert_eq!(log.count(EventKind::Start), 1);

                timer.reset();
                timer.start();
                assert_eq!(timer.state(), ModuleState::Running);
                assert_eq!(log.count(EventKind::Start), 2);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn subscriber_can_reset_from_time_up() {
        LocalSet::new()
            .run_until(async {
                let bus = Rc::new(crate::events::EventBus::new());
                let timer = Timer::with_options(
                    TimeSpan::from_millis(30),
                    TrackerOptions::default().with_sink(bus.clone()),
                );
                let handle = timer.clone();
                bus.on(EventKind::TimeUp, move |_| handle.reset());

                timer.start();
                sleep(Duration::from_millis(100)).await;
                assert_eq!(timer.state(), ModuleState::Idle);
                assert_eq!(timer.remaining(), TimeSpan::from_millis(30));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn sessions_are_saved_when_attached() {
        LocalSet::new()
            .run_until(async {
                let repo = Rc::new(InMemoryRepository::<TimerSession>::new());
                let (timer, _log) = timer_with_log(TimeSpan::from_millis(500));
                timer.attach_repository(repo.clone());

                timer.start();
                sleep(Duration::from_millis(100)).await;
                timer.pause();
                sleep(Duration::from_millis(250)).await;
                timer.start();
                sleep(Duration::from_millis(1_000)).await;

                let sessions = repo.all();
                assert_eq!(sessions.len(), 1);
                let session = &sessions[0];
                assert!(session.completed);
                assert_eq!(session.paused_ms, 250);
                assert_eq!(session.duration, TimeSpan::from_millis(500));
                assert!(session.finished_at.is_some());

                timer.reset();
                assert_eq!(repo.len(), 1);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_early_session_is_not_completed() {
        LocalSet::new()
            .run_until(async {
                let repo = Rc::new(InMemoryRepository::<TimerSession>::new());
                let timer = Timer::new(TimeSpan::from_secs(60));
                timer.attach_repository(repo.clone());

                timer.start();
                sleep(Duration::from_millis(100)).await;
                timer.stop();

                let sessions = repo.all();
                assert_eq!(sessions.len(), 1);
                assert!(!sessions[0].completed);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn pause_after_running_out_between_ticks_finishes() {
        LocalSet::new()
            .run_until(async {
                let repo = Rc::new(InMemoryRepository::<TimerSession>::new());
                let log = Rc::new(EventLog::new());
                let timer = Timer::with_options(
                    TimeSpan::from_millis(500),
                    TrackerOptions::default()
                        .with_sink(log.clone())
                        .with_tick_interval(Duration::from_secs(1)),
                );
                timer.attach_repository(repo.clone());

                timer.start();
                sleep(Duration::from_millis(700)).await;
                assert_eq!(timer.state(), ModuleState::Running);

                timer.pause();
                assert_eq!(timer.state(), ModuleState::Finished);
                assert_eq!(timer.remaining(), TimeSpan::ZERO);
                assert_eq!(log.names(), vec!["start", "tick", "stop", "timeUp"]);
                assert!(!timer.has_pending_tick());

                sleep(Duration::from_secs(5)).await;
                assert_eq!(log.count(EventKind::TimeUp), 1);
                let sessions = repo.all();
                assert_eq!(sessions.len(), 1);
                assert!(sessions[0].completed);
            })
            .await;
    }
}
