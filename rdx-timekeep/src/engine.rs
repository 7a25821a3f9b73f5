//! The engine that owns a widget's modules and routes commands to them.

use crate::common::ModuleId;
use crate::config::TimekeepConfig;
use crate::error::{Result, TimekeepError};
use crate::events::{EventSink, TrackerEvent};
use crate::lifecycle::{ModuleKind, ModuleState, TimeModule, TrackerOptions};
use crate::repository::{InMemoryRepository, Session, StopwatchSession, TimerSession};
use crate::span::TimeSpan;
use crate::stopwatch::{Lap, Stopwatch};
use crate::time::{Clock, SystemClock};
use crate::timer::Timer;
use chrono::{DateTime, NaiveTime};
use chrono_tz::Tz;
use slotmap::SlotMap;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;
use tokio::sync::broadcast;
use tracing::info;

const CHANNEL_CAPACITY: usize = 256;

/// A command a consumer can send to a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Pause,
    Stop,
    Reset,
    /// Stopwatch only.
    Lap,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Pause => "pause",
            Command::Stop => "stop",
            Command::Reset => "reset",
            Command::Lap => "lap",
        }
    }
}

impl FromStr for Command {
    type Err = TimekeepError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" | "resume" => Ok(Command::Start),
            "pause" => Ok(Command::Pause),
            "stop" => Ok(Command::Stop),
            "reset" => Ok(Command::Reset),
            "lap" => Ok(Command::Lap),
            other => Err(TimekeepError::ParseCommand(other.to_string())),
        }
    }
}

/// What a successfully dispatched command produced.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// The command was applied (or was a guarded no-op); the new state.
    Applied(ModuleState),
    LapRecorded(Lap),
}

/// A tracker event tagged with the module that emitted it.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleEvent {
    pub module: ModuleId,
    pub event: TrackerEvent,
}

/// A read-only view of a module for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleSnapshot {
    pub id: ModuleId,
    pub kind: ModuleKind,
    pub state: ModuleState,
    /// Remaining time for a timer, elapsed time for a stopwatch.
    pub display: TimeSpan,
    /// The timer's fixed duration.
    pub duration: Option<TimeSpan>,
    pub laps: Vec<Lap>,
}

/// A registered tracker.
#[derive(Debug, Clone)]
pub enum Module {
    Timer(Timer),
    Stopwatch(Stopwatch),
}

impl Module {
    fn as_time_module(&self) -> &dyn TimeModule {
        match self {
            Module::Timer(timer) => timer,
            Module::Stopwatch(stopwatch) => stopwatch,
        }
    }

    pub fn kind(&self) -> ModuleKind {
        self.as_time_module().kind()
    }

    pub fn state(&self) -> ModuleState {
        self.as_time_module().state()
    }
}

/// Publishes a module's events onto the engine's broadcast channel.
///
/// The module id is not known until the slot is allocated, so it is filled in
/// right after insertion.
struct ModuleSink {
    module: Cell<ModuleId>,
    sender: broadcast::Sender<ModuleEvent>,
}

impl EventSink for ModuleSink {
    fn publish(&self, event: &TrackerEvent) {
        self.sender
            .send(ModuleEvent {
                module: self.module.get(),
                event: event.clone(),
            })
            .ok();
    }
}

/// The main Timekeep engine.
///
/// The engine is the single owner of every module in a widget. Modules and
/// their tick tasks are `!Send`, so the engine lives on one thread and must be
/// driven inside a `tokio::task::LocalSet`. Consumers observe modules through
/// [`TimekeepEngine::subscribe`].
pub struct TimekeepEngine {
    config: TimekeepConfig,
    clock: Rc<dyn Clock>,
    modules: RefCell<SlotMap<ModuleId, Module>>,
    event_sender: broadcast::Sender<ModuleEvent>,
    timer_sessions: Option<Rc<InMemoryRepository<TimerSession>>>,
    stopwatch_sessions: Option<Rc<InMemoryRepository<StopwatchSession>>>,
}

// Core implementation block for internal logic.
impl TimekeepEngine {
    /// Creates a new engine reading time from the system clock.
    pub fn new(config: TimekeepConfig) -> Self {
        Self::with_clock(config, Rc::new(SystemClock))
    }

    pub fn with_clock(config: TimekeepConfig, clock: Rc<dyn Clock>) -> Self {
        let (event_sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        let record = config.record_sessions;
        Self {
            config,
            clock,
            modules: RefCell::new(SlotMap::with_key()),
            event_sender,
            timer_sessions: record.then(|| Rc::new(InMemoryRepository::new())),
            stopwatch_sessions: record.then(|| Rc::new(InMemoryRepository::new())),
        }
    }

    fn insert_with(&self, build: impl FnOnce(TrackerOptions) -> Module) -> ModuleId {
        let sink = Rc::new(ModuleSink {
            module: Cell::new(ModuleId::default()),
            sender: self.event_sender.clone(),
        });
        let options = TrackerOptions::default()
            .with_clock(self.clock.clone())
            .with_sink(sink.clone())
            .with_tick_interval(self.config.resolution.interval());
        let module = build(options);
        let kind = module.kind();
        let id = self.modules.borrow_mut().insert(module);
        sink.module.set(id);
        info!("Added {kind} module {id:?}.");
        id
    }

    fn module(&self, id: ModuleId) -> Result<Module> {
        self.modules
            .borrow()
            .get(id)
            .cloned()
            .ok_or(TimekeepError::UnknownModule(id))
    }
}

// Public API implementation block.
impl TimekeepEngine {
    pub fn config(&self) -> &TimekeepConfig {
        &self.config
    }

    /// Registers a new idle timer counting down from `duration`.
    pub fn add_timer(&self, duration: TimeSpan) -> ModuleId {
        self.insert_with(|options| {
            let timer = Timer::with_options(duration, options);
            if let Some(repository) = &self.timer_sessions {
                timer.attach_repository(repository.clone());
            }
            Module::Timer(timer)
        })
    }

    /// Registers a timer using a named preset from the configuration.
    pub fn add_timer_from_preset(&self, name: &str) -> Result<ModuleId> {
        let preset = self
            .config
            .preset(name)
            .ok_or_else(|| TimekeepError::UnknownPreset(name.to_string()))?;
        Ok(self.add_timer(preset.duration.into()))
    }

    /// Registers a new idle stopwatch.
    pub fn add_stopwatch(&self) -> ModuleId {
        self.insert_with(|options| {
            let stopwatch = Stopwatch::with_options(options);
            if let Some(repository) = &self.stopwatch_sessions {
                stopwatch.attach_repository(repository.clone());
            }
            Module::Stopwatch(stopwatch)
        })
    }

    /// Removes a module, resetting it first so none of its ticks outlive it.
    ///
    /// Returns `true` if the module was found and removed.
    pub fn remove(&self, id: ModuleId) -> bool {
        let removed = self.modules.borrow_mut().remove(id);
        match removed {
            Some(module) => {
                module.as_time_module().reset();
                info!("Removed {} module {id:?}.", module.kind());
                true
            }
            None => false,
        }
    }

    /// Applies a command to a module.
    pub fn dispatch(&self, id: ModuleId, command: Command) -> Result<CommandOutcome> {
        let module = self.module(id)?;
        let tracker = module.as_time_module();
        match (command, &module) {
            (Command::Lap, Module::Stopwatch(stopwatch)) => {
                return stopwatch.add_lap().map(CommandOutcome::LapRecorded);
            }
            (Command::Lap, Module::Timer(_)) => {
                return Err(TimekeepError::UnsupportedCommand {
                    kind: ModuleKind::Timer,
                    command: command.name(),
                });
            }
            (Command::Start, _) => tracker.start(),
            (Command::Pause, _) => tracker.pause(),
            (Command::Stop, _) => tracker.stop(),
            (Command::Reset, _) => tracker.reset(),
        }
        Ok(CommandOutcome::Applied(tracker.state()))
    }

    /// Returns a handle to a registered module.
    pub fn get(&self, id: ModuleId) -> Option<Module> {
        self.modules.borrow().get(id).cloned()
    }

    /// Lists every module with its kind and state, in insertion order.
    pub fn modules(&self) -> Vec<(ModuleId, ModuleKind, ModuleState)> {
        self.modules
            .borrow()
            .iter()
            .map(|(id, module)| (id, module.kind(), module.state()))
            .collect()
    }

    pub fn snapshot(&self, id: ModuleId) -> Result<ModuleSnapshot> {
        let module = self.module(id)?;
        let tracker = module.as_time_module();
        let (duration, laps) = match &module {
            Module::Timer(timer) => (Some(timer.duration()), Vec::new()),
            Module::Stopwatch(stopwatch) => (None, stopwatch.laps()),
        };
        Ok(ModuleSnapshot {
            id,
            kind: tracker.kind(),
            state: tracker.state(),
            display: tracker.display_time(),
            duration,
            laps,
        })
    }

    /// Subscribes to the events of every module.
    pub fn subscribe(&self) -> broadcast::Receiver<ModuleEvent> {
        self.event_sender.subscribe()
    }

    /// Finished sessions recorded so far. Empty unless `record_sessions` is set.
    pub fn sessions(&self) -> Vec<Session> {
        let timers = self
            .timer_sessions
            .iter()
            .flat_map(|repo| repo.all())
            .map(Session::Timer);
        let stopwatches = self
            .stopwatch_sessions
            .iter()
            .flat_map(|repo| repo.all())
            .map(Session::Stopwatch);
        timers.chain(stopwatches).collect()
    }

    /// The current wall-clock time in the configured timezone.
    pub fn clock_face(&self) -> DateTime<Tz> {
        self.clock.wall_time().with_timezone(&self.config.timezone)
    }

    /// The clock face as `HH:MM:SS`.
    pub fn clock_face_text(&self) -> String {
        self.clock_face().format("%H:%M:%S").to_string()
    }

    /// The clock face's time of day.
    pub fn time_of_day(&self) -> NaiveTime {
        self.clock_face().time()
    }
}

impl fmt::Debug for TimekeepEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimekeepEngine")
            .field("config", &self.config)
            .field("modules", &self.modules.borrow().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualClock;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio::task::LocalSet;
    use tokio::time::sleep;

    #[test]
    fn command_parsing() {
        assert_eq!("start".parse::<Command>().unwrap(), Command::Start);
        assert_eq!(" LAP ".parse::<Command>().unwrap(), Command::Lap);
        assert_eq!("resume".parse::<Command>().unwrap(), Command::Start);
        assert!(matches!(
            "rewind".parse::<Command>(),
            Err(TimekeepError::ParseCommand(word)) if word == "rewind"
        ));
    }

    #[test]
    fn unknown_module_is_reported() {
        let engine = TimekeepEngine::new(TimekeepConfig::default());
        let id = engine.add_stopwatch();
        assert!(engine.remove(id));
        assert!(!engine.remove(id));
        assert!(matches!(
            engine.dispatch(id, Command::Start),
            Err(TimekeepError::UnknownModule(missing)) if missing == id
        ));
    }

    #[test]
    fn lap_on_timer_is_unsupported() {
        let engine = TimekeepEngine::new(TimekeepConfig::default());
        let id = engine.add_timer(TimeSpan::from_secs(3));
        let err = engine.dispatch(id, Command::Lap).unwrap_err();
        assert_eq!(err.to_string(), "the timer module does not support 'lap'");
    }

    #[test]
    fn presets_create_timers() {
        let config = TimekeepConfig::from_toml_str(
            r#"
            [[presets]]
            name = "egg"
            duration = { minutes = 6 }
            "#,
        )
        .unwrap();
        let engine = TimekeepEngine::new(config);
        let id = engine.add_timer_from_preset("egg").unwrap();
        let snapshot = engine.snapshot(id).unwrap();
        assert_eq!(snapshot.duration, Some(TimeSpan::new(0, 6, 0, 0)));
        assert_eq!(snapshot.display, TimeSpan::new(0, 6, 0, 0));
        assert!(matches!(
            engine.add_timer_from_preset("toast"),
            Err(TimekeepError::UnknownPreset(_))
        ));
    }

    #[test]
    fn clock_face_uses_configured_timezone() {
        let config = TimekeepConfig {
            timezone: chrono_tz::Asia::Tokyo,
            ..Default::default()
        };
        let clock = Rc::new(ManualClock::new());
        let engine = TimekeepEngine::with_clock(config, clock.clone());

        let utc = clock.wall_time();
        assert_eq!(engine.clock_face().naive_utc(), utc.naive_utc());
        assert_eq!(engine.clock_face().timezone(), chrono_tz::Asia::Tokyo);
        assert_eq!(engine.clock_face_text().len(), 8);

        clock.advance_millis(60_000);
        assert_eq!(
            (engine.clock_face() - utc.with_timezone(&chrono_tz::Asia::Tokyo)).num_seconds(),
            60
        );
    }

    #[tokio::test(start_paused = true)]
    async fn events_are_tagged_with_module() {
        LocalSet::new()
            .run_until(async {
                let engine = TimekeepEngine::new(TimekeepConfig::default());
                let mut rx = engine.subscribe();
                let timer = engine.add_timer(TimeSpan::from_secs(1));
                let stopwatch = engine.add_stopwatch();

                engine.dispatch(stopwatch, Command::Start).unwrap();
                engine.dispatch(timer, Command::Start).unwrap();

                assert_eq!(
                    rx.recv().await.unwrap(),
                    ModuleEvent {
                        module: stopwatch,
                        event: TrackerEvent::Start
                    }
                );
                assert_eq!(
                    rx.recv().await.unwrap(),
                    ModuleEvent {
                        module: timer,
                        event: TrackerEvent::Start
                    }
                );
                assert_eq!(
                    engine.modules(),
                    vec![
                        (timer, ModuleKind::Timer, ModuleState::Running),
                        (stopwatch, ModuleKind::Stopwatch, ModuleState::Running),
                    ]
                );
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_drives_stopwatch_laps() {
        LocalSet::new()
            .run_until(async {
                let engine = TimekeepEngine::new(TimekeepConfig::default());
                let id = engine.add_stopwatch();

                assert!(matches!(
                    engine.dispatch(id, Command::Lap),
                    Err(TimekeepError::InvalidState { .. })
                ));

                assert_eq!(
                    engine.dispatch(id, Command::Start).unwrap(),
                    CommandOutcome::Applied(ModuleState::Running)
                );
                sleep(Duration::from_millis(500)).await;
                let outcome = engine.dispatch(id, Command::Lap).unwrap();
                assert!(matches!(outcome, CommandOutcome::LapRecorded(ref lap) if lap.lap_number == 1));
                assert_eq!(engine.snapshot(id).unwrap().laps.len(), 1);

                assert_eq!(
                    engine.dispatch(id, Command::Pause).unwrap(),
                    CommandOutcome::Applied(ModuleState::Paused)
                );
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn removing_a_running_module_cancels_its_ticks() {
        LocalSet::new()
            .run_until(async {
                let engine = TimekeepEngine::new(TimekeepConfig::default());
                let id = engine.add_stopwatch();
                let handle = match engine.get(id) {
                    Some(Module::Stopwatch(stopwatch)) => stopwatch,
                    other => panic!("expected a stopwatch, got {other:?}"),
                };
                engine.dispatch(id, Command::Start).unwrap();
                sleep(Duration::from_millis(100)).await;

                assert!(engine.remove(id));
                assert!(!handle.has_pending_tick());
                assert_eq!(handle.state(), ModuleState::Idle);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn records_sessions_when_enabled() {
        LocalSet::new()
            .run_until(async {
                let config = TimekeepConfig {
                    record_sessions: true,
                    ..Default::default()
                };
                let engine = TimekeepEngine::new(config);
                let timer = engine.add_timer(TimeSpan::from_millis(200));
                let stopwatch = engine.add_stopwatch();

                engine.dispatch(timer, Command::Start).unwrap();
                engine.dispatch(stopwatch, Command::Start).unwrap();
                sleep(Duration::from_millis(500)).await;
                engine.dispatch(stopwatch, Command::Stop).unwrap();

                let sessions = engine.sessions();
                assert_eq!(sessions.len(), 2);
                assert!(sessions.iter().any(|s| s.kind() == ModuleKind::Timer));
                assert!(sessions.iter().any(|s| s.kind() == ModuleKind::Stopwatch));

                let quiet = TimekeepEngine::new(TimekeepConfig::default());
                let id = quiet.add_stopwatch();
                quiet.dispatch(id, Command::Start).unwrap();
                quiet.dispatch(id, Command::Stop).unwrap();
                assert!(quiet.sessions().is_empty());
            })
            .await;
    }
}
