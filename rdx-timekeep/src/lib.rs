//! # Timekeep
//!
//! The time-tracking core of a desk widget: a countdown timer, a stopwatch with
//! laps, and a wall clock.
//!
//! ## Core Concepts
//!
//! - **Lifecycle**: every tracker moves through `idle → running → paused →
//!   finished`. Transitions that do not apply are silent no-ops.
//! - **Ticks**: while running, a tracker samples its time on a fixed period and
//!   publishes `tick` with the new value. Leaving `running` cancels the pending
//!   tick before the call returns.
//! - **Event-Driven**: trackers only know an [`events::EventSink`]. Presentation
//!   code subscribes to events instead of polling.
//! - **Injected time**: trackers read time through a [`time::Clock`], so tests
//!   run on tokio's paused clock.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::rc::Rc;
//! use std::time::Duration;
//! use timekeep::prelude::*;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     tokio::task::LocalSet::new()
//!         .run_until(async {
//!             let bus = Rc::new(EventBus::new());
//!             bus.on(EventKind::TimeUp, |_| println!("Time is up!"));
//!
//!             let timer = Timer::with_options(
//!                 TimeSpan::from_secs(3),
//!                 TrackerOptions::default().with_sink(bus.clone()),
//!             );
//!             timer.start();
//!             tokio::time::sleep(Duration::from_secs(4)).await;
//!             assert_eq!(timer.state(), ModuleState::Finished);
//!         })
//!         .await;
//! }
//! ```

pub const ENGINE_NAME: &str = "Timekeep";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod common;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod repository;
pub mod span;
pub mod stopwatch;
pub mod time;
pub mod timer;

/// A prelude module for easy importing of the most common Timekeep types.
pub mod prelude {
    pub use crate::common::{LapId, ModuleId, SessionId, SubscriptionId};
    pub use crate::config::{TickResolution, TimekeepConfig, TimerPreset};
    pub use crate::engine::{Command, CommandOutcome, Module, ModuleEvent, ModuleSnapshot, TimekeepEngine};
    pub use crate::error::TimekeepError;
    pub use crate::events::{BroadcastSink, EventBus, EventKind, EventLog, EventSink, TrackerEvent};
    pub use crate::lifecycle::{ModuleKind, ModuleState, TimeModule, TrackerOptions};
    pub use crate::repository::{InMemoryRepository, Session, SessionRepository};
    pub use crate::span::TimeSpan;
    pub use crate::stopwatch::{Lap, LapStats, Stopwatch};
    pub use crate::time::{Clock, ManualClock, SystemClock};
    pub use crate::timer::Timer;
}
