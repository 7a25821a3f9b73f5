//! Optional persistence of finished sessions.
//!
//! Trackers work without a repository. When one is attached they hand it each
//! closed session; a failing repository is logged and otherwise ignored.

use crate::common::SessionId;
use crate::lifecycle::ModuleKind;
use crate::span::TimeSpan;
use crate::stopwatch::Lap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;

/// Anything a repository can store.
pub trait Entity: Clone {
    fn id(&self) -> SessionId;
}

/// Save/find/delete by identifier.
pub trait SessionRepository<T> {
    fn save(&self, entity: &T) -> anyhow::Result<()>;

    fn find_by_id(&self, id: SessionId) -> anyhow::Result<Option<T>>;

    /// Returns `true` if an entity was removed.
    fn delete(&self, id: SessionId) -> anyhow::Result<bool>;
}

/// One countdown run, from the first `start` after construction or reset until
/// the timer stops, runs out or is reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerSession {
    pub id: SessionId,
    pub duration: TimeSpan,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Total milliseconds spent paused.
    pub paused_ms: u64,
    /// True only when the countdown reached zero.
    pub completed: bool,
}

impl TimerSession {
    pub(crate) fn open(duration: TimeSpan, started_at: DateTime<Utc>) -> Self {
        Self {
            id: SessionId::new(),
            duration,
            started_at,
            finished_at: None,
            paused_ms: 0,
            completed: false,
        }
    }
}

impl Entity for TimerSession {
    fn id(&self) -> SessionId {
        self.id
    }
}

/// One stopwatch run, from the first `start` until `stop` or `reset`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopwatchSession {
    pub id: SessionId,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total_time: TimeSpan,
    pub laps: Vec<Lap>,
    /// True when closed by `stop`, false when abandoned by `reset`.
    pub completed: bool,
}

impl StopwatchSession {
    pub(crate) fn open(started_at: DateTime<Utc>) -> Self {
        Self {
            id: SessionId::new(),
            started_at,
            finished_at: None,
            total_time: TimeSpan::ZERO,
            laps: Vec::new(),
            completed: false,
        }
    }
}

impl Entity for StopwatchSession {
    fn id(&self) -> SessionId {
        self.id
    }
}

/// A session of either kind, as the engine records them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Session {
    Timer(TimerSession),
    Stopwatch(StopwatchSession),
}

impl Session {
    pub fn kind(&self) -> ModuleKind {
        match self {
            Session::Timer(_) => ModuleKind::Timer,
            Session::Stopwatch(_) => ModuleKind::Stopwatch,
        }
    }
}

/// A process-local repository backed by a `HashMap`.
#[derive(Debug)]
pub struct InMemoryRepository<T> {
    records: RefCell<HashMap<SessionId, T>>,
}

impl<T: Entity> InMemoryRepository<T> {
    pub fn new() -> Self {
        Self {
            records: RefCell::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.borrow().is_empty()
    }

    pub fn all(&self) -> Vec<T> {
        self.records.borrow().values().cloned().collect()
    }
}

impl<T: Entity> Default for InMemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> SessionRepository<T> for InMemoryRepository<T> {
    fn save(&self, entity: &T) -> anyhow::Result<()> {
        self.records.borrow_mut().insert(entity.id(), entity.clone());
        Ok(())
    }

    fn find_by_id(&self, id: SessionId) -> anyhow::Result<Option<T>> {
        Ok(self.records.borrow().get(&id).cloned())
    }

    fn delete(&self, id: SessionId) -> anyhow::Result<bool> {
        Ok(self.records.borrow_mut().remove(&id).is_some())
    }
}
