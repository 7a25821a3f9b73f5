//! Defines the events trackers publish and the sinks that receive them.
//!
//! A tracker depends only on the narrow [`EventSink`] capability. Anything that
//! can accept a `&TrackerEvent` can sit behind it: the in-process [`EventBus`],
//! a tokio broadcast channel via [`BroadcastSink`], or the recording
//! [`EventLog`] used in tests.

use crate::common::SubscriptionId;
use crate::span::TimeSpan;
use crate::stopwatch::Lap;
use slotmap::SlotMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use tokio::sync::broadcast;
use tracing::warn;

/// The name of a tracker event, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Start,
    Pause,
    Stop,
    Reset,
    Tick,
    Lap,
    TimeUp,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Start => "start",
            EventKind::Pause => "pause",
            EventKind::Stop => "stop",
            EventKind::Reset => "reset",
            EventKind::Tick => "tick",
            EventKind::Lap => "lap",
            EventKind::TimeUp => "timeUp",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A discrete lifecycle or sampling event emitted by a tracker.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    Start,
    Pause,
    Stop,
    Reset,
    /// The freshly sampled remaining (timer) or elapsed (stopwatch) time.
    Tick(TimeSpan),
    /// A lap was recorded. Stopwatch only.
    Lap(Lap),
    /// The countdown reached zero. Timer only.
    TimeUp,
}

impl TrackerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            TrackerEvent::Start => EventKind::Start,
            TrackerEvent::Pause => EventKind::Pause,
            TrackerEvent::Stop => EventKind::Stop,
            TrackerEvent::Reset => EventKind::Reset,
            TrackerEvent::Tick(_) => EventKind::Tick,
            TrackerEvent::Lap(_) => EventKind::Lap,
            TrackerEvent::TimeUp => EventKind::TimeUp,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }
}

/// The publish capability a tracker is built against.
pub trait EventSink {
    fn publish(&self, event: &TrackerEvent);
}

/// Discards every event.
impl EventSink for () {
    fn publish(&self, _event: &TrackerEvent) {}
}

type Handler = Rc<RefCell<Box<dyn FnMut(&TrackerEvent)>>>;

struct Subscription {
    filter: Option<EventKind>,
    handler: Handler,
}

/// An in-process, synchronous publish/subscribe bus.
///
/// Handlers run during `publish`, in the order they subscribed. Subscribing or
/// unsubscribing from inside a handler is allowed and takes effect from the
/// next event.
#[derive(Default)]
pub struct EventBus {
    subscriptions: RefCell<SlotMap<SubscriptionId, Subscription>>,
    order: RefCell<Vec<SubscriptionId>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to a single kind of event.
    pub fn on(&self, kind: EventKind, handler: impl FnMut(&TrackerEvent) + 'static) -> SubscriptionId {
        self.insert(Some(kind), Box::new(handler))
    }

    /// Subscribes to every event.
    pub fn subscribe(&self, handler: impl FnMut(&TrackerEvent) + 'static) -> SubscriptionId {
        self.insert(None, Box::new(handler))
    }

    /// Removes a subscription. Returns `true` if it existed.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let removed = self.subscriptions.borrow_mut().remove(id).is_some();
        if removed {
            self.order.borrow_mut().retain(|existing| *existing != id);
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.order.borrow().len()
    }

    fn insert(&self, filter: Option<EventKind>, handler: Box<dyn FnMut(&TrackerEvent)>) -> SubscriptionId {
        let id = self.subscriptions.borrow_mut().insert(Subscription {
            filter,
            handler: Rc::new(RefCell::new(handler)),
        });
        self.order.borrow_mut().push(id);
        id
    }

    fn handlers_for(&self, kind: EventKind) -> Vec<Handler> {
        let subscriptions = self.subscriptions.borrow();
        self.order
            .borrow()
            .iter()
            .filter_map(|id| subscriptions.get(*id))
            .filter(|sub| sub.filter.map_or(true, |filter| filter == kind))
            .map(|sub| sub.handler.clone())
            .collect()
    }
}

impl EventSink for EventBus {
    fn publish(&self, event: &TrackerEvent) {
        for handler in self.handlers_for(event.kind()) {
            match handler.try_borrow_mut() {
                Ok(mut handler) => (*handler)(event),
                Err(_) => warn!(
                    "Dropped re-entrant delivery of '{}' to a handler that is still running.",
                    event.name()
                ),
            }
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Forwards every event onto a tokio broadcast channel.
///
/// Sending never fails the tracker: events published while nobody is
/// subscribed are dropped.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<TrackerEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.sender.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn publish(&self, event: &TrackerEvent) {
        self.sender.send(event.clone()).ok();
    }
}

/// Records every published event in order.
#[derive(Debug, Default)]
pub struct EventLog {
    events: RefCell<Vec<TrackerEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TrackerEvent> {
        self.events.borrow().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events.borrow().iter().map(TrackerEvent::name).collect()
    }

    /// Event names with consecutive ticks collapsed into one entry.
    pub fn transitions(&self) -> Vec<&'static str> {
        let mut names = self.names();
        names.dedup_by(|a, b| *a == "tick" && *b == "tick");
        names
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events
            .borrow()
            .iter()
            .filter(|event| event.kind() == kind)
            .count()
    }

    pub fn ticks(&self) -> Vec<TimeSpan> {
        self.events
            .borrow()
            .iter()
            .filter_map(|event| match event {
                TrackerEvent::Tick(span) => Some(*span),
                _ => None,
            })
            .collect()
    }

    pub fn last(&self) -> Option<TrackerEvent> {
        self.events.borrow().last().cloned()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

impl EventSink for EventLog {
    fn publish(&self, event: &TrackerEvent) {
        self.events.borrow_mut().push(event.clone());
    }
}
