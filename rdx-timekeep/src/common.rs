//! Contains common, primitive types shared across the crate.
//!
//! This module defines the identifier types used to address modules, event
//! subscriptions and recorded entities. Using distinct types keeps a lap id from
//! ever being mistaken for a session id.

use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use std::fmt;
use uuid::Uuid;

new_key_type! {
    /// Uniquely and safely identifies a module (timer or stopwatch) registered
    /// with the `TimekeepEngine`.
    ///
    /// Keys are never reused after removal, so a stale id cannot address a
    /// newer module.
    pub struct ModuleId;

    /// Identifies a subscription on an `EventBus`.
    pub struct SubscriptionId;
}

/// Globally unique identifier of a recorded lap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LapId(pub Uuid);

impl LapId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LapId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Globally unique identifier of a timer or stopwatch session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
