//! Defines all configuration structures for Timekeep.
//!
//! These structs are deserialized with `serde` and loaded through the `config`
//! crate, layering built-in defaults, an optional TOML file and `TIMEKEEP_*`
//! environment variables.

use crate::error::Result;
use crate::lifecycle::DEFAULT_TICK_INTERVAL;
use crate::span::TimeSpan;
use chrono_tz::Tz;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// The top-level configuration for the `TimekeepEngine`.
#[derive(Debug, Clone, Deserialize)]
pub struct TimekeepConfig {
    /// How often running trackers sample their time.
    #[serde(default)]
    pub resolution: TickResolution,

    /// The timezone the clock face reads in. Uses IANA names
    /// (e.g. "America/New_York").
    #[serde(default = "default_timezone")]
    pub timezone: Tz,

    /// Named durations consumers can create timers from.
    #[serde(default)]
    pub presets: Vec<TimerPreset>,

    /// When set, the engine keeps an in-memory record of finished sessions.
    #[serde(default)]
    pub record_sessions: bool,
}

/// Defines the sampling period of running trackers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TickResolution {
    /// 10 ms. Smooth enough for a centisecond display.
    #[default]
    Fine,
    /// 100 ms.
    Coarse,
    /// 1 s. Enough for a seconds-only display.
    Relaxed,
    /// A user-defined period.
    Custom { interval_ms: u64 },
}

impl TickResolution {
    pub fn interval(&self) -> Duration {
        match self {
            TickResolution::Fine => DEFAULT_TICK_INTERVAL,
            TickResolution::Coarse => Duration::from_millis(100),
            TickResolution::Relaxed => Duration::from_secs(1),
            // A zero period would make tokio's interval panic.
            TickResolution::Custom { interval_ms } => Duration::from_millis((*interval_ms).max(1)),
        }
    }
}

/// A named timer duration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TimerPreset {
    pub name: String,
    pub duration: PresetDuration,
}

/// Duration fields as written in configuration; every field defaults to zero
/// and overflowing values are normalized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PresetDuration {
    pub hours: u64,
    pub minutes: u64,
    pub seconds: u64,
    pub milliseconds: u64,
}

impl From<PresetDuration> for TimeSpan {
    fn from(d: PresetDuration) -> Self {
        TimeSpan::new(d.hours, d.minutes, d.seconds, d.milliseconds)
    }
}

impl TimekeepConfig {
    /// Loads configuration from an optional TOML file, then from
    /// `TIMEKEEP_*` environment variables (e.g. `TIMEKEEP_RECORD_SESSIONS=true`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }
        let config = builder
            .add_source(Environment::with_prefix("TIMEKEEP").try_parsing(true))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Parses configuration from a TOML string, without consulting the
    /// environment.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    pub fn preset(&self, name: &str) -> Option<&TimerPreset> {
        self.presets.iter().find(|preset| preset.name == name)
    }
}

impl Default for TimekeepConfig {
    fn default() -> Self {
        Self {
            resolution: TickResolution::default(),
            timezone: default_timezone(),
            presets: Vec::new(),
            record_sessions: false,
        }
    }
}

// --- Default value functions for serde ---

fn default_timezone() -> Tz {
    Tz::UTC
}
