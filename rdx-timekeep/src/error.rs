//! The crate's error type.

use crate::common::ModuleId;
use crate::lifecycle::{ModuleKind, ModuleState};

/// Everything that can go wrong when driving trackers through the public API.
///
/// Tracker transitions themselves are infallible; the only tracker-level error
/// is recording a lap on a stopwatch that is not running.
#[derive(Debug, thiserror::Error)]
pub enum TimekeepError {
    #[error("cannot {operation} while the {kind} is {state}")]
    InvalidState {
        operation: &'static str,
        kind: ModuleKind,
        state: ModuleState,
    },

    #[error("no module registered under {0:?}")]
    UnknownModule(ModuleId),

    #[error("the {kind} module does not support '{command}'")]
    UnsupportedCommand {
        kind: ModuleKind,
        command: &'static str,
    },

    #[error("no timer preset named '{0}'")]
    UnknownPreset(String),

    #[error("unknown command '{0}'")]
    ParseCommand(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

pub type Result<T, E = TimekeepError> = std::result::Result<T, E>;
