//! Isolate errors.

use crate::config::OptionsError;
use isogate_engine::EngineError;
use isogate_platform::WorkerError;
use std::io;
use thiserror::Error;

/// How a failure should be treated by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The isolate is unusable (out of memory)
    Fatal,
    /// The host aborted a wait
    Interrupt,
    /// Recoverable failure
    General,
}

/// Isolate errors
#[derive(Debug, Error)]
pub enum IsolateError {
    #[error("Isolate '{name}' has exceeded its memory limit")]
    OutOfMemory { name: String, execution_started: bool },

    #[error("Script execution in isolate '{name}' interrupted by host while awaiting debugger connection")]
    Interrupted { name: String },

    #[error("Isolate '{name}' has exceeded its stack usage limit")]
    StackOverflow { name: String },

    #[error("Debugging requires a debug agent factory")]
    DebuggerUnavailable,

    #[error("Debug agent failed to start: {0}")]
    DebugAgent(#[from] io::Error),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Invalid isolate options: {0}")]
    Options(#[from] OptionsError),

    #[error("Worker pool unavailable: {0}")]
    Worker(#[from] WorkerError),

    #[error("Failed to serialize CPU profile: {0}")]
    Profile(#[from] serde_json::Error),
}

impl IsolateError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            IsolateError::OutOfMemory { .. } => ErrorKind::Fatal,
            IsolateError::Interrupted { .. } => ErrorKind::Interrupt,
            _ => ErrorKind::General,
        }
    }

    /// Whether engine execution had started when the error was raised.
    pub fn execution_started(&self) -> bool {
        matches!(
            self,
            IsolateError::OutOfMemory {
                execution_started: true,
                ..
            }
        )
    }
}
