//! Error types for the render core.

use thiserror::Error;

/// Main error type for render core operations.
///
/// Device and dispatch failures are fatal for the session: the accelerator
/// is unusable and the caller is expected to abort with the message.
#[derive(Error, Debug)]
pub enum Error {
    /// No compatible compute device could be selected
    #[error("No compatible compute device: {0}")]
    NoDevice(String),

    /// Kernel or pipeline construction failed
    #[error("Compute pipeline build failed: {0}")]
    Pipeline(String),

    /// A compute or intersection dispatch failed
    #[error("Dispatch of {kernel} failed: {reason}")]
    Dispatch { kernel: &'static str, reason: String },

    /// A shading pass produced more continuations than it was fed
    #[error("Counter invariant violated: {produced} extension rays from {fed} paths")]
    CounterInvariant { produced: u32, fed: u32 },

    /// A kernel appended past the end of the shadow-ray queue
    #[error("Shadow ray queue overflow: {requested} rays requested, capacity {capacity}")]
    ShadowQueueOverflow { requested: usize, capacity: usize },

    /// Setting name is not one of the known controls
    #[error("Unknown setting: {0}")]
    UnknownSetting(String),

    /// Configuration file could not be parsed
    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The async render worker went away mid-frame
    #[error("Render worker disconnected")]
    WorkerDisconnected,

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an "other" error from a string.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Create a dispatch failure for the named kernel.
    pub fn dispatch(kernel: &'static str, reason: impl Into<String>) -> Self {
        Self::Dispatch { kernel, reason: reason.into() }
    }
}

/// Result type alias for render core operations.
pub type Result<T> = std::result::Result<T, Error>;
