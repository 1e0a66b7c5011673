//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the acquisition
//! controller. Using the `thiserror` crate, it provides a centralized and consistent
//! way to describe everything that can go wrong between the instruments and the
//! session file.
//!
//! ## Error Hierarchy
//!
//! `DaqError` separates failures by how far they are allowed to propagate:
//!
//! - **Partial-data errors** (`ChannelRead`, `Scan`): one channel or one scan target
//!   failed. The sample is still produced with a missing or zero value in that slot.
//! - **Request errors** (`InstrumentState`): an operation was issued in a power state
//!   that does not allow it. The request is rejected and nothing changes.
//! - **Structural errors** (`PowerSequence`, `Persistence`, `Io`, `Csv`, `Metadata`):
//!   the instrument or the session file is in trouble. The orchestrator reacts with a
//!   forced transition to a safe state.
//! - **Startup errors** (`Config`, `Configuration`): the settings file could not be
//!   loaded or holds values that fail validation.
//!
//! By using `#[from]`, `DaqError` can be seamlessly created from underlying error types,
//! simplifying error handling throughout the application with the `?` operator.

use crate::hardware::PowerStep;
use crate::hardware::InstrumentPowerState;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Primary error type for the acquisition controller.
#[derive(Error, Debug)]
pub enum DaqError {
    /// The settings file could not be parsed or merged with the environment.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Settings parsed but hold values that are logically invalid.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Standard I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// One channel could not be read. Never fatal to the sample.
    #[error("Read of channel '{channel}' failed: {message}")]
    ChannelRead {
        /// Channel identifier that failed.
        channel: String,
        /// Driver message.
        message: String,
    },

    /// One scan target could not be measured. The column is filled with zero.
    #[error("Scan of mass {target} failed: {message}")]
    Scan {
        /// Target value (mass-to-charge ratio) that failed.
        target: f64,
        /// Driver message.
        message: String,
    },

    /// The scanning instrument is in the wrong power state for the operation.
    #[error("Cannot {operation}: scanning instrument is {state}")]
    InstrumentState {
        /// Operation that was rejected.
        operation: &'static str,
        /// Power state at the time of the request.
        state: InstrumentPowerState,
    },

    /// A warm-up or teardown step failed. The instrument has been forced to `Off`.
    #[error("Power sequence failed at step '{step}': {message}")]
    PowerSequence {
        /// Step that failed.
        step: PowerStep,
        /// Driver message.
        message: String,
    },

    /// Session file or directory failure. Fatal to the current session.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// CSV encoding or flushing failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The metadata sidecar could not be serialized.
    #[error("Metadata error: {0}")]
    Metadata(#[from] serde_yaml::Error),

    /// The acquisition worker is gone (task panicked or was shut down).
    #[error("Acquisition worker is not running")]
    WorkerUnavailable,
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        DaqError::Config(Box::new(value))
    }
}

impl DaqError {
    /// Whether this error ends the currently open session.
    ///
    /// Session file failures are fatal; everything that concerns a single reading
    /// is absorbed into the sample instead.
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self,
            DaqError::Persistence(_) | DaqError::Io(_) | DaqError::Csv(_) | DaqError::Metadata(_)
        )
    }
}
