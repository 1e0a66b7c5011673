//! # Photoreactor DAQ Core Library
//!
//! Acquisition controller for a photoreactor chamber: analog flow meter channels
//! sampled on a fixed clock, optionally together with a scanning residual gas
//! analyzer, with each run streamed to a date-partitioned CSV session file.
//!
//! ## Crate Structure
//!
//! - **`acquisition`**: the run state machine ([`acquisition::Orchestrator`]), the
//!   sampler and the worker task that owns the instruments.
//! - **`config`**: settings loaded with figment from TOML and `PRC_DAQ_` environment
//!   variables. See [`config::Settings`].
//! - **`data`**: the in-memory series buffer and the session store.
//! - **`error`**: the [`error::DaqError`] taxonomy.
//! - **`hardware`**: capability traits, the analyzer power state machine and
//!   simulated devices.
//! - **`tracing_setup`**: tracing-subscriber initialisation.

pub mod acquisition;
pub mod config;
pub mod data;
pub mod error;
pub mod hardware;
pub mod tracing_setup;
