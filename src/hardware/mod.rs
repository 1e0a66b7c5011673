//! Instrument layer.
//!
//! Capability traits for the two instrument kinds the controller talks to, the
//! power state machine that wraps a scanning analyzer, and simulated devices for
//! running without hardware.

pub mod analyzer;
pub mod capabilities;
pub mod mock;

pub use analyzer::{InstrumentPowerState, PowerStep, ScanningController};
pub use capabilities::{AnalyzerReadback, ChannelReader, IonizerParameters, MassAnalyzer};
