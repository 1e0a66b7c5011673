//! Acquisition engine.
//!
//! - [`sample`]: channel configuration, scan targets and the composite sample
//! - [`sampler`]: one acquisition cycle across channels and scan targets
//! - [`worker`]: the task that owns the instruments and runs cycles off the clock path
//! - [`orchestrator`]: the run state machine driven by the clock

pub mod orchestrator;
pub mod sample;
pub mod sampler;
pub mod worker;

pub use orchestrator::{ControlInput, Orchestrator, OrchestratorState, OrchestratorStatus};
pub use sample::{ChannelConfig, ChannelReading, Sample, SampleFault, ScanTarget};
pub use sampler::Sampler;
