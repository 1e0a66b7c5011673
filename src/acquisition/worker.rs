//! Dedicated acquisition worker.
//!
//! All blocking instrument work (sampling and analyzer power sequences) runs on one
//! task that owns the [`Sampler`]. The orchestrator talks to it with jobs over an
//! mpsc channel; each job carries a oneshot reply, which is the single-slot handoff
//! back to the orchestrator.
//!
//! # Message Flow
//!
//! ```text
//! Orchestrator (tick path)               Worker task
//! ------------------------               -----------
//! 1. Create job with oneshot
//! 2. try_send via mpsc        ------>
//!                                        3. Receive job
//!                                        4. Talk to instruments
//!                                        5. Send outcome
//! 6. try_recv on later ticks  <------
//! ```
//!
//! Because the worker handles one job at a time, a power sequence can never overlap
//! a scan.

use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::acquisition::sample::{ChannelConfig, Sample, ScanTarget};
use crate::acquisition::sampler::Sampler;
use crate::error::{AppResult, DaqError};

/// Analyzer power transition requested from the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerRequest {
    /// Run the warm-up sequence
    On,
    /// Run the teardown sequence
    Off,
}

/// Parameters of one acquisition cycle.
#[derive(Debug, Clone)]
pub struct AcquireRequest {
    /// Run origin for the sample timestamp
    pub origin: Instant,
    /// Channel configuration at dispatch time
    pub channels: Vec<ChannelConfig>,
    /// Scan targets frozen at run start
    pub targets: Vec<ScanTarget>,
}

/// Work item for the acquisition worker.
#[derive(Debug)]
pub enum WorkerJob {
    /// Take one sample
    Acquire {
        /// Cycle parameters
        request: AcquireRequest,
        /// Completed sample
        reply: oneshot::Sender<Sample>,
    },
    /// Change analyzer power
    Power {
        /// Direction
        request: PowerRequest,
        /// Outcome of the sequence
        reply: oneshot::Sender<AppResult<()>>,
    },
}

impl WorkerJob {
    /// Build an acquire job and the receiver for its result.
    pub fn acquire(request: AcquireRequest) -> (Self, oneshot::Receiver<Sample>) {
        let (reply, rx) = oneshot::channel();
        (WorkerJob::Acquire { request, reply }, rx)
    }

    /// Build a power job and the receiver for its result.
    pub fn power(request: PowerRequest) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (reply, rx) = oneshot::channel();
        (WorkerJob::Power { request, reply }, rx)
    }
}

/// Handle to the running worker task.
pub struct WorkerHandle {
    jobs: mpsc::Sender<WorkerJob>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Move `sampler` onto a new worker task.
    pub fn spawn(sampler: Sampler) -> Self {
        // One slot: the orchestrator never has more than one job outstanding.
        let (jobs, rx) = mpsc::channel(1);
        let task = tokio::spawn(run_worker(sampler, rx));
        Self { jobs, task }
    }

    /// Hand a job to the worker without waiting.
    pub fn submit(&self, job: WorkerJob) -> AppResult<()> {
        self.jobs.try_send(job).map_err(|err| {
            warn!(error = %err, "Acquisition worker rejected job");
            DaqError::WorkerUnavailable
        })
    }

    /// Close the job queue and wait for the worker to finish its current job.
    pub async fn shutdown(self) {
        drop(self.jobs);
        if let Err(err) = self.task.await {
            warn!(error = %err, "Acquisition worker ended abnormally");
        }
    }
}

async fn run_worker(mut sampler: Sampler, mut jobs: mpsc::Receiver<WorkerJob>) {
    debug!("Acquisition worker started");

    while let Some(job) = jobs.recv().await {
        match job {
            WorkerJob::Acquire { request, reply } => {
                let sample = sampler
                    .acquire(&request.channels, &request.targets, request.origin)
                    .await;
                if reply.send(sample).is_err() {
                    trace!("Sample receiver dropped");
                }
            }
            WorkerJob::Power { request, reply } => {
                let outcome = match (sampler.analyzer_mut(), request) {
                    (Some(analyzer), PowerRequest::On) => analyzer.power_on().await,
                    (Some(analyzer), PowerRequest::Off) => analyzer.power_off().await,
                    (None, _) => Err(DaqError::Configuration(
                        "no scanning instrument attached".into(),
                    )),
                };
                if reply.send(outcome).is_err() {
                    trace!("Power outcome receiver dropped");
                }
            }
        }
    }

    debug!("Acquisition worker stopped");
}
