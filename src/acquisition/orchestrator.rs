//! Acquisition orchestrator.
//!
//! The orchestrator is the single owner of the run state, the open [`Session`] and
//! the [`SeriesBuffer`]. It is driven by a fixed-rate clock: on every tick it reads
//! one [`ControlInput`] snapshot and advances this state machine:
//!
//! ```text
//!                 channel enabled
//!   ┌──────┐ ───────────────────▶ ┌───────┐
//!   │ Idle │                      │ Armed │ ◀─────────────────────────┐
//!   └──────┘ ◀─────────────────── └───┬───┘                           │
//!                no channel           │ run (analyzer Ready or absent)│ run off,
//!                                     ▼                               │ persistence
//!                       ┌─────────────────────────────┐               │ failure
//!                       │ Running / RunningAndSaving  │ ──────────────┘
//!                       └─────────────────────────────┘
//! ```
//!
//! # Tick order
//!
//! 1. Collect the outcome of the job handed to the worker on an earlier tick.
//! 2. Evaluate the analyzer power request.
//! 3. Evaluate the run request, then hand a new acquisition to the worker if the
//!    slot is free.
//!
//! At most one job (acquisition or power sequence) is outstanding at any time. A
//! tick that finds the slot occupied does nothing for sampling. Samples that arrive
//! after their run has stopped are discarded.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::Local;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::acquisition::sample::{ChannelConfig, Sample, ScanTarget};
use crate::acquisition::sampler::Sampler;
use crate::acquisition::worker::{AcquireRequest, PowerRequest, WorkerHandle, WorkerJob};
use crate::data::series::{SeriesBuffer, SeriesSnapshot};
use crate::data::storage::{ColumnLayout, Session, SessionStore};
use crate::error::{AppResult, DaqError};
use crate::hardware::InstrumentPowerState;

/// Run state of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// No channel enabled, a run cannot start
    Idle,
    /// At least one channel enabled, not running
    Armed,
    /// Sampling into the series buffer only
    Running,
    /// Sampling into the series buffer and a session file
    RunningAndSaving,
}

impl OrchestratorState {
    /// Whether a run is in progress.
    pub fn is_running(self) -> bool {
        matches!(
            self,
            OrchestratorState::Running | OrchestratorState::RunningAndSaving
        )
    }
}

/// Operator configuration, polled once per tick.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlInput {
    /// Channel set with enable flags and labels
    pub channels: Vec<ChannelConfig>,
    /// Ordered scan targets
    pub scan_targets: Vec<ScanTarget>,
    /// Analyzer power request
    pub analyzer_on: bool,
    /// Run request
    pub run: bool,
    /// Persist the next run
    pub save: bool,
    /// Root directory for session files
    pub data_root: PathBuf,
}

impl Default for ControlInput {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            scan_targets: Vec::new(),
            analyzer_on: false,
            run: false,
            save: false,
            data_root: PathBuf::from("data"),
        }
    }
}

impl ControlInput {
    /// Whether any channel is enabled.
    pub fn any_channel_enabled(&self) -> bool {
        self.channels.iter().any(|c| c.enabled)
    }
}

/// Read-only view published to the rendering layer after every tick.
#[derive(Debug, Clone)]
pub struct OrchestratorStatus {
    /// Run state
    pub state: OrchestratorState,
    /// Analyzer power state, `None` without an analyzer
    pub power: Option<InstrumentPowerState>,
    /// Samples of the current (or last) run
    pub series: SeriesSnapshot,
    /// File of the open session
    pub session_path: Option<PathBuf>,
    /// Most recent reported error
    pub last_error: Option<String>,
    /// The run toggle was forced off and must be cleared before a new start
    pub run_forced_off: bool,
    /// The analyzer toggle was forced off and must be cleared before a retry
    pub analyzer_forced_off: bool,
    /// A job is outstanding on the worker
    pub busy: bool,
}

impl Default for OrchestratorStatus {
    fn default() -> Self {
        Self {
            state: OrchestratorState::Idle,
            power: None,
            series: SeriesSnapshot::default(),
            session_path: None,
            last_error: None,
            run_forced_off: false,
            analyzer_forced_off: false,
            busy: false,
        }
    }
}

enum Pending {
    Acquire {
        run_id: u64,
        reply: oneshot::Receiver<Sample>,
    },
    Power {
        request: PowerRequest,
        reply: oneshot::Receiver<AppResult<()>>,
    },
}

/// The acquisition state machine. See the module docs.
pub struct Orchestrator {
    state: OrchestratorState,
    worker: WorkerHandle,
    power: Option<watch::Receiver<InstrumentPowerState>>,
    store: SessionStore,
    pending: Option<Pending>,
    run_id: u64,
    layout: Option<ColumnLayout>,
    origin: Instant,
    session: Option<Session>,
    series: SeriesBuffer,
    last_error: Option<String>,
    run_forced_off: bool,
    analyzer_forced_off: bool,
    power_off_deferred: bool,
}

impl Orchestrator {
    /// Spawn the acquisition worker for `sampler`. Must be called inside a Tokio
    /// runtime.
    pub fn new(sampler: Sampler, store: SessionStore) -> Self {
        let power = sampler.power_state();
        let worker = WorkerHandle::spawn(sampler);

        Self {
            state: OrchestratorState::Idle,
            worker,
            power,
            store,
            pending: None,
            run_id: 0,
            layout: None,
            origin: Instant::now(),
            session: None,
            series: SeriesBuffer::new(),
            last_error: None,
            run_forced_off: false,
            analyzer_forced_off: false,
            power_off_deferred: false,
        }
    }

    /// Current run state.
    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// Analyzer power state, `None` without an analyzer.
    pub fn power_state(&self) -> Option<InstrumentPowerState> {
        self.power.as_ref().map(|rx| *rx.borrow())
    }

    /// Snapshot for the rendering layer.
    pub fn status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            state: self.state,
            power: self.power_state(),
            series: self.series.snapshot(),
            session_path: self.session.as_ref().map(|s| s.path().to_path_buf()),
            last_error: self.last_error.clone(),
            run_forced_off: self.run_forced_off,
            analyzer_forced_off: self.analyzer_forced_off,
            busy: self.pending.is_some(),
        }
    }

    /// Advance the state machine by one clock tick. Never blocks.
    pub fn tick(&mut self, input: &ControlInput) {
        self.poll_pending();

        if !input.run {
            self.run_forced_off = false;
        }
        if !input.analyzer_on {
            self.analyzer_forced_off = false;
        }

        self.evaluate_analyzer(input);
        self.evaluate_run(input);
    }

    /// Wait for the outstanding job, if any, and process its outcome.
    pub async fn settle(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };

        match pending {
            Pending::Acquire { run_id, reply } => match reply.await {
                Ok(sample) => self.complete_acquire(run_id, sample),
                Err(_) => self.worker_lost(),
            },
            Pending::Power { request, reply } => match reply.await {
                Ok(outcome) => self.complete_power(request, outcome),
                Err(_) => self.worker_lost(),
            },
        }
    }

    /// Drive the orchestrator from `control` until its sender is dropped, publishing
    /// a status snapshot after every tick. Shuts down cleanly on exit.
    pub async fn run(
        mut self,
        mut control: watch::Receiver<ControlInput>,
        status: watch::Sender<OrchestratorStatus>,
        period: Duration,
    ) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(period_ms = period.as_millis() as u64, "Acquisition clock started");

        loop {
            ticker.tick().await;
            if control.has_changed().is_err() {
                debug!("Control input closed");
                break;
            }
            let input = control.borrow_and_update().clone();
            self.tick(&input);
            status.send_replace(self.status());
        }

        let last = self.shutdown().await;
        status.send_replace(last);
    }

    /// Stop any run, power the analyzer down and stop the worker.
    ///
    /// The outstanding job is awaited first, so a sample already being taken still
    /// reaches the session. Returns the final status.
    pub async fn shutdown(mut self) -> OrchestratorStatus {
        info!("Shutting down acquisition");

        self.settle().await;
        if self.state.is_running() {
            self.stop_run();
        }
        if self.power_state() == Some(InstrumentPowerState::Ready) {
            self.dispatch_power(PowerRequest::Off);
            self.settle().await;
        }

        let status = self.status();
        self.worker.shutdown().await;
        status
    }

    fn poll_pending(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };

        match pending {
            Pending::Acquire { run_id, mut reply } => match reply.try_recv() {
                Ok(sample) => self.complete_acquire(run_id, sample),
                Err(TryRecvError::Empty) => {
                    self.pending = Some(Pending::Acquire { run_id, reply });
                }
                Err(TryRecvError::Closed) => self.worker_lost(),
            },
            Pending::Power { request, mut reply } => match reply.try_recv() {
                Ok(outcome) => self.complete_power(request, outcome),
                Err(TryRecvError::Empty) => {
                    self.pending = Some(Pending::Power { request, reply });
                }
                Err(TryRecvError::Closed) => self.worker_lost(),
            },
        }
    }

    fn evaluate_analyzer(&mut self, input: &ControlInput) {
        let Some(state) = self.power_state() else {
            if input.analyzer_on && !self.analyzer_forced_off {
                self.analyzer_forced_off = true;
                self.report(DaqError::Configuration(
                    "no scanning instrument attached".into(),
                ));
            }
            return;
        };

        if input.analyzer_on {
            self.power_off_deferred = false;
        }
        if self.pending.is_some() {
            return;
        }

        match (input.analyzer_on && !self.analyzer_forced_off, state) {
            (true, InstrumentPowerState::Off) => {
                info!("Powering scanning instrument on");
                self.dispatch_power(PowerRequest::On);
            }
            (false, InstrumentPowerState::Ready) if self.state.is_running() => {
                if !self.power_off_deferred {
                    info!("Power-off requested during a run, deferring until the run stops");
                    self.power_off_deferred = true;
                }
            }
            (false, InstrumentPowerState::Ready) => {
                info!("Powering scanning instrument off");
                self.power_off_deferred = false;
                self.dispatch_power(PowerRequest::Off);
            }
            _ => {}
        }
    }

    fn evaluate_run(&mut self, input: &ControlInput) {
        match self.state {
            OrchestratorState::Idle | OrchestratorState::Armed => {
                self.state = if input.any_channel_enabled() {
                    OrchestratorState::Armed
                } else {
                    OrchestratorState::Idle
                };
                if self.state == OrchestratorState::Armed && input.run && !self.run_forced_off {
                    self.start_run(input);
                }
            }
            OrchestratorState::Running | OrchestratorState::RunningAndSaving => {
                if !input.run {
                    self.stop_run();
                } else if self.pending.is_none() {
                    self.dispatch_acquire(input);
                }
            }
        }
    }

    /// Power state as seen by the run gate: a dispatched sequence counts as already
    /// under way even before the worker publishes it.
    fn effective_power_state(&self) -> Option<InstrumentPowerState> {
        match &self.pending {
            Some(Pending::Power {
                request: PowerRequest::On,
                ..
            }) => Some(InstrumentPowerState::WarmingUp),
            Some(Pending::Power {
                request: PowerRequest::Off,
                ..
            }) => Some(InstrumentPowerState::CoolingDown),
            _ => self.power_state(),
        }
    }

    fn start_run(&mut self, input: &ControlInput) {
        if let Some(state) = self.effective_power_state() {
            if state != InstrumentPowerState::Ready {
                self.reject_run(DaqError::InstrumentState {
                    operation: "start run",
                    state,
                });
                return;
            }
        }

        let layout = ColumnLayout::new(&input.channels, &input.scan_targets);
        if input.save {
            match self.store.open(&input.data_root, Local::now(), &layout) {
                Ok(session) => self.session = Some(session),
                Err(err) => {
                    self.reject_run(err);
                    return;
                }
            }
        }

        self.series.reset();
        self.origin = Instant::now();
        self.run_id += 1;
        self.layout = Some(layout);
        self.last_error = None;
        self.state = if input.save {
            OrchestratorState::RunningAndSaving
        } else {
            OrchestratorState::Running
        };
        info!(run = self.run_id, saving = input.save, "Run started");

        if self.pending.is_none() {
            self.dispatch_acquire(input);
        }
    }

    fn stop_run(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(err) = session.close() {
                self.report(err);
            }
        }
        self.layout = None;
        self.state = OrchestratorState::Armed;
        info!(run = self.run_id, samples = self.series.len(), "Run stopped");
    }

    fn reject_run(&mut self, err: DaqError) {
        warn!(error = %err, "Run start rejected");
        self.run_forced_off = true;
        self.report(err);
    }

    fn dispatch_acquire(&mut self, input: &ControlInput) {
        let Some(layout) = &self.layout else {
            return;
        };
        let request = AcquireRequest {
            origin: self.origin,
            channels: input.channels.clone(),
            targets: layout.targets().to_vec(),
        };

        let (job, reply) = WorkerJob::acquire(request);
        match self.worker.submit(job) {
            Ok(()) => {
                debug!(run = self.run_id, "Acquisition dispatched");
                self.pending = Some(Pending::Acquire {
                    run_id: self.run_id,
                    reply,
                });
            }
            Err(err) => {
                error!(error = %err, "Cannot dispatch acquisition, stopping run");
                self.report(err);
                self.run_forced_off = true;
                self.stop_run();
            }
        }
    }

    fn dispatch_power(&mut self, request: PowerRequest) {
        let (job, reply) = WorkerJob::power(request);
        match self.worker.submit(job) {
            Ok(()) => self.pending = Some(Pending::Power { request, reply }),
            Err(err) => self.report(err),
        }
    }

    fn complete_acquire(&mut self, run_id: u64, sample: Sample) {
        if !self.state.is_running() || run_id != self.run_id {
            debug!(
                sample_run = run_id,
                current_run = self.run_id,
                "Discarding sample from a stopped run"
            );
            return;
        }

        info!("{}", self.summary_line(&sample));
        if let Some(fault) = sample.faults.last() {
            self.last_error = Some(fault.to_string());
        }

        if self.state == OrchestratorState::RunningAndSaving {
            if let Err(err) = self.persist(&sample) {
                if err.is_fatal_to_session() {
                    self.fail_session(err);
                } else {
                    warn!(error = %err, "Row not persisted");
                    self.report(err);
                }
            }
        }
        self.series.append(sample);
    }

    fn persist(&mut self, sample: &Sample) -> AppResult<()> {
        let (Some(session), Some(layout)) = (self.session.as_mut(), self.layout.as_ref()) else {
            return Err(DaqError::Persistence("no open session".into()));
        };
        if !session.header_written() {
            session.write_header(&layout.header())?;
        }
        session.append_row(&layout.row(sample))
    }

    fn fail_session(&mut self, err: DaqError) {
        error!(error = %err, "Session failed, run forced off");
        // No final flush: the file is already in trouble.
        if let Some(session) = self.session.take() {
            session.abandon();
        }
        self.layout = None;
        self.state = OrchestratorState::Armed;
        self.run_forced_off = true;
        self.report(err);
    }

    fn complete_power(&mut self, request: PowerRequest, outcome: AppResult<()>) {
        match outcome {
            Ok(()) => info!(
                state = ?self.power_state(),
                "Scanning instrument power {}",
                match request {
                    PowerRequest::On => "up complete",
                    PowerRequest::Off => "down complete",
                }
            ),
            Err(err) => {
                error!(error = %err, ?request, "Scanning instrument power sequence failed");
                if request == PowerRequest::On {
                    self.analyzer_forced_off = true;
                }
                self.report(err);
            }
        }
    }

    fn worker_lost(&mut self) {
        error!("Acquisition worker dropped its reply");
        self.report(DaqError::WorkerUnavailable);
        if self.state.is_running() {
            self.run_forced_off = true;
            self.stop_run();
        }
    }

    fn report(&mut self, err: DaqError) {
        self.last_error = Some(err.to_string());
    }

    fn summary_line(&self, sample: &Sample) -> String {
        let mut line = format!("Time (s): {:.2}", sample.timestamp);

        for reading in &sample.channel_values {
            let label = self
                .layout
                .iter()
                .flat_map(|layout| layout.channels())
                .find(|c| c.id == reading.channel)
                .map_or(reading.channel.as_str(), |c| c.label.as_str());
            match reading.value {
                Some(value) => line.push_str(&format!(", {label}: {value:.4}")),
                None => line.push_str(&format!(", {label}: n/a")),
            }
        }

        if let Some(layout) = &self.layout {
            let unit = self.store.scan_unit();
            for (target, value) in layout.targets().iter().zip(&sample.scan_values) {
                line.push_str(&format!(", {}: {value:.3e} {unit}", target.label()));
            }
        }

        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{MockFlowMeter, MockMassAnalyzer};
    use crate::hardware::{IonizerParameters, PowerStep, ScanningController};
    use std::sync::Arc;
    use tempfile::tempdir;
    use tracing_test::traced_test;

    fn input(run: bool) -> ControlInput {
        ControlInput {
            channels: vec![ChannelConfig::new("ai0", "Ar")],
            run,
            ..ControlInput::default()
        }
    }

    fn meter_only() -> Orchestrator {
        let sampler = Sampler::new(Arc::new(MockFlowMeter::new()));
        Orchestrator::new(sampler, SessionStore::default())
    }

    fn with_analyzer(analyzer: MockMassAnalyzer) -> Orchestrator {
        let controller = ScanningController::new(Arc::new(analyzer), IonizerParameters::default());
        let sampler = Sampler::new(Arc::new(MockFlowMeter::new())).with_analyzer(controller);
        Orchestrator::new(sampler, SessionStore::default())
    }

    #[tokio::test]
    async fn idle_until_a_channel_is_enabled() {
        let mut orchestrator = meter_only();

        let mut none_enabled = input(true);
        none_enabled.channels = vec![ChannelConfig::new("ai0", "Ar").disabled()];
        orchestrator.tick(&none_enabled);
        assert_eq!(orchestrator.state(), OrchestratorState::Idle);

        orchestrator.tick(&input(false));
        assert_eq!(orchestrator.state(), OrchestratorState::Armed);

        orchestrator.tick(&input(true));
        assert_eq!(orchestrator.state(), OrchestratorState::Running);
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn stop_keeps_the_series() {
        let mut orchestrator = meter_only();

        orchestrator.tick(&input(true));
        orchestrator.settle().await;
        orchestrator.tick(&input(true));
        orchestrator.settle().await;
        orchestrator.tick(&input(false));

        let status = orchestrator.status();
        assert_eq!(status.state, OrchestratorState::Armed);
        assert_eq!(status.series.len(), 2);
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    #[traced_test]
    async fn run_start_without_ready_analyzer_is_rejected_and_reported() {
        let mut orchestrator = with_analyzer(MockMassAnalyzer::new());

        orchestrator.tick(&input(true));

        let status = orchestrator.status();
        assert_eq!(status.state, OrchestratorState::Armed);
        assert_eq!(status.power, Some(InstrumentPowerState::Off));
        assert!(status.run_forced_off);
        assert_eq!(
            status.last_error.as_deref(),
            Some("Cannot start run: scanning instrument is off")
        );
        assert!(logs_contain("Run start rejected"));

        // Latched until the toggle is cleared.
        orchestrator.tick(&input(true));
        assert_eq!(orchestrator.state(), OrchestratorState::Armed);
        orchestrator.tick(&input(false));
        assert!(!orchestrator.status().run_forced_off);
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn analyzer_is_powered_before_the_run_starts() {
        let mut orchestrator = with_analyzer(MockMassAnalyzer::new());
        let mut request = input(false);
        request.analyzer_on = true;
        request.scan_targets = vec![ScanTarget::new(28.0)];

        orchestrator.tick(&request);
        orchestrator.settle().await;
        assert_eq!(orchestrator.power_state(), Some(InstrumentPowerState::Ready));

        request.run = true;
        orchestrator.tick(&request);
        orchestrator.settle().await;

        let series = orchestrator.status().series;
        assert_eq!(series.len(), 1);
        assert!(series.samples()[0].scan_values[0] > 0.0);

        let status = orchestrator.shutdown().await;
        assert_eq!(status.power, Some(InstrumentPowerState::Off));
    }

    #[tokio::test]
    async fn failed_warm_up_latches_the_analyzer_toggle() {
        let mut orchestrator =
            with_analyzer(MockMassAnalyzer::new().fail_step(PowerStep::EnableDetectorBias));
        let mut request = input(false);
        request.analyzer_on = true;

        orchestrator.tick(&request);
        orchestrator.settle().await;

        let status = orchestrator.status();
        assert_eq!(status.power, Some(InstrumentPowerState::Off));
        assert!(status.analyzer_forced_off);
        assert!(status.last_error.unwrap().contains("enable detector bias"));

        // No retry while the toggle stays on.
        orchestrator.tick(&request);
        assert!(!orchestrator.status().busy);
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn power_off_waits_for_the_run_to_stop() {
        let mut orchestrator = with_analyzer(MockMassAnalyzer::new());
        let mut request = input(false);
        request.analyzer_on = true;
        orchestrator.tick(&request);
        orchestrator.settle().await;

        request.run = true;
        orchestrator.tick(&request);
        orchestrator.settle().await;

        request.analyzer_on = false;
        orchestrator.tick(&request);
        orchestrator.settle().await;
        assert_eq!(orchestrator.power_state(), Some(InstrumentPowerState::Ready));
        assert!(orchestrator.state().is_running());

        request.run = false;
        orchestrator.tick(&request);
        orchestrator.tick(&request);
        orchestrator.settle().await;
        assert_eq!(orchestrator.power_state(), Some(InstrumentPowerState::Off));
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn analyzer_request_without_analyzer_is_reported_once() {
        let mut orchestrator = meter_only();
        let mut request = input(false);
        request.analyzer_on = true;

        orchestrator.tick(&request);
        let status = orchestrator.status();
        assert!(status.analyzer_forced_off);
        assert_eq!(status.power, None);
        assert!(!status.busy);
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn session_open_failure_keeps_the_orchestrator_armed() {
        let root = tempdir().unwrap();
        let blocker = root.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        let mut orchestrator = meter_only();
        let mut request = input(true);
        request.save = true;
        request.data_root = blocker;

        orchestrator.tick(&request);
        let status = orchestrator.status();
        assert_eq!(status.state, OrchestratorState::Armed);
        assert!(status.run_forced_off);
        assert!(status.last_error.unwrap().starts_with("Persistence error"));
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    #[traced_test]
    async fn session_failure_mid_run_forces_armed_and_keeps_the_series() {
        let root = tempdir().unwrap();
        let mut orchestrator = meter_only();
        let mut request = input(true);
        request.save = true;
        request.data_root = root.path().to_path_buf();

        orchestrator.tick(&request);
        orchestrator.settle().await;
        assert_eq!(orchestrator.state(), OrchestratorState::RunningAndSaving);
        let saved = orchestrator.status().session_path.unwrap();

        // Swap in a session whose column count disagrees with the run layout.
        let wider = ColumnLayout::new(
            &request.channels,
            &[ScanTarget::new(28.0), ScanTarget::new(32.0)],
        );
        let broken = SessionStore::default()
            .open(&root.path().join("other"), Local::now(), &wider)
            .unwrap();
        let broken_path = broken.path().to_path_buf();
        orchestrator.session = Some(broken);

        orchestrator.tick(&request);
        orchestrator.settle().await;

        let status = orchestrator.status();
        assert_eq!(status.state, OrchestratorState::Armed);
        assert!(status.run_forced_off);
        assert_eq!(status.session_path, None);
        assert_eq!(status.series.len(), 2);
        assert!(status.last_error.unwrap().starts_with("Persistence error"));
        assert!(logs_contain("Session failed, run forced off"));
        assert!(!broken_path.exists());
        assert!(saved.exists());

        // Latched until the run toggle is cleared.
        orchestrator.tick(&request);
        assert_eq!(orchestrator.state(), OrchestratorState::Armed);
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn run_loop_exits_when_control_is_dropped() {
        let orchestrator = meter_only();
        let (control_tx, control_rx) = watch::channel(input(true));
        let (status_tx, mut status_rx) = watch::channel(OrchestratorStatus::default());

        let task = tokio::spawn(orchestrator.run(
            control_rx,
            status_tx,
            Duration::from_millis(10),
        ));

        status_rx
            .wait_for(|status| status.series.len() >= 2)
            .await
            .unwrap();
        drop(control_tx);
        task.await.unwrap();

        assert_eq!(status_rx.borrow().state, OrchestratorState::Armed);
    }
}
