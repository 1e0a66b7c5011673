//! End-to-end acquisition scenarios
//!
//! Drive the orchestrator tick by tick against the simulated rig and inspect the
//! series buffer and the session files it produces.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use photoreactor_daq::acquisition::{
    ChannelConfig, ControlInput, Orchestrator, OrchestratorState, Sampler, ScanTarget,
};
use photoreactor_daq::data::storage::SessionStore;
use photoreactor_daq::hardware::mock::{MockFlowMeter, MockMassAnalyzer};
use photoreactor_daq::hardware::{InstrumentPowerState, IonizerParameters, ScanningController};
use tempfile::tempdir;

fn control(root: &Path, channels: Vec<ChannelConfig>) -> ControlInput {
    ControlInput {
        channels,
        run: true,
        save: true,
        data_root: root.to_path_buf(),
        ..ControlInput::default()
    }
}

fn rig(meter: MockFlowMeter) -> Orchestrator {
    Orchestrator::new(Sampler::new(Arc::new(meter)), SessionStore::default())
}

/// Tick once and wait for the acquisition it dispatched.
async fn step(orchestrator: &mut Orchestrator, input: &ControlInput) {
    orchestrator.tick(input);
    orchestrator.settle().await;
    tokio::time::sleep(Duration::from_millis(2)).await;
}

fn read_csv(path: &Path) -> (Vec<String>, Vec<Vec<String>>) {
    let mut reader = csv::Reader::from_path(path).unwrap();
    let header = reader.headers().unwrap().iter().map(String::from).collect();
    let rows = reader
        .records()
        .map(|record| record.unwrap().iter().map(String::from).collect())
        .collect();
    (header, rows)
}

fn csv_files(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    if let Ok(entries) = std::fs::read_dir(root) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                found.extend(csv_files(&path));
            } else if path.extension().is_some_and(|ext| ext == "csv") {
                found.push(path);
            }
        }
    }
    found
}

#[tokio::test]
async fn three_saved_ticks_with_one_enabled_channel() {
    let root = tempdir().unwrap();
    let mut orchestrator = rig(MockFlowMeter::new());
    let mut input = control(
        root.path(),
        vec![
            ChannelConfig::new("ai0", "A"),
            ChannelConfig::new("ai1", "B").disabled(),
        ],
    );

    for _ in 0..3 {
        step(&mut orchestrator, &input).await;
    }
    assert_eq!(orchestrator.state(), OrchestratorState::RunningAndSaving);
    let path = orchestrator.status().session_path.unwrap();

    input.run = false;
    orchestrator.tick(&input);
    assert_eq!(orchestrator.state(), OrchestratorState::Armed);

    let (header, rows) = read_csv(&path);
    assert_eq!(header, vec!["elapsed_seconds", "A"]);
    assert_eq!(rows.len(), 3);

    let times: Vec<f64> = rows.iter().map(|row| row[0].parse().unwrap()).collect();
    assert!(times.windows(2).all(|pair| pair[0] < pair[1]), "{times:?}");
    assert!(rows.iter().all(|row| !row[1].is_empty()));

    assert!(path.with_extension("yml").exists());
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn run_start_rejected_while_analyzer_not_ready() {
    let root = tempdir().unwrap();
    let data_root = root.path().join("data");
    let analyzer = Arc::new(MockMassAnalyzer::new());
    let sampler = Sampler::new(Arc::new(MockFlowMeter::new())).with_analyzer(
        ScanningController::new(analyzer.clone(), IonizerParameters::default()),
    );
    let mut orchestrator = Orchestrator::new(sampler, SessionStore::default());

    let mut input = control(&data_root, vec![ChannelConfig::new("ai0", "Ar")]);
    input.scan_targets = vec![ScanTarget::new(28.0), ScanTarget::new(32.0)];

    for _ in 0..3 {
        step(&mut orchestrator, &input).await;
    }

    let status = orchestrator.status();
    assert_eq!(status.state, OrchestratorState::Armed);
    assert_eq!(status.power, Some(InstrumentPowerState::Off));
    assert!(status.run_forced_off);
    assert!(status.series.is_empty());
    assert!(!data_root.exists());
    assert!(analyzer.journal().is_empty());
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn failed_read_leaves_an_empty_cell_and_the_run_continues() {
    let root = tempdir().unwrap();
    let mut orchestrator = rig(MockFlowMeter::new().fail_read("ai0", 2));
    let mut input = control(root.path(), vec![ChannelConfig::new("ai0", "Ar")]);

    for _ in 0..3 {
        step(&mut orchestrator, &input).await;
    }
    let status = orchestrator.status();
    let path = status.session_path.clone().unwrap();
    assert!(status.last_error.unwrap().contains("ai0"));

    input.run = false;
    orchestrator.tick(&input);

    let (_, rows) = read_csv(&path);
    assert_eq!(rows.len(), 3);
    assert!(!rows[0][1].is_empty());
    assert!(rows[1][1].is_empty());
    assert!(!rows[2][1].is_empty());
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn late_sample_after_stop_is_discarded() {
    let root = tempdir().unwrap();
    let mut orchestrator =
        rig(MockFlowMeter::new().with_latency(Duration::from_millis(100)));
    let mut input = control(root.path(), vec![ChannelConfig::new("ai0", "Ar")]);

    orchestrator.tick(&input);
    let path = orchestrator.status().session_path.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    input.run = false;
    orchestrator.tick(&input);
    assert_eq!(orchestrator.state(), OrchestratorState::Armed);
    assert!(orchestrator.status().busy);

    orchestrator.settle().await;
    assert!(orchestrator.status().series.is_empty());
    assert!(!path.exists());
    assert!(!path.with_extension("yml").exists());
    assert!(csv_files(root.path()).is_empty());
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn run_is_not_started_in_the_tick_that_powers_the_analyzer_off() {
    let root = tempdir().unwrap();
    let analyzer = Arc::new(MockMassAnalyzer::new());
    let sampler = Sampler::new(Arc::new(MockFlowMeter::new())).with_analyzer(
        ScanningController::new(analyzer.clone(), IonizerParameters::default()),
    );
    let mut orchestrator = Orchestrator::new(sampler, SessionStore::default());

    let mut input = control(root.path(), vec![ChannelConfig::new("ai0", "Ar")]);
    input.run = false;
    input.analyzer_on = true;
    input.scan_targets = vec![ScanTarget::new(28.0)];
    step(&mut orchestrator, &input).await;
    assert_eq!(orchestrator.power_state(), Some(InstrumentPowerState::Ready));

    input.analyzer_on = false;
    input.run = true;
    orchestrator.tick(&input);

    let status = orchestrator.status();
    assert_eq!(status.state, OrchestratorState::Armed);
    assert!(status.run_forced_off);
    assert_eq!(
        status.last_error.as_deref(),
        Some("Cannot start run: scanning instrument is cooling down")
    );

    orchestrator.settle().await;
    for _ in 0..3 {
        step(&mut orchestrator, &input).await;
    }
    let status = orchestrator.status();
    assert_eq!(status.power, Some(InstrumentPowerState::Off));
    assert_eq!(status.state, OrchestratorState::Armed);
    assert!(status.series.is_empty());
    assert!(csv_files(root.path()).is_empty());
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn sample_from_previous_run_does_not_leak_into_the_next() {
    let meter = Arc::new(MockFlowMeter::new().with_latency(Duration::from_millis(100)));
    let mut orchestrator =
        Orchestrator::new(Sampler::new(meter.clone()), SessionStore::default());
    let mut input = ControlInput {
        channels: vec![ChannelConfig::new("ai0", "Ar")],
        run: true,
        ..ControlInput::default()
    };

    orchestrator.tick(&input);
    tokio::time::sleep(Duration::from_millis(10)).await;
    input.run = false;
    orchestrator.tick(&input);
    input.run = true;
    orchestrator.tick(&input);
    assert_eq!(orchestrator.state(), OrchestratorState::Running);

    // The stale acquisition still occupies the slot.
    orchestrator.settle().await;
    assert!(orchestrator.status().series.is_empty());

    step(&mut orchestrator, &input).await;
    let series = orchestrator.status().series;
    assert_eq!(series.len(), 1);
    assert!(series.samples()[0].timestamp < 0.5);
    assert_eq!(meter.read_count("ai0"), 2);
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn never_more_than_one_acquisition_in_flight() {
    let meter = Arc::new(MockFlowMeter::new().with_latency(Duration::from_millis(40)));
    let mut orchestrator =
        Orchestrator::new(Sampler::new(meter.clone()), SessionStore::default());
    let input = ControlInput {
        channels: vec![ChannelConfig::new("ai0", "Ar")],
        run: true,
        ..ControlInput::default()
    };

    let ticks = 40;
    for _ in 0..ticks {
        orchestrator.tick(&input);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    orchestrator.settle().await;

    let samples = orchestrator.status().series.len() as u64;
    assert_eq!(meter.max_concurrent_reads(), 1);
    assert_eq!(meter.read_count("ai0"), samples);
    assert!(samples < ticks / 2, "{samples} samples for {ticks} ticks");
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn header_written_once_for_many_rows() {
    let root = tempdir().unwrap();
    let mut orchestrator = rig(MockFlowMeter::new());
    let mut input = control(
        root.path(),
        vec![ChannelConfig::new("ai0", "Ar"), ChannelConfig::new("ai1", "O2")],
    );

    let n = 7;
    for _ in 0..n {
        step(&mut orchestrator, &input).await;
    }
    let path = orchestrator.status().session_path.unwrap();
    input.run = false;
    orchestrator.tick(&input);

    let contents = std::fs::read_to_string(&path).unwrap();
    assert_eq!(contents.lines().count(), n + 1);
    assert_eq!(
        contents.lines().filter(|l| l.starts_with("elapsed_seconds")).count(),
        1
    );
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn disabling_a_channel_mid_run_keeps_earlier_rows() {
    let root = tempdir().unwrap();
    let mut orchestrator = rig(MockFlowMeter::new());
    let mut input = control(
        root.path(),
        vec![ChannelConfig::new("ai0", "Ar"), ChannelConfig::new("ai1", "O2")],
    );

    step(&mut orchestrator, &input).await;
    step(&mut orchestrator, &input).await;
    input.channels[1].enabled = false;
    step(&mut orchestrator, &input).await;
    step(&mut orchestrator, &input).await;

    let status = orchestrator.status();
    let path = status.session_path.clone().unwrap();
    assert_eq!(status.series.channel_points("ai1").len(), 2);
    assert_eq!(status.series.channel_points("ai0").len(), 4);

    input.run = false;
    orchestrator.tick(&input);

    let (header, rows) = read_csv(&path);
    assert_eq!(header, vec!["elapsed_seconds", "Ar", "O2"]);
    assert_eq!(rows.len(), 4);
    assert!(!rows[0][2].is_empty() && !rows[1][2].is_empty());
    assert!(rows[2][2].is_empty() && rows[3][2].is_empty());
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn save_toggle_is_only_read_at_run_start() {
    let root = tempdir().unwrap();
    let mut orchestrator = rig(MockFlowMeter::new());
    let mut input = control(root.path(), vec![ChannelConfig::new("ai0", "Ar")]);
    input.save = false;

    step(&mut orchestrator, &input).await;
    input.save = true;
    step(&mut orchestrator, &input).await;

    assert_eq!(orchestrator.state(), OrchestratorState::Running);
    assert!(csv_files(root.path()).is_empty());
    orchestrator.shutdown().await;
}

#[tokio::test]
async fn scan_columns_follow_targets_frozen_at_start() {
    let root = tempdir().unwrap();
    let analyzer = Arc::new(MockMassAnalyzer::new().fail_mass(32.0));
    let sampler = Sampler::new(Arc::new(MockFlowMeter::new())).with_analyzer(
        ScanningController::new(analyzer.clone(), IonizerParameters::default()),
    );
    let mut orchestrator = Orchestrator::new(sampler, SessionStore::default());

    let mut input = control(root.path(), vec![ChannelConfig::new("ai0", "Ar")]);
    input.run = false;
    input.analyzer_on = true;
    input.scan_targets = ScanTarget::parse_list("28, 32").unwrap();
    step(&mut orchestrator, &input).await;
    assert_eq!(orchestrator.power_state(), Some(InstrumentPowerState::Ready));

    input.run = true;
    step(&mut orchestrator, &input).await;
    input.scan_targets = ScanTarget::parse_list("44").unwrap();
    step(&mut orchestrator, &input).await;

    let path = orchestrator.status().session_path.unwrap();
    let status = orchestrator.shutdown().await;
    assert_eq!(status.power, Some(InstrumentPowerState::Off));

    let (header, rows) = read_csv(&path);
    assert_eq!(header, vec!["elapsed_seconds", "Mass 28", "Mass 32", "Ar"]);
    assert_eq!(rows.len(), 2);
    for row in &rows {
        let mass_28: f64 = row[1].parse().unwrap();
        assert_eq!(mass_28, analyzer.expected_pressure(28.0));
        assert_eq!(row[2], "0e0");
    }
}
