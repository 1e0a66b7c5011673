//! Mock Hardware Implementations
//!
//! Provides simulated hardware devices for running the controller without a
//! flow meter card or a gas analyzer attached.
//! All mock devices use async-safe operations (tokio::time::sleep, not std::thread::sleep).
//!
//! # Available Mocks
//!
//! - `MockFlowMeter` - Simulated analog flow meter card (any channel name)
//! - `MockMassAnalyzer` - Simulated residual gas analyzer with a call journal
//!
//! Both support failure injection so the partial-failure paths of the acquisition
//! engine can be exercised deterministically.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::{sleep, Duration};

use crate::hardware::analyzer::PowerStep;
use crate::hardware::capabilities::{
    AnalyzerReadback, ChannelReader, IonizerParameters, MassAnalyzer,
};

// =============================================================================
// MockFlowMeter - Simulated Analog Flow Meter Card
// =============================================================================

/// Mock analog flow meter card.
///
/// Every channel returns its base voltage plus ~1% noise. Unknown channels read
/// 1.0 V. Reads can be slowed down with a latency to mimic integration time, and
/// individual reads can be forced to fail.
///
/// # Example
///
/// ```rust,ignore
/// let meter = MockFlowMeter::new()
///     .with_channel("ai0", 2.0)
///     .fail_read("ai0", 2); // second read of ai0 fails
/// ```
pub struct MockFlowMeter {
    base_voltage: HashMap<String, f64>,
    latency: Duration,
    scheduled_failures: HashSet<(String, u64)>,
    dead_channels: HashSet<String>,
    read_counts: Mutex<HashMap<String, u64>>,
    active_reads: AtomicUsize,
    max_active_reads: AtomicUsize,
    rng: Mutex<StdRng>,
}

impl MockFlowMeter {
    /// Create a flow meter card with no latency and no failures.
    pub fn new() -> Self {
        Self {
            base_voltage: HashMap::new(),
            latency: Duration::ZERO,
            scheduled_failures: HashSet::new(),
            dead_channels: HashSet::new(),
            read_counts: Mutex::new(HashMap::new()),
            active_reads: AtomicUsize::new(0),
            max_active_reads: AtomicUsize::new(0),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Set the base voltage of a channel.
    pub fn with_channel(mut self, channel: impl Into<String>, volts: f64) -> Self {
        self.base_voltage.insert(channel.into(), volts);
        self
    }

    /// Delay every read by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make the `nth` read (1-based) of `channel` fail.
    pub fn fail_read(mut self, channel: impl Into<String>, nth: u64) -> Self {
        self.scheduled_failures.insert((channel.into(), nth));
        self
    }

    /// Make every read of `channel` fail.
    pub fn fail_channel(mut self, channel: impl Into<String>) -> Self {
        self.dead_channels.insert(channel.into());
        self
    }

    /// Number of reads attempted on `channel`.
    pub fn read_count(&self, channel: &str) -> u64 {
        self.read_counts.lock().get(channel).copied().unwrap_or(0)
    }

    /// Highest number of reads that were ever in progress at the same time.
    pub fn max_concurrent_reads(&self) -> usize {
        self.max_active_reads.load(Ordering::SeqCst)
    }
}

impl Default for MockFlowMeter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelReader for MockFlowMeter {
    async fn read(&self, channel: &str) -> Result<f64> {
        let active = self.active_reads.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_reads.fetch_max(active, Ordering::SeqCst);

        let nth = {
            let mut counts = self.read_counts.lock();
            let count = counts.entry(channel.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }
        self.active_reads.fetch_sub(1, Ordering::SeqCst);

        if self.dead_channels.contains(channel)
            || self.scheduled_failures.contains(&(channel.to_string(), nth))
        {
            return Err(anyhow!("simulated read timeout on {channel}"));
        }

        let base = self.base_voltage.get(channel).copied().unwrap_or(1.0);
        let noise: f64 = self.rng.lock().gen_range(-0.01..0.01);
        Ok(base * (1.0 + noise))
    }
}

// =============================================================================
// MockMassAnalyzer - Simulated Residual Gas Analyzer
// =============================================================================

/// Driver call recorded by [`MockMassAnalyzer`].
#[derive(Debug, Clone, PartialEq)]
pub enum AnalyzerCall {
    /// `connect()`
    Connect,
    /// `set_ionizer(params)`
    SetIonizer(IonizerParameters),
    /// `set_emission(enabled)`
    SetEmission(bool),
    /// `set_detector_bias(enabled)`
    SetDetectorBias(bool),
    /// `measure(mass)`
    Measure(f64),
    /// `disconnect()`
    Disconnect,
}

impl AnalyzerCall {
    /// The power step this call belongs to, if any.
    pub fn power_step(&self) -> Option<PowerStep> {
        match self {
            AnalyzerCall::SetIonizer(params) if *params == IonizerParameters::ZERO => {
                Some(PowerStep::ZeroIonizer)
            }
            AnalyzerCall::SetIonizer(_) => Some(PowerStep::ConfigureIonizer),
            AnalyzerCall::SetEmission(true) => Some(PowerStep::EnableEmission),
            AnalyzerCall::SetEmission(false) => Some(PowerStep::DisableEmission),
            AnalyzerCall::SetDetectorBias(true) => Some(PowerStep::EnableDetectorBias),
            AnalyzerCall::SetDetectorBias(false) => Some(PowerStep::DisableDetectorBias),
            AnalyzerCall::Disconnect => Some(PowerStep::Disconnect),
            AnalyzerCall::Connect | AnalyzerCall::Measure(_) => None,
        }
    }
}

#[derive(Default)]
struct AnalyzerState {
    connected: bool,
    emission: bool,
    detector_bias: bool,
}

/// Mock residual gas analyzer.
///
/// Intensities are deterministic (`1e-9 * (1 + mass / 100)` raw, corrected by a
/// fixed sensitivity factor) so tests can compare exact values. Every driver call
/// is journaled.
pub struct MockMassAnalyzer {
    journal: Mutex<Vec<AnalyzerCall>>,
    state: Mutex<AnalyzerState>,
    failing_steps: HashSet<PowerStep>,
    failing_masses: Vec<f64>,
    step_latency: Duration,
    scan_latency: Duration,
}

/// Sensitivity factor applied by [`MockMassAnalyzer::pressure_correct`].
const MOCK_SENSITIVITY_TORR: f64 = 0.85;

impl MockMassAnalyzer {
    /// Create an analyzer that succeeds at everything instantly.
    pub fn new() -> Self {
        Self {
            journal: Mutex::new(Vec::new()),
            state: Mutex::new(AnalyzerState::default()),
            failing_steps: HashSet::new(),
            failing_masses: Vec::new(),
            step_latency: Duration::ZERO,
            scan_latency: Duration::ZERO,
        }
    }

    /// Make the driver call behind `step` fail.
    pub fn fail_step(mut self, step: PowerStep) -> Self {
        self.failing_steps.insert(step);
        self
    }

    /// Make every measurement at `mass` fail.
    pub fn fail_mass(mut self, mass: f64) -> Self {
        self.failing_masses.push(mass);
        self
    }

    /// Delay every power step by `latency`.
    pub fn with_step_latency(mut self, latency: Duration) -> Self {
        self.step_latency = latency;
        self
    }

    /// Delay every measurement by `latency`.
    pub fn with_scan_latency(mut self, latency: Duration) -> Self {
        self.scan_latency = latency;
        self
    }

    /// All driver calls so far, in order.
    pub fn journal(&self) -> Vec<AnalyzerCall> {
        self.journal.lock().clone()
    }

    /// Power steps performed so far, in order.
    pub fn steps(&self) -> Vec<PowerStep> {
        self.journal
            .lock()
            .iter()
            .filter_map(AnalyzerCall::power_step)
            .collect()
    }

    /// The corrected value a scan at `mass` returns.
    pub fn expected_pressure(&self, mass: f64) -> f64 {
        raw_intensity(mass) * MOCK_SENSITIVITY_TORR
    }

    async fn step(&self, call: AnalyzerCall) -> Result<()> {
        if !self.step_latency.is_zero() {
            sleep(self.step_latency).await;
        }
        let step = call.power_step();
        self.journal.lock().push(call);
        match step {
            Some(step) if self.failing_steps.contains(&step) => {
                Err(anyhow!("simulated failure during '{step}'"))
            }
            _ => Ok(()),
        }
    }
}

impl Default for MockMassAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn raw_intensity(mass: f64) -> f64 {
    1e-9 * (1.0 + mass / 100.0)
}

#[async_trait]
impl MassAnalyzer for MockMassAnalyzer {
    async fn connect(&self) -> Result<()> {
        self.journal.lock().push(AnalyzerCall::Connect);
        self.state.lock().connected = true;
        Ok(())
    }

    async fn set_ionizer(&self, params: IonizerParameters) -> Result<()> {
        if !self.state.lock().connected {
            return Err(anyhow!("analyzer not connected"));
        }
        self.step(AnalyzerCall::SetIonizer(params)).await
    }

    async fn set_emission(&self, enabled: bool) -> Result<()> {
        self.step(AnalyzerCall::SetEmission(enabled)).await?;
        self.state.lock().emission = enabled;
        Ok(())
    }

    async fn set_detector_bias(&self, enabled: bool) -> Result<()> {
        self.step(AnalyzerCall::SetDetectorBias(enabled)).await?;
        self.state.lock().detector_bias = enabled;
        Ok(())
    }

    async fn measure(&self, mass: f64) -> Result<f64> {
        if !self.scan_latency.is_zero() {
            sleep(self.scan_latency).await;
        }
        self.journal.lock().push(AnalyzerCall::Measure(mass));
        if self.failing_masses.contains(&mass) {
            return Err(anyhow!("simulated scan timeout at mass {mass}"));
        }
        Ok(raw_intensity(mass))
    }

    async fn pressure_correct(&self, raw: f64) -> Result<f64> {
        Ok(raw * MOCK_SENSITIVITY_TORR)
    }

    async fn disconnect(&self) -> Result<()> {
        self.step(AnalyzerCall::Disconnect).await?;
        self.state.lock().connected = false;
        Ok(())
    }

    async fn readback(&self) -> Result<AnalyzerReadback> {
        let state = self.state.lock();
        Ok(AnalyzerReadback {
            emission_current_a: if state.emission { 1.0e-3 } else { 0.0 },
            detector_voltage_v: if state.detector_bias { 1400.0 } else { 0.0 },
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
