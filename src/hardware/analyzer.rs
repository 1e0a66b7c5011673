//! Scanning instrument controller.
//!
//! Wraps a [`MassAnalyzer`] driver in the power state machine that decides when a
//! scan can be trusted:
//!
//! ```text
//!          power_on()                    (all steps ok)
//!   ┌─────┐ ─────────▶ ┌────────────┐ ───────────────▶ ┌───────┐
//!   │ Off │            │ WarmingUp  │                  │ Ready │
//!   └─────┘ ◀───────── └────────────┘                  └───┬───┘
//!      ▲    (step failed)                                  │ power_off()
//!      │                ┌─────────────┐                    │
//!      └─────────────── │ CoolingDown │ ◀──────────────────┘
//!                       └─────────────┘
//! ```
//!
//! The controller is the only writer of [`InstrumentPowerState`]. Everyone else
//! observes it through [`ScanningController::subscribe`].

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::{AppResult, DaqError};
use crate::hardware::capabilities::{IonizerParameters, MassAnalyzer};

/// Power state of a scanning instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentPowerState {
    /// Emission and detector off, link closed
    Off,
    /// Warm-up sequence in progress, scans are not valid
    WarmingUp,
    /// Fully powered, scans allowed
    Ready,
    /// Teardown sequence in progress
    CoolingDown,
}

impl fmt::Display for InstrumentPowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstrumentPowerState::Off => write!(f, "off"),
            InstrumentPowerState::WarmingUp => write!(f, "warming up"),
            InstrumentPowerState::Ready => write!(f, "ready"),
            InstrumentPowerState::CoolingDown => write!(f, "cooling down"),
        }
    }
}

/// One step of the warm-up or teardown sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowerStep {
    /// Connect and program the ionizer operating point
    ConfigureIonizer,
    /// Filament on
    EnableEmission,
    /// Electron multiplier bias on
    EnableDetectorBias,
    /// Electron multiplier bias off
    DisableDetectorBias,
    /// Filament off
    DisableEmission,
    /// Ionizer operating point to zero
    ZeroIonizer,
    /// Close the link
    Disconnect,
}

impl PowerStep {
    /// Ordered warm-up sequence.
    pub const WARM_UP: [PowerStep; 3] = [
        PowerStep::ConfigureIonizer,
        PowerStep::EnableEmission,
        PowerStep::EnableDetectorBias,
    ];

    /// Ordered teardown sequence: the warm-up undone in reverse, then disconnect.
    pub const TEAR_DOWN: [PowerStep; 4] = [
        PowerStep::DisableDetectorBias,
        PowerStep::DisableEmission,
        PowerStep::ZeroIonizer,
        PowerStep::Disconnect,
    ];

    /// The step that undoes this one.
    pub fn inverse(self) -> PowerStep {
        match self {
            PowerStep::ConfigureIonizer => PowerStep::ZeroIonizer,
            PowerStep::EnableEmission => PowerStep::DisableEmission,
            PowerStep::EnableDetectorBias => PowerStep::DisableDetectorBias,
            PowerStep::DisableDetectorBias => PowerStep::EnableDetectorBias,
            PowerStep::DisableEmission => PowerStep::EnableEmission,
            PowerStep::ZeroIonizer => PowerStep::ConfigureIonizer,
            // Reconnecting happens as part of ConfigureIonizer.
            PowerStep::Disconnect => PowerStep::ConfigureIonizer,
        }
    }
}

impl fmt::Display for PowerStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PowerStep::ConfigureIonizer => "configure ionization parameters",
            PowerStep::EnableEmission => "enable emission source",
            PowerStep::EnableDetectorBias => "enable detector bias",
            PowerStep::DisableDetectorBias => "disable detector bias",
            PowerStep::DisableEmission => "disable emission source",
            PowerStep::ZeroIonizer => "zero ionization parameters",
            PowerStep::Disconnect => "disconnect",
        };
        write!(f, "{label}")
    }
}

/// Power sequencing and scanning on top of a [`MassAnalyzer`] driver.
///
/// Methods take `&mut self` for power transitions: the acquisition worker owns the
/// controller, so a scan can never run while a sequence is in progress.
pub struct ScanningController {
    driver: Arc<dyn MassAnalyzer>,
    ionizer: IonizerParameters,
    state: watch::Sender<InstrumentPowerState>,
}

impl ScanningController {
    /// Create a controller in the `Off` state.
    pub fn new(driver: Arc<dyn MassAnalyzer>, ionizer: IonizerParameters) -> Self {
        let (state, _) = watch::channel(InstrumentPowerState::Off);
        Self {
            driver,
            ionizer,
            state,
        }
    }

    /// Current power state.
    pub fn state(&self) -> InstrumentPowerState {
        *self.state.borrow()
    }

    /// Read-only view of the power state.
    pub fn subscribe(&self) -> watch::Receiver<InstrumentPowerState> {
        self.state.subscribe()
    }

    /// Whether scans are currently allowed.
    pub fn is_ready(&self) -> bool {
        self.state() == InstrumentPowerState::Ready
    }

    fn set_state(&self, next: InstrumentPowerState) {
        let previous = self.state.send_replace(next);
        debug!(from = %previous, to = %next, "Scanning instrument state change");
    }

    /// Run the warm-up sequence. Valid only from `Off`.
    ///
    /// On a step failure the steps already completed are undone in reverse order,
    /// the link is closed and the controller returns to `Off`.
    pub async fn power_on(&mut self) -> AppResult<()> {
        let current = self.state();
        if current != InstrumentPowerState::Off {
            return Err(DaqError::InstrumentState {
                operation: "power on",
                state: current,
            });
        }

        self.set_state(InstrumentPowerState::WarmingUp);
        info!("Turning on scanning instrument");

        let mut completed = Vec::with_capacity(PowerStep::WARM_UP.len());
        for step in PowerStep::WARM_UP {
            if let Err(err) = self.run_step(step).await {
                error!(step = %step, error = %err, "Warm-up step failed, returning instrument to off");
                self.roll_back(&completed).await;
                self.set_state(InstrumentPowerState::Off);
                return Err(DaqError::PowerSequence {
                    step,
                    message: format!("{err:#}"),
                });
            }
            debug!(step = %step, "Warm-up step complete");
            completed.push(step);
        }

        self.log_readback().await;
        self.set_state(InstrumentPowerState::Ready);
        info!("Scanning instrument ready");
        Ok(())
    }

    /// Run the teardown sequence. Valid only from `Ready`.
    ///
    /// Every teardown step is attempted even if an earlier one fails; the controller
    /// always ends in `Off` and the first failing step is reported.
    pub async fn power_off(&mut self) -> AppResult<()> {
        let current = self.state();
        if current != InstrumentPowerState::Ready {
            return Err(DaqError::InstrumentState {
                operation: "power off",
                state: current,
            });
        }

        self.set_state(InstrumentPowerState::CoolingDown);
        info!("Turning off scanning instrument");

        let mut first_failure: Option<(PowerStep, anyhow::Error)> = None;
        for step in PowerStep::TEAR_DOWN {
            if step == PowerStep::Disconnect {
                self.log_readback().await;
            }
            if let Err(err) = self.run_step(step).await {
                warn!(step = %step, error = %err, "Teardown step failed, continuing");
                first_failure.get_or_insert((step, err));
            }
        }

        self.set_state(InstrumentPowerState::Off);

        match first_failure {
            Some((step, err)) => Err(DaqError::PowerSequence {
                step,
                message: format!("{err:#}"),
            }),
            None => {
                info!("Scanning instrument off");
                Ok(())
            }
        }
    }

    /// Measure the pressure-corrected intensity at `target`. Valid only in `Ready`.
    pub async fn scan(&self, target: f64) -> AppResult<f64> {
        let current = self.state();
        if current != InstrumentPowerState::Ready {
            return Err(DaqError::InstrumentState {
                operation: "scan",
                state: current,
            });
        }

        let scan_error = |err: anyhow::Error| DaqError::Scan {
            target,
            message: format!("{err:#}"),
        };
        let raw = self.driver.measure(target).await.map_err(scan_error)?;
        self.driver.pressure_correct(raw).await.map_err(scan_error)
    }

    async fn run_step(&self, step: PowerStep) -> anyhow::Result<()> {
        match step {
            PowerStep::ConfigureIonizer => {
                self.driver.connect().await?;
                self.driver.set_ionizer(self.ionizer).await
            }
            PowerStep::EnableEmission => self.driver.set_emission(true).await,
            PowerStep::EnableDetectorBias => self.driver.set_detector_bias(true).await,
            PowerStep::DisableDetectorBias => self.driver.set_detector_bias(false).await,
            PowerStep::DisableEmission => self.driver.set_emission(false).await,
            PowerStep::ZeroIonizer => self.driver.set_ionizer(IonizerParameters::ZERO).await,
            PowerStep::Disconnect => self.driver.disconnect().await,
        }
    }

    async fn roll_back(&self, completed: &[PowerStep]) {
        for step in completed.iter().rev() {
            let undo = step.inverse();
            if let Err(err) = self.run_step(undo).await {
                warn!(step = %undo, error = %err, "Rollback step failed");
            }
        }
        if let Err(err) = self.run_step(PowerStep::Disconnect).await {
            debug!(error = %err, "Disconnect after failed warm-up did not succeed");
        }
    }

    async fn log_readback(&self) {
        match self.driver.readback().await {
            Ok(readback) => info!(
                emission_current_a = readback.emission_current_a,
                detector_voltage_v = readback.detector_voltage_v,
                "Emission current: {} A, CEM voltage: {} V",
                readback.emission_current_a,
                readback.detector_voltage_v
            ),
            Err(err) => debug!(error = %err, "Analyzer readback unavailable"),
        }
    }
}
