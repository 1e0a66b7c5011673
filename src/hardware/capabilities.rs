//! Atomic Hardware Capabilities
//!
//! This module defines the capability traits the acquisition engine needs from its
//! instruments. The register and serial protocols behind them stay inside the
//! drivers; the engine only sees these small contracts:
//!
//! - An analog flow meter card implements: `ChannelReader`
//! - A residual gas analyzer implements: `MassAnalyzer`
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Focuses on ONE thing
//!
//! Callers translate the `anyhow` errors into [`crate::error::DaqError`] with the
//! channel, target or step that failed attached.
//!
//! # Example
//!
//! ```rust,ignore
//! struct AnalogCard { /* ... */ }
//!
//! #[async_trait]
//! impl ChannelReader for AnalogCard {
//!     async fn read(&self, channel: &str) -> Result<f64> {
//!         // Integrate N samples on the channel and return the mean voltage
//!         Ok(1.25)
//!     }
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Capability: Analog Channel Readout
///
/// Devices that produce one scalar per named input channel (flow meters on a DAQ
/// card, pressure gauges).
///
/// # Contract
/// - `read()` may block for the settling/integration time of the channel
/// - No internal retries: the caller decides what a failure means
/// - Units are device-specific (volts for the flow meter card)
#[async_trait]
pub trait ChannelReader: Send + Sync {
    /// Read one sample from `channel`.
    ///
    /// # Returns
    /// - Ok(value) on successful read
    /// - Err on unknown channel, hardware error or timeout
    async fn read(&self, channel: &str) -> Result<f64>;
}

/// Ionizer operating point of a mass analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IonizerParameters {
    /// Electron impact energy in eV
    pub electron_energy_ev: f64,
    /// Ion energy in eV
    pub ion_energy_ev: f64,
    /// Focus plate voltage in V
    pub focus_voltage_v: f64,
}

impl IonizerParameters {
    /// All-zero operating point used during teardown.
    pub const ZERO: Self = Self {
        electron_energy_ev: 0.0,
        ion_energy_ev: 0.0,
        focus_voltage_v: 0.0,
    };
}

impl Default for IonizerParameters {
    fn default() -> Self {
        Self {
            electron_energy_ev: 70.0,
            ion_energy_ev: 12.0,
            focus_voltage_v: 90.0,
        }
    }
}

/// Live readings reported by an analyzer after a power transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalyzerReadback {
    /// Filament emission current in A
    pub emission_current_a: f64,
    /// Electron multiplier (CEM) voltage in V
    pub detector_voltage_v: f64,
}

/// Capability: Mass Analyzer
///
/// Scanning instruments that ionize a gas sample and measure intensity at a
/// requested mass-to-charge ratio (residual gas analyzers, quadrupole mass
/// spectrometers).
///
/// # Contract
/// - The power-related methods are individual steps; ordering them is the job of
///   [`crate::hardware::ScanningController`]
/// - `measure()` is only meaningful with emission and detector bias enabled
/// - `pressure_correct()` turns a raw intensity into a partial pressure (Torr)
///
/// # Safety
/// CAUTION: enabling the detector bias with the filament off, or at high chamber
/// pressure, can shorten multiplier life. Drive these through the controller.
#[async_trait]
pub trait MassAnalyzer: Send + Sync {
    /// Open the link to the instrument.
    ///
    /// # Default Implementation
    /// Drivers that connect on construction need nothing here.
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    /// Program the ionizer operating point.
    async fn set_ionizer(&self, params: IonizerParameters) -> Result<()>;

    /// Turn the filament (emission source) on or off.
    async fn set_emission(&self, enabled: bool) -> Result<()>;

    /// Turn the detector (electron multiplier) bias on or off.
    async fn set_detector_bias(&self, enabled: bool) -> Result<()>;

    /// Measure the raw intensity at `mass`.
    async fn measure(&self, mass: f64) -> Result<f64>;

    /// Apply the driver's partial-pressure correction to a raw intensity.
    async fn pressure_correct(&self, raw: f64) -> Result<f64>;

    /// Close the link to the instrument.
    async fn disconnect(&self) -> Result<()>;

    /// Report emission current and detector voltage.
    ///
    /// # Default Implementation
    /// Returns an error indicating readback is not supported.
    async fn readback(&self) -> Result<AnalyzerReadback> {
        anyhow::bail!("Readback not supported by this analyzer")
    }
}
