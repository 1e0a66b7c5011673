//! Configuration using Figment.
//!
//! Settings are loaded from:
//! 1. a TOML file (base configuration, `config/photoreactor.toml` by default)
//! 2. environment variables prefixed with `PRC_DAQ_`, nested with `__`
//!
//! Every section has defaults, so a missing file yields a usable simulated rig.
//!
//! # Example
//! ```no_run
//! use photoreactor_daq::config::Settings;
//!
//! # fn main() -> photoreactor_daq::error::AppResult<()> {
//! // PRC_DAQ_ACQUISITION__TICK_INTERVAL_MS=250 overrides the file
//! let settings = Settings::load()?;
//! settings.validate()?;
//! println!("Sampling every {} ms", settings.acquisition.tick_interval_ms);
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::acquisition::orchestrator::ControlInput;
use crate::acquisition::sample::{ChannelConfig, ScanTarget};
use crate::error::{AppResult, DaqError};
use crate::hardware::IonizerParameters;

/// Default settings file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/photoreactor.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "PRC_DAQ_";

/// Top-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Sampling clock
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    /// Session files
    #[serde(default)]
    pub storage: StorageConfig,
    /// Gas names allowed as channel labels, any label when empty
    #[serde(default = "default_gases")]
    pub gases: Vec<String>,
    /// Flow meter channels
    #[serde(default = "default_channels")]
    pub channels: Vec<ChannelConfig>,
    /// Residual gas analyzer
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// Sampling clock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Clock period in milliseconds
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
}

/// Session file configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of the date-partitioned session tree
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,
    /// Unit of the time column, recorded in the metadata file
    #[serde(default = "default_time_unit")]
    pub time_unit: String,
    /// Unit of the scan columns, recorded in the metadata file
    #[serde(default = "default_scan_unit")]
    pub scan_unit: String,
}

/// Residual gas analyzer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Whether an analyzer is attached to the rig
    #[serde(default)]
    pub enabled: bool,
    /// Serial port of the analyzer
    #[serde(default = "default_port")]
    pub port: String,
    /// Serial baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Electron energy in eV
    #[serde(default = "default_electron_energy")]
    pub electron_energy_ev: f64,
    /// Ion energy in eV
    #[serde(default = "default_ion_energy")]
    pub ion_energy_ev: f64,
    /// Focus plate voltage in V
    #[serde(default = "default_focus_voltage")]
    pub focus_voltage_v: f64,
    /// Scan targets as operator text, e.g. `"28, 32, 44"`
    #[serde(default)]
    pub masses: String,
}

fn default_name() -> String {
    "Photoreactor DAQ".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_tick_interval() -> u64 {
    500
}

fn default_data_root() -> PathBuf {
    PathBuf::from("data")
}

fn default_time_unit() -> String {
    "s".to_string()
}

fn default_scan_unit() -> String {
    "Torr".to_string()
}

fn default_gases() -> Vec<String> {
    ["Ar", "O2", "N2", "H2", "CO2"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_channels() -> Vec<ChannelConfig> {
    vec![ChannelConfig::new("ai0", "Ar"), ChannelConfig::new("ai1", "O2")]
}

fn default_port() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_baud_rate() -> u32 {
    28800
}

fn default_electron_energy() -> f64 {
    70.0
}

fn default_ion_energy() -> f64 {
    12.0
}

fn default_focus_voltage() -> f64 {
    90.0
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            time_unit: default_time_unit(),
            scan_unit: default_scan_unit(),
        }
    }
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_port(),
            baud_rate: default_baud_rate(),
            electron_energy_ev: default_electron_energy(),
            ion_energy_ev: default_ion_energy(),
            focus_voltage_v: default_focus_voltage(),
            masses: String::new(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            application: ApplicationConfig::default(),
            acquisition: AcquisitionConfig::default(),
            storage: StorageConfig::default(),
            gases: default_gases(),
            channels: default_channels(),
            analyzer: AnalyzerConfig::default(),
        }
    }
}

impl AnalyzerConfig {
    /// Ionizer operating point for warm-up.
    pub fn ionizer(&self) -> IonizerParameters {
        IonizerParameters {
            electron_energy_ev: self.electron_energy_ev,
            ion_energy_ev: self.ion_energy_ev,
            focus_voltage_v: self.focus_voltage_v,
        }
    }

    /// Parsed scan targets.
    pub fn scan_targets(&self) -> AppResult<Vec<ScanTarget>> {
        ScanTarget::parse_list(&self.masses)
    }
}

impl Settings {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment.
    ///
    /// Environment variables override the file, for example
    /// `PRC_DAQ_STORAGE__DATA_ROOT=/mnt/data`.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(settings)
    }

    /// Validate settings after loading.
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if self.acquisition.tick_interval_ms == 0 {
            return Err(DaqError::Configuration(
                "tick_interval_ms must be greater than 0".to_string(),
            ));
        }

        let mut ids = HashSet::new();
        for channel in &self.channels {
            if channel.id.trim().is_empty() {
                return Err(DaqError::Configuration("Channel ID must not be empty".into()));
            }
            if !ids.insert(channel.id.as_str()) {
                return Err(DaqError::Configuration(format!(
                    "Duplicate channel ID: {}",
                    channel.id
                )));
            }
            if !self.gases.is_empty() && !self.gases.contains(&channel.label) {
                return Err(DaqError::Configuration(format!(
                    "Channel {} label '{}' is not one of the configured gases: {}",
                    channel.id,
                    channel.label,
                    self.gases.join(", ")
                )));
            }
        }

        if self.analyzer.baud_rate == 0 {
            return Err(DaqError::Configuration(
                "analyzer baud_rate must be greater than 0".to_string(),
            ));
        }
        self.analyzer.scan_targets()?;

        Ok(())
    }

    /// Clock period.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.acquisition.tick_interval_ms)
    }

    /// Initial operator input: configured channels and masses, nothing requested.
    pub fn control_input(&self) -> AppResult<ControlInput> {
        Ok(ControlInput {
            channels: self.channels.clone(),
            scan_targets: self.analyzer.scan_targets()?,
            analyzer_on: false,
            run: false,
            save: false,
            data_root: self.storage.data_root.clone(),
        })
    }
}
