//! Acquisition data model: channel configuration, scan targets and samples.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{AppResult, DaqError};

/// One analog input channel as configured by the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Hardware channel identifier (e.g. `ai0`)
    pub id: String,
    /// Human-readable label, usually the gas metered on this line
    pub label: String,
    /// Whether the channel is sampled
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ChannelConfig {
    /// Enabled channel with the given id and label.
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            enabled: true,
        }
    }

    /// Same channel, disabled.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// A mass-to-charge ratio probed by the scanning instrument.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScanTarget {
    /// Target value (m/z)
    pub target_value: f64,
}

impl ScanTarget {
    /// Target at `value`.
    pub fn new(target_value: f64) -> Self {
        Self { target_value }
    }

    /// Column and legend label (`Mass 28`).
    pub fn label(&self) -> String {
        format!("Mass {}", self.target_value)
    }

    /// Parse operator text such as `"28, 32; 44"` into an ordered target list.
    ///
    /// Separators are `,` and `;`. Blank input yields an empty list; a token that is
    /// not a finite number is rejected with the token in the message.
    pub fn parse_list(text: &str) -> AppResult<Vec<ScanTarget>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        text.split([',', ';'])
            .map(str::trim)
            .map(|token| {
                token
                    .parse::<f64>()
                    .ok()
                    .filter(|value| value.is_finite())
                    .map(ScanTarget::new)
                    .ok_or_else(|| {
                        DaqError::Configuration(format!("invalid scan target '{token}'"))
                    })
            })
            .collect()
    }
}

impl fmt::Display for ScanTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.target_value)
    }
}

/// A reading slot that failed during an acquisition cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleFault {
    /// Channel read failed; the channel value is missing.
    Channel {
        /// Channel identifier
        channel: String,
        /// Driver message
        message: String,
    },
    /// Scan failed; the scan value is zero.
    Scan {
        /// Target value
        target: f64,
        /// Driver message
        message: String,
    },
}

impl SampleFault {
    /// The equivalent error from the application taxonomy.
    pub fn to_error(&self) -> DaqError {
        match self {
            SampleFault::Channel { channel, message } => DaqError::ChannelRead {
                channel: channel.clone(),
                message: message.clone(),
            },
            SampleFault::Scan { target, message } => DaqError::Scan {
                target: *target,
                message: message.clone(),
            },
        }
    }
}

impl fmt::Display for SampleFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_error())
    }
}

/// Value of one channel within a sample.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelReading {
    /// Channel identifier
    pub channel: String,
    /// Reading, `None` when the read failed
    pub value: Option<f64>,
}

/// One composite acquisition record. Immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Seconds since the run origin, captured before any read
    pub timestamp: f64,
    /// One entry per channel that was enabled when the sample was taken
    pub channel_values: Vec<ChannelReading>,
    /// One value per scan target, in target order
    pub scan_values: Vec<f64>,
    /// Slots that failed during this cycle
    pub faults: Vec<SampleFault>,
}

impl Sample {
    /// Value of `channel`, `None` if disabled or failed.
    pub fn channel_value(&self, channel: &str) -> Option<f64> {
        self.channel_values
            .iter()
            .find(|reading| reading.channel == channel)
            .and_then(|reading| reading.value)
    }

    /// Whether every slot was read successfully.
    pub fn is_complete(&self) -> bool {
        self.faults.is_empty()
    }
}
