//! One acquisition cycle: every enabled channel, then every scan target.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tracing::{trace, warn};

use crate::acquisition::sample::{ChannelConfig, ChannelReading, Sample, SampleFault, ScanTarget};
use crate::error::DaqError;
use crate::hardware::{ChannelReader, InstrumentPowerState, ScanningController};

/// Reads the flow meter channels and, when present, the scanning instrument.
///
/// Failures of individual channels or targets never abort the cycle; they end up
/// in [`Sample::faults`] with a missing channel value or a zero scan value.
pub struct Sampler {
    reader: Arc<dyn ChannelReader>,
    analyzer: Option<ScanningController>,
}

impl Sampler {
    /// Sampler for a rig with flow meters only.
    pub fn new(reader: Arc<dyn ChannelReader>) -> Self {
        Self {
            reader,
            analyzer: None,
        }
    }

    /// Attach a scanning instrument.
    pub fn with_analyzer(mut self, analyzer: ScanningController) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    /// Read-only view of the analyzer power state, if an analyzer is attached.
    pub fn power_state(&self) -> Option<watch::Receiver<InstrumentPowerState>> {
        self.analyzer.as_ref().map(ScanningController::subscribe)
    }

    /// Mutable access to the analyzer for power transitions.
    pub fn analyzer_mut(&mut self) -> Option<&mut ScanningController> {
        self.analyzer.as_mut()
    }

    /// Take one composite sample.
    ///
    /// The timestamp is captured before any read so all values in the sample share
    /// one time base. Scan values are zero-filled when the analyzer is absent or not
    /// `Ready`, keeping them aligned with `targets`.
    pub async fn acquire(
        &self,
        channels: &[ChannelConfig],
        targets: &[ScanTarget],
        origin: Instant,
    ) -> Sample {
        let timestamp = origin.elapsed().as_secs_f64();
        let mut faults = Vec::new();

        let mut channel_values = Vec::with_capacity(channels.len());
        for channel in channels.iter().filter(|c| c.enabled) {
            let value = match self.reader.read(&channel.id).await {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!(channel = %channel.id, error = %err, "Channel read failed");
                    faults.push(SampleFault::Channel {
                        channel: channel.id.clone(),
                        message: format!("{err:#}"),
                    });
                    None
                }
            };
            channel_values.push(ChannelReading {
                channel: channel.id.clone(),
                value,
            });
        }

        let scan_values = match &self.analyzer {
            Some(analyzer) if analyzer.is_ready() => {
                let mut values = Vec::with_capacity(targets.len());
                for target in targets {
                    let value = match analyzer.scan(target.target_value).await {
                        Ok(value) => value,
                        Err(err) => {
                            warn!(target = %target, error = %err, "Scan failed, recording zero");
                            let message = match err {
                                DaqError::Scan { message, .. } => message,
                                other => other.to_string(),
                            };
                            faults.push(SampleFault::Scan {
                                target: target.target_value,
                                message,
                            });
                            0.0
                        }
                    };
                    values.push(value);
                }
                values
            }
            _ => {
                trace!("Scanning instrument not ready, zero-filling scan values");
                vec![0.0; targets.len()]
            }
        };

        Sample {
            timestamp,
            channel_values,
            scan_values,
            faults,
        }
    }
}
