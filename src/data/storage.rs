//! Session store: one CSV file (plus a YAML sidecar) per saved run.
//!
//! Files are partitioned by date under the data root:
//!
//! ```text
//! <root>/2024/2024.03.05/prc20240305_140709.csv
//! <root>/2024/2024.03.05/prc20240305_140709.yml
//! ```
//!
//! The first CSV row is the header (`elapsed_seconds`, one `Mass <m>` column per
//! scan target, one column per channel label). Every further row is one sample.
//! The column set is fixed when the session opens.
//!
//! Two runs started within the same second would map to the same file. The store
//! refuses to overwrite: opening fails with [`DaqError::Persistence`].
//!
//! A session that is closed before its header was written leaves no files behind.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Local};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::acquisition::sample::{ChannelConfig, Sample, ScanTarget};
use crate::error::{AppResult, DaqError};

/// Header of the time column.
pub const TIME_COLUMN: &str = "elapsed_seconds";

/// Column structure of a run, frozen at run start.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnLayout {
    channels: Vec<ChannelConfig>,
    targets: Vec<ScanTarget>,
}

impl ColumnLayout {
    /// Layout from the channels enabled at run start and the scan targets.
    pub fn new(channels: &[ChannelConfig], targets: &[ScanTarget]) -> Self {
        Self {
            channels: channels.iter().filter(|c| c.enabled).cloned().collect(),
            targets: targets.to_vec(),
        }
    }

    /// Channels that own a column.
    pub fn channels(&self) -> &[ChannelConfig] {
        &self.channels
    }

    /// Scan targets, in column order.
    pub fn targets(&self) -> &[ScanTarget] {
        &self.targets
    }

    /// Total number of columns, time column included.
    pub fn column_count(&self) -> usize {
        1 + self.targets.len() + self.channels.len()
    }

    /// Header row.
    pub fn header(&self) -> Vec<String> {
        std::iter::once(TIME_COLUMN.to_string())
            .chain(self.targets.iter().map(ScanTarget::label))
            .chain(self.channels.iter().map(|c| c.label.clone()))
            .collect()
    }

    /// Data row for `sample`. Missing channel values become empty cells.
    pub fn row(&self, sample: &Sample) -> Vec<String> {
        let scans = (0..self.targets.len()).map(|i| {
            sample
                .scan_values
                .get(i)
                .map_or_else(String::new, |v| format!("{v:e}"))
        });
        let channels = self.channels.iter().map(|c| {
            sample
                .channel_value(&c.id)
                .map_or_else(String::new, |v| v.to_string())
        });

        std::iter::once(sample.timestamp.to_string())
            .chain(scans)
            .chain(channels)
            .collect()
    }
}

/// Contents of the `.yml` sidecar.
#[derive(Debug, Serialize)]
struct SessionMetadata<'a> {
    t_unit: &'a str,
    #[serde(rename = "Pi_unit")]
    pi_unit: &'a str,
    started_at: String,
    channels: Vec<&'a str>,
    scan_targets: Vec<f64>,
}

/// Creates session files.
#[derive(Debug, Clone)]
pub struct SessionStore {
    time_unit: String,
    scan_unit: String,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new("s", "Torr")
    }
}

impl SessionStore {
    /// Store that records the given units in each sidecar.
    pub fn new(time_unit: impl Into<String>, scan_unit: impl Into<String>) -> Self {
        Self {
            time_unit: time_unit.into(),
            scan_unit: scan_unit.into(),
        }
    }

    /// Unit of the scan columns (e.g. `Torr`).
    pub fn scan_unit(&self) -> &str {
        &self.scan_unit
    }

    /// Directory for sessions started at `started`: `<root>/<YYYY>/<YYYY>.<MM>.<DD>`.
    pub fn session_dir(root: &Path, started: &DateTime<Local>) -> PathBuf {
        root.join(format!("{:04}", started.year()))
            .join(started.format("%Y.%m.%d").to_string())
    }

    /// File stem for a session started at `started`: `prc<YYYYMMDD>_<HHMMSS>`.
    pub fn file_stem(started: &DateTime<Local>) -> String {
        format!("prc{}", started.format("%Y%m%d_%H%M%S"))
    }

    /// Open a new session under `root`.
    ///
    /// Creates the date directories if needed, creates the CSV file (failing if it
    /// already exists) and writes the metadata sidecar. If the sidecar cannot be
    /// written the CSV file is removed again. The header is not written yet; see
    /// [`Session::write_header`].
    pub fn open(
        &self,
        root: &Path,
        started: DateTime<Local>,
        layout: &ColumnLayout,
    ) -> AppResult<Session> {
        let dir = Self::session_dir(root, &started);
        fs::create_dir_all(&dir).map_err(|e| {
            DaqError::Persistence(format!("cannot create directory {}: {e}", dir.display()))
        })?;

        let stem = Self::file_stem(&started);
        let path = dir.join(format!("{stem}.csv"));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => DaqError::Persistence(format!(
                    "session file {} already exists",
                    path.display()
                )),
                _ => DaqError::Persistence(format!("cannot create {}: {e}", path.display())),
            })?;

        let metadata_path = dir.join(format!("{stem}.yml"));
        if let Err(err) = self.write_metadata(&metadata_path, &started, layout) {
            drop(file);
            remove_if_present(&path)?;
            return Err(err);
        }

        info!(path = %path.display(), "Saving to file: {}", path.display());

        Ok(Session {
            path,
            metadata_path,
            writer: csv::Writer::from_writer(file),
            columns: layout.column_count(),
            header_written: false,
            rows: 0,
        })
    }

    fn write_metadata(
        &self,
        path: &Path,
        started: &DateTime<Local>,
        layout: &ColumnLayout,
    ) -> AppResult<()> {
        let metadata = SessionMetadata {
            t_unit: &self.time_unit,
            pi_unit: &self.scan_unit,
            started_at: started.to_rfc3339(),
            channels: layout.channels().iter().map(|c| c.label.as_str()).collect(),
            scan_targets: layout.targets().iter().map(|t| t.target_value).collect(),
        };

        let file = File::create(path).map_err(|e| {
            DaqError::Persistence(format!("cannot create {}: {e}", path.display()))
        })?;
        serde_yaml::to_writer(file, &metadata)?;
        Ok(())
    }
}

/// An open session file. Exactly one exists per saving run.
pub struct Session {
    path: PathBuf,
    metadata_path: PathBuf,
    writer: csv::Writer<File>,
    columns: usize,
    header_written: bool,
    rows: usize,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("path", &self.path)
            .field("columns", &self.columns)
            .field("header_written", &self.header_written)
            .field("rows", &self.rows)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// CSV file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Metadata sidecar path.
    pub fn metadata_path(&self) -> &Path {
        &self.metadata_path
    }

    /// Whether the header has been written.
    pub fn header_written(&self) -> bool {
        self.header_written
    }

    /// Data rows written so far.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Write the header. Allowed once, before any row.
    pub fn write_header(&mut self, columns: &[String]) -> AppResult<()> {
        if self.header_written {
            return Err(DaqError::Persistence(format!(
                "header of {} already written",
                self.path.display()
            )));
        }
        if columns.len() != self.columns {
            return Err(DaqError::Persistence(format!(
                "header has {} columns, session expects {}",
                columns.len(),
                self.columns
            )));
        }

        self.writer.write_record(columns)?;
        self.writer.flush()?;
        self.header_written = true;
        Ok(())
    }

    /// Append one data row. Must match the header's column count.
    pub fn append_row(&mut self, values: &[String]) -> AppResult<()> {
        if !self.header_written {
            return Err(DaqError::Persistence(format!(
                "row appended to {} before its header",
                self.path.display()
            )));
        }
        if values.len() != self.columns {
            return Err(DaqError::Persistence(format!(
                "row has {} columns, header has {}",
                values.len(),
                self.columns
            )));
        }

        self.writer.write_record(values)?;
        self.writer.flush()?;
        self.rows += 1;
        debug!(rows = self.rows, "Row appended");
        Ok(())
    }

    /// Flush and close the file. A session without a header is removed from disk.
    pub fn close(mut self) -> AppResult<()> {
        if !self.header_written {
            return self.remove();
        }
        self.writer.flush()?;
        info!(path = %self.path.display(), rows = self.rows, "Session closed");
        Ok(())
    }

    /// Drop the session without a final flush, removing it if it is still empty.
    pub fn abandon(self) {
        if self.header_written {
            return;
        }
        if let Err(err) = self.remove() {
            warn!(error = %err, "Cannot remove empty session");
        }
    }

    fn remove(self) -> AppResult<()> {
        let Session {
            path,
            metadata_path,
            writer,
            ..
        } = self;
        drop(writer);

        remove_if_present(&path)?;
        remove_if_present(&metadata_path)?;
        debug!(path = %path.display(), "Empty session removed");
        Ok(())
    }
}

fn remove_if_present(path: &Path) -> AppResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(DaqError::Persistence(format!(
            "cannot remove {}: {e}",
            path.display()
        ))),
    }
}
