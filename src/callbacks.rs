//! Progress observers for the calibration harness.
//!
//! Numerical logic never prints; the harness instead notifies a
//! [`Callback`] as replicates finish. Observers must be `Sync`, because
//! notifications arrive from worker threads in no particular order.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::calibration::{CalibrationReport, ReplicationRecord};
use crate::errors::Error;

/// Observer of a calibration run.
pub trait Callback: Sync {
    /// Called from a worker thread after each replicate, successful or
    /// not.
    fn replicate_finished(&self, index: usize, outcome: &Result<ReplicationRecord, Error>);

    /// Called once after aggregation.
    fn run_finished(&self, report: &CalibrationReport) {
        let _ = report;
    }
}

/// A callback that does nothing.
pub struct SinkCallback {}

impl Callback for SinkCallback {
    fn replicate_finished(&self, _: usize, _: &Result<ReplicationRecord, Error>) {}
}

/// A callback that reports progress through the `log` facade.
pub struct LogCallback {}

impl Callback for LogCallback {
    fn replicate_finished(&self, index: usize, outcome: &Result<ReplicationRecord, Error>) {
        match outcome {
            Ok(record) => log::debug!(
                "replicate {} finished with {} estimates",
                index,
                record.estimates.len()
            ),
            Err(e) => log::warn!("replicate {} excluded: {}", index, e),
        }
    }

    fn run_finished(&self, report: &CalibrationReport) {
        log::info!(
            "{} of {} replicates completed",
            report.completed,
            report.replicates
        );

        for (category, count) in &report.excluded {
            log::info!("{} replicates excluded as {:?}", count, category);
        }
    }
}

/// A callback that writes the successful replication records to a JSON
/// file when the run finishes.
pub struct FileWriterCallback {
    path: PathBuf,
    records: Mutex<Vec<ReplicationRecord>>,
}

impl FileWriterCallback {
    /// Records will be written to `path`, replacing any existing file.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            records: Mutex::new(Vec::new()),
        }
    }
}

impl Callback for FileWriterCallback {
    fn replicate_finished(&self, _: usize, outcome: &Result<ReplicationRecord, Error>) {
        if let Ok(record) = outcome {
            self.records.lock().unwrap().push(record.clone());
        }
    }

    fn run_finished(&self, _: &CalibrationReport) {
        let mut records = self.records.lock().unwrap();
        records.sort_by_key(|record| record.index);

        let written = std::fs::File::create(&self.path)
            .map_err(serde_json::Error::io)
            .and_then(|file| serde_json::to_writer_pretty(file, &*records));

        if let Err(e) = written {
            log::error!(
                "failed to write replication records to {}: {}",
                self.path.display(),
                e
            );
        }
    }
}
