//! Log-directory artifacts.
//!
//! Every run writes an engine-level log plus one operation log per device
//! type. Log writes never fail a flow: errors are swallowed after a single
//! stderr note.

use anyhow::{Context, Result};
use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::device::DeviceType;

/// An append-only, timestamped log file.
pub struct LogSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl LogSink {
    pub fn create(path: PathBuf) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_line(&self, level: &str, message: &str) {
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let line = format!("{stamp} [{level}] {message}\n");
        let mut file = match self.file.lock() {
            Ok(f) => f,
            Err(_) => return,
        };
        if file.write_all(line.as_bytes()).is_err() {
            eprintln!("warning: failed to write to {}", self.path.display());
        }
    }

    pub fn info(&self, message: &str) {
        self.write_line("INFO", message);
    }

    pub fn warn(&self, message: &str) {
        self.write_line("WARN", message);
    }

    pub fn error(&self, message: &str) {
        self.write_line("ERROR", message);
    }
}

/// The full set of log files for one run.
pub struct LogSet {
    pub directory: PathBuf,
    pub engine: LogSink,
    compute: LogSink,
    switch: LogSink,
}

impl LogSet {
    /// Create the log directory (if missing) and open all sinks.
    pub fn create(directory: &Path) -> Result<Self> {
        std::fs::create_dir_all(directory)
            .with_context(|| format!("Failed to create log directory {}", directory.display()))?;
        Ok(Self {
            directory: directory.to_path_buf(),
            engine: LogSink::create(directory.join("factory_flow_orchestrator.log"))?,
            compute: LogSink::create(directory.join("compute_factory_flow.log"))?,
            switch: LogSink::create(directory.join("switch_factory_flow.log"))?,
        })
    }

    /// The operation log for a device type.
    pub fn device(&self, device_type: DeviceType) -> &LogSink {
        match device_type {
            DeviceType::Compute => &self.compute,
            DeviceType::Switch => &self.switch,
        }
    }

    /// Path of the progress snapshot artifact.
    pub fn progress_json_path(&self) -> PathBuf {
        self.directory.join("flow_progress.json")
    }
}
