//! Run report artifact: non-fatal error lines plus the final summary.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;

use crate::error::{LoadsimError, Result};

/// Sink for non-fatal errors and the end-of-run summary.
pub trait Reporter: Send + Sync {
    /// Record a non-fatal error; the run continues.
    fn error(&self, message: &str);

    /// Record the final summary text.
    fn summary(&self, text: &str) -> Result<()>;
}

/// Appends to a report file and mirrors errors to stderr.
#[derive(Debug)]
pub struct FileReporter {
    path: PathBuf,
}

impl FileReporter {
    /// Prepare a fresh report: create the directory and remove a stale file.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .map_err(|e| LoadsimError::Report(format!("could not create directory {}: {}", dir.display(), e)))?;
        }
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(LoadsimError::Report(format!("could not remove {}: {}", path.display(), e)));
            }
        }
        log::debug!("Writing report to {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, text: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| LoadsimError::Report(format!("could not open {}: {}", self.path.display(), e)))?;
        file.write_all(text.as_bytes())
            .map_err(|e| LoadsimError::Report(format!("could not write to {}: {}", self.path.display(), e)))
    }
}

fn with_newline(text: &str) -> String {
    if text.ends_with('\n') {
        text.to_string()
    } else {
        format!("{}\n", text)
    }
}

impl Reporter for FileReporter {
    fn error(&self, message: &str) {
        let line = with_newline(&format!("Error:==> {} {}", Local::now().format("%Y-%m-%d %H:%M:%S%.3f"), message));
        eprint!("{}", line);
        if let Err(e) = self.append(&line) {
            log::error!("{}", e);
        }
    }

    fn summary(&self, text: &str) -> Result<()> {
        self.append(&with_newline(text))
    }
}

/// Keeps report lines in memory.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    errors: Mutex<Vec<String>>,
    summaries: Mutex<Vec<String>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn summaries(&self) -> Vec<String> {
        self.summaries.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Reporter for MemoryReporter {
    fn error(&self, message: &str) {
        log::error!("{}", message);
        if let Ok(mut errors) = self.errors.lock() {
            errors.push(message.to_string());
        }
    }

    fn summary(&self, text: &str) -> Result<()> {
        self.summaries
            .lock()
            .map_err(|e| LoadsimError::Report(e.to_string()))?
            .push(text.to_string());
        Ok(())
    }
}
