//! Persisted results container
//!
//! One training run produces one JSON container holding the run record
//! (title, status, timestamps), an echo of the configuration that produced
//! it, and one [`MethodResult`] per booked method.
//!
//! The container file is created (truncating any previous file at the path)
//! when the run opens, which surfaces unwritable paths before any work is
//! done. Content is written and synced only in [`ResultsFile::close`], on
//! the success path: a failed run leaves behind an empty file, never a torn
//! container.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{MethodKind, TrainingConfig};
use crate::eval::EvaluationReport;
use crate::model::ModelParameters;
use crate::{Error, Result};

/// Status of a training run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Run is created but not yet started
    Pending,
    /// Run is currently executing
    Running,
    /// Run completed successfully
    Success,
    /// Run failed with an error
    Failed,
}

/// Lifecycle record of one training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    title: String,
    status: RunStatus,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    /// Create a new run record in Pending status.
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            status: RunStatus::Pending,
            started_at: None,
            ended_at: None,
        }
    }

    /// Run title.
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        self.status
    }

    /// Start timestamp, if the run has started.
    #[must_use]
    pub const fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// End timestamp, if the run has completed.
    #[must_use]
    pub const fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Transition to Running and stamp the start time.
    pub fn start(&mut self) {
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Transition to a final status and stamp the end time.
    pub fn complete(&mut self, status: RunStatus) {
        self.status = status;
        self.ended_at = Some(Utc::now());
    }
}

/// Everything persisted for one booked method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodResult {
    /// Booking name
    pub name: String,
    /// Classifier kind
    pub kind: MethodKind,
    /// Option string the method was booked with
    pub options: String,
    /// Trained model parameters
    pub parameters: ModelParameters,
    /// Evaluation metrics
    pub evaluation: EvaluationReport,
}

/// The serialized shape of the results container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsContainer {
    /// Run lifecycle record
    pub run: RunRecord,
    /// Configuration that produced this container
    pub config: TrainingConfig,
    /// One entry per booked method, in booking order
    pub results: Vec<MethodResult>,
}

/// Open results container bound to an output file.
pub struct ResultsFile {
    path: PathBuf,
    file: File,
    container: ResultsContainer,
}

impl std::fmt::Debug for ResultsFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultsFile")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl ResultsFile {
    /// Create (or truncate) the container file and bind a run to it.
    ///
    /// # Errors
    /// Returns [`Error::Io`] if the path is not writable.
    pub fn create<P: AsRef<Path>>(path: P, config: &TrainingConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        Ok(Self {
            path,
            file,
            container: ResultsContainer {
                run: RunRecord::new(config.title.clone()),
                config: config.clone(),
                results: Vec::new(),
            },
        })
    }

    /// Output file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mutable access to the run record.
    pub fn run_mut(&mut self) -> &mut RunRecord {
        &mut self.container.run
    }

    /// Number of stored method results.
    #[must_use]
    pub fn result_count(&self) -> usize {
        self.container.results.len()
    }

    /// Append one method result.
    pub fn push(&mut self, result: MethodResult) {
        self.container.results.push(result);
    }

    /// Finalize the run, write the container, and sync it to disk.
    ///
    /// Consumes the handle; this is the last operation of a run.
    ///
    /// # Errors
    /// Returns [`Error::Json`] on serialization failure and [`Error::Io`]
    /// on write/sync failure.
    pub fn close(mut self) -> Result<PathBuf> {
        self.container.run.complete(RunStatus::Success);
        let text = serde_json::to_string_pretty(&self.container)?;
        self.file.write_all(text.as_bytes())?;
        self.file.write_all(b"\n")?;
        self.file.sync_all()?;
        Ok(self.path)
    }

    /// Read a previously written container back.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the file does not exist and
    /// [`Error::Json`] if it does not hold a valid container.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<ResultsContainer> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(format!("results container {}", path.display()))
            } else {
                Error::Io(e)
            }
        })?;
        Ok(serde_json::from_str(&text)?)
    }
}
