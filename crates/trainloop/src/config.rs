//! Run configuration.
//!
//! A `RunConfig` describes which extensions a run uses and how often they
//! act. It is usually read from a JSON file; every field has a default, so
//! a file only needs the sections it changes.

use crate::checkpoint::MainLoopAttribute;
use crate::extensions::{
    Checkpoint, Dump, FinishAfter, LoadFromDump, Printing, SimpleExtension, TrainingExtension,
};
use crate::{Result, TrainLoopError};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// When to stop training
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinishAfterConfig {
    /// Stop after this many epochs
    pub epochs: Option<u64>,
    /// Stop after this many batches
    pub batches: Option<u64>,
}

/// Single-file checkpoints
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub path: PathBuf,
    pub every_n_epochs: Option<u64>,
    pub every_n_batches: Option<u64>,
    /// Attributes also written to their own files
    pub save_separately: Vec<String>,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("checkpoint.bin"),
            every_n_epochs: None,
            every_n_batches: None,
            save_separately: Vec::new(),
        }
    }
}

/// Folder dumps
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DumpConfig {
    pub folder: PathBuf,
    pub every_n_epochs: Option<u64>,
    pub every_n_batches: Option<u64>,
    /// Load the folder before training if it exists
    pub load_on_start: bool,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            folder: PathBuf::from("dump"),
            every_n_epochs: None,
            every_n_batches: None,
            load_on_start: true,
        }
    }
}

/// Configuration of a training run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub finish_after: FinishAfterConfig,
    pub checkpoint: Option<CheckpointConfig>,
    pub dump: Option<DumpConfig>,
    /// Report progress through the log
    pub printing: bool,

    // Data and optimization
    /// Examples per batch
    pub batch_size: usize,
    /// Step size of the optimizer
    pub learning_rate: f64,
    /// Seed for data generation and shuffling
    pub seed: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            finish_after: FinishAfterConfig {
                epochs: Some(10),
                batches: None,
            },
            checkpoint: None,
            dump: None,
            printing: true,

            batch_size: 16,
            learning_rate: 0.05,
            seed: 42,
        }
    }
}

impl RunConfig {
    /// Read a configuration from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let config: Self = serde_json::from_reader(reader)?;
        tracing::debug!(path = %path.display(), "Loaded run configuration");
        Ok(config)
    }

    /// Set the epoch limit
    pub fn with_epochs(mut self, epochs: u64) -> Self {
        self.finish_after.epochs = Some(epochs);
        self
    }

    /// Set the batch limit
    pub fn with_batches(mut self, batches: u64) -> Self {
        self.finish_after.batches = Some(batches);
        self
    }

    /// Checkpoint to `path` after training
    pub fn with_checkpoint(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint = Some(CheckpointConfig {
            path: path.into(),
            ..CheckpointConfig::default()
        });
        self
    }

    /// Dump to `folder` after training, loading it first if present
    pub fn with_dump(mut self, folder: impl Into<PathBuf>) -> Self {
        self.dump = Some(DumpConfig {
            folder: folder.into(),
            ..DumpConfig::default()
        });
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_lr(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_printing(mut self, printing: bool) -> Self {
        self.printing = printing;
        self
    }

    /// Check the configuration, reporting every problem at once.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        let finish = &self.finish_after;
        if finish.epochs.is_none() && finish.batches.is_none() {
            problems.push("finish_after needs epochs or batches".to_string());
        }
        if finish.epochs == Some(0) {
            problems.push("finish_after.epochs must be positive".to_string());
        }
        if finish.batches == Some(0) {
            problems.push("finish_after.batches must be positive".to_string());
        }

        if self.batch_size == 0 {
            problems.push("batch_size must be positive".to_string());
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            problems.push(format!(
                "learning_rate must be a positive number, got {}",
                self.learning_rate
            ));
        }

        if let Some(checkpoint) = &self.checkpoint {
            if checkpoint.path.file_stem().is_none() {
                problems.push(format!(
                    "checkpoint.path {} has no file name",
                    checkpoint.path.display()
                ));
            }
            for name in &checkpoint.save_separately {
                if name.parse::<MainLoopAttribute>().is_err() {
                    problems.push(format!(
                        "checkpoint.save_separately: unknown attribute {:?}",
                        name
                    ));
                }
            }
            check_interval(&mut problems, "checkpoint.every_n_epochs", checkpoint.every_n_epochs);
            check_interval(&mut problems, "checkpoint.every_n_batches", checkpoint.every_n_batches);
        }

        if let Some(dump) = &self.dump {
            if dump.folder.as_os_str().is_empty() {
                problems.push("dump.folder must not be empty".to_string());
            }
            check_interval(&mut problems, "dump.every_n_epochs", dump.every_n_epochs);
            check_interval(&mut problems, "dump.every_n_batches", dump.every_n_batches);
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(TrainLoopError::InvalidConfig(problems))
        }
    }

    /// Validate and build the extensions of the run, in the order they
    /// should be registered.
    pub fn build_extensions(&self) -> Result<Vec<Box<dyn TrainingExtension>>> {
        self.validate()?;
        let mut extensions: Vec<Box<dyn TrainingExtension>> = Vec::new();

        if let Some(dump) = self.dump.as_ref().filter(|dump| dump.load_on_start) {
            extensions.push(Box::new(LoadFromDump::new(&dump.folder)));
        }

        let mut finish = FinishAfter::new();
        if let Some(epochs) = self.finish_after.epochs {
            finish = finish.after_n_epochs(epochs);
        }
        if let Some(batches) = self.finish_after.batches {
            finish = finish.after_n_batches(batches);
        }
        extensions.push(Box::new(finish));

        if let Some(config) = &self.checkpoint {
            let checkpoint = Checkpoint::new(&config.path)
                .save_separately(&config.save_separately)?
                .every_n_epochs(config.every_n_epochs.unwrap_or(0))
                .every_n_batches(config.every_n_batches.unwrap_or(0));
            extensions.push(Box::new(checkpoint));
        }

        if let Some(config) = &self.dump {
            let dump = Dump::new(&config.folder)
                .every_n_epochs(config.every_n_epochs.unwrap_or(0))
                .every_n_batches(config.every_n_batches.unwrap_or(0));
            extensions.push(Box::new(dump));
        }

        if self.printing {
            extensions.push(Box::new(Printing::new()));
        }
        Ok(extensions)
    }
}

fn check_interval(problems: &mut Vec<String>, name: &str, value: Option<u64>) {
    if value == Some(0) {
        problems.push(format!("{} must be positive", name));
    }
}
