//! # trainloop
//!
//! A small training main loop with checkpoint, dump and resume extensions.
//!
//! ## Overview
//!
//! trainloop provides:
//! - A `MainLoop` that drives a `TrainingAlgorithm` over a `DataStream` and
//!   fires lifecycle callbacks on registered extensions
//! - A `TrainingLog` of per-iteration rows that extensions write records into
//! - `Checkpoint`, `Dump` and `LoadFromDump` extensions that persist the
//!   training state to disk and bring it back
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use trainloop::prelude::*;
//!
//! let mut main_loop = MainLoop::new(model, algorithm, stream)
//!     .with_extension(FinishAfter::new().after_n_epochs(10))
//!     .with_extension(Checkpoint::new("run/checkpoint.bin").every_n_epochs(2));
//!
//! main_loop.run()?;
//! ```

use std::path::PathBuf;

pub mod algorithm;
pub mod checkpoint;
pub mod config;
pub mod data;
pub mod dump;
pub mod extensions;
pub mod log;
pub mod main_loop;
pub mod model;
pub mod serialization;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::algorithm::{BatchRecord, TrainingAlgorithm};
    pub use crate::checkpoint::{Checkpointable, MainLoopAttribute, MainLoopSnapshot};
    pub use crate::config::RunConfig;
    pub use crate::data::{Batch, DataStream, InMemoryStream, IterationState};
    pub use crate::dump::MainLoopDumpManager;
    pub use crate::extensions::{
        Callback, Checkpoint, ConditionArg, Dump, FinishAfter, LoadFromDump, Printing, Schedule,
        SimpleExtension, TrainingExtension,
    };
    pub use crate::log::{LogRow, LogValue, TrainingLog, TrainingStatus};
    pub use crate::main_loop::{LoopState, MainLoop};
    pub use crate::model::{Model, ParameterSet, Parameters};
    pub use crate::{Result, TrainLoopError};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Error types for the library
#[derive(Debug, thiserror::Error)]
pub enum TrainLoopError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Failed to move temporary file into {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unknown main loop attribute: {0}")]
    UnknownAttribute(String),

    #[error("Unknown parameters: {}", .0.join(", "))]
    UnknownParameters(Vec<String>),

    #[error("Shape mismatch for parameter {name}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid configuration: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),

    #[error("The epoch iterator yielded zero batches")]
    EmptyEpoch,

    #[error("Training error: {0}")]
    Training(String),

    #[error("{message}: {source}")]
    Load {
        message: String,
        #[source]
        source: Box<TrainLoopError>,
    },
}

impl TrainLoopError {
    /// Wrap an error with a higher-level message, keeping it as the source.
    pub fn reraise_as(message: impl Into<String>, source: TrainLoopError) -> Self {
        Self::Load {
            message: message.into(),
            source: Box::new(source),
        }
    }
}

impl From<bincode::Error> for TrainLoopError {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for TrainLoopError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TrainLoopError>;
