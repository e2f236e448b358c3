//! Main loop extensions.
//!
//! Provides:
//! - `TrainingExtension` trait, the hook interface of the main loop
//! - `Schedule` and `SimpleExtension` for extensions that act on conditions
//! - `Checkpoint`, `Dump` and `LoadFromDump` for saving and restoring state
//! - `FinishAfter` and `Printing` for stopping and reporting

mod saveload;
mod schedule;
mod simple;
mod training;

pub use saveload::{Checkpoint, Dump, LoadFromDump};
pub use schedule::{Predicate, Schedule};
pub use simple::{dispatch_scheduled, SimpleExtension};
pub use training::{FinishAfter, Printing};

use crate::data::Batch;
use crate::main_loop::LoopState;
use crate::Result;
use std::fmt;
use std::path::PathBuf;

/// Points in the main loop at which extensions are called.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Callback {
    /// Once, before the first epoch of a fresh run
    BeforeTraining,
    /// Instead of `BeforeTraining` when a started run is run again
    OnResumption,
    BeforeEpoch,
    /// Receives the batch about to be processed
    BeforeBatch,
    /// Receives the batch that was just processed
    AfterBatch,
    AfterEpoch,
    /// After training ended without an error
    AfterTraining,
    /// After the interrupt flag was raised
    OnInterrupt,
    /// After an error aborted training
    OnError,
}

impl Callback {
    pub fn name(self) -> &'static str {
        match self {
            Callback::BeforeTraining => "before_training",
            Callback::OnResumption => "on_resumption",
            Callback::BeforeEpoch => "before_epoch",
            Callback::BeforeBatch => "before_batch",
            Callback::AfterBatch => "after_batch",
            Callback::AfterEpoch => "after_epoch",
            Callback::AfterTraining => "after_training",
            Callback::OnInterrupt => "on_interrupt",
            Callback::OnError => "on_error",
        }
    }

    /// Whether the main loop passes the current batch along
    pub fn takes_batch(self) -> bool {
        matches!(self, Callback::BeforeBatch | Callback::AfterBatch)
    }
}

impl fmt::Display for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An argument attached to a scheduled condition.
#[derive(Clone, Debug, PartialEq)]
pub enum ConditionArg {
    Path(PathBuf),
    Text(String),
    Int(i64),
}

impl ConditionArg {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        ConditionArg::Path(path.into())
    }
}

/// Hook interface of the main loop.
///
/// Extensions get mutable access to the whole loop state on every callback.
/// An error returned from `dispatch` aborts training.
pub trait TrainingExtension {
    /// Name used in diagnostics
    fn name(&self) -> &str;

    /// Handle a callback. `batch` is set for `BeforeBatch` and `AfterBatch`.
    fn dispatch(
        &mut self,
        callback: Callback,
        batch: Option<&Batch>,
        state: &mut LoopState,
    ) -> Result<()>;
}
