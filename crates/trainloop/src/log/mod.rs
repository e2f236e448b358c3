//! Training log.
//!
//! Provides:
//! - `TrainingLog` with one `LogRow` per iteration and the loop's `TrainingStatus`
//! - `LogValue` for the records extensions write
//! - Well-known record names

mod row;
mod training_log;

pub use row::{LogRow, LogValue};
pub use training_log::{TrainingLog, TrainingStatus};

/// Where a checkpoint or dump was written (`None` on failure)
pub const SAVED_TO: &str = "saved_to";
/// Which dump folder the state was loaded from
pub const LOADED_FROM: &str = "loaded_from";
/// Set by extensions to stop the loop at the next check
pub const TRAINING_FINISH_REQUESTED: &str = "training_finish_requested";
/// Set by the main loop once training has ended normally
pub const TRAINING_FINISHED: &str = "training_finished";
/// Text of the error that aborted training
pub const GOT_EXCEPTION: &str = "got_exception";
/// Which snapshot the loop was resumed from
pub const RESUMED_FROM: &str = "resumed_from";
