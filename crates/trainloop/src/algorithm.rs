//! Training algorithm interface.

use crate::checkpoint::Checkpointable;
use crate::data::Batch;
use crate::model::Model;
use crate::Result;
use std::collections::BTreeMap;

/// Scalar observations produced while processing a batch.
///
/// The main loop writes them into the log row of the iteration that the
/// batch completes.
pub type BatchRecord = BTreeMap<String, f64>;

/// Something that updates a model from batches.
///
/// Its `Checkpointable` state (optimizer moments, step counters, ...) is
/// saved alongside the model by checkpoints and dumps.
pub trait TrainingAlgorithm: Checkpointable {
    /// Called once, right after the `before_training` callbacks.
    ///
    /// Those callbacks may already have loaded state into the algorithm.
    fn initialize(&mut self, _model: &mut dyn Model) -> Result<()> {
        Ok(())
    }

    /// Update `model` from one batch.
    fn process_batch(&mut self, model: &mut dyn Model, batch: &Batch) -> Result<BatchRecord>;
}
