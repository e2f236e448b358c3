//! Iteration-indexed training log and loop status.

use super::row::LogRow;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Progress counters and flags of the main loop.
///
/// Kept inside the log so that a saved log is enough to know where
/// training stopped.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingStatus {
    /// Number of processed batches
    pub iterations_done: u64,
    /// Number of completed epochs
    pub epochs_done: u64,
    /// Set once the `before_training` callbacks have run
    pub training_started: bool,
    /// True between the start and the end of an epoch
    pub epoch_started: bool,
    /// Set after the first batch of the run was received
    pub received_first_batch: bool,
    /// `iterations_done` at the end of each epoch
    pub epoch_ends: Vec<u64>,
    /// Where the loop state was last restored from
    pub resumed_from: Option<PathBuf>,
}

/// Ordered log of rows, one per iteration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingLog {
    rows: BTreeMap<u64, LogRow>,
    pub status: TrainingStatus,
}

impl TrainingLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The row of the current iteration. Empty if nothing was recorded yet.
    pub fn current_row(&self) -> &LogRow {
        self.row(self.status.iterations_done)
            .unwrap_or_else(|| empty_row())
    }

    /// Mutable access to the row of the current iteration, created on demand.
    pub fn current_row_mut(&mut self) -> &mut LogRow {
        self.rows.entry(self.status.iterations_done).or_default()
    }

    /// The row of the iteration before the current one.
    pub fn previous_row(&self) -> Option<&LogRow> {
        self.status
            .iterations_done
            .checked_sub(1)
            .and_then(|iteration| self.row(iteration))
    }

    /// The row at which the last completed epoch ended.
    pub fn last_epoch_row(&self) -> Option<&LogRow> {
        self.status
            .epoch_ends
            .last()
            .and_then(|iteration| self.row(*iteration))
    }

    pub fn row(&self, iteration: u64) -> Option<&LogRow> {
        self.rows.get(&iteration)
    }

    pub fn row_mut(&mut self, iteration: u64) -> &mut LogRow {
        self.rows.entry(iteration).or_default()
    }

    /// Rows in iteration order
    pub fn rows(&self) -> impl Iterator<Item = (u64, &LogRow)> {
        self.rows.iter().map(|(iteration, row)| (*iteration, row))
    }

    /// Number of non-empty rows
    pub fn len(&self) -> usize {
        self.rows.values().filter(|row| !row.is_empty()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn empty_row() -> &'static LogRow {
    static EMPTY: std::sync::OnceLock<LogRow> = std::sync::OnceLock::new();
    EMPTY.get_or_init(LogRow::new)
}
