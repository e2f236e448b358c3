//! Checkpoint state and trait definitions.

use crate::data::IterationState;
use crate::log::{TrainingLog, RESUMED_FROM, TRAINING_FINISH_REQUESTED};
use crate::main_loop::LoopState;
use crate::model::Parameters;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Trait for components that can be checkpointed.
///
/// Implement this trait to enable save/restore functionality for your training components.
///
/// # Example
///
/// ```ignore
/// impl Checkpointable for Momentum {
///     fn save_state(&self) -> Result<Vec<u8>> {
///         Ok(bincode::serialize(&self.velocity)?)
///     }
///
///     fn load_state(&mut self, data: &[u8]) -> Result<()> {
///         self.velocity = bincode::deserialize(data)?;
///         Ok(())
///     }
/// }
/// ```
pub trait Checkpointable {
    /// Serialize the component's state to bytes.
    fn save_state(&self) -> Result<Vec<u8>>;

    /// Restore the component's state from bytes.
    fn load_state(&mut self, data: &[u8]) -> Result<()>;
}

/// Complete main loop state.
///
/// This struct contains all information needed to resume training from a checkpoint.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct MainLoopSnapshot {
    /// trainloop version that wrote the snapshot
    pub version: String,
    /// Seconds since the Unix epoch
    pub created_unix_timestamp: u64,
    /// Model parameter values
    pub parameters: Parameters,
    /// Serialized algorithm (optimizer) state
    pub algorithm_state: Vec<u8>,
    /// Position of the data stream
    pub iteration_state: IterationState,
    /// Training log, including the loop status
    pub log: TrainingLog,
}

impl MainLoopSnapshot {
    /// Capture the current state of a main loop.
    pub fn capture(state: &LoopState) -> Result<Self> {
        Ok(Self {
            version: crate::VERSION.to_string(),
            created_unix_timestamp: unix_timestamp(),
            parameters: state.model.parameter_values(),
            algorithm_state: state.algorithm.save_state()?,
            iteration_state: state.data_stream.iteration_state(),
            log: state.log.clone(),
        })
    }

    /// Read a snapshot written by the `Checkpoint` extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let snapshot: Self = crate::serialization::load(path)?;
        if snapshot.version != crate::VERSION {
            tracing::warn!(
                path = %path.display(),
                written_by = %snapshot.version,
                running = crate::VERSION,
                "Snapshot was written by a different version"
            );
        }
        Ok(snapshot)
    }

    /// Put the snapshot's state into a main loop.
    ///
    /// On error `state` is left as it was: a snapshot of a different model,
    /// algorithm or data stream changes nothing.
    pub fn restore_into(self, state: &mut LoopState) -> Result<()> {
        restore_parts(
            state,
            self.parameters,
            &self.algorithm_state,
            &self.iteration_state,
        )?;
        state.log = self.log;
        Ok(())
    }

    /// Like `restore_into`, recording `source` as the resumption point.
    ///
    /// A finish request saved with the snapshot is dropped so that the
    /// resumed loop keeps training.
    pub fn resume_into(self, state: &mut LoopState, source: &Path) -> Result<()> {
        self.restore_into(state)?;
        state.log.status.resumed_from = Some(source.to_path_buf());
        let row = state.log.current_row_mut();
        row.remove(TRAINING_FINISH_REQUESTED);
        row.insert(RESUMED_FROM, source.to_path_buf());
        Ok(())
    }
}

/// Apply parameters, algorithm state and stream position to `state`.
///
/// When a later part fails the earlier ones are rolled back.
pub(crate) fn restore_parts(
    state: &mut LoopState,
    parameters: Parameters,
    algorithm_state: &[u8],
    iteration_state: &IterationState,
) -> Result<()> {
    let previous_parameters = state.model.parameter_values();
    let previous_algorithm = state.algorithm.save_state()?;

    state.model.set_parameter_values(parameters)?;
    let result = state
        .algorithm
        .load_state(algorithm_state)
        .and_then(|()| state.data_stream.restore(iteration_state));
    if result.is_err() {
        let rollback = state
            .model
            .set_parameter_values(previous_parameters)
            .and_then(|()| state.algorithm.load_state(&previous_algorithm));
        if let Err(err) = rollback {
            tracing::warn!(error = %err, "Could not roll back a partial restore");
        }
    }
    result
}

fn unix_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::main_loop::tests::counting_state;
    use tempfile::tempdir;

    #[test]
    fn test_capture_and_restore() {
        let mut source = counting_state(4, 2);
        source.model.parameters_mut().get_mut("count").unwrap()[[0]] = 3.0;
        source.algorithm.load_state(&7u64.to_le_bytes()).unwrap();
        source.data_stream.start_epoch().unwrap();
        source.data_stream.next_batch().unwrap();
        source.log.status.iterations_done = 1;
        source.log.current_row_mut().insert("marker", true);

        let snapshot = MainLoopSnapshot::capture(&source).unwrap();
        assert_eq!(snapshot.version, crate::VERSION);

        let mut target = counting_state(4, 2);
        snapshot.clone().restore_into(&mut target).unwrap();

        assert_eq!(target.model.parameter_values(), snapshot.parameters);
        assert_eq!(target.algorithm.save_state().unwrap(), 7u64.to_le_bytes().to_vec());
        assert_eq!(target.data_stream.iteration_state().position, 2);
        assert!(target.log.current_row().flag("marker"));
    }

    #[test]
    fn test_snapshot_file_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("snapshot.bin");
        let state = counting_state(2, 1);

        let snapshot = MainLoopSnapshot::capture(&state).unwrap();
        crate::serialization::secure_dump(&snapshot, &path).unwrap();
        let loaded = MainLoopSnapshot::load(&path).unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn test_failed_restore_leaves_state_unchanged() {
        let mut source = counting_state(8, 2);
        source.model.parameters_mut().get_mut("count").unwrap()[[0]] = 3.0;
        source.algorithm.load_state(&7u64.to_le_bytes()).unwrap();
        source.data_stream.start_epoch().unwrap();
        source.log.status.iterations_done = 4;
        let snapshot = MainLoopSnapshot::capture(&source).unwrap();

        // Same model and algorithm, but a stream too short for the saved order
        let mut target = counting_state(2, 2);
        let before = MainLoopSnapshot::capture(&target).unwrap();
        assert!(snapshot.restore_into(&mut target).is_err());

        let after = MainLoopSnapshot::capture(&target).unwrap();
        assert_eq!(after.parameters, before.parameters);
        assert_eq!(after.algorithm_state, before.algorithm_state);
        assert_eq!(after.iteration_state, before.iteration_state);
        assert_eq!(after.log, before.log);
    }

    #[test]
    fn test_resume_records_source() {
        let mut state = counting_state(2, 1);
        state
            .log
            .current_row_mut()
            .insert(TRAINING_FINISH_REQUESTED, true);
        let snapshot = MainLoopSnapshot::capture(&state).unwrap();

        let mut target = counting_state(2, 1);
        snapshot
            .resume_into(&mut target, Path::new("run/checkpoint.bin"))
            .unwrap();
        assert_eq!(
            target.log.status.resumed_from.as_deref(),
            Some(Path::new("run/checkpoint.bin"))
        );
        assert!(target.log.current_row().contains_key(RESUMED_FROM));
        assert!(!target.log.current_row().flag(TRAINING_FINISH_REQUESTED));
    }
}
