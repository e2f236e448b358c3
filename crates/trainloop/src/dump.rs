//! Directory-based dumps of the main loop state.
//!
//! A dump is a folder holding the model parameters, the algorithm state,
//! the data stream position and the training log, each in its own file.

use crate::checkpoint::restore_parts;
use crate::data::IterationState;
use crate::log::TrainingLog;
use crate::main_loop::LoopState;
use crate::model::Parameters;
use crate::serialization::{load, secure_dump};
use crate::Result;
use std::fs;
use std::path::{Path, PathBuf};

const PARAMETERS_FILENAME: &str = "parameters.bin";
const ALGORITHM_FILENAME: &str = "algorithm.bin";
const ITERATION_STATE_FILENAME: &str = "iteration_state.json";
const LOG_FILENAME: &str = "log.json";

/// Contents of a dump folder.
#[derive(Clone, Debug, PartialEq)]
pub struct MainLoopDump {
    pub parameters: Parameters,
    pub algorithm_state: Vec<u8>,
    pub iteration_state: IterationState,
    pub log: TrainingLog,
}

/// Reads and writes dumps in one folder.
#[derive(Clone, Debug)]
pub struct MainLoopDumpManager {
    folder: PathBuf,
}

impl MainLoopDumpManager {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn path_to_parameters(&self) -> PathBuf {
        self.folder.join(PARAMETERS_FILENAME)
    }

    pub fn path_to_algorithm_state(&self) -> PathBuf {
        self.folder.join(ALGORITHM_FILENAME)
    }

    pub fn path_to_iteration_state(&self) -> PathBuf {
        self.folder.join(ITERATION_STATE_FILENAME)
    }

    pub fn path_to_log(&self) -> PathBuf {
        self.folder.join(LOG_FILENAME)
    }

    /// Whether the folder exists at all
    pub fn exists(&self) -> bool {
        self.folder.exists()
    }

    /// Write the state of `state` into the folder, creating it if needed.
    pub fn dump(&self, state: &LoopState) -> Result<()> {
        fs::create_dir_all(&self.folder)?;
        secure_dump(state.model.parameters(), self.path_to_parameters())?;
        secure_dump(&state.algorithm.save_state()?, self.path_to_algorithm_state())?;
        secure_dump(
            &state.data_stream.iteration_state(),
            self.path_to_iteration_state(),
        )?;
        secure_dump(&state.log, self.path_to_log())?;
        tracing::info!(folder = %self.folder.display(), "Dumped main loop state");
        Ok(())
    }

    /// Read every part of the dump.
    pub fn load(&self) -> Result<MainLoopDump> {
        Ok(MainLoopDump {
            parameters: load(self.path_to_parameters())?,
            algorithm_state: load(self.path_to_algorithm_state())?,
            iteration_state: load(self.path_to_iteration_state())?,
            log: load(self.path_to_log())?,
        })
    }

    /// Read the dump and put it into `state`, which is left unchanged on
    /// error.
    pub fn load_to(&self, state: &mut LoopState) -> Result<()> {
        let dump = self.load()?;
        restore_parts(
            state,
            dump.parameters,
            &dump.algorithm_state,
            &dump.iteration_state,
        )?;
        state.log = dump.log;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::main_loop::tests::counting_state;
    use tempfile::tempdir;

    #[test]
    fn test_dump_creates_nested_folder() {
        let dir = tempdir().unwrap();
        let manager = MainLoopDumpManager::new(dir.path().join("runs").join("dump"));
        assert!(!manager.exists());

        manager.dump(&counting_state(2, 1)).unwrap();

        assert!(manager.path_to_parameters().is_file());
        assert!(manager.path_to_algorithm_state().is_file());
        assert!(manager.path_to_iteration_state().is_file());
        assert!(manager.path_to_log().is_file());
    }

    #[test]
    fn test_load_to_restores_state() {
        let dir = tempdir().unwrap();
        let manager = MainLoopDumpManager::new(dir.path().join("dump"));

        let mut source = counting_state(4, 2);
        source.model.parameters_mut().get_mut("count").unwrap()[[0]] = 2.0;
        source.data_stream.start_epoch().unwrap();
        source.data_stream.next_batch().unwrap();
        source.log.status.iterations_done = 1;
        source.log.status.epoch_started = true;
        manager.dump(&source).unwrap();

        let mut target = counting_state(4, 2);
        manager.load_to(&mut target).unwrap();

        assert_eq!(target.model.parameter_values(), source.model.parameter_values());
        assert_eq!(
            target.data_stream.iteration_state(),
            source.data_stream.iteration_state()
        );
        assert_eq!(target.log, source.log);
    }

    #[test]
    fn test_load_to_mismatched_stream_changes_nothing() {
        let dir = tempdir().unwrap();
        let manager = MainLoopDumpManager::new(dir.path().join("dump"));

        let mut source = counting_state(8, 2);
        source.model.parameters_mut().get_mut("count").unwrap()[[0]] = 6.0;
        source.algorithm.load_state(&3u64.to_le_bytes()).unwrap();
        source.data_stream.start_epoch().unwrap();
        source.log.status.iterations_done = 3;
        manager.dump(&source).unwrap();

        let mut target = counting_state(4, 2);
        assert!(manager.load_to(&mut target).is_err());

        assert_eq!(target.model.parameters()["count"][[0]], 0.0);
        assert_eq!(target.algorithm.save_state().unwrap(), 0u64.to_le_bytes().to_vec());
        assert_eq!(target.log.status.iterations_done, 0);
    }

    #[test]
    fn test_load_incomplete_dump_fails() {
        let dir = tempdir().unwrap();
        let manager = MainLoopDumpManager::new(dir.path());
        manager.dump(&counting_state(2, 1)).unwrap();
        fs::remove_file(manager.path_to_log()).unwrap();

        assert!(manager.load().is_err());
    }
}
