//! Extensions for saving and loading the state of a training process.

use super::{
    dispatch_scheduled, Callback, ConditionArg, Schedule, SimpleExtension, TrainingExtension,
};
use crate::checkpoint::{MainLoopAttribute, MainLoopSnapshot};
use crate::data::Batch;
use crate::dump::MainLoopDumpManager;
use crate::log::{LogValue, LOADED_FROM, SAVED_TO, TRAINING_FINISH_REQUESTED};
use crate::main_loop::LoopState;
use crate::serialization::secure_dump;
use crate::{Result, TrainLoopError};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Saves a snapshot of the whole main loop state to one file.
///
/// Training can later be resumed from it with
/// [`MainLoop::resume_from_checkpoint`](crate::main_loop::MainLoop::resume_from_checkpoint).
///
/// Makes a `saved_to` record in the current log row: the paths written
/// during this iteration on success (there can be several when a condition
/// passes its own path), `None` on failure. Runs after training by default.
///
/// Attributes listed in `save_separately` are additionally written to their
/// own files, named by inserting `_<attribute>` before the extension of the
/// checkpoint path. The full snapshot is still written as usual.
pub struct Checkpoint {
    path: PathBuf,
    save_separately: Vec<MainLoopAttribute>,
    schedule: Schedule,
}

impl Checkpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let mut schedule = Schedule::new();
        schedule.after_training(true);
        Self {
            path: path.into(),
            save_separately: Vec::new(),
            schedule,
        }
    }

    /// Also save these attributes to their own files.
    ///
    /// Fails on names that are not main loop attributes.
    pub fn save_separately<I, S>(mut self, attributes: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in attributes {
            let attribute: MainLoopAttribute = name.as_ref().parse()?;
            if !self.save_separately.contains(&attribute) {
                self.save_separately.push(attribute);
            }
        }
        Ok(self)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn separately_saved(&self) -> &[MainLoopAttribute] {
        &self.save_separately
    }

    /// Paths for the separately saved attributes, derived from `path`.
    pub fn save_separately_filenames(
        &self,
        path: &Path,
    ) -> Result<BTreeMap<MainLoopAttribute, PathBuf>> {
        self.save_separately
            .iter()
            .map(|attribute| Ok((*attribute, derived_path(path, attribute.name())?)))
            .collect()
    }

    fn destination(&self, from_user: &[ConditionArg]) -> Result<PathBuf> {
        match from_user {
            [] => Ok(self.path.clone()),
            [ConditionArg::Path(path)] => Ok(path.clone()),
            other => Err(TrainLoopError::InvalidArgument(format!(
                "Checkpoint expects a single path argument, got {:?}",
                other
            ))),
        }
    }

    fn save(&self, from_user: &[ConditionArg], state: &mut LoopState) -> Result<PathBuf> {
        let path = self.destination(from_user)?;

        let row = state.log.current_row_mut();
        let mut saved_to = row
            .get(SAVED_TO)
            .map(|value| value.paths().to_vec())
            .unwrap_or_default();
        saved_to.push(path.clone());
        row.insert(SAVED_TO, LogValue::Paths(saved_to));

        let snapshot = MainLoopSnapshot::capture(state)?;
        secure_dump(&snapshot, &path)?;

        let filenames = self.save_separately_filenames(&path)?;
        for attribute in &self.save_separately {
            attribute.write_to(state, &filenames[attribute])?;
        }
        Ok(path)
    }
}

impl SimpleExtension for Checkpoint {
    fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    fn schedule_mut(&mut self) -> &mut Schedule {
        &mut self.schedule
    }

    /// Write the snapshot. A path argument from the condition overrides the
    /// path given at construction.
    fn perform(
        &mut self,
        _callback: Callback,
        _from_main_loop: Option<&Batch>,
        from_user: &[ConditionArg],
        state: &mut LoopState,
    ) -> Result<()> {
        match self.save(from_user, state) {
            Ok(path) => {
                tracing::info!(
                    path = %path.display(),
                    iteration = state.log.status.iterations_done,
                    "Saved checkpoint"
                );
                Ok(())
            }
            Err(err) => {
                state
                    .log
                    .current_row_mut()
                    .insert(SAVED_TO, LogValue::None);
                Err(err)
            }
        }
    }
}

impl TrainingExtension for Checkpoint {
    fn name(&self) -> &str {
        "Checkpoint"
    }

    fn dispatch(
        &mut self,
        callback: Callback,
        batch: Option<&Batch>,
        state: &mut LoopState,
    ) -> Result<()> {
        dispatch_scheduled(self, callback, batch, state)
    }
}

/// Loads a dump into the main loop before training starts.
///
/// Makes a `loaded_from` record in the log with the dump folder. A missing
/// folder is not an error: training simply starts from scratch.
pub struct LoadFromDump {
    manager: MainLoopDumpManager,
}

impl LoadFromDump {
    pub fn new(state_path: impl Into<PathBuf>) -> Self {
        Self {
            manager: MainLoopDumpManager::new(state_path),
        }
    }

    pub fn manager(&self) -> &MainLoopDumpManager {
        &self.manager
    }

    fn load(&self, state: &mut LoopState) -> Result<()> {
        let folder = self.manager.folder();
        if !self.manager.exists() {
            tracing::info!(folder = %folder.display(), "No dump found");
            return Ok(());
        }
        tracing::info!(
            folder = %folder.display(),
            "Loading the state from the dump into the main loop"
        );

        self.manager
            .load_to(state)
            .map_err(|err| TrainLoopError::reraise_as("Failed to load the state", err))?;

        let row = state.log.current_row_mut();
        row.remove(TRAINING_FINISH_REQUESTED);
        row.insert(LOADED_FROM, folder.to_path_buf());
        Ok(())
    }
}

impl TrainingExtension for LoadFromDump {
    fn name(&self) -> &str {
        "LoadFromDump"
    }

    fn dispatch(
        &mut self,
        callback: Callback,
        _batch: Option<&Batch>,
        state: &mut LoopState,
    ) -> Result<()> {
        match callback {
            Callback::BeforeTraining => self.load(state),
            _ => Ok(()),
        }
    }
}

/// Dumps the state of the main loop into a folder.
///
/// Makes a `saved_to` record in the log with the folder on success and
/// `None` on failure. The folder is created if it does not exist. Runs
/// after training by default.
pub struct Dump {
    manager: MainLoopDumpManager,
    schedule: Schedule,
}

impl Dump {
    pub fn new(state_path: impl Into<PathBuf>) -> Self {
        let mut schedule = Schedule::new();
        schedule.after_training(true);
        Self {
            manager: MainLoopDumpManager::new(state_path),
            schedule,
        }
    }

    pub fn manager(&self) -> &MainLoopDumpManager {
        &self.manager
    }
}

impl SimpleExtension for Dump {
    fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    fn schedule_mut(&mut self) -> &mut Schedule {
        &mut self.schedule
    }

    fn perform(
        &mut self,
        _callback: Callback,
        _from_main_loop: Option<&Batch>,
        _from_user: &[ConditionArg],
        state: &mut LoopState,
    ) -> Result<()> {
        state
            .log
            .current_row_mut()
            .insert(SAVED_TO, self.manager.folder().to_path_buf());
        if let Err(err) = self.manager.dump(state) {
            state
                .log
                .current_row_mut()
                .insert(SAVED_TO, LogValue::None);
            return Err(err);
        }
        Ok(())
    }
}

impl TrainingExtension for Dump {
    fn name(&self) -> &str {
        "Dump"
    }

    fn dispatch(
        &mut self,
        callback: Callback,
        batch: Option<&Batch>,
        state: &mut LoopState,
    ) -> Result<()> {
        dispatch_scheduled(self, callback, batch, state)
    }
}

/// `dir/name.ext` -> `dir/name_<suffix>.ext`
fn derived_path(path: &Path, suffix: &str) -> Result<PathBuf> {
    let stem = path.file_stem().ok_or_else(|| {
        TrainLoopError::InvalidArgument(format!(
            "checkpoint path {} has no file name",
            path.display()
        ))
    })?;

    let mut name = OsString::from(stem);
    name.push("_");
    name.push(suffix);
    if let Some(extension) = path.extension() {
        name.push(".");
        name.push(extension);
    }
    Ok(path.with_file_name(name))
}
