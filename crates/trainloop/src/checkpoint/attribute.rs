//! Main loop attributes that can be saved on their own.

use crate::main_loop::LoopState;
use crate::serialization::secure_dump;
use crate::{Result, TrainLoopError};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// A part of the main loop state that `Checkpoint` can write to its own file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MainLoopAttribute {
    /// The training log
    Log,
    /// Model parameter values
    Model,
    /// Data stream position
    IterationState,
    /// Algorithm (optimizer) state
    Algorithm,
}

impl MainLoopAttribute {
    pub const ALL: [MainLoopAttribute; 4] = [
        MainLoopAttribute::Log,
        MainLoopAttribute::Model,
        MainLoopAttribute::IterationState,
        MainLoopAttribute::Algorithm,
    ];

    /// Name used in derived file names and configuration
    pub fn name(self) -> &'static str {
        match self {
            MainLoopAttribute::Log => "log",
            MainLoopAttribute::Model => "model",
            MainLoopAttribute::IterationState => "iteration_state",
            MainLoopAttribute::Algorithm => "algorithm",
        }
    }

    /// Serialize this attribute of `state` to `path`.
    pub fn write_to(self, state: &LoopState, path: &Path) -> Result<()> {
        match self {
            MainLoopAttribute::Log => secure_dump(&state.log, path),
            MainLoopAttribute::Model => secure_dump(state.model.parameters(), path),
            MainLoopAttribute::IterationState => {
                secure_dump(&state.data_stream.iteration_state(), path)
            }
            MainLoopAttribute::Algorithm => secure_dump(&state.algorithm.save_state()?, path),
        }
    }
}

impl fmt::Display for MainLoopAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MainLoopAttribute {
    type Err = TrainLoopError;

    fn from_str(s: &str) -> Result<Self> {
        MainLoopAttribute::ALL
            .into_iter()
            .find(|attribute| attribute.name() == s)
            .ok_or_else(|| TrainLoopError::UnknownAttribute(s.to_string()))
    }
}
