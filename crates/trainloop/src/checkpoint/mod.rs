//! Checkpointing system for resumable training.
//!
//! Provides:
//! - `Checkpointable` trait for components that can be saved/restored
//! - `MainLoopSnapshot` for complete main loop state serialization
//! - `MainLoopAttribute` for parts of the state saved to their own files

mod attribute;
mod state;

pub use attribute::MainLoopAttribute;
pub(crate) use state::restore_parts;
pub use state::{Checkpointable, MainLoopSnapshot};
