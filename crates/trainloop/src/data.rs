//! Data streams feeding batches to the main loop.

use crate::{Result, TrainLoopError};
use ndarray::{ArrayD, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A batch of examples, one array per named source.
///
/// The first axis of every source indexes examples.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Batch {
    sources: BTreeMap<String, ArrayD<f32>>,
}

impl Batch {
    pub fn new(sources: BTreeMap<String, ArrayD<f32>>) -> Self {
        Self { sources }
    }

    pub fn get(&self, source: &str) -> Option<&ArrayD<f32>> {
        self.sources.get(source)
    }

    /// Like `get`, but a missing source is an error.
    pub fn source(&self, source: &str) -> Result<&ArrayD<f32>> {
        self.get(source)
            .ok_or_else(|| TrainLoopError::InvalidData(format!("batch has no source '{}'", source)))
    }

    /// Number of examples in the batch
    pub fn len(&self) -> usize {
        self.sources
            .values()
            .next()
            .map(|array| array.len_of(Axis(0)))
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn source_names(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }
}

/// Position of a data stream, enough to continue an interrupted epoch.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationState {
    /// Number of epochs started so far
    pub epochs_started: u64,
    /// Index into `order` of the next example
    pub position: usize,
    /// Example order of the current epoch
    pub order: Vec<usize>,
}

/// A source of epochs of batches.
pub trait DataStream {
    /// Begin a new epoch. Returns `false` if the stream has no more epochs.
    fn start_epoch(&mut self) -> Result<bool>;

    /// Next batch of the current epoch, or `None` when the epoch is over.
    fn next_batch(&mut self) -> Result<Option<Batch>>;

    /// Where the stream currently is
    fn iteration_state(&self) -> IterationState;

    /// Continue from a previously captured state.
    fn restore(&mut self, state: &IterationState) -> Result<()>;
}

/// Stream over arrays held in memory.
///
/// Iterates over the examples in fixed-size batches (the last one may be
/// smaller), optionally shuffling at the start of every epoch. Shuffling is
/// seeded per epoch, so a restored stream produces the same order.
#[derive(Clone, Debug)]
pub struct InMemoryStream {
    sources: BTreeMap<String, ArrayD<f32>>,
    num_examples: usize,
    batch_size: usize,
    shuffle_seed: Option<u64>,
    max_epochs: Option<u64>,
    state: IterationState,
}

impl InMemoryStream {
    /// Create a stream over `sources`, all of which must hold the same
    /// number of examples.
    pub fn new(sources: BTreeMap<String, ArrayD<f32>>, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(TrainLoopError::InvalidData(
                "batch size must be greater than 0".into(),
            ));
        }
        let mut lengths = sources.iter().map(|(name, array)| {
            if array.ndim() == 0 {
                Err(TrainLoopError::InvalidData(format!(
                    "source '{}' has no example axis",
                    name
                )))
            } else {
                Ok((name, array.len_of(Axis(0))))
            }
        });
        let (first_name, num_examples) = lengths
            .next()
            .ok_or_else(|| {
                TrainLoopError::InvalidData("stream needs at least one source".into())
            })??;
        for entry in lengths {
            let (name, len) = entry?;
            if len != num_examples {
                return Err(TrainLoopError::InvalidData(format!(
                    "source '{}' has {} examples but '{}' has {}",
                    name, len, first_name, num_examples
                )));
            }
        }

        Ok(Self {
            sources,
            num_examples,
            batch_size,
            shuffle_seed: None,
            max_epochs: None,
            state: IterationState::default(),
        })
    }

    /// Shuffle examples every epoch using `seed`
    pub fn shuffled(mut self, seed: u64) -> Self {
        self.shuffle_seed = Some(seed);
        self
    }

    /// Stop after `epochs` epochs
    pub fn max_epochs(mut self, epochs: u64) -> Self {
        self.max_epochs = Some(epochs);
        self
    }

    pub fn num_examples(&self) -> usize {
        self.num_examples
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn epoch_order(&self, epoch: u64) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.num_examples).collect();
        if let Some(seed) = self.shuffle_seed {
            let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(epoch));
            order.shuffle(&mut rng);
        }
        order
    }
}

impl DataStream for InMemoryStream {
    fn start_epoch(&mut self) -> Result<bool> {
        if let Some(max) = self.max_epochs {
            if self.state.epochs_started >= max {
                return Ok(false);
            }
        }
        self.state.order = self.epoch_order(self.state.epochs_started);
        self.state.position = 0;
        self.state.epochs_started += 1;
        Ok(true)
    }

    fn next_batch(&mut self) -> Result<Option<Batch>> {
        let start = self.state.position;
        if start >= self.state.order.len() {
            return Ok(None);
        }
        let end = (start + self.batch_size).min(self.state.order.len());
        let indices = &self.state.order[start..end];

        let sources = self
            .sources
            .iter()
            .map(|(name, array)| (name.clone(), array.select(Axis(0), indices)))
            .collect();
        self.state.position = end;
        Ok(Some(Batch::new(sources)))
    }

    fn iteration_state(&self) -> IterationState {
        self.state.clone()
    }

    fn restore(&mut self, state: &IterationState) -> Result<()> {
        if state.position > state.order.len() {
            return Err(TrainLoopError::InvalidData(format!(
                "iteration position {} is past the end of the epoch ({} examples)",
                state.position,
                state.order.len()
            )));
        }
        if let Some(bad) = state.order.iter().find(|&&index| index >= self.num_examples) {
            return Err(TrainLoopError::InvalidData(format!(
                "iteration state refers to example {} but the stream has {}",
                bad, self.num_examples
            )));
        }
        self.state = state.clone();
        Ok(())
    }
}
