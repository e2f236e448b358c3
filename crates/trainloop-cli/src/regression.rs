//! Linear regression demo trained with SGD and momentum.

use ndarray::{Array1, Array2, ArrayD, Ix1, Ix2, IxDyn};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use trainloop::prelude::*;

pub const FEATURES: &str = "features";
pub const TARGETS: &str = "targets";

/// Noisy samples of a random linear function.
///
/// Returns the sources for an `InMemoryStream`: `features` of shape
/// `[num_examples, num_features]` and `targets` of shape `[num_examples]`.
pub fn synthetic_dataset(
    num_examples: usize,
    num_features: usize,
    seed: u64,
) -> BTreeMap<String, ArrayD<f32>> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let true_weights: Array1<f32> = (0..num_features).map(|_| rng.gen_range(-2.0..2.0)).collect();
    let true_bias: f32 = rng.gen_range(-1.0..1.0);

    let features =
        Array2::from_shape_fn((num_examples, num_features), |_| rng.gen_range(-1.0..1.0));
    let noise: Array1<f32> = (0..num_examples).map(|_| rng.gen_range(-0.05..0.05)).collect();
    let targets = features.dot(&true_weights) + true_bias + noise;

    BTreeMap::from([
        (FEATURES.to_string(), features.into_dyn()),
        (TARGETS.to_string(), targets.into_dyn()),
    ])
}

/// Zero-initialized `weights` and `bias`
pub fn linear_model(num_features: usize) -> ParameterSet {
    ParameterSet::new()
        .with_parameter("weights", ArrayD::zeros(IxDyn(&[num_features])))
        .with_parameter("bias", ArrayD::zeros(IxDyn(&[1])))
}

/// Minimizes the mean squared error of a linear model.
pub struct Sgd {
    learning_rate: f32,
    momentum: f32,
    velocity: Parameters,
    steps: u64,
}

impl Sgd {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate: learning_rate as f32,
            momentum: 0.9,
            velocity: Parameters::new(),
            steps: 0,
        }
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    fn apply(
        &mut self,
        parameters: &mut Parameters,
        name: &str,
        gradient: ArrayD<f32>,
    ) -> Result<()> {
        let value = parameters
            .get_mut(name)
            .ok_or_else(|| TrainLoopError::Training(format!("model has no parameter '{}'", name)))?;
        let velocity = self
            .velocity
            .entry(name.to_string())
            .or_insert_with(|| ArrayD::zeros(value.raw_dim()));

        *velocity = &*velocity * self.momentum + gradient;
        value.scaled_add(-self.learning_rate, &*velocity);
        Ok(())
    }
}

impl Checkpointable for Sgd {
    fn save_state(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&(self.steps, &self.velocity))?)
    }

    fn load_state(&mut self, data: &[u8]) -> Result<()> {
        let (steps, velocity): (u64, Parameters) = bincode::deserialize(data)?;
        self.steps = steps;
        self.velocity = velocity;
        Ok(())
    }
}

impl TrainingAlgorithm for Sgd {
    /// Zero velocity for parameters that have none yet. Velocity loaded
    /// from a dump before training is kept.
    fn initialize(&mut self, model: &mut dyn Model) -> Result<()> {
        for (name, value) in model.parameters() {
            self.velocity
                .entry(name.clone())
                .or_insert_with(|| ArrayD::zeros(value.raw_dim()));
        }
        Ok(())
    }

    fn process_batch(&mut self, model: &mut dyn Model, batch: &Batch) -> Result<BatchRecord> {
        let features = batch
            .source(FEATURES)?
            .view()
            .into_dimensionality::<Ix2>()
            .map_err(|err| TrainLoopError::InvalidData(format!("features: {}", err)))?;
        let targets = batch
            .source(TARGETS)?
            .view()
            .into_dimensionality::<Ix1>()
            .map_err(|err| TrainLoopError::InvalidData(format!("targets: {}", err)))?;

        let parameters = model.parameters_mut();
        let weights = parameter(parameters, "weights")?
            .view()
            .into_dimensionality::<Ix1>()
            .map_err(|err| TrainLoopError::InvalidData(format!("weights: {}", err)))?
            .to_owned();
        let bias = parameter(parameters, "bias")?[[0]];

        let residual = features.dot(&weights) + bias - &targets;
        let n = residual.len() as f32;
        let loss = residual.mapv(|r| r * r).sum() / n;
        let weight_gradient = features.t().dot(&residual) * (2.0 / n);
        let bias_gradient = ArrayD::from_elem(IxDyn(&[1]), 2.0 * residual.sum() / n);

        self.apply(parameters, "weights", weight_gradient.into_dyn())?;
        self.apply(parameters, "bias", bias_gradient)?;
        self.steps += 1;

        Ok(BatchRecord::from([("loss".to_string(), loss as f64)]))
    }
}

fn parameter<'a>(parameters: &'a Parameters, name: &str) -> Result<&'a ArrayD<f32>> {
    parameters
        .get(name)
        .ok_or_else(|| TrainLoopError::Training(format!("model has no parameter '{}'", name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(seed: u64) -> LoopState {
        let stream = InMemoryStream::new(synthetic_dataset(64, 3, seed), 8)
            .unwrap()
            .shuffled(seed);
        LoopState::new(linear_model(3), Sgd::new(0.1), stream)
    }

    fn loss_at(main_loop: &MainLoop, iteration: u64) -> f64 {
        main_loop
            .log()
            .row(iteration)
            .and_then(|row| row.get("loss"))
            .and_then(LogValue::as_f64)
            .unwrap()
    }

    #[test]
    fn test_dataset_shapes() {
        let sources = synthetic_dataset(10, 4, 0);
        assert_eq!(sources[FEATURES].shape(), &[10, 4]);
        assert_eq!(sources[TARGETS].shape(), &[10]);
        assert_eq!(synthetic_dataset(10, 4, 0), sources);
    }

    #[test]
    fn test_loss_decreases() {
        let mut main_loop =
            MainLoop::from_state(state(3)).with_extension(FinishAfter::new().after_n_epochs(10));
        main_loop.run().unwrap();

        let last = main_loop.log().status.iterations_done;
        assert_eq!(last, 80);
        assert!(loss_at(&main_loop, last) < loss_at(&main_loop, 1) * 0.1);
    }

    #[test]
    fn test_state_roundtrip() {
        let mut main_loop =
            MainLoop::from_state(state(1)).with_extension(FinishAfter::new().after_n_batches(3));
        main_loop.run().unwrap();
        let saved = main_loop.state().algorithm.save_state().unwrap();

        let mut restored = Sgd::new(0.1);
        restored.load_state(&saved).unwrap();
        assert_eq!(restored.steps(), 3);
        assert_eq!(restored.save_state().unwrap(), saved);
    }
}
