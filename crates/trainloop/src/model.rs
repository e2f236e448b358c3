//! Models as collections of named parameters.

use crate::{Result, TrainLoopError};
use ndarray::ArrayD;
use std::collections::BTreeMap;

/// Named parameter values of a model
pub type Parameters = BTreeMap<String, ArrayD<f32>>;

/// A trainable model.
///
/// The main loop only needs access to the named parameters: algorithms
/// update them, checkpoints and dumps persist them.
pub trait Model {
    /// Current parameters
    fn parameters(&self) -> &Parameters;

    /// Mutable access for training algorithms
    fn parameters_mut(&mut self) -> &mut Parameters;

    /// Copy of the current parameter values.
    fn parameter_values(&self) -> Parameters {
        self.parameters().clone()
    }

    /// Replace parameter values.
    ///
    /// Every name must belong to the model and every shape must match,
    /// otherwise nothing is changed. Parameters absent from `values` keep
    /// their current value.
    fn set_parameter_values(&mut self, values: Parameters) -> Result<()> {
        let current = self.parameters();

        let unknown: Vec<String> = values
            .keys()
            .filter(|name| !current.contains_key(*name))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(TrainLoopError::UnknownParameters(unknown));
        }

        for (name, value) in &values {
            let expected = current[name].shape();
            if expected != value.shape() {
                return Err(TrainLoopError::ShapeMismatch {
                    name: name.clone(),
                    expected: expected.to_vec(),
                    actual: value.shape().to_vec(),
                });
            }
        }

        let missing: Vec<&String> = current
            .keys()
            .filter(|name| !values.contains_key(*name))
            .collect();
        if !missing.is_empty() {
            tracing::warn!(?missing, "Some model parameters were not set");
        }

        let parameters = self.parameters_mut();
        for (name, value) in values {
            parameters.insert(name, value);
        }
        Ok(())
    }

    /// Total number of scalar values across all parameters
    fn num_parameters(&self) -> usize {
        self.parameters().values().map(|value| value.len()).sum()
    }
}

/// A model that is nothing more than its parameters.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParameterSet {
    parameters: Parameters,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named parameter
    pub fn with_parameter(mut self, name: impl Into<String>, value: ArrayD<f32>) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ArrayD<f32>> {
        self.parameters.get(name)
    }
}

impl From<Parameters> for ParameterSet {
    fn from(parameters: Parameters) -> Self {
        Self { parameters }
    }
}

impl Model for ParameterSet {
    fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    fn parameters_mut(&mut self) -> &mut Parameters {
        &mut self.parameters
    }
}
