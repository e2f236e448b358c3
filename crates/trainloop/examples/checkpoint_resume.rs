use ndarray::{Array, ArrayD, IxDyn};
use std::collections::BTreeMap;
use trainloop::log::SAVED_TO;
use trainloop::prelude::*;

/// Accumulates the sum of every batch into a single parameter.
#[derive(Default)]
struct RunningSum {
    batches: u64,
}

impl Checkpointable for RunningSum {
    fn save_state(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&self.batches)?)
    }

    fn load_state(&mut self, data: &[u8]) -> Result<()> {
        self.batches = bincode::deserialize(data)?;
        Ok(())
    }
}

impl TrainingAlgorithm for RunningSum {
    fn process_batch(&mut self, model: &mut dyn Model, batch: &Batch) -> Result<BatchRecord> {
        let sum = batch.source("x")?.sum();
        if let Some(total) = model.parameters_mut().get_mut("total") {
            total[[0]] += sum;
        }
        self.batches += 1;
        Ok(BatchRecord::from([("batch_sum".to_string(), sum as f64)]))
    }
}

fn state() -> Result<LoopState> {
    let x: ArrayD<f32> = Array::from_shape_fn(IxDyn(&[10]), |idx| idx[0] as f32);
    let stream = InMemoryStream::new(BTreeMap::from([("x".to_string(), x)]), 3)?.shuffled(0);
    let model = ParameterSet::new().with_parameter("total", ArrayD::zeros(IxDyn(&[1])));
    Ok(LoopState::new(model, RunningSum::default(), stream))
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("checkpoint.bin");

    println!("--- First run: 5 batches, then checkpoint ---");
    let mut first = MainLoop::from_state(state()?)
        .with_extension(FinishAfter::new().after_n_batches(5))
        .with_extension(Checkpoint::new(&path).save_separately(["model"])?);
    first.run()?;
    println!(
        "saved_to = {}",
        first.log().current_row().get(SAVED_TO).map(ToString::to_string).unwrap_or_default()
    );

    println!("--- Second run: resume and finish 3 epochs ---");
    let mut second = MainLoop::from_state(state()?)
        .with_extension(FinishAfter::new().after_n_epochs(3));
    second.resume_from_checkpoint(&path)?;
    second.run()?;

    let status = &second.log().status;
    println!(
        "iterations = {}, epochs = {}, total = {}",
        status.iterations_done,
        status.epochs_done,
        second.model().parameters()["total"][[0]]
    );
    Ok(())
}
