//! The training main loop.
//!
//! `MainLoop` pulls batches from a `DataStream`, hands them to a
//! `TrainingAlgorithm` and fires `Callback`s on its extensions around every
//! batch, epoch and the run as a whole.

use crate::algorithm::TrainingAlgorithm;
use crate::checkpoint::MainLoopSnapshot;
use crate::data::{Batch, DataStream};
use crate::extensions::{Callback, TrainingExtension};
use crate::log::{TrainingLog, GOT_EXCEPTION, TRAINING_FINISHED, TRAINING_FINISH_REQUESTED};
use crate::model::Model;
use crate::{Result, TrainLoopError};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Everything extensions can see and change.
pub struct LoopState {
    pub model: Box<dyn Model>,
    pub algorithm: Box<dyn TrainingAlgorithm>,
    pub data_stream: Box<dyn DataStream>,
    pub log: TrainingLog,
}

impl LoopState {
    pub fn new(
        model: impl Model + 'static,
        algorithm: impl TrainingAlgorithm + 'static,
        data_stream: impl DataStream + 'static,
    ) -> Self {
        Self {
            model: Box::new(model),
            algorithm: Box::new(algorithm),
            data_stream: Box::new(data_stream),
            log: TrainingLog::new(),
        }
    }
}

enum Flow {
    Continue,
    Stop,
}

/// Drives training and dispatches lifecycle callbacks.
///
/// # Example
///
/// ```ignore
/// let mut main_loop = MainLoop::new(model, algorithm, stream)
///     .with_extension(FinishAfter::new().after_n_batches(1000))
///     .with_extension(Dump::new("run/dump").every_n_batches(100));
///
/// let stop = main_loop.interrupt_handle();
/// // elsewhere: stop.store(true, Ordering::SeqCst);
/// main_loop.run()?;
/// ```
pub struct MainLoop {
    state: LoopState,
    extensions: Vec<Box<dyn TrainingExtension>>,
    interrupt: Arc<AtomicBool>,
}

impl MainLoop {
    pub fn new(
        model: impl Model + 'static,
        algorithm: impl TrainingAlgorithm + 'static,
        data_stream: impl DataStream + 'static,
    ) -> Self {
        Self::from_state(LoopState::new(model, algorithm, data_stream))
    }

    pub fn from_state(state: LoopState) -> Self {
        Self {
            state,
            extensions: Vec::new(),
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Register an extension. Extensions run in registration order.
    pub fn with_extension(mut self, extension: impl TrainingExtension + 'static) -> Self {
        self.extensions.push(Box::new(extension));
        self
    }

    /// Register several already boxed extensions
    pub fn with_extensions(mut self, extensions: Vec<Box<dyn TrainingExtension>>) -> Self {
        self.extensions.extend(extensions);
        self
    }

    pub fn add_extension(&mut self, extension: Box<dyn TrainingExtension>) {
        self.extensions.push(extension);
    }

    pub fn extensions(&self) -> &[Box<dyn TrainingExtension>] {
        &self.extensions
    }

    pub fn state(&self) -> &LoopState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut LoopState {
        &mut self.state
    }

    pub fn into_state(self) -> LoopState {
        self.state
    }

    pub fn log(&self) -> &TrainingLog {
        &self.state.log
    }

    pub fn model(&self) -> &dyn Model {
        self.state.model.as_ref()
    }

    /// Flag that stops training after the current batch when set.
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    /// Continue from a snapshot written by the `Checkpoint` extension.
    pub fn resume_from_checkpoint(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let snapshot = MainLoopSnapshot::load(path)?;
        snapshot.resume_into(&mut self.state, path)?;
        tracing::info!(
            path = %path.display(),
            iterations = self.state.log.status.iterations_done,
            epochs = self.state.log.status.epochs_done,
            "Resumed from checkpoint"
        );
        Ok(())
    }

    /// Run training until an extension requests a stop, the data stream
    /// runs out of epochs, or the loop is interrupted.
    pub fn run(&mut self) -> Result<()> {
        let start_time = Instant::now();
        match self.run_training() {
            Ok(()) => {
                self.state
                    .log
                    .current_row_mut()
                    .insert(TRAINING_FINISHED, true);
                tracing::info!(
                    iterations = self.state.log.status.iterations_done,
                    epochs = self.state.log.status.epochs_done,
                    elapsed = ?start_time.elapsed(),
                    "Training finished"
                );
                self.run_extensions(Callback::AfterTraining, None)
            }
            Err(err) => {
                tracing::error!(error = %err, "Error occurred during training");
                self.state
                    .log
                    .current_row_mut()
                    .insert(GOT_EXCEPTION, err.to_string());
                if let Err(hook_err) = self.run_extensions(Callback::OnError, None) {
                    tracing::error!(error = %hook_err, "Error in on_error callback");
                }
                Err(err)
            }
        }
    }

    fn run_training(&mut self) -> Result<()> {
        if self.state.log.status.training_started {
            self.run_extensions(Callback::OnResumption, None)?;
        } else {
            self.run_extensions(Callback::BeforeTraining, None)?;
            // Set when a BeforeTraining extension loaded a started run
            let loaded = self.state.log.status.training_started;
            self.state
                .algorithm
                .initialize(self.state.model.as_mut())?;
            self.state.log.status.training_started = true;
            if loaded {
                self.run_extensions(Callback::OnResumption, None)?;
            }
        }

        if self.finish_requested() {
            return Ok(());
        }
        while let Flow::Continue = self.run_epoch()? {}
        Ok(())
    }

    fn run_epoch(&mut self) -> Result<Flow> {
        if !self.state.log.status.epoch_started {
            if !self.state.data_stream.start_epoch()? {
                tracing::info!("Data stream has no more epochs");
                return Ok(Flow::Stop);
            }
            self.state.log.status.epoch_started = true;
            self.run_extensions(Callback::BeforeEpoch, None)?;
        }

        while let Some(batch) = self.state.data_stream.next_batch()? {
            self.run_iteration(&batch)?;
            if self.check_stop()? {
                return Ok(Flow::Stop);
            }
        }
        if !self.state.log.status.received_first_batch {
            return Err(TrainLoopError::EmptyEpoch);
        }

        let status = &mut self.state.log.status;
        status.epoch_started = false;
        status.epochs_done += 1;
        status.epoch_ends.push(status.iterations_done);
        self.run_extensions(Callback::AfterEpoch, None)?;

        if self.check_stop()? {
            Ok(Flow::Stop)
        } else {
            Ok(Flow::Continue)
        }
    }

    fn run_iteration(&mut self, batch: &Batch) -> Result<()> {
        self.state.log.status.received_first_batch = true;
        self.run_extensions(Callback::BeforeBatch, Some(batch))?;

        let record = self
            .state
            .algorithm
            .process_batch(self.state.model.as_mut(), batch)?;
        self.state.log.status.iterations_done += 1;

        let row = self.state.log.current_row_mut();
        for (name, value) in record {
            row.insert(name, value);
        }
        self.run_extensions(Callback::AfterBatch, Some(batch))
    }

    /// Handle a pending interrupt and report whether training should stop.
    fn check_stop(&mut self) -> Result<bool> {
        if self.interrupt.swap(false, Ordering::SeqCst) {
            tracing::warn!(
                iterations = self.state.log.status.iterations_done,
                "Training interrupted"
            );
            self.run_extensions(Callback::OnInterrupt, None)?;
            self.state
                .log
                .current_row_mut()
                .insert(TRAINING_FINISH_REQUESTED, true);
        }
        Ok(self.finish_requested())
    }

    fn finish_requested(&self) -> bool {
        self.state.log.current_row().flag(TRAINING_FINISH_REQUESTED)
    }

    fn run_extensions(&mut self, callback: Callback, batch: Option<&Batch>) -> Result<()> {
        for extension in self.extensions.iter_mut() {
            tracing::trace!(extension = extension.name(), %callback, "Dispatching callback");
            extension.dispatch(callback, batch, &mut self.state)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::algorithm::BatchRecord;
    use crate::checkpoint::Checkpointable;
    use crate::data::InMemoryStream;
    use crate::extensions::FinishAfter;
    use crate::extensions::SimpleExtension;
    use crate::model::ParameterSet;
    use ndarray::{Array, ArrayD, IxDyn};
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use std::rc::Rc;

    /// Adds the batch size to the "count" parameter and counts steps.
    #[derive(Default)]
    pub(crate) struct CountingAlgorithm {
        pub steps: u64,
    }

    impl Checkpointable for CountingAlgorithm {
        fn save_state(&self) -> Result<Vec<u8>> {
            Ok(self.steps.to_le_bytes().to_vec())
        }

        fn load_state(&mut self, data: &[u8]) -> Result<()> {
            let bytes: [u8; 8] = data
                .try_into()
                .map_err(|_| TrainLoopError::InvalidData("expected 8 bytes".into()))?;
            self.steps = u64::from_le_bytes(bytes);
            Ok(())
        }
    }

    impl TrainingAlgorithm for CountingAlgorithm {
        fn process_batch(&mut self, model: &mut dyn Model, batch: &Batch) -> Result<BatchRecord> {
            let count = model
                .parameters_mut()
                .get_mut("count")
                .ok_or_else(|| TrainLoopError::Training("no count parameter".into()))?;
            count[[0]] += batch.len() as f32;
            self.steps += 1;
            Ok(BatchRecord::from([("batch_size".to_string(), batch.len() as f64)]))
        }
    }

    /// Fails on the given step.
    struct FailingAlgorithm {
        fail_at: u64,
        steps: u64,
    }

    impl Checkpointable for FailingAlgorithm {
        fn save_state(&self) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }

        fn load_state(&mut self, _data: &[u8]) -> Result<()> {
            Ok(())
        }
    }

    impl TrainingAlgorithm for FailingAlgorithm {
        fn process_batch(&mut self, _model: &mut dyn Model, _batch: &Batch) -> Result<BatchRecord> {
            self.steps += 1;
            if self.steps == self.fail_at {
                return Err(TrainLoopError::Training("diverged".into()));
            }
            Ok(BatchRecord::new())
        }
    }

    pub(crate) fn counting_stream(num_examples: usize, batch_size: usize) -> InMemoryStream {
        let x: ArrayD<f32> = Array::from_shape_fn(IxDyn(&[num_examples]), |idx| idx[0] as f32);
        InMemoryStream::new(BTreeMap::from([("x".to_string(), x)]), batch_size).unwrap()
    }

    pub(crate) fn counting_model() -> ParameterSet {
        ParameterSet::new().with_parameter("count", ArrayD::zeros(IxDyn(&[1])))
    }

    pub(crate) fn counting_state(num_examples: usize, batch_size: usize) -> LoopState {
        LoopState::new(
            counting_model(),
            CountingAlgorithm::default(),
            counting_stream(num_examples, batch_size),
        )
    }

    pub(crate) fn count_of(state: &LoopState) -> f32 {
        state.model.parameters()["count"][[0]]
    }

    /// Records every callback it receives.
    pub(crate) struct Recorder {
        pub calls: Rc<RefCell<Vec<Callback>>>,
    }

    impl TrainingExtension for Recorder {
        fn name(&self) -> &str {
            "Recorder"
        }

        fn dispatch(
            &mut self,
            callback: Callback,
            _batch: Option<&Batch>,
            _state: &mut LoopState,
        ) -> Result<()> {
            self.calls.borrow_mut().push(callback);
            Ok(())
        }
    }

    #[test]
    fn test_run_until_finish_after_epochs() {
        let mut main_loop = MainLoop::from_state(counting_state(4, 2))
            .with_extension(FinishAfter::new().after_n_epochs(2));
        main_loop.run().unwrap();

        let status = &main_loop.log().status;
        assert_eq!(status.iterations_done, 4);
        assert_eq!(status.epochs_done, 2);
        assert_eq!(status.epoch_ends, vec![2, 4]);
        assert!(status.training_started);
        assert!(!status.epoch_started);
        assert_eq!(count_of(main_loop.state()), 8.0);
        assert!(main_loop.log().current_row().flag(TRAINING_FINISHED));
        assert_eq!(
            main_loop.log().row(1).and_then(|row| row.get("batch_size")),
            Some(&crate::log::LogValue::Float(2.0))
        );
    }

    #[test]
    fn test_callback_order() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let stream = counting_stream(2, 1).max_epochs(1);
        let mut main_loop =
            MainLoop::new(counting_model(), CountingAlgorithm::default(), stream).with_extension(
                Recorder {
                    calls: Rc::clone(&calls),
                },
            );
        main_loop.run().unwrap();

        use Callback::*;
        assert_eq!(
            *calls.borrow(),
            vec![
                BeforeTraining,
                BeforeEpoch,
                BeforeBatch,
                AfterBatch,
                BeforeBatch,
                AfterBatch,
                AfterEpoch,
                AfterTraining,
            ]
        );
    }

    #[test]
    fn test_finish_after_batches_stops_mid_epoch() {
        let mut main_loop = MainLoop::from_state(counting_state(10, 2))
            .with_extension(FinishAfter::new().after_n_batches(3));
        main_loop.run().unwrap();

        let status = &main_loop.log().status;
        assert_eq!(status.iterations_done, 3);
        assert_eq!(status.epochs_done, 0);
        assert!(status.epoch_started);
        assert_eq!(main_loop.state().data_stream.iteration_state().position, 6);
    }

    #[test]
    fn test_error_fires_on_error_and_skips_after_training() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut main_loop = MainLoop::new(
            counting_model(),
            FailingAlgorithm {
                fail_at: 2,
                steps: 0,
            },
            counting_stream(4, 1),
        )
        .with_extension(Recorder {
            calls: Rc::clone(&calls),
        });

        let err = main_loop.run().unwrap_err();
        assert!(matches!(err, TrainLoopError::Training(ref msg) if msg == "diverged"));
        assert!(main_loop
            .log()
            .current_row()
            .get(GOT_EXCEPTION)
            .is_some());
        assert_eq!(calls.borrow().last(), Some(&Callback::OnError));
        assert!(!calls.borrow().contains(&Callback::AfterTraining));
    }

    #[test]
    fn test_interrupt_stops_after_current_batch() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut main_loop = MainLoop::from_state(counting_state(6, 1)).with_extension(Recorder {
            calls: Rc::clone(&calls),
        });
        main_loop.interrupt_handle().store(true, Ordering::SeqCst);
        main_loop.run().unwrap();

        assert_eq!(main_loop.log().status.iterations_done, 1);
        let calls = calls.borrow();
        assert!(calls.contains(&Callback::OnInterrupt));
        assert_eq!(calls.last(), Some(&Callback::AfterTraining));
    }

    #[test]
    fn test_empty_first_epoch_is_an_error() {
        let mut main_loop = MainLoop::from_state(counting_state(0, 1));
        let err = main_loop.run().unwrap_err();
        assert!(matches!(err, TrainLoopError::EmptyEpoch));
    }

    #[test]
    fn test_second_run_fires_on_resumption() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut main_loop = MainLoop::from_state(counting_state(2, 1))
            .with_extension(FinishAfter::new().after_n_batches(1))
            .with_extension(Recorder {
                calls: Rc::clone(&calls),
            });
        main_loop.run().unwrap();
        calls.borrow_mut().clear();

        // The finish request lives in the current row, so nothing more runs
        main_loop.run().unwrap();
        assert_eq!(
            *calls.borrow(),
            vec![Callback::OnResumption, Callback::AfterTraining]
        );
    }
}
