//! Extensions that control and report on training.

use super::{
    dispatch_scheduled, Callback, ConditionArg, Schedule, SimpleExtension, TrainingExtension,
};
use crate::data::Batch;
use crate::log::{TrainingStatus, TRAINING_FINISH_REQUESTED};
use crate::main_loop::LoopState;
use crate::Result;

/// Requests the end of training when one of its conditions holds.
///
/// On resumption the epoch and batch limits are checked against the
/// restored status, so a run that already reached them stops at once.
///
/// ```ignore
/// let finish = FinishAfter::new().after_n_epochs(10);
/// ```
#[derive(Debug, Default)]
pub struct FinishAfter {
    schedule: Schedule,
    epochs: Option<u64>,
    batches: Option<u64>,
}

impl FinishAfter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the status is at or past one of the limits
    pub fn limit_reached(&self, status: &TrainingStatus) -> bool {
        self.epochs.is_some_and(|n| status.epochs_done >= n)
            || self.batches.is_some_and(|n| status.iterations_done >= n)
    }

    fn request_finish(state: &mut LoopState) {
        state
            .log
            .current_row_mut()
            .insert(TRAINING_FINISH_REQUESTED, true);
    }
}

impl SimpleExtension for FinishAfter {
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
        Self::request_finish(state);
        Ok(())
    }

    fn after_n_epochs(mut self, n: u64) -> Self {
        self.schedule.after_n_epochs(n);
        self.epochs = (n > 0).then_some(n);
        self
    }

    fn after_n_batches(mut self, n: u64) -> Self {
        self.schedule.after_n_batches(n);
        self.batches = (n > 0).then_some(n);
        self
    }
}

impl TrainingExtension for FinishAfter {
    fn name(&self) -> &str {
        "FinishAfter"
    }

    fn dispatch(
        &mut self,
        callback: Callback,
        batch: Option<&Batch>,
        state: &mut LoopState,
    ) -> Result<()> {
        if callback == Callback::OnResumption && self.limit_reached(&state.log.status) {
            tracing::info!(
                iterations = state.log.status.iterations_done,
                epochs = state.log.status.epochs_done,
                "Restored run has already reached its limit"
            );
            Self::request_finish(state);
        }
        dispatch_scheduled(self, callback, batch, state)
    }
}

/// Reports the loop status and the current log row through `tracing`.
#[derive(Debug)]
pub struct Printing {
    schedule: Schedule,
}

impl Default for Printing {
    fn default() -> Self {
        Self::new()
    }
}

impl Printing {
    /// Prints before the first epoch, after every epoch, after training
    /// and on interrupt.
    pub fn new() -> Self {
        let mut schedule = Schedule::new();
        schedule
            .before_first_epoch(true)
            .after_epoch(true)
            .after_training(true)
            .on_interrupt(true);
        Self { schedule }
    }

    /// One line with the row's records in key order
    pub fn format_row(state: &LoopState) -> String {
        let status = &state.log.status;
        let mut output = format!(
            "Iteration {}, epoch {}",
            status.iterations_done, status.epochs_done
        );
        for (key, value) in state.log.current_row().iter() {
            output.push_str(&format!(", {}={}", key, value));
        }
        output
    }
}

impl SimpleExtension for Printing {
    fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    fn schedule_mut(&mut self) -> &mut Schedule {
        &mut self.schedule
    }

    fn perform(
        &mut self,
        callback: Callback,
        _from_main_loop: Option<&Batch>,
        _from_user: &[ConditionArg],
        state: &mut LoopState,
    ) -> Result<()> {
        match callback {
            Callback::BeforeEpoch => tracing::info!("Before the first epoch"),
            Callback::AfterTraining => tracing::info!("Training has finished"),
            Callback::OnInterrupt => tracing::info!("Training was interrupted"),
            _ => {}
        }
        tracing::info!("{}", Self::format_row(state));
        Ok(())
    }
}

impl TrainingExtension for Printing {
    fn name(&self) -> &str {
        "Printing"
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::main_loop::tests::counting_state;
    use crate::main_loop::MainLoop;

    #[test]
    fn test_finish_after_requests_stop() {
        let mut state = counting_state(4, 1);
        let mut finish = FinishAfter::new().after_n_batches(2);

        state.log.status.iterations_done = 1;
        finish.dispatch(Callback::AfterBatch, None, &mut state).unwrap();
        assert!(!state.log.current_row().flag(TRAINING_FINISH_REQUESTED));

        state.log.status.iterations_done = 2;
        finish.dispatch(Callback::AfterBatch, None, &mut state).unwrap();
        assert!(state.log.current_row().flag(TRAINING_FINISH_REQUESTED));
    }

    #[test]
    fn test_finish_after_checks_restored_status_on_resumption() {
        let mut finish = FinishAfter::new().after_n_epochs(2);
        let mut state = counting_state(4, 1);

        state.log.status.epochs_done = 1;
        finish.dispatch(Callback::OnResumption, None, &mut state).unwrap();
        assert!(!state.log.current_row().flag(TRAINING_FINISH_REQUESTED));

        // Past the limit counts too
        state.log.status.epochs_done = 3;
        finish.dispatch(Callback::OnResumption, None, &mut state).unwrap();
        assert!(state.log.current_row().flag(TRAINING_FINISH_REQUESTED));

        let unlimited = FinishAfter::new().after_n_batches(5).after_n_batches(0);
        state.log.status.iterations_done = 100;
        assert!(!unlimited.limit_reached(&state.log.status));
    }

    #[test]
    fn test_finish_after_without_conditions_never_stops() {
        let mut main_loop = MainLoop::from_state(counting_state(3, 1))
            .with_extension(FinishAfter::new())
            .with_extension(FinishAfter::new().after_n_epochs(1));
        main_loop.run().unwrap();
        assert_eq!(main_loop.log().status.epochs_done, 1);
    }

    #[test]
    fn test_printing_schedule() {
        let printing = Printing::new();
        assert_eq!(printing.schedule().len(), 4);
        let printing = printing.after_epoch(false);
        assert_eq!(printing.schedule().len(), 3);
    }

    #[test]
    fn test_format_row_sorted() {
        let mut state = counting_state(2, 1);
        state.log.status.iterations_done = 3;
        let row = state.log.current_row_mut();
        row.insert("zeta", 1i64);
        row.insert("alpha", 0.5);

        assert_eq!(
            Printing::format_row(&state),
            "Iteration 3, epoch 0, alpha=0.5000, zeta=1"
        );
    }

    #[test]
    fn test_printing_in_main_loop() {
        let mut main_loop = MainLoop::from_state(counting_state(2, 1))
            .with_extension(FinishAfter::new().after_n_epochs(1))
            .with_extension(Printing::new());
        main_loop.run().unwrap();
        assert_eq!(main_loop.log().status.iterations_done, 2);
    }
}
