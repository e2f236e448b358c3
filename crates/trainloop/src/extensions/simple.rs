//! Extensions that act whenever one of their scheduled conditions holds.

use super::{Callback, ConditionArg, Predicate, Schedule};
use crate::data::Batch;
use crate::main_loop::LoopState;
use crate::Result;

/// An extension driven by a `Schedule`.
///
/// Implementors provide `perform`; the builder methods below configure the
/// schedule. Implement `TrainingExtension::dispatch` with
/// [`dispatch_scheduled`].
pub trait SimpleExtension {
    fn schedule(&self) -> &Schedule;

    fn schedule_mut(&mut self) -> &mut Schedule;

    /// Do the extension's work.
    ///
    /// `from_main_loop` is the batch for batch callbacks, `from_user` the
    /// arguments of the condition that matched.
    fn perform(
        &mut self,
        callback: Callback,
        from_main_loop: Option<&Batch>,
        from_user: &[ConditionArg],
        state: &mut LoopState,
    ) -> Result<()>;

    fn before_training(mut self, enabled: bool) -> Self
    where
        Self: Sized,
    {
        self.schedule_mut().before_training(enabled);
        self
    }

    fn before_first_epoch(mut self, enabled: bool) -> Self
    where
        Self: Sized,
    {
        self.schedule_mut().before_first_epoch(enabled);
        self
    }

    fn before_epoch(mut self, enabled: bool) -> Self
    where
        Self: Sized,
    {
        self.schedule_mut().before_epoch(enabled);
        self
    }

    fn before_batch(mut self, enabled: bool) -> Self
    where
        Self: Sized,
    {
        self.schedule_mut().before_batch(enabled);
        self
    }

    fn after_batch(mut self, enabled: bool) -> Self
    where
        Self: Sized,
    {
        self.schedule_mut().after_batch(enabled);
        self
    }

    fn after_epoch(mut self, enabled: bool) -> Self
    where
        Self: Sized,
    {
        self.schedule_mut().after_epoch(enabled);
        self
    }

    fn after_training(mut self, enabled: bool) -> Self
    where
        Self: Sized,
    {
        self.schedule_mut().after_training(enabled);
        self
    }

    fn on_resumption(mut self, enabled: bool) -> Self
    where
        Self: Sized,
    {
        self.schedule_mut().on_resumption(enabled);
        self
    }

    fn on_interrupt(mut self, enabled: bool) -> Self
    where
        Self: Sized,
    {
        self.schedule_mut().on_interrupt(enabled);
        self
    }

    fn on_error(mut self, enabled: bool) -> Self
    where
        Self: Sized,
    {
        self.schedule_mut().on_error(enabled);
        self
    }

    fn after_n_epochs(mut self, n: u64) -> Self
    where
        Self: Sized,
    {
        self.schedule_mut().after_n_epochs(n);
        self
    }

    fn after_n_batches(mut self, n: u64) -> Self
    where
        Self: Sized,
    {
        self.schedule_mut().after_n_batches(n);
        self
    }

    fn every_n_epochs(mut self, n: u64) -> Self
    where
        Self: Sized,
    {
        self.schedule_mut().every_n_epochs(n);
        self
    }

    fn every_n_batches(mut self, n: u64) -> Self
    where
        Self: Sized,
    {
        self.schedule_mut().every_n_batches(n);
        self
    }

    fn add_condition(
        mut self,
        callback: Callback,
        predicate: Option<Predicate>,
        arguments: Vec<ConditionArg>,
    ) -> Self
    where
        Self: Sized,
    {
        self.schedule_mut()
            .add_condition(callback, predicate, arguments);
        self
    }
}

/// Run `perform` once for every condition of the extension's schedule that
/// matches `callback` in the current state.
pub fn dispatch_scheduled<E: SimpleExtension + ?Sized>(
    extension: &mut E,
    callback: Callback,
    batch: Option<&Batch>,
    state: &mut LoopState,
) -> Result<()> {
    let calls: Vec<Vec<ConditionArg>> = extension
        .schedule()
        .matching(callback, &state.log)
        .map(<[ConditionArg]>::to_vec)
        .collect();

    let from_main_loop = if callback.takes_batch() { batch } else { None };
    for from_user in calls {
        extension.perform(callback, from_main_loop, &from_user, state)?;
    }
    Ok(())
}
