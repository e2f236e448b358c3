//! Conditions under which a simple extension acts.

use super::{Callback, ConditionArg};
use crate::log::TrainingLog;
use std::fmt;

/// Extra test on the log that a condition must pass.
pub type Predicate = Box<dyn Fn(&TrainingLog) -> bool>;

/// Which builder call created a condition, so it can be replaced or removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Trigger {
    BeforeTraining,
    BeforeFirstEpoch,
    BeforeEpoch,
    BeforeBatch,
    AfterBatch,
    AfterEpoch,
    AfterTraining,
    OnResumption,
    OnInterrupt,
    OnError,
    AfterNEpochs,
    AfterNBatches,
    EveryNEpochs,
    EveryNBatches,
}

struct Condition {
    callback: Callback,
    predicate: Option<Predicate>,
    arguments: Vec<ConditionArg>,
    trigger: Option<Trigger>,
}

impl Condition {
    fn matches(&self, callback: Callback, log: &TrainingLog) -> bool {
        self.callback == callback
            && self
                .predicate
                .as_ref()
                .map_or(true, |predicate| predicate(log))
    }
}

/// A list of conditions, each a callback plus an optional predicate on the
/// log and optional arguments.
///
/// ```
/// use trainloop::extensions::Schedule;
///
/// let mut schedule = Schedule::new();
/// schedule.after_training(true).every_n_epochs(5);
/// assert_eq!(schedule.len(), 2);
/// ```
#[derive(Default)]
pub struct Schedule {
    conditions: Vec<Condition>,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Act on `callback` when `predicate` (if any) holds, passing `arguments`.
    pub fn add_condition(
        &mut self,
        callback: Callback,
        predicate: Option<Predicate>,
        arguments: Vec<ConditionArg>,
    ) -> &mut Self {
        self.conditions.push(Condition {
            callback,
            predicate,
            arguments,
            trigger: None,
        });
        self
    }

    /// Arguments of every condition matching `callback` in the current state
    pub fn matching<'a>(
        &'a self,
        callback: Callback,
        log: &'a TrainingLog,
    ) -> impl Iterator<Item = &'a [ConditionArg]> + 'a {
        self.conditions
            .iter()
            .filter(move |condition| condition.matches(callback, log))
            .map(|condition| condition.arguments.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn before_training(&mut self, enabled: bool) -> &mut Self {
        self.toggle(Trigger::BeforeTraining, Callback::BeforeTraining, enabled, None)
    }

    /// Before the epoch that starts with no epochs done
    pub fn before_first_epoch(&mut self, enabled: bool) -> &mut Self {
        let predicate: Predicate = Box::new(|log| log.status.epochs_done == 0);
        self.toggle(
            Trigger::BeforeFirstEpoch,
            Callback::BeforeEpoch,
            enabled,
            Some(predicate),
        )
    }

    pub fn before_epoch(&mut self, enabled: bool) -> &mut Self {
        self.toggle(Trigger::BeforeEpoch, Callback::BeforeEpoch, enabled, None)
    }

    pub fn before_batch(&mut self, enabled: bool) -> &mut Self {
        self.toggle(Trigger::BeforeBatch, Callback::BeforeBatch, enabled, None)
    }

    pub fn after_batch(&mut self, enabled: bool) -> &mut Self {
        self.toggle(Trigger::AfterBatch, Callback::AfterBatch, enabled, None)
    }

    pub fn after_epoch(&mut self, enabled: bool) -> &mut Self {
        self.toggle(Trigger::AfterEpoch, Callback::AfterEpoch, enabled, None)
    }

    pub fn after_training(&mut self, enabled: bool) -> &mut Self {
        self.toggle(Trigger::AfterTraining, Callback::AfterTraining, enabled, None)
    }

    pub fn on_resumption(&mut self, enabled: bool) -> &mut Self {
        self.toggle(Trigger::OnResumption, Callback::OnResumption, enabled, None)
    }

    pub fn on_interrupt(&mut self, enabled: bool) -> &mut Self {
        self.toggle(Trigger::OnInterrupt, Callback::OnInterrupt, enabled, None)
    }

    pub fn on_error(&mut self, enabled: bool) -> &mut Self {
        self.toggle(Trigger::OnError, Callback::OnError, enabled, None)
    }

    /// Once, after epoch `n` ends. `0` removes the condition.
    pub fn after_n_epochs(&mut self, n: u64) -> &mut Self {
        let predicate: Predicate = Box::new(move |log| log.status.epochs_done == n);
        self.toggle(Trigger::AfterNEpochs, Callback::AfterEpoch, n > 0, Some(predicate))
    }

    /// Once, after batch `n` is processed. `0` removes the condition.
    pub fn after_n_batches(&mut self, n: u64) -> &mut Self {
        let predicate: Predicate = Box::new(move |log| log.status.iterations_done == n);
        self.toggle(Trigger::AfterNBatches, Callback::AfterBatch, n > 0, Some(predicate))
    }

    /// After every `n`-th epoch. `0` removes the condition.
    pub fn every_n_epochs(&mut self, n: u64) -> &mut Self {
        let predicate: Predicate =
            Box::new(move |log| n > 0 && log.status.epochs_done % n == 0);
        self.toggle(Trigger::EveryNEpochs, Callback::AfterEpoch, n > 0, Some(predicate))
    }

    /// After every `n`-th batch. `0` removes the condition.
    pub fn every_n_batches(&mut self, n: u64) -> &mut Self {
        let predicate: Predicate =
            Box::new(move |log| n > 0 && log.status.iterations_done % n == 0);
        self.toggle(Trigger::EveryNBatches, Callback::AfterBatch, n > 0, Some(predicate))
    }

    fn toggle(
        &mut self,
        trigger: Trigger,
        callback: Callback,
        enabled: bool,
        predicate: Option<Predicate>,
    ) -> &mut Self {
        self.conditions
            .retain(|condition| condition.trigger != Some(trigger));
        if enabled {
            self.conditions.push(Condition {
                callback,
                predicate,
                arguments: Vec::new(),
                trigger: Some(trigger),
            });
        }
        self
    }
}

impl fmt::Debug for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.conditions.iter().map(|condition| {
                (
                    condition.callback,
                    condition.trigger,
                    condition.predicate.is_some(),
                    &condition.arguments,
                )
            }))
            .finish()
    }
}
