use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::counter::UniqueCounter;

/// Assignment of a new value to a singleton.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingletonOp<T> {
    pub value: T,
    pub counter: UniqueCounter,
}

/// Last-writer-wins register.
///
/// Holds the value of the operation with the greatest counter applied so
/// far. Counters are totally ordered, so replicas that applied the same
/// operations hold the same value.
#[derive(Clone, Debug)]
pub struct OperationalSingleton<T> {
    current: Option<(T, UniqueCounter)>,
}

impl<T: Clone> OperationalSingleton<T> {
    pub fn new() -> Self {
        Self { current: None }
    }

    /// An operation setting `value`, ordered after everything applied here.
    pub fn create_set_value_op(&self, value: T) -> SingletonOp<T> {
        let counter = match &self.current {
            Some((_, counter)) => counter.increment(),
            None => UniqueCounter::fresh(),
        };
        SingletonOp { value, counter }
    }

    /// Adopt `op` if its counter is greater than the held one. Returns
    /// whether the value changed hands.
    pub fn apply(&mut self, op: &SingletonOp<T>) -> bool {
        let newer = self
            .current
            .as_ref()
            .map_or(true, |(_, held)| op.counter > *held);
        if newer {
            trace!(counter = %op.counter, "singleton value replaced");
            self.current = Some((op.value.clone(), op.counter.clone()));
        }
        newer
    }

    pub fn value(&self) -> Option<&T> {
        self.current.as_ref().map(|(value, _)| value)
    }

    pub fn counter(&self) -> Option<&UniqueCounter> {
        self.current.as_ref().map(|(_, counter)| counter)
    }
}

impl<T: Clone> Default for OperationalSingleton<T> {
    fn default() -> Self {
        Self::new()
    }
}
