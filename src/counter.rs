use tracing::debug;

use crate::engine::StoreEngine;
use crate::Result;

/// A server side counter that tracks the number of completed batches of one bulk operation.
///
/// The counter is observability only; nothing reads it back for correctness. It is deleted
/// once its operation is over, and [`ProgressCounter::delete`] consumes the handle so that can
/// only happen once.
#[derive(Debug, Clone)]
pub struct ProgressCounter<E: StoreEngine> {
    engine: E,
    name: String,
}

impl<E: StoreEngine> ProgressCounter<E> {
    /// creates a handle on the counter called `name`. Nothing is created in the store until the
    /// first increment
    pub fn new(engine: E, name: impl Into<String>) -> Self {
        ProgressCounter {
            engine,
            name: name.into(),
        }
    }

    /// the counter's name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// increments the counter and returns its new value
    pub fn increment_and_get(&self) -> Result<i64> {
        self.engine.incr(self.name.clone())
    }

    /// the current value, 0 if the counter does not exist
    pub fn get(&self) -> Result<i64> {
        self.engine.counter_get(self.name.clone())
    }

    /// whether the counter exists in the store
    pub fn exists(&self) -> Result<bool> {
        self.engine.exists(self.name.clone())
    }

    /// Deletes the counter, returning whether it existed.
    ///
    /// A counter that never got incremented does not exist; deleting it is a no-op.
    pub fn delete(self) -> Result<bool> {
        let deleted = self.engine.delete(self.name.clone())?;
        if deleted {
            debug!("Counter '{}' deleted", self.name);
        } else {
            debug!("Counter '{}' did not exist", self.name);
        }
        Ok(deleted)
    }
}
