//! Batches of requests submitted in one round trip, and the handle used to observe their
//! asynchronous completion.
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::command::{Request, Response};
use crate::engine::StoreEngine;
use crate::interrupt::{Interrupt, INTERRUPT_POLL};
use crate::thread_pool::ThreadPool;
use crate::{Result, StoreError};

type Callback = Box<dyn FnOnce(&BatchOutcome) + Send + 'static>;

/// A client side group of requests that is executed by a [`StoreEngine`] in one call.
///
/// The batch is only a unit of atomicity for the network call. The requests inside it are
/// executed independently and any of them may fail on its own.
#[derive(Debug, Default)]
pub struct Batch {
    ops: Vec<Request>,
}

impl Batch {
    /// creates an empty batch
    pub fn new() -> Self {
        Batch::default()
    }

    /// creates an empty batch with room for `capacity` requests
    pub fn with_capacity(capacity: usize) -> Self {
        Batch {
            ops: Vec::with_capacity(capacity),
        }
    }

    /// appends a request to this batch
    pub fn push(&mut self, req: Request) {
        self.ops.push(req);
    }

    /// number of requests in this batch
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// whether this batch holds no requests
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Submits the batch for execution on a `pool` thread and returns immediately.
    ///
    /// The returned [`BatchHandle`] completes once `engine` has executed the whole batch, or
    /// failed to.
    pub fn submit<E: StoreEngine, P: ThreadPool>(self, engine: &E, pool: &P) -> BatchHandle {
        let completion = Arc::new(Completion::default());
        let shared = Arc::clone(&completion);
        let engine = engine.clone();
        let ops = self.ops;
        trace!("submitting batch of {} requests", ops.len());

        pool.spawn(move || {
            let outcome = match engine.execute_batch(ops) {
                Ok(responses) => BatchOutcome::Completed(responses),
                Err(e) => BatchOutcome::Failed(e.to_string()),
            };
            shared.complete(outcome);
        });

        BatchHandle { completion }
    }
}

/// The result of executing a [`Batch`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// the batch was executed; holds one response per request, some of which may be errors
    Completed(Vec<Response>),
    /// the batch as a whole could not be executed
    Failed(String),
}

impl BatchOutcome {
    /// the index and message of every request that failed inside a completed batch
    pub fn faults(&self) -> Vec<(usize, &str)> {
        match self {
            BatchOutcome::Completed(responses) => responses
                .iter()
                .enumerate()
                .filter_map(|(i, resp)| resp.error().map(|msg| (i, msg)))
                .collect(),
            BatchOutcome::Failed(_) => Vec::new(),
        }
    }

    /// whether the batch was executed and every one of its requests succeeded
    pub fn is_clean(&self) -> bool {
        match self {
            BatchOutcome::Completed(responses) => responses.iter().all(|r| r.error().is_none()),
            BatchOutcome::Failed(_) => false,
        }
    }
}

#[derive(Default)]
struct Slot {
    outcome: Option<BatchOutcome>,
    callbacks: Vec<Callback>,
    done: bool,
}

#[derive(Default)]
struct Completion {
    slot: Mutex<Slot>,
    cond: Condvar,
}

impl Completion {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().expect("batch completion mutex poisoned")
    }

    fn complete(&self, outcome: BatchOutcome) {
        let callbacks = {
            let mut slot = self.lock();
            slot.outcome = Some(outcome.clone());
            slot.done = true;
            self.cond.notify_all();
            std::mem::take(&mut slot.callbacks)
        };
        // the lock is released: a callback may use its own handle
        for callback in callbacks {
            callback(&outcome);
        }
    }
}

/// A handle on the asynchronous completion of a submitted [`Batch`]
///
/// Clones observe the same batch.
#[derive(Clone)]
pub struct BatchHandle {
    completion: Arc<Completion>,
}

impl fmt::Debug for BatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchHandle")
            .field("done", &self.is_done())
            .finish()
    }
}

impl BatchHandle {
    /// Registers `callback` to run once the batch completes.
    ///
    /// If the batch has already completed the callback runs right away on the calling thread,
    /// otherwise it runs on the thread that completes the batch. Callbacks never run under the
    /// completion lock, so they may use the handle themselves.
    pub fn on_complete<F>(&self, callback: F)
    where
        F: FnOnce(&BatchOutcome) + Send + 'static,
    {
        let outcome = {
            let mut slot = self.completion.lock();
            match slot.outcome.clone() {
                Some(outcome) => outcome,
                None => {
                    slot.callbacks.push(Box::new(callback));
                    return;
                }
            }
        };
        callback(&outcome);
    }

    /// whether the batch has completed
    pub fn is_done(&self) -> bool {
        self.completion.lock().done
    }

    /// Blocks until the batch completes, `timeout` elapses, or `interrupt` is raised.
    ///
    /// An interrupt wins over a completed batch, so a raised `interrupt` always yields
    /// [`StoreError::Interrupted`]. A wait that gave up can be repeated on the same handle, for
    /// instance with an interrupt that is never raised, to let an in-flight batch settle.
    ///
    /// # Errors
    /// [`StoreError::Timeout`] if the batch did not complete in time and
    /// [`StoreError::Interrupted`] if the wait was interrupted. In both cases the batch keeps
    /// executing in the background.
    pub fn wait(&self, timeout: Duration, interrupt: &Interrupt) -> Result<BatchOutcome> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.completion.lock();
        loop {
            if interrupt.is_interrupted() {
                return Err(StoreError::Interrupted);
            }
            if let Some(outcome) = slot.outcome.as_ref() {
                return Ok(outcome.clone());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(StoreError::Timeout(timeout));
            }
            let (next, _) = self
                .completion
                .cond
                .wait_timeout(slot, (deadline - now).min(INTERRUPT_POLL))
                .expect("batch completion mutex poisoned");
            slot = next;
        }
    }
}
