//! Bulk loading and removal of keyed items in fixed-size batches.
//!
//! Each item is a bucket holding `"Value: " + id` whose id is also a member of a working set.
//! [`BatchPipeline::load`] creates items and [`BatchPipeline::remove`] deletes them again,
//! both one batch (one round trip) at a time, bumping a progress counter after every batch that
//! completes cleanly.
use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, instrument, trace, warn};
use uuid::Uuid;

use crate::batch::{Batch, BatchHandle, BatchOutcome};
use crate::command::{Request, Response, Value};
use crate::counter::ProgressCounter;
use crate::engine::StoreEngine;
use crate::interrupt::Interrupt;
use crate::thread_pool::ThreadPool;
use crate::{Result, StoreError};

/// default number of items per batch
pub const DEFAULT_BATCH_SIZE: usize = 5_000;

/// Tunables of a [`BatchPipeline`]
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// maximum number of items per batch, must be greater than zero
    pub batch_size: usize,
    /// name of the set tracking the live item ids
    pub working_set: String,
    /// name of the progress counter used by `load`
    pub load_counter: String,
    /// name of the progress counter used by `remove`
    pub remove_counter: String,
    /// how long to wait on a single batch before treating it as faulted
    pub response_timeout: Duration,
    /// `remove` gives up after this many faulted batches in a row
    pub max_consecutive_faults: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        PipelineOptions {
            batch_size: DEFAULT_BATCH_SIZE,
            working_set: "identifiers".to_string(),
            load_counter: "loadBatchNumber".to_string(),
            remove_counter: "removeBatchNumber".to_string(),
            response_timeout: Duration::from_secs(30),
            max_consecutive_faults: 16,
        }
    }
}

/// The bulk operation a [`PipelineReport`] describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// items were created
    Load,
    /// items were deleted
    Remove,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Load => write!(f, "load"),
            Operation::Remove => write!(f, "remove"),
        }
    }
}

/// The states a bulk operation moves through.
///
/// `Pending → Batching → AwaitingCompletion → (Counting | Faulted) → (Batching | Cleanup) → Done`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// nothing has happened yet
    Pending,
    /// a batch is being formed
    Batching,
    /// a batch was submitted and is being waited on
    AwaitingCompletion,
    /// a batch completed cleanly and the progress counter is bumped
    Counting,
    /// a batch timed out, failed, was interrupted or had failing requests
    Faulted,
    /// the progress counter is being deleted
    Cleanup,
    /// the operation is over
    Done,
}

/// What happened during one bulk operation.
///
/// Faults never abort a bulk operation, so this report is the only way for a caller to tell
/// a clean run from one where some batches faulted.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    /// the operation this report describes
    pub operation: Operation,
    /// number of items placed into batches
    pub items: usize,
    /// number of batches submitted, not counting repair batches
    pub batches: usize,
    /// number of batches that faulted
    pub faulted_batches: usize,
    /// number of diverged items that were repaired after a per-item fault
    pub repaired: usize,
    /// the last value read back from the progress counter
    pub last_progress: Option<i64>,
    /// whether a wait was interrupted
    pub interrupted: bool,
    /// whether the operation gave up early, after too many consecutive faulted batches or on a
    /// batch that never completed
    pub stalled: bool,
    /// the state the operation ended in
    pub state: PipelineState,
    /// wall clock time of the whole operation
    pub elapsed: Duration,
}

impl PipelineReport {
    fn new(operation: Operation) -> Self {
        PipelineReport {
            operation,
            items: 0,
            batches: 0,
            faulted_batches: 0,
            repaired: 0,
            last_progress: None,
            interrupted: false,
            stalled: false,
            state: PipelineState::Pending,
            elapsed: Duration::default(),
        }
    }

    fn transition(&mut self, next: PipelineState) {
        trace!(operation = %self.operation, from = ?self.state, to = ?next, "state change");
        self.state = next;
    }

    /// whether every batch completed cleanly
    pub fn is_clean(&self) -> bool {
        self.faulted_batches == 0 && !self.interrupted && !self.stalled
    }
}

/// Drives bulk loading and removal of items against a [`StoreEngine`].
///
/// Batches are strictly sequential: batch *k+1* is not formed before batch *k* has completed
/// and the progress counter bumped. Each batch executes on a `pool` thread while this pipeline
/// waits on its [`BatchHandle`]. A wait that times out or is interrupted is followed by a
/// second wait, which ignores interrupts, for the round trip to finish. The batch counts as
/// faulted either way. If it still has not finished the operation stops and reports itself
/// stalled.
///
/// An interrupt stays raised, so every later wait of this pipeline is cut short and its batch
/// counted as faulted, but the operation still runs to the end.
///
/// [`BatchHandle`]: ../struct.BatchHandle.html
pub struct BatchPipeline<E: StoreEngine, P: ThreadPool> {
    engine: E,
    pool: P,
    options: PipelineOptions,
    interrupt: Interrupt,
}

impl<E: StoreEngine, P: ThreadPool> BatchPipeline<E, P> {
    /// creates a pipeline that executes batches against `engine` on `pool`
    pub fn new(engine: E, pool: P, options: PipelineOptions) -> Self {
        BatchPipeline {
            engine,
            pool,
            options,
            interrupt: Interrupt::new(),
        }
    }

    /// the options this pipeline was built with
    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// the engine this pipeline works against
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// a handle that interrupts any wait of this pipeline, from any thread
    pub fn interrupt_handle(&self) -> Interrupt {
        self.interrupt.clone()
    }

    /// Creates `target_count` items in batches of at most `batch_size`.
    ///
    /// # Errors
    /// [`StoreError::InvalidArgument`] if the batch size is zero and
    /// [`StoreError::WorkingSetNotEmpty`] if the working set already has members. Batch faults
    /// are not errors; they are logged and counted in the returned report.
    #[instrument(skip(self), fields(set = %self.options.working_set))]
    pub fn load(&self, target_count: usize) -> Result<PipelineReport> {
        self.check_batch_size()?;
        let set = &self.options.working_set;
        let size = self.engine.set_size(set.clone())?;
        if size > 0 {
            warn!("Refusing to load, set '{}' already holds {} members", set, size);
            return Err(StoreError::WorkingSetNotEmpty {
                name: set.clone(),
                size,
            });
        }

        let counter = self.fresh_counter(&self.options.load_counter)?;
        let mut report = PipelineReport::new(Operation::Load);
        let start = Instant::now();
        debug!("Creating buckets and loading the '{}' set", set);

        let mut remaining = target_count;
        while remaining > 0 {
            report.transition(PipelineState::Batching);
            let limit = remaining.min(self.options.batch_size);
            let ids: Vec<String> = (0..limit).map(|_| Uuid::new_v4().to_string()).collect();

            let mut batch = Batch::with_capacity(limit * 2);
            for id in &ids {
                batch.push(Request::Set {
                    key: id.clone(),
                    value: format!("Value: {}", id),
                });
                batch.push(Request::SetAdd {
                    set: set.clone(),
                    member: id.clone(),
                });
            }

            let settled = self.submit_and_wait(batch, &mut report);
            match &settled.outcome {
                Some(outcome) if settled.on_time && outcome.is_clean() => {
                    self.count(&counter, &mut report)
                }
                Some(outcome) => {
                    report.faulted_batches += 1;
                    match self.repair_load(&ids, outcome) {
                        Some(repaired) => report.repaired += repaired,
                        None => report.stalled = true,
                    }
                }
                None => report.faulted_batches += 1,
            }

            remaining -= limit;
            report.items += limit;
            if report.stalled {
                error!("Giving up on the load with {} items left", remaining);
                break;
            }
        }

        self.finish(counter, &mut report, start);
        match self.engine.set_size(set.clone()) {
            Ok(size) => debug!("There are {} identifiers", size),
            Err(e) => error!("Could not read the size of set '{}': {}", set, e),
        }
        Ok(report)
    }

    /// Deletes every item of the working set, drawing a random subset of at most `batch_size`
    /// members per batch.
    ///
    /// Returns immediately without submitting anything when the working set is empty. The
    /// working set itself is not deleted here; see [`BatchPipeline::cleanup`].
    #[instrument(skip(self), fields(set = %self.options.working_set))]
    pub fn remove(&self) -> Result<PipelineReport> {
        self.check_batch_size()?;
        let mut report = PipelineReport::new(Operation::Remove);
        let set = &self.options.working_set;
        if self.engine.set_is_empty(set.clone())? {
            debug!("Set '{}' is empty, nothing to remove", set);
            report.transition(PipelineState::Done);
            return Ok(report);
        }

        let counter = self.fresh_counter(&self.options.remove_counter)?;
        let start = Instant::now();
        debug!("Removing buckets and items from the '{}' set", set);

        let removed = self.remove_batches(&counter, &mut report);
        // the counter goes away even if the store failed us mid-way
        self.finish(counter, &mut report, start);
        removed.map(|_| report)
    }

    fn remove_batches(&self, counter: &ProgressCounter<E>, report: &mut PipelineReport) -> Result<()> {
        let set = &self.options.working_set;
        let mut consecutive_faults = 0;

        while !self.engine.set_is_empty(set.clone())? {
            report.transition(PipelineState::Batching);
            let members = self.engine.set_random(set.clone(), self.options.batch_size)?;
            if members.is_empty() {
                break;
            }

            let mut batch = Batch::with_capacity(members.len() * 2);
            for member in &members {
                batch.push(Request::GetAndDelete { key: member.clone() });
                batch.push(Request::SetRemove {
                    set: set.clone(),
                    member: member.clone(),
                });
            }
            report.items += members.len();

            let settled = self.submit_and_wait(batch, report);
            match &settled.outcome {
                Some(outcome) if outcome.is_clean() => {
                    // the members are gone, even if the wait on them gave up
                    consecutive_faults = 0;
                    if settled.on_time {
                        self.count(counter, report);
                    } else {
                        report.faulted_batches += 1;
                    }
                }
                Some(outcome) => {
                    consecutive_faults += 1;
                    report.faulted_batches += 1;
                    match self.repair_remove(&members, outcome) {
                        Some(repaired) => report.repaired += repaired,
                        None => report.stalled = true,
                    }
                }
                None => {
                    consecutive_faults += 1;
                    report.faulted_batches += 1;
                }
            }

            if report.stalled {
                error!("Giving up on set '{}', a batch never completed", set);
                break;
            }
            if consecutive_faults >= self.options.max_consecutive_faults {
                error!(
                    "Giving up on set '{}' after {} consecutive faulted batches",
                    set, consecutive_faults
                );
                report.stalled = true;
                break;
            }
        }
        Ok(())
    }

    /// Removes working set members whose bucket no longer exists, returning how many were
    /// removed.
    ///
    /// Faulted batches can leave a member behind without its bucket. The opposite case, a
    /// bucket whose membership was lost, can not be found from the working set.
    #[instrument(skip(self), fields(set = %self.options.working_set))]
    pub fn reconcile(&self) -> Result<usize> {
        self.check_batch_size()?;
        let set = &self.options.working_set;
        let members = self.engine.set_members(set.clone())?;
        let mut removed = 0;

        for chunk in members.chunks(self.options.batch_size) {
            let mut batch = Batch::with_capacity(chunk.len());
            for member in chunk {
                batch.push(Request::Exists { key: member.clone() });
            }
            let handle = batch.submit(&self.engine, &self.pool);
            let responses = match self.settle(&handle, "existence batch").outcome {
                Some(BatchOutcome::Completed(responses)) => responses,
                Some(BatchOutcome::Failed(msg)) => return Err(StoreError::Remote(msg)),
                None => return Err(StoreError::Timeout(self.options.response_timeout)),
            };

            let mut fix = Batch::new();
            for (member, _) in chunk
                .iter()
                .zip(responses.iter())
                .filter(|(_, resp)| matches!(resp, Response::Ok(Value::Bool(false))))
            {
                fix.push(Request::SetRemove {
                    set: set.clone(),
                    member: member.clone(),
                });
            }
            removed += self
                .apply_repairs(fix)
                .ok_or(StoreError::Timeout(self.options.response_timeout))?;
        }

        if removed > 0 {
            warn!("Removed {} members of '{}' that had no bucket", removed, set);
        } else {
            debug!("Set '{}' is consistent with its buckets", set);
        }
        Ok(removed)
    }

    /// Deletes the working set if it still exists, returning whether it did.
    ///
    /// Sets are pruned by the store once their last member is removed, so after a clean
    /// [`BatchPipeline::remove`] there is usually nothing left to delete.
    pub fn cleanup(&self) -> Result<bool> {
        let set = &self.options.working_set;
        if self.engine.exists(set.clone())? {
            let deleted = self.engine.delete(set.clone())?;
            if deleted {
                debug!("Set '{}' deleted", set);
            }
            Ok(deleted)
        } else {
            debug!("Set '{}' no longer exists", set);
            Ok(false)
        }
    }

    /// Loads `target_count` items, removes them all again and deletes the working set.
    ///
    /// A reconciliation pass runs between the two when the load was not clean. An interrupt
    /// does not cut the run short: every step still runs, one settled batch at a time, and
    /// both reports come back flagged as interrupted.
    pub fn run(&self, target_count: usize) -> Result<(PipelineReport, PipelineReport)> {
        let loaded = self.load(target_count)?;
        if !loaded.is_clean() {
            self.reconcile()?;
        }
        let removed = self.remove()?;
        self.cleanup()?;
        if loaded.interrupted || removed.interrupted {
            warn!("Run of {} items was interrupted", target_count);
        }
        Ok((loaded, removed))
    }

    fn check_batch_size(&self) -> Result<()> {
        if self.options.batch_size == 0 {
            return Err(StoreError::InvalidArgument(
                "batch size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// a handle on the counter called `name`, deleting whatever an earlier run left behind
    fn fresh_counter(&self, name: &str) -> Result<ProgressCounter<E>> {
        let counter = ProgressCounter::new(self.engine.clone(), name);
        if counter.exists()? {
            warn!("Progress counter '{}' was left over by an earlier run", name);
            counter.clone().delete()?;
        }
        Ok(counter)
    }

    /// submits `batch` and waits until it has settled, so that no other batch is in flight when
    /// this returns with an outcome
    fn submit_and_wait(&self, batch: Batch, report: &mut PipelineReport) -> Settled {
        report.batches += 1;
        let batch_no = report.batches;
        let operation = report.operation;

        let handle = batch.submit(&self.engine, &self.pool);
        handle.on_complete(move |outcome| match outcome {
            BatchOutcome::Failed(msg) => error!("{} batch {} failed: {}", operation, batch_no, msg),
            BatchOutcome::Completed(_) => {
                let faults = outcome.faults();
                if let Some((index, msg)) = faults.first() {
                    error!(
                        "{} batch {} had {} failed requests, first at {}: {}",
                        operation,
                        batch_no,
                        faults.len(),
                        index,
                        msg
                    );
                } else {
                    trace!("{} batch {} executed", operation, batch_no);
                }
            }
        });

        report.transition(PipelineState::AwaitingCompletion);
        let settled = self.settle(&handle, &format!("{} batch {}", operation, batch_no));
        if settled.interrupted {
            report.interrupted = true;
        }
        if settled.outcome.is_none() {
            report.stalled = true;
        }
        let clean = settled.on_time && settled.outcome.as_ref().map_or(false, BatchOutcome::is_clean);
        if !clean {
            report.transition(PipelineState::Faulted);
        }
        settled
    }

    /// Waits on `handle` for up to the response timeout or an interrupt. A wait that gives up
    /// is followed by a second one that ignores interrupts, since the round trip is still
    /// running and must finish before anything else is sent.
    fn settle(&self, handle: &BatchHandle, what: &str) -> Settled {
        let timeout = self.options.response_timeout;
        let interrupted = match handle.wait(timeout, &self.interrupt) {
            Ok(outcome) => {
                return Settled {
                    outcome: Some(outcome),
                    on_time: true,
                    interrupted: false,
                }
            }
            Err(StoreError::Interrupted) => {
                warn!("Interrupted while waiting on {}", what);
                true
            }
            Err(e) => {
                error!("{}: {}", what, e);
                false
            }
        };

        let outcome = match handle.wait(timeout, &Interrupt::new()) {
            Ok(outcome) => {
                debug!("{} settled late", what);
                Some(outcome)
            }
            Err(e) => {
                error!("{} never settled: {}", what, e);
                None
            }
        };
        Settled {
            outcome,
            on_time: false,
            interrupted,
        }
    }

    fn count(&self, counter: &ProgressCounter<E>, report: &mut PipelineReport) {
        report.transition(PipelineState::Counting);
        match counter.increment_and_get() {
            Ok(n) => {
                report.last_progress = Some(n);
                match report.operation {
                    Operation::Load => debug!("Done loading batch {}", n),
                    Operation::Remove => debug!("Done removing batch {}", n),
                }
            }
            Err(e) => error!("Could not increment counter '{}': {}", counter.name(), e),
        }
    }

    /// undoes the half of an item that succeeded when the other half failed
    fn repair_load(&self, ids: &[String], outcome: &BatchOutcome) -> Option<usize> {
        let responses = match outcome {
            BatchOutcome::Completed(responses) => responses,
            BatchOutcome::Failed(_) => return Some(0),
        };

        let mut fix = Batch::new();
        for (i, id) in ids.iter().enumerate() {
            match (failed(responses, 2 * i), failed(responses, 2 * i + 1)) {
                (true, false) => fix.push(Request::SetRemove {
                    set: self.options.working_set.clone(),
                    member: id.clone(),
                }),
                (false, true) => fix.push(Request::Delete { key: id.clone() }),
                _ => {}
            }
        }
        self.apply_repairs(fix)
    }

    /// puts members back whose bucket could not be deleted, so a later draw retries them
    fn repair_remove(&self, members: &[String], outcome: &BatchOutcome) -> Option<usize> {
        let responses = match outcome {
            BatchOutcome::Completed(responses) => responses,
            BatchOutcome::Failed(_) => return Some(0),
        };

        let mut fix = Batch::new();
        for (i, member) in members.iter().enumerate() {
            if failed(responses, 2 * i) && !failed(responses, 2 * i + 1) {
                fix.push(Request::SetAdd {
                    set: self.options.working_set.clone(),
                    member: member.clone(),
                });
            }
        }
        self.apply_repairs(fix)
    }

    /// executes a batch of repair requests, returning how many of them succeeded, or `None`
    /// if the batch never settled
    fn apply_repairs(&self, fix: Batch) -> Option<usize> {
        if fix.is_empty() {
            return Some(0);
        }
        let wanted = fix.len();
        let handle = fix.submit(&self.engine, &self.pool);
        match self.settle(&handle, "repair batch").outcome? {
            BatchOutcome::Completed(responses) => {
                let repaired = responses.iter().filter(|r| r.error().is_none()).count();
                warn!("Repaired {} of {} diverged items", repaired, wanted);
                Some(repaired)
            }
            BatchOutcome::Failed(msg) => {
                error!("Repair batch of {} requests failed: {}", wanted, msg);
                Some(0)
            }
        }
    }

    fn finish(&self, counter: ProgressCounter<E>, report: &mut PipelineReport, start: Instant) {
        report.transition(PipelineState::Cleanup);
        if let Err(e) = counter.delete() {
            error!("Could not delete a progress counter: {}", e);
        }
        report.elapsed = start.elapsed();
        report.transition(PipelineState::Done);
        info!(
            "{} of {} items took {:?} over {} batches, {} faulted",
            report.operation, report.items, report.elapsed, report.batches, report.faulted_batches
        );
    }
}

/// how waiting on one batch ended
struct Settled {
    /// the batch's outcome, `None` if it did not complete within two response timeouts
    outcome: Option<BatchOutcome>,
    /// whether the outcome arrived within the first wait
    on_time: bool,
    /// whether the first wait was interrupted
    interrupted: bool,
}

/// whether the response at `index` is missing or an error
fn failed(responses: &[Response], index: usize) -> bool {
    responses.get(index).map_or(true, |r| r.error().is_some())
}
