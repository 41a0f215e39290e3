#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use kvpipe::{MemStore, Request, Response, Result, StoreEngine, StoreError, Value};

/// a store that remembers the size of every batch and every counter increment it served
#[derive(Clone, Default)]
pub struct RecordingStore {
    pub inner: MemStore,
    pub batches: Arc<Mutex<Vec<usize>>>,
    pub increments: Arc<Mutex<Vec<(String, i64)>>>,
}

impl RecordingStore {
    pub fn batches(&self) -> Vec<usize> {
        self.batches.lock().unwrap().clone()
    }

    pub fn increments(&self) -> Vec<(String, i64)> {
        self.increments.lock().unwrap().clone()
    }
}

impl StoreEngine for RecordingStore {
    fn execute(&self, req: Request) -> Result<Value> {
        let counter = match &req {
            Request::Incr { counter } => Some(counter.clone()),
            _ => None,
        };
        let value = self.inner.execute(req)?;
        if let (Some(counter), Value::Int(n)) = (counter, &value) {
            self.increments.lock().unwrap().push((counter, *n));
        }
        Ok(value)
    }

    fn execute_batch(&self, reqs: Vec<Request>) -> Result<Vec<Response>> {
        self.batches.lock().unwrap().push(reqs.len());
        self.inner.execute_batch(reqs)
    }
}

/// a store that injects faults into requests and batches
#[derive(Clone, Default)]
pub struct FaultyStore {
    pub inner: MemStore,
    fail_set_add_every: usize,
    fail_get_and_delete_every: usize,
    fail_polls_after: Option<usize>,
    poll_calls: Arc<AtomicUsize>,
    set_add_calls: Arc<AtomicUsize>,
    get_and_delete_calls: Arc<AtomicUsize>,
    failing_batches: Arc<AtomicUsize>,
    batch_delay: Duration,
}

impl FaultyStore {
    pub fn new() -> Self {
        FaultyStore::default()
    }

    /// injects faults in front of an existing store
    pub fn wrapping(inner: MemStore) -> Self {
        FaultyStore {
            inner,
            ..FaultyStore::default()
        }
    }

    /// every `n`th `SetAdd` fails
    pub fn fail_set_add_every(mut self, n: usize) -> Self {
        self.fail_set_add_every = n;
        self
    }

    /// every `n`th `GetAndDelete` fails
    pub fn fail_get_and_delete_every(mut self, n: usize) -> Self {
        self.fail_get_and_delete_every = n;
        self
    }

    /// every `Poll` after the first `n` fails
    pub fn fail_polls_after(mut self, n: usize) -> Self {
        self.fail_polls_after = Some(n);
        self
    }

    /// the next `n` batches fail as a whole
    pub fn fail_next_batches(self, n: usize) -> Self {
        self.failing_batches.store(n, Ordering::SeqCst);
        self
    }

    /// every batch sleeps for `delay` before executing
    pub fn delay_batches(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }
}

fn nth_call(calls: &AtomicUsize, every: usize) -> bool {
    every > 0 && (calls.fetch_add(1, Ordering::SeqCst) + 1) % every == 0
}

impl StoreEngine for FaultyStore {
    fn execute(&self, req: Request) -> Result<Value> {
        let fail = match &req {
            Request::SetAdd { .. } => nth_call(&self.set_add_calls, self.fail_set_add_every),
            Request::GetAndDelete { .. } => {
                nth_call(&self.get_and_delete_calls, self.fail_get_and_delete_every)
            }
            Request::Poll { .. } => self
                .fail_polls_after
                .map_or(false, |n| self.poll_calls.fetch_add(1, Ordering::SeqCst) >= n),
            _ => false,
        };
        if fail {
            return Err(StoreError::Remote(format!("injected fault on {:?}", req)));
        }
        self.inner.execute(req)
    }

    fn execute_batch(&self, reqs: Vec<Request>) -> Result<Vec<Response>> {
        if !self.batch_delay.is_zero() {
            thread::sleep(self.batch_delay);
        }
        let failing = self
            .failing_batches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Remote("injected batch failure".to_string()));
        }
        Ok(reqs
            .into_iter()
            .map(|req| match self.execute(req) {
                Ok(value) => Response::Ok(value),
                Err(e) => Response::Err(e.to_string()),
            })
            .collect())
    }
}

/// a store that tracks how many batches run at once and which keys were deleted
#[derive(Clone, Default)]
pub struct TrackingStore {
    pub inner: MemStore,
    batch_delay: Duration,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    deleted: Arc<Mutex<Vec<String>>>,
}

impl TrackingStore {
    pub fn new() -> Self {
        TrackingStore::default()
    }

    /// every batch sleeps for `delay` before executing
    pub fn delay_batches(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }

    /// the most batches that were ever executing at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// every key a `GetAndDelete` was sent for, in order
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    /// whether no key was sent to `GetAndDelete` twice
    pub fn deletes_are_distinct(&self) -> bool {
        let deleted = self.deleted();
        let distinct: HashSet<&String> = deleted.iter().collect();
        distinct.len() == deleted.len()
    }
}

impl StoreEngine for TrackingStore {
    fn execute(&self, req: Request) -> Result<Value> {
        self.inner.execute(req)
    }

    fn execute_batch(&self, reqs: Vec<Request>) -> Result<Vec<Response>> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.batch_delay.is_zero() {
            thread::sleep(self.batch_delay);
        }
        {
            let mut deleted = self.deleted.lock().unwrap();
            for req in &reqs {
                if let Request::GetAndDelete { key } = req {
                    deleted.push(key.clone());
                }
            }
        }
        let responses = self.inner.execute_batch(reqs);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        responses
    }
}

/// polls `condition` until it holds or `timeout` passes, returning whether it held
pub fn eventually<F: FnMut() -> bool>(timeout: Duration, mut condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}
