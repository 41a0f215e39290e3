//! One producer and a pool of consumers sharing a store-side queue.
//!
//! The producer offers messages one round trip at a time and then closes a [`WakeSignal`].
//! Consumers drain the queue with `Poll`, which hands every message to exactly one of them,
//! and park on the signal while the queue is empty.
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;

use tracing::{debug, error, info, instrument, warn};

use crate::engine::StoreEngine;
use crate::interrupt::{Interrupt, INTERRUPT_POLL};
use crate::{Result, StoreError};

/// default number of consumer threads
pub const DEFAULT_CONSUMERS: usize = 3;

/// Why a wait on a [`WakeSignal`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// the signal was notified since the waiter last looked
    Notified,
    /// the stream has ended; waits no longer block
    Closed,
}

#[derive(Debug, Default)]
struct SignalState {
    generation: u64,
    closed: bool,
}

/// A readiness signal written by one producer and read by many consumers.
///
/// Every notification bumps a generation number and each waiter passes in the generation it
/// saw last, so a notification that fires before a consumer starts waiting is never lost and
/// one consumer observing it does not hide it from the others.
#[derive(Debug, Default)]
pub struct WakeSignal {
    state: Mutex<SignalState>,
    cond: Condvar,
    interrupt: Interrupt,
}

impl WakeSignal {
    /// creates an open signal with a fresh interrupt flag
    pub fn new() -> Self {
        WakeSignal::default()
    }

    /// creates an open signal that also gives up waiting when `interrupt` is raised
    pub fn with_interrupt(interrupt: Interrupt) -> Self {
        WakeSignal {
            interrupt,
            ..WakeSignal::default()
        }
    }

    fn lock(&self) -> MutexGuard<'_, SignalState> {
        self.state.lock().expect("wake signal mutex poisoned")
    }

    /// wakes every waiter
    pub fn notify_all(&self) {
        let mut state = self.lock();
        state.generation += 1;
        self.cond.notify_all();
    }

    /// marks the end of the stream and wakes every waiter
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.generation += 1;
        self.cond.notify_all();
    }

    /// whether the stream has ended
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// the number of notifications so far
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// raises the interrupt flag and wakes every waiter of this signal
    pub fn interrupt(&self) {
        self.interrupt.interrupt();
        // taking the lock orders this after any waiter's flag check
        let _state = self.lock();
        self.cond.notify_all();
    }

    /// whether the interrupt flag is raised
    pub fn is_interrupted(&self) -> bool {
        self.interrupt.is_interrupted()
    }

    /// Blocks until the generation moves past `seen` or the signal is closed, then records the
    /// current generation in `seen`.
    ///
    /// Returns at once if that is already the case. A flag shared with other signals through
    /// [`WakeSignal::with_interrupt`] is noticed within a few milliseconds of being raised.
    ///
    /// # Errors
    /// [`StoreError::Interrupted`] once the interrupt flag is raised. The flag stays raised.
    pub fn wait(&self, seen: &mut u64) -> Result<Wake> {
        let mut state = self.lock();
        loop {
            if self.interrupt.is_interrupted() {
                return Err(StoreError::Interrupted);
            }
            if state.closed {
                *seen = state.generation;
                return Ok(Wake::Closed);
            }
            if state.generation > *seen {
                *seen = state.generation;
                return Ok(Wake::Notified);
            }
            let (next, _) = self
                .cond
                .wait_timeout(state, INTERRUPT_POLL)
                .expect("wake signal mutex poisoned");
            state = next;
        }
    }
}

/// What one consumer received
#[derive(Debug, Clone, Default)]
pub struct ConsumerReport {
    /// the consumer's thread name
    pub name: String,
    /// the messages it received, in the order it received them
    pub received: Vec<String>,
    /// whether it stopped because it was interrupted
    pub interrupted: bool,
    /// the store error that stopped it early, if any
    pub error: Option<String>,
}

/// What a whole producer/consumer session did
#[derive(Debug, Clone, Default)]
pub struct CoordinatorReport {
    /// number of messages enqueued
    pub produced: usize,
    /// one report per consumer that finished
    pub consumers: Vec<ConsumerReport>,
    /// number of threads that panicked, or consumers stopped by a store error
    pub failed_threads: usize,
}

impl CoordinatorReport {
    /// total number of messages received by all consumers
    pub fn total_received(&self) -> usize {
        self.consumers.iter().map(|c| c.received.len()).sum()
    }

    /// whether any consumer was interrupted
    pub fn interrupted(&self) -> bool {
        self.consumers.iter().any(|c| c.interrupted)
    }
}

/// Coordinates one producer and `consumers` consumer threads over the store queue `queue`.
///
/// Every [`QueueCoordinator::run`] is a session of its own with a fresh [`WakeSignal`], so a
/// coordinator can be run any number of times. [`QueueCoordinator::produce`] and
/// [`QueueCoordinator::consume`] called directly share the coordinator's own signal instead.
#[derive(Debug, Clone)]
pub struct QueueCoordinator<E: StoreEngine> {
    engine: E,
    queue: String,
    consumers: usize,
    interrupt: Interrupt,
    signal: Arc<WakeSignal>,
}

impl<E: StoreEngine> QueueCoordinator<E> {
    /// creates a coordinator for a session over `queue`
    ///
    /// # Errors
    /// [`StoreError::InvalidArgument`] if `consumers` is zero
    pub fn new(engine: E, queue: impl Into<String>, consumers: usize) -> Result<Self> {
        if consumers == 0 {
            return Err(StoreError::InvalidArgument(
                "at least one consumer is required".to_string(),
            ));
        }
        let interrupt = Interrupt::new();
        Ok(QueueCoordinator {
            engine,
            queue: queue.into(),
            consumers,
            signal: Arc::new(WakeSignal::with_interrupt(interrupt.clone())),
            interrupt,
        })
    }

    /// the name of the store queue
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// the signal used by `produce` and `consume` when they are called directly
    pub fn signal(&self) -> &Arc<WakeSignal> {
        &self.signal
    }

    /// interrupts every consumer of every session that is, or will be, waiting
    pub fn interrupt(&self) {
        self.signal.interrupt();
    }

    /// Offers `messages` to the queue in order, one round trip each, notifying the consumers
    /// after every offer. Closes the signal once all messages were offered.
    ///
    /// A message the store refuses is logged and skipped. Returns the number of messages that
    /// were enqueued.
    #[instrument(skip(self, messages), fields(queue = %self.queue))]
    pub fn produce<I>(&self, messages: I) -> usize
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let mut produced = 0;
        for message in messages {
            match self.engine.offer(self.queue.clone(), message.into()) {
                Ok(()) => {
                    produced += 1;
                    self.signal.notify_all();
                }
                Err(e) => error!("Could not offer a message to '{}': {}", self.queue, e),
            }
        }
        // every offer above has completed, so a consumer that sees the close also sees them
        self.signal.close();
        debug!("Produced {} messages", produced);
        produced
    }

    /// Receives messages until the stream is closed and the queue is empty, or until
    /// interrupted.
    ///
    /// A store error stops the consumer early. The returned report then still holds every
    /// message received so far, with the error recorded in [`ConsumerReport::error`].
    #[instrument(skip(self), fields(queue = %self.queue))]
    pub fn consume(&self, name: &str) -> ConsumerReport {
        let mut report = ConsumerReport {
            name: name.to_string(),
            ..ConsumerReport::default()
        };
        if let Err(e) = self.drain_until_closed(name, &mut report) {
            error!(consumer = name, "Stopped by the store: {}", e);
            report.error = Some(e.to_string());
        }
        debug!(consumer = name, "Done after {} messages", report.received.len());
        report
    }

    fn drain_until_closed(&self, name: &str, report: &mut ConsumerReport) -> Result<()> {
        let mut seen = 0;
        loop {
            while let Some(message) = self.engine.poll(self.queue.clone())? {
                info!(consumer = name, "Received message: {}", message);
                report.received.push(message);
            }

            match self.signal.wait(&mut seen) {
                Ok(Wake::Closed) => {
                    if self.engine.queue_is_empty(self.queue.clone())? {
                        return Ok(());
                    }
                }
                Ok(Wake::Notified) => {}
                Err(StoreError::Interrupted) => {
                    warn!(consumer = name, "Interrupted while waiting for messages");
                    report.interrupted = true;
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// a coordinator for one session: the same store, queue and interrupt, but a fresh signal
    fn session(&self) -> Self {
        QueueCoordinator {
            signal: Arc::new(WakeSignal::with_interrupt(self.interrupt.clone())),
            ..self.clone()
        }
    }

    /// Runs a whole session: starts the consumers and a producer for `messages`, joins them all
    /// and deletes the queue.
    ///
    /// # Errors
    /// Returns an error if a thread could not be spawned. Consumers that were already started
    /// are interrupted first.
    #[instrument(skip(self, messages), fields(queue = %self.queue))]
    pub fn run(&self, messages: Vec<String>) -> Result<CoordinatorReport> {
        let session = self.session();
        let mut consumers = Vec::with_capacity(self.consumers);
        for i in 1..=self.consumers {
            let name = format!("consumer-{}", i);
            let worker = session.clone();
            let spawned = thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker.consume(&name));
            match spawned {
                Ok(handle) => consumers.push(handle),
                Err(e) => {
                    session.signal.interrupt();
                    return Err(e.into());
                }
            }
        }

        let producer = session.clone();
        let spawned = thread::Builder::new()
            .name("producer".to_string())
            .spawn(move || producer.produce(messages));
        let producer = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                session.signal.interrupt();
                return Err(e.into());
            }
        };

        let mut report = CoordinatorReport::default();
        match producer.join() {
            Ok(produced) => report.produced = produced,
            Err(_) => {
                error!("Producer thread panicked");
                // consumers would otherwise wait for a close that never comes
                session.signal.close();
                report.failed_threads += 1;
            }
        }

        for handle in consumers {
            match handle.join() {
                Ok(consumer) => {
                    if consumer.error.is_some() {
                        report.failed_threads += 1;
                    }
                    report.consumers.push(consumer);
                }
                Err(_) => {
                    error!("Consumer thread panicked");
                    report.failed_threads += 1;
                }
            }
        }

        match self.engine.delete(self.queue.clone()) {
            Ok(true) => debug!("Queue '{}' deleted", self.queue),
            Ok(false) => debug!("Queue '{}' no longer exists", self.queue),
            Err(e) => error!("Could not delete queue '{}': {}", self.queue, e),
        }
        Ok(report)
    }
}
