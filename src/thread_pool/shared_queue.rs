use std::thread;
use crossbeam::channel::{self, Receiver, Sender};
use crate::{Result, ThreadPool};
use tracing::{debug, error, instrument, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A pool of workers fed from one crossbeam MPMC [`channel`].
///
/// The pool holds the only sender; each worker holds a receiver and runs jobs in the order
/// they were queued. A batch submitted while every worker is busy waits in the channel, so a
/// single worker executes batches strictly one after the other.
///
/// A worker whose job panics is replaced by a new one when its receiver is dropped during
/// unwinding. If the OS refuses to start the replacement the pool shrinks. Dropping the pool
/// closes the channel; workers finish the jobs already queued and then exit.
///
/// [`channel`]: https://docs.rs/crossbeam/0.8.1/crossbeam/channel/index.html
pub struct SharedQueueThreadPool {
    tx: Sender<Job>,
}

impl ThreadPool for SharedQueueThreadPool {
    fn new(threads: u32) -> Result<Self> {
        let (tx, rx) = channel::unbounded::<Job>();
        for i in 0..threads {
            spawn_worker(format!("pool-worker-{}", i), Worker(rx.clone()))?;
        }
        debug!("created shared queue thread pool with {} threads", threads);
        Ok(SharedQueueThreadPool { tx })
    }

    /// Queues `job` for the next idle worker.
    ///
    /// A pool with no workers left drops the job and logs an error. Whoever waits on the
    /// job's result sees it time out.
    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.tx.send(Box::new(job)).is_err() {
            error!("No worker threads left in the pool, job dropped");
        }
    }
}

fn spawn_worker(name: String, worker: Worker) -> std::io::Result<()> {
    thread::Builder::new()
        .name(name)
        .spawn(move || worker.run())
        .map(|_| ())
}

/// The receiving end of the job channel owned by one worker thread.
/// Dropping it while the thread unwinds from a panicking job starts a replacement worker.
#[derive(Clone)]
struct Worker(Receiver<Job>);

impl Worker {
    #[instrument(skip(self))]
    fn run(self) {
        while let Ok(job) = self.0.recv() {
            job();
        }
        debug!("Worker exited, the pool was dropped");
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if thread::panicking() {
            let name = thread::current().name().unwrap_or("pool-worker").to_string();
            warn!("{} panicked, starting a replacement", name);
            if let Err(e) = spawn_worker(name, self.clone()) {
                error!("Failed to spawn a replacement worker: {}", e);
            }
        }
    }
}
