//! Thread pools used to run work off the calling thread.
//!
//! The [`StoreServer`] serves each connection on a pool thread, and a [`Batch`] is executed
//! on a pool thread while the submitter holds a [`BatchHandle`] to its completion.
//!
//! [`StoreServer`]: ../struct.StoreServer.html
//! [`Batch`]: ../struct.Batch.html
//! [`BatchHandle`]: ../struct.BatchHandle.html
use crate::Result;

/// The trait that all thread pools must implement
pub trait ThreadPool {
    /// Creates a new thread pool, immediately spawning the specified number of threads.
    ///
    /// # Errors
    /// Returns an error if any thread fails to spawn. All previously-spawned threads are
    /// terminated.
    fn new(threads: u32) -> Result<Self>
    where
        Self: Sized;

    /// Spawns a function into the thread pool.
    ///
    /// Spawning never blocks and never fails the caller. If the function panics the pool keeps
    /// operating with the same number of threads.
    fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static;
}

mod rayon_pool;
mod shared_queue;

pub use self::rayon_pool::RayonThreadPool;
pub use self::shared_queue::SharedQueueThreadPool;
