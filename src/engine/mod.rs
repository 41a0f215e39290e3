//! This module provides the [`StoreEngine`] trait, the seam between the pipelines and whatever
//! store they are driving, and [`MemStore`], an in-process engine implementation.
//!
//! A remote store is reached through [`StoreClient`], which implements the same trait.
//!
//! [`StoreClient`]: ../struct.StoreClient.html
use crate::command::{Request, Response, Value};
use crate::Result;

/// A trait for the operations of a key/value and data-structure store.
///
/// Implementors only need to provide [`StoreEngine::execute`]; the typed helpers are built
/// on top of it. [`StoreEngine::execute_batch`] should be overridden when a batch can be sent
/// in one round trip.
pub trait StoreEngine: Clone + Send + 'static {
    /// executes a single request
    fn execute(&self, req: Request) -> Result<Value>;

    /// executes a group of requests, returning one [`Response`] per request in request order.
    ///
    /// A failure of one request is reported in its `Response::Err` and does not stop the
    /// remaining requests. An `Err` return means the batch as a whole could not be executed.
    fn execute_batch(&self, reqs: Vec<Request>) -> Result<Vec<Response>> {
        Ok(reqs
            .into_iter()
            .map(|req| match self.execute(req) {
                Ok(value) => Response::Ok(value),
                Err(e) => Response::Err(e.to_string()),
            })
            .collect())
    }

    /// sets the `value` of the bucket at `key`
    fn set(&self, key: String, value: String) -> Result<()> {
        self.execute(Request::Set { key, value }).map(|_| ())
    }

    /// gets the value of the bucket at `key`, `None` if the bucket does not exist
    fn get(&self, key: String) -> Result<Option<String>> {
        self.execute(Request::Get { key })?.into_opt_string()
    }

    /// gets the value of the bucket at `key` and deletes the bucket
    fn get_and_delete(&self, key: String) -> Result<Option<String>> {
        self.execute(Request::GetAndDelete { key })?.into_opt_string()
    }

    /// adds `member` to `set`, returns `false` if it was already a member
    fn set_add(&self, set: String, member: String) -> Result<bool> {
        self.execute(Request::SetAdd { set, member })?.into_bool()
    }

    /// removes `member` from `set`, returns `false` if it was not a member
    fn set_remove(&self, set: String, member: String) -> Result<bool> {
        self.execute(Request::SetRemove { set, member })?.into_bool()
    }

    /// up to `count` distinct, randomly chosen members of `set`
    fn set_random(&self, set: String, count: usize) -> Result<Vec<String>> {
        self.execute(Request::SetRandom { set, count })?.into_list()
    }

    /// number of members in `set`
    fn set_size(&self, set: String) -> Result<usize> {
        Ok(self.execute(Request::SetSize { set })?.into_int()? as usize)
    }

    /// whether `set` has no members
    fn set_is_empty(&self, set: String) -> Result<bool> {
        Ok(self.set_size(set)? == 0)
    }

    /// all members of `set`
    fn set_members(&self, set: String) -> Result<Vec<String>> {
        self.execute(Request::SetMembers { set })?.into_list()
    }

    /// increments `counter` and returns the new value
    fn incr(&self, counter: String) -> Result<i64> {
        self.execute(Request::Incr { counter })?.into_int()
    }

    /// current value of `counter`, 0 if it does not exist
    fn counter_get(&self, counter: String) -> Result<i64> {
        self.execute(Request::CounterGet { counter })?.into_int()
    }

    /// appends `message` to the tail of `queue`
    fn offer(&self, queue: String, message: String) -> Result<()> {
        self.execute(Request::Offer { queue, message }).map(|_| ())
    }

    /// removes and returns the head of `queue`
    fn poll(&self, queue: String) -> Result<Option<String>> {
        self.execute(Request::Poll { queue })?.into_opt_string()
    }

    /// returns the head of `queue` without removing it
    fn peek(&self, queue: String) -> Result<Option<String>> {
        self.execute(Request::Peek { queue })?.into_opt_string()
    }

    /// number of messages in `queue`
    fn queue_size(&self, queue: String) -> Result<usize> {
        Ok(self.execute(Request::QueueSize { queue })?.into_int()? as usize)
    }

    /// whether `queue` has no messages
    fn queue_is_empty(&self, queue: String) -> Result<bool> {
        Ok(self.queue_size(queue)? == 0)
    }

    /// whether `key` exists, whatever its type
    fn exists(&self, key: String) -> Result<bool> {
        self.execute(Request::Exists { key })?.into_bool()
    }

    /// deletes `key`, returns `false` if it did not exist
    fn delete(&self, key: String) -> Result<bool> {
        self.execute(Request::Delete { key })?.into_bool()
    }
}

mod memory;

pub use self::memory::MemStore;
