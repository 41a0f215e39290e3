use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use dashmap::DashMap;
use rand::seq::IteratorRandom;
use tracing::trace;

use super::StoreEngine;
use crate::command::{Request, Value};
use crate::error::{Result, StoreError};

/// the data held under a single key
#[derive(Debug)]
enum Entry {
    Bucket(String),
    Set(HashSet<String>),
    Counter(i64),
    Queue(VecDeque<String>),
}

impl Entry {
    /// sets and queues disappear from the keyspace once they hold nothing
    fn is_empty_collection(&self) -> bool {
        match self {
            Entry::Set(members) => members.is_empty(),
            Entry::Queue(messages) => messages.is_empty(),
            _ => false,
        }
    }
}

/// An in-process [`StoreEngine`] holding buckets, sets, counters and queues in one concurrent
/// keyspace.
///
/// Cloning a `MemStore` is cheap; all clones share the same keyspace. Every single request is
/// atomic with respect to its key. A batch is executed request by request, so it is not atomic
/// as a whole.
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    keyspace: Arc<DashMap<String, Entry>>,
}

impl MemStore {
    /// creates an empty store
    pub fn new() -> Self {
        MemStore::default()
    }

    /// number of keys in the store
    pub fn len(&self) -> usize {
        self.keyspace.len()
    }

    /// whether the store holds no keys at all
    pub fn is_empty(&self) -> bool {
        self.keyspace.is_empty()
    }

    fn bucket_get(&self, key: String) -> Result<Value> {
        match self.keyspace.get(&key) {
            None => Ok(Value::Nil),
            Some(entry) => match entry.value() {
                Entry::Bucket(value) => Ok(Value::Str(value.clone())),
                _ => Err(wrong_type(key, "bucket")),
            },
        }
    }

    fn bucket_get_and_delete(&self, key: String) -> Result<Value> {
        if let Some((_, Entry::Bucket(value))) = self
            .keyspace
            .remove_if(&key, |_, entry| matches!(entry, Entry::Bucket(_)))
        {
            return Ok(Value::Str(value));
        }
        if self.keyspace.contains_key(&key) {
            return Err(wrong_type(key, "bucket"));
        }
        Ok(Value::Nil)
    }

    fn do_set_add(&self, set: String, member: String) -> Result<Value> {
        let mut entry = self
            .keyspace
            .entry(set.clone())
            .or_insert_with(|| Entry::Set(HashSet::new()));
        match entry.value_mut() {
            Entry::Set(members) => Ok(Value::Bool(members.insert(member))),
            _ => Err(wrong_type(set, "set")),
        }
    }

    fn do_set_remove(&self, set: String, member: String) -> Result<Value> {
        let removed = match self.keyspace.get_mut(&set) {
            None => false,
            Some(mut entry) => match entry.value_mut() {
                Entry::Set(members) => members.remove(&member),
                _ => return Err(wrong_type(set, "set")),
            },
        };
        self.prune(&set);
        Ok(Value::Bool(removed))
    }

    fn do_set_random(&self, set: String, count: usize) -> Result<Value> {
        match self.keyspace.get(&set) {
            None => Ok(Value::List(Vec::new())),
            Some(entry) => match entry.value() {
                Entry::Set(members) => {
                    let sample = members
                        .iter()
                        .choose_multiple(&mut rand::thread_rng(), count)
                        .into_iter()
                        .cloned()
                        .collect();
                    Ok(Value::List(sample))
                }
                _ => Err(wrong_type(set, "set")),
            },
        }
    }

    fn do_set_size(&self, set: String) -> Result<Value> {
        match self.keyspace.get(&set) {
            None => Ok(Value::Int(0)),
            Some(entry) => match entry.value() {
                Entry::Set(members) => Ok(Value::Int(members.len() as i64)),
                _ => Err(wrong_type(set, "set")),
            },
        }
    }

    fn do_set_members(&self, set: String) -> Result<Value> {
        match self.keyspace.get(&set) {
            None => Ok(Value::List(Vec::new())),
            Some(entry) => match entry.value() {
                Entry::Set(members) => Ok(Value::List(members.iter().cloned().collect())),
                _ => Err(wrong_type(set, "set")),
            },
        }
    }

    fn do_incr(&self, counter: String) -> Result<Value> {
        let mut entry = self
            .keyspace
            .entry(counter.clone())
            .or_insert(Entry::Counter(0));
        match entry.value_mut() {
            Entry::Counter(count) => {
                *count += 1;
                Ok(Value::Int(*count))
            }
            _ => Err(wrong_type(counter, "counter")),
        }
    }

    fn do_counter_get(&self, counter: String) -> Result<Value> {
        match self.keyspace.get(&counter) {
            None => Ok(Value::Int(0)),
            Some(entry) => match entry.value() {
                Entry::Counter(count) => Ok(Value::Int(*count)),
                _ => Err(wrong_type(counter, "counter")),
            },
        }
    }

    fn do_offer(&self, queue: String, message: String) -> Result<Value> {
        let mut entry = self
            .keyspace
            .entry(queue.clone())
            .or_insert_with(|| Entry::Queue(VecDeque::new()));
        match entry.value_mut() {
            Entry::Queue(messages) => {
                messages.push_back(message);
                Ok(Value::Bool(true))
            }
            _ => Err(wrong_type(queue, "queue")),
        }
    }

    fn do_poll(&self, queue: String) -> Result<Value> {
        let head = match self.keyspace.get_mut(&queue) {
            None => None,
            Some(mut entry) => match entry.value_mut() {
                Entry::Queue(messages) => messages.pop_front(),
                _ => return Err(wrong_type(queue, "queue")),
            },
        };
        self.prune(&queue);
        Ok(head.map(Value::Str).unwrap_or(Value::Nil))
    }

    fn do_peek(&self, queue: String) -> Result<Value> {
        match self.keyspace.get(&queue) {
            None => Ok(Value::Nil),
            Some(entry) => match entry.value() {
                Entry::Queue(messages) => Ok(messages
                    .front()
                    .cloned()
                    .map(Value::Str)
                    .unwrap_or(Value::Nil)),
                _ => Err(wrong_type(queue, "queue")),
            },
        }
    }

    fn do_queue_size(&self, queue: String) -> Result<Value> {
        match self.keyspace.get(&queue) {
            None => Ok(Value::Int(0)),
            Some(entry) => match entry.value() {
                Entry::Queue(messages) => Ok(Value::Int(messages.len() as i64)),
                _ => Err(wrong_type(queue, "queue")),
            },
        }
    }

    /// removes `key` if it is a set or queue that has become empty
    fn prune(&self, key: &str) {
        if self
            .keyspace
            .remove_if(key, |_, entry| entry.is_empty_collection())
            .is_some()
        {
            trace!(key, "pruned empty collection");
        }
    }
}

impl StoreEngine for MemStore {
    fn execute(&self, req: Request) -> Result<Value> {
        match req {
            Request::Get { key } => self.bucket_get(key),
            Request::Set { key, value } => {
                self.keyspace.insert(key, Entry::Bucket(value));
                Ok(Value::Nil)
            }
            Request::GetAndDelete { key } => self.bucket_get_and_delete(key),
            Request::SetAdd { set, member } => self.do_set_add(set, member),
            Request::SetRemove { set, member } => self.do_set_remove(set, member),
            Request::SetRandom { set, count } => self.do_set_random(set, count),
            Request::SetSize { set } => self.do_set_size(set),
            Request::SetMembers { set } => self.do_set_members(set),
            Request::Incr { counter } => self.do_incr(counter),
            Request::CounterGet { counter } => self.do_counter_get(counter),
            Request::Offer { queue, message } => self.do_offer(queue, message),
            Request::Poll { queue } => self.do_poll(queue),
            Request::Peek { queue } => self.do_peek(queue),
            Request::QueueSize { queue } => self.do_queue_size(queue),
            Request::Exists { key } => Ok(Value::Bool(self.keyspace.contains_key(&key))),
            Request::Delete { key } => Ok(Value::Bool(self.keyspace.remove(&key).is_some())),
            Request::Batch(_) => Err(StoreError::InvalidArgument(
                "nested batches are not supported".to_string(),
            )),
        }
    }
}

fn wrong_type(key: String, expected: &'static str) -> StoreError {
    StoreError::WrongType { key, expected }
}
