#![deny(missing_docs)]
//! Bulk transfer and queue coordination over a key-value / data-structure store.
//!
//! This crate drives a store through the [`StoreEngine`] trait and provides two engines on top
//! of it, as well as a [`kvpipe-server`] executable that serves an in-memory store and a
//! [`kvpipe-demo`] executable that runs both engines against it.
//!
//! ## Batch Pipeline
//! [`BatchPipeline`] loads a target number of items into the store and later removes them
//! again, in fixed-size batches:
//!
//! - every item is a bucket holding `"Value: " + id`, and its `id` is a member of a
//! "working set"
//! - a batch of up to `batch_size` items (5,000 by default) is sent as one [`Batch`], i.e. one
//! network round trip, and executed on a [`ThreadPool`] thread while the pipeline waits on its
//! [`BatchHandle`]
//! - a [`ProgressCounter`] in the store is incremented after every batch that completed cleanly
//! and deleted once the operation is over
//! - a faulted batch (timeout, failure, failing requests) is logged and never retried; the
//! pipeline moves on to the next batch and reports the fault in its [`PipelineReport`]
//!
//! Removal draws random members of the working set rather than walking it in order.
//!
//! ## Queue Coordinator
//! [`QueueCoordinator`] runs one producer thread that offers messages to a store queue and a
//! pool of consumer threads that race to poll them. Consumers park on a [`WakeSignal`] (a mutex
//! and condition variable) while the queue is empty. Every message is received by exactly one
//! consumer.
//!
//! ## Stores
//! [`MemStore`] is an in-process engine. [`StoreClient`] forwards requests to a
//! [`StoreServer`] over TCP, using a custom protocol: a [`Request`] encoded as JSON, answered by
//! a JSON [`Response`]. A whole batch travels as a single `Request::Batch` frame.
//!
//! [`kvpipe-server`]: ./bin/kvpipe-server.rs
//! [`kvpipe-demo`]: ./bin/kvpipe-demo.rs

pub use batch::{Batch, BatchHandle, BatchOutcome};
pub use client::StoreClient;
pub use command::{Request, Response, Value};
pub use config::Config;
pub use coordinator::{ConsumerReport, CoordinatorReport, QueueCoordinator, Wake, WakeSignal};
pub use counter::ProgressCounter;
pub use engine::{MemStore, StoreEngine};
pub use error::{Result, StoreError};
pub use interrupt::Interrupt;
pub use pipeline::{BatchPipeline, Operation, PipelineOptions, PipelineReport, PipelineState};
pub use server::StoreServer;
pub use thread_pool::{RayonThreadPool, SharedQueueThreadPool, ThreadPool};

mod batch;
mod client;
mod command;
pub mod config;
pub mod coordinator;
mod counter;
mod engine;
mod error;
mod interrupt;
pub mod pipeline;
mod server;
pub mod thread_pool;
