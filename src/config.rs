//! Configuration for the demo binaries, read from a JSON file.
//!
//! Every field has a default, so `{}` is a valid configuration file.
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::coordinator::DEFAULT_CONSUMERS;
use crate::pipeline::{PipelineOptions, DEFAULT_BATCH_SIZE};
use crate::{Result, StoreError};

/// default location of the configuration file
pub const DEFAULT_CONFIG_FILE: &str = "config/demo.json";

/// default address of the store server
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:4000";

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// how to reach the store
    #[serde(default)]
    pub store: StoreConfig,

    /// bulk load/remove settings
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// producer/consumer settings
    #[serde(default)]
    pub queue: QueueConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Store connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// IP:PORT of the store server
    #[serde(default = "default_addr")]
    pub addr: String,

    /// read timeout for a single response
    #[serde(default = "default_response_timeout")]
    pub response_timeout_ms: u64,
}

/// Batch pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// number of items to load and then remove
    #[serde(default = "default_item_count")]
    pub item_count: usize,

    /// items per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// name of the working set
    #[serde(default = "default_working_set")]
    pub working_set: String,

    /// progress counter of the load
    #[serde(default = "default_load_counter")]
    pub load_counter: String,

    /// progress counter of the removal
    #[serde(default = "default_remove_counter")]
    pub remove_counter: String,

    /// faulted batches in a row before a removal gives up
    #[serde(default = "default_max_consecutive_faults")]
    pub max_consecutive_faults: usize,
}

/// Queue coordination configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// name of the store queue
    #[serde(default = "default_queue_name")]
    pub name: String,

    /// number of consumer threads
    #[serde(default = "default_consumers")]
    pub consumers: usize,

    /// number of messages to produce, "1" to "N"
    #[serde(default = "default_messages")]
    pub messages: usize,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_addr() -> String {
    DEFAULT_ADDRESS.to_string()
}
fn default_response_timeout() -> u64 {
    30_000
}
fn default_item_count() -> usize {
    100_789
}
fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}
fn default_working_set() -> String {
    "identifiers".to_string()
}
fn default_load_counter() -> String {
    "loadBatchNumber".to_string()
}
fn default_remove_counter() -> String {
    "removeBatchNumber".to_string()
}
fn default_max_consecutive_faults() -> usize {
    16
}
fn default_queue_name() -> String {
    "jonathans-queue".to_string()
}
fn default_consumers() -> usize {
    DEFAULT_CONSUMERS
}
fn default_messages() -> usize {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            pipeline: PipelineConfig::default(),
            queue: QueueConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            response_timeout_ms: default_response_timeout(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            item_count: default_item_count(),
            batch_size: default_batch_size(),
            working_set: default_working_set(),
            load_counter: default_load_counter(),
            remove_counter: default_remove_counter(),
            max_consecutive_faults: default_max_consecutive_faults(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: default_queue_name(),
            consumers: default_consumers(),
            messages: default_messages(),
        }
    }
}

impl Config {
    /// reads and validates the configuration in the JSON file at `path`
    pub fn load(path: &Path) -> Result<Config> {
        let text = fs::read_to_string(path)
            .map_err(|e| StoreError::Config(format!("could not read {:?}: {}", path, e)))?;
        let config: Config = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// checks values that serde can not
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.batch_size == 0 {
            return Err(StoreError::Config("pipeline.batch_size must be greater than zero".into()));
        }
        if self.queue.consumers == 0 {
            return Err(StoreError::Config("queue.consumers must be greater than zero".into()));
        }
        self.level()?;
        Ok(())
    }

    /// the parsed logging level
    pub fn level(&self) -> Result<Level> {
        self.log_level
            .parse()
            .map_err(|_| StoreError::Config(format!("unknown log level '{}'", self.log_level)))
    }

    /// the response timeout as a [`Duration`]
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.store.response_timeout_ms)
    }

    /// the [`PipelineOptions`] described by this configuration
    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            batch_size: self.pipeline.batch_size,
            working_set: self.pipeline.working_set.clone(),
            load_counter: self.pipeline.load_counter.clone(),
            remove_counter: self.pipeline.remove_counter.clone(),
            response_timeout: self.response_timeout(),
            max_consecutive_faults: self.pipeline.max_consecutive_faults,
        }
    }
}
