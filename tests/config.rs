use std::fs;
use std::time::Duration;

use kvpipe::{Config, StoreError};
use tempfile::TempDir;
use tracing::Level;

fn write_config(text: &str) -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().expect("unable to create temporary working directory");
    let path = dir.path().join("demo.json");
    fs::write(&path, text).unwrap();
    (dir, path)
}

#[test]
fn empty_object_gives_defaults() {
    let (_dir, path) = write_config("{}");
    let config = Config::load(&path).unwrap();

    assert_eq!(config.store.addr, "127.0.0.1:4000");
    assert_eq!(config.response_timeout(), Duration::from_secs(30));
    assert_eq!(config.pipeline.item_count, 100_789);
    assert_eq!(config.pipeline.batch_size, 5_000);
    assert_eq!(config.pipeline.working_set, "identifiers");
    assert_eq!(config.queue.name, "jonathans-queue");
    assert_eq!(config.queue.consumers, 3);
    assert_eq!(config.queue.messages, 10);
    assert_eq!(config.level().unwrap(), Level::INFO);
}

#[test]
fn file_values_override_defaults() {
    let (_dir, path) = write_config(
        r#"{
            "store": { "addr": "10.0.0.1:7000", "response_timeout_ms": 1500 },
            "pipeline": { "batch_size": 100, "remove_counter": "drained" },
            "queue": { "consumers": 5 },
            "log_level": "debug"
        }"#,
    );
    let config = Config::load(&path).unwrap();

    assert_eq!(config.store.addr, "10.0.0.1:7000");
    assert_eq!(config.level().unwrap(), Level::DEBUG);
    assert_eq!(config.queue.consumers, 5);
    assert_eq!(config.queue.name, "jonathans-queue");

    let options = config.pipeline_options();
    assert_eq!(options.batch_size, 100);
    assert_eq!(options.load_counter, "loadBatchNumber");
    assert_eq!(options.remove_counter, "drained");
    assert_eq!(options.response_timeout, Duration::from_millis(1500));
}

#[test]
fn invalid_values_are_rejected() {
    for text in &[
        r#"{ "pipeline": { "batch_size": 0 } }"#,
        r#"{ "queue": { "consumers": 0 } }"#,
        r#"{ "log_level": "loud" }"#,
    ] {
        let (_dir, path) = write_config(text);
        assert!(
            matches!(Config::load(&path), Err(StoreError::Config(_))),
            "{} was accepted",
            text
        );
    }
}

#[test]
fn malformed_json_is_a_serde_error() {
    let (_dir, path) = write_config(r#"{ "pipeline": { "batch_size": "many" } }"#);
    assert!(matches!(Config::load(&path), Err(StoreError::Serde(_))));
}

#[test]
fn missing_file_is_a_config_error() {
    let dir = TempDir::new().unwrap();
    let result = Config::load(&dir.path().join("absent.json"));
    assert!(matches!(result, Err(StoreError::Config(_))));
}

#[test]
fn default_matches_an_empty_file() {
    let (_dir, path) = write_config("{}");
    let loaded = Config::load(&path).unwrap();
    let default = Config::default();
    assert!(default.validate().is_ok());
    assert_eq!(
        serde_json::to_value(&loaded).unwrap(),
        serde_json::to_value(&default).unwrap()
    );
}
