use std::time::Duration;
use thiserror::Error;

/// type alias for all operations in this crate that could fail with a [`StoreError`]
pub type Result<T> = std::result::Result<T, StoreError>;

/// The Error variants used by the store engines, the client/server and the pipelines.
/// It wraps lower level errors from std and third party crates
#[derive(Error, Debug)]
pub enum StoreError {
    /// variant for errors caused by file or socket IO
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// serde errors while encoding/decoding requests, responses or config files
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// an operation was made against a key holding a different type of value
    #[error("WRONGTYPE key '{key}' does not hold a {expected}")]
    WrongType {
        /// the key that was accessed
        key: String,
        /// the type the operation expected
        expected: &'static str,
    },

    /// an error message returned by a remote store
    #[error("{0}")]
    Remote(String),

    /// waiting on a response took longer than the allowed duration
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// a blocking wait was abandoned because its thread was interrupted
    #[error("interrupted while waiting")]
    Interrupted,

    /// a caller supplied an argument outside of the accepted range
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// a bulk load was started against a working set that still holds members
    #[error("working set '{name}' is not empty, it holds {size} members")]
    WorkingSetNotEmpty {
        /// name of the working set
        name: String,
        /// number of members found
        size: usize,
    },

    /// the store replied with a value that does not fit the request
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// configuration could not be loaded or is invalid
    #[error("configuration error: {0}")]
    Config(String),

    /// a thread pool could not be built
    #[error("thread pool error: {0}")]
    Pool(String),
}
