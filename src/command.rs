use serde::{Deserialize, Serialize};
use crate::{Result, StoreError};

/// These are the request "commands" that can be made to a store.
///
/// Keys share a single namespace: a key holds either a bucket value, a set, a counter or a
/// queue, and using a key as a different type is an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// get the value of a bucket
    Get {
        /// the bucket key
        key: String,
    },
    /// set the value of a bucket
    Set {
        /// the bucket key
        key: String,
        /// the value to set
        value: String,
    },
    /// get the value of a bucket and delete the bucket
    GetAndDelete {
        /// the bucket key
        key: String,
    },
    /// add a member to a set, creating the set if needed
    SetAdd {
        /// name of the set
        set: String,
        /// member to add
        member: String,
    },
    /// remove a member from a set
    SetRemove {
        /// name of the set
        set: String,
        /// member to remove
        member: String,
    },
    /// up to `count` distinct members of a set, chosen at random
    SetRandom {
        /// name of the set
        set: String,
        /// maximum number of members to return
        count: usize,
    },
    /// number of members in a set
    SetSize {
        /// name of the set
        set: String,
    },
    /// all members of a set
    SetMembers {
        /// name of the set
        set: String,
    },
    /// increment a counter and return its new value
    Incr {
        /// name of the counter
        counter: String,
    },
    /// current value of a counter
    CounterGet {
        /// name of the counter
        counter: String,
    },
    /// append a message to the tail of a queue
    Offer {
        /// name of the queue
        queue: String,
        /// the message
        message: String,
    },
    /// remove and return the head of a queue
    Poll {
        /// name of the queue
        queue: String,
    },
    /// return the head of a queue without removing it
    Peek {
        /// name of the queue
        queue: String,
    },
    /// number of messages in a queue
    QueueSize {
        /// name of the queue
        queue: String,
    },
    /// whether a key of any type exists
    Exists {
        /// the key
        key: String,
    },
    /// delete a key of any type
    Delete {
        /// the key
        key: String,
    },
    /// a group of requests executed in one round trip
    Batch(Vec<Request>),
}

/// A successful result of a single [`Request`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    /// no value, e.g. a missing bucket or an empty queue
    Nil,
    /// a boolean result, e.g. whether a member was added
    Bool(bool),
    /// an integer result, e.g. a counter or a size
    Int(i64),
    /// a string result
    Str(String),
    /// a list of strings, e.g. set members
    List(Vec<String>),
}

impl Value {
    /// converts a `Nil` or `Str` value into an optional string
    pub fn into_opt_string(self) -> Result<Option<String>> {
        match self {
            Value::Nil => Ok(None),
            Value::Str(s) => Ok(Some(s)),
            other => Err(unexpected("string", &other)),
        }
    }

    /// converts a `Bool` value
    pub fn into_bool(self) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(b),
            other => Err(unexpected("bool", &other)),
        }
    }

    /// converts an `Int` value
    pub fn into_int(self) -> Result<i64> {
        match self {
            Value::Int(i) => Ok(i),
            other => Err(unexpected("int", &other)),
        }
    }

    /// converts a `List` value, `Nil` is treated as an empty list
    pub fn into_list(self) -> Result<Vec<String>> {
        match self {
            Value::List(list) => Ok(list),
            Value::Nil => Ok(Vec::new()),
            other => Err(unexpected("list", &other)),
        }
    }
}

fn unexpected(expected: &str, got: &Value) -> StoreError {
    StoreError::UnexpectedResponse(format!("expected {} but got {:?}", expected, got))
}

/// The response Types that can be returned for any [`Request`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    /// this variant is returned when a request was successful
    Ok(Value),
    /// this variant is returned if an Error occurs while processing the request
    Err(String),
    /// one response per request of a [`Request::Batch`], in request order
    Batch(Vec<Response>),
}

impl Response {
    /// returns the error message if this response is an `Err`
    pub fn error(&self) -> Option<&str> {
        match self {
            Response::Err(msg) => Some(msg),
            _ => None,
        }
    }
}
