//! Key/value domain types

use serde::{Deserialize, Serialize};

/// Persistent key/value pair, at most one row per key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: Option<String>,
}
