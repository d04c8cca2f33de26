//! Conversion between resolved results and the backend's storable payload.

use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::value::Row;

/// What the coordinator stores for one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    Rows(Vec<Row>),
    Count(u64),
}

impl Payload {
    pub fn into_rows(self) -> Option<Vec<Row>> {
        match self {
            Payload::Rows(rows) => Some(rows),
            Payload::Count(_) => None,
        }
    }

    pub fn as_count(&self) -> Option<u64> {
        match self {
            Payload::Count(count) => Some(*count),
            Payload::Rows(_) => None,
        }
    }
}

pub trait Codec: Send + Sync {
    fn encode(&self, payload: &Payload) -> Result<String, CacheError>;
    fn decode(&self, stored: &str) -> Result<Payload, CacheError>;
}

/// JSON payloads via serde_json.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, payload: &Payload) -> Result<String, CacheError> {
        serde_json::to_string(payload).map_err(|e| CacheError::Codec(e.to_string()))
    }

    fn decode(&self, stored: &str) -> Result<Payload, CacheError> {
        serde_json::from_str(stored).map_err(|e| CacheError::Codec(e.to_string()))
    }
}
