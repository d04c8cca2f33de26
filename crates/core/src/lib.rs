//! Query-builder and cache-coherence core for quarry.
//!
//! This crate provides:
//! - Immutable, composable query specs built through chained calls
//! - Deterministic cache keys and a TTL cache coordinator with memory and
//!   shared SQLite backends
//! - A resolver that runs specs against a pluggable storage collaborator
//! - Post-commit cache invalidation for writes
//! - Settings loading and unified error types

pub mod cache;
pub mod config;
pub mod error;
pub mod invalidation;
pub mod model;
pub mod options;
pub mod query;
pub mod resolver;
pub mod session;
pub mod storage;
pub mod value;

pub use cache::{CacheCoordinator, Payload, derive, record_key};
pub use config::{CacheBackendKind, Settings, configure};
pub use error::{CacheError, Error, StorageError};
pub use invalidation::InvalidationReport;
pub use model::{Model, ModelMeta, Schema, Trigger};
pub use options::CallOptions;
pub use query::{Query, QuerySpec};
pub use session::{Quarry, QuarryBuilder};
pub use storage::{FilteredQuery, MemoryStorage, Storage, WriteOp};
pub use value::{Row, Value};
