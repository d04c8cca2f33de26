//! Query-result and single-record cache.
//!
//! This module provides the cache key deriver, the coordinator that applies
//! TTL and failure policy, and two backends:
//!
//! - `memory`: a process-local map
//! - `networked`: a shared SQLite database that several processes can open,
//!   with WAL mode and versioned migrations

pub mod backend;
pub mod clock;
pub mod codec;
pub mod connection;
pub mod coordinator;
pub mod entries;
pub mod key;
pub mod memory;
pub mod migrations;

pub use backend::{CacheBackend, CacheEntry};
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{Codec, JsonCodec, Payload};
pub use connection::SqliteBackend;
pub use coordinator::CacheCoordinator;
pub use key::{ResultKind, derive, derive_for, model_prefix, record_key};
pub use memory::MemoryBackend;
