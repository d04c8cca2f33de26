//! Cache coordinator: TTL, namespacing and failure policy in front of a
//! pluggable backend.
//!
//! Backend failures (including timeouts) are absorbed and logged unless the
//! call is strict, in which case they surface as
//! [`Error::CacheUnavailable`]. Concurrent callers may both miss and both
//! write the same key; the second write simply overwrites the first.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::backend::{CacheBackend, CacheEntry};
use super::clock::{Clock, SystemClock};
use super::codec::{Codec, JsonCodec, Payload};
use super::connection::SqliteBackend;
use super::memory::MemoryBackend;
use crate::Error;
use crate::config::{CacheBackendKind, Settings};
use crate::error::CacheError;
use crate::options::CallOptions;

/// Front door to the cache backend.
#[derive(Clone)]
pub struct CacheCoordinator {
    backend: Arc<dyn CacheBackend>,
    codec: Arc<dyn Codec>,
    clock: Arc<dyn Clock>,
}

impl CacheCoordinator {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend, codec: Arc::new(JsonCodec), clock: Arc::new(SystemClock) }
    }

    /// Build the backend selected by the settings.
    pub async fn from_settings(settings: &Settings) -> Result<Self, CacheError> {
        let backend: Arc<dyn CacheBackend> = match settings.cache_backend {
            CacheBackendKind::Memory => Arc::new(MemoryBackend::new()),
            CacheBackendKind::Networked => Arc::new(SqliteBackend::open(&settings.cache_address).await?),
        };
        tracing::debug!(backend = ?settings.cache_backend, address = %settings.cache_address, "cache backend ready");
        Ok(Self::new(backend))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    /// Cached payload for `key`, if present and not expired.
    ///
    /// Expired entries are reported absent and removed on the way out.
    pub async fn fetch(&self, key: &str, opts: CallOptions) -> Result<Option<Payload>, Error> {
        let entry = match guard(opts.timeout, self.backend.get(key)).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                tracing::debug!(key, "cache miss");
                return Ok(None);
            }
            Err(err) => return degrade(err, opts, key, "fetch").map(|()| None),
        };

        let now = self.clock.now();
        if entry.is_expired(now) {
            tracing::debug!(key, "cache entry expired");
            if let Err(err) = guard(opts.timeout, self.backend.delete_expired(key, now)).await {
                tracing::debug!(key, error = %err, "lazy eviction failed");
            }
            return Ok(None);
        }

        match self.codec.decode(&entry.value) {
            Ok(payload) => {
                tracing::debug!(key, "cache hit");
                Ok(Some(payload))
            }
            Err(err) => {
                tracing::warn!(key, error = %err, "discarding undecodable cache entry");
                if let Err(err) = guard(opts.timeout, self.backend.delete(key)).await {
                    tracing::debug!(key, error = %err, "eviction of corrupt entry failed");
                }
                Ok(None)
            }
        }
    }

    /// Store a fully computed payload. `None` TTL means no expiry.
    pub async fn write(
        &self, key: &str, payload: &Payload, ttl: Option<Duration>, opts: CallOptions,
    ) -> Result<(), Error> {
        let value = match self.codec.encode(payload) {
            Ok(value) => value,
            Err(err) => return degrade(err, opts, key, "write"),
        };
        let expires_at = match ttl.map(chrono::Duration::from_std).transpose() {
            Ok(ttl) => ttl.map(|ttl| self.clock.now() + ttl),
            Err(err) => return Err(Error::InvalidArgument(format!("ttl out of range: {err}"))),
        };

        let entry = CacheEntry { key: key.to_string(), value, expires_at };
        match guard(opts.timeout, self.backend.set(entry)).await {
            Ok(()) => {
                tracing::debug!(key, ttl = ?ttl, "cache write");
                Ok(())
            }
            Err(err) => degrade(err, opts, key, "write"),
        }
    }

    pub async fn delete(&self, key: &str, opts: CallOptions) -> Result<bool, Error> {
        match guard(opts.timeout, self.backend.delete(key)).await {
            Ok(deleted) => Ok(deleted),
            Err(err) => degrade(err, opts, key, "delete").map(|()| false),
        }
    }

    pub async fn delete_keys(&self, keys: &[String], opts: CallOptions) -> Result<u64, Error> {
        if keys.is_empty() {
            return Ok(0);
        }
        match guard(opts.timeout, self.backend.delete_many(keys)).await {
            Ok(deleted) => Ok(deleted),
            Err(err) => degrade(err, opts, &keys.join(","), "delete_many").map(|()| 0),
        }
    }

    /// Delete every entry whose key starts with `prefix`.
    pub async fn delete_prefix(&self, prefix: &str, opts: CallOptions) -> Result<u64, Error> {
        match guard(opts.timeout, self.backend.delete_prefix(prefix)).await {
            Ok(deleted) => {
                tracing::debug!(prefix, deleted, "cache prefix invalidated");
                Ok(deleted)
            }
            Err(err) => degrade(err, opts, prefix, "delete_prefix").map(|()| 0),
        }
    }

    /// Eagerly remove expired entries.
    pub async fn purge_expired(&self, opts: CallOptions) -> Result<u64, Error> {
        match guard(opts.timeout, self.backend.purge_expired(self.clock.now())).await {
            Ok(deleted) => Ok(deleted),
            Err(err) => degrade(err, opts, "*", "purge_expired").map(|()| 0),
        }
    }
}

async fn guard<T>(timeout: Duration, call: impl Future<Output = Result<T, CacheError>>) -> Result<T, CacheError> {
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| CacheError::Timeout(timeout))?
}

fn degrade(err: CacheError, opts: CallOptions, key: &str, op: &'static str) -> Result<(), Error> {
    if opts.strict {
        return Err(Error::CacheUnavailable(err));
    }
    tracing::warn!(key, op, error = %err, "cache unavailable, continuing without it");
    Ok(())
}
