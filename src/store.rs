//! The shard-local storage engine: a single cache instance plus the operations a
//! shard task runs against it. Callers (see `shard.rs`) guarantee only one task ever
//! touches a given `Store`, so no internal locking is needed here.

use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::future::Cache;

use crate::protocol::{StorageCommandResponse, Value};
use crate::request::NumericResult;

/// Default upper bound on the total weighted size (bytes of value data) a single
/// shard's cache will hold.
const DEFAULT_SHARD_CAPACITY: u64 = 256 * 1024 * 1024;

/// A cached value plus the TTL it was inserted or last updated with.
#[derive(Clone)]
struct Entry {
    value: Value,
    ttl: Option<Duration>,
}

struct Expiry;

impl moka::Expiry<String, Arc<Entry>> for Expiry {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &Arc<Entry>,
        _created_at: Instant,
    ) -> Option<Duration> {
        entry.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &Arc<Entry>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        entry.ttl
    }
}

pub struct Store {
    cas_counter: u64,
    cache: Cache<String, Arc<Entry>>,
}

impl Store {
    pub fn new(max_capacity_bytes: u64) -> Store {
        let cache = Cache::builder()
            .weigher(|_: &String, entry: &Arc<Entry>| entry.value.data.len() as u32)
            .max_capacity(max_capacity_bytes)
            .expire_after(Expiry {})
            .build();
        Store {
            cas_counter: 0,
            cache,
        }
    }

    fn next_cas(&mut self) -> u64 {
        self.cas_counter += 1;
        self.cas_counter
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.cache.get(key).await.map(|entry| entry.value.clone())
    }

    pub async fn delete(&mut self, key: &str) -> bool {
        self.cache.remove(key).await.is_some()
    }

    async fn insert(&mut self, key: String, flags: u32, exp_time: u32, data: Vec<u8>) {
        let cas = self.next_cas();
        let entry = Arc::new(Entry {
            value: Value { flags, cas, data },
            ttl: crate::protocol::exptime_to_duration(exp_time),
        });
        self.cache.insert(key, entry).await;
    }

    pub async fn set(&mut self, key: String, flags: u32, exp_time: u32, data: Vec<u8>) -> StorageCommandResponse {
        self.insert(key, flags, exp_time, data).await;
        StorageCommandResponse::Stored
    }

    pub async fn add(&mut self, key: String, flags: u32, exp_time: u32, data: Vec<u8>) -> StorageCommandResponse {
        if self.cache.get(&key).await.is_some() {
            StorageCommandResponse::NotStored
        } else {
            self.insert(key, flags, exp_time, data).await;
            StorageCommandResponse::Stored
        }
    }

    pub async fn replace(&mut self, key: String, flags: u32, exp_time: u32, data: Vec<u8>) -> StorageCommandResponse {
        if self.cache.get(&key).await.is_none() {
            StorageCommandResponse::NotStored
        } else {
            self.insert(key, flags, exp_time, data).await;
            StorageCommandResponse::Stored
        }
    }

    pub async fn append(&mut self, key: String, flags: u32, exp_time: u32, mut data: Vec<u8>) -> StorageCommandResponse {
        match self.cache.get(&key).await {
            Some(entry) => {
                data.reserve(entry.value.data.len());
                data.splice(0..0, entry.value.data.iter().cloned());
                self.insert(key, flags, exp_time, data).await;
                StorageCommandResponse::Stored
            }
            None => StorageCommandResponse::NotStored,
        }
    }

    pub async fn prepend(&mut self, key: String, flags: u32, exp_time: u32, mut data: Vec<u8>) -> StorageCommandResponse {
        match self.cache.get(&key).await {
            Some(entry) => {
                data.extend_from_slice(&entry.value.data);
                self.insert(key, flags, exp_time, data).await;
                StorageCommandResponse::Stored
            }
            None => StorageCommandResponse::NotStored,
        }
    }

    pub async fn cas(
        &mut self,
        key: String,
        flags: u32,
        exp_time: u32,
        data: Vec<u8>,
        cas_unique: u64,
    ) -> StorageCommandResponse {
        match self.cache.get(&key).await {
            None => StorageCommandResponse::NotFound,
            Some(entry) if entry.value.cas == cas_unique => {
                self.insert(key, flags, exp_time, data).await;
                StorageCommandResponse::Stored
            }
            Some(_) => StorageCommandResponse::Exists,
        }
    }

    /// Real read-modify-write: parse the current value as an ASCII-decimal `u64`,
    /// apply the delta, and store the result back as ASCII. `incr` wraps on
    /// overflow; `decr` saturates at zero, matching memcached's documented behavior.
    pub async fn arithmetic(&mut self, key: &str, delta: u64, is_incr: bool) -> NumericResult {
        let Some(entry) = self.cache.get(key).await else {
            return NumericResult::NotFound;
        };
        let Ok(text) = std::str::from_utf8(&entry.value.data) else {
            return NumericResult::NotNumeric;
        };
        let Ok(current) = text.trim().parse::<u64>() else {
            return NumericResult::NotNumeric;
        };
        let updated = if is_incr {
            current.wrapping_add(delta)
        } else {
            current.saturating_sub(delta)
        };
        let flags = entry.value.flags;
        let ttl = entry.ttl;
        let cas = self.next_cas();
        let new_entry = Arc::new(Entry {
            value: Value {
                flags,
                cas,
                data: updated.to_string().into_bytes(),
            },
            ttl,
        });
        self.cache.insert(key.to_string(), new_entry).await;
        NumericResult::Ok(updated)
    }
}
