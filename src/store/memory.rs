use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{ttl_secs, Batch, KeyValueStore, Op, Reply};
use crate::error::StoreError;

/// An in-process [`KeyValueStore`] with Redis-like semantics.
///
/// Keys expire lazily: an expired key is dropped the next time anything touches it, so an
/// expired key is indistinguishable from one that never existed. Expiry is measured with
/// [`tokio::time::Instant`], which lets tests drive TTLs with a paused clock and
/// [`tokio::time::advance`].
///
/// TTLs are rounded to whole seconds exactly as [`RedisStore`](super::RedisStore) sends them,
/// so a zero TTL lasts one second here too.
///
/// Every call takes a single lock over the whole keyspace, so batches are always atomic.
///
/// ```
/// use std::time::Duration;
/// use rollcall_store::store::{KeyValueStore, MemoryStore};
///
/// # async fn example() -> Result<(), rollcall_store::StoreError> {
/// let store = MemoryStore::new();
/// store.set_with_expiry("greeting", b"hello", Duration::from_secs(60)).await?;
/// assert_eq!(store.get("greeting").await?, Some(b"hello".to_vec()));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    keyspace: Mutex<Keyspace>,
    offline: AtomicBool,
    stalled: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with [`StoreError::Unavailable`] until switched back.
    /// Used to exercise fail-open and fail-closed paths.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Makes every subsequent call fail with [`StoreError::Timeout`] until switched back, as a
    /// backend that accepts requests but never answers would.
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    /// Remaining TTL of `key`, or `None` if the key is missing or has no expiry.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let mut keyspace = self.keyspace.lock().ok()?;
        let expires_at = keyspace.live(key, now)?.expires_at?;
        Some(expires_at.saturating_duration_since(now))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.keyspace
            .lock()
            .map(|mut keyspace| keyspace.live(key, Instant::now()).is_some())
            .unwrap_or(false)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Keyspace>, StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".to_string()));
        }
        if self.stalled.load(Ordering::SeqCst) {
            return Err(StoreError::Timeout("memory store is stalled".to_string()));
        }
        self.keyspace
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }

    fn run(&self, op: Op) -> Result<Reply, StoreError> {
        self.lock()?.apply(op, Instant::now())
    }
}

#[derive(Debug, Clone)]
enum Value {
    Bytes(Vec<u8>),
    Hash(HashMap<String, Vec<u8>>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct Keyspace {
    entries: HashMap<String, Entry>,
}

impl Keyspace {
    fn live(&mut self, key: &str, now: Instant) -> Option<&mut Entry> {
        let expired = self
            .entries
            .get(key)
            .is_some_and(|entry| entry.expires_at.is_some_and(|at| at <= now));
        if expired {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn hash(&mut self, key: &str, now: Instant) -> Result<Option<&HashMap<String, Vec<u8>>>, StoreError> {
        match self.live(key, now) {
            None => Ok(None),
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => Ok(Some(&*hash)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn hash_mut(&mut self, key: &str, now: Instant) -> Result<&mut HashMap<String, Vec<u8>>, StoreError> {
        if self.live(key, now).is_none() {
            self.entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Hash(HashMap::new()),
                    expires_at: None,
                },
            );
        }
        match self.entries.get_mut(key) {
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => Ok(hash),
            _ => Err(wrong_type(key)),
        }
    }

    fn apply(&mut self, op: Op, now: Instant) -> Result<Reply, StoreError> {
        match op {
            Op::Get { key } => match self.live(&key, now) {
                None => Ok(Reply::Nil),
                Some(Entry {
                    value: Value::Bytes(bytes),
                    ..
                }) => Ok(Reply::Data(bytes.clone())),
                Some(_) => Err(wrong_type(&key)),
            },
            Op::Set { key, value, ttl } => {
                self.entries.insert(
                    key,
                    Entry {
                        value: Value::Bytes(value),
                        expires_at: ttl.and_then(|ttl| deadline(now, ttl)),
                    },
                );
                Ok(Reply::Ok)
            }
            Op::Delete { key } => {
                let existed = self.live(&key, now).is_some();
                self.entries.remove(&key);
                Ok(Reply::Int(i64::from(existed)))
            }
            Op::HashGet { key, field } => Ok(self
                .hash(&key, now)?
                .and_then(|hash| hash.get(&field).cloned())
                .map_or(Reply::Nil, Reply::Data)),
            Op::HashSet { key, field, value } => {
                let added = self.hash_mut(&key, now)?.insert(field, value).is_none();
                Ok(Reply::Int(i64::from(added)))
            }
            Op::Increment { key } => match self.live(&key, now) {
                None => {
                    self.entries.insert(
                        key,
                        Entry {
                            value: Value::Bytes(b"1".to_vec()),
                            expires_at: None,
                        },
                    );
                    Ok(Reply::Int(1))
                }
                Some(Entry {
                    value: Value::Bytes(bytes),
                    ..
                }) => {
                    let next = std::str::from_utf8(bytes)
                        .ok()
                        .and_then(|text| text.parse::<i64>().ok())
                        .and_then(|count| count.checked_add(1))
                        .ok_or_else(|| {
                            StoreError::Backend(format!("value at `{key}` is not an integer or out of range"))
                        })?;
                    *bytes = next.to_string().into_bytes();
                    Ok(Reply::Int(next))
                }
                Some(_) => Err(wrong_type(&key)),
            },
            Op::Expire { key, ttl } => match self.live(&key, now) {
                Some(entry) => {
                    entry.expires_at = deadline(now, ttl);
                    Ok(Reply::Int(1))
                }
                None => Ok(Reply::Int(0)),
            },
            Op::ExpireIfAbsent { key, ttl } => match self.live(&key, now) {
                Some(entry) if entry.expires_at.is_none() => {
                    entry.expires_at = deadline(now, ttl);
                    Ok(Reply::Int(1))
                }
                _ => Ok(Reply::Int(0)),
            },
            Op::Persist { key } => match self.live(&key, now) {
                Some(entry) if entry.expires_at.is_some() => {
                    entry.expires_at = None;
                    Ok(Reply::Int(1))
                }
                _ => Ok(Reply::Int(0)),
            },
        }
    }
}

/// Expiry instant for `ttl`, or `None` when it lies beyond what the clock can represent.
fn deadline(now: Instant, ttl: Duration) -> Option<Instant> {
    let secs = u64::try_from(ttl_secs(ttl)).ok()?;
    now.checked_add(Duration::from_secs(secs))
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::Backend(format!(
        "WRONGTYPE operation against key `{key}` holding the wrong kind of value"
    ))
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.run(Op::Get { key: key.to_string() })?.into_data()
    }

    async fn set_with_expiry(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        self.run(Op::Set {
            key: key.to_string(),
            value: value.to_vec(),
            ttl: Some(ttl),
        })?;
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.run(Op::HashGet {
            key: key.to_string(),
            field: field.to_string(),
        })?
        .into_data()
    }

    async fn hash_set(&self, key: &str, field: &str, value: &[u8]) -> Result<(), StoreError> {
        self.run(Op::HashSet {
            key: key.to_string(),
            field: field.to_string(),
            value: value.to_vec(),
        })?;
        Ok(())
    }

    async fn hash_set_if_absent(&self, key: &str, field: &str, value: &[u8]) -> Result<bool, StoreError> {
        let mut keyspace = self.lock()?;
        let hash = keyspace.hash_mut(key, Instant::now())?;
        if hash.contains_key(field) {
            return Ok(false);
        }
        hash.insert(field.to_string(), value.to_vec());
        Ok(true)
    }

    async fn hash_exists(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        let mut keyspace = self.lock()?;
        Ok(keyspace
            .hash(key, Instant::now())?
            .is_some_and(|hash| hash.contains_key(field)))
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, Vec<u8>>, StoreError> {
        let mut keyspace = self.lock()?;
        Ok(keyspace.hash(key, Instant::now())?.cloned().unwrap_or_default())
    }

    async fn hash_len(&self, key: &str) -> Result<u64, StoreError> {
        let mut keyspace = self.lock()?;
        Ok(keyspace
            .hash(key, Instant::now())?
            .map_or(0, |hash| hash.len() as u64))
    }

    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        self.run(Op::Increment { key: key.to_string() })?.into_int()
    }

    async fn expire_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        Ok(self
            .run(Op::ExpireIfAbsent {
                key: key.to_string(),
                ttl,
            })?
            .into_int()?
            == 1)
    }

    async fn persist(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.run(Op::Persist { key: key.to_string() })?.into_int()? == 1)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.run(Op::Delete { key: key.to_string() })?.into_int()? == 1)
    }

    async fn execute_batch(&self, batch: Batch) -> Result<Vec<Reply>, StoreError> {
        let mut keyspace = self.lock()?;
        let now = Instant::now();
        batch
            .into_ops()
            .into_iter()
            .map(|op| keyspace.apply(op, now))
            .collect()
    }
}
