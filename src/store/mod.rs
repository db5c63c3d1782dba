//! Key-value store adapter.
//!
//! Every higher-level store in this crate talks to the shared state through the
//! [`KeyValueStore`] trait. It exposes only the primitive operations the stores need, each of
//! which is a single atomic command on the backing store, plus [`KeyValueStore::execute_batch`]
//! for sending several operations in one round trip.
//!
//! Two implementations ship with the crate:
//!
//! - [`RedisStore`] (feature `redis`): the production adapter.
//! - [`MemoryStore`]: an in-process store with the same TTL semantics, meant for tests.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

mod memory;
#[cfg(feature = "redis")]
mod redis_store;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;

/// A single operation inside a [`Batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// `GET key`
    Get { key: String },
    /// `SET key value [EX ttl]`
    Set { key: String, value: Vec<u8>, ttl: Option<Duration> },
    /// `DEL key`
    Delete { key: String },
    /// `HGET key field`
    HashGet { key: String, field: String },
    /// `HSET key field value`
    HashSet { key: String, field: String, value: Vec<u8> },
    /// `INCR key`
    Increment { key: String },
    /// `EXPIRE key ttl`
    Expire { key: String, ttl: Duration },
    /// `EXPIRE key ttl NX`
    ExpireIfAbsent { key: String, ttl: Duration },
    /// `PERSIST key`
    Persist { key: String },
}

/// The result of one [`Op`], in batch order.
///
/// | Op                                        | Reply                              |
/// |-------------------------------------------|------------------------------------|
/// | `Get`, `HashGet`                          | `Data` or `Nil`                    |
/// | `Set`                                     | `Ok`                               |
/// | `Delete`, `HashSet`                       | `Int` (keys removed / fields added)|
/// | `Increment`                               | `Int` (new value)                  |
/// | `Expire`, `ExpireIfAbsent`, `Persist`     | `Int` (1 if applied, else 0)       |
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Nil,
    Ok,
    Int(i64),
    Data(Vec<u8>),
}

impl Reply {
    /// Unwraps a [`Reply::Int`], failing with [`StoreError::Backend`] on any other shape.
    pub fn into_int(self) -> Result<i64, StoreError> {
        match self {
            Reply::Int(n) => Ok(n),
            other => Err(unexpected("integer", &other)),
        }
    }

    /// Unwraps [`Reply::Data`] as `Some` and [`Reply::Nil`] as `None`.
    pub fn into_data(self) -> Result<Option<Vec<u8>>, StoreError> {
        match self {
            Reply::Data(bytes) => Ok(Some(bytes)),
            Reply::Nil => Ok(None),
            other => Err(unexpected("bulk string", &other)),
        }
    }
}

fn unexpected(wanted: &str, got: &Reply) -> StoreError {
    StoreError::Backend(format!("expected {wanted} reply, got {got:?}"))
}

/// An ordered list of operations sent to the store in one round trip.
///
/// An [`atomic`](Batch::atomic) batch runs as a transaction: no other client's commands are
/// interleaved with it. A [`pipeline`](Batch::pipeline) batch only saves round trips.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    atomic: bool,
    ops: Vec<Op>,
}

impl Batch {
    /// An empty batch that runs as a transaction.
    pub fn atomic() -> Self {
        Self {
            atomic: true,
            ops: Vec::new(),
        }
    }

    /// An empty batch that is only pipelined.
    pub fn pipeline() -> Self {
        Self::default()
    }

    pub fn is_atomic(&self) -> bool {
        self.atomic
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Consumes the batch, returning its operations in order.
    pub fn into_ops(self) -> Vec<Op> {
        self.ops
    }

    /// Appends an arbitrary operation.
    pub fn push(mut self, op: Op) -> Self {
        self.ops.push(op);
        self
    }

    /// Appends [`Op::Get`].
    pub fn get(self, key: impl Into<String>) -> Self {
        self.push(Op::Get { key: key.into() })
    }

    /// Appends [`Op::Set`]. `None` stores the value without expiry.
    pub fn set(self, key: impl Into<String>, value: impl Into<Vec<u8>>, ttl: Option<Duration>) -> Self {
        self.push(Op::Set {
            key: key.into(),
            value: value.into(),
            ttl,
        })
    }

    /// Appends [`Op::Delete`].
    pub fn delete(self, key: impl Into<String>) -> Self {
        self.push(Op::Delete { key: key.into() })
    }

    /// Appends [`Op::HashGet`].
    pub fn hash_get(self, key: impl Into<String>, field: impl Into<String>) -> Self {
        self.push(Op::HashGet {
            key: key.into(),
            field: field.into(),
        })
    }

    /// Appends [`Op::HashSet`].
    pub fn hash_set(
        self,
        key: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        self.push(Op::HashSet {
            key: key.into(),
            field: field.into(),
            value: value.into(),
        })
    }

    /// Appends [`Op::Increment`].
    pub fn increment(self, key: impl Into<String>) -> Self {
        self.push(Op::Increment { key: key.into() })
    }

    /// Appends [`Op::Expire`].
    pub fn expire(self, key: impl Into<String>, ttl: Duration) -> Self {
        self.push(Op::Expire {
            key: key.into(),
            ttl,
        })
    }

    /// Appends [`Op::ExpireIfAbsent`].
    pub fn expire_if_absent(self, key: impl Into<String>, ttl: Duration) -> Self {
        self.push(Op::ExpireIfAbsent {
            key: key.into(),
            ttl,
        })
    }

    /// Appends [`Op::Persist`].
    pub fn persist(self, key: impl Into<String>) -> Self {
        self.push(Op::Persist { key: key.into() })
    }
}

/// Primitive operations over a shared, TTL-capable key-value store.
///
/// Implementations must be safe to share between any number of concurrent tasks. None of the
/// methods retry on failure.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn set_with_expiry(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError>;

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn hash_set(&self, key: &str, field: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Writes `field` only if the hash does not already contain it. Returns `true` if the
    /// value was written.
    async fn hash_set_if_absent(&self, key: &str, field: &str, value: &[u8]) -> Result<bool, StoreError>;

    async fn hash_exists(&self, key: &str, field: &str) -> Result<bool, StoreError>;

    /// Returns every field of the hash. A missing key yields an empty map.
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, Vec<u8>>, StoreError>;

    async fn hash_len(&self, key: &str) -> Result<u64, StoreError>;

    /// Increments the integer at `key`, creating it at 0 first if missing.
    async fn increment(&self, key: &str) -> Result<i64, StoreError>;

    /// Sets a TTL on `key` only if it has none. Returns `true` if the TTL was set.
    async fn expire_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Removes the TTL from `key`. Returns `true` if a TTL was removed.
    async fn persist(&self, key: &str) -> Result<bool, StoreError>;

    /// Returns `true` if the key existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Runs every operation of `batch` in one round trip and returns their replies in order.
    async fn execute_batch(&self, batch: Batch) -> Result<Vec<Reply>, StoreError>;
}

/// Longest TTL the adapters will send, in seconds.
///
/// Redis converts a TTL into an absolute deadline in milliseconds and rejects it if that
/// overflows an `i64`; half of that range is left for the current time.
pub const MAX_TTL_SECS: i64 = i64::MAX / 2000;

/// Whole seconds for a TTL, rounded up so sub-second TTLs never become "no expiry", and
/// clamped to `1..=MAX_TTL_SECS`.
pub(crate) fn ttl_secs(ttl: Duration) -> i64 {
    let secs = ttl
        .as_secs()
        .saturating_add(u64::from(ttl.subsec_nanos() > 0));
    i64::try_from(secs).map_or(MAX_TTL_SECS, |secs| secs.clamp(1, MAX_TTL_SECS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_keeps_operation_order() {
        let batch = Batch::atomic()
            .hash_set("session:a", "status", "open")
            .expire("session:a", Duration::from_secs(300));

        assert!(batch.is_atomic());
        assert_eq!(batch.len(), 2);
        assert!(matches!(batch.ops()[0], Op::HashSet { .. }));
        assert!(matches!(batch.ops()[1], Op::Expire { .. }));
        assert!(!Batch::pipeline().is_atomic());
    }

    #[test]
    fn reply_conversions_reject_wrong_shapes() {
        assert_eq!(Reply::Int(3).into_int(), Ok(3));
        assert_eq!(Reply::Nil.into_data(), Ok(None));
        assert_eq!(Reply::Data(b"x".to_vec()).into_data(), Ok(Some(b"x".to_vec())));
        assert!(Reply::Ok.into_int().is_err());
        assert!(Reply::Int(1).into_data().is_err());
    }

    #[test]
    fn ttl_rounds_up_to_whole_seconds() {
        assert_eq!(ttl_secs(Duration::from_secs(60)), 60);
        assert_eq!(ttl_secs(Duration::from_millis(1500)), 2);
        assert_eq!(ttl_secs(Duration::ZERO), 1);
    }

    #[test]
    fn huge_ttl_is_clamped_instead_of_wrapping() {
        assert_eq!(ttl_secs(Duration::from_secs(u64::MAX)), MAX_TTL_SECS);
        assert_eq!(ttl_secs(Duration::MAX), MAX_TTL_SECS);
        assert_eq!(ttl_secs(Duration::from_secs(i64::MAX as u64)), MAX_TTL_SECS);
        assert_eq!(ttl_secs(Duration::from_secs(MAX_TTL_SECS as u64)), MAX_TTL_SECS);
    }
}
