use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{Client, Cmd, FromRedisValue, Pipeline, RedisError, Value};
use tracing::{debug, info};

use super::{ttl_secs, Batch, KeyValueStore, Op, Reply};
use crate::config::RedisSettings;
use crate::error::StoreError;

/// A Redis-backed [`KeyValueStore`].
///
/// `RedisStore` wraps a multiplexed [`ConnectionManager`], so a single instance can be cloned
/// freely and shared between every request handler. The manager reconnects on its own after a
/// dropped connection; this adapter never retries a command.
///
/// Every command is bounded by an operation timeout (3 seconds by default). A command that
/// exceeds it fails with [`StoreError::Timeout`], which means its effect on the server is
/// unknown: a timed-out `HSETNX` may or may not have been applied.
///
/// # Usage
///
/// ```no_run
/// use rollcall_store::config::RedisSettings;
/// use rollcall_store::store::{KeyValueStore, RedisStore};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = RedisStore::connect(&RedisSettings::default()).await?;
/// let count = store.increment("rate_limit:203.0.113.7").await?;
/// # Ok(())
/// # }
/// ```
///
/// # Error Handling
///
/// Redis errors are mapped onto [`StoreError`] so no `redis` type leaves this module:
///
/// - I/O failures, refused or dropped connections → `StoreError::Unavailable`
/// - Timeouts (client-side or from the connection manager) → `StoreError::Timeout`
/// - Server error replies (`WRONGTYPE`, `EXECABORT`, ...) → `StoreError::Backend`
#[derive(Clone)]
pub struct RedisStore {
    /// Multiplexed connection shared by all clones of this store.
    conn: ConnectionManager,
    /// Ceiling applied to every command and batch.
    operation_timeout: Duration,
}

impl RedisStore {
    /// Connects to the Redis server described by `settings`.
    ///
    /// The connection attempt itself is bounded by `settings.connect_timeout_secs`; the
    /// resulting store uses `settings.operation_timeout_secs` for every command.
    pub async fn connect(settings: &RedisSettings) -> Result<Self, StoreError> {
        let connect_timeout = settings.connect_timeout();
        let config = ConnectionManagerConfig::new()
            .set_number_of_retries(1)
            .set_connection_timeout(Some(connect_timeout));

        let client = Client::open(settings.url.as_str()).map_err(store_error)?;
        let conn = tokio::time::timeout(connect_timeout, client.get_connection_manager_with_config(config))
            .await
            .map_err(|_| {
                StoreError::Timeout(format!("connecting to redis took longer than {connect_timeout:?}"))
            })?
            .map_err(store_error)?;

        info!(url = %redacted(&settings.url), "connected to redis");

        Ok(Self::new(conn).with_operation_timeout(settings.operation_timeout()))
    }

    /// Wraps an existing connection manager.
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            operation_timeout: Duration::from_secs(crate::config::DEFAULT_OPERATION_TIMEOUT_SECS),
        }
    }

    /// Sets the ceiling applied to every command.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    async fn query<T: FromRedisValue>(&self, name: &str, cmd: &Cmd) -> Result<T, StoreError> {
        let mut conn = self.conn.clone();
        let outcome = tokio::time::timeout(self.operation_timeout, cmd.query_async::<T>(&mut conn)).await;
        match outcome {
            Ok(result) => result.map_err(store_error),
            Err(_) => Err(self.timed_out(name)),
        }
    }

    async fn query_pipeline(&self, pipe: &Pipeline) -> Result<Vec<Value>, StoreError> {
        let mut conn = self.conn.clone();
        let outcome =
            tokio::time::timeout(self.operation_timeout, pipe.query_async::<Vec<Value>>(&mut conn)).await;
        match outcome {
            Ok(result) => result.map_err(store_error),
            Err(_) => Err(self.timed_out("pipeline")),
        }
    }

    fn timed_out(&self, name: &str) -> StoreError {
        StoreError::Timeout(format!(
            "{name} did not complete within {:?}",
            self.operation_timeout
        ))
    }
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("operation_timeout", &self.operation_timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.query("GET", redis::cmd("GET").arg(key)).await
    }

    async fn set_with_expiry(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        self.query(
            "SET",
            redis::cmd("SET").arg(key).arg(value).arg("EX").arg(ttl_secs(ttl)),
        )
        .await
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.query("HGET", redis::cmd("HGET").arg(key).arg(field)).await
    }

    async fn hash_set(&self, key: &str, field: &str, value: &[u8]) -> Result<(), StoreError> {
        self.query("HSET", redis::cmd("HSET").arg(key).arg(field).arg(value))
            .await
    }

    /// Issues `HSETNX`, which Redis executes atomically: of any number of concurrent writers
    /// for the same field, exactly one observes `true`.
    async fn hash_set_if_absent(&self, key: &str, field: &str, value: &[u8]) -> Result<bool, StoreError> {
        self.query("HSETNX", redis::cmd("HSETNX").arg(key).arg(field).arg(value))
            .await
    }

    async fn hash_exists(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        self.query("HEXISTS", redis::cmd("HEXISTS").arg(key).arg(field))
            .await
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, Vec<u8>>, StoreError> {
        self.query("HGETALL", redis::cmd("HGETALL").arg(key)).await
    }

    async fn hash_len(&self, key: &str) -> Result<u64, StoreError> {
        self.query("HLEN", redis::cmd("HLEN").arg(key)).await
    }

    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        self.query("INCR", redis::cmd("INCR").arg(key)).await
    }

    /// Issues `EXPIRE key seconds NX`, which requires Redis 7.0 or later.
    async fn expire_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.query(
            "EXPIRE NX",
            redis::cmd("EXPIRE").arg(key).arg(ttl_secs(ttl)).arg("NX"),
        )
        .await
    }

    async fn persist(&self, key: &str) -> Result<bool, StoreError> {
        self.query("PERSIST", redis::cmd("PERSIST").arg(key)).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.query("DEL", redis::cmd("DEL").arg(key)).await
    }

    /// Sends the batch as one pipeline. Atomic batches are wrapped in `MULTI`/`EXEC`.
    ///
    /// Note that Redis does not roll back a transaction when one of its commands fails at
    /// runtime; the failure is reported as [`StoreError::Backend`] after the other commands
    /// have been applied.
    async fn execute_batch(&self, batch: Batch) -> Result<Vec<Reply>, StoreError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let expected = batch.len();
        let atomic = batch.is_atomic();
        let pipe = build_pipeline(batch);
        let values = self.query_pipeline(&pipe).await?;

        if values.len() != expected {
            return Err(StoreError::Backend(format!(
                "pipeline returned {} replies for {expected} commands",
                values.len()
            )));
        }
        debug!(commands = expected, atomic, "executed redis pipeline");

        values.into_iter().map(reply_from_value).collect()
    }
}

fn build_pipeline(batch: Batch) -> Pipeline {
    let mut pipe = redis::pipe();
    if batch.is_atomic() {
        pipe.atomic();
    }

    for op in batch.into_ops() {
        match op {
            Op::Get { key } => {
                pipe.cmd("GET").arg(key);
            }
            Op::Set { key, value, ttl } => {
                pipe.cmd("SET").arg(key).arg(value);
                if let Some(ttl) = ttl {
                    pipe.arg("EX").arg(ttl_secs(ttl));
                }
            }
            Op::Delete { key } => {
                pipe.cmd("DEL").arg(key);
            }
            Op::HashGet { key, field } => {
                pipe.cmd("HGET").arg(key).arg(field);
            }
            Op::HashSet { key, field, value } => {
                pipe.cmd("HSET").arg(key).arg(field).arg(value);
            }
            Op::Increment { key } => {
                pipe.cmd("INCR").arg(key);
            }
            Op::Expire { key, ttl } => {
                pipe.cmd("EXPIRE").arg(key).arg(ttl_secs(ttl));
            }
            Op::ExpireIfAbsent { key, ttl } => {
                pipe.cmd("EXPIRE").arg(key).arg(ttl_secs(ttl)).arg("NX");
            }
            Op::Persist { key } => {
                pipe.cmd("PERSIST").arg(key);
            }
        }
    }

    pipe
}

fn reply_from_value(value: Value) -> Result<Reply, StoreError> {
    match value {
        Value::Nil => Ok(Reply::Nil),
        Value::Okay => Ok(Reply::Ok),
        Value::Int(n) => Ok(Reply::Int(n)),
        Value::BulkString(bytes) => Ok(Reply::Data(bytes)),
        Value::SimpleString(text) if text == "OK" => Ok(Reply::Ok),
        Value::SimpleString(text) => Ok(Reply::Data(text.into_bytes())),
        other => Err(StoreError::Backend(format!("unexpected redis reply: {other:?}"))),
    }
}

fn store_error(err: RedisError) -> StoreError {
    if err.is_timeout() {
        StoreError::Timeout(err.to_string())
    } else if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
        StoreError::Unavailable(err.to_string())
    } else {
        StoreError::Backend(err.to_string())
    }
}

/// Strips credentials from a connection URL before it is logged.
fn redacted(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}
