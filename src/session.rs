//! Attendance session lifecycle.
//!
//! A session lives in the hash `session:{id}` with a single `status` field. It is created
//! `open` with a TTL and either closed explicitly (which also clears the TTL, so the closed
//! marker stays around for export) or silently dropped by the store when the TTL lapses.
//! Neither transition can be undone.
//!
//! ```text
//! open --close_session()--> closed   (kept indefinitely)
//! open --TTL elapses------> absent
//! ```
//!
//! Validity is always read from the store; nothing here caches state.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::error::{Error, Result};
use crate::store::{Batch, KeyValueStore};

const SESSION_KEY_PREFIX: &str = "session:";
const STATUS_FIELD: &str = "status";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    Open,
    Closed,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Open => "open",
            SessionStatus::Closed => "closed",
        }
    }

    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            b"open" => Some(SessionStatus::Open),
            b"closed" => Some(SessionStatus::Closed),
            _ => None,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct SessionStore<S: KeyValueStore + ?Sized> {
    store: Arc<S>,
}

impl<S: KeyValueStore + ?Sized> SessionStore<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Opens `session_id` for `ttl`. The status write and the expiry are applied in one
    /// transaction, so the session can never exist without a TTL.
    ///
    /// Uniqueness of `session_id` is not checked; use [`generate_id`](crate::generate_id).
    pub async fn create_session(&self, session_id: &str, ttl: Duration) -> Result<()> {
        let key = session_key(session_id);
        self.store
            .execute_batch(
                Batch::atomic()
                    .hash_set(key.as_str(), STATUS_FIELD, SessionStatus::Open.as_str())
                    .expire(key.as_str(), ttl),
            )
            .await?;

        info!(session_id = %session_id, ttl_secs = ttl.as_secs(), "session created");
        Ok(())
    }

    /// Marks `session_id` closed and removes its TTL in one transaction.
    pub async fn close_session(&self, session_id: &str) -> Result<()> {
        let key = session_key(session_id);
        self.store
            .execute_batch(
                Batch::atomic()
                    .hash_set(key.as_str(), STATUS_FIELD, SessionStatus::Closed.as_str())
                    .persist(key.as_str()),
            )
            .await?;

        info!(session_id = %session_id, "session closed");
        Ok(())
    }

    /// `true` only while the session is open. Closed, expired and unknown sessions all read
    /// as `false`.
    pub async fn is_valid(&self, session_id: &str) -> Result<bool> {
        Ok(self.status(session_id).await? == Some(SessionStatus::Open))
    }

    /// Current status, or `None` if the session never existed or its TTL lapsed.
    pub async fn status(&self, session_id: &str) -> Result<Option<SessionStatus>> {
        let key = session_key(session_id);
        match self.store.hash_get(&key, STATUS_FIELD).await? {
            None => Ok(None),
            Some(raw) => SessionStatus::from_bytes(&raw).map(Some).ok_or_else(|| {
                Error::Decode(format!(
                    "unknown status `{}` for session `{session_id}`",
                    String::from_utf8_lossy(&raw)
                ))
            }),
        }
    }
}

fn session_key(session_id: &str) -> String {
    format!("{SESSION_KEY_PREFIX}{session_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::store::MemoryStore;

    fn sessions() -> (Arc<MemoryStore>, SessionStore<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (Arc::clone(&store), SessionStore::new(store))
    }

    #[tokio::test(start_paused = true)]
    async fn created_session_is_valid_until_ttl() {
        let (_, sessions) = sessions();
        sessions
            .create_session("S1", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(sessions.is_valid("S1").await.unwrap());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(!sessions.is_valid("S1").await.unwrap());
        assert_eq!(sessions.status("S1").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_session_stays_closed_and_persists() {
        let (store, sessions) = sessions();
        sessions
            .create_session("S2", Duration::from_secs(300))
            .await
            .unwrap();
        sessions.close_session("S2").await.unwrap();
        assert!(!sessions.is_valid("S2").await.unwrap());
        assert_eq!(store.ttl("session:S2"), None);

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(!sessions.is_valid("S2").await.unwrap());
        assert_eq!(
            sessions.status("S2").await.unwrap(),
            Some(SessionStatus::Closed)
        );
    }

    #[tokio::test]
    async fn unknown_session_is_not_valid() {
        let (_, sessions) = sessions();
        assert!(!sessions.is_valid("missing").await.unwrap());
    }

    #[tokio::test]
    async fn corrupt_status_is_a_decode_error() {
        let (store, sessions) = sessions();
        store.hash_set("session:S3", "status", b"paused").await.unwrap();

        let err = sessions.is_valid("S3").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Serialization);
    }

    #[tokio::test]
    async fn store_failure_propagates() {
        let (store, sessions) = sessions();
        store.set_offline(true);

        let err = sessions
            .create_session("S4", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
    }
}
