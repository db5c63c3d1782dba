//! Single-use access tokens.
//!
//! A token maps to exactly one session id under `access_token:{token}` and expires on its own
//! after a short TTL. Redeeming it reads and deletes the key in the same transaction, so among
//! any number of concurrent redeemers exactly one gets the session id back. This is what keeps
//! a scanned or leaked form URL from being replayed.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{Error, Result, StoreError};
use crate::store::{Batch, KeyValueStore};

const ACCESS_TOKEN_KEY_PREFIX: &str = "access_token:";

pub struct TokenStore<S: KeyValueStore + ?Sized> {
    store: Arc<S>,
}

impl<S: KeyValueStore + ?Sized> TokenStore<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn issue_token(&self, token: &str, session_id: &str, ttl: Duration) -> Result<()> {
        self.store
            .set_with_expiry(&token_key(token), session_id.as_bytes(), ttl)
            .await?;

        info!(session_id = %session_id, ttl_secs = ttl.as_secs(), "access token issued");
        Ok(())
    }

    /// Redeems `token`, returning the session it was issued for. Returns `None` if the token
    /// is unknown, expired or already redeemed.
    ///
    /// The token is gone after this call whatever the outcome. Callers must treat an error the
    /// same as `None` when deciding whether to grant access.
    pub async fn consume_token(&self, token: &str) -> Result<Option<String>> {
        let key = token_key(token);
        let replies = self
            .store
            .execute_batch(Batch::atomic().get(key.as_str()).delete(key.as_str()))
            .await?;

        let value = replies
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Backend("empty reply to token redemption".to_string()))?
            .into_data()?;

        match value {
            Some(raw) => {
                let session_id = String::from_utf8(raw)
                    .map_err(|e| Error::Decode(format!("access token value is not utf-8: {e}")))?;
                info!(session_id = %session_id, "access token consumed");
                Ok(Some(session_id))
            }
            None => {
                warn!("attempted to consume an invalid or expired access token");
                Ok(None)
            }
        }
    }
}

fn token_key(token: &str) -> String {
    format!("{ACCESS_TOKEN_KEY_PREFIX}{token}")
}
