//! Fixed-window request counter per client identity.
//!
//! Each client gets a counter at `rate_limit:{client_id}`. The first request of a window
//! creates the counter and starts its TTL; later requests only increment it, so the window
//! closes on schedule no matter how much traffic arrives. Up to twice the limit can get
//! through around a window boundary.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::RateLimitSettings;
use crate::error::{Result, StoreError};
use crate::store::{Batch, KeyValueStore};

const RATE_LIMIT_KEY_PREFIX: &str = "rate_limit:";

pub struct RateLimiter<S: KeyValueStore + ?Sized> {
    store: Arc<S>,
    limit: u64,
    window: Duration,
    exempt: HashSet<String>,
}

impl<S: KeyValueStore + ?Sized> RateLimiter<S> {
    pub fn new(store: Arc<S>, settings: &RateLimitSettings) -> Self {
        Self {
            store,
            limit: settings.limit,
            window: settings.window(),
            exempt: settings.exempt.iter().cloned().collect(),
        }
    }

    /// Counts one request from `client_id` and reports whether it exceeds `limit` within the
    /// current `window`.
    ///
    /// The increment and the conditional expiry travel in a single pipeline. Store failures are
    /// returned to the caller, who decides whether to let the request through.
    pub async fn is_limited(&self, client_id: &str, limit: u64, window: Duration) -> Result<bool> {
        let key = rate_key(client_id);
        let replies = self
            .store
            .execute_batch(
                Batch::pipeline()
                    .increment(key.as_str())
                    .expire_if_absent(key.as_str(), window),
            )
            .await?;

        let count = replies
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Backend("empty reply to rate limit pipeline".to_string()))?
            .into_int()?;

        let limited = count > i64::try_from(limit).unwrap_or(i64::MAX);
        if limited {
            warn!(client_id = %client_id, count, limit, "rate limit exceeded");
        } else {
            debug!(client_id = %client_id, count, limit, "request counted");
        }
        Ok(limited)
    }

    /// [`is_limited`](Self::is_limited) with the configured limit and window. Exempt clients
    /// are never counted.
    pub async fn check(&self, client_id: &str) -> Result<bool> {
        if self.is_exempt(client_id) {
            return Ok(false);
        }
        self.is_limited(client_id, self.limit, self.window).await
    }

    pub fn is_exempt(&self, client_id: &str) -> bool {
        self.exempt.contains(client_id)
    }
}

fn rate_key(client_id: &str) -> String {
    format!("{RATE_LIMIT_KEY_PREFIX}{client_id}")
}
