//! Request-level roll-call workflows.
//!
//! [`Rollcall`] is what request handlers talk to. It composes the four stores, generates ids,
//! and applies the error policy per check: anything that grants access (sessions, tokens)
//! fails closed, while rate limiting fails open so a store outage does not lock every client
//! out.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::attendance::{AttendanceRecord, AttendanceStore};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::id::generate_id;
use crate::rate_limit::RateLimiter;
use crate::session::SessionStore;
use crate::store::KeyValueStore;
use crate::token::TokenStore;

pub struct Rollcall<S: KeyValueStore + ?Sized> {
    sessions: SessionStore<S>,
    tokens: TokenStore<S>,
    attendance: AttendanceStore<S>,
    limiter: RateLimiter<S>,
    session_ttl: Duration,
    token_ttl: Duration,
}

#[cfg(feature = "redis")]
impl Rollcall<crate::store::RedisStore> {
    /// Connects to the Redis server named in `settings` and builds the service on top of it.
    pub async fn connect(settings: &Settings) -> Result<Self> {
        let store = crate::store::RedisStore::connect(&settings.redis).await?;
        Ok(Self::new(Arc::new(store), settings))
    }
}

impl<S: KeyValueStore + ?Sized> Rollcall<S> {
    pub fn new(store: Arc<S>, settings: &Settings) -> Self {
        Self {
            sessions: SessionStore::new(Arc::clone(&store)),
            tokens: TokenStore::new(Arc::clone(&store)),
            attendance: AttendanceStore::new(Arc::clone(&store)),
            limiter: RateLimiter::new(store, &settings.rate_limit),
            session_ttl: settings.session.ttl(),
            token_ttl: settings.token.ttl(),
        }
    }

    pub fn sessions(&self) -> &SessionStore<S> {
        &self.sessions
    }

    pub fn tokens(&self) -> &TokenStore<S> {
        &self.tokens
    }

    pub fn attendance(&self) -> &AttendanceStore<S> {
        &self.attendance
    }

    pub fn rate_limiter(&self) -> &RateLimiter<S> {
        &self.limiter
    }

    /// Opens a new session with the configured TTL and returns its id.
    pub async fn open_session(&self) -> Result<String> {
        let session_id = generate_id();
        self.sessions
            .create_session(&session_id, self.session_ttl)
            .await?;
        Ok(session_id)
    }

    /// Issues a one-time token granting access to the form of an open session.
    pub async fn issue_access_token(&self, session_id: &str) -> Result<String> {
        self.require_open(session_id).await?;

        let token = generate_id();
        self.tokens
            .issue_token(&token, session_id, self.token_ttl)
            .await?;
        Ok(token)
    }

    /// Redeems `token` for `session_id`.
    ///
    /// The token is spent whatever the outcome. Store failures during redemption are reported
    /// as [`Error::TokenInvalid`]: an unverifiable token never grants access.
    pub async fn redeem_access_token(&self, session_id: &str, token: &str) -> Result<()> {
        let bound = match self.tokens.consume_token(token).await {
            Ok(Some(bound)) => bound,
            Ok(None) => return Err(Error::TokenInvalid),
            Err(err) => {
                error!(session_id = %session_id, error = %err, "token redemption failed, denying access");
                return Err(Error::TokenInvalid);
            }
        };

        if bound != session_id {
            warn!(
                session_id = %session_id,
                token_session_id = %bound,
                "access token presented for the wrong session"
            );
            return Err(Error::TokenMismatch {
                session_id: session_id.to_string(),
            });
        }

        self.require_open(session_id).await
    }

    /// Records `payload` for `participant_id` if the session is still open.
    pub async fn submit_attendance<T: Serialize>(
        &self,
        session_id: &str,
        participant_id: &str,
        payload: &T,
    ) -> Result<()> {
        self.require_open(session_id).await?;
        self.attendance
            .add_record(session_id, participant_id, payload)
            .await
    }

    /// Exports every record of the session and then closes it.
    ///
    /// The export is what the caller needs, so a failure to close afterwards is logged rather
    /// than returned; the session can be closed again later.
    pub async fn finalize<T: DeserializeOwned>(
        &self,
        session_id: &str,
    ) -> Result<BTreeMap<String, AttendanceRecord<T>>> {
        let records = self.attendance.export_records(session_id).await?;

        match self.sessions.close_session(session_id).await {
            Ok(()) => info!(session_id = %session_id, count = records.len(), "session finalized"),
            Err(err) => warn!(session_id = %session_id, error = %err, "session close failed after export"),
        }
        Ok(records)
    }

    /// Whether the session accepts tokens and submissions. Store failures read as closed.
    pub async fn session_is_open(&self, session_id: &str) -> bool {
        match self.sessions.is_valid(session_id).await {
            Ok(open) => open,
            Err(err) => {
                error!(session_id = %session_id, error = %err, "session validation failed, treating as closed");
                false
            }
        }
    }

    /// Counts a request from `client_id` and reports whether it should be rejected. Store
    /// failures let the request through.
    pub async fn throttle(&self, client_id: &str) -> bool {
        match self.limiter.check(client_id).await {
            Ok(limited) => limited,
            Err(err) => {
                error!(client_id = %client_id, error = %err, "rate limit check failed, allowing request");
                false
            }
        }
    }

    async fn require_open(&self, session_id: &str) -> Result<()> {
        if self.sessions.is_valid(session_id).await? {
            Ok(())
        } else {
            Err(Error::SessionNotOpen {
                session_id: session_id.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance::StudentRecord;
    use crate::error::ErrorKind;
    use crate::session::SessionStatus;
    use crate::store::MemoryStore;

    fn rollcall() -> (Arc<MemoryStore>, Rollcall<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (Arc::clone(&store), Rollcall::new(store, &Settings::default()))
    }

    fn student(school_no: &str) -> StudentRecord {
        StudentRecord {
            name: "Ada".to_string(),
            surname: "Lovelace".to_string(),
            school_no: school_no.to_string(),
            faculty: "Engineering".to_string(),
            section: "B".to_string(),
        }
    }

    #[tokio::test]
    async fn full_roll_call() {
        let (_, rollcall) = rollcall();
        let session_id = rollcall.open_session().await.unwrap();

        let token = rollcall.issue_access_token(&session_id).await.unwrap();
        rollcall
            .redeem_access_token(&session_id, &token)
            .await
            .unwrap();
        rollcall
            .submit_attendance(&session_id, "123", &student("123"))
            .await
            .unwrap();

        let records: BTreeMap<String, AttendanceRecord<StudentRecord>> =
            rollcall.finalize(&session_id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records["123"].payload, student("123"));
        assert_eq!(
            rollcall.sessions().status(&session_id).await.unwrap(),
            Some(SessionStatus::Closed)
        );
    }

    #[tokio::test]
    async fn spent_token_is_rejected() {
        let (_, rollcall) = rollcall();
        let session_id = rollcall.open_session().await.unwrap();
        let token = rollcall.issue_access_token(&session_id).await.unwrap();

        rollcall
            .redeem_access_token(&session_id, &token)
            .await
            .unwrap();
        let err = rollcall
            .redeem_access_token(&session_id, &token)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TokenInvalid));
    }

    #[tokio::test]
    async fn token_for_another_session_is_a_mismatch_and_is_burned() {
        let (_, rollcall) = rollcall();
        let first = rollcall.open_session().await.unwrap();
        let second = rollcall.open_session().await.unwrap();
        let token = rollcall.issue_access_token(&first).await.unwrap();

        let err = rollcall
            .redeem_access_token(&second, &token)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TokenMismatch { .. }));

        let err = rollcall
            .redeem_access_token(&first, &token)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TokenInvalid));
    }

    #[tokio::test]
    async fn closed_session_refuses_tokens_and_submissions() {
        let (_, rollcall) = rollcall();
        let session_id = rollcall.open_session().await.unwrap();
        let token = rollcall.issue_access_token(&session_id).await.unwrap();
        rollcall.sessions().close_session(&session_id).await.unwrap();

        assert!(matches!(
            rollcall.issue_access_token(&session_id).await,
            Err(Error::SessionNotOpen { .. })
        ));
        assert!(matches!(
            rollcall.redeem_access_token(&session_id, &token).await,
            Err(Error::SessionNotOpen { .. })
        ));
        assert!(matches!(
            rollcall
                .submit_attendance(&session_id, "123", &student("123"))
                .await,
            Err(Error::SessionNotOpen { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_session_data_stays_exportable() {
        let (_, rollcall) = rollcall();
        let session_id = rollcall.open_session().await.unwrap();
        rollcall
            .submit_attendance(&session_id, "123", &student("123"))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(!rollcall.session_is_open(&session_id).await);

        let exported: BTreeMap<String, StudentRecord> =
            rollcall.attendance().export_all(&session_id).await.unwrap();
        assert_eq!(exported["123"], student("123"));
    }

    #[tokio::test]
    async fn duplicate_submission_is_a_conflict() {
        let (_, rollcall) = rollcall();
        let session_id = rollcall.open_session().await.unwrap();
        rollcall
            .submit_attendance(&session_id, "123", &student("123"))
            .await
            .unwrap();

        let err = rollcall
            .submit_attendance(&session_id, "123", &student("123"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationConflict);
    }

    #[tokio::test]
    async fn outage_fails_closed_for_access_and_open_for_throttling() {
        let (store, rollcall) = rollcall();
        let session_id = rollcall.open_session().await.unwrap();
        let token = rollcall.issue_access_token(&session_id).await.unwrap();
        store.set_offline(true);

        assert!(!rollcall.throttle("203.0.113.9").await);
        assert!(!rollcall.session_is_open(&session_id).await);
        assert!(matches!(
            rollcall.redeem_access_token(&session_id, &token).await,
            Err(Error::TokenInvalid)
        ));
        let err = rollcall.issue_access_token(&session_id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
    }

    #[tokio::test]
    async fn stalled_store_fails_closed_for_access_and_open_for_throttling() {
        let (store, rollcall) = rollcall();
        let session_id = rollcall.open_session().await.unwrap();
        let token = rollcall.issue_access_token(&session_id).await.unwrap();
        store.set_stalled(true);

        assert!(!rollcall.throttle("203.0.113.11").await);
        assert!(!rollcall.session_is_open(&session_id).await);
        assert!(matches!(
            rollcall.redeem_access_token(&session_id, &token).await,
            Err(Error::TokenInvalid)
        ));
        let err = rollcall
            .submit_attendance(&session_id, "123", &student("123"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreTimeout);
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn throttle_uses_configured_limit() {
        let (_, rollcall) = rollcall();

        assert!(!rollcall.throttle("203.0.113.10").await);
        assert!(!rollcall.throttle("203.0.113.10").await);
        assert!(rollcall.throttle("203.0.113.10").await);
        assert!(!rollcall.throttle("127.0.0.1").await);
    }
}
