//! # Roll-call state on Redis
//!
//! Shared state for QR-code attendance taking: short-lived attendance sessions, single-use
//! access tokens, one record per participant per session, and per-client rate limiting.
//!
//! Everything lives in a key-value store shared by every server process. Nothing is cached or
//! locked in-process; each guarantee comes from an atomic operation on the store itself.
//!
//! ## Features
//!
//! - Sessions that expire on their own and can be closed permanently
//! - Access tokens that can be redeemed exactly once, even under concurrent redemption
//! - Duplicate-proof attendance records, serialized with MessagePack
//! - Fixed-window rate limiting per client
//! - A Redis adapter (feature `redis`, on by default) and an in-memory store for tests
//!
//! ## Key layout
//!
//! | Key                        | Type   | TTL                       |
//! |----------------------------|--------|---------------------------|
//! | `session:{id}`             | hash   | session TTL until closed  |
//! | `access_token:{token}`     | string | token TTL                 |
//! | `attendance:{session_id}`  | hash   | none                      |
//! | `rate_limit:{client_id}`   | string | rate window               |
//!
//! ## Quick Start
//!
//! ```no_run
//! use rollcall_store::{Rollcall, Settings, StudentRecord};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::load()?;
//! let rollcall = Rollcall::connect(&settings).await?;
//!
//! // The instructor opens a session and shows its QR code.
//! let session_id = rollcall.open_session().await?;
//!
//! // A student scans it and gets a one-time token for the form.
//! let token = rollcall.issue_access_token(&session_id).await?;
//! rollcall.redeem_access_token(&session_id, &token).await?;
//!
//! let student = StudentRecord {
//!     name: "Ada".into(),
//!     surname: "Lovelace".into(),
//!     school_no: "123".into(),
//!     faculty: "Engineering".into(),
//!     section: "A".into(),
//! };
//! rollcall.submit_attendance(&session_id, &student.school_no, &student).await?;
//!
//! // The instructor exports and closes the session.
//! let records = rollcall.finalize::<StudentRecord>(&session_id).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing Against Memory
//!
//! Every store is generic over [`KeyValueStore`], so tests can swap Redis for
//! [`MemoryStore`](store::MemoryStore):
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use rollcall_store::{store::MemoryStore, SessionStore};
//!
//! # async fn example() -> rollcall_store::Result<()> {
//! let sessions = SessionStore::new(Arc::new(MemoryStore::new()));
//! sessions.create_session("S1", Duration::from_secs(300)).await?;
//! assert!(sessions.is_valid("S1").await?);
//! # Ok(())
//! # }
//! ```

pub mod attendance;
pub mod config;
pub mod error;
pub mod id;
pub mod rate_limit;
pub mod service;
pub mod session;
pub mod store;
pub mod telemetry;
pub mod token;

/// Attendance ledger and its record types.
pub use attendance::{AttendanceRecord, AttendanceStore, StudentRecord};

/// Settings consumed at construction time.
pub use config::Settings;

/// Error types and their classification.
pub use error::{Error, ErrorKind, Result, StoreError};

/// Random 256-bit hex ids for sessions and tokens.
pub use id::generate_id;

pub use rate_limit::RateLimiter;

/// The request-level facade over all stores.
pub use service::Rollcall;

pub use session::{SessionStatus, SessionStore};

/// Storage adapter trait implemented by every backend.
pub use store::KeyValueStore;

pub use token::TokenStore;
