//! Per-session attendance ledger.
//!
//! All records of a session live in the hash `attendance:{session_id}`, one field per
//! participant. Records are written with a conditional hash set, so the first submission for
//! a participant wins and every later one (concurrent or not) is rejected instead of
//! overwriting it.
//!
//! The ledger has no TTL of its own and outlives the session key, which is what lets a closed
//! or expired session still be exported.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::store::KeyValueStore;

const ATTENDANCE_KEY_PREFIX: &str = "attendance:";

/// A stored submission: the caller's payload, untouched, plus the time it was accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord<T> {
    pub payload: T,
    pub submitted_at: OffsetDateTime,
}

/// Borrowing twin of [`AttendanceRecord`] used on the write path.
#[derive(Serialize)]
struct RecordRef<'a, T> {
    payload: &'a T,
    submitted_at: OffsetDateTime,
}

/// The form a student fills in after scanning a session's QR code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub name: String,
    pub surname: String,
    pub school_no: String,
    pub faculty: String,
    pub section: String,
}

pub struct AttendanceStore<S: KeyValueStore + ?Sized> {
    store: Arc<S>,
}

impl<S: KeyValueStore + ?Sized> AttendanceStore<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn has_submitted(&self, session_id: &str, participant_id: &str) -> Result<bool> {
        Ok(self
            .store
            .hash_exists(&attendance_key(session_id), participant_id)
            .await?)
    }

    /// Stores `payload` for `participant_id` unless one is already recorded.
    ///
    /// # Errors
    ///
    /// - [`Error::DuplicateRecord`] if the participant already has a record in this session.
    /// - [`Error::Encode`] if `payload` cannot be serialized.
    /// - [`Error::Store`] if the write failed. On a timeout the record may have been written;
    ///   check with [`has_submitted`](Self::has_submitted) before retrying.
    pub async fn add_record<T: Serialize>(
        &self,
        session_id: &str,
        participant_id: &str,
        payload: &T,
    ) -> Result<()> {
        let record = RecordRef {
            payload,
            submitted_at: OffsetDateTime::now_utc(),
        };
        let data = rmp_serde::to_vec_named(&record).map_err(|e| Error::Encode(e.to_string()))?;

        let inserted = self
            .store
            .hash_set_if_absent(&attendance_key(session_id), participant_id, &data)
            .await?;

        if !inserted {
            warn!(
                session_id = %session_id,
                participant_id = %participant_id,
                "duplicate attendance submission rejected"
            );
            return Err(Error::DuplicateRecord {
                session_id: session_id.to_string(),
                participant_id: participant_id.to_string(),
            });
        }

        info!(
            session_id = %session_id,
            participant_id = %participant_id,
            "attendance recorded"
        );
        Ok(())
    }

    /// Every payload recorded for the session, keyed by participant id. A session without
    /// submissions yields an empty map.
    pub async fn export_all<T: DeserializeOwned>(&self, session_id: &str) -> Result<BTreeMap<String, T>> {
        Ok(self
            .export_records(session_id)
            .await?
            .into_iter()
            .map(|(participant_id, record)| (participant_id, record.payload))
            .collect())
    }

    /// Like [`export_all`](Self::export_all) but keeps each record's submission time.
    pub async fn export_records<T: DeserializeOwned>(
        &self,
        session_id: &str,
    ) -> Result<BTreeMap<String, AttendanceRecord<T>>> {
        let raw = self.store.hash_get_all(&attendance_key(session_id)).await?;

        let records = raw
            .into_iter()
            .map(|(participant_id, data)| -> Result<(String, AttendanceRecord<T>)> {
                let record = rmp_serde::from_slice(&data).map_err(|e| {
                    Error::Decode(format!("record for participant `{participant_id}`: {e}"))
                })?;
                Ok((participant_id, record))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        info!(session_id = %session_id, count = records.len(), "attendance exported");
        Ok(records)
    }

    pub async fn count(&self, session_id: &str) -> Result<u64> {
        Ok(self.store.hash_len(&attendance_key(session_id)).await?)
    }
}

fn attendance_key(session_id: &str) -> String {
    format!("{ATTENDANCE_KEY_PREFIX}{session_id}")
}
