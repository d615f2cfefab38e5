//! Persistence contract for the transport workflow
//!
//! Writes are keyed by `(batch_id, transporter_id)` with no row versioning,
//! so concurrent writers are last-write-wins. The only guarded writes are
//! the ones that could move a log out of `delivered`.

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use crate::transport::{
    Batch, CheckpointSlot, LocationEvidence, NewReceiver, Receiver, Transporter, TransportLog,
};

pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of a write that refuses to touch delivered logs
#[derive(Debug, Clone, PartialEq)]
pub enum GuardedWrite<T> {
    Applied(T),
    AlreadyDelivered,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTransportLog {
    pub batch_id: String,
    pub transporter_id: String,
    pub destination: String,
}

#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait TransportStore: Send + Sync {
    /// Cheap connectivity check used by the health endpoint
    async fn ping(&self) -> StoreResult<()>;

    async fn find_batch(&self, batch_uid: &str) -> StoreResult<Option<Batch>>;
    async fn upsert_batch(&self, batch: &Batch) -> StoreResult<()>;
    async fn find_batches(&self, batch_uids: &[String]) -> StoreResult<Vec<Batch>>;

    async fn find_transporter(&self, id: &str) -> StoreResult<Option<Transporter>>;
    /// Transporter plus stored password hash
    async fn find_credentials(&self, id: &str) -> StoreResult<Option<(Transporter, String)>>;
    async fn upsert_transporter(&self, transporter: &Transporter, password_hash: &str) -> StoreResult<()>;
    /// Returns false when no such transporter exists
    async fn set_assigned_batch(&self, transporter_id: &str, batch_id: Option<String>) -> StoreResult<bool>;

    async fn find_log(&self, batch_id: &str, transporter_id: &str) -> StoreResult<Option<TransportLog>>;
    /// Most recently created log for a batch, whoever carries it
    async fn find_latest_log_for_batch(&self, batch_id: &str) -> StoreResult<Option<TransportLog>>;
    async fn logs_for_batch(&self, batch_id: &str) -> StoreResult<Vec<TransportLog>>;
    async fn logs_for_transporter(&self, transporter_id: &str) -> StoreResult<Vec<TransportLog>>;

    async fn create_log(&self, log: &NewTransportLog) -> StoreResult<TransportLog>;
    /// Hands a log to another transporter unless it is already delivered
    async fn reassign_log(&self, log_id: i64, transporter_id: &str) -> StoreResult<GuardedWrite<TransportLog>>;
    /// Create-or-update keyed by (batch, transporter); sets status `dispatched`
    async fn upsert_dispatch(
        &self,
        log: &NewTransportLog,
        evidence: &LocationEvidence,
    ) -> StoreResult<GuardedWrite<TransportLog>>;
    /// Writes one checkpoint slot and sets status `in_transit`
    async fn record_checkpoint(
        &self,
        log_id: i64,
        slot: CheckpointSlot,
        evidence: &LocationEvidence,
    ) -> StoreResult<GuardedWrite<TransportLog>>;
    async fn mark_delivered(
        &self,
        log_id: i64,
        evidence: &LocationEvidence,
    ) -> StoreResult<GuardedWrite<TransportLog>>;

    async fn create_receiver(&self, receiver: &NewReceiver) -> StoreResult<Receiver>;
    async fn receivers_for_batch(&self, batch_id: &str) -> StoreResult<Vec<Receiver>>;

    async fn create_session(
        &self,
        token: &str,
        transporter_id: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()>;
    /// Resolves an unexpired session token
    async fn find_session(&self, token: &str, now: DateTime<Utc>) -> StoreResult<Option<Transporter>>;
    async fn delete_session(&self, token: &str) -> StoreResult<()>;
}
