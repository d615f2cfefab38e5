use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::debug;

use super::{GuardedWrite, NewTransportLog, StoreError, StoreResult, TransportStore};
use crate::location::Coordinates;
use crate::transport::{
    Batch, CheckpointSlot, EvidenceKind, LocationEvidence, NewReceiver, Receiver, Transporter,
    TransportLog, TransportStatus,
};

const LOG_COLUMNS: &str =
    "id, batch_id, transporter_id, status, destination, created_at, updated_at";
const EVIDENCE_COLUMNS: &str = "log_id, kind, timestamp, latitude, longitude, accuracy, address, recorded_by, verified_by_qr, recorded_at";

/// [`TransportStore`] backed by SQLite
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn load_log(&self, log_id: i64) -> StoreResult<TransportLog> {
        let row = sqlx::query(&format!("SELECT {LOG_COLUMNS} FROM transport_logs WHERE id = ?1"))
            .bind(log_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::Corrupt(format!("transport log {log_id} vanished")))?;

        let mut logs = vec![log_from_row(&row)?];
        self.attach_evidence(&mut logs).await?;
        Ok(logs.remove(0))
    }

    async fn load_logs(&self, rows: Vec<SqliteRow>) -> StoreResult<Vec<TransportLog>> {
        let mut logs = rows
            .iter()
            .map(log_from_row)
            .collect::<StoreResult<Vec<_>>>()?;
        self.attach_evidence(&mut logs).await?;
        Ok(logs)
    }

    async fn attach_evidence(&self, logs: &mut [TransportLog]) -> StoreResult<()> {
        if logs.is_empty() {
            return Ok(());
        }

        let positions: HashMap<i64, usize> = logs
            .iter()
            .enumerate()
            .map(|(position, log)| (log.id, position))
            .collect();

        let mut query = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {EVIDENCE_COLUMNS} FROM log_evidence WHERE log_id IN ("
        ));
        let mut ids = query.separated(", ");
        for id in positions.keys() {
            ids.push_bind(*id);
        }
        ids.push_unseparated(")");

        let rows = query.build().fetch_all(&self.pool).await?;
        for row in rows {
            let log_id: i64 = row.try_get("log_id")?;
            let kind: String = row.try_get("kind")?;
            let kind = EvidenceKind::from_str(&kind).map_err(StoreError::Corrupt)?;
            let evidence = evidence_from_row(&row)?;

            if let Some(&position) = positions.get(&log_id) {
                let log = &mut logs[position];
                match kind {
                    EvidenceKind::Dispatch => log.dispatch = Some(evidence),
                    EvidenceKind::Checkpoint(slot) => log.checkpoints[slot.index()] = Some(evidence),
                    EvidenceKind::Delivery => log.delivery = Some(evidence),
                }
            }
        }

        Ok(())
    }

    /// Moves a log to `status` unless it is already delivered, then stores the evidence
    async fn guarded_status_write(
        &self,
        log_id: i64,
        status: TransportStatus,
        kind: EvidenceKind,
        evidence: &LocationEvidence,
    ) -> StoreResult<GuardedWrite<TransportLog>> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE transport_logs
            SET status = ?1, updated_at = ?2
            WHERE id = ?3 AND status != 'delivered'
            "#,
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(log_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            debug!(log_id, kind = kind.as_str(), "Guarded write skipped, log already delivered");
            return Ok(GuardedWrite::AlreadyDelivered);
        }

        put_evidence(&mut tx, log_id, kind, evidence).await?;
        tx.commit().await?;

        Ok(GuardedWrite::Applied(self.load_log(log_id).await?))
    }
}

fn log_from_row(row: &SqliteRow) -> StoreResult<TransportLog> {
    let status: String = row.try_get("status")?;
    Ok(TransportLog {
        id: row.try_get("id")?,
        batch_id: row.try_get("batch_id")?,
        transporter_id: row.try_get("transporter_id")?,
        status: TransportStatus::from_str(&status).map_err(StoreError::Corrupt)?,
        destination: row.try_get("destination")?,
        dispatch: None,
        checkpoints: [None, None, None],
        delivery: None,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn evidence_from_row(row: &SqliteRow) -> StoreResult<LocationEvidence> {
    let latitude: Option<f64> = row.try_get("latitude")?;
    let longitude: Option<f64> = row.try_get("longitude")?;
    let coordinates = match (latitude, longitude) {
        (Some(latitude), Some(longitude)) => Some(Coordinates {
            latitude,
            longitude,
            accuracy: row.try_get("accuracy")?,
        }),
        _ => None,
    };

    Ok(LocationEvidence {
        timestamp: row.try_get("timestamp")?,
        coordinates,
        address: row.try_get("address")?,
        recorded_by: row.try_get("recorded_by")?,
        verified_by_qr: row.try_get("verified_by_qr")?,
        recorded_at: row.try_get("recorded_at")?,
    })
}

fn batch_from_row(row: &SqliteRow) -> StoreResult<Batch> {
    Ok(Batch {
        batch_uid: row.try_get("batch_uid")?,
        vendor_name: row.try_get("vendor_name")?,
        factory_name: row.try_get("factory_name")?,
        factory_location: row.try_get("factory_location")?,
    })
}

fn transporter_from_row(row: &SqliteRow) -> StoreResult<Transporter> {
    Ok(Transporter {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        contact: row.try_get("contact")?,
        assigned_batch: row.try_get("assigned_batch")?,
    })
}

/// Last write wins for a given (log, kind)
async fn put_evidence(
    conn: &mut SqliteConnection,
    log_id: i64,
    kind: EvidenceKind,
    evidence: &LocationEvidence,
) -> Result<(), sqlx::Error> {
    let coordinates = evidence.coordinates.as_ref();
    sqlx::query(
        r#"
        INSERT INTO log_evidence (log_id, kind, timestamp, latitude, longitude, accuracy, address, recorded_by, verified_by_qr, recorded_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        ON CONFLICT (log_id, kind) DO UPDATE SET
            timestamp = excluded.timestamp,
            latitude = excluded.latitude,
            longitude = excluded.longitude,
            accuracy = excluded.accuracy,
            address = excluded.address,
            recorded_by = excluded.recorded_by,
            verified_by_qr = excluded.verified_by_qr,
            recorded_at = excluded.recorded_at
        "#,
    )
    .bind(log_id)
    .bind(kind.as_str())
    .bind(evidence.timestamp)
    .bind(coordinates.map(|c| c.latitude))
    .bind(coordinates.map(|c| c.longitude))
    .bind(coordinates.and_then(|c| c.accuracy))
    .bind(&evidence.address)
    .bind(&evidence.recorded_by)
    .bind(evidence.verified_by_qr)
    .bind(evidence.recorded_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

#[async_trait]
impl TransportStore for SqliteStore {
    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    async fn find_batch(&self, batch_uid: &str) -> StoreResult<Option<Batch>> {
        let row = sqlx::query(
            "SELECT batch_uid, vendor_name, factory_name, factory_location FROM batches WHERE batch_uid = ?1",
        )
        .bind(batch_uid)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(batch_from_row).transpose()
    }

    async fn upsert_batch(&self, batch: &Batch) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO batches (batch_uid, vendor_name, factory_name, factory_location)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (batch_uid) DO UPDATE SET
                vendor_name = excluded.vendor_name,
                factory_name = excluded.factory_name,
                factory_location = excluded.factory_location
            "#,
        )
        .bind(&batch.batch_uid)
        .bind(&batch.vendor_name)
        .bind(&batch.factory_name)
        .bind(&batch.factory_location)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_batches(&self, batch_uids: &[String]) -> StoreResult<Vec<Batch>> {
        if batch_uids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT batch_uid, vendor_name, factory_name, factory_location FROM batches WHERE batch_uid IN (",
        );
        let mut uids = query.separated(", ");
        for uid in batch_uids {
            uids.push_bind(uid.as_str());
        }
        uids.push_unseparated(")");

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter().map(batch_from_row).collect()
    }

    async fn find_transporter(&self, id: &str) -> StoreResult<Option<Transporter>> {
        let row = sqlx::query(
            "SELECT id, name, contact, assigned_batch FROM transporters WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(transporter_from_row).transpose()
    }

    async fn find_credentials(&self, id: &str) -> StoreResult<Option<(Transporter, String)>> {
        let row = sqlx::query(
            "SELECT id, name, contact, assigned_batch, password_hash FROM transporters WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let password_hash: String = row.try_get("password_hash")?;
                Ok(Some((transporter_from_row(&row)?, password_hash)))
            }
            None => Ok(None),
        }
    }

    async fn upsert_transporter(&self, transporter: &Transporter, password_hash: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO transporters (id, name, contact, password_hash, assigned_batch)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                contact = excluded.contact,
                password_hash = excluded.password_hash
            "#,
        )
        .bind(&transporter.id)
        .bind(&transporter.name)
        .bind(&transporter.contact)
        .bind(password_hash)
        .bind(&transporter.assigned_batch)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_assigned_batch(&self, transporter_id: &str, batch_id: Option<String>) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE transporters SET assigned_batch = ?1 WHERE id = ?2")
            .bind(batch_id)
            .bind(transporter_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_log(&self, batch_id: &str, transporter_id: &str) -> StoreResult<Option<TransportLog>> {
        let row = sqlx::query(&format!(
            "SELECT {LOG_COLUMNS} FROM transport_logs WHERE batch_id = ?1 AND transporter_id = ?2"
        ))
        .bind(batch_id)
        .bind(transporter_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(self.load_logs(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn find_latest_log_for_batch(&self, batch_id: &str) -> StoreResult<Option<TransportLog>> {
        let row = sqlx::query(&format!(
            "SELECT {LOG_COLUMNS} FROM transport_logs WHERE batch_id = ?1 ORDER BY id DESC LIMIT 1"
        ))
        .bind(batch_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(self.load_logs(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn logs_for_batch(&self, batch_id: &str) -> StoreResult<Vec<TransportLog>> {
        let rows = sqlx::query(&format!(
            "SELECT {LOG_COLUMNS} FROM transport_logs WHERE batch_id = ?1 ORDER BY id ASC"
        ))
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;

        self.load_logs(rows).await
    }

    async fn logs_for_transporter(&self, transporter_id: &str) -> StoreResult<Vec<TransportLog>> {
        let rows = sqlx::query(&format!(
            "SELECT {LOG_COLUMNS} FROM transport_logs WHERE transporter_id = ?1 ORDER BY id DESC"
        ))
        .bind(transporter_id)
        .fetch_all(&self.pool)
        .await?;

        self.load_logs(rows).await
    }

    async fn create_log(&self, log: &NewTransportLog) -> StoreResult<TransportLog> {
        let now = Utc::now();
        let row = sqlx::query(
            r#"
            INSERT INTO transport_logs (batch_id, transporter_id, status, destination, created_at, updated_at)
            VALUES (?1, ?2, 'dispatched', ?3, ?4, ?4)
            RETURNING id
            "#,
        )
        .bind(&log.batch_id)
        .bind(&log.transporter_id)
        .bind(&log.destination)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        self.load_log(row.try_get("id")?).await
    }

    async fn reassign_log(&self, log_id: i64, transporter_id: &str) -> StoreResult<GuardedWrite<TransportLog>> {
        let updated = sqlx::query(
            r#"
            UPDATE transport_logs
            SET transporter_id = ?1, updated_at = ?2
            WHERE id = ?3 AND status != 'delivered'
            "#,
        )
        .bind(transporter_id)
        .bind(Utc::now())
        .bind(log_id)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            debug!(log_id, "Reassignment skipped, log already delivered");
            return Ok(GuardedWrite::AlreadyDelivered);
        }

        Ok(GuardedWrite::Applied(self.load_log(log_id).await?))
    }

    async fn upsert_dispatch(
        &self,
        log: &NewTransportLog,
        evidence: &LocationEvidence,
    ) -> StoreResult<GuardedWrite<TransportLog>> {
        let mut tx = self.pool.begin().await?;

        // The conflict branch is skipped for delivered logs, which returns no row
        let row = sqlx::query(
            r#"
            INSERT INTO transport_logs (batch_id, transporter_id, status, destination, created_at, updated_at)
            VALUES (?1, ?2, 'dispatched', ?3, ?4, ?4)
            ON CONFLICT (batch_id, transporter_id) DO UPDATE SET
                status = 'dispatched',
                destination = excluded.destination,
                updated_at = excluded.updated_at
            WHERE transport_logs.status != 'delivered'
            RETURNING id
            "#,
        )
        .bind(&log.batch_id)
        .bind(&log.transporter_id)
        .bind(&log.destination)
        .bind(Utc::now())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(GuardedWrite::AlreadyDelivered);
        };
        let log_id: i64 = row.try_get("id")?;

        put_evidence(&mut tx, log_id, EvidenceKind::Dispatch, evidence).await?;
        tx.commit().await?;

        Ok(GuardedWrite::Applied(self.load_log(log_id).await?))
    }

    async fn record_checkpoint(
        &self,
        log_id: i64,
        slot: CheckpointSlot,
        evidence: &LocationEvidence,
    ) -> StoreResult<GuardedWrite<TransportLog>> {
        self.guarded_status_write(
            log_id,
            TransportStatus::InTransit,
            EvidenceKind::Checkpoint(slot),
            evidence,
        )
        .await
    }

    async fn mark_delivered(
        &self,
        log_id: i64,
        evidence: &LocationEvidence,
    ) -> StoreResult<GuardedWrite<TransportLog>> {
        self.guarded_status_write(
            log_id,
            TransportStatus::Delivered,
            EvidenceKind::Delivery,
            evidence,
        )
        .await
    }

    async fn create_receiver(&self, receiver: &NewReceiver) -> StoreResult<Receiver> {
        let receiving_date = receiver.receiving_timestamp.date_naive();
        let row = sqlx::query(
            r#"
            INSERT INTO receivers (batch_id, receiver_name, receiving_timestamp, receiving_date, location)
            VALUES (?1, ?2, ?3, ?4, ?5)
            RETURNING id
            "#,
        )
        .bind(&receiver.batch_id)
        .bind(&receiver.receiver_name)
        .bind(receiver.receiving_timestamp)
        .bind(receiving_date)
        .bind(&receiver.location)
        .fetch_one(&self.pool)
        .await?;

        Ok(Receiver {
            id: row.try_get("id")?,
            batch_id: receiver.batch_id.clone(),
            receiver_name: receiver.receiver_name.clone(),
            receiving_timestamp: receiver.receiving_timestamp,
            receiving_date,
            location: receiver.location.clone(),
        })
    }

    async fn receivers_for_batch(&self, batch_id: &str) -> StoreResult<Vec<Receiver>> {
        let rows = sqlx::query(
            r#"
            SELECT id, batch_id, receiver_name, receiving_timestamp, receiving_date, location
            FROM receivers
            WHERE batch_id = ?1
            ORDER BY id ASC
            "#,
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(Receiver {
                    id: row.try_get("id")?,
                    batch_id: row.try_get("batch_id")?,
                    receiver_name: row.try_get("receiver_name")?,
                    receiving_timestamp: row.try_get("receiving_timestamp")?,
                    receiving_date: row.try_get("receiving_date")?,
                    location: row.try_get("location")?,
                })
            })
            .collect()
    }

    async fn create_session(
        &self,
        token: &str,
        transporter_id: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO sessions (token, transporter_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(token)
        .bind(transporter_id)
        .bind(Utc::now())
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_session(&self, token: &str, now: DateTime<Utc>) -> StoreResult<Option<Transporter>> {
        let row = sqlx::query(
            r#"
            SELECT t.id, t.name, t.contact, t.assigned_batch, s.expires_at
            FROM sessions s
            JOIN transporters t ON t.id = s.transporter_id
            WHERE s.token = ?1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let expires_at: DateTime<Utc> = row.try_get("expires_at")?;
        if expires_at <= now {
            return Ok(None);
        }
        transporter_from_row(&row).map(Some)
    }

    async fn delete_session(&self, token: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM sessions WHERE token = ?1")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
