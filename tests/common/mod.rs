// Shared fixtures for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;

use securerails::database::{connect_in_memory, DatabaseManager};
use securerails::location::{Coordinates, GeocodeError, ReverseGeocoder};
use securerails::session::hash_password;
use securerails::store::{GuardedWrite, NewTransportLog, SqliteStore, StoreError, StoreResult, TransportStore};
use securerails::transport::{
    Batch, CheckpointSlot, LocationEvidence, NewReceiver, Receiver, TransportLog, Transporter,
};

pub const PASSWORD: &str = "rails-2024";

/// In-memory store holding batches B1 (with factory) and B2 (without),
/// plus transporters T1 and T2 sharing [`PASSWORD`]
pub async fn seeded_store() -> Arc<SqliteStore> {
    let store = SqliteStore::new(connect_in_memory().await.unwrap());
    seed(&store).await;
    Arc::new(store)
}

/// Same records as [`seeded_store`], in a database file under `dir` with a
/// pool wide enough for concurrent writers
pub async fn seeded_file_store(dir: &Path) -> Arc<SqliteStore> {
    let url = format!("sqlite://{}", dir.join("rails.db").display());
    let manager = DatabaseManager::new(&url, 8, true).await.unwrap();
    let store = SqliteStore::new(manager.pool().clone());
    seed(&store).await;
    Arc::new(store)
}

async fn seed(store: &SqliteStore) {
    store
        .upsert_batch(&Batch {
            batch_uid: "B1".to_string(),
            vendor_name: "Acme Steel".to_string(),
            factory_name: Some("Plant 4".to_string()),
            factory_location: Some("Nashik".to_string()),
        })
        .await
        .unwrap();
    store
        .upsert_batch(&Batch {
            batch_uid: "B2".to_string(),
            vendor_name: "Deccan Fabrics".to_string(),
            factory_name: None,
            factory_location: None,
        })
        .await
        .unwrap();

    let hash = hash_password(PASSWORD, 4).unwrap();
    for id in ["T1", "T2"] {
        store
            .upsert_transporter(
                &Transporter {
                    id: id.to_string(),
                    name: format!("Carrier {id}"),
                    contact: None,
                    assigned_batch: None,
                },
                &hash,
            )
            .await
            .unwrap();
    }
}

pub fn mumbai() -> Coordinates {
    Coordinates::new(19.076, 72.8777)
}

/// Geocoder that always answers with the same address
pub struct StaticGeocoder(pub &'static str);

#[async_trait]
impl ReverseGeocoder for StaticGeocoder {
    async fn reverse(&self, _coordinates: &Coordinates) -> Result<String, GeocodeError> {
        Ok(self.0.to_string())
    }
}

/// Delegates to a real store but fails every receiver write
pub struct ReceiptlessStore(pub Arc<SqliteStore>);

#[async_trait]
impl TransportStore for ReceiptlessStore {
    async fn ping(&self) -> StoreResult<()> {
        self.0.ping().await
    }

    async fn find_batch(&self, batch_uid: &str) -> StoreResult<Option<Batch>> {
        self.0.find_batch(batch_uid).await
    }

    async fn upsert_batch(&self, batch: &Batch) -> StoreResult<()> {
        self.0.upsert_batch(batch).await
    }

    async fn find_batches(&self, batch_uids: &[String]) -> StoreResult<Vec<Batch>> {
        self.0.find_batches(batch_uids).await
    }

    async fn find_transporter(&self, id: &str) -> StoreResult<Option<Transporter>> {
        self.0.find_transporter(id).await
    }

    async fn find_credentials(&self, id: &str) -> StoreResult<Option<(Transporter, String)>> {
        self.0.find_credentials(id).await
    }

    async fn upsert_transporter(&self, transporter: &Transporter, password_hash: &str) -> StoreResult<()> {
        self.0.upsert_transporter(transporter, password_hash).await
    }

    async fn set_assigned_batch(&self, transporter_id: &str, batch_id: Option<String>) -> StoreResult<bool> {
        self.0.set_assigned_batch(transporter_id, batch_id).await
    }

    async fn find_log(&self, batch_id: &str, transporter_id: &str) -> StoreResult<Option<TransportLog>> {
        self.0.find_log(batch_id, transporter_id).await
    }

    async fn find_latest_log_for_batch(&self, batch_id: &str) -> StoreResult<Option<TransportLog>> {
        self.0.find_latest_log_for_batch(batch_id).await
    }

    async fn logs_for_batch(&self, batch_id: &str) -> StoreResult<Vec<TransportLog>> {
        self.0.logs_for_batch(batch_id).await
    }

    async fn logs_for_transporter(&self, transporter_id: &str) -> StoreResult<Vec<TransportLog>> {
        self.0.logs_for_transporter(transporter_id).await
    }

    async fn create_log(&self, log: &NewTransportLog) -> StoreResult<TransportLog> {
        self.0.create_log(log).await
    }

    async fn reassign_log(&self, log_id: i64, transporter_id: &str) -> StoreResult<GuardedWrite<TransportLog>> {
        self.0.reassign_log(log_id, transporter_id).await
    }

    async fn upsert_dispatch(
        &self,
        log: &NewTransportLog,
        evidence: &LocationEvidence,
    ) -> StoreResult<GuardedWrite<TransportLog>> {
        self.0.upsert_dispatch(log, evidence).await
    }

    async fn record_checkpoint(
        &self,
        log_id: i64,
        slot: CheckpointSlot,
        evidence: &LocationEvidence,
    ) -> StoreResult<GuardedWrite<TransportLog>> {
        self.0.record_checkpoint(log_id, slot, evidence).await
    }

    async fn mark_delivered(
        &self,
        log_id: i64,
        evidence: &LocationEvidence,
    ) -> StoreResult<GuardedWrite<TransportLog>> {
        self.0.mark_delivered(log_id, evidence).await
    }

    async fn create_receiver(&self, _receiver: &NewReceiver) -> StoreResult<Receiver> {
        Err(StoreError::Corrupt("receivers table is read-only".to_string()))
    }

    async fn receivers_for_batch(&self, batch_id: &str) -> StoreResult<Vec<Receiver>> {
        self.0.receivers_for_batch(batch_id).await
    }

    async fn create_session(
        &self,
        token: &str,
        transporter_id: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.0.create_session(token, transporter_id, expires_at).await
    }

    async fn find_session(&self, token: &str, now: DateTime<Utc>) -> StoreResult<Option<Transporter>> {
        self.0.find_session(token, now).await
    }

    async fn delete_session(&self, token: &str) -> StoreResult<()> {
        self.0.delete_session(token).await
    }
}

/// PNG of a QR code carrying `payload`, 8px per module with a 4-module quiet zone
pub fn qr_png(payload: &str) -> Vec<u8> {
    use qrcode::{Color, QrCode};

    let code = QrCode::new(payload.as_bytes()).unwrap();
    let modules = code.width() as u32;
    let colors = code.to_colors();
    let (scale, quiet) = (8u32, 4u32);
    let size = (modules + 2 * quiet) * scale;

    let image = image::GrayImage::from_fn(size, size, |x, y| {
        let (mx, my) = (x / scale, y / scale);
        let inside = mx >= quiet && my >= quiet && mx < modules + quiet && my < modules + quiet;
        let dark = inside && colors[((my - quiet) * modules + (mx - quiet)) as usize] == Color::Dark;
        image::Luma([if dark { 0 } else { 255 }])
    });

    let mut png = Vec::new();
    image::DynamicImage::ImageLuma8(image)
        .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
        .unwrap();
    png
}
