//! Transport workflow endpoints

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{ApiError, ApiResult};
use super::extract::{acting_transporter, ApiJson, SessionTransporter};
use super::{ok, AppState, Envelope};
use crate::location::Coordinates;
use crate::transport::{
    BatchSummary, CheckpointCommand, DeliverCommand, DispatchCommand, LinkCommand, LocationInput,
    TransportLog, TransportStatus,
};
use crate::verification::{decode_with_timeout, verify, QrVerification};

/// Device position as sent by the portal
#[derive(Debug, Clone, Deserialize)]
pub struct LocationPayload {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub address: Option<String>,
}

impl LocationPayload {
    fn coordinates(&self) -> Coordinates {
        Coordinates {
            latitude: self.latitude,
            longitude: self.longitude,
            accuracy: self.accuracy,
        }
    }
}

fn location_input(
    location: Option<&LocationPayload>,
    address: Option<String>,
    timestamp: Option<DateTime<Utc>>,
) -> LocationInput {
    LocationInput {
        coordinates: location.map(LocationPayload::coordinates),
        address: address.or_else(|| location.and_then(|l| l.address.clone())),
        timestamp,
    }
}

/// Fails with every required field that is absent, in request order
fn require_fields(fields: &[(&str, bool)]) -> ApiResult<()> {
    if fields.iter().all(|(_, present)| *present) {
        Ok(())
    } else {
        Err(missing_fields(fields))
    }
}

fn missing_fields(fields: &[(&str, bool)]) -> ApiError {
    let missing: Vec<&str> = fields
        .iter()
        .filter(|(_, present)| !present)
        .map(|(name, _)| *name)
        .collect();
    ApiError::Validation(format!("Missing required fields: {}", missing.join(", ")))
}

fn present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkRequest {
    pub batch_uid: Option<String>,
    pub transporter_id: Option<String>,
    pub location: Option<LocationPayload>,
}

#[derive(Debug, Serialize)]
pub struct VendorView {
    pub name: String,
    pub factory_name: Option<String>,
    pub factory_location: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LinkResponse {
    pub message: String,
    pub vendor: VendorView,
    pub log: TransportLog,
}

pub async fn link_batch(
    State(state): State<AppState>,
    session: SessionTransporter,
    ApiJson(req): ApiJson<LinkRequest>,
) -> ApiResult<Json<Envelope<LinkResponse>>> {
    let transporter_id = acting_transporter(req.transporter_id.as_deref(), session.0.as_ref())?;
    require_fields(&[
        ("batchUid", present(&req.batch_uid)),
        ("transporterId", transporter_id.is_some()),
    ])?;

    let outcome = state
        .engine
        .link(LinkCommand {
            batch_id: req.batch_uid.unwrap_or_default().trim().to_string(),
            transporter_id: transporter_id.unwrap_or_default(),
            location: req
                .location
                .as_ref()
                .map(|l| location_input(Some(l), None, None)),
        })
        .await?;

    Ok(ok(LinkResponse {
        message: "Batch successfully linked".to_string(),
        vendor: VendorView {
            name: outcome.batch.vendor_name,
            factory_name: outcome.batch.factory_name,
            factory_location: outcome.batch.factory_location,
        },
        log: outcome.log,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    pub batch_uid: Option<String>,
    pub transporter_id: Option<String>,
    pub location: Option<LocationPayload>,
    pub address: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, rename = "verifiedByQR")]
    pub verified_by_qr: bool,
}

#[derive(Debug, Serialize)]
pub struct DispatchedBatch {
    pub batch_uid: String,
    pub vendor_name: String,
    pub factory_name: Option<String>,
    pub dispatch_location: String,
    pub dispatch_time: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct DispatchResponse {
    pub message: String,
    pub batch: DispatchedBatch,
}

pub async fn dispatch(
    State(state): State<AppState>,
    session: SessionTransporter,
    ApiJson(req): ApiJson<DispatchRequest>,
) -> ApiResult<Json<Envelope<DispatchResponse>>> {
    let transporter_id = acting_transporter(req.transporter_id.as_deref(), session.0.as_ref())?;
    require_fields(&[
        ("batchUid", present(&req.batch_uid)),
        ("transporterId", transporter_id.is_some()),
    ])?;

    let outcome = state
        .engine
        .dispatch(DispatchCommand {
            batch_id: req.batch_uid.unwrap_or_default().trim().to_string(),
            transporter_id: transporter_id.unwrap_or_default(),
            location: location_input(req.location.as_ref(), req.address, req.timestamp),
            verified_by_qr: req.verified_by_qr,
        })
        .await?;

    let (dispatch_location, dispatch_time) = match &outcome.log.dispatch {
        Some(evidence) => (evidence.address.clone(), evidence.timestamp),
        None => (outcome.log.destination.clone(), outcome.log.updated_at),
    };

    Ok(ok(DispatchResponse {
        message: "Dispatch initiated successfully".to_string(),
        batch: DispatchedBatch {
            batch_uid: outcome.batch.batch_uid,
            vendor_name: outcome.batch.vendor_name,
            factory_name: outcome.batch.factory_name,
            dispatch_location,
            dispatch_time,
        },
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointRequest {
    pub batch_id: Option<String>,
    pub transporter_id: Option<String>,
    pub checkpoint_number: Option<u8>,
    pub location: Option<LocationPayload>,
    pub address: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, rename = "verifiedByQR")]
    pub verified_by_qr: bool,
    pub scanned_payload: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointResponse {
    pub message: String,
    pub updated_record: TransportLog,
}

pub async fn record_checkpoint(
    State(state): State<AppState>,
    session: SessionTransporter,
    ApiJson(req): ApiJson<CheckpointRequest>,
) -> ApiResult<Json<Envelope<CheckpointResponse>>> {
    let transporter_id = acting_transporter(req.transporter_id.as_deref(), session.0.as_ref())?;
    require_fields(&[
        ("batchId", present(&req.batch_id)),
        ("transporterId", transporter_id.is_some()),
        ("checkpointNumber", req.checkpoint_number.is_some()),
        ("location", req.location.is_some()),
    ])?;

    let outcome = state
        .engine
        .record_checkpoint(CheckpointCommand {
            batch_id: req.batch_id.unwrap_or_default().trim().to_string(),
            transporter_id: transporter_id.unwrap_or_default(),
            checkpoint_number: req.checkpoint_number.unwrap_or_default(),
            location: location_input(req.location.as_ref(), req.address, req.timestamp),
            verified_by_qr: req.verified_by_qr,
            scanned_payload: req.scanned_payload,
        })
        .await?;

    Ok(ok(CheckpointResponse {
        message: format!("Checkpoint {} updated successfully", outcome.slot),
        updated_record: outcome.log,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRequest {
    pub batch_uid: Option<String>,
    pub transporter_id: Option<String>,
    pub location: Option<LocationPayload>,
    pub address: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct DeliveryView {
    pub batch_uid: String,
    pub delivery_location: String,
    pub delivery_time: DateTime<Utc>,
    pub status: TransportStatus,
}

#[derive(Debug, Serialize)]
pub struct DeliveryResponse {
    pub message: String,
    pub delivery: DeliveryView,
}

pub async fn deliver(
    State(state): State<AppState>,
    session: SessionTransporter,
    ApiJson(req): ApiJson<DeliveryRequest>,
) -> ApiResult<Json<Envelope<DeliveryResponse>>> {
    let transporter_id = acting_transporter(req.transporter_id.as_deref(), session.0.as_ref())?;
    require_fields(&[
        ("batchUid", present(&req.batch_uid)),
        ("transporterId", transporter_id.is_some()),
    ])?;

    let outcome = state
        .engine
        .deliver(DeliverCommand {
            batch_id: req.batch_uid.unwrap_or_default().trim().to_string(),
            transporter_id: transporter_id.unwrap_or_default(),
            location: location_input(req.location.as_ref(), req.address, req.timestamp),
        })
        .await?;

    let delivery_time = outcome
        .log
        .delivery
        .as_ref()
        .map(|evidence| evidence.timestamp)
        .unwrap_or(outcome.log.updated_at);

    Ok(ok(DeliveryResponse {
        message: "Delivery completed successfully".to_string(),
        delivery: DeliveryView {
            batch_uid: outcome.log.batch_id.clone(),
            delivery_location: outcome.location,
            delivery_time,
            status: outcome.log.status,
        },
    }))
}

#[derive(Debug, Serialize)]
pub struct BatchesResponse {
    pub batches: Vec<BatchSummary>,
}

pub async fn my_batches(
    State(state): State<AppState>,
    session: SessionTransporter,
) -> ApiResult<Json<Envelope<BatchesResponse>>> {
    let transporter = session.require()?;
    let batches = state.engine.batches_for_transporter(&transporter.id).await?;
    Ok(ok(BatchesResponse { batches }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QrResponse {
    pub verified: bool,
    pub batch_id: String,
    pub message: String,
}

/// Multipart upload with an `image` part and an `expectedBatchId` part
pub async fn verify_qr(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<Envelope<QrResponse>>> {
    let max_bytes = state.config.qr.max_image_bytes;
    let mut image = None;
    let mut expected = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("image") => {
                let bytes = field.bytes().await?;
                if bytes.len() > max_bytes {
                    return Err(ApiError::Validation(format!(
                        "Image exceeds the {max_bytes} byte upload limit"
                    )));
                }
                image = Some(bytes.to_vec());
            }
            Some("expectedBatchId") => expected = Some(field.text().await?),
            _ => {}
        }
    }

    let expected = expected.filter(|id| !id.trim().is_empty());
    let (image, expected) = match (image, expected) {
        (Some(image), Some(expected)) => (image, expected),
        (image, expected) => {
            return Err(missing_fields(&[
                ("image", image.is_some()),
                ("expectedBatchId", expected.is_some()),
            ]))
        }
    };

    let payload = decode_with_timeout(state.qr_decoder.clone(), image, state.config.qr.decode_timeout()).await?;

    let verdict = verify(&payload, &expected);
    let message = verdict.describe();
    match verdict {
        QrVerification::Match { batch_id } => Ok(ok(QrResponse {
            verified: true,
            batch_id,
            message,
        })),
        QrVerification::Mismatch { scanned, expected } => {
            Err(ApiError::Verification { scanned, expected })
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ResolveAddressRequest {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct ResolveAddressResponse {
    pub address: String,
    pub resolved: bool,
}

pub async fn resolve_address(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ResolveAddressRequest>,
) -> ApiResult<Json<Envelope<ResolveAddressResponse>>> {
    let (Some(latitude), Some(longitude)) = (req.latitude, req.longitude) else {
        return Err(ApiError::Validation(
            "Missing required fields: latitude, longitude".to_string(),
        ));
    };
    let coordinates = Coordinates::new(latitude, longitude);
    if !coordinates.is_valid() {
        return Err(ApiError::Validation("Coordinates out of range".to_string()));
    }

    let resolved = state.resolver.resolve(&coordinates).await;
    Ok(ok(ResolveAddressResponse {
        address: resolved.address,
        resolved: resolved.resolved,
    }))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub database: &'static str,
}

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database_ok = match state.engine.store().ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Health check could not reach the database");
            false
        }
    };

    let status = if database_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(HealthResponse {
            status: if database_ok { "healthy" } else { "unhealthy" },
            version: env!("CARGO_PKG_VERSION"),
            database: if database_ok { "healthy" } else { "unhealthy" },
        }),
    )
}
