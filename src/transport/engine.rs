//! Workflow engine for batch transport
//!
//! Every operation takes the transporter identity explicitly, runs the
//! [`TransportMachine`] against the current log to reject invalid moves
//! early, and then performs one authoritative store write. Follow-up writes
//! (transporter assignment, receiver receipt) are best-effort: failures are
//! logged and never undo or fail the primary write.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn, Instrument};

use super::state_machine::{TransitionError, TransportEvent, TransportMachine};
use super::types::{
    Batch, CheckpointOrder, CheckpointSlot, LocationEvidence, NewReceiver, Receiver, TransportLog,
};
use crate::location::{format_coordinates, AddressResolver, Coordinates};
use crate::store::{GuardedWrite, NewTransportLog, StoreError, TransportStore};
use crate::telemetry::{create_workflow_span, generate_correlation_id};
use crate::verification::{verify, QrVerification};

/// Address stored when neither an address nor a position is available
pub const UNRESOLVED_ADDRESS: &str = "Location not resolved";
/// Destination used when the batch has no factory location and none was supplied
pub const UNKNOWN_DESTINATION: &str = "TBD";

const BATCH_NOT_FOUND: &str = "Batch not found in vendor records";
const LOG_NOT_FOUND: &str = "Transport log not found. Please dispatch first.";
const ALREADY_DELIVERED: &str = "Batch has already been delivered";

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("QR code mismatch: scanned {scanned}, expected {expected}")]
    Verification { scanned: String, expected: String },
    #[error("{context}")]
    Persistence {
        context: &'static str,
        #[source]
        source: StoreError,
    },
}

impl WorkflowError {
    fn persistence(context: &'static str) -> impl FnOnce(StoreError) -> WorkflowError {
        move |source| {
            error!(error = %source, context, "Transport store operation failed");
            WorkflowError::Persistence { context, source }
        }
    }
}

impl From<TransitionError> for WorkflowError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::LogMissing { .. } => WorkflowError::NotFound(LOG_NOT_FOUND.to_string()),
            TransitionError::AlreadyDelivered { .. } => {
                WorkflowError::Conflict(ALREADY_DELIVERED.to_string())
            }
            TransitionError::CheckpointOutOfOrder { .. } => WorkflowError::Validation(err.to_string()),
        }
    }
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Position and address supplied with a workflow action
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationInput {
    pub coordinates: Option<Coordinates>,
    pub address: Option<String>,
    /// Device time of the action; server time when absent
    pub timestamp: Option<DateTime<Utc>>,
}

impl LocationInput {
    pub fn at(coordinates: Coordinates) -> Self {
        Self {
            coordinates: Some(coordinates),
            ..Self::default()
        }
    }

    fn supplied_address(&self) -> Option<&str> {
        self.address
            .as_deref()
            .map(str::trim)
            .filter(|address| !address.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkCommand {
    pub batch_id: String,
    pub transporter_id: String,
    /// Advisory only, nothing is stored for a link
    pub location: Option<LocationInput>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkOutcome {
    pub batch: Batch,
    pub log: TransportLog,
    /// True when the link created a new log
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchCommand {
    pub batch_id: String,
    pub transporter_id: String,
    pub location: LocationInput,
    pub verified_by_qr: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchOutcome {
    pub batch: Batch,
    pub log: TransportLog,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointCommand {
    pub batch_id: String,
    pub transporter_id: String,
    pub checkpoint_number: u8,
    pub location: LocationInput,
    pub verified_by_qr: bool,
    /// Decoded QR payload, checked against `batch_id` before anything is written
    pub scanned_payload: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckpointOutcome {
    pub slot: u8,
    pub log: TransportLog,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliverCommand {
    pub batch_id: String,
    pub transporter_id: String,
    pub location: LocationInput,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryOutcome {
    pub log: TransportLog,
    /// `None` when the receipt could not be written
    pub receiver: Option<Receiver>,
    /// Where the batch was received, as stored on the receipt
    pub location: String,
}

/// Dashboard row: a log joined with its vendor details
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub log: TransportLog,
    pub vendor_name: String,
    pub factory_name: String,
    pub factory_location: String,
    pub checkpoints_completed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub batch: Option<Batch>,
    pub logs: Vec<TransportLog>,
    pub receivers: Vec<Receiver>,
}

pub struct WorkflowEngine {
    store: Arc<dyn TransportStore>,
    order: CheckpointOrder,
    resolver: Option<AddressResolver>,
}

impl WorkflowEngine {
    pub fn new(store: Arc<dyn TransportStore>, order: CheckpointOrder) -> Self {
        Self {
            store,
            order,
            resolver: None,
        }
    }

    /// Resolve addresses for actions that arrive with coordinates only
    pub fn with_resolver(mut self, resolver: AddressResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn order(&self) -> CheckpointOrder {
        self.order
    }

    pub fn store(&self) -> &Arc<dyn TransportStore> {
        &self.store
    }

    pub async fn link(&self, cmd: LinkCommand) -> WorkflowResult<LinkOutcome> {
        let span = create_workflow_span("link", &cmd.batch_id, &cmd.transporter_id, &generate_correlation_id());
        async move {
            require("batchUid", &cmd.batch_id)?;
            require("transporterId", &cmd.transporter_id)?;

            let batch = self.require_batch(&cmd.batch_id).await?;

            let existing = self
                .store
                .find_log(&cmd.batch_id, &cmd.transporter_id)
                .await
                .map_err(WorkflowError::persistence("Failed to look up transport log"))?;
            let transition = TransportMachine::new(existing.as_ref(), self.order).apply(TransportEvent::Link)?;

            if let Some(location) = cmd.location.as_ref().and_then(|l| l.coordinates) {
                info!(position = %format_coordinates(&location), "Link carried an advisory location");
            }

            let (log, created) = match existing {
                Some(log) => (log, false),
                None => match self
                    .store
                    .find_latest_log_for_batch(&cmd.batch_id)
                    .await
                    .map_err(WorkflowError::persistence("Failed to look up transport log"))?
                {
                    Some(previous) => {
                        TransportMachine::new(Some(&previous), self.order).apply(TransportEvent::Link)?;
                        info!(
                            log_id = previous.id,
                            previous_transporter = %previous.transporter_id,
                            "Re-targeting transport log to caller"
                        );
                        match self
                            .store
                            .reassign_log(previous.id, &cmd.transporter_id)
                            .await
                            .map_err(WorkflowError::persistence("Failed to link batch"))?
                        {
                            GuardedWrite::Applied(log) => (log, false),
                            GuardedWrite::AlreadyDelivered => return Err(conflict("link")),
                        }
                    }
                    None => {
                        let destination = batch
                            .factory_location
                            .clone()
                            .unwrap_or_else(|| UNKNOWN_DESTINATION.to_string());
                        let log = self
                            .store
                            .create_log(&NewTransportLog {
                                batch_id: cmd.batch_id.clone(),
                                transporter_id: cmd.transporter_id.clone(),
                                destination,
                            })
                            .await
                            .map_err(WorkflowError::persistence("Failed to link batch"))?;
                        (log, true)
                    }
                },
            };

            self.assign(&cmd.transporter_id, Some(&cmd.batch_id)).await;

            info!(
                log_id = log.id,
                created,
                from = ?transition.from,
                status = %log.status,
                "Batch linked"
            );
            Ok(LinkOutcome { batch, log, created })
        }
        .instrument(span)
        .await
    }

    pub async fn dispatch(&self, cmd: DispatchCommand) -> WorkflowResult<DispatchOutcome> {
        let span = create_workflow_span("dispatch", &cmd.batch_id, &cmd.transporter_id, &generate_correlation_id());
        async move {
            require("batchUid", &cmd.batch_id)?;
            require("transporterId", &cmd.transporter_id)?;
            validate_position(&cmd.location)?;

            let batch = self.require_batch(&cmd.batch_id).await?;

            let existing = self
                .store
                .find_log(&cmd.batch_id, &cmd.transporter_id)
                .await
                .map_err(WorkflowError::persistence("Failed to look up transport log"))?;
            let transition =
                TransportMachine::new(existing.as_ref(), self.order).apply(TransportEvent::Dispatch)?;

            let address = self.address_for(&cmd.location).await;
            let destination = batch
                .factory_location
                .clone()
                .or_else(|| cmd.location.supplied_address().map(str::to_string))
                .unwrap_or_else(|| UNKNOWN_DESTINATION.to_string());
            let evidence = evidence(&cmd.location, address, &cmd.transporter_id, cmd.verified_by_qr);

            let written = self
                .store
                .upsert_dispatch(
                    &NewTransportLog {
                        batch_id: cmd.batch_id.clone(),
                        transporter_id: cmd.transporter_id.clone(),
                        destination,
                    },
                    &evidence,
                )
                .await
                .map_err(WorkflowError::persistence("Failed to initiate dispatch"))?;

            let log = match written {
                GuardedWrite::Applied(log) => log,
                GuardedWrite::AlreadyDelivered => return Err(conflict("dispatch")),
            };

            self.assign(&cmd.transporter_id, Some(&cmd.batch_id)).await;

            info!(
                log_id = log.id,
                from = ?transition.from,
                destination = %log.destination,
                "Dispatch recorded"
            );
            Ok(DispatchOutcome { batch, log })
        }
        .instrument(span)
        .await
    }

    pub async fn record_checkpoint(&self, cmd: CheckpointCommand) -> WorkflowResult<CheckpointOutcome> {
        let span = create_workflow_span(
            "record_checkpoint",
            &cmd.batch_id,
            &cmd.transporter_id,
            &generate_correlation_id(),
        );
        async move {
            require("batchId", &cmd.batch_id)?;
            require("transporterId", &cmd.transporter_id)?;
            let slot = CheckpointSlot::try_from(cmd.checkpoint_number).map_err(WorkflowError::Validation)?;
            if cmd.location.coordinates.is_none() {
                return Err(WorkflowError::Validation("Missing required fields: location".to_string()));
            }
            validate_position(&cmd.location)?;

            let mut verified_by_qr = cmd.verified_by_qr;
            if let Some(payload) = &cmd.scanned_payload {
                match verify(payload, &cmd.batch_id) {
                    QrVerification::Match { .. } => verified_by_qr = true,
                    QrVerification::Mismatch { scanned, expected } => {
                        info!(%scanned, %expected, "Rejected checkpoint with mismatched QR payload");
                        return Err(WorkflowError::Verification { scanned, expected });
                    }
                }
            }

            let log = self
                .store
                .find_log(&cmd.batch_id, &cmd.transporter_id)
                .await
                .map_err(WorkflowError::persistence("Failed to look up transport log"))?;
            TransportMachine::new(log.as_ref(), self.order).apply(TransportEvent::checkpoint(slot))?;
            let Some(log) = log else {
                return Err(WorkflowError::NotFound(LOG_NOT_FOUND.to_string()));
            };

            let address = self.address_for(&cmd.location).await;
            let evidence = evidence(&cmd.location, address, &cmd.transporter_id, verified_by_qr);

            let written = self
                .store
                .record_checkpoint(log.id, slot, &evidence)
                .await
                .map_err(WorkflowError::persistence("Failed to update checkpoint"))?;

            match written {
                GuardedWrite::Applied(log) => {
                    info!(
                        log_id = log.id,
                        slot = slot.number(),
                        verified_by_qr,
                        completed = log.checkpoints_completed(),
                        "Checkpoint recorded"
                    );
                    Ok(CheckpointOutcome {
                        slot: slot.number(),
                        log,
                    })
                }
                GuardedWrite::AlreadyDelivered => Err(conflict("record_checkpoint")),
            }
        }
        .instrument(span)
        .await
    }

    pub async fn deliver(&self, cmd: DeliverCommand) -> WorkflowResult<DeliveryOutcome> {
        let span = create_workflow_span("deliver", &cmd.batch_id, &cmd.transporter_id, &generate_correlation_id());
        async move {
            require("batchUid", &cmd.batch_id)?;
            require("transporterId", &cmd.transporter_id)?;
            validate_position(&cmd.location)?;

            let log = self
                .store
                .find_log(&cmd.batch_id, &cmd.transporter_id)
                .await
                .map_err(WorkflowError::persistence("Failed to look up transport log"))?;
            TransportMachine::new(log.as_ref(), self.order).apply(TransportEvent::Deliver)?;
            let Some(log) = log else {
                return Err(WorkflowError::NotFound(LOG_NOT_FOUND.to_string()));
            };

            let address = self.address_for(&cmd.location).await;
            let evidence = evidence(&cmd.location, address.clone(), &cmd.transporter_id, false);

            let written = self
                .store
                .mark_delivered(log.id, &evidence)
                .await
                .map_err(WorkflowError::persistence("Failed to complete delivery"))?;
            let log = match written {
                GuardedWrite::Applied(log) => log,
                GuardedWrite::AlreadyDelivered => return Err(conflict("deliver")),
            };

            let receipt = NewReceiver {
                batch_id: cmd.batch_id.clone(),
                receiver_name: format!("Delivered by {}", cmd.transporter_id),
                receiving_timestamp: evidence.timestamp,
                location: address.clone(),
            };
            let receiver = match self.store.create_receiver(&receipt).await {
                Ok(receiver) => Some(receiver),
                Err(e) => {
                    warn!(error = %e, "Receiver record could not be created; delivery stands");
                    None
                }
            };

            self.assign(&cmd.transporter_id, None).await;

            info!(log_id = log.id, receipt = receiver.is_some(), "Delivery completed");
            Ok(DeliveryOutcome {
                log,
                receiver,
                location: address,
            })
        }
        .instrument(span)
        .await
    }

    /// The transporter's logs joined with vendor details, newest first
    pub async fn batches_for_transporter(&self, transporter_id: &str) -> WorkflowResult<Vec<BatchSummary>> {
        let logs = self
            .store
            .logs_for_transporter(transporter_id)
            .await
            .map_err(WorkflowError::persistence("Failed to load transport logs"))?;

        let batch_ids: Vec<String> = logs.iter().map(|log| log.batch_id.clone()).collect();
        let batches = self
            .store
            .find_batches(&batch_ids)
            .await
            .map_err(WorkflowError::persistence("Failed to load batches"))?;

        Ok(logs
            .into_iter()
            .map(|log| {
                let batch = batches.iter().find(|b| b.batch_uid == log.batch_id);
                BatchSummary {
                    vendor_name: batch
                        .map(|b| b.vendor_name.clone())
                        .unwrap_or_else(|| "Unknown Vendor".to_string()),
                    factory_name: batch
                        .and_then(|b| b.factory_name.clone())
                        .unwrap_or_else(|| "Unknown Factory".to_string()),
                    factory_location: batch
                        .and_then(|b| b.factory_location.clone())
                        .unwrap_or_else(|| "Unknown Location".to_string()),
                    checkpoints_completed: log.checkpoints_completed(),
                    log,
                }
            })
            .collect())
    }

    /// Everything recorded about one batch
    pub async fn batch_report(&self, batch_id: &str) -> WorkflowResult<BatchReport> {
        let batch = self
            .store
            .find_batch(batch_id)
            .await
            .map_err(WorkflowError::persistence("Failed to load batch report"))?;
        let logs = self
            .store
            .logs_for_batch(batch_id)
            .await
            .map_err(WorkflowError::persistence("Failed to load batch report"))?;
        let receivers = self
            .store
            .receivers_for_batch(batch_id)
            .await
            .map_err(WorkflowError::persistence("Failed to load batch report"))?;

        Ok(BatchReport {
            batch,
            logs,
            receivers,
        })
    }

    async fn require_batch(&self, batch_id: &str) -> WorkflowResult<Batch> {
        match self
            .store
            .find_batch(batch_id)
            .await
            .map_err(WorkflowError::persistence("Failed to look up batch"))?
        {
            Some(batch) => Ok(batch),
            None => {
                info!("Rejected action on unknown batch");
                Err(WorkflowError::NotFound(BATCH_NOT_FOUND.to_string()))
            }
        }
    }

    async fn address_for(&self, location: &LocationInput) -> String {
        if let Some(address) = location.supplied_address() {
            return address.to_string();
        }
        match (&location.coordinates, &self.resolver) {
            (Some(coordinates), Some(resolver)) => resolver.resolve(coordinates).await.address,
            (Some(coordinates), None) => format_coordinates(coordinates),
            (None, _) => UNRESOLVED_ADDRESS.to_string(),
        }
    }

    async fn assign(&self, transporter_id: &str, batch_id: Option<&str>) {
        match self.store.set_assigned_batch(transporter_id, batch_id.map(str::to_string)).await {
            Ok(true) => {}
            Ok(false) => warn!(transporter_id, "Transporter record missing; assignment not updated"),
            Err(e) => warn!(error = %e, transporter_id, "Failed to update transporter assignment"),
        }
    }
}

fn require(field: &str, value: &str) -> WorkflowResult<()> {
    if value.trim().is_empty() {
        return Err(WorkflowError::Validation(format!("Missing required fields: {field}")));
    }
    Ok(())
}

fn validate_position(location: &LocationInput) -> WorkflowResult<()> {
    match &location.coordinates {
        Some(coordinates) if !coordinates.is_valid() => Err(WorkflowError::Validation(format!(
            "Coordinates out of range: {}",
            format_coordinates(coordinates)
        ))),
        _ => Ok(()),
    }
}

fn conflict(operation: &'static str) -> WorkflowError {
    info!(operation, "Guarded write refused, batch already delivered");
    WorkflowError::Conflict(ALREADY_DELIVERED.to_string())
}

fn evidence(location: &LocationInput, address: String, recorded_by: &str, verified_by_qr: bool) -> LocationEvidence {
    let recorded_at = Utc::now();
    LocationEvidence {
        timestamp: location.timestamp.unwrap_or(recorded_at),
        coordinates: location.coordinates,
        address,
        recorded_by: recorded_by.to_string(),
        verified_by_qr,
        recorded_at,
    }
}
