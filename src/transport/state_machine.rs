use serde::Serialize;
use thiserror::Error;

use super::types::{CheckpointOrder, CheckpointSlot, TransportLog, TransportStatus};

/// Workflow actions a transporter can take on a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TransportEvent {
    Link,
    Dispatch,
    RecordCheckpoint { slot: u8 },
    Deliver,
}

impl TransportEvent {
    pub fn checkpoint(slot: CheckpointSlot) -> Self {
        TransportEvent::RecordCheckpoint { slot: slot.number() }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TransportEvent::Link => "link",
            TransportEvent::Dispatch => "dispatch",
            TransportEvent::RecordCheckpoint { .. } => "record_checkpoint",
            TransportEvent::Deliver => "deliver",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("No transport log exists for this batch and transporter")]
    LogMissing { event: TransportEvent },
    #[error("Batch has already been delivered")]
    AlreadyDelivered { event: TransportEvent },
    #[error("{slot} cannot be recorded before {missing}")]
    CheckpointOutOfOrder {
        slot: CheckpointSlot,
        missing: CheckpointSlot,
    },
}

/// Status before and after an accepted event. `None` means no log yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: Option<TransportStatus>,
    pub to: TransportStatus,
}

/// Computes the next status of a (possibly absent) transport log
///
/// ```text
/// UNLINKED --link/dispatch--> DISPATCHED --checkpoint--> IN_TRANSIT --deliver--> DELIVERED
/// ```
///
/// `DELIVERED` is terminal, including for link. Link otherwise keeps the
/// existing status since it only re-targets the log.
#[derive(Debug, Clone, Copy)]
pub struct TransportMachine<'a> {
    log: Option<&'a TransportLog>,
    order: CheckpointOrder,
}

impl<'a> TransportMachine<'a> {
    pub fn new(log: Option<&'a TransportLog>, order: CheckpointOrder) -> Self {
        Self { log, order }
    }

    pub fn current(&self) -> Option<TransportStatus> {
        self.log.map(|log| log.status)
    }

    pub fn apply(&self, event: TransportEvent) -> Result<Transition, TransitionError> {
        let from = self.current();
        let to = match (from, event) {
            // Creating a log
            (None, TransportEvent::Link | TransportEvent::Dispatch) => TransportStatus::Dispatched,
            (None, _) => return Err(TransitionError::LogMissing { event }),

            // Nothing leaves the terminal state
            (Some(TransportStatus::Delivered), _) => {
                tracing::info!(event = event.name(), "Rejected transition on delivered batch");
                return Err(TransitionError::AlreadyDelivered { event });
            }

            (Some(current), TransportEvent::Link) => current,
            (Some(_), TransportEvent::Dispatch) => TransportStatus::Dispatched,
            (Some(_), TransportEvent::RecordCheckpoint { slot }) => {
                self.check_order(slot)?;
                TransportStatus::InTransit
            }
            (Some(_), TransportEvent::Deliver) => TransportStatus::Delivered,
        };

        Ok(Transition { from, to })
    }

    fn check_order(&self, slot_number: u8) -> Result<(), TransitionError> {
        if self.order == CheckpointOrder::Lenient {
            return Ok(());
        }
        let (Ok(slot), Some(log)) = (CheckpointSlot::try_from(slot_number), self.log) else {
            return Ok(());
        };
        match slot.predecessor() {
            Some(missing) if log.checkpoint(missing).is_none() => {
                tracing::info!(
                    batch_id = %log.batch_id,
                    slot = slot.number(),
                    missing = missing.number(),
                    "Rejected out-of-order checkpoint"
                );
                Err(TransitionError::CheckpointOutOfOrder { slot, missing })
            }
            _ => Ok(()),
        }
    }
}
