//! Core types for the batch transport workflow

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::location::Coordinates;

/// Persisted status of a transport log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportStatus {
    /// Linked or dispatched, no checkpoint reached yet
    Dispatched,
    /// At least one checkpoint recorded
    InTransit,
    /// Terminal
    Delivered,
}

impl TransportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportStatus::Dispatched => "dispatched",
            TransportStatus::InTransit => "in_transit",
            TransportStatus::Delivered => "delivered",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransportStatus::Delivered)
    }
}

impl fmt::Display for TransportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dispatched" => Ok(TransportStatus::Dispatched),
            "in_transit" => Ok(TransportStatus::InTransit),
            "delivered" => Ok(TransportStatus::Delivered),
            other => Err(format!("unknown transport status '{other}'")),
        }
    }
}

/// One of the three in-transit checkpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CheckpointSlot {
    One,
    Two,
    Three,
}

impl CheckpointSlot {
    pub const ALL: [CheckpointSlot; 3] = [CheckpointSlot::One, CheckpointSlot::Two, CheckpointSlot::Three];

    pub fn number(&self) -> u8 {
        match self {
            CheckpointSlot::One => 1,
            CheckpointSlot::Two => 2,
            CheckpointSlot::Three => 3,
        }
    }

    pub fn index(&self) -> usize {
        self.number() as usize - 1
    }

    /// Slot that must be filled first under sequential ordering
    pub fn predecessor(&self) -> Option<CheckpointSlot> {
        match self {
            CheckpointSlot::One => None,
            CheckpointSlot::Two => Some(CheckpointSlot::One),
            CheckpointSlot::Three => Some(CheckpointSlot::Two),
        }
    }
}

impl TryFrom<u8> for CheckpointSlot {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(CheckpointSlot::One),
            2 => Ok(CheckpointSlot::Two),
            3 => Ok(CheckpointSlot::Three),
            other => Err(format!("checkpointNumber must be 1, 2 or 3 (got {other})")),
        }
    }
}

impl fmt::Display for CheckpointSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "checkpoint {}", self.number())
    }
}

/// Which piece of evidence a stored record represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvidenceKind {
    Dispatch,
    Checkpoint(CheckpointSlot),
    Delivery,
}

impl EvidenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceKind::Dispatch => "dispatch",
            EvidenceKind::Checkpoint(CheckpointSlot::One) => "checkpoint_1",
            EvidenceKind::Checkpoint(CheckpointSlot::Two) => "checkpoint_2",
            EvidenceKind::Checkpoint(CheckpointSlot::Three) => "checkpoint_3",
            EvidenceKind::Delivery => "delivery",
        }
    }
}

impl FromStr for EvidenceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dispatch" => Ok(EvidenceKind::Dispatch),
            "checkpoint_1" => Ok(EvidenceKind::Checkpoint(CheckpointSlot::One)),
            "checkpoint_2" => Ok(EvidenceKind::Checkpoint(CheckpointSlot::Two)),
            "checkpoint_3" => Ok(EvidenceKind::Checkpoint(CheckpointSlot::Three)),
            "delivery" => Ok(EvidenceKind::Delivery),
            other => Err(format!("unknown evidence kind '{other}'")),
        }
    }
}

/// Where and when a workflow action happened, and who recorded it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationEvidence {
    /// Device-reported time of the action
    pub timestamp: DateTime<Utc>,
    pub coordinates: Option<Coordinates>,
    pub address: String,
    pub recorded_by: String,
    pub verified_by_qr: bool,
    /// Server time the record was written
    pub recorded_at: DateTime<Utc>,
}

/// A vendor-originated consignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub batch_uid: String,
    pub vendor_name: String,
    pub factory_name: Option<String>,
    pub factory_location: Option<String>,
}

/// A carrier account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transporter {
    pub id: String,
    pub name: String,
    pub contact: Option<String>,
    pub assigned_batch: Option<String>,
}

/// The batch transport record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransportLog {
    pub id: i64,
    pub batch_id: String,
    pub transporter_id: String,
    pub status: TransportStatus,
    pub destination: String,
    pub dispatch: Option<LocationEvidence>,
    pub checkpoints: [Option<LocationEvidence>; 3],
    pub delivery: Option<LocationEvidence>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransportLog {
    pub fn checkpoint(&self, slot: CheckpointSlot) -> Option<&LocationEvidence> {
        self.checkpoints[slot.index()].as_ref()
    }

    /// Number of occupied checkpoint slots; dispatch and delivery never count
    pub fn checkpoints_completed(&self) -> usize {
        self.checkpoints.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_delivered(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Write-once receipt created at delivery
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Receiver {
    pub id: i64,
    pub batch_id: String,
    pub receiver_name: String,
    pub receiving_timestamp: DateTime<Utc>,
    pub receiving_date: NaiveDate,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewReceiver {
    pub batch_id: String,
    pub receiver_name: String,
    pub receiving_timestamp: DateTime<Utc>,
    pub location: String,
}

/// Whether checkpoint N may be recorded before checkpoint N-1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointOrder {
    /// Slots are independent
    #[default]
    Lenient,
    /// Each slot requires its predecessor
    Sequential,
}
