//! Batch transport workflow: link, dispatch, checkpoints and delivery

pub mod engine;
pub mod state_machine;
pub mod types;

pub use engine::{
    BatchReport, BatchSummary, CheckpointCommand, CheckpointOutcome, DeliverCommand, DeliveryOutcome,
    DispatchCommand, DispatchOutcome, LinkCommand, LinkOutcome, LocationInput, WorkflowEngine,
    WorkflowError, WorkflowResult, UNRESOLVED_ADDRESS,
};
pub use state_machine::{Transition, TransitionError, TransportEvent, TransportMachine};
pub use types::{
    Batch, CheckpointOrder, CheckpointSlot, EvidenceKind, LocationEvidence, NewReceiver, Receiver,
    TransportLog, TransportStatus, Transporter,
};
