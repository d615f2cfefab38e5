// SecureRails Library - batch transport checkpoint workflow
// This exposes the core components for the binary and integration tests

pub mod api;
pub mod cli;
pub mod config;
pub mod database;
pub mod location;
pub mod seed;
pub mod session;
pub mod shutdown;
pub mod store;
pub mod telemetry;
pub mod transport;
pub mod verification;

// Re-export key types for easy access
pub use api::{create_router, AppState};
pub use config::{config, init_config, SecureRailsConfig};
pub use database::DatabaseManager;
pub use location::{AddressResolver, Coordinates, GeolocationError, LocationCapture};
pub use session::{SessionError, SessionManager};
pub use store::{SqliteStore, StoreError, TransportStore};
pub use telemetry::{generate_correlation_id, init_telemetry};
pub use transport::{
    CheckpointOrder, CheckpointSlot, TransportLog, TransportMachine, TransportStatus,
    WorkflowEngine, WorkflowError,
};
pub use verification::{verify, QrDecoder, QrVerification, RqrrDecoder};
