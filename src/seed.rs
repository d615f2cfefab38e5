//! Loads vendor batches and transporter accounts from a TOML file
//!
//! ```toml
//! [[batches]]
//! batch_uid = "BATCH-001"
//! vendor_name = "Acme Steel"
//! factory_name = "Plant 4"
//! factory_location = "Nashik"
//!
//! [[transporters]]
//! id = "TR-01"
//! name = "Road Runner Logistics"
//! password = "change-me"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

use crate::session::hash_password;
use crate::store::TransportStore;
use crate::transport::{Batch, Transporter};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SeedFile {
    pub batches: Vec<Batch>,
    pub transporters: Vec<SeedTransporter>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedTransporter {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub contact: Option<String>,
    /// Plaintext; only its bcrypt hash is stored
    pub password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedSummary {
    pub batches: usize,
    pub transporters: usize,
}

impl SeedFile {
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read seed file {}", path.display()))?;
        let seed: SeedFile = toml::from_str(&content)
            .with_context(|| format!("Invalid seed file {}", path.display()))?;
        Ok(seed)
    }

    /// Upserts everything; re-running with the same file is harmless
    pub async fn apply(&self, store: &dyn TransportStore, bcrypt_cost: u32) -> Result<SeedSummary> {
        for batch in &self.batches {
            store.upsert_batch(batch).await?;
        }

        for seed in &self.transporters {
            if seed.password.is_empty() {
                anyhow::bail!("Transporter {} has an empty password", seed.id);
            }
            let hash = hash_password(&seed.password, bcrypt_cost)?;
            let transporter = Transporter {
                id: seed.id.clone(),
                name: seed.name.clone(),
                contact: seed.contact.clone(),
                assigned_batch: None,
            };
            store.upsert_transporter(&transporter, &hash).await?;
        }

        let summary = SeedSummary {
            batches: self.batches.len(),
            transporters: self.transporters.len(),
        };
        info!(batches = summary.batches, transporters = summary.transporters, "Seed data applied");
        Ok(summary)
    }
}
