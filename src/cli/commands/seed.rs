use anyhow::Result;
use std::path::PathBuf;

use super::with_store;
use crate::config::SecureRailsConfig;
use crate::seed::SeedFile;

pub struct SeedCommand {
    pub file: PathBuf,
}

impl SeedCommand {
    pub async fn execute(&self, config: &SecureRailsConfig) -> Result<()> {
        let seed = SeedFile::load(&self.file).await?;
        let summary = with_store(config, |store| async move {
            seed.apply(store.as_ref(), bcrypt::DEFAULT_COST).await
        })
        .await?;

        println!(
            "Seeded {} batches and {} transporters from {}",
            summary.batches,
            summary.transporters,
            self.file.display()
        );
        Ok(())
    }
}
