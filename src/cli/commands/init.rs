use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::config::SecureRailsConfig;

pub struct InitCommand {
    pub force: bool,
    pub dir: PathBuf,
}

impl InitCommand {
    pub fn new(force: bool) -> Self {
        Self {
            force,
            dir: PathBuf::from("."),
        }
    }

    pub fn in_dir(mut self, dir: &Path) -> Self {
        self.dir = dir.to_path_buf();
        self
    }

    pub fn execute(&self) -> Result<()> {
        let path = self.dir.join("securerails.toml");
        if path.exists() && !self.force {
            anyhow::bail!(
                "{} already exists. Use --force to overwrite it.",
                path.display()
            );
        }

        SecureRailsConfig::default().save_to_file(&path)?;
        println!("Wrote default configuration to {}", path.display());
        println!("Next: load your batches and transporters with 'securerails seed <file.toml>'");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        InitCommand::new(false).in_dir(dir.path()).execute().unwrap();
        assert!(InitCommand::new(false).in_dir(dir.path()).execute().is_err());
        InitCommand::new(true).in_dir(dir.path()).execute().unwrap();

        let loaded = SecureRailsConfig::load_from(dir.path()).unwrap();
        assert_eq!(loaded.server.port, 3000);
    }
}
