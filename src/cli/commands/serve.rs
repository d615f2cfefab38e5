use anyhow::Result;

use crate::api;
use crate::config::SecureRailsConfig;

pub struct ServeCommand {
    pub port: Option<u16>,
}

impl ServeCommand {
    pub async fn execute(&self, config: &SecureRailsConfig) -> Result<()> {
        let mut config = config.clone();
        if let Some(port) = self.port {
            config.server.port = port;
        }
        api::serve(config).await
    }
}
