use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::transport::CheckpointOrder;

/// Main configuration structure for SecureRails
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecureRailsConfig {
    /// HTTP server and session settings
    pub server: ServerConfig,
    /// Database settings
    pub database: DatabaseConfig,
    /// Transport workflow policy
    pub workflow: WorkflowConfig,
    /// Geolocation and reverse geocoding
    pub location: LocationConfig,
    /// QR decoding limits
    pub qr: QrConfig,
    /// Observability settings
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind
    pub host: String,
    /// Port to bind
    pub port: u16,
    /// Mark the session cookie `Secure` (enable behind TLS)
    pub cookie_secure: bool,
    /// Session lifetime in hours
    pub session_ttl_hours: u32,
    /// Login attempts allowed per username per minute
    pub login_attempts_per_minute: u32,
    /// Cross-origin frontends allowed to call the API with credentials.
    /// Empty means same-origin only.
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database URL (SQLite file path or connection string)
    pub url: String,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Enable automatic migrations
    pub auto_migrate: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Whether checkpoint N requires checkpoint N-1 to be recorded first
    pub checkpoint_order: CheckpointOrder,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LocationConfig {
    /// Upper bound on waiting for a device position
    pub position_timeout_secs: u64,
    /// Upper bound on a reverse geocoding lookup
    pub geocode_timeout_secs: u64,
    /// Base URL of a Nominatim-compatible service
    pub nominatim_url: String,
    /// User-Agent sent to the geocoding service (required by Nominatim policy)
    pub user_agent: String,
    /// How long resolved addresses stay cached
    pub geocode_cache_ttl_secs: u64,
    /// Outbound lookups per second
    pub requests_per_second: u32,
    /// Resolve addresses server-side when a request carries coordinates only
    pub resolve_missing_addresses: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QrConfig {
    /// Upper bound on decoding one uploaded image
    pub decode_timeout_secs: u64,
    /// Largest accepted upload
    pub max_image_bytes: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level used when RUST_LOG is not set
    pub log_level: String,
    /// Emit JSON lines instead of human-readable output
    pub json_logs: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            cookie_secure: false,
            session_ttl_hours: 24 * 7,
            login_attempts_per_minute: 10,
            cors_origins: Vec::new(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://securerails.db".to_string(),
            max_connections: 10,
            auto_migrate: true,
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            checkpoint_order: CheckpointOrder::Lenient,
        }
    }
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            position_timeout_secs: 30,
            geocode_timeout_secs: 5,
            nominatim_url: "https://nominatim.openstreetmap.org".to_string(),
            user_agent: concat!("securerails/", env!("CARGO_PKG_VERSION")).to_string(),
            geocode_cache_ttl_secs: 3600,
            requests_per_second: 1,
            resolve_missing_addresses: true,
        }
    }
}

impl Default for QrConfig {
    fn default() -> Self {
        Self {
            decode_timeout_secs: 5,
            max_image_bytes: 8 * 1024 * 1024,
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: true,
        }
    }
}

impl Default for SecureRailsConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            workflow: WorkflowConfig::default(),
            location: LocationConfig::default(),
            qr: QrConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl LocationConfig {
    pub fn position_timeout(&self) -> Duration {
        Duration::from_secs(self.position_timeout_secs)
    }

    pub fn geocode_timeout(&self) -> Duration {
        Duration::from_secs(self.geocode_timeout_secs)
    }
}

impl QrConfig {
    pub fn decode_timeout(&self) -> Duration {
        Duration::from_secs(self.decode_timeout_secs)
    }
}

impl SecureRailsConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration files (securerails.toml, .securerails-rc)
    /// 3. Environment variables (prefixed with SECURERAILS__)
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("."))
    }

    /// Same as [`SecureRailsConfig::load`], resolving config files relative to `dir`
    pub fn load_from(dir: &Path) -> Result<Self> {
        let mut builder = Config::builder();

        let toml_path = dir.join("securerails.toml");
        if toml_path.exists() {
            builder = builder.add_source(File::from(toml_path));
        }

        let rc_path = dir.join(".securerails-rc");
        if rc_path.exists() {
            builder = builder.add_source(File::from(rc_path).format(config::FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("SECURERAILS")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let securerails_config: SecureRailsConfig = config.try_deserialize()?;

        Ok(securerails_config)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

/// Global configuration instance
static CONFIG: std::sync::LazyLock<Result<SecureRailsConfig, anyhow::Error>> =
    std::sync::LazyLock::new(|| {
        // Load .env file first
        let _ = SecureRailsConfig::load_env_file();
        SecureRailsConfig::load()
    });

/// Get the global configuration
pub fn config() -> Result<&'static SecureRailsConfig> {
    CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
}

/// Initialize configuration (called at startup)
pub fn init_config() -> Result<()> {
    let _config = config()?;
    tracing::info!("Configuration loaded successfully");
    Ok(())
}
