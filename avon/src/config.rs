//! Configuration management using Figment
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to lowest):
//! 1. Environment variables (prefix: `AVON_`, nested keys split on `__`,
//!    e.g. `AVON_PAGINATION__MAX_PER_PAGE=50`)
//! 2. Current working directory: `./avon.toml`
//! 3. Default values

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::repository::SoftDeletes;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,

    /// Listing page sizes
    #[serde(default)]
    pub pagination: PaginationConfig,

    /// Soft-delete marker column
    #[serde(default)]
    pub soft_delete: SoftDeleteConfig,

    /// File backend location
    #[serde(default)]
    pub storage: StorageConfig,

    /// Database configuration (optional)
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Log level or `EnvFilter` directives (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Environment (dev, staging, production)
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// Page size bounds for listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationConfig {
    /// Page size when none is requested
    #[serde(default = "default_per_page")]
    pub default_per_page: u64,

    /// Upper bound for requested page sizes
    #[serde(default = "default_max_per_page")]
    pub max_per_page: u64,
}

/// Soft-delete configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftDeleteConfig {
    /// Marker column; null means live
    #[serde(default = "default_soft_delete_column")]
    pub column: String,
}

/// File backend configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one `{resource}.json` per resource
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum idle connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,
}

fn default_service_name() -> String {
    "avon".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_environment() -> String {
    "dev".to_string()
}

fn default_per_page() -> u64 {
    15
}

fn default_max_per_page() -> u64 {
    100
}

fn default_soft_delete_column() -> String {
    "deleted_at".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./storage")
}

fn default_max_connections() -> u32 {
    50
}

fn default_min_connections() -> u32 {
    5
}

fn default_connection_timeout() -> u64 {
    10
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            environment: default_environment(),
        }
    }
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_per_page: default_per_page(),
            max_per_page: default_max_per_page(),
        }
    }
}

impl Default for SoftDeleteConfig {
    fn default() -> Self {
        Self {
            column: default_soft_delete_column(),
        }
    }
}

impl SoftDeleteConfig {
    /// The soft-delete capability for this column
    pub fn soft_deletes(&self) -> SoftDeletes {
        SoftDeletes::new(self.column.clone())
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl Config {
    /// Load configuration from `./avon.toml` (if present) and `AVON_` variables
    pub fn load() -> Result<Self> {
        Self::load_from("avon.toml")
    }

    /// Load configuration from a specific file
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
        } else {
            tracing::debug!("No configuration file at {}", path.display());
        }

        let config = Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Config::default()))
            // Load from config file (if exists)
            .merge(Toml::file(path))
            // Override with environment variables
            .merge(Env::prefixed("AVON_").split("__"))
            .extract()?;

        Ok(config)
    }

    /// Get database URL
    pub fn database_url(&self) -> Option<&str> {
        self.database.as_ref().map(|db| db.url.as_str())
    }
}
