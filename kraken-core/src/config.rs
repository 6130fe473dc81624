//! Configuration types

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, KrakenError, KrakenResult};

/// Default number of documents fetched per remote query.
pub const DEFAULT_CHUNK_SIZE: usize = 10;

/// Default freshness window for the container document.
///
/// The container's cached timestamp is taken on the client right after the
/// read, while the server stamps its own clock, so the two drift by network
/// latency.
pub const DEFAULT_CONTAINER_TOLERANCE_MS: u64 = 10_000;

/// Engine-wide configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EngineConfig {
    /// Directory of the LMDB cache environment.
    pub cache_path: PathBuf,
    /// LMDB map size in megabytes.
    pub cache_max_size_mb: usize,
    /// Documents per remote query.
    pub chunk_size: usize,
    /// Freshness window for member documents, in milliseconds.
    pub member_tolerance_ms: u64,
    /// Freshness window for the container document, in milliseconds.
    pub container_tolerance_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_path: PathBuf::from("./kraken-cache"),
            cache_max_size_mb: 64,
            chunk_size: DEFAULT_CHUNK_SIZE,
            member_tolerance_ms: 0,
            container_tolerance_ms: DEFAULT_CONTAINER_TOLERANCE_MS,
        }
    }
}

impl EngineConfig {
    /// Load and validate a TOML configuration file.
    pub fn from_path(path: &Path) -> KrakenResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate TOML. Missing fields take their defaults.
    pub fn from_toml_str(contents: &str) -> KrakenResult<Self> {
        let config: EngineConfig = toml::from_str(contents).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = path.into();
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_member_tolerance(mut self, tolerance: Duration) -> Self {
        self.member_tolerance_ms = tolerance.as_millis() as u64;
        self
    }

    pub fn with_container_tolerance(mut self, tolerance: Duration) -> Self {
        self.container_tolerance_ms = tolerance.as_millis() as u64;
        self
    }

    pub fn member_tolerance(&self) -> Duration {
        Duration::from_millis(self.member_tolerance_ms)
    }

    pub fn container_tolerance(&self) -> Duration {
        Duration::from_millis(self.container_tolerance_ms)
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - chunk_size > 0
    /// - cache_max_size_mb > 0
    /// - cache_path is not empty
    pub fn validate(&self) -> KrakenResult<()> {
        if self.chunk_size == 0 {
            return Err(KrakenError::Config(ConfigError::InvalidValue {
                field: "chunk_size".to_string(),
                value: self.chunk_size.to_string(),
                reason: "chunk_size must be greater than 0".to_string(),
            }));
        }

        if self.cache_max_size_mb == 0 {
            return Err(KrakenError::Config(ConfigError::InvalidValue {
                field: "cache_max_size_mb".to_string(),
                value: self.cache_max_size_mb.to_string(),
                reason: "cache_max_size_mb must be greater than 0".to_string(),
            }));
        }

        if self.cache_path.as_os_str().is_empty() {
            return Err(KrakenError::Config(ConfigError::InvalidValue {
                field: "cache_path".to_string(),
                value: String::new(),
                reason: "cache_path must not be empty".to_string(),
            }));
        }

        Ok(())
    }
}

/// Per-run options supplied by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Backing documents the run must neither read from cache nor fetch.
    #[serde(default)]
    pub ignored_document_urls: Vec<String>,
    /// Pre-answered migration question. `None` asks the host.
    #[serde(default)]
    pub migrate_schema: Option<bool>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ignoring(mut self, url: impl Into<String>) -> Self {
        self.ignored_document_urls.push(url.into());
        self
    }

    pub fn with_migrate_schema(mut self, migrate: bool) -> Self {
        self.migrate_schema = Some(migrate);
        self
    }

    pub fn is_ignored(&self, url: &str) -> bool {
        self.ignored_document_urls.iter().any(|ignored| ignored == url)
    }
}

// =============================================================================
// TESTS
// =============================================================================
