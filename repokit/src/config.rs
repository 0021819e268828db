//! Configuration management using Figment
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to lowest):
//! 1. Environment variables (prefix: REPOKIT_, nested keys separated by `__`)
//! 2. Current working directory: ./repokit.toml
//! 3. XDG config directory: ~/.config/repokit/{service_name}/config.toml
//! 4. System directory: /etc/repokit/{service_name}/config.toml
//! 5. Default values
//!
//! ```toml
//! [service]
//! name = "inventory"
//! log_level = "debug"
//!
//! [paging]
//! default_size = 50
//! max_size = 500
//!
//! [transactions]
//! default_isolation = "repeatable_read"
//!
//! [properties]
//! case_insensitive = true
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::repository::{IsolationLevel, PagedOptions, PropertyCase, DEFAULT_PAGE_SIZE};

const ENV_PREFIX: &str = "REPOKIT_";

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Service identity and logging
    #[serde(default)]
    pub service: ServiceConfig,

    /// Paging defaults for `get_paged`
    #[serde(default)]
    pub paging: PagingConfig,

    /// Unit-of-work defaults
    #[serde(default)]
    pub transactions: TransactionConfig,

    /// Property resolution
    #[serde(default)]
    pub properties: PropertyConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name, used in logs
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Log filter (trace, debug, info, warn, error, or an `EnvFilter` directive)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
        }
    }
}

/// Paging configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagingConfig {
    /// Page size used when a paged query passes no options
    #[serde(default = "default_page_size")]
    pub default_size: u32,

    /// Upper bound on any requested page size
    #[serde(default)]
    pub max_size: Option<u32>,
}

impl PagingConfig {
    /// Effective options for one paged query
    ///
    /// Absent options become the first ascending page of `default_size`.
    /// Index and size are clamped to at least 1 and size to `max_size`.
    pub fn options(&self, options: Option<PagedOptions>) -> PagedOptions {
        options
            .unwrap_or_else(|| PagedOptions::new().with_size(self.default_size))
            .normalized(self.max_size)
    }
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            default_size: default_page_size(),
            max_size: None,
        }
    }
}

/// Transaction configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionConfig {
    /// Isolation level for `UnitOfWork::open_default_transaction`
    #[serde(default)]
    pub default_isolation: IsolationLevel,
}

/// Property resolution configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyConfig {
    /// Fall back to a unique case-insensitive match when no exact match exists
    #[serde(default)]
    pub case_insensitive: bool,
}

fn default_service_name() -> String {
    "repokit".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

impl Config {
    /// Load configuration from all sources
    ///
    /// The service name is inferred from the binary name.
    pub fn load() -> Result<Self> {
        let service_name = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(default_service_name);

        Self::load_for_service(&service_name)
    }

    /// Load configuration for a specific service name
    pub fn load_for_service(service_name: &str) -> Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        // lowest priority first
        for path in Self::find_config_paths(service_name).iter().rev() {
            if path.exists() {
                tracing::info!(path = %path.display(), "loading configuration");
                figment = figment.merge(Toml::file(path));
            }
        }

        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Load configuration from a specific file, bypassing the search paths
    ///
    /// A missing file yields the defaults. Environment variables still apply.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Candidate config files, highest priority first
    fn find_config_paths(service_name: &str) -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("repokit.toml")];

        let xdg_dirs = xdg::BaseDirectories::with_prefix("repokit");
        if let Some(path) = xdg_dirs.find_config_file(Path::new(service_name).join("config.toml")) {
            paths.push(path);
        }

        paths.push(PathBuf::from("/etc/repokit").join(service_name).join("config.toml"));
        paths
    }

    /// Property name matching mode selected by `properties.case_insensitive`
    pub fn property_case(&self) -> PropertyCase {
        if self.properties.case_insensitive {
            PropertyCase::Insensitive
        } else {
            PropertyCase::Sensitive
        }
    }
}
