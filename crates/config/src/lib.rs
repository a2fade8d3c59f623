//! Layered configuration for the Filer client.
//!
//! Values are merged in order, later sources winning:
//!
//! 1. built-in defaults ([`Config::default`]),
//! 2. a configuration file, either named explicitly or found at
//!    [`default_path`] (TOML, YAML or JSON, picked by extension),
//! 3. environment variables prefixed with `FILER_` (`FILER_ENDPOINT`,
//!    `FILER_CONCURRENCY`, ...).

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use filer_client::UploadOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "FILER_";
pub const DEFAULT_ENDPOINT: &str = "http://localhost:8888";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the Filer
    pub endpoint: String,
    /// Collection new uploads are placed in
    pub collection: Option<String>,
    /// Time-to-live for new uploads, in the Filer's notation (`3m`, `7d`)
    pub ttl: Option<String>,
    /// Files uploaded at once by folder uploads
    pub concurrency: usize,
    /// Deepest level a recursive listing expands
    pub max_depth: usize,
    /// Per-request timeout; none when unset
    pub timeout_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            collection: None,
            ttl: None,
            concurrency: 1,
            max_depth: 64,
            timeout_secs: None,
        }
    }
}

impl Config {
    /// Load and validate the configuration.
    ///
    /// An explicit `path` must exist. Without one, the file at
    /// [`default_path`] is used only if it is there.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config: Self = figment(path)?.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        tracing::debug!(endpoint = %config.endpoint, concurrency = config.concurrency, "Configuration loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            exn::bail!(ErrorKind::Invalid("endpoint must not be empty".to_string()));
        }
        filer_client::parse_endpoint(&self.endpoint)
            .or_raise(|| ErrorKind::Invalid(format!("endpoint {} is not an http(s) URL", self.endpoint)))?;
        if self.concurrency == 0 {
            exn::bail!(ErrorKind::Invalid("concurrency must be at least 1".to_string()));
        }
        if self.max_depth == 0 {
            exn::bail!(ErrorKind::Invalid("max_depth must be at least 1".to_string()));
        }
        if self.timeout_secs == Some(0) {
            exn::bail!(ErrorKind::Invalid("timeout_secs must be at least 1 when set".to_string()));
        }
        Ok(())
    }

    pub fn upload_options(&self) -> UploadOptions {
        let mut options = UploadOptions::new();
        if let Some(collection) = self.collection.as_deref().filter(|c| !c.is_empty()) {
            options = options.collection(collection);
        }
        if let Some(ttl) = self.ttl.as_deref().filter(|t| !t.is_empty()) {
            options = options.ttl(ttl);
        }
        options
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Where the configuration file lives when none is named, e.g.
/// `~/.config/filer/config.toml` on Linux.
pub fn default_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "filer").map(|dirs| dirs.config_dir().join("config.toml"))
}

/// The merged, not yet extracted, configuration sources.
pub fn figment(path: Option<&Path>) -> Result<Figment> {
    let mut figment = Figment::from(Serialized::defaults(Config::default()));
    if let Some(path) = path
        && !path.is_file()
    {
        exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
    }
    let file = path.map(Path::to_path_buf).or_else(|| default_path().filter(|path| path.is_file()));
    if let Some(file) = file {
        tracing::debug!(path = %file.display(), "Reading configuration file");
        figment = match file.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => figment.merge(Toml::file_exact(&file)),
            Some("yaml" | "yml") => figment.merge(Yaml::file_exact(&file)),
            Some("json") => figment.merge(Json::file_exact(&file)),
            _ => return Err(exn::Exn::from(ErrorKind::UnsupportedFormat(file))),
        };
    }
    Ok(figment.merge(Env::prefixed(ENV_PREFIX)))
}
