//! Configuration loading for shelf.
//!
//! Settings are layered, later sources overriding earlier ones:
//!
//! 1. built-in defaults,
//! 2. a configuration file (TOML, YAML or JSON, chosen by extension),
//! 3. `SHELF_`-prefixed environment variables, with `__` separating nested
//!    keys (`SHELF_LIMITS__MAX_ENTRIES=500`).
//!
//! Without an explicit file, `config.toml` in the platform configuration
//! directory is used when it exists.

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use shelf_ingest::catalog::CatalogHandle;
use shelf_ingest::{CoverLimits, DecodeLimits, ImageInfo, ImageSniffer, Limits, Pipeline};
use shelf_storage::BackendHandle;
use shelf_storage::backend::LocalBackend;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument};

const ENV_PREFIX: &str = "SHELF_";
const CONFIG_FILE: &str = "config.toml";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "shelf")
}

/// Where extracted pages are stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Name the backend reports in logs.
    pub name: String,
    /// Absolute directory holding the page store.
    pub root: PathBuf,
}
impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            name: "pages".to_string(),
            root: project_dirs().map_or_else(|| PathBuf::from("pages"), |dirs| dirs.data_dir().join("pages")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    /// Archive validation ceilings.
    pub limits: Limits,
    /// Image decoder ceilings.
    pub images: DecodeLimits,
    /// Series cover rules.
    pub cover: CoverLimits,
}

impl Config {
    /// Load configuration from defaults, `path` (or the platform default
    /// file) and the environment.
    ///
    /// # Errors
    ///
    /// [`NotFound`](ErrorKind::NotFound) if `path` is given but does not
    /// exist, [`Invalid`](ErrorKind::Invalid) if any source fails to parse or
    /// the merged values are inconsistent.
    #[instrument(skip_all)]
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) if !path.is_file() => exn::bail!(ErrorKind::NotFound(path.to_path_buf())),
            Some(path) => Some(path.to_path_buf()),
            None => Self::default_path().filter(|path| path.is_file()),
        };
        let config = Self::from_sources(file.as_deref())?;
        info!(root = %config.storage.root.display(), "configuration loaded");
        Ok(config)
    }

    /// The platform default configuration file, whether or not it exists.
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    fn from_sources(file: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(file) = file {
            debug!(path = %file.display(), "reading configuration file");
            figment = match file.extension().and_then(|ext| ext.to_str()) {
                Some("toml") => figment.merge(Toml::file_exact(file)),
                Some("yaml" | "yml") => figment.merge(Yaml::file_exact(file)),
                Some("json") => figment.merge(Json::file_exact(file)),
                _ => exn::bail!(ErrorKind::UnsupportedFormat(file.to_path_buf())),
            };
        }
        let config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| exn::Exn::from(ErrorKind::Invalid(e.to_string())))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that are individually well-formed but make no sense.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(exn::Exn::from(ErrorKind::Invalid(msg.to_string())));
        if self.storage.name.trim().is_empty() {
            return invalid("storage.name must not be empty");
        }
        if self.limits.max_entries == 0 {
            return invalid("limits.max_entries must be at least 1");
        }
        if self.limits.max_compression_ratio == 0 {
            return invalid("limits.max_compression_ratio must be at least 1");
        }
        if self.cover.min_dimension > self.cover.max_dimension {
            return invalid("cover.min_dimension must not exceed cover.max_dimension");
        }
        if !(self.cover.max_aspect_ratio.is_finite() && self.cover.max_aspect_ratio > 0.0) {
            return invalid("cover.max_aspect_ratio must be a positive number");
        }
        Ok(())
    }

    /// Open the configured page store.
    pub fn backend(&self) -> Result<BackendHandle> {
        let backend = LocalBackend::new(&self.storage.name, &self.storage.root)
            .or_raise(|| ErrorKind::Storage(self.storage.name.clone()))?;
        Ok(Arc::new(backend))
    }

    /// An image decoder applying the configured memory ceiling.
    pub fn sniffer(&self) -> ImageSniffer {
        ImageSniffer::new(self.images)
    }

    /// Check a series cover image against the configured cover rules.
    pub fn validate_cover(&self, bytes: &[u8]) -> shelf_ingest::error::Result<ImageInfo> {
        shelf_ingest::validate_cover(bytes, &self.cover, &self.sniffer())
    }

    /// An ingestion pipeline over the configured page store and `catalog`,
    /// applying the configured limits.
    pub fn pipeline(&self, catalog: CatalogHandle) -> Result<Pipeline> {
        Ok(Pipeline::new(self.backend()?, catalog)
            .with_limits(self.limits)
            .with_decode_limits(self.images))
    }
}
