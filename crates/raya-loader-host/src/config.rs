//! Host configuration (loader.toml)
//!
//! ```toml
//! base_url = "file:///srv/app/"
//! global_identifier = "@global"
//! fetch_timeout_ms = 5000
//! json_modules = true
//! import_maps = ["importmap.json"]
//!
//! [imports]
//! "lodash" = "./vendor/lodash.js"
//!
//! [scopes."./legacy/"]
//! "lodash" = "./vendor/lodash-v3.js"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::import_map::{ImportMap, ImportMapDocument, Packages};
use crate::resolver::GLOBAL_IDENTIFIER;

/// Errors that can occur while loading host configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a configuration or import map file
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse configuration: {0}")]
    Toml(#[from] toml::de::Error),

    /// Failed to parse an import map
    #[error("Failed to parse import map: {0}")]
    Json(#[from] serde_json::Error),

    /// A URL or path could not be turned into a URL
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Host configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct HostConfig {
    /// URL that top-level specifiers resolve against. Defaults to the
    /// directory of the configuration file, or the working directory.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Identifier reserved for the host global object
    #[serde(default = "default_global_identifier")]
    pub global_identifier: String,

    /// Give up on a fetch after this many milliseconds
    #[serde(default)]
    pub fetch_timeout_ms: Option<u64>,

    /// Whether `application/json` responses load as modules
    #[serde(default = "default_json_modules")]
    pub json_modules: bool,

    /// Import map files, relative to the configuration file
    #[serde(default)]
    pub import_maps: Vec<PathBuf>,

    /// Inline import map entries
    #[serde(default)]
    pub imports: Packages,

    /// Inline scoped import map entries
    #[serde(default)]
    pub scopes: BTreeMap<String, Packages>,

    /// Directory the configuration was read from
    #[serde(skip)]
    pub root: Option<PathBuf>,
}

fn default_global_identifier() -> String {
    GLOBAL_IDENTIFIER.to_string()
}

fn default_json_modules() -> bool {
    true
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            global_identifier: default_global_identifier(),
            fetch_timeout_ms: None,
            json_modules: default_json_modules(),
            import_maps: Vec::new(),
            imports: Packages::new(),
            scopes: BTreeMap::new(),
            root: None,
        }
    }
}

impl HostConfig {
    /// Parse a configuration from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_str(&content)?;
        // Relative paths anchor at the working directory
        let absolute = std::path::absolute(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        config.root = absolute.parent().map(Path::to_path_buf);
        Ok(config)
    }

    /// Parse a configuration from a string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// The base URL, falling back to the configuration directory
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        if let Some(base) = &self.base_url {
            return Url::parse(base).map_err(|e| ConfigError::InvalidUrl {
                url: base.clone(),
                reason: e.to_string(),
            });
        }
        directory_url(&self.root_dir()?)
    }

    /// Directory relative paths resolve against
    fn root_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.root {
            Some(root) => Ok(root.clone()),
            None => std::env::current_dir().map_err(|source| ConfigError::Io {
                path: PathBuf::from("."),
                source,
            }),
        }
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_ms.map(Duration::from_millis)
    }

    /// Compose the inline entries and every listed import map file.
    ///
    /// Inline entries resolve against the base URL; each file resolves
    /// against its own location.
    pub fn import_map(&self) -> Result<ImportMap, ConfigError> {
        let base = self.base_url()?;
        let inline = ImportMapDocument {
            imports: self.imports.clone(),
            scopes: self.scopes.clone(),
        };
        let mut map = ImportMap::from_document(&inline, &base);

        for file in &self.import_maps {
            let path = if file.is_relative() {
                self.root_dir()?.join(file)
            } else {
                file.clone()
            };
            let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            let file_url = Url::from_file_path(&path).map_err(|()| ConfigError::InvalidUrl {
                url: path.display().to_string(),
                reason: "not an absolute path".to_string(),
            })?;
            map.extend_json(&content, &file_url)?;
        }
        Ok(map)
    }
}

fn directory_url(dir: &Path) -> Result<Url, ConfigError> {
    Url::from_directory_path(dir).map_err(|()| ConfigError::InvalidUrl {
        url: dir.display().to_string(),
        reason: "not an absolute path".to_string(),
    })
}
