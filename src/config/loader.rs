//! Configuration loading from disk.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::parser::{parse, MalformedConfig, ParsedConfig};
use crate::config::schema::ReconcilerSettings;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: MalformedConfig,
    },

    #[error("invalid settings in {}: {source}", path.display())]
    Settings {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Load and parse the Omnibus-style source file.
///
/// Semantic validation is left to the reconciliation cycle.
pub fn load_service_config(path: &Path) -> Result<ParsedConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let parsed = parse(&content).map_err(|source| ConfigError::Malformed {
        path: path.to_path_buf(),
        source,
    })?;

    for warning in &parsed.warnings {
        tracing::warn!(path = %path.display(), "{}", warning);
    }

    Ok(parsed)
}

/// Load reconciler settings from a TOML file.
pub fn load_settings(path: &Path) -> Result<ReconcilerSettings, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    toml::from_str(&content).map_err(|source| ConfigError::Settings {
        path: path.to_path_buf(),
        source,
    })
}
