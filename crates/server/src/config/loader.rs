use std::path::{Path, PathBuf};

use dispatch_common::config::SystemConfig;

use super::validation;

/// Load and validate `dispatch.toml`.
///
/// Fails loudly with a clear error if the file is missing, malformed, or
/// contains out-of-range values; the server refuses to start otherwise.
pub fn load_config(path: &Path) -> Result<SystemConfig, ConfigError> {
    tracing::info!(path = %path.display(), "loading configuration");

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let system: SystemConfig = toml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;

    validation::validate(&system)?;

    tracing::info!("configuration loaded successfully");
    Ok(system)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {detail}")]
    Parse { path: PathBuf, detail: String },

    #[error("validation failed: {0}")]
    Validation(String),
}
