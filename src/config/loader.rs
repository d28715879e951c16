// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{RawServiceConfig, ServiceConfig};
use crate::definition::{JobDefinition, JobDocument};
use crate::errors::Result;

/// Load a service configuration file and return the raw `RawServiceConfig`.
///
/// This only performs TOML deserialization. Use [`load_and_validate`] for
/// the checked configuration.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawServiceConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawServiceConfig = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a service configuration file and validate it.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ServiceConfig> {
    let raw_config = load_from_path(&path)?;
    let config = ServiceConfig::try_from(raw_config)?;
    Ok(config)
}

/// `Stax.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Stax.toml")
}

/// Parse a job document. Files ending in `.json` are read as JSON, anything
/// else as TOML.
pub fn parse_document(contents: &str, path: &Path) -> Result<JobDocument> {
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let document = if is_json {
        serde_json::from_str(contents)?
    } else {
        toml::from_str(contents)?
    };
    Ok(document)
}

pub fn load_document(path: impl AsRef<Path>) -> Result<JobDocument> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    let document = parse_document(&contents, path)?;
    debug!(file = %path.display(), functions = document.function.len(), "job document loaded");
    Ok(document)
}

/// Load a job document and build its definition.
pub fn load_job(path: impl AsRef<Path>, machine: &str) -> Result<JobDefinition> {
    let path = path.as_ref();
    let document = load_document(path)?;
    JobDefinition::from_document(&document, path, machine)
}
