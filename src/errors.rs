// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::engine::JobId;

#[derive(Error, Debug)]
pub enum StaxError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid <{element}> element at line {line}: {message}")]
    DefinitionError {
        element: String,
        line: u32,
        message: String,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StaxError {
    pub(crate) fn definition(element: &str, line: u32, message: impl Into<String>) -> Self {
        StaxError::DefinitionError {
            element: element.to_string(),
            line,
            message: message.into(),
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, StaxError>;
