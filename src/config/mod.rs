// src/config/mod.rs

//! Configuration and job document loading.
//!
//! Responsibilities:
//! - Define the TOML-backed service configuration (`model.rs`).
//! - Load configuration files and job documents from disk (`loader.rs`).
//! - Validate configuration invariants (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{
    default_config_path, load_and_validate, load_document, load_from_path, load_job,
    parse_document,
};
pub use model::{ConfigSection, RawServiceConfig, ServiceConfig};
