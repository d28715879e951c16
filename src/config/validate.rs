// src/config/validate.rs

use crate::config::model::{RawServiceConfig, ServiceConfig};
use crate::errors::{Result, StaxError};

impl TryFrom<RawServiceConfig> for ServiceConfig {
    type Error = StaxError;

    fn try_from(raw: RawServiceConfig) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ServiceConfig::new_unchecked(raw.config))
    }
}

fn validate_raw_config(cfg: &RawServiceConfig) -> Result<()> {
    if cfg.config.max_nonblocking_actions == 0 {
        return Err(StaxError::ConfigError(
            "[config].max_nonblocking_actions must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.config.document_cache_size == 0 {
        return Err(StaxError::ConfigError(
            "[config].document_cache_size must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}
