// src/config/model.rs

use serde::Deserialize;

/// Service configuration as read from a TOML file.
///
/// ```toml
/// [config]
/// max_stax_threads = 0
/// max_nonblocking_actions = 100
/// document_cache_size = 20
/// log_tc_start_stop = false
/// breakpoints = false
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawServiceConfig {
    #[serde(default)]
    pub config: ConfigSection,
}

/// Validated configuration. Built with `ServiceConfig::try_from(raw)`.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    pub config: ConfigSection,
}

impl ServiceConfig {
    pub(crate) fn new_unchecked(config: ConfigSection) -> Self {
        Self { config }
    }
}

/// `[config]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConfigSection {
    /// Maximum number of live STAX-Threads per job. 0 means unlimited.
    #[serde(default)]
    pub max_stax_threads: u32,

    /// Steps a thread may take before yielding to other runnable threads.
    #[serde(default = "default_max_nonblocking_actions")]
    pub max_nonblocking_actions: usize,

    /// Number of parsed job documents kept in memory.
    #[serde(default = "default_document_cache_size")]
    pub document_cache_size: usize,

    /// Publish testcase start and stop events.
    #[serde(default)]
    pub log_tc_start_stop: bool,

    /// Whether `breakpoint` elements hold their thread.
    #[serde(default)]
    pub breakpoints: bool,
}

fn default_max_nonblocking_actions() -> usize {
    100
}

fn default_document_cache_size() -> usize {
    20
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            max_stax_threads: 0,
            max_nonblocking_actions: default_max_nonblocking_actions(),
            document_cache_size: default_document_cache_size(),
            log_tc_start_stop: false,
            breakpoints: false,
        }
    }
}
