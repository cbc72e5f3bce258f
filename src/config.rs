//! Bridge configuration types and defaults.
//!
//! This module defines the configuration options for the bridge, including
//! the JS global name prefix, the environment version requested from the
//! managed runtime, and optional frame size limits.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default prefix of the installed JS globals
pub const DEFAULT_GLOBAL_PREFIX: &str = "JSI_RN_UDP_";

/// Default environment version (JNI 1.6)
pub const DEFAULT_ENV_VERSION: i32 = 0x0001_0006;

/// Default name given to threads attached on demand
pub const DEFAULT_ATTACH_THREAD_NAME: &str = "udp-frame-bridge";

/// Environment versions the managed runtime may be asked for
pub const KNOWN_ENV_VERSIONS: &[i32] = &[
    0x0001_0001,
    0x0001_0002,
    0x0001_0004,
    0x0001_0006,
    0x0001_0008,
    0x0009_0000,
    0x000a_0000,
    0x0013_0000,
    0x0014_0000,
    0x0015_0000,
];

/// Configuration for the bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    /// Prefix prepended to every installed JS global (default: JSI_RN_UDP_)
    #[serde(default = "default_global_prefix")]
    pub global_prefix: String,

    /// Environment version requested from the managed runtime
    #[serde(default = "default_env_version")]
    pub env_version: i32,

    /// Thread name used when attaching a native thread
    #[serde(default = "default_attach_thread_name")]
    pub attach_thread_name: Option<String>,

    /// Largest frame payload copied into JS, in bytes (default: unlimited)
    #[serde(default)]
    pub max_frame_bytes: Option<usize>,

    /// Log every entry-point call at trace level (default: false)
    #[serde(default)]
    pub trace_calls: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            global_prefix: DEFAULT_GLOBAL_PREFIX.to_string(),
            env_version: DEFAULT_ENV_VERSION,
            attach_thread_name: default_attach_thread_name(),
            max_frame_bytes: None,
            trace_calls: false,
        }
    }
}

impl BridgeConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Set the JS global prefix
    pub fn with_global_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.global_prefix = prefix.into();
        self
    }

    /// Set the environment version
    pub fn with_env_version(mut self, version: i32) -> Self {
        self.env_version = version;
        self
    }

    /// Set the attach thread name
    pub fn with_attach_thread_name(mut self, name: Option<String>) -> Self {
        self.attach_thread_name = name;
        self
    }

    /// Set the frame size limit
    pub fn with_max_frame_bytes(mut self, bytes: usize) -> Self {
        self.max_frame_bytes = Some(bytes);
        self
    }

    /// Enable per-call tracing
    pub fn with_trace_calls(mut self, enable: bool) -> Self {
        self.trace_calls = enable;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_identifier_prefix(&self.global_prefix) {
            return Err(ConfigError::InvalidValue {
                field: "global_prefix".into(),
                reason: format!("'{}' is not a valid identifier prefix", self.global_prefix),
            });
        }

        if !KNOWN_ENV_VERSIONS.contains(&self.env_version) {
            return Err(ConfigError::InvalidValue {
                field: "env_version".into(),
                reason: format!("unknown version {:#010x}", self.env_version),
            });
        }

        if let Some(name) = &self.attach_thread_name {
            if name.is_empty() || name.contains('\0') {
                return Err(ConfigError::InvalidValue {
                    field: "attach_thread_name".into(),
                    reason: "must be non-empty and contain no NUL bytes".into(),
                });
            }
        }

        if self.max_frame_bytes == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "max_frame_bytes".into(),
                reason: "must be greater than 0".into(),
            });
        }

        Ok(())
    }
}

fn is_identifier_prefix(prefix: &str) -> bool {
    let mut chars = prefix.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' || first == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidValue {
        /// The field name
        field: String,
        /// The reason it's invalid
        reason: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Default value functions for serde
fn default_global_prefix() -> String {
    DEFAULT_GLOBAL_PREFIX.to_string()
}

fn default_env_version() -> i32 {
    DEFAULT_ENV_VERSION
}

fn default_attach_thread_name() -> Option<String> {
    Some(DEFAULT_ATTACH_THREAD_NAME.to_string())
}
