//! Error types for the bridge.
//!
//! This module defines error codes, the error detail thrown back to
//! JavaScript, the error type of the managed-runtime seam, and the main
//! error type used throughout the crate.

use serde::{Deserialize, Serialize};

/// Error codes for categorizing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Calling thread could not be attached to the managed runtime
    AttachFailed,
    /// Managed runtime does not support the requested environment version
    UnsupportedVersion,
    /// Class or method could not be resolved on the target object
    MethodNotFound,
    /// Managed method left an exception pending
    ManagedException,
    /// Invalid argument passed from JavaScript
    InvalidArgument,
    /// Frame exceeded the configured size limit
    ResourceLimit,
    /// Invalid configuration
    InvalidConfig,
    /// Internal bridge error (bug or broken managed runtime)
    InternalError,
}

impl ErrorCode {
    /// Every code, in declaration order
    pub const ALL: [ErrorCode; 8] = [
        ErrorCode::AttachFailed,
        ErrorCode::UnsupportedVersion,
        ErrorCode::MethodNotFound,
        ErrorCode::ManagedException,
        ErrorCode::InvalidArgument,
        ErrorCode::ResourceLimit,
        ErrorCode::InvalidConfig,
        ErrorCode::InternalError,
    ];

    /// Position in [`ErrorCode::ALL`]
    pub fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCode::AttachFailed => write!(f, "ATTACH_FAILED"),
            ErrorCode::UnsupportedVersion => write!(f, "UNSUPPORTED_VERSION"),
            ErrorCode::MethodNotFound => write!(f, "METHOD_NOT_FOUND"),
            ErrorCode::ManagedException => write!(f, "MANAGED_EXCEPTION"),
            ErrorCode::InvalidArgument => write!(f, "INVALID_ARGUMENT"),
            ErrorCode::ResourceLimit => write!(f, "RESOURCE_LIMIT"),
            ErrorCode::InvalidConfig => write!(f, "INVALID_CONFIG"),
            ErrorCode::InternalError => write!(f, "INTERNAL_ERROR"),
        }
    }
}

/// Error detail thrown to the JavaScript caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeError {
    /// Error code
    pub code: ErrorCode,

    /// Human-readable message
    pub message: String,

    /// JS global name of the entry point that failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,

    /// Additional context for debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl BridgeError {
    /// Create a new bridge error
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            entry_point: None,
            context: None,
        }
    }

    /// Create an attach failure error
    pub fn attach_failed(status: i32) -> Self {
        Self::new(
            ErrorCode::AttachFailed,
            format!("Failed to attach current thread (status {})", status),
        )
    }

    /// Create an unsupported version error
    pub fn unsupported_version(version: i32) -> Self {
        Self::new(
            ErrorCode::UnsupportedVersion,
            format!("Environment version {:#010x} is not supported", version),
        )
    }

    /// Create a method not found error
    pub fn method_not_found(method: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::MethodNotFound,
            format!(
                "Method '{}' with descriptor '{}' not found on target object",
                method.into(),
                descriptor.into()
            ),
        )
    }

    /// Create a managed exception error
    pub fn managed_exception(description: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ManagedException,
            format!("Managed method threw: {}", description.into()),
        )
    }

    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, message)
    }

    /// Create a resource limit error
    pub fn resource_limit(resource: impl Into<String>, limit: usize, used: usize) -> Self {
        Self::new(
            ErrorCode::ResourceLimit,
            format!(
                "Resource limit exceeded: {} (used: {}, limit: {})",
                resource.into(),
                used,
                limit
            ),
        )
    }

    /// Create an internal error
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Tag with the entry point that failed
    pub fn with_entry_point(mut self, name: impl Into<String>) -> Self {
        self.entry_point = Some(name.into());
        self
    }

    /// Add context
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }
}

impl std::fmt::Display for BridgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(entry) = &self.entry_point {
            write!(f, " in {}", entry)?;
        }
        Ok(())
    }
}

impl std::error::Error for BridgeError {}

/// Status codes returned by the managed runtime's invocation interface
pub mod status_codes {
    /// Success
    pub const OK: i32 = 0;
    /// Unknown error
    pub const ERR: i32 = -1;
    /// Thread detached from the VM
    pub const EDETACHED: i32 = -2;
    /// Version not supported
    pub const EVERSION: i32 = -3;
    /// Not enough memory
    pub const ENOMEM: i32 = -4;
    /// VM already created
    pub const EEXIST: i32 = -5;
    /// Invalid arguments
    pub const EINVAL: i32 = -6;
}

/// Errors reported by the managed-runtime seam
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VmError {
    /// Invocation interface returned a non-OK status
    #[error("managed runtime returned status {0}")]
    Status(i32),

    /// Reference is null, deleted, or of the wrong kind
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    /// No method with the given name and descriptor
    #[error("no such method: {name}{descriptor}")]
    NoSuchMethod {
        /// Method name
        name: String,
        /// Method descriptor
        descriptor: String,
    },

    /// Reference does not point at an array of the expected type
    #[error("not a byte array: {0}")]
    NotAnArray(String),
}

impl VmError {
    /// Status code for this error, as the invocation interface reports it
    pub fn status(&self) -> i32 {
        match self {
            VmError::Status(code) => *code,
            VmError::InvalidReference(_) | VmError::NotAnArray(_) => status_codes::EINVAL,
            VmError::NoSuchMethod { .. } => status_codes::ERR,
        }
    }
}

/// Main error type for the bridge
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Error surfaced to JavaScript
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Managed runtime error
    #[error("Managed runtime error: {0}")]
    Vm(#[from] VmError),

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl Error {
    /// Convert to BridgeError for throwing to JavaScript
    pub fn to_bridge_error(&self) -> BridgeError {
        match self {
            Error::Bridge(e) => e.clone(),
            Error::Config(e) => BridgeError::new(ErrorCode::InvalidConfig, e.to_string()),
            Error::Vm(VmError::NoSuchMethod { name, descriptor }) => {
                BridgeError::method_not_found(name.clone(), descriptor.clone())
            }
            Error::Vm(e) => BridgeError::internal_error(e.to_string()),
            Error::InvalidState(msg) => BridgeError::internal_error(msg.clone()),
        }
    }
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Result type for entry-point calls; the error is thrown to JavaScript
pub type CallResult<T> = std::result::Result<T, BridgeError>;
