//! # UDP Frame Bridge
//!
//! This library exposes a managed-runtime frame store (the object buffering
//! recently received UDP frames) to an embedded JavaScript engine as a set
//! of synchronous global functions.
//!
//! ## Architecture
//!
//! ```text
//! JavaScript (any engine thread)
//!     │
//!     │ global host functions
//!     ▼
//! Rust Bridge (this crate)
//!     │
//!     │ attach on demand, method call, byte-array copy (JNI)
//!     ▼
//! Frame store in the JVM
//! ```
//!
//! The JVM calls the exported `Java_com_tradle_react_UdpSockets_nativeInstall`
//! (see [`ffi`]), which installs the globals into the runtime supplied by the
//! host's [`ffi::RuntimeProvider`].
//!
//! ## Features
//!
//! - **On-demand attachment**: Native threads are attached on first call and
//!   detached exactly once when they exit
//! - **Checked marshaling**: Numeric arguments are range-checked, managed
//!   exceptions become JavaScript errors
//! - **Copying frame reads**: Frame payloads are copied into buffers owned
//!   by JavaScript; managed views are always released
//! - **Metrics**: Call, attachment and byte counters with Prometheus export

#![deny(missing_docs)]

pub mod attach;
pub mod config;
pub mod context;
pub mod entry_points;
pub mod error;
pub mod ffi;
pub mod install;
pub mod js;
pub mod managed;
pub mod metrics;

// Re-export commonly used types
pub use attach::{AttachmentManager, EnvHandle, ThreadRegistry};
pub use config::BridgeConfig;
pub use context::BridgeContext;
pub use entry_points::{EntryPoint, EntryPointSet};
pub use error::{BridgeError, Error, ErrorCode, Result};
pub use ffi::{configure, set_runtime_provider};
pub use install::install;
pub use js::{GlobalScope, JsRuntime, JsValue};
pub use metrics::{BridgeMetrics, BridgeStats};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Install a `tracing` subscriber filtered by `RUST_LOG`.
///
/// Fails if a global subscriber is already set.
pub fn init_tracing() -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("udp_frame_bridge=debug".parse()?),
        )
        .try_init()
}
