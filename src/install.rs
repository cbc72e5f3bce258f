//! Bridge installation.
//!
//! Called once from a thread that belongs to the managed runtime, with the
//! frame-store object and the JavaScript runtime to install into.

use crate::config::BridgeConfig;
use crate::context::BridgeContext;
use crate::entry_points;
use crate::error::Result;
use crate::js::JsRuntime;
use crate::managed::{LocalRef, ManagedEnv};
use std::sync::Arc;
use tracing::{debug, warn};

/// Install the bridge
///
/// # Arguments
/// * `env` - Environment of the calling managed thread
/// * `this` - Local reference to the frame-store object
/// * `js` - JavaScript runtime to define the globals in; `None` installs nothing
/// * `aux_path` - Auxiliary directory handed over by the host; unused
/// * `config` - Bridge configuration
///
/// # Returns
/// * `Ok(context)` - The context backing the installed globals
/// * `Err(error)` - Invalid configuration or a managed-runtime failure
pub fn install(
    env: &dyn ManagedEnv,
    this: &LocalRef,
    js: Option<&mut dyn JsRuntime>,
    aux_path: &str,
    config: BridgeConfig,
) -> Result<Arc<BridgeContext>> {
    let ctx = Arc::new(BridgeContext::from_env(env, this, config)?);
    debug!(bridge = ctx.id(), aux_path, "Created bridge context");

    match js {
        Some(js) => {
            entry_points::install(js, &ctx)?;
        }
        None => {
            warn!(bridge = ctx.id(), "No JavaScript runtime supplied; entry points not installed");
        }
    }

    Ok(ctx)
}
