//! Bridge context.
//!
//! Everything an entry point needs lives in one write-once `BridgeContext`:
//! the managed runtime, the global reference to the frame-store object, the
//! configuration, the attachment manager and the metrics. It is built by
//! installation and shared by `Arc` with every installed closure; nothing in
//! it changes afterwards.

use crate::attach::{AttachmentManager, EnvHandle};
use crate::config::BridgeConfig;
use crate::error::{CallResult, Result};
use crate::managed::{GlobalRef, LocalRef, ManagedEnv, ManagedVm};
use crate::metrics::{BridgeMetrics, BridgeStats};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// State shared by all entry points of one installation
pub struct BridgeContext {
    id: String,
    target: GlobalRef,
    config: BridgeConfig,
    attachments: AttachmentManager,
    metrics: Arc<BridgeMetrics>,
}

impl BridgeContext {
    /// Create a context around an existing global reference.
    ///
    /// The context owns `target` and deletes it when dropped.
    pub fn new(vm: Arc<dyn ManagedVm>, target: GlobalRef, config: BridgeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::assemble(vm, target, config))
    }

    /// Create a context from the installing thread's environment.
    ///
    /// Takes the runtime from `env` and promotes `this` to a global
    /// reference owned by the context.
    pub fn from_env(env: &dyn ManagedEnv, this: &LocalRef, config: BridgeConfig) -> Result<Self> {
        config.validate()?;
        let vm = env.vm()?;
        let target = env.new_global_ref(this)?;
        Ok(Self::assemble(vm, target, config))
    }

    fn assemble(vm: Arc<dyn ManagedVm>, target: GlobalRef, config: BridgeConfig) -> Self {
        let metrics = Arc::new(BridgeMetrics::new());
        let attachments = AttachmentManager::new(
            vm,
            config.env_version,
            config.attach_thread_name.clone(),
            Arc::clone(&metrics),
        );

        Self {
            id: Uuid::new_v4().to_string(),
            target,
            config,
            attachments,
            metrics,
        }
    }

    /// Unique id of this installation
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The managed runtime
    pub fn vm(&self) -> &Arc<dyn ManagedVm> {
        self.attachments.vm()
    }

    /// Global reference to the frame-store object
    pub fn target(&self) -> &GlobalRef {
        &self.target
    }

    /// Configuration
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Attachment manager
    pub fn attachments(&self) -> &AttachmentManager {
        &self.attachments
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Arc<BridgeMetrics> {
        &self.metrics
    }

    /// Environment for the calling thread
    pub fn acquire_environment(&self) -> CallResult<EnvHandle> {
        self.attachments.acquire_environment()
    }

    /// Counter snapshot including currently attached threads
    pub fn stats(&self) -> BridgeStats {
        self.metrics
            .snapshot()
            .with_attached_threads(self.attachments.registry().len())
    }
}

impl Drop for BridgeContext {
    fn drop(&mut self) {
        match self.attachments.acquire_environment() {
            Ok(env) => {
                env.delete_global_ref(&self.target);
                debug!(bridge = %self.id, "Released frame-store reference");
            }
            Err(e) => {
                warn!(bridge = %self.id, error = %e, "Could not release frame-store reference");
            }
        }
    }
}

impl std::fmt::Debug for BridgeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeContext")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
