//! JNI entry point.
//!
//! The frame-store class calls its native `nativeInstall(jsiRuntime, docDir)`
//! once the JavaScript runtime exists. The runtime arrives as an opaque
//! pointer; the host turns it into a [`JsRuntime`] through the provider
//! registered with [`set_runtime_provider`]. Without a provider, or for a
//! null pointer, the context is still built but no globals are defined.

use crate::config::BridgeConfig;
use crate::context::BridgeContext;
use crate::error::{Error, Result};
use crate::install::install;
use crate::js::JsRuntime;
use crate::managed::jvm::JvmEnv;
use crate::managed::{LocalRef, ManagedEnv, RawHandle};
use jni::objects::{JObject, JString};
use jni::sys::jlong;
use jni::JNIEnv;
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Turns the host's runtime pointer into a runtime to install into
pub type RuntimeProvider = Box<dyn Fn(i64) -> Option<Box<dyn JsRuntime>> + Send + Sync>;

static RUNTIME_PROVIDER: OnceCell<RuntimeProvider> = OnceCell::new();
static CONFIG: Lazy<RwLock<BridgeConfig>> = Lazy::new(|| RwLock::new(BridgeConfig::default()));
static INSTALLED: Lazy<Mutex<Option<Arc<BridgeContext>>>> = Lazy::new(|| Mutex::new(None));

/// Register the host's runtime provider; only the first registration counts
pub fn set_runtime_provider<F>(provider: F) -> Result<()>
where
    F: Fn(i64) -> Option<Box<dyn JsRuntime>> + Send + Sync + 'static,
{
    RUNTIME_PROVIDER
        .set(Box::new(provider))
        .map_err(|_| Error::InvalidState("runtime provider already registered".into()))
}

/// Set the configuration used by later installs
pub fn configure(config: BridgeConfig) -> Result<()> {
    config.validate()?;
    *CONFIG.write() = config;
    Ok(())
}

/// Context of the most recent install, if any
pub fn installed() -> Option<Arc<BridgeContext>> {
    INSTALLED.lock().clone()
}

fn runtime_for(pointer: i64) -> Option<Box<dyn JsRuntime>> {
    if pointer == 0 {
        return None;
    }
    RUNTIME_PROVIDER.get().and_then(|provider| provider(pointer))
}

/// Install on behalf of the host, resolving the runtime pointer through the
/// registered provider and keeping the context as the current installation.
pub fn install_from_host(
    env: &dyn ManagedEnv,
    this: &LocalRef,
    runtime_pointer: i64,
    aux_path: &str,
) -> Result<Arc<BridgeContext>> {
    let mut runtime = runtime_for(runtime_pointer);
    let config = CONFIG.read().clone();

    let ctx = match runtime.as_deref_mut() {
        Some(js) => install(env, this, Some(js), aux_path, config)?,
        None => {
            if runtime_pointer != 0 {
                warn!("No runtime provider for the host's JavaScript runtime");
            }
            install(env, this, None, aux_path, config)?
        }
    };

    let previous = INSTALLED.lock().replace(Arc::clone(&ctx));
    info!(
        bridge = ctx.id(),
        replaced = previous.is_some(),
        "Bridge installed from host"
    );
    Ok(ctx)
}

/// `com.tradle.react.UdpSockets.nativeInstall(long jsi, String docDir)`
#[no_mangle]
pub extern "system" fn Java_com_tradle_react_UdpSockets_nativeInstall<'local>(
    mut env: JNIEnv<'local>,
    thiz: JObject<'local>,
    jsi: jlong,
    doc_dir: JString<'local>,
) {
    let doc_dir: String = if doc_dir.is_null() {
        String::new()
    } else {
        match env.get_string(&doc_dir) {
            Ok(path) => path.into(),
            Err(e) => {
                warn!(error = %e, "Could not read document directory");
                String::new()
            }
        }
    };

    let result = match (
        unsafe { JvmEnv::from_raw(env.get_raw()) },
        RawHandle::new(thiz.as_raw() as usize as u64),
    ) {
        (Some(managed), Some(this)) => {
            install_from_host(&managed, &LocalRef::from_raw(this), jsi, &doc_dir).map(|_| ())
        }
        _ => Err(Error::InvalidState("null environment or receiver".into())),
    };

    if let Err(e) = result {
        error!(error = %e, "Bridge install failed");
        if let Err(throw_err) = env.throw_new("java/lang/IllegalStateException", e.to_string()) {
            error!(error = %throw_err, "Could not raise install failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::js::{GlobalScope, HostFunction, JsValue};
    use crate::managed::simulated::{FrameStore, SimulatedVm};

    /// Runtime handle sharing one scope with the test
    struct SharedScope(Arc<Mutex<GlobalScope>>);

    impl JsRuntime for SharedScope {
        fn set_global_function(&mut self, name: &str, arity: usize, function: HostFunction) {
            self.0.lock().set_global_function(name, arity, function);
        }
    }

    static SCOPE: Lazy<Arc<Mutex<GlobalScope>>> =
        Lazy::new(|| Arc::new(Mutex::new(GlobalScope::new())));
    const RUNTIME_POINTER: i64 = 0x7f00_2000;

    #[test]
    fn test_install_from_host_through_provider() {
        set_runtime_provider(|pointer| {
            (pointer == RUNTIME_POINTER)
                .then(|| Box::new(SharedScope(Arc::clone(&SCOPE))) as Box<dyn JsRuntime>)
        })
        .unwrap();
        let again = set_runtime_provider(|_| None);
        assert!(matches!(again, Err(Error::InvalidState(_))));

        let vm = SimulatedVm::new();
        let env = vm.enter_managed_thread();
        let store = Arc::new(FrameStore::new());
        store.insert_frame(9, vec![9, 9]);
        let this = vm.new_object(store);

        let ctx = install_from_host(&*env, &this, RUNTIME_POINTER, "/data/files").unwrap();
        assert_eq!(SCOPE.lock().len(), 6);
        assert_eq!(
            SCOPE.lock().call("JSI_RN_UDP_getCountOfMemorisedFrames", &[]),
            Some(Ok(JsValue::Number(1.0)))
        );
        assert_eq!(installed().map(|c| c.id().to_string()), Some(ctx.id().to_string()));

        let unknown = install_from_host(&*env, &this, 0x1234, "").unwrap();
        assert_eq!(installed().map(|c| c.id().to_string()), Some(unknown.id().to_string()));
        assert_eq!(unknown.stats().total_calls, 0);

        let null_runtime = install_from_host(&*env, &this, 0, "").unwrap();
        assert_eq!(null_runtime.stats().total_calls, 0);
        env.delete_local_ref(this);
        vm.leave_managed_thread();
    }

    #[test]
    fn test_configure_rejects_invalid_config() {
        let err = configure(BridgeConfig::new().with_global_prefix("")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(CONFIG.read().global_prefix, "JSI_RN_UDP_");
    }
}
