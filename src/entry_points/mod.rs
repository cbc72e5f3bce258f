//! Entry points installed into the JavaScript global namespace.
//!
//! Each entry point forwards to one fixed method on the frame-store object.
//! They share a call protocol: acquire an environment for the calling thread,
//! resolve the method on the target's runtime class, invoke it, check for a
//! pending managed exception and convert the result.

pub mod convert;
pub mod counters;
pub mod frames;

use crate::context::BridgeContext;
use crate::error::{BridgeError, CallResult, Error, Result};
use crate::js::{JsRuntime, JsValue};
use crate::managed::{GlobalRef, LocalRefGuard, ManagedEnv, MethodId};
use crate::metrics::CallTimer;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, info_span, trace, warn};

/// The fixed set of bridged methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryPoint {
    /// Copy of one buffered frame
    GetFrameDataByNumber,
    /// Number of the oldest buffered frame
    GetFirstMemorizedFrameNumber,
    /// Number of the newest buffered frame
    GetLastMemorizedFrameNumber,
    /// Number of buffered frames
    GetCountOfMemorizedFrames,
    /// Buffer capacity
    GetMaxNumberOfMemorizedFrames,
    /// Set buffer capacity
    SetMaxNumberOfMemorizedFrames,
}

impl EntryPoint {
    /// All entry points, in installation order
    pub const ALL: [EntryPoint; 6] = [
        EntryPoint::GetFrameDataByNumber,
        EntryPoint::GetFirstMemorizedFrameNumber,
        EntryPoint::GetLastMemorizedFrameNumber,
        EntryPoint::GetCountOfMemorizedFrames,
        EntryPoint::GetMaxNumberOfMemorizedFrames,
        EntryPoint::SetMaxNumberOfMemorizedFrames,
    ];

    /// Stable name used in logs and docs (e.g. "get-frame-data-by-number")
    pub fn symbolic_name(self) -> &'static str {
        match self {
            EntryPoint::GetFrameDataByNumber => "get-frame-data-by-number",
            EntryPoint::GetFirstMemorizedFrameNumber => "get-first-memorized-frame-number",
            EntryPoint::GetLastMemorizedFrameNumber => "get-last-memorized-frame-number",
            EntryPoint::GetCountOfMemorizedFrames => "get-count-of-memorized-frames",
            EntryPoint::GetMaxNumberOfMemorizedFrames => "get-max-number-of-memorized-frames",
            EntryPoint::SetMaxNumberOfMemorizedFrames => "set-max-number-of-memorized-frames",
        }
    }

    /// Name of the managed method
    pub fn method_name(self) -> &'static str {
        match self {
            EntryPoint::GetFrameDataByNumber => "getFrameDataByFrameNo",
            EntryPoint::GetFirstMemorizedFrameNumber => "getFirstMemorisedFrameNo",
            EntryPoint::GetLastMemorizedFrameNumber => "getLastMemorisedFrameNo",
            EntryPoint::GetCountOfMemorizedFrames => "getCountOfMemorisedFrames",
            EntryPoint::GetMaxNumberOfMemorizedFrames => "getMaxNumberOfMemorisedFrames",
            EntryPoint::SetMaxNumberOfMemorizedFrames => "setMaxNumberOfMemorisedFrames",
        }
    }

    /// Descriptor of the managed method
    pub fn descriptor(self) -> &'static str {
        match self {
            EntryPoint::GetFrameDataByNumber => "(I)[B",
            EntryPoint::SetMaxNumberOfMemorizedFrames => "(I)V",
            _ => "()I",
        }
    }

    /// Number of JavaScript arguments
    pub fn arity(self) -> usize {
        match self {
            EntryPoint::GetFrameDataByNumber | EntryPoint::SetMaxNumberOfMemorizedFrames => 1,
            _ => 0,
        }
    }

    /// Position in [`EntryPoint::ALL`]
    pub fn index(self) -> usize {
        self as usize
    }

    /// JavaScript global name under `prefix`
    pub fn global_name(self, prefix: &str) -> String {
        format!("{}{}", prefix, self.method_name())
    }

    fn handle(self, ctx: &BridgeContext, args: &[JsValue]) -> CallResult<JsValue> {
        match self {
            EntryPoint::GetFrameDataByNumber => frames::get_frame_data_by_number(ctx, args),
            EntryPoint::SetMaxNumberOfMemorizedFrames => {
                counters::set_max_number_of_memorized_frames(ctx, args)
            }
            getter => counters::get_int(ctx, getter),
        }
    }
}

impl std::fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbolic_name())
    }
}

/// Global names of one installation
#[derive(Debug, Clone, Default)]
pub struct EntryPointSet {
    by_name: HashMap<String, EntryPoint>,
}

impl EntryPointSet {
    /// Name every entry point under `prefix`
    pub fn new(prefix: &str) -> Result<Self> {
        let mut by_name = HashMap::with_capacity(EntryPoint::ALL.len());
        for entry in EntryPoint::ALL {
            let name = entry.global_name(prefix);
            if by_name.insert(name.clone(), entry).is_some() {
                return Err(Error::InvalidState(format!(
                    "duplicate entry point name '{}'",
                    name
                )));
            }
        }
        Ok(Self { by_name })
    }

    /// Entry point installed under `name`
    pub fn get(&self, name: &str) -> Option<EntryPoint> {
        self.by_name.get(name).copied()
    }

    /// Installed global names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.by_name.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of entry points
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    fn iter(&self) -> impl Iterator<Item = (&String, &EntryPoint)> {
        self.by_name.iter()
    }
}

/// Define every entry point as a global function of `js`.
///
/// Existing globals with the same names are replaced.
pub fn install(js: &mut dyn JsRuntime, ctx: &Arc<BridgeContext>) -> Result<EntryPointSet> {
    let set = EntryPointSet::new(&ctx.config().global_prefix)?;

    for (name, &entry) in set.iter() {
        let ctx = Arc::clone(ctx);
        let global = name.clone();
        js.set_global_function(
            name,
            entry.arity(),
            Arc::new(move |args: &[JsValue]| dispatch(&ctx, entry, &global, args)),
        );
    }

    info!(
        bridge = ctx.id(),
        prefix = %ctx.config().global_prefix,
        count = set.len(),
        "Installed bridge entry points"
    );

    Ok(set)
}

/// Run one entry-point call with logging and metrics
pub fn dispatch(
    ctx: &BridgeContext,
    entry: EntryPoint,
    global: &str,
    args: &[JsValue],
) -> CallResult<JsValue> {
    let span = info_span!("entry_point", entry_point = global);
    let _enter = span.enter();
    let timer = CallTimer::start();

    if ctx.config().trace_calls {
        trace!(args = args.len(), "Entry point called");
    }

    let result = entry.handle(ctx, args);
    let elapsed = timer.elapsed();
    ctx.metrics()
        .record_call(entry, elapsed, result.as_ref().err().map(|e| e.code));

    match result {
        Ok(value) => {
            if ctx.config().trace_calls {
                trace!(
                    result = value.type_name(),
                    elapsed_us = elapsed.as_micros() as u64,
                    "Entry point returned"
                );
            }
            Ok(value)
        }
        Err(e) => {
            warn!(code = %e.code, error = %e.message, "Entry point failed");
            Err(e.with_entry_point(global))
        }
    }
}

/// Resolve `entry`'s method on the target's runtime class.
///
/// The class is looked up fresh on every call and its local reference is
/// deleted before returning. A failed lookup clears any pending exception.
pub(crate) fn resolve_method(
    env: &dyn ManagedEnv,
    target: &GlobalRef,
    entry: EntryPoint,
) -> CallResult<MethodId> {
    let class = env.get_object_class(target).map_err(|e| {
        discard_exception(env);
        Error::Vm(e).to_bridge_error()
    })?;
    let class = LocalRefGuard::new(env, class);

    env.get_method_id(&class, entry.method_name(), entry.descriptor())
        .map_err(|_| {
            discard_exception(env);
            BridgeError::method_not_found(entry.method_name(), entry.descriptor())
        })
}

/// Turn a pending managed exception into an error
pub(crate) fn check_exception(env: &dyn ManagedEnv) -> CallResult<()> {
    if !env.exception_check() {
        return Ok(());
    }
    let description = env
        .take_exception()
        .unwrap_or_else(|| "unknown exception".to_string());
    Err(BridgeError::managed_exception(description))
}

fn discard_exception(env: &dyn ManagedEnv) {
    if env.exception_check() {
        env.take_exception();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::error::ErrorCode;
    use crate::js::GlobalScope;
    use crate::managed::simulated::{FrameStore, SimulatedVm};

    fn setup(store: Arc<FrameStore>) -> (SimulatedVm, Arc<BridgeContext>) {
        let vm = SimulatedVm::new();
        let env = vm.enter_managed_thread();
        let this = vm.new_object(store);
        let ctx = BridgeContext::from_env(&*env, &this, BridgeConfig::default()).unwrap();
        env.delete_local_ref(this);
        (vm, Arc::new(ctx))
    }

    #[test]
    fn test_entry_point_table() {
        assert_eq!(EntryPoint::ALL.len(), 6);
        assert_eq!(
            EntryPoint::GetFrameDataByNumber.global_name("JSI_RN_UDP_"),
            "JSI_RN_UDP_getFrameDataByFrameNo"
        );
        assert_eq!(EntryPoint::GetFrameDataByNumber.descriptor(), "(I)[B");
        assert_eq!(EntryPoint::SetMaxNumberOfMemorizedFrames.descriptor(), "(I)V");
        assert_eq!(EntryPoint::GetCountOfMemorizedFrames.descriptor(), "()I");
        assert_eq!(EntryPoint::SetMaxNumberOfMemorizedFrames.arity(), 1);
        assert_eq!(EntryPoint::GetLastMemorizedFrameNumber.arity(), 0);
        assert_eq!(
            EntryPoint::GetMaxNumberOfMemorizedFrames.to_string(),
            "get-max-number-of-memorized-frames"
        );
    }

    #[test]
    fn test_entry_point_set_names_unique() {
        let set = EntryPointSet::new("JSI_RN_UDP_").unwrap();
        assert_eq!(set.len(), 6);
        assert_eq!(
            set.get("JSI_RN_UDP_getCountOfMemorisedFrames"),
            Some(EntryPoint::GetCountOfMemorizedFrames)
        );
        assert!(set.get("getCountOfMemorisedFrames").is_none());
    }

    #[test]
    fn test_install_defines_globals() {
        let (vm, ctx) = setup(Arc::new(FrameStore::new()));
        let mut scope = GlobalScope::new();

        let set = install(&mut scope, &ctx).unwrap();
        assert_eq!(scope.names(), set.names());
        assert_eq!(
            scope
                .function("JSI_RN_UDP_getFrameDataByFrameNo")
                .map(|f| f.arity),
            Some(1)
        );
        vm.leave_managed_thread();
    }

    #[test]
    fn test_index_matches_all() {
        for (i, entry) in EntryPoint::ALL.iter().enumerate() {
            assert_eq!(entry.index(), i);
        }
    }

    #[test]
    fn test_dispatch_records_metrics() {
        let store = Arc::new(FrameStore::new());
        store.insert_frame(3, vec![1, 2, 3]);
        let (vm, ctx) = setup(Arc::clone(&store));

        let value = dispatch(
            &ctx,
            EntryPoint::GetCountOfMemorizedFrames,
            "JSI_RN_UDP_getCountOfMemorisedFrames",
            &[],
        )
        .unwrap();
        assert_eq!(value, JsValue::Number(1.0));

        let err = dispatch(
            &ctx,
            EntryPoint::GetFrameDataByNumber,
            "JSI_RN_UDP_getFrameDataByFrameNo",
            &[],
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArgument);
        assert_eq!(
            err.entry_point.as_deref(),
            Some("JSI_RN_UDP_getFrameDataByFrameNo")
        );

        let stats = ctx.stats();
        assert_eq!(stats.total_calls, 2);
        assert_eq!(stats.failed_calls, 1);
        assert_eq!(stats.errors.get("INVALID_ARGUMENT"), Some(&1));
        assert_eq!(ctx.metrics().calls_to(EntryPoint::GetFrameDataByNumber), 1);
        assert_eq!(ctx.metrics().calls_to(EntryPoint::GetCountOfMemorizedFrames), 1);
        vm.leave_managed_thread();
    }

    #[test]
    fn test_resolve_method_not_found_clears_exception() {
        let store = Arc::new(FrameStore::new());
        store.hide_method("getLastMemorisedFrameNo");
        let (vm, ctx) = setup(store);
        let env = ctx.acquire_environment().unwrap();

        let err =
            resolve_method(&*env, ctx.target(), EntryPoint::GetLastMemorizedFrameNumber).unwrap_err();
        assert_eq!(err.code, ErrorCode::MethodNotFound);
        assert!(!env.exception_check());
        assert_eq!(vm.live_local_refs(), 0);

        assert!(resolve_method(&*env, ctx.target(), EntryPoint::GetCountOfMemorizedFrames).is_ok());
        drop(env);
        vm.leave_managed_thread();
    }

    #[test]
    fn test_check_exception_clears_pending() {
        let store = Arc::new(FrameStore::new());
        store.set_throw(Some("java.lang.IllegalStateException: closed".into()));
        let (vm, ctx) = setup(store);
        let env = ctx.acquire_environment().unwrap();

        let method =
            resolve_method(&*env, ctx.target(), EntryPoint::GetCountOfMemorizedFrames).unwrap();
        env.call_int_method(ctx.target(), method, &[]);
        let err = check_exception(&*env).unwrap_err();
        assert_eq!(err.code, ErrorCode::ManagedException);
        assert!(err.message.contains("IllegalStateException"));
        assert!(check_exception(&*env).is_ok());
        drop(env);
        vm.leave_managed_thread();
    }
}
