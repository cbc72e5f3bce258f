//! Frame data entry point.
//!
//! The byte payload is copied out of the managed array into a buffer owned
//! by JavaScript. The managed view is released with ABORT since nothing is
//! ever written back.

use super::{check_exception, convert, resolve_method, EntryPoint};
use crate::context::BridgeContext;
use crate::error::{BridgeError, CallResult, Error};
use crate::js::JsValue;
use crate::managed::{ElementsGuard, JValue, LocalRef, LocalRefGuard, ManagedEnv};
use tracing::debug;

/// Copy of the payload of one buffered frame
///
/// # Arguments
/// * `ctx` - The bridge context
/// * `args` - `[frameNo]`
///
/// # Returns
/// * `Ok(Uint8Array)` - Independent copy of the frame; empty if the store
///   returned null
/// * `Err(error)` - Invalid argument, attach/lookup failure, managed
///   exception or frame over the size limit
pub fn get_frame_data_by_number(ctx: &BridgeContext, args: &[JsValue]) -> CallResult<JsValue> {
    let frame_no = convert::to_jint(args, 0)?;

    let env = ctx.acquire_environment()?;
    let method = resolve_method(&*env, ctx.target(), EntryPoint::GetFrameDataByNumber)?;

    let array = env.call_object_method(ctx.target(), method, &[JValue::Int(frame_no)]);
    let array = array.map(|local| LocalRefGuard::new(&*env, local));
    check_exception(&*env)?;

    let Some(array) = array else {
        ctx.metrics().record_null_frame();
        debug!(frame_no, "Frame store returned null");
        return Ok(JsValue::Uint8Array(Vec::new()));
    };

    let bytes = copy_byte_array(&*env, &array, ctx.config().max_frame_bytes)?;
    ctx.metrics().record_bytes_copied(bytes.len());
    Ok(JsValue::Uint8Array(bytes))
}

/// Copy a managed byte array into a new buffer.
///
/// Refuses arrays longer than `limit` without taking a view. The view, when
/// taken, is released with ABORT on every path.
pub fn copy_byte_array(
    env: &dyn ManagedEnv,
    array: &LocalRef,
    limit: Option<usize>,
) -> CallResult<Vec<u8>> {
    let len = env
        .get_array_length(array)
        .map_err(|e| Error::Vm(e).to_bridge_error())?;

    if let Some(limit) = limit {
        if len > limit {
            return Err(BridgeError::resource_limit("frame bytes", limit, len));
        }
    }
    if len == 0 {
        return Ok(Vec::new());
    }

    let elements = env
        .get_byte_array_elements(array)
        .map_err(|e| Error::Vm(e).to_bridge_error())?;
    let view = ElementsGuard::new(env, array, elements);

    let source = view.as_slice();
    if source.len() < len {
        return Err(BridgeError::internal_error(format!(
            "Array view has {} elements, expected {}",
            source.len(),
            len
        )));
    }

    let mut buffer = vec![0u8; len];
    buffer.copy_from_slice(&source[..len]);
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::error::ErrorCode;
    use crate::managed::simulated::{FrameStore, SimulatedVm};
    use std::sync::Arc;

    fn setup(store: Arc<FrameStore>, config: BridgeConfig) -> (SimulatedVm, BridgeContext) {
        let vm = SimulatedVm::new();
        let env = vm.enter_managed_thread();
        let this = vm.new_object(store);
        let ctx = BridgeContext::from_env(&*env, &this, config).unwrap();
        env.delete_local_ref(this);
        (vm, ctx)
    }

    #[test]
    fn test_frame_copied() {
        let store = Arc::new(FrameStore::new());
        store.insert_frame(7, vec![0xde, 0xad, 0xbe, 0xef]);
        let (vm, ctx) = setup(store, BridgeConfig::default());

        let value = get_frame_data_by_number(&ctx, &[JsValue::Number(7.0)]).unwrap();
        assert_eq!(value.as_bytes(), Some(&[0xde, 0xad, 0xbe, 0xef][..]));
        assert_eq!(ctx.metrics().bytes_copied(), 4);
        assert_eq!(vm.abort_releases(), 1);
        assert_eq!(vm.other_releases(), 0);
        assert_eq!(vm.pinned_views(), 0);
        assert_eq!(vm.live_local_refs(), 0);
        vm.leave_managed_thread();
    }

    #[test]
    fn test_missing_frame_is_empty() {
        let (vm, ctx) = setup(Arc::new(FrameStore::new()), BridgeConfig::default());

        let value = get_frame_data_by_number(&ctx, &[JsValue::Number(99.0)]).unwrap();
        assert_eq!(value, JsValue::Uint8Array(Vec::new()));
        assert_eq!(ctx.metrics().null_frames(), 1);
        assert_eq!(vm.pinned_views(), 0);
        vm.leave_managed_thread();
    }

    #[test]
    fn test_empty_frame_takes_no_view() {
        let store = Arc::new(FrameStore::new());
        store.insert_frame(0, Vec::new());
        let (vm, ctx) = setup(store, BridgeConfig::default());

        let value = get_frame_data_by_number(&ctx, &[JsValue::Number(0.0)]).unwrap();
        assert_eq!(value, JsValue::Uint8Array(Vec::new()));
        assert_eq!(vm.abort_releases(), 0);
        assert_eq!(vm.live_local_refs(), 0);
        vm.leave_managed_thread();
    }

    #[test]
    fn test_fractional_frame_number_truncates() {
        let store = Arc::new(FrameStore::new());
        store.insert_frame(-2, vec![1]);
        let (vm, ctx) = setup(store, BridgeConfig::default());

        let value = get_frame_data_by_number(&ctx, &[JsValue::Number(-2.7)]).unwrap();
        assert_eq!(value.as_bytes(), Some(&[1u8][..]));
        vm.leave_managed_thread();
    }

    #[test]
    fn test_frame_over_limit() {
        let store = Arc::new(FrameStore::new());
        store.insert_frame(1, vec![0u8; 16]);
        let config = BridgeConfig::default().with_max_frame_bytes(8);
        let (vm, ctx) = setup(store, config);

        let err = get_frame_data_by_number(&ctx, &[JsValue::Number(1.0)]).unwrap_err();
        assert_eq!(err.code, ErrorCode::ResourceLimit);
        assert_eq!(vm.abort_releases(), 0);
        assert_eq!(vm.pinned_views(), 0);
        assert_eq!(vm.live_local_refs(), 0);
        vm.leave_managed_thread();
    }

    #[test]
    fn test_invalid_argument_does_not_touch_vm() {
        let (vm, ctx) = setup(Arc::new(FrameStore::new()), BridgeConfig::default());

        let err = get_frame_data_by_number(&ctx, &[JsValue::from("1")]).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArgument);
        assert_eq!(vm.live_local_refs(), 0);
        vm.leave_managed_thread();
    }

    #[test]
    fn test_managed_exception() {
        let store = Arc::new(FrameStore::new());
        store.insert_frame(1, vec![1, 2]);
        store.set_throw(Some("java.lang.IndexOutOfBoundsException: 1".into()));
        let (vm, ctx) = setup(store, BridgeConfig::default());

        let err = get_frame_data_by_number(&ctx, &[JsValue::Number(1.0)]).unwrap_err();
        assert_eq!(err.code, ErrorCode::ManagedException);
        assert!(err.message.contains("IndexOutOfBoundsException"));
        assert_eq!(vm.live_local_refs(), 0);
        vm.leave_managed_thread();
    }

    #[test]
    fn test_copy_byte_array_direct() {
        let vm = SimulatedVm::new();
        let env = vm.enter_managed_thread();
        let array = vm.new_byte_array(vec![5u8; 3]);

        assert_eq!(copy_byte_array(&*env, &array, None), Ok(vec![5, 5, 5]));
        assert_eq!(copy_byte_array(&*env, &array, Some(3)), Ok(vec![5, 5, 5]));
        assert_eq!(
            copy_byte_array(&*env, &array, Some(2)).unwrap_err().code,
            ErrorCode::ResourceLimit
        );
        assert_eq!(vm.abort_releases(), 2);

        env.delete_local_ref(array);
        vm.leave_managed_thread();
    }
}
