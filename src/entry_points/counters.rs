//! Integer getter and setter entry points.

use super::{check_exception, convert, resolve_method, EntryPoint};
use crate::context::BridgeContext;
use crate::error::CallResult;
use crate::js::JsValue;
use crate::managed::JValue;

/// Call one of the `()I` getters and return its value as a number
///
/// # Arguments
/// * `ctx` - The bridge context
/// * `entry` - Which getter to call
///
/// # Returns
/// * `Ok(Number)` - The value the frame store returned, unchanged
/// * `Err(error)` - Attach/lookup failure or managed exception
pub fn get_int(ctx: &BridgeContext, entry: EntryPoint) -> CallResult<JsValue> {
    let env = ctx.acquire_environment()?;
    let method = resolve_method(&*env, ctx.target(), entry)?;

    let value = env.call_int_method(ctx.target(), method, &[]);
    check_exception(&*env)?;

    Ok(JsValue::from(value))
}

/// Set the buffer capacity
///
/// # Arguments
/// * `ctx` - The bridge context
/// * `args` - `[maxFrames]`
///
/// # Returns
/// * `Ok(Undefined)` - Success
/// * `Err(error)` - Invalid argument, attach/lookup failure or managed
///   exception
pub fn set_max_number_of_memorized_frames(
    ctx: &BridgeContext,
    args: &[JsValue],
) -> CallResult<JsValue> {
    let max_frames = convert::to_jint(args, 0)?;

    let env = ctx.acquire_environment()?;
    let method = resolve_method(
        &*env,
        ctx.target(),
        EntryPoint::SetMaxNumberOfMemorizedFrames,
    )?;

    env.call_void_method(ctx.target(), method, &[JValue::Int(max_frames)]);
    check_exception(&*env)?;

    Ok(JsValue::Undefined)
}
