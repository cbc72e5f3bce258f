//! Argument conversion from JavaScript numbers to managed `int`.

use crate::error::{BridgeError, CallResult};
use crate::js::JsValue;

/// Convert a JS number to `i32`, truncating toward zero.
///
/// Returns `None` for NaN, infinities and values outside `i32` after
/// truncation.
pub fn number_to_jint(n: f64) -> Option<i32> {
    if !n.is_finite() {
        return None;
    }
    let truncated = n.trunc();
    if truncated < i32::MIN as f64 || truncated > i32::MAX as f64 {
        return None;
    }
    Some(truncated as i32)
}

/// Read argument `index` as a managed `int`
///
/// # Arguments
/// * `args` - The JavaScript call arguments
/// * `index` - Position of the argument
///
/// # Returns
/// * `Ok(value)` - The truncated integer
/// * `Err(INVALID_ARGUMENT)` - If the argument is missing, not a number, or
///   not representable as `i32`
pub fn to_jint(args: &[JsValue], index: usize) -> CallResult<i32> {
    let value = args.get(index).ok_or_else(|| {
        BridgeError::invalid_argument(format!("Missing argument {}: expected a number", index))
    })?;

    let n = value.as_number().ok_or_else(|| {
        BridgeError::invalid_argument(format!(
            "Argument {} must be a number, got {}",
            index,
            value.type_name()
        ))
    })?;

    number_to_jint(n).ok_or_else(|| {
        BridgeError::invalid_argument(format!(
            "Argument {} ({}) is not representable as a 32-bit integer",
            index, n
        ))
        .with_context(serde_json::json!({ "index": index }))
    })
}
