//! JavaScript-side seam.
//!
//! Values crossing into the JavaScript engine, the host-function type the
//! engine calls back into, and the `JsRuntime` trait through which globals
//! are installed. `GlobalScope` is an in-process implementation of the
//! engine's global namespace.

use crate::error::CallResult;
use std::collections::HashMap;
use std::sync::Arc;

/// Value handed to or returned from a host function
#[derive(Debug, Clone, PartialEq, Default)]
pub enum JsValue {
    /// `undefined`
    #[default]
    Undefined,
    /// `null`
    Null,
    /// Boolean value
    Bool(bool),
    /// Numeric value (f64 for JS compatibility)
    Number(f64),
    /// String value
    String(String),
    /// `Uint8Array` owning its backing buffer
    Uint8Array(Vec<u8>),
}

impl JsValue {
    /// Check if value is undefined
    pub fn is_undefined(&self) -> bool {
        matches!(self, JsValue::Undefined)
    }

    /// Get as number
    pub fn as_number(&self) -> Option<f64> {
        match self {
            JsValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Get as typed-array bytes
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            JsValue::Uint8Array(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// The `typeof`-style name of the value
    pub fn type_name(&self) -> &'static str {
        match self {
            JsValue::Undefined => "undefined",
            JsValue::Null => "null",
            JsValue::Bool(_) => "boolean",
            JsValue::Number(_) => "number",
            JsValue::String(_) => "string",
            JsValue::Uint8Array(_) => "Uint8Array",
        }
    }
}

impl From<bool> for JsValue {
    fn from(b: bool) -> Self {
        JsValue::Bool(b)
    }
}

impl From<f64> for JsValue {
    fn from(n: f64) -> Self {
        JsValue::Number(n)
    }
}

impl From<i32> for JsValue {
    fn from(n: i32) -> Self {
        JsValue::Number(n as f64)
    }
}

impl From<&str> for JsValue {
    fn from(s: &str) -> Self {
        JsValue::String(s.to_string())
    }
}

impl From<Vec<u8>> for JsValue {
    fn from(bytes: Vec<u8>) -> Self {
        JsValue::Uint8Array(bytes)
    }
}

/// Callable installed into the engine's global namespace
pub type HostFunction = Arc<dyn Fn(&[JsValue]) -> CallResult<JsValue> + Send + Sync>;

/// The parts of a JavaScript engine the bridge needs
pub trait JsRuntime {
    /// Define (or replace) a global function
    fn set_global_function(&mut self, name: &str, arity: usize, function: HostFunction);
}

/// Global function with its declared arity
#[derive(Clone)]
pub struct InstalledFunction {
    /// Declared parameter count (`Function.length`)
    pub arity: usize,
    function: HostFunction,
}

impl InstalledFunction {
    /// Call the function
    pub fn call(&self, args: &[JsValue]) -> CallResult<JsValue> {
        (self.function)(args)
    }
}

/// In-process global namespace
#[derive(Default, Clone)]
pub struct GlobalScope {
    functions: HashMap<String, InstalledFunction>,
}

impl GlobalScope {
    /// Create an empty scope
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a global function
    pub fn function(&self, name: &str) -> Option<&InstalledFunction> {
        self.functions.get(name)
    }

    /// Call a global function; `None` if no such global exists
    pub fn call(&self, name: &str, args: &[JsValue]) -> Option<CallResult<JsValue>> {
        self.functions.get(name).map(|f| f.call(args))
    }

    /// Whether a global is defined
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Names of all defined globals
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.functions.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of defined globals
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Whether no global is defined
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl JsRuntime for GlobalScope {
    fn set_global_function(&mut self, name: &str, arity: usize, function: HostFunction) {
        self.functions
            .insert(name.to_string(), InstalledFunction { arity, function });
    }
}
