//! Managed-runtime seam.
//!
//! The bridge talks to the managed runtime (the VM owning the frame store)
//! only through the two traits defined here. `ManagedVm` is the process-wide
//! handle; `ManagedEnv` is the per-thread environment obtained from it. The
//! shape follows the runtime's native invocation interface: references are
//! opaque handles, method lookups go through a class reference, calls return
//! plain values and leave failures as a pending exception to be checked.

pub mod guard;
pub mod jvm;
#[cfg(any(test, feature = "simulated"))]
pub mod simulated;

use crate::error::VmError;
use std::num::NonZeroU64;
use std::ptr::NonNull;
use std::sync::Arc;
use std::thread::ThreadId;

pub use guard::{ElementsGuard, LocalRefGuard};

/// Opaque non-null handle into the managed runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle(NonZeroU64);

impl RawHandle {
    /// Wrap a raw handle value; `None` for the null handle
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    /// Raw handle value
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

/// Reference valid only on the thread that created it.
///
/// Not `Clone`: each local reference is deleted exactly once.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct LocalRef(RawHandle);

impl LocalRef {
    /// Wrap a handle returned by the runtime
    pub fn from_raw(handle: RawHandle) -> Self {
        Self(handle)
    }

    /// Underlying handle
    pub fn handle(&self) -> RawHandle {
        self.0
    }
}

/// Reference valid on every thread until explicitly deleted
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct GlobalRef(RawHandle);

impl GlobalRef {
    /// Wrap a handle returned by the runtime
    pub fn from_raw(handle: RawHandle) -> Self {
        Self(handle)
    }

    /// Underlying handle
    pub fn handle(&self) -> RawHandle {
        self.0
    }
}

/// Resolved method identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodId(RawHandle);

impl MethodId {
    /// Wrap a handle returned by the runtime
    pub fn from_raw(handle: RawHandle) -> Self {
        Self(handle)
    }

    /// Underlying handle
    pub fn handle(&self) -> RawHandle {
        self.0
    }
}

/// Argument passed to a managed method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JValue {
    /// 32-bit signed integer (`I`)
    Int(i32),
}

/// How a primitive-array view is handed back to the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseMode {
    /// Copy back the contents and free the view
    CopyBack = 0,
    /// Copy back the contents, keep the view
    Commit = 1,
    /// Free the view without copying anything back
    Abort = 2,
}

/// Read view over the elements of a managed byte array.
///
/// The runtime may hand out its own storage or a copy; callers must release
/// the view through `ManagedEnv::release_byte_array_elements`.
#[derive(Debug)]
pub struct ByteElements {
    storage: ElementStorage,
    is_copy: bool,
}

#[derive(Debug)]
enum ElementStorage {
    Shared(Arc<[u8]>),
    Raw { ptr: NonNull<u8>, len: usize },
}

impl ByteElements {
    /// Create a view over the given storage
    pub fn new(bytes: Arc<[u8]>, is_copy: bool) -> Self {
        Self {
            storage: ElementStorage::Shared(bytes),
            is_copy,
        }
    }

    /// Create a view over memory owned by the runtime.
    ///
    /// # Safety
    ///
    /// `ptr` must point to `len` readable bytes that stay valid and unchanged
    /// until the view is released.
    pub unsafe fn from_raw_parts(ptr: NonNull<u8>, len: usize, is_copy: bool) -> Self {
        Self {
            storage: ElementStorage::Raw { ptr, len },
            is_copy,
        }
    }

    /// The elements
    pub fn as_slice(&self) -> &[u8] {
        match &self.storage {
            ElementStorage::Shared(bytes) => bytes,
            // Valid until release, per `from_raw_parts`.
            ElementStorage::Raw { ptr, len } => unsafe {
                std::slice::from_raw_parts(ptr.as_ptr(), *len)
            },
        }
    }

    /// Start of the runtime-owned storage, `None` for shared storage
    pub fn as_raw_ptr(&self) -> Option<NonNull<u8>> {
        match &self.storage {
            ElementStorage::Shared(_) => None,
            ElementStorage::Raw { ptr, .. } => Some(*ptr),
        }
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// Whether the view is empty
    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }

    /// Whether the runtime handed out a copy instead of its own storage
    pub fn is_copy(&self) -> bool {
        self.is_copy
    }
}

/// Arguments used when attaching a native thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachArgs {
    /// Requested environment version
    pub version: i32,
    /// Name the runtime should give the thread
    pub thread_name: Option<String>,
}

/// Outcome of asking the runtime for the calling thread's environment
pub enum EnvStatus {
    /// Thread is attached; here is its environment
    Attached(Box<dyn ManagedEnv>),
    /// Thread is not attached
    Detached,
    /// Requested version is not supported
    UnsupportedVersion,
    /// Any other non-OK status
    Failed(i32),
}

impl std::fmt::Debug for EnvStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvStatus::Attached(_) => write!(f, "Attached"),
            EnvStatus::Detached => write!(f, "Detached"),
            EnvStatus::UnsupportedVersion => write!(f, "UnsupportedVersion"),
            EnvStatus::Failed(status) => write!(f, "Failed({})", status),
        }
    }
}

/// Process-wide handle to the managed runtime
pub trait ManagedVm: Send + Sync {
    /// Environment of the calling thread, if it is attached
    fn get_env(&self, version: i32) -> EnvStatus;

    /// Attach the calling thread and return its environment
    fn attach_current_thread(&self, args: &AttachArgs) -> Result<Box<dyn ManagedEnv>, VmError>;

    /// Detach the calling thread.
    ///
    /// `thread` is the calling thread's id, captured while it was attached;
    /// it may be invoked while that thread is tearing down its locals.
    fn detach_current_thread(&self, thread: ThreadId) -> Result<(), VmError>;
}

/// Per-thread environment into the managed runtime.
///
/// The `call_*` methods mirror the runtime's invocation interface: a thrown
/// exception does not surface as an error, it stays pending on the thread
/// and the call returns a zero value. Callers must check
/// [`ManagedEnv::exception_check`] after every call.
pub trait ManagedEnv {
    /// The runtime this environment belongs to
    fn vm(&self) -> Result<Arc<dyn ManagedVm>, VmError>;

    /// Promote a local reference to a global one
    fn new_global_ref(&self, obj: &LocalRef) -> Result<GlobalRef, VmError>;

    /// Delete a local reference
    fn delete_local_ref(&self, obj: LocalRef);

    /// Delete a global reference; the handle must not be used afterwards
    fn delete_global_ref(&self, obj: &GlobalRef);

    /// Runtime class of an object, as a new local reference
    fn get_object_class(&self, obj: &GlobalRef) -> Result<LocalRef, VmError>;

    /// Resolve an instance method by name and descriptor
    fn get_method_id(
        &self,
        class: &LocalRef,
        name: &str,
        descriptor: &str,
    ) -> Result<MethodId, VmError>;

    /// Invoke a method returning `int`
    fn call_int_method(&self, obj: &GlobalRef, method: MethodId, args: &[JValue]) -> i32;

    /// Invoke a method returning `void`
    fn call_void_method(&self, obj: &GlobalRef, method: MethodId, args: &[JValue]);

    /// Invoke a method returning an object; `None` for null
    fn call_object_method(
        &self,
        obj: &GlobalRef,
        method: MethodId,
        args: &[JValue],
    ) -> Option<LocalRef>;

    /// Length of a primitive array
    fn get_array_length(&self, array: &LocalRef) -> Result<usize, VmError>;

    /// Read view over a byte array's elements
    fn get_byte_array_elements(&self, array: &LocalRef) -> Result<ByteElements, VmError>;

    /// Hand a view obtained from `get_byte_array_elements` back to the runtime
    fn release_byte_array_elements(
        &self,
        array: &LocalRef,
        elements: ByteElements,
        mode: ReleaseMode,
    );

    /// Whether an exception is pending on this thread
    fn exception_check(&self) -> bool;

    /// Describe and clear the pending exception
    fn take_exception(&self) -> Option<String>;
}
