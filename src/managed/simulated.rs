//! In-process managed runtime.
//!
//! `SimulatedVm` implements the managed seam entirely in Rust: a reference
//! table, per-thread attachment, pending exceptions and primitive-array
//! views, with counters for everything the bridge is supposed to balance
//! (attach/detach, local references, array views). `FrameStore` is a
//! collaborator object exposing the six frame-buffer methods.
//!
//! Used by the unit tests, the integration tests and the benchmarks.

use super::{
    AttachArgs, ByteElements, EnvStatus, GlobalRef, JValue, LocalRef, ManagedEnv, ManagedVm,
    MethodId, RawHandle, ReleaseMode,
};
use crate::error::{status_codes, VmError};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// Highest environment version the simulated runtime supports by default
pub const DEFAULT_MAX_VERSION: i32 = 0x0015_0000;

/// Value returned by a managed method
#[derive(Debug, Clone, PartialEq)]
pub enum ManagedValue {
    /// `void`
    Void,
    /// `int`
    Int(i32),
    /// `byte[]`, `None` for null
    ByteArray(Option<Arc<[u8]>>),
}

/// Object living on the simulated heap
pub trait ManagedObject: Send + Sync {
    /// Fully qualified class name
    fn class_name(&self) -> &str;

    /// Whether the class declares `name` with `descriptor`
    fn has_method(&self, name: &str, descriptor: &str) -> bool;

    /// Invoke a method; `Err` is the description of a thrown exception
    fn invoke(&self, name: &str, descriptor: &str, args: &[JValue]) -> Result<ManagedValue, String>;
}

/// Heap value a reference points at
#[derive(Clone)]
pub enum HeapValue {
    /// Instance
    Object(Arc<dyn ManagedObject>),
    /// Class of an instance
    Class(Arc<dyn ManagedObject>),
    /// Primitive byte array
    ByteArray(Arc<[u8]>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefKind {
    Local,
    Global,
}

struct RefEntry {
    kind: RefKind,
    value: HeapValue,
}

#[derive(Debug, Clone)]
struct ThreadEntry {
    /// Created by the runtime itself rather than attached
    managed: bool,
    name: Option<String>,
}

struct VmState {
    max_version: AtomicI32,
    fail_attach: AtomicBool,
    next_handle: AtomicU64,
    threads: DashMap<ThreadId, ThreadEntry>,
    refs: DashMap<u64, RefEntry>,
    methods: DashMap<u64, (String, String)>,
    method_lookup: DashMap<(String, String), u64>,
    pending: DashMap<ThreadId, String>,
    attach_history: DashMap<ThreadId, u32>,
    detach_history: DashMap<ThreadId, u32>,
    pinned_views: AtomicI64,
    abort_releases: AtomicU64,
    other_releases: AtomicU64,
    misuse: AtomicU64,
}

impl VmState {
    fn new() -> Self {
        Self {
            max_version: AtomicI32::new(DEFAULT_MAX_VERSION),
            fail_attach: AtomicBool::new(false),
            next_handle: AtomicU64::new(1),
            threads: DashMap::new(),
            refs: DashMap::new(),
            methods: DashMap::new(),
            method_lookup: DashMap::new(),
            pending: DashMap::new(),
            attach_history: DashMap::new(),
            detach_history: DashMap::new(),
            pinned_views: AtomicI64::new(0),
            abort_releases: AtomicU64::new(0),
            other_releases: AtomicU64::new(0),
            misuse: AtomicU64::new(0),
        }
    }

    fn next_handle(&self) -> RawHandle {
        let raw = self.next_handle.fetch_add(1, Ordering::Relaxed);
        RawHandle::new(raw).unwrap_or_else(|| unreachable!("handle counter starts at 1"))
    }

    fn insert_ref(&self, kind: RefKind, value: HeapValue) -> RawHandle {
        let handle = self.next_handle();
        self.refs.insert(handle.get(), RefEntry { kind, value });
        handle
    }

    fn lookup(&self, handle: RawHandle) -> Option<HeapValue> {
        self.refs.get(&handle.get()).map(|entry| entry.value.clone())
    }

    fn count_refs(&self, kind: RefKind) -> usize {
        self.refs.iter().filter(|entry| entry.kind == kind).count()
    }

    fn flag_misuse(&self) {
        self.misuse.fetch_add(1, Ordering::Relaxed);
    }

    fn version_supported(&self, version: i32) -> bool {
        version <= self.max_version.load(Ordering::Relaxed)
    }

    fn env(self: &Arc<Self>) -> Box<dyn ManagedEnv> {
        Box::new(SimulatedEnv {
            state: Arc::clone(self),
            thread: thread::current().id(),
        })
    }
}

/// Simulated managed runtime
#[derive(Clone)]
pub struct SimulatedVm {
    state: Arc<VmState>,
}

impl Default for SimulatedVm {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedVm {
    /// Create an empty runtime
    pub fn new() -> Self {
        Self {
            state: Arc::new(VmState::new()),
        }
    }

    /// Limit the supported environment version
    pub fn set_max_version(&self, version: i32) {
        self.state.max_version.store(version, Ordering::Relaxed);
    }

    /// Make every subsequent attach fail
    pub fn set_fail_attach(&self, fail: bool) {
        self.state.fail_attach.store(fail, Ordering::Relaxed);
    }

    /// Register the calling thread as one the runtime created itself
    pub fn enter_managed_thread(&self) -> Box<dyn ManagedEnv> {
        self.state.threads.insert(
            thread::current().id(),
            ThreadEntry {
                managed: true,
                name: thread::current().name().map(str::to_string),
            },
        );
        self.state.env()
    }

    /// Forget the calling runtime-owned thread
    pub fn leave_managed_thread(&self) {
        self.state.threads.remove(&thread::current().id());
    }

    /// Put a reference to `value` in the local table
    pub fn new_local(&self, value: HeapValue) -> LocalRef {
        LocalRef::from_raw(self.state.insert_ref(RefKind::Local, value))
    }

    /// Local reference to a new instance
    pub fn new_object(&self, object: Arc<dyn ManagedObject>) -> LocalRef {
        self.new_local(HeapValue::Object(object))
    }

    /// Local reference to a new byte array
    pub fn new_byte_array(&self, bytes: impl Into<Vec<u8>>) -> LocalRef {
        self.new_local(HeapValue::ByteArray(Arc::from(bytes.into())))
    }

    /// Whether `thread` is currently attached
    pub fn is_attached(&self, thread: ThreadId) -> bool {
        self.state.threads.contains_key(&thread)
    }

    /// Name `thread` was registered under while attached
    pub fn thread_name(&self, thread: ThreadId) -> Option<String> {
        self.state
            .threads
            .get(&thread)
            .and_then(|entry| entry.name.clone())
    }

    /// Number of attached threads, runtime-owned ones included
    pub fn attached_threads(&self) -> usize {
        self.state.threads.len()
    }

    /// How many times `thread` was attached through `attach_current_thread`
    pub fn attach_count_for(&self, thread: ThreadId) -> u32 {
        self.state
            .attach_history
            .get(&thread)
            .map(|count| *count)
            .unwrap_or(0)
    }

    /// How many times `thread` was detached
    pub fn detach_count_for(&self, thread: ThreadId) -> u32 {
        self.state
            .detach_history
            .get(&thread)
            .map(|count| *count)
            .unwrap_or(0)
    }

    /// Total attaches across all threads
    pub fn total_attaches(&self) -> u64 {
        self.state.attach_history.iter().map(|c| *c as u64).sum()
    }

    /// Total detaches across all threads
    pub fn total_detaches(&self) -> u64 {
        self.state.detach_history.iter().map(|c| *c as u64).sum()
    }

    /// Live local references
    pub fn live_local_refs(&self) -> usize {
        self.state.count_refs(RefKind::Local)
    }

    /// Live global references
    pub fn live_global_refs(&self) -> usize {
        self.state.count_refs(RefKind::Global)
    }

    /// Array views handed out and not yet released
    pub fn pinned_views(&self) -> i64 {
        self.state.pinned_views.load(Ordering::Relaxed)
    }

    /// Views released with `ReleaseMode::Abort`
    pub fn abort_releases(&self) -> u64 {
        self.state.abort_releases.load(Ordering::Relaxed)
    }

    /// Views released with any other mode
    pub fn other_releases(&self) -> u64 {
        self.state.other_releases.load(Ordering::Relaxed)
    }

    /// Contract violations observed (calls from a detached thread, calls
    /// with an exception pending, double deletes, detaching a
    /// runtime-owned thread)
    pub fn misuse_count(&self) -> u64 {
        self.state.misuse.load(Ordering::Relaxed)
    }
}

impl ManagedVm for SimulatedVm {
    fn get_env(&self, version: i32) -> EnvStatus {
        if !self.state.version_supported(version) {
            return EnvStatus::UnsupportedVersion;
        }
        if self.state.threads.contains_key(&thread::current().id()) {
            EnvStatus::Attached(self.state.env())
        } else {
            EnvStatus::Detached
        }
    }

    fn attach_current_thread(&self, args: &AttachArgs) -> Result<Box<dyn ManagedEnv>, VmError> {
        if self.state.fail_attach.load(Ordering::Relaxed) {
            return Err(VmError::Status(status_codes::ERR));
        }
        if !self.state.version_supported(args.version) {
            return Err(VmError::Status(status_codes::EVERSION));
        }

        let thread = thread::current().id();
        let newly_attached = self
            .state
            .threads
            .insert(
                thread,
                ThreadEntry {
                    managed: false,
                    name: args.thread_name.clone(),
                },
            )
            .is_none();
        if newly_attached {
            *self.state.attach_history.entry(thread).or_insert(0) += 1;
        }

        Ok(self.state.env())
    }

    fn detach_current_thread(&self, thread: ThreadId) -> Result<(), VmError> {
        let (_, entry) = self
            .state
            .threads
            .remove(&thread)
            .ok_or(VmError::Status(status_codes::EDETACHED))?;
        if entry.managed {
            self.state.flag_misuse();
        }
        self.state.pending.remove(&thread);
        *self.state.detach_history.entry(thread).or_insert(0) += 1;
        Ok(())
    }
}

/// Environment of one thread attached to a `SimulatedVm`
pub struct SimulatedEnv {
    state: Arc<VmState>,
    thread: ThreadId,
}

impl SimulatedEnv {
    fn check_usable(&self) {
        if thread::current().id() != self.thread || !self.state.threads.contains_key(&self.thread)
        {
            self.state.flag_misuse();
        }
    }

    fn throw(&self, description: impl Into<String>) {
        self.state.pending.insert(self.thread, description.into());
    }

    fn invoke(
        &self,
        obj: &GlobalRef,
        method: MethodId,
        args: &[JValue],
    ) -> Option<ManagedValue> {
        self.check_usable();
        if self.state.pending.contains_key(&self.thread) {
            self.state.flag_misuse();
        }

        let object = match self.state.lookup(obj.handle()) {
            Some(HeapValue::Object(object)) => object,
            _ => {
                self.throw("java.lang.NullPointerException");
                return None;
            }
        };
        let (name, descriptor) = match self.state.methods.get(&method.handle().get()) {
            Some(entry) => entry.clone(),
            None => {
                self.state.flag_misuse();
                return None;
            }
        };

        match object.invoke(&name, &descriptor, args) {
            Ok(value) => Some(value),
            Err(description) => {
                self.throw(description);
                None
            }
        }
    }

    fn byte_array(&self, array: &LocalRef) -> Result<Arc<[u8]>, VmError> {
        match self.state.lookup(array.handle()) {
            Some(HeapValue::ByteArray(bytes)) => Ok(bytes),
            Some(_) => Err(VmError::NotAnArray(format!("ref#{}", array.handle().get()))),
            None => Err(VmError::InvalidReference(format!(
                "ref#{}",
                array.handle().get()
            ))),
        }
    }
}

impl ManagedEnv for SimulatedEnv {
    fn vm(&self) -> Result<Arc<dyn ManagedVm>, VmError> {
        Ok(Arc::new(SimulatedVm {
            state: Arc::clone(&self.state),
        }))
    }

    fn new_global_ref(&self, obj: &LocalRef) -> Result<GlobalRef, VmError> {
        self.check_usable();
        let value = self
            .state
            .lookup(obj.handle())
            .ok_or_else(|| VmError::InvalidReference(format!("ref#{}", obj.handle().get())))?;
        Ok(GlobalRef::from_raw(
            self.state.insert_ref(RefKind::Global, value),
        ))
    }

    fn delete_local_ref(&self, obj: LocalRef) {
        self.check_usable();
        let removed = self
            .state
            .refs
            .remove_if(&obj.handle().get(), |_, entry| entry.kind == RefKind::Local);
        if removed.is_none() {
            self.state.flag_misuse();
        }
    }

    fn delete_global_ref(&self, obj: &GlobalRef) {
        self.check_usable();
        let removed = self
            .state
            .refs
            .remove_if(&obj.handle().get(), |_, entry| entry.kind == RefKind::Global);
        if removed.is_none() {
            self.state.flag_misuse();
        }
    }

    fn get_object_class(&self, obj: &GlobalRef) -> Result<LocalRef, VmError> {
        self.check_usable();
        match self.state.lookup(obj.handle()) {
            Some(HeapValue::Object(object)) => Ok(LocalRef::from_raw(
                self.state.insert_ref(RefKind::Local, HeapValue::Class(object)),
            )),
            _ => Err(VmError::InvalidReference(format!(
                "ref#{}",
                obj.handle().get()
            ))),
        }
    }

    fn get_method_id(
        &self,
        class: &LocalRef,
        name: &str,
        descriptor: &str,
    ) -> Result<MethodId, VmError> {
        self.check_usable();
        let object = match self.state.lookup(class.handle()) {
            Some(HeapValue::Class(object)) => object,
            _ => {
                return Err(VmError::InvalidReference(format!(
                    "ref#{}",
                    class.handle().get()
                )))
            }
        };

        if !object.has_method(name, descriptor) {
            self.throw(format!(
                "java.lang.NoSuchMethodError: {}.{}{}",
                object.class_name(),
                name,
                descriptor
            ));
            return Err(VmError::NoSuchMethod {
                name: name.to_string(),
                descriptor: descriptor.to_string(),
            });
        }

        let key = (name.to_string(), descriptor.to_string());
        let raw = *self
            .state
            .method_lookup
            .entry(key.clone())
            .or_insert_with(|| {
                let handle = self.state.next_handle().get();
                self.state.methods.insert(handle, key);
                handle
            });
        RawHandle::new(raw)
            .map(MethodId::from_raw)
            .ok_or_else(|| VmError::InvalidReference("null method id".into()))
    }

    fn call_int_method(&self, obj: &GlobalRef, method: MethodId, args: &[JValue]) -> i32 {
        match self.invoke(obj, method, args) {
            Some(ManagedValue::Int(value)) => value,
            Some(_) => {
                self.state.flag_misuse();
                0
            }
            None => 0,
        }
    }

    fn call_void_method(&self, obj: &GlobalRef, method: MethodId, args: &[JValue]) {
        match self.invoke(obj, method, args) {
            Some(ManagedValue::Void) | None => {}
            Some(_) => self.state.flag_misuse(),
        }
    }

    fn call_object_method(
        &self,
        obj: &GlobalRef,
        method: MethodId,
        args: &[JValue],
    ) -> Option<LocalRef> {
        match self.invoke(obj, method, args)? {
            ManagedValue::ByteArray(Some(bytes)) => Some(LocalRef::from_raw(
                self.state
                    .insert_ref(RefKind::Local, HeapValue::ByteArray(bytes)),
            )),
            ManagedValue::ByteArray(None) => None,
            _ => {
                self.state.flag_misuse();
                None
            }
        }
    }

    fn get_array_length(&self, array: &LocalRef) -> Result<usize, VmError> {
        self.check_usable();
        Ok(self.byte_array(array)?.len())
    }

    fn get_byte_array_elements(&self, array: &LocalRef) -> Result<ByteElements, VmError> {
        self.check_usable();
        let bytes = self.byte_array(array)?;
        self.state.pinned_views.fetch_add(1, Ordering::Relaxed);
        Ok(ByteElements::new(bytes, false))
    }

    fn release_byte_array_elements(
        &self,
        _array: &LocalRef,
        elements: ByteElements,
        mode: ReleaseMode,
    ) {
        self.check_usable();
        self.state.pinned_views.fetch_sub(1, Ordering::Relaxed);
        match mode {
            ReleaseMode::Abort => self.state.abort_releases.fetch_add(1, Ordering::Relaxed),
            ReleaseMode::CopyBack | ReleaseMode::Commit => {
                self.state.other_releases.fetch_add(1, Ordering::Relaxed)
            }
        };
        drop(elements);
    }

    fn exception_check(&self) -> bool {
        self.state.pending.contains_key(&self.thread)
    }

    fn take_exception(&self) -> Option<String> {
        self.state.pending.remove(&self.thread).map(|(_, description)| description)
    }
}

/// Class name reported by `FrameStore`
pub const FRAME_STORE_CLASS: &str = "com.tradle.react.UdpSockets";

/// Frame-buffer collaborator.
///
/// Stores frames verbatim by number and the maximum frame count as given.
/// It never evicts.
pub struct FrameStore {
    frames: RwLock<BTreeMap<i32, Option<Arc<[u8]>>>>,
    max_frames: AtomicI32,
    throw_with: Mutex<Option<String>>,
    hidden: Mutex<HashSet<String>>,
}

impl Default for FrameStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameStore {
    /// Empty store
    pub fn new() -> Self {
        Self {
            frames: RwLock::new(BTreeMap::new()),
            max_frames: AtomicI32::new(0),
            throw_with: Mutex::new(None),
            hidden: Mutex::new(HashSet::new()),
        }
    }

    /// Store a frame
    pub fn insert_frame(&self, frame_no: i32, bytes: impl Into<Vec<u8>>) {
        self.frames
            .write()
            .insert(frame_no, Some(Arc::from(bytes.into())));
    }

    /// Store a frame number whose payload reads back as null
    pub fn insert_null_frame(&self, frame_no: i32) {
        self.frames.write().insert(frame_no, None);
    }

    /// Make every method throw `description`, or stop throwing with `None`
    pub fn set_throw(&self, description: Option<String>) {
        *self.throw_with.lock() = description;
    }

    /// Pretend the class does not declare `name`
    pub fn hide_method(&self, name: &str) {
        self.hidden.lock().insert(name.to_string());
    }

    /// Current maximum frame count
    pub fn max_frames(&self) -> i32 {
        self.max_frames.load(Ordering::Relaxed)
    }

    fn frame(&self, frame_no: i32) -> Option<Arc<[u8]>> {
        self.frames.read().get(&frame_no).cloned().flatten()
    }

    fn int_arg(args: &[JValue]) -> Result<i32, String> {
        match args.first() {
            Some(JValue::Int(value)) => Ok(*value),
            None => Err("java.lang.IllegalArgumentException: missing int argument".into()),
        }
    }
}

impl ManagedObject for FrameStore {
    fn class_name(&self) -> &str {
        FRAME_STORE_CLASS
    }

    fn has_method(&self, name: &str, descriptor: &str) -> bool {
        if self.hidden.lock().contains(name) {
            return false;
        }
        matches!(
            (name, descriptor),
            ("getFrameDataByFrameNo", "(I)[B")
                | ("getFirstMemorisedFrameNo", "()I")
                | ("getLastMemorisedFrameNo", "()I")
                | ("getCountOfMemorisedFrames", "()I")
                | ("getMaxNumberOfMemorisedFrames", "()I")
                | ("setMaxNumberOfMemorisedFrames", "(I)V")
        )
    }

    fn invoke(&self, name: &str, descriptor: &str, args: &[JValue]) -> Result<ManagedValue, String> {
        if let Some(description) = self.throw_with.lock().clone() {
            return Err(description);
        }

        match (name, descriptor) {
            ("getFrameDataByFrameNo", "(I)[B") => {
                Ok(ManagedValue::ByteArray(self.frame(Self::int_arg(args)?)))
            }
            ("getFirstMemorisedFrameNo", "()I") => Ok(ManagedValue::Int(
                self.frames.read().keys().next().copied().unwrap_or(-1),
            )),
            ("getLastMemorisedFrameNo", "()I") => Ok(ManagedValue::Int(
                self.frames.read().keys().next_back().copied().unwrap_or(-1),
            )),
            ("getCountOfMemorisedFrames", "()I") => {
                Ok(ManagedValue::Int(self.frames.read().len() as i32))
            }
            ("getMaxNumberOfMemorisedFrames", "()I") => Ok(ManagedValue::Int(self.max_frames())),
            ("setMaxNumberOfMemorisedFrames", "(I)V") => {
                self.max_frames.store(Self::int_arg(args)?, Ordering::Relaxed);
                Ok(ManagedValue::Void)
            }
            _ => Err(format!("java.lang.NoSuchMethodError: {}{}", name, descriptor)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_env_detached_then_attached() {
        let vm = SimulatedVm::new();
        let handle = thread::spawn(move || {
            assert!(matches!(vm.get_env(0x0001_0006), EnvStatus::Detached));
            let args = AttachArgs {
                version: 0x0001_0006,
                thread_name: Some("worker".into()),
            };
            vm.attach_current_thread(&args).unwrap();
            assert!(matches!(vm.get_env(0x0001_0006), EnvStatus::Attached(_)));

            let id = thread::current().id();
            vm.detach_current_thread(id).unwrap();
            assert_eq!(
                vm.detach_current_thread(id),
                Err(VmError::Status(status_codes::EDETACHED))
            );
            assert_eq!(vm.attach_count_for(id), 1);
            assert_eq!(vm.detach_count_for(id), 1);
        });
        handle.join().unwrap();
    }

    #[test]
    fn test_unsupported_version() {
        let vm = SimulatedVm::new();
        vm.set_max_version(0x0001_0004);
        assert!(matches!(
            vm.get_env(0x0001_0006),
            EnvStatus::UnsupportedVersion
        ));
    }

    #[test]
    fn test_global_ref_and_class_lookup() {
        let vm = SimulatedVm::new();
        let env = vm.enter_managed_thread();
        let local = vm.new_object(Arc::new(FrameStore::new()));
        let global = env.new_global_ref(&local).unwrap();
        env.delete_local_ref(local);

        let class = env.get_object_class(&global).unwrap();
        let method = env
            .get_method_id(&class, "getCountOfMemorisedFrames", "()I")
            .unwrap();
        let again = env
            .get_method_id(&class, "getCountOfMemorisedFrames", "()I")
            .unwrap();
        assert_eq!(method, again);
        assert_eq!(env.call_int_method(&global, method, &[]), 0);
        env.delete_local_ref(class);

        assert_eq!(vm.live_local_refs(), 0);
        assert_eq!(vm.live_global_refs(), 1);
        assert_eq!(vm.misuse_count(), 0);
        vm.leave_managed_thread();
    }

    #[test]
    fn test_global_ref_deleted_once() {
        let vm = SimulatedVm::new();
        let env = vm.enter_managed_thread();
        let local = vm.new_object(Arc::new(FrameStore::new()));
        let global = env.new_global_ref(&local).unwrap();
        env.delete_local_ref(local);
        assert_eq!(vm.live_global_refs(), 1);

        env.delete_global_ref(&global);
        assert_eq!(vm.live_global_refs(), 0);
        assert_eq!(vm.misuse_count(), 0);

        env.delete_global_ref(&global);
        assert_eq!(vm.misuse_count(), 1);
        vm.leave_managed_thread();
    }

    #[test]
    fn test_missing_method_leaves_exception_pending() {
        let vm = SimulatedVm::new();
        let env = vm.enter_managed_thread();
        let store = Arc::new(FrameStore::new());
        store.hide_method("getLastMemorisedFrameNo");
        let local = vm.new_object(store);
        let global = env.new_global_ref(&local).unwrap();
        let class = env.get_object_class(&global).unwrap();

        let err = env
            .get_method_id(&class, "getLastMemorisedFrameNo", "()I")
            .unwrap_err();
        assert!(matches!(err, VmError::NoSuchMethod { .. }));
        assert!(env.exception_check());
        let description = env.take_exception().unwrap();
        assert!(description.contains("NoSuchMethodError"));
        assert!(!env.exception_check());
        vm.leave_managed_thread();
    }

    #[test]
    fn test_thrown_exception_returns_zero() {
        let vm = SimulatedVm::new();
        let env = vm.enter_managed_thread();
        let store = Arc::new(FrameStore::new());
        store.set_throw(Some("java.lang.IllegalStateException: closed".into()));
        let local = vm.new_object(store);
        let global = env.new_global_ref(&local).unwrap();
        let class = env.get_object_class(&global).unwrap();
        let method = env
            .get_method_id(&class, "getCountOfMemorisedFrames", "()I")
            .unwrap();

        assert_eq!(env.call_int_method(&global, method, &[]), 0);
        assert_eq!(
            env.take_exception().as_deref(),
            Some("java.lang.IllegalStateException: closed")
        );
        vm.leave_managed_thread();
    }

    #[test]
    fn test_frame_store_bounds() {
        let store = FrameStore::new();
        let first = store.invoke("getFirstMemorisedFrameNo", "()I", &[]).unwrap();
        assert_eq!(first, ManagedValue::Int(-1));

        store.insert_frame(12, vec![1]);
        store.insert_frame(10, vec![2]);
        store.insert_null_frame(11);

        assert_eq!(
            store.invoke("getFirstMemorisedFrameNo", "()I", &[]),
            Ok(ManagedValue::Int(10))
        );
        assert_eq!(
            store.invoke("getLastMemorisedFrameNo", "()I", &[]),
            Ok(ManagedValue::Int(12))
        );
        assert_eq!(
            store.invoke("getCountOfMemorisedFrames", "()I", &[]),
            Ok(ManagedValue::Int(3))
        );
        assert_eq!(
            store.invoke("getFrameDataByFrameNo", "(I)[B", &[JValue::Int(11)]),
            Ok(ManagedValue::ByteArray(None))
        );
    }

    #[test]
    fn test_detaching_managed_thread_is_misuse() {
        let vm = SimulatedVm::new();
        vm.enter_managed_thread();
        vm.detach_current_thread(thread::current().id()).unwrap();
        assert_eq!(vm.misuse_count(), 1);
    }
}
