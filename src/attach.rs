//! Environment attachment.
//!
//! Any thread calling into the bridge needs an environment handle for the
//! managed runtime. Threads the runtime already knows about get theirs
//! straight from `get_env`. Native threads are attached on demand and
//! detached exactly once when they terminate.
//!
//! Detaching at exit has two halves. The first time a manager attaches a
//! thread it registers its detach hook in a process-wide table, once per
//! manager. Every attached thread then carries a thread-local exit marker
//! whose destructor runs each registered hook for that thread. A hook only
//! detaches threads recorded in its own [`ThreadRegistry`].

use crate::error::{status_codes, BridgeError, CallResult};
use crate::managed::{AttachArgs, EnvStatus, ManagedEnv, ManagedVm};
use crate::metrics::BridgeMetrics;
use dashmap::DashMap;
use once_cell::sync::{Lazy, OnceCell};
use std::cell::RefCell;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Instant;
use tracing::{debug, warn};

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(1);

/// Registered thread-exit hooks, by manager id
static EXIT_HOOKS: Lazy<DashMap<u64, Arc<DetachHook>>> = Lazy::new(DashMap::new);

thread_local! {
    static EXIT_MARKER: RefCell<Option<ExitMarker>> = RefCell::new(None);
}

/// Environment handle for the calling thread
pub struct EnvHandle {
    env: Box<dyn ManagedEnv>,
    attached_here: bool,
}

impl EnvHandle {
    /// Whether this call attached the thread
    pub fn attached_here(&self) -> bool {
        self.attached_here
    }
}

impl Deref for EnvHandle {
    type Target = dyn ManagedEnv;

    fn deref(&self) -> &Self::Target {
        self.env.as_ref()
    }
}

/// Attachment made by the bridge for one native thread
#[derive(Debug, Clone)]
pub struct AttachmentRecord {
    /// Name the thread was attached under
    pub thread_name: Option<String>,
    /// When the thread was attached
    pub attached_at: Instant,
    /// Environments handed out on this thread since attaching
    pub acquisitions: u64,
}

impl AttachmentRecord {
    fn new(thread_name: Option<String>) -> Self {
        Self {
            thread_name,
            attached_at: Instant::now(),
            acquisitions: 1,
        }
    }
}

/// Threads currently attached by the bridge
#[derive(Debug, Default)]
pub struct ThreadRegistry {
    threads: DashMap<ThreadId, AttachmentRecord>,
}

impl ThreadRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an attachment; `false` if the thread was already recorded
    pub fn register(&self, thread: ThreadId, record: AttachmentRecord) -> bool {
        self.threads.insert(thread, record).is_none()
    }

    /// Count one more environment acquisition on `thread`
    pub fn touch(&self, thread: ThreadId) {
        if let Some(mut record) = self.threads.get_mut(&thread) {
            record.acquisitions += 1;
        }
    }

    /// Remove the attachment for `thread`
    pub fn remove(&self, thread: ThreadId) -> Option<AttachmentRecord> {
        self.threads.remove(&thread).map(|(_, record)| record)
    }

    /// Whether the bridge attached `thread`
    pub fn is_attached(&self, thread: ThreadId) -> bool {
        self.threads.contains_key(&thread)
    }

    /// The record for `thread`
    pub fn get(&self, thread: ThreadId) -> Option<AttachmentRecord> {
        self.threads.get(&thread).map(|record| record.clone())
    }

    /// Number of attached threads
    pub fn len(&self) -> usize {
        self.threads.len()
    }

    /// Whether no thread is attached
    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Ids of all attached threads
    pub fn threads(&self) -> Vec<ThreadId> {
        self.threads.iter().map(|entry| *entry.key()).collect()
    }
}

/// Detaches threads a manager attached.
///
/// Outlives its manager while any of those threads is still attached.
struct DetachHook {
    vm: Arc<dyn ManagedVm>,
    registry: ThreadRegistry,
    metrics: Arc<BridgeMetrics>,
    retired: AtomicBool,
}

impl DetachHook {
    /// Must run on `thread`
    fn run(&self, thread: ThreadId) -> bool {
        let Some(record) = self.registry.remove(thread) else {
            return false;
        };

        match self.vm.detach_current_thread(thread) {
            Ok(()) => {
                self.metrics.record_detach();
                debug!(
                    thread = ?thread,
                    acquisitions = record.acquisitions,
                    attached_for_us = record.attached_at.elapsed().as_micros() as u64,
                    "Detached native thread from managed runtime"
                );
                true
            }
            Err(e) => {
                warn!(thread = ?thread, error = %e, "Failed to detach native thread");
                false
            }
        }
    }

    fn is_spent(&self) -> bool {
        self.retired.load(Ordering::Acquire) && self.registry.is_empty()
    }
}

/// Armed on every thread the bridge attaches; runs the exit hooks on drop
struct ExitMarker {
    thread: ThreadId,
}

impl Drop for ExitMarker {
    fn drop(&mut self) {
        let hooks: Vec<Arc<DetachHook>> = EXIT_HOOKS
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for hook in &hooks {
            hook.run(self.thread);
        }
        EXIT_HOOKS.retain(|_, hook| !hook.is_spent());
    }
}

struct ManagerInner {
    id: u64,
    env_version: i32,
    thread_name: Option<String>,
    hook: Arc<DetachHook>,
    exit_hook: OnceCell<()>,
}

impl ManagerInner {
    fn register_exit_hook(&self) {
        self.exit_hook.get_or_init(|| {
            EXIT_HOOKS.insert(self.id, Arc::clone(&self.hook));
            self.hook.metrics.record_hook_registration();
            debug!(manager = self.id, "Registered thread-exit detach hook");
        });
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        self.hook.retired.store(true, Ordering::Release);
        if self.hook.registry.is_empty() {
            EXIT_HOOKS.remove(&self.id);
        }
    }
}

/// Hands out environment handles, attaching native threads on demand
#[derive(Clone)]
pub struct AttachmentManager {
    inner: Arc<ManagerInner>,
}

impl AttachmentManager {
    /// Create a manager for `vm`
    pub fn new(
        vm: Arc<dyn ManagedVm>,
        env_version: i32,
        thread_name: Option<String>,
        metrics: Arc<BridgeMetrics>,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                id: NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed),
                env_version,
                thread_name,
                hook: Arc::new(DetachHook {
                    vm,
                    registry: ThreadRegistry::new(),
                    metrics,
                    retired: AtomicBool::new(false),
                }),
                exit_hook: OnceCell::new(),
            }),
        }
    }

    /// The managed runtime
    pub fn vm(&self) -> &Arc<dyn ManagedVm> {
        &self.inner.hook.vm
    }

    /// Threads attached by this manager
    pub fn registry(&self) -> &ThreadRegistry {
        &self.inner.hook.registry
    }

    /// Whether this manager's thread-exit detach hook is registered
    pub fn exit_hook_registered(&self) -> bool {
        self.inner.exit_hook.get().is_some() && EXIT_HOOKS.contains_key(&self.inner.id)
    }

    /// Environment for the calling thread, attaching it if necessary
    pub fn acquire_environment(&self) -> CallResult<EnvHandle> {
        let inner = &self.inner;
        match inner.hook.vm.get_env(inner.env_version) {
            EnvStatus::Attached(env) => {
                inner.hook.registry.touch(thread::current().id());
                Ok(EnvHandle {
                    env,
                    attached_here: false,
                })
            }
            EnvStatus::Detached => self.attach_current_thread(),
            EnvStatus::UnsupportedVersion => {
                Err(BridgeError::unsupported_version(inner.env_version))
            }
            EnvStatus::Failed(status) => Err(BridgeError::attach_failed(status)),
        }
    }

    /// Detach the calling thread if the bridge attached it.
    ///
    /// `thread` must be the calling thread's id; any other id is refused
    /// and `false` returned. Returns `true` if a detach happened; later
    /// calls for the same attachment return `false`.
    pub fn on_thread_exit(&self, thread: ThreadId) -> bool {
        if thread != thread::current().id() {
            warn!(thread = ?thread, "Refusing to detach a thread other than the caller");
            return false;
        }
        self.inner.hook.run(thread)
    }

    #[cfg(test)]
    fn id(&self) -> u64 {
        self.inner.id
    }

    fn attach_current_thread(&self) -> CallResult<EnvHandle> {
        let inner = &self.inner;
        let hook = &inner.hook;
        let args = AttachArgs {
            version: inner.env_version,
            thread_name: inner.thread_name.clone(),
        };

        let env = hook.vm.attach_current_thread(&args).map_err(|e| {
            warn!(error = %e, "Failed to attach native thread");
            BridgeError::attach_failed(e.status())
        })?;

        inner.register_exit_hook();

        let thread = thread::current().id();
        hook.registry
            .register(thread, AttachmentRecord::new(inner.thread_name.clone()));

        let armed = EXIT_MARKER
            .try_with(|marker| {
                marker
                    .borrow_mut()
                    .get_or_insert_with(|| ExitMarker { thread });
            })
            .is_ok();
        if !armed {
            // Thread is already tearing down its locals; nothing would detach it later.
            hook.registry.remove(thread);
            if let Err(e) = hook.vm.detach_current_thread(thread) {
                warn!(error = %e, "Failed to detach exiting thread");
            }
            return Err(BridgeError::attach_failed(status_codes::EDETACHED)
                .with_context(serde_json::json!({ "reason": "thread is exiting" })));
        }

        hook.metrics.record_attach();
        debug!(thread = ?thread, "Attached native thread to managed runtime");

        Ok(EnvHandle {
            env,
            attached_here: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::managed::simulated::SimulatedVm;
    use std::sync::Barrier;

    const VERSION: i32 = 0x0001_0006;

    fn create_manager(vm: &SimulatedVm) -> AttachmentManager {
        AttachmentManager::new(
            Arc::new(vm.clone()),
            VERSION,
            Some("bridge-test".into()),
            Arc::new(BridgeMetrics::new()),
        )
    }

    #[test]
    fn test_managed_thread_is_not_attached_again() {
        let vm = SimulatedVm::new();
        vm.enter_managed_thread();
        let manager = create_manager(&vm);

        let env = manager.acquire_environment().unwrap();
        assert!(!env.attached_here());
        assert!(manager.registry().is_empty());
        assert!(!manager.exit_hook_registered());
        assert_eq!(vm.attach_count_for(thread::current().id()), 0);
        vm.leave_managed_thread();
    }

    #[test]
    fn test_acquire_twice_attaches_once() {
        let vm = SimulatedVm::new();
        let manager = create_manager(&vm);

        let worker = {
            let manager = manager.clone();
            let vm = vm.clone();
            thread::spawn(move || {
                let first = manager.acquire_environment().unwrap();
                let second = manager.acquire_environment().unwrap();
                assert!(first.attached_here());
                assert!(!second.attached_here());

                let id = thread::current().id();
                assert_eq!(vm.attach_count_for(id), 1);
                assert_eq!(manager.registry().get(id).unwrap().acquisitions, 2);
                id
            })
        };
        let id = worker.join().unwrap();

        assert_eq!(vm.detach_count_for(id), 1);
        assert!(!vm.is_attached(id));
        assert!(manager.registry().is_empty());
        assert_eq!(vm.misuse_count(), 0);
    }

    #[test]
    fn test_explicit_exit_hook_detaches_once() {
        let vm = SimulatedVm::new();
        let manager = create_manager(&vm);

        let worker = {
            let manager = manager.clone();
            let vm = vm.clone();
            thread::spawn(move || {
                manager.acquire_environment().unwrap();
                let id = thread::current().id();
                assert!(manager.on_thread_exit(id));
                assert!(!manager.on_thread_exit(id));
                assert!(!vm.is_attached(id));
                id
            })
        };
        let id = worker.join().unwrap();

        assert_eq!(vm.detach_count_for(id), 1);
    }

    #[test]
    fn test_exit_hook_refuses_foreign_thread() {
        let vm = SimulatedVm::new();
        let manager = create_manager(&vm);
        let called = Arc::new(Barrier::new(2));
        let checked = Arc::new(Barrier::new(2));

        let worker = {
            let manager = manager.clone();
            let vm = vm.clone();
            let called = Arc::clone(&called);
            let checked = Arc::clone(&checked);
            thread::spawn(move || {
                manager.acquire_environment().unwrap();
                called.wait();
                checked.wait();

                let env = manager.acquire_environment().unwrap();
                assert!(!env.attached_here());
                assert_eq!(vm.attach_count_for(thread::current().id()), 1);
                thread::current().id()
            })
        };

        called.wait();
        let worker_id = manager.registry().threads()[0];
        assert!(!manager.on_thread_exit(worker_id));
        assert!(vm.is_attached(worker_id));
        assert!(manager.registry().is_attached(worker_id));
        checked.wait();

        let id = worker.join().unwrap();
        assert_eq!(id, worker_id);
        assert_eq!(vm.attach_count_for(id), 1);
        assert_eq!(vm.detach_count_for(id), 1);
        assert_eq!(vm.misuse_count(), 0);
    }

    #[test]
    fn test_reattach_after_explicit_exit() {
        let vm = SimulatedVm::new();
        let manager = create_manager(&vm);

        let worker = {
            let manager = manager.clone();
            thread::spawn(move || {
                let id = thread::current().id();
                manager.acquire_environment().unwrap();
                manager.on_thread_exit(id);
                let env = manager.acquire_environment().unwrap();
                assert!(env.attached_here());
                id
            })
        };
        let id = worker.join().unwrap();

        assert_eq!(vm.attach_count_for(id), 2);
        assert_eq!(vm.detach_count_for(id), 2);
    }

    #[test]
    fn test_attach_failure() {
        let vm = SimulatedVm::new();
        vm.set_fail_attach(true);
        let manager = create_manager(&vm);

        let worker_manager = manager.clone();
        let result = thread::spawn(move || worker_manager.acquire_environment().map(|_| ()))
            .join()
            .unwrap();
        let err = result.unwrap_err();
        assert_eq!(err.code, ErrorCode::AttachFailed);
        assert!(err.message.contains("-1"));
        assert_eq!(vm.total_attaches(), 0);
        assert!(!manager.exit_hook_registered());
    }

    #[test]
    fn test_unsupported_version() {
        let vm = SimulatedVm::new();
        vm.set_max_version(0x0001_0004);
        let manager = create_manager(&vm);

        let err = manager.acquire_environment().map(|_| ()).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedVersion);
    }

    #[test]
    fn test_exit_hook_registered_once_across_threads() {
        let vm = SimulatedVm::new();
        let metrics = Arc::new(BridgeMetrics::new());
        let manager = AttachmentManager::new(
            Arc::new(vm.clone()),
            VERSION,
            None,
            Arc::clone(&metrics),
        );
        assert!(!manager.exit_hook_registered());
        assert!(!EXIT_HOOKS.contains_key(&manager.id()));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                thread::spawn(move || {
                    manager.acquire_environment().unwrap();
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert!(manager.exit_hook_registered());
        assert!(EXIT_HOOKS.contains_key(&manager.id()));
        assert_eq!(metrics.hook_registrations(), 1);
        assert_eq!(metrics.attaches(), 8);
        assert_eq!(metrics.detaches(), 8);
        assert_eq!(vm.total_detaches(), 8);
    }

    #[test]
    fn test_thread_outliving_manager_is_detached_at_exit() {
        let vm = SimulatedVm::new();
        let manager = create_manager(&vm);
        let id = manager.id();
        let attached = Arc::new(Barrier::new(2));
        let dropped = Arc::new(Barrier::new(2));

        let worker = {
            let manager = manager.clone();
            let attached = Arc::clone(&attached);
            let dropped = Arc::clone(&dropped);
            thread::spawn(move || {
                manager.acquire_environment().unwrap();
                drop(manager);
                attached.wait();
                dropped.wait();
                thread::current().id()
            })
        };

        attached.wait();
        drop(manager);
        assert!(EXIT_HOOKS.contains_key(&id));
        dropped.wait();

        let thread = worker.join().unwrap();
        assert_eq!(vm.detach_count_for(thread), 1);
        assert!(!vm.is_attached(thread));
        assert!(!EXIT_HOOKS.contains_key(&id));
    }

    #[test]
    fn test_dropped_idle_manager_unregisters_hook() {
        let vm = SimulatedVm::new();
        let manager = create_manager(&vm);
        let id = manager.id();

        let worker = {
            let manager = manager.clone();
            thread::spawn(move || {
                manager.acquire_environment().unwrap();
            })
        };
        worker.join().unwrap();
        assert!(EXIT_HOOKS.contains_key(&id));

        drop(manager);
        assert!(!EXIT_HOOKS.contains_key(&id));
    }

    #[test]
    fn test_registry_operations() {
        let registry = ThreadRegistry::new();
        let id = thread::current().id();

        assert!(registry.register(id, AttachmentRecord::new(None)));
        assert!(!registry.register(id, AttachmentRecord::new(None)));
        registry.touch(id);
        assert_eq!(registry.get(id).unwrap().acquisitions, 2);
        assert_eq!(registry.threads(), vec![id]);
        assert!(registry.remove(id).is_some());
        assert!(registry.remove(id).is_none());
        assert!(registry.is_empty());
    }
}
