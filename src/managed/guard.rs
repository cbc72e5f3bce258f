//! RAII guards for managed-runtime resources.
//!
//! Every local reference and every array view taken during an entry-point
//! call is wrapped in one of these, so early returns on error paths still
//! hand the resource back.

use super::{ByteElements, LocalRef, ManagedEnv, ReleaseMode};
use std::ops::Deref;

/// Deletes a local reference when dropped
pub struct LocalRefGuard<'env> {
    env: &'env dyn ManagedEnv,
    local: Option<LocalRef>,
}

impl<'env> LocalRefGuard<'env> {
    /// Take ownership of `local`
    pub fn new(env: &'env dyn ManagedEnv, local: LocalRef) -> Self {
        Self {
            env,
            local: Some(local),
        }
    }
}

impl Deref for LocalRefGuard<'_> {
    type Target = LocalRef;

    fn deref(&self) -> &LocalRef {
        // Only `drop` takes the reference out.
        self.local
            .as_ref()
            .unwrap_or_else(|| unreachable!("local reference already deleted"))
    }
}

impl Drop for LocalRefGuard<'_> {
    fn drop(&mut self) {
        if let Some(local) = self.local.take() {
            self.env.delete_local_ref(local);
        }
    }
}

/// Releases a byte-array view with [`ReleaseMode::Abort`] when dropped.
///
/// The bridge never writes into managed arrays, so nothing is copied back.
pub struct ElementsGuard<'a> {
    env: &'a dyn ManagedEnv,
    array: &'a LocalRef,
    elements: Option<ByteElements>,
}

impl<'a> ElementsGuard<'a> {
    /// Take ownership of a view over `array`
    pub fn new(env: &'a dyn ManagedEnv, array: &'a LocalRef, elements: ByteElements) -> Self {
        Self {
            env,
            array,
            elements: Some(elements),
        }
    }

    /// The viewed elements
    pub fn as_slice(&self) -> &[u8] {
        self.elements
            .as_ref()
            .map(ByteElements::as_slice)
            .unwrap_or_default()
    }
}

impl Drop for ElementsGuard<'_> {
    fn drop(&mut self) {
        if let Some(elements) = self.elements.take() {
            self.env
                .release_byte_array_elements(self.array, elements, ReleaseMode::Abort);
        }
    }
}
