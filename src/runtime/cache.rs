extern crate std;

use alloc::{
    collections::{vec_deque::VecDeque, BTreeMap},
    sync::Arc,
};
use core::mem;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::thread::{self, ThreadId};

use super::{activator::Instance, finalizer::BoxedFinalizer};
use crate::{registration::RegistrationId, types::TypeRef};

/// Identity of a cached instance
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum CacheKey {
    Static(RegistrationId),
    /// Dynamic registrations are keyed by their table index and the closed type they produced
    Dynamic { index: usize, ty: TypeRef },
}

/// Per-scope instance cache with the instances awaiting finalization
#[derive(Default)]
pub(crate) struct InstanceCache {
    map: BTreeMap<CacheKey, Instance>,
    resolved: ResolvedSet,
}

impl InstanceCache {
    #[inline]
    #[must_use]
    pub(crate) fn get(&self, key: &CacheKey) -> Option<Instance> {
        self.map.get(key).cloned()
    }

    /// Publishes an instance unless another one was published first, returning the cached one
    pub(crate) fn publish(&mut self, key: CacheKey, instance: Instance) -> (Instance, bool) {
        match self.map.get(&key) {
            Some(published) => (published.clone(), false),
            None => {
                self.map.insert(key, instance.clone());
                (instance, true)
            }
        }
    }

    #[inline]
    pub(crate) fn push_resolved(&mut self, resolved: Resolved) {
        self.resolved.push(resolved);
    }

    #[inline]
    #[must_use]
    pub(crate) fn take_resolved_set(&mut self) -> ResolvedSet {
        mem::take(&mut self.resolved)
    }

    #[inline]
    pub(crate) fn clear(&mut self) {
        self.map.clear();
    }
}

pub(crate) struct Resolved {
    pub(crate) ty: TypeRef,
    pub(crate) instance: Instance,
    pub(crate) finalizer: BoxedFinalizer,
}

#[derive(Default)]
pub(crate) struct ResolvedSet(pub(crate) VecDeque<Resolved>);

impl ResolvedSet {
    pub(crate) fn push(&mut self, resolved: Resolved) {
        self.0.push_back(resolved);
    }
}

/// Initialize-once slots for singletons, owned by one resolver
#[derive(Default)]
pub(crate) struct SingletonCells {
    cells: Mutex<BTreeMap<CacheKey, Arc<OnceCell<Instance>>>>,
    initializing: Mutex<BTreeMap<CacheKey, ThreadId>>,
}

impl SingletonCells {
    /// Slot of a singleton, created empty on first request.
    /// The map lock is released before the slot is initialized.
    pub(crate) fn cell(&self, key: &CacheKey) -> Arc<OnceCell<Instance>> {
        self.cells.lock().entry(key.clone()).or_default().clone()
    }

    /// Whether the current thread is inside the initializer of this slot.
    /// Waiting on the slot from there would never return.
    pub(crate) fn is_initializing(&self, key: &CacheKey) -> bool {
        self.initializing.lock().get(key) == Some(&thread::current().id())
    }

    /// Marks the slot as initialized by the current thread until the guard is dropped
    #[must_use]
    pub(crate) fn begin(&self, key: &CacheKey) -> Initializing<'_> {
        self.initializing.lock().insert(key.clone(), thread::current().id());
        Initializing { cells: self, key: key.clone() }
    }

    #[inline]
    pub(crate) fn clear(&self) {
        self.cells.lock().clear();
    }
}

pub(crate) struct Initializing<'a> {
    cells: &'a SingletonCells,
    key: CacheKey,
}

impl Drop for Initializing<'_> {
    fn drop(&mut self) {
        self.cells.initializing.lock().remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::{CacheKey, InstanceCache, SingletonCells};
    use crate::{registration::RegistrationId, runtime::activator::Instance};

    use alloc::sync::Arc;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_first_published_wins() {
        let mut cache = InstanceCache::default();
        let key = CacheKey::Static(RegistrationId(0));

        let (first, published) = cache.publish(key.clone(), Arc::new(1_u8) as Instance);
        assert!(published);
        let (second, published) = cache.publish(key.clone(), Arc::new(2_u8) as Instance);
        assert!(!published);

        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&cache.get(&key).unwrap(), &first));

        cache.clear();
        assert!(cache.get(&key).is_none());
    }

    #[test]
    #[traced_test]
    fn test_singleton_cell_is_shared() {
        let cells = SingletonCells::default();
        let key = CacheKey::Static(RegistrationId(3));

        let value = cells.cell(&key).get_or_init(|| Arc::new("db") as Instance).clone();
        let again = cells.cell(&key).get().cloned().unwrap();
        assert!(Arc::ptr_eq(&value, &again));

        cells.clear();
        assert!(cells.cell(&key).get().is_none());
    }

    #[test]
    #[traced_test]
    fn test_initializing_is_per_thread() {
        let cells = Arc::new(SingletonCells::default());
        let key = CacheKey::Static(RegistrationId(1));

        let guard = cells.begin(&key);
        assert!(cells.is_initializing(&key));
        assert!(!cells.is_initializing(&CacheKey::Static(RegistrationId(2))));

        let other = std::thread::spawn({
            let cells = cells.clone();
            let key = key.clone();
            move || cells.is_initializing(&key)
        });
        assert!(!other.join().unwrap());

        drop(guard);
        assert!(!cells.is_initializing(&key));
    }
}
