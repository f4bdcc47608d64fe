use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use crate::context::ThreadId;
use crate::mount::{LockKind, Mount, MountInfo};

/// What a binding is attached to. Cleared when the binding goes back to the pool.
#[derive(Clone)]
pub(crate) struct BindingTarget {
    pub mount: Arc<Mount>,
    pub info: Arc<MountInfo>,
    /// Binding of the bottom-most mount when `mount` is stacked.
    pub alias: Option<Arc<Binding>>,
}

/// Per-thread, per-mount transaction record.
///
/// Depth counters and the lock kind are written by the owning thread only
/// and read by other threads while they enumerate the registry.
pub(crate) struct Binding {
    owner: AtomicU64,
    trans_depth: AtomicU32,
    lock_kind: AtomicU8,
    cow_depth: AtomicU32,
    alias_count: AtomicU32,
    target: RwLock<Option<BindingTarget>>,
}

impl Binding {
    fn new() -> Self {
        Binding {
            owner: AtomicU64::new(0),
            trans_depth: AtomicU32::new(0),
            lock_kind: AtomicU8::new(LockKind::Shared as u8),
            cow_depth: AtomicU32::new(0),
            alias_count: AtomicU32::new(0),
            target: RwLock::new(None),
        }
    }

    pub fn owner(&self) -> Option<ThreadId> {
        ThreadId::from_raw(self.owner.load(Ordering::SeqCst))
    }

    pub fn is_free(&self) -> bool {
        self.owner().is_none()
    }

    pub fn trans_depth(&self) -> u32 {
        self.trans_depth.load(Ordering::SeqCst)
    }

    pub fn set_trans_depth(&self, depth: u32) {
        self.trans_depth.store(depth, Ordering::SeqCst);
    }

    pub fn lock_kind(&self) -> LockKind {
        LockKind::from_u8(self.lock_kind.load(Ordering::SeqCst))
    }

    pub fn set_lock_kind(&self, kind: LockKind) {
        self.lock_kind.store(kind as u8, Ordering::SeqCst);
    }

    pub fn cow_depth(&self) -> u32 {
        self.cow_depth.load(Ordering::SeqCst)
    }

    pub fn set_cow_depth(&self, depth: u32) {
        self.cow_depth.store(depth, Ordering::SeqCst);
    }

    pub fn alias_count(&self) -> u32 {
        self.alias_count.load(Ordering::SeqCst)
    }

    pub fn add_alias_ref(&self) {
        self.alias_count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn drop_alias_ref(&self) {
        let prev = self.alias_count.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "alias reference count underflow");
    }

    pub fn target(&self) -> Option<BindingTarget> {
        self.target.read().clone()
    }

    pub fn attach(&self, target: BindingTarget) {
        *self.target.write() = Some(target);
    }

    /// True when this binding targets the mount record `info`.
    pub fn targets(&self, info: &Arc<MountInfo>) -> bool {
        self.target
            .read()
            .as_ref()
            .is_some_and(|t| Arc::ptr_eq(&t.info, info))
    }

    /// Nothing references the binding's state any more.
    pub fn is_idle(&self) -> bool {
        self.trans_depth() == 0 && self.cow_depth() == 0 && self.alias_count() == 0
    }

    /// Reset to the zeroed state of a freshly allocated binding.
    fn clear(&self) -> Option<BindingTarget> {
        let target = self.target.write().take();
        self.trans_depth.store(0, Ordering::SeqCst);
        self.cow_depth.store(0, Ordering::SeqCst);
        self.alias_count.store(0, Ordering::SeqCst);
        self.lock_kind.store(LockKind::Shared as u8, Ordering::SeqCst);
        self.owner.store(0, Ordering::SeqCst);
        target
    }
}

/// Process-wide list of all bindings, live and pooled.
///
/// Pooled entries (no owner) are handed out again before new ones are
/// allocated, up to `cache_limit` of them are kept.
pub struct ThreadLocalRegistry {
    bindings: Mutex<Vec<Arc<Binding>>>,
    cache_limit: usize,
}

impl ThreadLocalRegistry {
    pub fn new(cache_limit: usize) -> Self {
        ThreadLocalRegistry {
            bindings: Mutex::new(Vec::new()),
            cache_limit,
        }
    }

    /// Hand out a zeroed binding owned by `thread`.
    pub(crate) fn acquire(&self, thread: ThreadId) -> Arc<Binding> {
        let mut bindings = self.bindings.lock();
        if let Some(binding) = bindings.iter().find(|b| b.is_free()) {
            binding.owner.store(thread.as_u64(), Ordering::SeqCst);
            return Arc::clone(binding);
        }
        let binding = Arc::new(Binding::new());
        binding.owner.store(thread.as_u64(), Ordering::SeqCst);
        bindings.push(Arc::clone(&binding));
        binding
    }

    /// Return a binding to the pool and hand back what it was attached to.
    ///
    /// The target is returned so the caller can drop the mount references
    /// outside the registry lock.
    pub(crate) fn release(&self, binding: &Arc<Binding>) -> Option<BindingTarget> {
        assert!(
            binding.trans_depth() == 0 && binding.cow_depth() == 0,
            "releasing binding with active transaction (depth {}, cow depth {})",
            binding.trans_depth(),
            binding.cow_depth()
        );
        let mut bindings = self.bindings.lock();
        let target = binding.clear();
        let pooled = bindings.iter().filter(|b| b.is_free()).count();
        if pooled > self.cache_limit {
            bindings.retain(|b| !Arc::ptr_eq(b, binding));
        }
        target
    }

    /// Visit every live binding. Called with the subsystem lock held when the
    /// visitor depends on depth counters.
    pub(crate) fn for_each_live(&self, mut f: impl FnMut(&Arc<Binding>)) {
        let bindings = self.bindings.lock();
        for binding in bindings.iter().filter(|b| !b.is_free()) {
            f(binding);
        }
    }

    /// Whether every live binding satisfies `pred`.
    pub(crate) fn all_live(&self, mut pred: impl FnMut(&Arc<Binding>) -> bool) -> bool {
        let bindings = self.bindings.lock();
        bindings.iter().filter(|b| !b.is_free()).all(|b| pred(b))
    }

    pub fn len(&self) -> usize {
        self.bindings.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries sitting in the pool waiting for reuse.
    pub fn pooled(&self) -> usize {
        self.bindings.lock().iter().filter(|b| b.is_free()).count()
    }

    pub fn live(&self) -> usize {
        self.bindings.lock().iter().filter(|b| !b.is_free()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thread(raw: u64) -> ThreadId {
        ThreadId::from_raw(raw).unwrap()
    }

    #[test]
    fn test_acquire_allocates_zeroed_binding() {
        let registry = ThreadLocalRegistry::new(4);
        let binding = registry.acquire(thread(1));

        assert_eq!(binding.owner(), Some(thread(1)));
        assert_eq!(binding.trans_depth(), 0);
        assert_eq!(binding.cow_depth(), 0);
        assert_eq!(binding.alias_count(), 0);
        assert!(binding.target().is_none());
        assert_eq!(registry.live(), 1);
    }

    #[test]
    fn test_released_binding_is_reused() {
        let registry = ThreadLocalRegistry::new(4);
        let first = registry.acquire(thread(1));
        first.set_lock_kind(LockKind::Lazy);
        registry.release(&first);
        assert_eq!(registry.pooled(), 1);

        let second = registry.acquire(thread(2));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.owner(), Some(thread(2)));
        assert_eq!(second.lock_kind(), LockKind::Shared);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_pool_is_bounded_by_cache_limit() {
        let registry = ThreadLocalRegistry::new(1);
        let a = registry.acquire(thread(1));
        let b = registry.acquire(thread(2));
        let c = registry.acquire(thread(3));

        registry.release(&a);
        registry.release(&b);
        registry.release(&c);

        assert_eq!(registry.pooled(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    #[should_panic(expected = "releasing binding with active transaction")]
    fn test_release_with_depth_panics() {
        let registry = ThreadLocalRegistry::new(4);
        let binding = registry.acquire(thread(1));
        binding.set_trans_depth(1);
        registry.release(&binding);
    }
}
