use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::mount::{MountId, MountInfo};
use crate::registry::Binding;
use crate::trans::Shared;

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a logical thread of execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadId(NonZeroU64);

impl ThreadId {
    fn next() -> Self {
        let raw = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
        ThreadId(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN))
    }

    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(ThreadId)
    }

    pub fn as_u64(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "lwp{}", self.0)
    }
}

/// A binding as cached in its thread's private list.
#[derive(Clone)]
pub(crate) struct LocalBinding {
    /// The binding for the requested mount.
    pub binding: Arc<Binding>,
    /// Where transaction counts live: the alias target for stacked mounts.
    pub effective: Arc<Binding>,
    /// Mount record of `effective`.
    pub info: Arc<MountInfo>,
}

#[derive(Debug, Default)]
struct SignalState {
    pending: AtomicBool,
}

/// Calling-thread state handed to every coordinator operation.
///
/// Dropping the context is thread exit: all its bindings are torn down and
/// returned to the registry's pool.
pub struct TransactionContext {
    pub(crate) shared: Arc<Shared>,
    id: ThreadId,
    pub(crate) bindings: RefCell<FxHashMap<MountId, LocalBinding>>,
    no_block_depth: Cell<u32>,
    reclaim_thread: Cell<bool>,
    pub(crate) bypass_depth: Cell<u32>,
    signal: Arc<SignalState>,
}

impl TransactionContext {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        TransactionContext {
            shared,
            id: ThreadId::next(),
            bindings: RefCell::new(FxHashMap::default()),
            no_block_depth: Cell::new(0),
            reclaim_thread: Cell::new(false),
            bypass_depth: Cell::new(0),
            signal: Arc::new(SignalState::default()),
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Mark the thread as inside an operation that must not block until the
    /// guard is dropped. Transactions started meanwhile are not accounted.
    pub fn enter_no_block(&self) -> NoBlockGuard<'_> {
        self.no_block_depth.set(self.no_block_depth.get() + 1);
        NoBlockGuard { ctx: self }
    }

    /// Designate this thread as the one reclaiming vnodes of dying mounts.
    pub fn set_reclaim_thread(&self, reclaim: bool) {
        self.reclaim_thread.set(reclaim);
    }

    pub fn must_not_block(&self) -> bool {
        self.no_block_depth.get() > 0 || self.reclaim_thread.get()
    }

    /// A handle other threads can use to post a signal to this context.
    pub fn interrupter(&self) -> Interrupter {
        Interrupter {
            signal: Arc::clone(&self.signal),
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn signal_pending(&self) -> bool {
        self.signal.pending.load(Ordering::SeqCst)
    }

    /// Consume a pending signal.
    pub(crate) fn take_signal(&self) -> bool {
        self.signal.pending.swap(false, Ordering::SeqCst)
    }

    /// Number of mounts this thread currently has a binding for.
    pub fn binding_count(&self) -> usize {
        self.bindings.borrow().len()
    }

    pub(crate) fn lookup(&self, mount: MountId) -> Option<LocalBinding> {
        self.bindings.borrow().get(&mount).cloned()
    }
}

impl Drop for TransactionContext {
    fn drop(&mut self) {
        // Unwinding out of a transaction: the bindings stay owned rather
        // than tripping the release checks a second time.
        if std::thread::panicking() {
            return;
        }
        let entries: Vec<LocalBinding> = self.bindings.get_mut().drain().map(|(_, e)| e).collect();
        if entries.is_empty() {
            return;
        }

        for entry in &entries {
            assert_eq!(
                entry.binding.trans_depth(),
                0,
                "thread {} exiting inside a transaction",
                self.id
            );
            assert_eq!(
                entry.binding.cow_depth(),
                0,
                "thread {} exiting inside a copy-on-write run",
                self.id
            );
            if let Some(alias) = entry.binding.target().and_then(|t| t.alias) {
                alias.drop_alias_ref();
            }
        }

        let mut released = Vec::with_capacity(entries.len());
        for entry in &entries {
            released.push(self.shared.registry.release(&entry.binding));
        }
        tracing::trace!(
            "Thread {} exited, released {} bindings",
            self.id,
            released.len()
        );
    }
}

pub struct NoBlockGuard<'a> {
    ctx: &'a TransactionContext,
}

impl Drop for NoBlockGuard<'_> {
    fn drop(&mut self) {
        let depth = self.ctx.no_block_depth.get();
        debug_assert!(depth > 0);
        self.ctx.no_block_depth.set(depth.saturating_sub(1));
    }
}

/// Posts a signal to a context, aborting an interruptible wait in progress.
#[derive(Clone)]
pub struct Interrupter {
    signal: Arc<SignalState>,
    shared: Arc<Shared>,
}

impl Interrupter {
    pub fn interrupt(&self) {
        self.signal.pending.store(true, Ordering::SeqCst);
        // Taking the lock orders the flag before any waiter's next predicate check.
        let _guard = self.shared.lock.lock();
        self.shared.count_cv.notify_all();
        self.shared.state_cv.notify_all();
    }
}
