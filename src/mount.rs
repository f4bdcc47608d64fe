use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use crate::context::ThreadId;
use crate::cow::CowHandler;
use crate::stats::Counters;
use crate::suspend::SuspendControl;

static NEXT_MOUNT_ID: AtomicU64 = AtomicU64::new(1);

/// Suspension phase of a mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum TransState {
    Normal = 0,
    Suspending = 1,
    Suspended = 2,
}

impl TransState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => TransState::Normal,
            1 => TransState::Suspending,
            _ => TransState::Suspended,
        }
    }

    /// The state one step further along Normal -> Suspending -> Suspended -> Normal.
    pub fn next(self) -> Self {
        match self {
            TransState::Normal => TransState::Suspending,
            TransState::Suspending => TransState::Suspended,
            TransState::Suspended => TransState::Normal,
        }
    }
}

impl std::fmt::Display for TransState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransState::Normal => write!(f, "normal"),
            TransState::Suspending => write!(f, "suspending"),
            TransState::Suspended => write!(f, "suspended"),
        }
    }
}

/// Kind of grant requested by a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum LockKind {
    /// Still granted while the mount is suspending.
    Lazy = 0,
    #[default]
    Shared = 1,
}

impl LockKind {
    pub(crate) fn from_u8(raw: u8) -> Self {
        if raw == LockKind::Lazy as u8 {
            LockKind::Lazy
        } else {
            LockKind::Shared
        }
    }
}

impl std::fmt::Display for LockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockKind::Lazy => write!(f, "lazy"),
            LockKind::Shared => write!(f, "shared"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MountId(u64);

impl MountId {
    fn next() -> Self {
        MountId(NEXT_MOUNT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for MountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mnt{}", self.0)
    }
}

/// A mounted filesystem as seen by the transaction layer.
///
/// The mount owns the subsystem's own reference on its [`MountInfo`] between
/// attach and detach. Stacked mounts point at the mount they are layered on.
pub struct Mount {
    id: MountId,
    name: String,
    lower: Option<Arc<Mount>>,
    transactional: bool,
    dead: bool,
    suspend_ops: Option<Arc<dyn SuspendControl>>,
    gone: AtomicBool,
    pub(crate) transinfo: Mutex<Option<Arc<MountInfo>>>,
}

impl Mount {
    pub fn builder(name: impl Into<String>) -> MountBuilder {
        MountBuilder {
            name: name.into(),
            lower: None,
            transactional: true,
            suspend_ops: None,
        }
    }

    /// The placeholder mount vnodes are moved to when their filesystem goes away.
    pub(crate) fn dead() -> Arc<Mount> {
        Arc::new(Mount {
            id: MountId::next(),
            name: "dead".to_string(),
            lower: None,
            transactional: true,
            dead: true,
            suspend_ops: None,
            gone: AtomicBool::new(false),
            transinfo: Mutex::new(None),
        })
    }

    pub fn id(&self) -> MountId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lower(&self) -> Option<&Arc<Mount>> {
        self.lower.as_ref()
    }

    /// Follow the stacking chain down to the mount that does the real work.
    pub fn resolve_effective_mount(self: &Arc<Self>) -> Arc<Mount> {
        let mut mp = Arc::clone(self);
        while let Some(lower) = mp.lower.clone() {
            mp = lower;
        }
        mp
    }

    pub fn is_transactional(&self) -> bool {
        self.transactional
    }

    pub fn is_dead(&self) -> bool {
        self.dead
    }

    pub fn is_gone(&self) -> bool {
        self.gone.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_gone(&self) {
        self.gone.store(true, Ordering::SeqCst);
    }

    pub(crate) fn suspend_ops(&self) -> Option<&Arc<dyn SuspendControl>> {
        self.suspend_ops.as_ref()
    }

    pub(crate) fn info(&self) -> Option<Arc<MountInfo>> {
        self.transinfo.lock().clone()
    }
}

impl std::fmt::Debug for Mount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mount")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("lower", &self.lower.as_ref().map(|m| m.id))
            .field("transactional", &self.transactional)
            .field("gone", &self.is_gone())
            .finish()
    }
}

pub struct MountBuilder {
    name: String,
    lower: Option<Arc<Mount>>,
    transactional: bool,
    suspend_ops: Option<Arc<dyn SuspendControl>>,
}

impl MountBuilder {
    /// Stack this mount on top of `lower`.
    pub fn lower(mut self, lower: &Arc<Mount>) -> Self {
        self.lower = Some(Arc::clone(lower));
        self
    }

    /// Mounts without transaction support treat start/done as no-ops.
    pub fn transactional(mut self, transactional: bool) -> Self {
        self.transactional = transactional;
        self
    }

    pub fn suspend_control(mut self, ops: Arc<dyn SuspendControl>) -> Self {
        self.suspend_ops = Some(ops);
        self
    }

    pub fn build(self) -> Arc<Mount> {
        Arc::new(Mount {
            id: MountId::next(),
            name: self.name,
            lower: self.lower,
            transactional: self.transactional,
            dead: false,
            suspend_ops: self.suspend_ops,
            gone: AtomicBool::new(false),
            transinfo: Mutex::new(None),
        })
    }
}

/// Per-mount transaction state.
///
/// State, owner and `cow_changing` are written only under the subsystem
/// lock and read lock-free inside read sections. The record is freed once
/// the last holder (the mount or a binding) lets go of it.
pub(crate) struct MountInfo {
    pub mount_id: MountId,
    pub mount_name: String,
    state: AtomicU8,
    owner: AtomicU64,
    gone: AtomicBool,
    cow_changing: AtomicBool,
    pub cow_handlers: RwLock<Vec<Arc<dyn CowHandler>>>,
    counters: Arc<Counters>,
}

impl MountInfo {
    pub fn new(mount: &Mount, counters: Arc<Counters>) -> Self {
        counters.mount_info_created();
        MountInfo {
            mount_id: mount.id(),
            mount_name: mount.name().to_string(),
            state: AtomicU8::new(TransState::Normal as u8),
            owner: AtomicU64::new(0),
            gone: AtomicBool::new(false),
            cow_changing: AtomicBool::new(false),
            cow_handlers: RwLock::new(Vec::new()),
            counters,
        }
    }

    pub fn state(&self) -> TransState {
        TransState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn set_state(&self, state: TransState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub fn owner(&self) -> Option<ThreadId> {
        ThreadId::from_raw(self.owner.load(Ordering::SeqCst))
    }

    pub fn set_owner(&self, owner: Option<ThreadId>) {
        self.owner
            .store(owner.map_or(0, ThreadId::as_u64), Ordering::SeqCst);
    }

    pub fn is_gone(&self) -> bool {
        self.gone.load(Ordering::SeqCst)
    }

    pub fn mark_gone(&self) {
        self.gone.store(true, Ordering::SeqCst);
    }

    pub fn cow_changing(&self) -> bool {
        self.cow_changing.load(Ordering::SeqCst)
    }

    pub fn set_cow_changing(&self, changing: bool) {
        self.cow_changing.store(changing, Ordering::SeqCst);
    }

    /// Whether a transaction of `kind` by `thread` may run in the current state.
    pub fn grants(&self, kind: LockKind, thread: ThreadId) -> bool {
        match self.state() {
            TransState::Normal => true,
            _ if self.owner() == Some(thread) => true,
            TransState::Suspending => kind == LockKind::Lazy,
            TransState::Suspended => false,
        }
    }
}

impl Drop for MountInfo {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            debug_assert_eq!(self.state(), TransState::Normal);
            debug_assert!(self.owner().is_none());
            debug_assert!(self.cow_handlers.get_mut().is_empty());
        }
        tracing::debug!("Releasing transaction state of mount {}", self.mount_name);
        self.counters.mount_info_released(self.is_gone());
    }
}
