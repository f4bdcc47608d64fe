use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Subsystem-wide counters, shared with every [`MountInfo`](crate::mount::MountInfo)
/// so that releasing one can be accounted without a back-reference.
#[derive(Debug, Default)]
pub struct Counters {
    live_mount_infos: AtomicUsize,
    gone_mount_infos: AtomicUsize,
    start_fast: AtomicU64,
    start_slow: AtomicU64,
    start_busy: AtomicU64,
    cow_fast: AtomicU64,
    cow_slow: AtomicU64,
    state_changes: AtomicU64,
    interrupted_changes: AtomicU64,
}

/// Point-in-time copy of [`Counters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub live_mount_infos: usize,
    pub gone_mount_infos: usize,
    pub start_fast: u64,
    pub start_slow: u64,
    pub start_busy: u64,
    pub cow_fast: u64,
    pub cow_slow: u64,
    pub state_changes: u64,
    pub interrupted_changes: u64,
}

impl Counters {
    pub(crate) fn mount_info_created(&self) {
        self.live_mount_infos.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn mount_info_released(&self, was_gone: bool) {
        self.live_mount_infos.fetch_sub(1, Ordering::SeqCst);
        if was_gone {
            self.gone_mount_infos.fetch_sub(1, Ordering::SeqCst);
        }
    }

    pub(crate) fn mount_gone(&self) {
        self.gone_mount_infos.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_start_fast(&self) {
        self.start_fast.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_start_slow(&self) {
        self.start_slow.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_start_busy(&self) {
        self.start_busy.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cow_fast(&self) {
        self.cow_fast.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cow_slow(&self) {
        self.cow_slow.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_state_change(&self, interrupted: bool) {
        self.state_changes.fetch_add(1, Ordering::Relaxed);
        if interrupted {
            self.interrupted_changes.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of mount records not yet freed.
    pub fn live_mount_infos(&self) -> usize {
        self.live_mount_infos.load(Ordering::SeqCst)
    }

    /// Mount records whose mount is detached but which bindings still reference.
    pub fn gone_mount_infos(&self) -> usize {
        self.gone_mount_infos.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            live_mount_infos: self.live_mount_infos(),
            gone_mount_infos: self.gone_mount_infos(),
            start_fast: self.start_fast.load(Ordering::Relaxed),
            start_slow: self.start_slow.load(Ordering::Relaxed),
            start_busy: self.start_busy.load(Ordering::Relaxed),
            cow_fast: self.cow_fast.load(Ordering::Relaxed),
            cow_slow: self.cow_slow.load(Ordering::Relaxed),
            state_changes: self.state_changes.load(Ordering::Relaxed),
            interrupted_changes: self.interrupted_changes.load(Ordering::Relaxed),
        }
    }
}
