//! System-wide suspend/resume on top of the coordinator.
//!
//! At most one suspension is in flight at any time. The filesystem's
//! [`SuspendControl`] hook drives the actual state changes.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

use crate::context::{ThreadId, TransactionContext};
use crate::error::{FstransError, Result};
use crate::mount::{Mount, TransState};
use crate::trans::Fstrans;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendCommand {
    Suspend,
    Resume,
}

/// Filesystem hook invoked by [`Fstrans::suspend`] and [`Fstrans::resume`].
///
/// For [`SuspendCommand::Suspend`] the hook is expected to step the mount
/// through Suspending and Suspended with [`Fstrans::setstate`] and quiesce
/// its own I/O. For [`SuspendCommand::Resume`] it returns the mount to Normal.
pub trait SuspendControl: Send + Sync {
    fn suspend_ctl(
        &self,
        fstrans: &Fstrans,
        ctx: &TransactionContext,
        mount: &Arc<Mount>,
        cmd: SuspendCommand,
    ) -> Result<()>;
}

type FlushFn = dyn Fn(&Arc<Mount>) -> Result<()> + Send + Sync;

/// Hook for filesystems that need nothing beyond the state changes,
/// optionally flushing between Suspending and Suspended.
#[derive(Default)]
pub struct GenericSuspend {
    flush: Option<Box<FlushFn>>,
}

impl GenericSuspend {
    pub fn new() -> Self {
        GenericSuspend { flush: None }
    }

    pub fn with_flush<F>(flush: F) -> Self
    where
        F: Fn(&Arc<Mount>) -> Result<()> + Send + Sync + 'static,
    {
        GenericSuspend {
            flush: Some(Box::new(flush)),
        }
    }
}

impl SuspendControl for GenericSuspend {
    fn suspend_ctl(
        &self,
        fstrans: &Fstrans,
        ctx: &TransactionContext,
        mount: &Arc<Mount>,
        cmd: SuspendCommand,
    ) -> Result<()> {
        match cmd {
            SuspendCommand::Suspend => {
                fstrans.setstate(ctx, mount, TransState::Suspending)?;
                let result = match &self.flush {
                    Some(flush) => flush(mount),
                    None => Ok(()),
                }
                .and_then(|()| fstrans.setstate(ctx, mount, TransState::Suspended));

                if let Err(e) = result {
                    if fstrans.getstate(mount) != TransState::Normal {
                        if let Err(revert) = fstrans.setstate(ctx, mount, TransState::Normal) {
                            tracing::warn!(
                                "Failed to return mount {} to normal: {}",
                                mount.name(),
                                revert
                            );
                        }
                    }
                    return Err(e);
                }
                Ok(())
            }
            SuspendCommand::Resume => fstrans.setstate(ctx, mount, TransState::Normal),
        }
    }
}

/// A mutex that stays held between `suspend` and `resume`, across calls.
pub(crate) struct SuspendLock {
    holder: Mutex<Option<ThreadId>>,
    released: Condvar,
}

impl SuspendLock {
    pub fn new() -> Self {
        SuspendLock {
            holder: Mutex::new(None),
            released: Condvar::new(),
        }
    }

    pub fn try_acquire(&self, thread: ThreadId) -> bool {
        let mut holder = self.holder.lock();
        if holder.is_some() {
            return false;
        }
        *holder = Some(thread);
        true
    }

    pub fn acquire(&self, thread: ThreadId) {
        let mut holder = self.holder.lock();
        assert_ne!(*holder, Some(thread), "thread {} suspends twice", thread);
        while holder.is_some() {
            self.released.wait(&mut holder);
        }
        *holder = Some(thread);
    }

    pub fn release(&self, thread: ThreadId) {
        let mut holder = self.holder.lock();
        assert_eq!(
            *holder,
            Some(thread),
            "thread {} resumes without holding the suspend lock",
            thread
        );
        *holder = None;
        self.released.notify_one();
    }

    pub fn holder(&self) -> Option<ThreadId> {
        *self.holder.lock()
    }
}

impl Fstrans {
    /// Suspend `mount` (its bottom-most mount when stacked).
    ///
    /// With `nowait`, fails with [`FstransError::WouldBlock`] if another
    /// suspension is in flight. On success the calling context holds the
    /// suspend lock until it calls [`Fstrans::resume`]. Errors from the
    /// filesystem hook are returned unchanged.
    pub fn suspend(&self, ctx: &TransactionContext, mount: &Arc<Mount>, nowait: bool) -> Result<()> {
        let local = self.effective_binding(ctx, mount)?;
        let effective = local
            .effective
            .target()
            .map(|t| t.mount)
            .ok_or_else(|| FstransError::Gone(mount.name().to_string()))?;

        let lock = &self.shared.suspend_lock;
        if nowait {
            if !lock.try_acquire(ctx.id()) {
                return Err(FstransError::WouldBlock);
            }
        } else {
            lock.acquire(ctx.id());
        }

        let Some(ops) = effective.suspend_ops().cloned() else {
            lock.release(ctx.id());
            return Err(FstransError::Unsupported);
        };

        tracing::debug!("Suspending mount {}", effective.name());
        if let Err(e) = ops.suspend_ctl(self, ctx, &effective, SuspendCommand::Suspend) {
            lock.release(ctx.id());
            tracing::warn!("Suspend of mount {} failed: {}", effective.name(), e);
            return Err(e);
        }

        if mount.is_gone() || effective.is_gone() {
            if let Err(e) = self.resume(ctx, mount) {
                tracing::warn!("Resume of vanished mount {} failed: {}", mount.name(), e);
            }
            return Err(FstransError::Gone(mount.name().to_string()));
        }
        Ok(())
    }

    /// Resume a mount suspended by this context and release the suspend lock.
    ///
    /// # Panics
    ///
    /// When the calling context does not hold the suspend lock.
    pub fn resume(&self, ctx: &TransactionContext, mount: &Arc<Mount>) -> Result<()> {
        let effective = mount.resolve_effective_mount();
        let result = match effective.suspend_ops().cloned() {
            Some(ops) => ops.suspend_ctl(self, ctx, &effective, SuspendCommand::Resume),
            None => Err(FstransError::Unsupported),
        };
        self.shared.suspend_lock.release(ctx.id());

        match &result {
            Ok(()) => tracing::debug!("Resumed mount {}", effective.name()),
            Err(e) => tracing::warn!("Resume of mount {} failed: {}", effective.name(), e),
        }
        result
    }

    /// The thread currently between `suspend` and `resume`, if any.
    pub fn suspend_holder(&self) -> Option<ThreadId> {
        self.shared.suspend_lock.holder()
    }
}
