//! Copy-on-write handlers run before buffer writes.
//!
//! The handler list of a mount is only mutated after every thread has left
//! [`Fstrans::cow_run`] for that mount; runs entering meanwhile wait until
//! the change is complete.

pub mod buf;

pub use buf::{Buffer, Vnode, VnodeType};

use std::sync::Arc;

use crate::context::TransactionContext;
use crate::error::{FstransError, Result};
use crate::mount::{Mount, MountInfo};
use crate::trans::Fstrans;

/// Interceptor invoked for every buffer written on a mount.
pub trait CowHandler: Send + Sync {
    fn copy_on_write(&self, buf: &Buffer, data_valid: bool) -> Result<()>;
}

impl<F> CowHandler for F
where
    F: Fn(&Buffer, bool) -> Result<()> + Send + Sync,
{
    fn copy_on_write(&self, buf: &Buffer, data_valid: bool) -> Result<()> {
        self(buf, data_valid)
    }
}

fn same_handler(a: &Arc<dyn CowHandler>, b: &Arc<dyn CowHandler>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

impl Fstrans {
    /// Append `handler` to the handlers of `mount` (of its bottom-most mount
    /// when stacked). Handlers run in the order they were established.
    pub fn cow_establish(&self, mount: &Arc<Mount>, handler: Arc<dyn CowHandler>) -> Result<()> {
        assert!(!mount.is_dead(), "copy-on-write handler on the dead mount");
        if !mount.is_transactional() {
            return Err(FstransError::Unsupported);
        }
        let effective = mount.resolve_effective_mount();
        let info = effective
            .info()
            .ok_or_else(|| FstransError::Gone(effective.name().to_string()))?;

        self.shared.cow_pins.lock().push(Arc::clone(&info));

        self.cow_change_enter(&info);
        let result = {
            let mut handlers = info.cow_handlers.write();
            handlers
                .try_reserve(1)
                .map(|()| handlers.push(handler))
                .map_err(|_| FstransError::OutOfMemory)
        };
        let count = info.cow_handlers.read().len();
        self.cow_change_done(&info);

        if result.is_err() {
            self.unpin(&info);
        } else {
            tracing::debug!(
                "Established copy-on-write handler on mount {} ({} total)",
                info.mount_name,
                count
            );
        }
        result
    }

    /// Remove a handler previously established on `mount`.
    pub fn cow_disestablish(
        &self,
        mount: &Arc<Mount>,
        handler: &Arc<dyn CowHandler>,
    ) -> Result<()> {
        let effective = mount.resolve_effective_mount();
        let info = match effective.info() {
            Some(info) => info,
            None => self
                .pinned(&effective)
                .ok_or_else(|| FstransError::Gone(effective.name().to_string()))?,
        };

        self.cow_change_enter(&info);
        let removed = {
            let mut handlers = info.cow_handlers.write();
            match handlers.iter().position(|h| same_handler(h, handler)) {
                Some(index) => {
                    handlers.remove(index);
                    true
                }
                None => false,
            }
        };
        self.cow_change_done(&info);
        self.unpin(&info);

        if removed {
            tracing::debug!(
                "Disestablished copy-on-write handler on mount {}",
                info.mount_name
            );
            Ok(())
        } else {
            Err(FstransError::NotFound)
        }
    }

    /// Run the copy-on-write handlers for a buffer about to be written.
    ///
    /// Handlers run at most once per buffer: the buffer is marked done when
    /// all of them succeeded, and a marked buffer is skipped. The first
    /// handler error stops the run and is returned.
    pub fn cow_run(&self, ctx: &TransactionContext, buf: &Buffer, data_valid: bool) -> Result<()> {
        if buf.cow_done() {
            return Ok(());
        }
        let mount = match buf.cow_mount() {
            Some(mount) if !mount.is_dead() && mount.is_transactional() => mount,
            _ => {
                buf.set_cow_done();
                return Ok(());
            }
        };

        let local = self.effective_binding(ctx, &mount)?;
        let fli = &local.effective;
        let info = &local.info;

        let depth = fli.cow_depth();
        if depth == 0 {
            let entered = {
                let _section = self.shared.epoch.enter();
                if info.cow_changing() {
                    false
                } else {
                    fli.set_cow_depth(1);
                    true
                }
            };
            if entered {
                self.shared.counters.record_cow_fast();
            } else {
                self.shared.counters.record_cow_slow();
                tracing::trace!(
                    "Thread {} waiting for handler change on mount {}",
                    ctx.id(),
                    info.mount_name
                );
                let mut guard = self.shared.lock.lock();
                while info.cow_changing() {
                    self.shared
                        .state_cv
                        .wait_for(&mut guard, self.shared.recheck);
                }
                fli.set_cow_depth(1);
            }
        } else {
            fli.set_cow_depth(depth + 1);
        }

        let handlers = info.cow_handlers.read().clone();
        let mut result = Ok(());
        for handler in &handlers {
            if let Err(e) = handler.copy_on_write(buf, data_valid) {
                result = Err(e);
                break;
            }
        }
        if result.is_ok() {
            buf.set_cow_done();
        }

        let depth = fli.cow_depth();
        if depth > 1 {
            fli.set_cow_depth(depth - 1);
        } else {
            let _guard = self.shared.lock.lock();
            fli.set_cow_depth(0);
            if info.cow_changing() {
                self.shared.count_cv.notify_all();
            }
        }
        result
    }

    /// Number of handlers established on `mount`.
    pub fn cow_handler_count(&self, mount: &Arc<Mount>) -> usize {
        mount
            .resolve_effective_mount()
            .info()
            .map_or(0, |info| info.cow_handlers.read().len())
    }

    /// Block new runs and wait until no thread is running handlers of `info`.
    fn cow_change_enter(&self, info: &Arc<MountInfo>) {
        let mut guard = self.shared.lock.lock();
        while info.cow_changing() {
            self.shared
                .state_cv
                .wait_for(&mut guard, self.shared.recheck);
        }

        info.set_cow_changing(true);
        self.shared.epoch.synchronize();

        while !self
            .shared
            .registry
            .all_live(|b| !b.targets(info) || b.cow_depth() == 0)
        {
            self.shared
                .count_cv
                .wait_for(&mut guard, self.shared.recheck);
        }
    }

    fn cow_change_done(&self, info: &Arc<MountInfo>) {
        let _guard = self.shared.lock.lock();
        info.set_cow_changing(false);
        self.shared.epoch.synchronize();
        self.shared.state_cv.notify_all();
    }

    fn pinned(&self, mount: &Arc<Mount>) -> Option<Arc<MountInfo>> {
        self.shared
            .cow_pins
            .lock()
            .iter()
            .find(|info| info.mount_id == mount.id())
            .cloned()
    }

    fn unpin(&self, info: &Arc<MountInfo>) {
        let released = {
            let mut pins = self.shared.cow_pins.lock();
            pins.iter()
                .position(|p| Arc::ptr_eq(p, info))
                .map(|index| pins.swap_remove(index))
        };
        drop(released);
    }
}
