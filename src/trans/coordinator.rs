use std::sync::Arc;

use super::Fstrans;
use crate::context::{LocalBinding, ThreadId, TransactionContext};
use crate::error::{FstransError, Result};
use crate::mount::{LockKind, Mount, MountInfo, TransState};

/// A running transaction, ended when dropped.
pub struct Transaction<'a> {
    fstrans: &'a Fstrans,
    ctx: &'a TransactionContext,
    mount: &'a Arc<Mount>,
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.fstrans.done(self.ctx, self.mount);
    }
}

impl Fstrans {
    /// Start a transaction on `mount`.
    ///
    /// Nested starts on the same mount (or on mounts stacked over the same
    /// bottom-most mount) only bump the nesting depth. Returns
    /// [`FstransError::Busy`] when the grant is refused and `can_wait` is not set.
    pub fn start(
        &self,
        ctx: &TransactionContext,
        mount: &Arc<Mount>,
        kind: LockKind,
        can_wait: bool,
    ) -> Result<()> {
        if !mount.is_transactional() || mount.is_dead() {
            return Ok(());
        }
        if ctx.must_not_block() {
            ctx.bypass_depth.set(ctx.bypass_depth.get() + 1);
            return Ok(());
        }

        let local = self
            .binding_for(ctx, mount, true)?
            .ok_or_else(|| FstransError::Gone(mount.name().to_string()))?;
        let fli = &local.effective;

        let depth = fli.trans_depth();
        if depth > 0 {
            fli.set_trans_depth(depth + 1);
            return Ok(());
        }

        {
            let _section = self.shared.epoch.enter();
            if local.info.grants(kind, ctx.id()) {
                fli.set_lock_kind(kind);
                fli.set_trans_depth(1);
                self.shared.counters.record_start_fast();
                return Ok(());
            }
        }

        if !can_wait {
            self.shared.counters.record_start_busy();
            return Err(FstransError::Busy);
        }

        self.shared.counters.record_start_slow();
        tracing::trace!(
            "Thread {} waiting for {} grant on mount {} ({})",
            ctx.id(),
            kind,
            mount.name(),
            local.info.state()
        );
        let mut guard = self.shared.lock.lock();
        while !local.info.grants(kind, ctx.id()) {
            self.shared
                .state_cv
                .wait_for(&mut guard, self.shared.recheck);
        }
        fli.set_lock_kind(kind);
        fli.set_trans_depth(1);
        Ok(())
    }

    /// Shared transaction, waiting for the grant.
    pub fn start_shared(&self, ctx: &TransactionContext, mount: &Arc<Mount>) -> Result<()> {
        self.start(ctx, mount, LockKind::Shared, true)
    }

    /// Lazy transaction, waiting for the grant.
    pub fn start_lazy(&self, ctx: &TransactionContext, mount: &Arc<Mount>) -> Result<()> {
        self.start(ctx, mount, LockKind::Lazy, true)
    }

    /// Shared transaction, failing with [`FstransError::Busy`] instead of waiting.
    pub fn start_nowait(&self, ctx: &TransactionContext, mount: &Arc<Mount>) -> Result<()> {
        self.start(ctx, mount, LockKind::Shared, false)
    }

    /// Start a transaction ended by dropping the returned guard.
    pub fn transaction<'a>(
        &'a self,
        ctx: &'a TransactionContext,
        mount: &'a Arc<Mount>,
        kind: LockKind,
    ) -> Result<Transaction<'a>> {
        self.start(ctx, mount, kind, true)?;
        Ok(Transaction {
            fstrans: self,
            ctx,
            mount,
        })
    }

    /// End the innermost transaction on `mount`.
    ///
    /// # Panics
    ///
    /// When the thread holds no transaction on `mount`.
    pub fn done(&self, ctx: &TransactionContext, mount: &Arc<Mount>) {
        if !mount.is_transactional() || mount.is_dead() {
            return;
        }
        if ctx.must_not_block() {
            let depth = ctx.bypass_depth.get();
            debug_assert!(depth > 0, "done without start while not blocking");
            ctx.bypass_depth.set(depth.saturating_sub(1));
            return;
        }

        let local = match self.binding_for(ctx, mount, false) {
            Ok(Some(local)) => local,
            _ => panic!(
                "thread {} ends a transaction on mount {} it never started",
                ctx.id(),
                mount.name()
            ),
        };
        let fli = &local.effective;

        let depth = fli.trans_depth();
        assert!(
            depth > 0,
            "thread {} ends a transaction on mount {} it does not hold",
            ctx.id(),
            mount.name()
        );
        if depth > 1 {
            fli.set_trans_depth(depth - 1);
            return;
        }

        {
            let _section = self.shared.epoch.enter();
            if local.info.state() == TransState::Normal {
                fli.set_trans_depth(0);
                return;
            }
        }

        let _guard = self.shared.lock.lock();
        fli.set_trans_depth(0);
        self.shared.count_cv.notify_all();
    }

    /// Whether the thread is inside a transaction on `mount` or owns it.
    pub fn held(&self, ctx: &TransactionContext, mount: &Arc<Mount>) -> bool {
        if !mount.is_transactional() {
            return false;
        }
        match self.binding_for(ctx, mount, true) {
            Ok(Some(local)) => {
                local.effective.trans_depth() > 0 || local.info.owner() == Some(ctx.id())
            }
            _ => false,
        }
    }

    /// Whether the thread is the exclusive owner of a suspension on `mount`.
    pub fn is_owner(&self, ctx: &TransactionContext, mount: &Arc<Mount>) -> bool {
        if !mount.is_transactional() {
            return false;
        }
        match self.binding_for(ctx, mount, true) {
            Ok(Some(local)) => local.info.owner() == Some(ctx.id()),
            _ => false,
        }
    }

    /// Current suspension state of `mount` (of its bottom-most mount when stacked).
    pub fn getstate(&self, mount: &Arc<Mount>) -> TransState {
        mount
            .resolve_effective_mount()
            .info()
            .map_or(TransState::Normal, |info| info.state())
    }

    /// Move `mount` one step along Normal -> Suspending -> Suspended -> Normal.
    ///
    /// Returning to Normal is allowed from any state. Waits until every
    /// other thread's transaction on the mount is either finished or still
    /// granted under the new state. A signal posted to `ctx` while waiting
    /// aborts the change, leaves the mount Normal and returns
    /// [`FstransError::Interrupted`].
    pub fn setstate(
        &self,
        ctx: &TransactionContext,
        mount: &Arc<Mount>,
        new_state: TransState,
    ) -> Result<()> {
        if !mount.is_transactional() {
            return Err(FstransError::Unsupported);
        }
        let local = self
            .binding_for(ctx, mount, true)?
            .ok_or_else(|| FstransError::Gone(mount.name().to_string()))?;
        let info = &local.info;
        let me = ctx.id();

        let mut guard = self.shared.lock.lock();
        let old_state = info.state();

        if old_state != TransState::Normal && info.owner() != Some(me) {
            return Err(FstransError::Busy);
        }
        if old_state == new_state {
            return Ok(());
        }
        if new_state != TransState::Normal && new_state != old_state.next() {
            return Err(FstransError::InvalidArgument(format!(
                "cannot change mount {} from {} to {}",
                mount.name(),
                old_state,
                new_state
            )));
        }

        if old_state == TransState::Normal {
            info.set_owner(Some(me));
        }
        info.set_state(new_state);
        self.shared.epoch.synchronize();

        let mut interrupted = false;
        while !self.state_change_done(info, me) {
            if ctx.take_signal() {
                interrupted = true;
                break;
            }
            self.shared
                .count_cv
                .wait_for(&mut guard, self.shared.recheck);
        }

        if interrupted {
            info.set_state(TransState::Normal);
            info.set_owner(None);
            self.shared.counters.record_state_change(true);
            self.shared.state_cv.notify_all();
            tracing::warn!(
                "State change of mount {} to {} interrupted, back to normal",
                info.mount_name,
                new_state
            );
            return Err(FstransError::Interrupted);
        }

        if new_state == TransState::Normal {
            info.set_owner(None);
        }
        self.shared.counters.record_state_change(false);
        self.shared.state_cv.notify_all();
        tracing::debug!(
            "Mount {} changed from {} to {} by thread {}",
            info.mount_name,
            old_state,
            new_state,
            me
        );
        Ok(())
    }

    /// No thread other than `me` holds a transaction that the current state
    /// of `info` no longer grants. Called with the subsystem lock held.
    fn state_change_done(&self, info: &Arc<MountInfo>, me: ThreadId) -> bool {
        self.shared.registry.all_live(|binding| {
            if !binding.targets(info) || binding.trans_depth() == 0 {
                return true;
            }
            match binding.owner() {
                Some(thread) if thread == me => true,
                Some(thread) => info.grants(binding.lock_kind(), thread),
                None => true,
            }
        })
    }

    /// The calling thread's binding for the bottom-most mount under `mount`.
    pub(crate) fn effective_binding(
        &self,
        ctx: &TransactionContext,
        mount: &Arc<Mount>,
    ) -> Result<LocalBinding> {
        self.binding_for(ctx, mount, true)?
            .ok_or_else(|| FstransError::Gone(mount.name().to_string()))
    }
}
