//! The transaction coordinator.
//!
//! One [`Fstrans`] instance is one independent subsystem: its own global
//! lock, condition variables, read epoch, binding registry and suspend lock.
//! Threads talk to it through a [`TransactionContext`] obtained from
//! [`Fstrans::context`].

mod coordinator;
mod lifecycle;

pub use coordinator::Transaction;

use parking_lot::{Condvar, Mutex};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::config::Config;
use crate::context::{LocalBinding, TransactionContext};
use crate::epoch::ReadEpoch;
use crate::error::{FstransError, Result};
use crate::mount::{Mount, MountInfo};
use crate::registry::{BindingTarget, ThreadLocalRegistry};
use crate::stats::{Counters, StatsSnapshot};
use crate::suspend::SuspendLock;

pub(crate) struct Shared {
    pub config: Config,
    /// Serializes every mutation of mount records and all blocking waits.
    pub lock: Mutex<()>,
    /// Signalled when a mount state or cow change flag moves.
    pub state_cv: Condvar,
    /// Signalled when a transaction or cow depth drops to zero.
    pub count_cv: Condvar,
    pub epoch: ReadEpoch,
    pub registry: ThreadLocalRegistry,
    pub counters: Arc<Counters>,
    pub suspend_lock: SuspendLock,
    pub dead_mount: Arc<Mount>,
    pub mounts: Mutex<Vec<Weak<MountInfo>>>,
    /// References taken by established cow handlers.
    pub cow_pins: Mutex<Vec<Arc<MountInfo>>>,
    pub recheck: Duration,
}

#[derive(Clone)]
pub struct Fstrans {
    pub(crate) shared: Arc<Shared>,
}

impl Fstrans {
    pub fn new() -> Self {
        Self::build(Config::default())
    }

    pub fn with_config(config: &Config) -> Result<Self> {
        crate::config::validate_config(config)?;
        Ok(Self::build(config.clone()))
    }

    fn build(config: Config) -> Self {
        let counters = Arc::new(Counters::default());
        let dead_mount = Mount::dead();
        let dead_info = Arc::new(MountInfo::new(&dead_mount, Arc::clone(&counters)));
        *dead_mount.transinfo.lock() = Some(Arc::clone(&dead_info));

        let shared = Shared {
            lock: Mutex::new(()),
            state_cv: Condvar::new(),
            count_cv: Condvar::new(),
            epoch: ReadEpoch::new(config.wait.get_grace_spin_limit()),
            registry: ThreadLocalRegistry::new(config.registry.get_binding_cache_limit()),
            counters,
            suspend_lock: SuspendLock::new(),
            dead_mount,
            mounts: Mutex::new(vec![Arc::downgrade(&dead_info)]),
            cow_pins: Mutex::new(Vec::new()),
            recheck: config.wait.get_wait_recheck(),
            config,
        };
        Fstrans {
            shared: Arc::new(shared),
        }
    }

    /// Context for the calling thread. Drop it when the thread exits.
    pub fn context(&self) -> TransactionContext {
        TransactionContext::new(Arc::clone(&self.shared))
    }

    /// The placeholder mount on which every transaction is granted.
    pub fn dead_mount(&self) -> &Arc<Mount> {
        &self.shared.dead_mount
    }

    pub fn registry(&self) -> &ThreadLocalRegistry {
        &self.shared.registry
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.counters.snapshot()
    }

    /// Mount records still allocated, including the dead mount's.
    pub fn live_mount_infos(&self) -> usize {
        self.shared.counters.live_mount_infos()
    }

    fn check_context(&self, ctx: &TransactionContext) {
        assert!(
            Arc::ptr_eq(&ctx.shared, &self.shared),
            "transaction context belongs to a different subsystem"
        );
    }

    /// Find the calling thread's binding for `mount`, allocating it when
    /// `alloc` is set. Stacked mounts resolve to the bottom-most mount's
    /// binding once, at allocation time.
    pub(crate) fn binding_for(
        &self,
        ctx: &TransactionContext,
        mount: &Arc<Mount>,
        alloc: bool,
    ) -> Result<Option<LocalBinding>> {
        self.check_context(ctx);

        if self.shared.counters.gone_mount_infos() > 0 {
            self.sweep_gone(ctx);
        }

        if let Some(local) = ctx.lookup(mount.id()) {
            return Ok(Some(local));
        }
        if !alloc {
            return Ok(None);
        }
        self.alloc_binding(ctx, mount).map(Some)
    }

    fn alloc_binding(&self, ctx: &TransactionContext, mount: &Arc<Mount>) -> Result<LocalBinding> {
        let info = mount
            .info()
            .ok_or_else(|| FstransError::Gone(mount.name().to_string()))?;

        let alias = if mount.lower().is_some() {
            let bottom = mount.resolve_effective_mount();
            let lower = self
                .binding_for(ctx, &bottom, true)?
                .ok_or_else(|| FstransError::Gone(bottom.name().to_string()))?;
            Some(lower)
        } else {
            None
        };

        let binding = self.shared.registry.acquire(ctx.id());
        {
            let _guard = self.shared.lock.lock();
            if info.is_gone() {
                drop(_guard);
                self.shared.registry.release(&binding);
                return Err(FstransError::Gone(mount.name().to_string()));
            }
            if let Some(lower) = &alias {
                lower.binding.add_alias_ref();
            }
            binding.attach(BindingTarget {
                mount: Arc::clone(mount),
                info: Arc::clone(&info),
                alias: alias.as_ref().map(|l| Arc::clone(&l.binding)),
            });
        }

        let local = match alias {
            Some(lower) => LocalBinding {
                binding,
                effective: lower.binding,
                info: lower.info,
            },
            None => LocalBinding {
                effective: Arc::clone(&binding),
                binding,
                info,
            },
        };
        tracing::trace!("Thread {} bound to mount {}", ctx.id(), mount.name());
        ctx.bindings.borrow_mut().insert(mount.id(), local.clone());
        Ok(local)
    }

    /// Release the calling thread's idle bindings on detached mounts.
    ///
    /// Repeats until nothing changes, since releasing a stacked mount's
    /// binding can make its alias target idle.
    fn sweep_gone(&self, ctx: &TransactionContext) {
        loop {
            let victims: Vec<(crate::mount::MountId, LocalBinding)> = ctx
                .bindings
                .borrow()
                .iter()
                .filter(|(_, local)| {
                    local.binding.is_idle()
                        && local
                            .binding
                            .target()
                            .is_some_and(|target| target.info.is_gone())
                })
                .map(|(id, local)| (*id, local.clone()))
                .collect();
            if victims.is_empty() {
                return;
            }

            for (id, local) in victims {
                ctx.bindings.borrow_mut().remove(&id);
                let target = self.shared.registry.release(&local.binding);
                if let Some(alias) = target.as_ref().and_then(|t| t.alias.as_ref()) {
                    alias.drop_alias_ref();
                }
                tracing::debug!(
                    "Released binding of thread {} on detached mount {}",
                    ctx.id(),
                    target.as_ref().map_or("?", |t| t.mount.name())
                );
            }
        }
    }
}

impl Default for Fstrans {
    fn default() -> Self {
        Self::new()
    }
}
