use std::sync::Arc;

use super::Fstrans;
use crate::error::{FstransError, Result};
use crate::mount::{Mount, MountInfo, TransState};

impl Fstrans {
    /// Give a newly created mount its transaction state.
    pub fn mount_attach(&self, mount: &Arc<Mount>) -> Result<()> {
        let mut slot = mount.transinfo.lock();
        if slot.is_some() {
            return Err(FstransError::InvalidArgument(format!(
                "mount {} already attached",
                mount.name()
            )));
        }
        if mount.is_gone() {
            return Err(FstransError::Gone(mount.name().to_string()));
        }

        let info = Arc::new(MountInfo::new(mount, Arc::clone(&self.shared.counters)));
        {
            let mut mounts = self.shared.mounts.lock();
            mounts.retain(|m| m.strong_count() > 0);
            mounts.push(Arc::downgrade(&info));
        }
        *slot = Some(info);
        tracing::debug!("Attached transaction state to mount {}", mount.name());
        Ok(())
    }

    /// Tear down a mount's transaction state.
    ///
    /// The record stays allocated until the last binding referencing it is
    /// released by its thread.
    ///
    /// # Panics
    ///
    /// When a thread still holds a transaction on the mount, or the mount is
    /// not in the Normal state.
    pub fn mount_detach(&self, mount: &Arc<Mount>) {
        assert!(!mount.is_dead(), "the dead mount cannot be detached");
        let Some(info) = mount.transinfo.lock().take() else {
            tracing::warn!("Mount {} detached without transaction state", mount.name());
            return;
        };

        {
            let _guard = self.shared.lock.lock();
            assert_eq!(
                info.state(),
                TransState::Normal,
                "detaching suspended mount {}",
                mount.name()
            );
            // Transactions taken through a stacked mount are counted on the
            // binding of the mount below it.
            let idle = self.shared.registry.all_live(|b| match b.target() {
                Some(target) if Arc::ptr_eq(&target.info, &info) => {
                    b.trans_depth() == 0
                        && target.alias.as_ref().map_or(true, |a| a.trans_depth() == 0)
                }
                _ => true,
            });
            assert!(idle, "detaching mount {} with active transactions", mount.name());

            info.mark_gone();
            mount.mark_gone();
            self.shared.counters.mount_gone();
        }

        tracing::debug!(
            "Detached mount {}, {} references remain",
            mount.name(),
            Arc::strong_count(&info) - 1
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_twice_fails() {
        let fstrans = Fstrans::new();
        let mount = Mount::builder("twice").build();
        fstrans.mount_attach(&mount).unwrap();
        assert!(matches!(
            fstrans.mount_attach(&mount),
            Err(FstransError::InvalidArgument(_))
        ));
        fstrans.mount_detach(&mount);
    }

    #[test]
    fn test_detach_without_bindings_frees_immediately() {
        let fstrans = Fstrans::new();
        let baseline = fstrans.live_mount_infos();
        let mount = Mount::builder("short-lived").build();

        fstrans.mount_attach(&mount).unwrap();
        assert_eq!(fstrans.live_mount_infos(), baseline + 1);

        fstrans.mount_detach(&mount);
        assert_eq!(fstrans.live_mount_infos(), baseline);
        assert!(mount.is_gone());
    }

    #[test]
    fn test_start_on_detached_mount_is_gone() {
        let fstrans = Fstrans::new();
        let ctx = fstrans.context();
        let mount = Mount::builder("gone").build();
        fstrans.mount_attach(&mount).unwrap();
        fstrans.mount_detach(&mount);

        assert!(matches!(
            fstrans.start_shared(&ctx, &mount),
            Err(FstransError::Gone(_))
        ));
    }

    #[test]
    fn test_binding_keeps_record_until_swept() {
        let fstrans = Fstrans::new();
        let ctx = fstrans.context();
        let other = fstrans.context();
        let baseline = fstrans.live_mount_infos();

        let mount = Mount::builder("swept").build();
        let unrelated = Mount::builder("unrelated").build();
        fstrans.mount_attach(&mount).unwrap();
        fstrans.mount_attach(&unrelated).unwrap();

        fstrans.start_shared(&ctx, &mount).unwrap();
        fstrans.done(&ctx, &mount);
        fstrans.mount_detach(&mount);
        assert_eq!(fstrans.live_mount_infos(), baseline + 2);
        assert_eq!(fstrans.stats().gone_mount_infos, 1);

        // Any call by the owning thread sweeps its idle bindings.
        fstrans.start_shared(&ctx, &unrelated).unwrap();
        fstrans.done(&ctx, &unrelated);
        assert_eq!(fstrans.live_mount_infos(), baseline + 1);
        assert_eq!(fstrans.stats().gone_mount_infos, 0);

        drop(other);
        fstrans.mount_detach(&unrelated);
    }
}
