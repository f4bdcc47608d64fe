use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::mount::Mount;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VnodeType {
    Regular,
    Directory,
    Symlink,
    BlockDevice,
    CharDevice,
}

#[derive(Debug)]
pub struct Vnode {
    vtype: VnodeType,
    mount: Option<Arc<Mount>>,
    /// For block devices: the filesystem mounted on the device.
    mounted_fs: Mutex<Option<Arc<Mount>>>,
}

impl Vnode {
    pub fn new(vtype: VnodeType, mount: Option<Arc<Mount>>) -> Arc<Self> {
        Arc::new(Vnode {
            vtype,
            mount,
            mounted_fs: Mutex::new(None),
        })
    }

    pub fn regular(mount: &Arc<Mount>) -> Arc<Self> {
        Self::new(VnodeType::Regular, Some(Arc::clone(mount)))
    }

    pub fn block_device(mount: Option<Arc<Mount>>) -> Arc<Self> {
        Self::new(VnodeType::BlockDevice, mount)
    }

    pub fn vtype(&self) -> VnodeType {
        self.vtype
    }

    pub fn mount(&self) -> Option<&Arc<Mount>> {
        self.mount.as_ref()
    }

    /// Record (or clear) the filesystem mounted on this block device.
    pub fn set_mounted_fs(&self, fs: Option<Arc<Mount>>) {
        *self.mounted_fs.lock() = fs;
    }

    pub fn mounted_fs(&self) -> Option<Arc<Mount>> {
        self.mounted_fs.lock().clone()
    }
}

/// A buffer about to be written.
#[derive(Debug)]
pub struct Buffer {
    blkno: u64,
    vnode: Option<Arc<Vnode>>,
    cow_done: AtomicBool,
}

impl Buffer {
    pub fn new(vnode: Option<Arc<Vnode>>, blkno: u64) -> Self {
        Buffer {
            blkno,
            vnode,
            cow_done: AtomicBool::new(false),
        }
    }

    pub fn blkno(&self) -> u64 {
        self.blkno
    }

    pub fn vnode(&self) -> Option<&Arc<Vnode>> {
        self.vnode.as_ref()
    }

    /// Whether the copy-on-write handlers have already run for this buffer.
    pub fn cow_done(&self) -> bool {
        self.cow_done.load(Ordering::SeqCst)
    }

    pub fn set_cow_done(&self) {
        self.cow_done.store(true, Ordering::SeqCst);
    }

    /// Re-arm the buffer, e.g. after its contents were modified again.
    pub fn clear_cow_done(&self) {
        self.cow_done.store(false, Ordering::SeqCst);
    }

    /// Mount whose handlers apply to this buffer.
    ///
    /// Writes through a block device belong to the filesystem mounted on the
    /// device, not to the mount holding the device node.
    pub fn cow_mount(&self) -> Option<Arc<Mount>> {
        let vnode = self.vnode.as_ref()?;
        match vnode.vtype() {
            VnodeType::BlockDevice => vnode.mounted_fs(),
            _ => vnode.mount().cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regular_buffer_resolves_vnode_mount() {
        let mount = Mount::builder("ffs").build();
        let buf = Buffer::new(Some(Vnode::regular(&mount)), 16);
        assert_eq!(buf.cow_mount().map(|m| m.id()), Some(mount.id()));
    }

    #[test]
    fn test_block_device_redirects_to_mounted_fs() {
        let devfs = Mount::builder("devfs").build();
        let ffs = Mount::builder("ffs").build();
        let dev = Vnode::block_device(Some(Arc::clone(&devfs)));
        let buf = Buffer::new(Some(Arc::clone(&dev)), 0);

        assert!(buf.cow_mount().is_none());
        dev.set_mounted_fs(Some(Arc::clone(&ffs)));
        assert_eq!(buf.cow_mount().map(|m| m.id()), Some(ffs.id()));
    }

    #[test]
    fn test_buffer_without_vnode_has_no_mount() {
        let buf = Buffer::new(None, 3);
        assert!(buf.cow_mount().is_none());
        assert!(!buf.cow_done());
        buf.set_cow_done();
        assert!(buf.cow_done());
        buf.clear_cow_done();
        assert!(!buf.cow_done());
    }
}
