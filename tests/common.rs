use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use fstrans::{Buffer, CowHandler, Fstrans, FstransError, Mount, Result};
use tempfile::TempDir;

/// Get the path to the fstrans binary for testing.
#[allow(dead_code)]
pub fn get_fstrans_path() -> PathBuf {
    assert_cmd::cargo::cargo_bin!("fstrans").to_path_buf()
}

/// Create and attach a plain transactional mount.
#[allow(dead_code)]
pub fn attached(fstrans: &Fstrans, name: &str) -> Arc<Mount> {
    let mount = Mount::builder(name).build();
    fstrans.mount_attach(&mount).expect("Failed to attach mount");
    mount
}

/// Create and attach a mount stacked on `lower`.
#[allow(dead_code)]
pub fn stacked(fstrans: &Fstrans, name: &str, lower: &Arc<Mount>) -> Arc<Mount> {
    let mount = Mount::builder(name).lower(lower).build();
    fstrans.mount_attach(&mount).expect("Failed to attach mount");
    mount
}

/// A copy-on-write handler recording the order in which handlers ran.
#[allow(dead_code)]
pub struct SpyHandler {
    pub calls: Arc<AtomicUsize>,
    pub handler: Arc<dyn CowHandler>,
}

#[allow(dead_code)]
impl SpyHandler {
    pub fn new(name: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Self {
        Self::failing_if(name, log, false)
    }

    pub fn failing(name: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Self {
        Self::failing_if(name, log, true)
    }

    fn failing_if(name: &'static str, log: &Arc<Mutex<Vec<&'static str>>>, fail: bool) -> Self {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler: Arc<dyn CowHandler> = {
            let calls = Arc::clone(&calls);
            let log = Arc::clone(log);
            Arc::new(move |_: &Buffer, _: bool| -> Result<()> {
                calls.fetch_add(1, Ordering::SeqCst);
                log.lock().unwrap().push(name);
                if fail {
                    Err(FstransError::CopyOnWrite(format!("{} failed", name)))
                } else {
                    Ok(())
                }
            })
        };
        SpyHandler { calls, handler }
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

static CONFIG_ENV_LOCK: Mutex<()> = Mutex::new(());

/// Points FSTRANS_CONFIG_DIR at a private temporary directory for the
/// lifetime of the context. Tests touching the variable are serialized.
#[allow(dead_code)]
pub struct TestConfigContext {
    pub temp_dir: TempDir,
    pub config_dir: PathBuf,
    _guard: MutexGuard<'static, ()>,
}

#[allow(dead_code)]
impl TestConfigContext {
    pub fn new() -> Self {
        let guard = CONFIG_ENV_LOCK
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_dir = temp_dir.path().join("config");
        std::env::set_var("FSTRANS_CONFIG_DIR", &config_dir);
        TestConfigContext {
            temp_dir,
            config_dir,
            _guard: guard,
        }
    }

    pub fn write_config(&self, content: &str) {
        std::fs::create_dir_all(&self.config_dir).expect("Failed to create config dir");
        std::fs::write(self.config_dir.join("config.toml"), content)
            .expect("Failed to write config file");
    }
}

impl Drop for TestConfigContext {
    fn drop(&mut self) {
        std::env::remove_var("FSTRANS_CONFIG_DIR");
    }
}
