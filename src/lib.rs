//! Filesystem transactions: per-thread, per-mount bracketing of filesystem
//! operations so that a mount can be suspended, plus copy-on-write handlers
//! run before buffer writes.

pub mod config;
pub mod context;
pub mod cow;
pub mod dump;
mod epoch;
pub mod error;
pub mod mount;
pub mod registry;
pub mod stats;
pub mod suspend;
pub mod trans;

pub use config::get_config_path;
pub use config::load_config;
pub use config::save_config;
pub use config::Config;

pub use context::{Interrupter, NoBlockGuard, ThreadId, TransactionContext};
pub use cow::{Buffer, CowHandler, Vnode, VnodeType};
pub use dump::{BindingDump, FstransSnapshot, MountDump};
pub use error::{FstransError, Result};
pub use mount::{LockKind, Mount, MountBuilder, MountId, TransState};
pub use registry::ThreadLocalRegistry;
pub use stats::{Counters, StatsSnapshot};
pub use suspend::{GenericSuspend, SuspendCommand, SuspendControl};
pub use trans::{Fstrans, Transaction};
