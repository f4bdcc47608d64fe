use serde::Serialize;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::context::ThreadId;
use crate::error::Result;
use crate::mount::{LockKind, MountId, TransState};
use crate::stats::StatsSnapshot;
use crate::trans::Fstrans;

#[derive(Debug, Clone, Serialize)]
pub struct BindingDump {
    pub thread: ThreadId,
    pub mount_id: MountId,
    pub mount: String,
    pub trans_depth: u32,
    /// Only meaningful while `trans_depth > 0`.
    pub lock_kind: Option<LockKind>,
    pub cow_depth: u32,
    pub alias_refs: u32,
    pub alias_of: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MountDump {
    pub mount_id: MountId,
    pub mount: String,
    pub state: TransState,
    pub owner: Option<ThreadId>,
    /// Holders of the record: the mount itself, bindings and cow pins.
    pub references: usize,
    pub cow_handlers: usize,
    pub cow_changing: bool,
    pub gone: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FstransSnapshot {
    pub taken_at: chrono::DateTime<chrono::Utc>,
    pub bindings: Vec<BindingDump>,
    pub mounts: Vec<MountDump>,
    pub pooled_bindings: usize,
    pub suspend_holder: Option<ThreadId>,
    pub stats: StatsSnapshot,
}

impl FstransSnapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Human-readable listing, one line per binding and per mount.
    pub fn render(&self, verbose: bool) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Bindings:");
        for b in &self.bindings {
            if !verbose && b.trans_depth == 0 && b.cow_depth == 0 {
                continue;
            }
            let _ = write!(
                out,
                "  {:<8} {:<16} trans {:>3}",
                b.thread.to_string(),
                b.mount,
                b.trans_depth
            );
            if let Some(kind) = b.lock_kind {
                let _ = write!(out, " {}", kind);
            }
            let _ = write!(out, " cow {}", b.cow_depth);
            if let Some(alias) = &b.alias_of {
                let _ = write!(out, " alias {}", alias);
            }
            let _ = writeln!(out);
        }

        let _ = writeln!(out, "Mounts:");
        for m in &self.mounts {
            if !verbose && m.state == TransState::Normal && m.cow_handlers == 0 && !m.gone {
                continue;
            }
            let _ = write!(
                out,
                "  {:<16} state {:<10} refs {:>3} handlers {}",
                m.mount,
                m.state.to_string(),
                m.references,
                m.cow_handlers
            );
            if let Some(owner) = m.owner {
                let _ = write!(out, " owner {}", owner);
            }
            if m.cow_changing {
                let _ = write!(out, " changing");
            }
            if m.gone {
                let _ = write!(out, " gone");
            }
            let _ = writeln!(out);
        }

        let _ = writeln!(
            out,
            "Pooled bindings: {}  live records: {}  gone records: {}",
            self.pooled_bindings, self.stats.live_mount_infos, self.stats.gone_mount_infos
        );
        out
    }
}

impl Fstrans {
    /// Snapshot of every binding and mount record, taken under the subsystem lock.
    pub fn dump(&self) -> FstransSnapshot {
        let _guard = self.shared.lock.lock();

        let mut bindings = Vec::new();
        self.shared.registry.for_each_live(|binding| {
            let (Some(thread), Some(target)) = (binding.owner(), binding.target()) else {
                return;
            };
            let trans_depth = binding.trans_depth();
            bindings.push(BindingDump {
                thread,
                mount_id: target.mount.id(),
                mount: target.mount.name().to_string(),
                trans_depth,
                lock_kind: (trans_depth > 0).then(|| binding.lock_kind()),
                cow_depth: binding.cow_depth(),
                alias_refs: binding.alias_count(),
                alias_of: target
                    .alias
                    .as_ref()
                    .and_then(|a| a.target())
                    .map(|t| t.mount.name().to_string()),
            });
        });
        bindings.sort_by_key(|b| (b.thread, b.mount_id));

        let mut mounts: Vec<MountDump> = self
            .shared
            .mounts
            .lock()
            .iter()
            .filter_map(|weak| weak.upgrade())
            .map(|info| MountDump {
                mount_id: info.mount_id,
                mount: info.mount_name.clone(),
                state: info.state(),
                owner: info.owner(),
                references: Arc::strong_count(&info) - 1,
                cow_handlers: info.cow_handlers.read().len(),
                cow_changing: info.cow_changing(),
                gone: info.is_gone(),
            })
            .collect();
        mounts.sort_by_key(|m| m.mount_id);

        FstransSnapshot {
            taken_at: chrono::Utc::now(),
            bindings,
            mounts,
            pooled_bindings: self.shared.registry.pooled(),
            suspend_holder: self.suspend_holder(),
            stats: self.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mount::Mount;

    #[test]
    fn test_dump_lists_active_binding() {
        let fstrans = Fstrans::new();
        let ctx = fstrans.context();
        let mount = Mount::builder("dumped").build();
        fstrans.mount_attach(&mount).unwrap();

        fstrans.start_lazy(&ctx, &mount).unwrap();
        let snapshot = fstrans.dump();
        fstrans.done(&ctx, &mount);

        let binding = snapshot
            .bindings
            .iter()
            .find(|b| b.mount == "dumped")
            .unwrap();
        assert_eq!(binding.thread, ctx.id());
        assert_eq!(binding.trans_depth, 1);
        assert_eq!(binding.lock_kind, Some(LockKind::Lazy));

        let record = snapshot.mounts.iter().find(|m| m.mount == "dumped").unwrap();
        assert_eq!(record.state, TransState::Normal);
        assert_eq!(record.references, 3);

        assert!(snapshot.render(false).contains("dumped"));
        assert!(snapshot.to_json().unwrap().contains("\"trans_depth\": 1"));
    }

    #[test]
    fn test_render_hides_idle_entries() {
        let fstrans = Fstrans::new();
        let ctx = fstrans.context();
        let mount = Mount::builder("idle").build();
        fstrans.mount_attach(&mount).unwrap();
        assert!(!fstrans.held(&ctx, &mount));

        let snapshot = fstrans.dump();
        assert!(!snapshot.render(false).contains("idle"));
        assert!(snapshot.render(true).contains("idle"));
    }
}
