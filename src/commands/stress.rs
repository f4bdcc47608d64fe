use serde::Serialize;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fstrans::{
    Buffer, Config, CowHandler, Fstrans, FstransError, GenericSuspend, LockKind, Mount, Result,
    StatsSnapshot, TransState, TransactionContext, Vnode,
};

pub struct StressOptions {
    pub threads: usize,
    pub iterations: usize,
    pub cycles: usize,
}

#[derive(Debug, Serialize)]
pub struct StressReport {
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub elapsed_ms: u128,
    pub threads: usize,
    pub iterations: usize,
    pub cycles: usize,
    pub transactions: u64,
    pub busy_retries: u64,
    pub cow_copies: u64,
    pub flushes: u64,
    pub suspensions: u64,
    /// Mount records still allocated after teardown, the dead mount's excluded.
    pub leaked_mount_infos: usize,
    pub stats: StatsSnapshot,
}

impl StressReport {
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Stress run: {} threads x {} iterations, {} suspend cycles ({} ms)",
            self.threads, self.iterations, self.cycles, self.elapsed_ms
        );
        let _ = writeln!(out, "  transactions:   {}", self.transactions);
        let _ = writeln!(out, "  busy retries:   {}", self.busy_retries);
        let _ = writeln!(out, "  cow copies:     {}", self.cow_copies);
        let _ = writeln!(out, "  flushes:        {}", self.flushes);
        let _ = writeln!(out, "  suspensions:    {}", self.suspensions);
        let _ = writeln!(
            out,
            "  start fast/slow/busy: {}/{}/{}",
            self.stats.start_fast, self.stats.start_slow, self.stats.start_busy
        );
        let _ = writeln!(
            out,
            "  cow fast/slow:  {}/{}",
            self.stats.cow_fast, self.stats.cow_slow
        );
        if self.leaked_mount_infos == 0 {
            let _ = writeln!(out, "All mount records released.");
        } else {
            let _ = writeln!(
                out,
                "Warning: {} mount records still allocated",
                self.leaked_mount_infos
            );
        }
        out
    }
}

#[derive(Default)]
struct Tally {
    transactions: AtomicU64,
    busy_retries: AtomicU64,
    cow_copies: AtomicU64,
    flushes: AtomicU64,
    suspensions: AtomicU64,
}

fn join<T>(handle: std::thread::JoinHandle<Result<T>>, what: &str) -> Result<T> {
    handle
        .join()
        .map_err(|_| FstransError::InvalidArgument(format!("{} thread panicked", what)))?
}

/// Worker loop: nested transactions through the stacked mount, a buffer
/// write per iteration, and every fourth iteration a non-waiting attempt.
fn worker(
    fstrans: &Fstrans,
    upper: &Arc<Mount>,
    lower: &Arc<Mount>,
    iterations: usize,
    seed: u64,
    tally: &Tally,
) -> Result<()> {
    let ctx = fstrans.context();
    for i in 0..iterations {
        if i % 4 == 3 {
            match fstrans.start_nowait(&ctx, lower) {
                Ok(()) => {
                    fstrans.done(&ctx, lower);
                    tally.transactions.fetch_add(1, Ordering::Relaxed);
                }
                Err(FstransError::Busy) => {
                    tally.busy_retries.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => return Err(e),
            }
            continue;
        }

        let kind = if i % 2 == 0 {
            LockKind::Lazy
        } else {
            LockKind::Shared
        };
        let _outer = fstrans.transaction(&ctx, upper, kind)?;
        let _inner = fstrans.transaction(&ctx, lower, LockKind::Shared)?;

        let buf = Buffer::new(Some(Vnode::regular(upper)), seed * 1_000_000 + i as u64);
        fstrans.cow_run(&ctx, &buf, true)?;
        tally.transactions.fetch_add(1, Ordering::Relaxed);
    }
    Ok(())
}

/// Back out of a suspension that returned without reaching `Suspended`.
fn ensure_suspended(fstrans: &Fstrans, ctx: &TransactionContext, lower: &Arc<Mount>) -> Result<()> {
    let state = fstrans.getstate(lower);
    if state == TransState::Suspended {
        return Ok(());
    }
    if let Err(e) = fstrans.resume(ctx, lower) {
        tracing::warn!("Resume of mount {} failed: {}", lower.name(), e);
    }
    Err(FstransError::Filesystem(format!(
        "mount {} is {} after suspend",
        lower.name(),
        state
    )))
}

fn suspender(fstrans: &Fstrans, lower: &Arc<Mount>, cycles: usize, tally: &Tally) -> Result<()> {
    let ctx = fstrans.context();
    for cycle in 0..cycles {
        fstrans.suspend(&ctx, lower, false)?;
        ensure_suspended(fstrans, &ctx, lower)?;
        tracing::debug!("Suspend cycle {} of {}", cycle + 1, cycles);
        std::thread::sleep(Duration::from_millis(1));
        fstrans.resume(&ctx, lower)?;
        tally.suspensions.fetch_add(1, Ordering::Relaxed);
    }
    Ok(())
}

pub fn run_stress(config: &Config, options: &StressOptions) -> Result<StressReport> {
    if options.threads == 0 {
        return Err(FstransError::InvalidArgument(
            "at least one worker thread is required".to_string(),
        ));
    }

    let fstrans = Fstrans::with_config(config)?;
    let baseline = fstrans.live_mount_infos();
    let tally = Arc::new(Tally::default());

    let flush = {
        let tally = Arc::clone(&tally);
        GenericSuspend::with_flush(move |_mount: &Arc<Mount>| -> Result<()> {
            tally.flushes.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    };
    let lower = Mount::builder("stress-ffs")
        .suspend_control(Arc::new(flush))
        .build();
    let upper = Mount::builder("stress-null").lower(&lower).build();
    fstrans.mount_attach(&lower)?;
    fstrans.mount_attach(&upper)?;

    let handler: Arc<dyn CowHandler> = {
        let tally = Arc::clone(&tally);
        Arc::new(move |_: &Buffer, _: bool| -> Result<()> {
            tally.cow_copies.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    };
    fstrans.cow_establish(&lower, Arc::clone(&handler))?;

    let started_at = chrono::Utc::now();
    let started = Instant::now();

    let workers: Vec<_> = (0..options.threads)
        .map(|n| {
            let fstrans = fstrans.clone();
            let upper = Arc::clone(&upper);
            let lower = Arc::clone(&lower);
            let tally = Arc::clone(&tally);
            let iterations = options.iterations;
            std::thread::spawn(move || {
                worker(&fstrans, &upper, &lower, iterations, n as u64, &tally)
            })
        })
        .collect();

    let suspend_thread = {
        let fstrans = fstrans.clone();
        let lower = Arc::clone(&lower);
        let tally = Arc::clone(&tally);
        let cycles = options.cycles;
        std::thread::spawn(move || suspender(&fstrans, &lower, cycles, &tally))
    };

    let mut first_error = None;
    for handle in workers {
        if let Err(e) = join(handle, "worker") {
            first_error.get_or_insert(e);
        }
    }
    if let Err(e) = join(suspend_thread, "suspender") {
        first_error.get_or_insert(e);
    }
    let elapsed_ms = started.elapsed().as_millis();

    fstrans.cow_disestablish(&lower, &handler)?;
    fstrans.mount_detach(&upper);
    fstrans.mount_detach(&lower);

    if let Some(e) = first_error {
        return Err(e);
    }

    let report = StressReport {
        started_at,
        elapsed_ms,
        threads: options.threads,
        iterations: options.iterations,
        cycles: options.cycles,
        transactions: tally.transactions.load(Ordering::Relaxed),
        busy_retries: tally.busy_retries.load(Ordering::Relaxed),
        cow_copies: tally.cow_copies.load(Ordering::Relaxed),
        flushes: tally.flushes.load(Ordering::Relaxed),
        suspensions: tally.suspensions.load(Ordering::Relaxed),
        leaked_mount_infos: fstrans.live_mount_infos().saturating_sub(baseline),
        stats: fstrans.stats(),
    };
    tracing::info!(
        "Stress run finished: {} transactions, {} suspensions",
        report.transactions,
        report.suspensions
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fstrans::{SuspendCommand, SuspendControl};

    /// Accepts the suspend without changing state and fails the resume.
    struct InertSuspend;

    impl SuspendControl for InertSuspend {
        fn suspend_ctl(
            &self,
            _fstrans: &Fstrans,
            _ctx: &TransactionContext,
            _mount: &Arc<Mount>,
            cmd: SuspendCommand,
        ) -> Result<()> {
            match cmd {
                SuspendCommand::Suspend => Ok(()),
                SuspendCommand::Resume => Err(FstransError::Filesystem("EIO".to_string())),
            }
        }
    }

    #[test]
    fn test_unsuspended_mount_is_resumed_and_reported() {
        let fstrans = Fstrans::new();
        let ctx = fstrans.context();
        let mount = Mount::builder("inert")
            .suspend_control(Arc::new(InertSuspend))
            .build();
        fstrans.mount_attach(&mount).unwrap();

        fstrans.suspend(&ctx, &mount, false).unwrap();
        match ensure_suspended(&fstrans, &ctx, &mount) {
            Err(FstransError::Filesystem(msg)) => {
                assert_eq!(msg, "mount inert is normal after suspend")
            }
            other => panic!("unexpected result: {:?}", other),
        }
        // The failed resume still gives up the suspend lock.
        assert_eq!(fstrans.suspend_holder(), None);
        fstrans.mount_detach(&mount);
    }
}
