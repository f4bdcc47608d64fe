mod common;

use std::sync::mpsc;
use std::sync::Arc;

use common::{attached, stacked};
use fstrans::{Fstrans, FstransError, TransState};

#[test]
fn test_record_freed_after_detach_and_thread_exit() {
    let fstrans = Fstrans::new();
    let mount = attached(&fstrans, "short");
    let before = fstrans.live_mount_infos();

    let (started_tx, started_rx) = mpsc::channel();
    let (detached_tx, detached_rx) = mpsc::channel::<()>();
    let worker = {
        let fstrans = fstrans.clone();
        let mount = Arc::clone(&mount);
        std::thread::spawn(move || {
            let ctx = fstrans.context();
            fstrans.start_shared(&ctx, &mount).unwrap();
            fstrans.start_lazy(&ctx, &mount).unwrap();
            fstrans.done(&ctx, &mount);
            fstrans.done(&ctx, &mount);
            started_tx.send(()).unwrap();
            detached_rx.recv().unwrap();
        })
    };

    started_rx.recv().unwrap();
    fstrans.mount_detach(&mount);
    // The worker's binding still references the record.
    assert_eq!(fstrans.live_mount_infos(), before);
    assert_eq!(fstrans.stats().gone_mount_infos, 1);

    detached_tx.send(()).unwrap();
    worker.join().unwrap();
    assert_eq!(fstrans.live_mount_infos(), before - 1);
    assert_eq!(fstrans.stats().gone_mount_infos, 0);
}

#[test]
fn test_context_drop_returns_bindings_to_pool() {
    let fstrans = Fstrans::new();
    let a = attached(&fstrans, "a");
    let b = attached(&fstrans, "b");

    let ctx = fstrans.context();
    fstrans.start_shared(&ctx, &a).unwrap();
    fstrans.done(&ctx, &a);
    fstrans.start_shared(&ctx, &b).unwrap();
    fstrans.done(&ctx, &b);
    assert_eq!(ctx.binding_count(), 2);
    assert_eq!(fstrans.registry().live(), 2);

    drop(ctx);
    assert_eq!(fstrans.registry().live(), 0);
    assert_eq!(fstrans.registry().pooled(), 2);

    // A new thread reuses pooled bindings instead of growing the registry.
    let ctx = fstrans.context();
    fstrans.start_shared(&ctx, &a).unwrap();
    fstrans.done(&ctx, &a);
    assert_eq!(fstrans.registry().len(), 2);
}

#[test]
fn test_sweep_releases_stacked_bindings_in_order() {
    let fstrans = Fstrans::new();
    let ctx = fstrans.context();
    let baseline = fstrans.live_mount_infos();
    let lower = attached(&fstrans, "lower");
    let upper = stacked(&fstrans, "upper", &lower);
    let other = attached(&fstrans, "other");

    fstrans.start_shared(&ctx, &upper).unwrap();
    fstrans.done(&ctx, &upper);
    assert_eq!(ctx.binding_count(), 2);

    fstrans.mount_detach(&upper);
    fstrans.mount_detach(&lower);
    assert_eq!(fstrans.stats().gone_mount_infos, 2);

    // The lower binding is aliased until the upper one is released; one
    // lookup clears both.
    assert!(!fstrans.held(&ctx, &other));
    assert_eq!(ctx.binding_count(), 1);
    assert_eq!(fstrans.live_mount_infos(), baseline + 1);
    assert_eq!(fstrans.stats().gone_mount_infos, 0);

    drop(ctx);
    fstrans.mount_detach(&other);
    assert_eq!(fstrans.live_mount_infos(), baseline);
}

#[test]
fn test_reattaching_a_detached_mount_fails() {
    let fstrans = Fstrans::new();
    let mount = attached(&fstrans, "once");
    fstrans.mount_detach(&mount);
    assert!(matches!(
        fstrans.mount_attach(&mount),
        Err(FstransError::Gone(_))
    ));
}

#[test]
#[should_panic(expected = "with active transactions")]
fn test_detach_with_running_transaction_panics() {
    let fstrans = Fstrans::new();
    let ctx = fstrans.context();
    let mount = attached(&fstrans, "in-use");
    fstrans.start_shared(&ctx, &mount).unwrap();
    fstrans.mount_detach(&mount);
}

#[test]
#[should_panic(expected = "with active transactions")]
fn test_detach_stacked_mount_with_transaction_through_it_panics() {
    let fstrans = Fstrans::new();
    let ctx = fstrans.context();
    let lower = attached(&fstrans, "lower");
    let upper = stacked(&fstrans, "upper", &lower);
    fstrans.start_shared(&ctx, &upper).unwrap();
    fstrans.mount_detach(&upper);
}

#[test]
fn test_detach_idle_stacked_mount_keeps_lower_usable() {
    let fstrans = Fstrans::new();
    let ctx = fstrans.context();
    let lower = attached(&fstrans, "lower");
    let upper = stacked(&fstrans, "upper", &lower);
    fstrans.start_shared(&ctx, &upper).unwrap();
    fstrans.done(&ctx, &upper);

    fstrans.mount_detach(&upper);
    fstrans.start_shared(&ctx, &lower).unwrap();
    assert!(fstrans.held(&ctx, &lower));
    fstrans.done(&ctx, &lower);
    assert!(!fstrans.held(&ctx, &lower));
}

#[test]
#[should_panic(expected = "detaching suspended mount")]
fn test_detach_suspended_mount_panics() {
    let fstrans = Fstrans::new();
    let ctx = fstrans.context();
    let mount = attached(&fstrans, "frozen");
    fstrans
        .setstate(&ctx, &mount, TransState::Suspending)
        .unwrap();
    fstrans.mount_detach(&mount);
}

#[test]
#[should_panic(expected = "exiting inside a transaction")]
fn test_thread_exit_inside_transaction_panics() {
    let fstrans = Fstrans::new();
    let mount = attached(&fstrans, "leaked");
    let ctx = fstrans.context();
    fstrans.start_shared(&ctx, &mount).unwrap();
    drop(ctx);
}
