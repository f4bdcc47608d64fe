use std::sync::Arc;

use fstrans::{
    Buffer, CowHandler, Fstrans, FstransSnapshot, GenericSuspend, Mount, Result, TransState,
};

/// Build a small topology with one of everything worth seeing, snapshot it,
/// and tear it down again.
///
/// A thread holds a lazy transaction through a stacked mount, a second
/// thread owns the lower mount in the Suspending state, and a handler is
/// established on the lower mount.
fn snapshot_demo(fstrans: &Fstrans) -> Result<FstransSnapshot> {
    let ffs = Mount::builder("ffs0")
        .suspend_control(Arc::new(GenericSuspend::new()))
        .build();
    let null = Mount::builder("null0").lower(&ffs).build();
    let tmpfs = Mount::builder("tmpfs0").build();
    for mount in [&ffs, &null, &tmpfs] {
        fstrans.mount_attach(mount)?;
    }

    let handler: Arc<dyn CowHandler> = Arc::new(|_: &Buffer, _: bool| -> Result<()> { Ok(()) });
    fstrans.cow_establish(&ffs, Arc::clone(&handler))?;

    let worker = fstrans.context();
    let owner = fstrans.context();
    fstrans.start_lazy(&worker, &null)?;
    fstrans.start_shared(&worker, &tmpfs)?;
    fstrans.setstate(&owner, &ffs, TransState::Suspending)?;

    let snapshot = fstrans.dump();

    fstrans.setstate(&owner, &ffs, TransState::Normal)?;
    fstrans.done(&worker, &tmpfs);
    fstrans.done(&worker, &null);
    drop(worker);
    drop(owner);
    fstrans.cow_disestablish(&ffs, &handler)?;
    for mount in [&null, &tmpfs, &ffs] {
        fstrans.mount_detach(mount);
    }
    Ok(snapshot)
}

pub fn print_dump(json: bool, verbose: bool) -> Result<()> {
    let config = fstrans::load_config()?;
    let fstrans = Fstrans::with_config(&config)?;
    let snapshot = snapshot_demo(&fstrans)?;

    if json {
        println!("{}", snapshot.to_json()?);
    } else {
        println!("Snapshot taken at {}", snapshot.taken_at.to_rfc3339());
        print!("{}", snapshot.render(verbose));
    }
    Ok(())
}
