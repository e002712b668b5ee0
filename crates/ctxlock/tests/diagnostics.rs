//! Lock registry contents with the `diagnostics` feature on and off.
//!
//! Only one of the two tests is compiled per build. A workspace build turns
//! the feature on through `ctxlock-examples`; `cargo test -p ctxlock` leaves
//! it off unless `--features diagnostics` is passed.

use ctxlock::{Context, ContextLock};

#[cfg(not(feature = "diagnostics"))]
#[test]
fn disabled_diagnostics_report_nothing() {
    let lock = ContextLock::named("diagnostics.disabled");
    let held = lock.acquire(&Context::background()).unwrap();

    assert!(ctxlock::snapshot_lock_diagnostics().locks.is_empty());
    assert_eq!(ctxlock::dump_lock_diagnostics(), "");
    lock.release(&held).unwrap();
}

#[cfg(feature = "diagnostics")]
#[test]
fn snapshot_tracks_holder_waiters_and_counters() {
    use std::thread;
    use std::time::Duration;

    use ctxlock::{CancelError, LockKind};

    let lock = ContextLock::named("diagnostics.enabled");
    let outer = lock.acquire(&Context::background()).unwrap();
    let inner = lock.acquire(&outer).unwrap();

    let find = || {
        ctxlock::snapshot_lock_diagnostics()
            .locks
            .into_iter()
            .find(|l| l.id == lock.id().get())
            .expect("lock should be registered")
    };

    thread::scope(|s| {
        let waiter = s.spawn(|| {
            let (ctx, _handle) = Context::background().with_timeout(Duration::from_millis(100));
            lock.acquire(&ctx).unwrap_err()
        });

        thread::sleep(Duration::from_millis(30));
        let during = find();
        assert_eq!(during.name, "diagnostics.enabled");
        assert_eq!(during.kind, LockKind::Blocking);
        assert!(during.holder.is_some());
        assert_eq!(during.waiters.len(), 1);
        assert!(ctxlock::dump_lock_diagnostics().contains("Lock \"diagnostics.enabled\""));

        assert_eq!(waiter.join().unwrap(), CancelError::DeadlineExceeded);
    });

    let after_cancel = find();
    assert!(after_cancel.waiters.is_empty(), "cancelled waiter left an entry");
    assert_eq!(after_cancel.cancelled_waits, 1);
    assert_eq!(after_cancel.acquires, 2);
    assert_eq!(after_cancel.reentrant_acquires, 1);

    lock.release(&inner).unwrap();
    lock.release(&outer).unwrap();

    let released = find();
    assert!(released.holder.is_none());
    assert_eq!(released.releases, 2);
}
