//! A waiter whose context expires must give up on time, not when the holder
//! eventually lets go.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ctxlock::{AsyncContextLock, CancelError, Context, ContextLock};

const WAIT: Duration = Duration::from_millis(10);
const HOLD: Duration = Duration::from_millis(300);

#[test]
fn blocking_waiter_times_out_while_lock_is_held() {
    let lock = ContextLock::named("cancellation.blocking");
    let holder = lock.acquire(&Context::background()).unwrap();

    thread::scope(|s| {
        let releaser = s.spawn(|| {
            thread::sleep(HOLD);
            lock.release(&holder).unwrap();
        });

        let (ctx, _handle) = Context::background().with_timeout(WAIT);
        let started = Instant::now();
        let err = lock.acquire(&ctx).unwrap_err();
        let elapsed = started.elapsed();

        assert_eq!(err, CancelError::DeadlineExceeded);
        assert!(elapsed >= WAIT, "gave up early: {elapsed:?}");
        assert!(elapsed < HOLD, "waited for the holder: {elapsed:?}");
        releaser.join().unwrap();
    });

    assert!(!lock.is_held());
}

#[test]
fn parent_cancellation_reaches_blocked_children() {
    let lock = ContextLock::new();
    let holder = lock.acquire(&Context::background()).unwrap();
    let (parent, handle) = Context::background().with_cancel();

    let errors: Vec<CancelError> = thread::scope(|s| {
        let waiters: Vec<_> = (0..4)
            .map(|i| {
                let (child, _) = parent.with_value("worker", i).with_cancel();
                let lock = &lock;
                s.spawn(move || lock.acquire(&child).unwrap_err())
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        handle.cancel();
        waiters.into_iter().map(|w| w.join().unwrap()).collect()
    });

    assert_eq!(errors, vec![CancelError::Canceled; 4]);
    assert!(lock.is_held());
    lock.release(&holder).unwrap();
}

#[tokio::test]
async fn async_waiter_times_out_while_lock_is_held() {
    let lock = Arc::new(AsyncContextLock::named("cancellation.async"));
    let holder = lock.acquire(&Context::background()).await.unwrap();

    let releaser = {
        let lock = Arc::clone(&lock);
        tokio::spawn(async move {
            tokio::time::sleep(HOLD).await;
            lock.release(&holder).unwrap();
        })
    };

    let (ctx, _handle) = Context::background().with_timeout(WAIT);
    let started = Instant::now();
    let err = lock.acquire(&ctx).await.unwrap_err();
    let elapsed = started.elapsed();

    assert_eq!(err, CancelError::DeadlineExceeded);
    assert!(elapsed >= WAIT, "gave up early: {elapsed:?}");
    assert!(elapsed < HOLD, "waited for the holder: {elapsed:?}");

    releaser.await.unwrap();
    assert!(!lock.is_held());
}
