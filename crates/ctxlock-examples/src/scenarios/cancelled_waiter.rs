use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ctxlock::{Context, ContextLock};

use crate::{AnyResult, Config};

/// One call path holds the lock longer than the others are willing to wait.
/// Each waiter gives up with `DeadlineExceeded` once its context expires.
pub async fn run(cfg: &Config) -> AnyResult<()> {
    let cfg = *cfg;
    let lock = Arc::new(ContextLock::named("demo.slow_resource"));

    let holder = {
        let lock = Arc::clone(&lock);
        tokio::task::spawn_blocking(move || -> AnyResult<()> {
            let ctx = lock
                .acquire(&Context::background())
                .map_err(|e| format!("holder: {e}"))?;
            tracing::info!(hold_ms = cfg.hold.as_millis() as u64, "holder acquired");
            thread::sleep(cfg.hold);
            lock.release(&ctx).map_err(|e| format!("holder: {e}"))?;
            tracing::info!("holder released");
            Ok(())
        })
    };

    while !lock.is_held() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let mut waiters = Vec::with_capacity(cfg.workers);
    for waiter in 0..cfg.workers {
        let lock = Arc::clone(&lock);
        waiters.push(tokio::task::spawn_blocking(move || {
            let (ctx, _handle) = Context::background().with_timeout(cfg.timeout);
            let started = Instant::now();
            let result = lock.acquire(&ctx).and_then(|acquired| lock.release(&acquired));
            (waiter, started.elapsed(), result.map(|_| ()))
        }));
    }

    tokio::time::sleep(cfg.timeout / 2).await;
    super::print_diagnostics("while waiting");

    for handle in waiters {
        let (waiter, elapsed, result) = handle
            .await
            .map_err(|e| format!("waiter panicked: {e}"))?;
        match result {
            Ok(()) => println!("waiter {waiter} acquired after {elapsed:?}"),
            Err(err) => println!("waiter {waiter} gave up after {elapsed:?}: {err}"),
        }
    }

    holder
        .await
        .map_err(|e| format!("holder panicked: {e}"))??;
    super::print_diagnostics("after holder released");
    Ok(())
}
