use std::sync::Arc;
use std::time::Duration;

use ctxlock::{AsyncContextLock, CancelError, Context};
use tokio::sync::Mutex;

use crate::{AnyResult, Config};

struct Cache {
    lock: AsyncContextLock,
    entries: Mutex<Vec<String>>,
}

impl Cache {
    async fn refresh(&self, ctx: &Context, worker: usize, hold: Duration) -> Result<(), CancelError> {
        let guard = self.lock.lock(ctx).await?;
        tokio::time::sleep(hold).await;
        self.insert(&guard, format!("entry from worker {worker}")).await
    }

    async fn insert(&self, ctx: &Context, entry: String) -> Result<(), CancelError> {
        let _guard = self.lock.lock(ctx).await?;
        self.entries.lock().await.push(entry);
        Ok(())
    }
}

/// Tokio tasks share an async context lock. Every task uses the demo
/// timeout, so tasks queued behind too many holders give up.
pub async fn run(cfg: &Config) -> AnyResult<()> {
    let cache = Arc::new(Cache {
        lock: AsyncContextLock::named("demo.cache"),
        entries: Mutex::new(Vec::new()),
    });
    let (root, cancel_all) = Context::background().with_cancel();

    let tasks: Vec<_> = (0..cfg.workers)
        .map(|worker| {
            let cache = Arc::clone(&cache);
            let (ctx, _handle) = root.with_timeout(cfg.timeout);
            let hold = cfg.hold_per_worker;
            tokio::spawn(async move { (worker, cache.refresh(&ctx, worker, hold).await) })
        })
        .collect();

    tokio::time::sleep(cfg.timeout / 2).await;
    super::print_diagnostics("mid-run");

    let mut refused = 0;
    for task in tasks {
        let (worker, result) = task.await.map_err(|e| format!("task panicked: {e}"))?;
        match result {
            Ok(()) => tracing::info!(worker, "refreshed"),
            Err(err) => {
                refused += 1;
                tracing::warn!(worker, %err, "refresh abandoned");
            }
        }
    }
    cancel_all.cancel();

    let entries = cache.entries.lock().await;
    println!(
        "{} entries written, {refused} workers gave up: {:?}",
        entries.len(),
        *entries
    );
    println!("lock held after run: {}", cache.lock.is_held());
    Ok(())
}
