use std::sync::Arc;
use std::thread;

use ctxlock::{Context, ContextLock};
use parking_lot::Mutex;

use crate::{AnyResult, Config};

/// A holder fans work out to threads. Each thread gets a context passed
/// through `reset`, so it waits for the holder instead of running inside
/// its critical section.
pub async fn run(cfg: &Config) -> AnyResult<()> {
    let cfg = *cfg;
    let lock = Arc::new(ContextLock::named("demo.fan_out"));
    let order = Arc::new(Mutex::new(Vec::new()));

    let task = {
        let lock = Arc::clone(&lock);
        let order = Arc::clone(&order);
        tokio::task::spawn_blocking(move || -> AnyResult<()> {
            let ctx = lock
                .acquire(&Context::background())
                .map_err(|e| format!("parent: {e}"))?;
            let forked = lock.reset(&ctx).map_err(|e| format!("reset: {e}"))?;

            thread::scope(|scope| -> AnyResult<()> {
                let workers: Vec<_> = (0..cfg.workers)
                    .map(|worker| {
                        let lock = &lock;
                        let order = &order;
                        let forked = forked.clone();
                        scope.spawn(move || {
                            let ctx = lock.lock(&forked)?;
                            tracing::debug!(worker, depth = lock.depth(&ctx), "worker entered");
                            order.lock().push(format!("worker {worker}"));
                            Ok::<_, ctxlock::CancelError>(())
                        })
                    })
                    .collect();

                thread::sleep(cfg.hold);
                order.lock().push("parent".to_owned());
                super::print_diagnostics("parent holding, workers waiting");
                lock.release(&ctx).map_err(|e| format!("parent: {e}"))?;

                for worker in workers {
                    worker
                        .join()
                        .map_err(|_| "worker panicked".to_owned())?
                        .map_err(|e| format!("worker: {e}"))?;
                }
                Ok(())
            })
        })
    };

    task.await.map_err(|e| format!("scenario panicked: {e}"))??;
    println!("critical sections ran in order: {:?}", *order.lock());
    Ok(())
}
