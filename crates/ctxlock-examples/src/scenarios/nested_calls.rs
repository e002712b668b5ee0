use std::sync::Arc;
use std::thread;

use ctxlock::{CancelError, Context, ContextLock};
use parking_lot::Mutex;

use crate::{AnyResult, Config};

/// Accounts guarded by one context lock. `transfer` calls `deposit` twice
/// while holding the lock; both also work when called on their own.
struct Ledger {
    lock: ContextLock,
    balances: Mutex<Vec<i64>>,
}

impl Ledger {
    fn new(accounts: usize) -> Self {
        Self {
            lock: ContextLock::named("demo.ledger"),
            balances: Mutex::new(vec![100; accounts]),
        }
    }

    fn deposit(&self, ctx: &Context, account: usize, amount: i64) -> Result<(), CancelError> {
        let ctx = self.lock.lock(ctx)?;
        tracing::debug!(account, amount, depth = self.lock.depth(&ctx), "deposit");
        self.balances.lock()[account] += amount;
        Ok(())
    }

    fn transfer(
        &self,
        ctx: &Context,
        from: usize,
        to: usize,
        amount: i64,
        hold: std::time::Duration,
    ) -> Result<(), CancelError> {
        let ctx = self.lock.acquire(ctx)?;
        let result = self
            .deposit(&ctx, from, -amount)
            .and_then(|()| {
                thread::sleep(hold);
                self.deposit(&ctx, to, amount)
            });
        self.lock.release(&ctx)?;
        result
    }

    fn total(&self, ctx: &Context) -> Result<i64, CancelError> {
        let _ctx = self.lock.lock(ctx)?;
        Ok(self.balances.lock().iter().sum())
    }
}

pub async fn run(cfg: &Config) -> AnyResult<()> {
    let cfg = *cfg;
    let ledger = Arc::new(Ledger::new(cfg.workers + 1));
    let hold = cfg.hold_per_worker;
    let mut handles = Vec::with_capacity(cfg.workers);

    for worker in 0..cfg.workers {
        let ledger = Arc::clone(&ledger);
        handles.push(tokio::task::spawn_blocking(move || {
            let ctx = Context::background();
            ledger.transfer(&ctx, worker, worker + 1, 10, hold)
        }));
    }

    for (worker, handle) in handles.into_iter().enumerate() {
        match handle.await {
            Ok(Ok(())) => tracing::info!(worker, "transfer done"),
            Ok(Err(err)) => tracing::warn!(worker, %err, "transfer failed"),
            Err(e) => return Err(format!("worker {worker} panicked: {e}")),
        }
    }

    let total = ledger
        .total(&Context::background())
        .map_err(|e| format!("reading total: {e}"))?;
    println!("total balance after {} transfers: {total}", cfg.workers);
    println!("balances: {:?}", *ledger.balances.lock());
    super::print_diagnostics("after transfers");
    Ok(())
}
