use std::fmt;
use std::ops::Deref;
use std::pin::pin;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::depth::{self, LockId};
use crate::diagnostics::{LockInfo, WaiterToken};
use crate::{CancelError, Context, LockKind};

/// The async counterpart of [`ContextLock`](crate::ContextLock).
///
/// Same reentrancy rules, same context encoding; waiting happens on a
/// [`tokio::sync::Notify`] instead of a condvar, raced against
/// [`Context::cancelled`]. Dropping an `acquire` future while it waits
/// leaves the lock untouched.
///
/// Release is synchronous, so guards can release on drop.
pub struct AsyncContextLock {
    name: &'static str,
    shared: OnceLock<Shared>,
}

struct Shared {
    id: LockId,
    held: Mutex<bool>,
    notify: Notify,
    info: Arc<LockInfo>,
}

impl AsyncContextLock {
    pub const fn new() -> Self {
        Self::named("ctxlock-async")
    }

    pub const fn named(name: &'static str) -> Self {
        Self {
            name,
            shared: OnceLock::new(),
        }
    }

    pub fn id(&self) -> LockId {
        self.shared().id
    }

    pub fn is_held(&self) -> bool {
        self.shared.get().is_some_and(|shared| *shared.held.lock())
    }

    pub fn depth(&self, ctx: &Context) -> usize {
        self.shared
            .get()
            .map_or(0, |shared| depth::depth(ctx, shared.id))
    }

    fn shared(&self) -> &Shared {
        self.shared.get_or_init(|| {
            let id = LockId::next();
            tracing::debug!(lock = %id, name = self.name, "initialized async context lock");
            Shared {
                id,
                held: Mutex::new(false),
                notify: Notify::new(),
                info: LockInfo::new(self.name, id, LockKind::Async),
            }
        })
    }

    /// Acquires the lock on behalf of `ctx`'s call path; see
    /// [`ContextLock::acquire`](crate::ContextLock::acquire).
    pub async fn acquire(&self, ctx: &Context) -> Result<Context, CancelError> {
        let shared = self.shared();
        if let Some(err) = ctx.err() {
            return Err(err);
        }

        let depth = depth::depth(ctx, shared.id);
        if depth == 0 {
            shared.take(ctx).await?;
        } else {
            tracing::trace!(lock = %shared.id, depth, "reentrant acquire");
        }

        shared.finish_acquire(ctx, depth)
    }

    /// Releases one level of nesting; see
    /// [`ContextLock::release`](crate::ContextLock::release).
    pub fn release(&self, ctx: &Context) -> Result<Context, CancelError> {
        let Some(shared) = self.shared.get() else {
            return Ok(ctx.clone());
        };

        let depth = depth::depth(ctx, shared.id);
        let unlocked = {
            let mut held = shared.held.lock();
            if depth == 0 && !*held {
                return Ok(ctx.clone());
            }
            let unlocked = depth <= 1;
            if unlocked {
                *held = false;
            }
            unlocked
        };

        if unlocked {
            shared.notify.notify_one();
            tracing::trace!(lock = %shared.id, "released");
        }
        shared.info.record_release(unlocked);

        depth::with_depth(ctx, shared.id, depth.saturating_sub(1))
    }

    /// Clears this lock's depth from `ctx` while the lock is held; see
    /// [`ContextLock::reset`](crate::ContextLock::reset).
    pub fn reset(&self, ctx: &Context) -> Result<Context, CancelError> {
        let shared = self.shared();
        if !*shared.held.lock() {
            return Ok(ctx.clone());
        }
        tracing::trace!(lock = %shared.id, "resetting context depth");
        depth::with_depth(ctx, shared.id, 0)
    }

    /// Acquires the lock and returns a guard that releases it on drop.
    pub async fn lock(&self, ctx: &Context) -> Result<AsyncContextLockGuard<'_>, CancelError> {
        let ctx = self.acquire(ctx).await?;
        Ok(AsyncContextLockGuard { lock: self, ctx })
    }
}

impl Shared {
    fn try_take(&self) -> bool {
        let mut held = self.held.lock();
        if *held {
            return false;
        }
        *held = true;
        true
    }

    async fn take(&self, ctx: &Context) -> Result<(), CancelError> {
        let mut waiter = None;
        loop {
            // Enabled before looking at `held`, so a release in between
            // still wakes this waiter.
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();

            if self.try_take() {
                return Ok(());
            }
            if waiter.is_none() {
                tracing::trace!(lock = %self.id, "waiting for release");
                waiter = Some(WaiterToken::new(&self.info));
            }

            // A pending wake-up wins, so a lock freed by the cancelling
            // path is taken and then rolled back in `finish_acquire`.
            tokio::select! {
                biased;
                _ = notified => {}
                err = ctx.cancelled() => {
                    self.info.record_cancelled_wait();
                    tracing::debug!(lock = %self.id, %err, "wait cancelled");
                    // The wake-up this waiter may have consumed belongs to
                    // someone else now.
                    if !*self.held.lock() {
                        self.notify.notify_one();
                    }
                    return Err(err);
                }
            }
        }
    }

    fn finish_acquire(&self, ctx: &Context, depth: usize) -> Result<Context, CancelError> {
        match depth::with_depth(ctx, self.id, depth + 1) {
            Ok(acquired) => {
                self.info.record_acquire(depth + 1);
                Ok(acquired)
            }
            Err(err) => {
                if depth == 0 {
                    tracing::debug!(lock = %self.id, %err, "context done while acquiring, rolling back");
                    *self.held.lock() = false;
                    self.notify.notify_one();
                }
                Err(err)
            }
        }
    }
}

impl Default for AsyncContextLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AsyncContextLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncContextLock")
            .field("name", &self.name)
            .field("id", &self.shared.get().map(|shared| shared.id))
            .field("held", &self.is_held())
            .finish()
    }
}

// ── AsyncContextLockGuard ────────────────────────────────

/// Guard returned by [`AsyncContextLock::lock`].
#[must_use = "dropping the guard releases the lock"]
pub struct AsyncContextLockGuard<'a> {
    lock: &'a AsyncContextLock,
    ctx: Context,
}

impl AsyncContextLockGuard<'_> {
    pub fn context(&self) -> &Context {
        &self.ctx
    }
}

impl Deref for AsyncContextLockGuard<'_> {
    type Target = Context;

    fn deref(&self) -> &Context {
        &self.ctx
    }
}

impl Drop for AsyncContextLockGuard<'_> {
    fn drop(&mut self) {
        let _ = self.lock.release(&self.ctx);
    }
}

impl fmt::Debug for AsyncContextLockGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncContextLockGuard")
            .field("lock", &self.lock)
            .field("depth", &self.lock.depth(&self.ctx))
            .finish()
    }
}
