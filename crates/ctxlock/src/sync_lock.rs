use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, OnceLock};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::depth::{self, LockId};
use crate::diagnostics::{LockInfo, WaiterToken};
use crate::{CancelError, Context, LockKind};

/// A blocking mutex that lets a call path re-acquire it without deadlocking.
///
/// Ownership is recorded in the [`Context`] rather than in the thread: the
/// context returned by [`ContextLock::acquire`] carries a reference count for
/// this lock, and any acquisition made with that context (or one derived from
/// it) succeeds immediately. Acquisitions with an unrelated context block
/// until the lock is released or their context is cancelled.
///
/// The lock is initialized lazily; [`ContextLock::new`] is `const` and the
/// [`Default`] value is a valid, unheld lock.
///
/// ```
/// use ctxlock::{CancelError, Context, ContextLock};
///
/// struct Store {
///     lock: ContextLock,
/// }
///
/// impl Store {
///     fn put(&self, ctx: &Context) -> Result<(), CancelError> {
///         let ctx = self.lock.lock(ctx)?;
///         // Calling back into a locking method does not deadlock.
///         self.flush(&ctx)
///     }
///
///     fn flush(&self, ctx: &Context) -> Result<(), CancelError> {
///         let _ctx = self.lock.lock(ctx)?;
///         Ok(())
///     }
/// }
///
/// let store = Store { lock: ContextLock::new() };
/// store.put(&Context::background()).unwrap();
/// assert!(!store.lock.is_held());
/// ```
///
/// Reentrancy only holds along one call path. Work handed to another thread
/// must be given a context passed through [`ContextLock::reset`] first, or it
/// would run concurrently with its parent while believing it holds the lock.
pub struct ContextLock {
    name: &'static str,
    shared: OnceLock<Arc<Shared>>,
}

struct Shared {
    id: LockId,
    held: Mutex<bool>,
    cond: Condvar,
    info: Arc<LockInfo>,
}

impl ContextLock {
    pub const fn new() -> Self {
        Self::named("ctxlock")
    }

    /// A lock that reports itself as `name` in diagnostics.
    pub const fn named(name: &'static str) -> Self {
        Self {
            name,
            shared: OnceLock::new(),
        }
    }

    /// This lock's identity. Initializes the lock if needed.
    pub fn id(&self) -> LockId {
        self.shared().id
    }

    pub fn is_held(&self) -> bool {
        self.shared.get().is_some_and(|shared| *shared.held.lock())
    }

    /// How many nested acquisitions of this lock `ctx`'s call path holds.
    pub fn depth(&self, ctx: &Context) -> usize {
        self.shared
            .get()
            .map_or(0, |shared| depth::depth(ctx, shared.id))
    }

    fn shared(&self) -> &Arc<Shared> {
        self.shared.get_or_init(|| {
            let id = LockId::next();
            tracing::debug!(lock = %id, name = self.name, "initialized context lock");
            Arc::new(Shared {
                id,
                held: Mutex::new(false),
                cond: Condvar::new(),
                info: LockInfo::new(self.name, id, LockKind::Blocking),
            })
        })
    }

    /// Acquires the lock on behalf of `ctx`'s call path.
    ///
    /// If `ctx` already holds the lock this returns at once with the depth
    /// bumped. Otherwise it blocks until the lock is free or `ctx` is
    /// cancelled. On success the returned context must be used for nested
    /// calls and for the matching [`ContextLock::release`]; on error nothing
    /// was acquired.
    pub fn acquire(&self, ctx: &Context) -> Result<Context, CancelError> {
        let shared = self.shared();
        let mut held = shared.held.lock();

        if let Some(err) = ctx.err() {
            return Err(err);
        }

        let depth = depth::depth(ctx, shared.id);
        if depth == 0 {
            if *held {
                shared.wait_for_release(&mut held, ctx)?;
            }
            *held = true;
        } else {
            tracing::trace!(lock = %shared.id, depth, "reentrant acquire");
        }

        match depth::with_depth(ctx, shared.id, depth + 1) {
            Ok(acquired) => {
                shared.info.record_acquire(depth + 1);
                Ok(acquired)
            }
            Err(err) => {
                if depth == 0 {
                    tracing::debug!(lock = %shared.id, %err, "context done while acquiring, rolling back");
                    *held = false;
                    shared.cond.notify_one();
                }
                Err(err)
            }
        }
    }

    /// Releases one level of nesting held by `ctx`'s call path.
    ///
    /// The lock is freed, and one waiter woken, when the outermost level is
    /// released. Releasing with a context that never acquired is a no-op. If
    /// `ctx` is cancelled the release still takes effect and the
    /// cancellation is reported.
    pub fn release(&self, ctx: &Context) -> Result<Context, CancelError> {
        let Some(shared) = self.shared.get() else {
            return Ok(ctx.clone());
        };
        let mut held = shared.held.lock();

        let depth = depth::depth(ctx, shared.id);
        if depth == 0 && !*held {
            return Ok(ctx.clone());
        }

        // A held lock released at depth 0 lost track of its depth (e.g.
        // through `reset`); treat it as the outermost release.
        let unlocked = depth <= 1;
        if unlocked {
            *held = false;
            shared.cond.notify_one();
            tracing::trace!(lock = %shared.id, "released");
        }
        shared.info.record_release(unlocked);

        depth::with_depth(ctx, shared.id, depth.saturating_sub(1))
    }

    /// Returns `ctx` with this lock's depth cleared, for handing to work that
    /// runs concurrently with the current holder.
    ///
    /// The lock itself stays held; work started with the returned context has
    /// to acquire it like any other caller and so waits for the holder's
    /// final release. If the lock is not held, `ctx` is returned as is.
    pub fn reset(&self, ctx: &Context) -> Result<Context, CancelError> {
        let shared = self.shared();
        let held = shared.held.lock();
        if !*held {
            return Ok(ctx.clone());
        }
        tracing::trace!(lock = %shared.id, "resetting context depth");
        depth::with_depth(ctx, shared.id, 0)
    }

    /// Acquires the lock and returns a guard that releases it on drop.
    ///
    /// The guard derefs to the acquired [`Context`].
    pub fn lock(&self, ctx: &Context) -> Result<ContextLockGuard<'_>, CancelError> {
        let ctx = self.acquire(ctx)?;
        Ok(ContextLockGuard { lock: self, ctx })
    }
}

impl Shared {
    /// Waits on the condvar until the lock is free. Cancellation of `ctx`
    /// broadcasts the condvar so the wait is re-evaluated.
    fn wait_for_release(
        self: &Arc<Self>,
        held: &mut MutexGuard<'_, bool>,
        ctx: &Context,
    ) -> Result<(), CancelError> {
        let shared = Arc::clone(self);
        let _registration = ctx
            .on_cancel(move || {
                let _held = shared.held.lock();
                shared.cond.notify_all();
            })
            .inspect_err(|_| self.info.record_cancelled_wait())?;
        let _waiter = WaiterToken::new(&self.info);

        tracing::trace!(lock = %self.id, "waiting for release");
        let deadline = ctx.deadline();
        while **held {
            if let Some(err) = ctx.err() {
                self.info.record_cancelled_wait();
                tracing::debug!(lock = %self.id, %err, "wait cancelled");
                return Err(err);
            }
            match deadline {
                Some(deadline) => {
                    self.cond.wait_until(held, deadline);
                }
                None => self.cond.wait(held),
            }
        }
        Ok(())
    }
}

impl Default for ContextLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ContextLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextLock")
            .field("name", &self.name)
            .field("id", &self.shared.get().map(|shared| shared.id))
            .field("held", &self.is_held())
            .finish()
    }
}

// ── ContextLockGuard ─────────────────────────────────────

/// Guard returned by [`ContextLock::lock`]. Derefs to the context that holds
/// the lock; releases one level of nesting on drop.
#[must_use = "dropping the guard releases the lock"]
pub struct ContextLockGuard<'a> {
    lock: &'a ContextLock,
    ctx: Context,
}

impl ContextLockGuard<'_> {
    pub fn context(&self) -> &Context {
        &self.ctx
    }
}

impl Deref for ContextLockGuard<'_> {
    type Target = Context;

    fn deref(&self) -> &Context {
        &self.ctx
    }
}

impl Drop for ContextLockGuard<'_> {
    fn drop(&mut self) {
        // Release takes effect even when the context was cancelled.
        let _ = self.lock.release(&self.ctx);
    }
}

impl fmt::Debug for ContextLockGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextLockGuard")
            .field("lock", &self.lock)
            .field("depth", &self.lock.depth(&self.ctx))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn zero_value_is_unheld_and_release_is_a_no_op() {
        let lock = ContextLock::default();
        assert!(!lock.is_held());

        let ctx = Context::background();
        let released = lock.release(&ctx).unwrap();
        assert_eq!(lock.depth(&released), 0);
        assert!(!lock.is_held());
    }

    #[test]
    fn nested_acquire_does_not_block() {
        let lock = ContextLock::new();
        let root = Context::background();

        let outer = lock.acquire(&root).unwrap();
        assert_eq!(lock.depth(&outer), 1);
        assert!(lock.is_held());

        let inner = lock.acquire(&outer).unwrap();
        assert_eq!(lock.depth(&inner), 2);

        let inner = lock.release(&inner).unwrap();
        assert_eq!(lock.depth(&inner), 1);
        assert!(lock.is_held(), "inner release must not free the lock");

        let outer = lock.release(&outer).unwrap();
        assert_eq!(lock.depth(&outer), 0);
        assert!(!lock.is_held());
    }

    #[test]
    fn release_without_acquire_is_a_no_op() {
        let lock = ContextLock::new();
        let ctx = Context::background();
        let _ = lock.id();

        let after = lock.release(&ctx).unwrap();
        assert_eq!(lock.depth(&after), 0);
        assert!(!lock.is_held());

        // A fresh acquisition still works afterwards.
        let held = lock.acquire(&ctx).unwrap();
        lock.release(&held).unwrap();
        assert!(!lock.is_held());
    }

    #[test]
    fn unrelated_context_waits_for_release() {
        let lock = ContextLock::new();
        let holder = lock.acquire(&Context::background()).unwrap();
        let acquired = AtomicBool::new(false);

        thread::scope(|s| {
            s.spawn(|| {
                let ctx = lock.acquire(&Context::background()).unwrap();
                acquired.store(true, Ordering::SeqCst);
                lock.release(&ctx).unwrap();
            });

            thread::sleep(Duration::from_millis(50));
            assert!(!acquired.load(Ordering::SeqCst), "second path got in");
            lock.release(&holder).unwrap();
        });

        assert!(acquired.load(Ordering::SeqCst));
        assert!(!lock.is_held());
    }

    #[test]
    fn deadline_unblocks_waiter_before_holder_releases() {
        let lock = ContextLock::new();
        let holder = lock.acquire(&Context::background()).unwrap();

        let (ctx, _handle) = Context::background().with_timeout(Duration::from_millis(10));
        let started = Instant::now();
        let err = thread::scope(|s| s.spawn(|| lock.acquire(&ctx)).join().unwrap()).unwrap_err();
        let elapsed = started.elapsed();

        assert_eq!(err, CancelError::DeadlineExceeded);
        assert!(elapsed >= Duration::from_millis(10), "returned too early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(2), "returned too late: {elapsed:?}");
        assert!(lock.is_held(), "the holder must keep the lock");

        lock.release(&holder).unwrap();
        assert!(!lock.is_held());
    }

    #[test]
    fn explicit_cancel_unblocks_waiter() {
        let lock = ContextLock::new();
        let holder = lock.acquire(&Context::background()).unwrap();
        let (ctx, handle) = Context::background().with_cancel();

        let err = thread::scope(|s| {
            let waiter = s.spawn(|| lock.acquire(&ctx));
            thread::sleep(Duration::from_millis(20));
            handle.cancel();
            waiter.join().unwrap()
        })
        .unwrap_err();

        assert_eq!(err, CancelError::Canceled);
        lock.release(&holder).unwrap();

        // The cancelled waiter left nothing behind.
        let again = lock.acquire(&Context::background()).unwrap();
        lock.release(&again).unwrap();
    }

    #[test]
    fn cancelled_context_acquires_nothing() {
        let lock = ContextLock::new();
        let (ctx, handle) = Context::background().with_cancel();
        handle.cancel();

        assert_eq!(lock.acquire(&ctx).unwrap_err(), CancelError::Canceled);
        assert!(!lock.is_held());
    }

    #[test]
    fn release_with_cancelled_context_still_unlocks() {
        let lock = ContextLock::new();
        let (ctx, handle) = Context::background().with_cancel();
        let held = lock.acquire(&ctx).unwrap();

        handle.cancel();
        assert_eq!(lock.release(&held).unwrap_err(), CancelError::Canceled);
        assert!(!lock.is_held());
    }

    #[test]
    fn cancel_landing_as_the_lock_frees_rolls_back_the_hold() {
        let lock = Arc::new(ContextLock::new());
        let holder = lock.acquire(&Context::background()).unwrap();
        let (ctx, handle) = Context::background().with_cancel();

        // Registered before the waiter's own observer, so the lock is free
        // (and the error already set) when the waiter wakes up.
        let _release_on_cancel = {
            let lock = Arc::clone(&lock);
            ctx.on_cancel(move || {
                lock.release(&holder).unwrap();
            })
            .unwrap()
        };

        let waiter = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || lock.acquire(&ctx).map(|_| ()))
        };
        thread::sleep(Duration::from_millis(20));
        handle.cancel();

        assert_eq!(waiter.join().unwrap(), Err(CancelError::Canceled));
        assert!(!lock.is_held(), "cancelled acquire kept the lock");

        let again = lock.acquire(&Context::background()).unwrap();
        lock.release(&again).unwrap();
        assert!(!lock.is_held());
    }

    #[test]
    fn reset_context_contends_like_a_stranger() {
        let lock = ContextLock::new();
        let holder = lock.acquire(&Context::background()).unwrap();
        let forked = lock.reset(&holder).unwrap();
        assert_eq!(lock.depth(&forked), 0);
        assert!(lock.is_held(), "reset must not release");

        let acquired = AtomicBool::new(false);
        thread::scope(|s| {
            s.spawn(|| {
                let ctx = lock.acquire(&forked).unwrap();
                acquired.store(true, Ordering::SeqCst);
                lock.release(&ctx).unwrap();
            });

            thread::sleep(Duration::from_millis(50));
            assert!(!acquired.load(Ordering::SeqCst), "forked work ran under the holder");
            lock.release(&holder).unwrap();
        });
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn reset_on_unheld_lock_returns_context_unchanged() {
        let lock = ContextLock::new();
        let ctx = lock.reset(&Context::background()).unwrap();
        assert_eq!(lock.depth(&ctx), 0);
        assert!(!lock.is_held());
    }

    #[test]
    fn contexts_of_one_lock_do_not_reenter_another() {
        let a = ContextLock::new();
        let b = ContextLock::new();
        assert_ne!(a.id(), b.id());

        let held_a = a.acquire(&Context::background()).unwrap();
        let held_b = b.acquire(&held_a).unwrap();
        assert_eq!(a.depth(&held_b), 1);
        assert_eq!(b.depth(&held_b), 1);

        let (ctx, _handle) = held_a.with_timeout(Duration::from_millis(10));
        assert_eq!(b.acquire(&ctx).unwrap_err(), CancelError::DeadlineExceeded);

        b.release(&held_b).unwrap();
        a.release(&held_a).unwrap();
    }

    #[test]
    fn guard_releases_on_drop() {
        let lock = ContextLock::new();
        {
            let guard = lock.lock(&Context::background()).unwrap();
            let nested = lock.lock(&guard).unwrap();
            assert_eq!(lock.depth(&nested), 2);
            drop(nested);
            assert!(lock.is_held());
        }
        assert!(!lock.is_held());
    }

    #[test]
    fn unrelated_paths_are_mutually_exclusive() {
        const THREADS: usize = 8;
        const ROUNDS: usize = 200;

        let lock = ContextLock::new();
        let inside = AtomicUsize::new(0);
        let barrier = Barrier::new(THREADS);

        thread::scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| {
                    barrier.wait();
                    for _ in 0..ROUNDS {
                        let ctx = lock.acquire(&Context::background()).unwrap();
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        let nested = lock.acquire(&ctx).unwrap();
                        thread::yield_now();
                        lock.release(&nested).unwrap();
                        assert_eq!(inside.fetch_sub(1, Ordering::SeqCst), 1);
                        lock.release(&ctx).unwrap();
                    }
                });
            }
        });

        assert!(!lock.is_held());
    }
}
