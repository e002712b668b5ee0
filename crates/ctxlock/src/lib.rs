//! Context-aware reentrant locks.
//!
//! A [`ContextLock`] can be requested again, without blocking, by any caller
//! further down a call stack that already holds it. Which call stack holds
//! the lock is not tracked by thread: it is recorded as a reference count in
//! the immutable [`Context`] that callers pass down explicitly. Every waiter
//! also watches its context, so all blocked callers resume with a
//! [`CancelError`] once their context is cancelled or its deadline passes.
//!
//! The typical use is a set of methods that need mutual exclusion, where some
//! of them are called both directly (and must take the lock) and from other
//! locked methods (and must not deadlock on it):
//!
//! ```
//! use ctxlock::{CancelError, Context, ContextLock};
//!
//! #[derive(Default)]
//! struct Foo {
//!     lock: ContextLock,
//! }
//!
//! impl Foo {
//!     fn one(&self, ctx: &Context) -> Result<(), CancelError> {
//!         let ctx = self.lock.acquire(ctx)?;
//!         // ...do things...
//!         let result = self.two(&ctx);
//!         // ...lock is still held here
//!         self.lock.release(&ctx)?;
//!         result
//!     }
//!
//!     fn two(&self, ctx: &Context) -> Result<(), CancelError> {
//!         let ctx = self.lock.acquire(ctx)?;
//!         // ...do different things...
//!         self.lock.release(&ctx)?;
//!         Ok(())
//!     }
//! }
//!
//! let foo = Foo::default();
//! foo.one(&Context::background()).unwrap();
//! foo.two(&Context::background()).unwrap();
//! ```
//!
//! When `two` is called directly its release frees the lock. When `one`
//! calls it, the lock stays held until `one` releases too. This works to any
//! depth, as long as the nested calls share the context's call path. Work
//! started on another thread or task must get its context from
//! [`ContextLock::reset`], otherwise it would consider itself a holder.
//!
//! [`ContextLock::lock`] returns a guard that releases on drop, and
//! [`AsyncContextLock`] offers the same semantics to tokio tasks.
//!
//! ## Diagnostics
//!
//! With the `diagnostics` feature, every lock registers itself in a global
//! registry; [`dump_lock_diagnostics`] reports holders and waiters with
//! backtraces. Without it those functions return empty results.

mod async_lock;
mod cancel;
mod context;
mod depth;
mod diagnostics;
mod error;
mod snapshot;
mod sync_lock;

pub use async_lock::{AsyncContextLock, AsyncContextLockGuard};
pub use cancel::{CancelHandle, CancelRegistration};
pub use context::Context;
pub use depth::LockId;
pub use diagnostics::{dump_lock_diagnostics, snapshot_lock_diagnostics};
pub use error::CancelError;
pub use snapshot::{
    LockHolderSnapshot, LockInfoSnapshot, LockKind, LockSnapshot, LockWaiterSnapshot,
};
pub use sync_lock::{ContextLock, ContextLockGuard};
