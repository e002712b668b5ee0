use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::{CancelError, Context};

static NEXT_LOCK_ID: AtomicU64 = AtomicU64::new(0);

/// Process-unique identity of a context lock.
///
/// Assigned from a counter the first time a lock is used; never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockId(NonZeroU64);

impl LockId {
    pub(crate) fn next() -> Self {
        Self(NonZeroU64::MIN.saturating_add(NEXT_LOCK_ID.fetch_add(1, Ordering::Relaxed)))
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lock#{}", self.0)
    }
}

/// Context key under which a lock stores its depth. Private so that no
/// caller can forge or read a depth through `Context::value`.
#[derive(PartialEq)]
struct DepthKey(LockId);

/// Number of nested acquisitions of `id` held by the call path of `ctx`.
pub(crate) fn depth(ctx: &Context, id: LockId) -> usize {
    ctx.value::<DepthKey, usize>(&DepthKey(id))
        .copied()
        .unwrap_or(0)
}

/// Derives `ctx` with the depth of `id` set to `depth`, unless `ctx` is
/// already cancelled.
pub(crate) fn with_depth(ctx: &Context, id: LockId, depth: usize) -> Result<Context, CancelError> {
    if let Some(err) = ctx.err() {
        return Err(err);
    }
    Ok(ctx.with_value(DepthKey(id), depth))
}
