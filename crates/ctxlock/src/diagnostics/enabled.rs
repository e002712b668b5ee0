// ── Diagnostics-enabled registry ─────────────────────────

use std::backtrace::Backtrace;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;

use crate::{
    LockHolderSnapshot, LockId, LockInfoSnapshot, LockKind, LockSnapshot, LockWaiterSnapshot,
};

static LOCK_REGISTRY: Mutex<Vec<Weak<LockInfo>>> = parking_lot::const_mutex(Vec::new());

struct Waiter {
    id: u64,
    since: Instant,
    backtrace: Backtrace,
}

struct Holder {
    since: Instant,
    backtrace: Backtrace,
}

pub(crate) struct LockInfo {
    name: &'static str,
    id: LockId,
    kind: LockKind,
    next_waiter_id: AtomicU64,
    waiters: Mutex<Vec<Waiter>>,
    holder: Mutex<Option<Holder>>,
    total_acquires: AtomicU64,
    reentrant_acquires: AtomicU64,
    total_releases: AtomicU64,
    cancelled_waits: AtomicU64,
}

impl LockInfo {
    pub(crate) fn new(name: &'static str, id: LockId, kind: LockKind) -> Arc<Self> {
        let info = Arc::new(Self {
            name,
            id,
            kind,
            next_waiter_id: AtomicU64::new(0),
            waiters: Mutex::new(Vec::new()),
            holder: Mutex::new(None),
            total_acquires: AtomicU64::new(0),
            reentrant_acquires: AtomicU64::new(0),
            total_releases: AtomicU64::new(0),
            cancelled_waits: AtomicU64::new(0),
        });
        let mut registry = LOCK_REGISTRY.lock();
        registry.retain(|weak| weak.strong_count() > 0);
        registry.push(Arc::downgrade(&info));
        info
    }

    /// `depth` is the depth the acquiring call path ends up with.
    pub(crate) fn record_acquire(&self, depth: usize) {
        self.total_acquires.fetch_add(1, Ordering::Relaxed);
        if depth > 1 {
            self.reentrant_acquires.fetch_add(1, Ordering::Relaxed);
            return;
        }
        *self.holder.lock() = Some(Holder {
            since: Instant::now(),
            backtrace: Backtrace::force_capture(),
        });
    }

    pub(crate) fn record_release(&self, unlocked: bool) {
        self.total_releases.fetch_add(1, Ordering::Relaxed);
        if unlocked {
            self.holder.lock().take();
        }
    }

    pub(crate) fn record_cancelled_wait(&self) {
        self.cancelled_waits.fetch_add(1, Ordering::Relaxed);
    }

    fn add_waiter(&self) -> u64 {
        let id = self.next_waiter_id.fetch_add(1, Ordering::Relaxed);
        self.waiters.lock().push(Waiter {
            id,
            since: Instant::now(),
            backtrace: Backtrace::force_capture(),
        });
        id
    }

    fn remove_waiter(&self, id: u64) {
        self.waiters.lock().retain(|w| w.id != id);
    }

    fn snapshot(&self, now: Instant) -> LockInfoSnapshot {
        let holder = self.holder.lock().as_ref().map(|h| LockHolderSnapshot {
            held_secs: now.duration_since(h.since).as_secs_f64(),
            backtrace: render_backtrace(&h.backtrace),
        });
        let waiters = self
            .waiters
            .lock()
            .iter()
            .map(|w| LockWaiterSnapshot {
                waiting_secs: now.duration_since(w.since).as_secs_f64(),
                backtrace: render_backtrace(&w.backtrace),
            })
            .collect();

        LockInfoSnapshot {
            name: self.name.to_string(),
            id: self.id.get(),
            kind: self.kind,
            acquires: self.total_acquires.load(Ordering::SeqCst),
            reentrant_acquires: self.reentrant_acquires.load(Ordering::SeqCst),
            releases: self.total_releases.load(Ordering::SeqCst),
            cancelled_waits: self.cancelled_waits.load(Ordering::SeqCst),
            holder,
            waiters,
        }
    }
}

fn render_backtrace(backtrace: &Backtrace) -> Option<String> {
    let text = format!("{backtrace}");
    if text.is_empty() { None } else { Some(text) }
}

// ── WaiterToken (cancellation-safe waiter cleanup) ──────

/// RAII entry in a lock's waiter list. Removed on drop, whether the wait
/// ended in an acquisition, a cancellation, or a dropped future.
pub(crate) struct WaiterToken {
    info: Arc<LockInfo>,
    id: u64,
}

impl WaiterToken {
    pub(crate) fn new(info: &Arc<LockInfo>) -> Self {
        let id = info.add_waiter();
        Self {
            info: Arc::clone(info),
            id,
        }
    }
}

impl Drop for WaiterToken {
    fn drop(&mut self) {
        self.info.remove_waiter(self.id);
    }
}

// ── Public entry points ──────────────────────────────────

/// Snapshot all live context locks.
pub fn snapshot_lock_diagnostics() -> LockSnapshot {
    let live: Vec<Arc<LockInfo>> = LOCK_REGISTRY
        .lock()
        .iter()
        .filter_map(Weak::upgrade)
        .collect();

    let now = Instant::now();
    LockSnapshot {
        locks: live.iter().map(|info| info.snapshot(now)).collect(),
    }
}

/// Snapshot all live context locks and render the non-quiescent ones.
pub fn dump_lock_diagnostics() -> String {
    snapshot_lock_diagnostics().render()
}
