// ── Diagnostics-disabled stubs ───────────────────────────

use std::sync::{Arc, Once};

use crate::{LockId, LockKind, LockSnapshot};

pub(crate) const DIAGNOSTICS_ENV: &str = "CTXLOCK_DIAGNOSTICS";

static DIAGNOSTICS_DISABLED_WARNING_ONCE: Once = Once::new();

pub(crate) struct LockInfo;

impl LockInfo {
    #[inline]
    pub(crate) fn new(_name: &'static str, _id: LockId, _kind: LockKind) -> Arc<Self> {
        emit_disabled_diagnostics_warning_once();
        Arc::new(Self)
    }

    #[inline]
    pub(crate) fn record_acquire(&self, _depth: usize) {}

    #[inline]
    pub(crate) fn record_release(&self, _unlocked: bool) {}

    #[inline]
    pub(crate) fn record_cancelled_wait(&self) {}
}

pub(crate) struct WaiterToken;

impl WaiterToken {
    #[inline]
    pub(crate) fn new(_info: &Arc<LockInfo>) -> Self {
        Self
    }
}

#[inline]
pub fn snapshot_lock_diagnostics() -> LockSnapshot {
    LockSnapshot { locks: Vec::new() }
}

#[inline]
pub fn dump_lock_diagnostics() -> String {
    String::new()
}

fn emit_disabled_diagnostics_warning_once() {
    let Some(value) = std::env::var_os(DIAGNOSTICS_ENV) else {
        return;
    };
    if value.to_string_lossy().trim().is_empty() {
        return;
    }

    DIAGNOSTICS_DISABLED_WARNING_ONCE.call_once(|| {
        eprintln!(
            "\n\x1b[1;31m\
======================================================================\n\
 CTXLOCK WARNING: {DIAGNOSTICS_ENV} is set, but ctxlock diagnostics is disabled.\n\
 Lock snapshots and dumps will be empty in this build.\n\
 Enable the `diagnostics` cargo feature of `ctxlock` to track locks.\n\
======================================================================\x1b[0m\n"
        );
    });
}
