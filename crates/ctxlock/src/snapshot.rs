// ── Structured snapshot types ────────────────────────────

use std::fmt::Write as _;

/// Snapshot of all tracked context locks.
#[derive(Debug, Clone, Default)]
pub struct LockSnapshot {
    pub locks: Vec<LockInfoSnapshot>,
}

/// Snapshot of a single tracked lock.
#[derive(Debug, Clone)]
pub struct LockInfoSnapshot {
    pub name: String,
    pub id: u64,
    pub kind: LockKind,
    pub acquires: u64,
    pub reentrant_acquires: u64,
    pub releases: u64,
    pub cancelled_waits: u64,
    pub holder: Option<LockHolderSnapshot>,
    pub waiters: Vec<LockWaiterSnapshot>,
}

/// Which flavor of context lock a snapshot describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    Blocking,
    Async,
}

impl std::fmt::Display for LockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockKind::Blocking => write!(f, "blocking"),
            LockKind::Async => write!(f, "async"),
        }
    }
}

/// The call path currently holding a lock.
#[derive(Debug, Clone)]
pub struct LockHolderSnapshot {
    pub held_secs: f64,
    pub backtrace: Option<String>,
}

/// A call path blocked in `acquire`.
#[derive(Debug, Clone)]
pub struct LockWaiterSnapshot {
    pub waiting_secs: f64,
    pub backtrace: Option<String>,
}

impl LockSnapshot {
    /// Human-readable report of every lock that is held or waited on.
    pub fn render(&self) -> String {
        let mut out = String::new();

        for lock in &self.locks {
            // Skip quiescent locks
            if lock.holder.is_none() && lock.waiters.is_empty() {
                continue;
            }

            let _ = writeln!(
                out,
                "Lock \"{}\" ({} lock#{}, acquires={}, reentrant={}, releases={}, cancelled_waits={}):",
                lock.name,
                lock.kind,
                lock.id,
                lock.acquires,
                lock.reentrant_acquires,
                lock.releases,
                lock.cancelled_waits,
            );

            match &lock.holder {
                None => out.push_str("  Holder: (none)\n"),
                Some(holder) => {
                    let _ = writeln!(out, "  Holder: held for {:.3}s", holder.held_secs);
                    format_backtrace(holder.backtrace.as_deref(), &mut out);
                }
            }

            if lock.waiters.is_empty() {
                out.push_str("  Waiters: (none)\n");
            } else {
                let _ = writeln!(out, "  Waiters ({}):", lock.waiters.len());
                for waiter in &lock.waiters {
                    let _ = writeln!(out, "    waiting for {:.3}s", waiter.waiting_secs);
                    format_backtrace(waiter.backtrace.as_deref(), &mut out);
                }
            }
        }

        out
    }
}

fn format_backtrace(backtrace: Option<&str>, out: &mut String) {
    let Some(text) = backtrace else {
        return;
    };
    let mut shown = 0;
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.contains("ctxlock::") || trimmed.starts_with("at ") {
            continue;
        }
        let _ = writeln!(out, "      {trimmed}");
        shown += 1;
        if shown >= 6 {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock(name: &str, holder: bool, waiters: usize) -> LockInfoSnapshot {
        LockInfoSnapshot {
            name: name.to_string(),
            id: 7,
            kind: LockKind::Blocking,
            acquires: 3,
            reentrant_acquires: 1,
            releases: 2,
            cancelled_waits: 0,
            holder: holder.then(|| LockHolderSnapshot {
                held_secs: 1.5,
                backtrace: Some("0: ctxlock::sync_lock::x\n1: app::handler\n   at src/app.rs:3".to_string()),
            }),
            waiters: (0..waiters)
                .map(|_| LockWaiterSnapshot {
                    waiting_secs: 0.25,
                    backtrace: None,
                })
                .collect(),
        }
    }

    #[test]
    fn render_skips_quiescent_locks() {
        let snapshot = LockSnapshot {
            locks: vec![lock("idle", false, 0)],
        };
        assert_eq!(snapshot.render(), "");
    }

    #[test]
    fn render_reports_holder_and_waiters() {
        let snapshot = LockSnapshot {
            locks: vec![lock("store", true, 2)],
        };
        let report = snapshot.render();
        assert!(
            report.starts_with("Lock \"store\" (blocking lock#7, acquires=3, reentrant=1"),
            "unexpected header: {report}"
        );
        assert!(report.contains("  Holder: held for 1.500s\n"));
        assert!(report.contains("      1: app::handler\n"));
        assert!(!report.contains("ctxlock::sync_lock"));
        assert!(report.contains("  Waiters (2):\n"));
    }
}
