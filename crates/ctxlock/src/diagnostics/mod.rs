//! Lock contention bookkeeping.
//!
//! With the `diagnostics` feature **disabled**, every hook here is an empty
//! inline function. With it **enabled**, each initialized lock registers a
//! [`LockInfo`] in a global registry that tracks its holder and waiters (with
//! backtraces) and a handful of counters; see [`snapshot_lock_diagnostics`].

#[cfg(feature = "diagnostics")]
mod enabled;
#[cfg(not(feature = "diagnostics"))]
mod disabled;

#[cfg(feature = "diagnostics")]
pub use enabled::{dump_lock_diagnostics, snapshot_lock_diagnostics};
#[cfg(feature = "diagnostics")]
pub(crate) use enabled::{LockInfo, WaiterToken};

#[cfg(not(feature = "diagnostics"))]
pub use disabled::{dump_lock_diagnostics, snapshot_lock_diagnostics};
#[cfg(not(feature = "diagnostics"))]
pub(crate) use disabled::{LockInfo, WaiterToken};
