// ── Cancellation scopes ──────────────────────────────────

use std::fmt;
use std::pin::pin;
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::CancelError;

type Observer = Box<dyn FnOnce() + Send>;

/// Shared cancellation state behind every [`Context`](crate::Context)
/// derived with a cancel handle or a deadline.
///
/// Explicit cancellation is pushed: observers run, async waiters are
/// notified and child scopes are cancelled in turn. Deadlines are pulled:
/// [`CancelScope::err`] compares against the clock, and waiters bound their
/// own sleeps by [`CancelScope::deadline`].
pub(crate) struct CancelScope {
    deadline: Option<Instant>,
    state: Mutex<ScopeState>,
    notify: Notify,
}

#[derive(Default)]
struct ScopeState {
    err: Option<CancelError>,
    next_observer: u64,
    observers: Vec<(u64, Observer)>,
    children: Vec<Weak<CancelScope>>,
}

impl CancelScope {
    pub(crate) fn new(parent: Option<&Arc<CancelScope>>, deadline: Option<Instant>) -> Arc<Self> {
        // A child never outlives its parent's deadline.
        let deadline = match (parent.and_then(|p| p.deadline), deadline) {
            (Some(inherited), Some(own)) => Some(inherited.min(own)),
            (inherited, own) => inherited.or(own),
        };

        let scope = Arc::new(Self {
            deadline,
            state: Mutex::new(ScopeState::default()),
            notify: Notify::new(),
        });

        if let Some(parent) = parent {
            let mut parent_state = parent.state.lock();
            match parent_state.err {
                Some(err) => scope.state.lock().err = Some(err),
                None => {
                    parent_state
                        .children
                        .retain(|child| child.strong_count() > 0);
                    parent_state.children.push(Arc::downgrade(&scope));
                }
            }
        }

        scope
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub(crate) fn err(&self) -> Option<CancelError> {
        let recorded = self.state.lock().err;
        recorded.or_else(|| self.deadline_err())
    }

    fn deadline_err(&self) -> Option<CancelError> {
        match self.deadline {
            Some(deadline) if deadline <= Instant::now() => Some(CancelError::DeadlineExceeded),
            _ => None,
        }
    }

    pub(crate) fn cancel(&self, cause: CancelError) {
        let (err, observers, children) = {
            let mut state = self.state.lock();
            if state.err.is_some() {
                return;
            }
            // A deadline that already passed wins over a late explicit cancel.
            let err = self.deadline_err().unwrap_or(cause);
            state.err = Some(err);
            (
                err,
                std::mem::take(&mut state.observers),
                std::mem::take(&mut state.children),
            )
        };

        tracing::trace!(%err, observers = observers.len(), "cancelling scope");

        self.notify.notify_waiters();
        for (_, observer) in observers {
            observer();
        }
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel(err);
        }
    }

    /// Registers `observer` to run on explicit cancellation. Refuses (without
    /// running it) when the scope is already cancelled or past its deadline.
    fn observe(&self, observer: Observer) -> Result<u64, CancelError> {
        let mut state = self.state.lock();
        if let Some(err) = state.err.or_else(|| self.deadline_err()) {
            return Err(err);
        }
        let id = state.next_observer;
        state.next_observer += 1;
        state.observers.push((id, observer));
        Ok(id)
    }

    fn forget(&self, id: u64) {
        let removed: Vec<(u64, Observer)> = {
            let mut state = self.state.lock();
            let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.observers)
                .into_iter()
                .partition(|(observer_id, _)| *observer_id == id);
            state.observers = kept;
            removed
        };
        // Observer captures are dropped outside the scope lock.
        drop(removed);
    }

    pub(crate) async fn cancelled(&self) -> CancelError {
        loop {
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();

            if let Some(err) = self.err() {
                return err;
            }

            match self.deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = notified => {}
                        _ = tokio::time::sleep_until(deadline.into()) => {}
                    }
                }
                None => notified.await,
            }
        }
    }
}

// ── CancelHandle ─────────────────────────────────────────

/// Cancels the [`Context`](crate::Context) it was created with, and every
/// context derived from it.
///
/// Dropping the handle does not cancel anything.
#[derive(Clone)]
pub struct CancelHandle {
    scope: Arc<CancelScope>,
}

impl CancelHandle {
    pub(crate) fn new(scope: Arc<CancelScope>) -> Self {
        Self { scope }
    }

    /// Cancels the context. Idempotent: the first cause sticks.
    pub fn cancel(&self) {
        self.scope.cancel(CancelError::Canceled);
    }

    pub fn is_cancelled(&self) -> bool {
        self.scope.err().is_some()
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("deadline", &self.scope.deadline)
            .field("err", &self.scope.err())
            .finish()
    }
}

// ── CancelRegistration ───────────────────────────────────

/// Keeps a cancellation observer registered. Dropping it deregisters the
/// observer; an observer that already ran is unaffected.
#[must_use = "dropping the registration deregisters the observer"]
pub struct CancelRegistration {
    slot: Option<(Arc<CancelScope>, u64)>,
}

impl CancelRegistration {
    pub(crate) fn register(
        scope: Option<&Arc<CancelScope>>,
        observer: Observer,
    ) -> Result<Self, CancelError> {
        let Some(scope) = scope else {
            // Nothing can cancel a background context.
            return Ok(Self { slot: None });
        };
        let id = scope.observe(observer)?;
        Ok(Self {
            slot: Some((Arc::clone(scope), id)),
        })
    }
}

impl Drop for CancelRegistration {
    fn drop(&mut self) {
        if let Some((scope, id)) = self.slot.take() {
            scope.forget(id);
        }
    }
}

impl fmt::Debug for CancelRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelRegistration")
            .field("armed", &self.slot.is_some())
            .finish()
    }
}
