use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cancel::{CancelHandle, CancelRegistration, CancelScope};
use crate::CancelError;

/// An immutable call context: a chain of key/value links plus an optional
/// cancellation scope.
///
/// Every derivation (`with_value`, `with_cancel`, `with_deadline`, ...)
/// returns a new `Context` and leaves the receiver untouched, so one context
/// can be shared freely between unrelated call paths. Cloning is two `Arc`
/// bumps.
///
/// Context locks record their reentrancy depth in this chain; pass the
/// context returned by [`ContextLock::acquire`](crate::ContextLock::acquire)
/// down the call stack so nested acquisitions see it.
#[derive(Clone, Default)]
pub struct Context {
    values: Option<Arc<ValueLink>>,
    scope: Option<Arc<CancelScope>>,
}

struct ValueLink {
    key: Box<dyn Any + Send + Sync>,
    value: Box<dyn Any + Send + Sync>,
    parent: Option<Arc<ValueLink>>,
}

impl Context {
    /// The root context: no values, no deadline, never cancelled.
    pub fn background() -> Self {
        Self::default()
    }

    /// Returns a context that answers `value` for `key` and defers every
    /// other lookup to `self`.
    pub fn with_value<K, V>(&self, key: K, value: V) -> Self
    where
        K: Any + PartialEq + Send + Sync,
        V: Any + Send + Sync,
    {
        Self {
            values: Some(Arc::new(ValueLink {
                key: Box::new(key),
                value: Box::new(value),
                parent: self.values.clone(),
            })),
            scope: self.scope.clone(),
        }
    }

    /// Looks up the newest value stored under `key`.
    ///
    /// Returns `None` when the key is absent, or when the newest value for
    /// it is not a `V`.
    pub fn value<K, V>(&self, key: &K) -> Option<&V>
    where
        K: Any + PartialEq,
        V: Any,
    {
        let mut link = self.values.as_deref();
        while let Some(current) = link {
            if current.key.downcast_ref::<K>().is_some_and(|k| k == key) {
                return current.value.downcast_ref::<V>();
            }
            link = current.parent.as_deref();
        }
        None
    }

    /// Derives a context that is cancelled when the returned handle is
    /// cancelled or when `self` is.
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        self.with_scope(None)
    }

    /// Like [`Context::with_cancel`], and additionally expires at `deadline`.
    pub fn with_deadline(&self, deadline: Instant) -> (Self, CancelHandle) {
        self.with_scope(Some(deadline))
    }

    /// Like [`Context::with_deadline`], with the deadline `timeout` from now.
    pub fn with_timeout(&self, timeout: Duration) -> (Self, CancelHandle) {
        self.with_scope(Instant::now().checked_add(timeout))
    }

    fn with_scope(&self, deadline: Option<Instant>) -> (Self, CancelHandle) {
        let scope = CancelScope::new(self.scope.as_ref(), deadline);
        let ctx = Self {
            values: self.values.clone(),
            scope: Some(Arc::clone(&scope)),
        };
        (ctx, CancelHandle::new(scope))
    }

    /// `None` until the context is cancelled, then the reason it was.
    pub fn err(&self) -> Option<CancelError> {
        self.scope.as_ref().and_then(|scope| scope.err())
    }

    pub fn is_cancelled(&self) -> bool {
        self.err().is_some()
    }

    /// The earliest deadline along this context's ancestry.
    pub fn deadline(&self) -> Option<Instant> {
        self.scope.as_ref().and_then(|scope| scope.deadline())
    }

    /// Registers `observer` to run once, on the cancelling thread, when this
    /// context is explicitly cancelled (directly or through a parent).
    ///
    /// Deadline expiry does not run observers; it is only visible through
    /// [`Context::err`], [`Context::deadline`] and [`Context::cancelled`].
    /// Fails without running `observer` if the context is already done.
    pub fn on_cancel<F>(&self, observer: F) -> Result<CancelRegistration, CancelError>
    where
        F: FnOnce() + Send + 'static,
    {
        CancelRegistration::register(self.scope.as_ref(), Box::new(observer))
    }

    /// Resolves once the context is cancelled or its deadline passes. Never
    /// resolves for a context without a cancellation scope.
    ///
    /// Deadlines are timed with `tokio::time`, so this must be polled inside
    /// a tokio runtime when the context has one.
    pub async fn cancelled(&self) -> CancelError {
        match &self.scope {
            Some(scope) => scope.cancelled().await,
            None => std::future::pending().await,
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut values = 0usize;
        let mut link = self.values.as_deref();
        while let Some(current) = link {
            values += 1;
            link = current.parent.as_deref();
        }
        f.debug_struct("Context")
            .field("values", &values)
            .field("deadline", &self.deadline())
            .field("err", &self.err())
            .finish()
    }
}
