use std::error::Error;
use std::fmt;

/// Why a [`Context`](crate::Context) stopped being usable.
///
/// This is the only error any lock operation reports: the context supplied by
/// the caller was cancelled before, during, or at the end of the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelError {
    /// The context, or one of its parents, was cancelled through a
    /// [`CancelHandle`](crate::CancelHandle).
    Canceled,
    /// The context's deadline passed.
    DeadlineExceeded,
}

impl CancelError {
    pub fn is_deadline_exceeded(self) -> bool {
        matches!(self, Self::DeadlineExceeded)
    }
}

impl fmt::Display for CancelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Canceled => f.write_str("context canceled"),
            Self::DeadlineExceeded => f.write_str("context deadline exceeded"),
        }
    }
}

impl Error for CancelError {}
