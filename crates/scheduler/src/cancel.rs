//! Cancellation flags and request status
//!
//! Cancellation is cooperative: it sets a flag that the worker checks
//! before starting backend work and again before publishing a result. A
//! backend call that is already running is never interrupted.

use std::sync::{
    atomic::{AtomicBool, AtomicU8, Ordering},
    Arc,
};

/// Cancellation token for one render request
///
/// Clones share the same flag.
///
/// # Example
///
/// ```
/// use pageport_scheduler::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_side = token.clone();
///
/// token.cancel();
/// assert!(worker_side.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new, non-cancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel this token and all of its clones
    ///
    /// Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check if this token has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Lifecycle of a single render request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestStatus {
    /// Waiting in the queue
    Queued,

    /// Backend call in progress
    Running,

    /// Rendered and inserted into the page cache
    Completed,

    /// The backend reported an error
    Failed,

    /// Superseded before its result could be published
    Cancelled,
}

impl RequestStatus {
    fn to_u8(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Running => 1,
            Self::Completed => 2,
            Self::Failed => 3,
            Self::Cancelled => 4,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Queued,
            1 => Self::Running,
            2 => Self::Completed,
            3 => Self::Failed,
            _ => Self::Cancelled,
        }
    }

    /// Whether the request will not change state again
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// State shared between a queued request, its handles and the worker
#[derive(Debug)]
pub(crate) struct RequestShared {
    pub(crate) token: CancellationToken,
    status: AtomicU8,
}

impl RequestShared {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            token: CancellationToken::new(),
            status: AtomicU8::new(RequestStatus::Queued.to_u8()),
        })
    }

    /// Raw status, ignoring a pending cancellation flag
    pub(crate) fn raw_status(&self) -> RequestStatus {
        RequestStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Status as observed from outside
    ///
    /// A request whose token is set but which has not finished yet already
    /// reports `Cancelled`: its result will be discarded.
    pub(crate) fn status(&self) -> RequestStatus {
        let status = self.raw_status();
        if !status.is_terminal() && self.token.is_cancelled() {
            RequestStatus::Cancelled
        } else {
            status
        }
    }

    /// Neither cancelled nor finished
    pub(crate) fn is_live(&self) -> bool {
        !self.token.is_cancelled() && !self.raw_status().is_terminal()
    }

    pub(crate) fn set_status(&self, status: RequestStatus) {
        self.status.store(status.to_u8(), Ordering::Release);
    }

    /// Move a live request to `Cancelled`
    ///
    /// Returns `true` only for the call that performed the transition, so
    /// each request is counted as cancelled at most once.
    pub(crate) fn mark_cancelled(&self) -> bool {
        self.token.cancel();
        let mut current = self.status.load(Ordering::Acquire);
        loop {
            if RequestStatus::from_u8(current).is_terminal() {
                return false;
            }
            match self.status.compare_exchange(
                current,
                RequestStatus::Cancelled.to_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_token_basic() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());

        token.cancel();
        assert!(token.is_cancelled());

        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancellation_token_clone() {
        let token1 = CancellationToken::new();
        let token2 = token1.clone();

        token1.cancel();
        assert!(token2.is_cancelled());
    }

    #[test]
    fn test_request_status_reflects_token() {
        let request = RequestShared::new();
        assert_eq!(request.status(), RequestStatus::Queued);

        request.set_status(RequestStatus::Running);
        request.token.cancel();
        assert_eq!(request.raw_status(), RequestStatus::Running);
        assert_eq!(request.status(), RequestStatus::Cancelled);
    }

    #[test]
    fn test_mark_cancelled_counts_once() {
        let request = RequestShared::new();
        assert!(request.mark_cancelled());
        assert!(!request.mark_cancelled());
        assert_eq!(request.status(), RequestStatus::Cancelled);
    }

    #[test]
    fn test_mark_cancelled_keeps_terminal_status() {
        let request = RequestShared::new();
        request.set_status(RequestStatus::Completed);

        assert!(!request.mark_cancelled());
        assert_eq!(request.status(), RequestStatus::Completed);
    }
}
