//! Cancellation contexts for in-flight admissions.
//!
//! A parked admission suspends until capacity frees up, which can take
//! arbitrarily long when the master keeps quotas tight. Issuers bound that
//! wait by passing an [`AllocContext`]: when the context fires, the waiting
//! call returns the cancellation reason instead. The parked waiter itself
//! stays queued; the factor detects the abandoned completion handle at
//! drain time and discards it without charging capacity.

use std::fmt;
use std::time::Duration;

use tokio::sync::watch;

/// Why an [`AllocContext`] fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The issuer cancelled explicitly through its [`CancelHandle`].
    Caller,
    /// The context's deadline elapsed.
    Deadline,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Caller => f.write_str("cancelled by caller"),
            Self::Deadline => f.write_str("deadline exceeded"),
        }
    }
}

/// Cancellation context observed by admission calls.
///
/// Cheap to clone; all clones observe the same cancellation.
#[derive(Debug, Clone)]
pub struct AllocContext {
    rx: watch::Receiver<Option<CancelReason>>,
}

/// Fires the paired [`AllocContext`].
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<Option<CancelReason>>,
}

impl AllocContext {
    /// A context that never cancels. The admission waits for capacity alone.
    #[must_use]
    pub fn unbounded() -> Self {
        let (_, rx) = watch::channel(None);
        Self { rx }
    }

    /// A context with an explicit cancel handle.
    #[must_use]
    pub fn cancellable() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(None);
        (Self { rx }, CancelHandle { tx })
    }

    /// A context that fires [`CancelReason::Deadline`] after `deadline`.
    ///
    /// Requires a tokio runtime for the timer task.
    #[must_use]
    pub fn with_deadline(deadline: Duration) -> Self {
        let (ctx, handle) = Self::cancellable();
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            handle.fire(CancelReason::Deadline);
        });
        ctx
    }

    /// Returns the reason if the context has already fired.
    #[must_use]
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        *self.rx.borrow()
    }

    /// Resolves when the context fires.
    ///
    /// Pends forever if the handle was dropped without cancelling: such a
    /// context can no longer fire and the admission waits on capacity only.
    pub async fn cancelled(&self) -> CancelReason {
        let mut rx = self.rx.clone();
        loop {
            if let Some(reason) = *rx.borrow() {
                return reason;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl CancelHandle {
    /// Cancels the paired context with [`CancelReason::Caller`].
    pub fn cancel(&self) {
        self.fire(CancelReason::Caller);
    }

    fn fire(&self, reason: CancelReason) {
        // Receivers may all be gone already; that just means nobody waits.
        let _ = self.tx.send(Some(reason));
    }
}
