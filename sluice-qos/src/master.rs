//! Seam between the limiter and the cluster master.
//!
//! The limiter never talks to the master directly; it asks the surrounding
//! client to refresh quota state through this trait and receives the
//! answer later via [`crate::QosManager::update_flow_info`]. Refreshes are
//! triggered off the caller path and rate-limited by the manager, so an
//! implementation does not need its own throttling.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;

use crate::error::QosResult;

/// Callback into the surrounding client for out-of-band quota refreshes.
#[async_trait]
pub trait MasterLink: Send + Sync + 'static {
    /// Asks the master to re-evaluate this client's quotas.
    ///
    /// Best-effort: failures are logged by the limiter and otherwise
    /// ignored, and the built-in rate limit prevents tight-loop retries.
    ///
    /// # Errors
    ///
    /// Returns the transport-level failure, typically
    /// [`crate::QosError::Master`].
    async fn refresh_client_info(&self) -> QosResult<()>;
}

/// [`MasterLink`] that only counts refresh requests.
///
/// Useful in tests and during wiring bring-up, before a real transport
/// exists.
#[derive(Debug, Default)]
pub struct RecordingMaster {
    refreshes: AtomicU32,
}

impl RecordingMaster {
    /// Creates a recorder with zero refreshes observed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of refresh requests observed so far.
    #[must_use]
    pub fn refresh_count(&self) -> u32 {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MasterLink for RecordingMaster {
    async fn refresh_client_info(&self) -> QosResult<()> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
