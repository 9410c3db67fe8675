//! The per-client QoS manager.
//!
//! One `QosManager` lives in each storage client process. It owns the four
//! per-class factors, runs the background tick task that rotates their
//! windows, exposes the hot-path admission calls, and carries the feedback
//! loop with the master: usage reports out, quota updates in.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sluice_core::{
    ClientId, ClientReport, FlowKind, LimitUpdate, QosStatus, GRIDS_PER_SECOND,
    HIT_TRIGGER_COUNT_DEFAULT, QOS_EXPIRE_SECS, REQ_PERIOD_SECS_DEFAULT,
};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::context::AllocContext;
use crate::error::{QosError, QosResult};
use crate::factor::{Admission, Factor};
use crate::master::MasterLink;

/// Interval between window rotations, in milliseconds.
const TICK_INTERVAL_MS: u64 = 1000 / GRIDS_PER_SECOND;

/// How long the master may stay silent before the tick task warns.
const MASTER_SILENCE_LIMIT: Duration = Duration::from_secs(QOS_EXPIRE_SECS);

// -----------------------------------------------------------------------------
// Configuration
// -----------------------------------------------------------------------------

/// Configuration for the QoS manager.
///
/// The trigger fields are starting values; the master may override both at
/// runtime through [`LimitUpdate`].
#[derive(Debug, Clone)]
pub struct QosConfig {
    /// Host identifier included in reports to the master.
    pub host: String,
    /// Saturated grids within a window required to request a quota refresh.
    pub hit_trigger_count: u8,
    /// Minimum gap between two quota refresh requests, in seconds.
    pub req_period_secs: u32,
}

impl Default for QosConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            hit_trigger_count: HIT_TRIGGER_COUNT_DEFAULT,
            req_period_secs: REQ_PERIOD_SECS_DEFAULT,
        }
    }
}

impl QosConfig {
    /// Creates a configuration for testing.
    #[must_use]
    pub fn for_testing() -> Self {
        Self::default()
    }

    /// Validates that the configuration is internally consistent.
    ///
    /// # Errors
    /// Returns [`QosError::InvalidConfig`] if any field is unusable.
    pub fn validate(&self) -> QosResult<()> {
        if self.host.is_empty() {
            return Err(QosError::InvalidConfig {
                name: "host",
                reason: "must not be empty",
            });
        }
        if self.hit_trigger_count == 0 {
            return Err(QosError::InvalidConfig {
                name: "hit_trigger_count",
                reason: "must be positive",
            });
        }
        if self.req_period_secs == 0 {
            return Err(QosError::InvalidConfig {
                name: "req_period_secs",
                reason: "must be positive",
            });
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Shared state
// -----------------------------------------------------------------------------

/// Manager-level state shared with the factors and the tick task.
///
/// The scalars are benignly racy: writes are infrequent (quota updates and
/// refresh triggers) and readers tolerate mildly stale values, so relaxed
/// atomics and short mutexes are enough.
pub(crate) struct ManagerShared {
    client_id: AtomicU64,
    enabled: AtomicBool,
    hit_trigger_count: AtomicU8,
    req_period_secs: AtomicU32,
    last_refresh_request: Mutex<Option<Instant>>,
    last_set_limit: Mutex<Option<Instant>>,
    host: String,
    master: Arc<dyn MasterLink>,
}

impl ManagerShared {
    pub(crate) fn new(config: &QosConfig, master: Arc<dyn MasterLink>) -> Self {
        Self {
            client_id: AtomicU64::new(0),
            enabled: AtomicBool::new(false), // assigned by the master
            hit_trigger_count: AtomicU8::new(config.hit_trigger_count),
            req_period_secs: AtomicU32::new(config.req_period_secs),
            last_refresh_request: Mutex::new(None),
            last_set_limit: Mutex::new(None),
            host: config.host.clone(),
            master,
        }
    }

    pub(crate) fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub(crate) fn hit_trigger_count(&self) -> u8 {
        self.hit_trigger_count.load(Ordering::Relaxed)
    }

    fn set_hit_trigger_count(&self, count: u8) {
        self.hit_trigger_count.store(count, Ordering::Relaxed);
    }

    fn set_req_period_secs(&self, secs: u32) {
        self.req_period_secs.store(secs, Ordering::Relaxed);
    }

    /// Claims the right to fire one refresh request, enforcing the minimum
    /// gap between requests. Returns false while the gap has not passed.
    pub(crate) fn try_claim_refresh_slot(&self, now: Instant) -> bool {
        let period =
            Duration::from_secs(u64::from(self.req_period_secs.load(Ordering::Relaxed)));
        let mut last = self.last_refresh_request.lock();
        let due = last.map_or(true, |at| at + period < now);
        if due {
            *last = Some(now);
        }
        due
    }

    /// Records that a quota landed; resets the master-silence clock.
    pub(crate) fn stamp_set_limit(&self, now: Instant) {
        *self.last_set_limit.lock() = Some(now);
    }

    /// Time since the last quota landed, if one ever did.
    fn master_silence(&self, now: Instant) -> Option<Duration> {
        self.last_set_limit
            .lock()
            .map(|at| now.saturating_duration_since(at))
    }

    pub(crate) fn master(&self) -> &Arc<dyn MasterLink> {
        &self.master
    }
}

// -----------------------------------------------------------------------------
// QosManager
// -----------------------------------------------------------------------------

/// Client-side QoS limiter coordinating with the cluster master.
///
/// All state is volatile; a restarted client starts from zero quotas and
/// waits for the master's first [`LimitUpdate`]. Until that update enables
/// enforcement, admission is free and merely accounted.
pub struct QosManager {
    shared: Arc<ManagerShared>,
    factors: [Arc<Factor>; 4],
    /// Real validity of the previous report (the first-report latch never
    /// leaks into this).
    last_report_valid: AtomicBool,
    /// One-shot latch: the very first report is always worth sending.
    first_report_pending: AtomicBool,
    shutdown_tx: mpsc::Sender<()>,
}

impl QosManager {
    /// Creates the manager and starts its tick task.
    ///
    /// Must be called within a tokio runtime. Each factor starts with a
    /// zero-capacity grid; real quotas arrive via [`Self::update_flow_info`].
    ///
    /// # Errors
    /// Returns [`QosError::InvalidConfig`] if the configuration is invalid.
    pub fn new(config: QosConfig, master: Arc<dyn MasterLink>) -> QosResult<Self> {
        config.validate()?;

        let shared = Arc::new(ManagerShared::new(&config, master));
        let factors =
            FlowKind::all().map(|kind| Arc::new(Factor::new(kind, Arc::clone(&shared))));

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        tokio::spawn(tick_task(
            factors.clone(),
            Arc::clone(&shared),
            shutdown_rx,
        ));

        info!(host = %config.host, "qos manager started");
        Ok(Self {
            shared,
            factors,
            last_report_valid: AtomicBool::new(false),
            first_report_pending: AtomicBool::new(true),
            shutdown_tx,
        })
    }

    /// Admits one read of `size` bytes: one read IOPS unit, then `size`
    /// read flow units.
    ///
    /// # Errors
    /// Returns [`QosError::Cancelled`] if `ctx` fires while parked, or
    /// [`QosError::Shutdown`] if the limiter goes away underneath the call.
    pub async fn read_alloc(&self, ctx: &AllocContext, size: u64) -> QosResult<()> {
        self.wait_n(ctx, FlowKind::IopsRead, 1).await?;
        self.wait_n(ctx, FlowKind::FlowRead, size).await
    }

    /// Admits one write of `size` bytes: one write IOPS unit, then `size`
    /// write flow units.
    ///
    /// # Errors
    /// Returns [`QosError::Cancelled`] if `ctx` fires while parked, or
    /// [`QosError::Shutdown`] if the limiter goes away underneath the call.
    pub async fn write_alloc(&self, ctx: &AllocContext, size: u64) -> QosResult<()> {
        self.wait_n(ctx, FlowKind::IopsWrite, 1).await?;
        self.wait_n(ctx, FlowKind::FlowWrite, size).await
    }

    /// Installs a quota update from the master.
    pub fn update_flow_info(&self, update: &LimitUpdate) {
        if self.shared.enabled() != update.enable {
            warn!(enable = update.enable, "qos enforcement flag changed");
        }
        self.shared.set_enabled(update.enable);

        if let Some(count) = update.hit_trigger_count {
            info!(count, "updating hit trigger count");
            self.shared.set_hit_trigger_count(count);
        }
        if let Some(secs) = update.req_period_secs {
            info!(secs, "updating refresh request period");
            self.shared.set_req_period_secs(secs);
        }

        for (kind, quota) in &update.quotas {
            self.factor(*kind).set_limit(quota.limit, quota.buffer);
        }
        for (kind, magnify) in &update.magnify {
            if *magnify > 0 {
                self.factor(*kind).set_magnify(*magnify);
            }
        }
    }

    /// Assembles the usage report for the master.
    ///
    /// The boolean says whether the transport should bother sending it:
    /// a silent client (two all-zero reports in a row) is suppressed, but
    /// the very first report always goes out so the master learns the
    /// client exists.
    pub fn get_flow_info(&self) -> (ClientReport, bool) {
        let now = Instant::now();
        let mut classes = HashMap::with_capacity(self.factors.len());
        for factor in &self.factors {
            classes.insert(factor.kind(), factor.report_usage(now));
        }

        let report = ClientReport {
            client_id: ClientId::new(self.shared.client_id.load(Ordering::Relaxed)),
            host: self.shared.host.clone(),
            status: QosStatus::Normal,
            classes,
        };

        let valid = report.is_valid();
        let last_valid = self.last_report_valid.swap(valid, Ordering::Relaxed);
        let first = self.first_report_pending.swap(false, Ordering::Relaxed);
        let should_send = first || last_valid || valid;
        debug!(valid, should_send, "assembled qos report");
        (report, should_send)
    }

    /// Sets the identity used in reports, once the master assigns one.
    pub fn set_client_id(&self, id: ClientId) {
        self.shared.client_id.store(id.get(), Ordering::Relaxed);
    }

    /// Stops the background tick task.
    ///
    /// Dropping the manager has the same effect; this exists for orderly
    /// shutdown paths that want the task gone before teardown continues.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }

    async fn wait_n(&self, ctx: &AllocContext, kind: FlowKind, units: u64) -> QosResult<()> {
        match self.factor(kind).alloc(units) {
            Admission::Granted => Ok(()),
            Admission::Parked(handle) => {
                tokio::select! {
                    reason = ctx.cancelled() => {
                        // The waiter stays queued; dropping the handle here
                        // marks it abandoned so the drain skips its charge.
                        warn!(class = kind.as_str(), units, %reason, "parked admission cancelled");
                        Err(QosError::Cancelled { reason })
                    }
                    released = handle => match released {
                        Ok(()) => Ok(()),
                        Err(_) => Err(QosError::Shutdown),
                    },
                }
            }
        }
    }

    fn factor(&self, kind: FlowKind) -> &Arc<Factor> {
        &self.factors[kind.index()]
    }
}

/// Background task: rotates every factor's window at the grid rate and
/// watches for the master going silent.
async fn tick_task(
    factors: [Arc<Factor>; 4],
    shared: Arc<ManagerShared>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    let mut tick = tokio::time::interval(Duration::from_millis(TICK_INTERVAL_MS));
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("qos tick task shutting down");
                break;
            }
            _ = tick.tick() => {
                let now = Instant::now();
                for factor in &factors {
                    factor.rotate(now);
                }
                if shared.enabled() {
                    if let Some(silence) = shared.master_silence(now) {
                        if silence > MASTER_SILENCE_LIMIT {
                            warn!(
                                silent_secs = silence.as_secs(),
                                "no quota update from master; limits are stale"
                            );
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::master::RecordingMaster;

    fn manager() -> QosManager {
        QosManager::new(QosConfig::for_testing(), Arc::new(RecordingMaster::new())).unwrap()
    }

    #[test]
    fn test_config_defaults_are_valid() {
        assert!(QosConfig::default().validate().is_ok());
    }

    #[test]
    fn test_config_rejects_zero_trigger() {
        let config = QosConfig {
            hit_trigger_count: 0,
            ..QosConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(QosError::InvalidConfig {
                name: "hit_trigger_count",
                ..
            })
        ));
    }

    #[test]
    fn test_config_rejects_empty_host() {
        let config = QosConfig {
            host: String::new(),
            ..QosConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let config = QosConfig {
            req_period_secs: 0,
            ..QosConfig::default()
        };
        let result = QosManager::new(config, Arc::new(RecordingMaster::new()));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_first_report_is_always_sent() {
        let manager = manager();
        let (report, should_send) = manager.get_flow_info();
        assert!(!report.is_valid(), "fresh manager has nothing to report");
        assert!(should_send, "first report goes out regardless");
    }

    #[tokio::test]
    async fn test_silent_client_is_suppressed_on_the_second_zero_report() {
        let manager = manager();
        let (_, first) = manager.get_flow_info();
        let (_, second) = manager.get_flow_info();
        assert!(first);
        assert!(!second, "two all-zero reports in a row stop being sent");
    }

    #[tokio::test]
    async fn test_reports_resume_after_usage_appears() {
        let manager = manager();
        let _ = manager.get_flow_info();
        let _ = manager.get_flow_info(); // suppressed

        manager.update_flow_info(
            &LimitUpdate::enabled().with_quota(FlowKind::FlowRead, 3000, 0),
        );
        let (report, should_send) = manager.get_flow_info();
        assert!(report.is_valid(), "a non-zero limit makes the report valid");
        assert!(should_send);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_report_carries_identity() {
        let manager = manager();
        manager.set_client_id(ClientId::new(77));
        let (report, _) = manager.get_flow_info();
        assert_eq!(report.client_id, ClientId::new(77));
        assert_eq!(report.host, "localhost");
        assert_eq!(report.status, QosStatus::Normal);
        assert_eq!(report.classes.len(), 4);
    }

    #[tokio::test]
    async fn test_update_flow_info_applies_trigger_overrides() {
        let manager = manager();
        let update = LimitUpdate {
            enable: true,
            hit_trigger_count: Some(5),
            req_period_secs: Some(30),
            ..LimitUpdate::default()
        };
        manager.update_flow_info(&update);
        assert!(manager.shared.enabled());
        assert_eq!(manager.shared.hit_trigger_count(), 5);
        assert_eq!(manager.shared.req_period_secs.load(Ordering::Relaxed), 30);
    }

    #[tokio::test]
    async fn test_zero_magnify_entries_are_ignored() {
        let manager = manager();
        manager.update_flow_info(
            &LimitUpdate::enabled().with_magnify(FlowKind::FlowRead, 0),
        );
        // Demand for a parked flow-read still uses the default multiplier.
        manager.update_flow_info(
            &LimitUpdate::enabled()
                .with_quota(FlowKind::IopsRead, 3000, 0)
                .with_quota(FlowKind::FlowRead, 3, 0),
        );
        let ctx = AllocContext::with_deadline(Duration::from_millis(50));
        let result = manager.read_alloc(&ctx, 10).await;
        assert!(matches!(result, Err(QosError::Cancelled { .. })));
        assert!(manager.factor(FlowKind::FlowRead).need() > 0);
    }
}
