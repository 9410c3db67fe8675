//! Per-class admission: one `Factor` per traffic class.
//!
//! A factor owns the class's sliding window and its FIFO waiter queue, and
//! aggregates the magnified demand reported to the master. Admission either
//! charges the tail grid immediately or parks the request on the queue;
//! waiters are drained by window rotation and by quota updates, strictly in
//! arrival order.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use sluice_core::{
    ClassUsage, FlowKind, DEFAULT_MAGNIFY, FLOW_NEED_CAP, GRIDS_PER_SECOND,
    MAGNIFY_SUBSTITUTE_THRESHOLD, REPORT_MIN_GAP_MS,
};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::manager::ManagerShared;
use crate::report::demand_curve;
use crate::window::Window;

/// Outcome of an admission attempt.
pub(crate) enum Admission {
    /// The request was charged against the current grid; proceed.
    Granted,
    /// The request was queued; the receiver fires when capacity frees up.
    Parked(oneshot::Receiver<()>),
}

/// A parked allocation.
///
/// `magnify` is snapshotted at parking time so the demand released at drain
/// time matches the demand accumulated at park time even if the class
/// multiplier changes in between. The completion fires at most once; a
/// closed sender means the caller abandoned the admission.
struct Waiter {
    units: u64,
    magnify: u32,
    completion: oneshot::Sender<()>,
}

/// State guarded by the factor's read-write lock.
struct FactorState {
    window: Window,
    waiters: VecDeque<Waiter>,
    /// Grids within the current window that have triggered parking.
    hit_limit_grids: u8,
    /// Class-wide demand multiplier.
    magnify: u32,
}

/// Admission state for one traffic class.
pub(crate) struct Factor {
    kind: FlowKind,
    /// Aggregate magnified demand of the parked waiters. Atomic so the
    /// report path can fold it under a shared lock.
    need: AtomicU64,
    state: RwLock<FactorState>,
    shared: Arc<ManagerShared>,
}

impl Factor {
    /// Creates the factor with a zero-capacity initial grid, so the window
    /// is never empty and disabled-mode accounting has somewhere to land.
    pub(crate) fn new(kind: FlowKind, shared: Arc<ManagerShared>) -> Self {
        let factor = Self {
            kind,
            need: AtomicU64::new(0),
            state: RwLock::new(FactorState {
                window: Window::new(),
                waiters: VecDeque::new(),
                hit_limit_grids: 0,
                magnify: DEFAULT_MAGNIFY,
            }),
            shared,
        };
        factor.set_limit(0, 0);
        factor
    }

    pub(crate) const fn kind(&self) -> FlowKind {
        self.kind
    }

    pub(crate) fn need(&self) -> u64 {
        self.need.load(Ordering::Relaxed)
    }

    /// Attempts to admit `units` against the current grid.
    ///
    /// Never blocks. Either the charge lands immediately, or the request is
    /// appended to the waiter queue and the caller gets a completion handle
    /// to wait on. Once any waiter is queued, every subsequent request also
    /// parks: nothing overtakes a parked request.
    pub(crate) fn alloc(&self, units: u64) -> Admission {
        if !self.shared.enabled() {
            // Not enforcing yet. The charge still lands (coarsely) so the
            // report shows the master what the client is doing.
            let state = self.state.read();
            if let Some(tail) = state.window.tail() {
                tail.charge(units);
            }
            return Admission::Granted;
        }

        {
            let state = self.state.read();
            if let Some(tail) = state.window.tail() {
                if state.waiters.is_empty() && tail.fits(units) {
                    tail.charge(units);
                    return Admission::Granted;
                }
            }
        }

        // Park. The shared->exclusive upgrade can observe a stale decision;
        // that is fine because parking is sticky once the queue is non-empty.
        let (completion, handle) = oneshot::channel();
        let mut fire_refresh = false;
        {
            let mut state = self.state.write();
            let magnify = state.magnify;
            state.waiters.push_back(Waiter {
                units,
                magnify,
                completion,
            });
            self.add_need(units, magnify);
            debug!(
                class = self.kind.as_str(),
                units,
                queued = state.waiters.len(),
                need = self.need(),
                "admission parked"
            );

            if let Some(tail) = state.window.tail_mut() {
                if tail.mark_hit_limit() {
                    state.hit_limit_grids += 1;
                    // Enough saturated grids in the recent window means the
                    // quota no longer fits the workload; ask the master for
                    // more, at most once per request period.
                    if state.hit_limit_grids >= self.shared.hit_trigger_count()
                        && self.shared.try_claim_refresh_slot(Instant::now())
                    {
                        fire_refresh = true;
                    }
                }
            }
        }
        if fire_refresh {
            // Off the lock: the refresh path re-enters through
            // update_flow_info -> set_limit, which takes this same lock.
            self.spawn_refresh();
        }
        Admission::Parked(handle)
    }

    /// Installs a new per-second quota and immediately drains any waiters
    /// that fit under it.
    pub(crate) fn set_limit(&self, limit: u64, buffer: u64) {
        debug!(
            class = self.kind.as_str(),
            limit, buffer, "installing quota"
        );
        self.shared.stamp_set_limit(Instant::now());

        let mut state = self.state.write();
        let per_grid_limit = limit / GRIDS_PER_SECOND;
        let per_grid_buffer = buffer / GRIDS_PER_SECOND;
        if state.window.is_empty() {
            state
                .window
                .install_initial(per_grid_limit, per_grid_buffer, Instant::now());
        } else if let Some(tail) = state.window.tail_mut() {
            tail.set_quota(per_grid_limit, per_grid_buffer);
        }
        self.drain_waiters(&mut state);
    }

    /// Updates the class demand multiplier.
    pub(crate) fn set_magnify(&self, magnify: u32) {
        let mut state = self.state.write();
        if state.magnify != magnify {
            debug!(
                class = self.kind.as_str(),
                from = state.magnify,
                to = magnify,
                "updating magnify"
            );
            state.magnify = magnify;
        }
    }

    /// Advances the window by one grid, settles the saturation counter for
    /// expired grids, and drains waiters into the fresh capacity.
    pub(crate) fn rotate(&self, now: Instant) {
        let mut state = self.state.write();
        let expired_hits = state.window.rotate(now);
        state.hit_limit_grids = state.hit_limit_grids.saturating_sub(expired_hits);
        debug!(
            class = self.kind.as_str(),
            grids = state.window.len(),
            queued = state.waiters.len(),
            need = self.need(),
            hit_grids = state.hit_limit_grids,
            "rotated admission window"
        );
        self.drain_waiters(&mut state);
    }

    /// Summarizes roughly the last second of usage for the master report.
    ///
    /// Flow classes with pending demand get their demand recomputed from
    /// the observed rate, so the master sees a shaped request rather than
    /// the raw magnified backlog.
    pub(crate) fn report_usage(&self, now: Instant) -> ClassUsage {
        let state = self.state.read();
        let Some(tail) = state.window.tail() else {
            return ClassUsage::default();
        };

        let mut used = 0u64;
        let mut oldest = tail.created_at();
        #[allow(clippy::cast_possible_truncation)] // 3, far below usize::MAX.
        for grid in state.window.recent(GRIDS_PER_SECOND as usize) {
            used += grid.used();
            oldest = grid.created_at();
        }

        // Grid boundaries drift with the scheduler tick, so measure real
        // elapsed time, floored to keep brief intervals from exploding the
        // per-second rate.
        #[allow(clippy::cast_possible_truncation)]
        let elapsed_ms =
            (now.saturating_duration_since(oldest).as_millis() as u64).max(REPORT_MIN_GAP_MS);
        let used_rate = used * 1000 / elapsed_ms;

        if self.kind.is_flow() && self.need() > 0 {
            self.need.store(demand_curve(used_rate), Ordering::Relaxed);
        }

        ClassUsage {
            used: used_rate,
            need: self.need(),
            limit: tail.limit() * GRIDS_PER_SECOND,
            buffer: tail.buffer() * GRIDS_PER_SECOND,
        }
    }

    /// Releases queued waiters into the current tail grid, in FIFO order,
    /// until one no longer fits. The sole success-signalling path.
    ///
    /// Waiters whose caller has gone away (closed completion) are discarded
    /// without charging capacity; their demand contribution is released.
    fn drain_waiters(&self, state: &mut FactorState) {
        while let Some(waiter) = state.waiters.pop_front() {
            if waiter.completion.is_closed() {
                self.sub_need(waiter.units, waiter.magnify);
                debug!(
                    class = self.kind.as_str(),
                    units = waiter.units,
                    "discarding abandoned waiter"
                );
                continue;
            }

            let Some(tail) = state.window.tail() else {
                state.waiters.push_front(waiter);
                break;
            };
            if !tail.fits(waiter.units) {
                debug!(
                    class = self.kind.as_str(),
                    queued = state.waiters.len() + 1,
                    grid = tail.id().get(),
                    used = tail.used(),
                    limit = tail.limit(),
                    buffer = tail.buffer(),
                    "grid exhausted, waiters stay parked"
                );
                state.waiters.push_front(waiter);
                break;
            }

            tail.charge(waiter.units);
            self.sub_need(waiter.units, waiter.magnify);
            // A dropped receiver at this exact moment is harmless; the
            // capacity charge stands, like any other admitted request.
            let _ = waiter.completion.send(());
        }
    }

    fn spawn_refresh(&self) {
        let master = Arc::clone(self.shared.master());
        let kind = self.kind;
        tokio::spawn(async move {
            debug!(class = kind.as_str(), "requesting quota refresh from master");
            if let Err(error) = master.refresh_client_info().await {
                warn!(class = kind.as_str(), %error, "master refresh failed");
            }
        });
    }

    fn add_need(&self, units: u64, magnify: u32) {
        self.need
            .fetch_add(need_of(self.kind, units, magnify), Ordering::Relaxed);
    }

    fn sub_need(&self, units: u64, magnify: u32) {
        let released = need_of(self.kind, units, magnify);
        // need can undershoot when the report path rewrites it between park
        // and drain; clamp at zero instead of wrapping.
        let mut current = self.need.load(Ordering::Relaxed);
        loop {
            let next = current.saturating_sub(released);
            match self.need.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }
}

/// Synthesizes the demand figure a parked allocation contributes.
///
/// A zero multiplier disables demand reporting for the class. Allocations
/// above [`MAGNIFY_SUBSTITUTE_THRESHOLD`] fall back to the default
/// multiplier so one oversized request cannot distort the signal, and flow
/// classes are capped per allocation.
fn need_of(kind: FlowKind, units: u64, mut magnify: u32) -> u64 {
    if magnify == 0 {
        return 0;
    }
    if units > MAGNIFY_SUBSTITUTE_THRESHOLD {
        debug!(units, "oversized allocation, using default magnify");
        magnify = DEFAULT_MAGNIFY;
    }

    let need = units.saturating_mul(u64::from(magnify));
    if kind.is_flow() {
        need.min(FLOW_NEED_CAP)
    } else {
        need
    }
}
