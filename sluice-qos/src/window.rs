//! Sliding admission window.
//!
//! A window divides wall-clock time into grids, `GRIDS_PER_SECOND` per
//! second, and retains `WINDOW_SECONDS` worth of them. The newest grid is
//! the only admission target; older grids exist for the usage report. The
//! ring is bounded at [`WINDOW_GRIDS`]; rotation drops head grids past the
//! bound in the same pass that appends the new tail.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use sluice_core::{GridId, WINDOW_GRIDS};
use tokio::time::Instant;

/// One time slice of the window.
///
/// `used` is atomic so the admit fast path can charge it under a shared
/// lock; it only ever grows within a grid's lifetime. `limit` and `buffer`
/// are mutable on the tail grid only (quota updates land there); grids
/// behind the tail are immutable except for retention.
#[derive(Debug)]
pub(crate) struct Grid {
    id: GridId,
    created_at: Instant,
    limit: u64,
    buffer: u64,
    used: AtomicU64,
    hit_limit: bool,
}

impl Grid {
    fn new(id: GridId, limit: u64, buffer: u64, now: Instant) -> Self {
        Self {
            id,
            created_at: now,
            limit,
            buffer,
            used: AtomicU64::new(0),
            hit_limit: false,
        }
    }

    pub(crate) const fn id(&self) -> GridId {
        self.id
    }

    pub(crate) const fn created_at(&self) -> Instant {
        self.created_at
    }

    pub(crate) const fn limit(&self) -> u64 {
        self.limit
    }

    pub(crate) const fn buffer(&self) -> u64 {
        self.buffer
    }

    pub(crate) fn used(&self) -> u64 {
        self.used.load(Ordering::Relaxed)
    }

    pub(crate) const fn hit_limit(&self) -> bool {
        self.hit_limit
    }

    /// Whether `units` more would still fit under `limit + buffer`.
    pub(crate) fn fits(&self, units: u64) -> bool {
        self.used().saturating_add(units) <= self.limit.saturating_add(self.buffer)
    }

    /// Charges `units` against this grid.
    pub(crate) fn charge(&self, units: u64) {
        self.used.fetch_add(units, Ordering::Relaxed);
    }

    /// Marks the grid saturated. Returns true the first time (sticky flag).
    pub(crate) fn mark_hit_limit(&mut self) -> bool {
        let newly = !self.hit_limit;
        self.hit_limit = true;
        newly
    }

    /// Installs new per-grid quota values. Tail grid only.
    pub(crate) fn set_quota(&mut self, limit: u64, buffer: u64) {
        self.limit = limit;
        self.buffer = buffer;
    }
}

/// Bounded ring of grids, newest at the tail.
#[derive(Debug)]
pub(crate) struct Window {
    grids: VecDeque<Grid>,
    next_grid_id: GridId,
}

impl Window {
    pub(crate) fn new() -> Self {
        Self {
            grids: VecDeque::with_capacity(WINDOW_GRIDS),
            next_grid_id: GridId::new(0),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.grids.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.grids.len()
    }

    pub(crate) fn tail(&self) -> Option<&Grid> {
        self.grids.back()
    }

    pub(crate) fn tail_mut(&mut self) -> Option<&mut Grid> {
        self.grids.back_mut()
    }

    /// Installs the first grid with already-scaled per-grid values.
    ///
    /// # Panics
    /// Panics if the window already has grids; quota changes after that go
    /// through the tail.
    pub(crate) fn install_initial(&mut self, limit: u64, buffer: u64, now: Instant) {
        assert!(self.grids.is_empty(), "initial grid installed twice");
        let grid = Grid::new(self.take_grid_id(), limit, buffer, now);
        self.grids.push_back(grid);
    }

    /// Appends a fresh grid cloned from the tail's quota and expires head
    /// grids past the retention bound.
    ///
    /// Returns how many expired grids had their `hit_limit` flag set, so
    /// the owning factor can settle its saturation counter.
    ///
    /// # Panics
    /// Panics on an empty window; construction always installs a grid.
    pub(crate) fn rotate(&mut self, now: Instant) -> u8 {
        let tail = self.grids.back().expect("rotate on empty window");
        let grid = Grid::new(self.next_grid_id, tail.limit, tail.buffer, now);
        self.next_grid_id = self.next_grid_id.next();
        self.grids.push_back(grid);

        let mut expired_hits: u8 = 0;
        while self.grids.len() > WINDOW_GRIDS {
            if let Some(expired) = self.grids.pop_front() {
                if expired.hit_limit() {
                    expired_hits += 1;
                }
            }
        }
        expired_hits
    }

    /// Walks backward from the tail over up to `count` grids.
    pub(crate) fn recent(&self, count: usize) -> impl Iterator<Item = &Grid> {
        self.grids.iter().rev().take(count)
    }

    /// Number of retained grids with the saturation flag set.
    #[cfg(test)]
    pub(crate) fn hit_limit_grids(&self) -> usize {
        self.grids.iter().filter(|grid| grid.hit_limit()).count()
    }

    fn take_grid_id(&mut self) -> GridId {
        let id = self.next_grid_id;
        self.next_grid_id = id.next();
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window_with_quota(limit: u64, buffer: u64) -> Window {
        let mut window = Window::new();
        window.install_initial(limit, buffer, Instant::now());
        window
    }

    #[test]
    fn test_initial_grid_is_the_tail() {
        let window = window_with_quota(100, 10);
        let tail = window.tail().unwrap();
        assert_eq!(tail.id(), GridId::new(0));
        assert_eq!(tail.limit(), 100);
        assert_eq!(tail.buffer(), 10);
        assert_eq!(tail.used(), 0);
        assert!(!tail.hit_limit());
    }

    #[test]
    fn test_charge_and_fits() {
        let window = window_with_quota(100, 10);
        let tail = window.tail().unwrap();

        assert!(tail.fits(110));
        tail.charge(80);
        assert_eq!(tail.used(), 80);
        assert!(tail.fits(30));
        assert!(!tail.fits(31));
    }

    #[test]
    fn test_fits_saturates_on_huge_requests() {
        let window = window_with_quota(u64::MAX, u64::MAX);
        let tail = window.tail().unwrap();
        // No overflow panic; the saturated sum still admits.
        assert!(tail.fits(u64::MAX));
    }

    #[test]
    fn test_rotate_clones_quota_and_resets_accounting() {
        let mut window = window_with_quota(100, 10);
        window.tail_mut().unwrap().mark_hit_limit();
        window.tail().unwrap().charge(95);

        window.rotate(Instant::now());

        let tail = window.tail().unwrap();
        assert_eq!(tail.id(), GridId::new(1));
        assert_eq!(tail.limit(), 100);
        assert_eq!(tail.buffer(), 10);
        assert_eq!(tail.used(), 0);
        assert!(!tail.hit_limit());
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn test_retention_bound_holds() {
        let mut window = window_with_quota(1, 0);
        for _ in 0..(3 * WINDOW_GRIDS) {
            window.rotate(Instant::now());
            assert!(window.len() <= WINDOW_GRIDS);
        }
        assert_eq!(window.len(), WINDOW_GRIDS);
    }

    #[test]
    fn test_rotation_reports_expired_saturated_grids() {
        let mut window = window_with_quota(1, 0);
        window.tail_mut().unwrap().mark_hit_limit();

        // Fill the ring; the saturated grid is still retained.
        for _ in 0..(WINDOW_GRIDS - 1) {
            assert_eq!(window.rotate(Instant::now()), 0);
        }
        assert_eq!(window.hit_limit_grids(), 1);

        // One more rotation pushes it out.
        assert_eq!(window.rotate(Instant::now()), 1);
        assert_eq!(window.hit_limit_grids(), 0);
    }

    #[test]
    fn test_mark_hit_limit_is_sticky() {
        let mut window = window_with_quota(1, 0);
        assert!(window.tail_mut().unwrap().mark_hit_limit());
        assert!(!window.tail_mut().unwrap().mark_hit_limit());
        assert!(window.tail().unwrap().hit_limit());
    }

    #[test]
    fn test_recent_walks_backward_from_tail() {
        let mut window = window_with_quota(1, 0);
        window.rotate(Instant::now());
        window.rotate(Instant::now());
        window.rotate(Instant::now());

        let ids: Vec<u64> = window.recent(3).map(|grid| grid.id().get()).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn test_set_quota_touches_only_the_tail() {
        let mut window = window_with_quota(100, 10);
        window.rotate(Instant::now());
        window.tail_mut().unwrap().set_quota(200, 20);

        let quotas: Vec<(u64, u64)> = window
            .recent(2)
            .map(|grid| (grid.limit(), grid.buffer()))
            .collect();
        assert_eq!(quotas, vec![(200, 20), (100, 10)]);
    }
}
