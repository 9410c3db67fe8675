//! System-wide limits and constants for the QoS engine.
//!
//! Following `TigerStyle`: put limits on everything. The admission window,
//! the reported demand, and the master feedback loop all have explicit
//! bounds collected here.

/// One kibibyte.
pub const KIB: u64 = 1024;
/// One mebibyte.
pub const MIB: u64 = 1024 * KIB;
/// One gibibyte.
pub const GIB: u64 = 1024 * MIB;

/// Number of grids each admission window packs into one wall-clock second.
///
/// Per-second quotas from the master are divided by this to obtain per-grid
/// quotas, and the window rotates at this frequency.
pub const GRIDS_PER_SECOND: u64 = 3;

/// Seconds of history each admission window retains.
pub const WINDOW_SECONDS: u64 = 10;

/// Maximum number of grids retained in a window.
#[allow(clippy::cast_possible_truncation)] // 30, far below usize::MAX.
pub const WINDOW_GRIDS: usize = (GRIDS_PER_SECOND * WINDOW_SECONDS) as usize;

/// Seconds of master silence after which stale quotas are flagged.
pub const QOS_EXPIRE_SECS: u64 = 20;

/// Floor for the elapsed-time term of the report rate math, in milliseconds.
///
/// Reports assembled very shortly after a grid was created would otherwise
/// divide by a near-zero interval and blow up the per-second rate.
pub const REPORT_MIN_GAP_MS: u64 = 500;

/// Initial per-class demand multiplier.
pub const DEFAULT_MAGNIFY: u32 = 100;

/// Allocation size above which the class magnify is replaced by
/// [`DEFAULT_MAGNIFY`] when synthesizing demand. Guards the reported demand
/// against pathological request sizes.
pub const MAGNIFY_SUBSTITUTE_THRESHOLD: u64 = 1000;

/// Ceiling on the magnified demand a single flow-class allocation may add.
pub const FLOW_NEED_CAP: u64 = GIB / 8;

/// Ceiling on the per-class demand figure sent to the master.
pub const REPORT_NEED_CAP: u64 = 300 * MIB;

/// Default number of saturated grids within a window required before the
/// client asks the master for more quota.
pub const HIT_TRIGGER_COUNT_DEFAULT: u8 = 1;

/// Default minimum gap between two quota refresh requests, in seconds.
pub const REQ_PERIOD_SECS_DEFAULT: u32 = 1;
