//! Demand shaping for the usage report.
//!
//! When a flow class has pending demand, the report does not forward the
//! raw magnified figure; it recomputes demand from the observed per-second
//! rate through a piecewise curve. Lightly-used clients ask aggressively
//! (headroom is cheap to grant), heavily-used clients converge on their
//! observed rate, and everyone self-caps so no single client can demand
//! the whole cluster.

use sluice_core::{MIB, REPORT_NEED_CAP};

/// Maps an observed per-second rate to the demand figure reported to the
/// master.
///
/// The fractional steps are exact integer multiply-then-divide; the inputs
/// are bounded well below the overflow range by the preceding branch.
pub(crate) const fn demand_curve(used_rate: u64) -> u64 {
    if used_rate < MIB {
        5 * used_rate
    } else if used_rate < 5 * MIB {
        2 * used_rate
    } else if used_rate < 10 * MIB {
        used_rate * 3 / 2
    } else if used_rate < 50 * MIB {
        used_rate * 6 / 5
    } else if used_rate < 100 * MIB {
        used_rate * 11 / 10
    } else if used_rate < 300 * MIB {
        used_rate
    } else {
        REPORT_NEED_CAP
    }
}
