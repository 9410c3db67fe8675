//! Structures exchanged with the cluster master.
//!
//! The client periodically ships a [`ClientReport`] describing recent usage
//! and outstanding demand, and the master answers with a [`LimitUpdate`]
//! assigning per-class quotas. Serialization is the transport's concern;
//! these are plain in-memory structures.

use std::collections::HashMap;

use crate::types::{ClientId, FlowKind, QosStatus};

/// Recent usage and demand for one traffic class, in per-second figures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClassUsage {
    /// Observed per-second consumption over the recent window.
    pub used: u64,
    /// Magnified pending demand.
    pub need: u64,
    /// The per-second quota currently in force.
    pub limit: u64,
    /// The per-second soft allowance beyond the quota.
    pub buffer: u64,
}

impl ClassUsage {
    /// Returns true when every field is zero (nothing worth reporting).
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        (self.used | self.need | self.limit | self.buffer) == 0
    }
}

/// Snapshot of this client's QoS state, shipped to the master.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientReport {
    /// Identity assigned by the master.
    pub client_id: ClientId,
    /// Host identifier of this client process.
    pub host: String,
    /// Client health.
    pub status: QosStatus,
    /// Per-class usage entries.
    pub classes: HashMap<FlowKind, ClassUsage>,
}

impl ClientReport {
    /// A report is valid when any class has anything non-zero to say.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.classes.values().any(|usage| !usage.is_zero())
    }
}

/// Per-second quota assigned to one traffic class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClassQuota {
    /// Admissible units per second.
    pub limit: u64,
    /// Soft allowance beyond the limit before admission parks.
    pub buffer: u64,
}

/// Quota update pushed by the master.
///
/// Fields the master leaves unset keep their current client-side values.
#[derive(Debug, Clone, Default)]
pub struct LimitUpdate {
    /// Whether admission control is enforced at all.
    pub enable: bool,
    /// New saturation trigger threshold, if the master wants to change it.
    pub hit_trigger_count: Option<u8>,
    /// New refresh rate-limit period in seconds, if changed.
    pub req_period_secs: Option<u32>,
    /// Per-class quota assignments.
    pub quotas: HashMap<FlowKind, ClassQuota>,
    /// Per-class demand multipliers; entries of zero are ignored.
    pub magnify: HashMap<FlowKind, u32>,
}

impl LimitUpdate {
    /// Starts an enabled update with no quotas assigned yet.
    #[must_use]
    pub fn enabled() -> Self {
        Self {
            enable: true,
            ..Self::default()
        }
    }

    /// Assigns a per-second quota to one class.
    #[must_use]
    pub fn with_quota(mut self, kind: FlowKind, limit: u64, buffer: u64) -> Self {
        self.quotas.insert(kind, ClassQuota { limit, buffer });
        self
    }

    /// Sets the demand multiplier for one class.
    #[must_use]
    pub fn with_magnify(mut self, kind: FlowKind, magnify: u32) -> Self {
        self.magnify.insert(kind, magnify);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_usage_is_zero() {
        assert!(ClassUsage::default().is_zero());
        let usage = ClassUsage {
            buffer: 1,
            ..ClassUsage::default()
        };
        assert!(!usage.is_zero());
    }

    #[test]
    fn test_report_validity_needs_one_nonzero_class() {
        let mut report = ClientReport {
            client_id: ClientId::new(1),
            host: "localhost".to_string(),
            status: QosStatus::Normal,
            classes: FlowKind::all()
                .into_iter()
                .map(|kind| (kind, ClassUsage::default()))
                .collect(),
        };
        assert!(!report.is_valid());

        report.classes.insert(
            FlowKind::FlowRead,
            ClassUsage {
                used: 10,
                ..ClassUsage::default()
            },
        );
        assert!(report.is_valid());
    }

    #[test]
    fn test_limit_update_builder() {
        let update = LimitUpdate::enabled()
            .with_quota(FlowKind::FlowWrite, 300, 30)
            .with_magnify(FlowKind::FlowWrite, 10);
        assert!(update.enable);
        assert_eq!(
            update.quotas[&FlowKind::FlowWrite],
            ClassQuota {
                limit: 300,
                buffer: 30
            }
        );
        assert_eq!(update.magnify[&FlowKind::FlowWrite], 10);
        assert!(update.hit_trigger_count.is_none());
    }
}
