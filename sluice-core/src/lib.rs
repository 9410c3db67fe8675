//! Sluice Core - Strongly-typed identifiers and shared vocabulary for Sluice.
//!
//! Sluice is a client-side QoS rate limiter embedded in a distributed storage
//! client. This crate provides the vocabulary shared between the admission
//! engine and the transport that talks to the cluster master: typed IDs,
//! the traffic class enumeration, system-wide limits, and the report/quota
//! structures exchanged with the master.
//!
//! # Design Principles (TigerStyle)
//!
//! - **Strongly-typed IDs**: Prevent mixing up a `ClientId` with a `GridId`
//! - **Explicit limits**: Every window, queue, and demand figure is bounded
//! - **Explicit types**: Use u32/u64, not usize
//! - **No unsafe code**: Safety > Performance

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod limits;
mod report;
mod types;

pub use limits::{
    DEFAULT_MAGNIFY, FLOW_NEED_CAP, GIB, GRIDS_PER_SECOND, HIT_TRIGGER_COUNT_DEFAULT, KIB,
    MAGNIFY_SUBSTITUTE_THRESHOLD, MIB, QOS_EXPIRE_SECS, REPORT_MIN_GAP_MS, REPORT_NEED_CAP,
    REQ_PERIOD_SECS_DEFAULT, WINDOW_GRIDS, WINDOW_SECONDS,
};
pub use report::{ClassQuota, ClassUsage, ClientReport, LimitUpdate};
pub use types::{ClientId, FlowKind, GridId, QosStatus};
