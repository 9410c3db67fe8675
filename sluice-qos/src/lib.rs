//! QoS admission and feedback engine for the Sluice storage client.
//!
//! Each client process runs one [`QosManager`] that enforces the per-client
//! quotas assigned by the cluster master across four traffic classes
//! (read/write IOPS and read/write throughput). The manager accounts usage
//! in per-class sliding windows, parks requests that exceed the current
//! quota, and feeds demand back to the master so quotas can be raised under
//! sustained saturation.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                          QosManager                            │
//! │                                                                │
//! │  read_alloc / write_alloc        tick (3/s)        get_flow_info│
//! │        │                            │                    │     │
//! │        ▼                            ▼                    ▼     │
//! │  ┌───────────┐   park   ┌──────────────────┐   ┌────────────┐ │
//! │  │  Factor   │─────────▶│   Waiter queue   │   │   Report   │ │
//! │  │ (x4, one  │  admit   │ (FIFO, oneshot)  │   │ (demand    │ │
//! │  │ per class)│◀─────────│                  │   │  curve)    │ │
//! │  └───────────┘  drain   └──────────────────┘   └────────────┘ │
//! │        │                                                       │
//! │        ▼                                                       │
//! │  ┌───────────┐  saturation  ┌──────────────────────────────┐  │
//! │  │  Window   │─────────────▶│ MasterLink::refresh (spawned)│  │
//! │  │ (30 grids)│              └──────────────────────────────┘  │
//! │  └───────────┘                                                │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Admission
//!
//! Issuers call [`QosManager::read_alloc`] / [`QosManager::write_alloc`] on
//! the I/O hot path. A request is either charged against the current grid
//! and admitted immediately, or parked on a strict-FIFO waiter queue until
//! window rotation or a quota update frees capacity. Parked callers can be
//! cancelled through an [`AllocContext`]; cancellation is the only error an
//! issuer ever sees.
//!
//! # Feedback
//!
//! When enough grids of a window saturate, the manager asks the master
//! (through the [`MasterLink`] seam, rate-limited and off the caller path)
//! to reconsider this client's quotas. The master answers by calling
//! [`QosManager::update_flow_info`], and polls usage via
//! [`QosManager::get_flow_info`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use sluice_core::{FlowKind, LimitUpdate};
//! use sluice_qos::{AllocContext, QosConfig, QosManager, RecordingMaster};
//!
//! let manager = QosManager::new(QosConfig::default(), Arc::new(RecordingMaster::new()))?;
//! manager.update_flow_info(
//!     &LimitUpdate::enabled().with_quota(FlowKind::FlowWrite, 10 * 1024 * 1024, 0),
//! );
//!
//! // Hot path: charge one write of 4 KiB.
//! manager.write_alloc(&AllocContext::unbounded(), 4096).await?;
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
// Factor, window, and waiter internals share this crate; the public surface
// is the manager, the context, and the master seam.
#![allow(clippy::module_name_repetitions)]

mod context;
mod error;
mod factor;
mod manager;
mod master;
mod report;
mod window;

pub use context::{AllocContext, CancelHandle, CancelReason};
pub use error::{QosError, QosResult};
pub use manager::{QosConfig, QosManager};
pub use master::{MasterLink, RecordingMaster};
