//! Strongly-typed identifiers and the traffic class enumeration.
//!
//! Following `TigerStyle`: explicit types prevent bugs from mixing up IDs.

use std::fmt;

/// Macro to generate strongly-typed ID wrappers.
///
/// Each ID type wraps a u64 and provides:
/// - Type safety (can't mix `ClientId` with `GridId`)
/// - Debug/Display formatting
/// - Zero-cost abstraction (same as raw u64)
macro_rules! define_id {
    ($name:ident, $prefix:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Creates a new ID from a raw u64 value.
            #[inline]
            #[must_use]
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            /// Returns the raw u64 value.
            #[inline]
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }

            /// Returns the next ID in sequence.
            ///
            /// # Panics
            /// Panics if the ID would overflow.
            #[inline]
            #[must_use]
            pub const fn next(self) -> Self {
                assert!(self.0 < u64::MAX, "ID overflow");
                Self(self.0 + 1)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $prefix, self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", $prefix, self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.get()
            }
        }
    };
}

define_id!(ClientId, "client", "Identity assigned to this client by the master.");
define_id!(GridId, "grid", "Identifier of one time slice of an admission window.");

/// Traffic class charged by the limiter.
///
/// IOPS classes charge 1 unit per request; flow classes charge byte counts.
/// Every class has its own window, quota, and waiter queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowKind {
    /// Read request count.
    IopsRead,
    /// Write request count.
    IopsWrite,
    /// Read throughput in bytes.
    FlowRead,
    /// Write throughput in bytes.
    FlowWrite,
}

impl FlowKind {
    /// Returns all traffic classes.
    #[must_use]
    pub const fn all() -> [Self; 4] {
        [Self::IopsRead, Self::IopsWrite, Self::FlowRead, Self::FlowWrite]
    }

    /// Dense index of this class, for per-class arrays.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::IopsRead => 0,
            Self::IopsWrite => 1,
            Self::FlowRead => 2,
            Self::FlowWrite => 3,
        }
    }

    /// Returns true for the byte-counted classes.
    #[must_use]
    pub const fn is_flow(self) -> bool {
        matches!(self, Self::FlowRead | Self::FlowWrite)
    }

    /// Returns true for the read-side classes.
    #[must_use]
    pub const fn is_read(self) -> bool {
        matches!(self, Self::IopsRead | Self::FlowRead)
    }

    /// Stable lowercase name, used in logs and reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::IopsRead => "iops-read",
            Self::IopsWrite => "iops-write",
            Self::FlowRead => "flow-read",
            Self::FlowWrite => "flow-write",
        }
    }
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client health as reported to the master.
///
/// Only `Normal` is produced today; the variant exists so the report format
/// does not change when degraded states are added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QosStatus {
    /// The client is operating normally.
    #[default]
    Normal,
}

impl QosStatus {
    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
        }
    }
}
