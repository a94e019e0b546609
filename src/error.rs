//! Crate-wide error type for the hypervisor core.
//!
//! Every contract boundary described in the specification (VM context
//! manager, scheduler, interrupt virtualization, vdev framework) returns
//! [`HvResult<T>`] rather than a raw status code or string literal.

use core::fmt;

/// Error kinds produced at the core's contract boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "hypervisor errors must be handled, not silently discarded"]
pub enum HvError {
    /// The request was dropped by policy rather than failing outright
    /// (e.g. a switch request arriving while `switch_locked` is set).
    Ignored,
    /// The requested resource is temporarily unavailable.
    Busy { resource: &'static str },
    /// A caller passed an out-of-range identifier, or a guest attempted a
    /// disallowed MMIO access.
    BadAccess { what: &'static str, value: u32 },
    /// A hardware precondition was not met (wrong core, missing extension).
    UnsupportedFeature { feature: &'static str },
    /// Generic invalid-argument case not covered by a more specific variant.
    InvalidArgument { name: &'static str, value: u32 },
    /// A lookup failed.
    NotFound { resource: &'static str, id: u32 },
    /// A fixed-capacity structure has no room left.
    ResourceExhausted { resource: &'static str },
    /// A subsystem was used before its `init()` ran.
    NotInitialized { subsystem: &'static str },
    /// Default/unclassified failure; callers should prefer a specific kind.
    Unknown,
}

/// Result alias used throughout the crate.
pub type HvResult<T> = Result<T, HvError>;

impl fmt::Display for HvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ignored => write!(f, "request ignored"),
            Self::Busy { resource } => write!(f, "resource busy: {resource}"),
            Self::BadAccess { what, value } => {
                write!(f, "bad access: {what} = 0x{value:x}")
            }
            Self::UnsupportedFeature { feature } => {
                write!(f, "unsupported feature: {feature}")
            }
            Self::InvalidArgument { name, value } => {
                write!(f, "invalid argument '{name}': 0x{value:x}")
            }
            Self::NotFound { resource, id } => write!(f, "{resource} {id} not found"),
            Self::ResourceExhausted { resource } => write!(f, "resource exhausted: {resource}"),
            Self::NotInitialized { subsystem } => {
                write!(f, "subsystem not initialized: {subsystem}")
            }
            Self::Unknown => write!(f, "unknown error"),
        }
    }
}

/// Helper macro mirroring the teacher's `kernel_error!` for building
/// variants with named fields at call sites.
#[macro_export]
macro_rules! hv_error {
    (BadAccess { $what:expr, $value:expr }) => {
        $crate::error::HvError::BadAccess {
            what: $what,
            value: $value,
        }
    };
    (NotFound { $resource:expr, $id:expr }) => {
        $crate::error::HvError::NotFound {
            resource: $resource,
            id: $id,
        }
    };
    ($variant:ident) => {
        $crate::error::HvError::$variant
    };
}
