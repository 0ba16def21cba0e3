//! Error types for subnet allocation.

use thiserror::Error;

/// Errors that can occur during subnet allocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocatorError {
    /// Every configured range is fully allocated.
    #[error("no subnets available in any configured range")]
    Full,

    /// The CIDR is malformed or has host bits set below its prefix.
    #[error("invalid CIDR {cidr}: {reason}")]
    InvalidCidr {
        /// The CIDR as given by the caller.
        cidr: String,
        /// Description of the error.
        reason: String,
    },

    /// The host-bits parameter does not fit the range prefix.
    #[error("invalid host bits {host_bits} for {cidr}: {reason}")]
    InvalidHostBits {
        /// The CIDR the host bits were given for.
        cidr: String,
        /// The rejected host-bits value.
        host_bits: u32,
        /// Description of the error.
        reason: String,
    },

    /// The subnet does not belong to any configured range.
    #[error("subnet {subnet} is not in any configured range")]
    OutOfRange {
        /// The subnet that was not found.
        subnet: String,
    },
}

/// Result type for allocator operations.
pub type Result<T> = std::result::Result<T, AllocatorError>;
