#![no_std]
#![forbid(unsafe_code)]

//! # RTK Core
//!
//! Foundation types for the RTK real-time kernel: the kernel error set,
//! atomic bitmap primitives shared between system calls and interrupt
//! handlers, and the thread identity and status-word types.

#[cfg(feature = "std")]
extern crate std;

use core::fmt;

pub mod bits;
pub mod thread;

pub use thread::{ThreadId, ThreadStat};

/// Kernel version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type used throughout the kernel
pub type KrnResult<T> = Result<T, KrnError>;

/// Error types for kernel operations
///
/// Every variant maps to a negative system-call return code; `0` is
/// reserved for success and never appears here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KrnError {
    /// Blocking call timed out
    TimedOut,
    /// Blocking call interrupted by thread cancellation
    Interrupted,
    /// Invalid thread or object id, or object not allocated
    InvalidArgument,
    /// Non-blocking call would have to block
    Again,
    /// Deadlock condition detected
    Deadlock,
    /// Protocol violation (caller does not hold the object)
    NotPermitted,
    /// Unknown or unimplemented system call
    NotImplemented,
    /// Hardware fault delivered to the calling thread
    Fault,
    /// Object pool exhausted
    OutOfMemory,
}

impl KrnError {
    /// System-call return code for this error
    pub const fn code(self) -> i32 {
        match self {
            KrnError::TimedOut => -1,
            KrnError::Interrupted => -2,
            KrnError::InvalidArgument => -3,
            KrnError::Again => -4,
            KrnError::Deadlock => -5,
            KrnError::NotPermitted => -6,
            KrnError::NotImplemented => -7,
            KrnError::Fault => -8,
            KrnError::OutOfMemory => -9,
        }
    }
}

impl fmt::Display for KrnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KrnError::TimedOut => write!(f, "Blocking call timed out"),
            KrnError::Interrupted => write!(f, "Call interrupted by cancellation"),
            KrnError::InvalidArgument => write!(f, "Invalid thread or object id"),
            KrnError::Again => write!(f, "Non-blocking call would block"),
            KrnError::Deadlock => write!(f, "Deadlock condition detected"),
            KrnError::NotPermitted => write!(f, "Caller does not hold the object"),
            KrnError::NotImplemented => write!(f, "Unknown system call"),
            KrnError::Fault => write!(f, "Hardware fault"),
            KrnError::OutOfMemory => write!(f, "Object pool exhausted"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for KrnError {}

#[cfg(feature = "defmt")]
impl defmt::Format for KrnError {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            KrnError::TimedOut => defmt::write!(fmt, "TimedOut"),
            KrnError::Interrupted => defmt::write!(fmt, "Interrupted"),
            KrnError::InvalidArgument => defmt::write!(fmt, "InvalidArgument"),
            KrnError::Again => defmt::write!(fmt, "Again"),
            KrnError::Deadlock => defmt::write!(fmt, "Deadlock"),
            KrnError::NotPermitted => defmt::write!(fmt, "NotPermitted"),
            KrnError::NotImplemented => defmt::write!(fmt, "NotImplemented"),
            KrnError::Fault => defmt::write!(fmt, "Fault"),
            KrnError::OutOfMemory => defmt::write!(fmt, "OutOfMemory"),
        }
    }
}

/// Map a kernel result to the raw system-call return value
pub fn retcode(res: KrnResult<i32>) -> i32 {
    match res {
        Ok(v) => v,
        Err(e) => e.code(),
    }
}
