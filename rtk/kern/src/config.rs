//! Compile-time kernel table sizes
//!
//! Threads and primitives are allocated from fixed-size static tables;
//! these constants size every table in the [`Kernel`](crate::Kernel).
//! `MAX_THREADS` may not exceed 32: every wait queue is a single 32-bit
//! bitmap of thread ids.

/// Maximum number of threads, including never-recycled system threads
pub const MAX_THREADS: usize = 32;

/// Number of mutex slots
pub const MUTEX_MAX: usize = 8;

/// Number of condition-variable slots
pub const COND_MAX: usize = 4;

/// Number of semaphore slots
pub const SEM_MAX: usize = 8;

/// Number of event-set slots
pub const EVENT_MAX: usize = 4;

/// Number of single-bit flag slots (at most 32, one shared word)
pub const FLAG_MAX: usize = 8;

/// Number of gate slots
pub const GATE_MAX: usize = 8;

/// Number of interrupt sources the kernel arbitrates
pub const IRQ_MAX: usize = 16;

const _: () = assert!(MAX_THREADS <= 32);
const _: () = assert!(FLAG_MAX <= 32);
const _: () = assert!(IRQ_MAX <= 32);
