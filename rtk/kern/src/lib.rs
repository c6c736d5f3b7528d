#![no_std]

//! # RTK Kernel
//!
//! The wait-queue object model and resume/dispatch machinery of a
//! preemptible real-time kernel for single-core microcontrollers.
//!
//! All kernel state lives in a single [`Kernel`] struct: fixed thread
//! tables, one bitmap per wait queue, and the per-primitive state stores
//! (mutex owners, semaphore counts, event pend/mask pairs, flag bits,
//! packed gate states, IRQ bindings). Every operation takes `&Kernel`;
//! words shared with interrupt handlers are atomics mutated through
//! optimistic retry loops, never a blocking lock.
//!
//! Key design points:
//! - A thread is a member of at most one wait-queue bitmap at a time;
//!   the paused and faulted states are orthogonal overlays so the
//!   original wait condition can be re-evaluated on resume.
//! - Queue hand-off is deterministic: the lowest-numbered waiting
//!   thread wins, found by a find-first-set scan.
//! - State-changing operations never context-switch synchronously; they
//!   set a deferred-reschedule flag consumed once by
//!   [`Kernel::reschedule`] at trap exit.

#[cfg(feature = "defmt")]
macro_rules! ktrace {
    ($($arg:tt)*) => { defmt::trace!($($arg)*) };
}
#[cfg(not(feature = "defmt"))]
macro_rules! ktrace {
    ($($arg:tt)*) => {};
}

pub mod alloc;
pub mod cond;
pub mod config;
pub mod event;
pub mod fault;
pub mod flag;
pub mod gate;
pub mod irq;
pub mod kernel;
pub mod mutex;
pub mod pause;
mod resume;
pub mod sched;
pub mod sem;
pub mod svc;
pub mod thread;
pub mod trace;
pub mod wq;

pub use fault::{FaultKind, FaultPolicy, FaultRecord};
pub use gate::GateState;
pub use kernel::{Kernel, KernelConfig};
pub use rtk_core::{KrnError, KrnResult, ThreadId, ThreadStat};
pub use svc::SvcNum;
pub use trace::TraceEvent;
pub use wq::{ObjKind, WqId};
