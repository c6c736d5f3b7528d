//! Fault delivery
//!
//! A faulting thread is frozen the same way a paused one is, parked in
//! the fault overlay, and a record of the fault is kept for a debugger
//! or supervisor to collect. The policy decides whether the system
//! keeps running without the thread or halts for inspection.

use crate::kernel::Kernel;
use crate::wq::WqId;
use core::cell::RefCell;
use critical_section::Mutex;
use rtk_core::{KrnResult, ThreadId};

/// What the machine was doing when it faulted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Invalid memory access
    MemFault,
    /// Undefined or illegal instruction
    UsageFault,
    /// Bus error
    BusFault,
    /// Fault escalated inside a handler
    HardFault,
    /// Kernel self-check failed
    KernelFault,
}

#[cfg(feature = "defmt")]
impl defmt::Format for FaultKind {
    fn format(&self, fmt: defmt::Formatter) {
        let name = match self {
            FaultKind::MemFault => "mem",
            FaultKind::UsageFault => "usage",
            FaultKind::BusFault => "bus",
            FaultKind::HardFault => "hard",
            FaultKind::KernelFault => "kernel",
        };
        defmt::write!(fmt, "{}", name);
    }
}

/// Snapshot taken at fault delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultRecord {
    pub th: ThreadId,
    pub kind: FaultKind,
    /// Faulting address or instruction, as reported by the port layer
    pub addr: u32,
}

/// System behavior after a thread faults
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPolicy {
    /// Park the thread, keep scheduling the others
    Suspend,
    /// Stop scheduling entirely until a debugger intervenes
    Halt,
}

pub(crate) struct FaultState {
    /// Most recent undelivered fault
    record: Mutex<RefCell<Option<FaultRecord>>>,
}

impl FaultState {
    pub const fn new() -> Self {
        Self {
            record: Mutex::new(RefCell::new(None)),
        }
    }
}

impl Kernel {
    /// Deliver a fault against a thread
    ///
    /// Called from the port layer's fault handlers. The thread freezes
    /// in the fault overlay with its status word intact, exactly like a
    /// pause, and the record is held until collected.
    pub fn fault_raise(&self, th: ThreadId, kind: FaultKind, addr: u32) {
        ktrace!("<{}> fault", th.raw());
        self.wq.remove_everywhere(th);
        if let Some(irq) = self.irq_bound_source(th) {
            self.irq_source_enable(irq, false);
        }
        self.wq.insert(WqId::FAULT, th);

        let record = FaultRecord { th, kind, addr };
        critical_section::with(|cs| {
            self.fault.record.borrow_ref_mut(cs).replace(record);
        });
        self.trace_push(crate::TraceEvent::Fault { th });

        if let Some(hook) = self.config.fault_hook {
            hook(&record);
        }

        if self.config.fault_policy == FaultPolicy::Halt {
            self.critical_enter();
        }
        self.defer_sched();
    }

    /// Collect the pending fault record, if any
    pub fn fault_take(&self) -> Option<FaultRecord> {
        critical_section::with(|cs| self.fault.record.borrow_ref_mut(cs).take())
    }

    /// True if a thread sits in the fault overlay
    pub fn is_faulted(&self, raw: u32) -> KrnResult<bool> {
        let th = self.thread_check(raw)?;
        Ok(self.wq.contains(WqId::FAULT, th))
    }

    /// Release a faulted thread back through the resume dispatch
    ///
    /// For a debugger that patched the thread's state and wants it to
    /// retry. Under the halt policy this also lifts the hold-off taken
    /// at delivery.
    pub fn fault_release(&self, raw: u32) -> KrnResult<i32> {
        let th = self.thread_check(raw)?;
        if !self.wq.contains(WqId::FAULT, th) {
            return Ok(0);
        }
        self.wq.remove(WqId::FAULT, th);
        self.resume_dispatch(th);
        if self.config.fault_policy == FaultPolicy::Halt {
            self.critical_exit();
        }
        self.defer_sched();
        Ok(0)
    }
}
