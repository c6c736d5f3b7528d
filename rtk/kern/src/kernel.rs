//! The kernel state block
//!
//! Every table the kernel owns lives in this one struct. No statics, no
//! globals: the port layer allocates a single `Kernel` (usually in a
//! `static`), and every operation takes `&Kernel`. All shared words are
//! atomics, so `&Kernel` is freely shared between thread mode and
//! interrupt handlers.

use crate::alloc::AllocBitmaps;
use crate::cond::CondPool;
use crate::event::EventPool;
use crate::fault::{FaultPolicy, FaultState};
use crate::flag::FlagPool;
use crate::gate::GatePool;
use crate::irq::IrqTable;
use crate::mutex::MutexPool;
use crate::sched::{ClockState, SchedState};
use crate::sem::SemPool;
use crate::thread::ThreadTable;
use crate::trace::TraceRing;
use crate::wq::WaitQueueBank;

/// Boot-time kernel parameters
#[derive(Clone, Copy)]
pub struct KernelConfig {
    /// What to do with a thread that faults
    pub fault_policy: FaultPolicy,
    /// Called at fault delivery, before the policy applies
    pub fault_hook: Option<fn(&crate::FaultRecord)>,
}

impl KernelConfig {
    pub const fn new() -> Self {
        Self {
            fault_policy: FaultPolicy::Suspend,
            fault_hook: None,
        }
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// All kernel state
pub struct Kernel {
    pub(crate) threads: ThreadTable,
    pub(crate) wq: WaitQueueBank,
    pub(crate) sched: SchedState,
    pub(crate) clock: ClockState,
    pub(crate) mutexes: MutexPool,
    pub(crate) conds: CondPool,
    pub(crate) sems: SemPool,
    pub(crate) events: EventPool,
    pub(crate) flags: FlagPool,
    pub(crate) gates: GatePool,
    pub(crate) irqs: IrqTable,
    pub(crate) allocs: AllocBitmaps,
    pub(crate) fault: FaultState,
    pub(crate) trace: TraceRing,
    pub(crate) config: KernelConfig,
}

impl Kernel {
    /// A kernel with empty tables, suitable for a `static`
    pub const fn new(config: KernelConfig) -> Self {
        Self {
            threads: ThreadTable::new(),
            wq: WaitQueueBank::new(),
            sched: SchedState::new(),
            clock: ClockState::new(),
            mutexes: MutexPool::new(),
            conds: CondPool::new(),
            sems: SemPool::new(),
            events: EventPool::new(),
            flags: FlagPool::new(),
            gates: GatePool::new(),
            irqs: IrqTable::new(),
            allocs: AllocBitmaps::new(),
            fault: FaultState::new(),
            trace: TraceRing::new(),
            config,
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wq::WqId;
    use rtk_core::ThreadId;

    fn boot() -> Kernel {
        Kernel::new(KernelConfig::new())
    }

    #[test]
    fn test_fresh_kernel_is_idle() {
        let k = boot();
        assert!(k.active().is_none());
        assert!(k.reschedule().is_none());
        assert!(k.wq.is_empty(WqId::READY));
    }

    #[test]
    fn test_create_run_exit() {
        let k = boot();
        let a = k.thread_create(0x1000).unwrap();
        let b = k.thread_create(0x2000).unwrap();
        assert_eq!(a.raw(), 0);
        assert_eq!(b.raw(), 1);

        // lowest id runs first
        assert_eq!(k.reschedule(), Some(a));
        assert_eq!(k.active(), Some(a));

        // no joiner: the exiting thread parks in the canceled queue
        k.thread_exit(a, 7);
        assert_eq!(k.reschedule(), Some(b));
        assert!(k.wq.contains(WqId::CANCELED, a));

        // joining a parked exiter collects the code immediately
        assert_eq!(k.thread_join(b, a.raw() as u32), Ok(7));
        assert!(!k.thread_is_alloc(a));
    }

    #[test]
    fn test_join_blocks_until_exit() {
        let k = boot();
        let a = k.thread_create(0x1000).unwrap();
        let b = k.thread_create(0x2000).unwrap();

        assert_eq!(k.thread_join(b, a.raw() as u32), Ok(0));
        assert!(!k.is_ready(b));

        k.thread_exit(a, 42);
        assert!(k.is_ready(b));
        assert_eq!(k.thread_retval(b), 42);
        // slot recycled right away since a joiner was pending
        assert!(!k.thread_is_alloc(a));
    }

    #[test]
    fn test_cancel_wakes_blocked_victim() {
        let k = boot();
        let a = k.thread_create(0x1000).unwrap();
        let b = k.thread_create(0x2000).unwrap();

        k.sleep(a, 100).unwrap();
        assert!(!k.is_ready(a));

        k.thread_cancel(a.raw() as u32).unwrap();
        assert!(k.is_ready(a));
        assert_eq!(k.thread_retval(a), crate::KrnError::Interrupted.code());

        // a runnable victim is left alone
        k.thread_cancel(b.raw() as u32).unwrap();
        assert!(k.is_ready(b));
    }

    #[test]
    fn test_sleep_expires() {
        let k = boot();
        let a = k.thread_create(0x1000).unwrap();
        k.sleep(a, 3).unwrap();
        assert!(!k.is_ready(a));

        k.tick();
        k.tick();
        assert!(!k.is_ready(a));
        k.tick();
        assert!(k.is_ready(a));
        assert_eq!(k.thread_retval(a), 0);
    }

    #[test]
    fn test_critical_section_holds_off_reschedule() {
        let k = boot();
        let a = k.thread_create(0x1000).unwrap();

        k.critical_enter();
        let _ = a;
        assert!(k.reschedule().is_none());
        assert!(k.critical_exit());
        assert_eq!(k.reschedule(), Some(a));
    }

    #[test]
    fn test_thread_slots_exhaust() {
        let k = boot();
        for _ in 0..crate::config::MAX_THREADS {
            k.thread_create(0x1000).unwrap();
        }
        assert_eq!(k.thread_create(0x1000), Err(crate::KrnError::OutOfMemory));
    }
}
