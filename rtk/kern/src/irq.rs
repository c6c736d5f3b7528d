//! Interrupt wait binding
//!
//! A thread waits for an interrupt source by binding itself as its
//! owner and enabling the source. The handler entry disables the source
//! again and wakes the owner, so the interrupt cannot re-fire before
//! the thread ran. Each source has at most one owner, and an owner has
//! at most one source.

use crate::kernel::Kernel;
use crate::wq::WqId;
use core::sync::atomic::{AtomicU32, Ordering};
use rtk_core::bits;
use rtk_core::{KrnError, KrnResult, ThreadId};

use crate::config::IRQ_MAX;

const NO_OWNER: u32 = u32::MAX;

pub(crate) struct IrqTable {
    /// Thread bound to each source
    owner: [AtomicU32; IRQ_MAX],
    /// Sources the kernel currently wants enabled
    enabled: AtomicU32,
}

impl IrqTable {
    pub const fn new() -> Self {
        #[allow(clippy::declare_interior_mutable_const)]
        const FREE: AtomicU32 = AtomicU32::new(NO_OWNER);
        Self {
            owner: [FREE; IRQ_MAX],
            enabled: AtomicU32::new(0),
        }
    }

    pub fn owner(&self, irq: usize) -> Option<ThreadId> {
        let o = self.owner[irq].load(Ordering::SeqCst);
        if o == NO_OWNER {
            None
        } else {
            Some(ThreadId::new_unchecked(o as u8))
        }
    }

    fn bind(&self, irq: usize, th: ThreadId) -> bool {
        self.owner[irq]
            .compare_exchange(NO_OWNER, th.raw() as u32, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn unbind(&self, irq: usize) -> Option<ThreadId> {
        let prev = self.owner[irq].swap(NO_OWNER, Ordering::SeqCst);
        if prev == NO_OWNER {
            None
        } else {
            Some(ThreadId::new_unchecked(prev as u8))
        }
    }
}

impl Kernel {
    fn irq_check(raw: u32) -> KrnResult<usize> {
        if (raw as usize) < IRQ_MAX {
            Ok(raw as usize)
        } else {
            Err(KrnError::InvalidArgument)
        }
    }

    /// Thread currently bound to a source
    pub fn irq_owner(&self, raw: u32) -> KrnResult<Option<ThreadId>> {
        Ok(self.irqs.owner(Self::irq_check(raw)?))
    }

    /// True if the kernel wants the source enabled
    ///
    /// The port layer mirrors this word into the interrupt controller.
    pub fn irq_enabled(&self, raw: u32) -> KrnResult<bool> {
        let irq = Self::irq_check(raw)?;
        Ok(bits::bit_get(&self.irqs.enabled, irq as u32))
    }

    pub(crate) fn irq_source_enable(&self, irq: usize, on: bool) {
        bits::bit_put(&self.irqs.enabled, irq as u32, on);
    }

    /// Block until the source fires
    pub fn irq_wait(&self, th: ThreadId, raw: u32) -> KrnResult<i32> {
        self.irq_wait_inner(th, raw, None)
    }

    /// Block until the source fires, with a timeout in ticks
    pub fn irq_timedwait(&self, th: ThreadId, raw: u32, ms: u32) -> KrnResult<i32> {
        self.irq_wait_inner(th, raw, Some(ms))
    }

    fn irq_wait_inner(&self, th: ThreadId, raw: u32, tmo: Option<u32>) -> KrnResult<i32> {
        let irq = Self::irq_check(raw)?;
        if !self.irqs.bind(irq, th) {
            return Err(KrnError::Again);
        }
        self.suspend(th);
        match tmo {
            None => {
                // owner binding is the whole wait state: the status stays
                // ready so a pause/resume knows to re-enable the source
                self.clear_stat(th);
            }
            Some(ms) => {
                let wq = WqId::irq(irq)?;
                self.set_stat(th, wq, true);
                self.wq.insert(wq, th);
                self.clk_arm(th, ms);
            }
        }
        self.set_retval(th, 0);
        self.irq_source_enable(irq, true);
        self.trace_push(crate::TraceEvent::IrqWait { th, irq: irq as u8 });
        self.defer_sched();
        Ok(0)
    }

    /// Interrupt entry for an arbitrated source
    ///
    /// Called by the port layer's handler. Disables the source and wakes
    /// the owner; with no owner bound the interrupt is spurious and only
    /// the disable sticks.
    pub fn irq_signal(&self, raw: u32) -> KrnResult<i32> {
        let irq = Self::irq_check(raw)?;
        self.irq_source_enable(irq, false);
        let Some(th) = self.irqs.unbind(irq) else {
            return Ok(0);
        };
        let wq = WqId::irq(irq)?;
        if self.wq.contains(wq, th) {
            self.wakeup(wq, th);
        } else {
            self.make_ready(th);
            self.clear_stat(th);
            self.set_retval(th, 0);
        }
        self.defer_sched();
        Ok(0)
    }

    /// Drop any source binding held by a thread
    ///
    /// Used when the thread dies or is canceled while waiting.
    pub(crate) fn irq_unbind(&self, th: ThreadId) {
        for irq in 0..IRQ_MAX {
            if self.irqs.owner(irq) == Some(th) {
                self.irqs.unbind(irq);
                self.irq_source_enable(irq, false);
            }
        }
    }

    pub(crate) fn irq_bound_source(&self, th: ThreadId) -> Option<usize> {
        (0..IRQ_MAX).find(|&irq| self.irqs.owner(irq) == Some(th))
    }
}
