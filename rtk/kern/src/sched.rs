//! Scheduler core: active-thread slot, deferred reschedule, tick clock
//!
//! State-changing operations never switch context themselves. They set
//! the defer flag and the port layer calls [`Kernel::reschedule`] once
//! on its way out of the trap; the flag is consumed there. Thread
//! selection is a find-first-set scan of the ready bitmap, so the
//! lowest-numbered ready thread always wins.

use crate::kernel::Kernel;
use crate::wq::WqId;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use rtk_core::bits;
use rtk_core::{KrnError, KrnResult, ThreadId};

use crate::config::MAX_THREADS;

/// Sentinel for "no thread running"
const IDLE: u32 = MAX_THREADS as u32;

pub(crate) struct SchedState {
    /// Currently running thread, or `IDLE`
    active: AtomicU32,
    /// A state change made the current selection stale
    defer: AtomicBool,
    /// Preemption hold-off nesting depth
    critical: AtomicU32,
}

impl SchedState {
    pub const fn new() -> Self {
        Self {
            active: AtomicU32::new(IDLE),
            defer: AtomicBool::new(false),
            critical: AtomicU32::new(0),
        }
    }
}

pub(crate) struct ClockState {
    /// Monotonic tick counter
    ticks: AtomicU32,
    /// Per-thread wake-up deadline, valid while queued on the clock
    tmr: [AtomicU32; MAX_THREADS],
}

impl ClockState {
    pub const fn new() -> Self {
        #[allow(clippy::declare_interior_mutable_const)]
        const TMR: AtomicU32 = AtomicU32::new(0);
        Self {
            ticks: AtomicU32::new(0),
            tmr: [TMR; MAX_THREADS],
        }
    }
}

impl Kernel {
    /// Currently running thread, if any
    pub fn active(&self) -> Option<ThreadId> {
        let a = self.sched.active.load(Ordering::SeqCst);
        if a == IDLE {
            None
        } else {
            Some(ThreadId::new_unchecked(a as u8))
        }
    }

    /// Mark the current thread selection stale
    ///
    /// Idempotent; the flag is consumed by the next [`reschedule`]
    /// (`Kernel::reschedule`).
    pub(crate) fn defer_sched(&self) {
        self.sched.defer.store(true, Ordering::SeqCst);
    }

    /// True if a reschedule is pending
    pub fn sched_pending(&self) -> bool {
        self.sched.defer.load(Ordering::SeqCst)
    }

    /// Enter a preemption hold-off section
    pub fn critical_enter(&self) {
        self.sched.critical.fetch_add(1, Ordering::SeqCst);
    }

    /// Leave a preemption hold-off section
    ///
    /// Returns true when the outermost section closed with a reschedule
    /// pending, in which case the caller owes a [`Kernel::reschedule`].
    pub fn critical_exit(&self) -> bool {
        let prev = self.sched.critical.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0);
        prev == 1 && self.sched_pending()
    }

    pub fn in_critical(&self) -> bool {
        self.sched.critical.load(Ordering::SeqCst) > 0
    }

    /// Consume the defer flag and pick the next thread to run
    ///
    /// Returns the thread the port layer must switch to, or `None` when
    /// either no reschedule is pending, a hold-off section is open, or
    /// no thread is ready (idle). When the ready queue drains, the
    /// time-share queue is flushed back in before giving up.
    pub fn reschedule(&self) -> Option<ThreadId> {
        if self.in_critical() {
            return None;
        }
        if !self.sched.defer.swap(false, Ordering::SeqCst) {
            return None;
        }
        let next = self.sched_pick();
        match next {
            Some(th) => self.sched.active.store(th.raw() as u32, Ordering::SeqCst),
            None => self.sched.active.store(IDLE, Ordering::SeqCst),
        }
        self.trace_push(crate::TraceEvent::Switch { th: next });
        next
    }

    fn sched_pick(&self) -> Option<ThreadId> {
        if let Some(th) = self.wq.head(WqId::READY) {
            return Some(th);
        }
        // ready drained: a new time-share cycle begins
        let parked = self.wq.word(WqId::TMSHARE).swap(0, Ordering::SeqCst);
        if parked != 0 {
            bits::update(self.wq.word(WqId::READY), |r| r | parked);
            return self.wq.head(WqId::READY);
        }
        None
    }

    /// Arm the wake-up timer of a thread, `ms` ticks from now
    pub(crate) fn clk_arm(&self, th: ThreadId, ms: u32) {
        let deadline = self.clock.ticks.load(Ordering::SeqCst).wrapping_add(ms);
        self.clock.tmr[th.index()].store(deadline, Ordering::SeqCst);
        self.wq.insert(WqId::CLOCK, th);
    }

    /// Disarm the wake-up timer of a thread
    pub(crate) fn clk_disable(&self, th: ThreadId) {
        self.wq.remove(WqId::CLOCK, th);
    }

    /// Current tick count
    pub fn ticks(&self) -> u32 {
        self.clock.ticks.load(Ordering::SeqCst)
    }

    /// Advance the clock by one tick
    ///
    /// Called from the periodic timer interrupt. Expired sleepers wake
    /// with 0, expired timed waits with the timed-out code; the running
    /// thread is rotated into the time-share queue when a peer is ready.
    pub fn tick(&self) {
        let now = self.clock.ticks.fetch_add(1, Ordering::SeqCst).wrapping_add(1);

        let mut armed = self.wq.raw(WqId::CLOCK);
        while let Some(b) = bits::lowest_set(armed) {
            armed &= !(1 << b);
            let th = ThreadId::new_unchecked(b as u8);
            if self.clock.tmr[th.index()].load(Ordering::SeqCst) != now {
                continue;
            }
            self.clk_timeout(th);
        }
        self.tmshare_rotate();
    }

    /// Wake a thread whose timer expired
    fn clk_timeout(&self, th: ThreadId) {
        let stat = self.threads.stat(th);
        if !stat.clock_armed() {
            // raced with a regular wake-up that already won
            self.clk_disable(th);
            return;
        }
        match WqId::new(stat.queue()) {
            Ok(wq) if wq == WqId::CLOCK => {
                // plain sleep
                self.wakeup_return(wq, th, 0);
            }
            Ok(wq) => {
                if wq.kind() == crate::wq::ObjKind::Irq {
                    // abandoned interrupt wait: drop the binding too
                    self.irq_unbind(th);
                }
                self.wakeup_return(wq, th, KrnError::TimedOut.code());
            }
            Err(_) => {}
        }
        self.defer_sched();
    }

    /// Round-robin the running thread when a same-priority peer waits
    fn tmshare_rotate(&self) {
        let Some(th) = self.active() else { return };
        if !self.is_ready(th) {
            return;
        }
        let peers = self.wq.raw(WqId::READY) & !th.bit();
        if peers == 0 && self.wq.is_empty(WqId::TMSHARE) {
            return;
        }
        self.wq.remove(WqId::READY, th);
        self.wq.insert(WqId::TMSHARE, th);
        self.defer_sched();
    }

    /// Put the calling thread to sleep for `ms` ticks
    pub fn sleep(&self, th: ThreadId, ms: u32) -> KrnResult<i32> {
        if ms == 0 {
            // bare yield
            self.defer_sched();
            return Ok(0);
        }
        self.suspend(th);
        self.set_stat(th, WqId::CLOCK, true);
        self.clk_arm(th, ms);
        self.trace_push(crate::TraceEvent::Block { th, wq: WqId::CLOCK });
        self.defer_sched();
        Ok(0)
    }

    /// Sleep until an absolute tick count
    pub fn alarm(&self, th: ThreadId, deadline: u32) -> KrnResult<i32> {
        let now = self.clock.ticks.load(Ordering::SeqCst);
        if deadline == now {
            self.defer_sched();
            return Ok(0);
        }
        self.suspend(th);
        self.set_stat(th, WqId::CLOCK, true);
        self.clock.tmr[th.index()].store(deadline, Ordering::SeqCst);
        self.wq.insert(WqId::CLOCK, th);
        self.trace_push(crate::TraceEvent::Block { th, wq: WqId::CLOCK });
        self.defer_sched();
        Ok(0)
    }

    /// Give up the processor without blocking
    pub fn yield_now(&self, th: ThreadId) {
        // move behind the other ready threads for this cycle
        let peers = self.wq.raw(WqId::READY) & !th.bit();
        if peers != 0 {
            self.wq.remove(WqId::READY, th);
            self.wq.insert(WqId::TMSHARE, th);
        }
        self.defer_sched();
    }
}

/// Park the processor until the next interrupt
pub fn idle_wait() {
    #[cfg(target_arch = "arm")]
    cortex_m::asm::wfi();
    #[cfg(not(target_arch = "arm"))]
    core::hint::spin_loop();
}
