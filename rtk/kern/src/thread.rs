//! Thread table and lifecycle
//!
//! Fixed-size arrays indexed by thread id: saved-context token, packed
//! status word, return-value cell, plus the allocation and single-step
//! bitmaps. The paused and faulted states live in their overlay queues,
//! not here, so a paused thread's original wait condition survives.

use crate::kernel::Kernel;
use crate::wq::WqId;
use core::sync::atomic::{AtomicI32, AtomicU32, AtomicUsize, Ordering};
use rtk_core::bits;
use rtk_core::{KrnError, KrnResult, ThreadId, ThreadStat};

use crate::config::MAX_THREADS;

/// No saved context published
pub(crate) const CTX_NONE: usize = 0;

pub(crate) struct ThreadTable {
    /// Saved-context tokens; owned by the thread while blocked or
    /// preempted, transferred to the scheduler's current slot while
    /// running
    ctx: [AtomicUsize; MAX_THREADS],
    /// Packed (queue id, clock-armed) status words
    stat: [AtomicU32; MAX_THREADS],
    /// Return-value cells (the saved r0 of the suspended call)
    retval: [AtomicI32; MAX_THREADS],
    /// Allocation bitmap
    alloc: AtomicU32,
    /// Pending single-step requests, cleared on pause
    step_req: AtomicU32,
}

impl ThreadTable {
    pub const fn new() -> Self {
        #[allow(clippy::declare_interior_mutable_const)]
        const CTX: AtomicUsize = AtomicUsize::new(CTX_NONE);
        #[allow(clippy::declare_interior_mutable_const)]
        const STAT: AtomicU32 = AtomicU32::new(0);
        #[allow(clippy::declare_interior_mutable_const)]
        const RET: AtomicI32 = AtomicI32::new(0);
        Self {
            ctx: [CTX; MAX_THREADS],
            stat: [STAT; MAX_THREADS],
            retval: [RET; MAX_THREADS],
            alloc: AtomicU32::new(0),
            step_req: AtomicU32::new(0),
        }
    }

    pub fn alloc_word(&self) -> &AtomicU32 {
        &self.alloc
    }

    pub fn step_req_word(&self) -> &AtomicU32 {
        &self.step_req
    }

    pub fn ctx(&self, th: ThreadId) -> usize {
        self.ctx[th.index()].load(Ordering::SeqCst)
    }

    pub fn set_ctx(&self, th: ThreadId, ctx: usize) {
        self.ctx[th.index()].store(ctx, Ordering::SeqCst);
    }

    pub fn stat(&self, th: ThreadId) -> ThreadStat {
        ThreadStat::from_raw(self.stat[th.index()].load(Ordering::SeqCst))
    }

    pub fn set_stat(&self, th: ThreadId, stat: ThreadStat) {
        self.stat[th.index()].store(stat.raw(), Ordering::SeqCst);
    }

    pub fn retval(&self, th: ThreadId) -> i32 {
        self.retval[th.index()].load(Ordering::SeqCst)
    }

    pub fn set_retval(&self, th: ThreadId, val: i32) {
        self.retval[th.index()].store(val, Ordering::SeqCst);
    }
}

impl Kernel {
    /// Validate a raw thread id from a system-call argument
    pub fn thread_check(&self, raw: u32) -> KrnResult<ThreadId> {
        if raw as usize >= MAX_THREADS {
            return Err(KrnError::InvalidArgument);
        }
        let th = ThreadId::new_unchecked(raw as u8);
        if !self.thread_is_alloc(th) {
            return Err(KrnError::InvalidArgument);
        }
        Ok(th)
    }

    pub fn thread_is_alloc(&self, th: ThreadId) -> bool {
        bits::bit_get(self.threads.alloc_word(), th.raw() as u32)
    }

    pub fn is_ready(&self, th: ThreadId) -> bool {
        self.wq.contains(WqId::READY, th)
    }

    /// Last-recorded status word of a thread
    pub fn thread_stat(&self, th: ThreadId) -> ThreadStat {
        self.threads.stat(th)
    }

    /// Return value the thread will observe when it next runs
    pub fn thread_retval(&self, th: ThreadId) -> i32 {
        self.threads.retval(th)
    }

    pub(crate) fn set_retval(&self, th: ThreadId, val: i32) {
        self.threads.set_retval(th, val);
    }

    /// Remove a thread from the ready and time-share queues
    ///
    /// A thread may transiently be in no queue at all inside a system
    /// call, as long as it is queued somewhere before the call returns.
    pub(crate) fn suspend(&self, th: ThreadId) {
        self.wq.remove(WqId::READY, th);
        self.wq.remove(WqId::TMSHARE, th);
    }

    pub(crate) fn make_ready(&self, th: ThreadId) {
        self.wq.insert(WqId::READY, th);
    }

    pub(crate) fn set_stat(&self, th: ThreadId, wq: WqId, clock_armed: bool) {
        self.threads.set_stat(th, ThreadStat::new(wq.raw(), clock_armed));
    }

    pub(crate) fn clear_stat(&self, th: ThreadId) {
        self.threads.set_stat(th, ThreadStat::READY);
    }

    /// Move a blocked thread to ready with return value 0
    pub(crate) fn wakeup(&self, wq: WqId, th: ThreadId) {
        self.wakeup_return(wq, th, 0);
    }

    /// Move a blocked thread to ready with an explicit return value
    ///
    /// Safe to race against a timeout wake-up: the loser's bitmap
    /// removal is a no-op.
    pub(crate) fn wakeup_return(&self, wq: WqId, th: ThreadId, ret: i32) {
        self.make_ready(th);
        self.wq.remove(wq, th);
        self.clk_disable(th);
        self.clear_stat(th);
        self.threads.set_retval(th, ret);
        self.trace_push(crate::TraceEvent::Wakeup { th, wq });
    }

    /// Block the calling thread on a wait queue (no timeout)
    pub(crate) fn wait_on(&self, th: ThreadId, wq: WqId) {
        self.suspend(th);
        self.set_stat(th, wq, false);
        self.wq.insert(wq, th);
        self.trace_push(crate::TraceEvent::Block { th, wq });
        self.defer_sched();
    }

    /// Saved-context token of a thread, for the port layer's switcher
    pub fn thread_ctx(&self, th: ThreadId) -> usize {
        self.threads.ctx(th)
    }

    /// Publish a thread's saved-context token
    pub fn thread_set_ctx(&self, th: ThreadId, ctx: usize) {
        self.threads.set_ctx(th, ctx);
    }

    /// Allocate a thread slot and make it ready
    ///
    /// `ctx` is the opaque saved-context token prepared by the port
    /// layer; it must be nonzero.
    pub fn thread_create(&self, ctx: usize) -> KrnResult<ThreadId> {
        if ctx == CTX_NONE {
            return Err(KrnError::InvalidArgument);
        }
        let prev = bits::try_update(self.threads.alloc_word(), |a| {
            bits::lowest_set(!a & Self::alloc_mask()).map(|b| a | (1 << b))
        })
        .map_err(|_| KrnError::OutOfMemory)?;
        let th = ThreadId::new_unchecked(bits::lowest_set(!prev & Self::alloc_mask()).unwrap_or(0) as u8);

        self.threads.set_ctx(th, ctx);
        self.threads.set_stat(th, ThreadStat::READY);
        self.threads.set_retval(th, 0);
        self.make_ready(th);
        self.defer_sched();
        Ok(th)
    }

    const fn alloc_mask() -> u32 {
        if MAX_THREADS == 32 {
            u32::MAX
        } else {
            (1u32 << MAX_THREADS) - 1
        }
    }

    /// Strip a thread from every table and recycle its slot
    fn thread_abort(&self, th: ThreadId) {
        bits::bit_clr(self.threads.alloc_word(), th.raw() as u32);
        bits::bit_clr(self.threads.step_req_word(), th.raw() as u32);
        self.threads.set_ctx(th, CTX_NONE);
        self.threads.set_stat(th, ThreadStat::READY);
        self.wq.remove_everywhere(th);
        self.irq_unbind(th);
        self.defer_sched();
    }

    /// Wake every thread joined on `th`, handing each the exit code
    fn join_wakeup_all(&self, th: ThreadId, code: i32) -> bool {
        let wq = WqId::join(th);
        let mut woken = false;
        while let Some(j) = self.wq.pop_head(wq) {
            self.make_ready(j);
            self.clk_disable(j);
            self.clear_stat(j);
            self.threads.set_retval(j, code);
            woken = true;
        }
        woken
    }

    /// Voluntary exit of the calling thread
    ///
    /// With no joiner pending the thread parks in the canceled queue and
    /// holds its slot until someone joins it; otherwise the joiners are
    /// woken with the exit code and the slot is recycled immediately.
    pub fn thread_exit(&self, self_th: ThreadId, code: i32) {
        if self.wq.is_empty(WqId::join(self_th)) {
            ktrace!("<{}> exit: parked until join", self_th.raw());
            self.suspend(self_th);
            self.set_stat(self_th, WqId::CANCELED, false);
            self.wq.insert(WqId::CANCELED, self_th);
            self.threads.set_retval(self_th, code);
            self.defer_sched();
            return;
        }
        self.join_wakeup_all(self_th, code);
        self.thread_abort(self_th);
    }

    /// Forcibly terminate a thread
    pub fn thread_terminate(&self, raw: u32, code: i32) -> KrnResult<i32> {
        let th = self.thread_check(raw)?;
        let stat = self.threads.stat(th);
        let wq = WqId::new(stat.queue())?;
        self.wq.remove(wq, th);
        self.clk_disable(th);
        self.join_wakeup_all(th, code);
        self.thread_abort(th);
        Ok(0)
    }

    /// Cancel a thread's pending blocking call
    ///
    /// A blocked victim wakes with the interrupted code; a victim that
    /// is currently runnable is left untouched (it has no call to
    /// interrupt).
    pub fn thread_cancel(&self, raw: u32) -> KrnResult<i32> {
        let th = self.thread_check(raw)?;
        let stat = self.threads.stat(th);
        let wq = WqId::new(stat.queue())?;
        if wq != WqId::READY && self.wq.contains(wq, th) {
            self.wakeup_return(wq, th, KrnError::Interrupted.code());
            self.defer_sched();
        }
        Ok(0)
    }

    /// Wait for a thread to exit and collect its code
    pub fn thread_join(&self, self_th: ThreadId, raw: u32) -> KrnResult<i32> {
        let th = self.thread_check(raw)?;
        if th == self_th {
            return Err(KrnError::Deadlock);
        }
        if self.wq.contains(WqId::CANCELED, th) {
            // parked exiter: collect its code and recycle the slot now
            let code = self.threads.retval(th);
            self.wq.remove(WqId::CANCELED, th);
            self.thread_abort(th);
            return Ok(code);
        }
        self.set_retval(self_th, 0);
        self.wait_on(self_th, WqId::join(th));
        Ok(0)
    }

    /// Number of wait queues the thread is currently a member of,
    /// excluding the clock queue and the paused/faulted overlays
    ///
    /// The kernel invariant is that this never exceeds one.
    pub fn queue_membership(&self, th: ThreadId) -> usize {
        (0..crate::wq::WQ_COUNT)
            .filter(|&i| i != crate::wq::WQ_CLOCK && i != crate::wq::WQ_PAUSED && i != crate::wq::WQ_FAULT)
            .filter(|&i| self.wq.contains(WqId::from_index(i), th))
            .count()
    }
}
