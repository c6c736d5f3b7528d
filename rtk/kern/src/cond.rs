//! Condition variables
//!
//! A condition variable remembers the mutex it was last waited on with.
//! Wait releases the mutex (with the usual hand-off) and blocks; signal
//! moves the lowest-numbered waiter either straight into ownership of
//! the mutex or onto the mutex queue, so a signaled thread always
//! returns holding the lock.

use crate::kernel::Kernel;
use crate::wq::{ObjKind, WqId};
use core::sync::atomic::{AtomicU32, Ordering};
use rtk_core::bits;
use rtk_core::{KrnError, KrnResult, ThreadId};

use crate::config::COND_MAX;

const NO_BIND: u32 = u32::MAX;

pub(crate) struct CondPool {
    /// Queue id of the mutex bound at the last wait
    mutex: [AtomicU32; COND_MAX],
}

impl CondPool {
    pub const fn new() -> Self {
        #[allow(clippy::declare_interior_mutable_const)]
        const UNBOUND: AtomicU32 = AtomicU32::new(NO_BIND);
        Self { mutex: [UNBOUND; COND_MAX] }
    }

    pub fn bound_mutex(&self, idx: usize) -> Option<u32> {
        let m = self.mutex[idx].load(Ordering::SeqCst);
        if m == NO_BIND {
            None
        } else {
            Some(m)
        }
    }
}

impl Kernel {
    pub(crate) fn cond_check(&self, raw: u32) -> KrnResult<(WqId, usize)> {
        let wq = WqId::new(raw)?;
        if wq.kind() != ObjKind::Cond {
            return Err(KrnError::InvalidArgument);
        }
        let idx = wq.slot();
        if !bits::bit_get(self.allocs.cond_word(), idx as u32) {
            return Err(KrnError::InvalidArgument);
        }
        Ok((wq, idx))
    }

    /// Release the mutex and wait to be signaled
    ///
    /// The caller must hold `mtx`. On a plain signal wake-up the caller
    /// holds the mutex again; on timeout it does not.
    pub fn cond_wait(&self, th: ThreadId, raw: u32, mtx: u32) -> KrnResult<i32> {
        self.cond_wait_inner(th, raw, mtx, None)
    }

    /// Condition wait with a timeout in ticks
    pub fn cond_timedwait(&self, th: ThreadId, raw: u32, mtx: u32, ms: u32) -> KrnResult<i32> {
        self.cond_wait_inner(th, raw, mtx, Some(ms))
    }

    fn cond_wait_inner(&self, th: ThreadId, raw: u32, mtx: u32, tmo: Option<u32>) -> KrnResult<i32> {
        let (wq, idx) = self.cond_check(raw)?;
        let (mwq, midx) = self.mutex_check(mtx)?;
        if self.mutexes.owner(midx) != Some(th) {
            return Err(KrnError::NotPermitted);
        }
        self.conds.mutex[idx].store(mtx, Ordering::SeqCst);

        // block first, then release: the hand-off inside unlock may make
        // the signaling thread runnable immediately
        self.suspend(th);
        self.set_stat(th, wq, tmo.is_some());
        self.wq.insert(wq, th);
        if let Some(ms) = tmo {
            self.clk_arm(th, ms);
        }
        self.set_retval(th, 0);
        self.trace_push(crate::TraceEvent::Block { th, wq });
        self.mutex_unlock_wakeup(mwq, midx);
        self.defer_sched();
        Ok(0)
    }

    /// Wake the lowest-numbered waiter
    pub fn cond_signal(&self, raw: u32) -> KrnResult<i32> {
        let (wq, idx) = self.cond_check(raw)?;
        self.cond_signal_one(wq, idx);
        Ok(0)
    }

    /// Wake every waiter
    ///
    /// Waiters beyond the first queue up on the mutex; the lock is still
    /// handed to one thread at a time.
    pub fn cond_broadcast(&self, raw: u32) -> KrnResult<i32> {
        let (wq, idx) = self.cond_check(raw)?;
        while self.cond_signal_one(wq, idx) {}
        Ok(0)
    }

    fn cond_signal_one(&self, wq: WqId, idx: usize) -> bool {
        let Some(next) = self.wq.pop_head(wq) else {
            return false;
        };
        self.clk_disable(next);
        let Some(mtx) = self.conds.bound_mutex(idx) else {
            // unbound can only happen through state corruption; recover
            // by a plain wake
            self.wakeup(wq, next);
            self.defer_sched();
            return true;
        };
        // checked at wait time, cannot fail
        let (mwq, midx) = match self.mutex_check(mtx) {
            Ok(v) => v,
            Err(_) => {
                self.wakeup(wq, next);
                self.defer_sched();
                return true;
            }
        };
        if self.mutexes.try_take(midx, next).is_ok() {
            self.make_ready(next);
            self.clear_stat(next);
            self.set_retval(next, 0);
            self.trace_push(crate::TraceEvent::Wakeup { th: next, wq });
            self.defer_sched();
        } else {
            // mutex busy: migrate the waiter onto the mutex queue
            self.set_stat(next, mwq, false);
            self.wq.insert(mwq, next);
            self.set_retval(next, 0);
        }
        true
    }
}
