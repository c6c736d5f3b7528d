//! Mutexes
//!
//! Ownership is a single word per slot: the owning thread id, or
//! `NO_OWNER`. Lock hand-off on unlock transfers ownership directly to
//! the lowest-numbered waiter, so the lock is never observably free
//! while someone is queued on it.

use crate::kernel::Kernel;
use crate::wq::{ObjKind, WqId};
use core::sync::atomic::{AtomicU32, Ordering};
use rtk_core::bits;
use rtk_core::{KrnError, KrnResult, ThreadId};

use crate::config::MUTEX_MAX;

const NO_OWNER: u32 = u32::MAX;

pub(crate) struct MutexPool {
    owner: [AtomicU32; MUTEX_MAX],
}

impl MutexPool {
    pub const fn new() -> Self {
        #[allow(clippy::declare_interior_mutable_const)]
        const FREE: AtomicU32 = AtomicU32::new(NO_OWNER);
        Self { owner: [FREE; MUTEX_MAX] }
    }

    pub fn owner(&self, idx: usize) -> Option<ThreadId> {
        let o = self.owner[idx].load(Ordering::SeqCst);
        if o == NO_OWNER {
            None
        } else {
            Some(ThreadId::new_unchecked(o as u8))
        }
    }

    pub fn set_owner(&self, idx: usize, th: Option<ThreadId>) {
        let v = th.map_or(NO_OWNER, |t| t.raw() as u32);
        self.owner[idx].store(v, Ordering::SeqCst);
    }

    /// Take the lock if free; on failure returns the current owner
    pub fn try_take(&self, idx: usize, th: ThreadId) -> Result<(), u32> {
        self.owner[idx]
            .compare_exchange(NO_OWNER, th.raw() as u32, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
    }
}

impl Kernel {
    pub(crate) fn mutex_check(&self, raw: u32) -> KrnResult<(WqId, usize)> {
        let wq = WqId::new(raw)?;
        if wq.kind() != ObjKind::Mutex {
            return Err(KrnError::InvalidArgument);
        }
        let idx = wq.slot();
        if !bits::bit_get(self.allocs.mutex_word(), idx as u32) {
            return Err(KrnError::InvalidArgument);
        }
        Ok((wq, idx))
    }

    /// Owner of a mutex, if currently held
    pub fn mutex_owner(&self, raw: u32) -> KrnResult<Option<ThreadId>> {
        let (_, idx) = self.mutex_check(raw)?;
        Ok(self.mutexes.owner(idx))
    }

    /// Take a mutex without blocking
    pub fn mutex_trylock(&self, th: ThreadId, raw: u32) -> KrnResult<i32> {
        let (_, idx) = self.mutex_check(raw)?;
        match self.mutexes.try_take(idx, th) {
            Ok(()) => Ok(0),
            Err(o) if o == th.raw() as u32 => Err(KrnError::Deadlock),
            Err(_) => Err(KrnError::Again),
        }
    }

    /// Take a mutex, blocking until it is handed over
    pub fn mutex_lock(&self, th: ThreadId, raw: u32) -> KrnResult<i32> {
        self.mutex_lock_inner(th, raw, None)
    }

    /// Take a mutex with a timeout in ticks
    pub fn mutex_timedlock(&self, th: ThreadId, raw: u32, ms: u32) -> KrnResult<i32> {
        self.mutex_lock_inner(th, raw, Some(ms))
    }

    fn mutex_lock_inner(&self, th: ThreadId, raw: u32, tmo: Option<u32>) -> KrnResult<i32> {
        let (wq, idx) = self.mutex_check(raw)?;
        loop {
            match self.mutexes.try_take(idx, th) {
                Ok(()) => return Ok(0),
                Err(o) if o == th.raw() as u32 => return Err(KrnError::Deadlock),
                Err(_) => {}
            }
            // publish, then recheck: the owner may have released between
            // the failed take and the queue insert
            self.suspend(th);
            self.set_stat(th, wq, tmo.is_some());
            self.wq.insert(wq, th);
            if self.mutexes.owner(idx).is_none() {
                self.wq.remove(wq, th);
                self.clear_stat(th);
                self.make_ready(th);
                continue;
            }
            if let Some(ms) = tmo {
                self.clk_arm(th, ms);
            }
            self.set_retval(th, 0);
            self.trace_push(crate::TraceEvent::Block { th, wq });
            self.defer_sched();
            return Ok(0);
        }
    }

    /// Release a mutex, handing it to the lowest-numbered waiter
    pub fn mutex_unlock(&self, th: ThreadId, raw: u32) -> KrnResult<i32> {
        let (wq, idx) = self.mutex_check(raw)?;
        if self.mutexes.owner(idx) != Some(th) {
            return Err(KrnError::NotPermitted);
        }
        self.mutex_unlock_wakeup(wq, idx);
        Ok(0)
    }

    /// Hand the lock to the next waiter, or mark it free
    pub(crate) fn mutex_unlock_wakeup(&self, wq: WqId, idx: usize) {
        match self.wq.pop_head(wq) {
            Some(next) => {
                self.mutexes.set_owner(idx, Some(next));
                self.wakeup(wq, next);
                self.defer_sched();
            }
            None => self.mutexes.set_owner(idx, None),
        }
    }
}
