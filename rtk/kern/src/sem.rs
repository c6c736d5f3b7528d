//! Counting semaphores
//!
//! The count is a single atomic word per slot; wait and post race
//! against each other through retry loops only. Post prefers a queued
//! waiter over incrementing, so a token never sits in the count while a
//! thread sleeps.

use crate::kernel::Kernel;
use crate::wq::{ObjKind, WqId};
use core::sync::atomic::{AtomicU32, Ordering};
use rtk_core::bits;
use rtk_core::{KrnError, KrnResult, ThreadId};

use crate::config::SEM_MAX;

pub(crate) struct SemPool {
    count: [AtomicU32; SEM_MAX],
}

impl SemPool {
    pub const fn new() -> Self {
        #[allow(clippy::declare_interior_mutable_const)]
        const ZERO: AtomicU32 = AtomicU32::new(0);
        Self { count: [ZERO; SEM_MAX] }
    }

    pub fn count(&self, idx: usize) -> u32 {
        self.count[idx].load(Ordering::SeqCst)
    }

    /// Consume one token if available
    pub fn try_take(&self, idx: usize) -> bool {
        bits::try_update(&self.count[idx], |c| c.checked_sub(1)).is_ok()
    }
}

impl Kernel {
    pub(crate) fn sem_check(&self, raw: u32) -> KrnResult<(WqId, usize)> {
        let wq = WqId::new(raw)?;
        if wq.kind() != ObjKind::Semaphore {
            return Err(KrnError::InvalidArgument);
        }
        let idx = wq.slot();
        if !bits::bit_get(self.allocs.sem_word(), idx as u32) {
            return Err(KrnError::InvalidArgument);
        }
        Ok((wq, idx))
    }

    /// Reset a semaphore's count
    pub fn sem_init(&self, raw: u32, value: u32) -> KrnResult<i32> {
        let (_, idx) = self.sem_check(raw)?;
        self.sems.count[idx].store(value, Ordering::SeqCst);
        Ok(0)
    }

    /// Current token count
    pub fn sem_value(&self, raw: u32) -> KrnResult<i32> {
        let (_, idx) = self.sem_check(raw)?;
        Ok(self.sems.count(idx) as i32)
    }

    /// Take a token without blocking
    pub fn sem_trywait(&self, raw: u32) -> KrnResult<i32> {
        let (_, idx) = self.sem_check(raw)?;
        if self.sems.try_take(idx) {
            Ok(0)
        } else {
            Err(KrnError::Again)
        }
    }

    /// Take a token, blocking until one is posted
    pub fn sem_wait(&self, th: ThreadId, raw: u32) -> KrnResult<i32> {
        self.sem_wait_inner(th, raw, None)
    }

    /// Take a token with a timeout in ticks
    pub fn sem_timedwait(&self, th: ThreadId, raw: u32, ms: u32) -> KrnResult<i32> {
        self.sem_wait_inner(th, raw, Some(ms))
    }

    fn sem_wait_inner(&self, th: ThreadId, raw: u32, tmo: Option<u32>) -> KrnResult<i32> {
        let (wq, idx) = self.sem_check(raw)?;
        loop {
            if self.sems.try_take(idx) {
                return Ok(0);
            }
            self.suspend(th);
            self.set_stat(th, wq, tmo.is_some());
            self.wq.insert(wq, th);
            // recheck: a post may have slipped in before the insert and
            // found an empty queue
            if self.sems.count(idx) > 0 {
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

    /// Post one token
    ///
    /// Safe from interrupt handlers. A queued waiter receives the token
    /// directly; otherwise the count goes up.
    pub fn sem_post(&self, raw: u32) -> KrnResult<i32> {
        let (wq, idx) = self.sem_check(raw)?;
        if let Some(next) = self.wq.pop_head(wq) {
            self.wakeup(wq, next);
            self.defer_sched();
        } else {
            self.sems.count[idx].fetch_add(1, Ordering::SeqCst);
            // late waiter may have queued while we incremented
            if let Some(next) = self.wq.pop_head(wq) {
                if self.sems.try_take(idx) {
                    self.wakeup(wq, next);
                    self.defer_sched();
                } else {
                    self.wq.insert(wq, next);
                }
            }
        }
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::KernelConfig;

    fn boot2() -> (Kernel, ThreadId, ThreadId) {
        let k = Kernel::new(KernelConfig::new());
        let a = k.thread_create(0x1000).unwrap();
        let b = k.thread_create(0x2000).unwrap();
        (k, a, b)
    }

    #[test]
    fn test_counting() {
        let (k, a, _) = boot2();
        let s = k.sem_alloc(2).unwrap();
        assert_eq!(k.sem_value(s), Ok(2));
        assert_eq!(k.sem_wait(a, s), Ok(0));
        assert_eq!(k.sem_trywait(s), Ok(0));
        assert_eq!(k.sem_trywait(s), Err(KrnError::Again));
    }

    #[test]
    fn test_post_wakes_waiter_not_count() {
        let (k, a, b) = boot2();
        let s = k.sem_alloc(0).unwrap();
        k.sem_wait(a, s).unwrap();
        assert!(!k.is_ready(a));

        k.sem_post(s).unwrap();
        assert!(k.is_ready(a));
        // token went to the waiter, not the count
        assert_eq!(k.sem_value(s), Ok(0));

        // second post with nobody queued increments
        k.sem_post(s).unwrap();
        assert_eq!(k.sem_value(s), Ok(1));
        let _ = b;
    }

    #[test]
    fn test_lowest_id_waiter_wins() {
        let (k, a, b) = boot2();
        let s = k.sem_alloc(0).unwrap();
        k.sem_wait(b, s).unwrap();
        k.sem_wait(a, s).unwrap();

        k.sem_post(s).unwrap();
        assert!(k.is_ready(a));
        assert!(!k.is_ready(b));
    }

    #[test]
    fn test_timedwait_expires() {
        let (k, a, _) = boot2();
        let s = k.sem_alloc(0).unwrap();
        k.sem_timedwait(a, s, 1).unwrap();
        k.tick();
        assert!(k.is_ready(a));
        assert_eq!(k.thread_retval(a), KrnError::TimedOut.code());
        // conservation: a later post must not vanish
        k.sem_post(s).unwrap();
        assert_eq!(k.sem_value(s), Ok(1));
    }

    #[test]
    fn test_init_resets_count() {
        let (k, _, _) = boot2();
        let s = k.sem_alloc(5).unwrap();
        k.sem_init(s, 1).unwrap();
        assert_eq!(k.sem_value(s), Ok(1));
    }
}
