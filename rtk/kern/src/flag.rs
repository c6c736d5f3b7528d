//! Binary flags
//!
//! All flag slots share one 32-bit word, one bit per slot. A give with a
//! waiter queued hands the signal over directly and the bit never sets;
//! a give with nobody waiting latches the bit for the next take.

use crate::kernel::Kernel;
use crate::wq::{ObjKind, WqId};
use core::sync::atomic::AtomicU32;
use rtk_core::bits;
use rtk_core::{KrnError, KrnResult, ThreadId};

pub(crate) struct FlagPool {
    bits: AtomicU32,
}

impl FlagPool {
    pub const fn new() -> Self {
        Self { bits: AtomicU32::new(0) }
    }

    pub fn is_set(&self, idx: usize) -> bool {
        bits::bit_get(&self.bits, idx as u32)
    }

    /// Consume the flag if set
    pub fn try_take(&self, idx: usize) -> bool {
        bits::try_update(&self.bits, |b| {
            if b & (1 << idx) != 0 {
                Some(b & !(1 << idx))
            } else {
                None
            }
        })
        .is_ok()
    }

    pub fn set(&self, idx: usize) {
        bits::bit_set(&self.bits, idx as u32);
    }

    pub fn clear(&self, idx: usize) {
        bits::bit_clr(&self.bits, idx as u32);
    }
}

impl Kernel {
    pub(crate) fn flag_check(&self, raw: u32) -> KrnResult<(WqId, usize)> {
        let wq = WqId::new(raw)?;
        if wq.kind() != ObjKind::Flag {
            return Err(KrnError::InvalidArgument);
        }
        let idx = wq.slot();
        if !bits::bit_get(self.allocs.flag_word(), idx as u32) {
            return Err(KrnError::InvalidArgument);
        }
        Ok((wq, idx))
    }

    /// Current value of a flag
    pub fn flag_val(&self, raw: u32) -> KrnResult<i32> {
        let (_, idx) = self.flag_check(raw)?;
        Ok(self.flags.is_set(idx) as i32)
    }

    /// Lower a flag without signaling anyone
    pub fn flag_clear(&self, raw: u32) -> KrnResult<i32> {
        let (_, idx) = self.flag_check(raw)?;
        self.flags.clear(idx);
        Ok(0)
    }

    /// Consume a flag without blocking
    pub fn flag_trytake(&self, raw: u32) -> KrnResult<i32> {
        let (_, idx) = self.flag_check(raw)?;
        if self.flags.try_take(idx) {
            Ok(0)
        } else {
            Err(KrnError::Again)
        }
    }

    /// Consume a flag, blocking until it is given
    pub fn flag_take(&self, th: ThreadId, raw: u32) -> KrnResult<i32> {
        self.flag_take_inner(th, raw, None)
    }

    /// Consume a flag with a timeout in ticks
    pub fn flag_timedtake(&self, th: ThreadId, raw: u32, ms: u32) -> KrnResult<i32> {
        self.flag_take_inner(th, raw, Some(ms))
    }

    fn flag_take_inner(&self, th: ThreadId, raw: u32, tmo: Option<u32>) -> KrnResult<i32> {
        let (wq, idx) = self.flag_check(raw)?;
        loop {
            if self.flags.try_take(idx) {
                return Ok(0);
            }
            self.suspend(th);
            self.set_stat(th, wq, tmo.is_some());
            self.wq.insert(wq, th);
            if self.flags.is_set(idx) {
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

    /// Raise a flag
    ///
    /// Safe from interrupt handlers.
    pub fn flag_give(&self, raw: u32) -> KrnResult<i32> {
        let (wq, idx) = self.flag_check(raw)?;
        match self.wq.pop_head(wq) {
            Some(next) => {
                self.wakeup(wq, next);
                self.defer_sched();
            }
            None => self.flags.set(idx),
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
    fn test_give_latches_take_consumes() {
        let (k, a, _) = boot2();
        let f = k.flag_alloc().unwrap();
        assert_eq!(k.flag_val(f), Ok(0));
        k.flag_give(f).unwrap();
        assert_eq!(k.flag_val(f), Ok(1));
        assert_eq!(k.flag_take(a, f), Ok(0));
        assert_eq!(k.flag_val(f), Ok(0));
    }

    #[test]
    fn test_give_hands_off_to_waiter() {
        let (k, a, b) = boot2();
        let f = k.flag_alloc().unwrap();
        k.flag_take(a, f).unwrap();
        assert!(!k.is_ready(a));

        k.flag_give(f).unwrap();
        assert!(k.is_ready(a));
        // consumed by the waiter: the bit stays clear
        assert_eq!(k.flag_val(f), Ok(0));
        let _ = b;
    }

    #[test]
    fn test_trytake() {
        let (k, _, _) = boot2();
        let f = k.flag_alloc().unwrap();
        assert_eq!(k.flag_trytake(f), Err(KrnError::Again));
        k.flag_give(f).unwrap();
        assert_eq!(k.flag_trytake(f), Ok(0));
    }

    #[test]
    fn test_timedtake_expires() {
        let (k, a, _) = boot2();
        let f = k.flag_alloc().unwrap();
        k.flag_timedtake(a, f, 2).unwrap();
        k.tick();
        k.tick();
        assert!(k.is_ready(a));
        assert_eq!(k.thread_retval(a), KrnError::TimedOut.code());
    }

    #[test]
    fn test_clear_drops_signal() {
        let (k, a, _) = boot2();
        let f = k.flag_alloc().unwrap();
        k.flag_give(f).unwrap();
        k.flag_clear(f).unwrap();
        k.flag_timedtake(a, f, 1).unwrap();
        k.tick();
        assert_eq!(k.thread_retval(a), KrnError::TimedOut.code());
    }
}
