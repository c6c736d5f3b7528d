//! Event sets
//!
//! Each slot carries a 32-bit pending word and a 32-bit mask. Raising a
//! masked event pends it; raising an unmasked event delivers it to the
//! lowest-numbered waiter, who receives the event number as the call's
//! return value. Unmasking flushes deliverable pends to waiters.

use crate::kernel::Kernel;
use crate::wq::{ObjKind, WqId};
use core::sync::atomic::{AtomicU32, Ordering};
use rtk_core::bits;
use rtk_core::{KrnError, KrnResult, ThreadId};

use crate::config::EVENT_MAX;

pub(crate) struct EventPool {
    pend: [AtomicU32; EVENT_MAX],
    mask: [AtomicU32; EVENT_MAX],
}

impl EventPool {
    pub const fn new() -> Self {
        #[allow(clippy::declare_interior_mutable_const)]
        const ZERO: AtomicU32 = AtomicU32::new(0);
        #[allow(clippy::declare_interior_mutable_const)]
        const ALL: AtomicU32 = AtomicU32::new(u32::MAX);
        Self {
            pend: [ZERO; EVENT_MAX],
            mask: [ALL; EVENT_MAX],
        }
    }

    /// Consume the lowest pending unmasked event, if any
    pub fn try_take(&self, idx: usize) -> Option<u32> {
        let mask = self.mask[idx].load(Ordering::SeqCst);
        bits::try_update(&self.pend[idx], |p| {
            bits::lowest_set(p & mask).map(|b| p & !(1 << b))
        })
        .ok()
        .and_then(|prev| bits::lowest_set(prev & mask))
    }
}

impl Kernel {
    pub(crate) fn event_check(&self, raw: u32) -> KrnResult<(WqId, usize)> {
        let wq = WqId::new(raw)?;
        if wq.kind() != ObjKind::Event {
            return Err(KrnError::InvalidArgument);
        }
        let idx = wq.slot();
        if !bits::bit_get(self.allocs.event_word(), idx as u32) {
            return Err(KrnError::InvalidArgument);
        }
        Ok((wq, idx))
    }

    fn event_arg(ev: u32) -> KrnResult<u32> {
        if ev < 32 {
            Ok(ev)
        } else {
            Err(KrnError::InvalidArgument)
        }
    }

    /// Wait for any unmasked event; returns the event number
    pub fn ev_wait(&self, th: ThreadId, raw: u32) -> KrnResult<i32> {
        self.ev_wait_inner(th, raw, None)
    }

    /// Wait for any unmasked event with a timeout in ticks
    pub fn ev_timedwait(&self, th: ThreadId, raw: u32, ms: u32) -> KrnResult<i32> {
        self.ev_wait_inner(th, raw, Some(ms))
    }

    fn ev_wait_inner(&self, th: ThreadId, raw: u32, tmo: Option<u32>) -> KrnResult<i32> {
        let (wq, idx) = self.event_check(raw)?;
        loop {
            if let Some(ev) = self.events.try_take(idx) {
                return Ok(ev as i32);
            }
            self.suspend(th);
            self.set_stat(th, wq, tmo.is_some());
            self.wq.insert(wq, th);
            let mask = self.events.mask[idx].load(Ordering::SeqCst);
            if self.events.pend[idx].load(Ordering::SeqCst) & mask != 0 {
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

    /// Raise an event
    ///
    /// Safe from interrupt handlers. Masked events pend; unmasked events
    /// go to a waiter when one is queued, else pend.
    pub fn ev_raise(&self, raw: u32, ev: u32) -> KrnResult<i32> {
        let (wq, idx) = self.event_check(raw)?;
        let ev = Self::event_arg(ev)?;
        let mask = self.events.mask[idx].load(Ordering::SeqCst);
        if mask & (1 << ev) == 0 {
            bits::bit_set(&self.events.pend[idx], ev);
            return Ok(0);
        }
        match self.wq.pop_head(wq) {
            Some(next) => {
                self.wakeup_return(wq, next, ev as i32);
                self.defer_sched();
            }
            None => bits::bit_set(&self.events.pend[idx], ev),
        }
        Ok(0)
    }

    /// Mask or unmask a single event
    ///
    /// Unmasking flushes events that pended while masked straight to
    /// queued waiters.
    pub fn ev_mask(&self, raw: u32, ev: u32, enable: bool) -> KrnResult<i32> {
        let (wq, idx) = self.event_check(raw)?;
        let ev = Self::event_arg(ev)?;
        bits::bit_put(&self.events.mask[idx], ev, enable);
        if enable {
            while !self.wq.is_empty(wq) {
                let Some(pending) = self.events.try_take(idx) else { break };
                match self.wq.pop_head(wq) {
                    Some(next) => {
                        self.wakeup_return(wq, next, pending as i32);
                        self.defer_sched();
                    }
                    None => {
                        bits::bit_set(&self.events.pend[idx], pending);
                        break;
                    }
                }
            }
        }
        Ok(0)
    }

    /// Reset a slot to its boot state: nothing pending, all unmasked
    pub(crate) fn ev_mask_reset(&self, raw: u32) -> KrnResult<i32> {
        let (_, idx) = self.event_check(raw)?;
        self.events.pend[idx].store(0, Ordering::SeqCst);
        self.events.mask[idx].store(u32::MAX, Ordering::SeqCst);
        Ok(0)
    }

    /// Drop a pending event
    pub fn ev_clear(&self, raw: u32, ev: u32) -> KrnResult<i32> {
        let (_, idx) = self.event_check(raw)?;
        let ev = Self::event_arg(ev)?;
        bits::bit_clr(&self.events.pend[idx], ev);
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
    fn test_raise_then_wait() {
        let (k, a, _) = boot2();
        let e = k.event_alloc().unwrap();
        k.ev_raise(e, 5).unwrap();
        assert_eq!(k.ev_wait(a, e), Ok(5));
    }

    #[test]
    fn test_wait_then_raise_delivers_number() {
        let (k, a, _) = boot2();
        let e = k.event_alloc().unwrap();
        k.ev_wait(a, e).unwrap();
        assert!(!k.is_ready(a));

        k.ev_raise(e, 9).unwrap();
        assert!(k.is_ready(a));
        assert_eq!(k.thread_retval(a), 9);
    }

    #[test]
    fn test_lowest_event_wins() {
        let (k, a, _) = boot2();
        let e = k.event_alloc().unwrap();
        k.ev_raise(e, 12).unwrap();
        k.ev_raise(e, 3).unwrap();
        assert_eq!(k.ev_wait(a, e), Ok(3));
        assert_eq!(k.ev_wait(a, e), Ok(12));
    }

    #[test]
    fn test_masked_event_pends() {
        let (k, a, b) = boot2();
        let e = k.event_alloc().unwrap();
        k.ev_mask(e, 4, false).unwrap();

        k.ev_wait(a, e).unwrap();
        k.ev_raise(e, 4).unwrap();
        // masked: the waiter stays asleep
        assert!(!k.is_ready(a));

        // unmask flushes the pend to the waiter
        k.ev_mask(e, 4, true).unwrap();
        assert!(k.is_ready(a));
        assert_eq!(k.thread_retval(a), 4);
        let _ = b;
    }

    #[test]
    fn test_clear_drops_pend() {
        let (k, a, _) = boot2();
        let e = k.event_alloc().unwrap();
        k.ev_raise(e, 7).unwrap();
        k.ev_clear(e, 7).unwrap();
        k.ev_timedwait(a, e, 1).unwrap();
        k.tick();
        assert_eq!(k.thread_retval(a), KrnError::TimedOut.code());
    }
}
