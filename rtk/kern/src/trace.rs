//! Kernel event trace
//!
//! A small lock-free ring of scheduling events, filled from anywhere
//! (thread mode or handlers) and drained by whoever wants it, typically
//! a debug console task. When the ring is full new events are dropped
//! and counted; tracing must never block or allocate.

use crate::kernel::Kernel;
use crate::wq::WqId;
use core::sync::atomic::{AtomicU32, Ordering};
use heapless::mpmc::MpMcQueue;
use rtk_core::ThreadId;

const TRACE_DEPTH: usize = 32;

/// One recorded scheduling event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEvent {
    /// A thread blocked on a queue
    Block { th: ThreadId, wq: WqId },
    /// A blocked thread was made runnable
    Wakeup { th: ThreadId, wq: WqId },
    /// The scheduler switched, `None` meaning idle
    Switch { th: Option<ThreadId> },
    /// A thread started an interrupt wait
    IrqWait { th: ThreadId, irq: u8 },
    /// A thread was frozen by the debugger
    Pause { th: ThreadId },
    /// A frozen thread was thawed
    Resume { th: ThreadId },
    /// A fault was delivered
    Fault { th: ThreadId },
}

pub(crate) struct TraceRing {
    q: MpMcQueue<TraceEvent, TRACE_DEPTH>,
    dropped: AtomicU32,
}

impl TraceRing {
    pub const fn new() -> Self {
        Self {
            q: MpMcQueue::new(),
            dropped: AtomicU32::new(0),
        }
    }
}

impl Kernel {
    pub(crate) fn trace_push(&self, ev: TraceEvent) {
        if self.trace.q.enqueue(ev).is_err() {
            self.trace.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Drain one trace event
    pub fn trace_pop(&self) -> Option<TraceEvent> {
        self.trace.q.dequeue()
    }

    /// Events lost to a full ring since boot
    pub fn trace_dropped(&self) -> u32 {
        self.trace.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::KernelConfig;

    #[test]
    fn test_events_record_in_order() {
        let k = Kernel::new(KernelConfig::new());
        let a = k.thread_create(0x1000).unwrap();
        let s = k.sem_alloc(0).unwrap();
        k.sem_wait(a, s).unwrap();
        k.sem_post(s).unwrap();

        let first = k.trace_pop().unwrap();
        let second = k.trace_pop().unwrap();
        assert!(matches!(first, TraceEvent::Block { th, .. } if th == a));
        assert!(matches!(second, TraceEvent::Wakeup { th, .. } if th == a));
    }

    #[test]
    fn test_full_ring_drops_and_counts() {
        let k = Kernel::new(KernelConfig::new());
        let a = k.thread_create(0x1000).unwrap();
        for _ in 0..(TRACE_DEPTH + 5) {
            k.trace_push(TraceEvent::Pause { th: a });
        }
        assert!(k.trace_dropped() > 0);

        let mut drained = 0;
        while k.trace_pop().is_some() {
            drained += 1;
        }
        assert!(drained <= TRACE_DEPTH);
    }
}
