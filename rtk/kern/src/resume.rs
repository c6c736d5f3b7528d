//! Per-kind resume dispatch
//!
//! When a paused thread thaws, its status word names the object it was
//! blocked on. Each object kind decides what resuming means: a waiter
//! may find its condition satisfied in the meantime and wake directly,
//! or go back on the queue to keep waiting. The exhaustive match is the
//! single place where this policy lives.

use crate::kernel::Kernel;
use crate::wq::{ObjKind, WqId};
use rtk_core::ThreadId;

impl Kernel {
    /// Re-evaluate a thawed thread's recorded wait
    pub(crate) fn resume_dispatch(&self, th: ThreadId) {
        let stat = self.threads.stat(th);
        // a stored status word is always a valid queue id
        let Ok(wq) = WqId::new(stat.queue()) else {
            self.make_ready(th);
            return;
        };
        match wq.kind() {
            ObjKind::Ready => self.resume_ready(th),
            ObjKind::TmShare => self.wq.insert(WqId::TMSHARE, th),
            ObjKind::Clock => self.wq.insert(WqId::CLOCK, th),
            ObjKind::Mutex => self.resume_mutex(th, wq),
            ObjKind::Semaphore => self.resume_sem(th, wq),
            ObjKind::Event => self.resume_event(th, wq),
            ObjKind::Flag => self.resume_flag(th, wq),
            ObjKind::Gate => self.resume_gate(th, wq),
            ObjKind::Irq => self.resume_irq(th, wq),
            // plain queue waits: nothing to re-evaluate, re-queue as-is
            ObjKind::Cond
            | ObjKind::Join
            | ObjKind::Canceled
            | ObjKind::Fault
            | ObjKind::ConsoleRead
            | ObjKind::ConsoleWrite
            | ObjKind::CommSend
            | ObjKind::CommRecv => self.resume_requeue(th, wq),
            ObjKind::Paused => {
                // the paused overlay never appears in a status word
                panic!("resume: paused status on thread {}", th.raw());
            }
        }
    }

    /// A ready status either means runnable or an untimed interrupt wait
    fn resume_ready(&self, th: ThreadId) {
        if let Some(irq) = self.irq_bound_source(th) {
            self.irq_source_enable(irq, true);
            return;
        }
        self.make_ready(th);
    }

    fn resume_requeue(&self, th: ThreadId, wq: WqId) {
        self.wq.insert(wq, th);
        self.rearm_clock(th);
    }

    fn rearm_clock(&self, th: ThreadId) {
        if self.threads.stat(th).clock_armed() {
            self.wq.insert(WqId::CLOCK, th);
        }
    }

    fn resume_wake(&self, th: ThreadId, ret: i32) {
        self.make_ready(th);
        self.clear_stat(th);
        self.set_retval(th, ret);
    }

    fn resume_mutex(&self, th: ThreadId, wq: WqId) {
        let idx = wq.slot();
        if self.mutexes.try_take(idx, th).is_ok() {
            self.resume_wake(th, 0);
        } else {
            self.resume_requeue(th, wq);
        }
    }

    fn resume_sem(&self, th: ThreadId, wq: WqId) {
        if self.sems.try_take(wq.slot()) {
            self.resume_wake(th, 0);
        } else {
            self.resume_requeue(th, wq);
        }
    }

    fn resume_event(&self, th: ThreadId, wq: WqId) {
        match self.events.try_take(wq.slot()) {
            Some(ev) => self.resume_wake(th, ev as i32),
            None => self.resume_requeue(th, wq),
        }
    }

    fn resume_flag(&self, th: ThreadId, wq: WqId) {
        if self.flags.try_take(wq.slot()) {
            self.resume_wake(th, 0);
        } else {
            self.resume_requeue(th, wq);
        }
    }

    fn resume_gate(&self, th: ThreadId, wq: WqId) {
        if self.gates.try_enter(wq.slot()) {
            self.resume_wake(th, 0);
        } else {
            self.resume_requeue(th, wq);
        }
    }

    /// A timed interrupt wait: re-enable the source and keep waiting
    fn resume_irq(&self, th: ThreadId, wq: WqId) {
        self.irq_source_enable(wq.slot(), true);
        self.resume_requeue(th, wq);
    }
}
