//! Debug pause and resume
//!
//! Pausing freezes a thread wherever it is: its bit is stripped from
//! every wait-queue bitmap, any bound interrupt source is quiesced, and
//! the thread parks in the paused overlay. The status word is left
//! untouched, so it still names the object the thread was blocked on.
//! Resume re-evaluates that wait condition from scratch through the
//! per-kind dispatch: the world may have moved on while the thread was
//! frozen, and the object's current state decides whether the thread
//! wakes, re-queues, or resumes waiting for an interrupt.

use crate::kernel::Kernel;
use crate::wq::WqId;
use rtk_core::bits;
use rtk_core::KrnResult;

impl Kernel {
    /// True if a thread is currently paused
    pub fn is_paused(&self, raw: u32) -> KrnResult<bool> {
        let th = self.thread_check(raw)?;
        Ok(self.wq.contains(WqId::PAUSED, th))
    }

    /// Freeze a thread
    ///
    /// Idempotent: pausing a paused thread is a no-op. Any pending
    /// single-step request is dropped.
    pub fn thread_pause(&self, raw: u32) -> KrnResult<i32> {
        let th = self.thread_check(raw)?;
        if self.wq.contains(WqId::PAUSED, th) {
            return Ok(0);
        }
        ktrace!("<{}> pause", th.raw());

        // strip from every queue; the status word keeps the wait intact
        self.wq.remove_everywhere(th);
        if let Some(irq) = self.irq_bound_source(th) {
            self.irq_source_enable(irq, false);
        }
        bits::bit_clr(self.threads.step_req_word(), th.raw() as u32);

        self.wq.insert(WqId::PAUSED, th);
        self.trace_push(crate::TraceEvent::Pause { th });
        self.defer_sched();
        Ok(0)
    }

    /// Thaw a paused thread
    ///
    /// Idempotent: resuming a running thread is a no-op. The thread's
    /// recorded wait is re-evaluated against the object's current state.
    pub fn thread_resume(&self, raw: u32) -> KrnResult<i32> {
        let th = self.thread_check(raw)?;
        if !self.wq.contains(WqId::PAUSED, th) {
            return Ok(0);
        }
        ktrace!("<{}> resume", th.raw());
        self.wq.remove(WqId::PAUSED, th);
        self.trace_push(crate::TraceEvent::Resume { th });
        self.resume_dispatch(th);
        self.defer_sched();
        Ok(0)
    }

    /// Queue a single-step request on a paused thread
    pub fn thread_step_req(&self, raw: u32) -> KrnResult<i32> {
        let th = self.thread_check(raw)?;
        bits::bit_set(self.threads.step_req_word(), th.raw() as u32);
        Ok(0)
    }

    /// Consume a pending single-step request
    pub fn thread_step_pending(&self, raw: u32) -> KrnResult<bool> {
        let th = self.thread_check(raw)?;
        Ok(bits::bit_get(self.threads.step_req_word(), th.raw() as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::KernelConfig;
    use rtk_core::{KrnError, ThreadId};

    fn boot2() -> (Kernel, ThreadId, ThreadId) {
        let k = Kernel::new(KernelConfig::new());
        let a = k.thread_create(0x1000).unwrap();
        let b = k.thread_create(0x2000).unwrap();
        (k, a, b)
    }

    #[test]
    fn test_pause_resume_ready_thread() {
        let (k, a, _) = boot2();
        k.thread_pause(a.raw() as u32).unwrap();
        assert!(!k.is_ready(a));
        assert_eq!(k.is_paused(a.raw() as u32), Ok(true));

        k.thread_resume(a.raw() as u32).unwrap();
        assert!(k.is_ready(a));
        assert_eq!(k.is_paused(a.raw() as u32), Ok(false));
    }

    #[test]
    fn test_pause_is_idempotent() {
        let (k, a, _) = boot2();
        k.thread_pause(a.raw() as u32).unwrap();
        k.thread_pause(a.raw() as u32).unwrap();
        k.thread_resume(a.raw() as u32).unwrap();
        assert!(k.is_ready(a));
        // resume of a running thread is a no-op, not a double wake
        k.thread_resume(a.raw() as u32).unwrap();
        assert!(k.is_ready(a));
    }

    #[test]
    fn test_paused_sem_waiter_misses_then_requeues() {
        let (k, a, b) = boot2();
        let s = k.sem_alloc(0).unwrap();
        k.sem_wait(a, s).unwrap();
        k.thread_pause(a.raw() as u32).unwrap();

        // a is out of the queue: the post goes to the count
        k.sem_post(s).unwrap();
        assert_eq!(k.sem_value(s), Ok(1));

        // resume re-evaluates the wait and consumes the token
        k.thread_resume(a.raw() as u32).unwrap();
        assert!(k.is_ready(a));
        assert_eq!(k.sem_value(s), Ok(0));
        let _ = b;
    }

    #[test]
    fn test_paused_sem_waiter_resumes_waiting() {
        let (k, a, _) = boot2();
        let s = k.sem_alloc(0).unwrap();
        k.sem_wait(a, s).unwrap();
        k.thread_pause(a.raw() as u32).unwrap();
        k.thread_resume(a.raw() as u32).unwrap();

        // nothing was posted: back on the queue
        assert!(!k.is_ready(a));
        k.sem_post(s).unwrap();
        assert!(k.is_ready(a));
    }

    #[test]
    fn test_paused_gate_waiter_takes_released_gate() {
        let (k, a, _) = boot2();
        let g = k.gate_alloc().unwrap();
        k.gate_wait(a, g).unwrap();
        k.thread_pause(a.raw() as u32).unwrap();

        // gate opened while frozen, nobody around to take it
        k.gate_open(g).unwrap();
        assert_eq!(k.gate_state(g), Ok(crate::GateState::OpenUnlocked));

        k.thread_resume(a.raw() as u32).unwrap();
        assert!(k.is_ready(a));
        assert_eq!(k.gate_state(g), Ok(crate::GateState::ClosedLocked));
    }

    #[test]
    fn test_paused_mutex_waiter_takes_released_lock() {
        let (k, a, b) = boot2();
        let m = k.mutex_alloc().unwrap();
        k.mutex_lock(a, m).unwrap();
        k.mutex_lock(b, m).unwrap();
        k.thread_pause(b.raw() as u32).unwrap();

        // unlock finds no waiter and frees the lock
        k.mutex_unlock(a, m).unwrap();
        assert_eq!(k.mutex_owner(m), Ok(None));

        // resume takes the free lock
        k.thread_resume(b.raw() as u32).unwrap();
        assert!(k.is_ready(b));
        assert_eq!(k.mutex_owner(m), Ok(Some(b)));
    }

    #[test]
    fn test_paused_sleeper_keeps_timer() {
        let (k, a, _) = boot2();
        k.sleep(a, 3).unwrap();
        k.thread_pause(a.raw() as u32).unwrap();

        // the clock does not tick for a paused thread
        k.tick();
        k.tick();
        k.tick();
        assert!(!k.is_ready(a));

        k.thread_resume(a.raw() as u32).unwrap();
        assert!(!k.is_ready(a));
        // timer re-armed at the recorded deadline; already past, so the
        // next wrap-around would fire it: deadline stays recorded
        assert!(k.wq.contains(WqId::CLOCK, a));
    }

    #[test]
    fn test_pause_quiesces_bound_irq() {
        let (k, a, _) = boot2();
        k.irq_wait(a, 2).unwrap();
        assert_eq!(k.irq_enabled(2), Ok(true));

        k.thread_pause(a.raw() as u32).unwrap();
        assert_eq!(k.irq_enabled(2), Ok(false));
        assert_eq!(k.irq_owner(2), Ok(Some(a)));

        // resume of an interrupt wait re-enables the source and keeps
        // the thread suspended
        k.thread_resume(a.raw() as u32).unwrap();
        assert!(!k.is_ready(a));
        assert_eq!(k.irq_enabled(2), Ok(true));

        k.irq_signal(2).unwrap();
        assert!(k.is_ready(a));
    }

    #[test]
    fn test_pause_drops_step_request() {
        let (k, a, _) = boot2();
        k.thread_step_req(a.raw() as u32).unwrap();
        assert_eq!(k.thread_step_pending(a.raw() as u32), Ok(true));
        k.thread_pause(a.raw() as u32).unwrap();
        assert_eq!(k.thread_step_pending(a.raw() as u32), Ok(false));
    }

    #[test]
    fn test_pause_bad_thread() {
        let (k, _, _) = boot2();
        assert_eq!(k.thread_pause(31), Err(KrnError::InvalidArgument));
        assert_eq!(k.thread_pause(99), Err(KrnError::InvalidArgument));
    }
}
