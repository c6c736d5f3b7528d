//! Gates
//!
//! A gate is a one-at-a-time entry primitive: a thread passing through
//! an open gate closes and locks it behind itself, and decides on exit
//! whether to leave it open or closed. Opening a locked gate only pends
//! the signal; the thread inside stays exclusive until it exits.
//!
//! Each gate packs into two bits of a shared word: bit 0 is the signal
//! (open) bit, bit 1 the lock bit. All transitions are single-word
//! retry loops, so `open` is safe from interrupt handlers.

use crate::kernel::Kernel;
use crate::wq::{ObjKind, WqId};
use core::sync::atomic::{AtomicU32, Ordering};
use rtk_core::bits;
use rtk_core::{KrnError, KrnResult, ThreadId};

use crate::config::GATE_MAX;

const SIGNALED: u32 = 1;
const LOCKED: u32 = 2;

/// Number of packed-state words
const GATE_WORDS: usize = (GATE_MAX + 15) / 16;

/// Observable state of a gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// Closed, nobody inside
    Closed,
    /// Open, nobody inside; the next wait passes through
    OpenUnlocked,
    /// Closed with a thread inside
    ClosedLocked,
    /// A thread inside and the signal already pended
    OpenLocked,
}

impl GateState {
    const fn from_bits(b: u32) -> Self {
        match b & (SIGNALED | LOCKED) {
            0 => GateState::Closed,
            SIGNALED => GateState::OpenUnlocked,
            LOCKED => GateState::ClosedLocked,
            _ => GateState::OpenLocked,
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for GateState {
    fn format(&self, fmt: defmt::Formatter) {
        let name = match self {
            GateState::Closed => "closed",
            GateState::OpenUnlocked => "open",
            GateState::ClosedLocked => "locked",
            GateState::OpenLocked => "open+locked",
        };
        defmt::write!(fmt, "{}", name);
    }
}

pub(crate) struct GatePool {
    bits: [AtomicU32; GATE_WORDS],
}

impl GatePool {
    pub const fn new() -> Self {
        #[allow(clippy::declare_interior_mutable_const)]
        const ZERO: AtomicU32 = AtomicU32::new(0);
        Self { bits: [ZERO; GATE_WORDS] }
    }

    fn word(&self, idx: usize) -> &AtomicU32 {
        &self.bits[idx / 16]
    }

    const fn shift(idx: usize) -> u32 {
        ((idx % 16) * 2) as u32
    }

    pub fn state(&self, idx: usize) -> GateState {
        GateState::from_bits(self.word(idx).load(Ordering::SeqCst) >> Self::shift(idx))
    }

    /// Retry a two-bit transition; `f` maps the gate's current bits to
    /// its next bits, or refuses
    fn transition<F>(&self, idx: usize, mut f: F) -> Result<GateState, GateState>
    where
        F: FnMut(u32) -> Option<u32>,
    {
        let sh = Self::shift(idx);
        bits::try_update(self.word(idx), |w| {
            f((w >> sh) & (SIGNALED | LOCKED)).map(|nb| (w & !((SIGNALED | LOCKED) << sh)) | (nb << sh))
        })
        .map(|prev| GateState::from_bits(prev >> sh))
        .map_err(|cur| GateState::from_bits(cur >> sh))
    }

    /// Pass through if open and unlocked, closing and locking behind
    pub fn try_enter(&self, idx: usize) -> bool {
        self.transition(idx, |b| {
            if b == SIGNALED {
                Some(LOCKED)
            } else {
                None
            }
        })
        .is_ok()
    }

    /// Set the signal bit, reporting the previous state
    pub fn signal(&self, idx: usize) -> GateState {
        // unconditional transition, the retry loop always commits
        self.transition(idx, |b| Some(b | SIGNALED))
            .unwrap_or(GateState::Closed)
    }

    pub fn clear_signal(&self, idx: usize) {
        let _ = self.transition(idx, |b| Some(b & !SIGNALED));
    }

    /// Drop the lock; returns the signal bit as seen at release
    pub fn unlock(&self, idx: usize) -> bool {
        matches!(
            self.transition(idx, |b| Some(b & !LOCKED)),
            Ok(GateState::OpenLocked)
        )
    }

    pub fn is_locked(&self, idx: usize) -> bool {
        matches!(self.state(idx), GateState::ClosedLocked | GateState::OpenLocked)
    }
}

impl Kernel {
    pub(crate) fn gate_check(&self, raw: u32) -> KrnResult<(WqId, usize)> {
        let wq = WqId::new(raw)?;
        if wq.kind() != ObjKind::Gate {
            return Err(KrnError::InvalidArgument);
        }
        let idx = wq.slot();
        if !bits::bit_get(self.allocs.gate_word(), idx as u32) {
            return Err(KrnError::InvalidArgument);
        }
        Ok((wq, idx))
    }

    /// Observable state of a gate
    pub fn gate_state(&self, raw: u32) -> KrnResult<GateState> {
        let (_, idx) = self.gate_check(raw)?;
        Ok(self.gates.state(idx))
    }

    /// Pass through a gate, blocking while it is closed or occupied
    ///
    /// On entry the gate closes and locks behind the caller.
    pub fn gate_wait(&self, th: ThreadId, raw: u32) -> KrnResult<i32> {
        self.gate_wait_inner(th, raw, None)
    }

    /// Pass through a gate with a timeout in ticks
    pub fn gate_timedwait(&self, th: ThreadId, raw: u32, ms: u32) -> KrnResult<i32> {
        self.gate_wait_inner(th, raw, Some(ms))
    }

    fn gate_wait_inner(&self, th: ThreadId, raw: u32, tmo: Option<u32>) -> KrnResult<i32> {
        let (wq, idx) = self.gate_check(raw)?;
        loop {
            if self.gates.try_enter(idx) {
                return Ok(0);
            }
            self.suspend(th);
            self.set_stat(th, wq, tmo.is_some());
            self.wq.insert(wq, th);
            // recheck: an open may have landed before the queue insert
            if self.gates.state(idx) == GateState::OpenUnlocked {
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

    /// Leave a gate, optionally leaving it open behind
    ///
    /// Only meaningful from the thread inside; exiting an unlocked gate
    /// is refused. With the signal pended (by `open` here or by an
    /// earlier [`Kernel::gate_open`]) and a waiter queued, the gate
    /// stays locked and the waiter enters directly.
    pub fn gate_exit(&self, raw: u32, open: bool) -> KrnResult<i32> {
        let (wq, idx) = self.gate_check(raw)?;
        if !self.gates.is_locked(idx) {
            return Err(KrnError::NotPermitted);
        }
        if open {
            self.gates.signal(idx);
        }
        if self.gates.unlock(idx) {
            // signal was pended: try to hand the gate to a waiter
            self.gate_handoff(wq, idx);
        }
        Ok(0)
    }

    /// Open a gate
    ///
    /// Safe from interrupt handlers. With a thread inside, only the
    /// signal pends; otherwise a queued waiter enters directly.
    pub fn gate_open(&self, raw: u32) -> KrnResult<i32> {
        let (wq, idx) = self.gate_check(raw)?;
        let prev = self.gates.signal(idx);
        if !matches!(prev, GateState::ClosedLocked | GateState::OpenLocked) {
            self.gate_handoff(wq, idx);
        }
        Ok(0)
    }

    /// Close a gate that nobody has passed yet
    pub fn gate_close(&self, raw: u32) -> KrnResult<i32> {
        let (_, idx) = self.gate_check(raw)?;
        self.gates.clear_signal(idx);
        Ok(0)
    }

    /// Let the lowest-numbered waiter through an open, unlocked gate
    fn gate_handoff(&self, wq: WqId, idx: usize) {
        while self.gates.state(idx) == GateState::OpenUnlocked {
            let Some(next) = self.wq.pop_head(wq) else { return };
            if self.gates.try_enter(idx) {
                self.wakeup(wq, next);
                self.defer_sched();
                return;
            }
            // lost the race to a concurrent enter
            self.wq.insert(wq, next);
        }
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
    fn test_wait_on_open_gate_enters_and_locks() {
        let (k, a, _) = boot2();
        let g = k.gate_alloc().unwrap();
        k.gate_open(g).unwrap();
        assert_eq!(k.gate_state(g), Ok(GateState::OpenUnlocked));

        assert_eq!(k.gate_wait(a, g), Ok(0));
        // the gate closed and locked behind the entrant
        assert_eq!(k.gate_state(g), Ok(GateState::ClosedLocked));
    }

    #[test]
    fn test_wait_on_closed_gate_blocks() {
        let (k, a, _) = boot2();
        let g = k.gate_alloc().unwrap();
        k.gate_wait(a, g).unwrap();
        assert!(!k.is_ready(a));

        k.gate_open(g).unwrap();
        assert!(k.is_ready(a));
        assert_eq!(k.gate_state(g), Ok(GateState::ClosedLocked));
    }

    #[test]
    fn test_open_while_occupied_only_pends() {
        let (k, a, b) = boot2();
        let g = k.gate_alloc().unwrap();
        k.gate_open(g).unwrap();
        k.gate_wait(a, g).unwrap();

        k.gate_wait(b, g).unwrap();
        assert!(!k.is_ready(b));

        // signal pends, b stays out until a exits
        k.gate_open(g).unwrap();
        assert_eq!(k.gate_state(g), Ok(GateState::OpenLocked));
        assert!(!k.is_ready(b));

        // exit hands the gate over: still locked, b inside
        k.gate_exit(g, false).unwrap();
        assert!(k.is_ready(b));
        assert_eq!(k.gate_state(g), Ok(GateState::ClosedLocked));
    }

    #[test]
    fn test_exit_open_hands_off() {
        let (k, a, b) = boot2();
        let g = k.gate_alloc().unwrap();
        k.gate_open(g).unwrap();
        k.gate_wait(a, g).unwrap();
        k.gate_wait(b, g).unwrap();

        k.gate_exit(g, true).unwrap();
        assert!(k.is_ready(b));
        assert_eq!(k.gate_state(g), Ok(GateState::ClosedLocked));
    }

    #[test]
    fn test_exit_open_with_no_waiter_leaves_open() {
        let (k, a, _) = boot2();
        let g = k.gate_alloc().unwrap();
        k.gate_open(g).unwrap();
        k.gate_wait(a, g).unwrap();
        k.gate_exit(g, true).unwrap();
        assert_eq!(k.gate_state(g), Ok(GateState::OpenUnlocked));
    }

    #[test]
    fn test_exit_closed_with_no_pend() {
        let (k, a, b) = boot2();
        let g = k.gate_alloc().unwrap();
        k.gate_open(g).unwrap();
        k.gate_wait(a, g).unwrap();
        k.gate_wait(b, g).unwrap();

        k.gate_exit(g, false).unwrap();
        // no signal pended: b stays queued on the closed gate
        assert!(!k.is_ready(b));
        assert_eq!(k.gate_state(g), Ok(GateState::Closed));
    }

    #[test]
    fn test_exit_without_entering() {
        let (k, a, _) = boot2();
        let g = k.gate_alloc().unwrap();
        assert_eq!(k.gate_exit(g, false), Err(KrnError::NotPermitted));
    }

    #[test]
    fn test_close_drops_pending_signal() {
        let (k, a, _) = boot2();
        let g = k.gate_alloc().unwrap();
        k.gate_open(g).unwrap();
        k.gate_close(g).unwrap();
        k.gate_timedwait(a, g, 1).unwrap();
        k.tick();
        assert_eq!(k.thread_retval(a), KrnError::TimedOut.code());
    }

    #[test]
    fn test_timedwait_entry_before_expiry() {
        let (k, a, _) = boot2();
        let g = k.gate_alloc().unwrap();
        k.gate_timedwait(a, g, 10).unwrap();
        k.tick();
        k.gate_open(g).unwrap();
        assert!(k.is_ready(a));
        assert_eq!(k.thread_retval(a), 0);
        // timer disarmed: later ticks must not fire a stale timeout
        for _ in 0..10 {
            k.tick();
        }
        assert_eq!(k.thread_retval(a), 0);
    }
}
