//! Wait-queue id space, object-kind classifier and the queue bank
//!
//! A queue id is both an index into the bank of bitmaps and, implicitly,
//! a capability: its object kind is derived from which sub-range of the
//! id space it falls in. The ready and clock queues are privileged
//! system queues; everything else is addressed by callers through an id
//! returned from an allocation call.

use crate::config::{COND_MAX, EVENT_MAX, FLAG_MAX, GATE_MAX, IRQ_MAX, MAX_THREADS, MUTEX_MAX, SEM_MAX};
use core::fmt;
use core::sync::atomic::AtomicU32;
use rtk_core::bits;
use rtk_core::{KrnError, KrnResult, ThreadId};

/// Ready threads queue
pub const WQ_READY: usize = 0;
/// Threads waiting for a time-share cycle
pub const WQ_TMSHARE: usize = 1;
/// Threads with an armed timeout
pub const WQ_CLOCK: usize = 2;
/// First mutex queue
pub const MUTEX_BASE: usize = 3;
/// First condition-variable queue
pub const COND_BASE: usize = MUTEX_BASE + MUTEX_MAX;
/// First semaphore queue
pub const SEM_BASE: usize = COND_BASE + COND_MAX;
/// First event-set queue
pub const EVENT_BASE: usize = SEM_BASE + SEM_MAX;
/// First flag queue
pub const FLAG_BASE: usize = EVENT_BASE + EVENT_MAX;
/// First gate queue
pub const GATE_BASE: usize = FLAG_BASE + FLAG_MAX;
/// First join queue (one per joinable thread)
pub const JOIN_BASE: usize = GATE_BASE + GATE_MAX;
/// Console read queue
pub const WQ_CONSOLE_RD: usize = JOIN_BASE + MAX_THREADS;
/// Console write queue
pub const WQ_CONSOLE_WR: usize = WQ_CONSOLE_RD + 1;
/// Comm channel send queue
pub const WQ_COMM_SEND: usize = WQ_CONSOLE_WR + 1;
/// Comm channel receive queue
pub const WQ_COMM_RECV: usize = WQ_COMM_SEND + 1;
/// First per-IRQ private queue
pub const IRQ_BASE: usize = WQ_COMM_RECV + 1;
/// Canceled threads parked until joined
pub const WQ_CANCELED: usize = IRQ_BASE + IRQ_MAX;
/// Paused threads overlay
pub const WQ_PAUSED: usize = WQ_CANCELED + 1;
/// Faulted threads overlay
pub const WQ_FAULT: usize = WQ_PAUSED + 1;
/// Total number of wait queues
pub const WQ_COUNT: usize = WQ_FAULT + 1;

/// The primitive type a queue id belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjKind {
    Ready,
    TmShare,
    Clock,
    Mutex,
    Cond,
    Semaphore,
    Event,
    Flag,
    Gate,
    Join,
    ConsoleRead,
    ConsoleWrite,
    CommSend,
    CommRecv,
    Irq,
    Canceled,
    Paused,
    Fault,
}

#[cfg(feature = "defmt")]
impl defmt::Format for ObjKind {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "{}", crate::wq::kind_name(*self));
    }
}

pub(crate) fn kind_name(kind: ObjKind) -> &'static str {
    match kind {
        ObjKind::Ready => "ready",
        ObjKind::TmShare => "tmshare",
        ObjKind::Clock => "clock",
        ObjKind::Mutex => "mutex",
        ObjKind::Cond => "cond",
        ObjKind::Semaphore => "semaphore",
        ObjKind::Event => "event",
        ObjKind::Flag => "flag",
        ObjKind::Gate => "gate",
        ObjKind::Join => "join",
        ObjKind::ConsoleRead => "console-rd",
        ObjKind::ConsoleWrite => "console-wr",
        ObjKind::CommSend => "comm-send",
        ObjKind::CommRecv => "comm-recv",
        ObjKind::Irq => "irq",
        ObjKind::Canceled => "canceled",
        ObjKind::Paused => "paused",
        ObjKind::Fault => "fault",
    }
}

/// Validated wait-queue id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WqId(u16);

impl WqId {
    /// The ready queue
    pub const READY: WqId = WqId(WQ_READY as u16);
    /// The time-share queue
    pub const TMSHARE: WqId = WqId(WQ_TMSHARE as u16);
    /// The clock queue
    pub const CLOCK: WqId = WqId(WQ_CLOCK as u16);
    /// The canceled-threads queue
    pub const CANCELED: WqId = WqId(WQ_CANCELED as u16);
    /// The paused-threads overlay
    pub const PAUSED: WqId = WqId(WQ_PAUSED as u16);
    /// The faulted-threads overlay
    pub const FAULT: WqId = WqId(WQ_FAULT as u16);

    /// Validate a raw queue id from a system-call argument
    pub fn new(raw: u32) -> KrnResult<Self> {
        if (raw as usize) < WQ_COUNT {
            Ok(WqId(raw as u16))
        } else {
            Err(KrnError::InvalidArgument)
        }
    }

    pub(crate) const fn from_index(index: usize) -> Self {
        WqId(index as u16)
    }

    /// Queue id of mutex slot `idx`
    pub fn mutex(idx: usize) -> KrnResult<Self> {
        Self::in_range(idx, MUTEX_BASE, MUTEX_MAX)
    }

    /// Queue id of condition-variable slot `idx`
    pub fn cond(idx: usize) -> KrnResult<Self> {
        Self::in_range(idx, COND_BASE, COND_MAX)
    }

    /// Queue id of semaphore slot `idx`
    pub fn sem(idx: usize) -> KrnResult<Self> {
        Self::in_range(idx, SEM_BASE, SEM_MAX)
    }

    /// Queue id of event-set slot `idx`
    pub fn event(idx: usize) -> KrnResult<Self> {
        Self::in_range(idx, EVENT_BASE, EVENT_MAX)
    }

    /// Queue id of flag slot `idx`
    pub fn flag(idx: usize) -> KrnResult<Self> {
        Self::in_range(idx, FLAG_BASE, FLAG_MAX)
    }

    /// Queue id of gate slot `idx`
    pub fn gate(idx: usize) -> KrnResult<Self> {
        Self::in_range(idx, GATE_BASE, GATE_MAX)
    }

    /// Join queue of thread `th`
    pub fn join(th: ThreadId) -> Self {
        WqId((JOIN_BASE + th.index()) as u16)
    }

    /// Private queue of interrupt source `irq`
    pub fn irq(irq: usize) -> KrnResult<Self> {
        Self::in_range(irq, IRQ_BASE, IRQ_MAX)
    }

    fn in_range(idx: usize, base: usize, max: usize) -> KrnResult<Self> {
        if idx < max {
            Ok(WqId((base + idx) as u16))
        } else {
            Err(KrnError::InvalidArgument)
        }
    }

    /// Bank index of this queue
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Raw id, as carried in status words and system-call arguments
    pub const fn raw(self) -> u32 {
        self.0 as u32
    }

    /// Slot index within this queue's object kind
    ///
    /// For a mutex queue this is the mutex number, for a join queue the
    /// target thread id, and so on. System queues return 0.
    pub const fn slot(self) -> usize {
        let i = self.0 as usize;
        if i >= WQ_CANCELED {
            0
        } else if i >= IRQ_BASE {
            i - IRQ_BASE
        } else if i >= WQ_CONSOLE_RD {
            0
        } else if i >= JOIN_BASE {
            i - JOIN_BASE
        } else if i >= GATE_BASE {
            i - GATE_BASE
        } else if i >= FLAG_BASE {
            i - FLAG_BASE
        } else if i >= EVENT_BASE {
            i - EVENT_BASE
        } else if i >= SEM_BASE {
            i - SEM_BASE
        } else if i >= COND_BASE {
            i - COND_BASE
        } else if i >= MUTEX_BASE {
            i - MUTEX_BASE
        } else {
            0
        }
    }

    /// Classify this queue id into its object kind
    pub const fn kind(self) -> ObjKind {
        let i = self.0 as usize;
        if i == WQ_READY {
            ObjKind::Ready
        } else if i == WQ_TMSHARE {
            ObjKind::TmShare
        } else if i == WQ_CLOCK {
            ObjKind::Clock
        } else if i < COND_BASE {
            ObjKind::Mutex
        } else if i < SEM_BASE {
            ObjKind::Cond
        } else if i < EVENT_BASE {
            ObjKind::Semaphore
        } else if i < FLAG_BASE {
            ObjKind::Event
        } else if i < GATE_BASE {
            ObjKind::Flag
        } else if i < JOIN_BASE {
            ObjKind::Gate
        } else if i < WQ_CONSOLE_RD {
            ObjKind::Join
        } else if i == WQ_CONSOLE_RD {
            ObjKind::ConsoleRead
        } else if i == WQ_CONSOLE_WR {
            ObjKind::ConsoleWrite
        } else if i == WQ_COMM_SEND {
            ObjKind::CommSend
        } else if i == WQ_COMM_RECV {
            ObjKind::CommRecv
        } else if i < WQ_CANCELED {
            ObjKind::Irq
        } else if i == WQ_CANCELED {
            ObjKind::Canceled
        } else if i == WQ_PAUSED {
            ObjKind::Paused
        } else {
            ObjKind::Fault
        }
    }
}

impl fmt::Display for WqId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", kind_name(self.kind()), self.slot())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for WqId {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "{}[{}]", kind_name(self.kind()), self.slot());
    }
}

/// The bank of wait-queue bitmaps
///
/// One 32-bit bitmap per queue id; bit `t` set in bitmap `q` means
/// "thread `t` is logically queued on object `q`". Insertion order is
/// irrelevant: resume always picks the lowest-numbered member.
pub(crate) struct WaitQueueBank {
    lst: [AtomicU32; WQ_COUNT],
}

impl WaitQueueBank {
    pub const fn new() -> Self {
        #[allow(clippy::declare_interior_mutable_const)]
        const EMPTY: AtomicU32 = AtomicU32::new(0);
        Self { lst: [EMPTY; WQ_COUNT] }
    }

    pub fn word(&self, wq: WqId) -> &AtomicU32 {
        &self.lst[wq.index()]
    }

    pub fn insert(&self, wq: WqId, th: ThreadId) {
        bits::bit_set(self.word(wq), th.raw() as u32);
    }

    pub fn remove(&self, wq: WqId, th: ThreadId) {
        bits::bit_clr(self.word(wq), th.raw() as u32);
    }

    pub fn contains(&self, wq: WqId, th: ThreadId) -> bool {
        bits::bit_get(self.word(wq), th.raw() as u32)
    }

    pub fn raw(&self, wq: WqId) -> u32 {
        self.word(wq).load(core::sync::atomic::Ordering::SeqCst)
    }

    pub fn is_empty(&self, wq: WqId) -> bool {
        self.raw(wq) == 0
    }

    /// Lowest-numbered member, the deterministic hand-off tie-break
    pub fn head(&self, wq: WqId) -> Option<ThreadId> {
        bits::lowest_set(self.raw(wq)).map(|b| ThreadId::new_unchecked(b as u8))
    }

    /// Atomically remove and return the lowest-numbered member
    pub fn pop_head(&self, wq: WqId) -> Option<ThreadId> {
        bits::try_update(self.word(wq), |q| {
            bits::lowest_set(q).map(|b| q & !(1 << b))
        })
        .ok()
        .and_then(|prev| bits::lowest_set(prev))
        .map(|b| ThreadId::new_unchecked(b as u8))
    }

    /// Remove a thread from every queue in the bank
    pub fn remove_everywhere(&self, th: ThreadId) {
        for w in self.lst.iter() {
            bits::bit_clr(w, th.raw() as u32);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_space_is_dense() {
        // every id in [0, WQ_COUNT) classifies without overlap
        let mut counts = [0usize; WQ_COUNT];
        for i in 0..WQ_COUNT {
            counts[i] += 1;
            let _ = WqId::from_index(i).kind();
        }
        assert!(counts.iter().all(|&c| c == 1));
    }

    #[test]
    fn test_classifier_ranges() {
        assert_eq!(WqId::READY.kind(), ObjKind::Ready);
        assert_eq!(WqId::TMSHARE.kind(), ObjKind::TmShare);
        assert_eq!(WqId::CLOCK.kind(), ObjKind::Clock);
        assert_eq!(WqId::mutex(0).unwrap().kind(), ObjKind::Mutex);
        assert_eq!(WqId::mutex(MUTEX_MAX - 1).unwrap().kind(), ObjKind::Mutex);
        assert_eq!(WqId::cond(0).unwrap().kind(), ObjKind::Cond);
        assert_eq!(WqId::sem(0).unwrap().kind(), ObjKind::Semaphore);
        assert_eq!(WqId::event(0).unwrap().kind(), ObjKind::Event);
        assert_eq!(WqId::flag(0).unwrap().kind(), ObjKind::Flag);
        assert_eq!(WqId::gate(GATE_MAX - 1).unwrap().kind(), ObjKind::Gate);
        assert_eq!(WqId::join(ThreadId::new_unchecked(4)).kind(), ObjKind::Join);
        assert_eq!(WqId::irq(0).unwrap().kind(), ObjKind::Irq);
        assert_eq!(WqId::irq(IRQ_MAX - 1).unwrap().kind(), ObjKind::Irq);
        assert_eq!(WqId::CANCELED.kind(), ObjKind::Canceled);
        assert_eq!(WqId::PAUSED.kind(), ObjKind::Paused);
        assert_eq!(WqId::FAULT.kind(), ObjKind::Fault);
    }

    #[test]
    fn test_slot_round_trip() {
        assert_eq!(WqId::mutex(3).unwrap().slot(), 3);
        assert_eq!(WqId::sem(7).unwrap().slot(), 7);
        assert_eq!(WqId::gate(2).unwrap().slot(), 2);
        assert_eq!(WqId::irq(9).unwrap().slot(), 9);
        assert_eq!(WqId::join(ThreadId::new_unchecked(11)).slot(), 11);
    }

    #[test]
    fn test_out_of_range_ids() {
        assert!(WqId::mutex(MUTEX_MAX).is_err());
        assert!(WqId::gate(GATE_MAX).is_err());
        assert!(WqId::new(WQ_COUNT as u32).is_err());
    }

    #[test]
    fn test_bank_head_is_lowest() {
        let bank = WaitQueueBank::new();
        let wq = WqId::mutex(0).unwrap();
        bank.insert(wq, ThreadId::new_unchecked(9));
        bank.insert(wq, ThreadId::new_unchecked(4));
        bank.insert(wq, ThreadId::new_unchecked(17));

        assert_eq!(bank.head(wq), Some(ThreadId::new_unchecked(4)));
        assert_eq!(bank.pop_head(wq), Some(ThreadId::new_unchecked(4)));
        assert_eq!(bank.pop_head(wq), Some(ThreadId::new_unchecked(9)));
        assert_eq!(bank.pop_head(wq), Some(ThreadId::new_unchecked(17)));
        assert_eq!(bank.pop_head(wq), None);
    }
}
