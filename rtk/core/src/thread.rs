//! Thread identity and packed status word

use crate::{KrnError, KrnResult};
use core::fmt;

/// Type-safe thread identifier
///
/// Thread ids index the kernel's fixed tables and the wait-queue bitmaps.
/// Because every queue is a single 32-bit bitmap, the id space can never
/// exceed [`ThreadId::LIMIT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ThreadId(u8);

impl ThreadId {
    /// Hard ceiling of the id space (wait queues are 32-bit bitmaps)
    pub const LIMIT: usize = 32;

    /// Create a new thread id
    pub fn new(id: u8) -> KrnResult<Self> {
        if (id as usize) < Self::LIMIT {
            Ok(ThreadId(id))
        } else {
            Err(KrnError::InvalidArgument)
        }
    }

    /// Create a thread id without validation (const fn)
    pub const fn new_unchecked(id: u8) -> Self {
        ThreadId(id)
    }

    /// Raw id value
    pub const fn raw(self) -> u8 {
        self.0
    }

    /// Table/bitmap index
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Bit position of this thread in a wait-queue bitmap
    pub const fn bit(self) -> u32 {
        1u32 << self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Thread({})", self.0)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ThreadId {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "Thread({})", self.0);
    }
}

/// Packed thread status word
///
/// Encodes the wait queue a thread is blocked on together with the
/// clock-armed flag: `(queue_id << 1) | clock_armed`. The all-zero word
/// means "on the ready queue, no timeout armed", which is also the reset
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ThreadStat(u32);

impl ThreadStat {
    /// Ready, no timeout armed
    pub const READY: ThreadStat = ThreadStat(0);

    /// Pack a queue id and the clock-armed flag
    pub const fn new(queue: u32, clock_armed: bool) -> Self {
        ThreadStat((queue << 1) | clock_armed as u32)
    }

    /// Rebuild from a raw status table entry
    pub const fn from_raw(raw: u32) -> Self {
        ThreadStat(raw)
    }

    /// Raw table entry
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Queue id the thread was last recorded waiting on
    pub const fn queue(self) -> u32 {
        self.0 >> 1
    }

    /// Whether a timeout is armed for the recorded wait
    pub const fn clock_armed(self) -> bool {
        self.0 & 1 != 0
    }
}

impl fmt::Display for ThreadStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Stat(wq={}, clk={})", self.queue(), self.clock_armed())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ThreadStat {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "Stat(wq={}, clk={})", self.queue(), self.clock_armed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_id_bounds() {
        assert!(ThreadId::new(0).is_ok());
        assert!(ThreadId::new(31).is_ok());
        assert_eq!(ThreadId::new(32), Err(KrnError::InvalidArgument));
    }

    #[test]
    fn test_thread_id_bit() {
        assert_eq!(ThreadId::new_unchecked(0).bit(), 1);
        assert_eq!(ThreadId::new_unchecked(5).bit(), 0b10_0000);
    }

    #[test]
    fn test_stat_packing() {
        let s = ThreadStat::new(17, true);
        assert_eq!(s.queue(), 17);
        assert!(s.clock_armed());

        let s = ThreadStat::new(17, false);
        assert_eq!(s.queue(), 17);
        assert!(!s.clock_armed());

        assert_eq!(ThreadStat::READY.queue(), 0);
        assert!(!ThreadStat::READY.clock_armed());
    }
}
