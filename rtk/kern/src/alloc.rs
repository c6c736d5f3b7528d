//! Object slot allocators
//!
//! One allocation bitmap per primitive kind. Allocation hands out the
//! lowest free slot as a fully-formed queue id; freeing resets the
//! slot's state so a recycled id starts clean.

use crate::kernel::Kernel;
use crate::wq::{ObjKind, WqId};
use core::sync::atomic::AtomicU32;
use rtk_core::bits;
use rtk_core::{KrnError, KrnResult};

use crate::config::{COND_MAX, EVENT_MAX, FLAG_MAX, GATE_MAX, MUTEX_MAX, SEM_MAX};

pub(crate) struct AllocBitmaps {
    mutex: AtomicU32,
    cond: AtomicU32,
    sem: AtomicU32,
    event: AtomicU32,
    flag: AtomicU32,
    gate: AtomicU32,
}

impl AllocBitmaps {
    pub const fn new() -> Self {
        Self {
            mutex: AtomicU32::new(0),
            cond: AtomicU32::new(0),
            sem: AtomicU32::new(0),
            event: AtomicU32::new(0),
            flag: AtomicU32::new(0),
            gate: AtomicU32::new(0),
        }
    }

    pub fn mutex_word(&self) -> &AtomicU32 {
        &self.mutex
    }

    pub fn cond_word(&self) -> &AtomicU32 {
        &self.cond
    }

    pub fn sem_word(&self) -> &AtomicU32 {
        &self.sem
    }

    pub fn event_word(&self) -> &AtomicU32 {
        &self.event
    }

    pub fn flag_word(&self) -> &AtomicU32 {
        &self.flag
    }

    pub fn gate_word(&self) -> &AtomicU32 {
        &self.gate
    }

    /// Claim the lowest free slot out of `max`
    fn take(word: &AtomicU32, max: usize) -> KrnResult<usize> {
        let limit = if max == 32 { u32::MAX } else { (1u32 << max) - 1 };
        let prev = bits::try_update(word, |a| {
            bits::lowest_set(!a & limit).map(|b| a | (1 << b))
        })
        .map_err(|_| KrnError::OutOfMemory)?;
        Ok(bits::lowest_set(!prev & limit).unwrap_or(0) as usize)
    }
}

impl Kernel {
    /// Allocate a mutex; returns its queue id
    pub fn mutex_alloc(&self) -> KrnResult<u32> {
        let idx = AllocBitmaps::take(&self.allocs.mutex, MUTEX_MAX)?;
        self.mutexes.set_owner(idx, None);
        Ok(WqId::mutex(idx)?.raw())
    }

    /// Allocate a condition variable; returns its queue id
    pub fn cond_alloc(&self) -> KrnResult<u32> {
        let idx = AllocBitmaps::take(&self.allocs.cond, COND_MAX)?;
        Ok(WqId::cond(idx)?.raw())
    }

    /// Allocate a semaphore with an initial count; returns its queue id
    pub fn sem_alloc(&self, value: u32) -> KrnResult<u32> {
        let idx = AllocBitmaps::take(&self.allocs.sem, SEM_MAX)?;
        let raw = WqId::sem(idx)?.raw();
        self.sem_init(raw, value)?;
        Ok(raw)
    }

    /// Allocate an event set; returns its queue id
    pub fn event_alloc(&self) -> KrnResult<u32> {
        let idx = AllocBitmaps::take(&self.allocs.event, EVENT_MAX)?;
        Ok(WqId::event(idx)?.raw())
    }

    /// Allocate a flag; returns its queue id
    pub fn flag_alloc(&self) -> KrnResult<u32> {
        let idx = AllocBitmaps::take(&self.allocs.flag, FLAG_MAX)?;
        self.flags.clear(idx);
        Ok(WqId::flag(idx)?.raw())
    }

    /// Allocate a gate; returns its queue id
    pub fn gate_alloc(&self) -> KrnResult<u32> {
        let idx = AllocBitmaps::take(&self.allocs.gate, GATE_MAX)?;
        Ok(WqId::gate(idx)?.raw())
    }

    /// Release an object slot back to its allocator
    ///
    /// The slot's state resets; waiters still queued on it are the
    /// caller's bug and stay blocked.
    pub fn obj_free(&self, raw: u32) -> KrnResult<i32> {
        let wq = WqId::new(raw)?;
        let idx = wq.slot();
        match wq.kind() {
            ObjKind::Mutex => {
                self.mutex_check(raw)?;
                self.mutexes.set_owner(idx, None);
                bits::bit_clr(&self.allocs.mutex, idx as u32);
            }
            ObjKind::Cond => {
                self.cond_check(raw)?;
                bits::bit_clr(&self.allocs.cond, idx as u32);
            }
            ObjKind::Semaphore => {
                self.sem_init(raw, 0)?;
                bits::bit_clr(&self.allocs.sem, idx as u32);
            }
            ObjKind::Event => {
                self.ev_mask_reset(raw)?;
                bits::bit_clr(&self.allocs.event, idx as u32);
            }
            ObjKind::Flag => {
                self.flag_clear(raw)?;
                bits::bit_clr(&self.allocs.flag, idx as u32);
            }
            ObjKind::Gate => {
                self.gate_check(raw)?;
                self.gates.clear_signal(idx);
                bits::bit_clr(&self.allocs.gate, idx as u32);
            }
            _ => return Err(KrnError::InvalidArgument),
        }
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::KernelConfig;

    #[test]
    fn test_lowest_slot_first() {
        let k = Kernel::new(KernelConfig::new());
        let m0 = k.mutex_alloc().unwrap();
        let m1 = k.mutex_alloc().unwrap();
        assert_eq!(WqId::new(m0).unwrap().slot(), 0);
        assert_eq!(WqId::new(m1).unwrap().slot(), 1);
    }

    #[test]
    fn test_exhaustion_and_recycle() {
        let k = Kernel::new(KernelConfig::new());
        let mut last = 0;
        for _ in 0..MUTEX_MAX {
            last = k.mutex_alloc().unwrap();
        }
        assert_eq!(k.mutex_alloc(), Err(KrnError::OutOfMemory));

        k.obj_free(last).unwrap();
        assert_eq!(k.mutex_alloc(), Ok(last));
    }

    #[test]
    fn test_free_resets_state() {
        let k = Kernel::new(KernelConfig::new());
        let th = k.thread_create(0x1000).unwrap();
        let m = k.mutex_alloc().unwrap();
        k.mutex_lock(th, m).unwrap();

        k.obj_free(m).unwrap();
        let m2 = k.mutex_alloc().unwrap();
        assert_eq!(m2, m);
        assert_eq!(k.mutex_owner(m2), Ok(None));
    }

    #[test]
    fn test_free_of_system_queue() {
        let k = Kernel::new(KernelConfig::new());
        assert_eq!(k.obj_free(0), Err(KrnError::InvalidArgument));
    }
}
