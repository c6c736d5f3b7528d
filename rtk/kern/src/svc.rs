//! System-call numbering and dispatch
//!
//! The port layer's trap handler decodes the call number and argument
//! registers and funnels everything through [`svc_dispatch`]. Every call
//! returns a plain `i32`: a non-negative result, or a negated error
//! code. A blocking call's immediate return value is provisional; the
//! definitive one is in the thread's return-value cell when it next
//! runs.

use crate::kernel::Kernel;
use rtk_core::{retcode, KrnError, ThreadId};

/// System-call numbers, stable across releases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SvcNum {
    Clock = 0,
    Sleep = 1,
    Alarm = 2,
    Yield = 3,

    ThreadCreate = 8,
    ThreadSelf = 9,
    Exit = 10,
    Terminate = 11,
    Cancel = 12,
    Join = 13,
    Pause = 14,
    Resume = 15,

    ObjFree = 16,

    MutexAlloc = 24,
    MutexLock = 25,
    MutexTrylock = 26,
    MutexTimedlock = 27,
    MutexUnlock = 28,

    CondAlloc = 32,
    CondWait = 33,
    CondTimedwait = 34,
    CondSignal = 35,
    CondBroadcast = 36,

    SemAlloc = 40,
    SemInit = 41,
    SemWait = 42,
    SemTrywait = 43,
    SemTimedwait = 44,
    SemPost = 45,

    EvAlloc = 48,
    EvWait = 49,
    EvTimedwait = 50,
    EvRaise = 51,
    EvMask = 52,
    EvClear = 53,

    FlagAlloc = 56,
    FlagVal = 57,
    FlagClear = 58,
    FlagTake = 59,
    FlagTimedtake = 60,
    FlagGive = 61,
    FlagTrytake = 62,

    GateAlloc = 64,
    GateWait = 65,
    GateTimedwait = 66,
    GateExit = 67,
    GateOpen = 68,
    GateClose = 69,

    IrqWait = 72,
    IrqTimedwait = 73,
}

impl SvcNum {
    /// Decode a raw call number
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::Clock,
            1 => Self::Sleep,
            2 => Self::Alarm,
            3 => Self::Yield,
            8 => Self::ThreadCreate,
            9 => Self::ThreadSelf,
            10 => Self::Exit,
            11 => Self::Terminate,
            12 => Self::Cancel,
            13 => Self::Join,
            14 => Self::Pause,
            15 => Self::Resume,
            16 => Self::ObjFree,
            24 => Self::MutexAlloc,
            25 => Self::MutexLock,
            26 => Self::MutexTrylock,
            27 => Self::MutexTimedlock,
            28 => Self::MutexUnlock,
            32 => Self::CondAlloc,
            33 => Self::CondWait,
            34 => Self::CondTimedwait,
            35 => Self::CondSignal,
            36 => Self::CondBroadcast,
            40 => Self::SemAlloc,
            41 => Self::SemInit,
            42 => Self::SemWait,
            43 => Self::SemTrywait,
            44 => Self::SemTimedwait,
            45 => Self::SemPost,
            48 => Self::EvAlloc,
            49 => Self::EvWait,
            50 => Self::EvTimedwait,
            51 => Self::EvRaise,
            52 => Self::EvMask,
            53 => Self::EvClear,
            56 => Self::FlagAlloc,
            57 => Self::FlagVal,
            58 => Self::FlagClear,
            59 => Self::FlagTake,
            60 => Self::FlagTimedtake,
            61 => Self::FlagGive,
            62 => Self::FlagTrytake,
            64 => Self::GateAlloc,
            65 => Self::GateWait,
            66 => Self::GateTimedwait,
            67 => Self::GateExit,
            68 => Self::GateOpen,
            69 => Self::GateClose,
            72 => Self::IrqWait,
            73 => Self::IrqTimedwait,
            _ => return None,
        })
    }
}

/// Execute one system call on behalf of `th`
pub fn svc_dispatch(k: &Kernel, th: ThreadId, num: u32, args: [u32; 4]) -> i32 {
    let Some(svc) = SvcNum::from_raw(num) else {
        return KrnError::NotImplemented.code();
    };
    let [a0, a1, a2, _a3] = args;
    match svc {
        SvcNum::Clock => k.ticks() as i32,
        SvcNum::Sleep => retcode(k.sleep(th, a0)),
        SvcNum::Alarm => retcode(k.alarm(th, a0)),
        SvcNum::Yield => {
            k.yield_now(th);
            0
        }

        SvcNum::ThreadCreate => match k.thread_create(a0 as usize) {
            Ok(t) => t.raw() as i32,
            Err(e) => e.code(),
        },
        SvcNum::ThreadSelf => th.raw() as i32,
        SvcNum::Exit => {
            k.thread_exit(th, a0 as i32);
            0
        }
        SvcNum::Terminate => retcode(k.thread_terminate(a0, a1 as i32)),
        SvcNum::Cancel => retcode(k.thread_cancel(a0)),
        SvcNum::Join => retcode(k.thread_join(th, a0)),
        SvcNum::Pause => retcode(k.thread_pause(a0)),
        SvcNum::Resume => retcode(k.thread_resume(a0)),

        SvcNum::ObjFree => retcode(k.obj_free(a0)),

        SvcNum::MutexAlloc => alloc_ret(k.mutex_alloc()),
        SvcNum::MutexLock => retcode(k.mutex_lock(th, a0)),
        SvcNum::MutexTrylock => retcode(k.mutex_trylock(th, a0)),
        SvcNum::MutexTimedlock => retcode(k.mutex_timedlock(th, a0, a1)),
        SvcNum::MutexUnlock => retcode(k.mutex_unlock(th, a0)),

        SvcNum::CondAlloc => alloc_ret(k.cond_alloc()),
        SvcNum::CondWait => retcode(k.cond_wait(th, a0, a1)),
        SvcNum::CondTimedwait => retcode(k.cond_timedwait(th, a0, a1, a2)),
        SvcNum::CondSignal => retcode(k.cond_signal(a0)),
        SvcNum::CondBroadcast => retcode(k.cond_broadcast(a0)),

        SvcNum::SemAlloc => alloc_ret(k.sem_alloc(a0)),
        SvcNum::SemInit => retcode(k.sem_init(a0, a1)),
        SvcNum::SemWait => retcode(k.sem_wait(th, a0)),
        SvcNum::SemTrywait => retcode(k.sem_trywait(a0)),
        SvcNum::SemTimedwait => retcode(k.sem_timedwait(th, a0, a1)),
        SvcNum::SemPost => retcode(k.sem_post(a0)),

        SvcNum::EvAlloc => alloc_ret(k.event_alloc()),
        SvcNum::EvWait => retcode(k.ev_wait(th, a0)),
        SvcNum::EvTimedwait => retcode(k.ev_timedwait(th, a0, a1)),
        SvcNum::EvRaise => retcode(k.ev_raise(a0, a1)),
        SvcNum::EvMask => retcode(k.ev_mask(a0, a1, a2 != 0)),
        SvcNum::EvClear => retcode(k.ev_clear(a0, a1)),

        SvcNum::FlagAlloc => alloc_ret(k.flag_alloc()),
        SvcNum::FlagVal => retcode(k.flag_val(a0)),
        SvcNum::FlagClear => retcode(k.flag_clear(a0)),
        SvcNum::FlagTake => retcode(k.flag_take(th, a0)),
        SvcNum::FlagTimedtake => retcode(k.flag_timedtake(th, a0, a1)),
        SvcNum::FlagGive => retcode(k.flag_give(a0)),
        SvcNum::FlagTrytake => retcode(k.flag_trytake(a0)),

        SvcNum::GateAlloc => alloc_ret(k.gate_alloc()),
        SvcNum::GateWait => retcode(k.gate_wait(th, a0)),
        SvcNum::GateTimedwait => retcode(k.gate_timedwait(th, a0, a1)),
        SvcNum::GateExit => retcode(k.gate_exit(a0, a1 != 0)),
        SvcNum::GateOpen => retcode(k.gate_open(a0)),
        SvcNum::GateClose => retcode(k.gate_close(a0)),

        SvcNum::IrqWait => retcode(k.irq_wait(th, a0)),
        SvcNum::IrqTimedwait => retcode(k.irq_timedwait(th, a0, a1)),
    }
}

impl Kernel {
    /// Execute one system call on behalf of the calling thread
    pub fn syscall(&self, th: ThreadId, num: u32, args: [u32; 4]) -> i32 {
        svc_dispatch(self, th, num, args)
    }
}

fn alloc_ret(res: rtk_core::KrnResult<u32>) -> i32 {
    match res {
        Ok(id) => id as i32,
        Err(e) => e.code(),
    }
}
