//! Syscall boundary tests for rtk-kern

use rtk_kern::{Kernel, KernelConfig, KrnError, SvcNum, ThreadId};

fn boot() -> (Kernel, ThreadId) {
    let k = Kernel::new(KernelConfig::new());
    let th = k.thread_create(0x1000).unwrap();
    (k, th)
}

#[test]
fn test_unknown_call_is_nosys_without_side_effects() {
    let (k, th) = boot();
    assert_eq!(k.syscall(th, 200, [1, 2, 3, 4]), KrnError::NotImplemented.code());
    assert!(k.is_ready(th));
    assert!(k.trace_pop().is_none());
}

#[test]
fn test_argument_errors_precede_mutation() {
    let (k, th) = boot();
    // bad queue id: no block, no trace, thread untouched
    assert_eq!(
        k.syscall(th, SvcNum::GateWait as u32, [9999, 0, 0, 0]),
        KrnError::InvalidArgument.code()
    );
    assert!(k.is_ready(th));
    assert!(k.trace_pop().is_none());
}

#[test]
fn test_full_gate_protocol_through_syscalls() {
    let (k, th) = boot();
    let g = k.syscall(th, SvcNum::GateAlloc as u32, [0; 4]);
    assert!(g >= 0);
    let g = g as u32;

    assert_eq!(k.syscall(th, SvcNum::GateOpen as u32, [g, 0, 0, 0]), 0);
    assert_eq!(k.syscall(th, SvcNum::GateWait as u32, [g, 0, 0, 0]), 0);
    assert_eq!(k.syscall(th, SvcNum::GateExit as u32, [g, 1, 0, 0]), 0);
    assert_eq!(
        k.gate_state(g),
        Ok(rtk_kern::GateState::OpenUnlocked)
    );
}

#[test]
fn test_blocking_call_final_value_is_in_retval_cell() {
    let (k, th) = boot();
    let other = k.thread_create(0x2000).unwrap();
    let s = k.syscall(th, SvcNum::SemAlloc as u32, [0; 4]) as u32;

    // the immediate return of a blocking call is provisional
    k.syscall(other, SvcNum::SemWait as u32, [s, 0, 0, 0]);
    assert!(!k.is_ready(other));

    k.syscall(th, SvcNum::SemPost as u32, [s, 0, 0, 0]);
    assert!(k.is_ready(other));
    assert_eq!(k.thread_retval(other), 0);
}

#[test]
fn test_pause_resume_through_syscalls() {
    let (k, th) = boot();
    let victim = k.thread_create(0x2000).unwrap();

    assert_eq!(k.syscall(th, SvcNum::Pause as u32, [victim.raw() as u32, 0, 0, 0]), 0);
    assert_eq!(k.is_paused(victim.raw() as u32), Ok(true));
    assert_eq!(k.syscall(th, SvcNum::Resume as u32, [victim.raw() as u32, 0, 0, 0]), 0);
    assert!(k.is_ready(victim));
}

#[test]
fn test_reschedule_consumed_once_per_trap_exit() {
    let (k, th) = boot();
    k.syscall(th, SvcNum::Sleep as u32, [5, 0, 0, 0]);

    // trap exit consumes the defer flag exactly once
    assert!(k.sched_pending());
    assert!(k.reschedule().is_none());
    assert!(!k.sched_pending());
    assert!(k.reschedule().is_none());
}
