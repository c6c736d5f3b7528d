//! Atomic bitmap primitives
//!
//! Every word shared between system calls and interrupt handlers is an
//! `AtomicU32` mutated either by a single-bit store or by the optimistic
//! load/compute/conditional-commit retry pattern. Interrupt handlers must
//! never block, so there is no lock anywhere in this module.

use core::sync::atomic::{AtomicU32, Ordering};

/// Set a single bit in a shared word
pub fn bit_set(word: &AtomicU32, bit: u32) {
    word.fetch_or(1 << bit, Ordering::SeqCst);
}

/// Clear a single bit in a shared word
pub fn bit_clr(word: &AtomicU32, bit: u32) {
    word.fetch_and(!(1 << bit), Ordering::SeqCst);
}

/// Read a single bit from a shared word
pub fn bit_get(word: &AtomicU32, bit: u32) -> bool {
    word.load(Ordering::SeqCst) & (1 << bit) != 0
}

/// Write a single bit in a shared word
pub fn bit_put(word: &AtomicU32, bit: u32, val: bool) {
    if val {
        bit_set(word, bit);
    } else {
        bit_clr(word, bit);
    }
}

/// Optimistic read-modify-write retry loop
///
/// Loads the word, computes a replacement, and commits it only if no
/// concurrent writer got in between; retries on conflict. Returns the
/// value that was replaced. The compute closure may run more than once
/// and must be side-effect free.
pub fn update<F>(word: &AtomicU32, mut f: F) -> u32
where
    F: FnMut(u32) -> u32,
{
    let mut cur = word.load(Ordering::SeqCst);
    loop {
        match word.compare_exchange_weak(cur, f(cur), Ordering::SeqCst, Ordering::SeqCst) {
            Ok(prev) => return prev,
            Err(actual) => cur = actual,
        }
    }
}

/// Conditional variant of [`update`]
///
/// The closure may refuse the transition by returning `None`; the word is
/// then left untouched and the current value is returned as `Err`.
pub fn try_update<F>(word: &AtomicU32, mut f: F) -> Result<u32, u32>
where
    F: FnMut(u32) -> Option<u32>,
{
    let mut cur = word.load(Ordering::SeqCst);
    loop {
        let next = match f(cur) {
            Some(next) => next,
            None => return Err(cur),
        };
        match word.compare_exchange_weak(cur, next, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(prev) => return Ok(prev),
            Err(actual) => cur = actual,
        }
    }
}

/// Index of the lowest set bit, if any
///
/// The deterministic tie-break for every wait queue: the lowest-numbered
/// member wins.
pub fn lowest_set(val: u32) -> Option<u32> {
    if val == 0 {
        None
    } else {
        Some(val.trailing_zeros())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_bit_ops() {
        let w = AtomicU32::new(0);

        bit_set(&w, 3);
        bit_set(&w, 31);
        assert!(bit_get(&w, 3));
        assert!(bit_get(&w, 31));
        assert!(!bit_get(&w, 0));

        bit_clr(&w, 3);
        assert!(!bit_get(&w, 3));
        assert!(bit_get(&w, 31));

        bit_put(&w, 7, true);
        assert!(bit_get(&w, 7));
        bit_put(&w, 7, false);
        assert!(!bit_get(&w, 7));
    }

    #[test]
    fn test_update_returns_previous() {
        let w = AtomicU32::new(0x0f);
        let prev = update(&w, |v| v | 0xf0);
        assert_eq!(prev, 0x0f);
        assert_eq!(w.load(core::sync::atomic::Ordering::SeqCst), 0xff);
    }

    #[test]
    fn test_try_update_refusal() {
        let w = AtomicU32::new(5);
        let res = try_update(&w, |v| if v > 10 { Some(v - 10) } else { None });
        assert_eq!(res, Err(5));
        assert_eq!(w.load(core::sync::atomic::Ordering::SeqCst), 5);

        let res = try_update(&w, |v| if v > 0 { Some(v - 1) } else { None });
        assert_eq!(res, Ok(5));
        assert_eq!(w.load(core::sync::atomic::Ordering::SeqCst), 4);
    }

    #[test]
    fn test_lowest_set() {
        assert_eq!(lowest_set(0), None);
        assert_eq!(lowest_set(1), Some(0));
        assert_eq!(lowest_set(0b1010_0000), Some(5));
        assert_eq!(lowest_set(0x8000_0000), Some(31));
    }
}
