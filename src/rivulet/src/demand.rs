//! Lock-free demand accounting.
//!
//! Each consumer edge carries a non-negative demand accumulator: incremented
//! by downstream requests, decremented as elements are delivered, saturating
//! at the unbounded sentinel instead of overflowing. Producers must never
//! deliver more than the net outstanding demand.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::StreamError;

/// Sentinel for "effectively unbounded" demand.
pub const UNBOUNDED: u64 = u64::MAX;

/// Validate a request amount. Zero is a protocol violation.
pub fn validate(n: u64) -> Result<(), StreamError> {
    if n == 0 {
        return Err(StreamError::BadRequest(n));
    }
    Ok(())
}

/// Add `n` to the accumulator, saturating at [`UNBOUNDED`].
///
/// Returns the previous value; a `0` return tells the caller it is the one
/// that revived a stalled producer.
pub fn add_cap(requested: &AtomicU64, n: u64) -> u64 {
    let mut current = requested.load(Ordering::Acquire);
    loop {
        if current == UNBOUNDED {
            return UNBOUNDED;
        }
        let next = current.saturating_add(n);
        match requested.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
            Ok(previous) => return previous,
            Err(observed) => current = observed,
        }
    }
}

/// Subtract `n` delivered elements from the accumulator.
///
/// Unbounded demand stays unbounded. Returns the new value.
pub fn produced(requested: &AtomicU64, n: u64) -> u64 {
    let mut current = requested.load(Ordering::Acquire);
    loop {
        if current == UNBOUNDED {
            return UNBOUNDED;
        }
        debug_assert!(current >= n, "produced {n} with only {current} requested");
        let next = current.saturating_sub(n);
        match requested.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => return next,
            Err(observed) => current = observed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn zero_request_is_rejected() {
        assert_eq!(validate(0), Err(StreamError::BadRequest(0)));
        assert_eq!(validate(1), Ok(()));
        assert_eq!(validate(UNBOUNDED), Ok(()));
    }

    #[test]
    fn add_cap_saturates_at_unbounded() {
        let requested = AtomicU64::new(0);
        assert_eq!(add_cap(&requested, 10), 0);
        assert_eq!(add_cap(&requested, UNBOUNDED - 1), 10);
        assert_eq!(requested.load(Ordering::Acquire), UNBOUNDED);
        // Once unbounded, stays unbounded.
        assert_eq!(add_cap(&requested, 5), UNBOUNDED);
        assert_eq!(requested.load(Ordering::Acquire), UNBOUNDED);
    }

    #[test]
    fn produced_keeps_unbounded_sticky() {
        let requested = AtomicU64::new(UNBOUNDED);
        assert_eq!(produced(&requested, 100), UNBOUNDED);
        assert_eq!(requested.load(Ordering::Acquire), UNBOUNDED);
    }

    #[test]
    fn produced_decrements_finite_demand() {
        let requested = AtomicU64::new(7);
        assert_eq!(produced(&requested, 3), 4);
        assert_eq!(produced(&requested, 4), 0);
    }

    #[test]
    fn concurrent_add_cap_never_loses_requests() {
        let requested = Arc::new(AtomicU64::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let requested = Arc::clone(&requested);
            handles.push(std::thread::spawn(move || {
                for _ in 0..1_000 {
                    add_cap(&requested, 3);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(requested.load(Ordering::Acquire), 8 * 1_000 * 3);
    }
}
