//! Pointer-chase kernel
//!
//! Every load address depends on the previous load's value, so neither the prefetcher nor
//! out-of-order execution can overlap accesses and the measured interval is pure access latency.
use crate::permutation::ChaseChain;
use std::hint::black_box;
use std::time::{Duration, Instant};

/// Width of one chain entry in bytes
pub const ELEMENT_SIZE: usize = std::mem::size_of::<usize>();

/// Outcome of one timed chase
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChaseTiming {
    /// Chain length N
    pub n: usize,
    /// Repeat factor R
    pub repeat: usize,
    /// Dereferences performed, always N * R
    pub steps: u64,
    /// Wall-clock time of the timed loop
    pub elapsed: Duration,
    /// Index the chase ended on, kept live so the loop can't be elided
    pub final_index: usize,
}

impl ChaseTiming {
    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }

    /// Nanoseconds per dereference
    pub fn latency_ns(&self) -> f64 {
        self.elapsed_secs() / self.steps as f64 * 1e9
    }

    /// Bytes of chain entries touched per second, in GB/s
    pub fn app_bandwidth_gbps(&self) -> f64 {
        (self.steps as f64 * ELEMENT_SIZE as f64) / self.elapsed_secs() / 1e9
    }
}

/// Chase `chain` for `chain.len() * repeat` steps starting from index 0.
///
/// With `warmup` set, one untimed lap of the chain runs first so the TLB and caches start warm;
/// the cache-profiling sweep leaves it off to include cold-start cost.
#[inline(never)]
pub fn chase(chain: &ChaseChain, repeat: usize, warmup: bool) -> ChaseTiming {
    let n = chain.len();
    let next = chain.as_slice();
    let total = n as u64 * repeat as u64;
    let mut idx = 0usize;

    // SAFETY (all unchecked loads below): a ChaseChain only exists after validation, which proves
    // every successor is < n, and idx starts at 0 < n.
    if warmup {
        for _ in 0..n {
            idx = unsafe { *next.get_unchecked(idx) };
        }
        // a full lap of a single cycle returns to the anchor
        idx = black_box(idx);
    }

    let blocks = total / 8;
    let rest = total % 8;

    let start = Instant::now();

    for _ in 0..blocks {
        // Unroll 8x to reduce loop overhead relative to memory latency
        idx = unsafe { *next.get_unchecked(idx) };
        idx = unsafe { *next.get_unchecked(idx) };
        idx = unsafe { *next.get_unchecked(idx) };
        idx = unsafe { *next.get_unchecked(idx) };
        idx = unsafe { *next.get_unchecked(idx) };
        idx = unsafe { *next.get_unchecked(idx) };
        idx = unsafe { *next.get_unchecked(idx) };
        idx = unsafe { *next.get_unchecked(idx) };
    }
    for _ in 0..rest {
        idx = unsafe { *next.get_unchecked(idx) };
    }

    // floor at timer resolution so derived rates stay finite
    let elapsed = start.elapsed().max(Duration::from_nanos(1));

    ChaseTiming {
        n,
        repeat,
        steps: total,
        elapsed,
        final_index: black_box(idx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permutation::SuccessorMap;

    fn chain(n: usize) -> ChaseChain {
        SuccessorMap::generate_seeded(n, Some(42))
            .unwrap()
            .validate()
            .unwrap()
    }

    #[test]
    fn test_step_count_is_n_times_repeat() {
        for (n, repeat) in [(2, 1), (3, 5), (10, 7), (1024, 50), (1001, 3)] {
            let timing = chase(&chain(n), repeat, false);
            assert_eq!(timing.steps, (n * repeat) as u64);
            // whole laps of a single cycle land back on the anchor
            assert_eq!(timing.final_index, 0);
            assert!(timing.elapsed_secs() > 0.0);
        }
    }

    #[test]
    fn test_warmup_does_not_change_step_count() {
        let timing = chase(&chain(256), 4, true);
        assert_eq!(timing.steps, 1024);
        assert_eq!(timing.final_index, 0);
    }

    #[test]
    fn test_derived_metrics() {
        let timing = ChaseTiming {
            n: 1000,
            repeat: 10,
            steps: 10_000,
            elapsed: Duration::from_micros(100),
            final_index: 0,
        };
        let latency = timing.latency_ns();
        assert_eq!(latency, 100e-6 / 10_000.0 * 1e9);
        assert!((latency - 10.0).abs() < 1e-9);
        let expected_bw = (10_000.0 * ELEMENT_SIZE as f64) / 100e-6 / 1e9;
        assert!((timing.app_bandwidth_gbps() - expected_bw).abs() < 1e-9);
    }
}
