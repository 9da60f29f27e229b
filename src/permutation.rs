//! # Permutation
//!
//! Builds the successor mapping walked by the chase kernel. Index 0 is held fixed as the cycle
//! anchor and the remaining indices are shuffled, so the mapping always forms one Hamiltonian
//! cycle: no sub-cycles for the prefetcher to settle into, and a chase of length N touches every
//! element exactly once.
//!
//! A freshly generated [`SuccessorMap`] is not trusted until [`SuccessorMap::validate`] has walked
//! it; only the resulting [`ChaseChain`] can be handed to the kernel.
use crate::error::{ChaseError, Result};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Unvalidated successor mapping `next[i]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuccessorMap {
    next: Vec<usize>,
}

impl SuccessorMap {
    /// Generate a random single-cycle mapping over `n` indices
    pub fn generate<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Result<Self> {
        if n < 2 {
            return Err(ChaseError::InvalidInput(format!(
                "array size {n} is too small to form a cycle (need at least 2)"
            )));
        }

        let mut order: Vec<usize> = (1..n).collect();
        order.shuffle(rng);

        let mut next = vec![0usize; n];
        next[0] = order[0];
        for pair in order.windows(2) {
            next[pair[0]] = pair[1];
        }
        // close the cycle back through the anchor
        next[order[n - 2]] = 0;

        Ok(SuccessorMap { next })
    }

    /// Generate with a reproducible seed, or from the thread RNG when `seed` is `None`
    pub fn generate_seeded(n: usize, seed: Option<u64>) -> Result<Self> {
        let mut rng = match seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_rng(&mut rand::rng()),
        };
        Self::generate(n, &mut rng)
    }

    /// Wrap an arbitrary mapping, e.g. one loaded from elsewhere or built by hand
    pub fn from_vec(next: Vec<usize>) -> Self {
        SuccessorMap { next }
    }

    pub fn len(&self) -> usize {
        self.next.len()
    }

    pub fn is_empty(&self) -> bool {
        self.next.is_empty()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.next
    }

    /// Walk N steps from index 0 and confirm every index was visited.
    ///
    /// Must run before any timed traversal. Out-of-range successors count as corruption rather
    /// than panicking.
    pub fn validate(self) -> Result<ChaseChain> {
        let n = self.next.len();
        let mut seen = vec![false; n];
        let mut visited = 0usize;
        let mut idx = 0usize;

        for _ in 0..n {
            idx = match self.next.get(idx) {
                Some(&succ) if succ < n => succ,
                _ => break,
            };
            if !seen[idx] {
                seen[idx] = true;
                visited += 1;
            }
        }

        if n == 0 || visited != n {
            return Err(ChaseError::CorruptPermutation { n, visited });
        }

        Ok(ChaseChain { next: self.next })
    }
}

/// Successor mapping proven to be a single cycle over `0..len()`.
///
/// Every entry is `< len()`, which the kernel relies on for unchecked indexing.
#[derive(Debug)]
pub struct ChaseChain {
    next: Vec<usize>,
}

impl ChaseChain {
    pub fn len(&self) -> usize {
        self.next.len()
    }

    pub fn is_empty(&self) -> bool {
        self.next.is_empty()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.next
    }
}

/// Source of the successor mapping for each trial
pub trait ChainGenerator {
    fn generate(&mut self, n: usize, seed: Option<u64>) -> Result<SuccessorMap>;
}

/// Shuffled single-cycle mappings from [`SuccessorMap::generate_seeded`]
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomChains;

impl ChainGenerator for RandomChains {
    fn generate(&mut self, n: usize, seed: Option<u64>) -> Result<SuccessorMap> {
        SuccessorMap::generate_seeded(n, seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cycle_length_from(next: &[usize], start: usize) -> usize {
        let mut idx = next[start];
        let mut steps = 1;
        while idx != start {
            idx = next[idx];
            steps += 1;
            assert!(steps <= next.len(), "walk never returned to {start}");
        }
        steps
    }

    #[test]
    fn test_too_small_is_invalid_input() {
        for n in [0, 1] {
            let err = SuccessorMap::generate_seeded(n, Some(1)).unwrap_err();
            assert!(matches!(err, ChaseError::InvalidInput(_)));
        }
    }

    #[test]
    fn test_two_elements_swap() {
        let map = SuccessorMap::generate_seeded(2, Some(7)).unwrap();
        assert_eq!(map.as_slice(), &[1, 0]);
        assert!(map.validate().is_ok());
    }

    #[test]
    fn test_seed_is_reproducible() {
        let a = SuccessorMap::generate_seeded(4096, Some(0xDEADBEEF)).unwrap();
        let b = SuccessorMap::generate_seeded(4096, Some(0xDEADBEEF)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_self_loop_is_corrupt() {
        let mut map = SuccessorMap::generate_seeded(10, Some(3)).unwrap().next;
        map[3] = 3;
        let err = SuccessorMap::from_vec(map).validate().unwrap_err();
        match err {
            ChaseError::CorruptPermutation { n, visited } => {
                assert_eq!(n, 10);
                assert!(visited < 10);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_two_sub_cycles_are_corrupt() {
        // 0 -> 1 -> 0 and 2 -> 3 -> 2
        let err = SuccessorMap::from_vec(vec![1, 0, 3, 2]).validate().unwrap_err();
        assert!(matches!(
            err,
            ChaseError::CorruptPermutation { n: 4, visited: 2 }
        ));
    }

    #[test]
    fn test_out_of_range_successor_is_corrupt() {
        let err = SuccessorMap::from_vec(vec![1, 9, 0]).validate().unwrap_err();
        assert!(matches!(err, ChaseError::CorruptPermutation { n: 3, .. }));
    }

    #[test]
    fn test_empty_map_is_corrupt() {
        let err = SuccessorMap::from_vec(Vec::new()).validate().unwrap_err();
        assert!(matches!(
            err,
            ChaseError::CorruptPermutation { n: 0, visited: 0 }
        ));
    }

    proptest! {
        #[test]
        fn prop_single_cycle_from_any_start(n in 2usize..2048, seed in any::<u64>(), start_frac in 0.0f64..1.0) {
            let chain = SuccessorMap::generate_seeded(n, Some(seed)).unwrap().validate().unwrap();
            let next = chain.as_slice();
            let start = ((n as f64) * start_frac) as usize % n;

            let mut seen = vec![false; n];
            let mut idx = start;
            for _ in 0..n {
                idx = next[idx];
                prop_assert!(!seen[idx]);
                seen[idx] = true;
            }
            prop_assert_eq!(idx, start);
            prop_assert_eq!(cycle_length_from(next, start), n);
        }
    }
}
