//! Sweep size plan
//!
//! Sizes are element counts: powers of two from `2^min_exponent` with a 1.5x midpoint after each,
//! stopping at the largest count that fits in `llc_multiple` times the last-level cache.
use crate::kernel::ELEMENT_SIZE;

/// Smallest power-of-two exponent in a derived plan (1024 elements, 8 KiB)
pub const MIN_EXPONENT: u32 = 10;

/// Ordered, strictly increasing list of array sizes to sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizePlan {
    sizes: Vec<usize>,
}

impl SizePlan {
    /// Derive a plan spanning sub-cache up to `llc_multiple` times `llc_bytes`
    pub fn from_llc(llc_bytes: u64, llc_multiple: u64) -> Self {
        let max_bytes = llc_bytes.saturating_mul(llc_multiple.max(1));
        let max_elements = usize::try_from(max_bytes / ELEMENT_SIZE as u64).unwrap_or(usize::MAX);
        Self::up_to(max_elements)
    }

    /// Powers of two and 1.5x midpoints from `2^MIN_EXPONENT` to `max_elements` inclusive.
    ///
    /// A limit below the smallest size still yields that one size so a sweep never runs empty.
    pub fn up_to(max_elements: usize) -> Self {
        let floor = 1usize << MIN_EXPONENT;
        let max_elements = max_elements.max(floor);
        let mut sizes = Vec::new();

        let mut pow = floor;
        loop {
            sizes.push(pow);
            let mid = pow + pow / 2;
            if mid <= max_elements {
                sizes.push(mid);
            }
            match pow.checked_mul(2) {
                Some(next) if next <= max_elements => pow = next,
                _ => break,
            }
        }

        SizePlan { sizes }
    }

    /// Explicit sizes, sorted and de-duplicated
    pub fn from_sizes(mut sizes: Vec<usize>) -> Self {
        sizes.sort_unstable();
        sizes.dedup();
        SizePlan { sizes }
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }
}

/// Laps of the chain needed for `target_iterations` dereferences, at least one
pub fn repeat_factor(n: usize, target_iterations: usize) -> usize {
    if n == 0 {
        return 1;
    }
    (target_iterations / n).max(1)
}
