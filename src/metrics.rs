//! Counter-derived bandwidth
//!
//! Cache-miss counts exist on every platform but lump several miss kinds together; uncore CAS
//! counts track real DRAM transactions but are often not exposed. Both are kept in the record and
//! the bandwidth figure prefers cache misses, falling back to CAS.
use crate::counters::CounterSnapshot;

/// Bytes moved per counted miss or CAS command
pub const CACHE_LINE_BYTES: u64 = 64;

/// Counter that produced a bandwidth figure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandwidthSource {
    CacheMisses,
    UncoreCas,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CounterBandwidth {
    pub gbps: f64,
    pub source: BandwidthSource,
}

impl CounterBandwidth {
    const NONE: CounterBandwidth = CounterBandwidth {
        gbps: 0.0,
        source: BandwidthSource::None,
    };
}

/// Bandwidth in GB/s implied by `counters` over `elapsed_secs`
pub fn counter_bandwidth(
    counters: &CounterSnapshot,
    elapsed_secs: f64,
    line_bytes: u64,
) -> CounterBandwidth {
    if elapsed_secs.is_nan() || elapsed_secs <= 0.0 {
        return CounterBandwidth::NONE;
    }

    let misses = counters.cache_misses();
    if misses > 0 {
        return CounterBandwidth {
            gbps: (misses as f64 * line_bytes as f64) / elapsed_secs / 1e9,
            source: BandwidthSource::CacheMisses,
        };
    }

    let cas = counters.cas_read().saturating_add(counters.cas_write());
    if cas > 0 {
        return CounterBandwidth {
            gbps: (cas as f64 * line_bytes as f64) / elapsed_secs / 1e9,
            source: BandwidthSource::UncoreCas,
        };
    }

    CounterBandwidth::NONE
}
