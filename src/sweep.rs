//! # Sweep
//!
//! Drives trials across the size plan: for every (N, trial) the chain is generated, validated,
//! chased in-process, measured again under the counter source, reconciled, and written out.
//! A trial that fails is logged and skipped; only a sink failure stops the sweep.
use crate::counters::{CounterSource, EventTable, Measurement, Workload};
use crate::error::{ChaseError, Result};
use crate::format_size;
use crate::kernel::{self, ELEMENT_SIZE};
use crate::metrics::{self, CACHE_LINE_BYTES};
use crate::permutation::{ChainGenerator, RandomChains};
use crate::plan::{self, SizePlan};
use crate::platform;
use crate::record::{RecordSink, TrialRecord};
use log::{debug, error, info, warn};

/// Sweep parameters, fixed for the lifetime of a [`Sweep`]
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Trials per size
    pub trials: usize,
    /// Explicit sizes; derived from the LLC when `None`
    pub sizes: Option<Vec<usize>>,
    /// Upper bound on derived sizes in elements, overriding the LLC multiple
    pub max_elements: Option<usize>,
    /// LLC capacity override in bytes; detected when `None`
    pub llc_bytes: Option<u64>,
    /// Derived plan extends to this many times the LLC capacity
    pub llc_multiple: u64,
    /// Dereferences each timed loop aims for, used to pick the repeat factor
    pub target_inner_iterations: usize,
    /// Bytes per counted miss when converting counters to bandwidth
    pub cache_line_bytes: u64,
    /// Seed for every permutation; fresh randomness per trial when `None`
    pub seed: Option<u64>,
    /// Untimed lap before the timed loop
    pub warmup: bool,
    /// Events requested from the counter source
    pub events: EventTable,
}

impl Default for SweepConfig {
    fn default() -> Self {
        SweepConfig {
            trials: 5,
            sizes: None,
            max_elements: None,
            llc_bytes: None,
            llc_multiple: 16,
            target_inner_iterations: 10_000_000,
            cache_line_bytes: CACHE_LINE_BYTES,
            seed: None,
            warmup: false,
            events: EventTable::default(),
        }
    }
}

/// Totals reported when a sweep completes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub records: usize,
    pub skipped_trials: usize,
    pub counter_failures: usize,
}

pub struct Sweep<C: CounterSource, G: ChainGenerator = RandomChains> {
    config: SweepConfig,
    plan: SizePlan,
    counters: C,
    chains: G,
}

impl<C: CounterSource> Sweep<C> {
    /// Sweep over shuffled single-cycle chains
    pub fn new(config: SweepConfig, counters: C) -> Result<Self> {
        Sweep::with_generator(config, counters, RandomChains)
    }
}

/// Bytes occupied by `n` chain entries, saturating for absurd sizes
fn chain_bytes(n: usize) -> u64 {
    (n as u64).saturating_mul(ELEMENT_SIZE as u64)
}

impl<C: CounterSource, G: ChainGenerator> Sweep<C, G> {
    /// Resolve the size plan and check it; sizes that can't form a cycle are rejected here
    pub fn with_generator(config: SweepConfig, counters: C, chains: G) -> Result<Self> {
        if config.trials == 0 {
            return Err(ChaseError::InvalidInput("trial count must be at least 1".into()));
        }

        let plan = match (&config.sizes, config.max_elements) {
            (Some(sizes), _) => SizePlan::from_sizes(sizes.clone()),
            (None, Some(max)) => SizePlan::up_to(max),
            (None, None) => {
                let llc = config.llc_bytes.unwrap_or_else(|| {
                    platform::detect_llc_bytes().unwrap_or_else(|| {
                        warn!(
                            "Couldn't detect last-level cache size, assuming {}",
                            format_size(platform::DEFAULT_LLC_BYTES)
                        );
                        platform::DEFAULT_LLC_BYTES
                    })
                });
                info!("Last-level cache: {}", format_size(llc));
                SizePlan::from_llc(llc, config.llc_multiple)
            }
        };

        if plan.is_empty() {
            return Err(ChaseError::InvalidInput("size plan is empty".into()));
        }
        if let Some(&n) = plan.sizes().iter().find(|&&n| n < 2) {
            return Err(ChaseError::InvalidInput(format!(
                "array size {n} is too small to form a cycle (need at least 2)"
            )));
        }

        info!(
            "Size plan: {} sizes from {} to {} elements ({} to {})",
            plan.len(),
            plan.sizes()[0],
            plan.sizes()[plan.len() - 1],
            format_size(chain_bytes(plan.sizes()[0])),
            format_size(chain_bytes(plan.sizes()[plan.len() - 1])),
        );
        debug!("Sizes: {:?}", plan.sizes());

        Ok(Sweep {
            config,
            plan,
            counters,
            chains,
        })
    }

    pub fn plan(&self) -> &SizePlan {
        &self.plan
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// Run every (size, trial) pair, writing one record per successful trial
    pub fn run<S: RecordSink + ?Sized>(&mut self, sink: &mut S) -> Result<SweepSummary> {
        let mut summary = SweepSummary::default();
        let sizes = self.plan.sizes().to_vec();

        for n in sizes {
            let repeat = plan::repeat_factor(n, self.config.target_inner_iterations);
            info!(
                "N = {} ({}), repeat = {}, {} trials",
                n,
                format_size(chain_bytes(n)),
                repeat,
                self.config.trials
            );

            for trial in 0..self.config.trials {
                let workload = Workload {
                    n,
                    repeat,
                    seed: self.config.seed,
                    warmup: self.config.warmup,
                };

                let record = match self.run_trial(&workload, trial) {
                    Ok((record, counters_ok)) => {
                        if !counters_ok {
                            summary.counter_failures += 1;
                        }
                        record
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        error!("Trial {} for N = {} failed, skipping: {}", trial, n, e);
                        summary.skipped_trials += 1;
                        continue;
                    }
                };

                sink.write_record(&record)?;
                summary.records += 1;
            }
        }

        Ok(summary)
    }

    /// One trial; the flag reports whether counters were collected
    fn run_trial(&mut self, workload: &Workload, trial: usize) -> Result<(TrialRecord, bool)> {
        let chain = self
            .chains
            .generate(workload.n, workload.seed)?
            .validate()?;
        let timing = kernel::chase(&chain, workload.repeat, workload.warmup);
        drop(chain);

        let (measurement, counters_ok) =
            match self.counters.measure(workload, &self.config.events) {
                Ok(m) => (Some(m), true),
                // whatever went wrong in the counter source, the trial keeps its timing
                Err(e) => {
                    warn!(
                        "Counters unavailable for N = {}, trial {}: {}",
                        workload.n, trial, e
                    );
                    (None, false)
                }
            };

        let Measurement {
            counters,
            elapsed_secs,
        } = measurement.unwrap_or_default();
        let perf_bw =
            metrics::counter_bandwidth(&counters, elapsed_secs, self.config.cache_line_bytes);

        let record = TrialRecord {
            n: workload.n,
            trial,
            latency_ns: timing.latency_ns(),
            app_bandwidth_gbps: timing.app_bandwidth_gbps(),
            perf_bandwidth_gbps: perf_bw.gbps,
            perf_elapsed_secs: elapsed_secs,
            counters: measurement.map(|m| m.counters),
        };

        debug!(
            "N = {} trial {}: {:.2} ns/access, app {:.3} GB/s, perf {:.3} GB/s ({:?})",
            record.n,
            record.trial,
            record.latency_ns,
            record.app_bandwidth_gbps,
            record.perf_bandwidth_gbps,
            perf_bw.source
        );

        Ok((record, counters_ok))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::{CounterField, CounterSnapshot, NoCounters};
    use crate::permutation::SuccessorMap;

    /// Counter source returning fixed values and remembering what it was asked to run
    struct FixedCounters {
        snapshot: CounterSnapshot,
        elapsed_secs: f64,
        calls: Vec<Workload>,
    }

    impl CounterSource for FixedCounters {
        fn measure(&mut self, workload: &Workload, _events: &EventTable) -> Result<Measurement> {
            self.calls.push(*workload);
            Ok(Measurement {
                counters: self.snapshot,
                elapsed_secs: self.elapsed_secs,
            })
        }
    }

    /// Counter source that fails every other call
    struct FlakyCounters {
        calls: usize,
    }

    impl CounterSource for FlakyCounters {
        fn measure(&mut self, _workload: &Workload, _events: &EventTable) -> Result<Measurement> {
            self.calls += 1;
            if self.calls % 2 == 0 {
                Err(ChaseError::ProfilerUnavailable("timed out".into()))
            } else {
                Ok(Measurement {
                    counters: CounterSnapshot::default().with(CounterField::CacheMisses, 10),
                    elapsed_secs: 1.0,
                })
            }
        }
    }

    fn small_config(sizes: Vec<usize>, trials: usize) -> SweepConfig {
        SweepConfig {
            trials,
            sizes: Some(sizes),
            target_inner_iterations: 51_200,
            seed: Some(11),
            ..SweepConfig::default()
        }
    }

    #[test]
    fn test_records_per_size_and_trial() {
        let mut sweep = Sweep::new(small_config(vec![1024, 2048], 3), NoCounters).unwrap();
        let mut out: Vec<TrialRecord> = Vec::new();
        let summary = sweep.run(&mut out).unwrap();

        assert_eq!(summary.records, 6);
        assert_eq!(summary.counter_failures, 6);
        assert_eq!(out.iter().filter(|r| r.n == 1024).count(), 3);
        for (i, r) in out.iter().filter(|r| r.n == 1024).enumerate() {
            assert_eq!(r.trial, i);
            assert!(r.latency_ns > 0.0);
            assert!(r.app_bandwidth_gbps > 0.0);
            assert_eq!(r.perf_bandwidth_gbps, 0.0);
            assert_eq!(r.perf_elapsed_secs, 0.0);
            assert_eq!(r.counters, None);
        }
    }

    #[test]
    fn test_counter_bandwidth_recorded() {
        let counters = FixedCounters {
            snapshot: CounterSnapshot::default().with(CounterField::CacheMisses, 1_000_000),
            elapsed_secs: 0.01,
            calls: Vec::new(),
        };
        let mut sweep = Sweep::new(small_config(vec![1024], 1), counters).unwrap();
        let mut out: Vec<TrialRecord> = Vec::new();
        sweep.run(&mut out).unwrap();

        assert_eq!(out.len(), 1);
        assert!((out[0].perf_bandwidth_gbps - 6.4).abs() < 1e-9);
        assert_eq!(out[0].perf_elapsed_secs, 0.01);
        assert_eq!(out[0].counter(CounterField::CacheMisses), 1_000_000);

        let calls = &sweep.counters.calls;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].n, 1024);
        assert_eq!(calls[0].repeat, 50);
        assert_eq!(calls[0].seed, Some(11));
    }

    #[test]
    fn test_counter_failures_do_not_stop_sweep() {
        let mut sweep = Sweep::new(small_config(vec![64], 4), FlakyCounters { calls: 0 }).unwrap();
        let mut out: Vec<TrialRecord> = Vec::new();
        let summary = sweep.run(&mut out).unwrap();

        assert_eq!(summary.records, 4);
        assert_eq!(summary.counter_failures, 2);
        assert!(out[0].counters.is_some());
        assert!(out[1].counters.is_none());
        assert_eq!(out[1].perf_bandwidth_gbps, 0.0);
    }

    #[test]
    fn test_too_small_sizes_fail_fast() {
        let err = match Sweep::new(small_config(vec![1, 1024], 1), NoCounters) {
            Err(e) => e,
            Ok(_) => panic!("size 1 should be rejected"),
        };
        assert!(matches!(err, ChaseError::InvalidInput(_)));
    }

    #[test]
    fn test_zero_trials_rejected() {
        assert!(Sweep::new(small_config(vec![1024], 0), NoCounters).is_err());
    }

    #[test]
    fn test_plan_from_llc_override() {
        let config = SweepConfig {
            llc_bytes: Some(64 * 1024),
            llc_multiple: 2,
            ..SweepConfig::default()
        };
        let sweep = Sweep::new(config, NoCounters).unwrap();
        // 128 KiB of 8-byte entries
        assert_eq!(sweep.plan().sizes().last(), Some(&16384));
    }

    /// Generator whose `bad_call`-th mapping contains a self-loop
    struct SelfLoopOnCall {
        calls: usize,
        bad_call: usize,
    }

    impl ChainGenerator for SelfLoopOnCall {
        fn generate(&mut self, n: usize, seed: Option<u64>) -> Result<SuccessorMap> {
            self.calls += 1;
            let map = SuccessorMap::generate_seeded(n, seed)?;
            if self.calls != self.bad_call {
                return Ok(map);
            }
            let mut next = map.as_slice().to_vec();
            next[3] = 3;
            Ok(SuccessorMap::from_vec(next))
        }
    }

    #[test]
    fn test_corrupt_chain_skips_only_that_trial() {
        let chains = SelfLoopOnCall {
            calls: 0,
            bad_call: 2,
        };
        let mut sweep =
            Sweep::with_generator(small_config(vec![1024], 3), NoCounters, chains).unwrap();
        let mut out: Vec<TrialRecord> = Vec::new();
        let summary = sweep.run(&mut out).unwrap();

        assert_eq!(summary.skipped_trials, 1);
        assert_eq!(summary.records, 2);
        assert_eq!(sweep.chains.calls, 3);
        let trials: Vec<usize> = out.iter().map(|r| r.trial).collect();
        assert_eq!(trials, [0, 2]);
    }

    #[test]
    fn test_chain_bytes_saturates() {
        assert_eq!(chain_bytes(1024), 1024 * ELEMENT_SIZE as u64);
        #[cfg(target_pointer_width = "64")]
        assert_eq!(chain_bytes(usize::MAX), u64::MAX);
    }

    #[test]
    fn test_huge_explicit_size_does_not_overflow_logging() {
        let sweep = Sweep::new(small_config(vec![usize::MAX], 1), NoCounters).unwrap();
        assert_eq!(sweep.plan().sizes(), [usize::MAX]);
    }

    struct BrokenSink;

    impl RecordSink for BrokenSink {
        fn write_record(&mut self, _record: &TrialRecord) -> Result<()> {
            Err(ChaseError::SinkWrite(csv::Error::from(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            ))))
        }
    }

    #[test]
    fn test_sink_failure_is_fatal() {
        let mut sweep = Sweep::new(small_config(vec![1024, 2048], 2), NoCounters).unwrap();
        let err = sweep.run(&mut BrokenSink).unwrap_err();
        assert!(matches!(err, ChaseError::SinkWrite(_)));
    }
}
