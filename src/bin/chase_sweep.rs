//! Pointer-chase cache profiling sweep
//!
//! Sweeps array sizes from well inside the caches to many times the last-level cache, timing a
//! randomized single-cycle pointer chase at each size and cross-checking it against hardware
//! counters gathered by running the same workload under `perf stat`. One CSV row per
//! (size, trial).
use anyhow::Context;
use clap::Parser;
use log::{info, warn};
use memchase_rs::affinity;
use memchase_rs::counters::{CounterField, CounterSnapshot, EventMapping, EventTable, NoCounters};
use memchase_rs::harness::{self, HarnessConfig, PerfStat, ProbeStatus};
use memchase_rs::metrics::{self, CACHE_LINE_BYTES};
use memchase_rs::record::CsvSink;
use memchase_rs::sweep::{Sweep, SweepConfig, SweepSummary};
use std::path::PathBuf;
use std::time::Duration;

// use faster/smaller `mimalloc` allocator
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(name = "chase_sweep", version, about, long_about = None)]
struct Cli {
    /// CSV file to write, one row per (size, trial)
    #[arg(short, long, default_value = "pointer_chase_cache_profile.csv")]
    output: PathBuf,

    /// Trials per size
    #[arg(short, long, default_value_t = 5)]
    trials: usize,

    /// Explicit sizes in elements (comma separated), instead of deriving them from the LLC
    #[arg(long, value_delimiter = ',')]
    sizes: Option<Vec<usize>>,

    /// Largest derived size in elements, instead of a multiple of the LLC
    #[arg(long)]
    max_elements: Option<usize>,

    /// Last-level cache size in bytes, skipping detection
    #[arg(long)]
    llc_bytes: Option<u64>,

    /// Derived sizes extend to this many times the LLC
    #[arg(long, default_value_t = 16)]
    llc_multiple: u64,

    /// Dereferences each timed loop aims for
    #[arg(long, default_value_t = 10_000_000)]
    target_iterations: usize,

    /// Seconds before a profiler run is killed
    #[arg(long, default_value_t = 300)]
    timeout_secs: u64,

    /// Profiler executable
    #[arg(long, default_value = "perf")]
    profiler: PathBuf,

    /// Measurement binary run under the profiler [default: chase_worker next to this binary]
    #[arg(long)]
    worker: Option<PathBuf>,

    /// Override an event name as FIELD=EVENT, e.g. cas_read=uncore_imc_0/cas_count_read/
    #[arg(long = "event")]
    events: Vec<EventMapping>,

    /// Count system wide (perf stat -a), needed for uncore events on some platforms
    #[arg(long)]
    system_wide: bool,

    /// Seed every permutation for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// Untimed lap of the chain before each timed loop
    #[arg(long)]
    warmup: bool,

    /// Pin the sweep to this CPU core; with --probe, count only on this CPU
    #[arg(long)]
    core: Option<usize>,

    /// Skip the profiler entirely; counter columns are written as zero
    #[arg(long)]
    no_counters: bool,

    /// Only check which events the platform supports, then exit
    #[arg(long)]
    probe: bool,

    /// Length of each probe window in seconds
    #[arg(long, default_value_t = 1)]
    probe_secs: u64,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let events = cli
        .events
        .iter()
        .cloned()
        .fold(EventTable::default(), EventTable::with_override);

    let harness_config = HarnessConfig {
        profiler: cli.profiler.clone(),
        worker: cli
            .worker
            .clone()
            .unwrap_or_else(HarnessConfig::default_worker_path),
        timeout: Duration::from_secs(cli.timeout_secs),
        system_wide: cli.system_wide,
    };

    if cli.probe {
        let cpus: Vec<usize> = cli.core.into_iter().collect();
        probe(
            &harness_config,
            &events,
            Duration::from_secs(cli.probe_secs),
            &cpus,
        );
        return Ok(());
    }

    if let Some(core) = cli.core {
        let cores = affinity::available_cores();
        if !cores.is_empty() && !cores.contains(&core) {
            warn!("CPU core {} not in available cores {:?}", core, cores);
        }
    }
    affinity::prepare_measurement_thread("chase_sweep", cli.core);

    let config = SweepConfig {
        trials: cli.trials,
        sizes: cli.sizes.clone(),
        max_elements: cli.max_elements,
        llc_bytes: cli.llc_bytes,
        llc_multiple: cli.llc_multiple,
        target_inner_iterations: cli.target_iterations,
        seed: cli.seed,
        warmup: cli.warmup,
        events,
        ..SweepConfig::default()
    };

    let mut sink = CsvSink::create(&cli.output)
        .with_context(|| format!("creating output file {}", cli.output.display()))?;

    let summary: SweepSummary = if cli.no_counters {
        info!("Counter collection disabled");
        Sweep::new(config, NoCounters)?.run(&mut sink)?
    } else {
        if !harness_config.worker.exists() {
            warn!(
                "Worker binary {} not found; counter columns will be zero",
                harness_config.worker.display()
            );
        }
        info!(
            "Profiler: {} stat -e {}",
            harness_config.profiler.display(),
            config.events.perf_arg()
        );
        Sweep::new(config, PerfStat::new(harness_config))?.run(&mut sink)?
    };

    if summary.skipped_trials > 0 {
        warn!("{} trials failed and were skipped", summary.skipped_trials);
    }
    if summary.counter_failures > 0 {
        warn!(
            "{} of {} records have no counter data",
            summary.counter_failures, summary.records
        );
    }
    info!(
        "{} records saved to: {}",
        summary.records,
        cli.output.display()
    );
    Ok(())
}

/// Report per-event support and the idle DRAM bandwidth seen by the CAS counters
fn probe(config: &HarnessConfig, events: &EventTable, window: Duration, cpus: &[usize]) {
    info!(
        "Probing {} events with {} stat -a ({}s windows, CPUs: {})",
        events.mappings().len(),
        config.profiler.display(),
        window.as_secs().max(1),
        if cpus.is_empty() {
            "all".to_string()
        } else {
            format!("{cpus:?}")
        }
    );

    let probes = harness::probe_events(config, events, window, cpus);
    let mut snapshot = CounterSnapshot::default();

    println!("{:>32} {:>16}", "Event", "Count");
    println!("{:-<32} {:-<16}", "", "");
    for (mapping, probe) in events.mappings().iter().zip(&probes) {
        let shown = match &probe.status {
            ProbeStatus::Supported(value) => {
                snapshot.set(mapping.field, *value);
                value.to_string()
            }
            ProbeStatus::NotSupported => "not supported".to_string(),
            ProbeStatus::NotFound => "no value".to_string(),
            ProbeStatus::Failed(reason) => {
                warn!("Probe of '{}' failed: {}", probe.event, reason);
                "failed".to_string()
            }
        };
        println!("{:>32} {:>16}", probe.event, shown);
    }

    let cas_only = CounterSnapshot::default()
        .with(CounterField::CasRead, snapshot.cas_read())
        .with(CounterField::CasWrite, snapshot.cas_write());
    let bw = metrics::counter_bandwidth(
        &cas_only,
        window.as_secs().max(1) as f64,
        CACHE_LINE_BYTES,
    );
    if bw.gbps > 0.0 {
        println!("\nIdle DRAM traffic from CAS counters: {:.3} GB/s", bw.gbps);
    } else {
        println!("\nNo uncore CAS counts available on this platform");
    }
}
