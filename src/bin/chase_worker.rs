//! Measurement workload run under the profiler
//!
//! Generates and validates a chain of N entries, chases it N x R times, and prints the timed
//! interval as `Elapsed: <seconds>` on stdout. Everything else goes to the log on stderr so the
//! profiler's counter block stays the only structured text there.
use anyhow::Context;
use clap::Parser;
use log::debug;
use memchase_rs::kernel;
use memchase_rs::permutation::SuccessorMap;

// use faster/smaller `mimalloc` allocator
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(name = "chase_worker", version, about = "Timed pointer chase over N entries, R laps")]
struct Args {
    /// Chain length N (entries)
    n: usize,

    /// Repeat factor R (laps of the chain)
    #[arg(value_parser = clap::value_parser!(u64).range(1..))]
    repeat: u64,

    /// Permutation seed
    #[arg(long)]
    seed: Option<u64>,

    /// One untimed lap before timing
    #[arg(long)]
    warmup: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let repeat = usize::try_from(args.repeat).context("repeat factor out of range")?;

    let chain = SuccessorMap::generate_seeded(args.n, args.seed)
        .context("generating permutation")?
        .validate()
        .context("validating permutation coverage")?;

    let timing = kernel::chase(&chain, repeat, args.warmup);
    debug!(
        "{} steps, {:.2} ns/access, {:.3} GB/s",
        timing.steps,
        timing.latency_ns(),
        timing.app_bandwidth_gbps()
    );

    println!("Elapsed: {:.9}", timing.elapsed_secs());
    Ok(())
}
