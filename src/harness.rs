//! # Harness
//!
//! `perf stat` adapter for [`CounterSource`]. Each measurement spawns the profiler around the
//! pre-built `chase_worker` binary, which repeats the chase with the same parameters and prints
//! its own `Elapsed:` line. Child output is captured into anonymous temporary files rather than
//! pipes so a chatty child can never block on a full pipe while the harness polls for exit.
use crate::counters::{
    CounterSource, EventTable, Measurement, Workload, count_line, parse_counter_output,
    parse_elapsed, reports_unsupported,
};
use crate::error::{ChaseError, Result};
use log::{debug, warn};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Name of the measurement binary built alongside the sweep driver
pub const WORKER_BIN: &str = "chase_worker";

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Profiler executable, invoked as `<profiler> stat ...`
    pub profiler: PathBuf,
    /// Measurement binary run under the profiler
    pub worker: PathBuf,
    /// Upper bound on one profiler run before it's killed
    pub timeout: Duration,
    /// Pass `-a` so uncore events are counted system wide
    pub system_wide: bool,
}

impl HarnessConfig {
    /// `chase_worker` next to the currently running executable, falling back to `$PATH` lookup
    pub fn default_worker_path() -> PathBuf {
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(WORKER_BIN)))
            .filter(|path| path.exists())
            .unwrap_or_else(|| PathBuf::from(WORKER_BIN))
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        HarnessConfig {
            profiler: PathBuf::from("perf"),
            worker: Self::default_worker_path(),
            timeout: Duration::from_secs(300),
            system_wide: false,
        }
    }
}

/// Captured result of one profiler run
struct ProfilerOutput {
    status: ExitStatus,
    stdout: String,
    stderr: String,
}

/// Counter source backed by a `perf stat` subprocess
#[derive(Debug, Clone)]
pub struct PerfStat {
    config: HarnessConfig,
}

impl PerfStat {
    pub fn new(config: HarnessConfig) -> Self {
        PerfStat { config }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    fn command(&self, workload: &Workload, events: &EventTable) -> Command {
        let mut cmd = Command::new(&self.config.profiler);
        cmd.arg("stat");
        if self.config.system_wide {
            cmd.arg("-a");
        }
        cmd.arg("-e")
            .arg(events.perf_arg())
            .arg(&self.config.worker)
            .args(workload.worker_args());
        cmd
    }
}

impl CounterSource for PerfStat {
    fn measure(&mut self, workload: &Workload, events: &EventTable) -> Result<Measurement> {
        let cmd = self.command(workload, events);
        debug!("Running profiler: {:?}", cmd);

        let output = run_with_timeout(cmd, self.config.timeout)?;

        if reports_unsupported(&output.stderr) {
            return Err(ChaseError::ProfilerUnavailable(format!(
                "profiler rejected requested events: {}",
                first_line(&output.stderr)
            )));
        }
        if !output.status.success() {
            return Err(ChaseError::ProfilerUnavailable(format!(
                "profiler exited with {}: {}",
                output.status,
                first_line(&output.stderr)
            )));
        }

        Ok(Measurement {
            counters: parse_counter_output(&output.stderr, events),
            elapsed_secs: parse_elapsed(&output.stdout),
        })
    }
}

fn first_line(text: &str) -> &str {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("<no output>")
}

/// Spawn `cmd`, wait up to `timeout`, and collect its output
fn run_with_timeout(mut cmd: Command, timeout: Duration) -> Result<ProfilerOutput> {
    let mut stdout_file = tempfile::tempfile()?;
    let mut stderr_file = tempfile::tempfile()?;

    cmd.stdin(Stdio::null())
        .stdout(stdout_file.try_clone()?)
        .stderr(stderr_file.try_clone()?);
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // own process group, so a timeout takes down the profiler and its workload together
        cmd.process_group(0);
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| ChaseError::ProfilerUnavailable(format!("failed to launch profiler: {e}")))?;

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                kill_tree(&mut child);
                return Err(ChaseError::ProfilerUnavailable(format!(
                    "profiler timed out after {timeout:?}"
                )));
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                kill_tree(&mut child);
                return Err(ChaseError::ProfilerUnavailable(format!(
                    "failed to wait on profiler: {e}"
                )));
            }
        }
    };

    Ok(ProfilerOutput {
        status,
        stdout: read_back(&mut stdout_file)?,
        stderr: read_back(&mut stderr_file)?,
    })
}

fn read_back(file: &mut File) -> Result<String> {
    let mut buf = Vec::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        let pgid = child.id() as libc::pid_t;
        // SAFETY: killpg only sends a signal; the group was created for this child at spawn
        if unsafe { libc::killpg(pgid, libc::SIGKILL) } != 0 {
            let _ = child.kill();
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.kill();
    }
    if let Err(e) = child.wait() {
        warn!("Couldn't reap timed out profiler (pid {}): {}", child.id(), e);
    }
}

/// Outcome of probing a single event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeStatus {
    /// Event counted; value over the probe window
    Supported(u64),
    /// Profiler reported the event as unsupported or unknown
    NotSupported,
    /// Profiler ran but printed no count for the event
    NotFound,
    /// Profiler could not be run
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventProbe {
    pub event: String,
    pub status: ProbeStatus,
}

/// Count each event on its own, system wide, around an idle `sleep` of `window`.
///
/// Tells which entries of an event table the platform actually exposes before committing to a
/// long sweep. A non-empty `cpus` restricts counting to those CPUs (`-C`).
pub fn probe_events(
    config: &HarnessConfig,
    events: &EventTable,
    window: Duration,
    cpus: &[usize],
) -> Vec<EventProbe> {
    let secs = window.as_secs().max(1);
    events
        .mappings()
        .iter()
        .map(|mapping| {
            let cmd = probe_command(config, &mapping.event, cpus, secs);
            debug!("Probing event '{}': {:?}", mapping.event, cmd);

            let status = match run_with_timeout(cmd, Duration::from_secs(secs + 2)) {
                Err(e) => ProbeStatus::Failed(e.to_string()),
                Ok(out) if reports_unsupported(&out.stderr) => ProbeStatus::NotSupported,
                Ok(out) => out
                    .stderr
                    .lines()
                    .filter_map(count_line)
                    .filter(|(_, token)| mapping.matches(token))
                    .map(|(value, _)| value)
                    .reduce(u64::saturating_add)
                    .map_or(ProbeStatus::NotFound, ProbeStatus::Supported),
            };
            EventProbe {
                event: mapping.event.clone(),
                status,
            }
        })
        .collect()
}

/// `<profiler> stat -a [-C LIST] -e EVENT sleep SECS`
fn probe_command(config: &HarnessConfig, event: &str, cpus: &[usize], secs: u64) -> Command {
    let mut cmd = Command::new(&config.profiler);
    cmd.args(["stat", "-a"]);
    if !cpus.is_empty() {
        cmd.arg("-C").arg(cpu_list(cpus));
    }
    cmd.arg("-e")
        .arg(event)
        .arg("sleep")
        .arg(secs.to_string());
    cmd
}

fn cpu_list(cpus: &[usize]) -> String {
    cpus.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
