//! # Counters
//!
//! Hardware counter snapshots and the [`CounterSource`] capability that produces them. The only
//! production source scrapes `perf stat` text (see [`crate::harness`]), so the text parsing lives
//! here behind a declarative [`EventTable`]: when a platform names an event differently, the table
//! changes and the parser does not.
use crate::error::Result;
use crate::metrics::CACHE_LINE_BYTES;

/// Snapshot slot a profiler event is recorded into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterField {
    CacheMisses,
    L1DcacheLoadMisses,
    LlcLoadMisses,
    LlcLoads,
    CasRead,
    CasWrite,
}

impl CounterField {
    pub const COUNT: usize = 6;

    pub const ALL: [CounterField; CounterField::COUNT] = [
        CounterField::CacheMisses,
        CounterField::L1DcacheLoadMisses,
        CounterField::LlcLoadMisses,
        CounterField::LlcLoads,
        CounterField::CasRead,
        CounterField::CasWrite,
    ];

    fn slot(self) -> usize {
        self as usize
    }

    /// Output column name
    pub fn column(self) -> &'static str {
        match self {
            CounterField::CacheMisses => "Cache_Misses",
            CounterField::L1DcacheLoadMisses => "L1-dcache-load-misses",
            CounterField::LlcLoadMisses => "LLC-load-misses",
            CounterField::LlcLoads => "LLC-loads",
            CounterField::CasRead => "uncore_cas_read_count",
            CounterField::CasWrite => "uncore_cas_write_count",
        }
    }
}

impl std::str::FromStr for CounterField {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "cache_misses" => Ok(CounterField::CacheMisses),
            "l1_dcache_load_misses" => Ok(CounterField::L1DcacheLoadMisses),
            "llc_load_misses" => Ok(CounterField::LlcLoadMisses),
            "llc_loads" => Ok(CounterField::LlcLoads),
            "cas_read" | "uncore_cas_read_count" => Ok(CounterField::CasRead),
            "cas_write" | "uncore_cas_write_count" => Ok(CounterField::CasWrite),
            other => Err(format!("unknown counter field '{other}'")),
        }
    }
}

/// One row of the event table: profiler event name -> snapshot field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMapping {
    pub event: String,
    pub field: CounterField,
}

impl EventMapping {
    pub fn new(event: impl Into<String>, field: CounterField) -> Self {
        EventMapping {
            event: event.into(),
            field,
        }
    }

    /// Whether a profiler event token names this mapping's event.
    ///
    /// Accepts the bare name (`cache-misses`) and PMU-qualified forms such as
    /// `cpu_core/cache-misses/` or `uncore_imc_0/cas_count_read/`.
    pub(crate) fn matches(&self, token: &str) -> bool {
        if token == self.event {
            return true;
        }
        let trimmed = token.trim_end_matches('/');
        trimmed != token && trimmed.rsplit('/').next() == Some(self.event.as_str())
    }
}

/// Parses `field=event`, e.g. `cas_read=uncore_imc_0/cas_count_read/`
impl std::str::FromStr for EventMapping {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (field, event) = s
            .split_once('=')
            .ok_or_else(|| format!("expected FIELD=EVENT, got '{s}'"))?;
        let event = event.trim();
        if event.is_empty() {
            return Err(format!("empty event name in '{s}'"));
        }
        Ok(EventMapping::new(event, field.trim().parse()?))
    }
}

/// Ordered set of events requested from the profiler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTable {
    mappings: Vec<EventMapping>,
}

impl EventTable {
    pub fn new(mappings: Vec<EventMapping>) -> Self {
        EventTable { mappings }
    }

    pub fn mappings(&self) -> &[EventMapping] {
        &self.mappings
    }

    /// Comma separated list for `perf stat -e`
    pub fn perf_arg(&self) -> String {
        self.mappings
            .iter()
            .map(|m| m.event.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Replace the event recorded into `mapping.field`, or append it if the field is unmapped
    pub fn with_override(mut self, mapping: EventMapping) -> Self {
        match self.mappings.iter_mut().find(|m| m.field == mapping.field) {
            Some(existing) => *existing = mapping,
            None => self.mappings.push(mapping),
        }
        self
    }

    fn field_for(&self, token: &str) -> Option<CounterField> {
        self.mappings
            .iter()
            .find(|m| m.matches(token))
            .map(|m| m.field)
    }
}

impl Default for EventTable {
    fn default() -> Self {
        EventTable::new(vec![
            EventMapping::new("cache-misses", CounterField::CacheMisses),
            EventMapping::new("L1-dcache-load-misses", CounterField::L1DcacheLoadMisses),
            EventMapping::new("LLC-load-misses", CounterField::LlcLoadMisses),
            EventMapping::new("LLC-loads", CounterField::LlcLoads),
            EventMapping::new("unc_m_cas_count.rd", CounterField::CasRead),
            EventMapping::new("unc_m_cas_count.wr", CounterField::CasWrite),
        ])
    }
}

/// Counter values from one profiler run; events never reported read as zero
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    counts: [u64; CounterField::COUNT],
}

impl CounterSnapshot {
    pub fn get(&self, field: CounterField) -> u64 {
        self.counts[field.slot()]
    }

    pub fn set(&mut self, field: CounterField, value: u64) {
        self.counts[field.slot()] = value;
    }

    /// Accumulate into `field`; perf reports an event once per PMU on hybrid parts
    pub fn add(&mut self, field: CounterField, value: u64) {
        let slot = &mut self.counts[field.slot()];
        *slot = slot.saturating_add(value);
    }

    pub fn with(mut self, field: CounterField, value: u64) -> Self {
        self.set(field, value);
        self
    }

    pub fn cache_misses(&self) -> u64 {
        self.get(CounterField::CacheMisses)
    }

    pub fn cas_read(&self) -> u64 {
        self.get(CounterField::CasRead)
    }

    pub fn cas_write(&self) -> u64 {
        self.get(CounterField::CasWrite)
    }
}

/// Parameters of one chase workload, passed to the measurement binary as arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Workload {
    pub n: usize,
    pub repeat: usize,
    pub seed: Option<u64>,
    pub warmup: bool,
}

impl Workload {
    /// Command line arguments understood by `chase_worker`
    pub fn worker_args(&self) -> Vec<String> {
        let mut args = vec![self.n.to_string(), self.repeat.to_string()];
        if let Some(seed) = self.seed {
            args.push("--seed".to_string());
            args.push(seed.to_string());
        }
        if self.warmup {
            args.push("--warmup".to_string());
        }
        args
    }
}

/// Counters plus the elapsed time the measured process reported for itself
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Measurement {
    pub counters: CounterSnapshot,
    pub elapsed_secs: f64,
}

/// Anything that can run a workload and report hardware counters for it
pub trait CounterSource {
    /// Run `workload` while counting `events`.
    ///
    /// Returns [`crate::error::ChaseError::ProfilerUnavailable`] when no counters could be read;
    /// callers record zeroed counters and carry on.
    fn measure(&mut self, workload: &Workload, events: &EventTable) -> Result<Measurement>;
}

/// Source for runs without a profiler; every measurement is unavailable
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCounters;

impl CounterSource for NoCounters {
    fn measure(&mut self, _workload: &Workload, _events: &EventTable) -> Result<Measurement> {
        Err(crate::error::ChaseError::ProfilerUnavailable(
            "counter collection disabled".to_string(),
        ))
    }
}

/// Parse a count such as `1,234,567`
pub fn parse_count(token: &str) -> Option<u64> {
    if token.is_empty() || !token.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    let digits: String = token.chars().filter(|&c| c != ',').collect();
    digits.parse().ok()
}

/// Parse a scaled value such as `1,234.56`, printed for events carrying a sysfs scale
pub fn parse_scaled(token: &str) -> Option<f64> {
    if !token.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    let digits: String = token.chars().filter(|&c| c != ',').collect();
    digits
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
}

/// Bytes per unit for the byte units perf prints after scaled uncore counts
fn byte_unit(token: &str) -> Option<u64> {
    match token {
        "B" => Some(1),
        "KiB" | "KB" => Some(1 << 10),
        "MiB" | "MB" => Some(1 << 20),
        "GiB" | "GB" => Some(1 << 30),
        _ => None,
    }
}

/// Extract event counts from profiler diagnostic text.
///
/// A line counts when it reads `<count> [unit] <event>` and the event is known. Counts reported
/// in bytes are turned back into cache-line transfers. An event reported on several lines (one
/// per PMU on hybrid CPUs) is summed. `<not counted>` and `<not supported>` lines have no leading
/// count and are skipped.
pub fn parse_counter_output(text: &str, events: &EventTable) -> CounterSnapshot {
    let mut snapshot = CounterSnapshot::default();
    for (value, event) in text.lines().filter_map(count_line) {
        if let Some(field) = events.field_for(event) {
            snapshot.add(field, value);
        }
    }
    snapshot
}

/// Split a `<count> [unit] <event> ...` line into its count and event token
pub(crate) fn count_line(line: &str) -> Option<(u64, &str)> {
    let mut tokens = line.split_whitespace();
    let value = tokens.next()?;
    let second = tokens.next()?;
    let third = tokens.next().filter(|t| *t != "#");

    if let (Some(unit_bytes), Some(event)) = (byte_unit(second), third) {
        let bytes = parse_scaled(value)? * unit_bytes as f64;
        return Some(((bytes / CACHE_LINE_BYTES as f64).round() as u64, event));
    }
    if let Some(count) = parse_count(value) {
        return Some((count, second));
    }
    let scaled = parse_scaled(value)?.round() as u64;
    match third {
        // non-byte unit such as `Joules`, kept as printed
        Some(event) if second.chars().all(|c| c.is_ascii_alphabetic()) => Some((scaled, event)),
        _ => Some((scaled, second)),
    }
}

/// Whether the profiler rejected one of the requested events
pub fn reports_unsupported(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    lower.contains("not supported") || lower.contains("unknown event")
}

/// Find the `Elapsed: <seconds>` token printed by the measurement binary; 0.0 when absent
pub fn parse_elapsed(text: &str) -> f64 {
    text.lines()
        .filter_map(|line| line.trim().strip_prefix("Elapsed:"))
        .filter_map(|rest| rest.split_whitespace().next())
        .filter_map(|value| value.parse::<f64>().ok())
        .find(|secs| secs.is_finite() && *secs >= 0.0)
        .unwrap_or(0.0)
}
