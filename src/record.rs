//! Trial records and the sinks they're written to
use crate::counters::{CounterField, CounterSnapshot};
use crate::error::Result;
use csv::Writer;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Column order of the CSV output
pub const HEADER: [&str; 12] = [
    "N",
    "Trial",
    "Latency_ns",
    "App_Bandwidth_GBps",
    "Perf_Bandwidth_GBps",
    "Perf_Elapsed",
    "Cache_Misses",
    "L1-dcache-load-misses",
    "LLC-load-misses",
    "LLC-loads",
    "uncore_cas_read_count",
    "uncore_cas_write_count",
];

/// One (size, trial) measurement
#[derive(Debug, Clone, PartialEq)]
pub struct TrialRecord {
    pub n: usize,
    pub trial: usize,
    pub latency_ns: f64,
    pub app_bandwidth_gbps: f64,
    pub perf_bandwidth_gbps: f64,
    pub perf_elapsed_secs: f64,
    /// `None` when the profiler was unavailable for this trial
    pub counters: Option<CounterSnapshot>,
}

impl TrialRecord {
    /// Counter value, zero when counters were unavailable
    pub fn counter(&self, field: CounterField) -> u64 {
        self.counters.map_or(0, |c| c.get(field))
    }

    fn to_row(&self) -> Vec<String> {
        let mut row = vec![
            self.n.to_string(),
            self.trial.to_string(),
            self.latency_ns.to_string(),
            self.app_bandwidth_gbps.to_string(),
            self.perf_bandwidth_gbps.to_string(),
            self.perf_elapsed_secs.to_string(),
        ];
        row.extend(CounterField::ALL.iter().map(|&f| self.counter(f).to_string()));
        row
    }
}

/// Destination for trial records. Failures are fatal to the sweep.
pub trait RecordSink {
    fn write_record(&mut self, record: &TrialRecord) -> Result<()>;
}

/// In-memory sink
impl RecordSink for Vec<TrialRecord> {
    fn write_record(&mut self, record: &TrialRecord) -> Result<()> {
        self.push(record.clone());
        Ok(())
    }
}

/// CSV sink, flushed after every row so a crash loses at most the row in flight
pub struct CsvSink<W: Write> {
    writer: Writer<W>,
}

impl CsvSink<File> {
    /// Create (truncating) `path` and write the header
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        Self::new(file)
    }
}

impl<W: Write> CsvSink<W> {
    pub fn new(inner: W) -> Result<Self> {
        let mut writer = Writer::from_writer(inner);
        writer.write_record(HEADER)?;
        writer.flush().map_err(csv::Error::from)?;
        Ok(CsvSink { writer })
    }

    /// Flush and hand back the underlying writer
    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| crate::error::ChaseError::Io(e.into_error()))
    }
}

impl<W: Write> RecordSink for CsvSink<W> {
    fn write_record(&mut self, record: &TrialRecord) -> Result<()> {
        self.writer.write_record(record.to_row())?;
        self.writer.flush().map_err(csv::Error::from)?;
        Ok(())
    }
}
