use crate::trace::events::{TraceEvent, TraceRecord};
use crate::trace::format::{self, HEADER_SIZE, RECORD_SIZE, TraceHeader};
use hdrhistogram::Histogram;
use serde_json::json;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs::File;
use std::io::{BufReader, Error, ErrorKind, Result, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Record limit the report tool applies when none is given.
pub const DEFAULT_MAX_LOAD: usize = 5000;

/// Which slice of a dump to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadLimits {
    /// Load at most this many records. `None` loads everything.
    pub max_records: Option<usize>,
    /// Skip this many records first. Must be below the file's record count.
    pub offset: usize,
}

impl LoadLimits {
    pub const fn all() -> Self {
        Self {
            max_records: None,
            offset: 0,
        }
    }

    pub const fn new(max_records: usize, offset: usize) -> Self {
        Self {
            max_records: Some(max_records),
            offset,
        }
    }
}

impl Default for LoadLimits {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LOAD, 0)
    }
}

/// Reads a per-thread dump back.
pub struct TraceReader {
    path: PathBuf,
    reader: BufReader<File>,
    header: TraceHeader,
}

impl TraceReader {
    /// Open `path` and validate its header.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut reader = BufReader::new(File::open(&path)?);
        let header = format::read_header(&mut reader)?;
        if header.version != format::VERSION {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!(
                    "{}: unsupported trace version {} (expected {})",
                    path.display(),
                    header.version,
                    format::VERSION
                ),
            ));
        }
        Ok(Self {
            path,
            reader,
            header,
        })
    }

    pub fn header(&self) -> TraceHeader {
        self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load records per `limits`, starting over from the first record on every call.
    ///
    /// Only the `record_count` records announced by the header are read;
    /// anything after them is leftover from an earlier dump. If the file ends
    /// early (torn dump) the complete records present are returned.
    pub fn read_records(&mut self, limits: LoadLimits) -> Result<Vec<TraceRecord>> {
        let total = self.header.record_count as usize;
        if limits.offset > 0 && limits.offset >= total {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!(
                    "offset {} out of range for {} records",
                    limits.offset, total
                ),
            ));
        }
        let wanted = match limits.max_records {
            Some(max) => (total - limits.offset).min(max),
            None => total - limits.offset,
        };

        let start = (HEADER_SIZE + limits.offset * RECORD_SIZE) as u64;
        // The header count is not trusted for sizing: a torn or corrupt file
        // may claim far more records than it holds.
        let file_len = self.reader.get_ref().metadata()?.len();
        let present = (file_len.saturating_sub(start) / RECORD_SIZE as u64) as usize;
        self.reader.seek(SeekFrom::Start(start))?;
        let mut records = Vec::with_capacity(wanted.min(present));
        while records.len() < wanted {
            match format::read_record(&mut self.reader)? {
                Some(rec) => records.push(rec),
                None => {
                    tracing::warn!(
                        path = %self.path.display(),
                        expected = wanted,
                        found = records.len(),
                        "trace file is shorter than its header claims"
                    );
                    break;
                }
            }
        }
        Ok(records)
    }
}

/// Load records from several dumps, concatenated in argument order.
pub fn load_traces(paths: &[impl AsRef<Path>], limits: LoadLimits) -> Result<Vec<TraceRecord>> {
    let mut all = Vec::new();
    for path in paths {
        all.extend(TraceReader::open(path)?.read_records(limits)?);
    }
    Ok(all)
}

fn event_label(rec: &TraceRecord) -> String {
    match rec.event() {
        Some(event) => event.name().to_string(),
        None => rec.event.to_string(),
    }
}

pub fn write_csv(w: &mut impl Write, records: &[TraceRecord]) -> Result<()> {
    writeln!(w, "tid,event,cid,us")?;
    for rec in records {
        writeln!(
            w,
            "{},{},{},{}",
            rec.thread_id,
            event_label(rec),
            rec.correlation_id,
            rec.timestamp_us
        )?;
    }
    Ok(())
}

/// CSV with the timestamp split into whole milliseconds and the microsecond remainder.
pub fn write_ms_csv(w: &mut impl Write, records: &[TraceRecord]) -> Result<()> {
    writeln!(w, "tid,event,cid,ms,us")?;
    for rec in records {
        writeln!(
            w,
            "{},{},{},{},{}",
            rec.thread_id,
            event_label(rec),
            rec.correlation_id,
            rec.timestamp_us / 1000,
            rec.timestamp_us % 1000
        )?;
    }
    Ok(())
}

/// One JSON object per line.
pub fn write_jsonl(w: &mut impl Write, records: &[TraceRecord]) -> Result<()> {
    for rec in records {
        serde_json::to_writer(&mut *w, rec).map_err(Error::other)?;
        w.write_all(b"\n")?;
    }
    Ok(())
}

/// A scatter series for ECharts: x is the millisecond, y the microsecond
/// within it, so bursts show up as vertical stripes.
pub fn echarts_series(records: &[TraceRecord], name: Option<&str>) -> serde_json::Value {
    let data: Vec<[u32; 2]> = records
        .iter()
        .map(|r| [r.timestamp_us / 1000, r.timestamp_us % 1000])
        .collect();
    let mut series = json!({
        "type": "scatter",
        "symbolSize": 2,
        "data": data,
    });
    if let Some(name) = name {
        series["name"] = json!(name);
    }
    series
}

/// Distribution of durations in microseconds.
#[derive(Debug)]
pub struct LatencyStats {
    histogram: Histogram<u64>,
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self {
            // Auto-resizing, 3 significant figures.
            histogram: Histogram::new(3).expect("3 is a valid precision"),
        }
    }
}

impl LatencyStats {
    pub fn record(&mut self, us: u64) {
        self.histogram.saturating_record(us);
    }

    pub fn count(&self) -> u64 {
        self.histogram.len()
    }

    pub fn min(&self) -> u64 {
        self.histogram.min()
    }

    pub fn max(&self) -> u64 {
        self.histogram.max()
    }

    pub fn mean(&self) -> f64 {
        self.histogram.mean()
    }

    pub fn percentile(&self, p: f64) -> u64 {
        self.histogram.value_at_percentile(p)
    }
}

#[derive(Debug, Default)]
pub struct ThreadStats {
    pub records: usize,
    pub requests: usize,
    pub responses: usize,
    pub loop_iterations: usize,
    pub max_in_flight: usize,
}

#[derive(Debug, Default)]
pub struct TraceAnalysis {
    pub total_records: usize,
    /// Span between the earliest and latest timestamp.
    pub duration_us: u64,
    pub event_counts: BTreeMap<TraceEvent, usize>,
    pub unknown_events: usize,
    pub thread_stats: BTreeMap<u8, ThreadStats>,
    /// `RequestSent` → `ResponseReceived` on the same thread and connection.
    pub request_latency: LatencyStats,
    /// `ConnectionStart` → `Connected` on the same thread and connection.
    pub connect_latency: LatencyStats,
    /// `PollWait` → `PollWake` on the same thread.
    pub poll_wait: LatencyStats,
    /// Requests still waiting for a response at the end of the trace.
    pub unanswered_requests: usize,
    /// Highest number of outstanding requests across all threads.
    pub max_in_flight: usize,
}

/// Pair up events and collect statistics.
///
/// Records must be in append order per thread, which is how dumps store them.
/// Timestamps are compared with wrapping subtraction, so pairs that straddle
/// the 32-bit wrap still measure correctly. Requests on one connection are
/// matched first-in first-out, which also covers pipelined requests.
pub fn analyze(records: &[TraceRecord]) -> TraceAnalysis {
    let mut analysis = TraceAnalysis {
        total_records: records.len(),
        ..Default::default()
    };
    let mut pending_requests: HashMap<(u8, u16), VecDeque<u32>> = HashMap::new();
    let mut pending_connects: HashMap<(u8, u16), u32> = HashMap::new();
    let mut pending_polls: HashMap<u8, u32> = HashMap::new();
    let mut thread_in_flight: HashMap<u8, usize> = HashMap::new();
    let mut in_flight = 0usize;

    let mut min_ts = u32::MAX;
    let mut max_ts = 0u32;

    for rec in records {
        min_ts = min_ts.min(rec.timestamp_us);
        max_ts = max_ts.max(rec.timestamp_us);

        let stats = analysis.thread_stats.entry(rec.thread_id).or_default();
        stats.records += 1;

        let Some(event) = rec.event() else {
            analysis.unknown_events += 1;
            continue;
        };
        *analysis.event_counts.entry(event).or_default() += 1;

        let key = (rec.thread_id, rec.correlation_id);
        let ts = rec.timestamp_us;
        match event {
            TraceEvent::RequestSent => {
                stats.requests += 1;
                pending_requests.entry(key).or_default().push_back(ts);
                in_flight += 1;
                let t = thread_in_flight.entry(rec.thread_id).or_default();
                *t += 1;
                stats.max_in_flight = stats.max_in_flight.max(*t);
                analysis.max_in_flight = analysis.max_in_flight.max(in_flight);
            }
            TraceEvent::ResponseReceived => {
                stats.responses += 1;
                if let Some(sent) = pending_requests.get_mut(&key).and_then(|q| q.pop_front()) {
                    analysis
                        .request_latency
                        .record(ts.wrapping_sub(sent) as u64);
                    in_flight -= 1;
                    if let Some(t) = thread_in_flight.get_mut(&rec.thread_id) {
                        *t -= 1;
                    }
                }
            }
            TraceEvent::ConnectionStart => {
                pending_connects.insert(key, ts);
            }
            TraceEvent::Connected => {
                if let Some(start) = pending_connects.remove(&key) {
                    analysis
                        .connect_latency
                        .record(ts.wrapping_sub(start) as u64);
                }
            }
            TraceEvent::LoopStart => {
                stats.loop_iterations += 1;
            }
            TraceEvent::PollWait => {
                pending_polls.insert(rec.thread_id, ts);
            }
            TraceEvent::PollWake => {
                if let Some(wait) = pending_polls.remove(&rec.thread_id) {
                    analysis.poll_wait.record(ts.wrapping_sub(wait) as u64);
                }
            }
            TraceEvent::DelayRequestFrontEnd
            | TraceEvent::DelayRequestTailEnd
            | TraceEvent::ExpectRequestFrontEnd
            | TraceEvent::ExpectRequestTailEnd => {}
        }
    }

    if !records.is_empty() {
        analysis.duration_us = (max_ts - min_ts) as u64;
    }
    analysis.unanswered_requests = in_flight;
    analysis
}

fn print_latency(label: &str, stats: &LatencyStats) {
    if stats.count() == 0 {
        println!("{label}: no samples");
        return;
    }
    println!(
        "{label} ({} samples): min {}µs, p50 {}µs, p99 {}µs, max {}µs, mean {:.1}µs",
        stats.count(),
        stats.min(),
        stats.percentile(50.0),
        stats.percentile(99.0),
        stats.max(),
        stats.mean(),
    );
}

pub fn print_analysis(analysis: &TraceAnalysis) {
    println!("\n=== Trace Analysis ===");
    println!("Total records: {}", analysis.total_records);
    println!(
        "Duration: {:.3}s",
        analysis.duration_us as f64 / 1_000_000.0
    );
    if analysis.unknown_events > 0 {
        println!("Unknown event ordinals: {}", analysis.unknown_events);
    }

    println!("\n=== Events ===");
    for (event, count) in &analysis.event_counts {
        println!("  {event}: {count}");
    }

    println!("\n=== Latencies ===");
    print_latency("Request", &analysis.request_latency);
    print_latency("Connect", &analysis.connect_latency);
    print_latency("Poll wait", &analysis.poll_wait);
    println!("Max in flight: {}", analysis.max_in_flight);
    println!("Unanswered requests: {}", analysis.unanswered_requests);

    println!("\n=== Thread Statistics ===");
    for (thread_id, stats) in &analysis.thread_stats {
        println!("\nThread {}:", thread_id);
        println!("  Records: {}", stats.records);
        println!("  Requests: {}", stats.requests);
        println!("  Responses: {}", stats.responses);
        println!("  Loop iterations: {}", stats.loop_iterations);
        println!("  Max in flight: {}", stats.max_in_flight);
    }
}
