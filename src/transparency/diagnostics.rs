//! Diagnostics context: frame counters, fault log and the machine-readable
//! session summary used to gate regressions.
//!
//! A [`Diagnostics`] is constructed explicitly, shared by handle between the
//! device readers and the processing context, and flushed explicitly. Nothing
//! here is process-global.

use crate::collector::assembler::DropReason;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics, Statistics};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Faults beyond this many are counted but not retained.
const MAX_RETAINED_FAULTS: usize = 64;

/// Counters shared between device readers and the processing context.
#[derive(Debug)]
pub struct Diagnostics {
    /// Frames (or frame records) offered for parsing
    frames_seen: AtomicU64,
    /// Frames that passed validation
    frames_parsed: AtomicU64,
    /// Frames handed to the intent engine
    frames_dispatched: AtomicU64,
    /// Dropped frames, indexed by [`DropReason::index`]
    drops: [AtomicU64; DropReason::COUNT],
    /// Devices that could not be opened
    devices_denied: AtomicU64,
    /// Reader loops that ended on an error
    reader_faults: AtomicU64,
    faults: Mutex<Vec<String>>,
    session_id: Uuid,
    session_start: DateTime<Utc>,
    /// Where [`Diagnostics::flush`] writes the summary
    persist_path: Option<PathBuf>,
}

impl Diagnostics {
    /// Create an in-memory diagnostics context.
    pub fn new() -> Self {
        Self {
            frames_seen: AtomicU64::new(0),
            frames_parsed: AtomicU64::new(0),
            frames_dispatched: AtomicU64::new(0),
            drops: std::array::from_fn(|_| AtomicU64::new(0)),
            devices_denied: AtomicU64::new(0),
            reader_faults: AtomicU64::new(0),
            faults: Mutex::new(Vec::new()),
            session_id: Uuid::new_v4(),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Open a diagnostics context that flushes its summary to `path`.
    ///
    /// The parent directory is created up front so that a flush at shutdown
    /// cannot fail for that reason.
    pub fn open(path: PathBuf) -> Result<Self, std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut diagnostics = Self::new();
        diagnostics.persist_path = Some(path);
        Ok(diagnostics)
    }

    pub fn record_seen(&self) {
        self.frames_seen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_parsed(&self) {
        self.frames_parsed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatched(&self) {
        self.frames_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drop(&self, reason: DropReason) {
        if let Some(counter) = self.drops.get(reason.index()) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_device_denied(&self, device: &str) {
        self.devices_denied.fetch_add(1, Ordering::Relaxed);
        self.record_fault(format!("access denied: {device}"));
    }

    pub fn record_reader_fault(&self, message: String) {
        self.reader_faults.fetch_add(1, Ordering::Relaxed);
        self.record_fault(message);
    }

    fn record_fault(&self, message: String) {
        if let Ok(mut faults) = self.faults.lock() {
            if faults.len() < MAX_RETAINED_FAULTS {
                faults.push(message);
            }
        }
    }

    pub fn drop_count(&self, reason: DropReason) -> u64 {
        self.drops
            .get(reason.index())
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Snapshot of the frame counters.
    pub fn frame_counters(&self) -> FrameCounters {
        let drops = DropCounts {
            non_multitouch: self.drop_count(DropReason::NonMultitouch),
            parse_failure: self.drop_count(DropReason::ParseFailure),
            routed_to_no_session: self.drop_count(DropReason::NoSession),
            packet_truncated: self.drop_count(DropReason::Truncated),
            invalid_report_size: self.drop_count(DropReason::InvalidReportSize),
            engine_queue_full: self.drop_count(DropReason::QueueFull),
        };
        FrameCounters {
            frames_seen: self.frames_seen.load(Ordering::Relaxed),
            frames_parsed: self.frames_parsed.load(Ordering::Relaxed),
            frames_dispatched: self.frames_dispatched.load(Ordering::Relaxed),
            frames_dropped: drops.total(),
            drop_reasons: drops,
        }
    }

    pub fn devices_denied(&self) -> u64 {
        self.devices_denied.load(Ordering::Relaxed)
    }

    pub fn reader_faults(&self) -> u64 {
        self.reader_faults.load(Ordering::Relaxed)
    }

    pub fn faults(&self) -> Vec<String> {
        self.faults.lock().map(|f| f.clone()).unwrap_or_default()
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn session_start(&self) -> DateTime<Utc> {
        self.session_start
    }

    /// Write `summary` to the persistence path, if one was opened.
    pub fn flush(&self, summary: &DiagnosticsSummary) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            let json = serde_json::to_string_pretty(summary).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    /// Read a previously flushed summary.
    pub fn load_summary(path: &Path) -> Result<DiagnosticsSummary, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Reset all counters (the session id and start time are kept).
    pub fn reset(&self) {
        self.frames_seen.store(0, Ordering::Relaxed);
        self.frames_parsed.store(0, Ordering::Relaxed);
        self.frames_dispatched.store(0, Ordering::Relaxed);
        for counter in &self.drops {
            counter.store(0, Ordering::Relaxed);
        }
        self.devices_denied.store(0, Ordering::Relaxed);
        self.reader_faults.store(0, Ordering::Relaxed);
        if let Ok(mut faults) = self.faults.lock() {
            faults.clear();
        }
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe shared diagnostics context.
pub type SharedDiagnostics = Arc<Diagnostics>;

/// Per-reason drop counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropCounts {
    pub non_multitouch: u64,
    pub parse_failure: u64,
    pub routed_to_no_session: u64,
    pub packet_truncated: u64,
    pub invalid_report_size: u64,
    pub engine_queue_full: u64,
}

impl DropCounts {
    pub fn total(&self) -> u64 {
        self.non_multitouch
            + self.parse_failure
            + self.routed_to_no_session
            + self.packet_truncated
            + self.invalid_report_size
            + self.engine_queue_full
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameCounters {
    pub frames_seen: u64,
    pub frames_parsed: u64,
    pub frames_dispatched: u64,
    pub frames_dropped: u64,
    pub drop_reasons: DropCounts,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentSummary {
    #[serde(with = "hex_u64")]
    pub fingerprint: u64,
    pub transitions: u64,
    pub mode: String,
    pub typing_enabled: bool,
    pub lifecycle_skips: u64,
    pub lifecycle_backward: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchSummary {
    #[serde(with = "hex_u64")]
    pub fingerprint: u64,
    pub events: u64,
    pub enqueued: u64,
    pub suppressed: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencySummary {
    pub samples: u64,
    pub mean_micros: f64,
    pub p50_micros: f64,
    pub p95_micros: f64,
    pub max_micros: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationSummary {
    pub tracker_growths: u64,
    pub tracker_capacity: u64,
    pub event_buffer_growths: u64,
}

/// Machine-readable session summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSummary {
    pub session_id: Uuid,
    pub session_start: DateTime<Utc>,
    #[serde(flatten)]
    pub frames: FrameCounters,
    /// Fingerprint over frames and derived traces
    #[serde(with = "hex_u64")]
    pub session_fingerprint: u64,
    pub intent: IntentSummary,
    pub dispatch: DispatchSummary,
    pub latency: LatencySummary,
    pub allocation: AllocationSummary,
    pub devices_denied: u64,
    pub reader_faults: u64,
    pub faults: Vec<String>,
}

impl DiagnosticsSummary {
    /// Human-readable summary for the CLI.
    pub fn render(&self) -> String {
        let d = &self.frames.drop_reasons;
        format!(
            "Session {}\n\
             - Frames seen: {}\n\
             - Frames parsed: {}\n\
             - Frames dispatched: {}\n\
             - Frames dropped: {} (non-multitouch {}, parse {}, no session {}, truncated {}, size {}, queue full {})\n\
             - Intent: fingerprint {:#018X}, {} transitions, mode {}\n\
             - Dispatch: fingerprint {:#018X}, {} events ({} enqueued, {} suppressed)\n\
             - Lifecycle: {} skipped, {} backward\n\
             - Latency: {} samples, mean {:.1}us, p95 {:.1}us, max {:.1}us\n\
             - Session fingerprint: {:#018X}",
            self.session_id,
            self.frames.frames_seen,
            self.frames.frames_parsed,
            self.frames.frames_dispatched,
            self.frames.frames_dropped,
            d.non_multitouch,
            d.parse_failure,
            d.routed_to_no_session,
            d.packet_truncated,
            d.invalid_report_size,
            d.engine_queue_full,
            self.intent.fingerprint,
            self.intent.transitions,
            self.intent.mode,
            self.dispatch.fingerprint,
            self.dispatch.events,
            self.dispatch.enqueued,
            self.dispatch.suppressed,
            self.intent.lifecycle_skips,
            self.intent.lifecycle_backward,
            self.latency.samples,
            self.latency.mean_micros,
            self.latency.p95_micros,
            self.latency.max_micros,
            self.session_fingerprint,
        )
    }
}

/// Preallocated ring of per-frame processing times.
#[derive(Debug)]
pub struct LatencyRing {
    samples: Vec<f64>,
    next: usize,
    total: u64,
}

impl LatencyRing {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity.max(1)),
            next: 0,
            total: 0,
        }
    }

    pub fn record_micros(&mut self, micros: f64) {
        if self.samples.len() < self.samples.capacity() {
            self.samples.push(micros);
        } else if let Some(slot) = self.samples.get_mut(self.next) {
            *slot = micros;
        }
        self.next = (self.next + 1) % self.samples.capacity().max(1);
        self.total += 1;
    }

    pub fn summary(&self) -> LatencySummary {
        if self.samples.is_empty() {
            return LatencySummary::default();
        }
        let mean = Statistics::mean(self.samples.iter());
        let max = Statistics::max(self.samples.iter());
        let mut data = Data::new(self.samples.clone());
        LatencySummary {
            samples: self.total,
            mean_micros: mean,
            p50_micros: data.percentile(50),
            p95_micros: data.percentile(95),
            max_micros: max,
        }
    }
}

/// Fingerprints are rendered as `0x`-prefixed upper-case hex.
pub mod hex_u64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &u64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{value:#018X}"))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    /// Parse `0x1234`, `0X1234` or bare hex.
    pub fn parse(s: &str) -> Result<u64, String> {
        let s = s.trim();
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        u64::from_str_radix(digits, 16).map_err(|e| format!("invalid hex '{s}': {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_counters() {
        let diagnostics = Diagnostics::new();
        diagnostics.record_seen();
        diagnostics.record_seen();
        diagnostics.record_parsed();
        diagnostics.record_dispatched();
        diagnostics.record_drop(DropReason::NonMultitouch);

        let counters = diagnostics.frame_counters();
        assert_eq!(counters.frames_seen, 2);
        assert_eq!(counters.frames_parsed, 1);
        assert_eq!(counters.frames_dispatched, 1);
        assert_eq!(counters.frames_dropped, 1);
        assert_eq!(counters.drop_reasons.non_multitouch, 1);
    }

    #[test]
    fn test_reset() {
        let diagnostics = Diagnostics::new();
        diagnostics.record_seen();
        diagnostics.record_drop(DropReason::QueueFull);
        diagnostics.record_device_denied("left");
        diagnostics.reset();

        let counters = diagnostics.frame_counters();
        assert_eq!(counters.frames_seen, 0);
        assert_eq!(counters.frames_dropped, 0);
        assert_eq!(diagnostics.devices_denied(), 0);
        assert!(diagnostics.faults().is_empty());
    }

    #[test]
    fn test_fault_log_is_bounded() {
        let diagnostics = Diagnostics::new();
        for i in 0..(MAX_RETAINED_FAULTS + 10) {
            diagnostics.record_reader_fault(format!("fault {i}"));
        }
        assert_eq!(diagnostics.faults().len(), MAX_RETAINED_FAULTS);
        assert_eq!(diagnostics.reader_faults(), (MAX_RETAINED_FAULTS + 10) as u64);
    }

    #[test]
    fn test_latency_ring_wraps() {
        let mut ring = LatencyRing::with_capacity(4);
        for micros in [10.0, 20.0, 30.0, 40.0, 50.0, 60.0] {
            ring.record_micros(micros);
        }
        let summary = ring.summary();
        assert_eq!(summary.samples, 6);
        assert!((summary.max_micros - 60.0).abs() < 1e-9);
        // 10 and 20 were overwritten
        assert!((summary.mean_micros - 45.0).abs() < 1e-9);
    }

    #[test]
    fn test_hex_parse() {
        assert_eq!(hex_u64::parse("0x14A29BB48FD73897"), Ok(0x14A2_9BB4_8FD7_3897));
        assert_eq!(hex_u64::parse("ff"), Ok(255));
        assert!(hex_u64::parse("0xZZ").is_err());
    }

    #[test]
    fn test_flush_and_load_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("diagnostics.json");
        let diagnostics = Diagnostics::open(path.clone()).unwrap();
        diagnostics.record_seen();

        let summary = DiagnosticsSummary {
            session_id: diagnostics.session_id(),
            session_start: diagnostics.session_start(),
            frames: diagnostics.frame_counters(),
            session_fingerprint: 0xDEAD_BEEF,
            intent: IntentSummary::default(),
            dispatch: DispatchSummary::default(),
            latency: LatencySummary::default(),
            allocation: AllocationSummary::default(),
            devices_denied: 0,
            reader_faults: 0,
            faults: Vec::new(),
        };
        diagnostics.flush(&summary).unwrap();

        let loaded = Diagnostics::load_summary(&path).unwrap();
        assert_eq!(loaded.frames.frames_seen, 1);
        assert_eq!(loaded.session_fingerprint, 0xDEAD_BEEF);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"framesSeen\": 1"));
        assert!(raw.contains("0x00000000DEADBEEF"));
    }
}
