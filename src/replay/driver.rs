//! Deterministic offline replay of a capture through the live pipeline.

use crate::collector::assembler::{classify_report, validate_frame, ReportInfo};
use crate::collector::types::{
    AxisExtents, Contact, ContactState, DeviceDescriptor, Frame, FrameEnvelope, Side,
};
use crate::config::EngineConfig;
use crate::core::bindings::BindingIndex;
use crate::core::dispatch::{DispatchEvent, RecordingSink};
use crate::core::session::Session;
use crate::error::CaptureError;
use crate::replay::format::{decode_frame_payload, Capture, CaptureWriter, MetaRecord};
use crate::transparency::{Diagnostics, DiagnosticsSummary, FrameCounters};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Tick frequency of the built-in self-test capture.
pub const SELFTEST_TICK_FREQUENCY: u64 = 1000;

/// Outcome of one replay pass.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayReport {
    pub summary: DiagnosticsSummary,
    /// Every dispatch event, in emission order
    #[serde(skip)]
    pub events: Vec<DispatchEvent>,
}

impl ReplayReport {
    pub fn fingerprint(&self) -> u64 {
        self.summary.session_fingerprint
    }

    pub fn counters(&self) -> &FrameCounters {
        &self.summary.frames
    }
}

/// Replay every frame record of `capture`.
///
/// Devices are routed in order of first appearance; frames from a third
/// device are dropped as routed to no session. Record faults drop the frame
/// and replay continues.
pub fn replay(capture: &Capture, config: &EngineConfig, index: Arc<BindingIndex>) -> ReplayReport {
    let diagnostics = Arc::new(Diagnostics::new());
    let mut session = Session::new(
        config,
        index,
        capture.header.tick_frequency,
        RecordingSink::new(),
        diagnostics.clone(),
    );

    let frame_flags = capture.frame_flags();
    for record in capture.frame_records() {
        let header = &record.header;
        diagnostics.record_seen();

        let info = ReportInfo {
            usage_page: header.usage_page,
            usage: header.usage,
            declared_len: header.payload_len as usize,
            actual_len: record.payload.len(),
        };
        let decoded = classify_report(&info)
            .and_then(|()| decode_frame_payload(header, &record.payload, frame_flags))
            .and_then(|frame| validate_frame(&frame).map(|()| frame));
        let frame = match decoded {
            Ok(frame) => frame,
            Err(reason) => {
                debug!(device = header.device_index, %reason, "replay frame dropped");
                session.reject(reason, header.arrival_ticks);
                continue;
            }
        };
        diagnostics.record_parsed();

        if !session.is_registered(header.device_index) {
            session.register(header.descriptor());
        }
        let envelope = FrameEnvelope::new(header.side(), header.device_index, frame);
        if let Err(reason) = session.handle(&envelope) {
            debug!(device = header.device_index, %reason, "replay frame rejected");
        }
    }

    let summary = session.summary();
    info!(
        frames = summary.frames.frames_seen,
        dropped = summary.frames.frames_dropped,
        fingerprint = %format!("{:#018X}", summary.session_fingerprint),
        "replay complete"
    );
    ReplayReport {
        summary,
        events: session.sink_mut().take(),
    }
}

/// Values a replay must reproduce. Unset fields are not checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayExpectations {
    pub fingerprint: Option<u64>,
    pub lifecycle_skips: Option<u64>,
    pub lifecycle_backward: Option<u64>,
}

impl ReplayExpectations {
    /// Describe every mismatch against `summary`.
    pub fn check(&self, summary: &DiagnosticsSummary) -> Vec<String> {
        let mut mismatches = Vec::new();
        if let Some(wanted) = self.fingerprint {
            if summary.session_fingerprint != wanted {
                mismatches.push(format!(
                    "session fingerprint: expected {wanted:#018X}, got {:#018X}",
                    summary.session_fingerprint
                ));
            }
        }
        let counts = [
            ("lifecycle skips", self.lifecycle_skips, summary.intent.lifecycle_skips),
            ("lifecycle backward", self.lifecycle_backward, summary.intent.lifecycle_backward),
        ];
        for (what, wanted, actual) in counts {
            if let Some(wanted) = wanted {
                if actual != wanted {
                    mismatches.push(format!("{what}: expected {wanted}, got {actual}"));
                }
            }
        }
        mismatches
    }
}

/// Result of [`run_selftest`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelftestReport {
    pub passed: bool,
    pub failures: Vec<String>,
    pub first: DiagnosticsSummary,
    pub second: DiagnosticsSummary,
}

/// Build the two-frame self-test capture: one report from a non-multitouch
/// collection and one valid touchpad frame with a single new contact.
pub fn selftest_capture() -> Result<Vec<u8>, CaptureError> {
    let pad = DeviceDescriptor::touchpad(0, Side::Left, AxisExtents::NORMALIZED);
    let mut writer = CaptureWriter::new(Vec::new(), SELFTEST_TICK_FREQUENCY)?;
    writer.write_meta(&MetaRecord::new("selftest", 2))?;

    let keyboard = Frame::new(1, 0);
    // Generic desktop / keyboard
    writer.write_frame_as(&pad, &keyboard, 0x01, 0x06)?;

    let touch = Frame::new(2, 8).with_contacts(&[Contact::new(1, 0.5, 0.5, ContactState::Making)]);
    writer.write_frame(&pad, &touch)?;
    writer.finish()
}

/// Replay the self-test capture twice and check the counters and that both
/// passes agree on every fingerprint.
pub fn run_selftest(config: &EngineConfig, index: Arc<BindingIndex>) -> Result<SelftestReport, CaptureError> {
    let bytes = selftest_capture()?;
    let capture = Capture::from_bytes(&bytes)?;
    let first = replay(&capture, config, index.clone()).summary;
    let second = replay(&capture, config, index).summary;

    let mut failures = Vec::new();
    let mut expect = |what: &str, actual: u64, wanted: u64| {
        if actual != wanted {
            failures.push(format!("{what}: expected {wanted}, got {actual}"));
        }
    };
    expect("framesSeen", first.frames.frames_seen, 2);
    expect("framesParsed", first.frames.frames_parsed, 1);
    expect("framesDispatched", first.frames.frames_dispatched, 1);
    expect("framesDropped", first.frames.frames_dropped, 1);
    expect(
        "nonMultitouch drops",
        first.frames.drop_reasons.non_multitouch,
        1,
    );
    expect(
        "session fingerprint",
        second.session_fingerprint,
        first.session_fingerprint,
    );
    expect("intent fingerprint", second.intent.fingerprint, first.intent.fingerprint);
    expect(
        "dispatch fingerprint",
        second.dispatch.fingerprint,
        first.dispatch.fingerprint,
    );

    Ok(SelftestReport {
        passed: failures.is_empty(),
        failures,
        first,
        second,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bindings::KeyLayout;

    fn index() -> Arc<BindingIndex> {
        Arc::new(BindingIndex::build(&KeyLayout::builtin()).unwrap())
    }

    #[test]
    fn test_selftest_passes() {
        let report = run_selftest(&EngineConfig::default(), index()).unwrap();
        assert!(report.passed, "{:?}", report.failures);
        assert_eq!(report.first.frames.frames_seen, 2);
    }

    #[test]
    fn test_expectations_report_mismatches() {
        let capture = Capture::from_bytes(&selftest_capture().unwrap()).unwrap();
        let report = replay(&capture, &EngineConfig::default(), index());

        let exact = ReplayExpectations {
            fingerprint: Some(report.fingerprint()),
            lifecycle_skips: Some(report.summary.intent.lifecycle_skips),
            lifecycle_backward: Some(0),
        };
        assert!(exact.check(&report.summary).is_empty());

        let wrong = ReplayExpectations {
            fingerprint: Some(report.fingerprint() ^ 1),
            lifecycle_backward: Some(3),
            ..ReplayExpectations::default()
        };
        assert_eq!(wrong.check(&report.summary).len(), 2);
    }

    #[test]
    fn test_third_device_routed_to_no_session() {
        let mut writer = CaptureWriter::new(Vec::new(), 1000).unwrap();
        for device in 0..3 {
            let pad = DeviceDescriptor::touchpad(device, Side::Unknown, AxisExtents::NORMALIZED);
            writer.write_frame(&pad, &Frame::new(1, device as u64)).unwrap();
        }
        let capture = Capture::from_bytes(&writer.finish().unwrap()).unwrap();

        let report = replay(&capture, &EngineConfig::default(), index());
        let counters = report.counters();
        assert_eq!(counters.frames_parsed, 3);
        assert_eq!(counters.frames_dispatched, 2);
        assert_eq!(counters.drop_reasons.routed_to_no_session, 1);
    }

    #[test]
    fn test_tap_replays_to_key_events() {
        let pad = DeviceDescriptor::touchpad(0, Side::Left, AxisExtents::NORMALIZED);
        let mut writer = CaptureWriter::new(Vec::new(), 1000).unwrap();
        for (seq, ticks, state) in [
            (1, 0, ContactState::Making),
            (2, 20, ContactState::Touching),
            (3, 40, ContactState::Leaving),
        ] {
            let frame = Frame::new(seq, ticks).with_contacts(&[Contact::new(1, 0.1, 0.1, state)]);
            writer.write_frame(&pad, &frame).unwrap();
        }
        let capture = Capture::from_bytes(&writer.finish().unwrap()).unwrap();

        let report = replay(&capture, &EngineConfig::default(), index());
        assert_eq!(report.events.len(), 2);
        assert_eq!(report.summary.dispatch.events, 2);
        assert_eq!(report.summary.intent.mode, "typingCommitted");
    }
}
