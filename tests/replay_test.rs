//! Integration tests for capture, replay and the live pipeline

use glasstokey::collector::assembler::ContactUpdate;
use glasstokey::collector::types::{AxisExtents, Contact, ContactState, DeviceDescriptor, Frame, Side};
use glasstokey::collector::{Collector, CollectorConfig, FrameSource, ScriptedReport, ScriptedSource};
use glasstokey::config::EngineConfig;
use glasstokey::core::{BindingIndex, DispatchAction, KeyLayout, RecordingSink, Session};
use glasstokey::error::{CaptureError, SourceError};
use glasstokey::replay::{replay, selftest_capture, Capture, CaptureWriter, MetaRecord};
use glasstokey::transparency::Diagnostics;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::Arc;
use std::time::Duration;

fn index() -> Arc<BindingIndex> {
    Arc::new(BindingIndex::build(&KeyLayout::builtin()).expect("builtin layout"))
}

fn left_pad() -> DeviceDescriptor {
    DeviceDescriptor::touchpad(0, Side::Left, AxisExtents::NORMALIZED)
}

/// Tap on "q" followed by a short pointer drag on the right pad.
fn write_session(writer: &mut CaptureWriter<impl Write>) {
    let left = left_pad();
    let right = DeviceDescriptor::touchpad(1, Side::Right, AxisExtents::NORMALIZED);
    let frames = [
        (&left, Frame::new(1, 0).with_contacts(&[Contact::new(1, 0.1, 0.1, ContactState::Making)])),
        (&left, Frame::new(2, 20).with_contacts(&[Contact::new(1, 0.1, 0.1, ContactState::Touching)])),
        (&left, Frame::new(3, 40).with_contacts(&[Contact::new(1, 0.1, 0.1, ContactState::Leaving)])),
        (&right, Frame::new(1, 300).with_contacts(&[Contact::new(5, 0.6, 0.8, ContactState::Making)])),
        (&right, Frame::new(2, 320).with_contacts(&[Contact::new(5, 0.7, 0.8, ContactState::Touching)])),
        (&right, Frame::new(3, 340).with_contacts(&[Contact::new(5, 0.8, 0.8, ContactState::Touching)])),
        (&right, Frame::new(4, 360).with_contacts(&[Contact::new(5, 0.8, 0.8, ContactState::Leaving)])),
    ];
    for (device, frame) in &frames {
        writer.write_frame(device, frame).expect("write frame");
    }
}

fn session_bytes() -> Vec<u8> {
    let mut writer = CaptureWriter::new(Vec::new(), 1000).expect("header");
    writer.write_meta(&MetaRecord::new("test", 7)).expect("meta");
    write_session(&mut writer);
    writer.finish().expect("finish")
}

/// Pinned values for the built-in two-frame capture. A change here means
/// existing fixture fingerprints no longer match.
#[test]
fn test_selftest_fingerprints_are_stable() {
    let capture = Capture::from_bytes(&selftest_capture().unwrap()).unwrap();
    let report = replay(&capture, &EngineConfig::default(), index());

    assert_eq!(report.summary.intent.transitions, 1);
    assert_eq!(report.summary.intent.fingerprint, 0x9873_245C_767D_6538);
    assert_eq!(report.summary.dispatch.fingerprint, 0xCBF2_9CE4_8422_2325);
    assert_eq!(report.fingerprint(), 0x7540_E857_63F0_ECD6);
}

#[test]
fn test_capture_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.atpcap");

    let file = BufWriter::new(File::create(&path).unwrap());
    let mut writer = CaptureWriter::new(file, 1000).unwrap();
    writer.write_meta(&MetaRecord::for_this_host(7)).unwrap();
    write_session(&mut writer);
    assert_eq!(writer.frames_written(), 7);
    writer.finish().unwrap();

    let capture = Capture::load(&path).unwrap();
    assert_eq!(capture.header.tick_frequency, 1000);
    assert_eq!(capture.frame_records().count(), 7);
    let meta = capture.meta.expect("meta record");
    assert_eq!(meta.schema, "g2k-replay-v1");
    assert_eq!(meta.frame_count, 7);

    let report = replay(&Capture::load(&path).unwrap(), &EngineConfig::default(), index());
    let counters = report.counters();
    assert_eq!(counters.frames_seen, 7);
    assert_eq!(counters.frames_parsed, 7);
    assert_eq!(counters.frames_dispatched, 7);
    assert_eq!(counters.frames_dropped, 0);
}

#[test]
fn test_replay_is_deterministic() {
    let capture = Capture::from_bytes(&session_bytes()).unwrap();
    let first = replay(&capture, &EngineConfig::default(), index());
    let second = replay(&capture, &EngineConfig::default(), index());

    assert_eq!(first.fingerprint(), second.fingerprint());
    assert_eq!(first.summary.intent, second.summary.intent);
    assert_eq!(first.summary.dispatch, second.summary.dispatch);
    assert_eq!(first.events, second.events);

    let actions: Vec<_> = first.events.iter().map(|e| e.action).collect();
    assert!(matches!(actions[0], DispatchAction::KeyDown { code: 0x14, .. }));
    assert!(matches!(actions[1], DispatchAction::KeyUp { code: 0x14, .. }));
    assert!(actions[2..]
        .iter()
        .any(|a| matches!(a, DispatchAction::MouseMove { .. })));
}

#[test]
fn test_fingerprint_tracks_input() {
    let bytes = session_bytes();
    let base = replay(&Capture::from_bytes(&bytes).unwrap(), &EngineConfig::default(), index());

    let mut writer = CaptureWriter::new(Vec::new(), 1000).unwrap();
    write_session(&mut writer);
    let shifted = Frame::new(4, 400).with_contacts(&[Contact::new(2, 0.3, 0.3, ContactState::Making)]);
    writer.write_frame(&left_pad(), &shifted).unwrap();
    let other = replay(
        &Capture::from_bytes(&writer.finish().unwrap()).unwrap(),
        &EngineConfig::default(),
        index(),
    );
    assert_ne!(base.fingerprint(), other.fingerprint());
}

#[test]
fn test_two_frame_scenario_counters() {
    let capture = Capture::from_bytes(&selftest_capture().unwrap()).unwrap();
    let report = replay(&capture, &EngineConfig::default(), index());
    let counters = report.counters();
    assert_eq!(counters.frames_seen, 2);
    assert_eq!(counters.frames_parsed, 1);
    assert_eq!(counters.frames_dispatched, 1);
    assert_eq!(counters.frames_dropped, 1);
    assert_eq!(counters.drop_reasons.non_multitouch, 1);

    let json = serde_json::to_value(&report.summary).unwrap();
    assert_eq!(json["framesSeen"], 2);
    assert_eq!(json["dropReasons"]["nonMultitouch"], 1);
    assert!(json["sessionFingerprint"].as_str().unwrap().starts_with("0x"));
}

#[test]
fn test_bad_magic_processes_nothing() {
    let mut bytes = session_bytes();
    bytes[..8].copy_from_slice(b"NOTACAP!");
    match Capture::from_bytes(&bytes) {
        Err(CaptureError::BadMagic { found }) => assert_eq!(&found, b"NOTACAP!"),
        other => panic!("expected bad magic, got {other:?}"),
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.atpcap");
    std::fs::write(&path, &bytes).unwrap();
    assert!(matches!(Capture::load(&path), Err(CaptureError::BadMagic { .. })));
}

#[test]
fn test_unsupported_version_rejected() {
    let mut bytes = session_bytes();
    bytes[8..12].copy_from_slice(&4u32.to_le_bytes());
    assert!(matches!(
        Capture::from_bytes(&bytes),
        Err(CaptureError::UnsupportedVersion(4))
    ));
}

#[test]
fn test_duplicate_contact_ids_dropped_as_parse_failure() {
    let mut writer = CaptureWriter::new(Vec::new(), 1000).unwrap();
    let dup = Frame::new(1, 0).with_contacts(&[
        Contact::new(3, 0.1, 0.1, ContactState::Making),
        Contact::new(3, 0.2, 0.2, ContactState::Making),
    ]);
    writer.write_frame(&left_pad(), &dup).unwrap();
    let ok = Frame::new(2, 10).with_contacts(&[Contact::new(4, 0.1, 0.1, ContactState::Making)]);
    writer.write_frame(&left_pad(), &ok).unwrap();

    let capture = Capture::from_bytes(&writer.finish().unwrap()).unwrap();
    let report = replay(&capture, &EngineConfig::default(), index());
    let counters = report.counters();
    assert_eq!(counters.frames_seen, 2);
    assert_eq!(counters.frames_parsed, 1);
    assert_eq!(counters.frames_dispatched, 1);
    assert_eq!(counters.drop_reasons.parse_failure, 1);
}

#[test]
fn test_live_recording_replays_identically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("live.atpcap");
    let freq = glasstokey::collector::SOURCE_TICK_FREQUENCY;

    let pad = DeviceDescriptor::touchpad(0, Side::Left, AxisExtents::new(0, 1000, 0, 1000));
    let reports = vec![
        ScriptedReport::new(
            &pad,
            0,
            vec![
                ContactUpdate::Slot(0),
                ContactUpdate::TrackingId(1),
                ContactUpdate::PositionX(100),
                ContactUpdate::PositionY(100),
                ContactUpdate::Sync,
            ],
        ),
        ScriptedReport::new(&pad, 20_000, vec![ContactUpdate::PositionX(101), ContactUpdate::Sync]),
        ScriptedReport::new(&pad, 40_000, vec![ContactUpdate::TrackingId(-1), ContactUpdate::Sync]),
    ];
    let source: Box<dyn FrameSource> = Box::new(ScriptedSource::new(pad, reports));
    let sources: Vec<Result<Box<dyn FrameSource>, SourceError>> = vec![Ok(source)];

    let diagnostics = Arc::new(Diagnostics::new());
    let mut collector = Collector::new(
        CollectorConfig {
            queue_capacity: 16,
            read_timeout: Duration::from_millis(5),
        },
        diagnostics.clone(),
    );
    collector.start(sources).unwrap();

    let mut session = Session::new(
        &EngineConfig::default(),
        index(),
        freq,
        RecordingSink::new(),
        diagnostics,
    );
    for descriptor in collector.descriptors() {
        session.register(descriptor.clone());
    }
    let file: Box<dyn Write + Send> = Box::new(BufWriter::new(File::create(&path).unwrap()));
    let mut recorder = CaptureWriter::new(file, freq).unwrap();
    recorder.write_meta(&MetaRecord::new("test", 0)).unwrap();
    session.set_recorder(recorder);

    // Returns once the scripted source disconnects
    let running = collector.running_flag();
    session.drain(collector.receivers(), &running, Duration::from_millis(5));
    collector.stop();
    assert_eq!(session.finish_recording().unwrap().unwrap(), 3);

    let live = session.summary();
    assert_eq!(live.frames.frames_dispatched, 3);
    assert_eq!(session.sink().events().len(), 2);

    let replayed = replay(&Capture::load(&path).unwrap(), &EngineConfig::default(), index());
    assert_eq!(replayed.summary.frames.frames_dispatched, 3);
    assert_eq!(replayed.summary.intent, live.intent);
    assert_eq!(replayed.summary.dispatch.fingerprint, live.dispatch.fingerprint);
    assert_eq!(replayed.events, session.sink().events());
}
