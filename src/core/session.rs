//! Processing context: routes frames from up to two devices through the
//! intent engine and offers the resulting events to a dispatch sink.

use crate::collector::assembler::DropReason;
use crate::collector::types::{DeviceDescriptor, FrameEnvelope};
use crate::config::EngineConfig;
use crate::core::bindings::BindingIndex;
use crate::core::dispatch::{Delivery, DispatchEvent, DispatchLedger, DispatchSink};
use crate::core::intent::IntentEngine;
use crate::replay::fingerprint::Fingerprint;
use crate::replay::format::CaptureWriter;
use crate::transparency::{
    AllocationSummary, DiagnosticsSummary, DispatchSummary, SharedDiagnostics,
};
use crossbeam_channel::{Receiver, Select, TryRecvError};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Devices one session accepts frames from.
pub const MAX_SESSION_DEVICES: usize = 2;

const LATENCY_SAMPLES: usize = 4096;

#[derive(Debug)]
struct Route {
    descriptor: DeviceDescriptor,
    last_sequence: u64,
}

/// Tees processed frames into a capture.
pub type Recorder = CaptureWriter<Box<dyn Write + Send>>;

pub struct Session<S: DispatchSink> {
    engine: IntentEngine,
    sink: S,
    events: Vec<DispatchEvent>,
    ledger: DispatchLedger,
    latency: crate::transparency::LatencyRing,
    routes: Vec<Route>,
    diagnostics: SharedDiagnostics,
    /// Running fingerprint over accepted frames and drops
    frames: Fingerprint,
    event_buffer_growths: u64,
    paused: Arc<AtomicBool>,
    recorder: Option<Recorder>,
}

impl<S: DispatchSink> Session<S> {
    pub fn new(
        config: &EngineConfig,
        index: Arc<BindingIndex>,
        tick_frequency: u64,
        sink: S,
        diagnostics: SharedDiagnostics,
    ) -> Self {
        Self {
            engine: IntentEngine::new(config, index, tick_frequency),
            sink,
            events: Vec::with_capacity(64),
            ledger: DispatchLedger::new(),
            latency: crate::transparency::LatencyRing::with_capacity(LATENCY_SAMPLES),
            routes: Vec::with_capacity(MAX_SESSION_DEVICES),
            diagnostics,
            frames: Fingerprint::new(),
            event_buffer_growths: 0,
            paused: Arc::new(AtomicBool::new(false)),
            recorder: None,
        }
    }

    /// Accept frames from `descriptor`. Returns `false` when the session
    /// already has its devices; frames from an unregistered device are
    /// dropped as routed to no session.
    pub fn register(&mut self, descriptor: DeviceDescriptor) -> bool {
        if self.is_registered(descriptor.index) {
            return true;
        }
        if self.routes.len() >= MAX_SESSION_DEVICES {
            warn!(device = %descriptor.name, "session already has two devices");
            return false;
        }
        debug!(device = %descriptor.name, side = ?descriptor.side, "device routed");
        self.routes.push(Route {
            descriptor,
            last_sequence: 0,
        });
        true
    }

    pub fn is_registered(&self, device_index: i32) -> bool {
        self.routes
            .iter()
            .any(|r| r.descriptor.index == device_index)
    }

    /// Suppress delivery while paused. The engine keeps running so that
    /// gesture state stays coherent.
    pub fn set_paused(&self, paused: bool) {
        if self.paused.swap(paused, Ordering::SeqCst) != paused {
            info!(paused, "dispatch pause changed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    /// Shared pause flag, for toggling from another thread.
    pub fn pause_flag(&self) -> Arc<AtomicBool> {
        self.paused.clone()
    }

    /// Record every handled frame into `recorder`.
    pub fn set_recorder(&mut self, recorder: Recorder) {
        self.recorder = Some(recorder);
    }

    /// Detach and flush the recorder, if any.
    pub fn finish_recording(&mut self) -> Option<Result<u64, crate::error::CaptureError>> {
        let recorder = self.recorder.take()?;
        let frames = recorder.frames_written();
        Some(recorder.finish().map(|_| frames))
    }

    /// Account a frame dropped before it reached the session.
    pub fn reject(&mut self, reason: DropReason, arrival_ticks: u64) {
        self.diagnostics.record_drop(reason);
        self.frames.write_u8(0xFF);
        self.frames.write_u8(reason.index() as u8);
        self.frames.write_u64(arrival_ticks);
    }

    /// Run one frame through the engine and offer its events to the sink.
    pub fn handle(&mut self, envelope: &FrameEnvelope) -> Result<usize, DropReason> {
        let started = Instant::now();
        let frame = &envelope.frame;

        let Some(slot) = self
            .routes
            .iter()
            .position(|r| r.descriptor.index == envelope.device_index)
        else {
            self.reject(DropReason::NoSession, frame.arrival_ticks);
            return Err(DropReason::NoSession);
        };
        if frame.sequence <= self.routes[slot].last_sequence {
            self.reject(DropReason::ParseFailure, frame.arrival_ticks);
            return Err(DropReason::ParseFailure);
        }

        let capacity = self.events.capacity();
        self.events.clear();
        let produced = match self.engine.process(envelope, &mut self.events) {
            Ok(n) => n,
            Err(reason) => {
                self.reject(reason, frame.arrival_ticks);
                return Err(reason);
            }
        };
        self.routes[slot].last_sequence = frame.sequence;
        if self.events.capacity() > capacity {
            self.event_buffer_growths += 1;
        }
        self.diagnostics.record_dispatched();
        write_frame_fingerprint(&mut self.frames, envelope);

        let paused = self.paused.load(Ordering::Relaxed);
        for event in &self.events {
            let delivery = if paused {
                Delivery::Suppressed
            } else {
                self.sink.offer(event)
            };
            self.ledger.record(event, delivery);
        }

        if let Some(recorder) = self.recorder.as_mut() {
            if let Err(e) = recorder.write_frame(&self.routes[slot].descriptor, frame) {
                warn!("Capture recording stopped: {}", e);
                self.diagnostics
                    .record_reader_fault(format!("capture recording: {e}"));
                self.recorder = None;
            }
        }

        self.latency
            .record_micros(started.elapsed().as_secs_f64() * 1_000_000.0);
        Ok(produced)
    }

    /// Drain device queues until `running` clears or every queue disconnects.
    ///
    /// One frame per device is held back so that frames from different devices
    /// are processed in arrival order.
    pub fn drain(&mut self, queues: &[Receiver<FrameEnvelope>], running: &AtomicBool, poll: Duration) {
        let mut pending: Vec<Option<FrameEnvelope>> = vec![None; queues.len()];
        let mut open = vec![true; queues.len()];

        while running.load(Ordering::SeqCst) {
            for (i, rx) in queues.iter().enumerate() {
                if pending[i].is_some() || !open[i] {
                    continue;
                }
                match rx.try_recv() {
                    Ok(envelope) => pending[i] = Some(envelope),
                    Err(TryRecvError::Empty) => {}
                    Err(TryRecvError::Disconnected) => open[i] = false,
                }
            }

            let earliest = pending
                .iter()
                .enumerate()
                .filter_map(|(i, p)| p.as_ref().map(|e| (i, e.arrival_ticks())))
                .min_by_key(|&(_, ticks)| ticks)
                .map(|(i, _)| i);
            if let Some(envelope) = earliest.and_then(|i| pending[i].take()) {
                if let Err(reason) = self.handle(&envelope) {
                    trace!(device = envelope.device_index, %reason, "frame rejected");
                }
                continue;
            }

            if !open.iter().any(|o| *o) {
                debug!("all device queues closed");
                break;
            }
            let mut select = Select::new();
            for (rx, _) in queues.iter().zip(&open).filter(|(_, o)| **o) {
                select.recv(rx);
            }
            // Timeout just re-checks the running flag.
            let _ = select.ready_timeout(poll);
        }
    }

    pub fn engine(&self) -> &IntentEngine {
        &self.engine
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn ledger(&self) -> &DispatchLedger {
        &self.ledger
    }

    /// Fingerprint over the frame stream, drop outcomes and derived traces.
    pub fn session_fingerprint(&self) -> u64 {
        let mut fp = self.frames;
        let counters = self.diagnostics.frame_counters();
        fp.write_u64(counters.frames_seen);
        fp.write_u64(counters.frames_parsed);
        fp.write_u64(counters.frames_dispatched);
        for reason in DropReason::ALL {
            fp.write_u64(self.diagnostics.drop_count(reason));
        }
        fp.write_u64(self.engine.fingerprint());
        fp.write_u64(self.engine.transitions());
        fp.write_u64(self.ledger.fingerprint());
        fp.write_u64(self.ledger.events());
        fp.value()
    }

    pub fn summary(&self) -> DiagnosticsSummary {
        DiagnosticsSummary {
            session_id: self.diagnostics.session_id(),
            session_start: self.diagnostics.session_start(),
            frames: self.diagnostics.frame_counters(),
            session_fingerprint: self.session_fingerprint(),
            intent: self.engine.summary(),
            dispatch: DispatchSummary {
                fingerprint: self.ledger.fingerprint(),
                events: self.ledger.events(),
                enqueued: self.ledger.enqueued(),
                suppressed: self.ledger.suppressed(),
            },
            latency: self.latency.summary(),
            allocation: AllocationSummary {
                tracker_growths: self.engine.tracker_growths(),
                tracker_capacity: self.engine.tracker_capacity() as u64,
                event_buffer_growths: self.event_buffer_growths,
            },
            devices_denied: self.diagnostics.devices_denied(),
            reader_faults: self.diagnostics.reader_faults(),
            faults: self.diagnostics.faults(),
        }
    }
}

fn write_frame_fingerprint(fp: &mut Fingerprint, envelope: &FrameEnvelope) {
    let frame = &envelope.frame;
    fp.write_i32(envelope.device_index);
    fp.write_u8(envelope.side.hint());
    fp.write_u64(frame.sequence);
    fp.write_u64(frame.arrival_ticks);
    fp.write_u8(frame.button_pressed as u8);
    fp.write_u16(frame.contacts.len() as u16);
    for contact in &frame.contacts {
        fp.write_i32(contact.id);
        fp.write_f32(contact.x);
        fp.write_f32(contact.y);
        fp.write_u8(contact.state.code());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::types::{AxisExtents, Contact, ContactState, Frame, Side};
    use crate::core::bindings::KeyLayout;
    use crate::core::dispatch::{DispatchAction, RecordingSink};
    use crate::transparency::Diagnostics;
    use crossbeam_channel::bounded;

    fn session() -> Session<RecordingSink> {
        let index = Arc::new(BindingIndex::build(&KeyLayout::builtin()).unwrap());
        let mut session = Session::new(
            &EngineConfig::default(),
            index,
            1000,
            RecordingSink::new(),
            Arc::new(Diagnostics::new()),
        );
        assert!(session.register(DeviceDescriptor::touchpad(0, Side::Left, AxisExtents::NORMALIZED)));
        session
    }

    fn envelope(device: i32, seq: u64, ticks: u64, contacts: &[Contact]) -> FrameEnvelope {
        FrameEnvelope::new(Side::Left, device, Frame::new(seq, ticks).with_contacts(contacts))
    }

    fn tap_q(session: &mut Session<RecordingSink>) {
        // "q" is the top-left key of the left half
        let down = Contact::new(1, 0.1, 0.1, ContactState::Making);
        let held = Contact::new(1, 0.1, 0.1, ContactState::Touching);
        let up = Contact::new(1, 0.1, 0.1, ContactState::Leaving);
        session.handle(&envelope(0, 1, 0, &[down])).unwrap();
        session.handle(&envelope(0, 2, 20, &[held])).unwrap();
        session.handle(&envelope(0, 3, 40, &[up])).unwrap();
    }

    #[test]
    fn test_tap_reaches_sink() {
        let mut session = session();
        tap_q(&mut session);
        let actions: Vec<_> = session.sink().events().iter().map(|e| e.action).collect();
        assert!(matches!(actions[0], DispatchAction::KeyDown { code: 0x14, .. }));
        assert!(matches!(actions[1], DispatchAction::KeyUp { code: 0x14, .. }));
        assert_eq!(session.ledger().enqueued(), 2);
        assert_eq!(session.summary().frames.frames_dispatched, 3);
    }

    #[test]
    fn test_unrouted_device_dropped() {
        let mut session = session();
        let result = session.handle(&envelope(7, 1, 0, &[]));
        assert_eq!(result, Err(DropReason::NoSession));
        let summary = session.summary();
        assert_eq!(summary.frames.drop_reasons.routed_to_no_session, 1);
        assert_eq!(summary.frames.frames_dispatched, 0);
    }

    #[test]
    fn test_third_device_refused() {
        let mut session = session();
        assert!(session.register(DeviceDescriptor::touchpad(1, Side::Right, AxisExtents::NORMALIZED)));
        assert!(!session.register(DeviceDescriptor::touchpad(2, Side::Right, AxisExtents::NORMALIZED)));
        assert!(!session.is_registered(2));
    }

    #[test]
    fn test_repeated_sequence_rejected() {
        let mut session = session();
        session.handle(&envelope(0, 5, 0, &[])).unwrap();
        assert_eq!(
            session.handle(&envelope(0, 5, 10, &[])),
            Err(DropReason::ParseFailure)
        );
        assert_eq!(
            session.handle(&envelope(0, 4, 20, &[])),
            Err(DropReason::ParseFailure)
        );
        assert!(session.handle(&envelope(0, 6, 30, &[])).is_ok());
    }

    #[test]
    fn test_paused_suppresses_delivery() {
        let mut session = session();
        session.pause_flag().store(true, Ordering::SeqCst);
        assert!(session.is_paused());
        tap_q(&mut session);
        assert!(session.sink().events().is_empty());
        assert_eq!(session.ledger().events(), 2);
        assert_eq!(session.ledger().suppressed(), 2);
    }

    #[test]
    fn test_drain_merges_by_arrival() {
        let mut session = session();
        assert!(session.register(DeviceDescriptor::touchpad(1, Side::Right, AxisExtents::NORMALIZED)));

        let (left_tx, left_rx) = bounded(8);
        let (right_tx, right_rx) = bounded(8);
        left_tx.send(envelope(0, 1, 30, &[])).unwrap();
        left_tx.send(envelope(0, 2, 50, &[])).unwrap();
        right_tx.send(envelope(1, 1, 10, &[])).unwrap();
        right_tx.send(envelope(1, 2, 40, &[])).unwrap();
        drop(left_tx);
        drop(right_tx);

        let running = AtomicBool::new(true);
        session.drain(&[left_rx, right_rx], &running, Duration::from_millis(5));
        assert_eq!(session.summary().frames.frames_dispatched, 4);

        // Same frames fed directly in arrival order give the same fingerprint
        let mut direct = self::session();
        assert!(direct.register(DeviceDescriptor::touchpad(1, Side::Right, AxisExtents::NORMALIZED)));
        for env in [
            envelope(1, 1, 10, &[]),
            envelope(0, 1, 30, &[]),
            envelope(1, 2, 40, &[]),
            envelope(0, 2, 50, &[]),
        ] {
            direct.handle(&env).unwrap();
        }
        assert_eq!(session.session_fingerprint(), direct.session_fingerprint());
    }
}
