//! Engine scenarios driven through the public API

use glasstokey::collector::types::{Contact, ContactState, Frame, FrameEnvelope, Side};
use glasstokey::config::EngineConfig;
use glasstokey::core::{BindingIndex, DispatchEvent, IntentEngine, IntentMode, KeyLayout};
use std::sync::Arc;

const TICKS_PER_SECOND: u64 = 1000;

fn engine() -> IntentEngine {
    let index = Arc::new(BindingIndex::build(&KeyLayout::builtin()).expect("builtin layout"));
    IntentEngine::new(&EngineConfig::default(), index, TICKS_PER_SECOND)
}

/// A left-hand sequence: tap "q", a five-finger swipe, then a second tap.
fn scenario() -> Vec<FrameEnvelope> {
    let mut frames = Vec::new();
    let mut seq = 0;
    let mut push = |ticks: u64, contacts: Vec<Contact>| {
        seq += 1;
        frames.push(FrameEnvelope::new(
            Side::Left,
            0,
            Frame::new(seq, ticks).with_contacts(&contacts),
        ));
    };

    push(0, vec![Contact::new(1, 0.1, 0.1, ContactState::Making)]);
    push(40, vec![Contact::new(1, 0.1, 0.1, ContactState::Leaving)]);
    push(900, vec![]);

    for (step, offset) in [0.0f32, 0.1, 0.3, 0.4].iter().enumerate() {
        let state = if step == 0 {
            ContactState::Making
        } else {
            ContactState::Touching
        };
        let hand: Vec<Contact> = (0..5)
            .map(|i| Contact::new(10 + i, 0.05 + i as f32 * 0.1 + offset, 0.6, state))
            .collect();
        push(1000 + step as u64 * 50, hand);
    }
    push(1250, vec![]);

    push(2000, vec![Contact::new(20, 0.1, 0.1, ContactState::Making)]);
    push(2040, vec![Contact::new(20, 0.1, 0.1, ContactState::Leaving)]);
    frames
}

fn run(frames: &[FrameEnvelope]) -> (IntentEngine, Vec<DispatchEvent>) {
    let mut engine = engine();
    let mut out = Vec::new();
    for envelope in frames {
        engine.process(envelope, &mut out).expect("valid frame");
    }
    (engine, out)
}

#[test]
fn test_same_frames_same_events_and_transitions() {
    let frames = scenario();
    let (first, first_events) = run(&frames);
    let (second, second_events) = run(&frames);

    assert!(!first_events.is_empty());
    assert_eq!(first_events, second_events);
    assert_eq!(first.transitions(), second.transitions());
    assert_eq!(first.fingerprint(), second.fingerprint());
}

#[test]
fn test_swipe_toggles_typing_once() {
    let (engine, _) = run(&scenario());
    assert_eq!(engine.typing_toggles(), 1);
    assert!(!engine.typing_enabled());
    assert_eq!(engine.tracked_contacts(), 0);
}

#[test]
fn test_duplicate_ids_leave_engine_untouched() {
    let mut engine = engine();
    let mut out = Vec::new();
    let frame = Frame::new(1, 0).with_contacts(&[
        Contact::new(3, 0.1, 0.1, ContactState::Making),
        Contact::new(3, 0.2, 0.1, ContactState::Making),
    ]);

    assert!(engine
        .process(&FrameEnvelope::new(Side::Left, 0, frame), &mut out)
        .is_err());
    assert!(out.is_empty());
    assert_eq!(engine.mode(), IntentMode::Idle);
    assert_eq!(engine.tracked_contacts(), 0);
    assert_eq!(engine.transitions(), 0);
}
