//! The intent engine: contact activity in, semantic dispatch events out.
//!
//! One engine serves both pads of a session. Each processed frame:
//!
//! 1. is validated (duplicate contact ids reject it before any state changes),
//! 2. updates the contact tracker and collects the side's down contacts,
//! 3. resolves lifted contacts (taps, held keys, momentary layers),
//! 4. applies the per-side group effects (chordal shift, typing swipe),
//! 5. advances the mode state machine,
//! 6. retires contacts that ended.
//!
//! Everything is a function of the engine state, the frame and the binding
//! index, so replaying a frame sequence reproduces the event sequence and the
//! transition fingerprint exactly.

use crate::collector::assembler::{validate_frame, DropReason};
use crate::collector::types::{ContactState, FrameEnvelope, Side, MAX_CONTACTS};
use crate::config::EngineConfig;
use crate::core::bindings::{Action, BindingIndex, KeyPolicy, Probe};
use crate::core::dispatch::{DispatchAction, DispatchEvent, MouseButton};
use crate::core::tracker::{contact_key, ContactTracker};
use crate::replay::fingerprint::Fingerprint;
use crate::transparency::IntentSummary;
use std::sync::Arc;
use tracing::{debug, trace};

/// Side slots, indexed by [`Side::hint`].
const SIDE_SLOTS: usize = 3;
/// Per-side contact count that engages chordal shift.
const CHORD_CONTACTS: usize = 4;
/// Per-side contact count that arms the typing toggle swipe.
const SWIPE_CONTACTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IntentMode {
    #[default]
    Idle,
    KeyCandidate,
    TypingCommitted,
    MouseCandidate,
    MouseActive,
    GestureCandidate,
}

impl IntentMode {
    pub fn code(self) -> u8 {
        match self {
            IntentMode::Idle => 0,
            IntentMode::KeyCandidate => 1,
            IntentMode::TypingCommitted => 2,
            IntentMode::MouseCandidate => 3,
            IntentMode::MouseActive => 4,
            IntentMode::GestureCandidate => 5,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            IntentMode::Idle => "idle",
            IntentMode::KeyCandidate => "keyCandidate",
            IntentMode::TypingCommitted => "typingCommitted",
            IntentMode::MouseCandidate => "mouseCandidate",
            IntentMode::MouseActive => "mouseActive",
            IntentMode::GestureCandidate => "gestureCandidate",
        }
    }
}

/// What a down contact currently belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Role {
    /// Not claimed by any intent
    #[default]
    Free,
    /// The pending key candidate
    Candidate,
    Mouse,
    /// Owned by a gesture (or consumed); ignored until lifted
    Gesture,
    Chord,
    /// Holding a key or button; released on lift
    Held,
    /// Holding a momentary layer
    Layer,
}

impl Role {
    fn is_free(self) -> bool {
        matches!(self, Role::Free | Role::Candidate | Role::Mouse)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ContactTrack {
    state: ContactState,
    x: f32,
    y: f32,
    origin_x: f32,
    origin_y: f32,
    down: bool,
    /// Engine frame counter value at last observation
    stamp: u64,
    ended: bool,
    role: Role,
}

#[derive(Debug, Clone, Copy)]
struct Active {
    key: u64,
    x: f32,
    y: f32,
    role: Role,
    fresh: bool,
}

#[derive(Debug, Clone, Copy)]
struct Released {
    key: u64,
    role: Role,
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, Copy)]
struct KeyCandidate {
    key: u64,
    binding: usize,
    side: Side,
    start_ticks: u64,
    origin_x: f32,
    origin_y: f32,
    policy: KeyPolicy,
}

#[derive(Debug, Clone, Copy, Default)]
struct Pointer {
    side: Side,
    start_ticks: u64,
    last_x: f32,
    last_y: f32,
    contacts: usize,
    max_contacts: usize,
    travel: f32,
    button_down: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct Swipe {
    armed: bool,
    /// Already toggled; stays set until the five-contact group breaks
    latched: bool,
    start_ticks: u64,
    start_x: f32,
}

#[derive(Debug, Clone, Copy)]
struct HeldAction {
    key: u64,
    side: Side,
    release: DispatchAction,
}

/// Engine thresholds with times converted to ticks.
#[derive(Debug, Clone, Copy)]
struct Thresholds {
    dwell: u64,
    tap_click: u64,
    gesture_timeout: u64,
    gesture_max_frames: u32,
    swipe_window: u64,
    typing_grace: u64,
    drift_tolerance: f32,
    drag_distance: f32,
    swipe_distance: f32,
    pointer_gain: f32,
    snap: bool,
    default_policy: KeyPolicy,
}

impl Thresholds {
    fn new(config: &EngineConfig, tick_frequency: u64) -> Self {
        let ticks = |ms: u64| ((u128::from(ms) * u128::from(tick_frequency)) / 1000) as u64;
        Self {
            dwell: ticks(config.dwell_ms),
            tap_click: ticks(config.tap_click_ms),
            gesture_timeout: ticks(config.gesture_timeout_ms),
            gesture_max_frames: config.gesture_max_frames,
            swipe_window: ticks(config.swipe_window_ms),
            typing_grace: ticks(config.typing_grace_ms),
            drift_tolerance: config.drift_tolerance,
            drag_distance: config.drag_distance,
            swipe_distance: config.swipe_distance,
            pointer_gain: config.pointer_gain,
            snap: config.snap_enabled,
            default_policy: config.default_policy,
        }
    }
}

/// Gesture and typing state machine for one session.
#[derive(Debug)]
pub struct IntentEngine {
    limits: Thresholds,
    index: Arc<BindingIndex>,
    tracker: ContactTracker<ContactTrack>,

    mode: IntentMode,
    mode_side: Side,
    mode_since: u64,
    mode_frames: u32,
    candidate: Option<KeyCandidate>,
    pointer: Pointer,
    held: Vec<HeldAction>,

    typing_enabled: bool,
    typing_toggles: u64,
    base_layer: u8,
    momentary: Option<(u64, u8)>,
    chord: [bool; SIDE_SLOTS],
    swipe: [Swipe; SIDE_SLOTS],

    // Current frame
    frames: u64,
    now: u64,
    sequence: u64,

    transitions: u64,
    fingerprint: Fingerprint,
    lifecycle_skips: u64,
    lifecycle_backward: u64,

    // Scratch buffers reused across frames
    active: Vec<Active>,
    released: Vec<Released>,
}

impl IntentEngine {
    pub fn new(config: &EngineConfig, index: Arc<BindingIndex>, tick_frequency: u64) -> Self {
        Self {
            limits: Thresholds::new(config, tick_frequency),
            index,
            tracker: ContactTracker::with_capacity(MAX_CONTACTS * 2),
            mode: IntentMode::Idle,
            mode_side: Side::Unknown,
            mode_since: 0,
            mode_frames: 0,
            candidate: None,
            pointer: Pointer::default(),
            held: Vec::with_capacity(MAX_CONTACTS),
            typing_enabled: true,
            typing_toggles: 0,
            base_layer: 0,
            momentary: None,
            chord: [false; SIDE_SLOTS],
            swipe: [Swipe::default(); SIDE_SLOTS],
            frames: 0,
            now: 0,
            sequence: 0,
            transitions: 0,
            fingerprint: Fingerprint::new(),
            lifecycle_skips: 0,
            lifecycle_backward: 0,
            active: Vec::with_capacity(MAX_CONTACTS),
            released: Vec::with_capacity(MAX_CONTACTS * 2),
        }
    }

    /// Process one frame, appending any resulting events to `out`.
    ///
    /// Returns the number of events appended. A malformed frame is rejected
    /// with its drop reason before any engine state changes.
    pub fn process(
        &mut self,
        envelope: &FrameEnvelope,
        out: &mut Vec<DispatchEvent>,
    ) -> Result<usize, DropReason> {
        validate_frame(&envelope.frame)?;

        let start = out.len();
        self.frames += 1;
        self.now = envelope.frame.arrival_ticks;
        self.sequence = envelope.frame.sequence;

        let mut active = std::mem::take(&mut self.active);
        let mut released = std::mem::take(&mut self.released);
        active.clear();
        released.clear();

        self.observe(envelope, &mut active, &mut released);
        for lifted in &released {
            self.on_release(lifted, out);
        }
        self.update_groups(envelope.side, &mut active, out);
        self.step(envelope, &active, out);

        self.tracker.retain(|_, track| !track.ended);
        self.active = active;
        self.released = released;

        Ok(out.len() - start)
    }

    /// Replace the binding index between frames.
    pub fn set_index(&mut self, index: Arc<BindingIndex>) {
        self.index = index;
        // Candidate binding indices refer to the old layout.
        if let Some(candidate) = self.candidate.take() {
            self.set_role(candidate.key, Role::Gesture);
            if self.mode == IntentMode::KeyCandidate {
                self.transition(IntentMode::Idle);
            }
        }
        debug!(layout = self.index.name(), "binding index replaced");
    }

    pub fn mode(&self) -> IntentMode {
        self.mode
    }

    pub fn typing_enabled(&self) -> bool {
        self.typing_enabled
    }

    pub fn typing_toggles(&self) -> u64 {
        self.typing_toggles
    }

    pub fn chord_active(&self, side: Side) -> bool {
        self.chord[side.hint() as usize]
    }

    pub fn active_layer(&self) -> u8 {
        self.momentary.map(|(_, layer)| layer).unwrap_or(self.base_layer)
    }

    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint.value()
    }

    pub fn lifecycle_skips(&self) -> u64 {
        self.lifecycle_skips
    }

    pub fn lifecycle_backward(&self) -> u64 {
        self.lifecycle_backward
    }

    pub fn tracked_contacts(&self) -> usize {
        self.tracker.len()
    }

    pub fn tracker_growths(&self) -> u64 {
        self.tracker.growths()
    }

    pub fn tracker_capacity(&self) -> usize {
        self.tracker.capacity()
    }

    pub fn summary(&self) -> IntentSummary {
        IntentSummary {
            fingerprint: self.fingerprint.value(),
            transitions: self.transitions,
            mode: self.mode.name().to_string(),
            typing_enabled: self.typing_enabled,
            lifecycle_skips: self.lifecycle_skips,
            lifecycle_backward: self.lifecycle_backward,
        }
    }

    // --- Frame phases -----------------------------------------------------

    fn observe(
        &mut self,
        envelope: &FrameEnvelope,
        active: &mut Vec<Active>,
        released: &mut Vec<Released>,
    ) {
        let tag = envelope.device_index as u32;
        let stamp = self.frames;

        for contact in envelope.frame.contacts.iter() {
            let key = contact_key(tag, contact.id);
            if contact.state.is_terminal() && !self.tracker.contains(key) {
                continue;
            }

            let (track, existed) = self.tracker.upsert(key);
            if existed {
                let previous = track.state;
                if previous.is_backward(contact.state) {
                    self.lifecycle_backward += 1;
                } else if previous.steps_to(contact.state) > 1 {
                    self.lifecycle_skips += 1;
                }
            } else {
                *track = ContactTrack::default();
            }

            let down = contact.state.is_on_surface();
            let fresh = down && !track.down;
            track.state = contact.state;
            track.x = contact.x;
            track.y = contact.y;
            track.stamp = stamp;
            if fresh {
                track.down = true;
                track.origin_x = contact.x;
                track.origin_y = contact.y;
                track.role = Role::Free;
            } else if !down && track.down {
                track.down = false;
                released.push(Released {
                    key,
                    role: track.role,
                    x: contact.x,
                    y: contact.y,
                });
                track.role = Role::Free;
            }
            if contact.state.is_terminal() {
                track.ended = true;
            }
            if down {
                active.push(Active {
                    key,
                    x: contact.x,
                    y: contact.y,
                    role: track.role,
                    fresh,
                });
            }
        }

        // Contacts this device stopped reporting have ended.
        for (key, track) in self.tracker.iter_mut() {
            if key >> 32 != u64::from(tag) || track.stamp == stamp {
                continue;
            }
            track.ended = true;
            if track.down {
                track.down = false;
                released.push(Released {
                    key,
                    role: track.role,
                    x: track.x,
                    y: track.y,
                });
            }
        }
    }

    fn on_release(&mut self, lifted: &Released, out: &mut Vec<DispatchEvent>) {
        match lifted.role {
            Role::Held => self.release_held(lifted.key, out),
            Role::Layer => {
                if self.momentary.map(|(key, _)| key) == Some(lifted.key) {
                    self.momentary = None;
                }
            }
            Role::Candidate => self.resolve_lifted_candidate(lifted, out),
            _ => {}
        }
    }

    fn update_groups(&mut self, side: Side, active: &mut [Active], out: &mut Vec<DispatchEvent>) {
        let slot = side.hint() as usize;
        let count = active.len();

        if count == CHORD_CONTACTS {
            if !self.chord[slot] {
                self.chord[slot] = true;
                debug!(?side, "chordal shift engaged");
                self.claim_chord(side, active, out);
            }
        } else if self.chord[slot] {
            self.chord[slot] = false;
            debug!(?side, "chordal shift released");
            for contact in active.iter_mut().filter(|c| c.role == Role::Chord) {
                contact.role = Role::Gesture;
                self.set_role(contact.key, Role::Gesture);
            }
        }

        let mut toggle = false;
        let swipe = &mut self.swipe[slot];
        if count == SWIPE_CONTACTS {
            let centroid_x = active.iter().map(|c| c.x).sum::<f32>() / count as f32;
            if swipe.latched {
                // Same swipe still in progress.
            } else if !swipe.armed {
                swipe.armed = true;
                swipe.start_ticks = self.now;
                swipe.start_x = centroid_x;
            } else if self.now.saturating_sub(swipe.start_ticks) > self.limits.swipe_window {
                swipe.start_ticks = self.now;
                swipe.start_x = centroid_x;
            } else if (centroid_x - swipe.start_x).abs() >= self.limits.swipe_distance {
                swipe.armed = false;
                swipe.latched = true;
                toggle = true;
            }
        } else {
            *swipe = Swipe::default();
        }

        if toggle {
            self.set_typing(!self.typing_enabled, out);
            if self.mode == IntentMode::GestureCandidate {
                self.transition(IntentMode::Idle);
            }
        }
    }

    fn claim_chord(&mut self, side: Side, active: &mut [Active], out: &mut Vec<DispatchEvent>) {
        for contact in active.iter_mut() {
            if matches!(
                contact.role,
                Role::Free | Role::Candidate | Role::Mouse | Role::Gesture
            ) {
                contact.role = Role::Chord;
                self.set_role(contact.key, Role::Chord);
            }
        }
        if let Some(candidate) = self.candidate {
            if active.iter().any(|c| c.key == candidate.key) {
                self.candidate = None;
                self.transition(IntentMode::Idle);
            }
        }
        let pointer_mode = matches!(
            self.mode,
            IntentMode::MouseCandidate | IntentMode::MouseActive | IntentMode::GestureCandidate
        );
        if pointer_mode && self.mode_side == side {
            self.release_pointer_button(out);
            self.transition(IntentMode::Idle);
        }
    }

    fn step(&mut self, envelope: &FrameEnvelope, active: &[Active], out: &mut Vec<DispatchEvent>) {
        self.mode_frames = self.mode_frames.saturating_add(1);
        let side = envelope.side;
        let free = active.iter().filter(|c| c.role.is_free()).count();

        match self.mode {
            IntentMode::Idle => {
                if active.iter().any(|c| c.fresh && c.role == Role::Free) {
                    self.begin_intent(side, active, free);
                }
            }
            IntentMode::KeyCandidate => self.step_key_candidate(side, active, free, out),
            IntentMode::TypingCommitted => self.step_typing(side, active, free),
            IntentMode::MouseCandidate | IntentMode::MouseActive => {
                self.step_pointer(envelope, active, free, out)
            }
            IntentMode::GestureCandidate => self.step_gesture(side, active),
        }
    }

    // --- Mode handlers ----------------------------------------------------

    /// Classify fresh activity from `Idle` or `TypingCommitted`.
    fn begin_intent(&mut self, side: Side, active: &[Active], free: usize) {
        if free >= 3 {
            self.begin_gesture(side, active);
            return;
        }
        let Some(fresh) = active.iter().find(|c| c.fresh && c.role == Role::Free).copied() else {
            return;
        };
        if free == 1 {
            if let Some(binding) = self.key_at(fresh.x, fresh.y, side) {
                self.begin_key_candidate(fresh, binding, side);
                return;
            }
        }
        self.begin_pointer(side, active);
    }

    fn step_key_candidate(
        &mut self,
        side: Side,
        active: &[Active],
        free: usize,
        out: &mut Vec<DispatchEvent>,
    ) {
        let Some(candidate) = self.candidate else {
            self.transition(IntentMode::Idle);
            return;
        };

        if let Some(fresh) = active.iter().find(|c| c.fresh && c.role == Role::Free).copied() {
            if side == candidate.side && free >= 3 {
                self.candidate = None;
                self.begin_gesture(side, active);
                return;
            }
            if let Some(binding) = self.key_at(fresh.x, fresh.y, side) {
                // Rollover: the pending key resolves as if lifted now.
                self.resolve_candidate_now(&candidate, out);
                self.begin_key_candidate(fresh, binding, side);
                return;
            }
            if side == candidate.side {
                self.candidate = None;
                self.begin_pointer(side, active);
                return;
            }
            // Non-key touch on the other pad starts its own intent.
            self.resolve_candidate_now(&candidate, out);
            self.begin_intent(side, active, free);
            return;
        }

        if self.candidate_drifted(&candidate) {
            self.candidate = None;
            self.set_role(candidate.key, Role::Gesture);
            self.transition(IntentMode::Idle);
        } else if self.now.saturating_sub(candidate.start_ticks) >= self.limits.dwell {
            self.candidate = None;
            self.commit_hold(&candidate, out);
            self.transition(IntentMode::TypingCommitted);
        }
    }

    /// Settle a pending key that another touch interrupted.
    fn resolve_candidate_now(&mut self, candidate: &KeyCandidate, out: &mut Vec<DispatchEvent>) {
        self.candidate = None;
        self.set_role(candidate.key, Role::Gesture);
        if candidate.policy == KeyPolicy::Tap && !self.candidate_drifted(candidate) {
            self.press_tap(candidate.binding, candidate.side, out);
        }
    }

    fn step_typing(&mut self, side: Side, active: &[Active], free: usize) {
        if active.iter().any(|c| c.fresh && c.role == Role::Free) {
            self.begin_intent(side, active, free);
            return;
        }
        let lapsed = self.now.saturating_sub(self.mode_since) >= self.limits.typing_grace;
        if lapsed && self.free_contacts() == 0 {
            self.transition(IntentMode::Idle);
        }
    }

    fn step_pointer(
        &mut self,
        envelope: &FrameEnvelope,
        active: &[Active],
        free: usize,
        out: &mut Vec<DispatchEvent>,
    ) {
        if envelope.side != self.pointer.side {
            return;
        }
        if free >= 3 {
            self.release_pointer_button(out);
            self.begin_gesture(envelope.side, active);
            return;
        }

        if free == 0 {
            let pointer = self.pointer;
            let quick = self.now.saturating_sub(pointer.start_ticks) <= self.limits.tap_click;
            let still = pointer.travel < self.limits.drag_distance;
            if self.mode == IntentMode::MouseCandidate && quick && still && !pointer.button_down {
                let button = if pointer.max_contacts >= 2 {
                    MouseButton::Right
                } else {
                    MouseButton::Left
                };
                self.emit(out, envelope.side, DispatchAction::MouseClick { button });
            }
            self.release_pointer_button(out);
            self.transition(IntentMode::Idle);
            return;
        }

        for contact in active.iter().filter(|c| c.fresh && c.role == Role::Free) {
            self.set_role(contact.key, Role::Mouse);
        }

        let (cx, cy) = centroid(active.iter().filter(|c| c.role.is_free()));
        if free != self.pointer.contacts {
            // Finger count changed; re-anchor instead of jumping.
            self.pointer.contacts = free;
            self.pointer.max_contacts = self.pointer.max_contacts.max(free);
        } else {
            let dx = cx - self.pointer.last_x;
            let dy = cy - self.pointer.last_y;
            self.pointer.travel += (dx * dx + dy * dy).sqrt();
            if self.mode == IntentMode::MouseCandidate
                && self.pointer.travel >= self.limits.drag_distance
            {
                self.transition(IntentMode::MouseActive);
            }
            if self.mode == IntentMode::MouseActive && (dx != 0.0 || dy != 0.0) {
                let gain = self.limits.pointer_gain;
                self.emit(
                    out,
                    envelope.side,
                    DispatchAction::MouseMove {
                        dx: dx * gain,
                        dy: dy * gain,
                    },
                );
            }
        }
        self.pointer.last_x = cx;
        self.pointer.last_y = cy;

        let pressed = envelope.frame.button_pressed;
        if pressed && !self.pointer.button_down {
            self.pointer.button_down = true;
            self.emit(
                out,
                envelope.side,
                DispatchAction::MouseDown {
                    button: MouseButton::Left,
                },
            );
            if self.mode == IntentMode::MouseCandidate {
                self.transition(IntentMode::MouseActive);
            }
        } else if !pressed && self.pointer.button_down {
            self.release_pointer_button(out);
        }
    }

    fn step_gesture(&mut self, side: Side, active: &[Active]) {
        if side == self.mode_side {
            for contact in active.iter().filter(|c| c.role.is_free()) {
                self.set_role(contact.key, Role::Gesture);
            }
        }
        let owned = self
            .tracker
            .iter()
            .filter(|(_, t)| t.down && t.role == Role::Gesture)
            .count();
        let expired = self.mode_frames >= self.limits.gesture_max_frames
            || self.now.saturating_sub(self.mode_since) >= self.limits.gesture_timeout;
        if expired || owned == 0 {
            self.transition(IntentMode::Idle);
        }
    }

    // --- Intent starts ----------------------------------------------------

    fn begin_key_candidate(&mut self, contact: Active, binding: usize, side: Side) {
        let policy = self
            .index
            .binding(binding)
            .and_then(|b| b.policy)
            .unwrap_or(self.limits.default_policy);
        let (origin_x, origin_y) = self
            .tracker
            .get(contact.key)
            .map(|t| (t.origin_x, t.origin_y))
            .unwrap_or((contact.x, contact.y));
        self.candidate = Some(KeyCandidate {
            key: contact.key,
            binding,
            side,
            start_ticks: self.now,
            origin_x,
            origin_y,
            policy,
        });
        self.set_role(contact.key, Role::Candidate);
        self.mode_side = side;
        self.transition(IntentMode::KeyCandidate);
    }

    fn begin_pointer(&mut self, side: Side, active: &[Active]) {
        let mut count = 0;
        for contact in active.iter().filter(|c| c.role.is_free()) {
            self.set_role(contact.key, Role::Mouse);
            count += 1;
        }
        let (cx, cy) = centroid(active.iter().filter(|c| c.role.is_free()));
        self.pointer = Pointer {
            side,
            start_ticks: self.now,
            last_x: cx,
            last_y: cy,
            contacts: count,
            max_contacts: count,
            travel: 0.0,
            button_down: false,
        };
        self.mode_side = side;
        self.transition(IntentMode::MouseCandidate);
    }

    fn begin_gesture(&mut self, side: Side, active: &[Active]) {
        for contact in active.iter().filter(|c| c.role.is_free()) {
            self.set_role(contact.key, Role::Gesture);
        }
        self.mode_side = side;
        self.transition(IntentMode::GestureCandidate);
    }

    // --- Key resolution ---------------------------------------------------

    fn resolve_lifted_candidate(&mut self, lifted: &Released, out: &mut Vec<DispatchEvent>) {
        let Some(candidate) = self.candidate else {
            return;
        };
        if candidate.key != lifted.key {
            return;
        }
        self.candidate = None;

        let dx = lifted.x - candidate.origin_x;
        let dy = lifted.y - candidate.origin_y;
        if (dx * dx + dy * dy).sqrt() > self.limits.drift_tolerance {
            self.transition(IntentMode::Idle);
            return;
        }

        let dwelled = self.now.saturating_sub(candidate.start_ticks) >= self.limits.dwell;
        match candidate.policy {
            KeyPolicy::Tap => {
                self.press_tap(candidate.binding, candidate.side, out);
                self.transition(IntentMode::TypingCommitted);
            }
            KeyPolicy::Hold if dwelled => {
                // Dwell passed between frames: press and release at once.
                match self.commit_hold(&candidate, out) {
                    Role::Held => self.release_held(candidate.key, out),
                    Role::Layer => self.momentary = None,
                    _ => {}
                }
                self.transition(IntentMode::TypingCommitted);
            }
            KeyPolicy::Hold => self.transition(IntentMode::Idle),
        }
    }

    fn candidate_drifted(&self, candidate: &KeyCandidate) -> bool {
        match self.tracker.get(candidate.key) {
            Some(track) if track.down => {
                let dx = track.x - candidate.origin_x;
                let dy = track.y - candidate.origin_y;
                (dx * dx + dy * dy).sqrt() > self.limits.drift_tolerance
            }
            _ => false,
        }
    }

    fn press_tap(&mut self, binding: usize, side: Side, out: &mut Vec<DispatchEvent>) {
        let Some((action, modifiers)) = self.index.binding(binding).map(|b| (b.action, b.modifiers))
        else {
            return;
        };
        match action {
            Action::Key(code) => {
                self.emit(out, side, DispatchAction::KeyDown { code, modifiers });
                self.emit(out, side, DispatchAction::KeyUp { code, modifiers });
            }
            Action::Mouse(button) => self.emit(out, side, DispatchAction::MouseClick { button }),
            Action::LayerToggle(layer) => self.toggle_layer(layer),
            Action::LayerMomentary(_) => {}
        }
    }

    /// Press the binding's hold action (or its primary one) and keep it down.
    fn commit_hold(&mut self, candidate: &KeyCandidate, out: &mut Vec<DispatchEvent>) -> Role {
        let Some((action, modifiers)) = self
            .index
            .binding(candidate.binding)
            .map(|b| (b.hold.unwrap_or(b.action), b.modifiers))
        else {
            return Role::Gesture;
        };
        let side = candidate.side;
        let role = match action {
            Action::Key(code) => {
                self.emit(out, side, DispatchAction::KeyDown { code, modifiers });
                self.hold(candidate.key, side, DispatchAction::KeyUp { code, modifiers });
                Role::Held
            }
            Action::Mouse(button) => {
                self.emit(out, side, DispatchAction::MouseDown { button });
                self.hold(candidate.key, side, DispatchAction::MouseUp { button });
                Role::Held
            }
            Action::LayerMomentary(layer) => {
                self.momentary = Some((candidate.key, layer));
                Role::Layer
            }
            Action::LayerToggle(layer) => {
                self.toggle_layer(layer);
                Role::Gesture
            }
        };
        self.set_role(candidate.key, role);
        role
    }

    fn hold(&mut self, key: u64, side: Side, release: DispatchAction) {
        self.held.push(HeldAction { key, side, release });
    }

    fn release_held(&mut self, key: u64, out: &mut Vec<DispatchEvent>) {
        if let Some(position) = self.held.iter().position(|h| h.key == key) {
            let held = self.held.remove(position);
            self.emit(out, held.side, held.release);
        }
    }

    fn release_pointer_button(&mut self, out: &mut Vec<DispatchEvent>) {
        if self.pointer.button_down {
            self.pointer.button_down = false;
            let side = self.pointer.side;
            self.emit(
                out,
                side,
                DispatchAction::MouseUp {
                    button: MouseButton::Left,
                },
            );
        }
    }

    fn toggle_layer(&mut self, layer: u8) {
        self.base_layer = if self.base_layer == layer { 0 } else { layer };
        debug!(layer = self.base_layer, "layer toggled");
    }

    fn set_typing(&mut self, enabled: bool, out: &mut Vec<DispatchEvent>) {
        if self.typing_enabled == enabled {
            return;
        }
        self.typing_enabled = enabled;
        self.typing_toggles += 1;
        debug!(enabled, "typing toggled");

        if !enabled {
            let mut held = std::mem::take(&mut self.held);
            for h in &held {
                self.emit(out, h.side, h.release);
                self.set_role(h.key, Role::Gesture);
            }
            held.clear();
            self.held = held;
            if let Some((key, _)) = self.momentary.take() {
                self.set_role(key, Role::Gesture);
            }
            if let Some(candidate) = self.candidate.take() {
                self.set_role(candidate.key, Role::Gesture);
            }
            if matches!(self.mode, IntentMode::KeyCandidate | IntentMode::TypingCommitted) {
                self.transition(IntentMode::Idle);
            }
        }
    }

    // --- Helpers ----------------------------------------------------------

    /// Key binding under a contact, honoring layer and chordal shift.
    fn key_at(&self, x: f32, y: f32, side: Side) -> Option<usize> {
        if !self.typing_enabled {
            return None;
        }
        let substitute = side != Side::Unknown && self.chord[side.opposite().hint() as usize];
        let probe = Probe::at(x, y, side)
            .on_layer(self.active_layer())
            .substituted(substitute)
            .snapping(self.limits.snap);
        let hit = self.index.lookup(&probe)?;
        let binding = self.index.binding(hit.index)?;
        binding.is_key().then_some(hit.index)
    }

    fn free_contacts(&self) -> usize {
        self.tracker
            .iter()
            .filter(|(_, t)| t.down && t.role.is_free())
            .count()
    }

    fn set_role(&mut self, key: u64, role: Role) {
        if let Some(track) = self.tracker.get_mut(key) {
            track.role = role;
        }
    }

    fn emit(&self, out: &mut Vec<DispatchEvent>, side: Side, action: DispatchAction) {
        out.push(DispatchEvent {
            sequence: self.sequence,
            ticks: self.now,
            side,
            action,
        });
    }

    fn transition(&mut self, to: IntentMode) {
        if self.mode == to {
            self.mode_since = self.now;
            return;
        }
        trace!(from = self.mode.name(), to = to.name(), seq = self.sequence, "intent transition");
        self.fingerprint.write_u8(self.mode.code());
        self.fingerprint.write_u8(to.code());
        self.fingerprint.write_u64(self.sequence);
        self.transitions += 1;
        self.mode = to;
        self.mode_since = self.now;
        self.mode_frames = 0;
    }
}

fn centroid<'a>(contacts: impl Iterator<Item = &'a Active>) -> (f32, f32) {
    let (mut sx, mut sy, mut n) = (0.0f32, 0.0f32, 0usize);
    for c in contacts {
        sx += c.x;
        sy += c.y;
        n += 1;
    }
    if n == 0 {
        (0.0, 0.0)
    } else {
        (sx / n as f32, sy / n as f32)
    }
}
