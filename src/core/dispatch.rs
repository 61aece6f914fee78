//! Semantic output events and the sink boundary.
//!
//! The engine appends [`DispatchEvent`]s to a caller-owned buffer; the session
//! then offers them, in order, to a [`DispatchSink`]. Translating an action to
//! a native injection primitive is the sink's business.

use crate::collector::types::Side;
use crate::core::bindings::Modifiers;
use crate::replay::fingerprint::Fingerprint;
use crossbeam_channel::{Sender, TrySendError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl MouseButton {
    fn code(self) -> u8 {
        match self {
            MouseButton::Left => 0,
            MouseButton::Right => 1,
            MouseButton::Middle => 2,
        }
    }
}

/// Platform-neutral action. Key codes are HID keyboard usages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DispatchAction {
    KeyDown { code: u16, modifiers: Modifiers },
    KeyUp { code: u16, modifiers: Modifiers },
    /// Relative pointer motion in normalized pad units, scaled by pointer gain
    MouseMove { dx: f32, dy: f32 },
    MouseDown { button: MouseButton },
    MouseUp { button: MouseButton },
    MouseClick { button: MouseButton },
}

impl DispatchAction {
    fn write_fingerprint(&self, fp: &mut Fingerprint) {
        match *self {
            DispatchAction::KeyDown { code, modifiers } => {
                fp.write_u8(1);
                fp.write_u16(code);
                fp.write_u8(modifiers.bits());
            }
            DispatchAction::KeyUp { code, modifiers } => {
                fp.write_u8(2);
                fp.write_u16(code);
                fp.write_u8(modifiers.bits());
            }
            DispatchAction::MouseMove { dx, dy } => {
                fp.write_u8(3);
                fp.write_f32(dx);
                fp.write_f32(dy);
            }
            DispatchAction::MouseDown { button } => {
                fp.write_u8(4);
                fp.write_u8(button.code());
            }
            DispatchAction::MouseUp { button } => {
                fp.write_u8(5);
                fp.write_u8(button.code());
            }
            DispatchAction::MouseClick { button } => {
                fp.write_u8(6);
                fp.write_u8(button.code());
            }
        }
    }
}

/// One action computed from one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchEvent {
    /// Sequence number of the frame that produced the event
    pub sequence: u64,
    pub ticks: u64,
    pub side: Side,
    pub action: DispatchAction,
}

impl DispatchEvent {
    pub fn write_fingerprint(&self, fp: &mut Fingerprint) {
        fp.write_u64(self.sequence);
        fp.write_u64(self.ticks);
        fp.write_u8(self.side.hint());
        self.action.write_fingerprint(fp);
    }
}

/// What a sink did with an offered event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Enqueued,
    Suppressed,
}

/// Consumer of engine output (platform injector, recorder).
pub trait DispatchSink: Send {
    fn offer(&mut self, event: &DispatchEvent) -> Delivery;
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Vec<DispatchEvent>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[DispatchEvent] {
        &self.events
    }

    pub fn take(&mut self) -> Vec<DispatchEvent> {
        std::mem::take(&mut self.events)
    }
}

impl DispatchSink for RecordingSink {
    fn offer(&mut self, event: &DispatchEvent) -> Delivery {
        self.events.push(*event);
        Delivery::Enqueued
    }
}

/// Hands events to an injector thread. A full channel suppresses the event.
#[derive(Debug)]
pub struct ChannelSink {
    sender: Sender<DispatchEvent>,
}

impl ChannelSink {
    pub fn new(sender: Sender<DispatchEvent>) -> Self {
        Self { sender }
    }
}

impl DispatchSink for ChannelSink {
    fn offer(&mut self, event: &DispatchEvent) -> Delivery {
        match self.sender.try_send(*event) {
            Ok(()) => Delivery::Enqueued,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                Delivery::Suppressed
            }
        }
    }
}

/// Running dispatch counters and fingerprint.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchLedger {
    fingerprint: Fingerprint,
    events: u64,
    enqueued: u64,
    suppressed: u64,
}

impl DispatchLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: &DispatchEvent, delivery: Delivery) {
        event.write_fingerprint(&mut self.fingerprint);
        self.events += 1;
        match delivery {
            Delivery::Enqueued => self.enqueued += 1,
            Delivery::Suppressed => self.suppressed += 1,
        }
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint.value()
    }

    pub fn events(&self) -> u64 {
        self.events
    }

    pub fn enqueued(&self) -> u64 {
        self.enqueued
    }

    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }
}
