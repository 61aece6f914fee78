//! Frame assembly: platform-decoded contact updates in, canonical frames out.
//!
//! Backends decode device bytes into [`ContactUpdate`]s (evdev-style slot
//! updates, possibly interleaved with legacy single-contact fields). The
//! assembler folds them into per-slot state and emits one [`Frame`] per
//! [`ContactUpdate::Sync`]. Anything it cannot turn into a valid frame is
//! classified as a [`DropReason`] and counted; it never returns an error.

use crate::collector::types::{
    AxisExtents, Contact, ContactState, DeviceDescriptor, DeviceProfile, Frame, FrameEnvelope,
    MAX_CONTACTS,
};
use crate::transparency::SharedDiagnostics;
use tracing::trace;

/// HID usage page for digitizers.
pub const USAGE_PAGE_DIGITIZER: u16 = 0x0D;
/// Digitizer usage: touch screen.
pub const USAGE_TOUCH_SCREEN: u16 = 0x04;
/// Digitizer usage: touch pad.
pub const USAGE_TOUCH_PAD: u16 = 0x05;
/// Largest input report any supported device produces.
pub const MAX_REPORT_LEN: usize = 1024;

/// Upper bound on protocol slots tracked per device.
const MAX_SLOTS: usize = MAX_CONTACTS;

/// Why a frame was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// Report is not a multitouch digitizer report
    NonMultitouch,
    /// Report or frame content could not be interpreted
    ParseFailure,
    /// Frame came from a device no session is bound to
    NoSession,
    /// Report shorter than it declares
    Truncated,
    /// Declared report size is impossible
    InvalidReportSize,
    /// Processing queue was full; newest frame dropped
    QueueFull,
}

impl DropReason {
    pub const COUNT: usize = 6;

    pub const ALL: [DropReason; DropReason::COUNT] = [
        DropReason::NonMultitouch,
        DropReason::ParseFailure,
        DropReason::NoSession,
        DropReason::Truncated,
        DropReason::InvalidReportSize,
        DropReason::QueueFull,
    ];

    pub fn index(self) -> usize {
        match self {
            DropReason::NonMultitouch => 0,
            DropReason::ParseFailure => 1,
            DropReason::NoSession => 2,
            DropReason::Truncated => 3,
            DropReason::InvalidReportSize => 4,
            DropReason::QueueFull => 5,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DropReason::NonMultitouch => "nonMultitouch",
            DropReason::ParseFailure => "parseFailure",
            DropReason::NoSession => "routedToNoSession",
            DropReason::Truncated => "packetTruncated",
            DropReason::InvalidReportSize => "invalidReportSize",
            DropReason::QueueFull => "engineQueueFull",
        }
    }
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Report-level facts a backend knows before decoding contacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportInfo {
    pub usage_page: u16,
    pub usage: u16,
    /// Length the report descriptor promises
    pub declared_len: usize,
    /// Bytes actually received
    pub actual_len: usize,
}

impl ReportInfo {
    /// Report info for a device whose reports are always well-formed at this
    /// layer (evdev delivers decoded events, not raw reports).
    pub fn decoded(descriptor: &DeviceDescriptor) -> Self {
        Self {
            usage_page: descriptor.usage_page,
            usage: descriptor.usage,
            declared_len: 1,
            actual_len: 1,
        }
    }
}

/// Classify a report before any of its contacts are interpreted.
pub fn classify_report(info: &ReportInfo) -> Result<(), DropReason> {
    let multitouch = info.usage_page == USAGE_PAGE_DIGITIZER
        && (info.usage == USAGE_TOUCH_PAD || info.usage == USAGE_TOUCH_SCREEN);
    if !multitouch {
        return Err(DropReason::NonMultitouch);
    }
    if info.declared_len == 0 || info.declared_len > MAX_REPORT_LEN {
        return Err(DropReason::InvalidReportSize);
    }
    if info.actual_len < info.declared_len {
        return Err(DropReason::Truncated);
    }
    if info.actual_len > info.declared_len {
        return Err(DropReason::InvalidReportSize);
    }
    Ok(())
}

/// Validate an already-assembled frame (live or decoded from a capture).
pub fn validate_frame(frame: &Frame) -> Result<(), DropReason> {
    if frame.sequence == 0 {
        return Err(DropReason::ParseFailure);
    }
    if frame.contacts.has_duplicate_ids() {
        return Err(DropReason::ParseFailure);
    }
    let finite = frame
        .contacts
        .iter()
        .all(|c| c.x.is_finite() && c.y.is_finite());
    if !finite {
        return Err(DropReason::ParseFailure);
    }
    Ok(())
}

/// One decoded field update from a platform backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactUpdate {
    /// Select the protocol slot subsequent slot updates apply to
    Slot(i32),
    /// Tracking id for the current slot; `-1` releases the slot
    TrackingId(i32),
    PositionX(i32),
    PositionY(i32),
    Pressure(i32),
    TouchMajor(i32),
    TouchMinor(i32),
    Orientation(i32),
    /// Legacy single-contact fields
    LegacyX(i32),
    LegacyY(i32),
    LegacyPressure(i32),
    LegacyTouch(bool),
    /// Physical button
    Button(bool),
    /// Logical update boundary
    Sync,
    /// Backend lost events; everything up to the next sync is unreliable
    Overflow,
}

#[derive(Debug, Clone, Copy, Default)]
struct SlotState {
    /// -1 when the slot is free
    tracking_id: i32,
    x: i32,
    y: i32,
    pressure: i32,
    major: i32,
    minor: i32,
    orientation: i32,
    /// Reported at least once since the tracking id was assigned
    reported: bool,
    /// Tracking id was released since the last sync
    released: bool,
}

impl SlotState {
    fn free() -> Self {
        Self {
            tracking_id: -1,
            ..Self::default()
        }
    }

    fn is_active(&self) -> bool {
        self.tracking_id >= 0
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct LegacyState {
    x: i32,
    y: i32,
    pressure: i32,
    touching: bool,
    reported: bool,
    released: bool,
}

/// Contact id used for the legacy single-contact fallback.
pub const LEGACY_CONTACT_ID: i32 = 0;

/// Folds one device's update stream into frames.
#[derive(Debug)]
pub struct FrameAssembler {
    descriptor: DeviceDescriptor,
    slots: [SlotState; MAX_SLOTS],
    current_slot: usize,
    legacy: LegacyState,
    button: bool,
    sequence: u64,
    /// Current update group is unusable; drop it at the next sync
    corrupt: bool,
    /// Backend overflow; drop everything up to the next sync
    overflowed: bool,
    diagnostics: SharedDiagnostics,
}

impl FrameAssembler {
    pub fn new(descriptor: DeviceDescriptor, diagnostics: SharedDiagnostics) -> Self {
        Self {
            descriptor,
            slots: [SlotState::free(); MAX_SLOTS],
            current_slot: 0,
            legacy: LegacyState::default(),
            button: false,
            sequence: 0,
            corrupt: false,
            overflowed: false,
            diagnostics,
        }
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn extents(&self) -> AxisExtents {
        self.descriptor.extents
    }

    /// Frames emitted so far.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Feed one update. Returns a frame at each valid update boundary.
    pub fn push(&mut self, update: ContactUpdate, arrival_ticks: u64) -> Option<FrameEnvelope> {
        match update {
            ContactUpdate::Sync => return self.sync(arrival_ticks),
            ContactUpdate::Overflow => self.overflowed = true,
            ContactUpdate::Button(pressed) => self.button = pressed,
            ContactUpdate::LegacyX(v) => self.legacy.x = v,
            ContactUpdate::LegacyY(v) => self.legacy.y = v,
            ContactUpdate::LegacyPressure(v) => self.legacy.pressure = v,
            ContactUpdate::LegacyTouch(down) => {
                if self.legacy.touching && !down {
                    self.legacy.released = true;
                }
                if down && !self.legacy.touching {
                    self.legacy.reported = false;
                }
                self.legacy.touching = down;
            }
            slot_update => {
                if matches!(self.descriptor.profile, DeviceProfile::MultiSlot { .. }) {
                    self.apply_slot_update(slot_update);
                }
            }
        }
        None
    }

    /// Discard in-flight state after the caller dropped the current report.
    pub fn discard_pending(&mut self) {
        self.corrupt = false;
        self.overflowed = false;
    }

    fn slot_limit(&self) -> usize {
        match self.descriptor.profile {
            DeviceProfile::MultiSlot { slots } => (slots as usize).min(MAX_SLOTS),
            DeviceProfile::Legacy => 0,
        }
    }

    fn apply_slot_update(&mut self, update: ContactUpdate) {
        if let ContactUpdate::Slot(index) = update {
            match usize::try_from(index) {
                Ok(index) if index < self.slot_limit() => self.current_slot = index,
                _ => self.corrupt = true,
            }
            return;
        }
        let Some(slot) = self.slots.get_mut(self.current_slot) else {
            self.corrupt = true;
            return;
        };
        match update {
            ContactUpdate::TrackingId(id) => {
                if id < 0 {
                    if slot.is_active() {
                        slot.released = true;
                    }
                } else if id != slot.tracking_id {
                    *slot = SlotState {
                        tracking_id: id,
                        x: slot.x,
                        y: slot.y,
                        ..SlotState::default()
                    };
                }
            }
            ContactUpdate::PositionX(v) => slot.x = v,
            ContactUpdate::PositionY(v) => slot.y = v,
            ContactUpdate::Pressure(v) => slot.pressure = v,
            ContactUpdate::TouchMajor(v) => slot.major = v,
            ContactUpdate::TouchMinor(v) => slot.minor = v,
            ContactUpdate::Orientation(v) => slot.orientation = v,
            _ => {}
        }
    }

    fn sync(&mut self, arrival_ticks: u64) -> Option<FrameEnvelope> {
        self.diagnostics.record_seen();

        if self.overflowed {
            self.overflowed = false;
            self.corrupt = false;
            self.retire_released();
            self.diagnostics.record_drop(DropReason::Truncated);
            trace!(device = self.descriptor.index, "dropping frame after overflow");
            return None;
        }
        if self.corrupt {
            self.corrupt = false;
            self.retire_released();
            self.diagnostics.record_drop(DropReason::ParseFailure);
            return None;
        }

        let mut frame = Frame::new(self.sequence + 1, arrival_ticks);
        frame.device_id = u64::from(self.descriptor.hash);
        frame.button_pressed = self.button;
        frame.extents = self.descriptor.extents;

        let extents = self.descriptor.extents;
        let mut overflow = false;
        let mut any_slot = false;
        for slot in self.slots.iter_mut().filter(|s| s.is_active()) {
            any_slot = true;
            let state = if slot.released {
                ContactState::Leaving
            } else if slot.reported {
                ContactState::Touching
            } else {
                ContactState::Making
            };
            let contact = Contact {
                id: slot.tracking_id,
                x: extents.normalize_x(slot.x),
                y: extents.normalize_y(slot.y),
                total: slot.pressure as f32,
                pressure: slot.pressure as f32,
                major_axis: slot.major as f32,
                minor_axis: slot.minor as f32,
                angle: slot.orientation as f32,
                density: 0.0,
                state,
            };
            overflow |= !frame.contacts.push(contact);
            slot.reported = true;
        }

        // Legacy fields stand in only when no slot is reporting.
        let legacy_live = self.legacy.touching || self.legacy.released;
        if !any_slot && legacy_live {
            let state = if self.legacy.released {
                ContactState::Leaving
            } else if self.legacy.reported {
                ContactState::Touching
            } else {
                ContactState::Making
            };
            let contact = Contact {
                id: LEGACY_CONTACT_ID,
                x: extents.normalize_x(self.legacy.x),
                y: extents.normalize_y(self.legacy.y),
                total: self.legacy.pressure as f32,
                pressure: self.legacy.pressure as f32,
                state,
                ..Contact::default()
            };
            overflow |= !frame.contacts.push(contact);
        }
        if legacy_live {
            self.legacy.reported = true;
        }
        self.retire_released();

        if overflow {
            self.diagnostics.record_drop(DropReason::ParseFailure);
            return None;
        }
        if let Err(reason) = validate_frame(&frame) {
            self.diagnostics.record_drop(reason);
            return None;
        }

        self.sequence = frame.sequence;
        self.diagnostics.record_parsed();
        Some(FrameEnvelope::new(
            self.descriptor.side,
            self.descriptor.index,
            frame,
        ))
    }

    fn retire_released(&mut self) {
        for slot in self.slots.iter_mut().filter(|s| s.released) {
            *slot = SlotState::free();
        }
        if self.legacy.released {
            self.legacy.released = false;
            self.legacy.reported = false;
        }
    }
}
