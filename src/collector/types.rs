//! Canonical contact and frame types.
//!
//! Everything downstream of the assembler (engine, replay, capture writer) sees
//! only these types. Frames are fixed-size so that they can travel through the
//! device queues without allocating.

use serde::{Deserialize, Serialize};

/// Upper bound on contacts carried by a single frame.
pub const MAX_CONTACTS: usize = 20;

/// Canonical contact lifecycle, in canonical order.
///
/// The numeric value is the capture-format state code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[repr(u8)]
pub enum ContactState {
    #[default]
    NotTouching = 0,
    Starting = 1,
    Hovering = 2,
    Making = 3,
    Touching = 4,
    Breaking = 5,
    Lingering = 6,
    Leaving = 7,
}

impl ContactState {
    pub const ALL: [ContactState; 8] = [
        ContactState::NotTouching,
        ContactState::Starting,
        ContactState::Hovering,
        ContactState::Making,
        ContactState::Touching,
        ContactState::Breaking,
        ContactState::Lingering,
        ContactState::Leaving,
    ];

    /// Decode a capture state code. Codes above 7 are invalid.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// The finger is pressed on the surface.
    pub fn is_on_surface(self) -> bool {
        matches!(self, ContactState::Making | ContactState::Touching)
    }

    /// Observing this state ends the contact's tracking.
    pub fn is_terminal(self) -> bool {
        matches!(self, ContactState::NotTouching | ContactState::Leaving)
    }

    /// Forward distance around the canonical cycle from `self` to `next`.
    ///
    /// `1` is a canonical step, `0` means no change, anything larger skipped
    /// intermediate states.
    pub fn steps_to(self, next: ContactState) -> u8 {
        (next.code() + 8 - self.code()) % 8
    }

    /// `next` lies earlier in the cycle without wrapping through `NotTouching`.
    pub fn is_backward(self, next: ContactState) -> bool {
        next != ContactState::NotTouching && next.code() < self.code()
    }

    pub fn name(self) -> &'static str {
        match self {
            ContactState::NotTouching => "notTouching",
            ContactState::Starting => "starting",
            ContactState::Hovering => "hovering",
            ContactState::Making => "making",
            ContactState::Touching => "touching",
            ContactState::Breaking => "breaking",
            ContactState::Lingering => "lingering",
            ContactState::Leaving => "leaving",
        }
    }
}

/// Which physical trackpad a device, contact or binding belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    #[default]
    Unknown,
    Left,
    Right,
}

impl Side {
    /// Decode the capture-format side hint (0 unknown, 1 left, 2 right).
    pub fn from_hint(hint: u8) -> Self {
        match hint {
            1 => Side::Left,
            2 => Side::Right,
            _ => Side::Unknown,
        }
    }

    pub fn hint(self) -> u8 {
        match self {
            Side::Unknown => 0,
            Side::Left => 1,
            Side::Right => 2,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
            Side::Unknown => Side::Unknown,
        }
    }

    /// Slot in per-side arrays; `Unknown` has none.
    pub fn index(self) -> Option<usize> {
        match self {
            Side::Left => Some(0),
            Side::Right => Some(1),
            Side::Unknown => None,
        }
    }
}

/// One tracked finger as seen in a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Contact {
    /// Identifier, unique within one device's frame
    pub id: i32,
    /// Normalized position (0.0..=1.0)
    pub x: f32,
    pub y: f32,
    /// Total capacitance
    pub total: f32,
    pub pressure: f32,
    pub major_axis: f32,
    pub minor_axis: f32,
    pub angle: f32,
    /// Area density of capacitance
    pub density: f32,
    pub state: ContactState,
}

impl Contact {
    pub fn new(id: i32, x: f32, y: f32, state: ContactState) -> Self {
        Self {
            id,
            x,
            y,
            state,
            ..Self::default()
        }
    }
}

/// Raw axis range a device reports; used to normalize positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisExtents {
    pub min_x: i32,
    pub max_x: i32,
    pub min_y: i32,
    pub max_y: i32,
}

impl AxisExtents {
    /// Extents of frames whose positions are already normalized (replay).
    pub const NORMALIZED: AxisExtents = AxisExtents {
        min_x: 0,
        max_x: 1,
        min_y: 0,
        max_y: 1,
    };

    pub fn new(min_x: i32, max_x: i32, min_y: i32, max_y: i32) -> Self {
        Self {
            min_x,
            max_x,
            min_y,
            max_y,
        }
    }

    pub fn normalize_x(&self, raw: i32) -> f32 {
        normalize(raw, self.min_x, self.max_x)
    }

    pub fn normalize_y(&self, raw: i32) -> f32 {
        normalize(raw, self.min_y, self.max_y)
    }
}

impl Default for AxisExtents {
    fn default() -> Self {
        Self::NORMALIZED
    }
}

fn normalize(raw: i32, min: i32, max: i32) -> f32 {
    if max <= min {
        return 0.0;
    }
    let span = (max as f64) - (min as f64);
    (((raw as f64) - (min as f64)) / span).clamp(0.0, 1.0) as f32
}

/// Fixed-capacity contact list carried by a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactSet {
    items: [Contact; MAX_CONTACTS],
    len: usize,
}

impl ContactSet {
    pub fn new() -> Self {
        Self {
            items: [Contact::default(); MAX_CONTACTS],
            len: 0,
        }
    }

    /// Append a contact. Returns `false` (and drops it) when the set is full.
    pub fn push(&mut self, contact: Contact) -> bool {
        match self.items.get_mut(self.len) {
            Some(slot) => {
                *slot = contact;
                self.len += 1;
                true
            }
            None => false,
        }
    }

    pub fn as_slice(&self) -> &[Contact] {
        &self.items[..self.len]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Contact> {
        self.as_slice().iter()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Two entries share an id.
    pub fn has_duplicate_ids(&self) -> bool {
        let contacts = self.as_slice();
        contacts
            .iter()
            .enumerate()
            .any(|(i, a)| contacts[i + 1..].iter().any(|b| b.id == a.id))
    }
}

impl Default for ContactSet {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> IntoIterator for &'a ContactSet {
    type Item = &'a Contact;
    type IntoIter = std::slice::Iter<'a, Contact>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// One normalized snapshot of a device's contacts.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// 1-based, strictly increasing per device stream
    pub sequence: u64,
    /// Arrival time in device ticks
    pub arrival_ticks: u64,
    /// Device-reported timestamp in seconds
    pub timestamp_secs: f64,
    /// Numeric id of the source device
    pub device_id: u64,
    pub contacts: ContactSet,
    /// Physical button (click) state
    pub button_pressed: bool,
    pub extents: AxisExtents,
    pub report_id: u8,
}

impl Frame {
    pub fn new(sequence: u64, arrival_ticks: u64) -> Self {
        Self {
            sequence,
            arrival_ticks,
            timestamp_secs: 0.0,
            device_id: 0,
            contacts: ContactSet::new(),
            button_pressed: false,
            extents: AxisExtents::NORMALIZED,
            report_id: 0,
        }
    }

    /// Builder-style helper used by sources and tests.
    pub fn with_contacts(mut self, contacts: &[Contact]) -> Self {
        for contact in contacts {
            self.contacts.push(*contact);
        }
        self
    }
}

/// A frame on its way from a device reader to the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameEnvelope {
    pub side: Side,
    /// Device index within the session (capture record device index)
    pub device_index: i32,
    pub frame: Frame,
}

impl FrameEnvelope {
    pub fn new(side: Side, device_index: i32, frame: Frame) -> Self {
        Self {
            side,
            device_index,
            frame,
        }
    }

    pub fn arrival_ticks(&self) -> u64 {
        self.frame.arrival_ticks
    }

    pub fn max_x(&self) -> i32 {
        self.frame.extents.max_x
    }

    pub fn max_y(&self) -> i32 {
        self.frame.extents.max_y
    }
}

/// How a device's contact updates must be interpreted. Chosen once per device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum DeviceProfile {
    /// Multi-slot protocol; legacy single-contact fields only fill in when no
    /// slot is active.
    MultiSlot { slots: u8 },
    /// Legacy single-contact fields only; slot updates are ignored.
    Legacy,
}

impl DeviceProfile {
    /// Capture-format decoder profile byte.
    pub fn code(self) -> u8 {
        match self {
            DeviceProfile::MultiSlot { .. } => 0,
            DeviceProfile::Legacy => 1,
        }
    }
}

/// Static facts about one device, captured at enumeration time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub index: i32,
    pub name: String,
    pub side: Side,
    pub vendor_id: u32,
    pub product_id: u32,
    pub usage_page: u16,
    pub usage: u16,
    /// Stable hash identifying the physical device
    pub hash: u32,
    pub extents: AxisExtents,
    pub profile: DeviceProfile,
}

impl DeviceDescriptor {
    /// A digitizer touch pad with the given index and side.
    pub fn touchpad(index: i32, side: Side, extents: AxisExtents) -> Self {
        Self {
            index,
            name: format!("touchpad-{index}"),
            side,
            vendor_id: 0,
            product_id: 0,
            usage_page: crate::collector::assembler::USAGE_PAGE_DIGITIZER,
            usage: crate::collector::assembler::USAGE_TOUCH_PAD,
            hash: 0,
            extents,
            profile: DeviceProfile::MultiSlot { slots: 16 },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_codes_follow_canonical_order() {
        for (code, state) in ContactState::ALL.iter().enumerate() {
            assert_eq!(state.code() as usize, code);
            assert_eq!(ContactState::from_code(code as u8), Some(*state));
        }
        assert_eq!(ContactState::from_code(8), None);
    }

    #[test]
    fn test_state_steps() {
        use ContactState::*;
        assert_eq!(Making.steps_to(Touching), 1);
        assert_eq!(Leaving.steps_to(NotTouching), 1);
        assert_eq!(Starting.steps_to(Touching), 3);
        assert!(Touching.is_backward(Making));
        assert!(!Leaving.is_backward(NotTouching));
    }

    #[test]
    fn test_normalize_clamps_to_extents() {
        let extents = AxisExtents::new(0, 1000, -500, 500);
        assert!((extents.normalize_x(250) - 0.25).abs() < 1e-6);
        assert!((extents.normalize_y(0) - 0.5).abs() < 1e-6);
        assert_eq!(extents.normalize_x(2000), 1.0);
        assert_eq!(extents.normalize_x(-3), 0.0);
    }

    #[test]
    fn test_contact_set_capacity_and_duplicates() {
        let mut set = ContactSet::new();
        for id in 0..MAX_CONTACTS as i32 {
            assert!(set.push(Contact::new(id, 0.1, 0.1, ContactState::Touching)));
        }
        assert!(!set.push(Contact::new(99, 0.1, 0.1, ContactState::Touching)));
        assert!(!set.has_duplicate_ids());

        let mut dup = ContactSet::new();
        dup.push(Contact::new(3, 0.1, 0.1, ContactState::Touching));
        dup.push(Contact::new(3, 0.2, 0.2, ContactState::Touching));
        assert!(dup.has_duplicate_ids());
    }

    #[test]
    fn test_side_hint_round_trip() {
        assert_eq!(Side::from_hint(1), Side::Left);
        assert_eq!(Side::from_hint(2), Side::Right);
        assert_eq!(Side::from_hint(9), Side::Unknown);
        assert_eq!(Side::Left.opposite(), Side::Right);
    }
}
