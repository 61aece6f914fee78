//! Key layouts and the spatial binding index.
//!
//! A [`KeyLayout`] is the declarative description (JSON on disk); a
//! [`BindingIndex`] is the immutable lookup structure built from it once per
//! session. Reloading a layout builds a new index and swaps the `Arc`; an index
//! is never mutated after [`BindingIndex::build`].

use crate::collector::types::Side;
use crate::core::dispatch::MouseButton;
use crate::error::LayoutError;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Largest layout the index accepts.
pub const MAX_BINDINGS: usize = 4096;
/// Cells never get smaller than this, whatever the snap radius.
const MIN_CELL_SIZE: f32 = 1.0 / 256.0;
const DEFAULT_SNAP_RADIUS: f32 = 0.03;

bitflags! {
    /// Modifier keys held with a key action.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct Modifiers: u8 {
        const SHIFT = 0b0001;
        const CONTROL = 0b0010;
        const ALT = 0b0100;
        const META = 0b1000;
    }
}

/// Which contacts a binding answers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SideScope {
    #[default]
    Any,
    Left,
    Right,
}

impl SideScope {
    pub fn matches(self, side: Side) -> bool {
        match self {
            SideScope::Any => true,
            SideScope::Left => side == Side::Left,
            SideScope::Right => side == Side::Right,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BindingKind {
    #[default]
    Key,
    /// Landing here starts pointer intent instead of typing
    MouseRegion,
}

/// How a key candidate resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyPolicy {
    /// Release before the dwell threshold presses the key
    #[default]
    Tap,
    /// Only a contact sustained past the dwell threshold presses the key
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum Action {
    /// HID keyboard usage
    Key(u16),
    Mouse(MouseButton),
    /// Switch the persistent layer (back to 0 if already active)
    LayerToggle(u8),
    /// Layer active while the contact is held
    LayerMomentary(u8),
}

/// Axis-aligned region in normalized pad coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    /// Half-open containment: left and top edges belong to the rect.
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.x && x < self.x + self.w && y >= self.y && y < self.y + self.h
    }

    /// Squared distance from a point to the rect; zero inside.
    pub fn distance_sq(&self, x: f32, y: f32) -> f32 {
        let dx = (self.x - x).max(0.0).max(x - (self.x + self.w));
        let dy = (self.y - y).max(0.0).max(y - (self.y + self.h));
        dx * dx + dy * dy
    }

    fn is_valid(&self) -> bool {
        [self.x, self.y, self.w, self.h].iter().all(|v| v.is_finite())
            && self.w > 0.0
            && self.h > 0.0
    }
}

/// One key or mouse-region binding as declared in a layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Binding {
    pub label: String,
    #[serde(default)]
    pub scope: SideScope,
    pub rect: Rect,
    #[serde(default)]
    pub kind: BindingKind,
    pub action: Action,
    /// Action emitted instead of `action` once the dwell threshold passes
    #[serde(default)]
    pub hold: Option<Action>,
    #[serde(default)]
    pub modifiers: Modifiers,
    /// Overrides the engine's default policy
    #[serde(default)]
    pub policy: Option<KeyPolicy>,
    #[serde(default)]
    pub layer: u8,
}

impl Binding {
    pub fn key(label: &str, scope: SideScope, rect: Rect, code: u16) -> Self {
        Self {
            label: label.to_string(),
            scope,
            rect,
            kind: BindingKind::Key,
            action: Action::Key(code),
            hold: None,
            modifiers: Modifiers::empty(),
            policy: None,
            layer: 0,
        }
    }

    pub fn mouse_region(label: &str, scope: SideScope, rect: Rect) -> Self {
        Self {
            kind: BindingKind::MouseRegion,
            action: Action::Mouse(MouseButton::Left),
            ..Self::key(label, scope, rect, 0)
        }
    }

    pub fn with_hold(mut self, hold: Action) -> Self {
        self.hold = Some(hold);
        self
    }

    pub fn with_layer(mut self, layer: u8) -> Self {
        self.layer = layer;
        self
    }

    pub fn with_policy(mut self, policy: KeyPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn is_key(&self) -> bool {
        self.kind == BindingKind::Key
    }
}

/// Declarative key layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyLayout {
    pub name: String,
    #[serde(default = "default_snap_radius")]
    pub snap_radius: f32,
    pub bindings: Vec<Binding>,
}

fn default_snap_radius() -> f32 {
    DEFAULT_SNAP_RADIUS
}

impl KeyLayout {
    pub fn load(path: &Path) -> Result<Self, LayoutError> {
        let content = std::fs::read_to_string(path).map_err(|source| LayoutError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Split layout used when no layout file is configured.
    ///
    /// Left pad: three letter rows plus space (hold for layer 1, digits).
    /// Right pad: three letter rows, a layer toggle and a pointer strip.
    pub fn builtin() -> Self {
        const LEFT_ROWS: [&str; 3] = ["qwert", "asdfg", "zxcvb"];
        const RIGHT_ROWS: [&str; 3] = ["yuiop", "hjkl;", "nm,./"];
        let mut bindings = Vec::new();

        for (rows, scope) in [(LEFT_ROWS, SideScope::Left), (RIGHT_ROWS, SideScope::Right)] {
            for (row, keys) in rows.iter().enumerate() {
                for (col, ch) in keys.chars().enumerate() {
                    let rect = Rect::new(0.05 + col as f32 * 0.18, 0.05 + row as f32 * 0.2, 0.18, 0.2);
                    bindings.push(Binding::key(&ch.to_string(), scope, rect, hid_usage(ch)));
                }
            }
        }

        // Layer 1 replaces the left top row with digits.
        for (col, code) in (0x1Eu16..=0x22).enumerate() {
            let rect = Rect::new(0.05 + col as f32 * 0.18, 0.05, 0.18, 0.2);
            let label = format!("{}", col + 1);
            bindings.push(Binding::key(&label, SideScope::Left, rect, code).with_layer(1));
        }

        bindings.push(
            Binding::key("space", SideScope::Left, Rect::new(0.05, 0.7, 0.9, 0.25), 0x2C)
                .with_hold(Action::LayerMomentary(1)),
        );
        let mut toggle = Binding::key("layer", SideScope::Right, Rect::new(0.05, 0.7, 0.3, 0.25), 0);
        toggle.action = Action::LayerToggle(1);
        bindings.push(toggle);
        bindings.push(Binding::mouse_region(
            "pointer",
            SideScope::Right,
            Rect::new(0.35, 0.7, 0.6, 0.25),
        ));

        Self {
            name: "builtin-split".to_string(),
            snap_radius: DEFAULT_SNAP_RADIUS,
            bindings,
        }
    }
}

/// HID keyboard usage for the characters the built-in layout uses.
fn hid_usage(ch: char) -> u16 {
    match ch {
        'a'..='z' => 0x04 + (ch as u16 - 'a' as u16),
        ';' => 0x33,
        ',' => 0x36,
        '.' => 0x37,
        '/' => 0x38,
        _ => 0,
    }
}

/// Lookup parameters for one contact.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Probe {
    pub x: f32,
    pub y: f32,
    pub side: Side,
    pub layer: u8,
    /// Chordal shift: match against the opposite side's bindings
    pub substitute_opposite: bool,
    /// Near misses within the snap radius resolve to the nearest binding
    pub snap: bool,
}

impl Probe {
    pub fn at(x: f32, y: f32, side: Side) -> Self {
        Self {
            x,
            y,
            side,
            layer: 0,
            substitute_opposite: false,
            snap: true,
        }
    }

    pub fn on_layer(mut self, layer: u8) -> Self {
        self.layer = layer;
        self
    }

    pub fn substituted(mut self, substitute: bool) -> Self {
        self.substitute_opposite = substitute;
        self
    }

    pub fn snapping(mut self, snap: bool) -> Self {
        self.snap = snap;
        self
    }

    fn effective_side(&self) -> Side {
        if self.substitute_opposite {
            self.side.opposite()
        } else {
            self.side
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BindingHit {
    /// Declaration index in the layout
    pub index: usize,
    pub distance_sq: f32,
    /// Resolved through the snap radius rather than containment
    pub snapped: bool,
}

/// Immutable grid index over a layout's bindings.
#[derive(Debug)]
pub struct BindingIndex {
    name: String,
    bindings: Vec<Binding>,
    snap_radius: f32,
    cell_size: f32,
    cols: usize,
    rows: usize,
    /// Per cell, ascending declaration indices of bindings overlapping it
    cells: Vec<Vec<u16>>,
}

impl BindingIndex {
    pub fn build(layout: &KeyLayout) -> Result<Self, LayoutError> {
        if !layout.snap_radius.is_finite() || layout.snap_radius <= 0.0 {
            return Err(LayoutError::InvalidSnapRadius(layout.snap_radius));
        }
        if layout.bindings.len() > MAX_BINDINGS {
            return Err(LayoutError::TooManyBindings {
                count: layout.bindings.len(),
                max: MAX_BINDINGS,
            });
        }

        let cell_size = layout.snap_radius.max(MIN_CELL_SIZE);
        let cols = (1.0 / cell_size).ceil() as usize;
        let rows = cols;
        let mut cells = vec![Vec::new(); cols * rows];

        for (index, binding) in layout.bindings.iter().enumerate() {
            let rect = binding.rect;
            if !rect.is_valid() {
                return Err(LayoutError::InvalidRegion {
                    index,
                    label: binding.label.clone(),
                });
            }
            let (c0, c1) = (cell_of(rect.x, cell_size, cols), cell_of(rect.x + rect.w, cell_size, cols));
            let (r0, r1) = (cell_of(rect.y, cell_size, rows), cell_of(rect.y + rect.h, cell_size, rows));
            for row in r0..=r1 {
                for col in c0..=c1 {
                    cells[row * cols + col].push(index as u16);
                }
            }
        }

        Ok(Self {
            name: layout.name.clone(),
            bindings: layout.bindings.clone(),
            snap_radius: layout.snap_radius,
            cell_size,
            cols,
            rows,
            cells,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn snap_radius(&self) -> f32 {
        self.snap_radius
    }

    pub fn binding(&self, index: usize) -> Option<&Binding> {
        self.bindings.get(index)
    }

    /// Resolve a contact position to a binding.
    ///
    /// Bindings on the requested layer are tried first; a layer other than 0
    /// falls through to layer 0 where it defines nothing.
    pub fn lookup(&self, probe: &Probe) -> Option<BindingHit> {
        let hit = self.lookup_layer(probe, probe.layer);
        if hit.is_none() && probe.layer != 0 {
            return self.lookup_layer(probe, 0);
        }
        hit
    }

    fn lookup_layer(&self, probe: &Probe, layer: u8) -> Option<BindingHit> {
        if !probe.x.is_finite() || !probe.y.is_finite() {
            return None;
        }
        let side = probe.effective_side();
        let eligible = |b: &Binding| b.layer == layer && b.scope.matches(side);

        let col = cell_of(probe.x, self.cell_size, self.cols);
        let row = cell_of(probe.y, self.cell_size, self.rows);

        if let Some(candidates) = self.cells.get(row * self.cols + col) {
            for &index in candidates {
                let binding = &self.bindings[index as usize];
                if eligible(binding) && binding.rect.contains(probe.x, probe.y) {
                    return Some(BindingHit {
                        index: index as usize,
                        distance_sq: 0.0,
                        snapped: false,
                    });
                }
            }
        }

        if !probe.snap {
            return None;
        }

        let radius_sq = self.snap_radius * self.snap_radius;
        let mut best: Option<BindingHit> = None;
        for r in row.saturating_sub(1)..=(row + 1).min(self.rows - 1) {
            for c in col.saturating_sub(1)..=(col + 1).min(self.cols - 1) {
                for &index in &self.cells[r * self.cols + c] {
                    let index = index as usize;
                    let binding = &self.bindings[index];
                    if !eligible(binding) {
                        continue;
                    }
                    let d = binding.rect.distance_sq(probe.x, probe.y);
                    if d > radius_sq {
                        continue;
                    }
                    let better = match best {
                        None => true,
                        Some(b) => d < b.distance_sq || (d == b.distance_sq && index < b.index),
                    };
                    if better {
                        best = Some(BindingHit {
                            index,
                            distance_sq: d,
                            snapped: true,
                        });
                    }
                }
            }
        }
        best
    }
}

fn cell_of(v: f32, cell_size: f32, count: usize) -> usize {
    let cell = (v / cell_size).floor();
    if cell <= 0.0 {
        0
    } else {
        (cell as usize).min(count - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn layout(bindings: Vec<Binding>) -> KeyLayout {
        KeyLayout {
            name: "test".to_string(),
            snap_radius: 0.05,
            bindings,
        }
    }

    #[test]
    fn test_contained_point_resolves() {
        let index = BindingIndex::build(&layout(vec![
            Binding::key("a", SideScope::Any, Rect::new(0.125, 0.125, 0.25, 0.25), 4),
            Binding::key("b", SideScope::Any, Rect::new(0.375, 0.125, 0.25, 0.25), 5),
        ]))
        .unwrap();
        let hit = index.lookup(&Probe::at(0.4, 0.2, Side::Left)).unwrap();
        assert_eq!(hit.index, 1);
        assert!(!hit.snapped);

        // Shared edge belongs to the right-hand rect.
        assert_eq!(index.lookup(&Probe::at(0.375, 0.2, Side::Left)).unwrap().index, 1);
    }

    #[test]
    fn test_overlap_prefers_declaration_order() {
        let index = BindingIndex::build(&layout(vec![
            Binding::key("first", SideScope::Any, Rect::new(0.2, 0.2, 0.3, 0.3), 4),
            Binding::key("second", SideScope::Any, Rect::new(0.3, 0.3, 0.3, 0.3), 5),
        ]))
        .unwrap();
        assert_eq!(index.lookup(&Probe::at(0.4, 0.4, Side::Left)).unwrap().index, 0);
    }

    #[test]
    fn test_snap_picks_nearest_then_first_declared() {
        let index = BindingIndex::build(&layout(vec![
            Binding::key("left", SideScope::Any, Rect::new(0.125, 0.375, 0.25, 0.25), 4),
            Binding::key("right", SideScope::Any, Rect::new(0.4375, 0.375, 0.25, 0.25), 5),
        ]))
        .unwrap();

        // Closer to the right-hand key.
        let hit = index.lookup(&Probe::at(0.421875, 0.5, Side::Left)).unwrap();
        assert_eq!(hit.index, 1);
        assert!(hit.snapped);

        // Exactly halfway: first declared wins.
        let hit = index.lookup(&Probe::at(0.40625, 0.5, Side::Left)).unwrap();
        assert_eq!(hit.index, 0);
        assert_eq!(hit.distance_sq, 0.03125 * 0.03125);

        // Outside the radius.
        assert!(index.lookup(&Probe::at(0.40625, 0.9, Side::Left)).is_none());
        // Snapping disabled.
        assert!(index
            .lookup(&Probe::at(0.421875, 0.5, Side::Left).snapping(false))
            .is_none());
    }

    #[test]
    fn test_side_scope_and_substitution() {
        let rect = Rect::new(0.4, 0.4, 0.2, 0.2);
        let index = BindingIndex::build(&layout(vec![
            Binding::key("l", SideScope::Left, rect, 4),
            Binding::key("r", SideScope::Right, rect, 5),
        ]))
        .unwrap();
        assert_eq!(index.lookup(&Probe::at(0.5, 0.5, Side::Right)).unwrap().index, 1);
        assert_eq!(
            index
                .lookup(&Probe::at(0.5, 0.5, Side::Right).substituted(true))
                .unwrap()
                .index,
            0
        );
        assert!(index.lookup(&Probe::at(0.5, 0.5, Side::Unknown)).is_none());
    }

    #[test]
    fn test_layers_fall_through_to_base() {
        let index = BindingIndex::build(&layout(vec![
            Binding::key("a", SideScope::Any, Rect::new(0.0, 0.0, 0.5, 0.5), 4),
            Binding::key("b", SideScope::Any, Rect::new(0.5, 0.0, 0.5, 0.5), 5),
            Binding::key("1", SideScope::Any, Rect::new(0.0, 0.0, 0.5, 0.5), 0x1E).with_layer(1),
        ]))
        .unwrap();
        assert_eq!(index.lookup(&Probe::at(0.2, 0.2, Side::Left).on_layer(1)).unwrap().index, 2);
        assert_eq!(index.lookup(&Probe::at(0.7, 0.2, Side::Left).on_layer(1)).unwrap().index, 1);
        assert_eq!(index.lookup(&Probe::at(0.2, 0.2, Side::Left)).unwrap().index, 0);
    }

    #[test]
    fn test_rejects_invalid_layouts() {
        let bad = layout(vec![Binding::key("z", SideScope::Any, Rect::new(0.1, 0.1, 0.0, 0.2), 4)]);
        assert!(matches!(
            BindingIndex::build(&bad),
            Err(LayoutError::InvalidRegion { index: 0, .. })
        ));

        let mut bad_radius = layout(Vec::new());
        bad_radius.snap_radius = f32::NAN;
        assert!(matches!(
            BindingIndex::build(&bad_radius),
            Err(LayoutError::InvalidSnapRadius(_))
        ));
    }

    #[test]
    fn test_builtin_layout_round_trips_json() {
        let builtin = KeyLayout::builtin();
        let json = serde_json::to_string_pretty(&builtin).unwrap();
        let parsed: KeyLayout = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, builtin);
        let index = BindingIndex::build(&parsed).unwrap();
        let q = index.lookup(&Probe::at(0.1, 0.1, Side::Left)).unwrap();
        assert_eq!(index.binding(q.index).unwrap().action, Action::Key(0x14));
    }

    proptest! {
        #[test]
        fn prop_inside_point_resolves_to_first_containing(
            rects in proptest::collection::vec((0.0f32..0.8, 0.0f32..0.8, 0.02f32..0.2, 0.02f32..0.2), 1..12),
            pick in any::<proptest::sample::Index>(),
            fx in 0.0f32..1.0,
            fy in 0.0f32..1.0,
        ) {
            let bindings = rects
                .iter()
                .enumerate()
                .map(|(i, (x, y, w, h))| Binding::key(&i.to_string(), SideScope::Any, Rect::new(*x, *y, *w, *h), i as u16))
                .collect();
            let index = BindingIndex::build(&layout(bindings)).unwrap();
            let target = pick.index(rects.len());
            let (x, y, w, h) = rects[target];
            let (px, py) = (x + w * fx * 0.99, y + h * fy * 0.99);
            prop_assume!(Rect::new(x, y, w, h).contains(px, py));

            let hit = index.lookup(&Probe::at(px, py, Side::Left)).unwrap();
            prop_assert!(!hit.snapped);
            prop_assert!(hit.index <= target);
            let first = (0..rects.len())
                .find(|&i| index.binding(i).unwrap().rect.contains(px, py))
                .unwrap();
            prop_assert_eq!(hit.index, first);
        }
    }
}
