//! Virtual D-pad assembled from four ordinary buttons
//!
//! A VDPad has no sensor of its own. The buttons bound to its directions stop
//! firing their own slots and report their physical state here instead; the
//! VDPad combines those states into a hat value and drives its own four
//! direction buttons with it, diagonals included.

use super::hat::{DPad, HatDirection, HAT_CENTERED};
use crate::mapping::button::ControlOrigin;
use crate::mapping::engine::ActionContext;

#[derive(Debug, Clone)]
pub struct VDPad {
    index: usize,
    bindings: [Option<ControlOrigin>; 4],
    dpad: DPad,
    dirty: bool,
}

impl VDPad {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            bindings: [None; 4],
            dpad: DPad::for_vdpad(index),
            dirty: false,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn dpad(&self) -> &DPad {
        &self.dpad
    }

    pub fn dpad_mut(&mut self) -> &mut DPad {
        &mut self.dpad
    }

    pub fn binding(&self, direction: HatDirection) -> Option<ControlOrigin> {
        self.bindings[direction.index()]
    }

    pub fn bound_direction(&self, origin: ControlOrigin) -> Option<HatDirection> {
        HatDirection::ALL
            .into_iter()
            .find(|direction| self.bindings[direction.index()] == Some(origin))
    }

    /// Binds `origin` to `direction`, returning the control it replaces
    pub fn add_vbutton(&mut self, direction: HatDirection, origin: ControlOrigin) -> Option<ControlOrigin> {
        let previous = self.bindings[direction.index()].replace(origin);
        self.dirty = true;
        previous
    }

    pub fn remove_vbutton(&mut self, direction: HatDirection) -> Option<ControlOrigin> {
        let previous = self.bindings[direction.index()].take();
        if previous.is_some() {
            self.dirty = true;
        }
        previous
    }

    pub fn has_bindings(&self) -> bool {
        self.bindings.iter().any(Option::is_some)
    }

    /// A bound button changed; the combined value is recomputed on activation
    pub fn queue_joy_event(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn compute_value(&self, is_pressed: impl Fn(ControlOrigin) -> bool) -> u8 {
        HatDirection::ALL
            .into_iter()
            .filter(|direction| {
                self.bindings[direction.index()].map_or(false, |origin| is_pressed(origin))
            })
            .fold(HAT_CENTERED, |value, direction| value | direction.mask())
    }

    pub fn activate_pending_event(&mut self, value: u8, ctx: &mut ActionContext<'_>) -> bool {
        if !std::mem::take(&mut self.dirty) {
            return false;
        }
        if value == self.dpad.value() {
            return false;
        }
        self.dpad.joy_event(value, false, ctx);
        true
    }

    pub fn release_all(&mut self, ctx: &mut ActionContext<'_>) {
        self.dirty = false;
        self.dpad.release_all(ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combined_value_follows_bound_buttons() {
        let mut vdpad = VDPad::new(0);
        let up = ControlOrigin::Plain { index: 3 };
        let right = ControlOrigin::Plain { index: 1 };
        assert!(vdpad.add_vbutton(HatDirection::Up, up).is_none());
        vdpad.add_vbutton(HatDirection::Right, right);

        let value = vdpad.compute_value(|origin| origin == up || origin == right);
        assert_eq!(value, HatDirection::Up.mask() | HatDirection::Right.mask());
        assert_eq!(vdpad.bound_direction(right), Some(HatDirection::Right));

        assert_eq!(vdpad.remove_vbutton(HatDirection::Up), Some(up));
        assert_eq!(vdpad.compute_value(|_| true), HatDirection::Right.mask());
    }

    #[test]
    fn removing_an_empty_direction_is_not_a_change() {
        let mut vdpad = VDPad::new(1);
        assert!(vdpad.remove_vbutton(HatDirection::Left).is_none());
        assert!(!vdpad.is_dirty());
        assert!(!vdpad.has_bindings());
    }
}
