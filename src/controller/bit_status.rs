//! Per-cycle bit arrays used by the unplug heuristic
//!
//! [`DeviceBitArrayStatus`] mirrors which controls of a device would be active
//! once the current batch is applied. It starts as a copy of the device's
//! current state and pass one updates it per event. [`AxisReleaseArray`]
//! records which axes reported the unplug sample during the same batch.
//!
//! Flattened layout: `[axes..., hats..., buttons...]`.

use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceBitArrayStatus {
    axes: Vec<bool>,
    hats: Vec<bool>,
    buttons: Vec<bool>,
}

impl DeviceBitArrayStatus {
    pub fn new(num_axes: usize, num_hats: usize, num_buttons: usize) -> Self {
        Self {
            axes: vec![false; num_axes],
            hats: vec![false; num_hats],
            buttons: vec![false; num_buttons],
        }
    }

    pub fn from_parts(axes: Vec<bool>, hats: Vec<bool>, buttons: Vec<bool>) -> Self {
        Self { axes, hats, buttons }
    }

    fn set(bits: &mut [bool], index: usize, active: bool, kind: &str) {
        match bits.get_mut(index) {
            Some(bit) => *bit = active,
            None => debug!("Ignoring {} status for index {} out of range", kind, index),
        }
    }

    pub fn change_axes_status(&mut self, index: usize, active: bool) {
        Self::set(&mut self.axes, index, active, "axis");
    }

    pub fn change_hat_status(&mut self, index: usize, active: bool) {
        Self::set(&mut self.hats, index, active, "hat");
    }

    pub fn change_button_status(&mut self, index: usize, active: bool) {
        Self::set(&mut self.buttons, index, active, "button");
    }

    pub fn generate_final_bit_array(&self) -> Vec<bool> {
        self.axes
            .iter()
            .chain(self.hats.iter())
            .chain(self.buttons.iter())
            .copied()
            .collect()
    }

    pub fn num_axes(&self) -> usize {
        self.axes.len()
    }

    pub fn num_hats(&self) -> usize {
        self.hats.len()
    }

    pub fn num_buttons(&self) -> usize {
        self.buttons.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxisReleaseArray {
    bits: Vec<bool>,
}

impl AxisReleaseArray {
    pub fn new(num_axes: usize) -> Self {
        Self {
            bits: vec![false; num_axes],
        }
    }

    pub fn set(&mut self, axis: usize, released: bool) {
        if let Some(bit) = self.bits.get_mut(axis) {
            *bit = released;
        }
    }

    pub fn count(&self) -> usize {
        self.bits.iter().filter(|bit| **bit).count()
    }

    /// True when every axis reported release in this batch
    pub fn all_released(&self) -> bool {
        !self.bits.is_empty() && self.count() == self.bits.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_array_orders_axes_hats_buttons() {
        let mut status = DeviceBitArrayStatus::new(2, 1, 3);
        status.change_axes_status(1, true);
        status.change_hat_status(0, true);
        status.change_button_status(2, true);
        status.change_button_status(9, true);

        assert_eq!(
            status.generate_final_bit_array(),
            vec![false, true, true, false, false, true]
        );
    }

    #[test]
    fn release_array_needs_every_axis() {
        let mut released = AxisReleaseArray::new(3);
        released.set(0, true);
        released.set(2, true);
        assert!(!released.all_released());
        released.set(1, true);
        assert!(released.all_released());
        assert!(!AxisReleaseArray::new(0).all_released());
    }
}
