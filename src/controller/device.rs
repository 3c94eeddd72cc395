//! Devices and their control sets
//!
//! A [`Device`] owns one [`ControlSet`] per configured set; only the active
//! set receives samples. Samples are staged with the `queue_*` methods while a
//! batch is read and committed by [`Device::activate_pending_events`] in a
//! fixed order:
//!
//! ```text
//! sticks ─► axes ─► hats ─► vdpads ─► buttons
//! ```
//!
//! Sticks go first because they consume the staged values of both their
//! axes. VDPads go after every control that can be bound to them has settled.

use super::axis::Axis;
use super::backend::{DeviceDescriptor, DeviceId};
use super::bit_status::DeviceBitArrayStatus;
use super::hat::{DPad, HatDirection};
use super::stick::ControlStick;
use super::vdpad::VDPad;
use crate::mapping::button::{ButtonKey, ControlOrigin, LogicalButton, SetChange, SetChangeCondition, SetChangeRequest};
use crate::mapping::engine::{ActionContext, ActionEngine, ActivationEffects};
use crate::mapping::error::MappingError;
use crate::mapping::mouse::MouseMotion;
use crate::mapping::scheduler::TimerKind;
use crate::persistence::{DeviceProfile, SetProfile};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Physical state carried across a set switch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhysicalState {
    pub axes: Vec<i32>,
    pub hats: Vec<u8>,
    pub buttons: Vec<bool>,
}

#[derive(Debug, Clone)]
pub struct ControlSet {
    name: Option<String>,
    axes: Vec<Axis>,
    buttons: Vec<LogicalButton>,
    hats: Vec<DPad>,
    sticks: Vec<ControlStick>,
    vdpads: Vec<VDPad>,
}

impl ControlSet {
    pub fn blank(num_axes: usize, num_buttons: usize, num_hats: usize) -> Self {
        Self {
            name: None,
            axes: (0..num_axes).map(Axis::new).collect(),
            buttons: (0..num_buttons)
                .map(|index| LogicalButton::new(ControlOrigin::Plain { index }))
                .collect(),
            hats: (0..num_hats).map(DPad::for_hat).collect(),
            sticks: Vec::new(),
            vdpads: Vec::new(),
        }
    }

    pub fn from_profile(profile: &SetProfile, descriptor: &DeviceDescriptor) -> Self {
        let mut set = Self::blank(descriptor.num_axes, descriptor.num_buttons, descriptor.num_hats);
        set.name = profile.name.clone();

        for config in &profile.axes {
            match set.axes.get_mut(config.index) {
                Some(axis) => *axis = Axis::from_config(config),
                None => warn!("{}: axis {} does not exist, ignoring", descriptor.name, config.index),
            }
        }

        for entry in &profile.buttons {
            match set.buttons.get_mut(entry.index) {
                Some(button) => {
                    *button = LogicalButton::from_config(ControlOrigin::Plain { index: entry.index }, &entry.button)
                }
                None => warn!("{}: button {} does not exist, ignoring", descriptor.name, entry.index),
            }
        }

        for config in &profile.hats {
            match set.hats.get_mut(config.index) {
                Some(hat) => hat.apply_config(&config.buttons),
                None => warn!("{}: hat {} does not exist, ignoring", descriptor.name, config.index),
            }
        }

        for config in &profile.sticks {
            let (x, y) = (config.x_axis, config.y_axis);
            let usable = |index: usize| set.axes.get(index).map_or(false, |axis| axis.stick().is_none());
            if x == y || !usable(x) || !usable(y) {
                warn!(
                    "{}: stick on axes {} and {} is not usable, ignoring",
                    descriptor.name, x, y
                );
                continue;
            }
            let index = set.sticks.len();
            set.axes[x].set_stick(Some(index));
            set.axes[y].set_stick(Some(index));
            set.sticks.push(ControlStick::from_config(index, config));
        }

        for config in &profile.vdpads {
            let index = set.vdpads.len();
            let mut vdpad = VDPad::new(index);
            vdpad.dpad_mut().apply_config(&config.buttons);
            set.vdpads.push(vdpad);
            for (direction, origin) in config.bindings() {
                let Some(origin) = origin else {
                    continue;
                };
                if !set.bind_at_construction(index, direction, origin) {
                    warn!(
                        "{}: vdpad {} cannot bind {}, leaving {:?} unassigned",
                        descriptor.name,
                        index + 1,
                        origin,
                        direction
                    );
                }
            }
        }

        set
    }

    fn bind_at_construction(&mut self, vdpad: usize, direction: HatDirection, origin: ControlOrigin) -> bool {
        if matches!(origin, ControlOrigin::Virtual { .. }) {
            return false;
        }
        match self.button_mut(origin) {
            Some(button) if button.vdpad().is_none() => button.set_vdpad(Some(vdpad)),
            _ => return false,
        }
        self.vdpads[vdpad].add_vbutton(direction, origin);
        true
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    pub fn axis_mut(&mut self, index: usize) -> Option<&mut Axis> {
        self.axes.get_mut(index)
    }

    pub fn buttons(&self) -> &[LogicalButton] {
        &self.buttons
    }

    pub fn hats(&self) -> &[DPad] {
        &self.hats
    }

    pub fn sticks(&self) -> &[ControlStick] {
        &self.sticks
    }

    pub fn vdpads(&self) -> &[VDPad] {
        &self.vdpads
    }

    pub fn button(&self, origin: ControlOrigin) -> Option<&LogicalButton> {
        match origin {
            ControlOrigin::Plain { index } => self.buttons.get(index),
            ControlOrigin::AxisDerived { axis, sign } => self.axes.get(axis).map(|a| a.button(sign)),
            ControlOrigin::StickDerived { stick, direction } => {
                self.sticks.get(stick).map(|s| s.button(direction))
            }
            ControlOrigin::HatDerived { hat, direction } => self.hats.get(hat).map(|h| h.button(direction)),
            ControlOrigin::Virtual { vdpad, direction } => {
                self.vdpads.get(vdpad).map(|v| v.dpad().button(direction))
            }
        }
    }

    pub fn button_mut(&mut self, origin: ControlOrigin) -> Option<&mut LogicalButton> {
        match origin {
            ControlOrigin::Plain { index } => self.buttons.get_mut(index),
            ControlOrigin::AxisDerived { axis, sign } => {
                self.axes.get_mut(axis).map(|a| a.button_mut(sign))
            }
            ControlOrigin::StickDerived { stick, direction } => {
                self.sticks.get_mut(stick).map(|s| s.button_mut(direction))
            }
            ControlOrigin::HatDerived { hat, direction } => {
                self.hats.get_mut(hat).map(|h| h.button_mut(direction))
            }
            ControlOrigin::Virtual { vdpad, direction } => self
                .vdpads
                .get_mut(vdpad)
                .map(|v| v.dpad_mut().button_mut(direction)),
        }
    }

    pub fn is_control_pressed(&self, origin: ControlOrigin) -> bool {
        self.button(origin).map_or(false, LogicalButton::is_button_pressed)
    }

    pub fn all_buttons(&self) -> impl Iterator<Item = &LogicalButton> {
        self.axes
            .iter()
            .flat_map(|axis| axis.buttons())
            .chain(self.sticks.iter().flat_map(|stick| stick.buttons().iter()))
            .chain(self.hats.iter().flat_map(|hat| hat.buttons().iter()))
            .chain(self.vdpads.iter().flat_map(|vdpad| vdpad.dpad().buttons().iter()))
            .chain(self.buttons.iter())
    }

    pub fn all_buttons_mut(&mut self) -> impl Iterator<Item = &mut LogicalButton> {
        self.axes
            .iter_mut()
            .flat_map(|axis| axis.buttons_mut())
            .chain(self.sticks.iter_mut().flat_map(|stick| stick.buttons_mut().iter_mut()))
            .chain(self.hats.iter_mut().flat_map(|hat| hat.buttons_mut().iter_mut()))
            .chain(
                self.vdpads
                    .iter_mut()
                    .flat_map(|vdpad| vdpad.dpad_mut().buttons_mut().iter_mut()),
            )
            .chain(self.buttons.iter_mut())
    }

    /// Commits every staged sample in stick, axis, hat, vdpad, button order
    pub fn activate_pending(&mut self, ctx: &mut ActionContext<'_>) {
        let Self { axes, sticks, .. } = self;
        for stick in sticks.iter_mut() {
            let (x_axis, y_axis) = stick.axes();
            let x = axes.get_mut(x_axis).and_then(Axis::take_pending);
            let y = axes.get_mut(y_axis).and_then(Axis::take_pending);
            if let (Some(value), Some(axis)) = (x, axes.get_mut(x_axis)) {
                axis.set_raw(value);
            }
            if let (Some(value), Some(axis)) = (y, axes.get_mut(y_axis)) {
                axis.set_raw(value);
            }
            if x.is_some() || y.is_some() {
                stick.queue_pending_event(x, y);
            }
            stick.activate_pending_event(ctx);
        }

        for axis in self.axes.iter_mut() {
            axis.activate_pending_event(ctx);
        }

        for hat in self.hats.iter_mut() {
            hat.activate_pending_event(ctx);
        }

        self.resolve_vdpads(ctx);

        for button in self.buttons.iter_mut() {
            button.activate_pending_event(ctx);
        }

        if !ctx.effects.vdpad_updates.is_empty() {
            self.resolve_vdpads(ctx);
        }
    }

    /// Recomputes every VDPad whose bound controls changed and fires the result
    fn resolve_vdpads(&mut self, ctx: &mut ActionContext<'_>) {
        for index in std::mem::take(&mut ctx.effects.vdpad_updates) {
            match self.vdpads.get_mut(index) {
                Some(vdpad) => vdpad.queue_joy_event(),
                None => debug!("Update for missing vdpad {}", index),
            }
        }

        let values: Vec<Option<u8>> = self
            .vdpads
            .iter()
            .map(|vdpad| {
                vdpad
                    .is_dirty()
                    .then(|| vdpad.compute_value(|origin| self.is_control_pressed(origin)))
            })
            .collect();
        for (vdpad, value) in self.vdpads.iter_mut().zip(values) {
            if let Some(value) = value {
                vdpad.activate_pending_event(value, ctx);
            }
        }
    }

    pub fn queue_button_event(&mut self, index: usize, pressed: bool) -> bool {
        let Some(button) = self.buttons.get_mut(index) else {
            return false;
        };
        match button.vdpad() {
            Some(vdpad) => {
                if button.route_to_vdpad(pressed) {
                    if let Some(vdpad) = self.vdpads.get_mut(vdpad) {
                        vdpad.queue_joy_event();
                    }
                }
            }
            None => button.queue_pending_event(pressed, false),
        }
        true
    }

    pub fn queue_axis_event(&mut self, index: usize, value: i32) -> bool {
        match self.axes.get_mut(index) {
            Some(axis) => {
                axis.queue_pending_event(value);
                true
            }
            None => false,
        }
    }

    pub fn queue_hat_event(&mut self, index: usize, value: u8) -> bool {
        match self.hats.get_mut(index) {
            Some(hat) => {
                hat.queue_pending_event(value);
                true
            }
            None => false,
        }
    }

    pub fn physical_state(&self) -> PhysicalState {
        PhysicalState {
            axes: self.axes.iter().map(Axis::raw).collect(),
            hats: self.hats.iter().map(DPad::value).collect(),
            buttons: self.buttons.iter().map(LogicalButton::is_button_pressed).collect(),
        }
    }

    /// Replays held controls into this set without triggering set changes
    pub fn restore_physical_state(&mut self, state: &PhysicalState, ctx: &mut ActionContext<'_>) {
        for (axis, raw) in self.axes.iter_mut().zip(&state.axes) {
            if axis.stick().is_some() {
                axis.set_raw(*raw);
            } else {
                axis.joy_event(*raw, true, ctx);
            }
        }

        let Self { axes, sticks, .. } = self;
        for stick in sticks.iter_mut() {
            let (x_axis, y_axis) = stick.axes();
            let x = axes.get(x_axis).map_or(0, Axis::raw);
            let y = axes.get(y_axis).map_or(0, Axis::raw);
            stick.set_values(x, y);
            stick.joy_event(true, ctx);
        }

        for (hat, value) in self.hats.iter_mut().zip(&state.hats) {
            hat.joy_event(*value, true, ctx);
        }

        for (button, pressed) in self.buttons.iter_mut().zip(&state.buttons) {
            if *pressed {
                button.joy_event(true, true, ctx);
            }
        }

        self.resolve_vdpads(ctx);
    }

    pub fn release_all(&mut self, ctx: &mut ActionContext<'_>) {
        for stick in self.sticks.iter_mut() {
            stick.release_all(ctx);
        }
        for axis in self.axes.iter_mut() {
            axis.release_all(ctx);
        }
        for hat in self.hats.iter_mut() {
            hat.release_all(ctx);
        }
        for vdpad in self.vdpads.iter_mut() {
            vdpad.release_all(ctx);
        }
        for button in self.buttons.iter_mut() {
            button.force_release(ctx);
        }
    }

    /// Binds `control` to a VDPad direction, or unbinds the direction when `None`
    pub fn bind_vdpad(
        &mut self,
        vdpad: usize,
        direction: HatDirection,
        control: Option<ControlOrigin>,
        ctx: &mut ActionContext<'_>,
    ) -> Result<(), MappingError> {
        if vdpad >= self.vdpads.len() {
            return Err(MappingError::InvalidControl(format!("vdpad {} does not exist", vdpad + 1)));
        }
        if let Some(origin) = control {
            if matches!(origin, ControlOrigin::Virtual { .. }) || self.button(origin).is_none() {
                return Err(MappingError::InvalidControl(format!("{} cannot be bound", origin)));
            }
        }

        if let Some(previous) = self.vdpads[vdpad].remove_vbutton(direction) {
            if let Some(button) = self.button_mut(previous) {
                button.set_vdpad(None);
            }
            debug!("Unbound {} from vdpad {} {:?}", previous, vdpad + 1, direction);
        }

        if let Some(origin) = control {
            if let Some((other, other_direction)) = self.vdpad_binding_of(origin) {
                self.vdpads[other].remove_vbutton(other_direction);
            }
            if let Some(button) = self.button_mut(origin) {
                let held = button.is_button_pressed();
                button.force_release(ctx);
                button.set_vdpad(Some(vdpad));
                button.route_to_vdpad(held);
            }
            self.vdpads[vdpad].add_vbutton(direction, origin);
        }

        self.resolve_vdpads(ctx);
        Ok(())
    }

    fn vdpad_binding_of(&self, origin: ControlOrigin) -> Option<(usize, HatDirection)> {
        self.vdpads
            .iter()
            .find_map(|vdpad| vdpad.bound_direction(origin).map(|direction| (vdpad.index(), direction)))
    }

    pub fn add_vdpad(&mut self) -> usize {
        let index = self.vdpads.len();
        self.vdpads.push(VDPad::new(index));
        index
    }
}

pub struct Device {
    descriptor: DeviceDescriptor,
    sets: Vec<ControlSet>,
    active_set: usize,
    events_processed: u64,
}

impl Device {
    pub fn new(descriptor: DeviceDescriptor) -> Self {
        Self::with_profile(descriptor, None)
    }

    pub fn with_profile(descriptor: DeviceDescriptor, profile: Option<&DeviceProfile>) -> Self {
        let mut sets: Vec<ControlSet> = profile
            .map(|profile| {
                profile
                    .sets
                    .iter()
                    .map(|set| ControlSet::from_profile(set, &descriptor))
                    .collect()
            })
            .unwrap_or_default();
        if sets.is_empty() {
            sets.push(ControlSet::blank(
                descriptor.num_axes,
                descriptor.num_buttons,
                descriptor.num_hats,
            ));
        }

        let mut device = Self {
            descriptor,
            sets,
            active_set: 0,
            events_processed: 0,
        };
        device.validate_set_changes();
        device.mirror_set_changes();
        device
    }

    pub fn with_sets(descriptor: DeviceDescriptor, sets: Vec<ControlSet>) -> Self {
        let mut device = Self {
            descriptor,
            sets,
            active_set: 0,
            events_processed: 0,
        };
        if device.sets.is_empty() {
            device.sets.push(ControlSet::blank(
                device.descriptor.num_axes,
                device.descriptor.num_buttons,
                device.descriptor.num_hats,
            ));
        }
        device.validate_set_changes();
        device.mirror_set_changes();
        device
    }

    fn validate_set_changes(&mut self) {
        let count = self.sets.len();
        let name = self.descriptor.name.clone();
        for (index, set) in self.sets.iter_mut().enumerate() {
            for button in set.all_buttons_mut() {
                if let Some(change) = button.set_change() {
                    if change.target >= count || change.target == index {
                        warn!(
                            "{}: {} switches to set {} which is not usable, ignoring",
                            name,
                            button.name(),
                            change.target + 1
                        );
                        button.set_set_change(None);
                    }
                }
            }
        }
    }

    /// Two-way and while-held changes switch back from the target set, so the
    /// counterpart there gets the reverse change unless it has its own
    fn mirror_set_changes(&mut self) {
        let mut mirrors = Vec::new();
        for (index, set) in self.sets.iter().enumerate() {
            for button in set.all_buttons() {
                if let Some(change) = button.set_change() {
                    if matches!(change.condition, SetChangeCondition::TwoWay | SetChangeCondition::WhileHeld) {
                        mirrors.push((change.target, button.origin(), change.condition, index));
                    }
                }
            }
        }

        for (target, origin, condition, back) in mirrors {
            if let Some(counterpart) = self.sets[target].button_mut(origin) {
                if counterpart.set_change().is_none() {
                    counterpart.set_set_change(Some(SetChange {
                        condition,
                        target: back,
                    }));
                }
            }
        }
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn id(&self) -> DeviceId {
        self.descriptor.id
    }

    pub fn index(&self) -> usize {
        self.descriptor.index
    }

    pub fn set_index(&mut self, index: usize) {
        self.descriptor.index = index;
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn guid(&self) -> &str {
        &self.descriptor.guid
    }

    pub fn active_set(&self) -> usize {
        self.active_set
    }

    pub fn set_count(&self) -> usize {
        self.sets.len()
    }

    pub fn set(&self, index: usize) -> Option<&ControlSet> {
        self.sets.get(index)
    }

    pub fn active(&self) -> &ControlSet {
        &self.sets[self.active_set]
    }

    pub fn active_mut(&mut self) -> &mut ControlSet {
        &mut self.sets[self.active_set]
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    pub fn queue_axis_event(&mut self, axis: usize, value: i32) {
        self.events_processed += 1;
        if !self.active_mut().queue_axis_event(axis, value) {
            debug!("{}: event for unknown axis {}", self.descriptor.name, axis);
        }
    }

    pub fn queue_button_event(&mut self, button: usize, pressed: bool) {
        self.events_processed += 1;
        if !self.active_mut().queue_button_event(button, pressed) {
            debug!("{}: event for unknown button {}", self.descriptor.name, button);
        }
    }

    pub fn queue_hat_event(&mut self, hat: usize, value: u8) {
        self.events_processed += 1;
        if !self.active_mut().queue_hat_event(hat, value) {
            debug!("{}: event for unknown hat {}", self.descriptor.name, hat);
        }
    }

    pub fn axis(&self, index: usize) -> Option<&Axis> {
        self.active().axes.get(index)
    }

    /// Which controls are active right now, in bit-array layout
    pub fn current_status(&self) -> DeviceBitArrayStatus {
        let set = self.active();
        DeviceBitArrayStatus::from_parts(
            set.axes.iter().map(Axis::is_currently_active).collect(),
            set.hats.iter().map(|hat| DPad::is_active(hat.value())).collect(),
            set.buttons.iter().map(LogicalButton::is_button_pressed).collect(),
        )
    }

    /// Pattern a batch of unplug samples produces: only half-range axes read as active
    pub fn unplug_event_bit_array(&self) -> Vec<bool> {
        let set = self.active();
        let mut status = DeviceBitArrayStatus::new(set.axes.len(), set.hats.len(), set.buttons.len());
        for axis in &set.axes {
            status.change_axes_status(axis.index(), axis.is_active(super::axis::UNPLUG_SAMPLE));
        }
        status.generate_final_bit_array()
    }

    /// Commits staged samples. Returns the new set when a set change happened.
    pub fn activate_pending_events(&mut self, engine: &mut ActionEngine, now: Instant) -> Option<usize> {
        let id = self.id();
        let set = self.active_set;
        let mut effects = ActivationEffects::default();
        {
            let mut ctx = ActionContext::new(engine, &mut effects, id, set, now);
            self.sets[set].activate_pending(&mut ctx);
        }
        self.apply_set_requests(effects.set_requests, engine, now)
    }

    fn apply_set_requests(
        &mut self,
        requests: Vec<SetChangeRequest>,
        engine: &mut ActionEngine,
        now: Instant,
    ) -> Option<usize> {
        let mut changed = None;
        for request in requests {
            match self.set_active_set(request.target, engine, now) {
                Ok(true) => changed = Some(request.target),
                Ok(false) => {}
                Err(e) => warn!("{}: {} requested {}", self.descriptor.name, request.origin, e),
            }
        }
        changed
    }

    /// Switches sets, releasing everything in the old one and replaying held
    /// controls into the new one
    pub fn set_active_set(&mut self, target: usize, engine: &mut ActionEngine, now: Instant) -> Result<bool, MappingError> {
        if target >= self.sets.len() {
            return Err(MappingError::InvalidSet(format!(
                "set {} does not exist ({} sets)",
                target + 1,
                self.sets.len()
            )));
        }
        if target == self.active_set {
            return Ok(false);
        }

        let id = self.id();
        let previous = self.active_set;
        let state = self.sets[previous].physical_state();
        {
            let mut effects = ActivationEffects::default();
            let mut ctx = ActionContext::new(engine, &mut effects, id, previous, now);
            self.sets[previous].release_all(&mut ctx);
        }

        self.active_set = target;
        let mut effects = ActivationEffects::default();
        {
            let mut ctx = ActionContext::new(engine, &mut effects, id, target, now);
            self.sets[target].restore_physical_state(&state, &mut ctx);
        }
        if !effects.set_requests.is_empty() {
            debug!(
                "{}: ignoring {} set requests raised while switching",
                self.descriptor.name,
                effects.set_requests.len()
            );
        }

        info!(
            "{} switched from set {} to set {}",
            self.descriptor.name,
            previous + 1,
            target + 1
        );
        Ok(true)
    }

    pub fn release_all(&mut self, engine: &mut ActionEngine, now: Instant) {
        let id = self.id();
        let set = self.active_set;
        let mut effects = ActivationEffects::default();
        let mut ctx = ActionContext::new(engine, &mut effects, id, set, now);
        self.sets[set].release_all(&mut ctx);
    }

    /// Runs a timer owned by one of this device's buttons. Timers whose button
    /// no longer exists or whose set is inactive are dropped.
    pub fn dispatch_timer(
        &mut self,
        key: ButtonKey,
        kind: TimerKind,
        engine: &mut ActionEngine,
        now: Instant,
    ) -> Option<usize> {
        if key.set != self.active_set {
            debug!("{}: dropping {:?} timer for inactive set {}", self.descriptor.name, kind, key.set + 1);
            return None;
        }
        let id = self.id();
        let mut effects = ActivationEffects::default();
        {
            let set = &mut self.sets[key.set];
            let mut ctx = ActionContext::new(engine, &mut effects, id, key.set, now);
            match set.button_mut(key.origin) {
                Some(button) => button.on_timer(kind, &mut ctx),
                None => {
                    debug!("Dropping {:?} timer for detached {}", kind, key.origin);
                    return None;
                }
            }
            if !ctx.effects.vdpad_updates.is_empty() {
                set.resolve_vdpads(&mut ctx);
            }
        }
        self.apply_set_requests(effects.set_requests, engine, now)
    }

    pub fn bind_vdpad(
        &mut self,
        vdpad: usize,
        direction: HatDirection,
        control: Option<ControlOrigin>,
        engine: &mut ActionEngine,
        now: Instant,
    ) -> Result<(), MappingError> {
        let id = self.id();
        let set = self.active_set;
        let mut effects = ActivationEffects::default();
        let mut ctx = ActionContext::new(engine, &mut effects, id, set, now);
        self.sets[set].bind_vdpad(vdpad, direction, control, &mut ctx)
    }

    /// Mouse contribution of one of this device's buttons
    pub fn mouse_motion(&mut self, key: ButtonKey, now: Instant) -> Option<MouseMotion> {
        if key.set != self.active_set {
            return None;
        }
        self.sets[key.set]
            .button_mut(key.origin)
            .filter(|button| button.has_active_mouse_movement())
            .map(|button| button.mouse_motion(now))
    }

    pub fn reset_mouse_distances(&mut self) {
        let set = self.active_set;
        for button in self.sets[set].all_buttons_mut() {
            if button.has_active_mouse_movement() {
                button.reset_acceleration_distance();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::backend::DeviceMode;
    use crate::mapping::output::{ChannelOutput, OutputAction};
    use crate::mapping::slot::Slot;
    use crate::mapping::tuning::OutputTuningConfig;
    use crate::persistence::{ButtonConfig, IndexedButton};
    use tokio::sync::mpsc;

    fn descriptor() -> DeviceDescriptor {
        DeviceDescriptor {
            id: DeviceId(7),
            index: 0,
            name: "Test pad".to_string(),
            guid: "00ff".to_string(),
            mode: DeviceMode::GameController,
            num_axes: 2,
            num_buttons: 4,
            num_hats: 1,
        }
    }

    fn engine() -> (ActionEngine, mpsc::UnboundedReceiver<OutputAction>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = ActionEngine::new(
            Box::new(ChannelOutput::new(tx)),
            OutputTuningConfig::default().into_snapshot(),
        );
        (engine, rx)
    }

    fn button(index: usize, config: ButtonConfig) -> IndexedButton {
        IndexedButton { index, button: config }
    }

    fn two_set_profile(condition: SetChangeCondition) -> DeviceProfile {
        let switch = ButtonConfig {
            set_change: Some(SetChange { condition, target: 1 }),
            ..Default::default()
        };
        DeviceProfile {
            name: "Test pad".to_string(),
            sets: vec![
                SetProfile {
                    buttons: vec![button(0, switch), button(1, ButtonConfig::keys(&[10]))],
                    ..Default::default()
                },
                SetProfile {
                    buttons: vec![button(1, ButtonConfig::keys(&[20]))],
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<OutputAction>) -> Vec<OutputAction> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[test]
    fn while_held_switch_reverts_on_release() {
        let (mut engine, _rx) = engine();
        let profile = two_set_profile(SetChangeCondition::WhileHeld);
        let mut device = Device::with_profile(descriptor(), Some(&profile));
        let now = Instant::now();

        device.queue_button_event(0, true);
        assert_eq!(device.activate_pending_events(&mut engine, now), Some(1));
        assert!(device.active().buttons()[0].is_button_pressed());

        device.queue_button_event(0, false);
        assert_eq!(device.activate_pending_events(&mut engine, now), Some(0));
        assert_eq!(device.active_set(), 0);
    }

    #[test]
    fn held_key_is_released_when_set_switches() {
        let (mut engine, mut rx) = engine();
        let profile = two_set_profile(SetChangeCondition::OneWay);
        let mut device = Device::with_profile(descriptor(), Some(&profile));
        let now = Instant::now();

        device.queue_button_event(1, true);
        device.activate_pending_events(&mut engine, now);
        device.queue_button_event(0, true);
        device.activate_pending_events(&mut engine, now);

        // key 10 released by the old set, key 20 pressed by the carried state
        assert_eq!(
            drain(&mut rx),
            vec![
                OutputAction::Key { code: 10, pressed: true },
                OutputAction::Key { code: 10, pressed: false },
                OutputAction::Key { code: 20, pressed: true },
            ]
        );
        assert_eq!(device.active_set(), 1);
    }

    #[test]
    fn set_change_to_missing_set_is_dropped() {
        let profile = DeviceProfile {
            name: "Test pad".to_string(),
            sets: vec![SetProfile {
                buttons: vec![button(
                    0,
                    ButtonConfig {
                        set_change: Some(SetChange {
                            condition: SetChangeCondition::OneWay,
                            target: 5,
                        }),
                        ..Default::default()
                    },
                )],
                ..Default::default()
            }],
            ..Default::default()
        };
        let device = Device::with_profile(descriptor(), Some(&profile));
        assert!(device.active().buttons()[0].set_change().is_none());
    }

    #[test]
    fn unplug_pattern_marks_half_range_axes() {
        let profile = DeviceProfile {
            name: "Test pad".to_string(),
            sets: vec![SetProfile {
                axes: vec![crate::persistence::AxisConfig {
                    index: 1,
                    throttle: crate::controller::axis::ThrottleMode::PositiveHalf,
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        };
        let device = Device::with_profile(descriptor(), Some(&profile));
        assert_eq!(
            device.unplug_event_bit_array(),
            vec![false, true, false, false, false, false, false]
        );
        assert_eq!(device.current_status().generate_final_bit_array(), vec![false; 7]);
    }

    #[test]
    fn buttons_are_activated_after_hats() {
        let (mut engine, mut rx) = engine();
        let mut set = ControlSet::blank(0, 1, 1);
        *set.button_mut(ControlOrigin::Plain { index: 0 }).expect("button") =
            LogicalButton::new(ControlOrigin::Plain { index: 0 }).with_slots(vec![Slot::Key { code: 2 }]);
        let up = ControlOrigin::HatDerived {
            hat: 0,
            direction: HatDirection::Up,
        };
        *set.button_mut(up).expect("hat button") = LogicalButton::new(up).with_slots(vec![Slot::Key { code: 1 }]);
        let mut device = Device::with_sets(descriptor(), vec![set]);

        device.queue_button_event(0, true);
        device.queue_hat_event(0, HatDirection::Up.mask());
        device.activate_pending_events(&mut engine, Instant::now());

        assert_eq!(
            drain(&mut rx),
            vec![
                OutputAction::Key { code: 1, pressed: true },
                OutputAction::Key { code: 2, pressed: true },
            ]
        );
    }

    #[test]
    fn unbinding_vdpad_direction_releases_it() {
        let (mut engine, mut rx) = engine();
        let mut set = ControlSet::blank(0, 2, 0);
        let vdpad = set.add_vdpad();
        let up = ControlOrigin::Virtual {
            vdpad,
            direction: HatDirection::Up,
        };
        *set.button_mut(up).expect("vdpad button") = LogicalButton::new(up).with_slots(vec![Slot::Key { code: 103 }]);
        let mut device = Device::with_sets(descriptor(), vec![set]);
        let now = Instant::now();

        let plain = ControlOrigin::Plain { index: 1 };
        device
            .bind_vdpad(vdpad, HatDirection::Up, Some(plain), &mut engine, now)
            .expect("bind");
        device.queue_button_event(1, true);
        device.activate_pending_events(&mut engine, now);
        assert!(device.active().is_control_pressed(up));

        device
            .bind_vdpad(vdpad, HatDirection::Up, None, &mut engine, now)
            .expect("unbind");
        assert!(!device.active().is_control_pressed(up));
        assert_eq!(
            drain(&mut rx),
            vec![
                OutputAction::Key { code: 103, pressed: true },
                OutputAction::Key { code: 103, pressed: false },
            ]
        );
    }
}
