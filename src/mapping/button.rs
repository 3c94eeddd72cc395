//! Logical button state machine
//!
//! Every digital control the user can map (plain buttons, the two halves of
//! an axis, stick and hat directions, VDPad directions) is a
//! [`LogicalButton`]. The kind of control only changes where the button's
//! distance comes from and how it is named; that lives in [`ControlOrigin`].
//!
//! ```text
//!              joy_event(true)
//!   Released ───────────────────► Pressed ──► slots fire in order
//!      ▲                            │  ├─ Delay / Pause  (timer resumes the walk)
//!      │       joy_event(false)     │  ├─ Turbo          (timer flips phases)
//!      └────────────────────────────┘  └─ Set change     (request to the device)
//! ```
//!
//! Raw samples are applied in two steps. [`LogicalButton::queue_pending_event`]
//! records what the physical control did this cycle, and
//! [`LogicalButton::activate_pending_event`] commits it once the whole batch has
//! been read, so composite controls see consistent inputs before any output
//! fires. Committing with nothing queued does nothing.

use super::engine::ActionContext;
use super::mouse::{MouseMode, MouseMotion, MouseSettings, SpringOffset, MOUSE_SPEED_SCALE};
use super::output::WheelAxis;
use super::scheduler::TimerKind;
use super::slot::Slot;
use super::turbo::{TurboSettings, TURBO_RECHECK};
use crate::controller::axis::AxisSign;
use crate::controller::backend::DeviceId;
use crate::controller::hat::HatDirection;
use crate::controller::stick::StickDirection;
use crate::persistence::ButtonConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

/// Which physical (or virtual) control a logical button belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "control", rename_all = "snake_case")]
pub enum ControlOrigin {
    Plain { index: usize },
    AxisDerived { axis: usize, sign: AxisSign },
    StickDerived { stick: usize, direction: StickDirection },
    HatDerived { hat: usize, direction: HatDirection },
    Virtual { vdpad: usize, direction: HatDirection },
}

impl ControlOrigin {
    /// Analog origins take their distance from the owning axis or stick
    pub fn is_analog(&self) -> bool {
        matches!(
            self,
            ControlOrigin::AxisDerived { .. } | ControlOrigin::StickDerived { .. }
        )
    }
}

impl fmt::Display for ControlOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlOrigin::Plain { index } => write!(f, "Button {}", index + 1),
            ControlOrigin::AxisDerived { axis, sign } => write!(f, "Axis {} {:?}", axis + 1, sign),
            ControlOrigin::StickDerived { stick, direction } => {
                write!(f, "Stick {} {:?}", stick + 1, direction)
            }
            ControlOrigin::HatDerived { hat, direction } => {
                write!(f, "Hat {} {:?}", hat + 1, direction)
            }
            ControlOrigin::Virtual { vdpad, direction } => {
                write!(f, "VDPad {} {:?}", vdpad + 1, direction)
            }
        }
    }
}

/// Globally unique identity of a button, used to key timers and mouse state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ButtonKey {
    pub device: DeviceId,
    pub set: usize,
    pub origin: ControlOrigin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetChangeCondition {
    OneWay,
    TwoWay,
    WhileHeld,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetChange {
    pub condition: SetChangeCondition,
    pub target: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetChangeRequest {
    pub target: usize,
    pub origin: ControlOrigin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingEvent {
    pressed: bool,
    ignore_sets: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SequenceWait {
    Delay,
    Pause,
}

#[derive(Debug, Clone)]
pub struct LogicalButton {
    origin: ControlOrigin,
    name: Option<String>,
    slots: Vec<Slot>,
    toggle: bool,
    turbo: Option<TurboSettings>,
    set_change: Option<SetChange>,
    mouse: MouseSettings,
    cycle_reset: Option<Duration>,
    vdpad: Option<usize>,

    button_pressed: bool,
    toggle_active: bool,
    key_pressed: bool,
    ignore_sets: bool,
    pending: Option<PendingEvent>,
    active_slots: Vec<usize>,
    cursor: usize,
    sequence_start: usize,
    cycle_resume: usize,
    waiting: Option<SequenceWait>,
    hold_start: Option<Instant>,
    last_release: Option<Instant>,
    distance: f64,
    last_accel_distance: f64,
}

impl LogicalButton {
    pub fn new(origin: ControlOrigin) -> Self {
        Self {
            origin,
            name: None,
            slots: Vec::new(),
            toggle: false,
            turbo: None,
            set_change: None,
            mouse: MouseSettings::default(),
            cycle_reset: None,
            vdpad: None,
            button_pressed: false,
            toggle_active: false,
            key_pressed: false,
            ignore_sets: false,
            pending: None,
            active_slots: Vec::new(),
            cursor: 0,
            sequence_start: 0,
            cycle_resume: 0,
            waiting: None,
            hold_start: None,
            last_release: None,
            distance: 0.0,
            last_accel_distance: 0.0,
        }
    }

    pub fn from_config(origin: ControlOrigin, config: &ButtonConfig) -> Self {
        let mut button = Self::new(origin);
        button.name = config.name.clone();
        button.slots = config.slots.clone();
        button.toggle = config.toggle;
        button.turbo = config.turbo;
        button.set_change = config.set_change;
        button.mouse = config.mouse;
        button.cycle_reset = config.cycle_reset_ms.map(Duration::from_millis);
        button
    }

    pub fn with_slots(mut self, slots: Vec<Slot>) -> Self {
        self.slots = slots;
        self
    }

    pub fn with_turbo(mut self, turbo: TurboSettings) -> Self {
        self.turbo = Some(turbo);
        self
    }

    pub fn with_toggle(mut self, toggle: bool) -> Self {
        self.toggle = toggle;
        self
    }

    pub fn with_mouse(mut self, mouse: MouseSettings) -> Self {
        self.mouse = mouse;
        self
    }

    /// Rewinds a cycle to its first segment after `interval` without presses
    pub fn with_cycle_reset(mut self, interval: Duration) -> Self {
        self.cycle_reset = Some(interval);
        self
    }

    pub fn with_set_change(mut self, set_change: SetChange) -> Self {
        self.set_change = Some(set_change);
        self
    }

    pub fn origin(&self) -> ControlOrigin {
        self.origin
    }

    pub fn name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.origin.to_string())
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn set_change(&self) -> Option<SetChange> {
        self.set_change
    }

    pub fn set_set_change(&mut self, set_change: Option<SetChange>) {
        self.set_change = set_change;
    }

    pub fn turbo(&self) -> Option<TurboSettings> {
        self.turbo
    }

    pub fn mouse_settings(&self) -> &MouseSettings {
        &self.mouse
    }

    /// Physical state as last committed
    pub fn is_button_pressed(&self) -> bool {
        self.button_pressed
    }

    /// True while the button's slots are in their firing phase
    pub fn is_key_pressed(&self) -> bool {
        self.key_pressed
    }

    pub fn is_toggle_active(&self) -> bool {
        self.toggle_active
    }

    pub fn has_pending_event(&self) -> bool {
        self.pending.is_some()
    }

    pub fn hold_duration(&self, now: Instant) -> Option<Duration> {
        self.hold_start
            .map(|start| now.saturating_duration_since(start))
    }

    pub fn vdpad(&self) -> Option<usize> {
        self.vdpad
    }

    pub fn set_vdpad(&mut self, vdpad: Option<usize>) {
        self.vdpad = vdpad;
    }

    /// Current distance from the dead zone in `[0, 1]`; digital origins report 1
    pub fn distance(&self) -> f64 {
        if self.origin.is_analog() {
            self.distance
        } else {
            1.0
        }
    }

    pub fn update_distance(&mut self, distance: f64) {
        self.distance = distance.clamp(0.0, 1.0);
    }

    pub fn has_active_mouse_movement(&self) -> bool {
        self.active_slots
            .iter()
            .any(|&index| matches!(self.slots[index], Slot::MouseMove { .. }))
    }

    pub fn queue_pending_event(&mut self, pressed: bool, ignore_sets: bool) {
        self.pending = Some(PendingEvent {
            pressed,
            ignore_sets,
        });
    }

    /// Commits the queued event. Returns false when nothing was queued.
    pub fn activate_pending_event(&mut self, ctx: &mut ActionContext<'_>) -> bool {
        match self.pending.take() {
            Some(event) => {
                self.joy_event(event.pressed, event.ignore_sets, ctx);
                true
            }
            None => false,
        }
    }

    /// Records the physical state of a button bound to a VDPad. Returns true
    /// when the state changed and the VDPad needs re-evaluating.
    pub fn route_to_vdpad(&mut self, pressed: bool) -> bool {
        if self.button_pressed == pressed {
            return false;
        }
        self.button_pressed = pressed;
        self.hold_start = None;
        true
    }

    /// The authoritative physical transition
    pub fn joy_event(&mut self, pressed: bool, ignore_sets: bool, ctx: &mut ActionContext<'_>) {
        // VDPad members only report their state, the VDPad fires the slots
        if let Some(vdpad) = self.vdpad {
            if self.route_to_vdpad(pressed) {
                ctx.effects.vdpad_updates.push(vdpad);
            }
            return;
        }

        if pressed == self.button_pressed {
            if pressed {
                debug!("{}: duplicate press ignored", self.name());
            } else {
                debug!("{}: release without matching press ignored", self.name());
            }
            return;
        }
        self.button_pressed = pressed;

        // Toggle buttons flip on press and ignore the physical release
        if self.toggle {
            if !pressed {
                return;
            }
            self.toggle_active = !self.toggle_active;
            if self.toggle_active {
                self.hold_start = Some(ctx.now);
                self.press_actions(ignore_sets, ctx);
            } else {
                self.hold_start = None;
                self.release_actions(ignore_sets, ctx);
            }
            return;
        }

        // Plain press / release
        if pressed {
            self.hold_start = Some(ctx.now);
            self.press_actions(ignore_sets, ctx);
        } else {
            self.hold_start = None;
            self.release_actions(ignore_sets, ctx);
        }
    }

    /// Drops every in-flight activation regardless of toggle state. Used when a
    /// set is switched away from or the device goes away.
    pub fn force_release(&mut self, ctx: &mut ActionContext<'_>) {
        self.pending = None;
        ctx.cancel(self.origin, TimerKind::Turbo);
        self.end_phase(ctx);
        self.button_pressed = false;
        self.toggle_active = false;
        self.hold_start = None;
        self.last_release = Some(ctx.now);
    }

    pub fn on_timer(&mut self, kind: TimerKind, ctx: &mut ActionContext<'_>) {
        match kind {
            TimerKind::Turbo => self.turbo_tick(ctx),
            TimerKind::Wheel(axis) => self.wheel_tick(axis, ctx),
            TimerKind::Delay | TimerKind::Pause => {
                let expected = if kind == TimerKind::Delay {
                    SequenceWait::Delay
                } else {
                    SequenceWait::Pause
                };
                if self.waiting != Some(expected) || !self.key_pressed {
                    debug!("{}: stale {:?} timer dropped", self.name(), kind);
                    return;
                }
                self.waiting = None;
                self.run_sequence(ctx);
            }
            TimerKind::MouseRefresh | TimerKind::IdleReset => {}
        }
    }

    /// What the active movement slots contribute to the mouse tick at `now`
    pub fn mouse_motion(&mut self, now: Instant) -> MouseMotion {
        let distance = self.distance();
        let boost = match self.mouse.extra_acceleration {
            Some(accel) => accel.factor(distance - self.last_accel_distance),
            None => 1.0,
        };
        self.last_accel_distance = distance;

        let curved = self
            .mouse
            .curve
            .apply_eased(distance, self.mouse.sensitivity, self.easing_progress(now));
        let spring = self.mouse.spring;
        // Inside the dead circle the spring rests at its center
        let spring_scale = if curved * 100.0 < f64::from(spring.dead_circle) {
            0.0
        } else {
            curved
        };

        let mut motion = MouseMotion::default();
        for &index in &self.active_slots {
            let Slot::MouseMove { direction } = self.slots[index] else {
                continue;
            };
            let (ux, uy) = direction.unit_vector();
            match self.mouse.mode {
                MouseMode::Cursor => {
                    motion.velocity.0 += ux * self.mouse.speed_x * MOUSE_SPEED_SCALE * curved * boost;
                    motion.velocity.1 += uy * self.mouse.speed_y * MOUSE_SPEED_SCALE * curved * boost;
                }
                MouseMode::Spring => {
                    let offset = motion.spring.get_or_insert(SpringOffset {
                        relative: spring.relative,
                        ..Default::default()
                    });
                    offset.x += ux * f64::from(spring.width) / 2.0 * spring_scale;
                    offset.y += uy * f64::from(spring.height) / 2.0 * spring_scale;
                }
            }
        }
        motion
    }

    /// How far through the easing duration the current hold is, `1.0` when
    /// the curve does not ease
    fn easing_progress(&self, now: Instant) -> f64 {
        if !self.mouse.curve.uses_easing() || self.mouse.easing_duration_secs <= 0.0 {
            return 1.0;
        }
        match self.hold_duration(now) {
            Some(held) => held.as_secs_f64() / self.mouse.easing_duration_secs,
            None => 1.0,
        }
    }

    pub fn reset_acceleration_distance(&mut self) {
        self.last_accel_distance = self.distance();
    }

    fn output_held(&self) -> bool {
        if self.toggle {
            self.toggle_active
        } else {
            self.button_pressed
        }
    }

    fn press_actions(&mut self, ignore_sets: bool, ctx: &mut ActionContext<'_>) {
        self.ignore_sets = ignore_sets;
        // Every condition switches on press
        if !ignore_sets {
            if let Some(change) = self.set_change {
                ctx.effects.set_requests.push(SetChangeRequest {
                    target: change.target,
                    origin: self.origin,
                });
            }
        }

        // Start a cycle over after a long enough break
        if let (Some(interval), Some(released)) = (self.cycle_reset, self.last_release) {
            if self.cycle_resume != 0 && ctx.now.saturating_duration_since(released) >= interval {
                debug!("{}: cycle reset after {:?}", self.name(), interval);
                self.cycle_resume = 0;
            }
        }

        self.sequence_start = self.cycle_resume;
        self.start_sequence(ctx);

        // First turbo phase change
        if let Some(turbo) = self.turbo {
            let length = turbo.phase_length(self.origin.is_analog(), true, self.distance());
            let length = if length.is_zero() { TURBO_RECHECK } else { length };
            let deadline = ctx.now + length;
            ctx.schedule(self.origin, TimerKind::Turbo, deadline);
        }
    }

    fn release_actions(&mut self, ignore_sets: bool, ctx: &mut ActionContext<'_>) {
        ctx.cancel(self.origin, TimerKind::Turbo);
        self.end_phase(ctx);
        self.last_release = Some(ctx.now);

        // While-held switches back on release
        if !ignore_sets {
            if let Some(SetChange {
                condition: SetChangeCondition::WhileHeld,
                target,
            }) = self.set_change
            {
                ctx.effects.set_requests.push(SetChangeRequest {
                    target,
                    origin: self.origin,
                });
            }
        }
    }

    fn start_sequence(&mut self, ctx: &mut ActionContext<'_>) {
        self.key_pressed = true;
        self.waiting = None;
        self.cursor = self.sequence_start;
        self.run_sequence(ctx);
    }

    fn run_sequence(&mut self, ctx: &mut ActionContext<'_>) {
        while self.cursor < self.slots.len() {
            let index = self.cursor;
            self.cursor += 1;
            let slot = self.slots[index];
            match slot {
                Slot::Key { code } => {
                    ctx.engine.output.press_key(code);
                    self.active_slots.push(index);
                }
                Slot::MouseButton { button } => {
                    ctx.engine.output.press_mouse_button(button);
                    self.active_slots.push(index);
                }
                Slot::MouseMove { .. } => {
                    self.active_slots.push(index);
                    let key = ctx.key(self.origin);
                    ctx.engine.mouse.register(key);
                }
                Slot::MouseWheel { direction } => {
                    self.active_slots.push(index);
                    let axis = direction.wheel_axis();
                    ctx.engine.output.scroll(axis, direction.wheel_ticks());
                    let deadline = ctx.now + self.wheel_interval(axis);
                    ctx.schedule(self.origin, TimerKind::Wheel(axis), deadline);
                }
                // Delay keeps earlier slots held, pause lets go of them first
                Slot::Delay { ms } => {
                    self.waiting = Some(SequenceWait::Delay);
                    let deadline = ctx.now + Duration::from_millis(ms.max(1));
                    ctx.schedule(self.origin, TimerKind::Delay, deadline);
                    return;
                }
                Slot::Pause { ms } => {
                    self.release_active_slots(ctx);
                    self.waiting = Some(SequenceWait::Pause);
                    let deadline = ctx.now + Duration::from_millis(ms.max(1));
                    ctx.schedule(self.origin, TimerKind::Pause, deadline);
                    return;
                }
                Slot::Cycle => {
                    // Next press continues after the marker
                    self.cycle_resume = if self.cursor >= self.slots.len() {
                        0
                    } else {
                        self.cursor
                    };
                    return;
                }
                Slot::SetChange { set } => {
                    if !self.ignore_sets {
                        ctx.effects.set_requests.push(SetChangeRequest {
                            target: set,
                            origin: self.origin,
                        });
                    }
                }
            }
        }
        // Ran off the end, start from the top next time
        self.cycle_resume = 0;
    }

    /// Ends the firing phase: stops sequence timers and releases active slots
    fn end_phase(&mut self, ctx: &mut ActionContext<'_>) {
        ctx.cancel(self.origin, TimerKind::Delay);
        ctx.cancel(self.origin, TimerKind::Pause);
        self.release_active_slots(ctx);
        self.waiting = None;
        self.key_pressed = false;
    }

    fn release_active_slots(&mut self, ctx: &mut ActionContext<'_>) {
        if self.active_slots.is_empty() {
            return;
        }
        let active = std::mem::take(&mut self.active_slots);
        let mut had_mouse = false;
        for &index in active.iter().rev() {
            match self.slots[index] {
                Slot::Key { code } => ctx.engine.output.release_key(code),
                Slot::MouseButton { button } => ctx.engine.output.release_mouse_button(button),
                Slot::MouseMove { .. } => had_mouse = true,
                Slot::MouseWheel { direction } => {
                    ctx.cancel(self.origin, TimerKind::Wheel(direction.wheel_axis()))
                }
                _ => {}
            }
        }
        if had_mouse {
            let key = ctx.key(self.origin);
            ctx.engine.mouse.unregister(&key);
        }
    }

    fn turbo_tick(&mut self, ctx: &mut ActionContext<'_>) {
        let Some(turbo) = self.turbo else {
            return;
        };
        if !self.output_held() {
            debug!("{}: turbo timer fired while released", self.name());
            return;
        }

        let entering_pressed = !self.key_pressed;
        // Zero length skips the phase for now
        let length = turbo.phase_length(self.origin.is_analog(), entering_pressed, self.distance());
        if length.is_zero() {
            let deadline = ctx.now + TURBO_RECHECK;
            ctx.schedule(self.origin, TimerKind::Turbo, deadline);
            return;
        }

        if entering_pressed {
            self.start_sequence(ctx);
        } else {
            self.end_phase(ctx);
        }
        let deadline = ctx.now + length;
        ctx.schedule(self.origin, TimerKind::Turbo, deadline);
    }

    fn wheel_tick(&mut self, axis: WheelAxis, ctx: &mut ActionContext<'_>) {
        let mut active = false;
        let mut ticks = 0;
        for &index in &self.active_slots {
            if let Slot::MouseWheel { direction } = self.slots[index] {
                if direction.wheel_axis() == axis {
                    active = true;
                    ticks += direction.wheel_ticks();
                }
            }
        }
        if !active {
            return;
        }
        ctx.engine.output.scroll(axis, ticks);
        let deadline = ctx.now + self.wheel_interval(axis);
        ctx.schedule(self.origin, TimerKind::Wheel(axis), deadline);
    }

    fn wheel_interval(&self, axis: WheelAxis) -> Duration {
        let speed = match axis {
            WheelAxis::Vertical => self.mouse.wheel_speed_y,
            WheelAxis::Horizontal => self.mouse.wheel_speed_x,
        }
        .max(1.0);
        let millis = 1000.0 / speed / self.distance().max(0.05);
        Duration::from_millis(millis.round().max(1.0) as u64)
    }
}
