//! Analog axis state
//!
//! An axis turns raw samples into two logical buttons, one per direction.
//! Samples are first mapped through the throttle mode, then compared with the
//! dead zone:
//!
//! ```text
//!  AXIS_MIN       -dead_zone    0    dead_zone        AXIS_MAX
//!     |<-- negative --->|<--- released --->|<--- positive -->|
//!                       (boundary values count as released)
//! ```
//!
//! Axes that belong to a stick only record their raw value; the stick owns the
//! direction buttons in that case.

use crate::mapping::button::{ControlOrigin, LogicalButton};
use crate::mapping::engine::ActionContext;
use crate::persistence::AxisConfig;
use serde::{Deserialize, Serialize};

pub const AXIS_MIN: i32 = -32767;
pub const AXIS_MAX: i32 = 32767;
pub const DEFAULT_DEAD_ZONE: i32 = 6000;
pub const DEFAULT_MAX_ZONE: i32 = 32000;
/// Value every axis reports when a backend tears a device down
pub const UNPLUG_SAMPLE: i32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisSign {
    Negative,
    Positive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottleMode {
    /// Full raw range folded onto the negative half
    NegativeHalf,
    #[default]
    Normal,
    /// Full raw range folded onto the positive half (typical for triggers)
    PositiveHalf,
}

impl ThrottleMode {
    /// Raw sample of a control at rest
    pub fn release_value(self) -> i32 {
        match self {
            ThrottleMode::NegativeHalf => AXIS_MAX,
            ThrottleMode::Normal => 0,
            ThrottleMode::PositiveHalf => AXIS_MIN,
        }
    }

    pub fn apply(self, raw: i32) -> i32 {
        let raw = raw.clamp(AXIS_MIN, AXIS_MAX);
        match self {
            ThrottleMode::NegativeHalf => (raw - AXIS_MAX) / 2,
            ThrottleMode::Normal => raw,
            ThrottleMode::PositiveHalf => (raw + AXIS_MAX) / 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Axis {
    index: usize,
    dead_zone: i32,
    max_zone: i32,
    throttle: ThrottleMode,
    raw: i32,
    pending: Option<i32>,
    negative: LogicalButton,
    positive: LogicalButton,
    stick: Option<usize>,
}

impl Axis {
    pub fn new(index: usize) -> Self {
        let throttle = ThrottleMode::Normal;
        Self {
            index,
            dead_zone: DEFAULT_DEAD_ZONE,
            max_zone: DEFAULT_MAX_ZONE,
            throttle,
            raw: throttle.release_value(),
            pending: None,
            negative: LogicalButton::new(ControlOrigin::AxisDerived {
                axis: index,
                sign: AxisSign::Negative,
            }),
            positive: LogicalButton::new(ControlOrigin::AxisDerived {
                axis: index,
                sign: AxisSign::Positive,
            }),
            stick: None,
        }
    }

    pub fn from_config(config: &AxisConfig) -> Self {
        let mut axis = Self::new(config.index)
            .with_zones(config.dead_zone, config.max_zone)
            .with_throttle(config.throttle);
        axis.negative = LogicalButton::from_config(axis.negative.origin(), &config.negative);
        axis.positive = LogicalButton::from_config(axis.positive.origin(), &config.positive);
        axis
    }

    pub fn with_zones(mut self, dead_zone: i32, max_zone: i32) -> Self {
        self.dead_zone = dead_zone.clamp(0, AXIS_MAX);
        self.max_zone = max_zone.clamp(0, AXIS_MAX);
        self
    }

    pub fn with_throttle(mut self, throttle: ThrottleMode) -> Self {
        self.throttle = throttle;
        self.raw = throttle.release_value();
        self
    }

    pub fn with_button(mut self, sign: AxisSign, button: LogicalButton) -> Self {
        *self.button_mut(sign) = button;
        self
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn dead_zone(&self) -> i32 {
        self.dead_zone
    }

    pub fn max_zone(&self) -> i32 {
        self.max_zone
    }

    pub fn throttle(&self) -> ThrottleMode {
        self.throttle
    }

    pub fn raw(&self) -> i32 {
        self.raw
    }

    pub fn stick(&self) -> Option<usize> {
        self.stick
    }

    pub fn set_stick(&mut self, stick: Option<usize>) {
        self.stick = stick;
    }

    pub fn button(&self, sign: AxisSign) -> &LogicalButton {
        match sign {
            AxisSign::Negative => &self.negative,
            AxisSign::Positive => &self.positive,
        }
    }

    pub fn button_mut(&mut self, sign: AxisSign) -> &mut LogicalButton {
        match sign {
            AxisSign::Negative => &mut self.negative,
            AxisSign::Positive => &mut self.positive,
        }
    }

    pub fn throttled(&self, raw: i32) -> i32 {
        self.throttle.apply(raw)
    }

    pub fn in_dead_zone(&self, raw: i32) -> bool {
        self.throttled(raw).abs() <= self.dead_zone
    }

    /// Distance past the dead zone boundary normalized to `[0, 1]`, saturating at the max zone
    pub fn distance_from_dead_zone(&self, raw: i32) -> f64 {
        let value = self.throttled(raw).abs();
        if value <= self.dead_zone {
            return 0.0;
        }
        if self.max_zone <= self.dead_zone {
            return 1.0;
        }
        let span = (self.max_zone - self.dead_zone) as f64;
        ((value - self.dead_zone) as f64 / span).clamp(0.0, 1.0)
    }

    pub fn current_distance(&self) -> f64 {
        self.distance_from_dead_zone(self.raw)
    }

    pub fn proper_release_value(&self) -> i32 {
        self.throttle.release_value()
    }

    pub fn is_active(&self, raw: i32) -> bool {
        !self.in_dead_zone(raw)
    }

    pub fn is_currently_active(&self) -> bool {
        self.is_active(self.raw)
    }

    /// Direction the sample pushes toward, `None` inside the dead zone
    pub fn active_sign(&self, raw: i32) -> Option<AxisSign> {
        if self.in_dead_zone(raw) {
            None
        } else if self.throttled(raw) < 0 {
            Some(AxisSign::Negative)
        } else {
            Some(AxisSign::Positive)
        }
    }

    /// Release evidence for the unplug heuristic
    pub fn is_unplug_sample(raw: i32) -> bool {
        raw == UNPLUG_SAMPLE
    }

    pub fn queue_pending_event(&mut self, raw: i32) {
        self.pending = Some(raw);
    }

    pub fn has_pending_event(&self) -> bool {
        self.pending.is_some()
    }

    /// Hands a queued sample to the owning stick
    pub fn take_pending(&mut self) -> Option<i32> {
        self.pending.take()
    }

    pub fn set_raw(&mut self, raw: i32) {
        self.raw = raw;
    }

    pub fn activate_pending_event(&mut self, ctx: &mut ActionContext<'_>) -> bool {
        match self.pending.take() {
            Some(raw) => {
                self.joy_event(raw, false, ctx);
                true
            }
            None => false,
        }
    }

    pub fn joy_event(&mut self, raw: i32, ignore_sets: bool, ctx: &mut ActionContext<'_>) {
        self.raw = raw;
        if self.stick.is_some() {
            return;
        }

        let active = self.active_sign(raw);
        let distance = self.distance_from_dead_zone(raw);
        for sign in [AxisSign::Negative, AxisSign::Positive] {
            let button = self.button_mut(sign);
            button.update_distance(if active == Some(sign) { distance } else { 0.0 });
        }

        // Release the side being left before pressing the side being entered
        for sign in [AxisSign::Negative, AxisSign::Positive] {
            let button = self.button_mut(sign);
            if button.is_button_pressed() && active != Some(sign) {
                button.joy_event(false, ignore_sets, ctx);
            }
        }
        if let Some(sign) = active {
            let button = self.button_mut(sign);
            if !button.is_button_pressed() {
                button.joy_event(true, ignore_sets, ctx);
            }
        }
    }

    pub fn release_all(&mut self, ctx: &mut ActionContext<'_>) {
        self.pending = None;
        self.negative.force_release(ctx);
        self.positive.force_release(ctx);
    }

    pub fn buttons(&self) -> [&LogicalButton; 2] {
        [&self.negative, &self.positive]
    }

    pub fn buttons_mut(&mut self) -> [&mut LogicalButton; 2] {
        [&mut self.negative, &mut self.positive]
    }
}
