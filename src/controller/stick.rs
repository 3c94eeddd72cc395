//! Two-axis control sticks
//!
//! A stick reads its two axes as one vector with a radial dead zone and maps
//! the vector's angle onto eight direction zones. Cardinal zones are narrowed
//! by the diagonal range:
//!
//! ```text
//!                 Up (0°)
//!        UpLeft  \  |  /  UpRight       cardinal half width = (90 - diagonal_range) / 2
//!        Left  ---  o  ---  Right       diagonal half width = diagonal_range / 2
//!      DownLeft  /  |  \  DownRight
//!                Down (180°)
//! ```
//!
//! In `Standard` mode a diagonal presses the two neighbouring cardinal
//! buttons; in `EightWay` mode it presses its own diagonal button.

use super::axis::DEFAULT_DEAD_ZONE;
use super::axis::DEFAULT_MAX_ZONE;
use crate::mapping::button::{ControlOrigin, LogicalButton};
use crate::mapping::engine::ActionContext;
use crate::persistence::StickConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_DIAGONAL_RANGE: f64 = 45.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StickDirection {
    Up,
    UpRight,
    Right,
    DownRight,
    Down,
    DownLeft,
    Left,
    UpLeft,
}

impl StickDirection {
    /// Clockwise from Up
    pub const ALL: [StickDirection; 8] = [
        StickDirection::Up,
        StickDirection::UpRight,
        StickDirection::Right,
        StickDirection::DownRight,
        StickDirection::Down,
        StickDirection::DownLeft,
        StickDirection::Left,
        StickDirection::UpLeft,
    ];

    pub fn index(self) -> usize {
        match self {
            StickDirection::Up => 0,
            StickDirection::UpRight => 1,
            StickDirection::Right => 2,
            StickDirection::DownRight => 3,
            StickDirection::Down => 4,
            StickDirection::DownLeft => 5,
            StickDirection::Left => 6,
            StickDirection::UpLeft => 7,
        }
    }

    pub fn angle(self) -> f64 {
        self.index() as f64 * 45.0
    }

    pub fn is_diagonal(self) -> bool {
        self.index() % 2 == 1
    }

    /// The two cardinals a diagonal sits between
    pub fn cardinals(self) -> Option<(StickDirection, StickDirection)> {
        if !self.is_diagonal() {
            return None;
        }
        let before = Self::ALL[self.index() - 1];
        let after = Self::ALL[(self.index() + 1) % 8];
        Some((before, after))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StickMode {
    #[default]
    Standard,
    EightWay,
}

fn angular_distance(a: f64, b: f64) -> f64 {
    let diff = (a - b).rem_euclid(360.0);
    diff.min(360.0 - diff)
}

#[derive(Debug, Clone)]
pub struct ControlStick {
    index: usize,
    x_axis: usize,
    y_axis: usize,
    dead_zone: i32,
    max_zone: i32,
    diagonal_range: f64,
    mode: StickMode,
    x: i32,
    y: i32,
    pending: bool,
    buttons: [LogicalButton; 8],
}

impl ControlStick {
    pub fn new(index: usize, x_axis: usize, y_axis: usize) -> Self {
        Self {
            index,
            x_axis,
            y_axis,
            dead_zone: DEFAULT_DEAD_ZONE,
            max_zone: DEFAULT_MAX_ZONE,
            diagonal_range: DEFAULT_DIAGONAL_RANGE,
            mode: StickMode::default(),
            x: 0,
            y: 0,
            pending: false,
            buttons: StickDirection::ALL.map(|direction| {
                LogicalButton::new(ControlOrigin::StickDerived {
                    stick: index,
                    direction,
                })
            }),
        }
    }

    pub fn from_config(index: usize, config: &StickConfig) -> Self {
        let mut stick = Self::new(index, config.x_axis, config.y_axis)
            .with_zones(config.dead_zone, config.max_zone)
            .with_diagonal_range(config.diagonal_range)
            .with_mode(config.mode);
        for entry in &config.buttons {
            let button = &mut stick.buttons[entry.direction.index()];
            *button = LogicalButton::from_config(button.origin(), &entry.button);
        }
        stick
    }

    pub fn with_zones(mut self, dead_zone: i32, max_zone: i32) -> Self {
        self.dead_zone = dead_zone.max(0);
        self.max_zone = max_zone.max(0);
        self
    }

    pub fn with_diagonal_range(mut self, range: f64) -> Self {
        self.diagonal_range = range.clamp(1.0, 90.0);
        self
    }

    pub fn with_mode(mut self, mode: StickMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_button(mut self, direction: StickDirection, button: LogicalButton) -> Self {
        self.buttons[direction.index()] = button;
        self
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn axes(&self) -> (usize, usize) {
        (self.x_axis, self.y_axis)
    }

    pub fn values(&self) -> (i32, i32) {
        (self.x, self.y)
    }

    pub fn button(&self, direction: StickDirection) -> &LogicalButton {
        &self.buttons[direction.index()]
    }

    pub fn button_mut(&mut self, direction: StickDirection) -> &mut LogicalButton {
        &mut self.buttons[direction.index()]
    }

    pub fn buttons(&self) -> &[LogicalButton; 8] {
        &self.buttons
    }

    pub fn buttons_mut(&mut self) -> &mut [LogicalButton; 8] {
        &mut self.buttons
    }

    fn radius(&self) -> f64 {
        (self.x as f64).hypot(self.y as f64)
    }

    pub fn in_dead_zone(&self) -> bool {
        self.radius() <= self.dead_zone as f64
    }

    /// Angle of the deflection in degrees, clockwise from up
    pub fn angle(&self) -> f64 {
        (self.x as f64).atan2(-(self.y as f64)).to_degrees().rem_euclid(360.0)
    }

    /// Radial distance past the dead zone in `[0, 1]`
    pub fn distance(&self) -> f64 {
        let radius = self.radius();
        let dead_zone = self.dead_zone as f64;
        if radius <= dead_zone {
            return 0.0;
        }
        if self.max_zone <= self.dead_zone {
            return 1.0;
        }
        ((radius - dead_zone) / (self.max_zone as f64 - dead_zone)).clamp(0.0, 1.0)
    }

    pub fn current_direction(&self) -> Option<StickDirection> {
        if self.in_dead_zone() {
            return None;
        }
        let angle = self.angle();
        let cardinal_half_width = (90.0 - self.diagonal_range) / 2.0;
        StickDirection::ALL
            .into_iter()
            .filter(|direction| !direction.is_diagonal())
            .find(|direction| angular_distance(angle, direction.angle()) <= cardinal_half_width)
            .or_else(|| {
                StickDirection::ALL
                    .into_iter()
                    .filter(|direction| direction.is_diagonal())
                    .min_by(|a, b| {
                        angular_distance(angle, a.angle()).total_cmp(&angular_distance(angle, b.angle()))
                    })
            })
    }

    /// Buttons held for the current deflection
    pub fn active_directions(&self) -> Vec<StickDirection> {
        match (self.current_direction(), self.mode) {
            (None, _) => Vec::new(),
            (Some(direction), StickMode::Standard) => match direction.cardinals() {
                Some((first, second)) => vec![first, second],
                None => vec![direction],
            },
            (Some(direction), StickMode::EightWay) => vec![direction],
        }
    }

    /// Distance projected onto one direction
    pub fn calculate_directional_distance(&self, direction: StickDirection) -> f64 {
        let offset = angular_distance(self.angle(), direction.angle()).to_radians();
        (self.distance() * offset.cos()).clamp(0.0, 1.0)
    }

    pub fn set_values(&mut self, x: i32, y: i32) {
        self.x = x;
        self.y = y;
    }

    /// Stages new axis values; either may be absent when only one axis moved
    pub fn queue_pending_event(&mut self, x: Option<i32>, y: Option<i32>) {
        if let Some(x) = x {
            self.x = x;
        }
        if let Some(y) = y {
            self.y = y;
        }
        self.pending = true;
    }

    pub fn has_pending_event(&self) -> bool {
        self.pending
    }

    pub fn activate_pending_event(&mut self, ctx: &mut ActionContext<'_>) -> bool {
        if !std::mem::take(&mut self.pending) {
            return false;
        }
        self.joy_event(false, ctx);
        true
    }

    pub fn joy_event(&mut self, ignore_sets: bool, ctx: &mut ActionContext<'_>) {
        let active = self.active_directions();
        debug!(
            "Stick {} at ({}, {}) -> {:?}",
            self.index + 1,
            self.x,
            self.y,
            active
        );

        for direction in StickDirection::ALL {
            let distance = if active.contains(&direction) {
                self.calculate_directional_distance(direction)
            } else {
                0.0
            };
            self.buttons[direction.index()].update_distance(distance);
        }

        for direction in StickDirection::ALL {
            let button = &mut self.buttons[direction.index()];
            if button.is_button_pressed() && !active.contains(&direction) {
                button.joy_event(false, ignore_sets, ctx);
            }
        }
        for direction in active {
            let button = &mut self.buttons[direction.index()];
            if !button.is_button_pressed() {
                button.joy_event(true, ignore_sets, ctx);
            }
        }
    }

    pub fn release_all(&mut self, ctx: &mut ActionContext<'_>) {
        self.pending = false;
        for button in self.buttons.iter_mut() {
            button.force_release(ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::backend::DeviceId;
    use crate::mapping::engine::{ActionEngine, ActivationEffects};
    use crate::mapping::output::ChannelOutput;
    use crate::mapping::tuning::OutputTuningConfig;
    use std::time::Instant;
    use tokio::sync::mpsc;

    fn stick_at(x: i32, y: i32) -> ControlStick {
        let mut stick = ControlStick::new(0, 0, 1);
        stick.set_values(x, y);
        stick
    }

    #[test]
    fn cardinal_and_diagonal_zones() {
        assert_eq!(stick_at(0, 0).current_direction(), None);
        assert_eq!(stick_at(0, -30000).current_direction(), Some(StickDirection::Up));
        assert_eq!(stick_at(30000, 0).current_direction(), Some(StickDirection::Right));
        assert_eq!(stick_at(20000, 20000).current_direction(), Some(StickDirection::DownRight));
        assert_eq!(stick_at(-20000, -20000).current_direction(), Some(StickDirection::UpLeft));
        // 15° off Up stays inside the 22.5° cardinal half width
        assert_eq!(stick_at(7765, -28978).current_direction(), Some(StickDirection::Up));
    }

    #[test]
    fn radial_dead_zone_uses_vector_length() {
        // each axis alone is under the dead zone, the vector is not
        let stick = stick_at(5000, 5000);
        assert!(!stick.in_dead_zone());
        assert!(stick_at(4000, 4000).in_dead_zone());
    }

    #[test]
    fn standard_mode_splits_diagonals() {
        let stick = stick_at(20000, -20000);
        assert_eq!(stick.active_directions(), vec![StickDirection::Up, StickDirection::Right]);
        let eight_way = stick.clone().with_mode(StickMode::EightWay);
        assert_eq!(eight_way.active_directions(), vec![StickDirection::UpRight]);
    }

    #[test]
    fn directional_distance_projects_onto_direction() {
        let stick = stick_at(20000, -20000);
        let straight = stick.calculate_directional_distance(StickDirection::UpRight);
        let projected = stick.calculate_directional_distance(StickDirection::Up);
        assert!((straight - stick.distance()).abs() < 1e-9);
        assert!((projected - straight * 45f64.to_radians().cos()).abs() < 1e-9);
        assert_eq!(stick.calculate_directional_distance(StickDirection::Down), 0.0);
    }

    #[test]
    fn moving_between_zones_swaps_buttons() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut engine = ActionEngine::new(
            Box::new(ChannelOutput::new(tx)),
            OutputTuningConfig::default().into_snapshot(),
        );
        let mut effects = ActivationEffects::default();
        let mut ctx = ActionContext::new(&mut engine, &mut effects, DeviceId(0), 0, Instant::now());
        let mut stick = ControlStick::new(0, 0, 1);

        stick.queue_pending_event(Some(30000), None);
        assert!(stick.activate_pending_event(&mut ctx));
        assert!(!stick.activate_pending_event(&mut ctx));
        assert!(stick.button(StickDirection::Right).is_button_pressed());

        stick.queue_pending_event(Some(0), Some(30000));
        stick.activate_pending_event(&mut ctx);
        assert!(!stick.button(StickDirection::Right).is_button_pressed());
        assert!(stick.button(StickDirection::Down).is_button_pressed());
    }
}
