//! Mouse emulation
//!
//! Buttons with active mouse-movement slots register with the
//! [`MouseDispatcher`]. Every mouse refresh tick the poll thread sums their
//! velocities, scales by the elapsed time, smooths over the configured
//! history and emits whole pixels. The fractional part is carried in two
//! running remainders so truncation never biases the cursor direction.

use super::button::ButtonKey;
use super::output::OutputDispatcher;
use super::tuning::OutputTuningConfig;
use crate::controller::backend::DeviceId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::time::{Duration, Instant};

pub const DEFAULT_MOUSE_SPEED: f64 = 50.0;
pub const DEFAULT_WHEEL_SPEED: f64 = 20.0;
pub const DEFAULT_SENSITIVITY: f64 = 1.0;
pub const DEFAULT_EASING_DURATION_SECS: f64 = 0.5;
pub const DEFAULT_SPRING_WIDTH: u32 = 400;
pub const DEFAULT_SPRING_HEIGHT: u32 = 400;
/// Pixels per second per unit of mouse speed at full deflection
pub const MOUSE_SPEED_SCALE: f64 = 20.0;
/// Largest elapsed time a single tick may integrate
const MAX_TICK_FACTOR: u32 = 4;

/// How movement slots drive the pointer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseMode {
    /// Distance sets the cursor speed
    #[default]
    Cursor,
    /// Distance sets the cursor offset from a rest point inside a spring area
    Spring,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseCurve {
    Linear,
    Quadratic,
    Cubic,
    /// Quadratic with a boost to full speed near the edge
    QuadraticExtreme,
    /// `distance ^ sensitivity`
    Power,
    #[default]
    EnhancedPrecision,
    /// Linear up to half deflection, the outer half ramps in over the easing duration
    EasingQuadratic,
    EasingCubic,
}

impl MouseCurve {
    /// Curve value once any easing has finished
    pub fn apply(self, distance: f64, sensitivity: f64) -> f64 {
        self.apply_eased(distance, sensitivity, 1.0)
    }

    /// Curve value with `progress` in `[0, 1]` through the easing duration.
    /// Curves without easing ignore it.
    pub fn apply_eased(self, distance: f64, sensitivity: f64, progress: f64) -> f64 {
        let d = distance.clamp(0.0, 1.0);
        let progress = progress.clamp(0.0, 1.0);
        match self {
            MouseCurve::Linear => d,
            MouseCurve::Quadratic => d * d,
            MouseCurve::Cubic => d * d * d,
            MouseCurve::QuadraticExtreme => {
                if d >= 0.95 {
                    (d * d * 1.5).min(1.0)
                } else {
                    d * d
                }
            }
            MouseCurve::Power => d.powf(sensitivity.max(0.001)),
            // Slow near the center for fine aiming, steep near the edge
            MouseCurve::EnhancedPrecision => {
                if d <= 0.4 {
                    d * 0.5
                } else if d <= 0.75 {
                    0.2 + (d - 0.4) * (0.4 / 0.35)
                } else {
                    0.6 + (d - 0.75) * 1.6
                }
            }
            MouseCurve::EasingQuadratic => ease_outer_half(d, progress * progress),
            MouseCurve::EasingCubic => ease_outer_half(d, progress * progress * progress),
        }
    }

    pub fn uses_easing(self) -> bool {
        matches!(self, MouseCurve::EasingQuadratic | MouseCurve::EasingCubic)
    }
}

fn ease_outer_half(d: f64, eased: f64) -> f64 {
    if d <= 0.5 {
        d
    } else {
        0.5 + (d - 0.5) * eased
    }
}

/// Shape of the ramp between the extra acceleration thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccelCurve {
    #[default]
    Linear,
    EaseOutSine,
    EaseOutQuad,
    EaseOutCubic,
}

impl AccelCurve {
    /// Maps a ramp position in `[0, 1]` onto `[0, 1]`
    pub fn ease(self, ratio: f64) -> f64 {
        let r = ratio.clamp(0.0, 1.0);
        match self {
            AccelCurve::Linear => r,
            AccelCurve::EaseOutSine => (r * std::f64::consts::FRAC_PI_2).sin(),
            AccelCurve::EaseOutQuad => 1.0 - (1.0 - r).powi(2),
            AccelCurve::EaseOutCubic => 1.0 - (1.0 - r).powi(3),
        }
    }
}

/// Extra acceleration applied when the control moves quickly between ticks
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtraAcceleration {
    pub multiplier: f64,
    pub min_threshold: f64,
    pub max_threshold: f64,
    pub curve: AccelCurve,
}

impl Default for ExtraAcceleration {
    fn default() -> Self {
        Self {
            multiplier: 2.0,
            min_threshold: 0.1,
            max_threshold: 0.6,
            curve: AccelCurve::default(),
        }
    }
}

impl ExtraAcceleration {
    /// Factor for a change of `delta` in distance since the previous tick
    pub fn factor(&self, delta: f64) -> f64 {
        if delta <= self.min_threshold {
            return 1.0;
        }
        if delta >= self.max_threshold || self.max_threshold <= self.min_threshold {
            return self.multiplier;
        }
        let ratio = (delta - self.min_threshold) / (self.max_threshold - self.min_threshold);
        1.0 + (self.multiplier - 1.0) * self.curve.ease(ratio)
    }
}

/// Spring area settings, used when [`MouseSettings::mode`] is [`MouseMode::Spring`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpringSettings {
    pub width: u32,
    pub height: u32,
    /// Leave the cursor where it is on release instead of returning to the rest point
    pub relative: bool,
    /// Percentage of deflection that still counts as resting at the center
    pub dead_circle: u32,
}

impl Default for SpringSettings {
    fn default() -> Self {
        Self {
            width: DEFAULT_SPRING_WIDTH,
            height: DEFAULT_SPRING_HEIGHT,
            relative: false,
            dead_circle: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MouseSettings {
    pub mode: MouseMode,
    pub speed_x: f64,
    pub speed_y: f64,
    pub curve: MouseCurve,
    pub sensitivity: f64,
    pub easing_duration_secs: f64,
    pub wheel_speed_x: f64,
    pub wheel_speed_y: f64,
    pub extra_acceleration: Option<ExtraAcceleration>,
    pub spring: SpringSettings,
}

impl Default for MouseSettings {
    fn default() -> Self {
        Self {
            mode: MouseMode::default(),
            speed_x: DEFAULT_MOUSE_SPEED,
            speed_y: DEFAULT_MOUSE_SPEED,
            curve: MouseCurve::default(),
            sensitivity: DEFAULT_SENSITIVITY,
            easing_duration_secs: DEFAULT_EASING_DURATION_SECS,
            wheel_speed_x: DEFAULT_WHEEL_SPEED,
            wheel_speed_y: DEFAULT_WHEEL_SPEED,
            extra_acceleration: None,
            spring: SpringSettings::default(),
        }
    }
}

/// Target offset of a spring button, in pixels from the rest point
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SpringOffset {
    pub x: f64,
    pub y: f64,
    pub relative: bool,
}

/// What one button contributes to a mouse tick
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MouseMotion {
    /// Cursor velocity in pixels per second
    pub velocity: (f64, f64),
    pub spring: Option<SpringOffset>,
}

impl MouseMotion {
    /// Adds another button's contribution. Spring offsets add up and the
    /// combined spring is relative only if every part is.
    pub fn accumulate(&mut self, other: MouseMotion) {
        self.velocity.0 += other.velocity.0;
        self.velocity.1 += other.velocity.1;
        if let Some(offset) = other.spring {
            self.spring = Some(match self.spring {
                Some(current) => SpringOffset {
                    x: current.x + offset.x,
                    y: current.y + offset.y,
                    relative: current.relative && offset.relative,
                },
                None => offset,
            });
        }
    }
}

#[derive(Debug, Default)]
pub struct MouseDispatcher {
    pending: BTreeSet<ButtonKey>,
    remainder_x: f64,
    remainder_y: f64,
    history_x: VecDeque<f64>,
    history_y: VecDeque<f64>,
    last_tick: Option<Instant>,
    spring_offset: (i32, i32),
    spring_relative: bool,
}

impl MouseDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: ButtonKey) {
        self.pending.insert(key);
    }

    pub fn unregister(&mut self, key: &ButtonKey) {
        self.pending.remove(key);
        if self.pending.is_empty() {
            self.last_tick = None;
        }
    }

    pub fn forget_device(&mut self, device: DeviceId) {
        self.pending.retain(|key| key.device != device);
        if self.pending.is_empty() {
            self.last_tick = None;
        }
    }

    pub fn pending_buttons(&self) -> Vec<ButtonKey> {
        self.pending.iter().copied().collect()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// True while movement slots are active or a spring still has to return
    pub fn is_active(&self) -> bool {
        self.has_pending() || self.spring_offset != (0, 0)
    }

    /// Current spring displacement from the rest point
    pub fn spring_offset(&self) -> (i32, i32) {
        self.spring_offset
    }

    /// True when movement is active and a refresh interval has passed since the last tick
    pub fn should_invoke(&self, now: Instant, tuning: &OutputTuningConfig) -> bool {
        self.is_active()
            && self.last_tick.map_or(true, |last| {
                now.saturating_duration_since(last) >= tuning.mouse_refresh_rate
            })
    }

    /// Integrates the cursor velocity since the last tick, moves the spring
    /// toward its target and emits the combined cursor movement
    pub fn apply_motion(
        &mut self,
        motion: MouseMotion,
        now: Instant,
        tuning: &OutputTuningConfig,
        output: &mut OutputDispatcher,
    ) -> (i32, i32) {
        let max_elapsed = tuning.mouse_refresh_rate * MAX_TICK_FACTOR;
        let elapsed = self
            .last_tick
            .map(|last| now.saturating_duration_since(last))
            .unwrap_or(tuning.mouse_refresh_rate)
            .min(max_elapsed);
        self.last_tick = Some(now);

        let seconds = elapsed.as_secs_f64();
        let dx = smooth(&mut self.history_x, motion.velocity.0 * seconds, tuning);
        let dy = smooth(&mut self.history_y, motion.velocity.1 * seconds, tuning);

        let total_x = dx + self.remainder_x;
        let total_y = dy + self.remainder_y;
        let step_x = total_x.trunc();
        let step_y = total_y.trunc();
        self.remainder_x = total_x - step_x;
        self.remainder_y = total_y - step_y;

        let spring = self.spring_step(motion.spring);
        let moved = (step_x as i32 + spring.0, step_y as i32 + spring.1);
        output.move_cursor(moved.0, moved.1);
        moved
    }

    /// Movement needed to bring the spring to its new target
    fn spring_step(&mut self, target: Option<SpringOffset>) -> (i32, i32) {
        let target = match target {
            Some(offset) => {
                self.spring_relative = offset.relative;
                (offset.x.round() as i32, offset.y.round() as i32)
            }
            // A relative spring stays where it was let go
            None if self.spring_relative => {
                self.spring_offset = (0, 0);
                return (0, 0);
            }
            None => (0, 0),
        };
        let step = (target.0 - self.spring_offset.0, target.1 - self.spring_offset.1);
        self.spring_offset = target;
        step
    }

    /// Drops smoothing history and the tick reference. Remainders are kept.
    pub fn reset_distances(&mut self) {
        self.history_x.clear();
        self.history_y.clear();
        self.last_tick = None;
    }

    pub fn remainders(&self) -> (f64, f64) {
        (self.remainder_x, self.remainder_y)
    }

    pub fn last_tick(&self) -> Option<Instant> {
        self.last_tick
    }

    pub fn refresh_deadline(&self, now: Instant, tuning: &OutputTuningConfig) -> Instant {
        now + tuning.mouse_refresh_rate.max(Duration::from_millis(1))
    }
}

fn smooth(history: &mut VecDeque<f64>, value: f64, tuning: &OutputTuningConfig) -> f64 {
    if tuning.mouse_history_size <= 1 {
        history.clear();
        return value;
    }
    history.push_front(value);
    history.truncate(tuning.mouse_history_size);

    let mut weight = 1.0;
    let mut weighted = 0.0;
    let mut total = 0.0;
    for sample in history.iter() {
        weighted += sample * weight;
        total += weight;
        weight *= tuning.weight_modifier;
    }
    weighted / total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::button::ControlOrigin;
    use crate::mapping::output::{ChannelOutput, OutputAction};
    use tokio::sync::mpsc;

    fn unsmoothed() -> OutputTuningConfig {
        OutputTuningConfig {
            mouse_history_size: 1,
            ..Default::default()
        }
    }

    #[test]
    fn curves_stay_monotonic_and_bounded() {
        for curve in [
            MouseCurve::Linear,
            MouseCurve::Quadratic,
            MouseCurve::Cubic,
            MouseCurve::QuadraticExtreme,
            MouseCurve::Power,
            MouseCurve::EnhancedPrecision,
            MouseCurve::EasingQuadratic,
            MouseCurve::EasingCubic,
        ] {
            let mut previous = 0.0;
            for step in 0..=100 {
                let value = curve.apply(step as f64 / 100.0, 1.5);
                assert!(value >= previous, "{:?} decreased at {}", curve, step);
                assert!(value <= 1.0 + 1e-9);
                previous = value;
            }
            assert!((curve.apply(1.0, 1.5) - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn quadratic_extreme_jumps_to_full_speed_at_the_edge() {
        let curve = MouseCurve::QuadraticExtreme;
        assert!((curve.apply(0.5, 1.0) - 0.25).abs() < 1e-9);
        assert!((curve.apply(0.94, 1.0) - 0.94 * 0.94).abs() < 1e-9);
        assert_eq!(curve.apply(0.95, 1.0), 1.0);
    }

    #[test]
    fn easing_quadratic_ramps_outer_half_over_time() {
        let curve = MouseCurve::EasingQuadratic;
        // inner half never eases
        assert_eq!(curve.apply_eased(0.4, 1.0, 0.0), 0.4);
        assert_eq!(curve.apply_eased(1.0, 1.0, 0.0), 0.5);
        assert!((curve.apply_eased(1.0, 1.0, 0.5) - 0.625).abs() < 1e-9);
        assert_eq!(curve.apply_eased(1.0, 1.0, 1.0), 1.0);
        assert_eq!(curve.apply_eased(1.0, 1.0, 3.0), 1.0);
    }

    #[test]
    fn easing_cubic_starts_slower_than_quadratic() {
        let cubic = MouseCurve::EasingCubic.apply_eased(1.0, 1.0, 0.5);
        let quadratic = MouseCurve::EasingQuadratic.apply_eased(1.0, 1.0, 0.5);
        assert!((cubic - 0.5625).abs() < 1e-9);
        assert!(cubic < quadratic);
        assert!(MouseCurve::EasingCubic.uses_easing());
        assert!(!MouseCurve::Linear.uses_easing());
    }

    #[test]
    fn accel_curves_share_endpoints() {
        for curve in [
            AccelCurve::Linear,
            AccelCurve::EaseOutSine,
            AccelCurve::EaseOutQuad,
            AccelCurve::EaseOutCubic,
        ] {
            assert_eq!(curve.ease(0.0), 0.0);
            assert!((curve.ease(1.0) - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn ease_out_accel_curves_front_load_the_boost() {
        let linear = AccelCurve::Linear.ease(0.5);
        let sine = AccelCurve::EaseOutSine.ease(0.5);
        let quad = AccelCurve::EaseOutQuad.ease(0.5);
        let cubic = AccelCurve::EaseOutCubic.ease(0.5);
        assert!((sine - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-9);
        assert!((quad - 0.75).abs() < 1e-9);
        assert!((cubic - 0.875).abs() < 1e-9);
        assert!(linear < sine && sine < quad && quad < cubic);

        let accel = ExtraAcceleration {
            curve: AccelCurve::EaseOutQuad,
            ..Default::default()
        };
        // halfway between the thresholds
        assert!((accel.factor(0.35) - 1.75).abs() < 1e-9);
    }

    #[test]
    fn spring_moves_to_target_and_returns_on_release() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut output = OutputDispatcher::new(Box::new(ChannelOutput::new(tx)));
        let mut mouse = MouseDispatcher::new();
        let tuning = unsmoothed();
        let start = Instant::now();
        let held = MouseMotion {
            velocity: (0.0, 0.0),
            spring: Some(SpringOffset {
                x: 200.0,
                y: -50.0,
                relative: false,
            }),
        };

        assert_eq!(mouse.apply_motion(held, start, &tuning, &mut output), (200, -50));
        assert_eq!(mouse.apply_motion(held, start + tuning.mouse_refresh_rate, &tuning, &mut output), (0, 0));
        assert!(mouse.is_active());

        let later = start + tuning.mouse_refresh_rate * 2;
        assert_eq!(mouse.apply_motion(MouseMotion::default(), later, &tuning, &mut output), (-200, 50));
        assert_eq!(mouse.spring_offset(), (0, 0));
        assert!(!mouse.is_active());

        let mut moves = Vec::new();
        while let Ok(action) = rx.try_recv() {
            moves.push(action);
        }
        assert_eq!(
            moves,
            vec![
                OutputAction::CursorMove { dx: 200, dy: -50 },
                OutputAction::CursorMove { dx: -200, dy: 50 },
            ]
        );
    }

    #[test]
    fn relative_spring_stays_where_released() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut output = OutputDispatcher::new(Box::new(ChannelOutput::new(tx)));
        let mut mouse = MouseDispatcher::new();
        let tuning = unsmoothed();
        let start = Instant::now();
        let held = MouseMotion {
            velocity: (0.0, 0.0),
            spring: Some(SpringOffset {
                x: 30.0,
                y: 0.0,
                relative: true,
            }),
        };

        mouse.apply_motion(held, start, &tuning, &mut output);
        let released = mouse.apply_motion(MouseMotion::default(), start + tuning.mouse_refresh_rate, &tuning, &mut output);
        assert_eq!(released, (0, 0));
        assert!(!mouse.is_active());
    }

    #[test]
    fn combined_spring_is_relative_only_if_all_parts_are() {
        let mut motion = MouseMotion::default();
        motion.accumulate(MouseMotion {
            velocity: (10.0, 0.0),
            spring: Some(SpringOffset {
                x: 5.0,
                y: 0.0,
                relative: true,
            }),
        });
        motion.accumulate(MouseMotion {
            velocity: (0.0, 4.0),
            spring: Some(SpringOffset {
                x: 0.0,
                y: 7.0,
                relative: false,
            }),
        });
        assert_eq!(motion.velocity, (10.0, 4.0));
        assert_eq!(
            motion.spring,
            Some(SpringOffset {
                x: 5.0,
                y: 7.0,
                relative: false
            })
        );
    }

    #[test]
    fn extra_acceleration_ramps_between_thresholds() {
        let accel = ExtraAcceleration::default();
        assert_eq!(accel.factor(0.0), 1.0);
        assert_eq!(accel.factor(1.0), 2.0);
        let mid = accel.factor(0.35);
        assert!(mid > 1.0 && mid < 2.0);
    }

    #[test]
    fn remainders_carry_fractional_pixels() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut output = OutputDispatcher::new(Box::new(ChannelOutput::new(tx)));
        let mut mouse = MouseDispatcher::new();
        let tuning = unsmoothed();
        let start = Instant::now();

        // half a pixel per 5 ms tick
        let velocity = MouseMotion {
            velocity: (100.0, 0.0),
            spring: None,
        };
        let mut moved = 0;
        for tick in 0..5u32 {
            let now = start + tuning.mouse_refresh_rate * tick;
            moved += mouse.apply_motion(velocity, now, &tuning, &mut output).0;
        }
        assert_eq!(moved, 2);
        assert!((mouse.remainders().0 - 0.5).abs() < 1e-9);

        let mut emitted = 0;
        while let Ok(OutputAction::CursorMove { dx, .. }) = rx.try_recv() {
            emitted += dx;
        }
        assert_eq!(emitted, 2);
    }

    #[test]
    fn smoothing_weights_recent_samples_most() {
        let tuning = OutputTuningConfig {
            mouse_history_size: 3,
            weight_modifier: 0.5,
            ..Default::default()
        };
        let mut history = VecDeque::new();
        assert_eq!(smooth(&mut history, 4.0, &tuning), 4.0);
        let second = smooth(&mut history, 0.0, &tuning);
        assert!((second - 4.0 * 0.5 / 1.5).abs() < 1e-9);
    }

    #[test]
    fn unregistering_last_button_clears_tick_reference() {
        let mut mouse = MouseDispatcher::new();
        let key = ButtonKey {
            device: DeviceId(0),
            set: 0,
            origin: ControlOrigin::Plain { index: 0 },
        };
        let tuning = unsmoothed();
        mouse.register(key);
        assert!(mouse.should_invoke(Instant::now(), &tuning));
        mouse.last_tick = Some(Instant::now());
        mouse.unregister(&key);
        assert!(mouse.last_tick().is_none());
        assert!(!mouse.has_pending());
    }
}
