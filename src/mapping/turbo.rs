//! Turbo waveforms
//!
//! A turbo button alternates between a pressed phase (slots firing) and a
//! released phase while it is held. The length of each phase is recomputed at
//! every phase change, so for analog buttons the rate follows how far the
//! control is pushed.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_TURBO_INTERVAL_MS: u64 = 100;
pub const MIN_TURBO_INTERVAL_MS: u64 = 10;
/// Re-evaluation period while a phase is skipped because its length rounds to zero
pub const TURBO_RECHECK: Duration = Duration::from_millis(5);
const MAX_PULSE_RELEASE_FACTOR: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurboMode {
    /// Constant rate, equal press and release phases
    #[default]
    Normal,
    /// Press phase grows with distance, release phase shrinks
    Gradient,
    /// Fixed short press, release phase shrinks with distance
    Pulse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurboSettings {
    #[serde(default)]
    pub mode: TurboMode,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

fn default_interval_ms() -> u64 {
    DEFAULT_TURBO_INTERVAL_MS
}

impl Default for TurboSettings {
    fn default() -> Self {
        Self {
            mode: TurboMode::Normal,
            interval_ms: DEFAULT_TURBO_INTERVAL_MS,
        }
    }
}

impl TurboSettings {
    pub fn constant(interval_ms: u64) -> Self {
        Self {
            mode: TurboMode::Normal,
            interval_ms,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(MIN_TURBO_INTERVAL_MS))
    }

    /// Digital buttons have no distance to follow and always use `Normal`
    pub fn effective_mode(&self, analog: bool) -> TurboMode {
        if analog {
            self.mode
        } else {
            TurboMode::Normal
        }
    }

    /// Length of the phase about to start. A zero length means the phase
    /// should be skipped for now.
    pub fn phase_length(&self, analog: bool, entering_pressed: bool, distance: f64) -> Duration {
        let interval = self.interval().as_millis() as f64;
        let distance = distance.clamp(0.0, 1.0);
        let millis = match (self.effective_mode(analog), entering_pressed) {
            (TurboMode::Normal, _) => interval / 2.0,
            (TurboMode::Gradient, true) => distance * interval,
            (TurboMode::Gradient, false) => (1.0 - distance) * interval,
            (TurboMode::Pulse, true) => interval * 0.5,
            (TurboMode::Pulse, false) if distance > 0.0 => {
                (interval / distance * 0.5).min(interval * MAX_PULSE_RELEASE_FACTOR)
            }
            (TurboMode::Pulse, false) => interval * MAX_PULSE_RELEASE_FACTOR,
        };
        Duration::from_millis(millis.round() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_mode_splits_interval_evenly() {
        let turbo = TurboSettings::constant(100);
        assert_eq!(turbo.phase_length(false, true, 1.0), Duration::from_millis(50));
        assert_eq!(turbo.phase_length(false, false, 1.0), Duration::from_millis(50));
    }

    #[test]
    fn gradient_tracks_distance() {
        let turbo = TurboSettings {
            mode: TurboMode::Gradient,
            interval_ms: 200,
        };
        assert_eq!(turbo.phase_length(true, true, 0.25), Duration::from_millis(50));
        assert_eq!(turbo.phase_length(true, false, 0.25), Duration::from_millis(150));
        assert_eq!(turbo.phase_length(true, false, 1.0), Duration::ZERO);
    }

    #[test]
    fn pulse_release_shrinks_as_distance_grows() {
        let turbo = TurboSettings {
            mode: TurboMode::Pulse,
            interval_ms: 100,
        };
        let slow = turbo.phase_length(true, false, 0.25);
        let fast = turbo.phase_length(true, false, 1.0);
        assert!(slow > fast);
        assert_eq!(fast, Duration::from_millis(50));
    }

    #[test]
    fn digital_buttons_ignore_analog_modes() {
        let turbo = TurboSettings {
            mode: TurboMode::Gradient,
            interval_ms: 100,
        };
        assert_eq!(turbo.effective_mode(false), TurboMode::Normal);
        assert_eq!(turbo.phase_length(false, false, 1.0), Duration::from_millis(50));
    }

    #[test]
    fn interval_has_a_floor() {
        assert_eq!(
            TurboSettings::constant(1).interval(),
            Duration::from_millis(MIN_TURBO_INTERVAL_MS)
        );
    }
}
