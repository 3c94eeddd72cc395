//! # Persistence Module
//!
//! ## Why This Module Exists
//! Everything the poll thread reads at device construction time (dead zones,
//! throttle modes, slot assignments, turbo and mouse settings) and the global
//! tuning values (poll and mouse refresh rates, mouse smoothing) are described
//! here as serde types and stored in a single TOML file.
//!
//! ## Key Abstractions
//! - **AppConfig**: the whole file, split into `daemon`, `mouse` and `profiles`
//! - **DeviceProfile**: the sets for one controller, matched by GUID or name
//! - **SetProfile**: one switchable group of control configurations
//! - **ConfigPortal**: shared access plus tuning snapshot publishing
//!
//! ## Error Handling Strategy
//! File operations use `color_eyre` with context on every step. Missing
//! fields fall back to defaults, and references the poll thread cannot
//! resolve (set targets, stick axes, VDPad bindings) are logged and ignored
//! when devices are built.

pub mod config_portal;

use crate::controller::axis::{ThrottleMode, DEFAULT_DEAD_ZONE, DEFAULT_MAX_ZONE};
use crate::controller::hat::HatDirection;
use crate::controller::stick::{StickDirection, StickMode, DEFAULT_DIAGONAL_RANGE};
use crate::mapping::button::{ControlOrigin, SetChange, SetChangeCondition};
use crate::mapping::mouse::MouseSettings;
use crate::mapping::slot::{MouseDirection, Slot};
use crate::mapping::tuning::{
    OutputTuningConfig, DEFAULT_GAMEPAD_POLL_MS, DEFAULT_MOUSE_HISTORY_SIZE, DEFAULT_MOUSE_REFRESH_MS,
    DEFAULT_WEIGHT_MODIFIER,
};
use crate::mapping::turbo::TurboSettings;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_STATS_INTERVAL_SECS: u64 = 30;

/// Poll thread settings
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    pub gamepad_poll_rate_ms: u64,
    /// GUIDs that must open as plain joysticks even when a mapping exists
    pub disabled_game_controllers: Vec<String>,
    pub stats_interval_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            gamepad_poll_rate_ms: DEFAULT_GAMEPAD_POLL_MS,
            disabled_game_controllers: Vec::new(),
            stats_interval_secs: DEFAULT_STATS_INTERVAL_SECS,
        }
    }
}

/// Global mouse emulation tuning
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct MouseConfig {
    pub refresh_rate_ms: u64,
    /// Samples averaged for smoothing, 1 disables smoothing
    pub history_size: usize,
    pub weight_modifier: f64,
}

impl Default for MouseConfig {
    fn default() -> Self {
        Self {
            refresh_rate_ms: DEFAULT_MOUSE_REFRESH_MS,
            history_size: DEFAULT_MOUSE_HISTORY_SIZE,
            weight_modifier: DEFAULT_WEIGHT_MODIFIER,
        }
    }
}

/// Configuration of one logical button
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct ButtonConfig {
    pub name: Option<String>,
    pub slots: Vec<Slot>,
    pub toggle: bool,
    pub turbo: Option<TurboSettings>,
    pub set_change: Option<SetChange>,
    pub mouse: MouseSettings,
    /// Idle time after which a cycle starts over from its first segment
    pub cycle_reset_ms: Option<u64>,
}

impl ButtonConfig {
    pub fn with_slots(slots: Vec<Slot>) -> Self {
        Self {
            slots,
            ..Default::default()
        }
    }

    pub fn keys(codes: &[u32]) -> Self {
        Self::with_slots(codes.iter().map(|code| Slot::Key { code: *code }).collect())
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct IndexedButton {
    pub index: usize,
    #[serde(flatten)]
    pub button: ButtonConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct DirectionButtons {
    pub up: ButtonConfig,
    pub right: ButtonConfig,
    pub down: ButtonConfig,
    pub left: ButtonConfig,
}

impl DirectionButtons {
    pub fn get(&self, direction: HatDirection) -> &ButtonConfig {
        match direction {
            HatDirection::Up => &self.up,
            HatDirection::Right => &self.right,
            HatDirection::Down => &self.down,
            HatDirection::Left => &self.left,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AxisConfig {
    pub index: usize,
    pub dead_zone: i32,
    pub max_zone: i32,
    pub throttle: ThrottleMode,
    pub negative: ButtonConfig,
    pub positive: ButtonConfig,
}

impl Default for AxisConfig {
    fn default() -> Self {
        Self {
            index: 0,
            dead_zone: DEFAULT_DEAD_ZONE,
            max_zone: DEFAULT_MAX_ZONE,
            throttle: ThrottleMode::Normal,
            negative: ButtonConfig::default(),
            positive: ButtonConfig::default(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct HatConfig {
    pub index: usize,
    pub buttons: DirectionButtons,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct StickButtonConfig {
    pub direction: StickDirection,
    #[serde(default)]
    pub button: ButtonConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct StickConfig {
    pub x_axis: usize,
    pub y_axis: usize,
    pub dead_zone: i32,
    pub max_zone: i32,
    pub diagonal_range: f64,
    pub mode: StickMode,
    pub buttons: Vec<StickButtonConfig>,
}

impl Default for StickConfig {
    fn default() -> Self {
        Self {
            x_axis: 0,
            y_axis: 1,
            dead_zone: DEFAULT_DEAD_ZONE,
            max_zone: DEFAULT_MAX_ZONE,
            diagonal_range: DEFAULT_DIAGONAL_RANGE,
            mode: StickMode::Standard,
            buttons: Vec::new(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct VDPadConfig {
    pub up: Option<ControlOrigin>,
    pub right: Option<ControlOrigin>,
    pub down: Option<ControlOrigin>,
    pub left: Option<ControlOrigin>,
    pub buttons: DirectionButtons,
}

impl VDPadConfig {
    pub fn bindings(&self) -> [(HatDirection, Option<ControlOrigin>); 4] {
        [
            (HatDirection::Up, self.up),
            (HatDirection::Right, self.right),
            (HatDirection::Down, self.down),
            (HatDirection::Left, self.left),
        ]
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct SetProfile {
    pub name: Option<String>,
    pub axes: Vec<AxisConfig>,
    pub buttons: Vec<IndexedButton>,
    pub hats: Vec<HatConfig>,
    pub sticks: Vec<StickConfig>,
    pub vdpads: Vec<VDPadConfig>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct DeviceProfile {
    pub name: String,
    #[serde(default)]
    pub guid: Option<String>,
    /// Used for devices no other profile matches
    #[serde(default)]
    pub fallback: bool,
    #[serde(default)]
    pub sets: Vec<SetProfile>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub daemon: DaemonConfig,
    pub mouse: MouseConfig,
    pub profiles: Vec<DeviceProfile>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            daemon: DaemonConfig::default(),
            mouse: MouseConfig::default(),
            profiles: vec![standard_gamepad_profile()],
        }
    }
}

impl AppConfig {
    pub fn tuning(&self) -> OutputTuningConfig {
        OutputTuningConfig {
            mouse_refresh_rate: Duration::from_millis(self.mouse.refresh_rate_ms),
            gamepad_poll_rate: Duration::from_millis(self.daemon.gamepad_poll_rate_ms),
            mouse_history_size: self.mouse.history_size,
            weight_modifier: self.mouse.weight_modifier,
        }
        .sanitized()
    }

    /// Profile for a device: exact GUID first, then name, then the fallback profile
    pub fn profile_for(&self, guid: &str, name: &str) -> Option<&DeviceProfile> {
        find_profile(&self.profiles, guid, name)
    }
}

pub fn find_profile<'a>(profiles: &'a [DeviceProfile], guid: &str, name: &str) -> Option<&'a DeviceProfile> {
    profiles
        .iter()
        .find(|profile| profile.guid.as_deref() == Some(guid))
        .or_else(|| profiles.iter().find(|profile| profile.name == name))
        .or_else(|| profiles.iter().find(|profile| profile.fallback))
}

// Key codes follow the Linux input event codes
const KEY_ESC: u32 = 1;
const KEY_TAB: u32 = 15;
const KEY_W: u32 = 17;
const KEY_E: u32 = 18;
const KEY_R: u32 = 19;
const KEY_A: u32 = 30;
const KEY_S: u32 = 31;
const KEY_D: u32 = 32;
const KEY_LEFTSHIFT: u32 = 42;
const KEY_SPACE: u32 = 57;
const KEY_UP: u32 = 103;
const KEY_LEFT: u32 = 105;
const KEY_RIGHT: u32 = 106;
const KEY_DOWN: u32 = 108;
const MOUSE_LEFT: u32 = 1;
const MOUSE_RIGHT: u32 = 3;

fn stick_keys(up: u32, right: u32, down: u32, left: u32) -> Vec<StickButtonConfig> {
    [
        (StickDirection::Up, up),
        (StickDirection::Right, right),
        (StickDirection::Down, down),
        (StickDirection::Left, left),
    ]
    .into_iter()
    .map(|(direction, code)| StickButtonConfig {
        direction,
        button: ButtonConfig::keys(&[code]),
    })
    .collect()
}

fn stick_mouse() -> Vec<StickButtonConfig> {
    [
        (StickDirection::Up, MouseDirection::Up),
        (StickDirection::Right, MouseDirection::Right),
        (StickDirection::Down, MouseDirection::Down),
        (StickDirection::Left, MouseDirection::Left),
    ]
    .into_iter()
    .map(|(direction, mouse)| StickButtonConfig {
        direction,
        button: ButtonConfig::with_slots(vec![Slot::MouseMove { direction: mouse }]),
    })
    .collect()
}

fn trigger(index: usize, button: u32) -> AxisConfig {
    AxisConfig {
        index,
        throttle: ThrottleMode::PositiveHalf,
        positive: ButtonConfig::with_slots(vec![Slot::MouseButton { button }]),
        ..Default::default()
    }
}

/// Profile written with a fresh config: WASD movement, mouse look and a
/// second set with turbo fire, toggled with Select
fn standard_gamepad_profile() -> DeviceProfile {
    let arrows = DirectionButtons {
        up: ButtonConfig::keys(&[KEY_UP]),
        right: ButtonConfig::keys(&[KEY_RIGHT]),
        down: ButtonConfig::keys(&[KEY_DOWN]),
        left: ButtonConfig::keys(&[KEY_LEFT]),
    };
    let switch_to = |target| ButtonConfig {
        set_change: Some(SetChange {
            condition: SetChangeCondition::TwoWay,
            target,
        }),
        ..Default::default()
    };

    let base = SetProfile {
        name: Some("Movement".to_string()),
        axes: vec![trigger(4, MOUSE_RIGHT), trigger(5, MOUSE_LEFT)],
        buttons: vec![
            IndexedButton {
                index: 0,
                button: ButtonConfig::keys(&[KEY_SPACE]),
            },
            IndexedButton {
                index: 1,
                button: ButtonConfig::keys(&[KEY_E]),
            },
            IndexedButton {
                index: 2,
                button: ButtonConfig::keys(&[KEY_R]),
            },
            IndexedButton {
                index: 3,
                button: ButtonConfig::keys(&[KEY_TAB]),
            },
            IndexedButton {
                index: 4,
                button: switch_to(1),
            },
            IndexedButton {
                index: 6,
                button: ButtonConfig::keys(&[KEY_ESC]),
            },
            IndexedButton {
                index: 7,
                button: ButtonConfig::keys(&[KEY_LEFTSHIFT]),
            },
        ],
        hats: vec![HatConfig {
            index: 0,
            buttons: arrows,
        }],
        sticks: vec![
            StickConfig {
                x_axis: 0,
                y_axis: 1,
                buttons: stick_keys(KEY_W, KEY_D, KEY_S, KEY_A),
                ..Default::default()
            },
            StickConfig {
                x_axis: 2,
                y_axis: 3,
                mode: StickMode::EightWay,
                buttons: stick_mouse(),
                ..Default::default()
            },
        ],
        vdpads: Vec::new(),
    };

    let turbo = SetProfile {
        name: Some("Turbo".to_string()),
        buttons: vec![
            IndexedButton {
                index: 0,
                button: ButtonConfig {
                    turbo: Some(TurboSettings::constant(100)),
                    ..ButtonConfig::keys(&[KEY_SPACE])
                },
            },
            IndexedButton {
                index: 4,
                button: switch_to(0),
            },
        ],
        ..base.clone()
    };

    DeviceProfile {
        name: "Standard gamepad".to_string(),
        guid: None,
        fallback: true,
        sets: vec![base, turbo],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::mouse::{AccelCurve, ExtraAcceleration, MouseCurve, MouseMode, DEFAULT_SPRING_HEIGHT};

    #[test]
    fn default_config_survives_toml() {
        let config = AppConfig::default();
        let text = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&text).expect("parse");
        assert_eq!(parsed, config);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let text = r#"
            [mouse]
            history_size = 1

            [[profiles]]
            name = "Arcade stick"
            guid = "03000000"

            [[profiles.sets]]
            [[profiles.sets.buttons]]
            index = 2
            toggle = true
            slots = [{ kind = "key", code = 30 }]
        "#;
        let config: AppConfig = toml::from_str(text).expect("parse");
        assert_eq!(config.daemon, DaemonConfig::default());
        assert_eq!(config.mouse.history_size, 1);
        assert_eq!(config.mouse.refresh_rate_ms, DEFAULT_MOUSE_REFRESH_MS);

        let button = &config.profiles[0].sets[0].buttons[0];
        assert_eq!(button.index, 2);
        assert!(button.button.toggle);
        assert_eq!(button.button.slots, vec![Slot::Key { code: 30 }]);
    }

    #[test]
    fn spring_and_cycle_reset_settings_parse() {
        let text = r#"
            cycle_reset_ms = 1500
            slots = [{ kind = "mouse_move", direction = "up" }]

            [mouse]
            mode = "spring"
            curve = "easing_cubic"

            [mouse.spring]
            width = 800
            relative = true

            [mouse.extra_acceleration]
            curve = "ease_out_sine"
        "#;
        let button: ButtonConfig = toml::from_str(text).expect("parse");
        assert_eq!(button.cycle_reset_ms, Some(1500));
        assert_eq!(button.mouse.mode, MouseMode::Spring);
        assert_eq!(button.mouse.curve, MouseCurve::EasingCubic);
        assert_eq!(button.mouse.spring.width, 800);
        assert_eq!(button.mouse.spring.height, DEFAULT_SPRING_HEIGHT);
        assert!(button.mouse.spring.relative);

        let accel = button.mouse.extra_acceleration.expect("extra acceleration");
        assert_eq!(accel.curve, AccelCurve::EaseOutSine);
        assert_eq!(accel.multiplier, ExtraAcceleration::default().multiplier);
    }

    #[test]
    fn profile_lookup_prefers_guid_then_name() {
        let mut config = AppConfig::default();
        config.profiles.push(DeviceProfile {
            name: "Pad".to_string(),
            guid: Some("abc".to_string()),
            ..Default::default()
        });

        assert_eq!(config.profile_for("abc", "other").map(|p| p.name.as_str()), Some("Pad"));
        assert_eq!(config.profile_for("zzz", "Pad").map(|p| p.name.as_str()), Some("Pad"));
        assert_eq!(
            config.profile_for("zzz", "unknown").map(|p| p.name.as_str()),
            Some("Standard gamepad")
        );
    }

    #[test]
    fn tuning_is_sanitized() {
        let mut config = AppConfig::default();
        config.mouse.history_size = 5000;
        let tuning = config.tuning();
        assert!(tuning.mouse_history_size <= crate::mapping::tuning::MAX_MOUSE_HISTORY_SIZE);
    }
}
