//! Output slots assigned to a logical button
//!
//! A button owns an ordered list of slots. Pressing the button walks the list:
//! key, mouse and wheel slots start firing immediately, `Delay` and `Pause`
//! suspend the walk on a timer, `Cycle` ends the walk and marks where the next
//! press resumes.

use super::output::WheelAxis;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseDirection {
    Up,
    Down,
    Left,
    Right,
}

impl MouseDirection {
    pub fn wheel_axis(self) -> WheelAxis {
        match self {
            MouseDirection::Up | MouseDirection::Down => WheelAxis::Vertical,
            MouseDirection::Left | MouseDirection::Right => WheelAxis::Horizontal,
        }
    }

    /// Wheel ticks emitted per repeat: up and right scroll positive
    pub fn wheel_ticks(self) -> i32 {
        match self {
            MouseDirection::Up | MouseDirection::Right => 1,
            MouseDirection::Down | MouseDirection::Left => -1,
        }
    }

    /// Unit cursor vector in screen coordinates (y grows downwards)
    pub fn unit_vector(self) -> (f64, f64) {
        match self {
            MouseDirection::Up => (0.0, -1.0),
            MouseDirection::Down => (0.0, 1.0),
            MouseDirection::Left => (-1.0, 0.0),
            MouseDirection::Right => (1.0, 0.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Slot {
    Key { code: u32 },
    MouseButton { button: u32 },
    MouseMove { direction: MouseDirection },
    MouseWheel { direction: MouseDirection },
    Delay { ms: u64 },
    Pause { ms: u64 },
    Cycle,
    SetChange { set: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_deserialize_from_tagged_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            slots: Vec<Slot>,
        }

        let parsed: Wrapper = toml::from_str(
            r#"
            slots = [
                { kind = "key", code = 30 },
                { kind = "delay", ms = 50 },
                { kind = "mouse_move", direction = "left" },
                { kind = "cycle" },
                { kind = "set_change", set = 1 },
            ]
            "#,
        )
        .expect("valid slot list");

        assert_eq!(
            parsed.slots,
            vec![
                Slot::Key { code: 30 },
                Slot::Delay { ms: 50 },
                Slot::MouseMove {
                    direction: MouseDirection::Left
                },
                Slot::Cycle,
                Slot::SetChange { set: 1 },
            ]
        );
    }

    #[test]
    fn wheel_directions_map_to_axes() {
        assert_eq!(MouseDirection::Up.wheel_axis(), WheelAxis::Vertical);
        assert_eq!(MouseDirection::Left.wheel_axis(), WheelAxis::Horizontal);
        assert_eq!(MouseDirection::Down.wheel_ticks(), -1);
    }
}
