//! gilrs implementation of [`InputBackend`]
//!
//! Gamepads that have an SDL mapping are exposed as game controllers with a
//! fixed layout:
//!
//! ```text
//! axes    0 LX   1 LY   2 RX   3 RY   4 LT   5 RT      (Y axes point down)
//! buttons 0 South  1 East  2 West  3 North  4 Select  5 Mode  6 Start
//!         7 LeftThumb  8 RightThumb  9 LeftTrigger  10 RightTrigger
//! hat     0 built from the four D-pad buttons
//! ```
//!
//! Everything else is a plain joystick whose raw codes get indexes in the
//! order they first report.

use super::axis::AXIS_MAX;
use super::backend::{BackendError, DeviceDescriptor, DeviceId, DeviceMode, InputBackend, RawEvent};
use super::hat::HatDirection;
use gilrs::ev::Code;
use gilrs::{Axis, Button, Event, EventType, GamepadId, Gilrs, MappingSource};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, error, info, warn};

const CONTROLLER_AXES: usize = 6;
const CONTROLLER_BUTTONS: usize = 11;
const JOYSTICK_MAX_AXES: usize = 8;
const JOYSTICK_MAX_BUTTONS: usize = 32;

const TRIGGER_LEFT_AXIS: usize = 4;
const TRIGGER_RIGHT_AXIS: usize = 5;

#[derive(Debug)]
struct OpenedDevice {
    mode: DeviceMode,
    dpad: u8,
    axis_codes: Vec<Code>,
    button_codes: Vec<Code>,
}

pub struct GilrsBackend {
    gilrs: Gilrs,
    indexes: Vec<GamepadId>,
    opened: HashMap<DeviceId, OpenedDevice>,
    queue: VecDeque<RawEvent>,
}

impl GilrsBackend {
    pub fn create() -> Result<Self, BackendError> {
        info!("Initializing gilrs controller interface");
        let gilrs = match Gilrs::new() {
            Ok(g) => {
                info!("Successfully initialized gilrs");
                g
            }
            Err(e) => {
                error!("Failed to initialize gilrs: {}", e);
                return Err(BackendError::InitializationError(e.to_string()));
            }
        };

        let mut backend = Self {
            gilrs,
            indexes: Vec::new(),
            opened: HashMap::new(),
            queue: VecDeque::new(),
        };
        backend.reindex();
        Ok(backend)
    }

    fn reindex(&mut self) {
        self.indexes = self.gilrs.gamepads().map(|(id, _)| id).collect();
    }

    fn device_id(id: GamepadId) -> DeviceId {
        DeviceId(usize::from(id))
    }

    /// Moves every pending gilrs event into the typed queue
    fn pump(&mut self) {
        while let Some(Event { id, event, .. }) = self.gilrs.next_event() {
            self.translate(id, event);
        }
    }

    fn translate(&mut self, id: GamepadId, event: EventType) {
        let device = Self::device_id(id);
        match event {
            EventType::Connected => {
                self.reindex();
                if let Some(index) = self.indexes.iter().position(|known| *known == id) {
                    info!("Gamepad {} connected at index {}", id, index);
                    self.queue.push_back(RawEvent::DeviceAdded { index });
                }
                return;
            }
            EventType::Disconnected => {
                info!("Gamepad {} disconnected", id);
                self.queue.push_back(RawEvent::DeviceRemoved { device });
                self.reindex();
                return;
            }
            _ => {}
        }

        let Some(opened) = self.opened.get_mut(&device) else {
            debug!("Event for unopened gamepad {}: {:?}", id, event);
            return;
        };

        let translated = match opened.mode {
            DeviceMode::GameController => translate_controller(device, opened, event),
            DeviceMode::Joystick => translate_joystick(device, opened, event),
        };
        if let Some(raw) = translated {
            self.queue.push_back(raw);
        }
    }
}

fn scale_axis(value: f32) -> i32 {
    (value.clamp(-1.0, 1.0) * AXIS_MAX as f32).round() as i32
}

/// Triggers report 0..1, the axis range wants -AXIS_MAX..AXIS_MAX
fn scale_trigger(value: f32) -> i32 {
    scale_axis(value.clamp(0.0, 1.0) * 2.0 - 1.0)
}

fn controller_button_index(button: Button) -> Option<usize> {
    let index = match button {
        Button::South => 0,
        Button::East => 1,
        Button::West => 2,
        Button::North => 3,
        Button::Select => 4,
        Button::Mode => 5,
        Button::Start => 6,
        Button::LeftThumb => 7,
        Button::RightThumb => 8,
        Button::LeftTrigger => 9,
        Button::RightTrigger => 10,
        _ => return None,
    };
    Some(index)
}

fn dpad_direction(button: Button) -> Option<HatDirection> {
    match button {
        Button::DPadUp => Some(HatDirection::Up),
        Button::DPadRight => Some(HatDirection::Right),
        Button::DPadDown => Some(HatDirection::Down),
        Button::DPadLeft => Some(HatDirection::Left),
        _ => None,
    }
}

fn translate_controller(device: DeviceId, opened: &mut OpenedDevice, event: EventType) -> Option<RawEvent> {
    let (button, pressed) = match event {
        EventType::AxisChanged(axis, value, _) => {
            let (index, value) = match axis {
                Axis::LeftStickX => (0, scale_axis(value)),
                Axis::LeftStickY => (1, -scale_axis(value)),
                Axis::RightStickX => (2, scale_axis(value)),
                Axis::RightStickY => (3, -scale_axis(value)),
                _ => return None,
            };
            return Some(RawEvent::AxisMotion {
                device,
                axis: index,
                value,
            });
        }
        EventType::ButtonChanged(Button::LeftTrigger2, value, _) => {
            return Some(RawEvent::AxisMotion {
                device,
                axis: TRIGGER_LEFT_AXIS,
                value: scale_trigger(value),
            });
        }
        EventType::ButtonChanged(Button::RightTrigger2, value, _) => {
            return Some(RawEvent::AxisMotion {
                device,
                axis: TRIGGER_RIGHT_AXIS,
                value: scale_trigger(value),
            });
        }
        EventType::ButtonPressed(button, _) => (button, true),
        EventType::ButtonReleased(button, _) => (button, false),
        _ => return None,
    };

    if let Some(direction) = dpad_direction(button) {
        let previous = opened.dpad;
        if pressed {
            opened.dpad |= direction.mask();
        } else {
            opened.dpad &= !direction.mask();
        }
        if previous == opened.dpad {
            return None;
        }
        return Some(RawEvent::HatMotion {
            device,
            hat: 0,
            value: opened.dpad,
        });
    }

    controller_button_index(button).map(|button| RawEvent::Button {
        device,
        button,
        pressed,
    })
}

/// Index for `code`, assigning the next free one on first sight
fn code_index(codes: &mut Vec<Code>, code: Code, limit: usize) -> Option<usize> {
    if let Some(index) = codes.iter().position(|known| *known == code) {
        return Some(index);
    }
    if codes.len() >= limit {
        warn!("Ignoring raw code {} beyond the first {} controls", code, limit);
        return None;
    }
    codes.push(code);
    Some(codes.len() - 1)
}

fn translate_joystick(device: DeviceId, opened: &mut OpenedDevice, event: EventType) -> Option<RawEvent> {
    match event {
        EventType::AxisChanged(_, value, code) => {
            let axis = code_index(&mut opened.axis_codes, code, JOYSTICK_MAX_AXES)?;
            Some(RawEvent::AxisMotion {
                device,
                axis,
                value: scale_axis(value),
            })
        }
        EventType::ButtonPressed(_, code) | EventType::ButtonReleased(_, code) => {
            let pressed = matches!(event, EventType::ButtonPressed(..));
            let button = code_index(&mut opened.button_codes, code, JOYSTICK_MAX_BUTTONS)?;
            Some(RawEvent::Button {
                device,
                button,
                pressed,
            })
        }
        _ => None,
    }
}

impl InputBackend for GilrsBackend {
    fn device_count(&mut self) -> usize {
        self.pump();
        self.reindex();
        self.indexes.len()
    }

    fn device_guid(&self, index: usize) -> Option<String> {
        let id = *self.indexes.get(index)?;
        let gamepad = self.gilrs.connected_gamepad(id)?;
        Some(gamepad.uuid().iter().map(|byte| format!("{:02x}", byte)).collect())
    }

    fn is_game_controller(&self, index: usize) -> bool {
        self.indexes
            .get(index)
            .and_then(|id| self.gilrs.connected_gamepad(*id))
            .map_or(false, |gamepad| gamepad.mapping_source() != MappingSource::None)
    }

    fn open_device(&mut self, index: usize, mode: DeviceMode) -> Result<DeviceDescriptor, BackendError> {
        let id = *self
            .indexes
            .get(index)
            .ok_or_else(|| BackendError::OpenFailed(format!("no gamepad at index {}", index)))?;
        let guid = self.device_guid(index).unwrap_or_default();
        let gamepad = self
            .gilrs
            .connected_gamepad(id)
            .ok_or_else(|| BackendError::OpenFailed(format!("gamepad {} is not connected", id)))?;

        let (num_axes, num_buttons, num_hats) = match mode {
            DeviceMode::GameController => (CONTROLLER_AXES, CONTROLLER_BUTTONS, 1),
            DeviceMode::Joystick => (JOYSTICK_MAX_AXES, JOYSTICK_MAX_BUTTONS, 0),
        };
        let descriptor = DeviceDescriptor {
            id: Self::device_id(id),
            index,
            name: gamepad.name().to_string(),
            guid,
            mode,
            num_axes,
            num_buttons,
            num_hats,
        };

        debug!("Opened gamepad {:?}", descriptor);
        self.opened.insert(
            descriptor.id,
            OpenedDevice {
                mode,
                dpad: 0,
                axis_codes: Vec::new(),
                button_codes: Vec::new(),
            },
        );
        Ok(descriptor)
    }

    fn instance_id(&self, index: usize) -> Option<DeviceId> {
        self.indexes.get(index).map(|id| Self::device_id(*id))
    }

    fn poll_event(&mut self) -> Option<RawEvent> {
        if self.queue.is_empty() {
            self.pump();
        }
        self.queue.pop_front()
    }

    fn close_device(&mut self, device: DeviceId) {
        if self.opened.remove(&device).is_some() {
            debug!("Closed gamepad {}", device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_range_maps_onto_full_axis() {
        assert_eq!(scale_trigger(0.0), -AXIS_MAX);
        assert_eq!(scale_trigger(1.0), AXIS_MAX);
        assert_eq!(scale_trigger(0.5), 0);
    }

    #[test]
    fn controller_layout_covers_face_and_shoulder_buttons() {
        assert_eq!(controller_button_index(Button::South), Some(0));
        assert_eq!(controller_button_index(Button::RightTrigger), Some(10));
        assert_eq!(controller_button_index(Button::DPadUp), None);
        assert_eq!(dpad_direction(Button::DPadLeft), Some(HatDirection::Left));
    }
}
