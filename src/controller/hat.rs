//! Hats and the direction-button block they share with virtual D-pads
//!
//! A hat sample is a bit set of the four cardinal directions. Diagonals have
//! two bits set and press both direction buttons.
//!
//! ```text
//!        Up (1)
//! Left (8)  +  Right (2)        Up|Right = 3, Down|Left = 12, centered = 0
//!       Down (4)
//! ```

use crate::mapping::button::{ControlOrigin, LogicalButton};
use crate::mapping::engine::ActionContext;
use crate::persistence::DirectionButtons;
use serde::{Deserialize, Serialize};

pub const HAT_CENTERED: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HatDirection {
    Up,
    Right,
    Down,
    Left,
}

impl HatDirection {
    pub const ALL: [HatDirection; 4] = [
        HatDirection::Up,
        HatDirection::Right,
        HatDirection::Down,
        HatDirection::Left,
    ];

    pub fn mask(self) -> u8 {
        match self {
            HatDirection::Up => 1,
            HatDirection::Right => 2,
            HatDirection::Down => 4,
            HatDirection::Left => 8,
        }
    }

    pub fn index(self) -> usize {
        match self {
            HatDirection::Up => 0,
            HatDirection::Right => 1,
            HatDirection::Down => 2,
            HatDirection::Left => 3,
        }
    }

    pub fn is_set(self, value: u8) -> bool {
        value & self.mask() != 0
    }
}

/// Four direction buttons driven by a combined direction value
#[derive(Debug, Clone)]
pub struct DPad {
    value: u8,
    pending: Option<u8>,
    buttons: [LogicalButton; 4],
}

impl DPad {
    pub fn new(origin: impl Fn(HatDirection) -> ControlOrigin) -> Self {
        Self {
            value: HAT_CENTERED,
            pending: None,
            buttons: HatDirection::ALL.map(|direction| LogicalButton::new(origin(direction))),
        }
    }

    pub fn for_hat(hat: usize) -> Self {
        Self::new(|direction| ControlOrigin::HatDerived { hat, direction })
    }

    pub fn for_vdpad(vdpad: usize) -> Self {
        Self::new(|direction| ControlOrigin::Virtual { vdpad, direction })
    }

    pub fn apply_config(&mut self, config: &DirectionButtons) {
        for direction in HatDirection::ALL {
            let button = &mut self.buttons[direction.index()];
            *button = LogicalButton::from_config(button.origin(), config.get(direction));
        }
    }

    pub fn with_button(mut self, direction: HatDirection, button: LogicalButton) -> Self {
        self.buttons[direction.index()] = button;
        self
    }

    pub fn value(&self) -> u8 {
        self.value
    }

    pub fn is_active(value: u8) -> bool {
        value & 0x0F != HAT_CENTERED
    }

    pub fn button(&self, direction: HatDirection) -> &LogicalButton {
        &self.buttons[direction.index()]
    }

    pub fn button_mut(&mut self, direction: HatDirection) -> &mut LogicalButton {
        &mut self.buttons[direction.index()]
    }

    pub fn buttons(&self) -> &[LogicalButton; 4] {
        &self.buttons
    }

    pub fn buttons_mut(&mut self) -> &mut [LogicalButton; 4] {
        &mut self.buttons
    }

    pub fn queue_pending_event(&mut self, value: u8) {
        self.pending = Some(value & 0x0F);
    }

    pub fn has_pending_event(&self) -> bool {
        self.pending.is_some()
    }

    pub fn activate_pending_event(&mut self, ctx: &mut ActionContext<'_>) -> bool {
        match self.pending.take() {
            Some(value) => {
                self.joy_event(value, false, ctx);
                true
            }
            None => false,
        }
    }

    pub fn joy_event(&mut self, value: u8, ignore_sets: bool, ctx: &mut ActionContext<'_>) {
        let value = value & 0x0F;
        self.value = value;
        for direction in HatDirection::ALL {
            let button = &mut self.buttons[direction.index()];
            if button.is_button_pressed() && !direction.is_set(value) {
                button.joy_event(false, ignore_sets, ctx);
            }
        }
        for direction in HatDirection::ALL {
            let button = &mut self.buttons[direction.index()];
            if !button.is_button_pressed() && direction.is_set(value) {
                button.joy_event(true, ignore_sets, ctx);
            }
        }
    }

    pub fn release_all(&mut self, ctx: &mut ActionContext<'_>) {
        self.pending = None;
        self.value = HAT_CENTERED;
        for button in self.buttons.iter_mut() {
            button.force_release(ctx);
        }
    }
}
