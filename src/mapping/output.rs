//! Output action dispatch
//!
//! The logical button state machines never talk to a key-injection backend
//! directly. They go through [`OutputDispatcher`], which reference-counts held
//! keys and mouse buttons so that overlapping slots sharing a code produce a
//! single down/up pair, and so that a release can never be emitted without a
//! matching press.
//!
//! ```text
//! LogicalButton ──► OutputDispatcher ──► dyn OutputBackend ──► OS / app thread
//!                   (press counting)     (ChannelOutput)
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Scroll wheel axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WheelAxis {
    Vertical,
    Horizontal,
}

/// One emitted output action, as seen by the application side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputAction {
    Key { code: u32, pressed: bool },
    MouseButton { button: u32, pressed: bool },
    CursorMove { dx: i32, dy: i32 },
    Wheel { axis: WheelAxis, ticks: i32 },
}

/// Sink for output actions. Implementations inject keys, move the cursor or
/// forward the actions elsewhere.
pub trait OutputBackend: Send {
    fn send_key(&mut self, code: u32, pressed: bool);
    fn send_mouse_button(&mut self, button: u32, pressed: bool);
    fn move_mouse_cursor(&mut self, dx: i32, dy: i32);
    fn move_mouse_wheel(&mut self, axis: WheelAxis, ticks: i32);
}

/// Forwards every action over an unbounded channel to the application thread
pub struct ChannelOutput {
    sender: mpsc::UnboundedSender<OutputAction>,
    dropped: u64,
}

impl ChannelOutput {
    pub fn new(sender: mpsc::UnboundedSender<OutputAction>) -> Self {
        Self { sender, dropped: 0 }
    }

    fn forward(&mut self, action: OutputAction) {
        if let Err(e) = self.sender.send(action) {
            self.dropped += 1;
            // Receiver is gone for good, only report it once
            if self.dropped == 1 {
                warn!("Output receiver closed, dropping actions: {}", e);
            } else {
                debug!("Dropped output action {:?} ({} total)", action, self.dropped);
            }
        }
    }
}

impl OutputBackend for ChannelOutput {
    fn send_key(&mut self, code: u32, pressed: bool) {
        self.forward(OutputAction::Key { code, pressed });
    }

    fn send_mouse_button(&mut self, button: u32, pressed: bool) {
        self.forward(OutputAction::MouseButton { button, pressed });
    }

    fn move_mouse_cursor(&mut self, dx: i32, dy: i32) {
        self.forward(OutputAction::CursorMove { dx, dy });
    }

    fn move_mouse_wheel(&mut self, axis: WheelAxis, ticks: i32) {
        self.forward(OutputAction::Wheel { axis, ticks });
    }
}

/// Press-counting front end for an [`OutputBackend`]
pub struct OutputDispatcher {
    backend: Box<dyn OutputBackend>,
    held_keys: HashMap<u32, u32>,
    held_mouse_buttons: HashMap<u32, u32>,
    dispatched: u64,
}

impl OutputDispatcher {
    pub fn new(backend: Box<dyn OutputBackend>) -> Self {
        Self {
            backend,
            held_keys: HashMap::new(),
            held_mouse_buttons: HashMap::new(),
            dispatched: 0,
        }
    }

    pub fn press_key(&mut self, code: u32) {
        let count = self.held_keys.entry(code).or_insert(0);
        *count += 1;
        if *count == 1 {
            self.backend.send_key(code, true);
            self.dispatched += 1;
        }
    }

    pub fn release_key(&mut self, code: u32) {
        match self.held_keys.get_mut(&code) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                self.held_keys.remove(&code);
                self.backend.send_key(code, false);
                self.dispatched += 1;
            }
            None => debug!("Release of key {} without matching press ignored", code),
        }
    }

    pub fn press_mouse_button(&mut self, button: u32) {
        let count = self.held_mouse_buttons.entry(button).or_insert(0);
        *count += 1;
        if *count == 1 {
            self.backend.send_mouse_button(button, true);
            self.dispatched += 1;
        }
    }

    pub fn release_mouse_button(&mut self, button: u32) {
        match self.held_mouse_buttons.get_mut(&button) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                self.held_mouse_buttons.remove(&button);
                self.backend.send_mouse_button(button, false);
                self.dispatched += 1;
            }
            None => debug!(
                "Release of mouse button {} without matching press ignored",
                button
            ),
        }
    }

    pub fn move_cursor(&mut self, dx: i32, dy: i32) {
        if dx == 0 && dy == 0 {
            return;
        }
        self.backend.move_mouse_cursor(dx, dy);
        self.dispatched += 1;
    }

    pub fn scroll(&mut self, axis: WheelAxis, ticks: i32) {
        if ticks == 0 {
            return;
        }
        self.backend.move_mouse_wheel(axis, ticks);
        self.dispatched += 1;
    }

    /// Number of slots currently holding `code` down
    pub fn key_hold_count(&self, code: u32) -> u32 {
        self.held_keys.get(&code).copied().unwrap_or(0)
    }

    pub fn is_idle(&self) -> bool {
        self.held_keys.is_empty() && self.held_mouse_buttons.is_empty()
    }

    /// Total actions handed to the backend since creation
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }
}
