//! Input backend seam
//!
//! The poll loop only needs a handful of operations from whatever library
//! talks to the hardware: enumerate, open by index, a stable id, drain one
//! event, close. [`InputBackend`] captures exactly that so the daemon can be
//! driven by gilrs in production and by scripted backends in tests.

use thiserror::Error;

/// Stable identity the backend assigns a device when it is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub usize);

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMode {
    /// Standardized layout from a controller mapping database
    GameController,
    /// Raw indexes in the order the hardware reports them
    Joystick,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub id: DeviceId,
    pub index: usize,
    pub name: String,
    pub guid: String,
    pub mode: DeviceMode,
    pub num_axes: usize,
    pub num_buttons: usize,
    pub num_hats: usize,
}

/// Typed raw events as drained from the backend queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawEvent {
    Button {
        device: DeviceId,
        button: usize,
        pressed: bool,
    },
    AxisMotion {
        device: DeviceId,
        axis: usize,
        value: i32,
    },
    HatMotion {
        device: DeviceId,
        hat: usize,
        value: u8,
    },
    DeviceAdded {
        index: usize,
    },
    DeviceRemoved {
        device: DeviceId,
    },
    Quit,
}

impl RawEvent {
    /// Device a control event belongs to
    pub fn device(&self) -> Option<DeviceId> {
        match *self {
            RawEvent::Button { device, .. }
            | RawEvent::AxisMotion { device, .. }
            | RawEvent::HatMotion { device, .. }
            | RawEvent::DeviceRemoved { device } => Some(device),
            RawEvent::DeviceAdded { .. } | RawEvent::Quit => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Failed to initialize input backend: {0}")]
    InitializationError(String),

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Unknown device: {0}")]
    UnknownDevice(String),
}

/// Lives on the poll thread for its whole life; see `InputDaemonHandle::spawn`
pub trait InputBackend {
    /// Number of devices currently enumerable
    fn device_count(&mut self) -> usize;

    fn device_guid(&self, index: usize) -> Option<String>;

    fn is_game_controller(&self, index: usize) -> bool;

    fn open_device(&mut self, index: usize, mode: DeviceMode) -> Result<DeviceDescriptor, BackendError>;

    /// Identity of an already opened device at `index`
    fn instance_id(&self, index: usize) -> Option<DeviceId>;

    /// Drains one queued event, `None` when the queue is empty
    fn poll_event(&mut self) -> Option<RawEvent>;

    fn close_device(&mut self, device: DeviceId);
}
