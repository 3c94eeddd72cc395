//! Controller subsystem: from raw backend samples to logical button transitions
//!
//! # Architecture
//!
//! ```text
//! InputBackend ──► InputDaemon::poll
//!   (gilrs)          ├─ pass 1: bit status / release arrays
//!                    ├─ unplug rewrite
//!                    ├─ pass 2: queue on Axis / DPad / button
//!                    └─ activation: sticks, axes, hats, vdpads, buttons
//!                                      │
//!                                      ▼
//!                               mapping::ActionEngine ──► OutputBackend
//! ```
//!
//! [`daemon_handle`] runs the loop on a dedicated thread and talks to the rest
//! of the application over channels only.

pub mod axis;
pub mod backend;
pub mod bit_status;
pub mod daemon_handle;
pub mod device;
pub mod gilrs_backend;
pub mod hat;
pub mod input_daemon;
pub mod registry;
pub mod stick;
pub mod vdpad;

pub use backend::{BackendError, DeviceDescriptor, DeviceId, DeviceMode, InputBackend, RawEvent};
pub use daemon_handle::{DaemonCommand, DaemonError, DaemonSettings, InputDaemonHandle};
pub use device::{ControlSet, Device};
pub use input_daemon::{DaemonNotification, InputDaemon, PollReport};
pub use registry::{DeviceRegistry, DeviceSummary};
