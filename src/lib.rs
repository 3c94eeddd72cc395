//! Gamepad to keyboard and mouse mapping
//!
//! - [`controller`]: devices, per-control state and the poll thread
//! - [`mapping`]: logical buttons, slots, timers and output dispatch
//! - [`persistence`]: configuration model and file handling

pub mod controller;
pub mod mapping;
pub mod persistence;
