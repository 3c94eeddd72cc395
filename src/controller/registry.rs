//! Open devices keyed by their backend instance id

use super::backend::{BackendError, DeviceId, DeviceMode, InputBackend};
use super::device::Device;
use crate::mapping::button::ButtonKey;
use crate::mapping::engine::ActionEngine;
use crate::mapping::mouse::MouseMotion;
use crate::mapping::scheduler::TimerKind;
use crate::persistence::{find_profile, DeviceProfile};
use std::collections::{BTreeMap, HashSet};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Read-only view of one device for status reporting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSummary {
    pub id: DeviceId,
    pub index: usize,
    pub name: String,
    pub guid: String,
    pub mode: DeviceMode,
    pub active_set: usize,
    pub set_count: usize,
    pub events_processed: u64,
}

pub struct DeviceRegistry {
    devices: BTreeMap<DeviceId, Device>,
    profiles: Vec<DeviceProfile>,
    disabled_game_controllers: HashSet<String>,
}

impl DeviceRegistry {
    pub fn new(profiles: Vec<DeviceProfile>, disabled_game_controllers: impl IntoIterator<Item = String>) -> Self {
        Self {
            devices: BTreeMap::new(),
            profiles,
            disabled_game_controllers: disabled_game_controllers.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn contains(&self, id: DeviceId) -> bool {
        self.devices.contains_key(&id)
    }

    pub fn device(&self, id: DeviceId) -> Option<&Device> {
        self.devices.get(&id)
    }

    pub fn device_mut(&mut self, id: DeviceId) -> Option<&mut Device> {
        self.devices.get_mut(&id)
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    /// Closes every device and reopens whatever the backend enumerates now.
    /// Returns the number of devices open afterwards.
    pub fn refresh_devices(&mut self, backend: &mut dyn InputBackend, engine: &mut ActionEngine, now: Instant) -> usize {
        let open: Vec<DeviceId> = self.devices.keys().copied().collect();
        for id in open {
            self.remove_device(id, backend, engine, now);
        }

        let count = backend.device_count();
        for index in 0..count {
            if let Err(e) = self.add_device(index, backend) {
                warn!("Skipping device at index {}: {}", index, e);
            }
        }

        info!("Device refresh finished: {} of {} devices open", self.devices.len(), count);
        self.devices.len()
    }

    /// Opens the device at `index`. Devices already open are left untouched.
    pub fn add_device(&mut self, index: usize, backend: &mut dyn InputBackend) -> Result<DeviceId, BackendError> {
        if let Some(id) = backend.instance_id(index) {
            if self.devices.contains_key(&id) {
                debug!("Device at index {} already open as {}", index, id);
                return Ok(id);
            }
        }

        let guid = backend.device_guid(index).unwrap_or_default();
        let mode = if !backend.is_game_controller(index) {
            DeviceMode::Joystick
        } else if self.disabled_game_controllers.contains(&guid) {
            info!("Game controller mapping disabled for {}, opening as joystick", guid);
            DeviceMode::Joystick
        } else {
            DeviceMode::GameController
        };

        let descriptor = backend.open_device(index, mode)?;
        let id = descriptor.id;
        if self.devices.contains_key(&id) {
            debug!("Device {} reported twice, ignoring duplicate", id);
            return Ok(id);
        }

        let profile = find_profile(&self.profiles, &descriptor.guid, &descriptor.name);
        if let Some(profile) = profile {
            debug!("Using profile \"{}\" for {}", profile.name, descriptor.name);
        }
        info!(
            "Opened {} {} as {:?}: {} axes, {} buttons, {} hats",
            descriptor.name, id, descriptor.mode, descriptor.num_axes, descriptor.num_buttons, descriptor.num_hats
        );
        let device = Device::with_profile(descriptor, profile);
        self.devices.insert(id, device);
        Ok(id)
    }

    /// Releases everything the device holds and closes it. Unknown ids are a no-op.
    pub fn remove_device(
        &mut self,
        id: DeviceId,
        backend: &mut dyn InputBackend,
        engine: &mut ActionEngine,
        now: Instant,
    ) -> bool {
        let Some(mut device) = self.devices.remove(&id) else {
            debug!("Removal of unknown device {} ignored", id);
            return false;
        };

        device.release_all(engine, now);
        let dropped = engine.forget_device(id);
        backend.close_device(id);
        info!("Closed {} {} ({} pending timers dropped)", device.name(), id, dropped);
        true
    }

    /// Backend indexes shift when devices come and go
    pub fn refresh_indexes(&mut self, backend: &mut dyn InputBackend) {
        for index in 0..backend.device_count() {
            if let Some(device) = backend
                .instance_id(index)
                .and_then(|id| self.devices.get_mut(&id))
            {
                device.set_index(index);
            }
        }
    }

    /// Returns the device and its new set when the timer caused a set change
    pub fn dispatch_timer(
        &mut self,
        key: ButtonKey,
        kind: TimerKind,
        engine: &mut ActionEngine,
        now: Instant,
    ) -> Option<(DeviceId, usize)> {
        match self.devices.get_mut(&key.device) {
            Some(device) => device
                .dispatch_timer(key, kind, engine, now)
                .map(|set| (key.device, set)),
            None => {
                debug!("Dropping {:?} timer for closed device {}", kind, key.device);
                None
            }
        }
    }

    /// Sums the motion of every active movement slot and moves the cursor once
    pub fn invoke_mouse_events(&mut self, engine: &mut ActionEngine, now: Instant) -> bool {
        if !engine.mouse.is_active() {
            return false;
        }

        let mut motion = MouseMotion::default();
        for key in engine.mouse.pending_buttons() {
            match self
                .devices
                .get_mut(&key.device)
                .and_then(|device| device.mouse_motion(key, now))
            {
                Some(part) => motion.accumulate(part),
                // Button went away without releasing its slots
                None => engine.mouse.unregister(&key),
            }
        }

        engine.emit_mouse_motion(motion, now);
        true
    }

    pub fn reset_active_button_mouse_distances(&mut self, engine: &mut ActionEngine) {
        for device in self.devices.values_mut() {
            device.reset_mouse_distances();
        }
        engine.mouse.reset_distances();
    }

    pub fn release_all(&mut self, engine: &mut ActionEngine, now: Instant) {
        for device in self.devices.values_mut() {
            device.release_all(engine, now);
        }
    }

    pub fn summaries(&self) -> Vec<DeviceSummary> {
        self.devices
            .values()
            .map(|device| DeviceSummary {
                id: device.id(),
                index: device.index(),
                name: device.name().to_string(),
                guid: device.guid().to_string(),
                mode: device.descriptor().mode,
                active_set: device.active_set(),
                set_count: device.set_count(),
                events_processed: device.events_processed(),
            })
            .collect()
    }
}
