//! Two-pass poll loop
//!
//! One call to [`InputDaemon::poll`] drains everything the backend has queued
//! and processes it as a single batch:
//!
//! ```text
//! drain ─► pass 1: bit status + release arrays per device
//!       ─► unplug rewrite: axis samples of unplugging devices → release values
//!       ─► pass 2: queue samples on controls, hot-plug, quit
//!       ─► activation of every touched device
//!       ─► immediate mouse tick, idle reset timer
//! ```
//!
//! Deferred work (turbo, wheel repeats, slot delays, mouse refresh) lives in
//! the engine's scheduler and runs from [`InputDaemon::fire_due_timers`].

use super::axis::Axis;
use super::backend::{DeviceId, InputBackend, RawEvent};
use super::bit_status::{AxisReleaseArray, DeviceBitArrayStatus};
use super::hat::{DPad, HatDirection};
use super::registry::DeviceRegistry;
use crate::mapping::button::ControlOrigin;
use crate::mapping::engine::ActionEngine;
use crate::mapping::error::MappingError;
use crate::mapping::scheduler::{TimerKind, TimerOwner};
use crate::mapping::tuning::TuningSnapshot;
use std::collections::BTreeMap;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Events the poll thread reports to the application side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonNotification {
    DeviceAdded { device: DeviceId, name: String },
    DeviceRemoved { device: DeviceId },
    DevicesRefreshed { count: usize },
    SetChanged { device: DeviceId, set: usize },
    Stopped,
}

/// Outcome of one poll cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub events: usize,
    pub rewritten: usize,
    pub touched: Vec<DeviceId>,
    pub quit: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DaemonStats {
    pub cycles: u64,
    pub events: u64,
    pub unplug_rewrites: u64,
    pub timers_fired: u64,
}

/// What pass one learned about a batch
#[derive(Debug, Default)]
struct BatchInspection {
    statuses: BTreeMap<DeviceId, DeviceBitArrayStatus>,
    releases: BTreeMap<DeviceId, AxisReleaseArray>,
    release_evidence: bool,
}

pub struct InputDaemon {
    backend: Box<dyn InputBackend>,
    registry: DeviceRegistry,
    engine: ActionEngine,
    tuning: Option<watch::Receiver<TuningSnapshot>>,
    notifier: Option<mpsc::UnboundedSender<DaemonNotification>>,
    stats: DaemonStats,
}

impl InputDaemon {
    pub fn new(backend: Box<dyn InputBackend>, registry: DeviceRegistry, engine: ActionEngine) -> Self {
        Self {
            backend,
            registry,
            engine,
            tuning: None,
            notifier: None,
            stats: DaemonStats::default(),
        }
    }

    pub fn with_tuning(mut self, tuning: watch::Receiver<TuningSnapshot>) -> Self {
        self.tuning = Some(tuning);
        self
    }

    pub fn with_notifier(mut self, notifier: mpsc::UnboundedSender<DaemonNotification>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn engine(&self) -> &ActionEngine {
        &self.engine
    }

    pub fn stats(&self) -> &DaemonStats {
        &self.stats
    }

    fn notify(&self, notification: DaemonNotification) {
        if let Some(notifier) = &self.notifier {
            if notifier.send(notification).is_err() {
                debug!("Notification receiver dropped");
            }
        }
    }

    /// Picks up the newest tuning snapshot if the application published one
    fn sync_tuning(&mut self) {
        let Some(tuning) = self.tuning.as_mut() else {
            return;
        };
        if tuning.has_changed().unwrap_or(false) {
            let snapshot = tuning.borrow_and_update().clone();
            debug!("Applying tuning snapshot: {:?}", snapshot);
            self.engine.set_tuning(snapshot);
        }
    }

    pub fn refresh_devices(&mut self, now: Instant) -> usize {
        let count = self
            .registry
            .refresh_devices(self.backend.as_mut(), &mut self.engine, now);
        for summary in self.registry.summaries() {
            self.notify(DaemonNotification::DeviceAdded {
                device: summary.id,
                name: summary.name,
            });
        }
        self.notify(DaemonNotification::DevicesRefreshed { count });
        count
    }

    pub fn poll(&mut self, now: Instant) -> PollReport {
        self.sync_tuning();
        self.stats.cycles += 1;

        // Drain everything queued since the last cycle
        let mut batch = Vec::new();
        while let Some(event) = self.backend.poll_event() {
            batch.push(event);
        }

        let mut report = PollReport {
            events: batch.len(),
            ..Default::default()
        };
        if batch.is_empty() {
            return report;
        }
        self.stats.events += batch.len() as u64;
        // Real input arrived, the idle reset is no longer needed
        self.engine.scheduler.cancel(TimerOwner::Daemon, TimerKind::IdleReset);

        let inspection = self.first_input_pass(&batch);
        let (batch, rewritten) = self.modify_unplug_events(batch, &inspection);
        report.rewritten = rewritten;
        self.stats.unplug_rewrites += rewritten as u64;

        self.second_input_pass(batch, &mut report, now);

        // Commit staged transitions, one device at a time
        for id in report.touched.clone() {
            let changed = self
                .registry
                .device_mut(id)
                .and_then(|device| device.activate_pending_events(&mut self.engine, now));
            if let Some(set) = changed {
                self.notify(DaemonNotification::SetChanged { device: id, set });
            }
        }

        // Move the cursor now instead of waiting for the refresh tick
        if self.engine.mouse.should_invoke(now, self.engine.tuning()) {
            self.registry.invoke_mouse_events(&mut self.engine, now);
        }
        self.engine.ensure_mouse_refresh(now);

        // No centered samples this cycle, arm the idle reset
        if !inspection.release_evidence {
            let deadline = now + self.engine.tuning().idle_reset_interval();
            self.engine
                .scheduler
                .schedule(TimerOwner::Daemon, TimerKind::IdleReset, deadline);
        }

        report
    }

    fn first_input_pass(&self, batch: &[RawEvent]) -> BatchInspection {
        let mut inspection = BatchInspection::default();
        for event in batch {
            let Some(id) = event.device() else {
                continue;
            };
            let Some(device) = self.registry.device(id) else {
                continue;
            };

            match *event {
                // Axes feed both the activity bits and the release array
                RawEvent::AxisMotion { axis, value, .. } => {
                    let Some(state) = device.axis(axis) else {
                        continue;
                    };
                    let active = state.is_active(value);
                    let released = Axis::is_unplug_sample(value);
                    inspection
                        .statuses
                        .entry(id)
                        .or_insert_with(|| device.current_status())
                        .change_axes_status(axis, active);
                    inspection
                        .releases
                        .entry(id)
                        .or_insert_with(|| AxisReleaseArray::new(device.active().axes().len()))
                        .set(axis, released);
                    inspection.release_evidence |= released;
                }
                RawEvent::HatMotion { hat, value, .. } => {
                    inspection
                        .statuses
                        .entry(id)
                        .or_insert_with(|| device.current_status())
                        .change_hat_status(hat, DPad::is_active(value));
                }
                RawEvent::Button { button, pressed, .. } => {
                    inspection
                        .statuses
                        .entry(id)
                        .or_insert_with(|| device.current_status())
                        .change_button_status(button, pressed);
                }
                // Hot-plug and quit pass through untouched
                RawEvent::DeviceAdded { .. } | RawEvent::DeviceRemoved { .. } | RawEvent::Quit => {}
            }
        }
        inspection
    }

    /// Rewrites axis samples of devices whose batch looks like a disconnect
    fn modify_unplug_events(&self, batch: Vec<RawEvent>, inspection: &BatchInspection) -> (Vec<RawEvent>, usize) {
        let unplugging: Vec<DeviceId> = inspection
            .releases
            .iter()
            .filter(|(_, releases)| releases.all_released())
            .filter_map(|(id, _)| {
                let device = self.registry.device(*id)?;
                let status = inspection.statuses.get(id)?;
                (status.generate_final_bit_array() == device.unplug_event_bit_array()).then_some(*id)
            })
            .collect();
        if unplugging.is_empty() {
            return (batch, 0);
        }

        // Build a new batch, earlier events are never edited in place
        let mut rewritten = 0;
        let batch = batch
            .into_iter()
            .map(|event| match event {
                RawEvent::AxisMotion { device, axis, value } if unplugging.contains(&device) => {
                    let release = self
                        .registry
                        .device(device)
                        .and_then(|d| d.axis(axis))
                        .map_or(value, Axis::proper_release_value);
                    if release != value {
                        rewritten += 1;
                    }
                    RawEvent::AxisMotion {
                        device,
                        axis,
                        value: release,
                    }
                }
                other => other,
            })
            .collect();

        for id in &unplugging {
            debug!("Batch for device {} looks like an unplug, using release values", id);
        }
        (batch, rewritten)
    }

    fn second_input_pass(&mut self, batch: Vec<RawEvent>, report: &mut PollReport, now: Instant) {
        for event in batch {
            match event {
                // Control samples are only staged here
                RawEvent::Button { device, button, pressed } => {
                    if let Some(target) = self.registry.device_mut(device) {
                        target.queue_button_event(button, pressed);
                        touch(report, device);
                    } else {
                        debug!("Dropping button event for unknown device {}", device);
                    }
                }
                RawEvent::AxisMotion { device, axis, value } => {
                    if let Some(target) = self.registry.device_mut(device) {
                        target.queue_axis_event(axis, value);
                        touch(report, device);
                    } else {
                        debug!("Dropping axis event for unknown device {}", device);
                    }
                }
                RawEvent::HatMotion { device, hat, value } => {
                    if let Some(target) = self.registry.device_mut(device) {
                        target.queue_hat_event(hat, value);
                        touch(report, device);
                    } else {
                        debug!("Dropping hat event for unknown device {}", device);
                    }
                }
                RawEvent::DeviceAdded { index } => match self.registry.add_device(index, self.backend.as_mut()) {
                    Ok(id) => {
                        let name = self
                            .registry
                            .device(id)
                            .map(|device| device.name().to_string())
                            .unwrap_or_default();
                        self.notify(DaemonNotification::DeviceAdded { device: id, name });
                    }
                    Err(e) => warn!("Could not open hot-plugged device at index {}: {}", index, e),
                },
                RawEvent::DeviceRemoved { device } => {
                    // Nothing left to activate for a device that is gone
                    report.touched.retain(|id| *id != device);
                    if self
                        .registry
                        .remove_device(device, self.backend.as_mut(), &mut self.engine, now)
                    {
                        self.registry.refresh_indexes(self.backend.as_mut());
                        self.notify(DaemonNotification::DeviceRemoved { device });
                    }
                }
                RawEvent::Quit => {
                    info!("Backend requested quit");
                    report.quit = true;
                }
            }
        }
    }

    /// Runs every timer due at `now`. Returns the number fired.
    pub fn fire_due_timers(&mut self, now: Instant) -> usize {
        let mut fired = 0;
        while let Some(entry) = self.engine.scheduler.pop_due(now) {
            fired += 1;
            match entry.owner {
                TimerOwner::Button(key) => {
                    if let Some((device, set)) =
                        self.registry
                            .dispatch_timer(key, entry.kind, &mut self.engine, entry.deadline)
                    {
                        self.notify(DaemonNotification::SetChanged { device, set });
                    }
                }
                TimerOwner::Daemon => match entry.kind {
                    TimerKind::MouseRefresh => {
                        self.registry.invoke_mouse_events(&mut self.engine, entry.deadline);
                        self.engine.ensure_mouse_refresh(entry.deadline);
                    }
                    TimerKind::IdleReset => {
                        debug!("Backend idle, resetting mouse distances");
                        self.registry.reset_active_button_mouse_distances(&mut self.engine);
                    }
                    other => debug!("Ignoring daemon timer {:?}", other),
                },
            }
        }

        if fired > 0 {
            self.stats.timers_fired += fired as u64;
            self.engine.ensure_mouse_refresh(now);
        }
        fired
    }

    pub fn next_wakeup(&self) -> Option<Instant> {
        self.engine.scheduler.next_deadline()
    }

    pub fn set_active_set(&mut self, device: DeviceId, set: usize, now: Instant) -> Result<(), MappingError> {
        let target = self
            .registry
            .device_mut(device)
            .ok_or_else(|| MappingError::InvalidControl(format!("device {} is not open", device)))?;
        if target.set_active_set(set, &mut self.engine, now)? {
            self.notify(DaemonNotification::SetChanged { device, set });
        }
        Ok(())
    }

    pub fn bind_vdpad(
        &mut self,
        device: DeviceId,
        vdpad: usize,
        direction: HatDirection,
        control: Option<ControlOrigin>,
        now: Instant,
    ) -> Result<(), MappingError> {
        let target = self
            .registry
            .device_mut(device)
            .ok_or_else(|| MappingError::InvalidControl(format!("device {} is not open", device)))?;
        target.bind_vdpad(vdpad, direction, control, &mut self.engine, now)
    }

    /// Releases every held output and closes all devices
    pub fn shutdown(&mut self, now: Instant) {
        let ids: Vec<DeviceId> = self.registry.summaries().into_iter().map(|s| s.id).collect();
        for id in ids {
            self.registry
                .remove_device(id, self.backend.as_mut(), &mut self.engine, now);
        }
        info!(
            "Input daemon stopped after {} cycles, {} events, {} actions dispatched",
            self.stats.cycles,
            self.stats.events,
            self.engine.output.dispatched()
        );
        self.notify(DaemonNotification::Stopped);
    }
}

fn touch(report: &mut PollReport, device: DeviceId) {
    if !report.touched.contains(&device) {
        report.touched.push(device);
    }
}
