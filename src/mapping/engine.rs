//! Action engine shared by every button on the poll thread
//!
//! Holds the output dispatcher, the timer wheel, the mouse dispatcher and the
//! current tuning snapshot. Button operations borrow it through an
//! [`ActionContext`] that also carries the identity of the device and set
//! being processed, the cycle timestamp and the side effects (set change
//! requests, VDPad updates) the device resolves once activation finishes.

use super::button::{ButtonKey, ControlOrigin, SetChangeRequest};
use super::mouse::{MouseDispatcher, MouseMotion};
use super::output::{OutputBackend, OutputDispatcher};
use super::scheduler::{Scheduler, TimerKind, TimerOwner};
use super::tuning::{OutputTuningConfig, TuningSnapshot};
use crate::controller::backend::DeviceId;
use std::sync::Arc;
use std::time::Instant;

pub struct ActionEngine {
    pub output: OutputDispatcher,
    pub scheduler: Scheduler,
    pub mouse: MouseDispatcher,
    tuning: TuningSnapshot,
}

impl ActionEngine {
    pub fn new(backend: Box<dyn OutputBackend>, tuning: TuningSnapshot) -> Self {
        Self {
            output: OutputDispatcher::new(backend),
            scheduler: Scheduler::new(),
            mouse: MouseDispatcher::new(),
            tuning,
        }
    }

    pub fn tuning(&self) -> &OutputTuningConfig {
        &self.tuning
    }

    pub fn set_tuning(&mut self, tuning: TuningSnapshot) {
        if !Arc::ptr_eq(&self.tuning, &tuning) {
            self.tuning = tuning;
        }
    }

    /// Moves the cursor for the summed motion of all active movement slots
    pub fn emit_mouse_motion(&mut self, motion: MouseMotion, now: Instant) -> (i32, i32) {
        let Self {
            output,
            mouse,
            tuning,
            ..
        } = self;
        mouse.apply_motion(motion, now, tuning.as_ref(), output)
    }

    /// Schedules the next mouse refresh tick while movement is active
    pub fn ensure_mouse_refresh(&mut self, now: Instant) {
        let owner = TimerOwner::Daemon;
        if !self.mouse.is_active() {
            self.scheduler.cancel(owner, TimerKind::MouseRefresh);
        } else if !self.scheduler.is_scheduled(owner, TimerKind::MouseRefresh) {
            let deadline = self.mouse.refresh_deadline(now, &self.tuning);
            self.scheduler.schedule(owner, TimerKind::MouseRefresh, deadline);
        }
    }

    /// Drops everything the engine tracks for a device
    pub fn forget_device(&mut self, device: DeviceId) -> usize {
        self.mouse.forget_device(device);
        self.scheduler.cancel_device(device)
    }
}

/// Side effects collected while activating one device's controls
#[derive(Debug, Default)]
pub struct ActivationEffects {
    pub set_requests: Vec<SetChangeRequest>,
    pub vdpad_updates: Vec<usize>,
}

pub struct ActionContext<'a> {
    pub engine: &'a mut ActionEngine,
    pub effects: &'a mut ActivationEffects,
    pub device: DeviceId,
    pub set: usize,
    pub now: Instant,
}

impl<'a> ActionContext<'a> {
    pub fn new(
        engine: &'a mut ActionEngine,
        effects: &'a mut ActivationEffects,
        device: DeviceId,
        set: usize,
        now: Instant,
    ) -> Self {
        Self {
            engine,
            effects,
            device,
            set,
            now,
        }
    }

    pub fn key(&self, origin: ControlOrigin) -> ButtonKey {
        ButtonKey {
            device: self.device,
            set: self.set,
            origin,
        }
    }

    pub fn schedule(&mut self, origin: ControlOrigin, kind: TimerKind, deadline: Instant) {
        let owner = TimerOwner::Button(self.key(origin));
        self.engine.scheduler.schedule(owner, kind, deadline);
    }

    pub fn cancel(&mut self, origin: ControlOrigin, kind: TimerKind) {
        let owner = TimerOwner::Button(self.key(origin));
        self.engine.scheduler.cancel(owner, kind);
    }
}
