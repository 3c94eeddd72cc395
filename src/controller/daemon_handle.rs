//! Poll thread lifecycle
//!
//! The poll loop runs on its own OS thread so that a slow application side
//! never delays sampling. Everything crossing the thread boundary is a
//! message:
//!
//! ```text
//! InputDaemonHandle ─[DaemonCommand]──────► PollWorker (padmapper-poll)
//! application      ◄─[DaemonNotification]─┤
//! application      ◄─[OutputAction]───────┘ (through the output backend)
//! ```
//!
//! A refresh is acknowledged over a oneshot, so callers that need the device
//! list to be rebuilt before continuing can wait on it.

use super::backend::{BackendError, DeviceId, InputBackend};
use super::hat::HatDirection;
use super::input_daemon::{DaemonNotification, InputDaemon};
use super::registry::DeviceRegistry;
use crate::mapping::button::ControlOrigin;
use crate::mapping::engine::ActionEngine;
use crate::mapping::output::OutputBackend;
use crate::mapping::tuning::TuningSnapshot;
use crate::persistence::AppConfig;
use chrono::Local;
use statum::{machine, state};
use std::thread::JoinHandle;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

/// Requests the application sends to the poll thread
#[derive(Debug)]
pub enum DaemonCommand {
    /// Rebuild the device list; the ack carries the number of open devices
    Refresh { ack: oneshot::Sender<usize> },
    SetActiveSet { device: DeviceId, set: usize },
    /// Bind `control` to a VDPad direction, `None` unbinds it
    BindVDPad {
        device: DeviceId,
        vdpad: usize,
        direction: HatDirection,
        control: Option<ControlOrigin>,
    },
    Quit,
}

#[derive(Clone, Debug)]
pub struct DaemonSettings {
    pub stats_interval_secs: u64,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            stats_interval_secs: crate::persistence::DEFAULT_STATS_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("Poll thread error: {0}")]
    ThreadError(String),

    #[error("Initialization error: {0}")]
    InitializationError(String),
}

/// Counters for the periodic stats line, reset after each report
#[derive(Debug, Default)]
pub struct LoopStats {
    pub cycles: u64,
    pub events: u64,
    pub timers: u64,
}

#[state]
#[derive(Debug, Clone)]
pub enum WorkerState {
    Initializing,
    Polling,
}

#[machine]
pub struct PollWorker<S: WorkerState> {
    daemon: InputDaemon,
    commands: mpsc::UnboundedReceiver<DaemonCommand>,
    settings: DaemonSettings,
    stats: LoopStats,
    last_log_time: chrono::DateTime<Local>,
}

impl PollWorker<Initializing> {
    pub fn create(
        daemon: InputDaemon,
        commands: mpsc::UnboundedReceiver<DaemonCommand>,
        settings: DaemonSettings,
    ) -> Self {
        Self::new(daemon, commands, settings, LoopStats::default(), Local::now())
    }

    /// Opens every connected device and starts polling
    pub fn initialize(mut self) -> PollWorker<Polling> {
        let count = self.daemon.refresh_devices(Instant::now());
        info!("Poll worker initialized with {} devices", count);
        self.transition()
    }
}

impl PollWorker<Polling> {
    /// Returns false once the loop should stop
    fn handle_command(&mut self, command: DaemonCommand) -> bool {
        let now = Instant::now();
        match command {
            DaemonCommand::Refresh { ack } => {
                let count = self.daemon.refresh_devices(now);
                if ack.send(count).is_err() {
                    debug!("Refresh requester went away before the ack");
                }
            }
            DaemonCommand::SetActiveSet { device, set } => {
                if let Err(e) = self.daemon.set_active_set(device, set, now) {
                    warn!("Set change for {} rejected: {}", device, e);
                }
            }
            DaemonCommand::BindVDPad {
                device,
                vdpad,
                direction,
                control,
            } => {
                if let Err(e) = self.daemon.bind_vdpad(device, vdpad, direction, control, now) {
                    warn!("VDPad binding for {} rejected: {}", device, e);
                }
            }
            DaemonCommand::Quit => {
                info!("Quit requested");
                return false;
            }
        }
        true
    }

    /// Drains pending commands. Returns false on quit or when every handle is gone.
    fn drain_commands(&mut self) -> bool {
        loop {
            match self.commands.try_recv() {
                Ok(command) => {
                    if !self.handle_command(command) {
                        return false;
                    }
                }
                Err(mpsc::error::TryRecvError::Empty) => return true,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    info!("All daemon handles dropped, stopping poll loop");
                    return false;
                }
            }
        }
    }

    fn log_stats_if_due(&mut self) {
        let now = Local::now();
        let interval = chrono::Duration::seconds(self.settings.stats_interval_secs as i64);
        if now - self.last_log_time > interval {
            let seconds = interval.num_seconds().max(1) as f64;
            info!(
                "Poll stats at {}: {} cycles, {} events ({:.2}/sec), {} timers, {} devices, {} actions dispatched",
                now.format("%H:%M:%S.%3f"),
                self.stats.cycles,
                self.stats.events,
                self.stats.events as f64 / seconds,
                self.stats.timers,
                self.daemon.registry().len(),
                self.daemon.engine().output.dispatched()
            );
            self.stats = LoopStats::default();
            self.last_log_time = now;
        }
    }

    pub fn run_poll_loop(mut self) {
        info!("Starting poll loop");
        loop {
            if !self.drain_commands() {
                break;
            }

            let now = Instant::now();
            self.stats.timers += self.daemon.fire_due_timers(now) as u64;
            let report = self.daemon.poll(now);
            self.stats.cycles += 1;
            self.stats.events += report.events as u64;
            if report.rewritten > 0 {
                debug!("Rewrote {} unplug samples", report.rewritten);
            }
            if report.quit {
                break;
            }
            self.log_stats_if_due();

            let poll_rate = self.daemon.engine().tuning().gamepad_poll_rate;
            let mut wake = now + poll_rate;
            if let Some(next) = self.daemon.next_wakeup() {
                wake = wake.min(next);
            }
            let sleep = wake.saturating_duration_since(Instant::now());
            if !sleep.is_zero() {
                std::thread::sleep(sleep);
            }
        }
        self.daemon.shutdown(Instant::now());
    }
}

/// Handle to the poll thread
pub struct InputDaemonHandle {
    commands: mpsc::UnboundedSender<DaemonCommand>,
    thread: Option<JoinHandle<()>>,
}

impl InputDaemonHandle {
    /// Starts the poll thread. The backend is built on that thread by
    /// `backend_factory`, since input libraries are often tied to the thread
    /// that created them.
    pub fn spawn<F>(
        settings: Option<DaemonSettings>,
        backend_factory: F,
        config: &AppConfig,
        output: Box<dyn OutputBackend>,
        tuning: watch::Receiver<TuningSnapshot>,
        notifier: mpsc::UnboundedSender<DaemonNotification>,
    ) -> Result<Self, DaemonError>
    where
        F: FnOnce() -> Result<Box<dyn InputBackend>, BackendError> + Send + 'static,
    {
        info!("Spawning input daemon with settings: {:?}", settings);
        let settings = settings.unwrap_or_default();
        let profiles = config.profiles.clone();
        let disabled = config.daemon.disabled_game_controllers.clone();

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<Result<(), BackendError>>(1);

        let thread = std::thread::Builder::new()
            .name("padmapper-poll".to_string())
            .spawn(move || {
                let backend = match backend_factory() {
                    Ok(backend) => {
                        let _ = ready_tx.send(Ok(()));
                        backend
                    }
                    Err(e) => {
                        error!("Failed to create input backend: {}", e);
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let engine = ActionEngine::new(output, tuning.borrow().clone());
                let registry = DeviceRegistry::new(profiles, disabled);
                let daemon = InputDaemon::new(backend, registry, engine)
                    .with_tuning(tuning)
                    .with_notifier(notifier);

                PollWorker::create(daemon, command_rx, settings)
                    .initialize()
                    .run_poll_loop();
                info!("Poll thread finished");
            })
            .map_err(|e| DaemonError::ThreadError(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(DaemonError::Backend(e));
            }
            Err(e) => {
                return Err(DaemonError::InitializationError(format!(
                    "poll thread exited during startup: {}",
                    e
                )))
            }
        }

        info!("Input daemon started");
        Ok(Self {
            commands: command_tx,
            thread: Some(thread),
        })
    }

    fn send(&self, command: DaemonCommand) -> Result<(), DaemonError> {
        self.commands
            .send(command)
            .map_err(|e| DaemonError::ChannelError(format!("poll thread is gone: {}", e)))
    }

    /// Rebuilds the device list and waits until the poll thread is done
    pub async fn refresh(&self) -> Result<usize, DaemonError> {
        let (ack, rx) = oneshot::channel();
        self.send(DaemonCommand::Refresh { ack })?;
        rx.await
            .map_err(|e| DaemonError::ChannelError(format!("refresh not acknowledged: {}", e)))
    }

    /// Same as [`refresh`](Self::refresh) for callers outside the runtime
    pub fn blocking_refresh(&self) -> Result<usize, DaemonError> {
        let (ack, rx) = oneshot::channel();
        self.send(DaemonCommand::Refresh { ack })?;
        rx.blocking_recv()
            .map_err(|e| DaemonError::ChannelError(format!("refresh not acknowledged: {}", e)))
    }

    pub fn set_active_set(&self, device: DeviceId, set: usize) -> Result<(), DaemonError> {
        self.send(DaemonCommand::SetActiveSet { device, set })
    }

    pub fn bind_vdpad(
        &self,
        device: DeviceId,
        vdpad: usize,
        direction: HatDirection,
        control: Option<ControlOrigin>,
    ) -> Result<(), DaemonError> {
        self.send(DaemonCommand::BindVDPad {
            device,
            vdpad,
            direction,
            control,
        })
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().map_or(false, |thread| !thread.is_finished())
    }

    /// Stops the poll loop, releasing every held output, and joins the thread
    pub fn shutdown(mut self) -> Result<(), DaemonError> {
        if self.send(DaemonCommand::Quit).is_err() {
            debug!("Poll thread already stopped");
        }
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| DaemonError::ThreadError("poll thread panicked".to_string())),
            None => Ok(()),
        }
    }
}

impl Drop for InputDaemonHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            let _ = self.commands.send(DaemonCommand::Quit);
        }
    }
}
