//! Output tuning snapshots
//!
//! Mouse refresh rate, gamepad poll rate and mouse smoothing parameters are
//! shared between the configuration side and the poll thread. They are
//! published as immutable `Arc` snapshots over a `watch` channel: the poll
//! thread picks up the newest snapshot at the start of each cycle and writers
//! never wait for the poll loop.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub const DEFAULT_MOUSE_REFRESH_MS: u64 = 5;
pub const DEFAULT_GAMEPAD_POLL_MS: u64 = 10;
pub const DEFAULT_MOUSE_HISTORY_SIZE: usize = 10;
pub const MAX_MOUSE_HISTORY_SIZE: usize = 100;
pub const DEFAULT_WEIGHT_MODIFIER: f64 = 0.2;
pub const MAX_REFRESH_MS: u64 = 16;

pub type TuningSnapshot = Arc<OutputTuningConfig>;

#[derive(Debug, Clone, PartialEq)]
pub struct OutputTuningConfig {
    pub mouse_refresh_rate: Duration,
    pub gamepad_poll_rate: Duration,
    /// Number of past mouse deltas averaged together; 1 disables smoothing
    pub mouse_history_size: usize,
    /// Weight falloff applied to older history entries
    pub weight_modifier: f64,
}

impl Default for OutputTuningConfig {
    fn default() -> Self {
        Self {
            mouse_refresh_rate: Duration::from_millis(DEFAULT_MOUSE_REFRESH_MS),
            gamepad_poll_rate: Duration::from_millis(DEFAULT_GAMEPAD_POLL_MS),
            mouse_history_size: DEFAULT_MOUSE_HISTORY_SIZE,
            weight_modifier: DEFAULT_WEIGHT_MODIFIER,
        }
    }
}

impl OutputTuningConfig {
    /// Clamps every field into its supported range
    pub fn sanitized(mut self) -> Self {
        let clamp_rate = |rate: Duration| {
            rate.clamp(
                Duration::from_millis(1),
                Duration::from_millis(MAX_REFRESH_MS),
            )
        };
        self.mouse_refresh_rate = clamp_rate(self.mouse_refresh_rate);
        self.gamepad_poll_rate = clamp_rate(self.gamepad_poll_rate);
        self.mouse_history_size = self.mouse_history_size.clamp(1, MAX_MOUSE_HISTORY_SIZE);
        if !(self.weight_modifier > 0.0 && self.weight_modifier <= 1.0) {
            self.weight_modifier = DEFAULT_WEIGHT_MODIFIER;
        }
        self
    }

    /// Interval of the idle reset safety net
    pub fn idle_reset_interval(&self) -> Duration {
        self.mouse_refresh_rate.max(self.gamepad_poll_rate) + Duration::from_millis(1)
    }

    pub fn into_snapshot(self) -> TuningSnapshot {
        Arc::new(self.sanitized())
    }
}

pub fn tuning_channel(
    initial: OutputTuningConfig,
) -> (watch::Sender<TuningSnapshot>, watch::Receiver<TuningSnapshot>) {
    watch::channel(initial.into_snapshot())
}
