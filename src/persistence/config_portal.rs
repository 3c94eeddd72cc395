//! # Configuration Portal
//!
//! Central access point for the loaded [`AppConfig`]. The configuration is held
//! behind `Arc<RwLock<_>>` so the application side can read and update it
//! concurrently, while the poll thread only ever sees the tuning values
//! through a `watch` channel of immutable [`TuningSnapshot`]s:
//!
//! ```text
//! CLI / application ──update──► ConfigPortal ──save──► config.toml
//!                                   │
//!                                   └── watch<Arc<OutputTuningConfig>> ──► poll thread
//! ```
//!
//! Publishing a snapshot never waits for the poll loop; the poll thread picks
//! up the newest value at the start of its next cycle.

use super::{AppConfig, DaemonConfig, MouseConfig};
use crate::mapping::tuning::{tuning_channel, TuningSnapshot};
use color_eyre::eyre::{eyre, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

pub const CONFIG_DIR: &str = "padmapper";
pub const CONFIG_FILE: &str = "config.toml";

const MAX_LOCK_ATTEMPTS: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Lock acquisition timed out")]
    LockTimeout,
}

#[derive(Debug)]
pub struct ConfigPortal {
    config: Arc<RwLock<AppConfig>>,
    path: PathBuf,
    tuning: watch::Sender<TuningSnapshot>,
}

impl ConfigPortal {
    pub fn new(config: AppConfig, path: PathBuf) -> Self {
        let (tuning, _) = tuning_channel(config.tuning());
        Self {
            config: Arc::new(RwLock::new(config)),
            path,
            tuning,
        }
    }

    /// Loads the configuration file, writing the default one first if missing
    pub async fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = path.unwrap_or_else(default_config_path);
        ensure_default_config(&path).await?;
        let config = read_config(&path).await?;
        info!(
            "Loaded configuration from {} ({} profiles)",
            path.display(),
            config.profiles.len()
        );
        Ok(Self::new(config, path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn snapshot(&self) -> AppConfig {
        self.config.read().await.clone()
    }

    /// Copy of the configuration for callers outside the async runtime
    pub fn try_snapshot(&self) -> Result<AppConfig, Error> {
        let mut attempts = 0;
        loop {
            match self.config.try_read() {
                Ok(guard) => break Ok(guard.clone()),
                Err(e) => {
                    attempts += 1;
                    warn!(
                        "Read lock blocked: {} (attempt {}/{})",
                        e, attempts, MAX_LOCK_ATTEMPTS
                    );
                    if attempts >= MAX_LOCK_ATTEMPTS {
                        break Err(Error::LockTimeout);
                    }
                    std::thread::sleep(std::time::Duration::from_millis(10));
                }
            }
        }
    }

    pub fn tuning_receiver(&self) -> watch::Receiver<TuningSnapshot> {
        self.tuning.subscribe()
    }

    pub fn current_tuning(&self) -> TuningSnapshot {
        self.tuning.borrow().clone()
    }

    pub async fn update_mouse_config(&self, mouse: MouseConfig) {
        let mut guard = self.config.write().await;
        guard.mouse = mouse;
        self.publish_tuning(&guard);
    }

    pub async fn update_daemon_config(&self, daemon: DaemonConfig) {
        let mut guard = self.config.write().await;
        guard.daemon = daemon;
        self.publish_tuning(&guard);
    }

    fn publish_tuning(&self, config: &AppConfig) {
        let snapshot = config.tuning().into_snapshot();
        debug!("Publishing tuning snapshot: {:?}", snapshot);
        self.tuning.send_replace(snapshot);
    }

    pub async fn save(&self) -> Result<()> {
        let config = self.snapshot().await;
        write_config(&self.path, &config).await
    }
}

pub fn default_config_path() -> PathBuf {
    let base = dirs::config_dir().unwrap_or_else(|| {
        warn!("Could not determine config directory, using home directory");
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
    });
    base.join(CONFIG_DIR).join(CONFIG_FILE)
}

pub async fn ensure_default_config(path: &Path) -> Result<()> {
    if tokio::fs::try_exists(path)
        .await
        .map_err(|e| eyre!("Failed to check if config file exists: {}", e))?
    {
        return Ok(());
    }

    info!("Creating default configuration at {}", path.display());
    write_config(path, &AppConfig::default()).await
}

pub async fn read_config(path: &Path) -> Result<AppConfig> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
    toml::from_str(&content).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
}

pub async fn write_config(path: &Path, config: &AppConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
    }

    let content =
        toml::to_string_pretty(config).map_err(|e| eyre!("Failed to serialize config: {}", e))?;
    tokio::fs::write(path, content)
        .await
        .map_err(|e| eyre!("Failed to write config file: {}", e))?;

    debug!("Configuration written to {}", path.display());
    Ok(())
}
