use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use padmapper::controller::backend::{DeviceMode, InputBackend};
use padmapper::controller::daemon_handle::{DaemonSettings, InputDaemonHandle};
use padmapper::controller::gilrs_backend::GilrsBackend;
use padmapper::controller::input_daemon::DaemonNotification;
use padmapper::mapping::output::{ChannelOutput, OutputAction};
use padmapper::persistence::config_portal::ConfigPortal;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file to use instead of the per-user default
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print detected controllers and exit
    #[arg(short, long)]
    list: bool,

    /// Maximum log level (error, warn, info, debug, trace)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<Level>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup(args.log_level)?;

    if args.list {
        return list_devices();
    }

    let portal = ConfigPortal::load(args.config).await?;
    let config = portal.snapshot().await;

    let (output_tx, output_rx) = mpsc::unbounded_channel();
    let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();
    let settings = DaemonSettings {
        stats_interval_secs: config.daemon.stats_interval_secs,
    };

    let handle = InputDaemonHandle::spawn(
        Some(settings),
        || GilrsBackend::create().map(|backend| Box::new(backend) as Box<dyn InputBackend>),
        &config,
        Box::new(ChannelOutput::new(output_tx)),
        portal.tuning_receiver(),
        notify_tx,
    )
    .map_err(|e| eyre!("Failed to spawn input daemon: {}", e))?;

    let cancel = CancellationToken::new();
    let output_task = tokio::spawn(log_output_actions(output_rx, cancel.clone()));

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for Ctrl-C: {}", e);
                }
                info!("Shutting down");
                break;
            }
            notification = notify_rx.recv() => match notification {
                Some(DaemonNotification::Stopped) | None => {
                    warn!("Input daemon stopped on its own");
                    break;
                }
                Some(notification) => log_notification(notification),
            },
        }
    }

    tokio::task::spawn_blocking(move || handle.shutdown())
        .await
        .map_err(|e| eyre!("Failed to join shutdown task: {}", e))?
        .map_err(|e| eyre!("Failed to stop input daemon: {}", e))?;

    cancel.cancel();
    output_task
        .await
        .map_err(|e| eyre!("Output task failed: {}", e))?;

    info!("Bye");
    Ok(())
}

fn setup(log_level: Option<Level>) -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env(log_level.unwrap_or(Level::INFO));
    Ok(())
}

fn setup_logging_env(level: Level) {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}

fn list_devices() -> Result<()> {
    let mut backend = GilrsBackend::create().map_err(|e| eyre!("Failed to open input backend: {}", e))?;
    let count = backend.device_count();
    if count == 0 {
        println!("No controllers detected");
        return Ok(());
    }

    for index in 0..count {
        let mode = if backend.is_game_controller(index) {
            DeviceMode::GameController
        } else {
            DeviceMode::Joystick
        };
        match backend.open_device(index, mode) {
            Ok(descriptor) => {
                println!(
                    "[{}] {} ({:?}) guid={} axes={} buttons={} hats={}",
                    index,
                    descriptor.name,
                    descriptor.mode,
                    descriptor.guid,
                    descriptor.num_axes,
                    descriptor.num_buttons,
                    descriptor.num_hats
                );
                backend.close_device(descriptor.id);
            }
            Err(e) => println!("[{}] unavailable: {}", index, e),
        }
    }
    Ok(())
}

fn log_notification(notification: DaemonNotification) {
    match notification {
        DaemonNotification::DeviceAdded { device, name } => info!("Controller {} connected: {}", device, name),
        DaemonNotification::DeviceRemoved { device } => info!("Controller {} disconnected", device),
        DaemonNotification::DevicesRefreshed { count } => info!("{} controllers ready", count),
        DaemonNotification::SetChanged { device, set } => info!("Controller {} now uses set {}", device, set + 1),
        DaemonNotification::Stopped => debug!("Input daemon stopped"),
    }
}

/// Logs every action the poll thread emits until cancelled, then drains the rest
async fn log_output_actions(mut actions: mpsc::UnboundedReceiver<OutputAction>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            action = actions.recv() => match action {
                Some(action) => log_action(action),
                None => return,
            },
        }
    }
    while let Ok(action) = actions.try_recv() {
        log_action(action);
    }
}

fn log_action(action: OutputAction) {
    match action {
        OutputAction::Key { code, pressed } => {
            info!("Key {} {}", code, if pressed { "down" } else { "up" })
        }
        OutputAction::MouseButton { button, pressed } => {
            info!("Mouse button {} {}", button, if pressed { "down" } else { "up" })
        }
        OutputAction::CursorMove { dx, dy } => debug!("Cursor {:+} {:+}", dx, dy),
        OutputAction::Wheel { axis, ticks } => debug!("Wheel {:?} {:+}", axis, ticks),
    }
}
