use anyhow::Context;
use clap::Parser;
use mibuds_controller::domain::models::{ControllerEvent, MessageSeverity};
use mibuds_controller::domain::settings::SettingsService;
use mibuds_controller::infrastructure::bluetooth::discovery::SystemDiscovery;
use mibuds_controller::infrastructure::bluetooth::{platform, BudsController};
use mibuds_controller::infrastructure::logging;
use mibuds_controller::presentation::console::{self, ConsoleCommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Battery and latency mode control for Xiaomi Mi Buds
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Settings file (JSON). Defaults to the user config directory.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Device address; skips discovery
    #[arg(short, long)]
    address: Option<String>,

    /// Log level filter, overrides the settings file
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings_service = SettingsService::load(args.config.as_deref())?;
    if let Some(address) = args.address {
        settings_service.get_mut().bluetooth.device_address = Some(address);
    }
    if let Some(level) = args.log_level {
        settings_service.get_mut().log_settings.level = level;
    }
    let settings = settings_service.get().clone();

    let _logging_guard = logging::init_logger(&settings.log_settings)
        .context("Failed to initialize logging")?;
    info!("Starting Mi Buds Controller");
    if let Some(path) = settings_service.path() {
        info!("Settings source: {}", path.display());
    }

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let discovery = Arc::new(SystemDiscovery::new(Duration::from_millis(
        settings.bluetooth.discovery_timeout_ms,
    )));
    if !SystemDiscovery::is_supported() && settings.bluetooth.device_address.is_none() {
        warn!("Automatic device discovery is unavailable here; pass --address");
    }

    let controller = Arc::new(BudsController::from_settings(
        &settings.bluetooth,
        platform::create_connector(),
        discovery,
        event_tx,
    )?);
    let listener = controller.spawn_listener();

    // Outward events
    let event_controller = Arc::clone(&controller);
    let event_task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let line = console::describe_event(&event);
            match &event {
                ControllerEvent::Status(status) if status.severity == MessageSeverity::Error => {
                    error!("{}", line)
                }
                _ => info!("{}", line),
            }
            println!("{}", line);

            if event == ControllerEvent::BatteryPollRequested {
                let controller = Arc::clone(&event_controller);
                tokio::spawn(async move {
                    tokio::time::sleep(console::BATTERY_POLL_DELAY).await;
                    let outcome = controller.request_battery().await;
                    if !outcome.success {
                        warn!("{}", outcome.message);
                    }
                });
            }
        }
    });

    println!("{}", console::HELP);
    let mut lines = console::spawn_line_reader(std::io::BufReader::new(std::io::stdin()));
    loop {
        let line = tokio::select! {
            line = lines.recv() => line,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                None
            }
        };
        let Some(line) = line else { break };

        let command = match console::parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                println!("{}", message);
                continue;
            }
        };

        let outcome = match command {
            ConsoleCommand::Mode(mode) => controller.send_command(mode).await,
            ConsoleCommand::Battery => controller.request_battery().await,
            ConsoleCommand::Raw(bytes) => controller.send_raw(&bytes).await,
            ConsoleCommand::Connect => {
                let connected = controller.connect().await;
                println!("{}", if connected { "Connected." } else { "Connect failed." });
                continue;
            }
            ConsoleCommand::State => {
                match controller.cached_address() {
                    Some(address) => println!("{:?} ({})", controller.state(), address),
                    None => println!("{:?}", controller.state()),
                }
                continue;
            }
            ConsoleCommand::Help => {
                println!("{}", console::HELP);
                continue;
            }
            ConsoleCommand::Quit => break,
        };
        println!("{}", outcome.message);
    }

    controller.stop().await;
    // the listener notices stop() at its next iteration; bounded by the IO timeout
    // plus one reconnect pause
    let grace = Duration::from_millis(
        settings.bluetooth.io_timeout_ms + settings.bluetooth.reconnect_delay_ms,
    );
    if tokio::time::timeout(grace, listener).await.is_err() {
        warn!("Listener did not stop in time");
    }
    event_task.abort();
    info!("Mi Buds Controller stopped");
    Ok(())
}

