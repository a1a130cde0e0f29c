pub mod bus;
pub mod channels;
pub mod config;
pub mod error;
pub mod mqtt;
pub mod options;
pub mod prelude;
pub mod scheduler;
pub mod tristar;

const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::prelude::*;
use crate::mqtt::Mqtt;
use crate::scheduler::Scheduler;

/// Bring up logging, the MQTT sink and the poll scheduler, then wait for shutdown.
pub async fn app(options: Options, shutdown_tx: broadcast::Sender<()>) -> Result<()> {
    let mut shutdown_rx = shutdown_tx.subscribe();
    let from_env = init_logging();

    info!("tristar-bridge {} starting", CARGO_PKG_VERSION);

    let config = ConfigWrapper::new(options.config_file.clone())?;

    // RUST_LOG wins over the config file
    if !from_env {
        match config.loglevel().parse() {
            Ok(level) => log::set_max_level(level),
            Err(_) => warn!("ignoring unknown loglevel {:?}", config.loglevel()),
        }
    }

    info!("Initializing channels...");
    let channels = Channels::new();

    info!("  Creating MQTT client...");
    let mqtt = Mqtt::new(config.clone(), channels.clone());
    let mqtt_clone = mqtt.clone();
    // subscribed before the scheduler exists, so its first publish has a reader
    let bus_rx = channels.to_bus.subscribe();
    let mqtt_handle = tokio::spawn(async move {
        if let Err(e) = mqtt_clone.start(bus_rx).await {
            error!("MQTT task failed: {}", e);
        }
    });

    info!("  Creating Scheduler...");
    let mut scheduler = Scheduler::new(config.clone(), channels.clone());
    let scheduler_handle = tokio::spawn(async move {
        if let Err(e) = scheduler.start().await {
            error!("Scheduler task failed: {}", e);
        }
    });

    let reload_handle = tokio::spawn(reload_on_hangup(
        options.config_file.clone(),
        channels.clone(),
        shutdown_tx.subscribe(),
    ));

    if let Some(runtime) = options.runtime {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(runtime)).await;
            info!("runtime limit of {}s reached", runtime);
            let _ = shutdown_tx.send(());
        });
    }

    info!("Waiting for shutdown signal...");
    let _ = shutdown_rx.recv().await;

    info!("Shutdown signal received, stopping components...");
    let _ = channels.to_scheduler.send(scheduler::ChannelData::Shutdown);
    mqtt.stop();

    if let Err(e) = scheduler_handle.await {
        error!("Error waiting for scheduler task: {}", e);
    }
    if let Err(e) = mqtt_handle.await {
        error!("Error waiting for MQTT task: {}", e);
    }
    reload_handle.abort();

    info!("Application shutdown complete");
    Ok(())
}

/// Returns true if the filter came from `RUST_LOG`.
fn init_logging() -> bool {
    let from_env = std::env::var_os("RUST_LOG").is_some();

    let mut builder = if from_env {
        env_logger::Builder::from_env(env_logger::Env::default())
    } else {
        let mut builder = env_logger::Builder::new();
        builder.filter_level(log::LevelFilter::Trace);
        builder
    };

    let result = builder
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .try_init();

    if let Err(e) = result {
        eprintln!("Failed to initialize logging: {}", e);
    }
    if !from_env {
        log::set_max_level(log::LevelFilter::Info);
    }

    from_env
}

/// Re-read `config_file` and hand its controller section to the scheduler.
/// Returns false, sending nothing, if the file is unreadable or invalid.
pub fn reload_config(config_file: &str, channels: &Channels) -> bool {
    match Config::new(config_file.to_owned()) {
        Ok(config) => {
            info!("Configuration reloaded from {}", config_file);
            let _ = channels
                .to_scheduler
                .send(scheduler::ChannelData::Reconfigure(config.controller));
            true
        }
        Err(e) => {
            error!("Ignoring invalid configuration: {:?}", e);
            false
        }
    }
}

/// Re-read the config file on SIGHUP and hand the controller section to the scheduler.
#[cfg(unix)]
async fn reload_on_hangup(
    config_file: String,
    channels: Channels,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            warn!("Failed to listen for SIGHUP, config reload disabled: {}", e);
            return;
        }
    };

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            received = hangup.recv() => {
                if received.is_none() {
                    break;
                }
                reload_config(&config_file, &channels);
            }
        }
    }
}

#[cfg(not(unix))]
async fn reload_on_hangup(
    _config_file: String,
    _channels: Channels,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let _ = shutdown_rx.recv().await;
}
