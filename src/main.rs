use std::sync::Arc;

use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

use tasmota_keeper::background::BackgroundCoordinator;
use tasmota_keeper::config::{Config, ConfigProvider, SharedConfig};
use tasmota_keeper::feed::{ChannelSink, FeedEvent, MessageSink};
use tasmota_keeper::keeper::ThermostatController;
use tasmota_keeper::poller::{PollEvent, PollingLoop};
use tasmota_keeper::sensor::SensorClient;
use tasmota_keeper::store::{JsonlStore, ReadingStore};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Starting tasmota-keeper (device={}, check_every={:?}, thermostat={})",
        config.sensor.base_url,
        config.sensor.check_every,
        if config.thermostat.enabled {
            if config.thermostat.read_only { "read-only" } else { "on" }
        } else {
            "off"
        },
    );

    let provider: Arc<dyn ConfigProvider> = Arc::new(SharedConfig::from_config(&config));

    let store: Option<Arc<dyn ReadingStore>> = match &config.readings_file {
        Some(path) => match JsonlStore::open(path) {
            Ok(store) => {
                info!("Appending readings to {}", path);
                Some(Arc::new(store))
            }
            Err(e) => {
                warn!("Readings log disabled: {}", e);
                None
            }
        },
        None => None,
    };

    // Console feed: everything the core wants displayed flows through here.
    let (feed_tx, feed_rx) = mpsc::channel::<FeedEvent>(100);
    let sink: Arc<dyn MessageSink> = Arc::new(ChannelSink::new(feed_tx));
    let feed_handle = tokio::spawn(run_console_feed(feed_rx));

    let client = SensorClient::new(provider.clone());
    let controller = Arc::new(ThermostatController::new(client.clone(), sink.clone()));

    // Foreground polling loop, owned here the way the UI layer owns it in
    // the app. The coordinator only ever runs its own background pass.
    let poller = PollingLoop::spawn(
        client.clone(),
        config.sensor.check_every,
        sink.clone(),
        store.clone(),
    );
    if let Err(e) = poller.start() {
        error!("Could not start polling: {}", e);
        std::process::exit(1);
    }

    // Latest reading feeds the keeper's timer loop.
    let (temp_tx, temp_rx) = watch::channel(None);
    let bridge_handle = match poller.subscribe() {
        Ok(events) => tokio::spawn(forward_readings(events, temp_tx)),
        Err(e) => {
            error!("Could not subscribe to readings: {}", e);
            std::process::exit(1);
        }
    };

    let keeper_handle = tokio::spawn(controller.clone().run(
        config.sensor.keeper_every,
        temp_rx,
        provider.clone(),
    ));

    let coordinator = BackgroundCoordinator::new(
        client,
        controller,
        provider,
        sink,
        store,
        config.sensor.background_every,
    );

    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");
    let mut sigusr1 =
        signal(SignalKind::user_defined1()).expect("Failed to register SIGUSR1 handler");
    let mut sigusr2 =
        signal(SignalKind::user_defined2()).expect("Failed to register SIGUSR2 handler");

    // SIGUSR1/SIGUSR2 stand in for the app-state events: background the
    // daemon (long-interval pass) or bring it back to the front.
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
                break;
            }
            _ = sigusr1.recv() => {
                info!("Received SIGUSR1, switching to background cadence");
                poller.stop();
                coordinator.on_foreground_change(false);
            }
            _ = sigusr2.recv() => {
                info!("Received SIGUSR2, switching to foreground cadence");
                coordinator.on_foreground_change(true);
                if let Err(e) = poller.start() {
                    warn!("Could not resume foreground polling: {}", e);
                }
            }
        }
    }

    // Cleanup
    coordinator.on_foreground_change(true);
    poller.kill();
    keeper_handle.abort();
    bridge_handle.abort();
    feed_handle.abort();
    info!("tasmota-keeper stopped");
}

/// Push each successful reading into the watch channel the keeper reads.
async fn forward_readings(
    mut events: broadcast::Receiver<PollEvent>,
    latest: watch::Sender<Option<f64>>,
) {
    loop {
        match events.recv().await {
            Ok(PollEvent::Reading(reading)) => {
                let _ = latest.send(Some(reading.temperature));
            }
            Ok(PollEvent::Error(_)) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!("Reading bridge lagging, {} events skipped", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Render the message feed to the log, with the online/offline transitions
/// the console view used to announce.
async fn run_console_feed(mut feed: mpsc::Receiver<FeedEvent>) {
    let mut online = false;
    let mut seen_any_reading = false;

    while let Some(event) = feed.recv().await {
        match event {
            FeedEvent::Trace(msg) => info!("{}", msg),
            FeedEvent::Reading(reading) => {
                if !seen_any_reading {
                    info!("First temperature came in, looks good.");
                    seen_any_reading = true;
                } else if !online {
                    info!("Back Online.");
                }
                online = true;
                debug!("Current temperature: {:.1}", reading.temperature);
            }
            FeedEvent::Error(msg) => {
                online = false;
                error!("{}", msg);
            }
        }
    }
}
