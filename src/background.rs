use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::ConfigProvider;
use crate::feed::{FeedEvent, MessageSink};
use crate::keeper::ThermostatController;
use crate::poller::{PollEvent, PollingLoop};
use crate::sensor::Sensor;
use crate::store::ReadingStore;

/// Keeps temperature and relay control alive while the embedding app is
/// backgrounded.
///
/// On a background transition it spawns one poll-and-decide pass on a long
/// interval; on a foreground transition it kills that pass so it never runs
/// alongside the embedder's own polling loop. Foreground loop construction
/// and lifetime stay with the embedder.
pub struct BackgroundCoordinator<S: Sensor + Clone + 'static> {
    sensor: S,
    controller: Arc<ThermostatController<S>>,
    config: Arc<dyn ConfigProvider>,
    sink: Arc<dyn MessageSink>,
    store: Option<Arc<dyn ReadingStore>>,
    background_every: Duration,
    foreground: Arc<AtomicBool>,
    pass: Mutex<Option<BackgroundPass>>,
}

struct BackgroundPass {
    poller: Arc<PollingLoop>,
    driver: JoinHandle<()>,
}

impl<S: Sensor + Clone + 'static> BackgroundCoordinator<S> {
    pub fn new(
        sensor: S,
        controller: Arc<ThermostatController<S>>,
        config: Arc<dyn ConfigProvider>,
        sink: Arc<dyn MessageSink>,
        store: Option<Arc<dyn ReadingStore>>,
        background_every: Duration,
    ) -> Self {
        Self {
            sensor,
            controller,
            config,
            sink,
            store,
            background_every,
            // Apps start out foregrounded.
            foreground: Arc::new(AtomicBool::new(true)),
            pass: Mutex::new(None),
        }
    }

    pub fn on_foreground_change(&self, is_foreground: bool) {
        self.foreground.store(is_foreground, Ordering::SeqCst);

        if is_foreground {
            self.sink
                .publish(FeedEvent::Trace("Switching app to front".into()));
            self.kill_background_pass();
        } else {
            self.sink
                .publish(FeedEvent::Trace("Switching to background".into()));
            self.spawn_background_pass();
        }
    }

    fn spawn_background_pass(&self) {
        let mut pass = self.pass.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = pass.as_ref() {
            if !existing.driver.is_finished() {
                // Duplicate background notification; one pass is plenty.
                return;
            }
        }

        let poller = Arc::new(PollingLoop::spawn(
            self.sensor.clone(),
            self.background_every,
            self.sink.clone(),
            self.store.clone(),
        ));

        let driver = tokio::spawn(drive_background_pass(
            poller.clone(),
            self.controller.clone(),
            self.config.clone(),
            self.sink.clone(),
            self.foreground.clone(),
        ));

        *pass = Some(BackgroundPass { poller, driver });
    }

    fn kill_background_pass(&self) {
        let Some(pass) = self
            .pass
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };
        pass.poller.kill();
        // The driver winds down on its own once the event stream closes.
    }
}

async fn drive_background_pass<S: Sensor + 'static>(
    poller: Arc<PollingLoop>,
    controller: Arc<ThermostatController<S>>,
    config: Arc<dyn ConfigProvider>,
    sink: Arc<dyn MessageSink>,
    foreground: Arc<AtomicBool>,
) {
    // The app may have come back to front before this task got to run;
    // in that case the pass must not start at all.
    if foreground.load(Ordering::SeqCst) {
        poller.kill();
        return;
    }

    let Ok(mut events) = poller.subscribe() else {
        return;
    };
    if poller.start().is_err() {
        return;
    }

    loop {
        match events.recv().await {
            Ok(PollEvent::Reading(reading)) => {
                let snapshot = config.thermostat();
                match controller.decide(reading.temperature, &snapshot).await {
                    Ok(state) => debug!("Background cycle done, device {}", state),
                    Err(err) => sink.publish(FeedEvent::Error(err.to_string())),
                }
            }
            // The loop already surfaced the error; its next tick retries.
            Ok(PollEvent::Error(_)) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!("Background feed lagging, {} readings skipped", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!("Background pass finished");
}
