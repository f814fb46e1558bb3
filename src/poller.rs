use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, warn};

use crate::error::Error;
use crate::feed::{FeedEvent, MessageSink};
use crate::sensor::{Reading, Sensor};
use crate::store::ReadingStore;

const EVENT_BUFFER: usize = 100;

/// Lifecycle of a [`PollingLoop`]. `Killed` is terminal; a killed loop can
/// never be restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Polling,
    Killed,
}

/// One completed poll cycle, as seen by subscribers.
#[derive(Debug, Clone)]
pub enum PollEvent {
    Reading(Reading),
    Error(Error),
}

/// Periodic temperature poller.
///
/// While polling, one cycle runs immediately and then once per interval,
/// measured from the start of the previous cycle. The worker awaits each
/// device call inline, so cycles never overlap; ticks that land while a
/// call is still in flight are skipped, not queued. Errors are published
/// and the next tick is scheduled as usual — the loop only ever ends via
/// [`kill`](PollingLoop::kill) or drop.
pub struct PollingLoop {
    demand: watch::Sender<PollState>,
    events: Mutex<Option<broadcast::Sender<PollEvent>>>,
}

impl PollingLoop {
    /// Spawn the worker task. The loop starts out `Idle`; call
    /// [`start`](PollingLoop::start) to begin polling.
    pub fn spawn<S>(
        sensor: S,
        check_every: Duration,
        sink: Arc<dyn MessageSink>,
        store: Option<Arc<dyn ReadingStore>>,
    ) -> Self
    where
        S: Sensor + 'static,
    {
        let (demand_tx, demand_rx) = watch::channel(PollState::Idle);
        let (events_tx, _) = broadcast::channel(EVENT_BUFFER);

        tokio::spawn(run_worker(
            sensor,
            check_every,
            demand_rx,
            events_tx.clone(),
            sink,
            store,
        ));

        Self {
            demand: demand_tx,
            events: Mutex::new(Some(events_tx)),
        }
    }

    /// Begin polling, or resume after [`stop`](PollingLoop::stop).
    /// Fails with [`Error::Killed`] once the loop has been killed.
    pub fn start(&self) -> Result<(), Error> {
        if self.state() == PollState::Killed {
            return Err(Error::Killed);
        }
        let _ = self.demand.send(PollState::Polling);
        Ok(())
    }

    /// Cease polling after the in-flight call, if any, resolves. The loop
    /// stays resumable. No-op on a killed loop.
    pub fn stop(&self) {
        if self.state() != PollState::Killed {
            let _ = self.demand.send(PollState::Idle);
        }
    }

    /// Tear the loop down for good: the worker exits after the current
    /// cycle and every subscriber's stream ends.
    pub fn kill(&self) {
        let _ = self.demand.send(PollState::Killed);
        // Dropping our sender half lets the channel close once the worker
        // (which still delivers the in-flight event) exits.
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn state(&self) -> PollState {
        *self.demand.borrow()
    }

    /// Subscribe to the reading/error stream.
    pub fn subscribe(&self) -> Result<broadcast::Receiver<PollEvent>, Error> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|tx| tx.subscribe())
            .ok_or(Error::Killed)
    }
}

async fn run_worker<S: Sensor>(
    sensor: S,
    check_every: Duration,
    mut demand: watch::Receiver<PollState>,
    events: broadcast::Sender<PollEvent>,
    sink: Arc<dyn MessageSink>,
    store: Option<Arc<dyn ReadingStore>>,
) {
    'lifecycle: loop {
        // Wait for a start signal.
        loop {
            match *demand.borrow_and_update() {
                PollState::Polling => break,
                PollState::Killed => break 'lifecycle,
                PollState::Idle => {}
            }
            if demand.changed().await.is_err() {
                // Handle dropped; nobody can start us again.
                break 'lifecycle;
            }
        }

        // Cycle boundaries sit at multiples of the interval from the start
        // signal; the first poll runs immediately. Boundaries that pass
        // while a call is in flight are dropped, not queued.
        let started = Instant::now();
        let mut next_deadline = started;

        loop {
            tokio::select! {
                changed = demand.changed() => {
                    if changed.is_err() {
                        break 'lifecycle;
                    }
                    match *demand.borrow_and_update() {
                        PollState::Idle => continue 'lifecycle,
                        PollState::Killed => break 'lifecycle,
                        PollState::Polling => {}
                    }
                }
                _ = sleep_until(next_deadline) => {
                    // Awaited inline: stop/kill only take effect at the
                    // next tick boundary, never mid-request.
                    poll_once(&sensor, &events, sink.as_ref(), store.as_deref()).await;

                    next_deadline += check_every;
                    let now = Instant::now();
                    while next_deadline <= now {
                        next_deadline += check_every;
                    }
                }
            }
        }
    }
    debug!("Polling worker exiting");
}

async fn poll_once<S: Sensor>(
    sensor: &S,
    events: &broadcast::Sender<PollEvent>,
    sink: &dyn MessageSink,
    store: Option<&dyn ReadingStore>,
) {
    match sensor.read_temperature().await {
        Ok(reading) => {
            debug!("Sensor reading: {:.1}", reading.temperature);
            sink.publish(FeedEvent::Reading(reading));
            if let Some(store) = store {
                if let Err(e) = store.store_reading(&reading) {
                    warn!("Failed to store reading: {}", e);
                }
            }
            let _ = events.send(PollEvent::Reading(reading));
        }
        Err(err) => {
            warn!("Poll cycle failed: {}", err);
            sink.publish(FeedEvent::Error(err.to_string()));
            if let Some(store) = store {
                if let Err(e) = store.store_error(&err.to_string(), Utc::now()) {
                    warn!("Failed to store error record: {}", e);
                }
            }
            let _ = events.send(PollEvent::Error(err));
        }
    }
}
