use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::time::{Instant, sleep_until};
use tracing::debug;

use crate::config::{ConfigProvider, ThermostatConfig};
use crate::error::Error;
use crate::feed::{FeedEvent, MessageSink};
use crate::sensor::{PowerState, PowerTarget, Sensor};

/// Hysteresis thermostat over the device relay.
///
/// All relay mutation in the system funnels through
/// [`decide`](ThermostatController::decide); at most one decide-and-command
/// sequence runs at a time, and a call that arrives while one is in flight
/// is dropped rather than queued.
pub struct ThermostatController<S> {
    sensor: S,
    sink: Arc<dyn MessageSink>,
    last_power: StdMutex<PowerState>,
    deciding: Mutex<()>,
}

impl<S: Sensor> ThermostatController<S> {
    pub fn new(sensor: S, sink: Arc<dyn MessageSink>) -> Self {
        Self {
            sensor,
            sink,
            last_power: StdMutex::new(PowerState::Unknown),
            deciding: Mutex::new(()),
        }
    }

    /// Last relay state confirmed by the device.
    pub fn last_power(&self) -> PowerState {
        *self
            .last_power
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one decision cycle against a config snapshot.
    ///
    /// Below `min_temp` (less the turn-off margin) the relay is commanded
    /// Off; above `max_temp` (plus the turn-on margin) it is commanded On.
    /// In between the relay is queried and left alone. Before commanding,
    /// the current state is queried and an already-satisfied target
    /// short-circuits without a redundant command.
    pub async fn decide(
        &self,
        current_temp: f64,
        config: &ThermostatConfig,
    ) -> Result<PowerState, Error> {
        if !config.enabled {
            return Ok(PowerState::Unknown);
        }

        let Ok(_guard) = self.deciding.try_lock() else {
            let last = self.last_power();
            self.trace(format!(
                "Previous decision still running, skipping (temp {current_temp})"
            ));
            return Ok(last);
        };

        let target = if current_temp - config.turn_off_margin <= config.min_temp {
            Some(PowerTarget::Off)
        } else if current_temp + config.turn_on_margin > config.max_temp {
            Some(PowerTarget::On)
        } else {
            None
        };

        let Some(target) = target else {
            // Mid-range: observe the relay but leave it alone.
            let current = self.sensor.read_power_state().await?;
            self.remember(current);
            self.trace(format!(
                "Steady state at {current_temp}, device stays {current}"
            ));
            return Ok(current);
        };

        self.trace(format!("Trying to toggle device: temp ({current_temp})"));

        let current = self.sensor.read_power_state().await?;
        self.remember(current);

        if current == target.as_state() {
            self.trace(format!("Device already {current}, no command sent"));
            return Ok(current);
        }

        if config.read_only {
            self.trace(format!("Read-only mode, would turn device {target}"));
            return Ok(current);
        }

        let confirmed = self.sensor.set_power(target).await?;
        self.remember(confirmed);
        let success = confirmed == target.as_state();
        self.trace(format!(
            "Changing device power to {target}. Success: {success}"
        ));
        Ok(confirmed)
    }

    /// Timer-driven decision loop: once per `every`, decide against the
    /// latest temperature. Ticks before the first reading are skipped.
    /// Ends when the temperature channel closes.
    pub async fn run(
        self: Arc<Self>,
        every: Duration,
        latest_temp: watch::Receiver<Option<f64>>,
        config: Arc<dyn ConfigProvider>,
    ) {
        // Same boundary discipline as the polling loop: decide on multiples
        // of the interval, dropping boundaries a slow decision ran over.
        let started = Instant::now();
        let mut next_deadline = started;

        loop {
            sleep_until(next_deadline).await;
            if latest_temp.has_changed().is_err() {
                // Reading producer is gone.
                break;
            }

            let latest = *latest_temp.borrow();
            if let Some(temp) = latest {
                let snapshot = config.thermostat();
                match self.decide(temp, &snapshot).await {
                    Ok(state) => debug!("Keeper cycle done, device {}", state),
                    Err(err) => self.sink.publish(FeedEvent::Error(err.to_string())),
                }
            }

            next_deadline += every;
            let now = Instant::now();
            while next_deadline <= now {
                next_deadline += every;
            }
        }
        debug!("Keeper loop exiting");
    }

    fn remember(&self, state: PowerState) {
        *self
            .last_power
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn trace(&self, message: String) {
        self.sink.publish(FeedEvent::Trace(message));
    }
}
