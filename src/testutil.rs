//! Shared fakes for the unit tests: a scriptable sensor, a capturing
//! message sink, and a capturing store.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::ThermostatConfig;
use crate::error::Error;
use crate::feed::{FeedEvent, MessageSink};
use crate::sensor::{PowerState, PowerTarget, Reading, Sensor};
use crate::store::ReadingStore;

/// An enabled thermostat config with zero margins over `[min, max]`.
pub fn thermostat_config(min_temp: f64, max_temp: f64) -> ThermostatConfig {
    ThermostatConfig {
        min_temp,
        max_temp,
        turn_on_margin: 0.0,
        turn_off_margin: 0.0,
        enabled: true,
        read_only: false,
    }
}

/// Scriptable device double. Counts calls, tracks how many are in flight
/// at once, and optionally sleeps (virtual time) before answering.
pub struct MockSensor {
    temperature: Mutex<Result<f64, Error>>,
    power: Mutex<Result<PowerState, Error>>,
    latency: Mutex<Duration>,
    last_set: Mutex<Option<PowerTarget>>,
    temp_reads: AtomicUsize,
    power_reads: AtomicUsize,
    power_sets: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockSensor {
    /// A sensor that always reports `temperature`, relay Off.
    pub fn reading(temperature: f64) -> Arc<Self> {
        Arc::new(Self {
            temperature: Mutex::new(Ok(temperature)),
            power: Mutex::new(Ok(PowerState::Off)),
            latency: Mutex::new(Duration::ZERO),
            last_set: Mutex::new(None),
            temp_reads: AtomicUsize::new(0),
            power_reads: AtomicUsize::new(0),
            power_sets: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    /// A sensor whose every call fails with `error`.
    pub fn failing(error: Error) -> Arc<Self> {
        let sensor = Self::reading(0.0);
        *lock(&sensor.temperature) = Err(error.clone());
        *lock(&sensor.power) = Err(error);
        sensor
    }

    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = latency;
    }

    pub fn set_power_state(&self, state: PowerState) {
        *lock(&self.power) = Ok(state);
    }

    pub fn set_power_result(&self, result: Result<PowerState, Error>) {
        *lock(&self.power) = result;
    }

    pub fn temp_reads(&self) -> usize {
        self.temp_reads.load(Ordering::SeqCst)
    }

    pub fn power_reads(&self) -> usize {
        self.power_reads.load(Ordering::SeqCst)
    }

    pub fn power_sets(&self) -> usize {
        self.power_sets.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn last_set(&self) -> Option<PowerTarget> {
        *lock(&self.last_set)
    }

    async fn answer_after_latency(&self) {
        let entered = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(entered, Ordering::SeqCst);

        let latency = *lock(&self.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Sensor for MockSensor {
    async fn read_temperature(&self) -> Result<Reading, Error> {
        self.temp_reads.fetch_add(1, Ordering::SeqCst);
        self.answer_after_latency().await;
        lock(&self.temperature).clone().map(Reading::now)
    }

    async fn read_power_state(&self) -> Result<PowerState, Error> {
        self.power_reads.fetch_add(1, Ordering::SeqCst);
        self.answer_after_latency().await;
        lock(&self.power).clone()
    }

    async fn set_power(&self, desired: PowerTarget) -> Result<PowerState, Error> {
        self.power_sets.fetch_add(1, Ordering::SeqCst);
        self.answer_after_latency().await;
        *lock(&self.last_set) = Some(desired);
        *lock(&self.power) = Ok(desired.as_state());
        Ok(desired.as_state())
    }
}

/// Collects every published feed event.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<FeedEvent>>,
}

impl CaptureSink {
    pub fn traces(&self) -> Vec<String> {
        lock(&self.events)
            .iter()
            .filter_map(|event| match event {
                FeedEvent::Trace(msg) => Some(msg.clone()),
                _ => None,
            })
            .collect()
    }
}

impl MessageSink for CaptureSink {
    fn publish(&self, event: FeedEvent) {
        lock(&self.events).push(event);
    }
}

/// Collects stored readings and error records; can be told to fail.
#[derive(Default)]
pub struct CaptureStore {
    readings: Mutex<Vec<Reading>>,
    errors: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl CaptureStore {
    pub fn fail_writes(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn readings(&self) -> Vec<Reading> {
        lock(&self.readings).clone()
    }

    pub fn errors(&self) -> Vec<String> {
        lock(&self.errors).clone()
    }
}

impl ReadingStore for CaptureStore {
    fn store_reading(&self, reading: &Reading) -> Result<(), String> {
        if self.fail.load(Ordering::SeqCst) {
            return Err("store is down".into());
        }
        lock(&self.readings).push(*reading);
        Ok(())
    }

    fn store_error(&self, message: &str, _at: DateTime<Utc>) -> Result<(), String> {
        if self.fail.load(Ordering::SeqCst) {
            return Err("store is down".into());
        }
        lock(&self.errors).push(message.to_string());
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
