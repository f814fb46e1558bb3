use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::ConfigProvider;
use crate::error::Error;

use super::{PowerChangeResponse, PowerState, PowerStatusResponse, PowerTarget, Reading, StatusSnsResponse};

const CMND_TEMPERATURE: &str = "status%208";
const CMND_POWER_STATUS: &str = "status%209";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// The device-facing seam. Loops and the keeper only ever talk to the
/// device through this trait, so tests can drive them with a scripted fake.
pub trait Sensor: Send + Sync {
    fn read_temperature(&self) -> impl Future<Output = Result<Reading, Error>> + Send;
    fn read_power_state(&self) -> impl Future<Output = Result<PowerState, Error>> + Send;
    fn set_power(
        &self,
        desired: PowerTarget,
    ) -> impl Future<Output = Result<PowerState, Error>> + Send;
}

impl<T: Sensor + ?Sized> Sensor for Arc<T> {
    fn read_temperature(&self) -> impl Future<Output = Result<Reading, Error>> + Send {
        (**self).read_temperature()
    }

    fn read_power_state(&self) -> impl Future<Output = Result<PowerState, Error>> + Send {
        (**self).read_power_state()
    }

    fn set_power(
        &self,
        desired: PowerTarget,
    ) -> impl Future<Output = Result<PowerState, Error>> + Send {
        (**self).set_power(desired)
    }
}

/// HTTP client for a Tasmota device's `cm` endpoint. One GET per call,
/// no internal retries; retrying is the scheduler's business.
#[derive(Clone)]
pub struct SensorClient {
    http: reqwest::Client,
    config: Arc<dyn ConfigProvider>,
}

impl SensorClient {
    pub fn new(config: Arc<dyn ConfigProvider>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");

        Self { http, config }
    }

    /// Resolve `{base_url}/cm?cmnd=<cmnd>` from the current config.
    /// The address is re-read on every call so settings changes apply to
    /// the next cycle without rebuilding the client.
    fn command_url(&self, cmnd: &str) -> Result<Url, Error> {
        let base = self.config.base_url().unwrap_or_default();
        let base = base.trim();
        if base.is_empty() {
            return Err(Error::Config(
                "no address for temperature reading, go to settings".into(),
            ));
        }

        let mut url = Url::parse(base)
            .and_then(|u| u.join("cm"))
            .map_err(|e| Error::Config(format!("invalid device address {base:?}: {e}")))?;
        // cmnd values are pre-encoded, keep them verbatim.
        url.set_query(Some(&format!("cmnd={cmnd}")));
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, cmnd: &str) -> Result<T, Error> {
        let url = self.command_url(cmnd)?;
        debug!("GET {}", url);

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Network(format!("polling request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Protocol(format!(
                "device answered {} to cmnd={cmnd}",
                response.status()
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| Error::Protocol(format!("unreadable payload: {e}")))
    }
}

impl Sensor for SensorClient {
    async fn read_temperature(&self) -> Result<Reading, Error> {
        let status: StatusSnsResponse = self.get_json(CMND_TEMPERATURE).await?;
        let temperature = status.temperature().ok_or_else(|| {
            Error::Protocol("status 8 response carries no DS18B20 temperature".into())
        })?;
        Ok(Reading::now(temperature))
    }

    async fn read_power_state(&self) -> Result<PowerState, Error> {
        let status: PowerStatusResponse = self.get_json(CMND_POWER_STATUS).await?;
        status
            .power_state()
            .ok_or_else(|| Error::Protocol("status 9 response carries no power field".into()))
    }

    async fn set_power(&self, desired: PowerTarget) -> Result<PowerState, Error> {
        let ack: PowerChangeResponse = self.get_json(desired.command()).await?;
        ack.power_state()
            .ok_or_else(|| Error::Protocol("power command was not acknowledged".into()))
    }
}
