pub mod background;
pub mod config;
pub mod error;
pub mod feed;
pub mod keeper;
pub mod poller;
pub mod sensor;
pub mod store;

#[cfg(test)]
pub(crate) mod testutil;

pub use background::BackgroundCoordinator;
pub use config::{Config, ConfigProvider, SharedConfig, ThermostatConfig};
pub use error::Error;
pub use feed::{ChannelSink, FeedEvent, MessageSink};
pub use keeper::ThermostatController;
pub use poller::{PollEvent, PollState, PollingLoop};
pub use sensor::{PowerState, PowerTarget, Reading, Sensor, SensorClient};
pub use store::{JsonlStore, ReadingStore};
