use thiserror::Error;

/// Everything that can go wrong talking to the device or driving a loop.
///
/// Variants carry rendered strings rather than sources so events stay
/// cheaply cloneable across broadcast channels.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// No device address configured, or the configured one is not a URL.
    /// Surfaced before any network attempt.
    #[error("no usable device address: {0}")]
    Config(String),

    /// Transport-level failure (connection refused, timeout). Transient;
    /// the next scheduled tick retries.
    #[error("network problem while polling device: {0}")]
    Network(String),

    /// The device answered, but with a non-OK status or a payload missing
    /// the expected field. Same retry policy as [`Error::Network`].
    #[error("device response unusable: {0}")]
    Protocol(String),

    /// Operation on a polling loop that has been killed. Terminal; a fresh
    /// loop instance is required to resume.
    #[error("polling loop has been killed")]
    Killed,
}
