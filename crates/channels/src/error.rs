/// Crate-wide result type for channel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed errors for adapter resolution and the adapter contract.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A channel id does not name a known platform.
    #[error("unknown channel: {channel}")]
    UnknownChannel { channel: String },

    /// No adapter is registered for the channel.
    #[error("no adapter registered for channel: {channel}")]
    MissingAdapter { channel: String },

    /// An adapter is registered but does not expose the required send
    /// contract (outbound sender with text and media sends).
    #[error("adapter for {channel} is misconfigured: {message}")]
    Misconfigured { channel: String, message: String },

    /// A handshake frame arrived that is invalid in the current state.
    #[error("unexpected handshake frame in state {state}: {frame}")]
    Handshake { state: String, frame: String },
}

impl Error {
    #[must_use]
    pub fn unknown_channel(channel: impl std::fmt::Display) -> Self {
        Self::UnknownChannel {
            channel: channel.to_string(),
        }
    }

    #[must_use]
    pub fn missing_adapter(channel: impl std::fmt::Display) -> Self {
        Self::MissingAdapter {
            channel: channel.to_string(),
        }
    }

    #[must_use]
    pub fn misconfigured(
        channel: impl std::fmt::Display,
        message: impl std::fmt::Display,
    ) -> Self {
        Self::Misconfigured {
            channel: channel.to_string(),
            message: message.to_string(),
        }
    }
}
