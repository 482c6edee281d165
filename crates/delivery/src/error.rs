use herald_channels::Channel;

/// Crate-wide result type for delivery operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed delivery errors.
///
/// Gate-level failures (`Configuration`, `ApprovalDenied`,
/// `ApprovalUnavailable`, `Aborted`) always abort the whole call; only
/// `Transport` is subject to the caller's best-effort flag.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Adapter resolution failed — missing adapter or incomplete contract.
    #[error(transparent)]
    Configuration(#[from] herald_channels::Error),

    /// A human (or the default decision) denied the batch. Zero sends.
    #[error("outbound delivery denied by approval gate")]
    ApprovalDenied,

    /// The approval request could not be created. Unavailability of the
    /// approval system never silently authorizes a send.
    #[error("approval request could not be created: {message}")]
    ApprovalUnavailable { message: String },

    /// The caller's abort signal fired. Messages already sent stay sent.
    #[error("delivery aborted")]
    Aborted,

    /// An adapter send call failed.
    #[error("send failed on {channel}: {source}")]
    Transport {
        channel: Channel,
        #[source]
        source: anyhow::Error,
    },

    /// JSON (de)serialization failed.
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn approval_unavailable(message: impl std::fmt::Display) -> Self {
        Self::ApprovalUnavailable {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn transport(channel: Channel, source: anyhow::Error) -> Self {
        Self::Transport { channel, source }
    }

    /// Whether this error may be swallowed by a best-effort call.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}
