use serde::{Deserialize, Serialize};

/// Identifier for a chat platform the gateway can deliver to.
///
/// The set is fixed but extensible: adding a platform means adding a
/// variant here and registering an adapter for it. `None` is a sentinel
/// for "no channel" used by config defaults; it never resolves to an
/// adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Whatsapp,
    Telegram,
    Discord,
    Slack,
    Signal,
    Imessage,
    Matrix,
    Msteams,
    Sms,
    Bluesky,
    Qq,
    None,
}

impl Channel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Whatsapp => "whatsapp",
            Self::Telegram => "telegram",
            Self::Discord => "discord",
            Self::Slack => "slack",
            Self::Signal => "signal",
            Self::Imessage => "imessage",
            Self::Matrix => "matrix",
            Self::Msteams => "msteams",
            Self::Sms => "sms",
            Self::Bluesky => "bluesky",
            Self::Qq => "qq",
            Self::None => "none",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Channel {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "whatsapp" => Ok(Self::Whatsapp),
            "telegram" => Ok(Self::Telegram),
            "discord" => Ok(Self::Discord),
            "slack" => Ok(Self::Slack),
            "signal" => Ok(Self::Signal),
            "imessage" => Ok(Self::Imessage),
            "matrix" => Ok(Self::Matrix),
            "msteams" => Ok(Self::Msteams),
            "sms" => Ok(Self::Sms),
            "bluesky" => Ok(Self::Bluesky),
            "qq" => Ok(Self::Qq),
            "none" => Ok(Self::None),
            other => Err(crate::Error::unknown_channel(other)),
        }
    }
}
