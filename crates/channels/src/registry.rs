use std::collections::HashMap;

use crate::{
    adapter::{ChannelAdapter, OutboundSender},
    channel::Channel,
    error::{Error, Result},
};

/// Registry of all loaded channel adapters, keyed by channel id.
///
/// This is the single place channel dispatch happens; callers resolve the
/// uniform contract here instead of branching on the channel themselves.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<Channel, Box<dyn ChannelAdapter>>,
}

impl AdapterRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Box<dyn ChannelAdapter>) {
        let id = adapter.id();
        if self.adapters.insert(id, adapter).is_some() {
            tracing::warn!(channel = %id, "replacing previously registered adapter");
        }
    }

    #[must_use]
    pub fn get(&self, channel: Channel) -> Option<&dyn ChannelAdapter> {
        self.adapters.get(&channel).map(|a| a.as_ref())
    }

    #[must_use]
    pub fn list(&self) -> Vec<Channel> {
        self.adapters.keys().copied().collect()
    }

    /// Resolve the send contract for `channel`.
    ///
    /// Fails fatally when no adapter is registered or the adapter exposes
    /// no outbound sender — both are deployment configuration errors, not
    /// runtime conditions to retry.
    pub fn resolve_outbound(&self, channel: Channel) -> Result<&dyn OutboundSender> {
        let adapter = self
            .get(channel)
            .ok_or_else(|| Error::missing_adapter(channel))?;
        adapter
            .outbound()
            .ok_or_else(|| Error::misconfigured(channel, "adapter has no outbound sender"))
    }
}
