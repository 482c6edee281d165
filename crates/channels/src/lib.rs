//! Channel adapter system.
//!
//! Each chat platform (WhatsApp, Telegram, Discord, Slack, Signal, etc.)
//! implements the uniform send contract in [`adapter`]; the delivery core
//! resolves adapters through [`registry::AdapterRegistry`] and never
//! branches on a channel id directly.

pub mod adapter;
pub mod channel;
pub mod error;
pub mod handshake;
pub mod registry;

pub use {
    adapter::{
        ChannelAdapter, ChunkMode, DeliveryResult, OutboundSender, PayloadSender, SendContext,
        StyleRange, StyledSender, StyledText, TextChunker, TextStyle,
    },
    channel::Channel,
    error::{Error, Result},
    registry::AdapterRegistry,
};
