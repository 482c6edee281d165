//! Configuration loading and schema for the herald delivery core.
//!
//! Formats: TOML, YAML, JSON, JSON5, discovered from project-local and
//! user-global locations, with `${ENV_VAR}` substitution.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;

pub use {
    loader::{discover_and_load, load_config},
    schema::{
        AccountTuning, ChannelTuning, ChannelsConfig, ChunkStrategy, HeraldConfig, HitlConfig,
        MarkdownTableMode, OutboundGateMode, SessionsConfig,
    },
};
