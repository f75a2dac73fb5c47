//! Configuration crate for the Mediaflow processing pipeline.

mod config;

pub use config::{
    Config, ConfigError, ServerConfig, SourceConfig, StagesConfig, StateConfig, TranscodeConfig,
};
