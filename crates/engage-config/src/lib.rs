//! # engage-config
//!
//! Configuration system for the Engage agent. Reads from `engage.toml`, environment
//! variables, and CLI overrides, in that precedence order.
//!
//! Supports hot-reload via filesystem watcher.

pub mod schema;
pub mod loader;

pub use schema::EngageConfig;
pub use schema::{
    AdaptersConfig, AgentConfig, ConfidenceConfig, ConfigWarning, CycleConfig, GateConfig,
    LoggingConfig, MemoryConfig, RetryConfig, StreamConfig, WarningSeverity,
};
pub use loader::ConfigLoader;
