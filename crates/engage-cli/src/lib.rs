//! # engage-cli
//!
//! Command-line interface for the Engage agent.
//!
//! ## Commands
//!
//! - `engage run`: Run discrete engagement cycles against the inbox bridge
//! - `engage stream`: Join a live audio room
//! - `engage memory`: Inspect or clear stored conversations
//! - `engage ledger`: Show recently handled signals
//! - `engage post`: Queue and list standalone posts
//! - `engage config`: Show configuration
//! - `engage doctor`: Check configuration and collaborators

pub mod commands;

pub use commands::Cli;
