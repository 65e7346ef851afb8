//! # engage-core
//!
//! Core types and primitives for the Engage social engagement agent.
//! This crate defines the shared vocabulary used by every other crate in the workspace:
//! conversation messages, raw platform signals, deduplication ids, events, and errors.

pub mod error;
pub mod event;
pub mod message;
pub mod signal;
pub mod types;

pub use error::{EngageError, Result};
pub use event::{Event, EventBus};
pub use message::{MentionRecord, Message, MessageKind};
pub use signal::{RawMessage, RawSignal, RawThread, Segment, SignalId};
pub use types::*;
