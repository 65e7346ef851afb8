//! # engage-confidence
//!
//! Decides whether the agent should speak. Every `(handle, context)` pair carries a
//! confidence score in `[0, 1]` that grows with successful interactions; a per-context
//! gate turns that score (and the topic's relevance to the persona) into a yes/no.

pub mod engine;
pub mod policy;
pub mod relevance;

pub use engine::{ConfidenceEngine, ConfidenceEntry};
pub use policy::{ConfidencePolicy, Gate};
pub use relevance::Interests;
