//! # engage-runtime
//!
//! The engagement runtime. Two ways to run the agent share one
//! [`EngagementState`]:
//!
//! - [`CycleOrchestrator`]: discrete cycles over requests, DMs and mentions.
//! - [`StreamScheduler`]: five concurrent stages listening and speaking in a
//!   live audio room.
//!
//! Every network-touching call goes through [`RetryPolicy`].

pub mod cycle;
pub mod retry;
pub mod state;
pub mod stream;

pub use cycle::{CycleOrchestrator, CycleReport, Phase};
pub use retry::RetryPolicy;
pub use state::{Attention, EngagementState};
pub use stream::buffer::{AnalysisBuffer, AnalysisRecord};
pub use stream::{Stage, StreamHealth, StreamScheduler, WorkItem};
