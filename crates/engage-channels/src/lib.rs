//! # engage-channels
//!
//! The collaborators the engagement core talks to, behind three traits:
//!
//! | Trait               | Shipped implementation | Bridges to                          |
//! |---------------------|------------------------|-------------------------------------|
//! | `PlatformAdapter`   | `FileInbox`            | a scraper writing JSON inbox files  |
//! | `ResponseGenerator` | `HttpGenerator`        | a text-generation HTTP service      |
//! | `SpeechIo`          | `TranscriptFeed`       | JSONL transcript in, JSONL speech out |
//!
//! `mock` holds scripted doubles for tests.

pub mod adapter;
pub mod generator;
pub mod inbox;
pub mod mock;
pub mod transcript;

pub use adapter::{AnalysisAspect, ComposeRequest, PlatformAdapter, ResponseGenerator, SpeechIo};
pub use generator::HttpGenerator;
pub use inbox::FileInbox;
pub use transcript::TranscriptFeed;
