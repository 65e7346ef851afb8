//! # engage-memory
//!
//! Durable state for the Engage agent, kept in one SQLite database:
//!
//! - **Conversations**: one JSON record per handle with its DMs, mentions, and metadata.
//! - **Reply ledger**: every signal we have answered, the source of truth for deduplication.
//! - **Post queue**: outbound posts waiting to be published.
//!
//! Conversation writes are write-through. A failed write never surfaces to the caller;
//! the handle stays dirty and is retried on the next mutation and on `flush`.

pub mod conversation;
pub mod ledger;
pub mod post_queue;
pub mod store;

pub use conversation::{Conversation, ConversationMetadata};
pub use ledger::{DedupLedger, ReplyLedgerEntry};
pub use post_queue::{PostQueue, PostStatus, QueuedPost};
pub use store::{ConversationStore, WriteStatus};
