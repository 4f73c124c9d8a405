//! Message persistence

pub mod messages;
pub use messages::{MarkSeenOutcome, MessageRecord, MessageStore, MAX_MESSAGE_LEN};
