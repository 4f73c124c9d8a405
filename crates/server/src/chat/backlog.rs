//! Backlog assembly
//!
//! Builds the `notification` frame a client receives as the first frame of
//! every session: a point-in-time snapshot of its unseen messages. Messages
//! arriving after the snapshot travel only on the live path.

use anyhow::Result;

use crate::chat::frames::ServerFrame;
use crate::store::MessageStore;

/// Compute the unseen-message snapshot for `username` and wrap it in the
/// initial notification frame. No unseen messages yields an empty array, not
/// an error.
pub async fn notification_frame(store: &MessageStore, username: &str) -> Result<ServerFrame> {
    let new_messages = store.unseen_for_recipient(username).await?;
    Ok(ServerFrame::Notification { new_messages })
}
