//! Wire protocol frames exchanged over the chat WebSocket.

use serde::{Deserialize, Serialize};

use crate::store::MessageRecord;

/// Frame a client submits to send a message. Unknown extra fields are
/// tolerated.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientFrame {
    pub message: String,
    pub recipient: String,
}

/// Frames the server emits on a chat connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Unseen-message snapshot, sent exactly once immediately after connect.
    Notification { new_messages: Vec<MessageRecord> },
    /// A live chat message, either the sender's own echo or a routed
    /// delivery.
    Message {
        message: String,
        sender: String,
        recipient: String,
    },
    /// An in-band failure report addressed to the acting user.
    Error { message: String, sender: String },
}

/// Payload fanned out through the group router to a recipient's live
/// connections.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedMessage {
    pub message: String,
    pub sender: String,
    pub recipient: String,
}
