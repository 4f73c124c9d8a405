//! Chat session state machine
//!
//! One session per WebSocket connection: authenticate, join the personal
//! group, deliver the backlog notification, pump frames in both directions,
//! leave the group on any termination path.

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message as WsMessage, Utf8Bytes, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::Response;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::auth::UserInfo;
use crate::chat::backlog::notification_frame;
use crate::chat::frames::{ClientFrame, RoutedMessage, ServerFrame};
use crate::config::AppState;
use crate::error::ChatError;
use crate::router::personal_group;
use crate::store::MAX_MESSAGE_LEN;

/// Close code sent when a connection presents no valid credential.
pub const CLOSE_POLICY_VIOLATION: u16 = 4003;

/// Lifecycle phase of one chat connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticated,
    Active,
    Closed,
}

/// Transport abstraction over one bidirectional connection.
///
/// The production implementation wraps an axum WebSocket; tests drive the
/// session through an in-memory channel pair instead.
#[async_trait]
pub trait FrameTransport: Send {
    /// Send one server frame. An error means the connection is unusable.
    async fn send_frame(&mut self, frame: &ServerFrame) -> Result<(), ChatError>;

    /// Receive the next raw text frame. `None` when the peer is gone.
    async fn next_frame(&mut self) -> Option<Result<String, ChatError>>;
}

/// Per-connection protocol state machine.
pub struct ChatSession {
    app: AppState,
    phase: SessionState,
    user: Option<UserInfo>,
}

impl ChatSession {
    /// New session for a connection that has not yet presented credentials.
    pub fn connecting(app: AppState) -> Self {
        Self {
            app,
            phase: SessionState::Connecting,
            user: None,
        }
    }

    pub fn phase(&self) -> SessionState {
        self.phase
    }

    /// Validate the presented credential token. On failure the session stays
    /// in `Connecting` and the caller must close the connection with
    /// [`CLOSE_POLICY_VIOLATION`].
    pub async fn authenticate(&mut self, token: Option<&str>) -> Result<&UserInfo, ChatError> {
        let token = token.ok_or(ChatError::Unauthenticated)?;
        match self.app.auth.validate_session(token).await {
            Ok(user) => {
                self.phase = SessionState::Authenticated;
                self.user = Some(user);
                Ok(self.user.as_ref().ok_or(ChatError::Unauthenticated)?)
            }
            Err(e) => {
                debug!("[Chat] credential rejected: {}", e);
                Err(ChatError::Unauthenticated)
            }
        }
    }

    /// Drive the session until the connection closes. The group membership
    /// is released on every exit path, including panics, because leaving is
    /// the membership handle's destructor.
    pub async fn run<T: FrameTransport>(mut self, mut transport: T) -> SessionState {
        let Some(user) = self.user.clone() else {
            // Never authenticated; nothing was joined
            self.phase = SessionState::Closed;
            return self.phase;
        };

        let group = personal_group(&user.username);
        let mut membership = self.app.router.join(&group);
        self.phase = SessionState::Active;
        info!("[Chat] {} connected ({})", user.username, group);

        // The notification must be the first frame the client receives.
        match notification_frame(&self.app.messages, &user.username).await {
            Ok(frame) => {
                if transport.send_frame(&frame).await.is_err() {
                    self.phase = SessionState::Closed;
                    return self.phase;
                }
            }
            Err(e) => {
                warn!("[Chat] backlog failed for {}: {}", user.username, e);
                let _ = transport
                    .send_frame(&ServerFrame::Error {
                        message: "Failed to load unseen messages.".to_string(),
                        sender: user.username.clone(),
                    })
                    .await;
            }
        }

        loop {
            tokio::select! {
                inbound = transport.next_frame() => match inbound {
                    Some(Ok(text)) => {
                        if self
                            .handle_client_frame(&mut transport, &user, &text)
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!("[Chat] {} transport error: {}", user.username, e);
                        break;
                    }
                    None => break,
                },
                routed = membership.recv() => match routed {
                    Ok(msg) => {
                        let frame = ServerFrame::Message {
                            message: msg.message,
                            sender: msg.sender,
                            recipient: msg.recipient,
                        };
                        if transport.send_frame(&frame).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        // Missed live frames resurface in the next backlog
                        warn!(
                            "[Chat] {} lagged, dropped {} live frames",
                            user.username, missed
                        );
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }

        self.phase = SessionState::Closed;
        info!("[Chat] {} disconnected", user.username);
        self.phase
    }

    /// Process one inbound user frame: parse, resolve recipient, check
    /// blocks, persist, route to the recipient's group, echo back to the
    /// sender. Short-circuits with an in-band error frame on the first
    /// failing step. `Err` means the transport itself is gone.
    async fn handle_client_frame<T: FrameTransport>(
        &self,
        transport: &mut T,
        user: &UserInfo,
        raw: &str,
    ) -> Result<(), ChatError> {
        let frame: ClientFrame = match serde_json::from_str(raw) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("[Chat] {} sent malformed frame: {}", user.username, e);
                return self.send_error(transport, user, "Malformed chat frame.").await;
            }
        };

        if frame.message.is_empty() || frame.message.chars().count() > MAX_MESSAGE_LEN {
            let text = format!(
                "Message text must be between 1 and {} characters.",
                MAX_MESSAGE_LEN
            );
            return self.send_error(transport, user, &text).await;
        }

        let recipient = match self.app.auth.get_user_by_username(&frame.recipient).await {
            Ok(Some(recipient)) => recipient,
            Ok(None) => {
                let text = format!(
                    "No such user found with username {}.",
                    frame.recipient
                );
                return self.send_error(transport, user, &text).await;
            }
            Err(e) => {
                warn!("[Chat] recipient lookup failed: {}", e);
                return self.send_error(transport, user, "Failed to send message.").await;
            }
        };

        match self.app.blocks.is_blocked(&user.id, &recipient.id).await {
            Ok(true) => {
                return self
                    .send_error(transport, user, "You cannot message this user due to a block.")
                    .await;
            }
            Ok(false) => {}
            Err(e) => {
                warn!("[Chat] block check failed: {}", e);
                return self.send_error(transport, user, "Failed to send message.").await;
            }
        }

        if let Err(e) = self
            .app
            .messages
            .create(&frame.message, &user.id, &recipient.id)
            .await
        {
            warn!("[Chat] persist failed: {}", e);
            return self.send_error(transport, user, "Failed to send message.").await;
        }

        let delivered = self.app.router.send(
            &personal_group(&recipient.username),
            RoutedMessage {
                message: frame.message.clone(),
                sender: user.username.clone(),
                recipient: recipient.username.clone(),
            },
        );
        debug!(
            "[Chat] {} -> {} reached {} live connections",
            user.username, recipient.username, delivered
        );

        transport
            .send_frame(&ServerFrame::Message {
                message: frame.message,
                sender: user.username.clone(),
                recipient: recipient.username,
            })
            .await
    }

    async fn send_error<T: FrameTransport>(
        &self,
        transport: &mut T,
        user: &UserInfo,
        message: &str,
    ) -> Result<(), ChatError> {
        transport
            .send_frame(&ServerFrame::Error {
                message: message.to_string(),
                sender: user.username.clone(),
            })
            .await
    }
}

/// Production transport over an axum WebSocket.
pub struct WebSocketTransport {
    socket: WebSocket,
}

impl WebSocketTransport {
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl FrameTransport for WebSocketTransport {
    async fn send_frame(&mut self, frame: &ServerFrame) -> Result<(), ChatError> {
        let json = serde_json::to_string(frame).map_err(|e| ChatError::Protocol(e.to_string()))?;
        self.socket
            .send(WsMessage::Text(json.into()))
            .await
            .map_err(|_| ChatError::TransportClosed)
    }

    async fn next_frame(&mut self) -> Option<Result<String, ChatError>> {
        while let Some(item) = self.socket.next().await {
            match item {
                Ok(WsMessage::Text(text)) => return Some(Ok(text.to_string())),
                Ok(WsMessage::Close(_)) => return None,
                // Pings and pongs are answered by the ws layer itself
                Ok(_) => continue,
                Err(_) => return Some(Err(ChatError::TransportClosed)),
            }
        }
        None
    }
}

#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

/// GET /ws/chat?token=...
///
/// Upgrades the connection and runs a chat session for the authenticated
/// user. A missing or invalid token closes the socket with a policy
/// violation code before any chat frame is exchanged.
pub async fn ws_chat(
    ws: WebSocketUpgrade,
    Query(query): Query<WsAuthQuery>,
    State(app): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, query.token, app))
}

async fn handle_socket(mut socket: WebSocket, token: Option<String>, app: AppState) {
    let mut session = ChatSession::connecting(app);
    if session.authenticate(token.as_deref()).await.is_err() {
        debug!("[Chat] rejecting unauthenticated connection");
        let _ = socket
            .send(WsMessage::Close(Some(CloseFrame {
                code: CLOSE_POLICY_VIOLATION,
                reason: Utf8Bytes::from_static("authentication required"),
            })))
            .await;
        return;
    }

    session.run(WebSocketTransport::new(socket)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::BlockRegistry;
    use crate::config::ChatServerConfig;
    use crate::router::GroupRouter;
    use crate::store::MessageStore;
    use crate::{auth::AuthManager, open_pool};
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn test_state(dir: &TempDir) -> AppState {
        let config = ChatServerConfig::with_data_dir(dir.path());
        let pool = open_pool(&config).await.unwrap();
        AppState {
            auth: Arc::new(AuthManager::new(pool.clone()).await.unwrap()),
            messages: Arc::new(MessageStore::new(pool.clone()).await.unwrap()),
            blocks: Arc::new(BlockRegistry::new(pool).await.unwrap()),
            router: GroupRouter::new(16),
        }
    }

    #[tokio::test]
    async fn test_authenticate_rejects_missing_token() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir).await;

        let mut session = ChatSession::connecting(state);
        assert!(session.authenticate(None).await.is_err());
        assert_eq!(session.phase(), SessionState::Connecting);
    }

    #[tokio::test]
    async fn test_authenticate_rejects_invalid_token() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir).await;

        let mut session = ChatSession::connecting(state);
        assert!(session.authenticate(Some("bogus")).await.is_err());
        assert_eq!(session.phase(), SessionState::Connecting);
    }

    #[tokio::test]
    async fn test_authenticate_accepts_valid_token() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir).await;

        state
            .auth
            .signup("a@example.com".into(), "alice".into(), "pw123456".into())
            .await
            .unwrap();
        let (_, session_token) = state
            .auth
            .login("a@example.com".into(), "pw123456".into())
            .await
            .unwrap();

        let mut session = ChatSession::connecting(state);
        let user = session
            .authenticate(Some(&session_token.token))
            .await
            .unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(session.phase(), SessionState::Authenticated);
    }
}
