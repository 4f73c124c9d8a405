//! End-to-end chat flow tests.
//!
//! Drive the session state machine over an in-memory transport against a
//! real SQLite store, covering backlog delivery, live routing, block
//! enforcement, and the error frames.

use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use server::auth::UserInfo;
use server::build_state;
use server::chat::frames::ServerFrame;
use server::chat::{ChatSession, FrameTransport, SessionState};
use server::config::{AppState, ChatServerConfig};
use server::error::ChatError;

struct TestTransport {
    incoming: mpsc::UnboundedReceiver<String>,
    outgoing: mpsc::UnboundedSender<ServerFrame>,
}

#[async_trait]
impl FrameTransport for TestTransport {
    async fn send_frame(&mut self, frame: &ServerFrame) -> Result<(), ChatError> {
        self.outgoing
            .send(frame.clone())
            .map_err(|_| ChatError::TransportClosed)
    }

    async fn next_frame(&mut self) -> Option<Result<String, ChatError>> {
        self.incoming.recv().await.map(Ok)
    }
}

struct Client {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<ServerFrame>,
    handle: JoinHandle<SessionState>,
}

impl Client {
    fn send_raw(&self, raw: &str) {
        self.tx.send(raw.to_string()).unwrap();
    }

    fn send_chat(&self, message: &str, recipient: &str) {
        self.send_raw(
            &serde_json::json!({ "message": message, "recipient": recipient }).to_string(),
        );
    }

    async fn recv(&mut self) -> ServerFrame {
        timeout(Duration::from_secs(5), self.rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("session closed the transport")
    }

    async fn close(self) -> SessionState {
        let Client { tx, rx, handle } = self;
        drop(tx);
        drop(rx);
        handle.await.unwrap()
    }
}

async fn setup() -> (AppState, TempDir) {
    let dir = TempDir::new().unwrap();
    let config = ChatServerConfig::with_data_dir(dir.path());
    let state = build_state(&config).await.unwrap();
    (state, dir)
}

async fn register(state: &AppState, name: &str) -> (UserInfo, String) {
    let user = state
        .auth
        .signup(
            format!("{}@example.com", name),
            name.to_string(),
            "pw123456".to_string(),
        )
        .await
        .unwrap();
    let (_, session) = state
        .auth
        .login(format!("{}@example.com", name), "pw123456".to_string())
        .await
        .unwrap();
    (UserInfo::from(user), session.token)
}

async fn connect(state: &AppState, token: &str) -> Client {
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();

    let mut session = ChatSession::connecting(state.clone());
    session.authenticate(Some(token)).await.unwrap();

    let transport = TestTransport {
        incoming: in_rx,
        outgoing: out_tx,
    };
    let handle = tokio::spawn(async move { session.run(transport).await });

    Client {
        tx: in_tx,
        rx: out_rx,
        handle,
    }
}

fn message_frame(message: &str, sender: &str, recipient: &str) -> ServerFrame {
    ServerFrame::Message {
        message: message.to_string(),
        sender: sender.to_string(),
        recipient: recipient.to_string(),
    }
}

fn error_frame(message: &str, sender: &str) -> ServerFrame {
    ServerFrame::Error {
        message: message.to_string(),
        sender: sender.to_string(),
    }
}

#[tokio::test]
async fn test_offline_send_lands_in_backlog() {
    let (state, _dir) = setup().await;
    let (_alice, alice_token) = register(&state, "alice").await;
    let (_bob, bob_token) = register(&state, "bob").await;

    let mut alice = connect(&state, &alice_token).await;
    assert_eq!(
        alice.recv().await,
        ServerFrame::Notification { new_messages: vec![] }
    );

    // Bob is offline; alice still gets her echo and no error
    alice.send_chat("hi", "bob");
    assert_eq!(alice.recv().await, message_frame("hi", "alice", "bob"));
    assert_eq!(alice.close().await, SessionState::Closed);

    // Bob discovers the message in his backlog on next connect
    let mut bob = connect(&state, &bob_token).await;
    match bob.recv().await {
        ServerFrame::Notification { new_messages } => {
            assert_eq!(new_messages.len(), 1);
            assert_eq!(new_messages[0].text, "hi");
            assert_eq!(new_messages[0].sender, "alice");
            assert_eq!(new_messages[0].recipient, "bob");
            assert!(!new_messages[0].seen);
        }
        other => panic!("expected notification, got {:?}", other),
    }
    bob.close().await;
}

#[tokio::test]
async fn test_live_delivery_when_both_connected() {
    let (state, _dir) = setup().await;
    let (_alice, alice_token) = register(&state, "alice").await;
    let (bob, bob_token) = register(&state, "bob").await;

    let mut alice = connect(&state, &alice_token).await;
    let mut bob_client = connect(&state, &bob_token).await;
    alice.recv().await;
    bob_client.recv().await;

    alice.send_chat("hi, user2", "bob");

    assert_eq!(alice.recv().await, message_frame("hi, user2", "alice", "bob"));
    assert_eq!(
        bob_client.recv().await,
        message_frame("hi, user2", "alice", "bob")
    );

    // Exactly one message persisted, still unseen
    let stored = state.messages.for_user(&bob.id).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert!(!stored[0].seen);

    alice.close().await;
    bob_client.close().await;
}

#[tokio::test]
async fn test_unknown_recipient_yields_error_and_no_persist() {
    let (state, _dir) = setup().await;
    let (alice, alice_token) = register(&state, "alice").await;

    let mut client = connect(&state, &alice_token).await;
    client.recv().await;

    client.send_chat("hello!", "nobody");
    assert_eq!(
        client.recv().await,
        error_frame("No such user found with username nobody.", "alice")
    );

    assert!(state.messages.for_user(&alice.id).await.unwrap().is_empty());
    client.close().await;
}

#[tokio::test]
async fn test_block_is_enforced_both_ways() {
    let (state, _dir) = setup().await;
    let (alice, alice_token) = register(&state, "alice").await;
    let (bob, bob_token) = register(&state, "bob").await;
    let (_carol, carol_token) = register(&state, "carol").await;

    state.blocks.create(&alice.id, &bob.id).await.unwrap();

    let mut alice_client = connect(&state, &alice_token).await;
    alice_client.recv().await;
    alice_client.send_chat("hello!", "bob");
    assert_eq!(
        alice_client.recv().await,
        error_frame("You cannot message this user due to a block.", "alice")
    );

    let mut bob_client = connect(&state, &bob_token).await;
    bob_client.recv().await;
    bob_client.send_chat("hello back", "alice");
    assert_eq!(
        bob_client.recv().await,
        error_frame("You cannot message this user due to a block.", "bob")
    );

    // A third party is unaffected and reaches alice live
    let mut carol_client = connect(&state, &carol_token).await;
    carol_client.recv().await;
    carol_client.send_chat("hi alice", "alice");
    assert_eq!(
        carol_client.recv().await,
        message_frame("hi alice", "carol", "alice")
    );
    assert_eq!(
        alice_client.recv().await,
        message_frame("hi alice", "carol", "alice")
    );

    // Nothing was persisted for the blocked pair
    assert!(state.messages.for_user(&bob.id).await.unwrap().is_empty());

    alice_client.close().await;
    bob_client.close().await;
    carol_client.close().await;
}

#[tokio::test]
async fn test_block_applies_to_next_send() {
    let (state, _dir) = setup().await;
    let (alice, alice_token) = register(&state, "alice").await;
    let (bob, bob_token) = register(&state, "bob").await;

    let mut alice_client = connect(&state, &alice_token).await;
    let mut bob_client = connect(&state, &bob_token).await;
    alice_client.recv().await;
    bob_client.recv().await;

    alice_client.send_chat("first", "bob");
    assert_eq!(alice_client.recv().await, message_frame("first", "alice", "bob"));
    assert_eq!(bob_client.recv().await, message_frame("first", "alice", "bob"));

    // Block created mid-session takes effect on the very next send
    state.blocks.create(&bob.id, &alice.id).await.unwrap();

    alice_client.send_chat("second", "bob");
    assert_eq!(
        alice_client.recv().await,
        error_frame("You cannot message this user due to a block.", "alice")
    );

    alice_client.close().await;
    bob_client.close().await;
}

#[tokio::test]
async fn test_backlog_counts_only_own_unseen() {
    let (state, _dir) = setup().await;
    let (alice, alice_token) = register(&state, "alice").await;
    let (bob, _) = register(&state, "bob").await;
    let (carol, _) = register(&state, "carol").await;

    state
        .messages
        .create("hello bob, i'm alice", &alice.id, &bob.id)
        .await
        .unwrap();
    state
        .messages
        .create("hello, alice", &bob.id, &alice.id)
        .await
        .unwrap();
    state
        .messages
        .create("hi", &carol.id, &alice.id)
        .await
        .unwrap();

    let mut client = connect(&state, &alice_token).await;
    match client.recv().await {
        ServerFrame::Notification { new_messages } => {
            assert_eq!(new_messages.len(), 2);
            for record in &new_messages {
                assert_eq!(record.recipient, "alice");
            }
        }
        other => panic!("expected notification, got {:?}", other),
    }
    client.close().await;
}

#[tokio::test]
async fn test_marked_seen_leaves_backlog() {
    let (state, _dir) = setup().await;
    let (alice, _) = register(&state, "alice").await;
    let (bob, bob_token) = register(&state, "bob").await;

    let first = state
        .messages
        .create("first", &alice.id, &bob.id)
        .await
        .unwrap();
    state
        .messages
        .create("second", &alice.id, &bob.id)
        .await
        .unwrap();

    state.messages.mark_seen(&[first]).await.unwrap();

    let mut client = connect(&state, &bob_token).await;
    match client.recv().await {
        ServerFrame::Notification { new_messages } => {
            assert_eq!(new_messages.len(), 1);
            assert_eq!(new_messages[0].text, "second");
        }
        other => panic!("expected notification, got {:?}", other),
    }
    client.close().await;
}

#[tokio::test]
async fn test_malformed_frame_is_fatal_to_frame_only() {
    let (state, _dir) = setup().await;
    let (_alice, alice_token) = register(&state, "alice").await;
    let (_bob, _) = register(&state, "bob").await;

    let mut client = connect(&state, &alice_token).await;
    client.recv().await;

    client.send_raw("this is not json");
    assert_eq!(
        client.recv().await,
        error_frame("Malformed chat frame.", "alice")
    );

    // The session is still alive and processes the next frame normally
    client.send_chat("still here", "bob");
    assert_eq!(
        client.recv().await,
        message_frame("still here", "alice", "bob")
    );
    client.close().await;
}

#[tokio::test]
async fn test_self_message_is_permitted() {
    let (state, _dir) = setup().await;
    let (alice, alice_token) = register(&state, "alice").await;

    let mut client = connect(&state, &alice_token).await;
    client.recv().await;

    client.send_chat("note to self", "alice");

    // Both the routed copy and the echo arrive, in either order
    let expected = message_frame("note to self", "alice", "alice");
    assert_eq!(client.recv().await, expected);
    assert_eq!(client.recv().await, expected);

    let stored = state.messages.for_user(&alice.id).await.unwrap();
    assert_eq!(stored.len(), 1);
    client.close().await;
}
