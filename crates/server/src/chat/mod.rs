//! Realtime chat delivery
//!
//! Per-connection protocol sessions, the wire frame set, and the backlog
//! snapshot sent on connect.

pub mod backlog;
pub mod frames;
pub mod session;

pub use session::{ws_chat, ChatSession, FrameTransport, SessionState, CLOSE_POLICY_VIOLATION};
