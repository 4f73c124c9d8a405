//! Connection Identity & Group Router
//!
//! Process-wide broadcast fabric mapping per-user group names to broadcast
//! channels. Constructed once at startup and shared by reference across all
//! session tasks; never a global singleton.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use crate::chat::frames::RoutedMessage;

/// Group name every connection of a user subscribes to.
pub fn personal_group(username: &str) -> String {
    format!("personal_{}", username)
}

struct Group {
    tx: broadcast::Sender<RoutedMessage>,
    members: usize,
}

/// Concurrency-safe group membership map with broadcast fan-out.
///
/// The lock guards only map access; it is never held across an await point,
/// so join/leave/send are safe to call from any task and from `Drop`.
pub struct GroupRouter {
    groups: RwLock<HashMap<String, Group>>,
    capacity: usize,
}

impl GroupRouter {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            groups: RwLock::new(HashMap::new()),
            capacity,
        })
    }

    /// Register a connection under a group. The returned membership owns the
    /// subscription; dropping it leaves the group, so cleanup runs on every
    /// termination path.
    pub fn join(self: &Arc<Self>, group: &str) -> GroupMembership {
        let mut groups = self.groups.write();
        let entry = groups.entry(group.to_string()).or_insert_with(|| {
            let (tx, _) = broadcast::channel(self.capacity);
            Group { tx, members: 0 }
        });
        entry.members += 1;
        debug!("[Router] join {} ({} members)", group, entry.members);

        GroupMembership {
            router: Arc::clone(self),
            group: group.to_string(),
            rx: entry.tx.subscribe(),
        }
    }

    /// Deliver a message to every current member of a group, in no
    /// particular order. Messages to empty groups are dropped silently.
    /// Returns the number of live connections reached.
    pub fn send(&self, group: &str, message: RoutedMessage) -> usize {
        let groups = self.groups.read();
        match groups.get(group) {
            Some(entry) => entry.tx.send(message).unwrap_or(0),
            None => 0,
        }
    }

    /// Number of live connections registered under a group.
    pub fn member_count(&self, group: &str) -> usize {
        self.groups.read().get(group).map(|g| g.members).unwrap_or(0)
    }

    /// Drop one registration. Safe to call for a group that was never
    /// joined; empty groups are pruned from the map.
    fn leave(&self, group: &str) {
        let mut groups = self.groups.write();
        if let Some(entry) = groups.get_mut(group) {
            entry.members = entry.members.saturating_sub(1);
            debug!("[Router] leave {} ({} members)", group, entry.members);
            if entry.members == 0 {
                groups.remove(group);
            }
        }
    }
}

/// A live registration of one connection in one group.
pub struct GroupMembership {
    router: Arc<GroupRouter>,
    group: String,
    rx: broadcast::Receiver<RoutedMessage>,
}

impl GroupMembership {
    /// Wait for the next message fanned out to this group.
    pub async fn recv(&mut self) -> Result<RoutedMessage, broadcast::error::RecvError> {
        self.rx.recv().await
    }

    pub fn group(&self) -> &str {
        &self.group
    }
}

impl Drop for GroupMembership {
    fn drop(&mut self) {
        self.router.leave(&self.group);
    }
}
