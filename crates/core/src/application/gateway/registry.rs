// Process-wide registry of live client connections

use crate::domain::{OutboundEvent, OwnerId, RequestId, SocketId};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use tokio::sync::mpsc;

/// Authenticated identity behind a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub owner_id: OwnerId,
    /// May use the priority lane
    pub elevated: bool,
}

impl Principal {
    pub fn user(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            elevated: false,
        }
    }

    pub fn elevated(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            elevated: true,
        }
    }
}

struct Connection {
    principal: Principal,
    tx: mpsc::UnboundedSender<OutboundEvent>,
    jobs: HashSet<RequestId>,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<SocketId, Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        socket_id: &str,
        principal: Principal,
        tx: mpsc::UnboundedSender<OutboundEvent>,
    ) {
        let mut connections = self.connections.write().unwrap_or_else(|e| e.into_inner());
        connections.insert(
            socket_id.to_string(),
            Connection {
                principal,
                tx,
                jobs: HashSet::new(),
            },
        );
    }

    /// Drop the connection, returning who it was and the jobs it tracked
    pub fn unregister(&self, socket_id: &str) -> Option<(Principal, Vec<RequestId>)> {
        let mut connections = self.connections.write().unwrap_or_else(|e| e.into_inner());
        connections
            .remove(socket_id)
            .map(|conn| (conn.principal, conn.jobs.into_iter().collect()))
    }

    /// Push to a local connection; false if it is not here (or already closed)
    pub fn send(&self, socket_id: &str, event: OutboundEvent) -> bool {
        let connections = self.connections.read().unwrap_or_else(|e| e.into_inner());
        match connections.get(socket_id) {
            Some(conn) => conn.tx.send(event).is_ok(),
            None => false,
        }
    }

    pub fn principal(&self, socket_id: &str) -> Option<Principal> {
        let connections = self.connections.read().unwrap_or_else(|e| e.into_inner());
        connections.get(socket_id).map(|conn| conn.principal.clone())
    }

    pub fn track(&self, socket_id: &str, request_id: &str) {
        let mut connections = self.connections.write().unwrap_or_else(|e| e.into_inner());
        if let Some(conn) = connections.get_mut(socket_id) {
            conn.jobs.insert(request_id.to_string());
        }
    }

    pub fn untrack(&self, socket_id: &str, request_id: &str) {
        let mut connections = self.connections.write().unwrap_or_else(|e| e.into_inner());
        if let Some(conn) = connections.get_mut(socket_id) {
            conn.jobs.remove(request_id);
        }
    }

    pub fn is_tracking(&self, socket_id: &str, request_id: &str) -> bool {
        let connections = self.connections.read().unwrap_or_else(|e| e.into_inner());
        connections
            .get(socket_id)
            .is_some_and(|conn| conn.jobs.contains(request_id))
    }

    pub fn len(&self) -> usize {
        self.connections.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_reaches_local_connection_only() {
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register("s1", Principal::user("u1"), tx);

        let event = OutboundEvent::JobCancelled {
            request_id: "r1".into(),
        };
        assert!(registry.send("s1", event.clone()));
        assert!(!registry.send("elsewhere", event.clone()));
        assert_eq!(rx.try_recv().ok(), Some(event));
    }

    #[test]
    fn test_unregister_returns_tracked_jobs() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register("s1", Principal::elevated("admin"), tx);
        registry.track("s1", "r1");
        registry.track("s1", "r2");
        registry.untrack("s1", "r2");

        assert!(registry.is_tracking("s1", "r1"));
        let (principal, jobs) = registry.unregister("s1").unwrap();
        assert!(principal.elevated);
        assert_eq!(jobs, vec!["r1".to_string()]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_send_to_closed_receiver_fails() {
        let registry = ConnectionRegistry::new();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register("s1", Principal::user("u1"), tx);
        drop(rx);
        assert!(!registry.send(
            "s1",
            OutboundEvent::JobCancelled {
                request_id: "r1".into()
            }
        ));
    }
}
