use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

pub type ConnId = u64;
pub type Outbound = UnboundedSender<String>;

/// Group pub/sub capability the updates consumer relies on: add/discard
/// membership plus fan-out to a named group. Injected so tests (and any
/// future broker-backed layer) can swap the implementation.
pub trait GroupLayer: Send + Sync {
    fn register(&self, conn: ConnId, tx: Outbound);
    fn unregister(&self, conn: ConnId);
    fn add(&self, group: &str, conn: ConnId);
    fn discard(&self, group: &str, conn: ConnId);
    /// Relays `text` to every member of `group`, returning how many sends
    /// succeeded. Dead members are pruned rather than reported.
    fn send_to_group(&self, group: &str, text: &str) -> usize;
}

/// Broker-free layer: per-connection unbounded senders keyed by id, group
/// membership as plain sets. A group ceases to exist when its last member
/// leaves.
#[derive(Default)]
pub struct InMemoryGroupLayer {
    conns: Mutex<HashMap<ConnId, Outbound>>,
    groups: Mutex<HashMap<String, HashSet<ConnId>>>,
}

impl InMemoryGroupLayer {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn member_count(&self, group: &str) -> usize {
        self.groups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(group)
            .map_or(0, HashSet::len)
    }
}

impl GroupLayer for InMemoryGroupLayer {
    fn register(&self, conn: ConnId, tx: Outbound) {
        self.conns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(conn, tx);
    }

    fn unregister(&self, conn: ConnId) {
        self.conns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&conn);
    }

    fn add(&self, group: &str, conn: ConnId) {
        self.groups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(group.to_string())
            .or_default()
            .insert(conn);
    }

    fn discard(&self, group: &str, conn: ConnId) {
        let mut groups = self.groups.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(members) = groups.get_mut(group) {
            members.remove(&conn);
            if members.is_empty() {
                groups.remove(group);
            }
        }
    }

    fn send_to_group(&self, group: &str, text: &str) -> usize {
        let members: Vec<ConnId> = {
            let groups = self.groups.lock().unwrap_or_else(PoisonError::into_inner);
            match groups.get(group) {
                Some(members) => members.iter().copied().collect(),
                None => return 0,
            }
        };
        let mut delivered = 0usize;
        let mut dead = Vec::new();
        {
            let conns = self.conns.lock().unwrap_or_else(PoisonError::into_inner);
            for conn in members {
                match conns.get(&conn) {
                    Some(tx) if tx.send(text.to_string()).is_ok() => delivered += 1,
                    _ => dead.push(conn),
                }
            }
        }
        for conn in dead {
            warn!(target: "server::groups", "pruning dead connection {conn} from group {group}");
            self.unregister(conn);
            self.discard(group, conn);
        }
        delivered
    }
}
