use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use crate::error::Result;
use crate::event::Event;
use crate::node_info::{NodeInfo, SocketInfo};

/// A callback that fetches a peer's full `NodeInfo` given the address
/// its heartbeat was observed from. Injected rather than called
/// directly so the store has no dependency on the RPC transport.
pub type FetchNodeInfo = Arc<dyn Fn(&str, u16) -> Result<NodeInfo> + Send + Sync>;

struct PeerTable {
    infos: HashMap<String, NodeInfo>,
    generations: HashMap<String, u32>,
    last_heartbeat: HashMap<String, Instant>,
}

impl PeerTable {
    fn new() -> Self {
        PeerTable {
            infos: HashMap::new(),
            generations: HashMap::new(),
            last_heartbeat: HashMap::new(),
        }
    }

    fn insert(&mut self, info: NodeInfo, now: Instant) {
        self.generations.insert(info.node_id.clone(), info.info_id);
        self.last_heartbeat.insert(info.node_id.clone(), now);
        self.infos.insert(info.node_id.clone(), info);
    }

    fn remove(&mut self, node_id: &str) -> Option<NodeInfo> {
        self.generations.remove(node_id);
        self.last_heartbeat.remove(node_id);
        self.infos.remove(node_id)
    }
}

/// Concurrent table of discovered peers plus the local node's own
/// advertised state. Peer reads take a shared lock; mutations
/// (including the local node's topic/service registrations) take an
/// exclusive one. Network I/O never happens while a lock is held.
pub struct NodeInfoStore {
    local: Mutex<NodeInfo>,
    peers: RwLock<PeerTable>,
    heartbeat_timeout: Duration,
    fetch_node_info: FetchNodeInfo,
    pub node_update_event: Event<NodeInfo>,
    pub node_remove_event: Event<NodeInfo>,
}

impl NodeInfoStore {
    pub fn new(local: NodeInfo, heartbeat_timeout: Duration, fetch_node_info: FetchNodeInfo) -> Self {
        NodeInfoStore {
            local: Mutex::new(local),
            peers: RwLock::new(PeerTable::new()),
            heartbeat_timeout,
            fetch_node_info,
            node_update_event: Event::new(),
            node_remove_event: Event::new(),
        }
    }

    pub fn local_node_id(&self) -> String {
        self.local.lock().node_id.clone()
    }

    pub fn local_info(&self) -> NodeInfo {
        self.local.lock().clone()
    }

    pub fn local_heartbeat(&self, service_port: u16, group_name: String) -> crate::heartbeat::HeartbeatMessage {
        let local = self.local.lock();
        crate::heartbeat::HeartbeatMessage::new(
            local.node_id.clone(),
            local.info_id,
            service_port,
            group_name,
        )
    }

    /// Register a locally hosted topic endpoint and announce it via
    /// `node_update_event`. The announcement is what lets a subscriber
    /// registered on this same node connect to the new publisher: the
    /// original fabric picks up its own publishers through multicast
    /// loopback (it never self-filters heartbeats), but this store does
    /// self-filter per I5/B1, so local topic registration has to fire
    /// the same event directly instead of waiting on a heartbeat that
    /// will never arrive.
    pub fn register_local_topic(&self, name: &str, ip: &str, port: u16) {
        let info = {
            let mut local = self.local.lock();
            local.topics.push(SocketInfo {
                name: name.to_string(),
                ip: ip.to_string(),
                port,
            });
            local.info_id += 1;
            local.clone()
        };
        self.node_update_event.trigger(&info);
    }

    pub fn register_local_service(&self, name: &str, ip: &str, port: u16) -> Result<()> {
        let mut local = self.local.lock();
        if local.services.iter().any(|s| s.name == name) {
            return Err(crate::error::Error::DuplicateService(name.to_string()));
        }
        local.services.push(SocketInfo {
            name: name.to_string(),
            ip: ip.to_string(),
            port,
        });
        local.info_id += 1;
        Ok(())
    }

    /// Record a heartbeat observation. If the peer is unknown or its
    /// `info_id` has changed, fetches the full `NodeInfo` (without
    /// holding the lock) and, on success, commits it and fires
    /// `node_update_event`.
    pub fn process_heartbeat(&self, heartbeat: &crate::heartbeat::HeartbeatMessage, observed_ip: &str) {
        if heartbeat.node_id == self.local_node_id() {
            return;
        }
        let now = Instant::now();
        let needs_fetch = {
            let mut peers = self.peers.write();
            peers
                .last_heartbeat
                .insert(heartbeat.node_id.clone(), now);
            match peers.generations.get(&heartbeat.node_id) {
                Some(known) if *known == heartbeat.info_id => false,
                _ => true,
            }
        };
        if !needs_fetch {
            return;
        }
        match (self.fetch_node_info)(observed_ip, heartbeat.service_port) {
            Ok(mut info) => {
                info.ip = observed_ip.to_string();
                self.peers.write().insert(info.clone(), now);
                self.node_update_event.trigger(&info);
            }
            Err(err) => {
                tracing::warn!(node_id = %heartbeat.node_id, error = %err, "failed to fetch node info for discovered peer");
            }
        }
    }

    /// Remove peers whose last heartbeat is older than the configured
    /// timeout, firing `node_remove_event` once per removed peer after
    /// the lock is released.
    pub fn check_heartbeats(&self) {
        let now = Instant::now();
        let stale: Vec<String> = {
            let peers = self.peers.read();
            peers
                .last_heartbeat
                .iter()
                .filter(|(_, seen)| now.duration_since(**seen) > self.heartbeat_timeout)
                .map(|(id, _)| id.clone())
                .collect()
        };
        if stale.is_empty() {
            return;
        }
        let removed: Vec<NodeInfo> = {
            let mut peers = self.peers.write();
            stale.into_iter().filter_map(|id| peers.remove(&id)).collect()
        };
        for info in removed {
            tracing::info!(node_id = %info.node_id, "peer timed out");
            self.node_remove_event.trigger(&info);
        }
    }

    pub fn publisher_info(&self, topic_name: &str) -> Vec<SocketInfo> {
        let mut result = Vec::new();
        let local = self.local.lock();
        result.extend(local.topics.iter().filter(|s| s.name == topic_name).cloned());
        drop(local);
        let peers = self.peers.read();
        for info in peers.infos.values() {
            result.extend(info.topics.iter().filter(|s| s.name == topic_name).cloned());
        }
        result
    }

    pub fn service_info(&self, service_name: &str) -> Option<SocketInfo> {
        let local = self.local.lock();
        if let Some(found) = local.services.iter().find(|s| s.name == service_name) {
            return Some(found.clone());
        }
        drop(local);
        let peers = self.peers.read();
        peers
            .infos
            .values()
            .find_map(|info| info.services.iter().find(|s| s.name == service_name).cloned())
    }

    pub fn peer_count(&self) -> usize {
        self.peers.read().infos.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn store_with_fetch(fetch: FetchNodeInfo) -> NodeInfoStore {
        let local = NodeInfo::new("local-node-00000000000000000000".to_string(), "local".into(), "127.0.0.1".into());
        NodeInfoStore::new(local, Duration::from_millis(50), fetch)
    }

    #[test]
    fn register_local_topic_increments_info_id() {
        let store = store_with_fetch(Arc::new(|_, _| unreachable!()));
        assert_eq!(store.local_info().info_id, 0);
        store.register_local_topic("T", "127.0.0.1", 4000);
        assert_eq!(store.local_info().info_id, 1);
    }

    #[test]
    fn duplicate_service_rejected() {
        let store = store_with_fetch(Arc::new(|_, _| unreachable!()));
        store.register_local_service("Echo", "127.0.0.1", 5000).unwrap();
        assert!(store.register_local_service("Echo", "127.0.0.1", 5001).is_err());
    }

    #[test]
    fn new_peer_triggers_fetch_and_update_event() {
        let fetch_calls = Arc::new(AtomicUsize::new(0));
        let fetch_calls2 = Arc::clone(&fetch_calls);
        let store = store_with_fetch(Arc::new(move |ip, _port| {
            fetch_calls2.fetch_add(1, Ordering::SeqCst);
            Ok(NodeInfo::new("peer-node-000000000000000000000".into(), "peer".into(), ip.to_string()))
        }));
        let updates = Arc::new(AtomicUsize::new(0));
        let updates2 = Arc::clone(&updates);
        store.node_update_event.subscribe(move |_| {
            updates2.fetch_add(1, Ordering::SeqCst);
        });
        let hb = crate::heartbeat::HeartbeatMessage::new(
            "peer-node-000000000000000000000".into(),
            0,
            9000,
            "g".into(),
        );
        store.process_heartbeat(&hb, "192.168.1.5");
        assert_eq!(fetch_calls.load(Ordering::SeqCst), 1);
        assert_eq!(updates.load(Ordering::SeqCst), 1);
        assert_eq!(store.peer_count(), 1);
        // Same info_id again: no refetch.
        store.process_heartbeat(&hb, "192.168.1.5");
        assert_eq!(fetch_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stale_peer_is_removed_and_event_fires() {
        let store = store_with_fetch(Arc::new(|ip, _| {
            Ok(NodeInfo::new("peer-node-000000000000000000000".into(), "peer".into(), ip.to_string()))
        }));
        let removed = Arc::new(AtomicUsize::new(0));
        let removed2 = Arc::clone(&removed);
        store.node_remove_event.subscribe(move |_| {
            removed2.fetch_add(1, Ordering::SeqCst);
        });
        let hb = crate::heartbeat::HeartbeatMessage::new(
            "peer-node-000000000000000000000".into(),
            0,
            9000,
            "g".into(),
        );
        store.process_heartbeat(&hb, "192.168.1.5");
        assert_eq!(store.peer_count(), 1);
        std::thread::sleep(Duration::from_millis(80));
        store.check_heartbeats();
        assert_eq!(store.peer_count(), 0);
        assert_eq!(removed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn local_heartbeat_is_ignored() {
        let store = store_with_fetch(Arc::new(|_, _| unreachable!()));
        let hb = crate::heartbeat::HeartbeatMessage::new(
            store.local_node_id(),
            0,
            9000,
            "g".into(),
        );
        store.process_heartbeat(&hb, "127.0.0.1");
        assert_eq!(store.peer_count(), 0);
    }
}
