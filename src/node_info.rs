use serde::{Deserialize, Serialize};

/// A single advertised endpoint — a topic publisher or a service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SocketInfo {
    pub name: String,
    pub ip: String,
    pub port: u16,
}

/// Everything a node publishes about itself: identity plus the topics
/// and services it currently hosts. `info_id` increases by one on every
/// local registration so peers can tell a heartbeat's announcement is
/// stale without re-fetching it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: String,
    pub info_id: u32,
    pub name: String,
    pub ip: String,
    pub topics: Vec<SocketInfo>,
    pub services: Vec<SocketInfo>,
}

impl NodeInfo {
    pub fn new(node_id: String, name: String, ip: String) -> Self {
        NodeInfo {
            node_id,
            info_id: 0,
            name,
            ip,
            topics: Vec::new(),
            services: Vec::new(),
        }
    }
}
