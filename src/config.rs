use std::time::Duration;

pub const DEFAULT_GROUP_IP: &str = "224.0.0.1";
pub const DEFAULT_GROUP_PORT: u16 = 7720;
pub const DEFAULT_GROUP_NAME: &str = "zlc_default_group_name";

/// Construction-time configuration for a [`crate::node::Node`].
///
/// Mirrors the `init()` options of the original fabric: node identity,
/// multicast group coordinates, and the tunable intervals that drive
/// discovery and messaging.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub node_name: String,
    pub ip: String,
    pub group_ip: String,
    pub group_port: u16,
    pub group_name: String,
    pub multicast_ttl: u32,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub multicast_poll_interval: Duration,
    pub subscriber_poll_interval: Duration,
    pub service_recv_timeout: Duration,
    pub worker_threads: usize,
}

impl NodeConfig {
    pub fn new(node_name: impl Into<String>, ip: impl Into<String>) -> Self {
        NodeConfig {
            node_name: node_name.into(),
            ip: ip.into(),
            group_ip: DEFAULT_GROUP_IP.to_string(),
            group_port: DEFAULT_GROUP_PORT,
            group_name: DEFAULT_GROUP_NAME.to_string(),
            multicast_ttl: 1,
            heartbeat_interval: Duration::from_millis(1000),
            heartbeat_timeout: Duration::from_millis(2000),
            multicast_poll_interval: Duration::from_millis(100),
            subscriber_poll_interval: Duration::from_millis(100),
            service_recv_timeout: Duration::from_millis(100),
            worker_threads: default_worker_threads(),
        }
    }

    pub fn group(mut self, ip: impl Into<String>) -> Self {
        self.group_ip = ip.into();
        self
    }

    pub fn group_port(mut self, port: u16) -> Self {
        self.group_port = port;
        self
    }

    pub fn group_name(mut self, name: impl Into<String>) -> Self {
        self.group_name = name.into();
        self
    }

    pub fn multicast_ttl(mut self, ttl: u32) -> Self {
        self.multicast_ttl = ttl;
        self
    }

    pub fn heartbeat_interval(mut self, ms: u64) -> Self {
        self.heartbeat_interval = Duration::from_millis(ms);
        self
    }

    pub fn heartbeat_timeout(mut self, ms: u64) -> Self {
        self.heartbeat_timeout = Duration::from_millis(ms);
        self
    }

    pub fn worker_threads(mut self, n: usize) -> Self {
        self.worker_threads = n.max(1);
        self
    }
}

fn default_worker_threads() -> usize {
    num_cpus::get().max(1)
}
