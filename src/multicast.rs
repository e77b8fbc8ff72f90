use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use crate::config::NodeConfig;
use crate::error::Result;
use crate::heartbeat::{HeartbeatMessage, ZLC_VERSION};
use crate::node_info_store::NodeInfoStore;
use crate::periodic_task::PeriodicTask;
use crate::worker_pool::WorkerPool;

fn bind_send_socket(local_ip: Ipv4Addr, ttl: u32) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.bind(&SocketAddr::from(SocketAddrV4::new(local_ip, 0)).into())?;
    socket.set_multicast_if_v4(&local_ip)?;
    socket.set_multicast_ttl_v4(ttl)?;
    Ok(socket.into())
}

fn bind_recv_socket(group_ip: Ipv4Addr, local_ip: Ipv4Addr, port: u16) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.bind(&SocketAddr::from(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)).into())?;
    socket.join_multicast_v4(&group_ip, &local_ip)?;
    Ok(socket.into())
}

/// Periodically serializes the local heartbeat and sends it to the
/// multicast group.
pub struct MulticastSender {
    socket: Arc<UdpSocket>,
    group_addr: SocketAddrV4,
    task: PeriodicTask,
}

impl MulticastSender {
    pub fn new(config: &NodeConfig) -> Result<Self> {
        let local_ip: Ipv4Addr = config.ip.parse().map_err(|_| {
            crate::error::Error::Bind(format!("invalid local ip {}", config.ip))
        })?;
        let group_ip: Ipv4Addr = config.group_ip.parse().map_err(|_| {
            crate::error::Error::Bind(format!("invalid group ip {}", config.group_ip))
        })?;
        let socket = bind_send_socket(local_ip, config.multicast_ttl)?;
        Ok(MulticastSender {
            socket: Arc::new(socket),
            group_addr: SocketAddrV4::new(group_ip, config.group_port),
            task: PeriodicTask::new(),
        })
    }

    pub fn start(&self, pool: &WorkerPool, store: Arc<NodeInfoStore>, service_port: u16, group_name: String, interval: Duration) {
        let socket = Arc::clone(&self.socket);
        let group_addr = self.group_addr;
        self.task.start(pool, interval, move || {
            let hb = store.local_heartbeat(service_port, group_name.clone());
            match hb.encode() {
                Ok(bytes) => {
                    if let Err(err) = socket.send_to(&bytes, group_addr) {
                        tracing::warn!(error = %err, "multicast heartbeat send failed");
                    }
                }
                Err(err) => tracing::warn!(error = %err, "failed to encode local heartbeat"),
            }
        });
    }

    pub fn stop(&self) {
        self.task.stop();
    }
}

/// Periodically reads the multicast socket and feeds decoded
/// heartbeats into the node-info store.
pub struct MulticastReceiver {
    socket: Arc<UdpSocket>,
    local_ip: Ipv4Addr,
    task: PeriodicTask,
}

impl MulticastReceiver {
    pub fn new(config: &NodeConfig) -> Result<Self> {
        let local_ip: Ipv4Addr = config.ip.parse().map_err(|_| {
            crate::error::Error::Bind(format!("invalid local ip {}", config.ip))
        })?;
        let group_ip: Ipv4Addr = config.group_ip.parse().map_err(|_| {
            crate::error::Error::Bind(format!("invalid group ip {}", config.group_ip))
        })?;
        let socket = bind_recv_socket(group_ip, local_ip, config.group_port)?;
        socket.set_read_timeout(Some(Duration::from_millis(20)))?;
        Ok(MulticastReceiver {
            socket: Arc::new(socket),
            local_ip,
            task: PeriodicTask::new(),
        })
    }

    pub fn start(&self, pool: &WorkerPool, store: Arc<NodeInfoStore>, group_name: String, interval: Duration) {
        let socket = Arc::clone(&self.socket);
        let local_ip = self.local_ip;
        self.task.start(pool, interval, move || {
            let mut buf = [0u8; 2048];
            match socket.recv_from(&mut buf) {
                Ok((len, from)) => {
                    let from_ip = match from.ip() {
                        std::net::IpAddr::V4(ip) => ip,
                        _ => return,
                    };
                    match HeartbeatMessage::decode(&buf[..len]) {
                        Ok(hb) => {
                            if hb.group_name != group_name {
                                return;
                            }
                            if hb.zlc_version.0 != ZLC_VERSION.0 || hb.zlc_version.1 != ZLC_VERSION.1 {
                                tracing::warn!(
                                    node_id = %hb.node_id,
                                    version = ?hb.zlc_version,
                                    "discarding heartbeat with incompatible version"
                                );
                                return;
                            }
                            if from_ip == local_ip && hb.node_id == store.local_node_id() {
                                return;
                            }
                            store.process_heartbeat(&hb, &from_ip.to_string());
                            store.check_heartbeats();
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "discarding malformed heartbeat");
                        }
                    }
                }
                Err(err)
                    if err.kind() == std::io::ErrorKind::WouldBlock
                        || err.kind() == std::io::ErrorKind::TimedOut => {}
                Err(err) => {
                    tracing::warn!(error = %err, "multicast recv failed");
                }
            }
        });
    }

    pub fn stop(&self) {
        self.task.stop();
    }
}
