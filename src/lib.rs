pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod heartbeat;
pub mod multicast;
pub mod node;
pub mod node_info;
pub mod node_info_store;
pub mod periodic_task;
pub mod publisher;
pub mod service;
pub mod subscriber;
pub mod wire;
pub mod worker_pool;

pub use client::Client;
pub use codec::{Decode, Empty, Encode};
pub use config::NodeConfig;
pub use error::{Error, Result};
pub use node::Node;
pub use node_info::{NodeInfo, SocketInfo};
pub use service::StatusCode;

#[cfg(test)]
pub mod tests;
