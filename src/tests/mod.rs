//! Cross-module scenario tests exercising a `Node` end to end over real
//! loopback sockets.

use std::time::Duration;

use crate::codec::Empty;
use crate::config::NodeConfig;
use crate::node::Node;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config(name: &str, group_port: u16) -> NodeConfig {
    init_logging();
    NodeConfig::new(name, "127.0.0.1")
        .group("127.0.0.1")
        .group_port(group_port)
        .group_name(format!("test-group-{group_port}"))
        .heartbeat_interval(50)
        .heartbeat_timeout(300)
        .worker_threads(4)
}

#[test]
fn echo_service_round_trip() {
    let node = Node::init(config("A", 17801)).unwrap();
    node.register_service("Echo", |req: String| format!("echo:{req}"))
        .unwrap();
    node.wait_for_service("Echo", Duration::from_secs(1)).unwrap();
    let response: String = node.request("Echo", &"hello".to_string()).unwrap();
    assert_eq!(response, "echo:hello");
}

#[test]
fn empty_request_service() {
    let node = Node::init(config("A", 17802)).unwrap();
    node.register_service("Ping", |_req: Empty| "pong".to_string())
        .unwrap();
    node.wait_for_service("Ping", Duration::from_secs(1)).unwrap();
    let response: String = node.request("Ping", &Empty).unwrap();
    assert_eq!(response, "pong");
}

#[test]
fn empty_response_service() {
    let node = Node::init(config("A", 17803)).unwrap();
    node.register_service("Sink", |_req: String| Empty).unwrap();
    node.wait_for_service("Sink", Duration::from_secs(1)).unwrap();
    let response: Empty = node.request("Sink", &"x".to_string()).unwrap();
    assert_eq!(response, Empty);
}

#[test]
fn missing_service_returns_error_without_panicking() {
    let node = Node::init(config("A", 17804)).unwrap();
    let result = node.wait_for_service("Absent", Duration::from_millis(200));
    assert!(result.is_err());
}

#[test]
fn local_namespace_pubsub_delivers_message() {
    let node = Node::init(config("A", 17805)).unwrap();
    let received = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let received2 = std::sync::Arc::clone(&received);
    node.register_subscriber::<String, _>("lc.local.T", move |msg| {
        received2.lock().unwrap().push(msg);
    });
    let publisher = node.publisher::<String>("T", true).unwrap();
    std::thread::sleep(Duration::from_millis(200));
    publisher.publish(&"m".to_string()).unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(1);
    loop {
        if !received.lock().unwrap().is_empty() || std::time::Instant::now() > deadline {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(received.lock().unwrap().as_slice(), ["m".to_string()]);
}

#[test]
fn peer_discovery_sees_and_forgets_remote_endpoints() {
    let node_a = Node::init(config("A", 17806)).unwrap();
    node_a
        .register_service("WhoAmI", |_req: Empty| "A".to_string())
        .unwrap();

    let node_b = Node::init(config("B", 17806)).unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(3);
    loop {
        if node_b.wait_for_service("WhoAmI", Duration::from_millis(50)).is_ok() {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "peer discovery timed out");
    }
    let response: String = node_b.request("WhoAmI", &Empty).unwrap();
    assert_eq!(response, "A");

    drop(node_a);

    let deadline = std::time::Instant::now() + Duration::from_secs(3);
    loop {
        if node_b.wait_for_service("WhoAmI", Duration::from_millis(50)).is_err() {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "peer removal timed out");
    }
}
