use std::collections::HashMap;
use std::io::Read;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::codec::Decode;
use crate::node_info::{NodeInfo, SocketInfo};
use crate::node_info_store::NodeInfoStore;
use crate::periodic_task::PeriodicTask;
use crate::worker_pool::WorkerPool;

const POLL_BUDGET: Duration = Duration::from_millis(10);

enum FrameReadState {
    Len { buf: [u8; 4], filled: usize },
    Payload { len: u32, buf: Vec<u8>, filled: usize },
}

impl FrameReadState {
    fn new() -> Self {
        FrameReadState::Len {
            buf: [0u8; 4],
            filled: 0,
        }
    }
}

struct Connection {
    stream: TcpStream,
    state: FrameReadState,
}

/// Advance a single non-blocking read on `conn`. Returns a completed
/// payload when a full frame has arrived, `None` otherwise. An error
/// means the connection is dead and should be dropped.
fn poll_connection(conn: &mut Connection) -> std::io::Result<Option<Vec<u8>>> {
    loop {
        match &mut conn.state {
            FrameReadState::Len { buf, filled } => {
                match conn.stream.read(&mut buf[*filled..]) {
                    Ok(0) => {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "subscriber connection closed",
                        ))
                    }
                    Ok(n) => {
                        *filled += n;
                        if *filled == 4 {
                            let len = u32::from_be_bytes(*buf);
                            conn.state = FrameReadState::Payload {
                                len,
                                buf: vec![0u8; len as usize],
                                filled: 0,
                            };
                        } else {
                            return Ok(None);
                        }
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => return Ok(None),
                    Err(err) => return Err(err),
                }
            }
            FrameReadState::Payload { len, buf, filled } => {
                if *len == 0 {
                    let done = std::mem::take(buf);
                    conn.state = FrameReadState::new();
                    return Ok(Some(done));
                }
                match conn.stream.read(&mut buf[*filled..]) {
                    Ok(0) => {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "subscriber connection closed",
                        ))
                    }
                    Ok(n) => {
                        *filled += n;
                        if *filled == *len as usize {
                            let done = std::mem::take(buf);
                            conn.state = FrameReadState::new();
                            return Ok(Some(done));
                        }
                        return Ok(None);
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => return Ok(None),
                    Err(err) => return Err(err),
                }
            }
        }
    }
}

struct Subscription {
    callback: Arc<dyn Fn(&[u8]) + Send + Sync>,
    connected: HashMap<SocketInfo, Connection>,
}

/// Maintains one receive connection per discovered publisher for every
/// topic the process has subscribed to, rewiring as peers appear and
/// vanish, and dispatching decoded messages to user callbacks.
pub struct SubscriberManager {
    subscriptions: Mutex<HashMap<String, Subscription>>,
    task: PeriodicTask,
}

impl SubscriberManager {
    pub fn new() -> Self {
        SubscriberManager {
            subscriptions: Mutex::new(HashMap::new()),
            task: PeriodicTask::new(),
        }
    }

    /// Subscribe to `topic_name`, connecting immediately to every
    /// publisher endpoint the store currently knows about.
    pub fn register_topic_subscriber<T, F>(&self, topic_name: &str, store: &NodeInfoStore, callback: F)
    where
        T: Decode,
        F: Fn(T) + Send + Sync + 'static,
    {
        let callback: Arc<dyn Fn(&[u8]) + Send + Sync> = Arc::new(move |bytes: &[u8]| match T::decode(bytes) {
            Ok(value) => callback(value),
            Err(err) => tracing::warn!(error = %err, "failed to decode subscriber message"),
        });
        let mut connected = HashMap::new();
        for endpoint in store.publisher_info(topic_name) {
            if let Some(conn) = connect(&endpoint) {
                connected.insert(endpoint, conn);
            }
        }
        self.subscriptions.lock().insert(
            topic_name.to_string(),
            Subscription {
                callback,
                connected,
            },
        );
    }

    pub fn on_node_update(&self, info: &NodeInfo) {
        let mut subscriptions = self.subscriptions.lock();
        for topic in &info.topics {
            if let Some(subscription) = subscriptions.get_mut(&topic.name) {
                if !subscription.connected.contains_key(topic) {
                    if let Some(conn) = connect(topic) {
                        subscription.connected.insert(topic.clone(), conn);
                    }
                }
            }
        }
    }

    pub fn on_node_remove(&self, info: &NodeInfo) {
        let mut subscriptions = self.subscriptions.lock();
        for topic in &info.topics {
            if let Some(subscription) = subscriptions.get_mut(&topic.name) {
                subscription.connected.remove(topic);
            }
        }
    }

    /// Start the polling loop. Takes `Arc<Self>` because the loop body
    /// runs on the worker pool for the lifetime of the task.
    pub fn start(self: &Arc<Self>, pool: &WorkerPool, interval: Duration) {
        let this = Arc::clone(self);
        self.task.start(pool, interval, move || this.poll_once());
    }

    /// One bounded polling pass: drains whatever is ready on every
    /// connected socket for up to 10ms, dispatching complete messages.
    ///
    /// Connections are pulled out of `subscriptions` before polling and
    /// put back afterward, so the lock is never held across a recv or a
    /// callback invocation. This leaves a brief window where a
    /// connection that's mid-poll is invisible to `on_node_update` /
    /// `on_node_remove`; at worst that delays a reconnect or a removal
    /// by one poll pass, which is harmless since the next pass sees the
    /// connection again.
    pub fn poll_once(&self) {
        let deadline = Instant::now() + POLL_BUDGET;

        let mut taken: Vec<(String, SocketInfo, Connection, Arc<dyn Fn(&[u8]) + Send + Sync>)> =
            Vec::new();
        {
            let mut subscriptions = self.subscriptions.lock();
            for (topic, subscription) in subscriptions.iter_mut() {
                let callback = Arc::clone(&subscription.callback);
                for (endpoint, conn) in subscription.connected.drain() {
                    taken.push((topic.clone(), endpoint, conn, Arc::clone(&callback)));
                }
            }
        }

        let mut to_reinsert: Vec<(String, SocketInfo, Connection)> = Vec::new();
        for (topic, endpoint, mut conn, callback) in taken {
            if Instant::now() >= deadline {
                to_reinsert.push((topic, endpoint, conn));
                continue;
            }
            match poll_connection(&mut conn) {
                Ok(Some(payload)) => {
                    callback(&payload);
                    to_reinsert.push((topic, endpoint, conn));
                }
                Ok(None) => to_reinsert.push((topic, endpoint, conn)),
                Err(_) => {}
            }
        }

        let mut subscriptions = self.subscriptions.lock();
        for (topic, endpoint, conn) in to_reinsert {
            if let Some(subscription) = subscriptions.get_mut(&topic) {
                subscription.connected.insert(endpoint, conn);
            }
        }
    }

    pub fn stop(&self) {
        self.task.stop();
    }

    pub fn connected_count(&self, topic_name: &str) -> usize {
        self.subscriptions
            .lock()
            .get(topic_name)
            .map(|s| s.connected.len())
            .unwrap_or(0)
    }
}

impl Default for SubscriberManager {
    fn default() -> Self {
        Self::new()
    }
}

fn connect(endpoint: &SocketInfo) -> Option<Connection> {
    let stream = TcpStream::connect((endpoint.ip.as_str(), endpoint.port)).ok()?;
    if let Err(err) = stream.set_nonblocking(true) {
        tracing::warn!(error = %err, "failed to set subscriber socket non-blocking");
        return None;
    }
    Some(Connection {
        stream,
        state: FrameReadState::new(),
    })
}
