use std::marker::PhantomData;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use crate::codec::Encode;
use crate::error::Result;
use crate::node_info_store::NodeInfoStore;
use crate::wire::write_frame;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const SUBSCRIBER_WRITE_TIMEOUT: Duration = Duration::from_millis(200);

/// A typed topic publisher. Binds its own listening socket, registers
/// `(topic, port)` with the node-info store so peers can discover it,
/// and accepts subscriber connections in the background.
///
/// The accept loop runs on a dedicated thread rather than the shared
/// worker pool: every periodic duty the pool hosts (service accept,
/// multicast send/recv, subscriber poll) occupies a worker for its
/// entire lifetime, so a per-publisher duty enqueued there would
/// compete with those for a fixed number of workers and could starve
/// outright once publishers outnumber the pool's slack.
pub struct Publisher<T> {
    full_topic_name: String,
    connections: Arc<Mutex<Vec<TcpStream>>>,
    running: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
    _marker: PhantomData<T>,
}

impl<T: Encode> Publisher<T> {
    pub fn new(
        name: &str,
        local_ip: &str,
        with_local_namespace: bool,
        store: &NodeInfoStore,
    ) -> Result<Self> {
        let full_topic_name = if with_local_namespace {
            format!("lc.local.{name}")
        } else {
            name.to_string()
        };
        let listener = TcpListener::bind((local_ip, 0))?;
        listener.set_nonblocking(true)?;
        let port = listener.local_addr()?.port();
        store.register_local_topic(&full_topic_name, local_ip, port);

        let connections = Arc::new(Mutex::new(Vec::new()));
        let running = Arc::new(AtomicBool::new(true));
        let accept_thread = {
            let connections = Arc::clone(&connections);
            let running = Arc::clone(&running);
            std::thread::Builder::new()
                .name(format!("zlc-publisher-{full_topic_name}"))
                .spawn(move || {
                    while running.load(Ordering::SeqCst) {
                        match listener.accept() {
                            Ok((stream, _addr)) => {
                                let _ = stream.set_write_timeout(Some(SUBSCRIBER_WRITE_TIMEOUT));
                                connections.lock().push(stream);
                            }
                            Err(err)
                                if err.kind() == std::io::ErrorKind::WouldBlock
                                    || err.kind() == std::io::ErrorKind::TimedOut => {}
                            Err(err) => tracing::warn!(error = %err, "publisher accept failed"),
                        }
                        std::thread::sleep(ACCEPT_POLL_INTERVAL);
                    }
                })
                .expect("failed to spawn publisher accept thread")
        };

        Ok(Publisher {
            full_topic_name,
            connections,
            running,
            accept_thread: Some(accept_thread),
            _marker: PhantomData,
        })
    }

    pub fn topic_name(&self) -> &str {
        &self.full_topic_name
    }

    /// Encode and fan out `msg` to every currently connected
    /// subscriber. Subscribers that have disconnected are dropped
    /// silently; publishing with zero subscribers is not an error.
    pub fn publish(&self, msg: &T) -> Result<()> {
        let bytes = msg.encode()?;
        let mut connections = self.connections.lock();
        connections.retain_mut(|stream| match write_frame(stream, &bytes) {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(error = %err, "dropping subscriber connection after write failure");
                false
            }
        });
        Ok(())
    }

    pub fn subscriber_count(&self) -> usize {
        self.connections.lock().len()
    }
}

impl<T> Drop for Publisher<T> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
        self.connections.lock().clear();
    }
}
