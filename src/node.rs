use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::client::Client;
use crate::codec::{Decode, Encode};
use crate::config::NodeConfig;
use crate::error::Result;
use crate::multicast::{MulticastReceiver, MulticastSender};
use crate::node_info::NodeInfo;
use crate::node_info_store::NodeInfoStore;
use crate::publisher::Publisher;
use crate::service::ServiceManager;
use crate::subscriber::SubscriberManager;
use crate::worker_pool::WorkerPool;

/// Owns every subsystem for one participant in the fabric: the worker
/// pool, the node-info store, the service manager, the multicast
/// sender/receiver pair, and the subscriber manager. There is no
/// process-wide singleton — a process may host more than one `Node`,
/// each with its own identity and sockets.
pub struct Node {
    config: NodeConfig,
    pool: Arc<WorkerPool>,
    store: Arc<NodeInfoStore>,
    service_manager: Arc<ServiceManager>,
    multicast_sender: MulticastSender,
    multicast_receiver: MulticastReceiver,
    subscriber_manager: Arc<SubscriberManager>,
}

impl Node {
    /// Construct and start every subsystem, in dependency order:
    /// worker pool, node-info store, service manager, multicast
    /// receiver, multicast sender, subscriber manager.
    pub fn init(config: NodeConfig) -> Result<Arc<Self>> {
        let pool = Arc::new(WorkerPool::new(config.worker_threads));

        let node_id = Uuid::new_v4().to_string();
        let local_info = NodeInfo::new(node_id, config.node_name.clone(), config.ip.clone());

        let fetch_node_info: crate::node_info_store::FetchNodeInfo =
            Arc::new(|ip, port| fetch_remote_node_info(ip, port));

        let store = Arc::new(NodeInfoStore::new(
            local_info,
            config.heartbeat_timeout,
            fetch_node_info,
        ));

        let service_manager = Arc::new(ServiceManager::new(&config.ip, Arc::clone(&store))?);

        let multicast_receiver = MulticastReceiver::new(&config)?;
        let multicast_sender = MulticastSender::new(&config)?;
        let subscriber_manager = Arc::new(SubscriberManager::new());

        {
            let subscriber_manager = Arc::clone(&subscriber_manager);
            store.node_update_event.subscribe(move |info| {
                subscriber_manager.on_node_update(info);
            });
        }
        {
            let subscriber_manager = Arc::clone(&subscriber_manager);
            store.node_remove_event.subscribe(move |info| {
                subscriber_manager.on_node_remove(info);
            });
        }

        service_manager.start(&pool, config.service_recv_timeout);
        multicast_receiver.start(
            &pool,
            Arc::clone(&store),
            config.group_name.clone(),
            config.multicast_poll_interval,
        );
        multicast_sender.start(
            &pool,
            Arc::clone(&store),
            service_manager.port(),
            config.group_name.clone(),
            config.heartbeat_interval,
        );
        subscriber_manager.start(&pool, config.subscriber_poll_interval);

        Ok(Arc::new(Node {
            config,
            pool,
            store,
            service_manager,
            multicast_sender,
            multicast_receiver,
            subscriber_manager,
        }))
    }

    pub fn node_id(&self) -> String {
        self.store.local_node_id()
    }

    pub fn ip(&self) -> &str {
        &self.config.ip
    }

    /// Create a typed publisher for `name`. `with_local_namespace`
    /// mirrors the original `"lc.local."` topic prefix convention.
    pub fn publisher<T: Encode>(&self, name: &str, with_local_namespace: bool) -> Result<Publisher<T>> {
        Publisher::new(name, &self.config.ip, with_local_namespace, &self.store)
    }

    pub fn register_subscriber<T, F>(&self, topic_name: &str, callback: F)
    where
        T: Decode,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.subscriber_manager
            .register_topic_subscriber(topic_name, &self.store, callback);
    }

    pub fn register_service<Req, Resp, F>(&self, name: &str, handler: F) -> Result<()>
    where
        Req: Decode,
        Resp: Encode,
        F: Fn(Req) -> Resp + Send + Sync + 'static,
    {
        self.store
            .register_local_service(name, &self.config.ip, self.service_manager.port())?;
        self.service_manager.register_handler(name, handler);
        Ok(())
    }

    pub fn wait_for_service(&self, name: &str, max_wait: Duration) -> Result<()> {
        Client::wait_for_service(&self.store, name, max_wait)
    }

    pub fn request<Req, Resp>(&self, name: &str, req: &Req) -> Result<Resp>
    where
        Req: Encode,
        Resp: Decode,
    {
        Client::request(&self.store, name, req)
    }

    /// Stop every subsystem in reverse dependency order and join the
    /// worker pool.
    pub fn shutdown(&self) {
        self.subscriber_manager.stop();
        self.multicast_sender.stop();
        self.multicast_receiver.stop();
        self.service_manager.stop();
        self.pool.stop();
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn fetch_remote_node_info(ip: &str, port: u16) -> Result<NodeInfo> {
    use std::net::TcpStream;
    use std::time::Duration as StdDuration;

    let mut stream = TcpStream::connect((ip, port))?;
    stream.set_read_timeout(Some(StdDuration::from_secs(2)))?;
    stream.set_write_timeout(Some(StdDuration::from_secs(2)))?;
    crate::wire::write_frame(&mut stream, b"get_node_info")?;
    crate::wire::write_frame(&mut stream, &crate::codec::Empty.encode()?)?;
    let status = crate::wire::read_frame(&mut stream)?;
    let payload = crate::wire::read_frame(&mut stream)?;
    if crate::service::StatusCode::from_bytes(&status) != crate::service::StatusCode::Success {
        return Err(crate::error::Error::ServiceNotFound("get_node_info".into()));
    }
    NodeInfo::decode(&payload)
}
