use std::collections::HashMap;
use std::net::{TcpListener, TcpStream};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::codec::{Decode, Encode};
use crate::error::Result;
use crate::node_info_store::NodeInfoStore;
use crate::periodic_task::PeriodicTask;
use crate::wire::{read_frame, write_frame};
use crate::worker_pool::WorkerPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Success,
    NoService,
    InvalidResponse,
    ServiceFail,
    ServiceTimeout,
    InvalidRequest,
    UnknownError,
}

impl StatusCode {
    fn as_bytes(self) -> &'static [u8] {
        match self {
            StatusCode::Success => b"SUCCESS",
            StatusCode::NoService => b"NOSERVICE",
            StatusCode::InvalidResponse => b"INVALID_RESPONSE",
            StatusCode::ServiceFail => b"SERVICE_FAIL",
            StatusCode::ServiceTimeout => b"SERVICE_TIMEOUT",
            StatusCode::InvalidRequest => b"INVALID_REQUEST",
            StatusCode::UnknownError => b"UNKNOWN_ERROR",
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> StatusCode {
        match bytes {
            b"SUCCESS" => StatusCode::Success,
            b"NOSERVICE" => StatusCode::NoService,
            b"INVALID_RESPONSE" => StatusCode::InvalidResponse,
            b"SERVICE_FAIL" => StatusCode::ServiceFail,
            b"SERVICE_TIMEOUT" => StatusCode::ServiceTimeout,
            b"INVALID_REQUEST" => StatusCode::InvalidRequest,
            _ => StatusCode::UnknownError,
        }
    }
}

enum HandlerOutcome {
    Success(Vec<u8>),
    InvalidRequest,
    InvalidResponse,
    ServiceFail,
}

type Handler = Arc<dyn Fn(&[u8]) -> HandlerOutcome + Send + Sync>;

/// Owns the reply socket, dispatching two-frame `(service_name,
/// payload)` requests to registered typed handlers and replying with
/// `(status, payload)`. Auto-registers the built-in `get_node_info`
/// service.
pub struct ServiceManager {
    listener: Arc<TcpListener>,
    port: u16,
    handlers: Arc<Mutex<HashMap<String, Handler>>>,
    task: PeriodicTask,
}

impl ServiceManager {
    pub fn new(local_ip: &str, store: Arc<NodeInfoStore>) -> Result<Self> {
        let listener = TcpListener::bind((local_ip, 0))?;
        listener.set_nonblocking(true)?;
        let port = listener.local_addr()?.port();
        let handlers: Arc<Mutex<HashMap<String, Handler>>> = Arc::new(Mutex::new(HashMap::new()));
        let manager = ServiceManager {
            listener: Arc::new(listener),
            port,
            handlers,
            task: PeriodicTask::new(),
        };
        manager.register_handler("get_node_info", move |_req: crate::codec::Empty| {
            store.local_info()
        });
        Ok(manager)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Register a typed handler for `name`, replacing any handler
    /// previously registered under it. Duplicate-name rejection lives
    /// at the node-info-store level (`register_local_service`), which
    /// callers are expected to check before calling this.
    pub fn register_handler<Req, Resp, F>(&self, name: &str, handler: F)
    where
        Req: Decode,
        Resp: Encode,
        F: Fn(Req) -> Resp + Send + Sync + 'static,
    {
        let wrapped: Handler = Arc::new(move |bytes: &[u8]| match Req::decode(bytes) {
            Ok(req) => match panic::catch_unwind(AssertUnwindSafe(|| handler(req))) {
                Ok(resp) => match resp.encode() {
                    Ok(bytes) => HandlerOutcome::Success(bytes),
                    Err(_) => HandlerOutcome::InvalidResponse,
                },
                Err(_) => HandlerOutcome::ServiceFail,
            },
            Err(_) => HandlerOutcome::InvalidRequest,
        });
        self.handlers.lock().insert(name.to_string(), wrapped);
    }

    pub fn remove_handler(&self, name: &str) {
        self.handlers.lock().remove(name);
    }

    pub fn clear_handlers(&self) {
        self.handlers.lock().clear();
    }

    pub fn start(&self, pool: &WorkerPool, recv_timeout: Duration) {
        let listener = Arc::clone(&self.listener);
        let handlers = Arc::clone(&self.handlers);
        self.task.start(pool, recv_timeout, move || {
            match listener.accept() {
                Ok((stream, _addr)) => handle_connection(stream, &handlers, recv_timeout),
                Err(err)
                    if err.kind() == std::io::ErrorKind::WouldBlock
                        || err.kind() == std::io::ErrorKind::TimedOut => {}
                Err(err) => tracing::warn!(error = %err, "service accept failed"),
            }
        });
    }

    pub fn stop(&self) {
        self.task.stop();
    }
}

fn handle_connection(mut stream: TcpStream, handlers: &Mutex<HashMap<String, Handler>>, timeout: Duration) {
    if let Err(err) = stream.set_read_timeout(Some(timeout)) {
        tracing::warn!(error = %err, "failed to set read timeout on service connection");
        return;
    }
    let name = match read_frame(&mut stream) {
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(name) => name,
            Err(_) => {
                tracing::warn!("service request name frame was not valid utf8");
                return;
            }
        },
        Err(err) => {
            tracing::warn!(error = %err, "failed to read service name frame");
            return;
        }
    };
    let payload = match read_frame(&mut stream) {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!(error = %err, "failed to read service payload frame");
            return;
        }
    };
    let handler = handlers.lock().get(&name).cloned();
    let (code, reply_payload) = match handler {
        None => (StatusCode::NoService, Vec::new()),
        Some(handler) => match handler(&payload) {
            HandlerOutcome::Success(bytes) => (StatusCode::Success, bytes),
            HandlerOutcome::InvalidRequest => (StatusCode::InvalidRequest, Vec::new()),
            HandlerOutcome::InvalidResponse => (StatusCode::InvalidResponse, Vec::new()),
            HandlerOutcome::ServiceFail => (StatusCode::ServiceFail, Vec::new()),
        },
    };
    if let Err(err) = write_frame(&mut stream, code.as_bytes()) {
        tracing::warn!(error = %err, "failed to write service status frame");
        return;
    }
    if let Err(err) = write_frame(&mut stream, &reply_payload) {
        tracing::warn!(error = %err, "failed to write service payload frame");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Empty;
    use crate::node_info::NodeInfo;
    use std::net::TcpStream;

    fn test_store() -> Arc<NodeInfoStore> {
        let local = NodeInfo::new("svc-test-node-0000000000000000".into(), "n".into(), "127.0.0.1".into());
        Arc::new(NodeInfoStore::new(
            local,
            Duration::from_secs(2),
            Arc::new(|_, _| unreachable!()),
        ))
    }

    #[test]
    fn dispatches_registered_handler_and_replies_success() {
        let store = test_store();
        let manager = ServiceManager::new("127.0.0.1", Arc::clone(&store)).unwrap();
        manager.register_handler("Echo", |req: String| format!("echo:{req}"));
        let pool = WorkerPool::new(2);
        manager.start(&pool, Duration::from_millis(50));

        let mut stream = TcpStream::connect(("127.0.0.1", manager.port())).unwrap();
        write_frame(&mut stream, b"Echo").unwrap();
        write_frame(&mut stream, &"hi".encode().unwrap()).unwrap();
        let status = read_frame(&mut stream).unwrap();
        assert_eq!(status, StatusCode::Success.as_bytes());
        let payload = read_frame(&mut stream).unwrap();
        let resp: String = Decode::decode(&payload).unwrap();
        assert_eq!(resp, "echo:hi");

        manager.stop();
        pool.stop();
    }

    #[test]
    fn unknown_service_returns_noservice() {
        let store = test_store();
        let manager = ServiceManager::new("127.0.0.1", Arc::clone(&store)).unwrap();
        let pool = WorkerPool::new(2);
        manager.start(&pool, Duration::from_millis(50));

        let mut stream = TcpStream::connect(("127.0.0.1", manager.port())).unwrap();
        write_frame(&mut stream, b"Nope").unwrap();
        write_frame(&mut stream, &Empty.encode().unwrap()).unwrap();
        let status = read_frame(&mut stream).unwrap();
        assert_eq!(status, StatusCode::NoService.as_bytes());

        manager.stop();
        pool.stop();
    }

    #[test]
    fn panicking_handler_returns_service_fail() {
        let store = test_store();
        let manager = ServiceManager::new("127.0.0.1", Arc::clone(&store)).unwrap();
        manager.register_handler("Boom", |_req: Empty| -> Empty { panic!("boom") });
        let pool = WorkerPool::new(2);
        manager.start(&pool, Duration::from_millis(50));

        let mut stream = TcpStream::connect(("127.0.0.1", manager.port())).unwrap();
        write_frame(&mut stream, b"Boom").unwrap();
        write_frame(&mut stream, &Empty.encode().unwrap()).unwrap();
        let status = read_frame(&mut stream).unwrap();
        assert_eq!(status, StatusCode::ServiceFail.as_bytes());

        manager.stop();
        pool.stop();
    }
}
