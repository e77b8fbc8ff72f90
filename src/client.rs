use std::net::TcpStream;
use std::time::{Duration, Instant};

use crate::codec::{Decode, Encode};
use crate::error::{Error, Result};
use crate::node_info_store::NodeInfoStore;
use crate::service::StatusCode;
use crate::wire::{read_frame, write_frame};

const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// Stateless RPC caller. Every call opens a short-lived connection,
/// sends one framed request, reads one framed reply, and closes.
pub struct Client;

impl Client {
    /// Poll the node-info store until `service_name` is known or
    /// `max_wait` elapses.
    pub fn wait_for_service(store: &NodeInfoStore, service_name: &str, max_wait: Duration) -> Result<()> {
        let deadline = Instant::now() + max_wait;
        loop {
            if store.service_info(service_name).is_some() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::ServiceNotFound(service_name.to_string()));
            }
            std::thread::sleep(DEFAULT_CHECK_INTERVAL.min(max_wait));
        }
    }

    /// Look up `service_name`, send `req`, and decode the reply as
    /// `Resp`. A non-`SUCCESS` status is surfaced as an error rather
    /// than silently leaving the caller's output untouched.
    pub fn request<Req, Resp>(store: &NodeInfoStore, service_name: &str, req: &Req) -> Result<Resp>
    where
        Req: Encode,
        Resp: Decode,
    {
        let endpoint = store
            .service_info(service_name)
            .ok_or_else(|| Error::ServiceNotFound(service_name.to_string()))?;
        let mut stream = TcpStream::connect((endpoint.ip.as_str(), endpoint.port))?;
        stream.set_read_timeout(Some(Duration::from_secs(5)))?;
        stream.set_write_timeout(Some(Duration::from_secs(5)))?;

        write_frame(&mut stream, service_name.as_bytes())?;
        write_frame(&mut stream, &req.encode()?)?;

        let status_bytes = read_frame(&mut stream)?;
        let status = StatusCode::from_bytes(&status_bytes);
        let payload = read_frame(&mut stream)?;

        match status {
            StatusCode::Success => Resp::decode(&payload),
            StatusCode::NoService => Err(Error::ServiceNotFound(service_name.to_string())),
            other => Err(Error::Deserialize(format!(
                "service {service_name} returned {other:?}"
            ))),
        }
    }
}
