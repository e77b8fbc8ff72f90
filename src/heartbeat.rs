use crate::error::{Error, Result};

pub const ZLC_VERSION: (i32, i32, i32) = (1, 0, 0);
const FIXED_PREFIX_LEN: usize = 4 * 3 + 36 + 4 + 4;

/// The multicast announcement every node sends periodically: who it
/// is, which generation of its NodeInfo is current, where its service
/// endpoint lives, and which discovery group it belongs to.
///
/// Wire layout (all integers big-endian):
/// `i32 major | i32 minor | i32 patch | [u8; 36] node_id | i32 info_id
/// | i32 service_port | remaining bytes: group_name (UTF-8)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatMessage {
    pub zlc_version: (i32, i32, i32),
    pub node_id: String,
    pub info_id: u32,
    pub service_port: u16,
    pub group_name: String,
}

impl HeartbeatMessage {
    pub fn new(node_id: String, info_id: u32, service_port: u16, group_name: String) -> Self {
        HeartbeatMessage {
            zlc_version: ZLC_VERSION,
            node_id,
            info_id,
            service_port,
            group_name,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.node_id.len() != 36 {
            return Err(Error::MalformedHeartbeat(format!(
                "node_id must be 36 bytes, got {}",
                self.node_id.len()
            )));
        }
        let mut buf = Vec::with_capacity(FIXED_PREFIX_LEN + self.group_name.len());
        buf.extend_from_slice(&self.zlc_version.0.to_be_bytes());
        buf.extend_from_slice(&self.zlc_version.1.to_be_bytes());
        buf.extend_from_slice(&self.zlc_version.2.to_be_bytes());
        buf.extend_from_slice(self.node_id.as_bytes());
        buf.extend_from_slice(&(self.info_id as i32).to_be_bytes());
        buf.extend_from_slice(&(self.service_port as i32).to_be_bytes());
        buf.extend_from_slice(self.group_name.as_bytes());
        Ok(buf)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < FIXED_PREFIX_LEN {
            return Err(Error::MalformedHeartbeat(format!(
                "expected at least {FIXED_PREFIX_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let major = read_i32(bytes, 0);
        let minor = read_i32(bytes, 4);
        let patch = read_i32(bytes, 8);
        let node_id = std::str::from_utf8(&bytes[12..48])
            .map_err(|e| Error::MalformedHeartbeat(format!("invalid node_id utf8: {e}")))?
            .to_string();
        let info_id = read_i32(bytes, 48);
        let service_port = read_i32(bytes, 52);
        let group_name = std::str::from_utf8(&bytes[56..])
            .map_err(|e| Error::MalformedHeartbeat(format!("invalid group_name utf8: {e}")))?
            .to_string();
        Ok(HeartbeatMessage {
            zlc_version: (major, minor, patch),
            node_id,
            info_id: info_id as u32,
            service_port: service_port as u16,
            group_name,
        })
    }
}

fn read_i32(bytes: &[u8], offset: usize) -> i32 {
    let mut arr = [0u8; 4];
    arr.copy_from_slice(&bytes[offset..offset + 4]);
    i32::from_be_bytes(arr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> HeartbeatMessage {
        HeartbeatMessage::new(
            "00000000-0000-0000-0000-000000000000".to_string(),
            7,
            9000,
            "my_group".to_string(),
        )
    }

    #[test]
    fn round_trips() {
        let hb = sample();
        let encoded = hb.encode().unwrap();
        let decoded = HeartbeatMessage::decode(&encoded).unwrap();
        assert_eq!(hb, decoded);
    }

    #[test]
    fn rejects_short_node_id() {
        let hb = HeartbeatMessage::new("too-short".to_string(), 1, 1, "g".to_string());
        assert!(hb.encode().is_err());
    }

    #[test]
    fn rejects_truncated_buffer() {
        let err = HeartbeatMessage::decode(&[0u8; 10]);
        assert!(matches!(err, Err(Error::MalformedHeartbeat(_))));
    }
}
