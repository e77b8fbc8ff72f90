use serde::{de::DeserializeOwned, Serialize};

use crate::error::{Error, Result};

/// Canonical nil value. `Empty` is the payload type for requests and
/// responses that carry no data; it encodes to a zero-length byte
/// sequence and decodes from one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Empty;

pub trait Encode {
    fn encode(&self) -> Result<Vec<u8>>;
}

pub trait Decode: Sized {
    fn decode(bytes: &[u8]) -> Result<Self>;
}

impl Encode for Empty {
    fn encode(&self) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

impl Decode for Empty {
    fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            Ok(Empty)
        } else {
            Err(Error::Deserialize(
                "expected empty payload for Empty".into(),
            ))
        }
    }
}

impl<T> Encode for T
where
    T: Serialize,
{
    fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| Error::Serialize(e.to_string()))
    }
}

impl<T> Decode for T
where
    T: DeserializeOwned,
{
    fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| Error::Deserialize(e.to_string()))
    }
}
