use std::fmt::Display;

#[derive(Debug, Clone)]
pub enum Error {
    Io(String),
    Bind(String),
    MalformedHeartbeat(String),
    Serialize(String),
    Deserialize(String),
    DuplicateService(String),
    ServiceNotFound(String),
    Timeout(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(s) => write!(f, "I/O error: {}", s),
            Error::Bind(s) => write!(f, "bind failed: {}", s),
            Error::MalformedHeartbeat(s) => write!(f, "malformed heartbeat: {}", s),
            Error::Serialize(s) => write!(f, "serialize error: {}", s),
            Error::Deserialize(s) => write!(f, "deserialize error: {}", s),
            Error::DuplicateService(s) => write!(f, "service already registered: {}", s),
            Error::ServiceNotFound(s) => write!(f, "service not found: {}", s),
            Error::Timeout(s) => write!(f, "timed out: {}", s),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
