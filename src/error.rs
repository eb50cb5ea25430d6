use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
#[error("Invalid Bluetooth address: {0:?}")]
pub struct AddressParseError(pub String);

#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("timed out")]
    Timeout,

    #[error("RFCOMM is not supported on this platform")]
    Unsupported,

    #[error("{source}")]
    Transport {
        #[from]
        source: io::Error,
    },
}

#[derive(Error, Debug)]
pub enum SendError {
    #[error("not connected")]
    NotConnected,

    #[error("timed out")]
    Timeout,

    #[error("{source}")]
    Transport {
        #[from]
        source: io::Error,
    },
}

#[derive(Error, Debug)]
pub enum RecvError {
    /// No data within the IO timeout; the session is still usable
    #[error("timed out")]
    Timeout,

    #[error("not connected")]
    NotConnected,

    #[error("connection closed by remote device")]
    Closed,

    #[error("{source}")]
    Transport {
        #[from]
        source: io::Error,
    },
}

impl RecvError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RecvError::Timeout)
    }
}

/// Discovery failures never leave the discovery adapter; they degrade to "not found"
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Device discovery is not supported on this platform")]
    Unsupported,

    #[error("Device discovery timed out")]
    Timeout,

    #[error("Device query failed: {0}")]
    Query(String),
}
