//! Host Bluetooth stack adapters
//!
//! Each platform provides an [`RfcommConnector`] and a connected-device query.

#[cfg(all(target_os = "linux", feature = "bluez"))]
pub mod linux;

#[cfg(target_os = "windows")]
pub mod windows;

use super::connection::RfcommConnector;
use crate::domain::models::Device;
use crate::error::DiscoveryError;
use std::sync::Arc;

pub const DISCOVERY_SUPPORTED: bool = cfg!(any(
    all(target_os = "linux", feature = "bluez"),
    target_os = "windows"
));

pub fn create_connector() -> Arc<dyn RfcommConnector> {
    #[cfg(all(target_os = "linux", feature = "bluez"))]
    return Arc::new(linux::BluezConnector);

    #[cfg(target_os = "windows")]
    return Arc::new(windows::WinsockConnector);

    #[cfg(not(any(all(target_os = "linux", feature = "bluez"), target_os = "windows")))]
    return Arc::new(UnsupportedConnector);
}

/// All paired devices the host reports as connected, in host order
pub async fn query_connected_devices() -> Result<Vec<Device>, DiscoveryError> {
    #[cfg(all(target_os = "linux", feature = "bluez"))]
    return linux::query_connected_devices().await;

    #[cfg(target_os = "windows")]
    return windows::query_connected_devices().await;

    #[cfg(not(any(all(target_os = "linux", feature = "bluez"), target_os = "windows")))]
    return Err(DiscoveryError::Unsupported);
}

#[cfg(not(any(all(target_os = "linux", feature = "bluez"), target_os = "windows")))]
struct UnsupportedConnector;

#[cfg(not(any(all(target_os = "linux", feature = "bluez"), target_os = "windows")))]
#[async_trait::async_trait]
impl RfcommConnector for UnsupportedConnector {
    async fn open(
        &self,
        _address: crate::domain::models::MacAddress,
        _channel: u8,
    ) -> Result<Box<dyn super::connection::RfcommLink>, crate::error::ConnectError> {
        Err(crate::error::ConnectError::Unsupported)
    }
}
