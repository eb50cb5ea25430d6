//! Device Discovery Module
//!
//! Finds the paired earbuds that the operating system currently reports as
//! connected. Failures never reach the controller; they read as "not found".

use crate::domain::models::Device;
use crate::error::DiscoveryError;
use crate::infrastructure::bluetooth::platform;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

#[async_trait]
pub trait DeviceDiscovery: Send + Sync {
    /// First paired and connected device, if any
    async fn find_connected_device(&self) -> Option<Device>;
}

/// Discovery backed by the host Bluetooth stack
pub struct SystemDiscovery {
    query_timeout: Duration,
}

impl SystemDiscovery {
    pub fn new(query_timeout: Duration) -> Self {
        Self { query_timeout }
    }

    pub fn is_supported() -> bool {
        platform::DISCOVERY_SUPPORTED
    }
}

impl Default for SystemDiscovery {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl DeviceDiscovery for SystemDiscovery {
    async fn find_connected_device(&self) -> Option<Device> {
        let result = match timeout(self.query_timeout, platform::query_connected_devices()).await {
            Ok(result) => result,
            Err(_) => Err(DiscoveryError::Timeout),
        };

        match result {
            Ok(devices) => {
                debug!("Discovery returned {} connected device(s)", devices.len());
                let device = devices.into_iter().next();
                if let Some(device) = &device {
                    info!("Found connected device {:?} at {}", device.name, device.address);
                }
                device
            }
            Err(DiscoveryError::Unsupported) => {
                debug!("Device discovery unavailable on this platform");
                None
            }
            Err(e) => {
                warn!("Device discovery failed: {}", e);
                None
            }
        }
    }
}

/// Discovery that always answers with the same device, for hosts whose
/// Bluetooth stack cannot be queried.
pub struct FixedDiscovery(pub Option<Device>);

#[async_trait]
impl DeviceDiscovery for FixedDiscovery {
    async fn find_connected_device(&self) -> Option<Device> {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::MacAddress;

    #[tokio::test]
    async fn test_fixed_discovery() {
        let device = Device {
            name: "Xiaomi Buds 5".to_string(),
            address: MacAddress::new([0xA1, 0xB2, 0xC3, 0xD4, 0xE5, 0xF6]),
        };
        let discovery = FixedDiscovery(Some(device.clone()));
        assert_eq!(discovery.find_connected_device().await, Some(device));
        assert_eq!(FixedDiscovery(None).find_connected_device().await, None);
    }
}
