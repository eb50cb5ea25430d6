//! BlueZ backend
//!
//! RFCOMM streams and device queries through the `bluer` D-Bus bindings.

use crate::domain::models::{Device, MacAddress};
use crate::error::{ConnectError, DiscoveryError};
use crate::infrastructure::bluetooth::connection::{RfcommConnector, RfcommLink};
use async_trait::async_trait;
use bluer::rfcomm::{SocketAddr, Stream};
use bluer::{Address, Session};
use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tracing::{debug, info};

pub struct BluezConnector;

#[async_trait]
impl RfcommConnector for BluezConnector {
    async fn open(
        &self,
        address: MacAddress,
        channel: u8,
    ) -> Result<Box<dyn RfcommLink>, ConnectError> {
        let target = SocketAddr::new(Address::new(address.octets()), channel);
        let stream = Stream::connect(target).await?;
        debug!("BlueZ RFCOMM stream established to {}", address);

        let (reader, writer) = tokio::io::split(stream);
        Ok(Box::new(BluezLink {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
        }))
    }
}

struct BluezLink {
    reader: Mutex<ReadHalf<Stream>>,
    writer: Mutex<WriteHalf<Stream>>,
}

#[async_trait]
impl RfcommLink for BluezLink {
    async fn write(&self, data: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(data).await?;
        writer.flush().await
    }

    async fn read(&self, max_len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; max_len];
        let n = self.reader.lock().await.read(&mut buf).await?;
        buf.truncate(n);
        Ok(buf)
    }

    async fn close(&self) -> io::Result<()> {
        self.writer.lock().await.shutdown().await
    }
}

/// Paired and connected devices on the default adapter
pub async fn query_connected_devices() -> Result<Vec<Device>, DiscoveryError> {
    let session = Session::new().await.map_err(query_error)?;
    let adapter = session.default_adapter().await.map_err(query_error)?;
    info!("Querying adapter {} for connected devices", adapter.name());

    let mut devices = Vec::new();
    for address in adapter.device_addresses().await.map_err(query_error)? {
        let device = adapter.device(address).map_err(query_error)?;

        let connected = device.is_connected().await.unwrap_or(false);
        let paired = device.is_paired().await.unwrap_or(false);
        if !(connected && paired) {
            continue;
        }

        let name = device.name().await.ok().flatten().unwrap_or_default();
        devices.push(Device {
            name,
            address: MacAddress::new(address.0),
        });
    }

    Ok(devices)
}

fn query_error(err: bluer::Error) -> DiscoveryError {
    DiscoveryError::Query(err.to_string())
}
