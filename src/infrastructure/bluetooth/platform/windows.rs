//! Windows backend
//!
//! RFCOMM through a Winsock `AF_BTH` socket, device queries through WinRT.
//! Winsock Bluetooth sockets cannot be polled by tokio, so a reader thread
//! forwards each `recv` result as one frame.

use crate::domain::models::{Device, MacAddress};
use crate::error::{ConnectError, DiscoveryError};
use crate::infrastructure::bluetooth::connection::{RfcommConnector, RfcommLink};
use async_trait::async_trait;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::windows::io::{FromRawSocket, RawSocket};
use std::sync::OnceLock;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};
use windows::Devices::Bluetooth::{BluetoothConnectionStatus, BluetoothDevice};
use windows::Devices::Enumeration::DeviceInformation;
use windows::Win32::Devices::Bluetooth::{BTHPROTO_RFCOMM, SOCKADDR_BTH};
use windows::Win32::Networking::WinSock::{
    closesocket, connect, socket, WSAGetLastError, WSAStartup, AF_BTH, SOCKADDR, SOCKET_ERROR,
    SOCK_STREAM, WSADATA,
};

const READ_UNIT: usize = 1024;

pub struct WinsockConnector;

#[async_trait]
impl RfcommConnector for WinsockConnector {
    async fn open(
        &self,
        address: MacAddress,
        channel: u8,
    ) -> Result<Box<dyn RfcommLink>, ConnectError> {
        let stream = tokio::task::spawn_blocking(move || open_socket(address, channel))
            .await
            .map_err(io::Error::other)??;
        debug!("Winsock RFCOMM socket connected to {}", address);

        let mut reader = stream.try_clone()?;
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        std::thread::spawn(move || {
            let mut buf = [0u8; READ_UNIT];
            loop {
                let result = reader.read(&mut buf).map(|n| buf[..n].to_vec());
                let finished = !matches!(&result, Ok(data) if !data.is_empty());
                if frame_tx.send(result).is_err() || finished {
                    break;
                }
            }
            debug!("RFCOMM reader thread finished");
        });

        Ok(Box::new(WinsockLink {
            stream,
            frames: Mutex::new(frame_rx),
        }))
    }
}

struct WinsockLink {
    stream: TcpStream,
    frames: Mutex<mpsc::UnboundedReceiver<io::Result<Vec<u8>>>>,
}

#[async_trait]
impl RfcommLink for WinsockLink {
    async fn write(&self, data: &[u8]) -> io::Result<()> {
        let mut stream = self.stream.try_clone()?;
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || stream.write_all(&data))
            .await
            .map_err(io::Error::other)?
    }

    async fn read(&self, _max_len: usize) -> io::Result<Vec<u8>> {
        match self.frames.lock().await.recv().await {
            Some(result) => result,
            None => Ok(Vec::new()),
        }
    }

    async fn close(&self) -> io::Result<()> {
        self.stream.shutdown(Shutdown::Both)
    }
}

fn ensure_winsock() -> io::Result<()> {
    static STARTUP: OnceLock<i32> = OnceLock::new();
    let rc = *STARTUP.get_or_init(|| unsafe {
        let mut data: WSADATA = std::mem::zeroed();
        WSAStartup(0x0202, &mut data)
    });
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok(())
}

fn open_socket(address: MacAddress, channel: u8) -> io::Result<TcpStream> {
    ensure_winsock()?;

    unsafe {
        let sock = socket(AF_BTH as i32, SOCK_STREAM, BTHPROTO_RFCOMM as i32)
            .map_err(io::Error::other)?;

        let target = SOCKADDR_BTH {
            addressFamily: AF_BTH,
            btAddr: address.to_u64(),
            serviceClassId: windows::core::GUID::zeroed(),
            port: channel as u32,
        };
        let rc = connect(
            sock,
            &target as *const SOCKADDR_BTH as *const SOCKADDR,
            std::mem::size_of::<SOCKADDR_BTH>() as i32,
        );
        if rc == SOCKET_ERROR {
            let err = io::Error::from_raw_os_error(WSAGetLastError().0);
            let _ = closesocket(sock);
            return Err(err);
        }

        // std owns the handle from here on and closes it on drop
        Ok(TcpStream::from_raw_socket(sock.0 as RawSocket))
    }
}

/// Paired devices that Windows reports as connected
pub async fn query_connected_devices() -> Result<Vec<Device>, DiscoveryError> {
    query_devices()
        .await
        .map_err(|e| DiscoveryError::Query(e.to_string()))
}

async fn query_devices() -> windows::core::Result<Vec<Device>> {
    let selector =
        BluetoothDevice::GetDeviceSelectorFromConnectionStatus(BluetoothConnectionStatus::Connected)?;
    let infos = DeviceInformation::FindAllAsyncAqsFilter(&selector)?.await?;

    let mut devices = Vec::new();
    for i in 0..infos.Size()? {
        let info = infos.GetAt(i)?;
        if !info.Pairing()?.IsPaired()? {
            continue;
        }

        let device = match BluetoothDevice::FromIdAsync(&info.Id()?)?.await {
            Ok(device) => device,
            Err(e) => {
                warn!("Skipping device {}: {}", info.Name()?, e);
                continue;
            }
        };

        devices.push(Device {
            name: device.Name()?.to_string(),
            address: MacAddress::from_u64(device.BluetoothAddress()?),
        });
    }

    Ok(devices)
}
