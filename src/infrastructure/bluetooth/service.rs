//! Bluetooth Service Module
//!
//! The controller state machine: discovery, connect, handshake and the
//! listen/reconnect loop. Transport failures never escape this module; they
//! become [`CommandOutcome`]s for callers and status events for the UI.

use crate::domain::models::{
    CommandOutcome, ConnectionState, ControllerEvent, LatencyMode, MacAddress, MessageSeverity,
    StatusMessage,
};
use crate::domain::settings::BluetoothSettings;
use crate::error::{RecvError, SendError};
use crate::infrastructure::bluetooth::{
    connection::{ConnectionConfig, ConnectionManager, RfcommConnector},
    discovery::DeviceDiscovery,
    protocol::{self, PacketKind, HANDSHAKE_SEQUENCE},
};
use anyhow::Context;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Fixed delays of the connection lifecycle
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Pause after every connect attempt made by the listener
    pub reconnect_delay: Duration,
    /// Pause after the listener loses the connection
    pub connection_lost_delay: Duration,
    /// Pause after each handshake frame
    pub handshake_frame_delay: Duration,
    /// Pause between the handshake and the first battery request
    pub handshake_settle: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
            connection_lost_delay: Duration::from_secs(2),
            handshake_frame_delay: Duration::from_millis(100),
            handshake_settle: Duration::from_secs(1),
        }
    }
}

/// Main controller coordinating discovery, the RFCOMM channel and the listener
pub struct BudsController {
    connection: ConnectionManager,
    discovery: Arc<dyn DeviceDiscovery>,
    config: ControllerConfig,
    address: Mutex<Option<MacAddress>>,
    running: AtomicBool,
    connecting: AtomicBool,
    event_sender: mpsc::UnboundedSender<ControllerEvent>,
}

impl BudsController {
    /// Create a controller. Nothing is opened until the first `connect`.
    pub fn new(
        connection: ConnectionManager,
        discovery: Arc<dyn DeviceDiscovery>,
        config: ControllerConfig,
        event_sender: mpsc::UnboundedSender<ControllerEvent>,
    ) -> Self {
        Self {
            connection,
            discovery,
            config,
            address: Mutex::new(None),
            running: AtomicBool::new(true),
            connecting: AtomicBool::new(false),
            event_sender,
        }
    }

    /// Build a controller from settings. A configured device address is
    /// cached up front, so discovery is never consulted.
    pub fn from_settings(
        settings: &BluetoothSettings,
        connector: Arc<dyn RfcommConnector>,
        discovery: Arc<dyn DeviceDiscovery>,
        event_sender: mpsc::UnboundedSender<ControllerEvent>,
    ) -> anyhow::Result<Self> {
        let connection = ConnectionManager::new(
            connector,
            ConnectionConfig {
                channel: settings.rfcomm_channel,
                io_timeout: Duration::from_millis(settings.io_timeout_ms),
                recv_buffer_size: settings.recv_buffer_size,
            },
        );
        let config = ControllerConfig {
            reconnect_delay: Duration::from_millis(settings.reconnect_delay_ms),
            connection_lost_delay: Duration::from_millis(settings.connection_lost_delay_ms),
            handshake_frame_delay: Duration::from_millis(settings.handshake_frame_delay_ms),
            handshake_settle: Duration::from_millis(settings.handshake_settle_ms),
        };

        let controller = Self::new(connection, discovery, config, event_sender);
        if let Some(address) = &settings.device_address {
            let address = address
                .parse::<MacAddress>()
                .context("Invalid device_address in settings")?;
            controller.set_cached_address(address);
        }
        Ok(controller)
    }

    /// Current lifecycle state, derived from the channel and the address cache
    pub fn state(&self) -> ConnectionState {
        if self.connection.is_connected() {
            ConnectionState::Connected
        } else if self.connecting.load(Ordering::SeqCst) {
            ConnectionState::Connecting
        } else if self.cached_address().is_some() {
            ConnectionState::Disconnected
        } else {
            ConnectionState::Idle
        }
    }

    /// True while the RFCOMM channel is usable
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// False once [`stop`](Self::stop) has been called
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Address found by discovery or taken from settings
    pub fn cached_address(&self) -> Option<MacAddress> {
        *self
            .address
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_cached_address(&self, address: MacAddress) {
        *self
            .address
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(address);
    }

    /// Connect to the earbuds and run the handshake
    pub async fn connect(&self) -> bool {
        let address = match self.cached_address() {
            Some(address) => address,
            None => match self.discovery.find_connected_device().await {
                Some(device) => {
                    self.set_cached_address(device.address);
                    self.send_status(
                        format!("MAC found: {}", device.address),
                        MessageSeverity::Info,
                    );
                    device.address
                }
                None => {
                    self.send_status(
                        "No connected Bluetooth device found",
                        MessageSeverity::Error,
                    );
                    return false;
                }
            },
        };

        self.connecting.store(true, Ordering::SeqCst);
        let result = self.connection.connect(address).await;
        self.connecting.store(false, Ordering::SeqCst);

        match result {
            Ok(()) => {
                info!("Connected to {}", address);
                self.send_status("Connected", MessageSeverity::Success);

                if let Err(e) = self.run_handshake().await {
                    error!("Handshake aborted: {}", e);
                    self.connection.mark_lost();
                    self.send_status(format!("Send error: {}", e), MessageSeverity::Error);
                    return false;
                }
                true
            }
            Err(e) => {
                warn!("Connection to {} failed: {}", address, e);
                self.connection.mark_lost();
                self.send_status(format!("Connection failed: {}", e), MessageSeverity::Error);
                false
            }
        }
    }

    /// Send the initialization frames, then ask for the battery state
    async fn run_handshake(&self) -> Result<(), SendError> {
        info!("Sending handshake sequence...");
        for (index, frame) in HANDSHAKE_SEQUENCE.iter().enumerate() {
            self.connection.send(frame).await?;
            debug!("Handshake frame {} sent: {}", index + 1, protocol::to_hex(frame));
            sleep(self.config.handshake_frame_delay).await;
        }

        sleep(self.config.handshake_settle).await;
        self.connection
            .send(&protocol::build_battery_request())
            .await?;
        info!("Handshake complete, battery status requested");
        Ok(())
    }

    /// Switch the latency mode
    pub async fn send_command(&self, mode: LatencyMode) -> CommandOutcome {
        let frame = protocol::build_mode_command(mode);
        self.transmit(
            &frame,
            format!("{} mode sent.", protocol::mode_display_name(mode)),
            "Send error",
        )
        .await
    }

    /// Ask the earbuds for a battery report. The answer arrives on the listener.
    pub async fn request_battery(&self) -> CommandOutcome {
        self.transmit(
            &protocol::build_battery_request(),
            "Battery request sent.".to_string(),
            "Request error",
        )
        .await
    }

    /// Pass bytes through unchanged. Meant for diagnostics.
    pub async fn send_raw(&self, data: &[u8]) -> CommandOutcome {
        self.transmit(
            data,
            format!("Raw data sent: {}", protocol::to_hex(data)),
            "Send error",
        )
        .await
    }

    async fn transmit(&self, data: &[u8], success: String, error_label: &str) -> CommandOutcome {
        if !self.ensure_connected().await {
            return CommandOutcome::failed("Could not connect to device.");
        }

        match self.connection.send(data).await {
            Ok(()) => {
                debug!("{}", success);
                CommandOutcome::ok(success)
            }
            Err(e) => {
                warn!("{}: {}", error_label, e);
                self.connection.mark_lost();
                CommandOutcome::failed(format!("{}: {}", error_label, e))
            }
        }
    }

    async fn ensure_connected(&self) -> bool {
        self.connection.is_connected() || self.connect().await
    }

    /// Receive loop. Runs until [`stop`](Self::stop) is observed at the top
    /// of an iteration.
    pub async fn listen(&self) {
        info!("Listener started");
        let mut last_packet_size = 0usize;

        while self.running.load(Ordering::SeqCst) {
            if !self.connection.is_connected() {
                self.connect().await;
                sleep(self.config.reconnect_delay).await;
                continue;
            }

            match self.connection.receive().await {
                Ok(frame) => last_packet_size = self.process_frame(&frame, last_packet_size),
                Err(RecvError::Timeout) => continue,
                Err(e) => {
                    debug!("Receive failed: {}", e);
                    self.handle_connection_lost().await;
                }
            }
        }

        // a connect may have raced with stop()
        self.connection.disconnect().await;
        info!("Listener stopped");
    }

    /// Handle one inbound frame and return its length for the ack debounce
    fn process_frame(&self, frame: &[u8], last_packet_size: usize) -> usize {
        let packet_size = frame.len();
        debug!("Received data size: {}", packet_size);

        if !self.connection.is_connected() {
            debug!("Dropping frame received after the connection was lost");
            return packet_size;
        }

        match protocol::classify(packet_size) {
            PacketKind::BatteryTelemetry => match protocol::parse_battery(frame) {
                Some(status) => {
                    info!(
                        "Battery: left {}, right {}, case {}",
                        status.left_level(),
                        status.right_level(),
                        status.case_level()
                    );
                    self.emit(ControllerEvent::Battery(status));
                }
                None => debug!("Telemetry-sized frame without battery data"),
            },
            PacketKind::ModeAck => {
                if last_packet_size != packet_size {
                    debug!("Mode acknowledged, requesting battery poll");
                    self.emit(ControllerEvent::BatteryPollRequested);
                }
            }
            PacketKind::Unrecognized => {}
        }

        packet_size
    }

    async fn handle_connection_lost(&self) {
        self.connection.mark_lost();
        self.send_status("Connection lost", MessageSeverity::Error);
        sleep(self.config.connection_lost_delay).await;
    }

    /// Stop the listener and release the channel
    pub async fn stop(&self) {
        info!("Stopping controller");
        self.running.store(false, Ordering::SeqCst);
        self.connection.disconnect().await;
    }

    /// Run [`listen`](Self::listen) on a background task
    pub fn spawn_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move { controller.listen().await })
    }

    fn send_status(&self, message: impl Into<String>, severity: MessageSeverity) {
        self.emit(ControllerEvent::Status(StatusMessage {
            message: message.into(),
            severity,
        }));
    }

    fn emit(&self, event: ControllerEvent) {
        let _ = self.event_sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectError;
    use crate::infrastructure::bluetooth::connection::RfcommLink;
    use async_trait::async_trait;

    struct OfflineConnector;

    #[async_trait]
    impl RfcommConnector for OfflineConnector {
        async fn open(
            &self,
            _address: MacAddress,
            _channel: u8,
        ) -> Result<Box<dyn RfcommLink>, ConnectError> {
            Err(ConnectError::Unsupported)
        }
    }

    fn offline_controller() -> (BudsController, mpsc::UnboundedReceiver<ControllerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let controller = BudsController::new(
            ConnectionManager::new(Arc::new(OfflineConnector), ConnectionConfig::default()),
            Arc::new(crate::infrastructure::bluetooth::discovery::FixedDiscovery(None)),
            ControllerConfig::default(),
            tx,
        );
        (controller, rx)
    }

    #[test]
    fn test_frames_ignored_while_disconnected() {
        let (controller, mut events) = offline_controller();

        let mut telemetry = vec![0u8; 62];
        telemetry[0..4].copy_from_slice(&protocol::BATTERY_PATTERN);
        let ack = vec![0u8; 14];

        let last = controller.process_frame(&telemetry, 0);
        assert_eq!(last, 62);
        let last = controller.process_frame(&ack, last);
        assert_eq!(last, 14);

        assert!(events.try_recv().is_err());
    }
}
