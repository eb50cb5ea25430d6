//! RFCOMM Connection Module
//!
//! Owns the single stream channel to the earbuds. Platform code only moves
//! bytes through [`RfcommLink`]; timeouts, locking and the connected flag live
//! in [`ConnectionManager`].

use crate::domain::models::MacAddress;
use crate::error::{ConnectError, RecvError, SendError};
use crate::infrastructure::bluetooth::protocol::{self, RFCOMM_CHANNEL};
use async_trait::async_trait;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

/// An open RFCOMM stream.
///
/// `read` must return exactly what a single transport read produced, at most
/// `max_len` bytes. An empty buffer means the remote side closed the channel.
#[async_trait]
pub trait RfcommLink: Send + Sync {
    async fn write(&self, data: &[u8]) -> io::Result<()>;
    async fn read(&self, max_len: usize) -> io::Result<Vec<u8>>;
    async fn close(&self) -> io::Result<()>;
}

/// Opens RFCOMM streams to a remote device
#[async_trait]
pub trait RfcommConnector: Send + Sync {
    async fn open(&self, address: MacAddress, channel: u8)
        -> Result<Box<dyn RfcommLink>, ConnectError>;
}

/// Configuration for connection behavior
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// RFCOMM channel number
    pub channel: u8,
    /// Bound for connect, send and each receive
    pub io_timeout: Duration,
    /// Largest frame accepted from a single read
    pub recv_buffer_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            channel: RFCOMM_CHANNEL,
            io_timeout: Duration::from_secs(2),
            recv_buffer_size: 1024,
        }
    }
}

pub struct ConnectionManager {
    connector: Arc<dyn RfcommConnector>,
    config: ConnectionConfig,
    link: Mutex<Option<Arc<dyn RfcommLink>>>,
    send_lock: AsyncMutex<()>,
    connected: AtomicBool,
}

impl ConnectionManager {
    /// Create a manager with no open channel
    pub fn new(connector: Arc<dyn RfcommConnector>, config: ConnectionConfig) -> Self {
        Self {
            connector,
            config,
            link: Mutex::new(None),
            send_lock: AsyncMutex::new(()),
            connected: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Open the channel to `address`, replacing any stale one
    pub async fn connect(&self, address: MacAddress) -> Result<(), ConnectError> {
        info!(
            "Opening RFCOMM channel {} to {}",
            self.config.channel, address
        );

        self.connected.store(false, Ordering::SeqCst);
        if let Some(stale) = self.take_link() {
            debug!("Releasing previous channel before reconnecting");
            let _ = stale.close().await;
        }

        let link = timeout(
            self.config.io_timeout,
            self.connector.open(address, self.config.channel),
        )
        .await
        .map_err(|_| ConnectError::Timeout)??;

        self.store_link(Some(Arc::from(link)));
        self.connected.store(true, Ordering::SeqCst);
        info!("RFCOMM channel open");
        Ok(())
    }

    /// Write a full payload. Concurrent callers are serialized. Refused with
    /// [`SendError::NotConnected`] once the session is marked lost.
    pub async fn send(&self, data: &[u8]) -> Result<(), SendError> {
        let _guard = self.send_lock.lock().await;
        if !self.is_connected() {
            return Err(SendError::NotConnected);
        }
        let link = self.current_link().ok_or(SendError::NotConnected)?;

        trace!("TX {}", protocol::to_hex(data));
        timeout(self.config.io_timeout, link.write(data))
            .await
            .map_err(|_| SendError::Timeout)??;
        Ok(())
    }

    /// Wait for the next frame. Only the listener may call this.
    pub async fn receive(&self) -> Result<Vec<u8>, RecvError> {
        let link = self.current_link().ok_or(RecvError::NotConnected)?;

        match timeout(self.config.io_timeout, link.read(self.config.recv_buffer_size)).await {
            Err(_) => Err(RecvError::Timeout),
            Ok(Err(e)) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                Err(RecvError::Timeout)
            }
            Ok(Err(e)) => Err(RecvError::from(e)),
            Ok(Ok(data)) if data.is_empty() => Err(RecvError::Closed),
            Ok(Ok(data)) => {
                trace!("RX {}", protocol::to_hex(&data));
                Ok(data)
            }
        }
    }

    /// Release the channel. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(link) = self.take_link() {
            if let Err(e) = link.close().await {
                debug!("Ignoring error while closing channel: {}", e);
            }
            info!("RFCOMM channel closed");
        }
    }

    /// True between a successful `connect` and the next loss or `disconnect`
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Record that the session failed. Sends are refused from here on; the
    /// channel itself is released by the next `connect` or `disconnect`.
    pub fn mark_lost(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            warn!("Connection marked as lost");
        }
    }

    fn current_link(&self) -> Option<Arc<dyn RfcommLink>> {
        self.link
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn take_link(&self) -> Option<Arc<dyn RfcommLink>> {
        self.link
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    fn store_link(&self, link: Option<Arc<dyn RfcommLink>>) {
        *self
            .link
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = link;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct ScriptedLink {
        written: Mutex<Vec<Vec<u8>>>,
        reads: Mutex<VecDeque<io::Result<Vec<u8>>>>,
        closed: AtomicBool,
        fail_writes: bool,
    }

    #[async_trait]
    impl RfcommLink for Arc<ScriptedLink> {
        async fn write(&self, data: &[u8]) -> io::Result<()> {
            if self.fail_writes {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"));
            }
            self.written.lock().unwrap().push(data.to_vec());
            Ok(())
        }

        async fn read(&self, max_len: usize) -> io::Result<Vec<u8>> {
            let next = self.reads.lock().unwrap().pop_front();
            match next {
                Some(result) => result.map(|mut data| {
                    data.truncate(max_len);
                    data
                }),
                None => std::future::pending().await,
            }
        }

        async fn close(&self) -> io::Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Err(io::Error::new(io::ErrorKind::Other, "already closed"))
        }
    }

    struct ScriptedConnector {
        link: Arc<ScriptedLink>,
        refuse: bool,
        hang: bool,
    }

    #[async_trait]
    impl RfcommConnector for ScriptedConnector {
        async fn open(
            &self,
            _address: MacAddress,
            channel: u8,
        ) -> Result<Box<dyn RfcommLink>, ConnectError> {
            assert_eq!(channel, RFCOMM_CHANNEL);
            if self.hang {
                std::future::pending::<()>().await;
            }
            if self.refuse {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused").into());
            }
            Ok(Box::new(self.link.clone()))
        }
    }

    fn manager(link: Arc<ScriptedLink>, refuse: bool, hang: bool) -> ConnectionManager {
        ConnectionManager::new(
            Arc::new(ScriptedConnector { link, refuse, hang }),
            ConnectionConfig::default(),
        )
    }

    const ADDR: MacAddress = MacAddress::new([1, 2, 3, 4, 5, 6]);

    #[tokio::test]
    async fn test_connect_send_disconnect() {
        let link = Arc::new(ScriptedLink::default());
        let manager = manager(link.clone(), false, false);

        assert!(!manager.is_connected());
        manager.connect(ADDR).await.unwrap();
        assert!(manager.is_connected());

        manager.send(&[0xAB, 0xCD]).await.unwrap();
        assert_eq!(*link.written.lock().unwrap(), vec![vec![0xAB, 0xCD]]);

        manager.disconnect().await;
        assert!(!manager.is_connected());
        assert!(link.closed.load(Ordering::SeqCst));

        // idempotent, close errors are swallowed
        manager.disconnect().await;
        assert!(matches!(
            manager.send(&[1]).await,
            Err(SendError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let manager = manager(Arc::new(ScriptedLink::default()), true, false);
        let err = manager.connect(ADDR).await.unwrap_err();
        assert!(matches!(err, ConnectError::Transport { .. }));
        assert!(!manager.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() {
        let manager = manager(Arc::new(ScriptedLink::default()), false, true);
        let err = manager.connect(ADDR).await.unwrap_err();
        assert!(matches!(err, ConnectError::Timeout));
        assert!(!manager.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_variants() {
        let link = Arc::new(ScriptedLink::default());
        {
            let mut reads = link.reads.lock().unwrap();
            reads.push_back(Ok(vec![1, 2, 3]));
            reads.push_back(Err(io::Error::new(io::ErrorKind::TimedOut, "timed out")));
            reads.push_back(Ok(Vec::new()));
            reads.push_back(Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")));
        }
        let manager = manager(link, false, false);
        assert!(matches!(
            manager.receive().await,
            Err(RecvError::NotConnected)
        ));

        manager.connect(ADDR).await.unwrap();
        assert_eq!(manager.receive().await.unwrap(), vec![1, 2, 3]);
        assert!(manager.receive().await.unwrap_err().is_timeout());
        assert!(matches!(manager.receive().await, Err(RecvError::Closed)));
        assert!(matches!(
            manager.receive().await,
            Err(RecvError::Transport { .. })
        ));
        // script exhausted: the read never completes and the timeout fires
        assert!(manager.receive().await.unwrap_err().is_timeout());
    }

    #[tokio::test]
    async fn test_send_failure_does_not_clear_flag() {
        let link = Arc::new(ScriptedLink {
            fail_writes: true,
            ..Default::default()
        });
        let manager = manager(link, false, false);
        manager.connect(ADDR).await.unwrap();

        assert!(matches!(
            manager.send(&[1]).await,
            Err(SendError::Transport { .. })
        ));
        assert!(manager.is_connected());

        manager.mark_lost();
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn test_send_refused_after_mark_lost() {
        let link = Arc::new(ScriptedLink::default());
        let manager = manager(link.clone(), false, false);
        manager.connect(ADDR).await.unwrap();

        manager.mark_lost();
        assert!(matches!(
            manager.send(&[1]).await,
            Err(SendError::NotConnected)
        ));
        assert!(link.written.lock().unwrap().is_empty());

        manager.connect(ADDR).await.unwrap();
        manager.send(&[2]).await.unwrap();
        assert_eq!(*link.written.lock().unwrap(), vec![vec![2]]);
    }
}
