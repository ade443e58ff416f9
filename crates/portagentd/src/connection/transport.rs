//! TCP transport for a single instrument channel.
//!
//! A transport moves through three stages:
//!
//! ```text
//! configured ──initialize()──▶ initialized ──poll_connect()──▶ connected
//!     ▲                                                            │
//!     └──────────────────────── disconnect() ◀─────────────────────┘
//! ```
//!
//! Every operation is non-blocking from the daemon loop's point of view:
//! `poll_connect()` returns `Ok(false)` when no peer is available yet and
//! `try_read()` returns `Ok(0)` when nothing is buffered. The only bounded
//! wait is the client-side connect attempt, capped at [`CONNECT_TIMEOUT`].
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Socket errors drop the peer and surface as `TransportError`

use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{lookup_host, TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Upper bound on one outbound connect attempt.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Minimum spacing between outbound connect attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

// ============================================================================
// Error Types
// ============================================================================

/// Errors from a channel transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transport not configured (host and port are required)")]
    NotConfigured,

    #[error("Transport already initialized; host and port are fixed")]
    AlreadyInitialized,

    #[error("Transport not initialized")]
    NotInitialized,

    #[error("Failed to resolve {endpoint}: {error}")]
    Resolve { endpoint: String, error: String },

    #[error("Failed to bind {endpoint}: {error}")]
    Bind { endpoint: String, error: String },

    #[error("Failed to connect to {endpoint}: {error}")]
    Connect { endpoint: String, error: String },

    #[error("Connection to {endpoint} timed out")]
    ConnectTimeout { endpoint: String },

    #[error("Peer closed the connection")]
    PeerClosed,

    #[error("I/O error: {0}")]
    Io(String),
}

// ============================================================================
// Transport Trait
// ============================================================================

/// Which side of the TCP handshake the daemon plays on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    /// The daemon dials out to the instrument
    Client,
    /// The daemon listens and the instrument dials in
    Listener,
}

/// A byte transport for one channel.
///
/// Implementations must be object safe so a connection can hand out
/// `&mut dyn Transport` for each of its channels.
#[async_trait]
pub trait Transport: Send {
    fn role(&self) -> ChannelRole;

    fn host(&self) -> Option<&str>;

    fn port(&self) -> Option<u16>;

    /// Sets the host. Fails once the transport is initialized.
    fn set_host(&mut self, host: &str) -> Result<(), TransportError>;

    /// Sets the port. Fails once the transport is initialized.
    fn set_port(&mut self, port: u16) -> Result<(), TransportError>;

    /// True when both host and port are set.
    fn is_configured(&self) -> bool {
        self.host().is_some() && self.port().is_some()
    }

    fn is_initialized(&self) -> bool;

    fn is_connected(&self) -> bool;

    /// Resolves (client) or binds (listener) the configured endpoint.
    async fn initialize(&mut self) -> Result<(), TransportError>;

    /// Attempts to establish a peer. Returns `Ok(true)` once connected.
    async fn poll_connect(&mut self) -> Result<bool, TransportError>;

    /// Reads whatever the peer has sent, without waiting.
    ///
    /// Returns `Ok(0)` when nothing is buffered or no peer is attached.
    fn try_read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Drops the peer and any listening socket. Returns true on a clean close.
    async fn disconnect(&mut self) -> bool;

    /// Bound address of the listening socket or the connected stream.
    fn local_addr(&self) -> Option<SocketAddr>;
}

// ============================================================================
// TCP Transport
// ============================================================================

/// Transport over a tokio `TcpStream`.
#[derive(Debug)]
pub struct TcpTransport {
    role: ChannelRole,
    host: Option<String>,
    port: Option<u16>,
    initialized: bool,

    /// Resolved instrument addresses (client role)
    endpoints: Vec<SocketAddr>,

    /// Earliest time of the next outbound attempt (client role)
    next_attempt: Option<Instant>,

    listener: Option<TcpListener>,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    pub fn new(role: ChannelRole) -> Self {
        Self {
            role,
            host: None,
            port: None,
            initialized: false,
            endpoints: Vec::new(),
            next_attempt: None,
            listener: None,
            stream: None,
        }
    }

    /// A transport that dials out to the instrument.
    pub fn client() -> Self {
        Self::new(ChannelRole::Client)
    }

    /// A transport that waits for the instrument to dial in.
    pub fn listener() -> Self {
        Self::new(ChannelRole::Listener)
    }

    fn endpoint(&self) -> String {
        format!(
            "{}:{}",
            self.host.as_deref().unwrap_or("?"),
            self.port.map_or_else(|| "?".to_string(), |p| p.to_string())
        )
    }

    fn ensure_unlocked(&self) -> Result<(), TransportError> {
        if self.initialized {
            return Err(TransportError::AlreadyInitialized);
        }
        Ok(())
    }

    fn drop_peer(&mut self) {
        self.stream = None;
        if self.role == ChannelRole::Client {
            self.next_attempt = Some(Instant::now() + RECONNECT_DELAY);
        }
    }

    async fn try_connect(&mut self) -> Result<bool, TransportError> {
        let now = Instant::now();
        if self.next_attempt.is_some_and(|at| now < at) {
            return Ok(false);
        }
        self.next_attempt = Some(now + RECONNECT_DELAY);

        let endpoint = self.endpoint();
        let mut last_error = None;

        for addr in self.endpoints.clone() {
            match timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(error = %e, "Failed to set TCP_NODELAY");
                    }
                    info!(endpoint = %endpoint, addr = %addr, "Connected to instrument");
                    self.stream = Some(stream);
                    self.next_attempt = None;
                    return Ok(true);
                }
                Ok(Err(e)) => {
                    last_error = Some(TransportError::Connect {
                        endpoint: endpoint.clone(),
                        error: e.to_string(),
                    });
                }
                Err(_) => {
                    last_error = Some(TransportError::ConnectTimeout {
                        endpoint: endpoint.clone(),
                    });
                }
            }
        }

        match last_error {
            Some(error) => Err(error),
            None => Ok(false),
        }
    }

    async fn try_accept(&mut self) -> Result<bool, TransportError> {
        let Some(listener) = self.listener.as_ref() else {
            return Err(TransportError::NotInitialized);
        };

        // Take a pending peer if the listener is readable, never wait for one
        let accepted = tokio::select! {
            biased;
            result = listener.accept() => Some(result),
            _ = std::future::ready(()) => None,
        };

        match accepted {
            None => Ok(false),
            Some(Ok((stream, peer))) => {
                info!(endpoint = %self.endpoint(), peer = %peer, "Instrument attached");
                self.stream = Some(stream);
                Ok(true)
            }
            Some(Err(e)) => Err(TransportError::Io(e.to_string())),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn role(&self) -> ChannelRole {
        self.role
    }

    fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    fn port(&self) -> Option<u16> {
        self.port
    }

    fn set_host(&mut self, host: &str) -> Result<(), TransportError> {
        self.ensure_unlocked()?;
        self.host = Some(host.to_string());
        Ok(())
    }

    fn set_port(&mut self, port: u16) -> Result<(), TransportError> {
        self.ensure_unlocked()?;
        self.port = Some(port);
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn initialize(&mut self) -> Result<(), TransportError> {
        if self.initialized {
            return Ok(());
        }
        let (Some(host), Some(port)) = (self.host.clone(), self.port) else {
            return Err(TransportError::NotConfigured);
        };
        let endpoint = self.endpoint();

        match self.role {
            ChannelRole::Client => {
                let addrs: Vec<SocketAddr> = lookup_host((host.as_str(), port))
                    .await
                    .map_err(|e| TransportError::Resolve {
                        endpoint: endpoint.clone(),
                        error: e.to_string(),
                    })?
                    .collect();
                if addrs.is_empty() {
                    return Err(TransportError::Resolve {
                        endpoint,
                        error: "no addresses found".to_string(),
                    });
                }
                debug!(endpoint = %endpoint, addrs = addrs.len(), "Resolved instrument");
                self.endpoints = addrs;
            }
            ChannelRole::Listener => {
                let listener = TcpListener::bind((host.as_str(), port))
                    .await
                    .map_err(|e| TransportError::Bind {
                        endpoint: endpoint.clone(),
                        error: e.to_string(),
                    })?;
                let bound = listener
                    .local_addr()
                    .map(|a| a.to_string())
                    .unwrap_or_default();
                info!(endpoint = %endpoint, bound = %bound, "Listening for instrument");
                self.listener = Some(listener);
            }
        }

        self.initialized = true;
        Ok(())
    }

    async fn poll_connect(&mut self) -> Result<bool, TransportError> {
        if self.stream.is_some() {
            return Ok(true);
        }
        if !self.initialized {
            return Err(TransportError::NotInitialized);
        }
        match self.role {
            ChannelRole::Client => self.try_connect().await,
            ChannelRole::Listener => self.try_accept().await,
        }
    }

    fn try_read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let Some(stream) = self.stream.as_ref() else {
            return Ok(0);
        };
        if buf.is_empty() {
            return Ok(0);
        }

        match stream.try_read(buf) {
            Ok(0) => {
                info!(endpoint = %self.endpoint(), "Instrument closed the connection");
                self.drop_peer();
                Err(TransportError::PeerClosed)
            }
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => {
                self.drop_peer();
                Err(TransportError::Io(e.to_string()))
            }
        }
    }

    async fn disconnect(&mut self) -> bool {
        let mut clean = true;

        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                if e.kind() != io::ErrorKind::NotConnected {
                    warn!(endpoint = %self.endpoint(), error = %e, "Unclean socket shutdown");
                    clean = false;
                }
            }
        }

        if self.listener.take().is_some() {
            debug!(endpoint = %self.endpoint(), "Stopped listening");
        }
        self.endpoints.clear();
        self.next_attempt = None;
        self.initialized = false;
        clean
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        if let Some(listener) = &self.listener {
            return listener.local_addr().ok();
        }
        self.stream.as_ref().and_then(|s| s.local_addr().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::time::sleep;

    const WAIT_STEP: Duration = Duration::from_millis(10);
    const WAIT_STEPS: usize = 200;

    async fn wait_connected(transport: &mut TcpTransport) {
        for _ in 0..WAIT_STEPS {
            if transport.poll_connect().await.unwrap() {
                return;
            }
            sleep(WAIT_STEP).await;
        }
        panic!("transport never connected");
    }

    async fn read_some(
        transport: &mut TcpTransport,
        want: usize,
    ) -> Result<Vec<u8>, TransportError> {
        let mut out = Vec::new();
        let mut buf = [0u8; 64];
        for _ in 0..WAIT_STEPS {
            let n = transport.try_read(&mut buf)?;
            out.extend_from_slice(&buf[..n]);
            if out.len() >= want {
                break;
            }
            sleep(WAIT_STEP).await;
        }
        Ok(out)
    }

    fn loopback_listener() -> TcpTransport {
        let mut transport = TcpTransport::listener();
        transport.set_host("127.0.0.1").unwrap();
        transport.set_port(0).unwrap();
        transport
    }

    #[test]
    fn test_new_transport_state() {
        let transport = TcpTransport::client();
        assert_eq!(transport.role(), ChannelRole::Client);
        assert!(!transport.is_configured());
        assert!(!transport.is_initialized());
        assert!(!transport.is_connected());
        assert!(transport.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_initialize_requires_configuration() {
        let mut transport = TcpTransport::client();
        transport.set_host("127.0.0.1").unwrap();
        assert_eq!(
            transport.initialize().await,
            Err(TransportError::NotConfigured)
        );
    }

    #[tokio::test]
    async fn test_poll_before_initialize_fails() {
        let mut transport = loopback_listener();
        assert_eq!(
            transport.poll_connect().await,
            Err(TransportError::NotInitialized)
        );
    }

    #[tokio::test]
    async fn test_setters_locked_after_initialize() {
        let mut transport = loopback_listener();
        transport.initialize().await.unwrap();

        assert_eq!(
            transport.set_port(9),
            Err(TransportError::AlreadyInitialized)
        );
        assert_eq!(
            transport.set_host("10.0.0.1"),
            Err(TransportError::AlreadyInitialized)
        );
        assert_eq!(transport.host(), Some("127.0.0.1"));

        transport.disconnect().await;
        assert!(transport.set_port(9).is_ok());
    }

    #[tokio::test]
    async fn test_listener_accepts_and_reads() {
        let mut transport = loopback_listener();
        transport.initialize().await.unwrap();
        assert!(transport.is_initialized());
        assert!(!transport.poll_connect().await.unwrap());

        let addr = transport.local_addr().unwrap();
        let mut peer = TcpStream::connect(addr).await.unwrap();
        wait_connected(&mut transport).await;

        peer.write_all(b"S>").await.unwrap();
        assert_eq!(read_some(&mut transport, 2).await.unwrap(), b"S>");
    }

    #[tokio::test]
    async fn test_try_read_without_peer_is_empty() {
        let mut transport = loopback_listener();
        transport.initialize().await.unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(transport.try_read(&mut buf), Ok(0));
    }

    #[tokio::test]
    async fn test_peer_close_keeps_listener() {
        let mut transport = loopback_listener();
        transport.initialize().await.unwrap();
        let addr = transport.local_addr().unwrap();

        let peer = TcpStream::connect(addr).await.unwrap();
        wait_connected(&mut transport).await;
        drop(peer);

        assert_eq!(
            read_some(&mut transport, 1).await,
            Err(TransportError::PeerClosed)
        );
        assert!(!transport.is_connected());
        assert!(transport.is_initialized());

        // A new peer can attach to the same listener
        let _again = TcpStream::connect(addr).await.unwrap();
        wait_connected(&mut transport).await;
    }

    #[tokio::test]
    async fn test_client_connects_to_instrument() {
        let instrument = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = instrument.local_addr().unwrap().port();

        let mut transport = TcpTransport::client();
        transport.set_host("127.0.0.1").unwrap();
        transport.set_port(port).unwrap();
        transport.initialize().await.unwrap();

        assert!(transport.poll_connect().await.unwrap());
        let (mut socket, _) = instrument.accept().await.unwrap();
        socket.write_all(b"12.5\r\n").await.unwrap();
        assert_eq!(read_some(&mut transport, 6).await.unwrap(), b"12.5\r\n");
    }

    #[tokio::test]
    async fn test_client_refused_then_backs_off() {
        // Reserve a port, then free it so nothing is listening
        let port = {
            let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
            probe.local_addr().unwrap().port()
        };

        let mut transport = TcpTransport::client();
        transport.set_host("127.0.0.1").unwrap();
        transport.set_port(port).unwrap();
        transport.initialize().await.unwrap();

        assert!(matches!(
            transport.poll_connect().await,
            Err(TransportError::Connect { .. })
        ));
        // Inside the back-off window the attempt is skipped
        assert_eq!(transport.poll_connect().await, Ok(false));
    }

    #[tokio::test]
    async fn test_disconnect_resets_to_configured() {
        let mut transport = loopback_listener();
        transport.initialize().await.unwrap();
        let addr = transport.local_addr().unwrap();
        let _peer = TcpStream::connect(addr).await.unwrap();
        wait_connected(&mut transport).await;

        assert!(transport.disconnect().await);
        assert!(!transport.is_connected());
        assert!(!transport.is_initialized());
        assert!(transport.is_configured());
        assert!(transport.local_addr().is_none());
    }
}
