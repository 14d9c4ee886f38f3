//! Duplex byte transports for the bridge.
//!
//! A `Transport` names one endpoint (a named pipe or a loopback TCP port) and
//! either listens for exactly one peer (host role) or connects to a listener
//! (client role). Both produce a `Connection` that moves whole length-prefixed
//! frames. Above the framing boundary the two kinds behave identically.
//!
//! # Roles
//!
//! - Command channel: the engine listens on the "in" endpoint, the consumer connects.
//! - Event channel: the consumer listens on the "out" endpoint, the engine connects.

mod pipe;
mod tcp;

use std::fmt;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::IpcConfig;
use crate::error::{BridgeError, Result};
use crate::rpc::protocol::{read_frame, write_frame};

pub use pipe::pipe_address;

/// Which kind of OS channel carries the bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Pipe,
    Tcp,
}

/// Identity of one side of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Named pipe (Unix domain socket on Unix).
    Pipe(String),
    /// Loopback TCP port.
    Tcp(u16),
}

impl Endpoint {
    pub fn kind(&self) -> TransportKind {
        match self {
            Endpoint::Pipe(_) => TransportKind::Pipe,
            Endpoint::Tcp(_) => TransportKind::Tcp,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Pipe(name) => write!(f, "pipe:{}", name),
            Endpoint::Tcp(port) => write!(f, "tcp:127.0.0.1:{}", port),
        }
    }
}

/// Lifecycle of a connection.
///
/// Moves forward only. `Disposed` is terminal and reachable from any state;
/// nothing returns to `Connected` once it has been left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Faulted,
    Disposed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Faulted => "faulted",
            ConnectionState::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

/// Any bidirectional byte stream a connection can sit on.
pub trait DuplexStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> DuplexStream for T {}

/// Establishes connections on one endpoint.
#[derive(Debug, Clone)]
pub struct Transport {
    endpoint: Endpoint,
    timeout: Duration,
}

impl Transport {
    pub fn new(endpoint: Endpoint, timeout: Duration) -> Self {
        Self { endpoint, timeout }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn kind(&self) -> TransportKind {
        self.endpoint.kind()
    }

    /// Bind the endpoint and wait for exactly one peer.
    ///
    /// Fails with `ConnectionTimeout` if nobody connects within the timeout.
    pub async fn listen(&self) -> Result<Connection> {
        info!("Listening for peer on {}", self.endpoint);

        let accept = async {
            let stream: Box<dyn DuplexStream> = match &self.endpoint {
                Endpoint::Tcp(port) => Box::new(tcp::accept_one(*port).await?),
                Endpoint::Pipe(name) => Box::new(pipe::accept_one(name).await?),
            };
            Ok::<_, std::io::Error>(stream)
        };

        let stream = tokio::time::timeout(self.timeout, accept)
            .await
            .map_err(|_| self.timeout_error())?
            .map_err(|e| BridgeError::fault(self.endpoint.to_string(), e))?;

        info!("Peer connected on {}", self.endpoint);
        Ok(Connection::new(self.endpoint.clone(), stream))
    }

    /// Connect to a listener, retrying until the timeout elapses.
    ///
    /// An absent listener costs the full timeout and then fails with
    /// `ConnectionTimeout`; it never fails on the first refused attempt.
    pub async fn connect(&self) -> Result<Connection> {
        debug!("Connecting to {} ({})", self.endpoint, ConnectionState::Connecting);
        let deadline = Instant::now() + self.timeout;

        loop {
            let attempt = async {
                let stream: Box<dyn DuplexStream> = match &self.endpoint {
                    Endpoint::Tcp(port) => Box::new(tcp::connect(*port).await?),
                    Endpoint::Pipe(name) => Box::new(pipe::connect(name).await?),
                };
                Ok::<_, std::io::Error>(stream)
            };

            match tokio::time::timeout_at(deadline, attempt).await {
                Ok(Ok(stream)) => {
                    info!("Connected to {}", self.endpoint);
                    return Ok(Connection::new(self.endpoint.clone(), stream));
                }
                Ok(Err(e)) => {
                    debug!("Connect attempt to {} failed: {}", self.endpoint, e);
                }
                Err(_) => return Err(self.timeout_error()),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(self.timeout_error());
            }
            let remaining = deadline - now;
            tokio::time::sleep(remaining.min(IpcConfig::CONNECT_RETRY_INTERVAL)).await;
        }
    }

    fn timeout_error(&self) -> BridgeError {
        BridgeError::ConnectionTimeout {
            endpoint: self.endpoint.to_string(),
            timeout: self.timeout,
        }
    }
}

/// An established duplex link moving whole frames.
pub struct Connection {
    endpoint: Endpoint,
    stream: Option<Box<dyn DuplexStream>>,
    state: ConnectionState,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state)
            .finish()
    }
}

impl Connection {
    /// Wrap an already-connected stream.
    pub fn new(endpoint: Endpoint, stream: Box<dyn DuplexStream>) -> Self {
        Self {
            endpoint,
            stream: Some(stream),
            state: ConnectionState::Connected,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Send one frame.
    pub async fn send(&mut self, payload: &[u8]) -> Result<()> {
        let result = match self.usable_stream() {
            Ok(stream) => write_frame(stream, payload).await,
            Err(e) => return Err(e),
        };
        result.map_err(|e| self.on_failure(e))
    }

    /// Receive one frame. Returns `None` when the peer closed the link cleanly;
    /// the connection is `Faulted` from then on.
    pub async fn receive(&mut self) -> Result<Option<Vec<u8>>> {
        let result = match self.usable_stream() {
            Ok(stream) => read_frame(stream).await,
            Err(e) => return Err(e),
        };
        match result {
            Ok(Some(frame)) => Ok(Some(frame)),
            Ok(None) => {
                debug!("Peer closed {}", self.endpoint);
                self.state = ConnectionState::Faulted;
                Ok(None)
            }
            Err(e) => Err(self.on_failure(e)),
        }
    }

    /// Release the OS handle. Safe to call any number of times.
    pub async fn dispose(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("Ignoring shutdown error on {}: {}", self.endpoint, e);
            }
            debug!("Disposed connection on {}", self.endpoint);
        }
        self.state = ConnectionState::Disposed;
    }

    fn usable_stream(&mut self) -> Result<&mut Box<dyn DuplexStream>> {
        match (self.state, self.stream.as_mut()) {
            (ConnectionState::Connected, Some(stream)) => Ok(stream),
            (state, _) => Err(BridgeError::fault(
                self.endpoint.to_string(),
                format!("connection is {}", state),
            )),
        }
    }

    fn on_failure(&mut self, err: BridgeError) -> BridgeError {
        self.state = ConnectionState::Faulted;
        match err {
            BridgeError::Io { message, .. } => BridgeError::fault(self.endpoint.to_string(), message),
            other => other,
        }
    }
}
