//! Error types for the browser bridge.
//!
//! The taxonomy follows the failure domains of the bridge: reaching the peer
//! (`ConnectionTimeout`), keeping the link alive (`ConnectionFault`), the peer's
//! own handlers (`RemoteFault`), the wire contract (`ProtocolViolation`) and
//! consumer-registered observers (`ObserverFailure`).

use std::time::Duration;
use thiserror::Error;

use crate::rpc::protocol::codes;

/// Main error type for the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    // Connection establishment
    #[error("Timed out after {timeout:?} waiting for peer on {endpoint}")]
    ConnectionTimeout { endpoint: String, timeout: Duration },

    // Link failures after a successful connect
    #[error("Connection fault on {endpoint}: {message}")]
    ConnectionFault { endpoint: String, message: String },

    // Peer handler failures
    #[error("Remote fault ({code}): {message}")]
    RemoteFault { code: i32, message: String },

    // Wire contract violations, never retried. `remote` marks a violation the
    // peer reported in a well-formed reply; the link itself is still in sync.
    #[error("Protocol violation: {message}")]
    ProtocolViolation { message: String, remote: bool },

    // Consumer-registered observer raised while handling an event
    #[error("Observer for {event} failed: {message}")]
    ObserverFailure { event: String, message: String },

    // Programming errors: operation invoked in the wrong lifecycle state
    #[error("{operation} requires {expected}, but the manager is {actual}")]
    InvalidState {
        operation: &'static str,
        expected: &'static str,
        actual: String,
    },

    #[error("The communications manager has been disposed")]
    Disposed,

    // Engine side
    #[error("Engine error: {message}")]
    Engine { message: String },

    #[error("Navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    // Underlying IO and serialization
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl BridgeError {
    /// Build a `ConnectionFault` for an endpoint from any displayable cause.
    pub fn fault(endpoint: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        BridgeError::ConnectionFault {
            endpoint: endpoint.into(),
            message: cause.to_string(),
        }
    }

    /// Build a locally detected `ProtocolViolation` from any displayable cause.
    pub fn protocol(cause: impl std::fmt::Display) -> Self {
        BridgeError::ProtocolViolation {
            message: cause.to_string(),
            remote: false,
        }
    }

    /// Build an `Engine` error from any displayable cause.
    pub fn engine(cause: impl std::fmt::Display) -> Self {
        BridgeError::Engine {
            message: cause.to_string(),
        }
    }

    /// Convert to a JSON-RPC error code for a fault record.
    ///
    /// Standard JSON-RPC error codes:
    /// - -32700: Parse error
    /// - -32600: Invalid Request
    /// - -32601: Method not found
    /// - -32602: Invalid params
    /// - -32603: Internal error
    ///
    /// Application codes:
    /// - -32000: Engine failure
    /// - -32001: Navigation failure
    /// - -32002: Invalid state on the peer
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            BridgeError::Engine { .. } => codes::ENGINE_ERROR,
            BridgeError::Navigation { .. } => codes::NAVIGATION_ERROR,
            BridgeError::InvalidState { .. } | BridgeError::Disposed => codes::INVALID_STATE,
            BridgeError::ProtocolViolation { .. } => codes::INVALID_REQUEST,
            BridgeError::RemoteFault { code, .. } => *code,
            _ => codes::INTERNAL_ERROR,
        }
    }

    /// Whether this error leaves the underlying connection unusable.
    ///
    /// Such errors move a communications manager to `Faulted`; later calls fail
    /// fast with the same fault. A violation the peer answered with a fault
    /// record leaves the framing intact and only fails the one call.
    pub fn faults_connection(&self) -> bool {
        matches!(
            self,
            BridgeError::ConnectionFault { .. }
                | BridgeError::ProtocolViolation { remote: false, .. }
                | BridgeError::Io { .. }
        )
    }

    /// Whether this error came from establishing a connection.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            BridgeError::ConnectionTimeout { .. }
                | BridgeError::ConnectionFault { .. }
                | BridgeError::Io { .. }
        )
    }
}
