//! Client role of an RPC channel.
//!
//! Sends one framed request and waits for the matching framed response. Calls
//! take `&mut self`, so a single client can never have more than one request
//! in flight; callers sharing a client serialize through their own mutex.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::protocol::{split_tagged, RpcRequest, RpcResponse};
use crate::error::{BridgeError, Result};
use crate::transport::{Connection, ConnectionState, Endpoint};

/// Client end of a request/response channel.
#[derive(Debug)]
pub struct RpcClient {
    connection: Connection,
    next_id: u64,
}

impl RpcClient {
    pub fn new(connection: Connection) -> Self {
        Self {
            connection,
            next_id: 1,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.connection.endpoint()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Call a method with already-encoded params and return the raw result.
    ///
    /// Returns `RemoteFault` when the peer's handler failed, `ProtocolViolation`
    /// when the peer rejected the request or answered out of order, and
    /// `ConnectionFault` when the link broke.
    pub async fn call_raw(&mut self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.next_id;
        self.next_id += 1;

        let request = RpcRequest::new(method, params, id);
        let request_bytes = serde_json::to_vec(&request)?;

        debug!("RPC call #{} {} on {}", id, method, self.connection.endpoint());
        self.connection.send(&request_bytes).await?;

        let response_bytes = self.connection.receive().await?.ok_or_else(|| {
            BridgeError::fault(
                self.connection.endpoint().to_string(),
                format!("peer closed the connection during {}", method),
            )
        })?;

        let response: RpcResponse = serde_json::from_slice(&response_bytes)
            .map_err(|e| BridgeError::protocol(format!("unparsable response: {}", e)))?;

        if response.id != Some(id) {
            return Err(BridgeError::protocol(format!(
                "response id {:?} does not match request #{}",
                response.id, id
            )));
        }

        if let Some(fault) = response.error {
            return Err(fault.into_error());
        }

        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Send an adjacently tagged message (a command or an event) and decode the result.
    pub async fn call<M, R>(&mut self, message: &M) -> Result<R>
    where
        M: Serialize,
        R: DeserializeOwned,
    {
        let (method, params) = split_tagged(message)?;
        let result = self.call_raw(&method, params).await?;
        serde_json::from_value(result)
            .map_err(|e| BridgeError::protocol(format!("unexpected result for {}: {}", method, e)))
    }

    /// Close the underlying connection. Idempotent.
    pub async fn dispose(&mut self) {
        self.connection.dispose().await;
    }
}
