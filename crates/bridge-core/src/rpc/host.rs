//! Host role of an RPC channel.
//!
//! The host owns one accepted `Connection`, reads requests one at a time,
//! hands each to an `RpcDispatch` implementation (the registered service
//! table) and writes back exactly one response per request.
//!
//! # Thread Safety
//!
//! The serve loop runs in its own spawned tokio task so inbound calls on one
//! channel are never queued behind calls in flight on another.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::protocol::{codes, FaultRecord, RpcRequest, RpcResponse};
use crate::error::{BridgeError, Result};
use crate::transport::Connection;

/// Service table for a host: maps method ids onto handlers.
#[async_trait::async_trait]
pub trait RpcDispatch: Send + Sync + 'static {
    /// Handle one call. `Err` becomes a fault record for the caller.
    async fn dispatch(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> std::result::Result<Value, FaultRecord>;

    /// Checked after each response is written; `true` ends the serve loop.
    fn finished(&self) -> bool {
        false
    }
}

/// How a serve loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostExit {
    /// The dispatcher reported it was finished.
    Finished,
    /// The peer closed the connection.
    PeerClosed,
    /// `shutdown()` was requested locally.
    Shutdown,
}

/// Handle to a running serve loop. Dropping it stops the loop.
pub struct RpcHostHandle {
    shutdown_tx: watch::Sender<bool>,
    task_handle: Option<JoinHandle<Result<HostExit>>>,
}

impl RpcHostHandle {
    /// Ask the serve loop to stop after the call it is currently handling.
    pub fn shutdown(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for the serve loop to end.
    pub async fn join(mut self) -> Result<HostExit> {
        match self.task_handle.take() {
            Some(handle) => handle
                .await
                .map_err(|e| BridgeError::engine(format!("serve loop panicked: {}", e)))?,
            None => Ok(HostExit::Shutdown),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task_handle
            .as_ref()
            .map(|h| h.is_finished())
            .unwrap_or(true)
    }
}

impl Drop for RpcHostHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

/// Serves calls arriving on one connection.
pub struct RpcHost;

impl RpcHost {
    /// Spawn the serve loop for `connection` on the current tokio runtime.
    pub fn spawn<D: RpcDispatch>(connection: Connection, dispatch: Arc<D>) -> RpcHostHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task_handle = tokio::spawn(Self::serve(connection, dispatch, shutdown_rx));
        RpcHostHandle {
            shutdown_tx,
            task_handle: Some(task_handle),
        }
    }

    /// Serve requests until the peer leaves, the dispatcher finishes, or shutdown.
    ///
    /// The connection is disposed on every exit path.
    pub async fn serve<D: RpcDispatch>(
        mut connection: Connection,
        dispatch: Arc<D>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<HostExit> {
        let endpoint = connection.endpoint().clone();
        let exit = Self::serve_loop(&mut connection, &*dispatch, &mut shutdown_rx).await;
        connection.dispose().await;

        match &exit {
            Ok(reason) => info!("RPC host on {} stopped: {:?}", endpoint, reason),
            Err(e) => warn!("RPC host on {} ended: {}", endpoint, e),
        }
        exit
    }

    async fn serve_loop<D: RpcDispatch>(
        connection: &mut Connection,
        dispatch: &D,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<HostExit> {
        loop {
            if *shutdown_rx.borrow() {
                return Ok(HostExit::Shutdown);
            }

            let frame = tokio::select! {
                result = connection.receive() => {
                    match result? {
                        Some(f) => f,
                        None => return Ok(HostExit::PeerClosed),
                    }
                }
                _ = shutdown_rx.changed() => {
                    return Ok(HostExit::Shutdown);
                }
            };

            let response = Self::process_request(&frame, dispatch).await;
            let response_bytes = serde_json::to_vec(&response)?;
            connection.send(&response_bytes).await?;

            if dispatch.finished() {
                return Ok(HostExit::Finished);
            }
        }
    }

    async fn process_request<D: RpcDispatch>(frame: &[u8], dispatch: &D) -> RpcResponse {
        let request: RpcRequest = match serde_json::from_slice(frame) {
            Ok(req) => req,
            Err(e) => {
                return RpcResponse::error(None, codes::PARSE_ERROR, format!("Parse error: {}", e));
            }
        };

        if request.jsonrpc != "2.0" {
            return RpcResponse::error(
                request.id,
                codes::INVALID_REQUEST,
                "Invalid Request: expected jsonrpc 2.0".to_string(),
            );
        }

        debug!("RPC dispatch #{:?} {}", request.id, request.method);
        match dispatch.dispatch(&request.method, request.params).await {
            Ok(result) => RpcResponse::success(request.id, result),
            Err(fault) => {
                debug!("RPC #{:?} {} faulted: {}", request.id, request.method, fault.message);
                RpcResponse::error(request.id, fault.code, fault.message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::RpcClient;
    use crate::transport::{Endpoint, Transport};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct EchoDispatch {
        stop: AtomicBool,
    }

    #[async_trait::async_trait]
    impl RpcDispatch for EchoDispatch {
        async fn dispatch(
            &self,
            method: &str,
            params: Option<Value>,
        ) -> std::result::Result<Value, FaultRecord> {
            match method {
                "echo" => Ok(params.unwrap_or(Value::Null)),
                "fail" => Err(FaultRecord {
                    code: codes::ENGINE_ERROR,
                    message: "test failure".to_string(),
                }),
                "stop" => {
                    self.stop.store(true, Ordering::SeqCst);
                    Ok(Value::Null)
                }
                _ => Err(FaultRecord {
                    code: codes::METHOD_NOT_FOUND,
                    message: format!("Method not found: {}", method),
                }),
            }
        }

        fn finished(&self) -> bool {
            self.stop.load(Ordering::SeqCst)
        }
    }

    async fn pair() -> (RpcHostHandle, RpcClient) {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let host = Transport::new(Endpoint::Tcp(port), Duration::from_secs(5));
        let client = Transport::new(Endpoint::Tcp(port), Duration::from_secs(5));
        let (hosted, connected) = tokio::join!(host.listen(), client.connect());

        let dispatch = Arc::new(EchoDispatch {
            stop: AtomicBool::new(false),
        });
        (
            RpcHost::spawn(hosted.unwrap(), dispatch),
            RpcClient::new(connected.unwrap()),
        )
    }

    #[tokio::test]
    async fn test_echo_roundtrip() {
        let (_host, mut client) = pair().await;
        let result = client
            .call_raw("echo", Some(serde_json::json!({"hello": "world"})))
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!({"hello": "world"}));
    }

    #[tokio::test]
    async fn test_handler_failure_is_remote_fault() {
        let (_host, mut client) = pair().await;
        let err = client.call_raw("fail", None).await.unwrap_err();
        match err {
            BridgeError::RemoteFault { code, message } => {
                assert_eq!(code, codes::ENGINE_ERROR);
                assert!(message.contains("test failure"));
            }
            other => panic!("Expected RemoteFault, got: {:?}", other),
        }

        // The channel stays usable after a remote fault.
        assert!(client.call_raw("echo", None).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_method_is_protocol_violation() {
        let (_host, mut client) = pair().await;
        let err = client.call_raw("launch_rockets", None).await.unwrap_err();
        assert!(matches!(err, BridgeError::ProtocolViolation { .. }));
    }

    #[tokio::test]
    async fn test_finished_dispatcher_ends_loop_after_replying() {
        let (host, mut client) = pair().await;
        client.call_raw("stop", None).await.unwrap();
        assert_eq!(host.join().await.unwrap(), HostExit::Finished);

        let err = client.call_raw("echo", None).await.unwrap_err();
        assert!(matches!(err, BridgeError::ConnectionFault { .. }));
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_loop() {
        let (mut host, _client) = pair().await;
        host.shutdown();
        tokio::time::timeout(Duration::from_secs(2), async {
            while !host.is_finished() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }
}
