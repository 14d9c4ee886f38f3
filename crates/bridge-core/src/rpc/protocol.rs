//! Wire format shared by the command and event channels.
//!
//! Every message is a 4-byte big-endian length prefix followed by a UTF-8
//! JSON-RPC 2.0 payload:
//!
//! ```text
//! [u32 BE: len][UTF-8 JSON bytes of len]
//! ```
//!
//! Each request is answered by exactly one response carrying either a result
//! or a fault record. There are no out-of-band messages and no batching.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::config::IpcConfig;
use crate::error::{BridgeError, Result};

/// JSON-RPC error codes used in fault records.
pub mod codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    pub const ENGINE_ERROR: i32 = -32000;
    pub const NAVIGATION_ERROR: i32 = -32001;
    pub const INVALID_STATE: i32 = -32002;

    /// Codes meaning the peer could not make sense of what was sent.
    pub fn is_protocol_violation(code: i32) -> bool {
        matches!(
            code,
            PARSE_ERROR | INVALID_REQUEST | METHOD_NOT_FOUND | INVALID_PARAMS
        )
    }
}

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    pub id: Option<u64>,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: Option<Value>, id: u64) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
            id: Some(id),
        }
    }
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FaultRecord>,
    pub id: Option<u64>,
}

impl RpcResponse {
    pub fn success(id: Option<u64>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Option<u64>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(FaultRecord { code, message }),
            id,
        }
    }
}

/// Error description sent back when the peer's handler fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultRecord {
    pub code: i32,
    pub message: String,
}

impl FaultRecord {
    /// Describe a local handler failure for the calling peer.
    pub fn from_error(err: &BridgeError) -> Self {
        Self {
            code: err.to_rpc_error_code(),
            message: err.to_string(),
        }
    }

    /// Turn a received fault record into the caller-facing error.
    pub fn into_error(self) -> BridgeError {
        if codes::is_protocol_violation(self.code) {
            BridgeError::ProtocolViolation {
                message: self.message,
                remote: true,
            }
        } else {
            BridgeError::RemoteFault {
                code: self.code,
                message: self.message,
            }
        }
    }
}

/// Split an adjacently tagged (`method` / `params`) value into a method id and
/// its encoded arguments.
pub fn split_tagged<T: Serialize>(value: &T) -> Result<(String, Option<Value>)> {
    let mut encoded = serde_json::to_value(value)?;
    let object = encoded
        .as_object_mut()
        .ok_or_else(|| BridgeError::protocol("tagged message did not encode to an object"))?;
    let method = match object.remove("method") {
        Some(Value::String(method)) => method,
        _ => return Err(BridgeError::protocol("tagged message has no method id")),
    };
    Ok((method, object.remove("params")))
}

/// Rebuild an adjacently tagged value from a method id and its arguments.
///
/// `known` lists every method id the target type accepts, so an unknown id is
/// told apart from malformed arguments.
pub fn join_tagged<T: DeserializeOwned>(
    known: &[&str],
    method: &str,
    params: Option<Value>,
) -> std::result::Result<T, FaultRecord> {
    if !known.contains(&method) {
        return Err(FaultRecord {
            code: codes::METHOD_NOT_FOUND,
            message: format!("Method not found: {}", method),
        });
    }

    let mut object = serde_json::Map::new();
    object.insert("method".to_string(), Value::String(method.to_string()));
    if let Some(params) = params.filter(|p| !p.is_null()) {
        object.insert("params".to_string(), params);
    }

    serde_json::from_value(Value::Object(object)).map_err(|e| FaultRecord {
        code: codes::INVALID_PARAMS,
        message: format!("Invalid params for {}: {}", method, e),
    })
}

/// Serde adapter carrying raw bytes as a base64 string.
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Serde adapter refusing NaN and infinities, which JSON cannot carry.
///
/// Plain `f64` fields encode those as `null`, which the peer then rejects as
/// malformed params. Failing the encode keeps the error on the sending side.
pub mod finite_f64 {
    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if !value.is_finite() {
            return Err(serde::ser::Error::custom(format!(
                "{} cannot be encoded as a JSON number",
                value
            )));
        }
        serializer.serialize_f64(*value)
    }
}

/// Read a length-prefixed frame from an async reader.
///
/// Frame format: `[4-byte BE u32 length][payload bytes]`
///
/// Returns `None` on clean EOF (peer closed connection).
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;

    if len > IpcConfig::MAX_MESSAGE_SIZE {
        return Err(BridgeError::protocol(format!(
            "frame size {} exceeds maximum {}",
            len,
            IpcConfig::MAX_MESSAGE_SIZE
        )));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(Some(payload))
}

/// Write a length-prefixed frame to an async writer.
///
/// Frame format: `[4-byte BE u32 length][payload bytes]`
pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() > IpcConfig::MAX_MESSAGE_SIZE {
        return Err(BridgeError::protocol(format!(
            "outgoing frame size {} exceeds maximum {}",
            payload.len(),
            IpcConfig::MAX_MESSAGE_SIZE
        )));
    }
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "method", content = "params")]
    enum Sample {
        Ping,
        Say { text: String },
    }

    const SAMPLE_METHODS: &[&str] = &["Ping", "Say"];

    #[derive(Debug, Serialize)]
    #[serde(tag = "method", content = "params")]
    enum Gauge {
        Set {
            #[serde(serialize_with = "finite_f64::serialize")]
            value: f64,
        },
    }

    #[test]
    fn test_response_success_omits_error() {
        let resp = RpcResponse::success(Some(1), serde_json::json!(true));
        let json = serde_json::to_string(&resp).unwrap();

        assert!(json.contains("\"result\""));
        assert!(!json.contains("\"error\""));
    }

    #[test]
    fn test_fault_record_classification() {
        let violation = FaultRecord {
            code: codes::METHOD_NOT_FOUND,
            message: "Method not found: Nope".into(),
        };
        assert!(matches!(
            violation.into_error(),
            BridgeError::ProtocolViolation { remote: true, .. }
        ));

        let remote = FaultRecord {
            code: codes::ENGINE_ERROR,
            message: "renderer gone".into(),
        };
        assert!(matches!(
            remote.into_error(),
            BridgeError::RemoteFault { code: -32000, .. }
        ));
    }

    #[test]
    fn test_tagged_split_and_join() {
        let (method, params) = split_tagged(&Sample::Say { text: "hi".into() }).unwrap();
        assert_eq!(method, "Say");
        assert_eq!(params, Some(serde_json::json!({"text": "hi"})));

        let (method, params) = split_tagged(&Sample::Ping).unwrap();
        assert_eq!(method, "Ping");
        assert!(params.is_none());

        let joined: Sample = join_tagged(SAMPLE_METHODS, "Ping", Some(Value::Null)).unwrap();
        assert_eq!(joined, Sample::Ping);
    }

    #[test]
    fn test_join_distinguishes_unknown_method_from_bad_params() {
        let unknown = join_tagged::<Sample>(SAMPLE_METHODS, "Launch", None).unwrap_err();
        assert_eq!(unknown.code, codes::METHOD_NOT_FOUND);

        let bad = join_tagged::<Sample>(SAMPLE_METHODS, "Say", Some(serde_json::json!(42)))
            .unwrap_err();
        assert_eq!(bad.code, codes::INVALID_PARAMS);
    }

    #[test]
    fn test_non_finite_floats_fail_to_encode() {
        let (_, params) = split_tagged(&Gauge::Set { value: 1.5 }).unwrap();
        assert_eq!(params, Some(serde_json::json!({"value": 1.5})));

        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = split_tagged(&Gauge::Set { value }).unwrap_err();
            assert!(matches!(err, BridgeError::Json { .. }));
            assert!(!err.faults_connection());
        }
    }

    #[tokio::test]
    async fn test_frame_read_empty_stream_returns_none() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        let result = read_frame(&mut cursor).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_frame_read_oversized_is_protocol_violation() {
        let huge_len: u32 = (IpcConfig::MAX_MESSAGE_SIZE + 1) as u32;
        let mut buf = Vec::new();
        buf.extend_from_slice(&huge_len.to_be_bytes());
        buf.extend_from_slice(&[0u8; 8]);

        let mut cursor = std::io::Cursor::new(buf);
        let result = read_frame(&mut cursor).await;
        assert!(matches!(result, Err(BridgeError::ProtocolViolation { .. })));
    }

    #[tokio::test]
    async fn test_frame_read_truncated_payload_is_error() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&16u32.to_be_bytes());
        buf.extend_from_slice(b"short");

        let mut cursor = std::io::Cursor::new(buf);
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(BridgeError::Io { .. })
        ));
    }
}
