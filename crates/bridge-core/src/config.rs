//! Configuration for the browser bridge.
//!
//! `BridgeConfig` is the per-session surface (transport selection, endpoint
//! identities, connection timeout, frame size). It is interpreted once when a
//! manager or server is constructed. `IpcConfig` holds fixed tunables.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};
use crate::frame::{PixelFormat, BYTES_PER_PIXEL};
use crate::transport::Endpoint;

/// Fixed IPC tunables.
pub struct IpcConfig;

impl IpcConfig {
    /// Largest accepted frame payload. A 4K BGRA frame is ~33 MB raw and ~44 MB
    /// base64-encoded.
    pub const MAX_MESSAGE_SIZE: usize = 128 * 1024 * 1024;
    pub const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(50);
    /// How long `dispose` waits for an in-flight call before cancelling it.
    pub const DISPOSE_GRACE: Duration = Duration::from_secs(1);
    /// Bound on the best-effort `Shutdown` sent while disposing.
    pub const SHUTDOWN_CALL_TIMEOUT: Duration = Duration::from_secs(1);
    /// Room left in a `GetPixels` reply for the JSON-RPC envelope and the
    /// non-pixel fields.
    pub const PIXELS_REPLY_OVERHEAD: usize = 1024;
}

/// Frame dimensions and channel order produced by the engine's renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSettings {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub format: PixelFormat,
}

impl FrameSettings {
    /// Upper bound on the framed size of a `GetPixels` reply for this frame,
    /// or `None` if it does not fit in a `usize`.
    ///
    /// Pixels travel base64 encoded: every 3 raw bytes become 4.
    pub fn pixels_reply_len(&self) -> Option<usize> {
        let raw = u64::from(self.width)
            .checked_mul(u64::from(self.height))?
            .checked_mul(BYTES_PER_PIXEL as u64)?;
        let encoded = raw.div_ceil(3).checked_mul(4)?;
        let total = encoded.checked_add(IpcConfig::PIXELS_REPLY_OVERHEAD as u64)?;
        usize::try_from(total).ok()
    }
}

impl Default for FrameSettings {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            format: PixelFormat::Bgra,
        }
    }
}

/// Session configuration shared by both processes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Use named pipes instead of loopback TCP.
    pub prefer_pipes: bool,
    /// Pipe carrying commands (consumer -> engine).
    pub in_pipe_name: String,
    /// Pipe carrying events (engine -> consumer).
    pub out_pipe_name: String,
    /// Port carrying commands (consumer -> engine).
    pub in_port: u16,
    /// Port carrying events (engine -> consumer).
    pub out_port: u16,
    pub connection_timeout_ms: u64,
    pub frame: FrameSettings,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            prefer_pipes: true,
            in_pipe_name: "BrowserBridgeIn".to_string(),
            out_pipe_name: "BrowserBridgeOut".to_string(),
            in_port: 5555,
            out_port: 5556,
            connection_timeout_ms: 7000,
            frame: FrameSettings::default(),
        }
    }
}

impl BridgeConfig {
    /// Loopback TCP configuration on the given ports.
    pub fn tcp(in_port: u16, out_port: u16) -> Self {
        Self {
            prefer_pipes: false,
            in_port,
            out_port,
            ..Default::default()
        }
    }

    /// Named pipe configuration with the given pipe names.
    pub fn pipes(in_pipe_name: impl Into<String>, out_pipe_name: impl Into<String>) -> Self {
        Self {
            prefer_pipes: true,
            in_pipe_name: in_pipe_name.into(),
            out_pipe_name: out_pipe_name.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_frame(mut self, width: u32, height: u32, format: PixelFormat) -> Self {
        self.frame = FrameSettings {
            width,
            height,
            format,
        };
        self
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    /// Endpoint of the command channel. The engine listens, the consumer connects.
    pub fn command_endpoint(&self) -> Endpoint {
        if self.prefer_pipes {
            Endpoint::Pipe(self.in_pipe_name.clone())
        } else {
            Endpoint::Tcp(self.in_port)
        }
    }

    /// Endpoint of the event channel. The consumer listens, the engine connects.
    pub fn event_endpoint(&self) -> Endpoint {
        if self.prefer_pipes {
            Endpoint::Pipe(self.out_pipe_name.clone())
        } else {
            Endpoint::Tcp(self.out_port)
        }
    }

    /// Check the configuration for values that can never produce a working session.
    pub fn validate(&self) -> Result<()> {
        if self.prefer_pipes {
            if self.in_pipe_name.trim().is_empty() || self.out_pipe_name.trim().is_empty() {
                return Err(config_error("pipe names must not be empty"));
            }
            if self.in_pipe_name == self.out_pipe_name {
                return Err(config_error("in and out pipe names must differ"));
            }
        } else {
            if self.in_port == 0 || self.out_port == 0 {
                return Err(config_error("ports must be non-zero"));
            }
            if self.in_port == self.out_port {
                return Err(config_error("in and out ports must differ"));
            }
        }
        if self.connection_timeout_ms == 0 {
            return Err(config_error("connection timeout must be non-zero"));
        }
        if self.frame.width == 0 || self.frame.height == 0 {
            return Err(config_error("frame size must be non-zero"));
        }
        match self.frame.pixels_reply_len() {
            Some(len) if len <= IpcConfig::MAX_MESSAGE_SIZE => {}
            _ => {
                return Err(BridgeError::Config {
                    message: format!(
                        "a {}x{} frame does not fit in one {} byte message",
                        self.frame.width,
                        self.frame.height,
                        IpcConfig::MAX_MESSAGE_SIZE
                    ),
                })
            }
        }
        Ok(())
    }

    /// Load and validate a JSON configuration file. Missing fields take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| BridgeError::Io {
            message: format!("Failed to read config {}: {}", path.display(), e),
            source: Some(e),
        })?;
        let config: BridgeConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }
}

fn config_error(message: &str) -> BridgeError {
    BridgeError::Config {
        message: message.to_string(),
    }
}
