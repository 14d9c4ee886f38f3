//! Commands the consumer sends to the engine.
//!
//! `Command` is encoded adjacently tagged: the variant name is the method id
//! on the wire and its fields are the params record. Acknowledged commands
//! return `null`; `GetPixels` and `GetScrollPosition` return a record.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::frame::PixelFormat;
use crate::input::{KeyboardEvent, MouseClickEvent, MouseMoveEvent, MouseScrollEvent};
use crate::rpc::protocol::{base64_bytes, finite_f64, join_tagged, FaultRecord};

/// A remote call on the command channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum Command {
    GetPixels,
    Shutdown,
    SendKeyboardEvent(KeyboardEvent),
    SendMouseMoveEvent(MouseMoveEvent),
    SendMouseClickEvent(MouseClickEvent),
    SendMouseScrollEvent(MouseScrollEvent),
    GoForward,
    GoBack,
    Refresh,
    LoadUrl { url: String },
    LoadHtml { html: String },
    ExecuteJs { js: String },
    GetScrollPosition,
    SetZoomLevel {
        #[serde(serialize_with = "finite_f64::serialize")]
        level: f64,
    },
    OpenDevTools,
}

impl Command {
    /// Every method id the command channel accepts.
    pub const METHODS: &'static [&'static str] = &[
        "GetPixels",
        "Shutdown",
        "SendKeyboardEvent",
        "SendMouseMoveEvent",
        "SendMouseClickEvent",
        "SendMouseScrollEvent",
        "GoForward",
        "GoBack",
        "Refresh",
        "LoadUrl",
        "LoadHtml",
        "ExecuteJs",
        "GetScrollPosition",
        "SetZoomLevel",
        "OpenDevTools",
    ];

    pub fn method_name(&self) -> &'static str {
        match self {
            Command::GetPixels => "GetPixels",
            Command::Shutdown => "Shutdown",
            Command::SendKeyboardEvent(_) => "SendKeyboardEvent",
            Command::SendMouseMoveEvent(_) => "SendMouseMoveEvent",
            Command::SendMouseClickEvent(_) => "SendMouseClickEvent",
            Command::SendMouseScrollEvent(_) => "SendMouseScrollEvent",
            Command::GoForward => "GoForward",
            Command::GoBack => "GoBack",
            Command::Refresh => "Refresh",
            Command::LoadUrl { .. } => "LoadUrl",
            Command::LoadHtml { .. } => "LoadHtml",
            Command::ExecuteJs { .. } => "ExecuteJs",
            Command::GetScrollPosition => "GetScrollPosition",
            Command::SetZoomLevel { .. } => "SetZoomLevel",
            Command::OpenDevTools => "OpenDevTools",
        }
    }

    /// Decode an inbound call.
    pub fn from_call(method: &str, params: Option<Value>) -> Result<Self, FaultRecord> {
        join_tagged(Self::METHODS, method, params)
    }
}

/// Snapshot of the engine's frame buffer.
///
/// `pixels` is empty until the renderer has painted its first frame, otherwise
/// exactly `width * height * 4` bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelsResult {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    #[serde(with = "base64_bytes")]
    pub pixels: Vec<u8>,
}

impl PixelsResult {
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }
}

/// Scroll offset of the page in view pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrollPosition {
    #[serde(serialize_with = "finite_f64::serialize")]
    pub x: f64,
    #[serde(serialize_with = "finite_f64::serialize")]
    pub y: f64,
}
