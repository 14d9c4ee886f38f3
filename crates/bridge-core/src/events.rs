//! Notifications the engine sends to the consumer.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::rpc::protocol::{finite_f64, join_tagged, FaultRecord};

/// A remote call on the event channel. Fire-and-forget: the only reply is an
/// acknowledgement or a fault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum BridgeEvent {
    UrlChange { url: String },
    LoadStart { url: String },
    LoadFinish { url: String },
    TitleChange { title: String },
    Fullscreen { fullscreen: bool },
    ProgressChange {
        #[serde(serialize_with = "finite_f64::serialize")]
        progress: f64,
    },
    /// Both channels are up and the engine accepts commands.
    Ready,
    /// Whether an editable element currently holds focus.
    InputFocusChange { focused: bool },
}

/// Discriminant of a `BridgeEvent`, used to key observer lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    UrlChange,
    LoadStart,
    LoadFinish,
    TitleChange,
    Fullscreen,
    ProgressChange,
    Ready,
    InputFocusChange,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::UrlChange => "UrlChange",
            EventKind::LoadStart => "LoadStart",
            EventKind::LoadFinish => "LoadFinish",
            EventKind::TitleChange => "TitleChange",
            EventKind::Fullscreen => "Fullscreen",
            EventKind::ProgressChange => "ProgressChange",
            EventKind::Ready => "Ready",
            EventKind::InputFocusChange => "InputFocusChange",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl BridgeEvent {
    /// Every method id the event channel accepts.
    pub const METHODS: &'static [&'static str] = &[
        "UrlChange",
        "LoadStart",
        "LoadFinish",
        "TitleChange",
        "Fullscreen",
        "ProgressChange",
        "Ready",
        "InputFocusChange",
    ];

    pub fn kind(&self) -> EventKind {
        match self {
            BridgeEvent::UrlChange { .. } => EventKind::UrlChange,
            BridgeEvent::LoadStart { .. } => EventKind::LoadStart,
            BridgeEvent::LoadFinish { .. } => EventKind::LoadFinish,
            BridgeEvent::TitleChange { .. } => EventKind::TitleChange,
            BridgeEvent::Fullscreen { .. } => EventKind::Fullscreen,
            BridgeEvent::ProgressChange { .. } => EventKind::ProgressChange,
            BridgeEvent::Ready => EventKind::Ready,
            BridgeEvent::InputFocusChange { .. } => EventKind::InputFocusChange,
        }
    }

    /// Decode an inbound call.
    pub fn from_call(method: &str, params: Option<Value>) -> Result<Self, FaultRecord> {
        join_tagged(Self::METHODS, method, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::protocol::split_tagged;

    #[test]
    fn test_kind_names_match_wire_ids() {
        let events = [
            BridgeEvent::UrlChange { url: "a".into() },
            BridgeEvent::Fullscreen { fullscreen: true },
            BridgeEvent::ProgressChange { progress: 0.5 },
            BridgeEvent::Ready,
        ];
        for event in events {
            let (method, _) = split_tagged(&event).unwrap();
            assert_eq!(method, event.kind().as_str());
        }
    }

    #[test]
    fn test_from_call_decodes_progress() {
        let event =
            BridgeEvent::from_call("ProgressChange", Some(serde_json::json!({"progress": 0.25})))
                .unwrap();
        assert_eq!(event, BridgeEvent::ProgressChange { progress: 0.25 });
    }

    #[test]
    fn test_from_call_requires_params() {
        assert!(BridgeEvent::from_call("TitleChange", None).is_err());
        assert_eq!(BridgeEvent::from_call("Ready", None).unwrap(), BridgeEvent::Ready);
    }
}
