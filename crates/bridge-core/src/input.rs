//! Input event records forwarded from the consumer to the engine.
//!
//! All of these are plain values: coordinates are in view pixels with the
//! origin at the top-left of the frame.

use serde::{Deserialize, Serialize};

/// Modifier keys held while an input event happened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modifiers {
    #[serde(default)]
    pub shift: bool,
    #[serde(default)]
    pub control: bool,
    #[serde(default)]
    pub alt: bool,
    #[serde(default)]
    pub command: bool,
}

impl Modifiers {
    pub const NONE: Modifiers = Modifiers {
        shift: false,
        control: false,
        alt: false,
        command: false,
    };
}

/// Keys pressed and released since the last keyboard event, plus typed text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyboardEvent {
    /// Virtual key codes that went down.
    #[serde(default)]
    pub keys_down: Vec<u32>,
    /// Virtual key codes that went up.
    #[serde(default)]
    pub keys_up: Vec<u32>,
    /// Characters produced by the key presses.
    #[serde(default)]
    pub chars: String,
    #[serde(default)]
    pub modifiers: Modifiers,
}

impl KeyboardEvent {
    /// A keyboard event that only types text.
    pub fn text(chars: impl Into<String>) -> Self {
        Self {
            chars: chars.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClickKind {
    Down,
    Up,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MouseMoveEvent {
    pub x: i32,
    pub y: i32,
    #[serde(default)]
    pub modifiers: Modifiers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MouseClickEvent {
    pub x: i32,
    pub y: i32,
    pub button: MouseButton,
    pub kind: ClickKind,
    /// 1 for a single click, 2 for a double click.
    pub click_count: u32,
    #[serde(default)]
    pub modifiers: Modifiers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MouseScrollEvent {
    pub x: i32,
    pub y: i32,
    pub delta_x: i32,
    pub delta_y: i32,
    #[serde(default)]
    pub modifiers: Modifiers,
}
