//! Engine side of the bridge.
//!
//! The rendering engine itself is an opaque collaborator behind the [`Engine`]
//! trait. [`EngineRpcServer`] hosts the command channel for it, forwards its
//! notifications onto the event channel and owns the shared frame buffer the
//! engine's paint callback writes into through [`RenderGlue`].

mod console;
mod render;
mod server;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::commands::ScrollPosition;
use crate::error::Result;
use crate::events::BridgeEvent;
use crate::input::{KeyboardEvent, MouseClickEvent, MouseMoveEvent, MouseScrollEvent};

pub use console::{ConsoleLevel, ConsoleSeverity};
pub use render::{RenderGlue, ViewRect};
pub use server::{error_page, EngineRpcServer, EngineSession, SessionEnd};

/// Capability surface of a rendering engine.
///
/// Navigation calls return once the engine has accepted the request; the
/// load lifecycle itself is reported through a [`NotificationSink`].
/// Commands that have nothing to act on (going back with no history) succeed
/// as no-ops.
#[async_trait]
pub trait Engine: Send + Sync + 'static {
    async fn load_url(&self, url: &str) -> Result<()>;

    async fn load_html(&self, html: &str) -> Result<()>;

    async fn execute_js(&self, js: &str) -> Result<()>;

    async fn go_back(&self) -> Result<()>;

    async fn go_forward(&self) -> Result<()>;

    async fn refresh(&self) -> Result<()>;

    async fn keyboard_event(&self, event: KeyboardEvent) -> Result<()>;

    async fn mouse_move_event(&self, event: MouseMoveEvent) -> Result<()>;

    async fn mouse_click_event(&self, event: MouseClickEvent) -> Result<()>;

    async fn mouse_scroll_event(&self, event: MouseScrollEvent) -> Result<()>;

    async fn set_zoom_level(&self, _level: f64) -> Result<()> {
        Ok(())
    }

    async fn open_dev_tools(&self) -> Result<()> {
        Ok(())
    }

    async fn scroll_position(&self) -> Result<ScrollPosition> {
        Ok(ScrollPosition::default())
    }

    /// Release the engine's resources. Called once, when the consumer asks to shut down.
    async fn shutdown(&self) -> Result<()>;
}

/// Something the engine reports from its own threads.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineNotification {
    /// Forwarded to the consumer as-is.
    Event(BridgeEvent),
    /// A load failed after navigation started; replaced by an error page.
    LoadError { url: String, message: String },
    /// A page wrote to its console.
    ConsoleMessage {
        severity: i32,
        message: String,
        source: String,
        line: u32,
    },
}

/// Non-blocking handle the engine uses to report notifications.
///
/// Cloneable and usable from any thread, including the render thread.
/// Notifications are forwarded in the order they were pushed.
#[derive(Debug, Clone)]
pub struct NotificationSink {
    tx: mpsc::UnboundedSender<EngineNotification>,
}

impl NotificationSink {
    /// A sink and the receiving end it feeds.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EngineNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a notification. Dropped silently once the session has ended.
    pub fn push(&self, notification: EngineNotification) {
        if self.tx.send(notification).is_err() {
            debug!("Notification dropped: session has ended");
        }
    }

    pub fn url_change(&self, url: impl Into<String>) {
        self.push(EngineNotification::Event(BridgeEvent::UrlChange { url: url.into() }));
    }

    pub fn load_start(&self, url: impl Into<String>) {
        self.push(EngineNotification::Event(BridgeEvent::LoadStart { url: url.into() }));
    }

    pub fn load_finish(&self, url: impl Into<String>) {
        self.push(EngineNotification::Event(BridgeEvent::LoadFinish { url: url.into() }));
    }

    pub fn title_change(&self, title: impl Into<String>) {
        self.push(EngineNotification::Event(BridgeEvent::TitleChange {
            title: title.into(),
        }));
    }

    pub fn fullscreen(&self, fullscreen: bool) {
        self.push(EngineNotification::Event(BridgeEvent::Fullscreen { fullscreen }));
    }

    pub fn progress_change(&self, progress: f64) {
        self.push(EngineNotification::Event(BridgeEvent::ProgressChange { progress }));
    }

    pub fn input_focus_change(&self, focused: bool) {
        self.push(EngineNotification::Event(BridgeEvent::InputFocusChange { focused }));
    }

    pub fn load_error(&self, url: impl Into<String>, message: impl Into<String>) {
        self.push(EngineNotification::LoadError {
            url: url.into(),
            message: message.into(),
        });
    }

    pub fn console_message(
        &self,
        severity: i32,
        message: impl Into<String>,
        source: impl Into<String>,
        line: u32,
    ) {
        self.push(EngineNotification::ConsoleMessage {
            severity,
            message: message.into(),
            source: source.into(),
            line,
        });
    }

    /// Whether the forwarding side is still running.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}
