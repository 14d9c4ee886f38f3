//! Engine RPC server.
//!
//! Hosts the command channel for an [`Engine`] and drives the event channel's
//! client side. Startup listens for the consumer's command connection and
//! connects to the consumer's event listener at the same time, so the two
//! processes may bring their halves up in either order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::console::ConsoleLevel;
use super::render::RenderGlue;
use super::{Engine, EngineNotification, NotificationSink};
use crate::commands::Command;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::events::BridgeEvent;
use crate::frame::FrameBuffer;
use crate::rpc::protocol::FaultRecord;
use crate::rpc::{HostExit, RpcClient, RpcDispatch, RpcHost, RpcHostHandle};
use crate::transport::Transport;

/// Engine-side endpoint pair, before the consumer has connected.
pub struct EngineRpcServer {
    config: BridgeConfig,
    frame: Arc<FrameBuffer>,
    notifier: NotificationSink,
    notifications: mpsc::UnboundedReceiver<EngineNotification>,
}

impl EngineRpcServer {
    pub fn new(config: BridgeConfig) -> Result<Self> {
        config.validate()?;
        let settings = config.frame;
        let frame = Arc::new(FrameBuffer::new(
            settings.width,
            settings.height,
            settings.format,
        ));
        let (notifier, notifications) = NotificationSink::channel();
        Ok(Self {
            config,
            frame,
            notifier,
            notifications,
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// The session's frame buffer. `GetPixels` reads from it.
    pub fn frame(&self) -> Arc<FrameBuffer> {
        self.frame.clone()
    }

    /// Paint-side handle for the renderer.
    pub fn render_glue(&self) -> RenderGlue {
        RenderGlue::new(self.frame.clone())
    }

    /// Handle for pushing engine notifications. Notifications pushed before
    /// `start` are queued and forwarded after `Ready`.
    pub fn notifier(&self) -> NotificationSink {
        self.notifier.clone()
    }

    /// Bring both channels up and start serving `engine`.
    ///
    /// Sends `Ready` once both connections exist, then returns the running session.
    pub async fn start<E: Engine>(self, engine: Arc<E>) -> Result<EngineSession> {
        let timeout = self.config.connection_timeout();
        let commands = Transport::new(self.config.command_endpoint(), timeout);
        let events = Transport::new(self.config.event_endpoint(), timeout);

        let (command_conn, event_conn) = tokio::try_join!(commands.listen(), events.connect())?;

        let mut event_client = RpcClient::new(event_conn);
        event_client.call::<_, ()>(&BridgeEvent::Ready).await?;

        let dispatch = Arc::new(EngineDispatch {
            engine: engine.clone(),
            frame: self.frame.clone(),
            stopping: AtomicBool::new(false),
        });
        let command_host = RpcHost::spawn(command_conn, dispatch);

        let engine: Arc<dyn Engine> = engine;
        let forwarder = tokio::spawn(forward_notifications(
            self.notifications,
            event_client,
            engine.clone(),
        ));

        info!(
            "Engine session started (commands on {}, events on {})",
            commands.endpoint(),
            events.endpoint()
        );
        Ok(EngineSession {
            command_host,
            forwarder,
            engine,
        })
    }
}

/// Why a session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The consumer sent `Shutdown`.
    ShutdownRequested,
    /// The consumer closed the command connection.
    ConsumerClosed,
    /// The serve loop was stopped locally.
    Stopped,
}

impl From<HostExit> for SessionEnd {
    fn from(exit: HostExit) -> Self {
        match exit {
            HostExit::Finished => SessionEnd::ShutdownRequested,
            HostExit::PeerClosed => SessionEnd::ConsumerClosed,
            HostExit::Shutdown => SessionEnd::Stopped,
        }
    }
}

/// A running engine session.
pub struct EngineSession {
    command_host: RpcHostHandle,
    forwarder: JoinHandle<Result<()>>,
    engine: Arc<dyn Engine>,
}

impl EngineSession {
    /// Wait for the session to end.
    ///
    /// Errors when the command connection breaks or a fatal configuration
    /// error (an unknown console severity) stops notification forwarding.
    /// Unless the consumer already asked for it, the engine is shut down
    /// before this returns.
    pub async fn wait(self) -> Result<SessionEnd> {
        let EngineSession {
            command_host,
            mut forwarder,
            engine,
        } = self;

        let commands_done = command_host.join();
        tokio::pin!(commands_done);
        let mut forwarding = true;

        let outcome = loop {
            tokio::select! {
                exit = &mut commands_done => break exit.map(SessionEnd::from),
                forwarded = &mut forwarder, if forwarding => {
                    forwarding = false;
                    match forwarded {
                        Ok(Ok(())) => debug!("Notification senders closed"),
                        Ok(Err(e)) => break Err(e),
                        Err(e) => {
                            break Err(BridgeError::engine(format!(
                                "notification forwarder panicked: {}",
                                e
                            )))
                        }
                    }
                }
            }
        };
        forwarder.abort();

        if !matches!(outcome, Ok(SessionEnd::ShutdownRequested)) {
            if let Err(e) = engine.shutdown().await {
                warn!("Engine shutdown failed: {}", e);
            }
        }

        match &outcome {
            Ok(end) => info!("Engine session ended: {:?}", end),
            Err(e) => warn!("Engine session failed: {}", e),
        }
        outcome
    }
}

/// Command channel service table.
struct EngineDispatch<E: Engine> {
    engine: Arc<E>,
    frame: Arc<FrameBuffer>,
    stopping: AtomicBool,
}

#[async_trait::async_trait]
impl<E: Engine> RpcDispatch for EngineDispatch<E> {
    async fn dispatch(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> std::result::Result<Value, FaultRecord> {
        let command = Command::from_call(method, params)?;
        self.execute(command).await.map_err(|e| {
            warn!("{} failed: {}", method, e);
            FaultRecord::from_error(&e)
        })
    }

    fn finished(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }
}

impl<E: Engine> EngineDispatch<E> {
    async fn execute(&self, command: Command) -> Result<Value> {
        match command {
            Command::GetPixels => return Ok(serde_json::to_value(self.frame.snapshot())?),
            Command::GetScrollPosition => {
                let position = self.engine.scroll_position().await?;
                return Ok(serde_json::to_value(position)?);
            }
            Command::Shutdown => {
                self.stopping.store(true, Ordering::SeqCst);
                self.engine.shutdown().await?;
            }
            Command::LoadUrl { url } => self.load_url(&url).await?,
            Command::LoadHtml { html } => self.engine.load_html(&html).await?,
            Command::ExecuteJs { js } => self.engine.execute_js(&js).await?,
            Command::GoBack => self.engine.go_back().await?,
            Command::GoForward => self.engine.go_forward().await?,
            Command::Refresh => self.engine.refresh().await?,
            Command::SendKeyboardEvent(event) => self.engine.keyboard_event(event).await?,
            Command::SendMouseMoveEvent(event) => self.engine.mouse_move_event(event).await?,
            Command::SendMouseClickEvent(event) => self.engine.mouse_click_event(event).await?,
            Command::SendMouseScrollEvent(event) => self.engine.mouse_scroll_event(event).await?,
            Command::SetZoomLevel { level } => self.engine.set_zoom_level(level).await?,
            Command::OpenDevTools => self.engine.open_dev_tools().await?,
        }
        Ok(Value::Null)
    }

    /// A refused navigation shows an error page instead of faulting the call.
    async fn load_url(&self, url: &str) -> Result<()> {
        match self.engine.load_url(url).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("Navigation to {} failed: {}", url, e);
                self.engine
                    .load_html(&error_page(url, &navigation_message(&e)))
                    .await
            }
        }
    }
}

fn navigation_message(err: &BridgeError) -> String {
    match err {
        BridgeError::Navigation { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

/// Send queued notifications as event calls, in order.
///
/// Losing the event channel only stops event delivery; load errors and
/// console output are still handled locally. An unknown console severity
/// ends forwarding with a configuration error.
async fn forward_notifications(
    mut notifications: mpsc::UnboundedReceiver<EngineNotification>,
    mut events: RpcClient,
    engine: Arc<dyn Engine>,
) -> Result<()> {
    let mut consumer_gone = false;

    while let Some(notification) = notifications.recv().await {
        match notification {
            EngineNotification::Event(event) => {
                if consumer_gone {
                    continue;
                }
                match events.call::<_, ()>(&event).await {
                    Ok(()) => {}
                    Err(e) if e.faults_connection() => {
                        warn!("Event channel lost; dropping further events: {}", e);
                        events.dispose().await;
                        consumer_gone = true;
                    }
                    Err(e) => warn!("{} event not delivered: {}", event.kind(), e),
                }
            }
            EngineNotification::LoadError { url, message } => {
                warn!("Load of {} failed: {}", url, message);
                if let Err(e) = engine.load_html(&error_page(&url, &message)).await {
                    warn!("Could not show error page for {}: {}", url, e);
                }
            }
            EngineNotification::ConsoleMessage {
                severity,
                message,
                source,
                line,
            } => {
                ConsoleLevel::from_severity(severity)?.emit(&message, &source, line);
            }
        }
    }

    events.dispose().await;
    Ok(())
}

/// HTML page shown in place of a page that failed to load.
pub fn error_page(url: &str, message: &str) -> String {
    format!(
        "<html><head><title>Failed to load</title></head><body>\
         <h2>Failed to load URL {}</h2><p>{}</p></body></html>",
        escape_html(url),
        escape_html(message)
    )
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::PixelsResult;
    use crate::frame::PixelFormat;
    use crate::input::{KeyboardEvent, MouseClickEvent, MouseMoveEvent, MouseScrollEvent};
    use crate::rpc::protocol::codes;
    use std::sync::Mutex;

    /// Records calls; refuses navigation to hosts ending in ".invalid".
    #[derive(Default)]
    struct RecordingEngine {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingEngine {
        fn record(&self, call: String) -> Result<()> {
            self.calls.lock().unwrap().push(call);
            Ok(())
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Engine for RecordingEngine {
        async fn load_url(&self, url: &str) -> Result<()> {
            if url.contains(".invalid") {
                return Err(BridgeError::Navigation {
                    url: url.to_string(),
                    message: "name not resolved".to_string(),
                });
            }
            self.record(format!("load_url {}", url))
        }

        async fn load_html(&self, html: &str) -> Result<()> {
            self.record(format!("load_html {}", html))
        }

        async fn execute_js(&self, js: &str) -> Result<()> {
            self.record(format!("execute_js {}", js))
        }

        async fn go_back(&self) -> Result<()> {
            self.record("go_back".into())
        }

        async fn go_forward(&self) -> Result<()> {
            self.record("go_forward".into())
        }

        async fn refresh(&self) -> Result<()> {
            self.record("refresh".into())
        }

        async fn keyboard_event(&self, event: KeyboardEvent) -> Result<()> {
            self.record(format!("keyboard {}", event.chars))
        }

        async fn mouse_move_event(&self, _event: MouseMoveEvent) -> Result<()> {
            self.record("mouse_move".into())
        }

        async fn mouse_click_event(&self, _event: MouseClickEvent) -> Result<()> {
            self.record("mouse_click".into())
        }

        async fn mouse_scroll_event(&self, _event: MouseScrollEvent) -> Result<()> {
            self.record("mouse_scroll".into())
        }

        async fn shutdown(&self) -> Result<()> {
            self.record("shutdown".into())
        }
    }

    fn dispatcher() -> (EngineDispatch<RecordingEngine>, Arc<RecordingEngine>) {
        let engine = Arc::new(RecordingEngine::default());
        let dispatch = EngineDispatch {
            engine: engine.clone(),
            frame: Arc::new(FrameBuffer::new(2, 1, PixelFormat::Bgra)),
            stopping: AtomicBool::new(false),
        };
        (dispatch, engine)
    }

    #[tokio::test]
    async fn test_load_url_reaches_engine_unchanged() {
        let (dispatch, engine) = dispatcher();
        let result = dispatch
            .dispatch("LoadUrl", Some(serde_json::json!({"url": "http://example.test"})))
            .await
            .unwrap();
        assert_eq!(result, Value::Null);
        assert_eq!(engine.calls(), vec!["load_url http://example.test"]);
    }

    #[tokio::test]
    async fn test_navigation_failure_loads_error_page() {
        let (dispatch, engine) = dispatcher();
        let result = dispatch
            .dispatch("LoadUrl", Some(serde_json::json!({"url": "http://site.invalid/<x>"})))
            .await;
        assert!(result.is_ok());

        let calls = engine.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].starts_with("load_html "));
        assert!(calls[0].contains("http://site.invalid/&lt;x&gt;"));
        assert!(calls[0].contains("name not resolved"));
    }

    #[tokio::test]
    async fn test_get_pixels_before_paint_is_empty() {
        let (dispatch, _) = dispatcher();
        let value = dispatch.dispatch("GetPixels", None).await.unwrap();
        let pixels: PixelsResult = serde_json::from_value(value).unwrap();
        assert!(pixels.is_empty());
        assert_eq!((pixels.width, pixels.height), (2, 1));

        dispatch.frame.write(&[3u8; 8]).unwrap();
        let value = dispatch.dispatch("GetPixels", None).await.unwrap();
        let pixels: PixelsResult = serde_json::from_value(value).unwrap();
        assert_eq!(pixels.pixels, vec![3u8; 8]);
    }

    #[tokio::test]
    async fn test_unknown_command_is_method_not_found() {
        let (dispatch, engine) = dispatcher();
        let fault = dispatch.dispatch("Resize", None).await.unwrap_err();
        assert_eq!(fault.code, codes::METHOD_NOT_FOUND);

        let fault = dispatch
            .dispatch("LoadUrl", Some(serde_json::json!({"href": 1})))
            .await
            .unwrap_err();
        assert_eq!(fault.code, codes::INVALID_PARAMS);
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_finishes_dispatch() {
        let (dispatch, engine) = dispatcher();
        assert!(!dispatch.finished());
        dispatch.dispatch("GoBack", None).await.unwrap();
        dispatch.dispatch("Shutdown", None).await.unwrap();
        assert!(dispatch.finished());
        assert_eq!(engine.calls(), vec!["go_back", "shutdown"]);
    }

    #[test]
    fn test_error_page_escapes_markup() {
        let page = error_page("http://a.test/?q=<script>", "bad \"thing\" & more");
        assert!(page.contains("&lt;script&gt;"));
        assert!(page.contains("bad &quot;thing&quot; &amp; more"));
        assert!(!page.contains("<script>"));
    }
}
