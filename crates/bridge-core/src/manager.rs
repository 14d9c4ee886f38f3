//! Consumer-side communications manager.
//!
//! `CommunicationsManager` owns the client role of the command channel and the
//! host role of the event channel. Its proxy methods mirror the engine's
//! command surface; inbound events are reposted onto the home context
//! captured at construction.
//!
//! # Thread Safety
//!
//! Every proxy call holds one async mutex for its full round trip, so at most
//! one command is on the wire at any time and responses can never be paired
//! with the wrong request. `dispose` takes the same mutex; if a call is stuck
//! waiting for a peer that will never answer, `dispose` cancels it after
//! `IpcConfig::DISPOSE_GRACE` instead of waiting forever.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::commands::{Command, PixelsResult, ScrollPosition};
use crate::config::{BridgeConfig, IpcConfig};
use crate::error::{BridgeError, Result};
use crate::events::{BridgeEvent, EventKind};
use crate::home::{HomeContext, SerialTaskContext};
use crate::input::{KeyboardEvent, MouseClickEvent, MouseMoveEvent, MouseScrollEvent};
use crate::observers::{EventObservers, ObserverId};
use crate::rpc::protocol::FaultRecord;
use crate::rpc::{RpcClient, RpcDispatch, RpcHost, RpcHostHandle};
use crate::transport::Transport;

/// Lifecycle of a communications manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    NotConnected,
    Connected,
    /// A call broke the command connection; every later call fails with that fault.
    Faulted,
    Disposed,
}

impl std::fmt::Display for ManagerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ManagerState::NotConnected => "not connected",
            ManagerState::Connected => "connected",
            ManagerState::Faulted => "faulted",
            ManagerState::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

/// The fault that moved the manager to `Faulted`, replayed to later callers.
#[derive(Debug, Clone)]
struct Fault {
    protocol: bool,
    endpoint: String,
    message: String,
}

impl Fault {
    fn record(err: &BridgeError, endpoint: String) -> Self {
        match err {
            BridgeError::ProtocolViolation { message, .. } => Fault {
                protocol: true,
                endpoint,
                message: message.clone(),
            },
            BridgeError::ConnectionFault { endpoint, message } => Fault {
                protocol: false,
                endpoint: endpoint.clone(),
                message: message.clone(),
            },
            other => Fault {
                protocol: false,
                endpoint,
                message: other.to_string(),
            },
        }
    }

    fn to_error(&self) -> BridgeError {
        if self.protocol {
            BridgeError::protocol(&self.message)
        } else {
            BridgeError::fault(&self.endpoint, &self.message)
        }
    }
}

/// Everything guarded by the call-serialization mutex.
struct Channels {
    commands: Option<RpcClient>,
    events: Option<RpcHostHandle>,
    fault: Option<Fault>,
}

/// Event channel service table: reposts every event onto the home context.
struct EventIngress {
    home: Arc<dyn HomeContext>,
    observers: Arc<EventObservers>,
}

impl EventIngress {
    /// Queue delivery and return at once; observers run later on the home context.
    fn repost(&self, event: BridgeEvent) {
        let observers = self.observers.clone();
        let kind = event.kind();
        let job = Box::new(move || {
            observers.notify(&event);
        });
        if let Err(e) = self.home.post(job) {
            warn!("Dropping {} event: {}", kind, e);
        }
    }
}

#[async_trait::async_trait]
impl RpcDispatch for EventIngress {
    async fn dispatch(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> std::result::Result<Value, FaultRecord> {
        let event = BridgeEvent::from_call(method, params)?;
        debug!("Event received: {:?}", event);
        self.repost(event);
        Ok(Value::Null)
    }
}

/// Consumer's handle on a running engine.
pub struct CommunicationsManager {
    config: BridgeConfig,
    home: Arc<dyn HomeContext>,
    observers: Arc<EventObservers>,
    channels: Mutex<Channels>,
    state: StdMutex<ManagerState>,
    disposing: AtomicBool,
    cancel_tx: watch::Sender<bool>,
}

impl CommunicationsManager {
    /// Create a manager whose events are delivered on the caller's tokio runtime.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: BridgeConfig) -> Result<Self> {
        let home = SerialTaskContext::capture()?;
        Self::with_home_context(config, Arc::new(home))
    }

    /// Create a manager delivering events through `home`.
    pub fn with_home_context(config: BridgeConfig, home: Arc<dyn HomeContext>) -> Result<Self> {
        config.validate()?;
        let (cancel_tx, _) = watch::channel(false);
        Ok(Self {
            config,
            home,
            observers: Arc::new(EventObservers::new()),
            channels: Mutex::new(Channels {
                commands: None,
                events: None,
                fault: None,
            }),
            state: StdMutex::new(ManagerState::NotConnected),
            disposing: AtomicBool::new(false),
            cancel_tx,
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn state(&self) -> ManagerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Observer registry. Registrations are owned by the consumer and removed
    /// with `EventObservers::unsubscribe`.
    pub fn observers(&self) -> &EventObservers {
        &self.observers
    }

    /// Open the command channel's client connection.
    pub async fn connect(&self) -> Result<()> {
        let mut channels = self.lock_channels("Connect").await?;
        self.ensure_not_faulted(&channels)?;
        if channels.commands.is_some() {
            return Err(BridgeError::InvalidState {
                operation: "Connect",
                expected: "an unopened command channel",
                actual: "already connected".to_string(),
            });
        }

        let transport = Transport::new(
            self.config.command_endpoint(),
            self.config.connection_timeout(),
        );
        let connection = self.cancellable(transport.connect()).await?;
        channels.commands = Some(RpcClient::new(connection));
        self.set_state(ManagerState::Connected);
        info!("Command channel connected on {}", transport.endpoint());
        Ok(())
    }

    /// Start the event channel's host and wait for the engine to connect.
    pub async fn listen(&self) -> Result<()> {
        let mut channels = self.lock_channels("Listen").await?;
        self.ensure_not_faulted(&channels)?;
        if channels.events.is_some() {
            return Err(BridgeError::InvalidState {
                operation: "Listen",
                expected: "an unopened event channel",
                actual: "already listening".to_string(),
            });
        }

        let transport = Transport::new(
            self.config.event_endpoint(),
            self.config.connection_timeout(),
        );
        let connection = self.cancellable(transport.listen()).await?;
        let ingress = Arc::new(EventIngress {
            home: self.home.clone(),
            observers: self.observers.clone(),
        });
        channels.events = Some(RpcHost::spawn(connection, ingress));
        self.set_state(ManagerState::Connected);
        info!("Event channel accepted engine on {}", transport.endpoint());
        Ok(())
    }

    /// Fetch the engine's current frame. Empty until the first paint.
    pub async fn get_pixels(&self) -> Result<PixelsResult> {
        self.invoke(Command::GetPixels).await
    }

    /// Ask the engine to shut down.
    pub async fn shutdown(&self) -> Result<()> {
        self.invoke(Command::Shutdown).await
    }

    pub async fn go_forward(&self) -> Result<()> {
        self.invoke(Command::GoForward).await
    }

    pub async fn go_back(&self) -> Result<()> {
        self.invoke(Command::GoBack).await
    }

    pub async fn refresh(&self) -> Result<()> {
        self.invoke(Command::Refresh).await
    }

    pub async fn load_url(&self, url: impl Into<String>) -> Result<()> {
        self.invoke(Command::LoadUrl { url: url.into() }).await
    }

    pub async fn load_html(&self, html: impl Into<String>) -> Result<()> {
        self.invoke(Command::LoadHtml { html: html.into() }).await
    }

    pub async fn execute_js(&self, js: impl Into<String>) -> Result<()> {
        self.invoke(Command::ExecuteJs { js: js.into() }).await
    }

    pub async fn send_keyboard_event(&self, event: KeyboardEvent) -> Result<()> {
        self.invoke(Command::SendKeyboardEvent(event)).await
    }

    pub async fn send_mouse_move_event(&self, event: MouseMoveEvent) -> Result<()> {
        self.invoke(Command::SendMouseMoveEvent(event)).await
    }

    pub async fn send_mouse_click_event(&self, event: MouseClickEvent) -> Result<()> {
        self.invoke(Command::SendMouseClickEvent(event)).await
    }

    pub async fn send_mouse_scroll_event(&self, event: MouseScrollEvent) -> Result<()> {
        self.invoke(Command::SendMouseScrollEvent(event)).await
    }

    pub async fn get_scroll_position(&self) -> Result<ScrollPosition> {
        self.invoke(Command::GetScrollPosition).await
    }

    pub async fn set_zoom_level(&self, level: f64) -> Result<()> {
        self.invoke(Command::SetZoomLevel { level }).await
    }

    pub async fn open_dev_tools(&self) -> Result<()> {
        self.invoke(Command::OpenDevTools).await
    }

    /// Tear down both channels. Idempotent and never fails.
    ///
    /// Sends `Shutdown` best-effort first, then releases every transport even
    /// if the engine is already gone.
    pub async fn dispose(&self) {
        if self.disposing.swap(true, Ordering::SeqCst) {
            debug!("Communications manager already disposed");
            return;
        }

        let (mut channels, cancelled_call) =
            match tokio::time::timeout(IpcConfig::DISPOSE_GRACE, self.channels.lock()).await {
                Ok(guard) => (guard, false),
                Err(_) => {
                    warn!("A command call is still waiting on the engine; cancelling it");
                    let _ = self.cancel_tx.send(true);
                    (self.channels.lock().await, true)
                }
            };

        if !cancelled_call && channels.fault.is_none() {
            if let Some(client) = channels.commands.as_mut() {
                let shutdown = client.call::<_, ()>(&Command::Shutdown);
                match tokio::time::timeout(IpcConfig::SHUTDOWN_CALL_TIMEOUT, shutdown).await {
                    Ok(Ok(())) => debug!("Engine acknowledged shutdown"),
                    Ok(Err(e)) => debug!("Ignoring shutdown fault while disposing: {}", e),
                    Err(_) => debug!("Engine did not acknowledge shutdown in time"),
                }
            }
        }

        let _ = self.cancel_tx.send(true);

        if let Some(mut client) = channels.commands.take() {
            client.dispose().await;
        }
        if let Some(mut host) = channels.events.take() {
            host.shutdown();
            if tokio::time::timeout(IpcConfig::SHUTDOWN_CALL_TIMEOUT, host.join())
                .await
                .is_err()
            {
                debug!("Event host did not stop in time; aborted");
            }
        }

        self.set_state(ManagerState::Disposed);
        info!("Communications manager disposed");
    }

    // Typed observer registration. Each returns an id for `unsubscribe`.

    pub fn on_url_change<F>(&self, f: F) -> ObserverId
    where
        F: Fn(&str) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.observers
            .subscribe(EventKind::UrlChange, move |event| match event {
                BridgeEvent::UrlChange { url } => f(url),
                _ => Ok(()),
            })
    }

    pub fn on_load_start<F>(&self, f: F) -> ObserverId
    where
        F: Fn(&str) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.observers
            .subscribe(EventKind::LoadStart, move |event| match event {
                BridgeEvent::LoadStart { url } => f(url),
                _ => Ok(()),
            })
    }

    pub fn on_load_finish<F>(&self, f: F) -> ObserverId
    where
        F: Fn(&str) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.observers
            .subscribe(EventKind::LoadFinish, move |event| match event {
                BridgeEvent::LoadFinish { url } => f(url),
                _ => Ok(()),
            })
    }

    pub fn on_title_change<F>(&self, f: F) -> ObserverId
    where
        F: Fn(&str) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.observers
            .subscribe(EventKind::TitleChange, move |event| match event {
                BridgeEvent::TitleChange { title } => f(title),
                _ => Ok(()),
            })
    }

    pub fn on_fullscreen<F>(&self, f: F) -> ObserverId
    where
        F: Fn(bool) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.observers
            .subscribe(EventKind::Fullscreen, move |event| match event {
                BridgeEvent::Fullscreen { fullscreen } => f(*fullscreen),
                _ => Ok(()),
            })
    }

    pub fn on_progress_change<F>(&self, f: F) -> ObserverId
    where
        F: Fn(f64) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.observers
            .subscribe(EventKind::ProgressChange, move |event| match event {
                BridgeEvent::ProgressChange { progress } => f(*progress),
                _ => Ok(()),
            })
    }

    pub fn on_ready<F>(&self, f: F) -> ObserverId
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.observers.subscribe(EventKind::Ready, move |_| f())
    }

    pub fn on_input_focus_change<F>(&self, f: F) -> ObserverId
    where
        F: Fn(bool) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.observers
            .subscribe(EventKind::InputFocusChange, move |event| match event {
                BridgeEvent::InputFocusChange { focused } => f(*focused),
                _ => Ok(()),
            })
    }

    async fn invoke<R: DeserializeOwned>(&self, command: Command) -> Result<R> {
        let operation = command.method_name();
        let mut channels = self.lock_channels(operation).await?;
        self.ensure_not_faulted(&channels)?;

        let client = match channels.commands.as_mut() {
            Some(client) => client,
            None => {
                return Err(BridgeError::InvalidState {
                    operation,
                    expected: "a connected command channel",
                    actual: self.state().to_string(),
                })
            }
        };
        let endpoint = client.endpoint().to_string();

        let result = self.cancellable(client.call::<Command, R>(&command)).await;

        if let Err(e) = &result {
            if e.faults_connection() {
                warn!("{} faulted the command channel: {}", operation, e);
                channels.fault = Some(Fault::record(e, endpoint));
                self.set_state(ManagerState::Faulted);
            }
        }
        result
    }

    /// Race `future` against disposal so a stuck caller is released.
    async fn cancellable<T>(&self, future: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        let mut cancel_rx = self.cancel_tx.subscribe();
        tokio::select! {
            result = future => result,
            _ = wait_cancelled(&mut cancel_rx) => Err(BridgeError::Disposed),
        }
    }

    /// Take the call mutex, failing fast once disposal has begun.
    async fn lock_channels(
        &self,
        operation: &'static str,
    ) -> Result<tokio::sync::MutexGuard<'_, Channels>> {
        if self.disposing.load(Ordering::SeqCst) {
            debug!("{} rejected: manager disposed", operation);
            return Err(BridgeError::Disposed);
        }
        let guard = self.channels.lock().await;
        if self.disposing.load(Ordering::SeqCst) {
            return Err(BridgeError::Disposed);
        }
        Ok(guard)
    }

    fn ensure_not_faulted(&self, channels: &Channels) -> Result<()> {
        match &channels.fault {
            Some(fault) => Err(fault.to_error()),
            None => Ok(()),
        }
    }

    fn set_state(&self, next: ManagerState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        // Disposed and Faulted are never left.
        let locked = match *state {
            ManagerState::Disposed => true,
            ManagerState::Faulted => next != ManagerState::Disposed,
            _ => false,
        };
        if !locked {
            *state = next;
        }
    }
}

async fn wait_cancelled(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|cancelled| *cancelled).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::home::PumpedContext;
    use crate::transport::Endpoint;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    fn tcp_config(timeout: Duration) -> BridgeConfig {
        BridgeConfig::tcp(free_port(), free_port()).with_timeout(timeout)
    }

    #[tokio::test]
    async fn test_commands_before_connect_fail_fast() {
        let manager = CommunicationsManager::new(tcp_config(Duration::from_secs(1))).unwrap();
        assert_eq!(manager.state(), ManagerState::NotConnected);

        let err = manager.go_back().await.unwrap_err();
        assert!(matches!(err, BridgeError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_dispose_twice_and_calls_after_dispose() {
        let manager = CommunicationsManager::new(tcp_config(Duration::from_secs(1))).unwrap();
        manager.dispose().await;
        manager.dispose().await;
        assert_eq!(manager.state(), ManagerState::Disposed);

        assert!(matches!(
            manager.load_url("http://example.test").await,
            Err(BridgeError::Disposed)
        ));
        assert!(matches!(manager.connect().await, Err(BridgeError::Disposed)));
    }

    #[tokio::test]
    async fn test_connect_without_engine_times_out() {
        let manager =
            CommunicationsManager::new(tcp_config(Duration::from_millis(300))).unwrap();
        let err = manager.connect().await.unwrap_err();
        assert!(matches!(err, BridgeError::ConnectionTimeout { .. }));
        assert!(err.is_connection_error());
        assert_eq!(manager.state(), ManagerState::NotConnected);
    }

    #[tokio::test]
    async fn test_events_are_reposted_to_home_context() {
        let config = tcp_config(Duration::from_secs(5));
        let home = Arc::new(PumpedContext::new());
        let manager = CommunicationsManager::with_home_context(config.clone(), home.clone()).unwrap();

        let titles = Arc::new(StdMutex::new(Vec::new()));
        let sink = titles.clone();
        manager.on_title_change(move |title| {
            sink.lock().unwrap().push(title.to_string());
            Ok(())
        });

        let engine_side = Transport::new(config.event_endpoint(), Duration::from_secs(5));
        let (listened, connected) = tokio::join!(manager.listen(), engine_side.connect());
        listened.unwrap();
        let mut engine = RpcClient::new(connected.unwrap());

        engine
            .call::<_, ()>(&BridgeEvent::TitleChange {
                title: "Example".into(),
            })
            .await
            .unwrap();

        // Acknowledged before any observer ran: delivery waits for the home context.
        assert!(titles.lock().unwrap().is_empty());
        assert_eq!(home.run_pending(), 1);
        assert_eq!(*titles.lock().unwrap(), vec!["Example".to_string()]);

        manager.dispose().await;
    }

    #[tokio::test]
    async fn test_failing_observer_never_reaches_the_engine() {
        let config = tcp_config(Duration::from_secs(5));
        let home = Arc::new(PumpedContext::new());
        let manager = CommunicationsManager::with_home_context(config.clone(), home.clone()).unwrap();

        let delivered = Arc::new(AtomicUsize::new(0));
        manager.on_url_change(|_| panic!("consumer bug"));
        let counter = delivered.clone();
        manager.on_url_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let engine_side = Transport::new(config.event_endpoint(), Duration::from_secs(5));
        let (listened, connected) = tokio::join!(manager.listen(), engine_side.connect());
        listened.unwrap();
        let mut engine = RpcClient::new(connected.unwrap());

        for i in 0..3 {
            engine
                .call::<_, ()>(&BridgeEvent::UrlChange {
                    url: format!("http://{}.test", i),
                })
                .await
                .unwrap();
            home.run_pending();
        }
        assert_eq!(delivered.load(Ordering::SeqCst), 3);

        manager.dispose().await;
    }

    #[tokio::test]
    async fn test_unknown_event_is_rejected_as_protocol_violation() {
        let config = tcp_config(Duration::from_secs(5));
        let manager = CommunicationsManager::new(config.clone()).unwrap();
        let engine_side = Transport::new(config.event_endpoint(), Duration::from_secs(5));
        let (listened, connected) = tokio::join!(manager.listen(), engine_side.connect());
        listened.unwrap();
        let mut engine = RpcClient::new(connected.unwrap());

        let err = engine.call_raw("PopupOpened", None).await.unwrap_err();
        assert!(matches!(
            err,
            BridgeError::ProtocolViolation { remote: true, .. }
        ));
        assert!(!err.faults_connection());

        // The rejection only failed that one call.
        engine
            .call::<_, ()>(&BridgeEvent::TitleChange {
                title: "still here".into(),
            })
            .await
            .unwrap();
        manager.dispose().await;
    }

    #[tokio::test]
    async fn test_dispose_releases_a_call_the_engine_never_answers() {
        let config = tcp_config(Duration::from_secs(5));
        let manager = Arc::new(CommunicationsManager::new(config.clone()).unwrap());

        // A peer that accepts the command connection but never replies.
        let silent = Transport::new(config.command_endpoint(), Duration::from_secs(5));
        let (hosted, connected) = tokio::join!(silent.listen(), manager.connect());
        let _silent_conn = hosted.unwrap();
        connected.unwrap();

        let caller = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.refresh().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        tokio::time::timeout(Duration::from_secs(5), manager.dispose())
            .await
            .expect("dispose must not deadlock");
        let outcome = tokio::time::timeout(Duration::from_secs(1), caller)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(outcome, Err(BridgeError::Disposed)));
        assert_eq!(manager.state(), ManagerState::Disposed);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = BridgeConfig::tcp(7000, 7000);
        let home = Arc::new(PumpedContext::new());
        assert!(CommunicationsManager::with_home_context(config, home).is_err());
        assert_eq!(Endpoint::Tcp(1).to_string(), "tcp:127.0.0.1:1");
    }
}
