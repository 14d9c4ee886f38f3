//! Headless engine: navigation bookkeeping without a real renderer.
//!
//! Keeps a browser-style history list and reports the same load lifecycle a
//! real engine would (`LoadStart`, progress, `UrlChange`, `TitleChange`,
//! `LoadFinish`). Pages are never fetched; hosts under the reserved
//! `.invalid` TLD fail to load so the error page path can be exercised.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use browser_bridge::engine::ConsoleSeverity;
use browser_bridge::{
    BridgeError, ClickKind, Engine, KeyboardEvent, MouseClickEvent, MouseMoveEvent,
    MouseScrollEvent, NotificationSink, Result, ScrollPosition,
};
use tracing::{debug, info};

/// Virtual key code that toggles fullscreen.
const KEY_F11: u32 = 122;

#[derive(Debug, Default)]
struct Navigation {
    history: Vec<String>,
    /// Index of the current entry in `history`.
    current: Option<usize>,
    zoom: f64,
    scroll: ScrollPosition,
    fullscreen: bool,
}

pub struct HeadlessEngine {
    notifier: NotificationSink,
    navigation: Mutex<Navigation>,
    shut_down: AtomicBool,
}

impl HeadlessEngine {
    pub fn new(notifier: NotificationSink) -> Self {
        Self {
            notifier,
            navigation: Mutex::new(Navigation {
                zoom: 1.0,
                ..Default::default()
            }),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn navigation(&self) -> std::sync::MutexGuard<'_, Navigation> {
        self.navigation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_shut_down() {
            return Err(BridgeError::engine("engine has shut down"));
        }
        Ok(())
    }

    /// Report the load lifecycle of `url`.
    fn report_load(&self, url: &str) {
        self.notifier.load_start(url);
        self.notifier.progress_change(0.1);

        if host_of(url).is_some_and(|host| host.ends_with(".invalid")) {
            self.notifier.load_error(url, "ERR_NAME_NOT_RESOLVED");
            return;
        }

        self.notifier.url_change(url);
        self.notifier.progress_change(1.0);
        self.notifier.title_change(host_of(url).unwrap_or(url));
        self.notifier.load_finish(url);
    }
}

#[async_trait]
impl Engine for HeadlessEngine {
    async fn load_url(&self, url: &str) -> Result<()> {
        self.ensure_running()?;
        if !url.contains(':') {
            return Err(BridgeError::Navigation {
                url: url.to_string(),
                message: "not an absolute URL".to_string(),
            });
        }

        {
            let mut nav = self.navigation();
            let next = nav.current.map(|i| i + 1).unwrap_or(0);
            nav.history.truncate(next);
            nav.history.push(url.to_string());
            nav.current = Some(next);
            nav.scroll = ScrollPosition::default();
        }
        info!("Loading {}", url);
        self.report_load(url);
        Ok(())
    }

    async fn load_html(&self, html: &str) -> Result<()> {
        self.ensure_running()?;
        let url = "data:text/html";
        self.notifier.load_start(url);
        if let Some(title) = html_title(html) {
            self.notifier.title_change(title);
        }
        self.notifier.load_finish(url);
        debug!("Loaded {} bytes of HTML", html.len());
        Ok(())
    }

    async fn execute_js(&self, js: &str) -> Result<()> {
        self.ensure_running()?;
        debug!("Executing {} bytes of script", js.len());
        self.notifier
            .console_message(ConsoleSeverity::VERBOSE, "script executed", "<eval>", 1);
        Ok(())
    }

    async fn go_back(&self) -> Result<()> {
        self.ensure_running()?;
        let target = {
            let mut nav = self.navigation();
            match nav.current {
                Some(i) if i > 0 => {
                    nav.current = Some(i - 1);
                    Some(nav.history[i - 1].clone())
                }
                _ => None,
            }
        };
        match target {
            Some(url) => self.report_load(&url),
            None => debug!("GoBack with no history; ignored"),
        }
        Ok(())
    }

    async fn go_forward(&self) -> Result<()> {
        self.ensure_running()?;
        let target = {
            let mut nav = self.navigation();
            match nav.current {
                Some(i) if i + 1 < nav.history.len() => {
                    nav.current = Some(i + 1);
                    Some(nav.history[i + 1].clone())
                }
                _ => None,
            }
        };
        match target {
            Some(url) => self.report_load(&url),
            None => debug!("GoForward with no forward history; ignored"),
        }
        Ok(())
    }

    async fn refresh(&self) -> Result<()> {
        self.ensure_running()?;
        let current = {
            let nav = self.navigation();
            nav.current.map(|i| nav.history[i].clone())
        };
        if let Some(url) = current {
            self.report_load(&url);
        }
        Ok(())
    }

    async fn keyboard_event(&self, event: KeyboardEvent) -> Result<()> {
        self.ensure_running()?;
        if event.keys_down.contains(&KEY_F11) {
            let fullscreen = {
                let mut nav = self.navigation();
                nav.fullscreen = !nav.fullscreen;
                nav.fullscreen
            };
            self.notifier.fullscreen(fullscreen);
        }
        debug!("Keyboard: {:?}", event);
        Ok(())
    }

    async fn mouse_move_event(&self, event: MouseMoveEvent) -> Result<()> {
        self.ensure_running()?;
        debug!("Mouse move to {},{}", event.x, event.y);
        Ok(())
    }

    async fn mouse_click_event(&self, event: MouseClickEvent) -> Result<()> {
        self.ensure_running()?;
        if event.kind == ClickKind::Down {
            // The top 40 rows stand in for a text field.
            self.notifier.input_focus_change(event.y < 40);
        }
        Ok(())
    }

    async fn mouse_scroll_event(&self, event: MouseScrollEvent) -> Result<()> {
        self.ensure_running()?;
        let mut nav = self.navigation();
        nav.scroll.x = (nav.scroll.x - event.delta_x as f64).max(0.0);
        nav.scroll.y = (nav.scroll.y - event.delta_y as f64).max(0.0);
        Ok(())
    }

    async fn set_zoom_level(&self, level: f64) -> Result<()> {
        self.ensure_running()?;
        if !level.is_finite() || level <= 0.0 {
            return Err(BridgeError::engine(format!("invalid zoom level {}", level)));
        }
        self.navigation().zoom = level;
        Ok(())
    }

    async fn open_dev_tools(&self) -> Result<()> {
        self.ensure_running()?;
        info!("Developer tools are not available in the headless engine");
        Ok(())
    }

    async fn scroll_position(&self) -> Result<ScrollPosition> {
        Ok(self.navigation().scroll)
    }

    async fn shutdown(&self) -> Result<()> {
        if !self.shut_down.swap(true, Ordering::SeqCst) {
            info!("Headless engine shut down");
        }
        Ok(())
    }
}

/// Host part of `scheme://host/...`.
fn host_of(url: &str) -> Option<&str> {
    let rest = url.split_once("://")?.1;
    let host = rest.split(['/', '?', '#']).next()?;
    let host = host.rsplit('@').next()?;
    let host = host.split(':').next()?;
    (!host.is_empty()).then_some(host)
}

fn html_title(html: &str) -> Option<&str> {
    let start = html.find("<title>")? + "<title>".len();
    let end = html[start..].find("</title>")? + start;
    Some(html[start..end].trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use browser_bridge::{BridgeEvent, EngineNotification};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn engine() -> (HeadlessEngine, UnboundedReceiver<EngineNotification>) {
        let (sink, rx) = NotificationSink::channel();
        (HeadlessEngine::new(sink), rx)
    }

    fn drain(rx: &mut UnboundedReceiver<EngineNotification>) -> Vec<EngineNotification> {
        let mut out = Vec::new();
        while let Ok(n) = rx.try_recv() {
            out.push(n);
        }
        out
    }

    fn url_changes(notifications: &[EngineNotification]) -> Vec<String> {
        notifications
            .iter()
            .filter_map(|n| match n {
                EngineNotification::Event(BridgeEvent::UrlChange { url }) => Some(url.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("http://example.test/a?b"), Some("example.test"));
        assert_eq!(host_of("https://user@site.test:8080/"), Some("site.test"));
        assert_eq!(host_of("about:blank"), None);
    }

    #[test]
    fn test_html_title() {
        assert_eq!(html_title("<html><title> Hi </title></html>"), Some("Hi"));
        assert_eq!(html_title("<p>none</p>"), None);
    }

    #[tokio::test]
    async fn test_load_reports_full_lifecycle() {
        let (engine, mut rx) = engine();
        engine.load_url("http://example.test/").await.unwrap();

        let notifications = drain(&mut rx);
        assert_eq!(
            notifications.first(),
            Some(&EngineNotification::Event(BridgeEvent::LoadStart {
                url: "http://example.test/".into()
            }))
        );
        assert_eq!(
            notifications.last(),
            Some(&EngineNotification::Event(BridgeEvent::LoadFinish {
                url: "http://example.test/".into()
            }))
        );
        assert!(notifications.contains(&EngineNotification::Event(BridgeEvent::TitleChange {
            title: "example.test".into()
        })));
    }

    #[tokio::test]
    async fn test_go_back_without_history_is_a_no_op() {
        let (engine, mut rx) = engine();
        engine.go_back().await.unwrap();
        engine.go_forward().await.unwrap();
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_history_navigation() {
        let (engine, mut rx) = engine();
        engine.load_url("http://a.test").await.unwrap();
        engine.load_url("http://b.test").await.unwrap();
        drain(&mut rx);

        engine.go_back().await.unwrap();
        assert_eq!(url_changes(&drain(&mut rx)), vec!["http://a.test"]);
        engine.go_forward().await.unwrap();
        assert_eq!(url_changes(&drain(&mut rx)), vec!["http://b.test"]);

        // A new load drops the forward entries.
        engine.go_back().await.unwrap();
        engine.load_url("http://c.test").await.unwrap();
        drain(&mut rx);
        engine.go_forward().await.unwrap();
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_unresolvable_host_reports_load_error() {
        let (engine, mut rx) = engine();
        engine.load_url("http://nowhere.invalid/").await.unwrap();
        let notifications = drain(&mut rx);
        assert!(notifications
            .iter()
            .any(|n| matches!(n, EngineNotification::LoadError { .. })));
        assert!(url_changes(&notifications).is_empty());
    }

    #[tokio::test]
    async fn test_relative_url_is_refused() {
        let (engine, _rx) = engine();
        let err = engine.load_url("example").await.unwrap_err();
        assert!(matches!(err, BridgeError::Navigation { .. }));
    }

    #[tokio::test]
    async fn test_scroll_and_fullscreen() {
        let (engine, mut rx) = engine();
        engine
            .mouse_scroll_event(MouseScrollEvent {
                x: 0,
                y: 0,
                delta_x: 0,
                delta_y: -120,
                modifiers: Default::default(),
            })
            .await
            .unwrap();
        assert_eq!(engine.scroll_position().await.unwrap().y, 120.0);

        let f11 = KeyboardEvent {
            keys_down: vec![KEY_F11],
            ..Default::default()
        };
        engine.keyboard_event(f11.clone()).await.unwrap();
        engine.keyboard_event(f11).await.unwrap();
        let toggles: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter_map(|n| match n {
                EngineNotification::Event(BridgeEvent::Fullscreen { fullscreen }) => {
                    Some(fullscreen)
                }
                _ => None,
            })
            .collect();
        assert_eq!(toggles, vec![true, false]);
    }

    #[tokio::test]
    async fn test_commands_after_shutdown_fail() {
        let (engine, _rx) = engine();
        engine.shutdown().await.unwrap();
        engine.shutdown().await.unwrap();
        assert!(engine.is_shut_down());
        assert!(engine.refresh().await.is_err());
    }
}
