//! Browser Bridge - IPC between an off-screen browser engine and its embedder.
//!
//! Two processes talk over two independent request/response channels, each on
//! its own named pipe or loopback TCP connection:
//!
//! - the command channel, where the consumer (embedding application) drives
//!   the engine: navigation, input, pixel retrieval, shutdown;
//! - the event channel, where the engine reports navigation state back.
//!
//! The consumer side is [`CommunicationsManager`]; the engine side is
//! [`EngineRpcServer`] wrapped around an implementation of [`Engine`].
//!
//! # Example
//!
//! ```rust,ignore
//! use browser_bridge::{BridgeConfig, CommunicationsManager};
//!
//! #[tokio::main]
//! async fn main() -> browser_bridge::Result<()> {
//!     let manager = CommunicationsManager::new(BridgeConfig::default())?;
//!     manager.on_title_change(|title| {
//!         println!("title: {}", title);
//!         Ok(())
//!     });
//!
//!     manager.connect().await?;
//!     manager.listen().await?;
//!     manager.load_url("https://example.com").await?;
//!
//!     let frame = manager.get_pixels().await?;
//!     println!("{}x{} frame, {} bytes", frame.width, frame.height, frame.pixels.len());
//!
//!     manager.dispose().await;
//!     Ok(())
//! }
//! ```

pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod frame;
pub mod home;
pub mod input;
pub mod manager;
pub mod observers;
pub mod rpc;
pub mod transport;

// Re-export commonly used types
pub use commands::{Command, PixelsResult, ScrollPosition};
pub use config::{BridgeConfig, FrameSettings, IpcConfig};
pub use engine::{
    Engine, EngineNotification, EngineRpcServer, EngineSession, NotificationSink, RenderGlue,
    SessionEnd, ViewRect,
};
pub use error::{BridgeError, Result};
pub use events::{BridgeEvent, EventKind};
pub use frame::{FrameBuffer, PixelFormat};
pub use home::{HomeContext, PumpedContext, SerialTaskContext};
pub use input::{
    ClickKind, KeyboardEvent, Modifiers, MouseButton, MouseClickEvent, MouseMoveEvent,
    MouseScrollEvent,
};
pub use manager::{CommunicationsManager, ManagerState};
pub use observers::{EventObservers, ObserverId};
pub use transport::{Connection, ConnectionState, Endpoint, Transport, TransportKind};
