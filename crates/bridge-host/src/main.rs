//! Bridge Host - engine-side process for browser-bridge.
//!
//! Serves the command channel and drives the event channel for a built-in
//! headless engine, painting a test pattern into the shared frame buffer.
//! Useful as the engine half when checking a consumer end to end.

mod headless;
mod painter;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use browser_bridge::{BridgeConfig, Engine, EngineRpcServer, PixelFormat, SessionEnd};
use clap::Parser;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::headless::HeadlessEngine;
use crate::painter::Painter;

#[derive(Parser, Debug)]
#[command(name = "bridge-host")]
#[command(about = "Engine host for the browser bridge")]
struct Args {
    /// JSON configuration file (defaults apply to missing fields)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use loopback TCP instead of named pipes
    #[arg(long)]
    tcp: bool,

    /// Command channel port (consumer -> engine)
    #[arg(long)]
    in_port: Option<u16>,

    /// Event channel port (engine -> consumer)
    #[arg(long)]
    out_port: Option<u16>,

    /// Command channel pipe name
    #[arg(long)]
    in_pipe: Option<String>,

    /// Event channel pipe name
    #[arg(long)]
    out_pipe: Option<String>,

    /// Connection timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Frame width in pixels
    #[arg(long)]
    width: Option<u32>,

    /// Frame height in pixels
    #[arg(long)]
    height: Option<u32>,

    /// Paint RGBA instead of BGRA
    #[arg(long)]
    rgba: bool,

    /// Test pattern frame rate
    #[arg(long, default_value = "30")]
    fps: u32,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

impl Args {
    fn bridge_config(&self) -> Result<BridgeConfig> {
        let mut config = match &self.config {
            Some(path) => BridgeConfig::from_json_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => BridgeConfig::default(),
        };

        if self.tcp {
            config.prefer_pipes = false;
        }
        if let Some(port) = self.in_port {
            config.in_port = port;
        }
        if let Some(port) = self.out_port {
            config.out_port = port;
        }
        if let Some(name) = &self.in_pipe {
            config.in_pipe_name = name.clone();
        }
        if let Some(name) = &self.out_pipe {
            config.out_pipe_name = name.clone();
        }
        if let Some(ms) = self.timeout_ms {
            config = config.with_timeout(Duration::from_millis(ms));
        }
        if let Some(width) = self.width {
            config.frame.width = width;
        }
        if let Some(height) = self.height {
            config.frame.height = height;
        }
        if self.rgba {
            config.frame.format = PixelFormat::Rgba;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let config = args.bridge_config()?;
    info!(
        "Starting bridge host: commands on {}, events on {}, {}x{} frames",
        config.command_endpoint(),
        config.event_endpoint(),
        config.frame.width,
        config.frame.height
    );

    let server = EngineRpcServer::new(config)?;
    let engine = Arc::new(HeadlessEngine::new(server.notifier()));
    let painter = Painter::spawn(server.render_glue(), args.fps)?;

    let session = server
        .start(engine.clone())
        .await
        .context("waiting for the consumer to connect")?;

    let outcome = tokio::select! {
        ended = session.wait() => ended.map_err(anyhow::Error::from),
        signal = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, exiting");
            signal.map(|()| SessionEnd::Stopped).map_err(anyhow::Error::from)
        }
    };

    if !engine.is_shut_down() {
        if let Err(e) = engine.shutdown().await {
            warn!("Engine shutdown failed: {}", e);
        }
    }

    let frames = painter.stop();
    info!("Painted {} frames", frames);

    let end = outcome?;
    info!("Session ended: {:?}", end);
    Ok(())
}
