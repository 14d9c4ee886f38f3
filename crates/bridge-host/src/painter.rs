//! Test-pattern renderer running on its own thread.
//!
//! Stands in for a real compositor: paints a moving gradient at a fixed rate
//! through the session's `RenderGlue`, the same way a real engine's paint
//! callback would.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use browser_bridge::frame::BYTES_PER_PIXEL;
use browser_bridge::RenderGlue;
use tracing::{debug, warn};

pub struct Painter {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<u64>>,
}

impl Painter {
    /// Start painting at `fps` frames per second.
    pub fn spawn(glue: RenderGlue, fps: u32) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let interval = Duration::from_secs(1) / fps.max(1);
        let flag = stop.clone();
        let handle = thread::Builder::new()
            .name("render".to_string())
            .spawn(move || paint_loop(glue, interval, flag))?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Stop painting and wait for the render thread. Returns frames painted.
    pub fn stop(mut self) -> u64 {
        self.halt()
    }

    fn halt(&mut self) -> u64 {
        self.stop.store(true, Ordering::SeqCst);
        match self.handle.take().map(JoinHandle::join) {
            Some(Ok(frames)) => frames,
            Some(Err(_)) => {
                warn!("Render thread panicked");
                0
            }
            None => 0,
        }
    }
}

impl Drop for Painter {
    fn drop(&mut self) {
        self.halt();
    }
}

fn paint_loop(glue: RenderGlue, interval: Duration, stop: Arc<AtomicBool>) -> u64 {
    let rect = glue.view_rect();
    let mut pixels = vec![0u8; rect.width as usize * rect.height as usize * BYTES_PER_PIXEL];
    let mut frames = 0u64;

    while !stop.load(Ordering::SeqCst) {
        fill_pattern(&mut pixels, rect.width, rect.height, frames);
        if glue.on_paint(&pixels, rect.width, rect.height) {
            frames += 1;
        }
        thread::sleep(interval);
    }
    debug!("Render thread painted {} frames", frames);
    frames
}

/// Diagonal gradient scrolling one pixel per frame. Alpha is always opaque.
fn fill_pattern(pixels: &mut [u8], width: u32, height: u32, frame: u64) {
    let shift = frame as u32;
    for y in 0..height {
        for x in 0..width {
            let offset = (y as usize * width as usize + x as usize) * BYTES_PER_PIXEL;
            let px = &mut pixels[offset..offset + BYTES_PER_PIXEL];
            px[0] = (x.wrapping_add(shift) & 0xff) as u8;
            px[1] = (y.wrapping_add(shift) & 0xff) as u8;
            px[2] = ((x ^ y) & 0xff) as u8;
            px[3] = 0xff;
        }
    }
}
