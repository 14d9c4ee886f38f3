//! Glue between the renderer's paint callback and the shared frame buffer.

use std::sync::Arc;

use tracing::warn;

use crate::frame::FrameBuffer;

/// View rectangle reported to the renderer, in view pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Handed to the renderer; called from its paint thread.
///
/// The view size is fixed for the session. A paint of any other size is
/// dropped, so the frame buffer always holds frames of the configured size.
#[derive(Debug, Clone)]
pub struct RenderGlue {
    frame: Arc<FrameBuffer>,
}

impl RenderGlue {
    pub fn new(frame: Arc<FrameBuffer>) -> Self {
        Self { frame }
    }

    pub fn view_rect(&self) -> ViewRect {
        ViewRect {
            x: 0,
            y: 0,
            width: self.frame.width(),
            height: self.frame.height(),
        }
    }

    /// Copy a freshly painted frame into the buffer. Returns whether it was stored.
    pub fn on_paint(&self, pixels: &[u8], width: u32, height: u32) -> bool {
        if width != self.frame.width() || height != self.frame.height() {
            warn!(
                "Dropping {}x{} paint for {}x{} view",
                width,
                height,
                self.frame.width(),
                self.frame.height()
            );
            return false;
        }
        match self.frame.write(pixels) {
            Ok(()) => true,
            Err(e) => {
                warn!("Dropping paint: {}", e);
                false
            }
        }
    }

    pub fn frame(&self) -> &Arc<FrameBuffer> {
        &self.frame
    }
}
