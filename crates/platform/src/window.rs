//! The application window.

use std::sync::Arc;

use raw_window_handle::{
    DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle,
};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window as WinitWindow, WindowAttributes};

use crate::error::PlatformResult;

/// A resizable window that remembers its last reported drawable size and
/// hands out the raw handles a presentation surface is created from.
pub struct Window {
    window: Arc<WinitWindow>,
    drawable: PhysicalSize<u32>,
}

impl Window {
    /// Opens a window asking for `width` x `height` physical pixels.
    ///
    /// The platform may pick another size; [`drawable_size`](Self::drawable_size)
    /// reports what was actually granted.
    pub fn new(
        event_loop: &ActiveEventLoop,
        width: u32,
        height: u32,
        title: &str,
    ) -> PlatformResult<Self> {
        let attrs = WindowAttributes::default()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(width, height))
            .with_resizable(true);

        let window = event_loop.create_window(attrs)?;
        let drawable = window.inner_size();
        if (drawable.width, drawable.height) != (width, height) {
            tracing::debug!(
                "Asked for a {}x{} window, got {}x{}",
                width,
                height,
                drawable.width,
                drawable.height
            );
        }
        tracing::info!("Window '{}' opened at {}x{}", title, drawable.width, drawable.height);

        Ok(Self {
            window: Arc::new(window),
            drawable,
        })
    }

    pub fn inner(&self) -> &WinitWindow {
        &self.window
    }

    /// Drawable size in physical pixels, as of the last resize.
    pub fn drawable_size(&self) -> PhysicalSize<u32> {
        self.drawable
    }

    /// False while minimized; there is nothing to present into then.
    pub fn has_drawable_area(&self) -> bool {
        self.drawable.width > 0 && self.drawable.height > 0
    }

    /// Records a new drawable size. Returns whether it changed.
    pub fn set_drawable_size(&mut self, size: PhysicalSize<u32>) -> bool {
        if size == self.drawable {
            return false;
        }
        tracing::debug!(
            "Drawable size {}x{} -> {}x{}",
            self.drawable.width,
            self.drawable.height,
            size.width,
            size.height
        );
        self.drawable = size;
        true
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }
}

impl HasDisplayHandle for Window {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        self.window.display_handle()
    }
}

impl HasWindowHandle for Window {
    fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
        self.window.window_handle()
    }
}
