//! The hooks an application implements to draw frames.

use ash::vk;

use rtg_platform::InputEvent;
use rtg_rhi::RhiResult;
use rtg_rhi::swapchain::PresentableImage;
use rtg_rhi::sync::Semaphore;

use crate::workspace::Workspace;

/// Everything [`FrameProducer::render`] needs to know about the current
/// frame besides its workspace.
pub struct FrameParams<'a> {
    /// Which workspace is in use, `0..workspace_count`.
    pub workspace_index: usize,
    /// Index of the acquired image in the presentation chain.
    pub image_index: u32,
    /// The acquired image and its view.
    pub image: &'a PresentableImage,
    /// Extent of every image in the chain.
    pub extent: vk::Extent2D,
    /// Layout the image must be left in when rendering finishes.
    pub final_layout: vk::ImageLayout,
}

impl FrameParams<'_> {
    /// Semaphore the frame's submission must signal; presentation waits on it.
    #[inline]
    pub fn image_done(&self) -> &Semaphore {
        self.image.image_done()
    }
}

/// Application-side frame logic driven by the
/// [`FramePacer`](crate::pacer::FramePacer).
///
/// # Contract for `render`
///
/// The submission recorded into the workspace must
/// - wait on `workspace.image_available()` before writing the image,
/// - signal `params.image_done()`,
/// - signal `workspace.workspace_available()`.
///
/// [`Workspace::submit`] does all three.
/// The pacer does not check these obligations; breaking them deadlocks or
/// corrupts later frames.
pub trait FrameProducer {
    /// The presentation chain was (re)created. Rebuild anything sized to the
    /// old images. Called before the first frame and after every recreation.
    fn on_surface_changed(
        &mut self,
        extent: vk::Extent2D,
        images: &[PresentableImage],
    ) -> RhiResult<()>;

    /// One input event collected since the previous frame.
    fn on_input(&mut self, _event: &InputEvent) {}

    /// Advance simulation state by `dt` seconds.
    fn update(&mut self, _dt: f32) {}

    /// Record and submit the frame.
    fn render(&mut self, workspace: &Workspace, params: &FrameParams<'_>) -> RhiResult<()>;
}
