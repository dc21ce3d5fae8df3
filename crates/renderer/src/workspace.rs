//! Per-frame-in-flight resources.
//!
//! A [`Workspace`] bundles everything one frame needs while the CPU records
//! it and the GPU executes it:
//!
//! ```text
//! 1. Pacer waits on workspace_available (previous use of this slot done)
//! 2. Pacer resets workspace_available and acquires an image, signaling
//!    image_available
//! 3. Producer records into command_buffer and submits it:
//!    - waits on image_available
//!    - signals the image's "image done" semaphore
//!    - signals workspace_available
//! 4. Pacer presents (or copies out, headless), waiting on "image done"
//! ```
//!
//! Workspaces live as long as the pacer and are reused every N frames.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use rtg_rhi::RhiResult;
use rtg_rhi::backend::SubmitBatch;
use rtg_rhi::command::{CommandBuffer, CommandPool};
use rtg_rhi::device::Device;
use rtg_rhi::sync::{Fence, Semaphore};

pub struct Workspace {
    device: Arc<Device>,
    /// Command buffer the producer records the frame into.
    command_buffer: CommandBuffer,
    /// Signaled when the GPU finishes the work last recorded here.
    workspace_available: Fence,
    /// Signaled when the acquired image may be written.
    image_available: Semaphore,
}

impl Workspace {
    /// Creates a workspace whose fence starts signaled, so the first wait on
    /// it returns at once.
    pub fn new(device: Arc<Device>, command_pool: &CommandPool) -> RhiResult<Self> {
        let command_buffer = CommandBuffer::new(device.clone(), command_pool)?;
        let workspace_available = Fence::new(device.clone(), true)?;
        let image_available = Semaphore::new(device.clone())?;
        debug!(
            "Workspace created (fence {:?}, semaphore {:?})",
            workspace_available.handle(),
            image_available.handle()
        );
        Ok(Self {
            device,
            command_buffer,
            workspace_available,
            image_available,
        })
    }

    #[inline]
    pub fn command_buffer(&self) -> &CommandBuffer {
        &self.command_buffer
    }

    #[inline]
    pub fn workspace_available(&self) -> &Fence {
        &self.workspace_available
    }

    #[inline]
    pub fn image_available(&self) -> &Semaphore {
        &self.image_available
    }

    /// Blocks until the GPU is done with this workspace, then marks it in use.
    pub(crate) fn acquire(&self) -> RhiResult<()> {
        self.workspace_available.wait()?;
        self.workspace_available.reset()
    }

    /// Submits the recorded command buffer with the standard frame
    /// synchronization: wait on `image_available` at `wait_stage`, signal
    /// `image_done` and this workspace's fence.
    pub fn submit(&self, image_done: &Semaphore, wait_stage: vk::PipelineStageFlags) -> RhiResult<()> {
        let wait_semaphores = [self.image_available.handle()];
        let wait_stages = [wait_stage];
        let command_buffers = [self.command_buffer.handle()];
        let signal_semaphores = [image_done.handle()];

        self.device.submit(
            &[SubmitBatch {
                wait_semaphores: &wait_semaphores,
                wait_stages: &wait_stages,
                command_buffers: &command_buffers,
                signal_semaphores: &signal_semaphores,
            }],
            Some(&self.workspace_available),
        )
    }
}
