//! Command pool and command buffer management.
//!
//! - [`CommandPool`] owns a pool bound to the graphics queue family
//! - [`CommandBuffer`] records the transfer, barrier and clear commands the
//!   engine issues
//!
//! # Example
//!
//! ```
//! use rtg_rhi::command::{CommandBuffer, CommandPool};
//! use rtg_rhi::device::Device;
//! use rtg_rhi::mock::MockBackend;
//!
//! # fn main() -> Result<(), rtg_rhi::RhiError> {
//! let device = Device::new(MockBackend::new());
//! let pool = CommandPool::new(device.clone())?;
//! let cmd = CommandBuffer::new(device, &pool)?;
//!
//! cmd.begin()?;
//! // ... record commands ...
//! cmd.end()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Command pool for the graphics queue family.
///
/// Not thread-safe: record from one thread per pool.
pub struct CommandPool {
    device: Arc<Device>,
    pool: vk::CommandPool,
}

impl CommandPool {
    /// Creates a pool whose buffers can be reset individually.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        Self::with_flags(device, vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
    }

    /// Creates a pool for short-lived buffers that are re-recorded every use.
    pub fn new_transient(device: Arc<Device>) -> RhiResult<Self> {
        Self::with_flags(
            device,
            vk::CommandPoolCreateFlags::TRANSIENT | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        )
    }

    fn with_flags(device: Arc<Device>, flags: vk::CommandPoolCreateFlags) -> RhiResult<Self> {
        let queue_family_index = device.backend().graphics_queue_family();
        let create_info = vk::CommandPoolCreateInfo::default()
            .flags(flags)
            .queue_family_index(queue_family_index);

        let pool = device.backend().create_command_pool(&create_info)?;
        debug!(
            "Command pool {:?} created for queue family {}",
            pool, queue_family_index
        );

        Ok(Self { device, pool })
    }

    /// Returns the raw pool handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Allocates a single primary command buffer.
    pub fn allocate_command_buffer(&self) -> RhiResult<vk::CommandBuffer> {
        let mut buffers = self.allocate_command_buffers(1)?;
        Ok(buffers.remove(0))
    }

    /// Allocates `count` primary command buffers.
    pub fn allocate_command_buffers(&self, count: u32) -> RhiResult<Vec<vk::CommandBuffer>> {
        Ok(self
            .device
            .backend()
            .allocate_command_buffers(self.pool, count)?)
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        self.device.backend().destroy_command_pool(self.pool);
        debug!("Command pool {:?} destroyed", self.pool);
    }
}

/// Command buffer wrapper.
///
/// Does NOT own the underlying handle; it is released with its [`CommandPool`].
pub struct CommandBuffer {
    device: Arc<Device>,
    buffer: vk::CommandBuffer,
}

impl CommandBuffer {
    /// Allocates a new command buffer from `pool`.
    pub fn new(device: Arc<Device>, pool: &CommandPool) -> RhiResult<Self> {
        let buffer = pool.allocate_command_buffer()?;
        Ok(Self { device, buffer })
    }

    /// Returns the raw command buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    // =========================================================================
    // Recording Control
    // =========================================================================

    /// Begins recording for a single submission.
    pub fn begin(&self) -> RhiResult<()> {
        self.device
            .backend()
            .begin_command_buffer(self.buffer, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        Ok(())
    }

    /// Begins recording commands that will be submitted many times.
    pub fn begin_reusable(&self) -> RhiResult<()> {
        self.device
            .backend()
            .begin_command_buffer(self.buffer, vk::CommandBufferUsageFlags::empty())?;
        Ok(())
    }

    /// Ends recording; the buffer is ready for submission.
    pub fn end(&self) -> RhiResult<()> {
        self.device.backend().end_command_buffer(self.buffer)?;
        Ok(())
    }

    /// Resets the buffer to its initial state.
    pub fn reset(&self) -> RhiResult<()> {
        self.device.backend().reset_command_buffer(self.buffer)?;
        Ok(())
    }

    // =========================================================================
    // Synchronization
    // =========================================================================

    /// Inserts an image memory barrier.
    pub fn pipeline_barrier(
        &self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        image_barriers: &[vk::ImageMemoryBarrier<'_>],
    ) {
        self.device
            .backend()
            .cmd_pipeline_barrier(self.buffer, src_stage, dst_stage, image_barriers);
    }

    // =========================================================================
    // Copy Commands
    // =========================================================================

    pub fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        self.device
            .backend()
            .cmd_copy_buffer(self.buffer, src, dst, regions);
    }

    pub fn copy_buffer_to_image(
        &self,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        self.device
            .backend()
            .cmd_copy_buffer_to_image(self.buffer, src, dst, dst_layout, regions);
    }

    pub fn copy_image_to_buffer(
        &self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Buffer,
        regions: &[vk::BufferImageCopy],
    ) {
        self.device
            .backend()
            .cmd_copy_image_to_buffer(self.buffer, src, src_layout, dst, regions);
    }

    // =========================================================================
    // Clear Commands
    // =========================================================================

    /// Clears regions of a color image in `image_layout`.
    pub fn clear_color_image(
        &self,
        image: vk::Image,
        image_layout: vk::ImageLayout,
        color: &vk::ClearColorValue,
        ranges: &[vk::ImageSubresourceRange],
    ) {
        self.device
            .backend()
            .cmd_clear_color_image(self.buffer, image, image_layout, color, ranges);
    }
}

/// Subresource range covering the single color mip level and layer the engine uses.
pub fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

/// Builds a whole-image layout transition barrier for a color image.
pub fn image_transition(
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
) -> vk::ImageMemoryBarrier<'static> {
    vk::ImageMemoryBarrier::default()
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(color_subresource_range())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBackend;

    #[test]
    fn test_color_subresource_range() {
        let range = color_subresource_range();
        assert_eq!(range.aspect_mask, vk::ImageAspectFlags::COLOR);
        assert_eq!(range.level_count, 1);
        assert_eq!(range.layer_count, 1);
    }

    #[test]
    fn test_image_transition_ignores_queue_ownership() {
        let barrier = image_transition(
            vk::Image::null(),
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::AccessFlags::empty(),
            vk::AccessFlags::TRANSFER_WRITE,
        );
        assert_eq!(barrier.src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
        assert_eq!(barrier.dst_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
        assert_eq!(barrier.new_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
    }

    #[test]
    fn test_pool_destroyed_on_drop() {
        let mock = MockBackend::new();
        let device = Device::new(mock.clone());
        let pool = CommandPool::new(device.clone()).unwrap();
        let raw = pool.handle();
        let cmd = CommandBuffer::new(device, &pool).unwrap();
        cmd.begin().unwrap();
        cmd.end().unwrap();
        drop(pool);
        assert!(!mock.is_alive(raw));
    }
}
