//! The seam between the engine and a concrete GPU driver.
//!
//! Every device-level operation the engine issues goes through [`Backend`].
//! Two implementations ship with the crate:
//!
//! - [`VulkanBackend`](crate::vulkan::VulkanBackend) drives a real GPU through `ash`.
//! - `MockBackend` (feature `mock`) emulates a device in host memory and
//!   records an event log, so pacing and lifetime rules can be tested without hardware.
//!
//! The methods mirror the Vulkan entry points one to one and keep Vulkan's
//! result conventions: `Err(vk::Result::ERROR_OUT_OF_DATE_KHR)` from
//! [`Backend::acquire_next_image`] / [`Backend::queue_present`] and the
//! `bool` "suboptimal" flag are interpreted by the swapchain layer, not here.
//!
//! Callers are responsible for Vulkan's lifetime rules (an object must not be
//! destroyed while queued GPU work still references it). The engine upholds
//! them with fences and device-idle waits.

use std::ptr::NonNull;

use ash::prelude::VkResult;
use ash::vk;

/// One batch of a queue submission.
#[derive(Clone, Copy, Debug, Default)]
pub struct SubmitBatch<'a> {
    /// Semaphores waited on before the batch starts the matching stage.
    pub wait_semaphores: &'a [vk::Semaphore],
    /// Stage at which each wait semaphore is waited on.
    pub wait_stages: &'a [vk::PipelineStageFlags],
    /// Command buffers to execute, in order.
    pub command_buffers: &'a [vk::CommandBuffer],
    /// Semaphores signaled when the batch completes.
    pub signal_semaphores: &'a [vk::Semaphore],
}

/// Parameters for creating a presentable image chain.
#[derive(Clone, Copy, Debug)]
pub struct SwapchainDesc {
    pub min_image_count: u32,
    pub surface_format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub usage: vk::ImageUsageFlags,
}

/// Device operations used by the engine.
pub trait Backend: Send + Sync {
    /// Human-readable name of the underlying device.
    fn name(&self) -> &str;

    // ---- capabilities -----------------------------------------------------

    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties;
    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties;

    // ---- memory -----------------------------------------------------------

    fn allocate_memory(
        &self,
        size: vk::DeviceSize,
        memory_type_index: u32,
    ) -> VkResult<vk::DeviceMemory>;
    fn free_memory(&self, memory: vk::DeviceMemory);
    /// Maps `size` bytes from the start of `memory`. The pointer stays valid until unmapped.
    fn map_memory(&self, memory: vk::DeviceMemory, size: vk::DeviceSize) -> VkResult<NonNull<u8>>;
    fn unmap_memory(&self, memory: vk::DeviceMemory);

    // ---- buffers, images, views -------------------------------------------

    fn create_buffer(&self, info: &vk::BufferCreateInfo<'_>) -> VkResult<vk::Buffer>;
    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements;
    fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()>;
    fn destroy_buffer(&self, buffer: vk::Buffer);

    fn create_image(&self, info: &vk::ImageCreateInfo<'_>) -> VkResult<vk::Image>;
    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements;
    fn bind_image_memory(
        &self,
        image: vk::Image,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()>;
    fn destroy_image(&self, image: vk::Image);

    fn create_image_view(&self, info: &vk::ImageViewCreateInfo<'_>) -> VkResult<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);

    // ---- command recording ------------------------------------------------

    /// Queue family used for graphics and transfer submissions.
    fn graphics_queue_family(&self) -> u32;
    fn create_command_pool(&self, info: &vk::CommandPoolCreateInfo<'_>) -> VkResult<vk::CommandPool>;
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> VkResult<Vec<vk::CommandBuffer>>;
    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]);
    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()>;
    fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    ) -> VkResult<()>;
    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()>;

    fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    );
    fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    );
    fn cmd_copy_image_to_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Buffer,
        regions: &[vk::BufferImageCopy],
    );
    fn cmd_pipeline_barrier(
        &self,
        cmd: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        image_barriers: &[vk::ImageMemoryBarrier<'_>],
    );
    fn cmd_clear_color_image(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        layout: vk::ImageLayout,
        color: &vk::ClearColorValue,
        ranges: &[vk::ImageSubresourceRange],
    );

    // ---- synchronization --------------------------------------------------

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    fn wait_for_fences(&self, fences: &[vk::Fence], timeout: u64) -> VkResult<()>;
    fn reset_fences(&self, fences: &[vk::Fence]) -> VkResult<()>;
    fn fence_status(&self, fence: vk::Fence) -> VkResult<bool>;
    fn create_semaphore(&self) -> VkResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    // ---- queues -----------------------------------------------------------

    /// Submits to the graphics queue; `fence` may be null.
    fn queue_submit(&self, batches: &[SubmitBatch<'_>], fence: vk::Fence) -> VkResult<()>;
    fn queue_wait_idle(&self) -> VkResult<()>;
    fn device_wait_idle(&self) -> VkResult<()>;

    // ---- presentation surface ---------------------------------------------

    /// Whether a presentation surface exists (false in headless mode).
    fn has_surface(&self) -> bool;
    fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR>;
    fn surface_formats(&self) -> VkResult<Vec<vk::SurfaceFormatKHR>>;
    fn surface_present_modes(&self) -> VkResult<Vec<vk::PresentModeKHR>>;
    fn create_swapchain(&self, desc: &SwapchainDesc) -> VkResult<vk::SwapchainKHR>;
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    /// Blocks until an image is available; returns `(index, suboptimal)`.
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)>;
    /// Queues presentation on the present queue; returns `suboptimal`.
    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool>;
}
