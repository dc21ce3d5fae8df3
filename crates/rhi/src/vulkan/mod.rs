//! [`Backend`] implementation on a real GPU through `ash`.
//!
//! Construction goes instance → optional window surface → physical device
//! → logical device (graphics queue, present queue when a surface exists) →
//! swapchain loader. Teardown runs in reverse in [`Drop`].

mod instance;
mod physical_device;

use std::ptr::NonNull;

use ash::prelude::VkResult;
use ash::vk;
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use tracing::{debug, info};

use crate::backend::{Backend, SubmitBatch, SwapchainDesc};
use crate::error::{RhiError, RhiResult};

pub use instance::Instance;
pub use physical_device::{PhysicalDeviceInfo, QueueFamilyIndices, SurfaceTarget};

/// Options for bringing up the Vulkan device.
#[derive(Clone, Debug, Default)]
pub struct VulkanOptions {
    /// Enable the Khronos validation layer when it is installed.
    pub validation: bool,
    /// Use the GPU with exactly this name instead of the best-scoring one.
    pub physical_device: Option<String>,
}

struct Surface {
    loader: ash::khr::surface::Instance,
    handle: vk::SurfaceKHR,
}

/// Vulkan device with an optional presentation surface.
pub struct VulkanBackend {
    instance: Instance,
    surface: Option<Surface>,
    physical: PhysicalDeviceInfo,
    device: ash::Device,
    swapchain_loader: Option<ash::khr::swapchain::Device>,
    graphics_family: u32,
    present_family: u32,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    // Queue access must be externally synchronized.
    queue_lock: Mutex<()>,
}

impl VulkanBackend {
    /// Creates a device without a presentation surface.
    pub fn headless(options: &VulkanOptions) -> RhiResult<Self> {
        Self::create(options, None)
    }

    /// Creates a device presenting to `window`.
    pub fn with_window<W>(options: &VulkanOptions, window: &W) -> RhiResult<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| RhiError::SurfaceError(e.to_string()))?
            .as_raw();
        let handle = window
            .window_handle()
            .map_err(|e| RhiError::SurfaceError(e.to_string()))?
            .as_raw();
        Self::create(options, Some((display, handle)))
    }

    fn create(
        options: &VulkanOptions,
        window: Option<(RawDisplayHandle, RawWindowHandle)>,
    ) -> RhiResult<Self> {
        let instance = Instance::new(options.validation, window.map(|(display, _)| display))?;

        let surface = match window {
            Some((display, handle)) => {
                let surface = unsafe {
                    ash_window::create_surface(
                        instance.entry(),
                        instance.handle(),
                        display,
                        handle,
                        None,
                    )?
                };
                debug!("Window surface created");
                Some(Surface {
                    loader: ash::khr::surface::Instance::new(instance.entry(), instance.handle()),
                    handle: surface,
                })
            }
            None => None,
        };

        let target = surface.as_ref().map(|s| SurfaceTarget {
            loader: &s.loader,
            surface: s.handle,
        });
        let physical = match physical_device::select_physical_device(
            instance.handle(),
            target,
            options.physical_device.as_deref(),
        ) {
            Ok(physical) => physical,
            Err(e) => {
                destroy_surface(&surface);
                return Err(e);
            }
        };

        let device = match create_logical_device(&instance, &physical, surface.is_some()) {
            Ok(device) => device,
            Err(e) => {
                destroy_surface(&surface);
                return Err(e);
            }
        };

        let families = physical.queue_families;
        let (Some(graphics_family), present_family) =
            (families.graphics_family, families.present_family)
        else {
            unsafe { device.destroy_device(None) };
            destroy_surface(&surface);
            return Err(RhiError::NoSuitableGpu);
        };
        let present_family = present_family.unwrap_or(graphics_family);

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };
        debug!(
            "Queues retrieved (graphics family {}, present family {})",
            graphics_family, present_family
        );

        let swapchain_loader = surface
            .as_ref()
            .map(|_| ash::khr::swapchain::Device::new(instance.handle(), &device));

        info!(
            "Vulkan backend ready on '{}' ({})",
            physical.device_name(),
            if surface.is_some() {
                "surface"
            } else {
                "headless"
            }
        );

        Ok(Self {
            instance,
            surface,
            physical,
            device,
            swapchain_loader,
            graphics_family,
            present_family,
            graphics_queue,
            present_queue,
            queue_lock: Mutex::new(()),
        })
    }

    #[inline]
    pub fn physical_device(&self) -> &PhysicalDeviceInfo {
        &self.physical
    }

    fn surface(&self) -> VkResult<&Surface> {
        self.surface.as_ref().ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)
    }

    fn swapchain_loader(&self) -> VkResult<&ash::khr::swapchain::Device> {
        self.swapchain_loader
            .as_ref()
            .ok_or(vk::Result::ERROR_EXTENSION_NOT_PRESENT)
    }
}

fn destroy_surface(surface: &Option<Surface>) {
    if let Some(surface) = surface {
        unsafe { surface.loader.destroy_surface(surface.handle, None) };
    }
}

fn create_logical_device(
    instance: &Instance,
    physical: &PhysicalDeviceInfo,
    with_swapchain: bool,
) -> RhiResult<ash::Device> {
    let unique_families = physical.queue_families.unique_families();
    let queue_priorities = [1.0f32];

    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
        .iter()
        .map(|&family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(&queue_priorities)
        })
        .collect();

    debug!(
        "Creating {} queue(s) for families: {:?}",
        queue_create_infos.len(),
        unique_families
    );

    let extension_names = if with_swapchain {
        vec![ash::khr::swapchain::NAME.as_ptr()]
    } else {
        vec![]
    };

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names);

    let device = unsafe {
        instance
            .handle()
            .create_device(physical.device, &create_info, None)?
    };

    info!(
        "Logical device created with {} extension(s)",
        extension_names.len()
    );
    Ok(device)
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                tracing::error!("Failed to wait for device idle during drop: {:?}", e);
            }
            self.device.destroy_device(None);
        }
        destroy_surface(&self.surface);
        info!("Vulkan backend destroyed");
        // `instance` drops last.
    }
}

impl Backend for VulkanBackend {
    fn name(&self) -> &str {
        self.physical.device_name()
    }

    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        self.physical.memory_properties
    }

    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .handle()
                .get_physical_device_format_properties(self.physical.device, format)
        }
    }

    fn allocate_memory(
        &self,
        size: vk::DeviceSize,
        memory_type_index: u32,
    ) -> VkResult<vk::DeviceMemory> {
        let info = vk::MemoryAllocateInfo::default()
            .allocation_size(size)
            .memory_type_index(memory_type_index);
        unsafe { self.device.allocate_memory(&info, None) }
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.free_memory(memory, None) }
    }

    fn map_memory(&self, memory: vk::DeviceMemory, size: vk::DeviceSize) -> VkResult<NonNull<u8>> {
        let ptr = unsafe {
            self.device
                .map_memory(memory, 0, size, vk::MemoryMapFlags::empty())?
        };
        NonNull::new(ptr.cast::<u8>()).ok_or(vk::Result::ERROR_MEMORY_MAP_FAILED)
    }

    fn unmap_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.unmap_memory(memory) }
    }

    fn create_buffer(&self, info: &vk::BufferCreateInfo<'_>) -> VkResult<vk::Buffer> {
        unsafe { self.device.create_buffer(info, None) }
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        unsafe { self.device.get_buffer_memory_requirements(buffer) }
    }

    fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()> {
        unsafe { self.device.bind_buffer_memory(buffer, memory, offset) }
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        unsafe { self.device.destroy_buffer(buffer, None) }
    }

    fn create_image(&self, info: &vk::ImageCreateInfo<'_>) -> VkResult<vk::Image> {
        unsafe { self.device.create_image(info, None) }
    }

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        unsafe { self.device.get_image_memory_requirements(image) }
    }

    fn bind_image_memory(
        &self,
        image: vk::Image,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()> {
        unsafe { self.device.bind_image_memory(image, memory, offset) }
    }

    fn destroy_image(&self, image: vk::Image) {
        unsafe { self.device.destroy_image(image, None) }
    }

    fn create_image_view(&self, info: &vk::ImageViewCreateInfo<'_>) -> VkResult<vk::ImageView> {
        unsafe { self.device.create_image_view(info, None) }
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) }
    }

    fn graphics_queue_family(&self) -> u32 {
        self.graphics_family
    }

    fn create_command_pool(&self, info: &vk::CommandPoolCreateInfo<'_>) -> VkResult<vk::CommandPool> {
        unsafe { self.device.create_command_pool(info, None) }
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) }
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        unsafe { self.device.allocate_command_buffers(&info) }
    }

    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        unsafe { self.device.free_command_buffers(pool, buffers) }
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        unsafe {
            self.device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
        }
    }

    fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    ) -> VkResult<()> {
        let info = vk::CommandBufferBeginInfo::default().flags(flags);
        unsafe { self.device.begin_command_buffer(cmd, &info) }
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        unsafe { self.device.end_command_buffer(cmd) }
    }

    fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        unsafe { self.device.cmd_copy_buffer(cmd, src, dst, regions) }
    }

    fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe {
            self.device
                .cmd_copy_buffer_to_image(cmd, src, dst, dst_layout, regions)
        }
    }

    fn cmd_copy_image_to_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Buffer,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe {
            self.device
                .cmd_copy_image_to_buffer(cmd, src, src_layout, dst, regions)
        }
    }

    fn cmd_pipeline_barrier(
        &self,
        cmd: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        image_barriers: &[vk::ImageMemoryBarrier<'_>],
    ) {
        unsafe {
            self.device.cmd_pipeline_barrier(
                cmd,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                image_barriers,
            )
        }
    }

    fn cmd_clear_color_image(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        layout: vk::ImageLayout,
        color: &vk::ClearColorValue,
        ranges: &[vk::ImageSubresourceRange],
    ) {
        unsafe {
            self.device
                .cmd_clear_color_image(cmd, image, layout, color, ranges)
        }
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::default().flags(flags);
        unsafe { self.device.create_fence(&info, None) }
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) }
    }

    fn wait_for_fences(&self, fences: &[vk::Fence], timeout: u64) -> VkResult<()> {
        unsafe { self.device.wait_for_fences(fences, true, timeout) }
    }

    fn reset_fences(&self, fences: &[vk::Fence]) -> VkResult<()> {
        unsafe { self.device.reset_fences(fences) }
    }

    fn fence_status(&self, fence: vk::Fence) -> VkResult<bool> {
        unsafe { self.device.get_fence_status(fence) }
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let info = vk::SemaphoreCreateInfo::default();
        unsafe { self.device.create_semaphore(&info, None) }
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) }
    }

    fn queue_submit(&self, batches: &[SubmitBatch<'_>], fence: vk::Fence) -> VkResult<()> {
        let infos: Vec<vk::SubmitInfo<'_>> = batches
            .iter()
            .map(|batch| {
                vk::SubmitInfo::default()
                    .wait_semaphores(batch.wait_semaphores)
                    .wait_dst_stage_mask(batch.wait_stages)
                    .command_buffers(batch.command_buffers)
                    .signal_semaphores(batch.signal_semaphores)
            })
            .collect();
        let _queue = self.queue_lock.lock();
        unsafe { self.device.queue_submit(self.graphics_queue, &infos, fence) }
    }

    fn queue_wait_idle(&self) -> VkResult<()> {
        let _queue = self.queue_lock.lock();
        unsafe { self.device.queue_wait_idle(self.graphics_queue) }
    }

    fn device_wait_idle(&self) -> VkResult<()> {
        let _queue = self.queue_lock.lock();
        unsafe { self.device.device_wait_idle() }
    }

    fn has_surface(&self) -> bool {
        self.surface.is_some()
    }

    fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        let surface = self.surface()?;
        unsafe {
            surface
                .loader
                .get_physical_device_surface_capabilities(self.physical.device, surface.handle)
        }
    }

    fn surface_formats(&self) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        let surface = self.surface()?;
        unsafe {
            surface
                .loader
                .get_physical_device_surface_formats(self.physical.device, surface.handle)
        }
    }

    fn surface_present_modes(&self) -> VkResult<Vec<vk::PresentModeKHR>> {
        let surface = self.surface()?;
        unsafe {
            surface
                .loader
                .get_physical_device_surface_present_modes(self.physical.device, surface.handle)
        }
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> VkResult<vk::SwapchainKHR> {
        let surface = self.surface()?;
        let loader = self.swapchain_loader()?;

        let queue_family_indices = [self.graphics_family, self.present_family];
        let (sharing_mode, indices): (vk::SharingMode, &[u32]) =
            if self.graphics_family != self.present_family {
                (vk::SharingMode::CONCURRENT, &queue_family_indices)
            } else {
                (vk::SharingMode::EXCLUSIVE, &[])
            };

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.handle)
            .min_image_count(desc.min_image_count)
            .image_format(desc.surface_format.format)
            .image_color_space(desc.surface_format.color_space)
            .image_extent(desc.extent)
            .image_array_layers(1)
            .image_usage(desc.usage)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(indices)
            .pre_transform(desc.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(desc.present_mode)
            .clipped(true);

        unsafe { loader.create_swapchain(&create_info, None) }
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        unsafe { self.swapchain_loader()?.get_swapchain_images(swapchain) }
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        if let Ok(loader) = self.swapchain_loader() {
            unsafe { loader.destroy_swapchain(swapchain, None) }
        }
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        let loader = self.swapchain_loader()?;
        unsafe { loader.acquire_next_image(swapchain, u64::MAX, signal, vk::Fence::null()) }
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool> {
        let loader = self.swapchain_loader()?;
        let wait_semaphores = [wait];
        let swapchains = [swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let _queue = self.queue_lock.lock();
        unsafe { loader.queue_present(self.present_queue, &present_info) }
    }
}
