//! Presentation chain management.
//!
//! A [`Swapchain`] owns the images frames are rendered into and everything
//! attached to them, in one of two modes chosen at construction:
//!
//! - **Surface**: a real swapchain on the backend's presentation surface.
//! - **Headless**: a ring of [`HEADLESS_RING_SIZE`] device images, each with
//!   a host-visible readback buffer and a pre-recorded copy into it. "Presenting"
//!   submits that copy; a requested save is written to disk one ring cycle
//!   later, when the slot is acquired again and its copy is known to be done.
//!
//! Both modes hand out the same [`PresentableImage`] (image, view and a
//! dedicated "image done" semaphore). Recreation is all-or-nothing: every
//! per-image resource is destroyed and rebuilt, so no index or semaphore
//! survives from the previous chain.
//!
//! Staleness is not an error. [`Swapchain::acquire`] and
//! [`Swapchain::present`] report it through [`AcquireOutcome`] and
//! [`PresentOutcome`]; the caller recreates and carries on.

use std::path::PathBuf;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::allocator::Allocator;
use crate::backend::{Backend, SubmitBatch, SwapchainDesc};
use crate::buffer::AllocatedBuffer;
use crate::command::{CommandBuffer, CommandPool};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::format::image_byte_size;
use crate::image::{AllocatedImage, ImageView};
use crate::memory::Mapping;
use crate::readback::write_ppm;
use crate::sync::{Fence, Semaphore};

/// Number of images in the headless ring.
pub const HEADLESS_RING_SIZE: usize = 3;

/// Configured surface preferences, resolved against the device at every
/// (re)creation.
#[derive(Debug, Clone)]
pub struct SurfacePreferences {
    /// Used when the surface leaves the extent to the application, and as the
    /// headless image size.
    pub extent: vk::Extent2D,
    /// Ordered preference list. The first entry is the headless format.
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Ordered preference list.
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// Surface support details.
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    /// Surface capabilities (min/max image count, extents, transforms, etc.)
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats (format and color space combinations)
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes (FIFO, MAILBOX, IMMEDIATE, etc.)
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    /// Queries the backend's surface.
    pub fn query(backend: &dyn Backend) -> RhiResult<Self> {
        let capabilities = backend.surface_capabilities()?;
        let formats = backend.surface_formats()?;
        let present_modes = backend.surface_present_modes()?;

        debug!(
            "Surface support: {} formats, {} present modes, image count: {}-{}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            if capabilities.max_image_count == 0 {
                "unlimited".to_string()
            } else {
                capabilities.max_image_count.to_string()
            }
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// Returns true if at least one format and one present mode are available.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Result of requesting the next image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image was acquired. When `suboptimal`, render and present it, then
    /// recreate.
    Image { index: u32, suboptimal: bool },
    /// The chain no longer matches the surface; nothing was acquired.
    OutOfDate,
}

/// Result of queueing presentation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

impl PresentOutcome {
    /// Whether the chain should be recreated before the next frame.
    #[inline]
    pub fn needs_recreate(self) -> bool {
        !matches!(self, PresentOutcome::Presented)
    }
}

/// One image of the chain.
pub struct PresentableImage {
    image: vk::Image,
    view: ImageView,
    image_done: Semaphore,
}

impl PresentableImage {
    fn new(device: &Arc<Device>, image: vk::Image, format: vk::Format) -> RhiResult<Self> {
        Ok(Self {
            image,
            view: ImageView::new(device.clone(), image, format)?,
            image_done: Semaphore::new(device.clone())?,
        })
    }

    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view.handle()
    }

    /// Signaled by the producer when rendering into the image is complete.
    #[inline]
    pub fn image_done(&self) -> &Semaphore {
        &self.image_done
    }
}

/// Headless ring slot: the image's memory, its readback buffer and the
/// recorded copy between them.
struct HeadlessImage {
    image: AllocatedImage,
    buffer: AllocatedBuffer,
    copy_command: CommandBuffer,
    /// Starts signaled so the first acquisition of the slot doesn't block.
    copy_done: Fence,
    pending_save: Option<PathBuf>,
}

/// Presentation chain; see the module docs.
///
/// Not thread-safe: the frame loop's thread is the only user.
pub struct Swapchain {
    device: Arc<Device>,
    allocator: Arc<Allocator>,
    preferences: SurfacePreferences,
    headless: bool,
    swapchain: vk::SwapchainKHR,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    images: Vec<PresentableImage>,
    ring: Vec<HeadlessImage>,
    // Dropped after `ring`, whose command buffers it owns.
    ring_pool: Option<CommandPool>,
    next_ring_index: usize,
}

impl Swapchain {
    /// Creates the chain in surface or headless mode. The mode is kept across
    /// recreation.
    ///
    /// # Errors
    ///
    /// Fails if surface mode is requested on a backend without a surface, if
    /// none of the preferred formats or present modes is supported, or if any
    /// device operation fails.
    pub fn new(
        device: Arc<Device>,
        allocator: Arc<Allocator>,
        preferences: SurfacePreferences,
        headless: bool,
    ) -> RhiResult<Self> {
        if preferences.formats.is_empty() {
            return Err(RhiError::InvalidArgument(
                "at least one surface format must be configured".into(),
            ));
        }
        if !headless && !device.backend().has_surface() {
            return Err(RhiError::SurfaceError(
                "surface mode requested but the device has no presentation surface".into(),
            ));
        }

        let mut swapchain = Self {
            device,
            allocator,
            preferences,
            headless,
            swapchain: vk::SwapchainKHR::null(),
            surface_format: vk::SurfaceFormatKHR::default(),
            present_mode: vk::PresentModeKHR::FIFO,
            extent: vk::Extent2D::default(),
            images: Vec::new(),
            ring: Vec::new(),
            ring_pool: None,
            next_ring_index: 0,
        };
        swapchain.recreate()?;
        Ok(swapchain)
    }

    /// Destroys the current chain (if any) and builds a new one from freshly
    /// queried surface capabilities.
    ///
    /// Callers must notify whatever depends on the images (extent, views)
    /// before the next frame.
    pub fn recreate(&mut self) -> RhiResult<()> {
        if !self.images.is_empty() || !self.ring.is_empty() {
            self.destroy()?;
        }

        let result = if self.headless {
            self.create_headless()
        } else {
            self.create_surface_chain()
        };
        if let Err(e) = result {
            // Leave nothing half-built behind.
            self.release();
            return Err(e);
        }

        info!(
            "{} chain ready: {}x{}, {:?}, {} images",
            if self.headless { "Headless" } else { "Surface" },
            self.extent.width,
            self.extent.height,
            self.surface_format.format,
            self.images.len()
        );
        Ok(())
    }

    fn create_surface_chain(&mut self) -> RhiResult<()> {
        let backend = self.device.backend();
        let support = SurfaceSupport::query(backend)?;
        if !support.is_adequate() {
            return Err(RhiError::SurfaceError(
                "surface reports no formats or present modes".into(),
            ));
        }

        let surface_format = choose_surface_format(&support.formats, &self.preferences.formats)?;
        let present_mode =
            choose_present_mode(&support.present_modes, &self.preferences.present_modes)?;
        let extent = choose_extent(
            &support.capabilities,
            self.preferences.extent.width,
            self.preferences.extent.height,
        );
        let image_count = determine_image_count(&support.capabilities);

        // Producers clear and copy into presentable images.
        let usage = vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST;
        let missing = usage & !support.capabilities.supported_usage_flags;
        if !missing.is_empty() {
            return Err(RhiError::UnsupportedSurfaceUsage(missing));
        }

        let desc = SwapchainDesc {
            min_image_count: image_count,
            surface_format,
            extent,
            present_mode,
            pre_transform: support.capabilities.current_transform,
            usage,
        };
        self.swapchain = backend.create_swapchain(&desc)?;
        self.surface_format = surface_format;
        self.present_mode = present_mode;
        self.extent = extent;

        for image in backend.swapchain_images(self.swapchain)? {
            self.images.push(PresentableImage::new(
                &self.device,
                image,
                surface_format.format,
            )?);
        }
        Ok(())
    }

    fn create_headless(&mut self) -> RhiResult<()> {
        let surface_format = self.preferences.formats[0];
        let extent = self.preferences.extent;
        if extent.width == 0 || extent.height == 0 {
            return Err(RhiError::InvalidArgument(format!(
                "headless extent {}x{} is empty",
                extent.width, extent.height
            )));
        }
        let byte_size = image_byte_size(surface_format.format, extent)?;

        self.surface_format = surface_format;
        self.extent = extent;
        self.next_ring_index = 0;
        let pool = self.ring_pool.insert(CommandPool::new(self.device.clone())?);

        for _ in 0..HEADLESS_RING_SIZE {
            let mut image = self.allocator.create_image(
                extent,
                surface_format.format,
                vk::ImageTiling::OPTIMAL,
                vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::TRANSFER_DST,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
                Mapping::Unmapped,
            )?;
            let buffer = match self.allocator.create_buffer(
                byte_size,
                vk::BufferUsageFlags::TRANSFER_DST,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                Mapping::Mapped,
            ) {
                Ok(buffer) => buffer,
                Err(e) => {
                    self.allocator.destroy_image(&mut image);
                    return Err(e);
                }
            };

            // Push before anything else can fail so `release` cleans it up.
            let copy_command = CommandBuffer::new(self.device.clone(), pool);
            let copy_done = Fence::new(self.device.clone(), true);
            let (copy_command, copy_done) = match (copy_command, copy_done) {
                (Ok(cmd), Ok(fence)) => (cmd, fence),
                (Err(e), _) | (_, Err(e)) => {
                    let mut buffer = buffer;
                    self.allocator.destroy_buffer(&mut buffer);
                    self.allocator.destroy_image(&mut image);
                    return Err(e);
                }
            };
            let presentable =
                PresentableImage::new(&self.device, image.handle(), surface_format.format);
            self.ring.push(HeadlessImage {
                image,
                buffer,
                copy_command,
                copy_done,
                pending_save: None,
            });
            self.images.push(presentable?);
            record_readback(&self.ring[self.ring.len() - 1], extent)?;
        }
        Ok(())
    }

    /// Waits for the device to go idle, then releases every per-image resource.
    pub fn destroy(&mut self) -> RhiResult<()> {
        self.device.wait_idle()?;
        self.release();
        Ok(())
    }

    fn release(&mut self) {
        self.images.clear();

        for mut slot in self.ring.drain(..) {
            if let Some(path) = slot.pending_save.take() {
                warn!(
                    "Discarding pending save of {} while destroying the headless ring",
                    path.display()
                );
            }
            self.allocator.destroy_buffer(&mut slot.buffer);
            self.allocator.destroy_image(&mut slot.image);
        }
        self.ring_pool = None;

        if self.swapchain != vk::SwapchainKHR::null() {
            self.device.backend().destroy_swapchain(self.swapchain);
            debug!(
                "Swapchain destroyed (was {}x{})",
                self.extent.width, self.extent.height
            );
            self.swapchain = vk::SwapchainKHR::null();
        }
    }

    // =========================================================================
    // Surface Mode
    // =========================================================================

    /// Requests the next image, blocking until one is free. `signal` is
    /// signaled once the image may be written.
    pub fn acquire(&mut self, signal: &Semaphore) -> RhiResult<AcquireOutcome> {
        match self
            .device
            .backend()
            .acquire_next_image(self.swapchain, signal.handle())
        {
            Ok((index, suboptimal)) => Ok(AcquireOutcome::Image { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    /// Queues presentation of `index`, gated on its "image done" semaphore.
    pub fn present(&mut self, index: u32) -> RhiResult<PresentOutcome> {
        let wait = self.image(index)?.image_done.handle();
        match self
            .device
            .backend()
            .queue_present(self.swapchain, index, wait)
        {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    // =========================================================================
    // Headless Mode
    // =========================================================================

    /// Takes the next ring slot.
    ///
    /// Waits for the slot's previous readback, writes the save requested for
    /// it last cycle, records `save` for the next cycle and signals `signal`
    /// through an empty submission.
    pub fn acquire_headless(
        &mut self,
        save: Option<PathBuf>,
        signal: &Semaphore,
    ) -> RhiResult<u32> {
        if self.ring.is_empty() {
            return Err(RhiError::InvalidArgument("chain is not headless".into()));
        }
        let index = self.next_ring_index;
        self.next_ring_index = (index + 1) % self.ring.len();

        let extent = self.extent;
        let format = self.surface_format.format;
        let slot = &mut self.ring[index];
        slot.copy_done.wait()?;
        if let Some(path) = slot.pending_save.take() {
            save_slot(slot, &path, extent, format)?;
        }
        slot.pending_save = save;
        slot.copy_done.reset()?;

        let signal_semaphores = [signal.handle()];
        self.device.submit(
            &[SubmitBatch {
                signal_semaphores: &signal_semaphores,
                ..Default::default()
            }],
            None,
        )?;
        Ok(index as u32)
    }

    /// Submits the slot's readback copy, gated on its "image done" semaphore
    /// and signaling its copy fence.
    pub fn present_headless(&mut self, index: u32) -> RhiResult<()> {
        let wait = [self.image(index)?.image_done.handle()];
        let slot = self
            .ring
            .get(index as usize)
            .ok_or_else(|| RhiError::InvalidArgument(format!("no headless slot {index}")))?;

        let stages = [vk::PipelineStageFlags::TRANSFER];
        let command_buffers = [slot.copy_command.handle()];
        self.device.submit(
            &[SubmitBatch {
                wait_semaphores: &wait,
                wait_stages: &stages,
                command_buffers: &command_buffers,
                ..Default::default()
            }],
            Some(&slot.copy_done),
        )
    }

    /// Waits for every slot and writes any save still pending. Returns the
    /// number of images written.
    pub fn flush_pending_saves(&mut self) -> RhiResult<usize> {
        let extent = self.extent;
        let format = self.surface_format.format;
        let mut saved = 0;
        for slot in &mut self.ring {
            if let Some(path) = slot.pending_save.take() {
                slot.copy_done.wait()?;
                save_slot(slot, &path, extent, format)?;
                saved += 1;
            }
        }
        Ok(saved)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Layout producers must leave an image in before it is presented.
    #[inline]
    pub fn final_layout(&self) -> vk::ImageLayout {
        if self.headless {
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL
        } else {
            vk::ImageLayout::PRESENT_SRC_KHR
        }
    }

    #[inline]
    pub fn is_headless(&self) -> bool {
        self.headless
    }

    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        self.surface_format
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.surface_format.format
    }

    /// Present mode in use; meaningless in headless mode.
    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    #[inline]
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    #[inline]
    pub fn images(&self) -> &[PresentableImage] {
        &self.images
    }

    pub fn image(&self, index: u32) -> RhiResult<&PresentableImage> {
        self.images
            .get(index as usize)
            .ok_or_else(|| RhiError::InvalidArgument(format!("no presentable image {index}")))
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            warn!("Failed to wait for device idle before destroying chain: {}", e);
        }
        self.release();
    }
}

fn record_readback(slot: &HeadlessImage, extent: vk::Extent2D) -> RhiResult<()> {
    let region = vk::BufferImageCopy::default()
        .buffer_offset(0)
        .buffer_row_length(0)
        .buffer_image_height(0)
        .image_subresource(vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        })
        .image_offset(vk::Offset3D::default())
        .image_extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        });

    slot.copy_command.begin_reusable()?;
    slot.copy_command.copy_image_to_buffer(
        slot.image.handle(),
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        slot.buffer.handle(),
        &[region],
    );
    slot.copy_command.end()
}

fn save_slot(
    slot: &HeadlessImage,
    path: &std::path::Path,
    extent: vk::Extent2D,
    format: vk::Format,
) -> RhiResult<()> {
    let bytes = slot
        .buffer
        .mapped_bytes()
        .ok_or_else(|| RhiError::InvalidArgument("readback buffer is not host mapped".into()))?;
    write_ppm(path, extent, format, bytes)?;
    info!("Saved frame to {}", path.display());
    Ok(())
}

/// Returns the first preferred format the surface supports.
fn choose_surface_format(
    available: &[vk::SurfaceFormatKHR],
    preferred: &[vk::SurfaceFormatKHR],
) -> RhiResult<vk::SurfaceFormatKHR> {
    let chosen = preferred.iter().copied().find(|p| {
        available
            .iter()
            .any(|a| a.format == p.format && a.color_space == p.color_space)
    });

    match chosen {
        Some(format) => {
            debug!(
                "Selected surface format {:?} with {:?}",
                format.format, format.color_space
            );
            Ok(format)
        }
        None => Err(RhiError::NoSurfaceFormat(
            preferred.iter().map(|f| f.format).collect(),
        )),
    }
}

/// Returns the first preferred present mode the surface supports.
fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    preferred: &[vk::PresentModeKHR],
) -> RhiResult<vk::PresentModeKHR> {
    let mode = preferred
        .iter()
        .copied()
        .find(|mode| available.contains(mode))
        .ok_or_else(|| RhiError::NoPresentMode(preferred.to_vec()))?;
    debug!("Selected {:?} present mode", mode);
    Ok(mode)
}

/// Chooses the swapchain extent (resolution).
///
/// If the current extent is not set (width/height are u32::MAX),
/// clamps the requested size to the surface's min/max extents.
fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let extent = vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    };

    debug!(
        "Calculated extent: {}x{} (requested: {}x{})",
        extent.width, extent.height, width, height
    );

    extent
}

/// One more than the minimum, capped by the maximum when there is one.
fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;

    // If max_image_count is 0, there's no maximum
    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn srgb(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn test_choose_surface_format_follows_preference_order() {
        let available = vec![
            srgb(vk::Format::R8G8B8A8_UNORM),
            srgb(vk::Format::B8G8R8A8_SRGB),
            srgb(vk::Format::B8G8R8A8_UNORM),
        ];
        let preferred = [srgb(vk::Format::B8G8R8A8_UNORM), srgb(vk::Format::B8G8R8A8_SRGB)];

        let selected = choose_surface_format(&available, &preferred).unwrap();
        assert_eq!(selected.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(selected.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn test_choose_surface_format_requires_matching_color_space() {
        let available = vec![vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT,
        }];
        let preferred = [srgb(vk::Format::B8G8R8A8_SRGB)];

        let result = choose_surface_format(&available, &preferred);
        assert!(matches!(result, Err(RhiError::NoSurfaceFormat(_))));
    }

    #[test]
    fn test_choose_present_mode_follows_preference_order() {
        let available = vec![
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ];

        let preferred = [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO];
        assert_eq!(
            choose_present_mode(&available, &preferred).unwrap(),
            vk::PresentModeKHR::MAILBOX
        );

        let preferred = [vk::PresentModeKHR::FIFO_RELAXED, vk::PresentModeKHR::FIFO];
        assert_eq!(
            choose_present_mode(&available, &preferred).unwrap(),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_choose_present_mode_has_no_fallback() {
        let available = vec![vk::PresentModeKHR::FIFO];
        let preferred = [vk::PresentModeKHR::MAILBOX];
        assert!(matches!(
            choose_present_mode(&available, &preferred),
            Err(RhiError::NoPresentMode(_))
        ));
    }

    #[test]
    fn test_choose_extent_uses_current() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        };

        let extent = choose_extent(&capabilities, 800, 600);
        assert_eq!(extent.width, 1920);
        assert_eq!(extent.height, 1080);
    }

    #[test]
    fn test_choose_extent_clamps_to_limits() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 100,
                height: 100,
            },
            max_image_extent: vk::Extent2D {
                width: 2000,
                height: 2000,
            },
            ..Default::default()
        };

        let extent = choose_extent(&capabilities, 3000, 3000);
        assert_eq!(extent.width, 2000);
        assert_eq!(extent.height, 2000);

        let extent = choose_extent(&capabilities, 50, 50);
        assert_eq!(extent.width, 100);
        assert_eq!(extent.height, 100);

        let extent = choose_extent(&capabilities, 800, 600);
        assert_eq!(extent.width, 800);
        assert_eq!(extent.height, 600);
    }

    #[test]
    fn test_determine_image_count() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 2,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capabilities), 2);

        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capabilities), 3);

        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0, // 0 means no limit
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capabilities), 3);
    }

    #[test]
    fn test_surface_support_is_adequate() {
        let adequate = SurfaceSupport {
            capabilities: vk::SurfaceCapabilitiesKHR::default(),
            formats: vec![vk::SurfaceFormatKHR::default()],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        assert!(adequate.is_adequate());

        let no_modes = SurfaceSupport {
            capabilities: vk::SurfaceCapabilitiesKHR::default(),
            formats: vec![vk::SurfaceFormatKHR::default()],
            present_modes: vec![],
        };
        assert!(!no_modes.is_adequate());
    }

    #[test]
    fn test_present_outcome_needs_recreate() {
        assert!(!PresentOutcome::Presented.needs_recreate());
        assert!(PresentOutcome::Suboptimal.needs_recreate());
        assert!(PresentOutcome::OutOfDate.needs_recreate());
    }
}
