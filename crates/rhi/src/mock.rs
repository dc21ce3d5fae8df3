//! In-process software device for tests.
//!
//! [`MockBackend`] implements [`Backend`] on host memory. Copies, clears and
//! readbacks move real bytes, so data round trips can be checked exactly.
//! Layout transitions, fences, semaphores and command buffer states are
//! tracked, and misuse (waiting on a fence nothing will signal, re-recording
//! a command buffer that is still in flight, presenting an image that was
//! never acquired, ...) is collected as a validation error instead of
//! hanging or corrupting memory.
//!
//! Submissions complete immediately by default. In deferred mode they stay
//! pending until the CPU waits on their fence or on the queue, which makes
//! the number of frames in flight observable.
//!
//! `MockBackend` is a cheap handle: clone it before handing it to
//! [`Device::new`](crate::device::Device::new) to keep inspecting the device.

use std::collections::{HashMap, VecDeque};
use std::ptr::NonNull;
use std::sync::Arc;

use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use parking_lot::Mutex;
use tracing::warn;

use crate::backend::{Backend, SubmitBatch, SwapchainDesc};
use crate::format::{image_byte_size, pack_rgba8, texel_block};

const MOCK_ALIGNMENT: u64 = 256;

/// Entry of the mock device's call log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MockEvent {
    Submit {
        wait: Vec<vk::Semaphore>,
        signal: Vec<vk::Semaphore>,
        command_buffers: Vec<vk::CommandBuffer>,
        fence: vk::Fence,
    },
    FenceSignaled(vk::Fence),
    WaitFence(vk::Fence),
    ResetFence(vk::Fence),
    Barrier {
        image: vk::Image,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
    },
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
    },
    CopyBufferToImage {
        buffer: vk::Buffer,
        image: vk::Image,
    },
    CopyImageToBuffer {
        image: vk::Image,
        buffer: vk::Buffer,
    },
    ClearImage(vk::Image),
    QueueWaitIdle,
    DeviceWaitIdle,
    SwapchainCreated {
        swapchain: vk::SwapchainKHR,
        width: u32,
        height: u32,
        image_count: u32,
    },
    SwapchainDestroyed(vk::SwapchainKHR),
    Acquire {
        swapchain: vk::SwapchainKHR,
        index: u32,
        suboptimal: bool,
    },
    AcquireOutOfDate(vk::SwapchainKHR),
    Present {
        swapchain: vk::SwapchainKHR,
        index: u32,
    },
    PresentOutOfDate(vk::SwapchainKHR),
}

#[derive(Clone, Copy, Debug)]
struct BarrierRecord {
    image: u64,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
}

#[derive(Clone, Debug)]
enum Command {
    CopyBuffer {
        src: u64,
        dst: u64,
        regions: Vec<vk::BufferCopy>,
    },
    CopyBufferToImage {
        buffer: u64,
        image: u64,
        layout: vk::ImageLayout,
        regions: Vec<vk::BufferImageCopy>,
    },
    CopyImageToBuffer {
        image: u64,
        layout: vk::ImageLayout,
        buffer: u64,
        regions: Vec<vk::BufferImageCopy>,
    },
    Barrier {
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barriers: Vec<BarrierRecord>,
    },
    Clear {
        image: u64,
        layout: vk::ImageLayout,
        color: [f32; 4],
    },
}

impl Command {
    fn resources(&self) -> Vec<u64> {
        match self {
            Command::CopyBuffer { src, dst, .. } => vec![*src, *dst],
            Command::CopyBufferToImage { buffer, image, .. }
            | Command::CopyImageToBuffer { image, buffer, .. } => vec![*buffer, *image],
            Command::Barrier { barriers, .. } => barriers.iter().map(|b| b.image).collect(),
            Command::Clear { image, .. } => vec![*image],
        }
    }
}

#[derive(Debug)]
enum Storage {
    Unbound,
    Memory { memory: u64, offset: u64 },
    Owned(Box<[u8]>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RecordState {
    Initial,
    Recording,
    Executable,
}

#[derive(Debug)]
enum Object {
    Memory {
        data: Box<[u8]>,
        type_index: u32,
        mapped: bool,
    },
    Buffer {
        size: u64,
        storage: Storage,
    },
    Image {
        extent: vk::Extent2D,
        format: vk::Format,
        byte_size: u64,
        storage: Storage,
        layout: vk::ImageLayout,
        swapchain_owned: bool,
    },
    ImageView,
    CommandPool,
    CommandBuffer {
        pool: u64,
        state: RecordState,
        commands: Vec<Command>,
    },
    Fence {
        signaled: bool,
    },
    Semaphore {
        signaled: bool,
    },
    Swapchain {
        images: Vec<u64>,
        held: Vec<bool>,
        next: usize,
        stale: bool,
    },
}

struct Pending {
    commands: Vec<Command>,
    fence: Option<u64>,
    resources: Vec<u64>,
}

struct SurfaceState {
    capabilities: vk::SurfaceCapabilitiesKHR,
    formats: Vec<vk::SurfaceFormatKHR>,
    present_modes: Vec<vk::PresentModeKHR>,
}

struct MockState {
    next_handle: u64,
    objects: HashMap<u64, Object>,
    pending: VecDeque<Pending>,
    deferred: bool,
    events: Vec<MockEvent>,
    validation_errors: Vec<String>,
    max_outstanding_fences: usize,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    memory_type_bits: u32,
    format_overrides: HashMap<vk::Format, vk::FormatProperties>,
    surface: Option<SurfaceState>,
    acquire_results: VecDeque<vk::Result>,
    present_results: VecDeque<vk::Result>,
}

/// Software device; see the module docs.
#[derive(Clone)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// Creates a device without a presentation surface.
    pub fn new() -> Self {
        Self::with_memory_types(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT
                | vk::MemoryPropertyFlags::HOST_CACHED,
        ])
    }

    /// Creates a device with a surface whose current extent is `width` x `height`.
    pub fn with_surface(width: u32, height: u32) -> Self {
        let mock = Self::new();
        mock.state.lock().surface = Some(SurfaceState {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 8,
                current_extent: vk::Extent2D { width, height },
                min_image_extent: vk::Extent2D {
                    width: 1,
                    height: 1,
                },
                max_image_extent: vk::Extent2D {
                    width: 4096,
                    height: 4096,
                },
                max_image_array_layers: 1,
                supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
                supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::TRANSFER_DST
                    | vk::ImageUsageFlags::TRANSFER_SRC,
            },
            formats: vec![
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
            ],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        });
        mock
    }

    /// Creates a surfaceless device reporting one heap per memory type.
    ///
    /// Past the 16-heap limit, types share heaps round-robin.
    pub fn with_memory_types(types: &[vk::MemoryPropertyFlags]) -> Self {
        let heap_count = types.len().min(vk::MAX_MEMORY_HEAPS);
        let mut memory_properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            memory_heap_count: heap_count as u32,
            ..Default::default()
        };
        for (i, flags) in types.iter().enumerate() {
            let heap = i % vk::MAX_MEMORY_HEAPS;
            memory_properties.memory_types[i] = vk::MemoryType {
                property_flags: *flags,
                heap_index: heap as u32,
            };
            if heap == i {
                memory_properties.memory_heaps[heap] = vk::MemoryHeap {
                    size: 256 * 1024 * 1024,
                    flags: if flags.contains(vk::MemoryPropertyFlags::DEVICE_LOCAL) {
                        vk::MemoryHeapFlags::DEVICE_LOCAL
                    } else {
                        vk::MemoryHeapFlags::empty()
                    },
                };
            }
        }
        // Up to 32 types; the shift alone would overflow at 32.
        let memory_type_bits = u32::MAX
            .checked_shr(32 - types.len() as u32)
            .unwrap_or(0);

        Self {
            state: Arc::new(Mutex::new(MockState {
                next_handle: 1,
                objects: HashMap::new(),
                pending: VecDeque::new(),
                deferred: false,
                events: Vec::new(),
                validation_errors: Vec::new(),
                max_outstanding_fences: 0,
                memory_properties,
                memory_type_bits,
                format_overrides: HashMap::new(),
                surface: None,
                acquire_results: VecDeque::new(),
                present_results: VecDeque::new(),
            })),
        }
    }

    // =========================================================================
    // Scripting
    // =========================================================================

    /// When deferred, submissions complete only when the CPU waits for them.
    pub fn set_deferred(&self, deferred: bool) {
        self.state.lock().deferred = deferred;
    }

    /// Completes every pending submission.
    pub fn complete_all(&self) {
        self.state.lock().complete_all();
    }

    /// Memory type bits reported in every object's memory requirements.
    pub fn set_memory_type_bits(&self, bits: u32) {
        self.state.lock().memory_type_bits = bits;
    }

    pub fn set_format_properties(&self, format: vk::Format, properties: vk::FormatProperties) {
        self.state
            .lock()
            .format_overrides
            .insert(format, properties);
    }

    /// Resizes the surface; existing swapchains become out of date.
    pub fn set_surface_extent(&self, width: u32, height: u32) {
        let mut state = self.state.lock();
        if let Some(surface) = state.surface.as_mut() {
            surface.capabilities.current_extent = vk::Extent2D { width, height };
        }
        state.mark_swapchains_stale();
    }

    /// Replaces the surface capabilities; existing swapchains become out of date.
    pub fn set_surface_capabilities(&self, capabilities: vk::SurfaceCapabilitiesKHR) {
        let mut state = self.state.lock();
        if let Some(surface) = state.surface.as_mut() {
            surface.capabilities = capabilities;
        }
        state.mark_swapchains_stale();
    }

    pub fn set_surface_formats(&self, formats: Vec<vk::SurfaceFormatKHR>) {
        if let Some(surface) = self.state.lock().surface.as_mut() {
            surface.formats = formats;
        }
    }

    pub fn set_present_modes(&self, present_modes: Vec<vk::PresentModeKHR>) {
        if let Some(surface) = self.state.lock().surface.as_mut() {
            surface.present_modes = present_modes;
        }
    }

    /// Queues a result (`ERROR_OUT_OF_DATE_KHR`, `SUBOPTIMAL_KHR`, or any
    /// error) for a future image acquisition.
    pub fn inject_acquire_result(&self, result: vk::Result) {
        self.state.lock().acquire_results.push_back(result);
    }

    /// Queues a result for a future presentation.
    pub fn inject_present_result(&self, result: vk::Result) {
        self.state.lock().present_results.push_back(result);
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn events(&self) -> Vec<MockEvent> {
        self.state.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.lock().events.clear();
    }

    /// Misuse detected so far. Empty for a correct engine.
    pub fn validation_errors(&self) -> Vec<String> {
        self.state.lock().validation_errors.clone()
    }

    /// Largest number of submitted, not yet signaled fences seen at once.
    pub fn max_outstanding_fences(&self) -> usize {
        self.state.lock().max_outstanding_fences
    }

    pub fn outstanding_fences(&self) -> usize {
        self.state.lock().outstanding_fences()
    }

    pub fn is_alive<H: Handle>(&self, handle: H) -> bool {
        self.state.lock().objects.contains_key(&handle.as_raw())
    }

    pub fn fence_signaled(&self, fence: vk::Fence) -> bool {
        matches!(
            self.state.lock().objects.get(&fence.as_raw()),
            Some(Object::Fence { signaled: true })
        )
    }

    /// Contents of an image as tightly packed texels.
    pub fn read_image(&self, image: vk::Image) -> Option<Vec<u8>> {
        self.state
            .lock()
            .storage(image.as_raw())
            .map(<[u8]>::to_vec)
    }

    pub fn image_layout(&self, image: vk::Image) -> Option<vk::ImageLayout> {
        match self.state.lock().objects.get(&image.as_raw()) {
            Some(Object::Image { layout, .. }) => Some(*layout),
            _ => None,
        }
    }

    /// Memory type index backing a live allocation.
    pub fn memory_type_of(&self, memory: vk::DeviceMemory) -> Option<u32> {
        match self.state.lock().objects.get(&memory.as_raw()) {
            Some(Object::Memory { type_index, .. }) => Some(*type_index),
            _ => None,
        }
    }

    fn count(&self, pred: impl Fn(&Object) -> bool) -> usize {
        self.state.lock().objects.values().filter(|o| pred(*o)).count()
    }

    pub fn live_fences(&self) -> usize {
        self.count(|o| matches!(o, Object::Fence { .. }))
    }

    pub fn live_semaphores(&self) -> usize {
        self.count(|o| matches!(o, Object::Semaphore { .. }))
    }

    pub fn live_allocations(&self) -> usize {
        self.count(|o| matches!(o, Object::Memory { .. }))
    }

    pub fn live_buffers(&self) -> usize {
        self.count(|o| matches!(o, Object::Buffer { .. }))
    }

    /// Images created by the engine; swapchain-owned images are not counted.
    pub fn live_images(&self) -> usize {
        self.count(|o| {
            matches!(
                o,
                Object::Image {
                    swapchain_owned: false,
                    ..
                }
            )
        })
    }

    pub fn live_image_views(&self) -> usize {
        self.count(|o| matches!(o, Object::ImageView))
    }

    pub fn live_swapchains(&self) -> usize {
        self.count(|o| matches!(o, Object::Swapchain { .. }))
    }
}

fn default_format_properties(format: vk::Format) -> vk::FormatProperties {
    let color = vk::FormatFeatureFlags::SAMPLED_IMAGE
        | vk::FormatFeatureFlags::COLOR_ATTACHMENT
        | vk::FormatFeatureFlags::TRANSFER_SRC
        | vk::FormatFeatureFlags::TRANSFER_DST
        | vk::FormatFeatureFlags::BLIT_SRC
        | vk::FormatFeatureFlags::BLIT_DST;
    match format {
        vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::B8G8R8A8_SRGB
        | vk::Format::R16G16B16A16_SFLOAT
        | vk::Format::R32G32B32A32_SFLOAT => vk::FormatProperties {
            linear_tiling_features: vk::FormatFeatureFlags::TRANSFER_SRC
                | vk::FormatFeatureFlags::TRANSFER_DST
                | vk::FormatFeatureFlags::SAMPLED_IMAGE,
            optimal_tiling_features: color,
            buffer_features: vk::FormatFeatureFlags::empty(),
        },
        vk::Format::D32_SFLOAT => vk::FormatProperties {
            optimal_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
                | vk::FormatFeatureFlags::SAMPLED_IMAGE,
            ..Default::default()
        },
        _ => vk::FormatProperties::default(),
    }
}

fn round_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

impl MockState {
    fn alloc_handle(&mut self, object: Object) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.objects.insert(handle, object);
        handle
    }

    fn invalid(&mut self, message: String) -> vk::Result {
        warn!("mock validation: {}", message);
        self.validation_errors.push(message);
        vk::Result::ERROR_VALIDATION_FAILED_EXT
    }

    fn in_flight(&self, handle: u64) -> bool {
        self.pending
            .iter()
            .any(|p| p.fence == Some(handle) || p.resources.contains(&handle))
    }

    /// Removes an object, reporting destruction of anything still in flight.
    fn destroy(&mut self, handle: u64, what: &str) -> Option<Object> {
        if handle == 0 {
            return None;
        }
        if self.in_flight(handle) {
            self.invalid(format!("{what} {handle:#x} destroyed while in use"));
        }
        let removed = self.objects.remove(&handle);
        if removed.is_none() {
            self.invalid(format!("{what} {handle:#x} destroyed twice or never created"));
        }
        removed
    }

    fn mark_swapchains_stale(&mut self) {
        for object in self.objects.values_mut() {
            if let Object::Swapchain { stale, .. } = object {
                *stale = true;
            }
        }
    }

    fn outstanding_fences(&self) -> usize {
        self.pending.iter().filter(|p| p.fence.is_some()).count()
    }

    // ---- byte storage -------------------------------------------------------

    fn locate(&self, handle: u64) -> Option<(Option<(u64, u64)>, u64)> {
        match self.objects.get(&handle)? {
            Object::Buffer { size, storage } => match storage {
                Storage::Memory { memory, offset } => Some((Some((*memory, *offset)), *size)),
                _ => None,
            },
            Object::Image {
                byte_size, storage, ..
            } => match storage {
                Storage::Memory { memory, offset } => Some((Some((*memory, *offset)), *byte_size)),
                Storage::Owned(_) => Some((None, *byte_size)),
                Storage::Unbound => None,
            },
            _ => None,
        }
    }

    fn storage(&self, handle: u64) -> Option<&[u8]> {
        let (bound, len) = self.locate(handle)?;
        match bound {
            Some((memory, offset)) => match self.objects.get(&memory)? {
                Object::Memory { data, .. } => data.get(offset as usize..(offset + len) as usize),
                _ => None,
            },
            None => match self.objects.get(&handle)? {
                Object::Image {
                    storage: Storage::Owned(data),
                    ..
                } => Some(&data[..]),
                _ => None,
            },
        }
    }

    fn storage_mut(&mut self, handle: u64) -> Option<&mut [u8]> {
        let (bound, len) = self.locate(handle)?;
        match bound {
            Some((memory, offset)) => match self.objects.get_mut(&memory)? {
                Object::Memory { data, .. } => {
                    data.get_mut(offset as usize..(offset + len) as usize)
                }
                _ => None,
            },
            None => match self.objects.get_mut(&handle)? {
                Object::Image {
                    storage: Storage::Owned(data),
                    ..
                } => Some(&mut data[..]),
                _ => None,
            },
        }
    }

    fn copy_bytes(
        &mut self,
        src: u64,
        src_offset: usize,
        dst: u64,
        dst_offset: usize,
        len: usize,
    ) -> Result<(), String> {
        let bytes = self
            .storage(src)
            .and_then(|s| s.get(src_offset..src_offset + len))
            .ok_or_else(|| format!("read of {len} bytes at {src_offset} outside {src:#x}"))?
            .to_vec();
        let target = self
            .storage_mut(dst)
            .and_then(|s| s.get_mut(dst_offset..dst_offset + len))
            .ok_or_else(|| format!("write of {len} bytes at {dst_offset} outside {dst:#x}"))?;
        target.copy_from_slice(&bytes);
        Ok(())
    }

    fn image_info(&self, image: u64) -> Result<(vk::Extent2D, vk::Format, vk::ImageLayout), String> {
        match self.objects.get(&image) {
            Some(Object::Image {
                extent,
                format,
                layout,
                ..
            }) => Ok((*extent, *format, *layout)),
            _ => Err(format!("unknown image {image:#x}")),
        }
    }

    fn set_layout(&mut self, image: u64, new_layout: vk::ImageLayout) {
        if let Some(Object::Image { layout, .. }) = self.objects.get_mut(&image) {
            *layout = new_layout;
        }
    }

    fn copy_buffer_image(
        &mut self,
        buffer: u64,
        image: u64,
        region: &vk::BufferImageCopy,
        to_image: bool,
    ) -> Result<(), String> {
        let (extent, format, _) = self.image_info(image)?;
        let texel = match texel_block(format) {
            Some(block) if block.texels == 1 => block.bytes as usize,
            _ => return Err(format!("copies of {format:?} images are not emulated")),
        };
        let width = region.image_extent.width as usize;
        let height = region.image_extent.height as usize;
        let row_length = match region.buffer_row_length {
            0 => width,
            n => n as usize,
        };
        let x = region.image_offset.x.max(0) as usize;
        let y = region.image_offset.y.max(0) as usize;
        if x + width > extent.width as usize || y + height > extent.height as usize {
            return Err(format!("copy region exceeds image {image:#x}"));
        }

        let image_row = extent.width as usize * texel;
        for row in 0..height {
            let buffer_offset = region.buffer_offset as usize + row * row_length * texel;
            let image_offset = (y + row) * image_row + x * texel;
            if to_image {
                self.copy_bytes(buffer, buffer_offset, image, image_offset, width * texel)?;
            } else {
                self.copy_bytes(image, image_offset, buffer, buffer_offset, width * texel)?;
            }
        }
        Ok(())
    }

    fn expect_layout(
        &self,
        image: u64,
        declared: vk::ImageLayout,
        allowed: &[vk::ImageLayout],
    ) -> Result<(), String> {
        let (_, _, current) = self.image_info(image)?;
        if current != declared {
            return Err(format!(
                "image {image:#x} used as {declared:?} but is in {current:?}"
            ));
        }
        if !allowed.contains(&declared) && declared != vk::ImageLayout::GENERAL {
            return Err(format!("layout {declared:?} not valid for this command"));
        }
        Ok(())
    }

    // ---- execution ------------------------------------------------------------

    fn execute(&mut self, command: &Command) -> Result<(), String> {
        match command {
            Command::CopyBuffer { src, dst, regions } => {
                for region in regions {
                    self.copy_bytes(
                        *src,
                        region.src_offset as usize,
                        *dst,
                        region.dst_offset as usize,
                        region.size as usize,
                    )?;
                }
                self.events.push(MockEvent::CopyBuffer {
                    src: vk::Buffer::from_raw(*src),
                    dst: vk::Buffer::from_raw(*dst),
                });
            }
            Command::CopyBufferToImage {
                buffer,
                image,
                layout,
                regions,
            } => {
                self.expect_layout(*image, *layout, &[vk::ImageLayout::TRANSFER_DST_OPTIMAL])?;
                for region in regions {
                    self.copy_buffer_image(*buffer, *image, region, true)?;
                }
                self.events.push(MockEvent::CopyBufferToImage {
                    buffer: vk::Buffer::from_raw(*buffer),
                    image: vk::Image::from_raw(*image),
                });
            }
            Command::CopyImageToBuffer {
                image,
                layout,
                buffer,
                regions,
            } => {
                self.expect_layout(*image, *layout, &[vk::ImageLayout::TRANSFER_SRC_OPTIMAL])?;
                for region in regions {
                    self.copy_buffer_image(*buffer, *image, region, false)?;
                }
                self.events.push(MockEvent::CopyImageToBuffer {
                    image: vk::Image::from_raw(*image),
                    buffer: vk::Buffer::from_raw(*buffer),
                });
            }
            Command::Barrier {
                src_stage,
                dst_stage,
                barriers,
            } => {
                for barrier in barriers {
                    let (_, _, current) = self.image_info(barrier.image)?;
                    if barrier.old_layout != vk::ImageLayout::UNDEFINED
                        && barrier.old_layout != current
                    {
                        return Err(format!(
                            "barrier on {:#x} expects {:?} but image is in {:?}",
                            barrier.image, barrier.old_layout, current
                        ));
                    }
                    self.set_layout(barrier.image, barrier.new_layout);
                    self.events.push(MockEvent::Barrier {
                        image: vk::Image::from_raw(barrier.image),
                        old_layout: barrier.old_layout,
                        new_layout: barrier.new_layout,
                        src_stage: *src_stage,
                        dst_stage: *dst_stage,
                    });
                }
            }
            Command::Clear {
                image,
                layout,
                color,
            } => {
                self.expect_layout(*image, *layout, &[vk::ImageLayout::TRANSFER_DST_OPTIMAL])?;
                let (_, format, _) = self.image_info(*image)?;
                let texel = pack_rgba8(format, *color)
                    .ok_or_else(|| format!("clears of {format:?} images are not emulated"))?;
                let data = self
                    .storage_mut(*image)
                    .ok_or_else(|| format!("image {image:#x} has no memory bound"))?;
                for chunk in data.chunks_exact_mut(4) {
                    chunk.copy_from_slice(&texel);
                }
                self.events
                    .push(MockEvent::ClearImage(vk::Image::from_raw(*image)));
            }
        }
        Ok(())
    }

    fn retire(&mut self, pending: Pending) {
        for command in &pending.commands {
            if let Err(message) = self.execute(command) {
                self.invalid(message);
            }
        }
        if let Some(fence) = pending.fence {
            if let Some(Object::Fence { signaled }) = self.objects.get_mut(&fence) {
                *signaled = true;
            }
            self.events
                .push(MockEvent::FenceSignaled(vk::Fence::from_raw(fence)));
        }
    }

    fn complete_all(&mut self) {
        while let Some(pending) = self.pending.pop_front() {
            self.retire(pending);
        }
    }

    fn complete_until(&mut self, fence: u64) {
        while let Some(pending) = self.pending.pop_front() {
            let done = pending.fence == Some(fence);
            self.retire(pending);
            if done {
                break;
            }
        }
    }

    fn record(&mut self, cmd: vk::CommandBuffer, command: Command) {
        match self.objects.get_mut(&cmd.as_raw()) {
            Some(Object::CommandBuffer {
                state: RecordState::Recording,
                commands,
                ..
            }) => commands.push(command),
            _ => {
                self.invalid(format!("command recorded into {cmd:?} outside begin/end"));
            }
        }
    }

    fn signal_semaphore(&mut self, semaphore: u64) -> Result<(), vk::Result> {
        match self.objects.get_mut(&semaphore) {
            Some(Object::Semaphore { signaled }) if !*signaled => {
                *signaled = true;
                Ok(())
            }
            Some(Object::Semaphore { .. }) => Err(self.invalid(format!(
                "semaphore {semaphore:#x} signaled while already signaled"
            ))),
            _ => Err(self.invalid(format!("unknown semaphore {semaphore:#x}"))),
        }
    }

    fn consume_semaphore(&mut self, semaphore: u64) -> Result<(), vk::Result> {
        match self.objects.get_mut(&semaphore) {
            Some(Object::Semaphore { signaled }) if *signaled => {
                *signaled = false;
                Ok(())
            }
            Some(Object::Semaphore { .. }) => Err(self.invalid(format!(
                "wait on semaphore {semaphore:#x} that nothing signals"
            ))),
            _ => Err(self.invalid(format!("unknown semaphore {semaphore:#x}"))),
        }
    }
}

impl Backend for MockBackend {
    fn name(&self) -> &str {
        "Mock Device"
    }

    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        self.state.lock().memory_properties
    }

    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        let state = self.state.lock();
        state
            .format_overrides
            .get(&format)
            .copied()
            .unwrap_or_else(|| default_format_properties(format))
    }

    fn allocate_memory(
        &self,
        size: vk::DeviceSize,
        memory_type_index: u32,
    ) -> VkResult<vk::DeviceMemory> {
        let mut state = self.state.lock();
        if memory_type_index >= state.memory_properties.memory_type_count {
            return Err(state.invalid(format!("memory type {memory_type_index} does not exist")));
        }
        let handle = state.alloc_handle(Object::Memory {
            data: vec![0u8; size as usize].into_boxed_slice(),
            type_index: memory_type_index,
            mapped: false,
        });
        Ok(vk::DeviceMemory::from_raw(handle))
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        let mut state = self.state.lock();
        if let Some(Object::Memory { mapped: true, .. }) = state.objects.get(&memory.as_raw()) {
            state.invalid(format!("memory {memory:?} freed while mapped"));
        }
        state.destroy(memory.as_raw(), "memory");
    }

    fn map_memory(&self, memory: vk::DeviceMemory, size: vk::DeviceSize) -> VkResult<NonNull<u8>> {
        let mut state = self.state.lock();
        let host_visible = |props: &vk::PhysicalDeviceMemoryProperties, index: u32| {
            props.memory_types[index as usize]
                .property_flags
                .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
        };
        let props = state.memory_properties;
        let message = match state.objects.get_mut(&memory.as_raw()) {
            Some(Object::Memory {
                data,
                type_index,
                mapped,
            }) => {
                if !host_visible(&props, *type_index) {
                    format!("memory {memory:?} mapped without HOST_VISIBLE")
                } else if *mapped {
                    format!("memory {memory:?} mapped twice")
                } else if size > data.len() as u64 {
                    format!("mapping of {size} bytes exceeds {memory:?}")
                } else {
                    *mapped = true;
                    return NonNull::new(data.as_mut_ptr())
                        .ok_or(vk::Result::ERROR_MEMORY_MAP_FAILED);
                }
            }
            _ => format!("unknown memory {memory:?}"),
        };
        state.invalid(message);
        Err(vk::Result::ERROR_MEMORY_MAP_FAILED)
    }

    fn unmap_memory(&self, memory: vk::DeviceMemory) {
        let mut state = self.state.lock();
        match state.objects.get_mut(&memory.as_raw()) {
            Some(Object::Memory { mapped, .. }) if *mapped => *mapped = false,
            _ => {
                state.invalid(format!("unmap of {memory:?} which is not mapped"));
            }
        }
    }

    fn create_buffer(&self, info: &vk::BufferCreateInfo<'_>) -> VkResult<vk::Buffer> {
        let mut state = self.state.lock();
        if info.size == 0 {
            return Err(state.invalid("buffer of zero size".into()));
        }
        let handle = state.alloc_handle(Object::Buffer {
            size: info.size,
            storage: Storage::Unbound,
        });
        Ok(vk::Buffer::from_raw(handle))
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        let state = self.state.lock();
        let size = match state.objects.get(&buffer.as_raw()) {
            Some(Object::Buffer { size, .. }) => *size,
            _ => 0,
        };
        vk::MemoryRequirements {
            size: round_up(size, MOCK_ALIGNMENT),
            alignment: MOCK_ALIGNMENT,
            memory_type_bits: state.memory_type_bits,
        }
    }

    fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()> {
        let mut state = self.state.lock();
        if !matches!(state.objects.get(&memory.as_raw()), Some(Object::Memory { .. })) {
            return Err(state.invalid(format!("bind to unknown memory {memory:?}")));
        }
        match state.objects.get_mut(&buffer.as_raw()) {
            Some(Object::Buffer { storage, .. }) if matches!(storage, Storage::Unbound) => {
                *storage = Storage::Memory {
                    memory: memory.as_raw(),
                    offset,
                };
                Ok(())
            }
            _ => Err(state.invalid(format!("buffer {buffer:?} unknown or already bound"))),
        }
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        self.state.lock().destroy(buffer.as_raw(), "buffer");
    }

    fn create_image(&self, info: &vk::ImageCreateInfo<'_>) -> VkResult<vk::Image> {
        let mut state = self.state.lock();
        let extent = vk::Extent2D {
            width: info.extent.width,
            height: info.extent.height,
        };
        if extent.width == 0 || extent.height == 0 {
            return Err(state.invalid("image with zero extent".into()));
        }
        let byte_size = image_byte_size(info.format, extent)
            .unwrap_or(u64::from(extent.width) * u64::from(extent.height) * 4);
        let handle = state.alloc_handle(Object::Image {
            extent,
            format: info.format,
            byte_size,
            storage: Storage::Unbound,
            layout: info.initial_layout,
            swapchain_owned: false,
        });
        Ok(vk::Image::from_raw(handle))
    }

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        let state = self.state.lock();
        let size = match state.objects.get(&image.as_raw()) {
            Some(Object::Image { byte_size, .. }) => *byte_size,
            _ => 0,
        };
        vk::MemoryRequirements {
            size: round_up(size, MOCK_ALIGNMENT),
            alignment: MOCK_ALIGNMENT,
            memory_type_bits: state.memory_type_bits,
        }
    }

    fn bind_image_memory(
        &self,
        image: vk::Image,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()> {
        let mut state = self.state.lock();
        if !matches!(state.objects.get(&memory.as_raw()), Some(Object::Memory { .. })) {
            return Err(state.invalid(format!("bind to unknown memory {memory:?}")));
        }
        match state.objects.get_mut(&image.as_raw()) {
            Some(Object::Image { storage, .. }) if matches!(storage, Storage::Unbound) => {
                *storage = Storage::Memory {
                    memory: memory.as_raw(),
                    offset,
                };
                Ok(())
            }
            _ => Err(state.invalid(format!("image {image:?} unknown or already bound"))),
        }
    }

    fn destroy_image(&self, image: vk::Image) {
        let mut state = self.state.lock();
        if let Some(Object::Image {
            swapchain_owned: true,
            ..
        }) = state.objects.get(&image.as_raw())
        {
            state.invalid(format!("swapchain image {image:?} destroyed directly"));
            return;
        }
        state.destroy(image.as_raw(), "image");
    }

    fn create_image_view(&self, info: &vk::ImageViewCreateInfo<'_>) -> VkResult<vk::ImageView> {
        let mut state = self.state.lock();
        if !matches!(state.objects.get(&info.image.as_raw()), Some(Object::Image { .. })) {
            return Err(state.invalid(format!("view of unknown image {:?}", info.image)));
        }
        Ok(vk::ImageView::from_raw(state.alloc_handle(Object::ImageView)))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.state.lock().destroy(view.as_raw(), "image view");
    }

    fn graphics_queue_family(&self) -> u32 {
        0
    }

    fn create_command_pool(&self, _info: &vk::CommandPoolCreateInfo<'_>) -> VkResult<vk::CommandPool> {
        let mut state = self.state.lock();
        Ok(vk::CommandPool::from_raw(state.alloc_handle(Object::CommandPool)))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut state = self.state.lock();
        let owned: Vec<u64> = state
            .objects
            .iter()
            .filter_map(|(handle, object)| match object {
                Object::CommandBuffer { pool: p, .. } if *p == pool.as_raw() => Some(*handle),
                _ => None,
            })
            .collect();
        for handle in owned {
            state.destroy(handle, "command buffer");
        }
        state.destroy(pool.as_raw(), "command pool");
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        let mut state = self.state.lock();
        if !matches!(state.objects.get(&pool.as_raw()), Some(Object::CommandPool)) {
            return Err(state.invalid(format!("allocation from unknown pool {pool:?}")));
        }
        Ok((0..count)
            .map(|_| {
                vk::CommandBuffer::from_raw(state.alloc_handle(Object::CommandBuffer {
                    pool: pool.as_raw(),
                    state: RecordState::Initial,
                    commands: Vec::new(),
                }))
            })
            .collect())
    }

    fn free_command_buffers(&self, _pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        let mut state = self.state.lock();
        for buffer in buffers {
            state.destroy(buffer.as_raw(), "command buffer");
        }
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        self.begin_or_reset(cmd, RecordState::Initial)
    }

    fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        _flags: vk::CommandBufferUsageFlags,
    ) -> VkResult<()> {
        self.begin_or_reset(cmd, RecordState::Recording)
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        let mut state = self.state.lock();
        match state.objects.get_mut(&cmd.as_raw()) {
            Some(Object::CommandBuffer { state: s, .. }) if *s == RecordState::Recording => {
                *s = RecordState::Executable;
                Ok(())
            }
            _ => Err(state.invalid(format!("end of {cmd:?} which is not recording"))),
        }
    }

    fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        self.state.lock().record(
            cmd,
            Command::CopyBuffer {
                src: src.as_raw(),
                dst: dst.as_raw(),
                regions: regions.to_vec(),
            },
        );
    }

    fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        self.state.lock().record(
            cmd,
            Command::CopyBufferToImage {
                buffer: src.as_raw(),
                image: dst.as_raw(),
                layout: dst_layout,
                regions: regions.to_vec(),
            },
        );
    }

    fn cmd_copy_image_to_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Buffer,
        regions: &[vk::BufferImageCopy],
    ) {
        self.state.lock().record(
            cmd,
            Command::CopyImageToBuffer {
                image: src.as_raw(),
                layout: src_layout,
                buffer: dst.as_raw(),
                regions: regions.to_vec(),
            },
        );
    }

    fn cmd_pipeline_barrier(
        &self,
        cmd: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        image_barriers: &[vk::ImageMemoryBarrier<'_>],
    ) {
        let barriers = image_barriers
            .iter()
            .map(|b| BarrierRecord {
                image: b.image.as_raw(),
                old_layout: b.old_layout,
                new_layout: b.new_layout,
            })
            .collect();
        self.state.lock().record(
            cmd,
            Command::Barrier {
                src_stage,
                dst_stage,
                barriers,
            },
        );
    }

    fn cmd_clear_color_image(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        layout: vk::ImageLayout,
        color: &vk::ClearColorValue,
        _ranges: &[vk::ImageSubresourceRange],
    ) {
        // SAFETY: every variant of the union is four 32-bit values; the
        // engine only clears with float colors.
        let color = unsafe { color.float32 };
        self.state.lock().record(
            cmd,
            Command::Clear {
                image: image.as_raw(),
                layout,
                color,
            },
        );
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let mut state = self.state.lock();
        Ok(vk::Fence::from_raw(
            state.alloc_handle(Object::Fence { signaled }),
        ))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        self.state.lock().destroy(fence.as_raw(), "fence");
    }

    fn wait_for_fences(&self, fences: &[vk::Fence], _timeout: u64) -> VkResult<()> {
        let mut state = self.state.lock();
        for fence in fences {
            state.events.push(MockEvent::WaitFence(*fence));
            let raw = fence.as_raw();
            match state.objects.get(&raw) {
                Some(Object::Fence { signaled: true }) => continue,
                Some(Object::Fence { signaled: false }) => {}
                _ => return Err(state.invalid(format!("wait on unknown fence {fence:?}"))),
            }
            if state.pending.iter().any(|p| p.fence == Some(raw)) {
                state.complete_until(raw);
            } else {
                state.invalid(format!("wait on fence {fence:?} that nothing will signal"));
                return Err(vk::Result::TIMEOUT);
            }
        }
        Ok(())
    }

    fn reset_fences(&self, fences: &[vk::Fence]) -> VkResult<()> {
        let mut state = self.state.lock();
        for fence in fences {
            state.events.push(MockEvent::ResetFence(*fence));
            let raw = fence.as_raw();
            if state.pending.iter().any(|p| p.fence == Some(raw)) {
                return Err(state.invalid(format!("reset of fence {fence:?} still in flight")));
            }
            match state.objects.get_mut(&raw) {
                Some(Object::Fence { signaled }) => *signaled = false,
                _ => return Err(state.invalid(format!("reset of unknown fence {fence:?}"))),
            }
        }
        Ok(())
    }

    fn fence_status(&self, fence: vk::Fence) -> VkResult<bool> {
        let mut state = self.state.lock();
        match state.objects.get(&fence.as_raw()) {
            Some(Object::Fence { signaled }) => Ok(*signaled),
            _ => Err(state.invalid(format!("status of unknown fence {fence:?}"))),
        }
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let mut state = self.state.lock();
        Ok(vk::Semaphore::from_raw(
            state.alloc_handle(Object::Semaphore { signaled: false }),
        ))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.state.lock().destroy(semaphore.as_raw(), "semaphore");
    }

    fn queue_submit(&self, batches: &[SubmitBatch<'_>], fence: vk::Fence) -> VkResult<()> {
        let mut state = self.state.lock();

        let fence = (fence != vk::Fence::null()).then(|| fence.as_raw());
        if let Some(raw) = fence {
            match state.objects.get(&raw) {
                Some(Object::Fence { signaled: false }) => {}
                Some(Object::Fence { signaled: true }) => {
                    return Err(state.invalid(format!(
                        "submission with fence {raw:#x} that was not reset"
                    )));
                }
                _ => return Err(state.invalid(format!("submission with unknown fence {raw:#x}"))),
            }
            if state.pending.iter().any(|p| p.fence == Some(raw)) {
                return Err(state.invalid(format!("fence {raw:#x} submitted twice")));
            }
        }

        let mut commands = Vec::new();
        let mut resources = Vec::new();
        for batch in batches {
            if batch.wait_semaphores.len() != batch.wait_stages.len() {
                return Err(state.invalid("wait semaphores and stages differ in length".into()));
            }
            for semaphore in batch.wait_semaphores {
                state.consume_semaphore(semaphore.as_raw())?;
            }
            for cmd in batch.command_buffers {
                match state.objects.get(&cmd.as_raw()) {
                    Some(Object::CommandBuffer {
                        state: RecordState::Executable,
                        commands: recorded,
                        ..
                    }) => {
                        for command in recorded {
                            resources.extend(command.resources());
                        }
                        commands.extend(recorded.iter().cloned());
                        resources.push(cmd.as_raw());
                    }
                    _ => {
                        return Err(
                            state.invalid(format!("submission of {cmd:?} which is not executable"))
                        );
                    }
                }
            }
            for semaphore in batch.signal_semaphores {
                state.signal_semaphore(semaphore.as_raw())?;
            }
            state.events.push(MockEvent::Submit {
                wait: batch.wait_semaphores.to_vec(),
                signal: batch.signal_semaphores.to_vec(),
                command_buffers: batch.command_buffers.to_vec(),
                fence: fence.map_or(vk::Fence::null(), vk::Fence::from_raw),
            });
        }

        state.pending.push_back(Pending {
            commands,
            fence,
            resources,
        });
        let outstanding = state.outstanding_fences();
        state.max_outstanding_fences = state.max_outstanding_fences.max(outstanding);

        if !state.deferred {
            state.complete_all();
        }
        Ok(())
    }

    fn queue_wait_idle(&self) -> VkResult<()> {
        let mut state = self.state.lock();
        state.events.push(MockEvent::QueueWaitIdle);
        state.complete_all();
        Ok(())
    }

    fn device_wait_idle(&self) -> VkResult<()> {
        let mut state = self.state.lock();
        state.events.push(MockEvent::DeviceWaitIdle);
        state.complete_all();
        Ok(())
    }

    fn has_surface(&self) -> bool {
        self.state.lock().surface.is_some()
    }

    fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        let state = self.state.lock();
        state
            .surface
            .as_ref()
            .map(|s| s.capabilities)
            .ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)
    }

    fn surface_formats(&self) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        let state = self.state.lock();
        state
            .surface
            .as_ref()
            .map(|s| s.formats.clone())
            .ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)
    }

    fn surface_present_modes(&self) -> VkResult<Vec<vk::PresentModeKHR>> {
        let state = self.state.lock();
        state
            .surface
            .as_ref()
            .map(|s| s.present_modes.clone())
            .ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> VkResult<vk::SwapchainKHR> {
        let mut state = self.state.lock();
        let Some(surface) = state.surface.as_ref() else {
            return Err(vk::Result::ERROR_SURFACE_LOST_KHR);
        };
        let caps = surface.capabilities;
        let defined = caps.current_extent.width != u32::MAX;
        if defined
            && (desc.extent.width != caps.current_extent.width
                || desc.extent.height != caps.current_extent.height)
        {
            return Err(state.invalid(format!(
                "swapchain extent {}x{} does not match surface {}x{}",
                desc.extent.width,
                desc.extent.height,
                caps.current_extent.width,
                caps.current_extent.height
            )));
        }

        let byte_size = image_byte_size(desc.surface_format.format, desc.extent)
            .unwrap_or(u64::from(desc.extent.width) * u64::from(desc.extent.height) * 4);
        let images: Vec<u64> = (0..desc.min_image_count)
            .map(|_| {
                state.alloc_handle(Object::Image {
                    extent: desc.extent,
                    format: desc.surface_format.format,
                    byte_size,
                    storage: Storage::Owned(vec![0u8; byte_size as usize].into_boxed_slice()),
                    layout: vk::ImageLayout::UNDEFINED,
                    swapchain_owned: true,
                })
            })
            .collect();
        let count = images.len();
        let handle = state.alloc_handle(Object::Swapchain {
            images,
            held: vec![false; count],
            next: 0,
            stale: false,
        });
        let swapchain = vk::SwapchainKHR::from_raw(handle);
        state.events.push(MockEvent::SwapchainCreated {
            swapchain,
            width: desc.extent.width,
            height: desc.extent.height,
            image_count: count as u32,
        });
        Ok(swapchain)
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        let mut state = self.state.lock();
        match state.objects.get(&swapchain.as_raw()) {
            Some(Object::Swapchain { images, .. }) => {
                Ok(images.iter().map(|i| vk::Image::from_raw(*i)).collect())
            }
            _ => Err(state.invalid(format!("images of unknown swapchain {swapchain:?}"))),
        }
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut state = self.state.lock();
        if let Some(Object::Swapchain { images, .. }) = state.destroy(swapchain.as_raw(), "swapchain")
        {
            for image in images {
                state.destroy(image, "swapchain image");
            }
            state.events.push(MockEvent::SwapchainDestroyed(swapchain));
        }
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        let mut state = self.state.lock();
        let injected = state.acquire_results.pop_front();
        let (stale, index) = match state.objects.get(&swapchain.as_raw()) {
            Some(Object::Swapchain {
                held, next, stale, ..
            }) => {
                let count = held.len();
                let index = (0..count)
                    .map(|i| (next + i) % count)
                    .find(|&i| !held[i]);
                (*stale, index)
            }
            _ => return Err(state.invalid(format!("acquire from unknown swapchain {swapchain:?}"))),
        };

        let mut suboptimal = false;
        match injected {
            Some(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                state.events.push(MockEvent::AcquireOutOfDate(swapchain));
                return Err(vk::Result::ERROR_OUT_OF_DATE_KHR);
            }
            Some(vk::Result::SUBOPTIMAL_KHR) => suboptimal = true,
            Some(vk::Result::SUCCESS) | None => {}
            Some(error) => return Err(error),
        }
        if stale {
            state.events.push(MockEvent::AcquireOutOfDate(swapchain));
            return Err(vk::Result::ERROR_OUT_OF_DATE_KHR);
        }
        let Some(index) = index else {
            return Err(state.invalid(format!(
                "acquire from {swapchain:?} with every image already acquired"
            )));
        };

        state.signal_semaphore(signal.as_raw())?;
        if let Some(Object::Swapchain { held, next, .. }) =
            state.objects.get_mut(&swapchain.as_raw())
        {
            held[index] = true;
            *next = (index + 1) % held.len();
        }
        state.events.push(MockEvent::Acquire {
            swapchain,
            index: index as u32,
            suboptimal,
        });
        Ok((index as u32, suboptimal))
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool> {
        let mut state = self.state.lock();
        state.consume_semaphore(wait.as_raw())?;

        let stale = match state.objects.get_mut(&swapchain.as_raw()) {
            Some(Object::Swapchain { held, stale, .. })
                if held.get(image_index as usize) == Some(&true) =>
            {
                held[image_index as usize] = false;
                *stale
            }
            _ => {
                return Err(state.invalid(format!(
                    "present of image {image_index} not acquired from {swapchain:?}"
                )));
            }
        };

        let injected = state.present_results.pop_front();
        if stale || injected == Some(vk::Result::ERROR_OUT_OF_DATE_KHR) {
            state.events.push(MockEvent::PresentOutOfDate(swapchain));
            return Err(vk::Result::ERROR_OUT_OF_DATE_KHR);
        }
        state.events.push(MockEvent::Present {
            swapchain,
            index: image_index,
        });
        match injected {
            Some(vk::Result::SUBOPTIMAL_KHR) => Ok(true),
            Some(vk::Result::SUCCESS) | None => Ok(false),
            Some(error) => Err(error),
        }
    }
}

impl MockBackend {
    fn begin_or_reset(&self, cmd: vk::CommandBuffer, next: RecordState) -> VkResult<()> {
        let mut state = self.state.lock();
        if state.in_flight(cmd.as_raw()) {
            return Err(state.invalid(format!("{cmd:?} re-recorded while in flight")));
        }
        match state.objects.get_mut(&cmd.as_raw()) {
            Some(Object::CommandBuffer {
                state: s, commands, ..
            }) => {
                *s = next;
                commands.clear();
                Ok(())
            }
            _ => Err(state.invalid(format!("unknown command buffer {cmd:?}"))),
        }
    }
}
