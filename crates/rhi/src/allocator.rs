//! Device memory allocator and blocking staged transfers.
//!
//! Every buffer or image gets its own device memory allocation, chosen by
//! scanning the device's memory types for the first one allowed by the
//! object's requirements whose properties include everything requested.
//! There is no fallback: asking for host-visible memory and silently getting
//! something else would be undefined behavior later.
//!
//! The `transfer_*` helpers stage data through a temporary host-visible
//! buffer and block until the queue is idle. They are meant for setup-time
//! uploads, not for per-frame data.
//!
//! # Example
//!
//! ```
//! use ash::vk;
//! use rtg_rhi::allocator::Allocator;
//! use rtg_rhi::buffer::BufferUsage;
//! use rtg_rhi::device::Device;
//! use rtg_rhi::mock::MockBackend;
//!
//! # fn main() -> Result<(), rtg_rhi::RhiError> {
//! let device = Device::new(MockBackend::new());
//! let allocator = Allocator::new(device)?;
//!
//! let mut vertices = allocator.create_buffer_for(BufferUsage::Vertex, 12)?;
//! allocator.transfer_to_buffer(&[0u8; 12], &vertices)?;
//! allocator.destroy_buffer(&mut vertices);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::backend::SubmitBatch;
use crate::buffer::{AllocatedBuffer, BufferUsage};
use crate::command::{CommandBuffer, CommandPool, color_subresource_range, image_transition};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::format::image_byte_size;
use crate::image::AllocatedImage;
use crate::memory::{Allocation, Mapping};

/// Returns the index of the first memory type whose bit is set in
/// `type_filter` and whose property flags are a superset of `properties`.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> RhiResult<u32> {
    memory_properties.memory_types[..memory_properties.memory_type_count as usize]
        .iter()
        .enumerate()
        .find(|(i, memory_type)| {
            type_filter & (1 << i) != 0 && memory_type.property_flags.contains(properties)
        })
        .map(|(i, _)| i as u32)
        .ok_or(RhiError::NoSuitableMemoryType {
            type_filter,
            properties,
        })
}

/// Device memory allocator.
///
/// Owns a dedicated command buffer for transfers; concurrent transfer calls
/// are serialized on it.
pub struct Allocator {
    device: Arc<Device>,
    transfer_cmd: Mutex<CommandBuffer>,
    // Keep after `transfer_cmd`: the pool frees the buffer when dropped.
    _transfer_pool: CommandPool,
}

impl Allocator {
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        log_memory_properties(device.memory_properties());

        let transfer_pool = CommandPool::new_transient(device.clone())?;
        let transfer_cmd = CommandBuffer::new(device.clone(), &transfer_pool)?;

        Ok(Self {
            device,
            transfer_cmd: Mutex::new(transfer_cmd),
            _transfer_pool: transfer_pool,
        })
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// See [`find_memory_type`].
    pub fn find_memory_type(
        &self,
        type_filter: u32,
        properties: vk::MemoryPropertyFlags,
    ) -> RhiResult<u32> {
        find_memory_type(self.device.memory_properties(), type_filter, properties)
    }

    // =========================================================================
    // Raw Memory
    // =========================================================================

    /// Allocates `size` bytes of device memory.
    ///
    /// Every allocation is a dedicated device allocation starting at offset 0,
    /// which satisfies any `alignment`.
    pub fn allocate(
        &self,
        size: vk::DeviceSize,
        alignment: vk::DeviceSize,
        type_filter: u32,
        properties: vk::MemoryPropertyFlags,
        mapping: Mapping,
    ) -> RhiResult<Allocation> {
        if size == 0 {
            return Err(RhiError::InvalidArgument("cannot allocate zero bytes".into()));
        }
        if alignment != 0 && !alignment.is_power_of_two() {
            return Err(RhiError::InvalidArgument(format!(
                "alignment {alignment} is not a power of two"
            )));
        }

        let memory_type_index = self.find_memory_type(type_filter, properties)?;
        let backend = self.device.backend();
        let memory = backend.allocate_memory(size, memory_type_index)?;

        let mapped = match mapping {
            Mapping::Unmapped => None,
            Mapping::Mapped => match backend.map_memory(memory, size) {
                Ok(ptr) => Some(ptr),
                Err(e) => {
                    backend.free_memory(memory);
                    return Err(e.into());
                }
            },
        };

        trace!(
            "Allocated {} bytes from memory type {}{}",
            size,
            memory_type_index,
            if mapped.is_some() { " (mapped)" } else { "" }
        );
        Ok(Allocation::new(memory, size, memory_type_index, mapped))
    }

    /// Allocates memory satisfying an object's reported requirements.
    pub fn allocate_for(
        &self,
        requirements: &vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
        mapping: Mapping,
    ) -> RhiResult<Allocation> {
        self.allocate(
            requirements.size,
            requirements.alignment,
            requirements.memory_type_bits,
            properties,
            mapping,
        )
    }

    /// Unmaps and frees the allocation, leaving it empty. Does nothing if it
    /// is already empty.
    pub fn free(&self, allocation: &mut Allocation) {
        if allocation.is_empty() {
            return;
        }
        let (memory, mapped) = allocation.forget();
        let backend = self.device.backend();
        if mapped {
            backend.unmap_memory(memory);
        }
        backend.free_memory(memory);
    }

    // =========================================================================
    // Buffers
    // =========================================================================

    /// Creates a buffer and binds freshly allocated memory to it.
    ///
    /// On failure nothing is left behind.
    pub fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
        mapping: Mapping,
    ) -> RhiResult<AllocatedBuffer> {
        let backend = self.device.backend();
        let create_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let handle = backend.create_buffer(&create_info)?;

        let requirements = backend.buffer_memory_requirements(handle);
        let mut allocation = match self.allocate_for(&requirements, properties, mapping) {
            Ok(allocation) => allocation,
            Err(e) => {
                backend.destroy_buffer(handle);
                return Err(e);
            }
        };

        if let Err(e) = backend.bind_buffer_memory(handle, allocation.handle(), allocation.offset())
        {
            self.free(&mut allocation);
            backend.destroy_buffer(handle);
            return Err(e.into());
        }

        debug!("Created {} byte buffer {:?} ({:?})", size, handle, usage);
        Ok(AllocatedBuffer {
            handle,
            size,
            allocation,
        })
    }

    /// Creates a buffer with the usage and memory of a common role.
    pub fn create_buffer_for(
        &self,
        usage: BufferUsage,
        size: vk::DeviceSize,
    ) -> RhiResult<AllocatedBuffer> {
        self.create_buffer(
            size,
            usage.to_vk_usage(),
            usage.memory_properties(),
            usage.mapping(),
        )
    }

    /// Frees the buffer's memory and destroys it. Idempotent.
    pub fn destroy_buffer(&self, buffer: &mut AllocatedBuffer) {
        self.free(&mut buffer.allocation);
        if buffer.handle != vk::Buffer::null() {
            self.device.backend().destroy_buffer(buffer.handle);
            trace!("Destroyed buffer {:?}", buffer.handle);
        }
        buffer.handle = vk::Buffer::null();
        buffer.size = 0;
    }

    // =========================================================================
    // Images
    // =========================================================================

    /// Creates a single-mip 2D image and binds freshly allocated memory to it.
    ///
    /// On failure nothing is left behind.
    pub fn create_image(
        &self,
        extent: vk::Extent2D,
        format: vk::Format,
        tiling: vk::ImageTiling,
        usage: vk::ImageUsageFlags,
        properties: vk::MemoryPropertyFlags,
        mapping: Mapping,
    ) -> RhiResult<AllocatedImage> {
        let backend = self.device.backend();
        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(tiling)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let handle = backend.create_image(&create_info)?;

        let requirements = backend.image_memory_requirements(handle);
        let mut allocation = match self.allocate_for(&requirements, properties, mapping) {
            Ok(allocation) => allocation,
            Err(e) => {
                backend.destroy_image(handle);
                return Err(e);
            }
        };

        if let Err(e) = backend.bind_image_memory(handle, allocation.handle(), allocation.offset()) {
            self.free(&mut allocation);
            backend.destroy_image(handle);
            return Err(e.into());
        }

        debug!(
            "Created {}x{} {:?} image {:?}",
            extent.width, extent.height, format, handle
        );
        Ok(AllocatedImage {
            handle,
            extent,
            format,
            allocation,
        })
    }

    /// Frees the image's memory and destroys it. Idempotent.
    pub fn destroy_image(&self, image: &mut AllocatedImage) {
        self.free(&mut image.allocation);
        if image.handle != vk::Image::null() {
            self.device.backend().destroy_image(image.handle);
            trace!("Destroyed image {:?}", image.handle);
        }
        image.handle = vk::Image::null();
        image.extent = vk::Extent2D::default();
        image.format = vk::Format::UNDEFINED;
    }

    /// Returns the first candidate whose features for `tiling` include
    /// `features`. Candidates are given in preference order.
    pub fn find_image_format(
        &self,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> RhiResult<vk::Format> {
        let backend = self.device.backend();
        candidates
            .iter()
            .copied()
            .find(|&format| {
                let props = backend.format_properties(format);
                let supported = if tiling == vk::ImageTiling::LINEAR {
                    props.linear_tiling_features
                } else {
                    props.optimal_tiling_features
                };
                supported.contains(features)
            })
            .ok_or(RhiError::NoSupportedFormat { tiling, features })
    }

    // =========================================================================
    // Staged Transfers
    // =========================================================================

    /// Uploads `data` to the start of `target` and waits for completion.
    pub fn transfer_to_buffer(&self, data: &[u8], target: &AllocatedBuffer) -> RhiResult<()> {
        check_fits(data.len(), target.size)?;
        let mut staging = self.create_staging(data.len() as u64, BufferUsage::Staging)?;

        let result: RhiResult<()> = (|| {
            staging.allocation.write(data)?;
            self.submit_transfer(|cmd| {
                let region = vk::BufferCopy::default().size(data.len() as u64);
                cmd.copy_buffer(staging.handle, target.handle, &[region]);
            })
        })();

        self.destroy_buffer(&mut staging);
        result
    }

    /// Reads the first `out.len()` bytes of `source` back to the host and
    /// waits for completion.
    pub fn transfer_from_buffer(&self, source: &AllocatedBuffer, out: &mut [u8]) -> RhiResult<()> {
        check_fits(out.len(), source.size)?;
        let len = out.len() as u64;
        let mut staging = self.create_staging(len, BufferUsage::Readback)?;

        let result: RhiResult<()> = (|| {
            self.submit_transfer(|cmd| {
                let region = vk::BufferCopy::default().size(len);
                cmd.copy_buffer(source.handle, staging.handle, &[region]);
            })?;
            let bytes = staging.mapped_bytes().ok_or_else(|| {
                RhiError::InvalidArgument("readback buffer is not host mapped".into())
            })?;
            out.copy_from_slice(bytes);
            Ok(())
        })();

        self.destroy_buffer(&mut staging);
        result
    }

    /// Uploads the full contents of `target` and leaves it in
    /// `SHADER_READ_ONLY_OPTIMAL` layout.
    ///
    /// `data` must be exactly the image's byte footprint.
    pub fn transfer_to_image(&self, data: &[u8], target: &AllocatedImage) -> RhiResult<()> {
        let expected = image_byte_size(target.format, target.extent)?;
        if data.len() as u64 != expected {
            return Err(RhiError::TransferSizeMismatch {
                expected,
                actual: data.len() as u64,
            });
        }
        let mut staging = self.create_staging(expected, BufferUsage::Staging)?;

        let result: RhiResult<()> = (|| {
            staging.allocation.write(data)?;
            self.submit_transfer(|cmd| {
                cmd.pipeline_barrier(
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                    vk::PipelineStageFlags::TRANSFER,
                    &[image_transition(
                        target.handle,
                        vk::ImageLayout::UNDEFINED,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        vk::AccessFlags::empty(),
                        vk::AccessFlags::TRANSFER_WRITE,
                    )],
                );

                let range = color_subresource_range();
                let region = vk::BufferImageCopy::default()
                    .buffer_offset(0)
                    .buffer_row_length(0)
                    .buffer_image_height(0)
                    .image_subresource(vk::ImageSubresourceLayers {
                        aspect_mask: range.aspect_mask,
                        mip_level: 0,
                        base_array_layer: 0,
                        layer_count: 1,
                    })
                    .image_offset(vk::Offset3D::default())
                    .image_extent(vk::Extent3D {
                        width: target.extent.width,
                        height: target.extent.height,
                        depth: 1,
                    });
                cmd.copy_buffer_to_image(
                    staging.handle,
                    target.handle,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );

                cmd.pipeline_barrier(
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::FRAGMENT_SHADER,
                    &[image_transition(
                        target.handle,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                        vk::AccessFlags::TRANSFER_WRITE,
                        vk::AccessFlags::SHADER_READ,
                    )],
                );
            })
        })();

        self.destroy_buffer(&mut staging);
        result
    }

    fn create_staging(&self, size: u64, usage: BufferUsage) -> RhiResult<AllocatedBuffer> {
        self.create_buffer(
            size,
            usage.to_vk_usage(),
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            Mapping::Mapped,
        )
    }

    /// Records `record` into the transfer command buffer, submits it and
    /// blocks until the queue is idle.
    fn submit_transfer(&self, record: impl FnOnce(&CommandBuffer)) -> RhiResult<()> {
        let cmd = self.transfer_cmd.lock();
        cmd.begin()?;
        record(&cmd);
        cmd.end()?;

        let command_buffers = [cmd.handle()];
        self.device.submit(
            &[SubmitBatch {
                command_buffers: &command_buffers,
                ..Default::default()
            }],
            None,
        )?;
        self.device.queue_wait_idle()
    }
}

fn check_fits(len: usize, capacity: vk::DeviceSize) -> RhiResult<()> {
    if len == 0 || len as u64 > capacity {
        return Err(RhiError::TransferSizeMismatch {
            expected: capacity,
            actual: len as u64,
        });
    }
    Ok(())
}

fn log_memory_properties(props: &vk::PhysicalDeviceMemoryProperties) {
    for (i, memory_type) in props.memory_types[..props.memory_type_count as usize]
        .iter()
        .enumerate()
    {
        debug!(
            "Memory type {}: heap {} {:?}",
            i, memory_type.heap_index, memory_type.property_flags
        );
    }
    for (i, heap) in props.memory_heaps[..props.memory_heap_count as usize]
        .iter()
        .enumerate()
    {
        debug!(
            "Memory heap {}: {} MiB {:?}",
            i,
            heap.size / (1024 * 1024),
            heap.flags
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            memory_heap_count: 1,
            ..Default::default()
        };
        for (slot, flags) in props.memory_types.iter_mut().zip(types) {
            slot.property_flags = *flags;
        }
        props
    }

    #[test]
    fn test_find_memory_type_first_superset() {
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        let wanted = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        assert_eq!(find_memory_type(&props, 0b111, wanted).unwrap(), 2);
        assert_eq!(
            find_memory_type(&props, 0b111, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap(),
            1
        );
    }

    #[test]
    fn test_find_memory_type_respects_filter() {
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);
        assert_eq!(
            find_memory_type(&props, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            1
        );
    }

    #[test]
    fn test_find_memory_type_no_fallback() {
        let props = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        let result = find_memory_type(&props, 0b1, vk::MemoryPropertyFlags::HOST_VISIBLE);
        assert!(matches!(
            result,
            Err(RhiError::NoSuitableMemoryType { type_filter: 0b1, .. })
        ));
        // Bits beyond the reported type count are ignored.
        assert!(find_memory_type(&props, 0b10, vk::MemoryPropertyFlags::empty()).is_err());
    }

    #[test]
    fn test_check_fits() {
        assert!(check_fits(4, 4).is_ok());
        assert!(check_fits(5, 4).is_err());
        assert!(check_fits(0, 4).is_err());
    }
}
