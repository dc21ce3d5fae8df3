//! Device buffers bound to an owned [`Allocation`].
//!
//! - [`BufferUsage`] names the common buffer roles and the memory each wants
//! - [`AllocatedBuffer`] pairs a buffer handle with its memory
//!
//! Buffers are created and destroyed through the
//! [`Allocator`](crate::allocator::Allocator); the handle and its memory are
//! never separated.

use ash::vk;

use crate::memory::{Allocation, Mapping};

/// Buffer usage type.
///
/// Selects Vulkan usage flags and the memory properties a buffer of that role
/// is allocated with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    /// Vertex data, uploaded once through a staging transfer.
    Vertex,
    /// Index data, uploaded once through a staging transfer.
    Index,
    /// Per-frame shader constants written directly by the CPU.
    Uniform,
    /// General-purpose device-local storage.
    Storage,
    /// Host-visible source of an upload.
    Staging,
    /// Host-visible destination of a device-to-host copy.
    Readback,
}

impl BufferUsage {
    /// Converts to Vulkan buffer usage flags.
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Vertex => {
                vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Index => {
                vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferUsage::Storage => {
                vk::BufferUsageFlags::STORAGE_BUFFER
                    | vk::BufferUsageFlags::TRANSFER_DST
                    | vk::BufferUsageFlags::TRANSFER_SRC
            }
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
            BufferUsage::Readback => vk::BufferUsageFlags::TRANSFER_DST,
        }
    }

    /// Memory properties the backing allocation must have.
    pub fn memory_properties(self) -> vk::MemoryPropertyFlags {
        match self {
            BufferUsage::Vertex | BufferUsage::Index | BufferUsage::Storage => {
                vk::MemoryPropertyFlags::DEVICE_LOCAL
            }
            BufferUsage::Uniform | BufferUsage::Staging | BufferUsage::Readback => {
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
            }
        }
    }

    /// Host-visible roles are mapped for their whole lifetime.
    pub fn mapping(self) -> Mapping {
        if self
            .memory_properties()
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
        {
            Mapping::Mapped
        } else {
            Mapping::Unmapped
        }
    }

    /// Returns a human-readable name for the buffer type.
    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::Index => "index",
            BufferUsage::Uniform => "uniform",
            BufferUsage::Storage => "storage",
            BufferUsage::Staging => "staging",
            BufferUsage::Readback => "readback",
        }
    }
}

/// A buffer handle and the memory bound to it.
#[derive(Debug, Default)]
pub struct AllocatedBuffer {
    pub(crate) handle: vk::Buffer,
    pub(crate) size: vk::DeviceSize,
    pub(crate) allocation: Allocation,
}

impl AllocatedBuffer {
    /// Raw buffer handle; null once destroyed.
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.handle
    }

    /// Size requested at creation, in bytes.
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn allocation(&self) -> &Allocation {
        &self.allocation
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.handle == vk::Buffer::null() && self.allocation.is_empty()
    }

    /// Host mapping limited to the buffer's requested size.
    pub fn mapped_bytes(&self) -> Option<&[u8]> {
        let size = self.size as usize;
        self.allocation.mapped_bytes().map(|bytes| &bytes[..size])
    }

    /// Mutable host mapping limited to the buffer's requested size.
    pub fn mapped_bytes_mut(&mut self) -> Option<&mut [u8]> {
        let size = self.size as usize;
        self.allocation
            .mapped_bytes_mut()
            .map(|bytes| &mut bytes[..size])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_usage_to_vk() {
        assert!(
            BufferUsage::Vertex
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::VERTEX_BUFFER)
        );
        assert!(
            BufferUsage::Vertex
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::TRANSFER_DST)
        );
        assert_eq!(
            BufferUsage::Staging.to_vk_usage(),
            vk::BufferUsageFlags::TRANSFER_SRC
        );
        assert_eq!(
            BufferUsage::Readback.to_vk_usage(),
            vk::BufferUsageFlags::TRANSFER_DST
        );
    }

    #[test]
    fn test_buffer_usage_memory() {
        assert_eq!(
            BufferUsage::Vertex.memory_properties(),
            vk::MemoryPropertyFlags::DEVICE_LOCAL
        );
        assert_eq!(BufferUsage::Vertex.mapping(), Mapping::Unmapped);
        assert!(
            BufferUsage::Staging
                .memory_properties()
                .contains(vk::MemoryPropertyFlags::HOST_COHERENT)
        );
        assert_eq!(BufferUsage::Uniform.mapping(), Mapping::Mapped);
    }

    #[test]
    fn test_buffer_usage_name() {
        assert_eq!(BufferUsage::Vertex.name(), "vertex");
        assert_eq!(BufferUsage::Readback.name(), "readback");
    }

    #[test]
    fn test_default_buffer_is_empty() {
        let buffer = AllocatedBuffer::default();
        assert!(buffer.is_empty());
        assert!(buffer.mapped_bytes().is_none());
    }
}
