//! Device memory ownership.
//!
//! An [`Allocation`] is a region of device memory owned by exactly one buffer
//! or image. It is move-only and must be released through the
//! [`Allocator`](crate::allocator::Allocator) exactly once; dropping one that
//! still holds memory is a leak and is reported loudly.

use std::ptr::NonNull;

use ash::vk;
use tracing::error;

use crate::error::{RhiError, RhiResult};

/// Whether a new allocation is mapped into host address space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Mapping {
    #[default]
    Unmapped,
    Mapped,
}

/// Device memory region.
///
/// Fields are private; the allocator is the only place an allocation is
/// created or released.
#[derive(Debug)]
pub struct Allocation {
    handle: vk::DeviceMemory,
    size: vk::DeviceSize,
    offset: vk::DeviceSize,
    memory_type_index: u32,
    mapped: Option<NonNull<u8>>,
}

// SAFETY: the mapped pointer refers to memory exclusively owned by this
// allocation; shared access only hands out `&[u8]`.
unsafe impl Send for Allocation {}
unsafe impl Sync for Allocation {}

impl Default for Allocation {
    fn default() -> Self {
        Self::empty()
    }
}

impl Allocation {
    /// An allocation that owns nothing.
    pub const fn empty() -> Self {
        Self {
            handle: vk::DeviceMemory::null(),
            size: 0,
            offset: 0,
            memory_type_index: 0,
            mapped: None,
        }
    }

    pub(crate) fn new(
        handle: vk::DeviceMemory,
        size: vk::DeviceSize,
        memory_type_index: u32,
        mapped: Option<NonNull<u8>>,
    ) -> Self {
        Self {
            handle,
            size,
            offset: 0,
            memory_type_index,
            mapped,
        }
    }

    /// Moves the contents out, leaving `self` empty.
    pub fn take(&mut self) -> Allocation {
        std::mem::replace(self, Allocation::empty())
    }

    /// Clears the handle without releasing anything. Only the allocator
    /// calls this, after it has freed the memory.
    pub(crate) fn forget(&mut self) -> (vk::DeviceMemory, bool) {
        let released = (self.handle, self.mapped.is_some());
        self.handle = vk::DeviceMemory::null();
        self.size = 0;
        self.offset = 0;
        self.memory_type_index = 0;
        self.mapped = None;
        released
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.handle == vk::DeviceMemory::null()
    }

    #[inline]
    pub fn handle(&self) -> vk::DeviceMemory {
        self.handle
    }

    /// Size in bytes. At least the size that was requested.
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn offset(&self) -> vk::DeviceSize {
        self.offset
    }

    /// Index of the device memory type backing this allocation.
    #[inline]
    pub fn memory_type_index(&self) -> u32 {
        self.memory_type_index
    }

    #[inline]
    pub fn is_mapped(&self) -> bool {
        self.mapped.is_some()
    }

    /// The host mapping, if the allocation was created mapped.
    pub fn mapped_bytes(&self) -> Option<&[u8]> {
        let ptr = self.mapped?;
        // SAFETY: the mapping covers `size` bytes and lives until the
        // allocator unmaps it, which requires `&mut self`.
        Some(unsafe { std::slice::from_raw_parts(ptr.as_ptr(), self.size as usize) })
    }

    /// Mutable view of the host mapping.
    pub fn mapped_bytes_mut(&mut self) -> Option<&mut [u8]> {
        let ptr = self.mapped?;
        // SAFETY: see `mapped_bytes`; `&mut self` guarantees exclusivity.
        Some(unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), self.size as usize) })
    }

    /// Copies `data` to the start of the mapping.
    pub fn write(&mut self, data: &[u8]) -> RhiResult<()> {
        let size = self.size;
        let bytes = self
            .mapped_bytes_mut()
            .ok_or_else(|| RhiError::InvalidArgument("allocation is not host mapped".into()))?;
        if data.len() > bytes.len() {
            return Err(RhiError::TransferSizeMismatch {
                expected: size,
                actual: data.len() as u64,
            });
        }
        bytes[..data.len()].copy_from_slice(data);
        Ok(())
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        if self.is_empty() {
            return;
        }
        error!(
            "Allocation of {} bytes (memory type {}) leaked: dropped without being freed",
            self.size, self.memory_type_index
        );
        if !std::thread::panicking() {
            debug_assert!(
                false,
                "non-empty allocation dropped; free it through the allocator first"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_empty_allocation_drops_silently() {
        let allocation = Allocation::empty();
        assert!(allocation.is_empty());
        assert!(allocation.mapped_bytes().is_none());
    }

    #[test]
    fn test_take_zeroes_source() {
        let mut source = Allocation::new(vk::DeviceMemory::from_raw(7), 256, 1, None);
        let mut moved = source.take();
        assert!(source.is_empty());
        assert_eq!(moved.size(), 256);
        assert_eq!(moved.memory_type_index(), 1);
        moved.forget();
    }

    #[test]
    fn test_write_requires_mapping() {
        let mut allocation = Allocation::new(vk::DeviceMemory::from_raw(9), 16, 0, None);
        assert!(matches!(
            allocation.write(&[1, 2, 3]),
            Err(RhiError::InvalidArgument(_))
        ));
        allocation.forget();
    }

    #[test]
    fn test_write_into_mapping() {
        let mut storage = vec![0u8; 8];
        let ptr = NonNull::new(storage.as_mut_ptr());
        let mut allocation = Allocation::new(vk::DeviceMemory::from_raw(3), 8, 0, ptr);
        allocation.write(&[1, 2, 3]).unwrap();
        assert!(allocation.write(&[0; 9]).is_err());
        assert_eq!(&allocation.mapped_bytes().unwrap()[..4], &[1, 2, 3, 0]);
        allocation.forget();
        drop(storage);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "non-empty allocation dropped")]
    fn test_leaked_allocation_fails_debug_assertion() {
        let _leaked = Allocation::new(vk::DeviceMemory::from_raw(42), 64, 0, None);
    }
}
