//! The device context shared by every engine component.
//!
//! A [`Device`] owns one [`Backend`] and is passed around as `Arc<Device>`.
//! There is no global device state, so independent devices (for example
//! several mock devices in one test binary) can coexist.
//!
//! # Example
//!
//! ```
//! use rtg_rhi::device::Device;
//! use rtg_rhi::mock::MockBackend;
//!
//! let device = Device::new(MockBackend::new());
//! device.wait_idle().unwrap();
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::backend::{Backend, SubmitBatch};
use crate::error::RhiResult;
use crate::sync::Fence;

/// Explicitly constructed device context.
pub struct Device {
    backend: Box<dyn Backend>,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl Device {
    /// Wraps a backend into a shareable device context.
    pub fn new(backend: impl Backend + 'static) -> Arc<Self> {
        let memory_properties = backend.memory_properties();
        info!(
            "Device context created on '{}' ({} memory types, {} heaps)",
            backend.name(),
            memory_properties.memory_type_count,
            memory_properties.memory_heap_count
        );
        Arc::new(Self {
            backend: Box::new(backend),
            memory_properties,
        })
    }

    /// Returns the backend that executes device operations.
    #[inline]
    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    /// Memory types and heaps reported by the device, queried once.
    #[inline]
    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    /// Submits batches to the graphics queue, optionally signaling `fence`.
    pub fn submit(&self, batches: &[SubmitBatch<'_>], fence: Option<&Fence>) -> RhiResult<()> {
        let fence = fence.map_or(vk::Fence::null(), Fence::handle);
        self.backend.queue_submit(batches, fence)?;
        Ok(())
    }

    /// Blocks until the graphics queue has drained.
    pub fn queue_wait_idle(&self) -> RhiResult<()> {
        self.backend.queue_wait_idle()?;
        Ok(())
    }

    /// Blocks until every queue on the device has drained.
    pub fn wait_idle(&self) -> RhiResult<()> {
        self.backend.device_wait_idle()?;
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Err(e) = self.backend.device_wait_idle() {
            tracing::error!("Failed to wait for device idle during drop: {:?}", e);
        }
        debug!("Device context for '{}' released", self.backend.name());
    }
}
