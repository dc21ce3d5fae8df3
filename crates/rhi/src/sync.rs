//! Synchronization primitives.
//!
//! - [`Semaphore`] - GPU-to-GPU ordering between queue operations
//! - [`Fence`] - GPU-to-CPU completion signal the host can wait on
//!
//! # Overview
//!
//! The engine never relies on implicit ordering between submissions:
//!
//! - **Semaphores** order queue operations. Acquiring an image signals one,
//!   the render submission waits on it and signals another, and presentation
//!   (or the headless copy) waits on that.
//!
//! - **Fences** tell the CPU that a submission finished. A fence is reset
//!   immediately before the submission that will signal it, never earlier.
//!
//! # Example
//!
//! ```
//! use rtg_rhi::device::Device;
//! use rtg_rhi::mock::MockBackend;
//! use rtg_rhi::sync::{Fence, Semaphore};
//!
//! # fn main() -> Result<(), rtg_rhi::RhiError> {
//! let device = Device::new(MockBackend::new());
//! let _image_available = Semaphore::new(device.clone())?;
//!
//! // Starts signaled so the first wait returns immediately.
//! let fence = Fence::new(device, true)?;
//! fence.wait()?;
//! fence.reset()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::trace;

use crate::device::Device;
use crate::error::RhiResult;

/// Binary semaphore owned by the engine.
///
/// Destroyed on drop; the owner must make sure no pending queue operation
/// still waits on or signals it.
pub struct Semaphore {
    device: Arc<Device>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Creates a new semaphore in the unsignaled state.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let semaphore = device.backend().create_semaphore()?;
        trace!("Created semaphore {:?}", semaphore);
        Ok(Self { device, semaphore })
    }

    /// Returns the raw semaphore handle.
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        self.device.backend().destroy_semaphore(self.semaphore);
        trace!("Destroyed semaphore {:?}", self.semaphore);
    }
}

/// Fence the host can wait on.
///
/// Wait and reset can be called from any thread; callers decide who owns the
/// fence's lifecycle.
pub struct Fence {
    device: Arc<Device>,
    fence: vk::Fence,
}

impl Fence {
    /// Creates a new fence.
    ///
    /// # Arguments
    ///
    /// * `device` - The device context
    /// * `signaled` - If true, the fence starts signaled. Fences that are waited
    ///   on before their first submission must start signaled, or the first
    ///   wait never returns.
    pub fn new(device: Arc<Device>, signaled: bool) -> RhiResult<Self> {
        let fence = device.backend().create_fence(signaled)?;
        trace!(
            "Created fence {:?} ({})",
            fence,
            if signaled { "signaled" } else { "unsignaled" }
        );
        Ok(Self { device, fence })
    }

    /// Returns the raw fence handle.
    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Blocks until the fence is signaled. There is no timeout.
    pub fn wait(&self) -> RhiResult<()> {
        self.device
            .backend()
            .wait_for_fences(&[self.fence], u64::MAX)?;
        Ok(())
    }

    /// Returns the fence to the unsignaled state.
    ///
    /// The fence must not be attached to a pending submission.
    pub fn reset(&self) -> RhiResult<()> {
        self.device.backend().reset_fences(&[self.fence])?;
        Ok(())
    }

    /// Non-blocking status query.
    pub fn is_signaled(&self) -> bool {
        matches!(self.device.backend().fence_status(self.fence), Ok(true))
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        self.device.backend().destroy_fence(self.fence);
        trace!("Destroyed fence {:?}", self.fence);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SubmitBatch;
    use crate::mock::{MockBackend, MockEvent};

    #[test]
    fn test_semaphore_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Semaphore>();
    }

    #[test]
    fn test_fence_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Fence>();
    }

    #[test]
    fn test_fence_initial_state() {
        let device = Device::new(MockBackend::new());
        assert!(Fence::new(device.clone(), true).unwrap().is_signaled());
        assert!(!Fence::new(device, false).unwrap().is_signaled());
    }

    #[test]
    fn test_fence_signaled_by_submission() {
        let mock = MockBackend::new();
        mock.set_deferred(true);
        let device = Device::new(mock.clone());

        let fence = Fence::new(device.clone(), false).unwrap();
        device.submit(&[SubmitBatch::default()], Some(&fence)).unwrap();
        assert!(!fence.is_signaled());

        fence.wait().unwrap();
        assert!(fence.is_signaled());
        assert!(mock
            .events()
            .contains(&MockEvent::FenceSignaled(fence.handle())));
    }

    #[test]
    fn test_objects_destroyed_on_drop() {
        let mock = MockBackend::new();
        let device = Device::new(mock.clone());
        {
            let _fence = Fence::new(device.clone(), true).unwrap();
            let _semaphore = Semaphore::new(device.clone()).unwrap();
            assert_eq!(mock.live_fences(), 1);
            assert_eq!(mock.live_semaphores(), 1);
        }
        assert_eq!(mock.live_fences(), 0);
        assert_eq!(mock.live_semaphores(), 0);
    }
}
