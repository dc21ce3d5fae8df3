//! GPU resource lifecycle layer (Render Hardware Interface).
//!
//! This crate owns everything that touches device objects directly:
//! - The [`Backend`](backend::Backend) seam with a Vulkan and a mock implementation
//!   (the mock behind the `mock` feature)
//! - The shared [`Device`](device::Device) context
//! - Device memory allocation, buffers, images and staged transfers
//! - Command buffer recording and synchronization primitives
//! - The presentation chain, on a surface or as a headless ring
//! - PPM readback of rendered images

mod error;

pub mod allocator;
pub mod backend;
pub mod buffer;
pub mod command;
pub mod device;
pub mod format;
pub mod image;
pub mod memory;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod readback;
pub mod swapchain;
pub mod sync;
pub mod vulkan;

pub use error::{RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;
