//! RHI-specific error types.
//!
//! Surface staleness is deliberately absent from this enum: out-of-date and
//! suboptimal surfaces are reported through [`AcquireOutcome`] and
//! [`PresentOutcome`] so they can never be mistaken for a fatal failure.
//!
//! [`AcquireOutcome`]: crate::swapchain::AcquireOutcome
//! [`PresentOutcome`]: crate::swapchain::PresentOutcome

use ash::vk;
use thiserror::Error;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Unexpected Vulkan result from an operation with no staleness handling.
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] vk::Result),

    /// Failed to load Vulkan
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// No suitable GPU found
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// No memory type matches the filter and the requested properties.
    #[error("No memory type in filter {type_filter:#b} supports {properties:?}")]
    NoSuitableMemoryType {
        type_filter: u32,
        properties: vk::MemoryPropertyFlags,
    },

    /// None of the candidate formats supports the requested features.
    #[error("No candidate format supports {features:?} with {tiling:?} tiling")]
    NoSupportedFormat {
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    },

    /// None of the preferred surface formats is offered by the surface.
    #[error("Surface supports none of the preferred formats {0:?}")]
    NoSurfaceFormat(Vec<vk::Format>),

    /// None of the preferred present modes is offered by the surface.
    #[error("Surface supports none of the preferred present modes {0:?}")]
    NoPresentMode(Vec<vk::PresentModeKHR>),

    /// The surface cannot create images with a usage the engine needs.
    #[error("Surface images do not support {0:?} usage")]
    UnsupportedSurfaceUsage(vk::ImageUsageFlags),

    /// Texel size of a format is not known to the engine.
    #[error("Unsupported format: {0:?}")]
    UnsupportedFormat(vk::Format),

    /// Image upload payload does not match the image footprint.
    #[error("Image upload of {actual} bytes does not match the expected {expected} bytes")]
    TransferSizeMismatch { expected: u64, actual: u64 },

    /// Surface or window-system error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Invalid argument or handle
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// IO error while writing readback images
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;
