//! Error types for the platform layer.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlatformError {
    /// Window creation or management errors
    #[error("Window error: {0}")]
    Window(#[from] winit::error::OsError),

    /// Event loop creation or run errors
    #[error("Event loop error: {0}")]
    EventLoop(#[from] winit::error::EventLoopError),
}

pub type PlatformResult<T> = std::result::Result<T, PlatformError>;
