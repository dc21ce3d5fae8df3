//! Core utilities shared by the engine crates.
//!
//! - Error type and result alias
//! - Logging initialization
//! - Frame clock
//! - Configuration file

mod clock;
mod error;
mod logging;

pub mod config;

pub use clock::{FrameClock, MAX_FRAME_STEP};
pub use config::Config;
pub use error::{CoreError, CoreResult};
pub use logging::init_logging;
