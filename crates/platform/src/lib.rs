//! Platform layer: window and input.
//!
//! - Window management via winit, exposing raw handles for surface creation
//! - Conversion of window events into engine [`InputEvent`]s

mod error;
mod input;
mod window;

pub use error::{PlatformError, PlatformResult};
pub use input::{InputEvent, InputQueue, MouseButton};
pub use window::Window;

// Re-export winit types that users might need
pub use winit::event::WindowEvent;
pub use winit::event_loop::{ActiveEventLoop, EventLoop};
pub use winit::keyboard::{KeyCode, ModifiersState};
