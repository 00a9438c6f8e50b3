//! Platform layer for vkframe.
//!
//! This crate provides:
//! - Window management via winit
//! - Vulkan surface creation for that window
//! - The instance extensions the surface needs

mod window;

pub use window::{Surface, Window};

// Re-export winit types that users might need
pub use winit::event::WindowEvent;
pub use winit::event_loop::{ActiveEventLoop, EventLoop};
