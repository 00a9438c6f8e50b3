//! Frame orchestration.
//!
//! This crate drives rendering on top of `vkframe-rhi`:
//! - Render targets for each presentable-chain generation
//! - Pre-recorded per-image command buffers
//! - The per-frame acquire/submit/present protocol
//! - Chain rebuild and teardown order

mod error;

pub mod frame;
pub mod geometry;
mod lifecycle;
pub mod recording;
pub mod renderer;
pub mod targets;

pub use error::{RendererError, RendererResult};
pub use frame::{FrameBackend, FrameLoop, FrameState, FrameStatus};
pub use geometry::{Drawable, Mesh, Model};
pub use lifecycle::Generation;
pub use renderer::Renderer;
