//! Main renderer orchestration.
//!
//! This module provides the [`Renderer`] struct that owns every Vulkan
//! resource, drives the frame loop and rebuilds the presentable chain when
//! it goes stale.

use std::mem::ManuallyDrop;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, error, info, warn};

use vkframe_core::EngineConfig;
use vkframe_platform::{Surface, Window};
use vkframe_rhi::RhiError;
use vkframe_rhi::command::{CommandBuffer, CommandPool};
use vkframe_rhi::device::Device;
use vkframe_rhi::instance::Instance;
use vkframe_rhi::physical_device::select_physical_device;
use vkframe_rhi::pipeline::PipelineLayout;
use vkframe_rhi::shader::{Shader, ShaderStage};
use vkframe_rhi::swapchain::Swapchain;
use vkframe_rhi::sync::FrameSync;

use crate::error::RendererResult;
use crate::frame::{FrameLoop, FrameStatus, VulkanFrame};
use crate::geometry::{Model, triangle_vertices};
use crate::lifecycle::{self, ChainRebuild, Generation, Teardown};
use crate::recording::record_command_buffers;
use crate::targets::{PipelineShaders, RenderTargets};

const VERTEX_SHADER: &str = "triangle.vert.spv";
const FRAGMENT_SHADER: &str = "triangle.frag.spv";

/// Owns all GPU state for one window.
///
/// # Resource Destruction Order
///
/// 1. Wait for the device to go idle
/// 2. Frame synchronization set
/// 3. Command pool (frees the recorded command buffers)
/// 4. Render targets: pipeline, framebuffers, render pass
/// 5. Geometry, shader modules, pipeline layout
/// 6. Swapchain
/// 7. Logical device
/// 8. Surface
/// 9. Instance
///
/// ManuallyDrop is used to ensure correct destruction order.
pub struct Renderer {
    instance: ManuallyDrop<Instance>,
    surface: ManuallyDrop<Surface>,
    device: ManuallyDrop<Arc<Device>>,
    swapchain: ManuallyDrop<Swapchain>,

    pipeline_layout: ManuallyDrop<PipelineLayout>,
    vertex_shader: ManuallyDrop<Shader>,
    fragment_shader: ManuallyDrop<Shader>,
    model: ManuallyDrop<Model>,

    /// `None` only between dropping one generation and building the next.
    targets: Option<RenderTargets>,
    command_pool: ManuallyDrop<CommandPool>,
    /// One per chain image, indexed by the acquired image index.
    command_buffers: Vec<CommandBuffer>,
    sync: ManuallyDrop<FrameSync>,

    frame_loop: FrameLoop,
    clear_color: [f32; 4],
    /// Size requested by the window; the surface may override it.
    desired_extent: vk::Extent2D,
    chain_stale: bool,
}

impl Renderer {
    /// Creates the full rendering context for `window`.
    ///
    /// # Errors
    ///
    /// Any setup failure. Resources created before the failure are released
    /// in reverse order of creation.
    pub fn new(window: &Window, config: &EngineConfig) -> RendererResult<Self> {
        let (width, height) = window.size();
        info!("Initializing Vulkan renderer ({}x{})", width, height);

        let extensions = window.required_extensions()?;
        let instance = Instance::new(&extensions, config.validation)?;

        let surface = window.create_surface(instance.entry(), instance.handle())?;

        let accelerator =
            select_physical_device(instance.handle(), surface.handle(), surface.loader())?;
        let device = Device::new(&instance, &accelerator)?;

        let desired_extent = vk::Extent2D { width, height };
        let swapchain = Swapchain::new(&instance, device.clone(), surface.handle(), desired_extent)?;

        let sync = FrameSync::new(device.clone())?;
        let graphics_family = device.queue_families().graphics_family.ok_or_else(|| {
            RhiError::InvalidHandle("device has no graphics queue family".to_string())
        })?;
        let command_pool = CommandPool::new(device.clone(), graphics_family)?;

        let pipeline_layout = PipelineLayout::new(device.clone(), &[], &[])?;
        let vertex_shader = Shader::from_spirv_file(
            device.clone(),
            &config.shader_dir.join(VERTEX_SHADER),
            ShaderStage::Vertex,
            "main",
        )?;
        let fragment_shader = Shader::from_spirv_file(
            device.clone(),
            &config.shader_dir.join(FRAGMENT_SHADER),
            ShaderStage::Fragment,
            "main",
        )?;

        let mut model = Model::new();
        model.add_mesh(device.clone(), &triangle_vertices())?;

        let targets = RenderTargets::new(
            device.clone(),
            &swapchain,
            &pipeline_layout,
            &PipelineShaders {
                vertex: &vertex_shader,
                fragment: &fragment_shader,
            },
        )?;

        let command_buffers = record_command_buffers(
            &command_pool,
            &targets,
            &model.drawables(),
            config.clear_color,
        )?;

        let mut frame_loop = FrameLoop::new();
        frame_loop.mark_ready();

        info!(
            "Renderer initialized: {} chain image(s), {:?} / {:?}, {:?}, {} mesh(es)",
            swapchain.image_count(),
            swapchain.format(),
            swapchain.color_space(),
            swapchain.present_mode(),
            model.len()
        );

        Ok(Self {
            instance: ManuallyDrop::new(instance),
            surface: ManuallyDrop::new(surface),
            device: ManuallyDrop::new(device),
            swapchain: ManuallyDrop::new(swapchain),
            pipeline_layout: ManuallyDrop::new(pipeline_layout),
            vertex_shader: ManuallyDrop::new(vertex_shader),
            fragment_shader: ManuallyDrop::new(fragment_shader),
            model: ManuallyDrop::new(model),
            targets: Some(targets),
            command_pool: ManuallyDrop::new(command_pool),
            command_buffers,
            sync: ManuallyDrop::new(sync),
            frame_loop,
            clear_color: config.clear_color,
            desired_extent,
            chain_stale: false,
        })
    }

    /// Notifies the renderer that the window has been resized.
    ///
    /// The chain is rebuilt before the next frame.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == self.desired_extent.width && height == self.desired_extent.height {
            return;
        }

        debug!(
            "Resize: {}x{} -> {}x{}",
            self.desired_extent.width, self.desired_extent.height, width, height
        );
        self.desired_extent = vk::Extent2D { width, height };
        self.chain_stale = true;
    }

    /// Renders and presents one frame, rebuilding the chain first if needed.
    ///
    /// A stale or out-of-date chain is not an error: the frame reports it and
    /// the chain is rebuilt on the next call.
    pub fn draw_frame(&mut self) -> RendererResult<FrameStatus> {
        if self.chain_stale {
            if self.desired_extent.width == 0 || self.desired_extent.height == 0 {
                return Ok(FrameStatus::Skipped);
            }
            self.rebuild()?;
        }

        let mut backend = VulkanFrame {
            device: &self.device,
            swapchain: &self.swapchain,
            sync: &self.sync,
            command_buffers: &self.command_buffers,
        };

        let status = self.frame_loop.draw_frame(&mut backend)?;
        if status.needs_rebuild() {
            self.chain_stale = true;
        }

        Ok(status)
    }

    /// Replaces the chain and everything derived from it as one unit.
    fn rebuild(&mut self) -> RendererResult<()> {
        let generation = lifecycle::rebuild(self)?;
        self.chain_stale = false;

        info!(
            "Chain rebuilt: {} image(s) at {}x{}",
            generation.image_count,
            self.swapchain.extent().width,
            self.swapchain.extent().height
        );

        Ok(())
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    pub fn frame_loop(&self) -> &FrameLoop {
        &self.frame_loop
    }
}

impl ChainRebuild for Renderer {
    fn wait_idle(&mut self) -> RendererResult<()> {
        self.device.wait_idle()?;
        Ok(())
    }

    fn release_derived(&mut self) {
        self.command_pool
            .free_command_buffers(std::mem::take(&mut self.command_buffers));
        self.targets = None;
    }

    fn recreate_chain(&mut self) -> RendererResult<()> {
        self.swapchain.recreate(self.desired_extent)?;
        Ok(())
    }

    fn build_derived(&mut self) -> RendererResult<()> {
        let targets = RenderTargets::new(
            Arc::clone(&*self.device),
            &self.swapchain,
            &self.pipeline_layout,
            &PipelineShaders {
                vertex: &self.vertex_shader,
                fragment: &self.fragment_shader,
            },
        )?;

        self.command_buffers = record_command_buffers(
            &self.command_pool,
            &targets,
            &self.model.drawables(),
            self.clear_color,
        )?;
        self.targets = Some(targets);

        Ok(())
    }

    fn generation(&self) -> Generation {
        Generation {
            image_count: self.swapchain.image_count(),
            images: self.swapchain.images().len(),
            views: self.swapchain.image_views().len(),
            framebuffers: self.targets.as_ref().map_or(0, |t| t.framebuffers().len()),
            command_buffers: self.command_buffers.len(),
        }
    }
}

// SAFETY: every release step is reached only through `tear_down`, once, from Drop.
unsafe impl Teardown for Renderer {
    fn drain(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            error!(
                "Failed to wait for device idle during renderer drop: {:?}",
                e
            );
        }
    }

    unsafe fn release_sync(&mut self) {
        unsafe { ManuallyDrop::drop(&mut self.sync) };
    }

    unsafe fn release_command_pool(&mut self) {
        // The pool frees its buffers; the wrappers do not own them
        self.command_buffers.clear();
        unsafe { ManuallyDrop::drop(&mut self.command_pool) };
    }

    unsafe fn release_targets(&mut self) {
        self.targets = None;
    }

    unsafe fn release_geometry(&mut self) {
        unsafe {
            ManuallyDrop::drop(&mut self.model);
            ManuallyDrop::drop(&mut self.fragment_shader);
            ManuallyDrop::drop(&mut self.vertex_shader);
            ManuallyDrop::drop(&mut self.pipeline_layout);
        }
    }

    unsafe fn release_chain(&mut self) {
        unsafe { ManuallyDrop::drop(&mut self.swapchain) };
    }

    unsafe fn release_device(&mut self) {
        if Arc::strong_count(&*self.device) > 1 {
            warn!("Logical device still referenced at teardown");
        }
        unsafe { ManuallyDrop::drop(&mut self.device) };
    }

    unsafe fn release_surface(&mut self) {
        unsafe { ManuallyDrop::drop(&mut self.surface) };
    }

    unsafe fn release_instance(&mut self) {
        unsafe { ManuallyDrop::drop(&mut self.instance) };
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.frame_loop.tear_down();

        // SAFETY: Drop runs once and no field is used after this.
        unsafe { lifecycle::tear_down(self) };

        info!("Renderer destroyed");
    }
}
