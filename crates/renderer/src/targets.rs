//! Render targets for one presentable-chain generation.
//!
//! [`RenderTargets`] bundles the render pass, one framebuffer per chain image
//! view and the graphics pipeline (whose viewport is baked from the chain
//! extent). All three are built from the current chain and dropped together
//! when it is rebuilt.
//!
//! ```text
//! RenderTargets
//!   pipeline       (subpass 0 of render_pass, extent-sized viewport)
//!   framebuffers   [one per image view]
//!   render_pass    (1 color attachment: CLEAR -> STORE, UNDEFINED -> PRESENT_SRC)
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use vkframe_rhi::RhiResult;
use vkframe_rhi::device::Device;
use vkframe_rhi::pipeline::{CullMode, GraphicsPipelineBuilder, Pipeline, PipelineLayout};
use vkframe_rhi::shader::Shader;
use vkframe_rhi::swapchain::Swapchain;
use vkframe_rhi::vertex::Vertex;

/// Single-subpass render pass writing one presentable color attachment.
pub struct RenderPass {
    device: Arc<Device>,
    render_pass: vk::RenderPass,
}

impl RenderPass {
    pub fn new(device: Arc<Device>, color_format: vk::Format) -> RhiResult<Self> {
        let attachments = [color_attachment(color_format)];

        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];

        let subpasses = [vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)];

        let dependencies = [acquire_dependency()];

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let render_pass = unsafe { device.handle().create_render_pass(&create_info, None)? };

        debug!("Render pass created for {:?}", color_format);

        Ok(Self {
            device,
            render_pass,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_render_pass(self.render_pass, None);
        }
        debug!("Render pass destroyed");
    }
}

/// One framebuffer per chain image view, in chain order.
pub struct Framebuffers {
    device: Arc<Device>,
    framebuffers: Vec<vk::Framebuffer>,
}

impl Framebuffers {
    /// Creates a framebuffer for each view. On failure the ones already
    /// created are destroyed.
    pub fn new(
        device: Arc<Device>,
        render_pass: &RenderPass,
        image_views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> RhiResult<Self> {
        let mut framebuffers = Self {
            device,
            framebuffers: Vec::with_capacity(image_views.len()),
        };

        for &view in image_views {
            let attachments = [view];
            let create_info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass.handle())
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);

            let framebuffer = unsafe {
                framebuffers
                    .device
                    .handle()
                    .create_framebuffer(&create_info, None)?
            };
            framebuffers.framebuffers.push(framebuffer);
        }

        debug!(
            "Created {} framebuffer(s) at {}x{}",
            framebuffers.framebuffers.len(),
            extent.width,
            extent.height
        );

        Ok(framebuffers)
    }

    #[inline]
    pub fn handles(&self) -> &[vk::Framebuffer] {
        &self.framebuffers
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.framebuffers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.framebuffers.is_empty()
    }
}

impl Drop for Framebuffers {
    fn drop(&mut self) {
        for &framebuffer in &self.framebuffers {
            unsafe {
                self.device.handle().destroy_framebuffer(framebuffer, None);
            }
        }
        debug!("Destroyed {} framebuffer(s)", self.framebuffers.len());
    }
}

/// Shader pair used to (re)build the pipeline for each generation.
pub struct PipelineShaders<'a> {
    pub vertex: &'a Shader,
    pub fragment: &'a Shader,
}

/// Render pass, framebuffers and pipeline for the current chain.
///
/// Fields drop in declaration order: pipeline, framebuffers, render pass.
pub struct RenderTargets {
    pipeline: Pipeline,
    framebuffers: Framebuffers,
    render_pass: RenderPass,
    extent: vk::Extent2D,
}

impl RenderTargets {
    pub fn new(
        device: Arc<Device>,
        swapchain: &Swapchain,
        layout: &PipelineLayout,
        shaders: &PipelineShaders<'_>,
    ) -> RhiResult<Self> {
        let extent = swapchain.extent();

        let render_pass = RenderPass::new(device.clone(), swapchain.format())?;
        let framebuffers = Framebuffers::new(
            device.clone(),
            &render_pass,
            swapchain.image_views(),
            extent,
        )?;

        let pipeline = GraphicsPipelineBuilder::new()
            .vertex_shader(shaders.vertex)
            .fragment_shader(shaders.fragment)
            .vertex_binding(Vertex::binding_description())
            .vertex_attributes(&Vertex::attribute_descriptions())
            .cull_mode(CullMode::None)
            .build(device, layout, render_pass.handle(), extent)?;

        info!(
            "Render targets built: {} framebuffer(s), {}x{}",
            framebuffers.len(),
            extent.width,
            extent.height
        );

        Ok(Self {
            pipeline,
            framebuffers,
            render_pass,
            extent,
        })
    }

    #[inline]
    pub fn render_pass(&self) -> &RenderPass {
        &self.render_pass
    }

    #[inline]
    pub fn framebuffers(&self) -> &Framebuffers {
        &self.framebuffers
    }

    #[inline]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

/// The single color attachment: cleared on load, stored for presentation.
pub fn color_attachment(format: vk::Format) -> vk::AttachmentDescription {
    vk::AttachmentDescription::default()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
}

/// Holds the layout transition until the acquired image is available,
/// which the submission signals at COLOR_ATTACHMENT_OUTPUT.
pub fn acquire_dependency() -> vk::SubpassDependency {
    vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_attachment() {
        let attachment = color_attachment(vk::Format::B8G8R8A8_SRGB);

        assert_eq!(attachment.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(attachment.samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(attachment.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(attachment.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(attachment.stencil_load_op, vk::AttachmentLoadOp::DONT_CARE);
        assert_eq!(attachment.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(attachment.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn test_acquire_dependency() {
        let dependency = acquire_dependency();

        assert_eq!(dependency.src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(dependency.dst_subpass, 0);
        assert_eq!(
            dependency.src_stage_mask,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        );
        assert_eq!(
            dependency.dst_access_mask,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        );
    }

    #[test]
    fn test_targets_are_send() {
        fn assert_send<T: Send>() {}
        assert_send::<RenderTargets>();
    }
}
