//! Pre-recording of the per-image command buffers.
//!
//! Each buffer is recorded once per render-target generation and then
//! resubmitted unchanged whenever its image is acquired.

use tracing::debug;

use vkframe_rhi::{RhiResult, vk};
use vkframe_rhi::command::{CommandBuffer, CommandPool};

use crate::geometry::Drawable;
use crate::targets::RenderTargets;

/// Allocates and records one command buffer per framebuffer in `targets`.
///
/// Buffer `i` clears framebuffer `i` to `clear_color`, binds the pipeline and
/// draws every drawable in order. Drawables without vertices are skipped.
pub fn record_command_buffers(
    pool: &CommandPool,
    targets: &RenderTargets,
    drawables: &[&dyn Drawable],
    clear_color: [f32; 4],
) -> RhiResult<Vec<CommandBuffer>> {
    let framebuffers = targets.framebuffers().handles();
    let buffers = pool.allocate_command_buffers(framebuffers.len() as u32)?;

    let recorded = buffers
        .iter()
        .zip(framebuffers)
        .try_for_each(|(cmd, &framebuffer)| {
            record_one(cmd, targets, framebuffer, drawables, clear_color)
        });

    if let Err(e) = recorded {
        pool.free_command_buffers(buffers);
        return Err(e);
    }

    debug!(
        "Recorded {} command buffer(s) with {} drawable(s)",
        buffers.len(),
        drawables.len()
    );

    Ok(buffers)
}

fn record_one(
    cmd: &CommandBuffer,
    targets: &RenderTargets,
    framebuffer: vk::Framebuffer,
    drawables: &[&dyn Drawable],
    clear_color: [f32; 4],
) -> RhiResult<()> {
    cmd.begin_reusable()?;
    cmd.begin_render_pass(
        targets.render_pass().handle(),
        framebuffer,
        targets.extent(),
        clear_color,
    );
    cmd.bind_pipeline(targets.pipeline().bind_point(), targets.pipeline().handle());

    for drawable in non_empty(drawables) {
        drawable.bind(cmd);
        cmd.draw(drawable.vertex_count(), 1, 0, 0);
    }

    cmd.end_render_pass();
    cmd.end()
}

fn non_empty<'a>(drawables: &'a [&'a dyn Drawable]) -> impl Iterator<Item = &'a dyn Drawable> {
    drawables
        .iter()
        .copied()
        .filter(|drawable| drawable.vertex_count() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fake(u32);

    impl Drawable for Fake {
        fn bind(&self, _cmd: &CommandBuffer) {}

        fn vertex_count(&self) -> u32 {
            self.0
        }
    }

    #[test]
    fn test_empty_drawables_are_skipped() {
        let (a, b, c) = (Fake(3), Fake(0), Fake(6));
        let drawables: [&dyn Drawable; 3] = [&a, &b, &c];

        let counts: Vec<u32> = non_empty(&drawables).map(|d| d.vertex_count()).collect();
        assert_eq!(counts, vec![3, 6]);
    }
}
