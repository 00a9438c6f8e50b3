//! Chain rebuild and teardown sequencing.
//!
//! [`rebuild`] and [`tear_down`] fix the order of the steps; the
//! [`Renderer`](crate::Renderer) supplies the Vulkan side through
//! [`ChainRebuild`] and [`Teardown`], and tests supply an in-memory one.
//!
//! ```text
//! rebuild:   wait idle -> release framebuffers + command buffers
//!            -> recreate chain -> build targets + record -> check sizes
//! teardown:  wait idle -> sync -> command pool -> targets -> geometry
//!            -> chain -> device -> surface -> instance
//! ```

use vkframe_rhi::RhiError;

use crate::error::RendererResult;

/// Per-image resource counts of one chain generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Generation {
    pub image_count: u32,
    pub images: usize,
    pub views: usize,
    pub framebuffers: usize,
    pub command_buffers: usize,
}

impl Generation {
    /// Every per-image resource exists exactly once per chain image.
    pub fn is_consistent(&self) -> bool {
        let n = self.image_count as usize;
        self.images == n && self.views == n && self.framebuffers == n && self.command_buffers == n
    }
}

/// The steps of replacing a presentable chain and everything derived from it.
pub(crate) trait ChainRebuild {
    fn wait_idle(&mut self) -> RendererResult<()>;

    /// Frees recorded command buffers and drops the render targets.
    fn release_derived(&mut self);

    fn recreate_chain(&mut self) -> RendererResult<()>;

    /// Builds render targets for the new chain and records one command
    /// buffer per image.
    fn build_derived(&mut self) -> RendererResult<()>;

    fn generation(&self) -> Generation;
}

/// Replaces the chain as one unit.
///
/// # Errors
///
/// Any step failure, or [`RhiError::ChainCreation`] when the new generation
/// does not hold one framebuffer and one command buffer per image.
pub(crate) fn rebuild<C: ChainRebuild>(chain: &mut C) -> RendererResult<Generation> {
    chain.wait_idle()?;
    chain.release_derived();
    chain.recreate_chain()?;
    chain.build_derived()?;

    let generation = chain.generation();
    if !generation.is_consistent() {
        return Err(RhiError::ChainCreation(format!(
            "per-image resources out of step with the chain: {generation:?}"
        ))
        .into());
    }

    Ok(generation)
}

/// Release steps, in reverse order of construction.
///
/// # Safety
///
/// Each method releases a resource for good. Implementors may assume every
/// method is called at most once and that nothing touches the released
/// resource afterwards; [`tear_down`] upholds both.
pub(crate) unsafe trait Teardown {
    /// Waits for the GPU. Failures are logged, not propagated.
    fn drain(&mut self);
    unsafe fn release_sync(&mut self);
    unsafe fn release_command_pool(&mut self);
    unsafe fn release_targets(&mut self);
    /// Geometry, shader modules and pipeline layout.
    unsafe fn release_geometry(&mut self);
    unsafe fn release_chain(&mut self);
    unsafe fn release_device(&mut self);
    unsafe fn release_surface(&mut self);
    unsafe fn release_instance(&mut self);
}

/// Runs every [`Teardown`] step once, in order.
///
/// # Safety
///
/// Must be called at most once per `owner`, and `owner` must not be used
/// afterwards except to finish dropping it.
pub(crate) unsafe fn tear_down<T: Teardown>(owner: &mut T) {
    owner.drain();
    unsafe {
        owner.release_sync();
        owner.release_command_pool();
        owner.release_targets();
        owner.release_geometry();
        owner.release_chain();
        owner.release_device();
        owner.release_surface();
        owner.release_instance();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RendererError;
    use ash::vk;

    /// Chain whose recreation switches to `next_image_count` images.
    struct MockChain {
        calls: Vec<&'static str>,
        image_count: u32,
        next_image_count: u32,
        framebuffers: usize,
        command_buffers: usize,
        recreate_error: Option<vk::Result>,
        short_recording: bool,
    }

    impl MockChain {
        fn new(image_count: u32, next_image_count: u32) -> Self {
            Self {
                calls: Vec::new(),
                image_count,
                next_image_count,
                framebuffers: image_count as usize,
                command_buffers: image_count as usize,
                recreate_error: None,
                short_recording: false,
            }
        }
    }

    impl ChainRebuild for MockChain {
        fn wait_idle(&mut self) -> RendererResult<()> {
            self.calls.push("wait_idle");
            Ok(())
        }

        fn release_derived(&mut self) {
            self.calls.push("release_derived");
            self.framebuffers = 0;
            self.command_buffers = 0;
        }

        fn recreate_chain(&mut self) -> RendererResult<()> {
            self.calls.push("recreate_chain");
            if let Some(e) = self.recreate_error {
                return Err(RhiError::ChainCreation(e.to_string()).into());
            }
            self.image_count = self.next_image_count;
            Ok(())
        }

        fn build_derived(&mut self) -> RendererResult<()> {
            self.calls.push("build_derived");
            self.framebuffers = self.image_count as usize;
            self.command_buffers = self.image_count as usize;
            if self.short_recording {
                self.command_buffers -= 1;
            }
            Ok(())
        }

        fn generation(&self) -> Generation {
            Generation {
                image_count: self.image_count,
                images: self.image_count as usize,
                views: self.image_count as usize,
                framebuffers: self.framebuffers,
                command_buffers: self.command_buffers,
            }
        }
    }

    #[test]
    fn test_rebuild_to_smaller_chain() {
        let mut chain = MockChain::new(3, 2);
        assert!(chain.generation().is_consistent());

        let generation = rebuild(&mut chain).unwrap();

        assert_eq!(generation.image_count, 2);
        assert_eq!(generation.framebuffers, 2);
        assert_eq!(generation.command_buffers, 2);
        assert_eq!(
            chain.calls,
            vec![
                "wait_idle",
                "release_derived",
                "recreate_chain",
                "build_derived"
            ]
        );
    }

    #[test]
    fn test_rebuild_to_larger_chain() {
        let mut chain = MockChain::new(2, 4);
        let generation = rebuild(&mut chain).unwrap();
        assert_eq!(generation.framebuffers, 4);
        assert_eq!(generation.command_buffers, 4);
    }

    #[test]
    fn test_failed_recreate_builds_nothing() {
        let mut chain = MockChain::new(3, 2);
        chain.recreate_error = Some(vk::Result::ERROR_SURFACE_LOST_KHR);

        let err = rebuild(&mut chain).unwrap_err();

        assert!(matches!(
            err,
            RendererError::Rhi(RhiError::ChainCreation(_))
        ));
        assert!(!chain.calls.contains(&"build_derived"));
        assert_eq!(chain.command_buffers, 0);
    }

    #[test]
    fn test_inconsistent_generation_rejected() {
        let mut chain = MockChain::new(3, 3);
        chain.short_recording = true;

        let err = rebuild(&mut chain).unwrap_err();
        assert!(err.to_string().contains("out of step"));
    }

    #[test]
    fn test_generation_consistency() {
        let generation = Generation {
            image_count: 3,
            images: 3,
            views: 3,
            framebuffers: 3,
            command_buffers: 3,
        };
        assert!(generation.is_consistent());
        assert!(
            !Generation {
                views: 2,
                ..generation
            }
            .is_consistent()
        );
        assert!(
            !Generation {
                framebuffers: 4,
                ..generation
            }
            .is_consistent()
        );
    }

    #[derive(Default)]
    struct MockOwner {
        calls: Vec<&'static str>,
    }

    unsafe impl Teardown for MockOwner {
        fn drain(&mut self) {
            self.calls.push("wait_idle");
        }
        unsafe fn release_sync(&mut self) {
            self.calls.push("sync");
        }
        unsafe fn release_command_pool(&mut self) {
            self.calls.push("command_pool");
        }
        unsafe fn release_targets(&mut self) {
            self.calls.push("targets");
        }
        unsafe fn release_geometry(&mut self) {
            self.calls.push("geometry");
        }
        unsafe fn release_chain(&mut self) {
            self.calls.push("chain");
        }
        unsafe fn release_device(&mut self) {
            self.calls.push("device");
        }
        unsafe fn release_surface(&mut self) {
            self.calls.push("surface");
        }
        unsafe fn release_instance(&mut self) {
            self.calls.push("instance");
        }
    }

    #[test]
    fn test_teardown_order() {
        let mut owner = MockOwner::default();

        unsafe { tear_down(&mut owner) };

        assert_eq!(
            owner.calls,
            vec![
                "wait_idle",
                "sync",
                "command_pool",
                "targets",
                "geometry",
                "chain",
                "device",
                "surface",
                "instance"
            ]
        );
    }
}
