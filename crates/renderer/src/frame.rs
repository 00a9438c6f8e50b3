//! Per-frame acquire/submit/present protocol.
//!
//! [`FrameLoop`] drives one frame at a time against a [`FrameBackend`]. The
//! Vulkan implementation is [`VulkanFrame`]; tests drive the same loop with
//! an in-memory backend.
//!
//! # Protocol
//!
//! ```text
//! 1. wait for the frame-complete fence       (previous frame done on GPU)
//! 2. acquire next image                      -> signals image-acquired
//!      OutOfDate: stop here, fence still signaled, report Skipped
//! 3. reset the frame-complete fence
//! 4. submit pre-recorded buffer[index]       waits image-acquired at
//!                                            COLOR_ATTACHMENT_OUTPUT,
//!                                            signals render-complete + fence
//! 5. present index                           waits render-complete
//!      Stale or suboptimal acquire: report Stale
//! ```
//!
//! The fence is reset only once an image has been acquired, so an aborted
//! frame never leaves an unsignaled fence with no submission to signal it.

use ash::vk;
use tracing::{debug, trace};

use vkframe_rhi::command::CommandBuffer;
use vkframe_rhi::device::Device;
use vkframe_rhi::swapchain::{AcquireOutcome, PresentOutcome, Swapchain};
use vkframe_rhi::sync::FrameSync;
use vkframe_rhi::{RhiError, RhiResult};

/// The GPU-facing half of a frame.
pub trait FrameBackend {
    /// Blocks until the previous frame's submission has completed.
    fn wait_for_previous_frame(&mut self) -> RhiResult<()>;

    fn acquire_next_image(&mut self) -> RhiResult<AcquireOutcome>;

    fn reset_frame_fence(&mut self) -> RhiResult<()>;

    /// Submits the pre-recorded command buffer for `image_index`.
    fn submit(&mut self, image_index: u32) -> RhiResult<()>;

    fn present(&mut self, image_index: u32) -> RhiResult<PresentOutcome>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    Uninitialized,
    Ready,
    Acquiring,
    Submitted,
    Presenting,
    TornDown,
}

/// What happened to one frame, as seen by the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// Rendered and presented; the chain is current.
    Presented,
    /// Rendered and presented, but the chain should be rebuilt.
    Stale,
    /// Nothing was submitted because the chain is out of date.
    Skipped,
}

impl FrameStatus {
    #[inline]
    pub fn needs_rebuild(self) -> bool {
        !matches!(self, FrameStatus::Presented)
    }
}

/// Frame state machine with submission/presentation counters.
#[derive(Debug)]
pub struct FrameLoop {
    state: FrameState,
    submissions: u64,
    presentations: u64,
}

impl FrameLoop {
    pub fn new() -> Self {
        Self {
            state: FrameState::Uninitialized,
            submissions: 0,
            presentations: 0,
        }
    }

    /// Marks setup as complete. Frames may be drawn from here on.
    pub fn mark_ready(&mut self) {
        if self.state == FrameState::Uninitialized {
            self.state = FrameState::Ready;
        }
    }

    /// Marks the loop as torn down. Further frames are rejected.
    pub fn tear_down(&mut self) {
        self.state = FrameState::TornDown;
    }

    #[inline]
    pub fn state(&self) -> FrameState {
        self.state
    }

    #[inline]
    pub fn submissions(&self) -> u64 {
        self.submissions
    }

    #[inline]
    pub fn presentations(&self) -> u64 {
        self.presentations
    }

    /// Runs one frame.
    ///
    /// Whatever the outcome, the loop is back in `Ready` afterwards, so the
    /// caller can rebuild or tear down.
    ///
    /// # Errors
    ///
    /// `InvalidHandle` before setup or after teardown; otherwise whatever
    /// the backend reports as fatal (`Acquire`, `Submit`, `Present`, fence
    /// wait failures).
    pub fn draw_frame<B: FrameBackend>(&mut self, backend: &mut B) -> RhiResult<FrameStatus> {
        match self.state {
            FrameState::Ready => {}
            FrameState::TornDown => {
                return Err(RhiError::InvalidHandle(
                    "frame drawn after teardown".to_string(),
                ));
            }
            other => {
                return Err(RhiError::InvalidHandle(format!(
                    "frame drawn in state {:?}",
                    other
                )));
            }
        }

        let result = self.run(backend);
        self.state = FrameState::Ready;
        result
    }

    fn run<B: FrameBackend>(&mut self, backend: &mut B) -> RhiResult<FrameStatus> {
        self.state = FrameState::Acquiring;
        backend.wait_for_previous_frame()?;

        let (image_index, suboptimal) = match backend.acquire_next_image()? {
            AcquireOutcome::Acquired { index, suboptimal } => (index, suboptimal),
            AcquireOutcome::OutOfDate => {
                debug!("Chain out of date on acquire, skipping frame");
                return Ok(FrameStatus::Skipped);
            }
        };

        backend.reset_frame_fence()?;
        backend.submit(image_index)?;
        self.submissions += 1;
        self.state = FrameState::Submitted;
        trace!("Submitted image {}", image_index);

        self.state = FrameState::Presenting;
        let outcome = backend.present(image_index)?;
        self.presentations += 1;

        trace!("Presented image {}", image_index);

        match outcome {
            PresentOutcome::Presented if !suboptimal => Ok(FrameStatus::Presented),
            _ => {
                debug!("Chain stale after present (suboptimal acquire: {})", suboptimal);
                Ok(FrameStatus::Stale)
            }
        }
    }
}

impl Default for FrameLoop {
    fn default() -> Self {
        Self::new()
    }
}

/// [`FrameBackend`] over the device queues, the chain, the frame
/// synchronization set and the pre-recorded command buffers.
pub struct VulkanFrame<'a> {
    pub device: &'a Device,
    pub swapchain: &'a Swapchain,
    pub sync: &'a FrameSync,
    pub command_buffers: &'a [CommandBuffer],
}

impl FrameBackend for VulkanFrame<'_> {
    fn wait_for_previous_frame(&mut self) -> RhiResult<()> {
        self.sync.in_flight_fence().wait(u64::MAX)
    }

    fn acquire_next_image(&mut self) -> RhiResult<AcquireOutcome> {
        self.swapchain
            .acquire_next_image(self.sync.image_available_semaphore().handle())
    }

    fn reset_frame_fence(&mut self) -> RhiResult<()> {
        self.sync.in_flight_fence().reset()
    }

    fn submit(&mut self, image_index: u32) -> RhiResult<()> {
        let cmd = self
            .command_buffers
            .get(image_index as usize)
            .ok_or_else(|| {
                RhiError::InvalidHandle(format!(
                    "no recorded command buffer for image {}",
                    image_index
                ))
            })?;

        let wait_semaphores = [self.sync.image_available_semaphore().handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [cmd.handle()];
        let signal_semaphores = [self.sync.render_finished_semaphore().handle()];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        // SAFETY: the buffer is fully recorded, and the fence was reset after
        // the wait above so no other submission holds it.
        unsafe {
            self.device
                .submit_graphics(&[submit_info], self.sync.in_flight_fence().handle())
        }
    }

    fn present(&mut self, image_index: u32) -> RhiResult<PresentOutcome> {
        self.swapchain.present(
            self.device.present_queue(),
            image_index,
            self.sync.render_finished_semaphore().handle(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Wait,
        Acquire,
        Reset,
        Submit(u32),
        Present(u32),
    }

    /// Simulates a one-frame-in-flight device: the fence is signaled by
    /// submission and a wait on an unsignaled fence would block forever.
    struct MockBackend {
        calls: Vec<Call>,
        fence_signaled: bool,
        acquires: VecDeque<RhiResult<AcquireOutcome>>,
        presents: VecDeque<RhiResult<PresentOutcome>>,
        submit_error: Option<vk::Result>,
        image_count: u32,
        next_image: u32,
    }

    impl MockBackend {
        fn new(image_count: u32) -> Self {
            Self {
                calls: Vec::new(),
                fence_signaled: true,
                acquires: VecDeque::new(),
                presents: VecDeque::new(),
                submit_error: None,
                image_count,
                next_image: 0,
            }
        }

        fn submits(&self) -> Vec<u32> {
            self.calls
                .iter()
                .filter_map(|c| match c {
                    Call::Submit(i) => Some(*i),
                    _ => None,
                })
                .collect()
        }

        fn presents(&self) -> Vec<u32> {
            self.calls
                .iter()
                .filter_map(|c| match c {
                    Call::Present(i) => Some(*i),
                    _ => None,
                })
                .collect()
        }
    }

    impl FrameBackend for MockBackend {
        fn wait_for_previous_frame(&mut self) -> RhiResult<()> {
            self.calls.push(Call::Wait);
            if self.fence_signaled {
                Ok(())
            } else {
                Err(RhiError::VulkanError(vk::Result::TIMEOUT))
            }
        }

        fn acquire_next_image(&mut self) -> RhiResult<AcquireOutcome> {
            self.calls.push(Call::Acquire);
            self.acquires.pop_front().unwrap_or_else(|| {
                let index = self.next_image;
                self.next_image = (self.next_image + 1) % self.image_count;
                Ok(AcquireOutcome::Acquired {
                    index,
                    suboptimal: false,
                })
            })
        }

        fn reset_frame_fence(&mut self) -> RhiResult<()> {
            self.calls.push(Call::Reset);
            self.fence_signaled = false;
            Ok(())
        }

        fn submit(&mut self, image_index: u32) -> RhiResult<()> {
            self.calls.push(Call::Submit(image_index));
            if let Some(e) = self.submit_error {
                return Err(RhiError::Submit(e));
            }
            // Work completes immediately
            self.fence_signaled = true;
            Ok(())
        }

        fn present(&mut self, image_index: u32) -> RhiResult<PresentOutcome> {
            self.calls.push(Call::Present(image_index));
            self.presents
                .pop_front()
                .unwrap_or(Ok(PresentOutcome::Presented))
        }
    }

    fn ready_loop() -> FrameLoop {
        let mut frame_loop = FrameLoop::new();
        frame_loop.mark_ready();
        frame_loop
    }

    #[test]
    fn test_first_frame_does_not_block() {
        let mut frame_loop = ready_loop();
        let mut backend = MockBackend::new(3);

        let status = frame_loop.draw_frame(&mut backend).unwrap();

        assert_eq!(status, FrameStatus::Presented);
        assert_eq!(
            backend.calls,
            vec![
                Call::Wait,
                Call::Acquire,
                Call::Reset,
                Call::Submit(0),
                Call::Present(0)
            ]
        );
    }

    #[test]
    fn test_n_frames_submit_and_present_n_times() {
        let mut frame_loop = ready_loop();
        let mut backend = MockBackend::new(3);

        for _ in 0..10 {
            assert_eq!(
                frame_loop.draw_frame(&mut backend).unwrap(),
                FrameStatus::Presented
            );
        }

        assert_eq!(frame_loop.submissions(), 10);
        assert_eq!(frame_loop.presentations(), 10);
        assert_eq!(backend.submits(), vec![0, 1, 2, 0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(backend.presents(), backend.submits());
    }

    #[test]
    fn test_present_targets_acquired_index() {
        let mut frame_loop = ready_loop();
        let mut backend = MockBackend::new(3);
        backend.acquires.push_back(Ok(AcquireOutcome::Acquired {
            index: 2,
            suboptimal: false,
        }));
        backend.acquires.push_back(Ok(AcquireOutcome::Acquired {
            index: 1,
            suboptimal: false,
        }));

        frame_loop.draw_frame(&mut backend).unwrap();
        frame_loop.draw_frame(&mut backend).unwrap();

        assert_eq!(backend.submits(), vec![2, 1]);
        assert_eq!(backend.presents(), vec![2, 1]);
    }

    #[test]
    fn test_out_of_date_acquire_skips_frame() {
        let mut frame_loop = ready_loop();
        let mut backend = MockBackend::new(2);
        backend.acquires.push_back(Ok(AcquireOutcome::OutOfDate));

        let status = frame_loop.draw_frame(&mut backend).unwrap();

        assert_eq!(status, FrameStatus::Skipped);
        assert!(status.needs_rebuild());
        assert_eq!(backend.calls, vec![Call::Wait, Call::Acquire]);
        assert_eq!(frame_loop.submissions(), 0);
        assert_eq!(frame_loop.state(), FrameState::Ready);

        // The fence was never reset, so the next wait goes through
        let status = frame_loop.draw_frame(&mut backend).unwrap();
        assert_eq!(status, FrameStatus::Presented);
        assert_eq!(frame_loop.submissions(), 1);
    }

    #[test]
    fn test_stale_present_is_not_fatal() {
        let mut frame_loop = ready_loop();
        let mut backend = MockBackend::new(2);
        backend.presents.push_back(Ok(PresentOutcome::Stale));

        let status = frame_loop.draw_frame(&mut backend).unwrap();

        assert_eq!(status, FrameStatus::Stale);
        assert_eq!(frame_loop.submissions(), 1);
        assert_eq!(frame_loop.presentations(), 1);
        assert_eq!(frame_loop.state(), FrameState::Ready);

        assert_eq!(
            frame_loop.draw_frame(&mut backend).unwrap(),
            FrameStatus::Presented
        );
    }

    #[test]
    fn test_suboptimal_acquire_still_submits() {
        let mut frame_loop = ready_loop();
        let mut backend = MockBackend::new(2);
        backend.acquires.push_back(Ok(AcquireOutcome::Acquired {
            index: 1,
            suboptimal: true,
        }));

        let status = frame_loop.draw_frame(&mut backend).unwrap();

        assert_eq!(status, FrameStatus::Stale);
        assert_eq!(backend.submits(), vec![1]);
        assert_eq!(backend.presents(), vec![1]);
    }

    #[test]
    fn test_acquire_error_is_fatal() {
        let mut frame_loop = ready_loop();
        let mut backend = MockBackend::new(2);
        backend
            .acquires
            .push_back(Err(RhiError::Acquire(vk::Result::ERROR_DEVICE_LOST)));

        let err = frame_loop.draw_frame(&mut backend).unwrap_err();

        assert!(matches!(err, RhiError::Acquire(vk::Result::ERROR_DEVICE_LOST)));
        assert_eq!(frame_loop.submissions(), 0);
        assert_eq!(frame_loop.state(), FrameState::Ready);
    }

    #[test]
    fn test_submit_error_is_fatal() {
        let mut frame_loop = ready_loop();
        let mut backend = MockBackend::new(2);
        backend.submit_error = Some(vk::Result::ERROR_DEVICE_LOST);

        let err = frame_loop.draw_frame(&mut backend).unwrap_err();

        assert!(matches!(err, RhiError::Submit(_)));
        assert_eq!(frame_loop.submissions(), 0);
        assert!(backend.presents().is_empty());
        assert_eq!(frame_loop.state(), FrameState::Ready);
    }

    #[test]
    fn test_present_error_is_fatal() {
        let mut frame_loop = ready_loop();
        let mut backend = MockBackend::new(2);
        backend
            .presents
            .push_back(Err(RhiError::Present(vk::Result::ERROR_SURFACE_LOST_KHR)));

        let err = frame_loop.draw_frame(&mut backend).unwrap_err();

        assert!(matches!(err, RhiError::Present(_)));
        assert_eq!(frame_loop.submissions(), 1);
        assert_eq!(frame_loop.presentations(), 0);
    }

    #[test]
    fn test_draw_before_ready_is_rejected() {
        let mut frame_loop = FrameLoop::new();
        let mut backend = MockBackend::new(2);

        let err = frame_loop.draw_frame(&mut backend).unwrap_err();

        assert!(matches!(err, RhiError::InvalidHandle(_)));
        assert!(backend.calls.is_empty());
    }

    #[test]
    fn test_draw_after_teardown_is_rejected() {
        let mut frame_loop = ready_loop();
        let mut backend = MockBackend::new(2);
        frame_loop.draw_frame(&mut backend).unwrap();

        frame_loop.tear_down();
        let err = frame_loop.draw_frame(&mut backend).unwrap_err();

        assert!(matches!(err, RhiError::InvalidHandle(_)));
        assert_eq!(frame_loop.state(), FrameState::TornDown);
        assert_eq!(frame_loop.submissions(), 1);
    }

    #[test]
    fn test_mark_ready_does_not_revive_torn_down_loop() {
        let mut frame_loop = ready_loop();
        frame_loop.tear_down();
        frame_loop.mark_ready();
        assert_eq!(frame_loop.state(), FrameState::TornDown);
    }
}
