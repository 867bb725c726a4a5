//! Per-frame acquire/submit/present loop.
//!
//! [`FrameLoop`] owns the bookkeeping of frames in flight: which slot records
//! next, which slot last rendered to each swapchain image and whether the
//! swapchain chain has to be rebuilt. The GPU work itself is behind
//! [`FrameBackend`] so the loop can be driven without a device.

use anyhow::{bail, Result};
use tracing::{debug, info};

/// Outcome of acquiring a swapchain image for a frame slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image was acquired. `suboptimal` asks for a rebuild after presenting.
    Acquired { image_index: u32, suboptimal: bool },
    /// The swapchain no longer matches the surface; nothing was acquired.
    OutOfDate,
}

/// Outcome of queueing an image for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

/// What [`FrameLoop::draw_frame`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// A frame was submitted and presented.
    Presented,
    /// Acquisition reported an out-of-date swapchain; the chain was rebuilt
    /// and no frame was drawn.
    Skipped,
    /// A frame was presented and the chain rebuilt afterwards.
    Rebuilt,
    /// The surface is not visible; the rebuild is waiting for it to return.
    Suspended,
}

/// GPU operations the frame loop drives.
///
/// Slots are indices in `0..frames_in_flight()`, images are indices returned
/// by [`FrameBackend::acquire_image`].
pub trait FrameBackend {
    fn frames_in_flight(&self) -> usize;

    /// Number of images in the current swapchain.
    fn image_count(&self) -> usize;

    /// Block until the last submission made from `slot` has completed.
    fn wait_for_slot(&mut self, slot: usize) -> Result<()>;

    /// Acquire the next image, signaling the slot's image-available semaphore.
    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome>;

    /// Unsignal the slot's fence ahead of a submission.
    fn reset_slot(&mut self, slot: usize) -> Result<()>;

    /// Submit the commands for `image_index`, signaling the slot's fence.
    fn submit(&mut self, slot: usize, image_index: u32) -> Result<()>;

    fn present(&mut self, image_index: u32) -> Result<PresentOutcome>;

    /// Whether the surface currently has a non-zero, unminimized size.
    fn surface_visible(&self) -> bool;

    /// Tear down and recreate every swapchain-dependent object.
    fn rebuild_chain(&mut self) -> Result<()>;

    fn wait_idle(&mut self) -> Result<()>;
}

/// Frame pacing state.
#[derive(Debug)]
pub struct FrameLoop {
    frames_in_flight: usize,
    current_slot: usize,
    /// Slot that last submitted work for each swapchain image.
    images_in_flight: Vec<Option<usize>>,
    resize_pending: bool,
    rebuild_deferred: bool,
    frame_number: u64,
    rebuilds: u64,
    /// A slot fence was reset but may never be signaled.
    failed: bool,
}

impl FrameLoop {
    pub fn new(frames_in_flight: usize, image_count: usize) -> Self {
        Self {
            frames_in_flight: frames_in_flight.max(1),
            current_slot: 0,
            images_in_flight: vec![None; image_count],
            resize_pending: false,
            rebuild_deferred: false,
            frame_number: 0,
            rebuilds: 0,
            failed: false,
        }
    }

    /// Create a loop sized for `backend`'s slots and current swapchain.
    pub fn for_backend<B: FrameBackend + ?Sized>(backend: &B) -> Self {
        Self::new(backend.frames_in_flight(), backend.image_count())
    }

    /// Draw one frame.
    ///
    /// An error before the slot fence is reset leaves the loop usable. Once the
    /// fence is reset, a failed submit or present stops the loop for good:
    /// waiting on that slot again could block forever.
    pub fn draw_frame<B: FrameBackend + ?Sized>(&mut self, backend: &mut B) -> Result<FrameStatus> {
        if self.failed {
            bail!("frame loop stopped after an earlier frame error");
        }
        if self.rebuild_deferred && !self.rebuild(backend)? {
            return Ok(FrameStatus::Suspended);
        }

        let slot = self.current_slot;
        backend.wait_for_slot(slot)?;

        let (image_index, acquire_suboptimal) = match backend.acquire_image(slot)? {
            AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            } => (image_index, suboptimal),
            AcquireOutcome::OutOfDate => {
                debug!("Swapchain out of date on acquire");
                // The slot fence was not reset, so the next wait on it returns.
                return if self.rebuild(backend)? {
                    Ok(FrameStatus::Skipped)
                } else {
                    Ok(FrameStatus::Suspended)
                };
            }
        };

        let image = image_index as usize;
        if image >= self.images_in_flight.len() {
            bail!(
                "acquired image {image} but the swapchain has {} images",
                self.images_in_flight.len()
            );
        }
        if let Some(owner) = self.images_in_flight[image] {
            if owner != slot {
                backend.wait_for_slot(owner)?;
            }
        }
        self.images_in_flight[image] = Some(slot);

        let presented = match Self::submit_and_present(backend, slot, image_index) {
            Ok(presented) => presented,
            Err(e) => {
                self.failed = true;
                return Err(e);
            }
        };

        self.current_slot = (slot + 1) % self.frames_in_flight;
        self.frame_number += 1;

        let resized = std::mem::take(&mut self.resize_pending);
        if acquire_suboptimal || presented != PresentOutcome::Presented || resized {
            debug!(
                "Rebuilding after frame {} (present: {presented:?}, suboptimal acquire: {acquire_suboptimal}, resized: {resized})",
                self.frame_number
            );
            return if self.rebuild(backend)? {
                Ok(FrameStatus::Rebuilt)
            } else {
                Ok(FrameStatus::Suspended)
            };
        }

        Ok(FrameStatus::Presented)
    }

    fn submit_and_present<B: FrameBackend + ?Sized>(
        backend: &mut B,
        slot: usize,
        image_index: u32,
    ) -> Result<PresentOutcome> {
        backend.reset_slot(slot)?;
        backend.submit(slot, image_index)?;
        backend.present(image_index)
    }

    /// Rebuild the chain, or defer it while the surface is invisible.
    ///
    /// Returns whether the chain was rebuilt.
    fn rebuild<B: FrameBackend + ?Sized>(&mut self, backend: &mut B) -> Result<bool> {
        self.resize_pending = false;

        if !backend.surface_visible() {
            if !self.rebuild_deferred {
                info!("Surface hidden, suspending rendering");
            }
            self.rebuild_deferred = true;
            return Ok(false);
        }

        backend.wait_idle()?;
        backend.rebuild_chain()?;

        if self.rebuild_deferred {
            info!("Surface visible again, resuming rendering");
        }
        self.rebuild_deferred = false;
        self.images_in_flight = vec![None; backend.image_count()];
        self.rebuilds += 1;
        Ok(true)
    }

    /// Note that the framebuffer was resized; the chain is rebuilt after the
    /// next presented frame.
    pub fn notify_resized(&mut self) {
        self.resize_pending = true;
    }

    /// Wait for all submitted work before the backend is torn down.
    pub fn finish<B: FrameBackend + ?Sized>(&mut self, backend: &mut B) -> Result<()> {
        backend.wait_idle()?;
        info!(
            "Frame loop finished after {} frames and {} rebuilds",
            self.frame_number, self.rebuilds
        );
        Ok(())
    }

    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Frames presented so far.
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Chain rebuilds performed so far.
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    /// Whether rendering is paused until the surface becomes visible.
    pub fn is_suspended(&self) -> bool {
        self.rebuild_deferred
    }

    /// Whether a submit or present error stopped the loop.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Slot that last rendered to `image`, if any.
    pub fn image_owner(&self, image: usize) -> Option<usize> {
        self.images_in_flight.get(image).copied().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Wait(usize),
        Acquire(usize),
        Reset(usize),
        Submit(usize, u32),
        Present(u32),
        Rebuild,
        Idle,
    }

    struct MockBackend {
        frames: usize,
        images: usize,
        visible: bool,
        acquires: VecDeque<AcquireOutcome>,
        presents: VecDeque<PresentOutcome>,
        next_image: u32,
        calls: Vec<Call>,
        fail_acquire: bool,
        fail_submit: bool,
        fail_present: bool,
    }

    impl MockBackend {
        fn new(frames: usize, images: usize) -> Self {
            Self {
                frames,
                images,
                visible: true,
                acquires: VecDeque::new(),
                presents: VecDeque::new(),
                next_image: 0,
                calls: Vec::new(),
                fail_acquire: false,
                fail_submit: false,
                fail_present: false,
            }
        }

        fn count(&self, call: &Call) -> usize {
            self.calls.iter().filter(|c| *c == call).count()
        }
    }

    impl FrameBackend for MockBackend {
        fn frames_in_flight(&self) -> usize {
            self.frames
        }

        fn image_count(&self) -> usize {
            self.images
        }

        fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
            self.calls.push(Call::Wait(slot));
            Ok(())
        }

        fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
            self.calls.push(Call::Acquire(slot));
            if std::mem::take(&mut self.fail_acquire) {
                bail!("acquire failed");
            }
            Ok(self.acquires.pop_front().unwrap_or_else(|| {
                let image_index = self.next_image;
                self.next_image = (self.next_image + 1) % self.images as u32;
                AcquireOutcome::Acquired {
                    image_index,
                    suboptimal: false,
                }
            }))
        }

        fn reset_slot(&mut self, slot: usize) -> Result<()> {
            self.calls.push(Call::Reset(slot));
            Ok(())
        }

        fn submit(&mut self, slot: usize, image_index: u32) -> Result<()> {
            self.calls.push(Call::Submit(slot, image_index));
            if self.fail_submit {
                bail!("device lost");
            }
            Ok(())
        }

        fn present(&mut self, image_index: u32) -> Result<PresentOutcome> {
            self.calls.push(Call::Present(image_index));
            if self.fail_present {
                bail!("surface lost");
            }
            Ok(self.presents.pop_front().unwrap_or(PresentOutcome::Presented))
        }

        fn surface_visible(&self) -> bool {
            self.visible
        }

        fn rebuild_chain(&mut self) -> Result<()> {
            self.calls.push(Call::Rebuild);
            Ok(())
        }

        fn wait_idle(&mut self) -> Result<()> {
            self.calls.push(Call::Idle);
            Ok(())
        }
    }

    #[test]
    fn slots_rotate_through_frames_in_flight() {
        let mut backend = MockBackend::new(2, 3);
        let mut frames = FrameLoop::for_backend(&backend);

        for expected in [0, 1, 0, 1] {
            assert_eq!(frames.current_slot(), expected);
            assert_eq!(frames.draw_frame(&mut backend).unwrap(), FrameStatus::Presented);
        }
        assert_eq!(frames.frame_number(), 4);
        assert_eq!(frames.rebuilds(), 0);
    }

    #[test]
    fn frame_waits_before_reset_and_submits_in_order() {
        let mut backend = MockBackend::new(2, 3);
        let mut frames = FrameLoop::for_backend(&backend);
        frames.draw_frame(&mut backend).unwrap();

        assert_eq!(
            backend.calls,
            vec![
                Call::Wait(0),
                Call::Acquire(0),
                Call::Reset(0),
                Call::Submit(0, 0),
                Call::Present(0),
            ]
        );
    }

    #[test]
    fn out_of_date_acquire_rebuilds_without_resetting_fence() {
        let mut backend = MockBackend::new(2, 3);
        backend.acquires.push_back(AcquireOutcome::OutOfDate);
        let mut frames = FrameLoop::for_backend(&backend);

        assert_eq!(frames.draw_frame(&mut backend).unwrap(), FrameStatus::Skipped);
        assert_eq!(backend.count(&Call::Reset(0)), 0);
        assert_eq!(backend.count(&Call::Rebuild), 1);
        assert_eq!(frames.current_slot(), 0);
        assert_eq!(frames.frame_number(), 0);
    }

    #[test]
    fn image_owned_by_another_slot_is_waited_on() {
        let mut backend = MockBackend::new(2, 3);
        let mut frames = FrameLoop::for_backend(&backend);
        for image_index in [1, 1] {
            backend.acquires.push_back(AcquireOutcome::Acquired {
                image_index,
                suboptimal: false,
            });
        }

        frames.draw_frame(&mut backend).unwrap();
        assert_eq!(frames.image_owner(1), Some(0));
        backend.calls.clear();

        frames.draw_frame(&mut backend).unwrap();
        assert_eq!(
            &backend.calls[..4],
            &[Call::Wait(1), Call::Acquire(1), Call::Wait(0), Call::Reset(1)]
        );
        assert_eq!(frames.image_owner(1), Some(1));
    }

    #[test]
    fn suboptimal_acquire_presents_then_rebuilds() {
        let mut backend = MockBackend::new(2, 3);
        backend.acquires.push_back(AcquireOutcome::Acquired {
            image_index: 2,
            suboptimal: true,
        });
        let mut frames = FrameLoop::for_backend(&backend);

        assert_eq!(frames.draw_frame(&mut backend).unwrap(), FrameStatus::Rebuilt);
        let present = backend.calls.iter().position(|c| *c == Call::Present(2));
        let rebuild = backend.calls.iter().position(|c| *c == Call::Rebuild);
        assert!(present < rebuild);
        assert_eq!(frames.image_owner(2), None);
        assert_eq!(frames.frame_number(), 1);
    }

    #[test]
    fn present_out_of_date_and_resize_both_rebuild() {
        let mut backend = MockBackend::new(1, 2);
        backend.presents.push_back(PresentOutcome::OutOfDate);
        let mut frames = FrameLoop::for_backend(&backend);

        assert_eq!(frames.draw_frame(&mut backend).unwrap(), FrameStatus::Rebuilt);

        frames.notify_resized();
        assert_eq!(frames.draw_frame(&mut backend).unwrap(), FrameStatus::Rebuilt);
        assert_eq!(frames.draw_frame(&mut backend).unwrap(), FrameStatus::Presented);
        assert_eq!(frames.rebuilds(), 2);
    }

    #[test]
    fn rebuild_waits_for_idle_first() {
        let mut backend = MockBackend::new(2, 3);
        backend.presents.push_back(PresentOutcome::Suboptimal);
        let mut frames = FrameLoop::for_backend(&backend);
        frames.draw_frame(&mut backend).unwrap();

        let tail = &backend.calls[backend.calls.len() - 2..];
        assert_eq!(tail, &[Call::Idle, Call::Rebuild]);
    }

    #[test]
    fn hidden_surface_defers_rebuild_until_visible() {
        let mut backend = MockBackend::new(2, 3);
        backend.acquires.push_back(AcquireOutcome::OutOfDate);
        backend.visible = false;
        let mut frames = FrameLoop::for_backend(&backend);

        assert_eq!(frames.draw_frame(&mut backend).unwrap(), FrameStatus::Suspended);
        assert!(frames.is_suspended());

        backend.calls.clear();
        assert_eq!(frames.draw_frame(&mut backend).unwrap(), FrameStatus::Suspended);
        assert!(backend.calls.is_empty());

        backend.visible = true;
        assert_eq!(frames.draw_frame(&mut backend).unwrap(), FrameStatus::Presented);
        assert!(!frames.is_suspended());
        assert_eq!(backend.calls[..2], [Call::Idle, Call::Rebuild]);
        assert_eq!(frames.rebuilds(), 1);
    }

    #[test]
    fn rebuild_resizes_image_map() {
        let mut backend = MockBackend::new(2, 2);
        backend.presents.push_back(PresentOutcome::Suboptimal);
        let mut frames = FrameLoop::for_backend(&backend);
        frames.draw_frame(&mut backend).unwrap();

        backend.images = 4;
        backend.presents.push_back(PresentOutcome::Suboptimal);
        frames.draw_frame(&mut backend).unwrap();

        backend.acquires.push_back(AcquireOutcome::Acquired {
            image_index: 3,
            suboptimal: false,
        });
        assert_eq!(frames.draw_frame(&mut backend).unwrap(), FrameStatus::Presented);
        assert_eq!(frames.image_owner(3), Some(0));
    }

    #[test]
    fn image_index_out_of_range_is_an_error() {
        let mut backend = MockBackend::new(2, 2);
        backend.acquires.push_back(AcquireOutcome::Acquired {
            image_index: 5,
            suboptimal: false,
        });
        let mut frames = FrameLoop::for_backend(&backend);
        assert!(frames.draw_frame(&mut backend).is_err());
    }

    #[test]
    fn acquire_error_propagates_and_loop_stays_usable() {
        let mut backend = MockBackend::new(2, 3);
        let mut frames = FrameLoop::for_backend(&backend);
        frames.draw_frame(&mut backend).unwrap();

        backend.fail_acquire = true;
        let err = frames.draw_frame(&mut backend).unwrap_err();
        assert_eq!(err.to_string(), "acquire failed");
        assert_eq!(frames.current_slot(), 1);
        assert_eq!(frames.frame_number(), 1);
        assert_eq!(backend.count(&Call::Reset(1)), 0);
        assert!(!frames.is_failed());

        assert_eq!(frames.draw_frame(&mut backend).unwrap(), FrameStatus::Presented);
        assert_eq!(frames.frame_number(), 2);
    }

    #[test]
    fn submit_error_after_reset_stops_the_loop() {
        let mut backend = MockBackend::new(2, 3);
        backend.fail_submit = true;
        let mut frames = FrameLoop::for_backend(&backend);

        let err = frames.draw_frame(&mut backend).unwrap_err();
        assert_eq!(err.to_string(), "device lost");
        assert!(frames.is_failed());
        assert_eq!(frames.current_slot(), 0);
        assert_eq!(frames.frame_number(), 0);
        assert_eq!(backend.count(&Call::Present(0)), 0);

        backend.fail_submit = false;
        backend.calls.clear();
        assert!(frames.draw_frame(&mut backend).is_err());
        assert!(backend.calls.is_empty());
    }

    #[test]
    fn present_error_stops_the_loop_without_advancing() {
        let mut backend = MockBackend::new(2, 3);
        backend.fail_present = true;
        let mut frames = FrameLoop::for_backend(&backend);

        let err = frames.draw_frame(&mut backend).unwrap_err();
        assert_eq!(err.to_string(), "surface lost");
        assert!(frames.is_failed());
        assert_eq!(frames.current_slot(), 0);
        assert_eq!(frames.frame_number(), 0);

        backend.calls.clear();
        assert!(frames.draw_frame(&mut backend).is_err());
        assert!(backend.calls.is_empty());
    }

    #[test]
    fn finish_still_waits_after_a_failed_frame() {
        let mut backend = MockBackend::new(2, 3);
        backend.fail_submit = true;
        let mut frames = FrameLoop::for_backend(&backend);
        assert!(frames.draw_frame(&mut backend).is_err());

        backend.calls.clear();
        frames.finish(&mut backend).unwrap();
        assert_eq!(backend.calls, vec![Call::Idle]);
    }

    #[test]
    fn zero_frames_in_flight_is_clamped() {
        let frames = FrameLoop::new(0, 3);
        assert_eq!(frames.frames_in_flight(), 1);
    }

    #[test]
    fn finish_waits_for_idle() {
        let mut backend = MockBackend::new(2, 3);
        let mut frames = FrameLoop::for_backend(&backend);
        frames.finish(&mut backend).unwrap();
        assert_eq!(backend.calls, vec![Call::Idle]);
    }
}
