//! Frame loop behavior against a simulated swapchain.

use anyhow::{bail, Result};
use vkengine_app::{AcquireOutcome, FrameBackend, FrameLoop, FrameStatus, PresentOutcome};

/// Simulated GPU: every submission stays pending until its slot is waited on.
struct SimulatedGpu {
    frames: usize,
    images: usize,
    width: u32,
    height: u32,
    /// Extent the swapchain was built for.
    built_for: (u32, u32),
    minimized: bool,
    next_image: usize,
    /// Image each slot's pending submission renders to.
    pending: Vec<Option<usize>>,
    /// Slot currently writing each image.
    writers: Vec<Option<usize>>,
    fence_signaled: Vec<bool>,
    rebuilds: usize,
    device_lost: bool,
}

impl SimulatedGpu {
    fn new(frames: usize, images: usize) -> Self {
        Self {
            frames,
            images,
            width: 800,
            height: 600,
            built_for: (800, 600),
            minimized: false,
            next_image: 0,
            pending: vec![None; frames],
            writers: vec![None; images],
            fence_signaled: vec![true; frames],
            rebuilds: 0,
            device_lost: false,
        }
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    fn out_of_date(&self) -> bool {
        self.built_for != (self.width, self.height)
    }

    fn complete(&mut self, slot: usize) {
        if let Some(image) = self.pending[slot].take() {
            self.writers[image] = None;
        }
        self.fence_signaled[slot] = true;
    }
}

impl FrameBackend for SimulatedGpu {
    fn frames_in_flight(&self) -> usize {
        self.frames
    }

    fn image_count(&self) -> usize {
        self.images
    }

    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        if !self.fence_signaled[slot] && self.pending[slot].is_none() {
            bail!("waiting on slot {slot} would never return");
        }
        self.complete(slot);
        Ok(())
    }

    fn acquire_image(&mut self, _slot: usize) -> Result<AcquireOutcome> {
        if self.out_of_date() {
            return Ok(AcquireOutcome::OutOfDate);
        }
        let image = self.next_image;
        self.next_image = (self.next_image + 1) % self.images;
        Ok(AcquireOutcome::Acquired {
            image_index: image as u32,
            suboptimal: false,
        })
    }

    fn reset_slot(&mut self, slot: usize) -> Result<()> {
        self.fence_signaled[slot] = false;
        Ok(())
    }

    fn submit(&mut self, slot: usize, image_index: u32) -> Result<()> {
        if self.device_lost {
            bail!("device lost");
        }
        let image = image_index as usize;
        if let Some(writer) = self.writers[image] {
            bail!("image {image} submitted by slot {slot} while slot {writer} still renders to it");
        }
        if self.fence_signaled[slot] {
            bail!("slot {slot} submitted without resetting its fence");
        }
        self.writers[image] = Some(slot);
        self.pending[slot] = Some(image);
        Ok(())
    }

    fn present(&mut self, _image_index: u32) -> Result<PresentOutcome> {
        Ok(if self.out_of_date() {
            PresentOutcome::Suboptimal
        } else {
            PresentOutcome::Presented
        })
    }

    fn surface_visible(&self) -> bool {
        !self.minimized && self.width > 0 && self.height > 0
    }

    fn rebuild_chain(&mut self) -> Result<()> {
        if self.pending.iter().any(Option::is_some) {
            bail!("chain rebuilt while work is pending");
        }
        self.built_for = (self.width, self.height);
        self.writers = vec![None; self.images];
        self.next_image = 0;
        self.rebuilds += 1;
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<()> {
        for slot in 0..self.frames {
            self.complete(slot);
        }
        Ok(())
    }
}

#[test]
fn many_frames_never_overlap_on_an_image() {
    for (frames, images) in [(1, 2), (2, 2), (2, 3), (3, 2), (3, 4)] {
        let mut gpu = SimulatedGpu::new(frames, images);
        let mut frame_loop = FrameLoop::for_backend(&gpu);
        for _ in 0..50 {
            assert_eq!(frame_loop.draw_frame(&mut gpu).unwrap(), FrameStatus::Presented);
        }
        assert_eq!(frame_loop.frame_number(), 50);
        frame_loop.finish(&mut gpu).unwrap();
        assert!(gpu.pending.iter().all(Option::is_none));
    }
}

#[test]
fn resize_rebuilds_once_and_keeps_presenting() {
    let mut gpu = SimulatedGpu::new(2, 3);
    let mut frame_loop = FrameLoop::for_backend(&gpu);

    for _ in 0..5 {
        frame_loop.draw_frame(&mut gpu).unwrap();
    }

    gpu.resize(1024, 768);
    frame_loop.notify_resized();
    assert_eq!(frame_loop.draw_frame(&mut gpu).unwrap(), FrameStatus::Skipped);
    assert_eq!(gpu.rebuilds, 1);

    for _ in 0..5 {
        assert_eq!(frame_loop.draw_frame(&mut gpu).unwrap(), FrameStatus::Presented);
    }
    assert_eq!(gpu.built_for, (1024, 768));
}

#[test]
fn minimize_suspends_then_restore_resumes() {
    let mut gpu = SimulatedGpu::new(2, 3);
    let mut frame_loop = FrameLoop::for_backend(&gpu);
    frame_loop.draw_frame(&mut gpu).unwrap();

    gpu.minimized = true;
    gpu.resize(0, 0);
    frame_loop.notify_resized();
    assert_eq!(frame_loop.draw_frame(&mut gpu).unwrap(), FrameStatus::Suspended);
    for _ in 0..3 {
        assert_eq!(frame_loop.draw_frame(&mut gpu).unwrap(), FrameStatus::Suspended);
    }
    assert_eq!(gpu.rebuilds, 0);

    gpu.minimized = false;
    gpu.resize(800, 600);
    assert_eq!(frame_loop.draw_frame(&mut gpu).unwrap(), FrameStatus::Presented);
    assert!(!frame_loop.is_suspended());
    assert_eq!(gpu.rebuilds, 1);
}

#[test]
fn image_count_change_on_rebuild_is_tracked() {
    let mut gpu = SimulatedGpu::new(2, 2);
    let mut frame_loop = FrameLoop::for_backend(&gpu);
    frame_loop.draw_frame(&mut gpu).unwrap();

    gpu.images = 4;
    gpu.resize(640, 480);
    assert_eq!(frame_loop.draw_frame(&mut gpu).unwrap(), FrameStatus::Skipped);

    for _ in 0..8 {
        assert_eq!(frame_loop.draw_frame(&mut gpu).unwrap(), FrameStatus::Presented);
    }
}

#[test]
fn device_lost_on_submit_stops_without_blocking() {
    let mut gpu = SimulatedGpu::new(2, 3);
    let mut frame_loop = FrameLoop::for_backend(&gpu);
    for _ in 0..3 {
        frame_loop.draw_frame(&mut gpu).unwrap();
    }

    gpu.device_lost = true;
    let err = frame_loop.draw_frame(&mut gpu).unwrap_err();
    assert_eq!(err.to_string(), "device lost");
    assert!(frame_loop.is_failed());
    assert_eq!(frame_loop.frame_number(), 3);

    // Without the stop, this draw would wait on a fence nothing will signal.
    let err = frame_loop.draw_frame(&mut gpu).unwrap_err();
    assert!(err.to_string().contains("stopped"), "{err}");
    assert_eq!(frame_loop.frame_number(), 3);

    frame_loop.finish(&mut gpu).unwrap();
}
