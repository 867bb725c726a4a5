//! Synchronization primitives.

use crate::device::LogicalDevice;
use crate::error::{GpuError, Result};
use ash::vk;
use std::sync::Arc;

/// GPU-to-GPU signal between queue operations.
pub struct Semaphore {
    device: Arc<LogicalDevice>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    pub fn new(device: &Arc<LogicalDevice>) -> Result<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };
        Ok(Self {
            device: Arc::clone(device),
            semaphore,
        })
    }

    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_semaphore(self.semaphore, None);
        }
    }
}

/// GPU-to-host signal raised when a submission completes.
pub struct Fence {
    device: Arc<LogicalDevice>,
    fence: vk::Fence,
}

impl Fence {
    pub fn new(device: &Arc<LogicalDevice>, signaled: bool) -> Result<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { device.handle().create_fence(&create_info, None)? };
        Ok(Self {
            device: Arc::clone(device),
            fence,
        })
    }

    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Wait for the fence to be signaled.
    ///
    /// Returns `false` if `timeout_ns` elapsed first.
    pub fn wait(&self, timeout_ns: u64) -> Result<bool> {
        match unsafe {
            self.device
                .handle()
                .wait_for_fences(&[self.fence], true, timeout_ns)
        } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(GpuError::from(e)),
        }
    }

    /// Return the fence to the unsignaled state.
    pub fn reset(&self) -> Result<()> {
        unsafe { self.device.handle().reset_fences(&[self.fence])? };
        Ok(())
    }

    pub fn is_signaled(&self) -> Result<bool> {
        let signaled = unsafe { self.device.handle().get_fence_status(self.fence)? };
        Ok(signaled)
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_fence(self.fence, None);
        }
    }
}

/// Per frame-slot synchronization.
pub struct FrameSync {
    /// Signaled when the acquired swapchain image may be written.
    pub image_available: Semaphore,
    /// Signaled when the slot's last submission has finished. Created signaled
    /// so the first wait on a fresh slot returns immediately.
    pub in_flight: Fence,
}

impl FrameSync {
    pub fn new(device: &Arc<LogicalDevice>) -> Result<Self> {
        Ok(Self {
            image_available: Semaphore::new(device)?,
            in_flight: Fence::new(device, true)?,
        })
    }
}
