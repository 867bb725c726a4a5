//! Typed GPU buffers.

use crate::command::{execute_one_time, CommandPool};
use crate::device::{unique_families, LogicalDevice};
use crate::error::{GpuError, Result};
use ash::vk;
use bytemuck::Pod;
use gpu_allocator::vulkan::Allocation;
use gpu_allocator::MemoryLocation;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;

/// A buffer holding `len` elements of `T`.
///
/// Shared between queue families concurrently when `queue_families` names
/// more than one unique family; memory type selection is left to the
/// allocator via the requested [`MemoryLocation`].
pub struct Buffer<T: Pod> {
    device: Arc<LogicalDevice>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    len: usize,
    size: u64,
    _element: PhantomData<T>,
}

impl<T: Pod> Buffer<T> {
    pub fn new(
        device: &Arc<LogicalDevice>,
        name: &str,
        len: usize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        queue_families: &[u32],
    ) -> Result<Self> {
        if len == 0 {
            return Err(GpuError::InvalidState(format!("buffer '{name}' would be empty")));
        }
        let size = byte_size::<T>(len);

        let families = unique_families(queue_families);
        let mut buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        if families.len() > 1 {
            buffer_info = buffer_info
                .sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&families);
        }

        let raw = device.handle();
        let buffer = unsafe { raw.create_buffer(&buffer_info, None)? };
        let requirements = unsafe { raw.get_buffer_memory_requirements(buffer) };

        let allocation = match device
            .allocator()
            .lock()
            .allocate(name, requirements, location, true)
        {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { raw.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        if let Err(e) =
            unsafe { raw.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) }
        {
            let _ = device.allocator().lock().free(allocation);
            unsafe { raw.destroy_buffer(buffer, None) };
            return Err(e.into());
        }

        tracing::debug!("Created buffer '{name}': {len} elements, {size} bytes, {location:?}");

        Ok(Self {
            device: Arc::clone(device),
            buffer,
            allocation: Some(allocation),
            len,
            size,
            _element: PhantomData,
        })
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Number of `T` elements.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Copy `contents` into host-visible memory.
    fn write(&mut self, contents: &[T]) -> Result<()> {
        if contents.len() > self.len {
            return Err(GpuError::InvalidState(format!(
                "{} elements do not fit in a buffer of {}",
                contents.len(),
                self.len
            )));
        }

        let mapped = self
            .allocation
            .as_mut()
            .and_then(Allocation::mapped_slice_mut)
            .ok_or_else(|| GpuError::InvalidState("Buffer not mapped".to_string()))?;

        let bytes: &[u8] = bytemuck::cast_slice(contents);
        mapped[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

impl<T: Pod> Drop for Buffer<T> {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.device.allocator().lock().free(allocation) {
                tracing::error!("Failed to free buffer memory: {e}");
            }
        }
        unsafe { self.device.handle().destroy_buffer(self.buffer, None) };
    }
}

/// Byte size of `len` elements of `T`.
pub fn byte_size<T>(len: usize) -> u64 {
    (std::mem::size_of::<T>() * len) as u64
}

/// Host-visible staging buffer, filled at creation.
pub struct TransferBuffer<T: Pod>(Buffer<T>);

impl<T: Pod> TransferBuffer<T> {
    pub fn new(device: &Arc<LogicalDevice>, contents: &[T], queue_families: &[u32]) -> Result<Self> {
        let mut buffer = Buffer::new(
            device,
            "transfer buffer",
            contents.len(),
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            queue_families,
        )?;
        buffer.write(contents)?;
        Ok(Self(buffer))
    }
}

impl<T: Pod> Deref for TransferBuffer<T> {
    type Target = Buffer<T>;

    fn deref(&self) -> &Buffer<T> {
        &self.0
    }
}

/// Device-local vertex buffer, filled by a transfer.
pub struct OnDeviceBuffer<T: Pod>(Buffer<T>);

impl<T: Pod> OnDeviceBuffer<T> {
    pub fn new(device: &Arc<LogicalDevice>, len: usize, queue_families: &[u32]) -> Result<Self> {
        Buffer::new(
            device,
            "device buffer",
            len,
            vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::VERTEX_BUFFER,
            MemoryLocation::GpuOnly,
            queue_families,
        )
        .map(Self)
    }

    /// Create a device buffer holding `contents`.
    ///
    /// The data goes through a staging [`TransferBuffer`] and a one-shot
    /// command buffer on `queue`; this blocks until the copy has finished.
    pub fn upload(
        device: &Arc<LogicalDevice>,
        pool: &Arc<CommandPool>,
        queue: vk::Queue,
        contents: &[T],
    ) -> Result<Self> {
        if contents.is_empty() {
            return Err(GpuError::InvalidState("cannot upload an empty buffer".to_string()));
        }

        let families = [pool.queue_family()];
        let staging = TransferBuffer::new(device, contents, &families)?;
        let target = Self::new(device, contents.len(), &families)?;

        execute_one_time(pool, queue, |cmd| cmd.copy_buffer(&staging.0, &target.0))?;

        tracing::debug!("Uploaded {} bytes to device memory", target.size());
        Ok(target)
    }
}

impl<T: Pod> Deref for OnDeviceBuffer<T> {
    type Target = Buffer<T>;

    fn deref(&self) -> &Buffer<T> {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vertex::Vertex;

    #[test]
    fn byte_size_scales_with_element_size() {
        assert_eq!(byte_size::<Vertex>(3), 60);
        assert_eq!(byte_size::<u32>(0), 0);
        assert_eq!(byte_size::<[f32; 4]>(2), 32);
    }
}
