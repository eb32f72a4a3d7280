// Synchronization primitives
//
// Fences, semaphores and command buffers for each frame in flight.
// The fence is the only thing the CPU ever waits on; the semaphores order
// acquire -> render -> present entirely on the GPU.

use anyhow::{Context, Result};
use ash::vk;

use crate::config::MIN_FRAMES_IN_FLIGHT;

/// Per-frame resources - one per frame in flight
pub struct FrameSlot {
    pub command_pool: vk::CommandPool,
    pub command_buffer: vk::CommandBuffer,
    /// Signaled by the presentation engine once the acquired image is usable.
    pub image_acquired: vk::Semaphore,
    /// Signaled by the submission, waited on by present.
    pub render_complete: vk::Semaphore,
    /// Signaled when the slot's submission has finished executing.
    pub submit_fence: vk::Fence,
}

impl FrameSlot {
    /// Create the slot's objects. On failure, whatever was already created is destroyed.
    pub fn new(device: &ash::Device, queue_family: u32) -> Result<Self> {
        let mut slot = Self {
            command_pool: vk::CommandPool::null(),
            command_buffer: vk::CommandBuffer::null(),
            image_acquired: vk::Semaphore::null(),
            render_complete: vk::Semaphore::null(),
            submit_fence: vk::Fence::null(),
        };

        if let Err(e) = slot.create_objects(device, queue_family) {
            slot.destroy(device);
            return Err(e);
        }
        Ok(slot)
    }

    fn create_objects(&mut self, device: &ash::Device, queue_family: u32) -> Result<()> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        // Start signaled so the very first wait on this slot returns immediately
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            self.command_pool = device
                .create_command_pool(&pool_info, None)
                .context("Failed to create command pool")?;

            let alloc_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(self.command_pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            self.command_buffer = device
                .allocate_command_buffers(&alloc_info)
                .context("Failed to allocate command buffer")?[0];

            self.image_acquired = device
                .create_semaphore(&semaphore_info, None)
                .context("Failed to create semaphore")?;
            self.render_complete = device
                .create_semaphore(&semaphore_info, None)
                .context("Failed to create semaphore")?;
            self.submit_fence = device
                .create_fence(&fence_info, None)
                .context("Failed to create fence")?;
        }
        Ok(())
    }

    /// Swap `render_complete` for a fresh, unsignaled semaphore.
    ///
    /// Needed when a submission signaled it but nothing will ever wait on it.
    /// The submission must have finished before this is called.
    pub fn replace_render_complete(&mut self, device: &ash::Device) -> Result<()> {
        let fresh = unsafe { device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None) }
            .context("Failed to create semaphore")?;
        let stale = std::mem::replace(&mut self.render_complete, fresh);
        unsafe { device.destroy_semaphore(stale, None) };
        Ok(())
    }

    /// Null handles are skipped by the driver, so a partially built slot is fine.
    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_acquired, None);
            device.destroy_semaphore(self.render_complete, None);
            device.destroy_fence(self.submit_fence, None);
            // Also frees the command buffer
            device.destroy_command_pool(self.command_pool, None);
        }
    }
}

/// Fixed-size ring of per-frame resources, indexed by frame slot.
#[derive(Debug)]
pub struct FrameSlotRing<S> {
    slots: Vec<S>,
}

impl<S> FrameSlotRing<S> {
    /// Build a ring; fewer than two slots would serialize CPU and GPU.
    pub fn new(slots: Vec<S>) -> Result<Self> {
        check_ring_len(slots.len())?;
        Ok(Self { slots })
    }

    /// Build a ring whose length already passed [`check_ring_len`].
    pub fn from_checked(slots: Vec<S>) -> Self {
        debug_assert!(slots.len() >= MIN_FRAMES_IN_FLIGHT);
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, index: usize) -> &S {
        &self.slots[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut S {
        &mut self.slots[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &S> {
        self.slots.iter()
    }
}

/// Fail before any GPU objects exist if `len` slots cannot form a ring.
pub fn check_ring_len(len: usize) -> Result<()> {
    if len < MIN_FRAMES_IN_FLIGHT {
        anyhow::bail!(
            "a frame ring needs at least {} slots, got {}",
            MIN_FRAMES_IN_FLIGHT,
            len
        );
    }
    Ok(())
}

/// `(index + 1) mod len`
pub fn next_slot(index: usize, len: usize) -> usize {
    (index + 1) % len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_rejects_single_slot() {
        assert!(FrameSlotRing::new(vec![()]).is_err());
        assert!(FrameSlotRing::<u8>::new(Vec::new()).is_err());
        assert!(FrameSlotRing::new(vec![(), ()]).is_ok());
    }

    #[test]
    fn ring_length_is_checked_up_front() {
        assert!(check_ring_len(0).is_err());
        assert!(check_ring_len(1).is_err());
        assert!(check_ring_len(MIN_FRAMES_IN_FLIGHT).is_ok());
        assert_eq!(FrameSlotRing::from_checked(vec![1u8, 2, 3]).len(), 3);
    }

    #[test]
    fn two_slots_alternate() {
        let ring = FrameSlotRing::new(vec!['a', 'b']).unwrap();
        let mut index = 0;
        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(*ring.get(index));
            index = next_slot(index, ring.len());
        }
        assert_eq!(seen, ['a', 'b', 'a', 'b', 'a', 'b']);
    }

    #[test]
    fn indices_cycle_for_any_length() {
        for len in 2..6 {
            let ring = FrameSlotRing::new(vec![0u32; len]).unwrap();
            let mut index = 0;
            for step in 0..(len * 7 + 3) {
                assert_eq!(index, step % len);
                index = next_slot(index, ring.len());
            }
        }
    }

    #[test]
    fn slots_are_mutable_in_place() {
        let mut ring = FrameSlotRing::new(vec![0u32; 3]).unwrap();
        *ring.get_mut(2) += 5;
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), [0, 0, 5]);
        assert_eq!(ring.len(), 3);
    }
}
