// Buffer resources for vertex, index, and uniform data
//
// A BufferResource is a buffer handle plus the memory block bound to it at
// offset 0. The pair is created together and released together, explicitly,
// before the device goes away.

use ash::vk;
use bytemuck::Pod;

use super::memory::select_memory_type;
use super::DeviceContext;
use crate::error::RenderError;

/// Memory flags used when the caller has no special requirements: the CPU
/// writes the data directly through a mapping, without explicit flushes.
pub const HOST_UPLOAD: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw()
        | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

#[derive(Debug)]
pub struct BufferResource {
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    properties: vk::MemoryPropertyFlags,
}

impl BufferResource {
    /// Create a buffer of `size` bytes and bind freshly allocated memory to it.
    ///
    /// Nothing is leaked on failure: whatever was created before the failing
    /// step is destroyed before the error is returned.
    pub fn create(
        context: &DeviceContext,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<Self, RenderError> {
        let fail = |reason: String| RenderError::Allocation { size, usage, reason };

        if size == 0 {
            return Err(fail("zero-length buffers are not allowed".to_string()));
        }

        let device = &context.device;
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.create_buffer(&buffer_info, None) }
            .map_err(|e| fail(format!("create_buffer: {e}")))?;

        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let memory_type_index = match select_memory_type(
            &context.memory_properties,
            requirements.memory_type_bits,
            properties,
        ) {
            Ok(index) => index,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        let memory = match unsafe { device.allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(fail(format!("allocate_memory: {e}")));
            }
        };

        if let Err(e) = unsafe { device.bind_buffer_memory(buffer, memory, 0) } {
            unsafe {
                device.destroy_buffer(buffer, None);
                device.free_memory(memory, None);
            }
            return Err(fail(format!("bind_buffer_memory: {e}")));
        }

        log::debug!(
            "Created {} byte buffer ({:?}) in memory type {}",
            size,
            usage,
            memory_type_index
        );

        Ok(Self {
            buffer,
            memory,
            size,
            usage,
            properties,
        })
    }

    /// Create a host-visible buffer sized for `data` and upload it.
    pub fn with_data<T: Pod>(
        context: &DeviceContext,
        usage: vk::BufferUsageFlags,
        data: &[T],
    ) -> Result<Self, RenderError> {
        let size = std::mem::size_of_val(data) as vk::DeviceSize;
        let mut resource = Self::create(context, size, usage, HOST_UPLOAD)?;
        if let Err(e) = resource.upload(context, data) {
            resource.release(context);
            return Err(e);
        }
        Ok(resource)
    }

    /// Copy `data` into the start of the buffer through a host mapping.
    ///
    /// The caller guarantees that no submitted GPU work still reads or writes
    /// this memory.
    pub fn upload<T: Pod>(&mut self, context: &DeviceContext, data: &[T]) -> Result<(), RenderError> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        self.check_upload(bytes.len())?;
        if bytes.is_empty() {
            return Ok(());
        }

        let device = &context.device;
        unsafe {
            let ptr = device
                .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
                .map_err(|e| RenderError::from_vk("map_memory", e))?;
            let mapped = std::slice::from_raw_parts_mut(ptr.cast::<u8>(), self.size as usize);
            write_mapped(mapped, bytes);
            device.unmap_memory(self.memory);
        }

        Ok(())
    }

    /// Copy the whole bound range back to host memory.
    pub fn read_back(&self, context: &DeviceContext) -> Result<Vec<u8>, RenderError> {
        self.check_mappable()?;

        let device = &context.device;
        unsafe {
            let ptr = device
                .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
                .map_err(|e| RenderError::from_vk("map_memory", e))?;
            let bytes = std::slice::from_raw_parts(ptr.cast::<u8>(), self.size as usize).to_vec();
            device.unmap_memory(self.memory);
            Ok(bytes)
        }
    }

    /// Destroy the buffer, then free its memory. Calling this twice is a no-op.
    pub fn release(&mut self, context: &DeviceContext) {
        let (buffer, memory) = self.take_handles();
        unsafe {
            if buffer != vk::Buffer::null() {
                context.device.destroy_buffer(buffer, None);
            }
            if memory != vk::DeviceMemory::null() {
                context.device.free_memory(memory, None);
            }
        }
    }

    /// Hand out the raw handles, leaving this resource released.
    fn take_handles(&mut self) -> (vk::Buffer, vk::DeviceMemory) {
        (
            std::mem::replace(&mut self.buffer, vk::Buffer::null()),
            std::mem::replace(&mut self.memory, vk::DeviceMemory::null()),
        )
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn is_released(&self) -> bool {
        self.buffer == vk::Buffer::null() && self.memory == vk::DeviceMemory::null()
    }

    fn check_upload(&self, len: usize) -> Result<(), RenderError> {
        self.check_mappable()?;
        if len as vk::DeviceSize > self.size {
            return Err(RenderError::Allocation {
                size: len as vk::DeviceSize,
                usage: self.usage,
                reason: format!("upload larger than the {} byte buffer", self.size),
            });
        }
        Ok(())
    }

    fn check_mappable(&self) -> Result<(), RenderError> {
        if self.is_released() {
            return Err(RenderError::Setup("buffer used after release".to_string()));
        }
        if !self.properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            return Err(RenderError::Setup(format!(
                "buffer memory {:?} is not host visible",
                self.properties
            )));
        }
        Ok(())
    }
}

impl Drop for BufferResource {
    fn drop(&mut self) {
        if !self.is_released() {
            log::warn!(
                "BufferResource ({} bytes, {:?}) dropped without release; GPU memory leaked",
                self.size,
                self.usage
            );
        }
    }
}

/// Copy `bytes` to the front of a mapped range, leaving the tail untouched.
fn write_mapped(mapped: &mut [u8], bytes: &[u8]) {
    mapped[..bytes.len()].copy_from_slice(bytes);
}
