// Memory type selection
//
// Every buffer allocation picks its backing memory type here. First match wins,
// so the same device and requirements always land on the same type.

use ash::vk;
use crate::error::RenderError;

/// Find the lowest memory type index that is allowed by `type_mask` and whose
/// property flags contain `required`.
///
/// A miss means the device cannot satisfy the request at all, which is fatal.
pub fn select_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_mask: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32, RenderError> {
    let count = memory_properties
        .memory_type_count
        .min(vk::MAX_MEMORY_TYPES as u32);

    (0..count)
        .find(|&index| {
            let allowed = type_mask & (1 << index) != 0;
            allowed
                && memory_properties.memory_types[index as usize]
                    .property_flags
                    .contains(required)
        })
        .ok_or(RenderError::NoMemoryType { type_mask, required })
}
