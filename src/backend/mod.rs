// Backend module - Vulkan abstraction layer
//
// Thin wrappers around ash. Each type owns its handles and is torn down
// explicitly before the DeviceContext it was created from.

pub mod buffer;
pub mod device;
pub mod frames;
pub mod memory;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use device::DeviceContext;
