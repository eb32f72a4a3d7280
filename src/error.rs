// Render error taxonomy
//
// Transient presentation states (out-of-date, suboptimal) are not errors here;
// they travel as AcquireOutcome / PresentOutcome values and never leave the loop.
// Everything in this enum is fatal and unwinds to main.

use ash::vk;
use std::time::Duration;
use thiserror::Error;

/// Coarse classification used by `main` when reporting a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Instance/device/buffer/swapchain creation failed.
    Setup,
    /// The GPU stopped responding or the device was lost.
    DeviceLost,
    /// No memory type qualified, or an allocation failed.
    ResourceExhausted,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("setup failed: {0}")]
    Setup(String),

    #[error("Vulkan call {operation} failed: {result}")]
    Vulkan {
        operation: &'static str,
        result: vk::Result,
    },

    #[error("GPU did not respond within {timeout:?} during {operation}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("device lost during {operation}")]
    DeviceLost { operation: &'static str },

    #[error("no memory type in mask {type_mask:#034b} provides {required:?}")]
    NoMemoryType {
        type_mask: u32,
        required: vk::MemoryPropertyFlags,
    },

    #[error("failed to allocate {size} bytes for {usage:?}: {reason}")]
    Allocation {
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        reason: String,
    },

    #[error("Failed to load Vulkan: {0}")]
    Loading(#[from] ash::LoadingError),
}

impl RenderError {
    /// Classify a raw result code from a call that has no transient meaning.
    pub fn from_vk(operation: &'static str, result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost { operation },
            vk::Result::TIMEOUT | vk::Result::NOT_READY => Self::Timeout {
                operation,
                timeout: Duration::ZERO,
            },
            _ => Self::Vulkan { operation, result },
        }
    }

    /// Same as [`RenderError::from_vk`] but records the bound that was exceeded.
    pub fn from_wait(operation: &'static str, result: vk::Result, timeout: Duration) -> Self {
        match Self::from_vk(operation, result) {
            Self::Timeout { operation, .. } => Self::Timeout { operation, timeout },
            other => other,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout { .. } | Self::DeviceLost { .. } => ErrorKind::DeviceLost,
            Self::NoMemoryType { .. } | Self::Allocation { .. } => ErrorKind::ResourceExhausted,
            Self::Vulkan { result, .. }
                if *result == vk::Result::ERROR_OUT_OF_HOST_MEMORY
                    || *result == vk::Result::ERROR_OUT_OF_DEVICE_MEMORY =>
            {
                ErrorKind::ResourceExhausted
            }
            Self::Setup(_) | Self::Vulkan { .. } | Self::Loading(_) => ErrorKind::Setup,
        }
    }
}

/// Find the taxonomy kind of an error chain, defaulting to setup failures.
pub fn classify(error: &anyhow::Error) -> ErrorKind {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<RenderError>())
        .map(RenderError::kind)
        .unwrap_or(ErrorKind::Setup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn device_lost_and_timeouts_share_a_kind() {
        let lost = RenderError::from_vk("queue_submit", vk::Result::ERROR_DEVICE_LOST);
        let timeout =
            RenderError::from_wait("wait_for_fences", vk::Result::TIMEOUT, Duration::from_secs(1));

        assert_eq!(lost.kind(), ErrorKind::DeviceLost);
        assert_eq!(timeout.kind(), ErrorKind::DeviceLost);
        assert!(timeout.to_string().contains("1s"));
    }

    #[test]
    fn out_of_memory_is_resource_exhaustion() {
        let err = RenderError::from_vk("allocate_memory", vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);

        let err = RenderError::NoMemoryType {
            type_mask: 0b101,
            required: vk::MemoryPropertyFlags::HOST_VISIBLE,
        };
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    }

    #[test]
    fn classify_looks_through_context() {
        let err: anyhow::Result<()> = Err(RenderError::DeviceLost { operation: "present" }.into());
        let err = err.context("Failed to render frame").unwrap_err();
        assert_eq!(classify(&err), ErrorKind::DeviceLost);

        let plain = anyhow::anyhow!("window creation failed");
        assert_eq!(classify(&plain), ErrorKind::Setup);
    }
}
