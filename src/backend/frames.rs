// Swapchain frames - the Vulkan side of the render loop
//
// Owns the frame slot ring, the presentation chain and the render pass that
// every chain generation's framebuffers are built against.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;
use std::time::Duration;

use super::pipeline::create_render_pass;
use super::swapchain::{choose_present_mode, choose_surface_format, clamp_extent, PresentationChain};
use super::sync::{check_ring_len, FrameSlot, FrameSlotRing};
use super::DeviceContext;
use crate::error::RenderError;
use crate::render_loop::{AcquireOutcome, FrameBackend, PresentOutcome};

/// Application-supplied draw commands recorded inside the render pass.
pub trait RecordCommands {
    fn record(&self, device: &ash::Device, cmd: vk::CommandBuffer, extent: vk::Extent2D);
}

/// Records nothing; frames are just cleared.
pub struct ClearOnly;

impl RecordCommands for ClearOnly {
    fn record(&self, _device: &ash::Device, _cmd: vk::CommandBuffer, _extent: vk::Extent2D) {}
}

/// Static settings for the frames backend.
#[derive(Debug, Clone, Copy)]
pub struct FrameSettings {
    pub frames_in_flight: usize,
    pub clear_color: [f32; 4],
    pub present_mode: vk::PresentModeKHR,
}

pub struct SwapchainFrames {
    // Drop order is handled explicitly in Drop
    slots: FrameSlotRing<FrameSlot>,
    chain: PresentationChain,
    render_pass: vk::RenderPass,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    clear_color: vk::ClearColorValue,
    device: Arc<DeviceContext>,
}

impl SwapchainFrames {
    pub fn new(device: Arc<DeviceContext>, extent: vk::Extent2D, settings: FrameSettings) -> Result<Self> {
        check_ring_len(settings.frames_in_flight)?;

        let formats = unsafe {
            device
                .surface_loader
                .get_physical_device_surface_formats(device.physical_device, device.surface)
        }
        .context("Failed to query surface formats")?;
        let surface_format = choose_surface_format(&formats).context("Surface reports no formats")?;

        let present_modes = unsafe {
            device
                .surface_loader
                .get_physical_device_surface_present_modes(device.physical_device, device.surface)
        }
        .context("Failed to query present modes")?;
        let present_mode = choose_present_mode(&present_modes, settings.present_mode);
        if present_mode != settings.present_mode {
            log::warn!(
                "Present mode {:?} unsupported, using {:?}",
                settings.present_mode,
                present_mode
            );
        }

        let render_pass = create_render_pass(&device.device, surface_format.format)?;
        let destroy_render_pass = || unsafe { device.device.destroy_render_pass(render_pass, None) };

        let chain = match PresentationChain::create(
            device.clone(),
            extent,
            surface_format,
            present_mode,
            render_pass,
            None,
        ) {
            Ok(chain) => chain,
            Err(e) => {
                destroy_render_pass();
                return Err(e);
            }
        };

        let mut slots = Vec::with_capacity(settings.frames_in_flight);
        for _ in 0..settings.frames_in_flight {
            match FrameSlot::new(&device.device, device.queue_family) {
                Ok(slot) => slots.push(slot),
                Err(e) => {
                    for slot in &slots {
                        slot.destroy(&device.device);
                    }
                    drop(chain);
                    destroy_render_pass();
                    return Err(e);
                }
            }
        }
        let slots = FrameSlotRing::from_checked(slots);

        log::info!("Created {} frame slots", slots.len());

        Ok(Self {
            slots,
            chain,
            render_pass,
            surface_format,
            present_mode,
            clear_color: vk::ClearColorValue {
                float32: settings.clear_color,
            },
            device,
        })
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn chain(&self) -> &PresentationChain {
        &self.chain
    }
}

impl FrameBackend for SwapchainFrames {
    type Content = dyn RecordCommands;

    fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn wait_for_slot(&mut self, slot: usize, timeout: Duration) -> Result<()> {
        let fence = self.slots.get(slot).submit_fence;
        unsafe {
            self.device
                .device
                .wait_for_fences(&[fence], true, timeout_ns(timeout))
        }
        .map_err(|e| RenderError::from_wait("wait_for_fences", e, timeout))?;
        Ok(())
    }

    fn acquire_image(&mut self, slot: usize, timeout: Duration) -> Result<AcquireOutcome> {
        let semaphore = self.slots.get(slot).image_acquired;
        let result = unsafe {
            self.device.swapchain_loader.acquire_next_image(
                self.chain.handle(),
                timeout_ns(timeout),
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, false)) => Ok(AcquireOutcome::Ready(index)),
            Ok((index, true)) => Ok(AcquireOutcome::Suboptimal(index)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(RenderError::from_wait("acquire_next_image", e, timeout).into()),
        }
    }

    fn reset_slot(&mut self, slot: usize) -> Result<()> {
        let fence = self.slots.get(slot).submit_fence;
        unsafe { self.device.device.reset_fences(&[fence]) }
            .map_err(|e| RenderError::from_vk("reset_fences", e))?;
        Ok(())
    }

    fn record(&mut self, slot: usize, image_index: u32, content: &dyn RecordCommands) -> Result<()> {
        let device = &self.device.device;
        let cmd = self.slots.get(slot).command_buffer;
        let extent = self.chain.extent();
        let clear_values = [vk::ClearValue {
            color: self.clear_color,
        }];

        unsafe {
            device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .map_err(|e| RenderError::from_vk("reset_command_buffer", e))?;

            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device
                .begin_command_buffer(cmd, &begin_info)
                .map_err(|e| RenderError::from_vk("begin_command_buffer", e))?;

            let render_pass_info = vk::RenderPassBeginInfo::default()
                .render_pass(self.render_pass)
                .framebuffer(self.chain.framebuffer(image_index))
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                })
                .clear_values(&clear_values);
            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);

            content.record(device, cmd, extent);

            device.cmd_end_render_pass(cmd);
            device
                .end_command_buffer(cmd)
                .map_err(|e| RenderError::from_vk("end_command_buffer", e))?;
        }

        Ok(())
    }

    fn submit(&mut self, slot: usize) -> Result<()> {
        let frame = self.slots.get(slot);
        let wait_semaphores = [frame.image_acquired];
        // Earlier stages may run before the image is actually available
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [frame.command_buffer];
        let signal_semaphores = [frame.render_complete];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .device
                .queue_submit(self.device.queue, &[submit_info], frame.submit_fence)
        }
        .map_err(|e| RenderError::from_vk("queue_submit", e))?;
        Ok(())
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
        let wait_semaphores = [self.slots.get(slot).render_complete];
        let swapchains = [self.chain.handle()];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.device
                .swapchain_loader
                .queue_present(self.device.queue, &present_info)
        };

        match result {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(RenderError::from_vk("queue_present", e).into()),
        }
    }

    fn discard_image(&mut self, slot: usize, timeout: Duration) -> Result<()> {
        // render_complete was signaled and nobody will wait on it
        self.wait_for_slot(slot, timeout)?;
        self.slots
            .get_mut(slot)
            .replace_render_complete(&self.device.device)
    }

    fn rebuild(&mut self, extent: vk::Extent2D) -> Result<bool> {
        self.device.wait_idle()?;

        let capabilities = unsafe {
            self.device
                .surface_loader
                .get_physical_device_surface_capabilities(self.device.physical_device, self.device.surface)
        }
        .map_err(|e| RenderError::from_vk("get_physical_device_surface_capabilities", e))?;
        let usable = clamp_extent(&capabilities, extent);
        if usable.width == 0 || usable.height == 0 {
            return Ok(false);
        }

        let fresh = PresentationChain::create(
            self.device.clone(),
            extent,
            self.surface_format,
            self.present_mode,
            self.render_pass,
            Some(&self.chain),
        )?;

        // Swap first so the old chain is never observable half torn down
        let mut retired = std::mem::replace(&mut self.chain, fresh);
        retired.teardown();
        Ok(true)
    }
}

impl Drop for SwapchainFrames {
    fn drop(&mut self) {
        log::debug!("Destroying frame slots and presentation chain");
        if let Err(e) = self.device.wait_idle() {
            log::error!("Device did not go idle before frame teardown: {:#}", e);
        }

        for slot in self.slots.iter() {
            slot.destroy(&self.device.device);
        }
        // Framebuffers reference the render pass
        self.chain.teardown();
        unsafe {
            self.device.device.destroy_render_pass(self.render_pass, None);
        }
    }
}

/// Vulkan takes nanoseconds as u64; longer bounds saturate to "wait forever".
fn timeout_ns(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
}
