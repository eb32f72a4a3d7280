// Presentation chain - Window presentation
//
// The swapchain plus one image view and one framebuffer per swapchain image.
// All of it is built as a unit and torn down as a unit; a half-built chain is
// never handed out.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::DeviceContext;

pub struct PresentationChain {
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    framebuffers: Vec<vk::Framebuffer>,
    format: vk::Format,
    extent: vk::Extent2D,
    device: Arc<DeviceContext>,
}

impl PresentationChain {
    /// Build a chain for `requested` extent against the current surface state.
    ///
    /// `previous`, if given, is handed to the driver so it can recycle resources.
    /// The caller still owns it and tears it down once the new chain is in place.
    pub fn create(
        device: Arc<DeviceContext>,
        requested: vk::Extent2D,
        surface_format: vk::SurfaceFormatKHR,
        present_mode: vk::PresentModeKHR,
        render_pass: vk::RenderPass,
        previous: Option<&PresentationChain>,
    ) -> Result<Self> {
        let capabilities = unsafe {
            device
                .surface_loader
                .get_physical_device_surface_capabilities(device.physical_device, device.surface)
        }
        .context("Failed to query surface capabilities")?;

        let extent = clamp_extent(&capabilities, requested);
        if extent.width == 0 || extent.height == 0 {
            anyhow::bail!("Surface reports a zero extent; the window must be visible");
        }

        let image_count = choose_image_count(&capabilities);
        let old_swapchain = previous.map_or(vk::SwapchainKHR::null(), |chain| chain.swapchain);

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(device.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { device.swapchain_loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;

        // From here on every handle lives in `chain`, so an early return tears
        // down exactly what was built so far.
        let mut chain = Self {
            swapchain,
            images: Vec::new(),
            image_views: Vec::new(),
            framebuffers: Vec::new(),
            format: surface_format.format,
            extent,
            device,
        };

        chain.images = unsafe { chain.device.swapchain_loader.get_swapchain_images(swapchain) }
            .context("Failed to get swapchain images")?;

        for &image in &chain.images {
            let view = create_image_view(&chain.device.device, image, chain.format)?;
            chain.image_views.push(view);
        }

        for &view in &chain.image_views {
            let attachments = [view];
            let framebuffer_info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);

            let framebuffer =
                unsafe { chain.device.device.create_framebuffer(&framebuffer_info, None) }
                    .context("Failed to create framebuffer")?;
            chain.framebuffers.push(framebuffer);
        }

        log::info!(
            "Created presentation chain: {}x{}, {} images, {:?}",
            extent.width,
            extent.height,
            chain.images.len(),
            present_mode
        );

        Ok(chain)
    }

    /// Destroy framebuffers, then image views, then the swapchain.
    ///
    /// The device must be idle, or fences must show that no submitted work
    /// references this chain. Safe to call more than once.
    pub fn teardown(&mut self) {
        let device = &self.device;
        unsafe {
            for framebuffer in self.framebuffers.drain(..) {
                device.device.destroy_framebuffer(framebuffer, None);
            }
            for view in self.image_views.drain(..) {
                device.device.destroy_image_view(view, None);
            }
            if self.swapchain != vk::SwapchainKHR::null() {
                device.swapchain_loader.destroy_swapchain(self.swapchain, None);
                self.swapchain = vk::SwapchainKHR::null();
            }
        }
        self.images.clear();
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn framebuffer(&self, image_index: u32) -> vk::Framebuffer {
        self.framebuffers[image_index as usize]
    }
}

impl Drop for PresentationChain {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn create_image_view(device: &ash::Device, image: vk::Image, format: vk::Format) -> Result<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });

    unsafe { device.create_image_view(&create_info, None) }.context("Failed to create image view")
}

/// Pick the surface format once at startup; the render pass is built against it.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    // A single UNDEFINED entry means the surface takes anything
    if let [only] = formats {
        if only.format == vk::Format::UNDEFINED {
            return Some(vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: only.color_space,
            });
        }
    }

    let preferred = [
        vk::Format::B8G8R8A8_UNORM,
        vk::Format::R8G8B8A8_UNORM,
        vk::Format::B8G8R8_UNORM,
        vk::Format::R8G8B8_UNORM,
    ];
    preferred
        .iter()
        .find_map(|&wanted| formats.iter().find(|f| f.format == wanted).copied())
        .or_else(|| formats.first().copied())
}

/// Use `preferred` when the surface offers it, otherwise FIFO (always available).
pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if available.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// The surface's fixed extent if it has one, else `requested` clamped into the
/// supported range.
pub fn clamp_extent(caps: &vk::SurfaceCapabilitiesKHR, requested: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: requested
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: requested
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// One image more than the minimum, capped by the maximum when there is one.
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        wanted.min(caps.max_image_count)
    } else {
        wanted
    }
}
