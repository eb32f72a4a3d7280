// =============================================================================
// APPLICATION - what main drives once per frame
// =============================================================================
//
// main only knows the Application capability set. GeometryApp is the one
// implementation: it owns the device, the render loop (and through it the
// presentation chain and frame slots) and the scene it draws.

use anyhow::{Context, Result};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;
use std::time::Duration;

use crate::backend::frames::{ClearOnly, FrameSettings, RecordCommands, SwapchainFrames};
use crate::backend::DeviceContext;
use crate::config::Config;
use crate::error::RenderError;
use crate::geometry::Scene;
use crate::platform::{Platform, WinitPlatform};
use crate::render_loop::{wait_for_visible_extent, FrameOutcome, RenderLoop};

/// How often the loop counters are written to the debug log.
const STATS_INTERVAL: Duration = Duration::from_secs(5);

pub trait Application {
    fn name(&self) -> &str;

    /// Create every GPU resource. Called once, after the window exists.
    fn prepare(&mut self, config: &Config, platform: &mut WinitPlatform) -> Result<()>;

    /// The framebuffer changed size; the chain is rebuilt before the next acquire.
    fn resize(&mut self, width: u32, height: u32) -> Result<()>;

    /// Run one frame.
    fn update(&mut self, platform: &mut dyn Platform, dt: Duration) -> Result<()>;
}

/// Startup record handed from main to the host: a display name and a factory.
pub struct AppInfo {
    pub name: String,
    pub create: fn(&str) -> Box<dyn Application>,
}

impl AppInfo {
    pub fn instantiate(&self) -> Box<dyn Application> {
        (self.create)(&self.name)
    }
}

/// GPU state that only exists after `prepare`.
///
/// Field order matters for Drop: the render loop (frames, chain, render pass)
/// goes before our handle on the device.
struct Gpu {
    render_loop: RenderLoop<SwapchainFrames>,
    scene: Option<Scene>,
    device: Arc<DeviceContext>,
}

impl Drop for Gpu {
    fn drop(&mut self) {
        log::info!("Releasing GPU resources");
        if let Err(e) = self.device.wait_idle() {
            log::error!("Device did not go idle before teardown: {:#}", e);
        }
        if let Some(scene) = self.scene.as_mut() {
            scene.release(&self.device);
        }
    }
}

pub struct GeometryApp {
    name: String,
    gpu: Option<Gpu>,
    since_stats: Duration,
}

impl GeometryApp {
    pub fn create(name: &str) -> Box<dyn Application> {
        Box::new(Self {
            name: name.to_string(),
            gpu: None,
            since_stats: Duration::ZERO,
        })
    }

    fn gpu_mut(&mut self) -> Result<&mut Gpu> {
        self.gpu
            .as_mut()
            .ok_or_else(|| RenderError::Setup("application used before prepare".to_string()).into())
    }
}

impl Application for GeometryApp {
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self, config: &Config, platform: &mut WinitPlatform) -> Result<()> {
        let window = platform
            .window()
            .cloned()
            .context("Window was not created")?;
        let display_handle = window
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw();
        let window_handle = window
            .window_handle()
            .context("Failed to get window handle")?
            .as_raw();

        let enable_validation = config.debug.validation_layers && cfg!(debug_assertions);
        let device = DeviceContext::new(&self.name, display_handle, window_handle, enable_validation)?;

        let extent = wait_for_visible_extent(platform)
            .context("Window closed before it became visible")?;

        let frames = SwapchainFrames::new(
            device.clone(),
            extent,
            FrameSettings {
                frames_in_flight: config.graphics.max_frames_in_flight,
                clear_color: config.graphics.clear_color,
                present_mode: config.present_mode(),
            },
        )?;

        let scene = match Scene::new(&device, frames.render_pass(), &config.shaders) {
            Ok(scene) => Some(scene),
            Err(e) => {
                log::warn!("Geometry disabled, rendering clear-only frames: {:#}", e);
                None
            }
        };

        self.gpu = Some(Gpu {
            render_loop: RenderLoop::new(frames, config.gpu_timeout()),
            scene,
            device,
        });

        log::info!("{} prepared at {}x{}", self.name, extent.width, extent.height);
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        let gpu = self.gpu_mut()?;
        log::debug!("Resize requested to {}x{}", width, height);
        gpu.render_loop.request_rebuild();
        Ok(())
    }

    fn update(&mut self, platform: &mut dyn Platform, dt: Duration) -> Result<()> {
        let gpu = self.gpu_mut()?;
        let content: &dyn RecordCommands = match &gpu.scene {
            Some(scene) => scene,
            None => &ClearOnly,
        };

        let outcome = gpu.render_loop.render_frame(platform, content)?;
        if outcome != FrameOutcome::Presented {
            log::trace!("Frame outcome: {:?}", outcome);
        }

        let (state, slot) = (gpu.render_loop.state(), gpu.render_loop.frame_index());
        let stats = gpu.render_loop.stats();
        let chain = gpu.render_loop.backend().chain();
        let (extent, images, format) = (chain.extent(), chain.image_count(), chain.format());

        self.since_stats += dt;
        if self.since_stats >= STATS_INTERVAL {
            self.since_stats = Duration::ZERO;
            log::debug!(
                "{} presented, {} skipped, {} stale acquires, {} rebuilds, chain {:?} {}x{} ({} images, {:?}), next slot {}",
                stats.frames_presented,
                stats.presents_skipped,
                stats.acquires_out_of_date,
                stats.rebuilds,
                state,
                extent.width,
                extent.height,
                images,
                format,
                slot
            );
        }
        Ok(())
    }
}
