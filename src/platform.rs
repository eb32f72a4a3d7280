// =============================================================================
// PLATFORM - window, event pump and resize notifications
// =============================================================================
//
// The render loop needs exactly three things from the windowing layer:
// a framebuffer size query, a blocking event pump, and a resize flag.
// WinitPlatform provides them on top of winit's pump_app_events so the
// application keeps control of its own loop.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    window::{Window, WindowAttributes, WindowId},
};

use crate::config::WindowConfig;

/// What the render loop consumes from the platform layer.
pub trait Platform {
    /// Current framebuffer size in pixels; (0, 0) while minimized.
    fn framebuffer_size(&self) -> (u32, u32);

    /// Block until at least one window event has been processed.
    fn wait_events(&mut self);

    /// Whether a resize happened since the last call. Clears the flag.
    fn take_resized(&mut self) -> bool;

    /// True once the user asked to quit; blocking waits give up.
    fn is_closing(&self) -> bool {
        false
    }
}

/// Window state updated by winit callbacks.
struct WindowState {
    attributes: Option<WindowAttributes>,
    window: Option<Arc<Window>>,
    create_error: Option<String>,
    resized: bool,
    /// Latest size reported since the host last asked.
    size_change: Option<(u32, u32)>,
    close_requested: bool,
}

impl WindowState {
    fn new(attributes: WindowAttributes) -> Self {
        Self {
            attributes: Some(attributes),
            window: None,
            create_error: None,
            resized: false,
            size_change: None,
            close_requested: false,
        }
    }

    fn note_resize(&mut self, width: u32, height: u32) {
        self.resized = true;
        self.size_change = Some((width, height));
    }

    /// Forget anything reported so far.
    fn settle(&mut self) {
        self.resized = false;
        self.size_change = None;
    }
}

impl ApplicationHandler for WindowState {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let Some(attributes) = self.attributes.take() else {
            return;
        };

        match event_loop.create_window(attributes) {
            Ok(window) => self.window = Some(Arc::new(window)),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                self.create_error = Some(e.to_string());
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.close_requested = true;
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                self.note_resize(size.width, size.height);
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    log::info!("ESC pressed, exiting...");
                    self.close_requested = true;
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }
}

pub struct WinitPlatform {
    event_loop: EventLoop<()>,
    state: WindowState,
}

impl WinitPlatform {
    /// Open the window and pump events until it exists.
    pub fn new(config: &WindowConfig) -> Result<Self> {
        let event_loop = EventLoop::new().context("Failed to create event loop")?;
        let attributes = WindowAttributes::default()
            .with_title(&config.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(config.width, config.height))
            .with_resizable(true);

        let mut platform = Self {
            event_loop,
            state: WindowState::new(attributes),
        };

        while platform.state.window.is_none() {
            let exited = platform.pump(None);
            if let Some(e) = platform.state.create_error.take() {
                anyhow::bail!("Failed to create window: {}", e);
            }
            if exited {
                anyhow::bail!("Event loop exited before the window was created");
            }
        }

        // The initial size is not a resize
        platform.state.settle();
        Ok(platform)
    }

    /// Process pending events without blocking.
    pub fn poll_events(&mut self) {
        self.pump(Some(Duration::ZERO));
    }

    /// The size the window was last resized to, once per change.
    pub fn take_size_change(&mut self) -> Option<(u32, u32)> {
        self.state.size_change.take()
    }

    pub fn should_close(&self) -> bool {
        self.state.close_requested
    }

    pub fn window(&self) -> Option<&Arc<Window>> {
        self.state.window.as_ref()
    }

    /// Returns true once the event loop has exited.
    fn pump(&mut self, timeout: Option<Duration>) -> bool {
        match self.event_loop.pump_app_events(timeout, &mut self.state) {
            PumpStatus::Continue => false,
            PumpStatus::Exit(code) => {
                log::debug!("Event loop exited with code {}", code);
                self.state.close_requested = true;
                true
            }
        }
    }
}

impl Platform for WinitPlatform {
    fn framebuffer_size(&self) -> (u32, u32) {
        self.state.window.as_ref().map_or((0, 0), |window| {
            let size = window.inner_size();
            (size.width, size.height)
        })
    }

    fn wait_events(&mut self) {
        if self.state.close_requested {
            return;
        }
        self.pump(None);
    }

    fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.state.resized)
    }

    fn is_closing(&self) -> bool {
        self.state.close_requested
    }
}
