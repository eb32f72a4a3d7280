// =============================================================================
// LOOM RENDERER - frame-in-flight Vulkan renderer
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  main (config, logging, event pump, FPS title)                  │
// │    └── Application (GeometryApp)                                │
// │          └── RenderLoop<SwapchainFrames>                        │
// │                ├── FrameSlotRing (fences, semaphores, cmds)     │
// │                └── PresentationChain (swapchain, views, fbs)    │
// │          └── Scene (pipeline, vertex + index buffers)           │
// │          └── DeviceContext (instance, surface, device, queue)   │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Pump window events
// 2. Wait for the slot's fence
// 3. Acquire swapchain image
// 4. Reset fence, record, submit
// 5. Present (or skip and rebuild after a resize)
// 6. Advance to the next slot
//
// =============================================================================

mod app;
mod backend;
mod config;
mod error;
mod geometry;
mod platform;
mod render_loop;

use anyhow::Result;
use app::{AppInfo, GeometryApp};
use config::Config;
use platform::WinitPlatform;
use std::fs::File;
use std::io::Write;
use std::time::{Duration, Instant};

/// How often the FPS readout in the title is refreshed.
const FPS_INTERVAL: Duration = Duration::from_secs(1);

fn main() {
    // Load configuration from config.toml
    let config = Config::load();

    init_logging(&config);
    log::info!("Starting {}", config.window.title);
    log::info!(
        "Window: {}x{}, present mode: {}, frames in flight: {}",
        config.window.width,
        config.window.height,
        config.graphics.present_mode,
        config.graphics.max_frames_in_flight
    );

    if let Err(e) = run(&config) {
        log::error!("Fatal error ({:?}): {:#}", error::classify(&e), e);
        std::process::exit(1);
    }
}

/// Initialize logging, optionally piped into the configured log file
fn init_logging(config: &Config) {
    use env_logger::{Builder, Env, Target};

    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));

    if config.debug.log_to_file {
        match File::create(&config.debug.log_file) {
            Ok(mut file) => {
                let _ = writeln!(file, "=== {} log ===", config.window.title);
                let _ = writeln!(file, "Started: {:?}", std::time::SystemTime::now());
                let _ = writeln!(file);
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!(
                "Could not open log file {}: {}. Logging to stderr.",
                config.debug.log_file, e
            ),
        }
    }

    builder.init();
}

fn run(config: &Config) -> Result<()> {
    let mut platform = WinitPlatform::new(&config.window)?;

    let info = AppInfo {
        name: config.window.title.clone(),
        create: GeometryApp::create,
    };
    // Declared after the platform so the surface is gone before the window
    let mut app = info.instantiate();
    app.prepare(config, &mut platform)?;

    let mut last_frame = Instant::now();
    let mut fps_timer = Instant::now();
    let mut frame_count = 0u32;

    while !platform.should_close() {
        platform.poll_events();
        if platform.should_close() {
            break;
        }

        if let Some((width, height)) = platform.take_size_change() {
            app.resize(width, height)?;
        }

        let now = Instant::now();
        let dt = now - last_frame;
        last_frame = now;

        app.update(&mut platform, dt)?;

        // FPS counter
        frame_count += 1;
        let elapsed = fps_timer.elapsed();
        if elapsed >= FPS_INTERVAL {
            let fps = frame_count as f64 / elapsed.as_secs_f64();
            let frame_ms = elapsed.as_secs_f64() * 1000.0 / frame_count as f64;
            if config.debug.show_fps {
                if let Some(window) = platform.window() {
                    window.set_title(&format!(
                        "{} | FPS: {:.0} | {:.2}ms",
                        app.name(),
                        fps,
                        frame_ms
                    ));
                }
            }
            log::trace!("FPS: {:.1} ({:.2}ms)", fps, frame_ms);
            frame_count = 0;
            fps_timer = Instant::now();
        }
    }

    log::info!("Shutting down {}", app.name());
    Ok(())
}
