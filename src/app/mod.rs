pub mod benchmark;

use super::renderer::Renderer;
use color_eyre::{Report, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, StartCause, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Fullscreen, Window, WindowId};
use crate::app::benchmark::{Benchmark, BenchmarkPhase};
use crate::renderer::config::RenderConfig;
use crate::renderer::vk::error::VkError;

const FPS_LOG_INTERVAL: Duration = Duration::from_secs(2);

/// Redraws continuously while frames are presented and sleeps until the next
/// window event once nothing can be presented (e.g. while minimized)
#[derive(Debug, Default)]
struct RedrawPolicy {
    idle: bool,
}

impl RedrawPolicy {
    fn control_flow(&self) -> ControlFlow {
        if self.idle { ControlFlow::Wait } else { ControlFlow::Poll }
    }

    fn should_request_redraw(&self) -> bool {
        !self.idle
    }

    fn frame_drawn(&mut self, presented: bool) -> ControlFlow {
        if self.idle == presented {
            if presented {
                log::debug!("Presenting again, resuming redraws");
            } else {
                log::debug!("Nothing to present, waiting for window events");
            }
        }
        self.idle = !presented;
        self.control_flow()
    }

    fn window_changed(&mut self) -> ControlFlow {
        self.idle = false;
        self.control_flow()
    }
}

fn is_fullscreen_key(key: &Key<&str>) -> bool {
    matches!(key, Key::Character(c) if c.eq_ignore_ascii_case("f"))
}

pub struct App {
    // Renderer first: it must be gone before the window it presents to
    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,
    config: RenderConfig,
    benchmark: Option<Benchmark>,

    // State
    prev_frame_time: Instant,
    delta_time_secs: f32,
    fps_window_start: Instant,
    fps_window_frames: u32,
    redraw_policy: RedrawPolicy,
    close_requested: bool,
    error: Option<Report>,
}

impl App {
    pub fn new(config: RenderConfig) -> Self {
        let benchmark = config.benchmark.clone().map(Benchmark::new);
        let now = Instant::now();

        Self {
            renderer: None,
            window: None,
            config,
            benchmark,

            prev_frame_time: now,
            delta_time_secs: 0.0,
            fps_window_start: now,
            fps_window_frames: 0,
            redraw_policy: RedrawPolicy::default(),
            close_requested: false,
            error: None,
        }
    }

    /// The error that ended the event loop, if any
    pub fn take_error(&mut self) -> Option<Report> {
        self.error.take()
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        if self.window.is_none() {
            let fullscreen = self.config.fullscreen.then_some(Fullscreen::Borderless(None));
            let attributes = Window::default_attributes()
                .with_title("vkraii")
                .with_inner_size(PhysicalSize::new(self.config.width, self.config.height))
                .with_fullscreen(fullscreen);
            self.window = Some(Arc::new(event_loop.create_window(attributes)?));
        }

        if self.renderer.is_none() {
            if let Some(window) = self.window.clone() {
                let renderer = Renderer::new(window, &self.config)?;
                log::info!("Rendering on {}", renderer.device_info());
                self.renderer = Some(renderer);
            }
        }

        Ok(())
    }

    /// Stops the event loop. Losing the surface or device is a normal way to shut down,
    /// anything else is kept and returned from `main`.
    fn fail(&mut self, event_loop: &ActiveEventLoop, report: Report) {
        match report.downcast_ref::<VkError>() {
            Some(e) if e.is_shutdown() => log::warn!("Shutting down: {}", e),
            _ => {
                log::error!("{:?}", report);
                self.error = Some(report);
            }
        }
        self.renderer = None;
        event_loop.exit();
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let Some(renderer) = self.renderer.as_mut() else {
            return Ok(());
        };
        let presented = renderer.draw()?;
        event_loop.set_control_flow(self.redraw_policy.frame_drawn(presented));
        if !presented {
            return Ok(());
        }

        let now = Instant::now();
        self.fps_window_frames += 1;
        let window_time = now.duration_since(self.fps_window_start);
        if window_time >= FPS_LOG_INTERVAL {
            log::debug!(
                "{:.1} fps (last frame {:.2} ms)",
                self.fps_window_frames as f64 / window_time.as_secs_f64(),
                self.delta_time_secs * 1000.0,
            );
            self.fps_window_start = now;
            self.fps_window_frames = 0;
        }

        if let Some(benchmark) = self.benchmark.as_mut() {
            if benchmark.frame(now) == BenchmarkPhase::Finished {
                benchmark.report()?;
                event_loop.exit();
            }
        }

        Ok(())
    }

    fn toggle_fullscreen(&self) {
        if let Some(window) = self.window.as_ref() {
            let fullscreen = match window.fullscreen() {
                Some(_) => None,
                None => Some(Fullscreen::Borderless(None)),
            };
            log::info!("Fullscreen: {}", fullscreen.is_some());
            window.set_fullscreen(fullscreen);
        }
    }
}

impl ApplicationHandler for App {
    fn new_events(&mut self, _event_loop: &ActiveEventLoop, _cause: StartCause) {
        let curr_frame_time = Instant::now();
        self.delta_time_secs = curr_frame_time.duration_since(self.prev_frame_time).as_secs_f32();
        self.prev_frame_time = curr_frame_time;
    }

    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        event_loop.set_control_flow(self.redraw_policy.window_changed());
        if let Err(e) = self.init(event_loop) {
            self.fail(event_loop, e);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent
    ) {
        if self.window.as_ref().is_none_or(|window| window.id() != window_id) {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                self.close_requested = true;
            }
            WindowEvent::Resized(_) | WindowEvent::ScaleFactorChanged { .. } => {
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.request_resize();
                }
                event_loop.set_control_flow(self.redraw_policy.window_changed());
                if let Some(window) = self.window.as_ref() {
                    window.request_redraw();
                }
            }
            WindowEvent::Occluded(false) => {
                event_loop.set_control_flow(self.redraw_policy.window_changed());
                if let Some(window) = self.window.as_ref() {
                    window.request_redraw();
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.redraw(event_loop) {
                    self.fail(event_loop, e);
                }
            }
            WindowEvent::KeyboardInput {
                event:
                KeyEvent {
                    logical_key: key,
                    state: ElementState::Pressed,
                    repeat: false,
                    ..
                },
                ..
            } => match key.as_ref() {
                key if is_fullscreen_key(&key) => {
                    self.toggle_fullscreen();
                }
                Key::Named(NamedKey::Escape) => {
                    self.close_requested = true;
                }
                _ => {}
            },
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.close_requested {
            event_loop.exit();
            return;
        }

        if !self.redraw_policy.should_request_redraw() {
            return;
        }
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(renderer) = self.renderer.take() {
            log::info!("Exiting after {} frames", renderer.frame_number());
        }
    }
}
