use std::sync::Arc;
use std::time::Instant;

use color_eyre::Result;
use color_eyre::eyre::Report;
use glam::Vec3;
use winit::application::ApplicationHandler;
use winit::dpi::{LogicalSize, PhysicalPosition};
use winit::event::{ElementState, KeyEvent, MouseButton, MouseScrollDelta, StartCause, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowId};

use crate::renderer::Renderer;
use crate::renderer::camera::OrbitCamera;
use crate::renderer::config::RenderConfig;

const ORBIT_SENSITIVITY: f32 = 0.01;

pub struct App {
    window: Option<Arc<Window>>,
    renderer: Option<Renderer>,
    camera: OrbitCamera,

    // State
    prev_frame_time: Instant,
    delta_time_secs: f32,
    animate: bool,
    close_requested: bool,
    dragging: bool,
    cursor: Option<PhysicalPosition<f64>>,
    fatal: Option<Report>,
}

impl App {
    pub fn new() -> Self {
        Self {
            window: None,
            renderer: None,
            camera: OrbitCamera::new(Vec3::new(0.0, 1.0, 0.0), 4.0),

            prev_frame_time: Instant::now(),
            delta_time_secs: 0.0,
            animate: true,
            close_requested: false,
            dragging: false,
            cursor: None,
            fatal: None,
        }
    }

    pub fn run(mut self) -> Result<()> {
        let event_loop = EventLoop::new()?;
        event_loop.run_app(&mut self)?;

        match self.fatal.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Any error out of the renderer ends the process; there is no degraded
    /// rendering mode.
    fn abort(&mut self, event_loop: &ActiveEventLoop, err: Report) {
        log::error!("Fatal renderer error: {:?}", err);
        self.fatal = Some(err);
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn new_events(&mut self, _event_loop: &ActiveEventLoop, _cause: StartCause) {
        let curr_frame_time = Instant::now();
        self.delta_time_secs = curr_frame_time
            .duration_since(self.prev_frame_time)
            .as_secs_f32();
        self.prev_frame_time = curr_frame_time;
    }

    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            let attributes = Window::default_attributes()
                .with_title("rigview")
                .with_inner_size(LogicalSize::new(1024.0, 768.0));
            match event_loop.create_window(attributes) {
                Ok(window) => self.window = Some(Arc::new(window)),
                Err(err) => return self.abort(event_loop, err.into()),
            }
        }

        if self.renderer.is_none() {
            let window = self.window.as_ref().unwrap().clone();
            match Renderer::new(window, RenderConfig::default()) {
                Ok(renderer) => self.renderer = Some(renderer),
                Err(err) => self.abort(event_loop, err),
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if self.window.as_ref().map(|w| w.id()) != Some(window_id) {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                self.close_requested = true;
            }
            WindowEvent::Resized(new_size) => {
                // A zero-sized client area (minimize) is not a resize
                if new_size.width > 0 && new_size.height > 0 {
                    if let Some(renderer) = self.renderer.as_mut() {
                        renderer.request_resize();
                    }
                }
            }
            WindowEvent::ScaleFactorChanged { .. } => {
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.request_resize();
                }
            }
            WindowEvent::RedrawRequested => {
                let Some(renderer) = self.renderer.as_mut() else {
                    return;
                };
                let cam = self.camera.frame(renderer.aspect_ratio());
                if let Err(err) = renderer.draw(self.delta_time_secs, self.animate, &cam) {
                    self.abort(event_loop, err);
                }
            }
            WindowEvent::KeyboardInput {
                event:
                KeyEvent {
                    logical_key: key,
                    state: ElementState::Pressed,
                    ..
                },
                ..
            } => match key.as_ref() {
                Key::Named(NamedKey::Space) => {
                    self.animate = !self.animate;
                    log::info!("animate: {}", self.animate);
                }
                Key::Named(NamedKey::Escape) => {
                    self.close_requested = true;
                }
                _ => {}
            },
            WindowEvent::MouseInput { state, button: MouseButton::Left, .. } => {
                self.dragging = state == ElementState::Pressed;
            }
            WindowEvent::CursorMoved { position, .. } => {
                if self.dragging {
                    if let Some(prev) = self.cursor {
                        let dx = (position.x - prev.x) as f32;
                        let dy = (position.y - prev.y) as f32;
                        self.camera
                            .orbit(dx * ORBIT_SENSITIVITY, dy * ORBIT_SENSITIVITY);
                    }
                }
                self.cursor = Some(position);
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let amount = match delta {
                    MouseScrollDelta::LineDelta(_, y) => y * 0.5,
                    MouseScrollDelta::PixelDelta(position) => position.y as f32 * 0.01,
                };
                self.camera.zoom(amount);
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }

        if self.close_requested {
            event_loop.exit();
        }
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}
