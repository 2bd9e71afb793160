pub mod camera;
pub mod config;
pub mod core;
pub mod frame;
pub mod geometry;
pub mod model;
pub mod pipeline;
pub mod shader_data;
pub mod skeleton;
pub mod uniforms;
pub mod util;

use std::sync::{Arc, Mutex};
use color_eyre::Result;
use color_eyre::eyre::eyre;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use winit::window::Window;

use crate::renderer::camera::CameraFrame;
use crate::renderer::config::RenderConfig;
use crate::renderer::core::device::RenderDevice;
use crate::renderer::core::instance::RenderInstance;
use crate::renderer::core::surface::RenderSurface;
use crate::renderer::core::swapchain::Swapchain;
use crate::renderer::frame::{DrawOutcome, FramePipeline};
use crate::renderer::geometry::StaticGeometry;
use crate::renderer::pipeline::{record_draw_commands, RenderPipeline};
use crate::renderer::shader_data::{PerFrameData, MAX_JOINTS};
use crate::renderer::skeleton::Skeleton;
use crate::renderer::uniforms::FrameUniforms;

/// Ties the whole core together: device setup once, swapchain rebuilt on
/// demand, one acquire/submit/present cycle per draw call.
///
/// Field order doubles as teardown order; everything that borrows the device
/// is declared (and therefore dropped) before the device itself, and the
/// instance goes last.
pub struct Renderer {
    config: RenderConfig,
    window: Arc<Window>,

    frames: FramePipeline,
    pipeline: RenderPipeline,
    uniforms: FrameUniforms,
    geometry: StaticGeometry,
    swapchain: Swapchain,
    skeleton: Skeleton,
    clock: f32,
    resize_requested: bool,

    allocator: Arc<Mutex<Allocator>>,
    device: RenderDevice,
    surface: RenderSurface,
    instance: RenderInstance,
}

impl Renderer {
    pub fn new(window: Arc<Window>, config: RenderConfig) -> Result<Self> {
        let instance = RenderInstance::new(&window)?;
        let mut surface = RenderSurface::new(&instance, &window)?;

        let device = match RenderDevice::new(&instance, &surface) {
            Ok(device) => device,
            Err(err) => {
                surface.destroy();
                return Err(err);
            }
        };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.instance.clone(),
            device: (*device.logical).clone(),
            physical_device: device.physical,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_leaks_on_shutdown: true,
                ..Default::default()
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;
        let allocator = Arc::new(Mutex::new(allocator));

        let window_extent = RenderSurface::drawable_extent(&window);
        let swapchain = Swapchain::new(&instance, &device, &surface, &config, window_extent)?;

        let (mesh, skeleton) = model::rigged_column(24, 24, 6)?;
        if skeleton.joint_count() > MAX_JOINTS {
            return Err(eyre!(
                "Skeleton has {} joints, shader block holds {}",
                skeleton.joint_count(),
                MAX_JOINTS
            ));
        }
        let geometry = StaticGeometry::upload(&mesh, allocator.clone(), device.logical.clone())?;

        let uniforms = FrameUniforms::new(
            device.logical.clone(),
            allocator.clone(),
            swapchain.image_count(),
        )?;
        let pipeline = RenderPipeline::new(
            &device.logical,
            swapchain.format.format,
            swapchain.extent,
            &swapchain.image_views,
            uniforms.set_layout,
        )?;
        let frames = FramePipeline::new(
            device.logical.clone(),
            device.graphics_queue.family,
            device.graphics_queue.handle,
            device.present_queue().handle,
            config.buffer_count,
            swapchain.image_count(),
            config.fence_timeout_ns,
        )?;
        record_draw_commands(
            &device.logical,
            frames.command_buffers(),
            &pipeline,
            swapchain.extent,
            &geometry,
            &uniforms,
        )?;

        log::info!(
            "Renderer up: {} swapchain images, {} frames in flight, {}x msaa configured",
            swapchain.image_count(),
            config.buffer_count,
            config.multisample_count,
        );

        Ok(Self {
            config,
            window,
            frames,
            pipeline,
            uniforms,
            geometry,
            swapchain,
            skeleton,
            clock: 0.0,
            resize_requested: false,
            allocator,
            device,
            surface,
            instance,
        })
    }

    /// Called by the platform layer on every window-size change. Actual
    /// rebuilding is deferred to the next draw.
    pub fn request_resize(&mut self) {
        self.resize_requested = true;
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.swapchain.extent.width as f32 / self.swapchain.extent.height.max(1) as f32
    }

    /// Advances the animation clock and runs one frame cycle. A stale
    /// swapchain costs one skipped frame and a rebuild, nothing more.
    pub fn draw(&mut self, delta_secs: f32, animate: bool, cam: &CameraFrame) -> Result<()> {
        if self.resize_requested {
            self.resize_requested = false;
            self.recreate_swapchain()?;
        }

        if animate {
            self.clock += delta_secs;
        }

        let mut frame_data = PerFrameData {
            viewproj: cam.viewproj,
            model: cam.model,
            eye: cam.eye_vec4(),
            ..Default::default()
        };
        for (dst, src) in frame_data
            .joints
            .iter_mut()
            .zip(self.skeleton.skinning_matrices(self.clock))
        {
            *dst = *src;
        }

        let uniforms = &mut self.uniforms;
        let outcome = self.frames.draw(&self.swapchain, |image_index| {
            uniforms.write(image_index as usize, &frame_data)
        })?;

        if outcome == DrawOutcome::SwapchainStale {
            self.recreate_swapchain()?;
        }

        Ok(())
    }

    /// Tears the presentation chain and everything derived from it down in
    /// strict reverse-dependency order, then rebuilds. Callable repeatedly;
    /// every destroy below is a no-op the second time around.
    fn recreate_swapchain(&mut self) -> Result<()> {
        let window_extent = RenderSurface::drawable_extent(&self.window);
        if window_extent.width == 0 || window_extent.height == 0 {
            // Minimized; wait for the next resize notification
            return Ok(());
        }

        self.device.wait_idle()?;

        self.pipeline.destroy(&self.device.logical);
        self.frames.free_command_buffers();
        self.uniforms.destroy(&self.device.logical);
        self.swapchain.destroy(&self.device.logical);

        self.swapchain = Swapchain::new(
            &self.instance,
            &self.device,
            &self.surface,
            &self.config,
            window_extent,
        )?;
        self.uniforms = FrameUniforms::new(
            self.device.logical.clone(),
            self.allocator.clone(),
            self.swapchain.image_count(),
        )?;
        self.pipeline = RenderPipeline::new(
            &self.device.logical,
            self.swapchain.format.format,
            self.swapchain.extent,
            &self.swapchain.image_views,
            self.uniforms.set_layout,
        )?;
        self.frames.reallocate_command_buffers(self.swapchain.image_count())?;
        self.frames.reset_image_fences(self.swapchain.image_count());
        record_draw_commands(
            &self.device.logical,
            self.frames.command_buffers(),
            &self.pipeline,
            self.swapchain.extent,
            &self.geometry,
            &self.uniforms,
        )?;

        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(err) = self.device.wait_idle() {
            log::error!("Device wait failed during teardown: {}", err);
        }
        self.frames.destroy();
        self.pipeline.destroy(&self.device.logical);
        self.uniforms.destroy(&self.device.logical);
        self.swapchain.destroy(&self.device.logical);
        self.surface.destroy();
        // Geometry buffers, the allocator, the device and finally the
        // instance unwind in field order
    }
}
