use ash::vk;
use color_eyre::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::window::Window;

use crate::renderer::core::instance::RenderInstance;

/// Native drawable surface plus the loader used to query it.
pub struct RenderSurface {
    pub handle: vk::SurfaceKHR,
    pub loader: ash::khr::surface::Instance,
}

impl RenderSurface {
    pub fn new(ins: &RenderInstance, window: &Window) -> Result<Self> {
        let handle = unsafe {
            ash_window::create_surface(
                &ins.entry,
                &ins.instance,
                window.display_handle()?.as_raw(),
                window.window_handle()?.as_raw(),
                None,
            )?
        };
        let loader = ash::khr::surface::Instance::new(&ins.entry, &ins.instance);
        Ok(Self { handle, loader })
    }

    /// Current drawable size in pixels, straight from the window.
    pub fn drawable_extent(window: &Window) -> vk::Extent2D {
        let size = window.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }

    /// Must run before the instance is destroyed.
    pub fn destroy(&mut self) {
        if self.handle != vk::SurfaceKHR::null() {
            unsafe {
                self.loader.destroy_surface(self.handle, None);
            }
            self.handle = vk::SurfaceKHR::null();
        }
    }
}
