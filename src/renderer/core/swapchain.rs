use ash::prelude::VkResult;
use ash::vk;
use color_eyre::Result;

use crate::renderer::config::RenderConfig;
use crate::renderer::core::device::RenderDevice;
use crate::renderer::core::instance::RenderInstance;
use crate::renderer::core::surface::RenderSurface;

/// Everything the surface reports about itself, captured in one query so the
/// selection logic below stays a pure function of plain data.
pub struct SurfaceProfile {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceProfile {
    pub fn query(surface: &RenderSurface, physical: vk::PhysicalDevice) -> Result<Self> {
        let capabilities = unsafe {
            surface
                .loader
                .get_physical_device_surface_capabilities(physical, surface.handle)?
        };
        let formats = unsafe {
            surface
                .loader
                .get_physical_device_surface_formats(physical, surface.handle)?
        };
        let present_modes = unsafe {
            surface
                .loader
                .get_physical_device_surface_present_modes(physical, surface.handle)?
        };
        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }
}

/// The concrete choices derived from a [`SurfaceProfile`] and the config.
#[derive(Debug, Clone, Copy)]
pub struct SwapchainSettings {
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
}

impl PartialEq for SwapchainSettings {
    fn eq(&self, other: &Self) -> bool {
        self.extent == other.extent
            && self.image_count == other.image_count
            && self.format.format == other.format.format
            && self.format.color_space == other.format.color_space
            && self.present_mode == other.present_mode
    }
}

impl Eq for SwapchainSettings {}

pub fn choose_settings(
    profile: &SurfaceProfile,
    config: &RenderConfig,
    window_extent: vk::Extent2D,
) -> SwapchainSettings {
    SwapchainSettings {
        extent: choose_extent(&profile.capabilities, window_extent),
        image_count: choose_image_count(&profile.capabilities, config.buffer_count),
        format: choose_surface_format(
            &profile.formats,
            vk::SurfaceFormatKHR {
                format: config.preferred_format,
                color_space: config.preferred_color_space,
            },
        ),
        present_mode: choose_present_mode(&profile.present_modes, config.prefer_immediate),
    }
}

/// The surface's own extent wins unless it reports the "undefined" sentinel,
/// in which case the window size is used, clamped to the surface bounds.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    window_extent: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: window_extent.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: window_extent.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// Requested count clamped to the surface bounds; a reported max of zero
/// means unbounded.
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR, requested: u32) -> u32 {
    let max = if capabilities.max_image_count == 0 {
        u32::MAX
    } else {
        capabilities.max_image_count
    };
    requested.clamp(capabilities.min_image_count, max)
}

pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    preferred: vk::SurfaceFormatKHR,
) -> vk::SurfaceFormatKHR {
    if let Some(format) = formats.iter().find(|format| {
        format.format == preferred.format && format.color_space == preferred.color_space
    }) {
        return *format;
    }

    // A single UNDEFINED entry means the surface accepts any format
    if formats.len() == 1 && formats[0].format == vk::Format::UNDEFINED {
        return preferred;
    }

    match formats.first() {
        Some(format) => {
            log::warn!(
                "Preferred surface format not available, falling back to {:?}/{:?}",
                format.format,
                format.color_space,
            );
            *format
        }
        None => preferred,
    }
}

/// FIFO is the only mode every surface supports; the tearing mode is used
/// only when explicitly requested and actually listed by the surface.
pub fn choose_present_mode(
    present_modes: &[vk::PresentModeKHR],
    prefer_immediate: bool,
) -> vk::PresentModeKHR {
    if prefer_immediate
        && present_modes.contains(&vk::PresentModeKHR::IMMEDIATE)
    {
        vk::PresentModeKHR::IMMEDIATE
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// The presentable image chain and its views. Destroyed and rebuilt wholesale
/// whenever the surface changes shape.
pub struct Swapchain {
    pub loader: ash::khr::swapchain::Device,
    pub handle: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
}

impl Swapchain {
    pub fn new(
        ins: &RenderInstance,
        dev: &RenderDevice,
        surface: &RenderSurface,
        config: &RenderConfig,
        window_extent: vk::Extent2D,
    ) -> Result<Self> {
        let profile = SurfaceProfile::query(surface, dev.physical)?;
        let settings = choose_settings(&profile, config, window_extent);

        let pre_transform = if profile
            .capabilities
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            profile.capabilities.current_transform
        };

        let loader = ash::khr::swapchain::Device::new(&ins.instance, &dev.logical);
        let swapchain_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.handle)
            .min_image_count(settings.image_count)
            .image_format(settings.format.format)
            .image_color_space(settings.format.color_space)
            .image_extent(settings.extent)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(settings.present_mode)
            .clipped(true)
            .image_array_layers(1);

        let handle = unsafe {
            loader.create_swapchain(&swapchain_info, None)?
        };

        let (images, image_views) = Self::create_image_views(
            &handle,
            &loader,
            settings.format.format,
            dev,
        )?;

        log::debug!(
            "Created swapchain: {} images, {}x{}, {:?}",
            images.len(),
            settings.extent.width,
            settings.extent.height,
            settings.present_mode,
        );

        Ok(Self {
            loader,
            handle,
            images,
            image_views,
            format: settings.format,
            extent: settings.extent,
            present_mode: settings.present_mode,
        })
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    fn create_image_views(
        swapchain: &vk::SwapchainKHR,
        loader: &ash::khr::swapchain::Device,
        format: vk::Format,
        dev: &RenderDevice,
    ) -> Result<(Vec<vk::Image>, Vec<vk::ImageView>)> {
        let images = unsafe {
            loader.get_swapchain_images(*swapchain)?
        };
        let image_views = images
            .iter()
            .map(|image| {
                let view_info = vk::ImageViewCreateInfo::default()
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
                    })
                    .image(*image);
                unsafe {
                    dev.logical.create_image_view(&view_info, None)
                }
            })
            .collect::<VkResult<Vec<vk::ImageView>>>()?;

        Ok((images, image_views))
    }

    /// Views first, then the chain itself. Safe to call twice; the second
    /// call finds nothing left to destroy.
    pub fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            for view in self.image_views.drain(..) {
                device.destroy_image_view(view, None);
            }
            if self.handle != vk::SwapchainKHR::null() {
                self.loader.destroy_swapchain(self.handle, None);
                self.handle = vk::SwapchainKHR::null();
            }
        }
        self.images.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(
        min_count: u32,
        max_count: u32,
        current: vk::Extent2D,
        min_extent: vk::Extent2D,
        max_extent: vk::Extent2D,
    ) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min_count,
            max_image_count: max_count,
            current_extent: current,
            min_image_extent: min_extent,
            max_image_extent: max_extent,
            ..Default::default()
        }
    }

    const UNDEFINED_EXTENT: vk::Extent2D = vk::Extent2D {
        width: u32::MAX,
        height: u32::MAX,
    };

    #[test]
    fn surface_extent_wins_when_defined() {
        let caps = capabilities(
            2,
            4,
            vk::Extent2D { width: 800, height: 600 },
            vk::Extent2D { width: 1, height: 1 },
            vk::Extent2D { width: 4096, height: 4096 },
        );
        let chosen = choose_extent(&caps, vk::Extent2D { width: 1024, height: 768 });
        assert_eq!(chosen, vk::Extent2D { width: 800, height: 600 });
    }

    #[test]
    fn undefined_extent_clamps_the_window_size() {
        let caps = capabilities(
            2,
            4,
            UNDEFINED_EXTENT,
            vk::Extent2D { width: 200, height: 200 },
            vk::Extent2D { width: 1000, height: 1000 },
        );

        // Requested size outside the surface bounds must come back clamped
        let too_big = choose_extent(&caps, vk::Extent2D { width: 5000, height: 50 });
        assert_eq!(too_big, vk::Extent2D { width: 1000, height: 200 });

        let in_range = choose_extent(&caps, vk::Extent2D { width: 640, height: 480 });
        assert_eq!(in_range, vk::Extent2D { width: 640, height: 480 });
    }

    #[test]
    fn image_count_clamps_to_surface_bounds() {
        let caps = capabilities(
            2,
            4,
            UNDEFINED_EXTENT,
            vk::Extent2D::default(),
            vk::Extent2D::default(),
        );
        assert_eq!(choose_image_count(&caps, 1), 2);
        assert_eq!(choose_image_count(&caps, 3), 3);
        assert_eq!(choose_image_count(&caps, 9), 4);
    }

    #[test]
    fn zero_max_image_count_means_unbounded() {
        let caps = capabilities(
            2,
            0,
            UNDEFINED_EXTENT,
            vk::Extent2D::default(),
            vk::Extent2D::default(),
        );
        assert_eq!(choose_image_count(&caps, 12), 12);
    }

    const PREFERRED: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_SRGB,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };

    fn format_eq(a: vk::SurfaceFormatKHR, b: vk::SurfaceFormatKHR) -> bool {
        a.format == b.format && a.color_space == b.color_space
    }

    #[test]
    fn exact_format_match_is_taken() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            PREFERRED,
        ];
        assert!(format_eq(choose_surface_format(&formats, PREFERRED), PREFERRED));
    }

    #[test]
    fn any_format_sentinel_yields_the_preferred_pair() {
        let formats = [vk::SurfaceFormatKHR {
            format: vk::Format::UNDEFINED,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];
        assert!(format_eq(choose_surface_format(&formats, PREFERRED), PREFERRED));
    }

    #[test]
    fn unsupported_preference_falls_back_to_first_listed() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::R16G16B16A16_SFLOAT,
                color_space: vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
            },
        ];
        assert!(format_eq(choose_surface_format(&formats, PREFERRED), formats[0]));
    }

    #[test]
    fn present_mode_defaults_to_fifo() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes, false), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn immediate_mode_only_when_listed() {
        let with = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        let without = [vk::PresentModeKHR::FIFO];
        assert_eq!(
            choose_present_mode(&with, true),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(
            choose_present_mode(&without, true),
            vk::PresentModeKHR::FIFO
        );
    }
}
