//! Swapchain selection exercised end to end against mocked surface reports,
//! with no device or driver involved.

use ash::vk;
use rigview::renderer::config::RenderConfig;
use rigview::renderer::core::swapchain::{choose_settings, SurfaceProfile, SwapchainSettings};

fn profile(
    min_count: u32,
    max_count: u32,
    current_extent: vk::Extent2D,
) -> SurfaceProfile {
    SurfaceProfile {
        capabilities: vk::SurfaceCapabilitiesKHR {
            min_image_count: min_count,
            max_image_count: max_count,
            current_extent,
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
            ..Default::default()
        },
        formats: vec![vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }],
        present_modes: vec![vk::PresentModeKHR::FIFO],
    }
}

#[test]
fn default_config_against_a_typical_surface() {
    let profile = profile(2, 4, vk::Extent2D { width: 800, height: 600 });
    let config = RenderConfig::default();

    let settings = choose_settings(
        &profile,
        &config,
        vk::Extent2D { width: 1024, height: 768 },
    );

    assert_eq!(
        settings,
        SwapchainSettings {
            extent: vk::Extent2D { width: 800, height: 600 },
            image_count: 3,
            format: vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            present_mode: vk::PresentModeKHR::FIFO,
        }
    );
}

#[test]
fn every_requested_count_lands_inside_the_surface_bounds() {
    let profile = profile(2, 4, vk::Extent2D { width: 800, height: 600 });

    for requested in 1..=8 {
        let config = RenderConfig {
            buffer_count: requested,
            ..Default::default()
        };
        let settings = choose_settings(
            &profile,
            &config,
            vk::Extent2D { width: 800, height: 600 },
        );
        assert_eq!(settings.image_count, requested.clamp(2, 4));
    }
}

#[test]
fn undefined_extent_takes_the_clamped_window_size() {
    let mut profile = profile(
        2,
        4,
        vk::Extent2D { width: u32::MAX, height: u32::MAX },
    );
    profile.capabilities.min_image_extent = vk::Extent2D { width: 320, height: 240 };
    profile.capabilities.max_image_extent = vk::Extent2D { width: 1920, height: 1080 };

    let settings = choose_settings(
        &profile,
        &RenderConfig::default(),
        vk::Extent2D { width: 8000, height: 100 },
    );

    assert_eq!(
        settings.extent,
        vk::Extent2D { width: 1920, height: 240 }
    );
}

#[test]
fn selection_is_stable_under_repetition() {
    let profile = profile(2, 4, vk::Extent2D { width: 800, height: 600 });
    let config = RenderConfig::default();
    let window = vk::Extent2D { width: 800, height: 600 };

    let first = choose_settings(&profile, &config, window);
    let second = choose_settings(&profile, &config, window);
    assert_eq!(first, second);
}
