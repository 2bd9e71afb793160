use ash::vk;

/// Read-once renderer settings, fixed before the first frame is drawn.
pub struct RenderConfig {
    /// Requested swapchain length; clamped to the surface's reported bounds.
    pub buffer_count: u32,
    /// Ask for the tearing present mode instead of FIFO. Only honored when
    /// the surface actually lists it.
    pub prefer_immediate: bool,
    /// Sample count reserved for an MSAA target; the forward pass currently
    /// renders single-sampled.
    pub multisample_count: u32,
    pub preferred_format: vk::Format,
    pub preferred_color_space: vk::ColorSpaceKHR,
    /// Upper bound on any single fence wait. Expiry is treated as a lost
    /// device, not an ordinary error.
    pub fence_timeout_ns: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            buffer_count: 3,
            prefer_immediate: false,
            multisample_count: 8,
            preferred_format: vk::Format::B8G8R8A8_SRGB,
            preferred_color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            fence_timeout_ns: 5_000_000_000,
        }
    }
}
