pub mod device;
pub mod instance;
pub mod surface;
pub mod swapchain;
