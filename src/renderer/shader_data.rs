use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

/// Upper bound on skeleton size baked into the shader's uniform block.
pub const MAX_JOINTS: usize = 64;

/// Data unique to each frame, written into the per-image uniform buffer
/// right before submit. Layout matches the std140 block in skin.vert.
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct PerFrameData {
    pub viewproj: Mat4,
    pub model: Mat4,
    pub eye: Vec4,
    pub joints: [Mat4; MAX_JOINTS],
}

impl Default for PerFrameData {
    fn default() -> Self {
        Self {
            viewproj: Mat4::IDENTITY,
            model: Mat4::IDENTITY,
            eye: Vec4::ZERO,
            joints: [Mat4::IDENTITY; MAX_JOINTS],
        }
    }
}
