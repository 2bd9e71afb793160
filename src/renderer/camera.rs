use glam::{Mat4, Vec3, Vec4};

use crate::renderer::util;

/// Matrix triple handed to the renderer once per frame. The renderer treats
/// these as opaque; only the camera knows how they were built.
#[derive(Debug, Copy, Clone)]
pub struct CameraFrame {
    pub viewproj: Mat4,
    pub model: Mat4,
    pub eye: Vec3,
}

/// Orbiting camera circling a fixed pivot.
pub struct OrbitCamera {
    pivot: Vec3,
    radius: f32,
    yaw: f32,
    pitch: f32,
    fov_y_deg: f32,
    near: f32,
    far: f32,
}

impl OrbitCamera {
    const DEFAULT_FOV_Y_DEG: f32 = 45.0;
    const MIN_RADIUS: f32 = 0.5;
    const MAX_PITCH: f32 = 1.45;

    pub fn new(pivot: Vec3, radius: f32) -> Self {
        Self {
            pivot,
            radius: radius.max(Self::MIN_RADIUS),
            yaw: std::f32::consts::FRAC_PI_2,
            pitch: 0.35,
            fov_y_deg: Self::DEFAULT_FOV_Y_DEG,
            near: 0.1,
            far: 100.0,
        }
    }

    pub fn orbit(&mut self, delta_yaw: f32, delta_pitch: f32) {
        self.yaw += delta_yaw;
        self.pitch = (self.pitch + delta_pitch).clamp(-Self::MAX_PITCH, Self::MAX_PITCH);
    }

    pub fn zoom(&mut self, delta: f32) {
        self.radius = (self.radius - delta).max(Self::MIN_RADIUS);
    }

    pub fn get_position(&self) -> Vec3 {
        self.pivot + util::calculate_direction(self.pitch, self.yaw) * self.radius
    }

    pub fn get_view_mat(&self) -> Mat4 {
        Mat4::look_at_rh(self.get_position(), self.pivot, Vec3::Y)
    }

    pub fn get_proj_mat(&self, aspect_ratio: f32) -> Mat4 {
        let mut proj = Mat4::perspective_rh(
            self.fov_y_deg.to_radians(),
            aspect_ratio,
            self.near,
            self.far,
        );
        // Vulkan clip space has Y pointing down
        proj.y_axis.y *= -1.0;
        proj
    }

    pub fn frame(&self, aspect_ratio: f32) -> CameraFrame {
        CameraFrame {
            viewproj: self.get_proj_mat(aspect_ratio) * self.get_view_mat(),
            model: Mat4::IDENTITY,
            eye: self.get_position(),
        }
    }
}

impl CameraFrame {
    pub fn eye_vec4(&self) -> Vec4 {
        self.eye.extend(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_stays_on_the_orbit_sphere() {
        let mut camera = OrbitCamera::new(Vec3::new(0.0, 1.0, 0.0), 4.0);
        for _ in 0..7 {
            camera.orbit(0.3, 0.1);
            let distance = (camera.get_position() - Vec3::new(0.0, 1.0, 0.0)).length();
            assert!((distance - 4.0).abs() < 1e-4);
        }
    }

    #[test]
    fn zoom_never_collapses_into_the_pivot() {
        let mut camera = OrbitCamera::new(Vec3::ZERO, 2.0);
        camera.zoom(100.0);
        assert!((camera.get_position() - Vec3::ZERO).length() >= OrbitCamera::MIN_RADIUS - 1e-6);
    }
}
