use color_eyre::Result;
use color_eyre::eyre::eyre;
use glam::Vec3;

/// Checked narrowing for counts headed into Vulkan structs. Errors instead of
/// silently truncating.
pub fn safe_u32(value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| eyre!("value {} does not fit in u32", value))
}

pub fn calculate_direction(pitch: f32, yaw: f32) -> Vec3 {
    Vec3::new(
        yaw.cos() * pitch.cos(),
        pitch.sin(),
        yaw.sin() * pitch.cos(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_u32_passes_small_values() {
        assert_eq!(safe_u32(3).unwrap(), 3);
        assert_eq!(safe_u32(u32::MAX as usize).unwrap(), u32::MAX);
    }

    #[test]
    fn safe_u32_rejects_narrowing() {
        assert!(safe_u32(u32::MAX as usize + 1).is_err());
    }

    #[test]
    fn direction_at_zero_angles_points_along_x() {
        let dir = calculate_direction(0.0, 0.0);
        assert!((dir - Vec3::X).length() < 1e-6);
    }
}
