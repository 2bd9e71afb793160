use std::f32::consts::TAU;

use color_eyre::Result;
use glam::{Mat4, Vec3};

use crate::renderer::skeleton::{Joint, Skeleton};

/// Fixed-layout vertex and index arrays in the shape the uploader expects:
/// tightly packed floats per attribute plus u32 indices. Joint ids are stored
/// as floats like the rest of the attribute streams.
pub struct MeshData {
    pub positions: Vec<f32>,
    pub normals: Vec<f32>,
    pub uvs: Vec<f32>,
    pub weights: Vec<f32>,
    pub joints: Vec<f32>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }
}

const COLUMN_HEIGHT: f32 = 2.0;
const COLUMN_RADIUS: f32 = 0.3;
const ANIMATION_SECONDS: f32 = 2.0;

/// Builds the demo asset: a cylindrical column rigged to a chain of joints
/// that sway back and forth. Stands in for an external model import so the
/// binary runs without asset files on disk.
pub fn rigged_column(
    radial_segments: u32,
    height_segments: u32,
    joint_count: usize,
) -> Result<(MeshData, Skeleton)> {
    if joint_count < 2 {
        return Err(color_eyre::eyre::eyre!(
            "a rigged column needs at least two joints"
        ));
    }
    let mesh = column_mesh(radial_segments, height_segments, joint_count);
    let skeleton = sway_skeleton(joint_count)?;
    Ok((mesh, skeleton))
}

fn column_mesh(radial_segments: u32, height_segments: u32, joint_count: usize) -> MeshData {
    let ring_len = radial_segments + 1;
    let vertex_count = (ring_len * (height_segments + 1)) as usize;

    let mut positions = Vec::with_capacity(vertex_count * 3);
    let mut normals = Vec::with_capacity(vertex_count * 3);
    let mut uvs = Vec::with_capacity(vertex_count * 2);
    let mut weights = Vec::with_capacity(vertex_count * 3);
    let mut joints = Vec::with_capacity(vertex_count * 3);

    let spans = (joint_count - 1) as f32;
    for ring in 0..=height_segments {
        let v = ring as f32 / height_segments as f32;
        let y = v * COLUMN_HEIGHT;

        // Blend each ring between the two joints bracketing its height
        let along = (v * spans).min(spans - 1e-4);
        let lower = along.floor();
        let upper_weight = along - lower;

        for side in 0..=radial_segments {
            // Duplicate the seam vertex so the texture seam stays clean
            let theta = TAU * side as f32 / radial_segments as f32;
            let (sin, cos) = theta.sin_cos();

            positions.extend_from_slice(&[COLUMN_RADIUS * cos, y, COLUMN_RADIUS * sin]);
            normals.extend_from_slice(&[cos, 0.0, sin]);
            uvs.extend_from_slice(&[side as f32 / radial_segments as f32, v]);
            weights.extend_from_slice(&[1.0 - upper_weight, upper_weight, 0.0]);
            joints.extend_from_slice(&[lower, lower + 1.0, lower]);
        }
    }

    let mut indices = Vec::with_capacity((radial_segments * height_segments * 6) as usize);
    for ring in 0..height_segments {
        for side in 0..radial_segments {
            let a = ring * ring_len + side;
            let b = a + 1;
            let c = a + ring_len;
            let d = c + 1;
            indices.extend_from_slice(&[a, d, b, a, c, d]);
        }
    }

    MeshData {
        positions,
        normals,
        uvs,
        weights,
        joints,
        indices,
    }
}

fn sway_skeleton(joint_count: usize) -> Result<Skeleton> {
    const KEYFRAMES: usize = 9;
    const SWAY_RADIANS: f32 = 0.18;

    let segment = COLUMN_HEIGHT / (joint_count - 1) as f32;
    let times = (0..KEYFRAMES)
        .map(|k| ANIMATION_SECONDS * k as f32 / (KEYFRAMES - 1) as f32)
        .collect();

    let joints = (0..joint_count)
        .map(|i| {
            let offset = if i == 0 {
                Vec3::ZERO
            } else {
                Vec3::new(0.0, segment, 0.0)
            };
            let phase = i as f32 * 0.6;
            // sin over a full turn keeps the first and last keyframes equal,
            // so the wrapped track loops without a pop
            let keyframes = (0..KEYFRAMES)
                .map(|k| {
                    let angle =
                        SWAY_RADIANS * (TAU * k as f32 / (KEYFRAMES - 1) as f32 + phase).sin();
                    Mat4::from_translation(offset) * Mat4::from_rotation_z(angle)
                })
                .collect();
            Joint {
                parent: if i == 0 { None } else { Some(i - 1) },
                rest_local: Mat4::from_translation(offset),
                keyframes,
            }
        })
        .collect();

    Skeleton::new(joints, times)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_streams_agree_on_vertex_count() {
        let (mesh, _) = rigged_column(12, 16, 5).unwrap();
        let count = mesh.vertex_count();
        assert_eq!(mesh.normals.len(), count * 3);
        assert_eq!(mesh.uvs.len(), count * 2);
        assert_eq!(mesh.weights.len(), count * 3);
        assert_eq!(mesh.joints.len(), count * 3);
    }

    #[test]
    fn indices_stay_in_range() {
        let (mesh, _) = rigged_column(8, 6, 4).unwrap();
        let count = mesh.vertex_count() as u32;
        assert!(mesh.indices.iter().all(|&i| i < count));
        assert_eq!(mesh.index_count() % 3, 0);
    }

    #[test]
    fn weights_blend_between_two_joints() {
        let (mesh, skeleton) = rigged_column(8, 6, 4).unwrap();
        assert_eq!(skeleton.joint_count(), 4);
        for vertex in 0..mesh.vertex_count() {
            let w = &mesh.weights[vertex * 3..vertex * 3 + 3];
            assert!((w[0] + w[1] + w[2] - 1.0).abs() < 1e-4);
            let ids = &mesh.joints[vertex * 3..vertex * 3 + 3];
            assert!(ids.iter().all(|&id| (id as usize) < 4));
        }
    }
}
