use color_eyre::Result;
use color_eyre::eyre::eyre;
use glam::Mat4;

/// One node of the rig. Parents must come before children in the joint list
/// so a single forward pass can resolve every world matrix.
pub struct Joint {
    pub parent: Option<usize>,
    pub rest_local: Mat4,
    /// Local transform per keyframe; empty means the joint is static and
    /// `rest_local` is used for every frame.
    pub keyframes: Vec<Mat4>,
}

/// Joint hierarchy plus its animation track.
///
/// World matrices are resolved iteratively in topological order and cached
/// once per evaluation, never by walking parent chains per joint.
pub struct Skeleton {
    joints: Vec<Joint>,
    keyframe_times: Vec<f32>,
    inverse_bind: Vec<Mat4>,
    world: Vec<Mat4>,
    skinning: Vec<Mat4>,
}

impl Skeleton {
    pub fn new(joints: Vec<Joint>, keyframe_times: Vec<f32>) -> Result<Self> {
        if keyframe_times.len() < 2 {
            return Err(eyre!("animation track needs at least two keyframes"));
        }
        for (i, joint) in joints.iter().enumerate() {
            if let Some(parent) = joint.parent {
                if parent >= i {
                    return Err(eyre!(
                        "joint {} has parent {} out of topological order",
                        i,
                        parent
                    ));
                }
            }
            if !joint.keyframes.is_empty() && joint.keyframes.len() != keyframe_times.len() {
                return Err(eyre!(
                    "joint {} has {} keyframes, track has {}",
                    i,
                    joint.keyframes.len(),
                    keyframe_times.len()
                ));
            }
        }

        // Rest-pose world matrices give the inverse bind matrices
        let mut rest_world = vec![Mat4::IDENTITY; joints.len()];
        for (i, joint) in joints.iter().enumerate() {
            rest_world[i] = match joint.parent {
                Some(parent) => rest_world[parent] * joint.rest_local,
                None => joint.rest_local,
            };
        }
        let inverse_bind = rest_world.iter().map(|m| m.inverse()).collect();

        let count = joints.len();
        Ok(Self {
            joints,
            keyframe_times,
            inverse_bind,
            world: vec![Mat4::IDENTITY; count],
            skinning: vec![Mat4::IDENTITY; count],
        })
    }

    pub fn joint_count(&self) -> usize {
        self.joints.len()
    }

    pub fn duration(&self) -> f32 {
        *self.keyframe_times.last().unwrap()
    }

    /// Bracketing keyframe index and the 0..1 blend factor for a wrapped time.
    fn locate(&self, time: f32) -> (usize, f32) {
        let wrapped = time.rem_euclid(self.duration());
        for (i, window) in self.keyframe_times.windows(2).enumerate() {
            if wrapped < window[1] {
                let span = window[1] - window[0];
                return (i, (wrapped - window[0]) / span);
            }
        }
        (self.keyframe_times.len() - 2, 1.0)
    }

    fn local_at(&self, joint: usize, frame: usize, blend: f32) -> Mat4 {
        let keyframes = &self.joints[joint].keyframes;
        if keyframes.is_empty() {
            return self.joints[joint].rest_local;
        }
        // Component-wise matrix lerp between the bracketing keyframes
        keyframes[frame] * (1.0 - blend) + keyframes[frame + 1] * blend
    }

    /// Evaluates the pose at `time` and returns one skinning matrix per
    /// joint: world(t) * inverse_bind.
    pub fn skinning_matrices(&mut self, time: f32) -> &[Mat4] {
        let (frame, blend) = self.locate(time);
        for i in 0..self.joints.len() {
            let local = self.local_at(i, frame, blend);
            self.world[i] = match self.joints[i].parent {
                Some(parent) => self.world[parent] * local,
                None => local,
            };
            self.skinning[i] = self.world[i] * self.inverse_bind[i];
        }
        &self.skinning
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Vec3, Vec4};

    fn static_chain(offsets: &[Vec3]) -> Skeleton {
        let joints = offsets
            .iter()
            .enumerate()
            .map(|(i, offset)| Joint {
                parent: if i == 0 { None } else { Some(i - 1) },
                rest_local: Mat4::from_translation(*offset),
                keyframes: Vec::new(),
            })
            .collect();
        Skeleton::new(joints, vec![0.0, 1.0]).unwrap()
    }

    #[test]
    fn rest_pose_skinning_is_identity() {
        let mut skeleton = static_chain(&[
            Vec3::ZERO,
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
        ]);
        for matrix in skeleton.skinning_matrices(0.25) {
            assert!((matrix.w_axis - Vec4::W).length() < 1e-5);
            assert!((matrix.x_axis - Vec4::X).length() < 1e-5);
        }
    }

    #[test]
    fn world_matrices_compose_down_the_chain() {
        let offsets = [Vec3::ZERO, Vec3::new(0.0, 1.0, 0.0), Vec3::new(0.0, 2.0, 0.0)];
        let mut skeleton = static_chain(&offsets);
        skeleton.skinning_matrices(0.0);
        let tip = skeleton.world[2].transform_point3(Vec3::ZERO);
        assert!((tip - Vec3::new(0.0, 3.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn animation_interpolates_between_keyframes() {
        let joints = vec![Joint {
            parent: None,
            rest_local: Mat4::IDENTITY,
            keyframes: vec![
                Mat4::from_translation(Vec3::ZERO),
                Mat4::from_translation(Vec3::new(2.0, 0.0, 0.0)),
            ],
        }];
        let mut skeleton = Skeleton::new(joints, vec![0.0, 1.0]).unwrap();
        let pose = skeleton.skinning_matrices(0.5)[0];
        let moved = pose.transform_point3(Vec3::ZERO);
        assert!((moved - Vec3::new(1.0, 0.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn time_wraps_around_the_track() {
        let joints = vec![Joint {
            parent: None,
            rest_local: Mat4::IDENTITY,
            keyframes: vec![
                Mat4::from_translation(Vec3::ZERO),
                Mat4::from_translation(Vec3::new(2.0, 0.0, 0.0)),
            ],
        }];
        let mut skeleton = Skeleton::new(joints, vec![0.0, 1.0]).unwrap();
        let wrapped = skeleton.skinning_matrices(1.5)[0].transform_point3(Vec3::ZERO);
        assert!((wrapped - Vec3::new(1.0, 0.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn rejects_child_before_parent() {
        let joints = vec![
            Joint {
                parent: Some(1),
                rest_local: Mat4::IDENTITY,
                keyframes: Vec::new(),
            },
            Joint {
                parent: None,
                rest_local: Mat4::IDENTITY,
                keyframes: Vec::new(),
            },
        ];
        assert!(Skeleton::new(joints, vec![0.0, 1.0]).is_err());
    }
}
