//! Per-eye view poses.

use glam::{EulerRot, Quat, Vec3};

/// Field of view of one eye, as half-angles in radians.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Fov {
    pub angle_left: f32,
    pub angle_right: f32,
    pub angle_up: f32,
    pub angle_down: f32,
}

impl Fov {
    /// Symmetric field of view of `degrees` horizontally and vertically.
    pub fn symmetric(degrees: f32) -> Self {
        let half = (degrees / 2.0).to_radians();
        Self {
            angle_left: -half,
            angle_right: half,
            angle_up: half,
            angle_down: -half,
        }
    }
}

/// Where one eye is and where it looks, at the predicted display time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewPose {
    pub orientation: Quat,
    pub position: Vec3,
    pub fov: Fov,
}

impl ViewPose {
    pub fn new(orientation: Quat, position: Vec3, fov: Fov) -> Self {
        Self {
            orientation,
            position,
            fov,
        }
    }

    /// Head orientation as (roll, pitch, yaw) in degrees.
    ///
    /// Roll is about X, pitch about Y and yaw about Z, applied yaw first.
    pub fn roll_pitch_yaw_degrees(&self) -> (f32, f32, f32) {
        let (yaw, pitch, roll) = self.orientation.normalize().to_euler(EulerRot::ZYX);
        (roll.to_degrees(), pitch.to_degrees(), yaw.to_degrees())
    }
}

impl Default for ViewPose {
    fn default() -> Self {
        Self::new(Quat::IDENTITY, Vec3::ZERO, Fov::symmetric(90.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn test_identity_is_level() {
        let (roll, pitch, yaw) = ViewPose::default().roll_pitch_yaw_degrees();
        assert!(close(roll, 0.0) && close(pitch, 0.0) && close(yaw, 0.0));
    }

    #[test]
    fn test_single_axis_rotations() {
        let pose = |q| ViewPose::new(q, Vec3::ZERO, Fov::symmetric(90.0));

        let (roll, pitch, yaw) = pose(Quat::from_rotation_x(20f32.to_radians())).roll_pitch_yaw_degrees();
        assert!(close(roll, 20.0) && close(pitch, 0.0) && close(yaw, 0.0));

        let (roll, pitch, yaw) = pose(Quat::from_rotation_y(-35f32.to_radians())).roll_pitch_yaw_degrees();
        assert!(close(roll, 0.0) && close(pitch, -35.0) && close(yaw, 0.0));

        let (roll, pitch, yaw) = pose(Quat::from_rotation_z(120f32.to_radians())).roll_pitch_yaw_degrees();
        assert!(close(roll, 0.0) && close(pitch, 0.0) && close(yaw, 120.0));
    }

    #[test]
    fn test_symmetric_fov() {
        let fov = Fov::symmetric(90.0);
        assert!(close(fov.angle_right, std::f32::consts::FRAC_PI_4));
        assert!(close(fov.angle_left, -fov.angle_right));
    }
}
