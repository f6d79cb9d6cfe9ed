//! First-person camera rig: yaw/pitch angles, movement speed, basis rebuild.

use glam::{Mat3, Vec2};

use crate::params::{AreaLight, Camera};

/// Lower/upper bound for the scroll-adjusted movement speed.
pub const SPEED_RANGE: (f32, f32) = (1e-3, 1e6);

/// Per-frame translation factor applied on top of the speed.
pub const MOVE_STEP: f32 = 0.07;

/// Camera orientation state that lives outside [`Camera`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraRig {
    /// Degrees: `x` = yaw (about +Y), `y` = pitch (about +X).
    pub rotation: Vec2,
    pub speed: f32,
}

impl Default for CameraRig {
    fn default() -> Self {
        Self {
            rotation: Vec2::ZERO,
            speed: 1.0,
        }
    }
}

/// Wrap an angle into `[0, 360)`.
pub fn wrap_degrees(angle: f32) -> f32 {
    let a = angle.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs.
    if a >= 360.0 {
        0.0
    } else {
        a
    }
}

impl CameraRig {
    pub fn wrap(&mut self) {
        self.rotation.x = wrap_degrees(self.rotation.x);
        self.rotation.y = wrap_degrees(self.rotation.y);
    }

    /// Wrap the angles, then rebuild the camera basis from the rows of
    /// `Rx(pitch) * Ry(yaw)`. The camera looks down the negative third row.
    pub fn apply(&mut self, camera: &mut Camera) {
        self.wrap();
        let rot = Mat3::from_rotation_x(self.rotation.y.to_radians())
            * Mat3::from_rotation_y(self.rotation.x.to_radians());
        let rows = rot.transpose();
        camera.right = rows.x_axis;
        camera.up = rows.y_axis;
        camera.direction = -rows.z_axis;
    }

    /// Scroll wheel: up multiplies the speed by 1.2, down divides.
    pub fn scroll(&mut self, delta: f32) {
        let speed = if delta > 0.0 {
            self.speed * 1.2
        } else {
            self.speed / 1.2
        };
        self.speed = speed.clamp(SPEED_RANGE.0, SPEED_RANGE.1);
    }

    /// Distance moved per held-key frame.
    pub fn step(&self) -> f32 {
        self.speed * MOVE_STEP
    }
}

/// Place the area light just behind the camera, facing where it looks.
pub fn aim_light(light: &mut AreaLight, camera: &Camera) {
    light.right = camera.right;
    light.up = camera.up;
    light.normal = camera.direction;
    light.position = camera.position - 0.01 * camera.direction;
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn close(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-5
    }

    #[test]
    fn test_wrap() {
        assert_eq!(wrap_degrees(361.0), 1.0);
        assert_eq!(wrap_degrees(-1.0), 359.0);
        assert_eq!(wrap_degrees(360.0), 0.0);
        assert_eq!(wrap_degrees(0.0), 0.0);
        assert!(wrap_degrees(-1e-9) < 360.0);
        assert_eq!(wrap_degrees(725.0), 5.0);
    }

    #[test]
    fn test_identity_basis_matches_default_camera() {
        let mut rig = CameraRig::default();
        let mut cam = Camera::default();
        rig.apply(&mut cam);
        let def = Camera::default();
        assert!(close(cam.right, def.right));
        assert!(close(cam.up, def.up));
        assert!(close(cam.direction, def.direction));
    }

    #[test]
    fn test_yaw_turns_right_and_pitch_looks_down() {
        let mut cam = Camera::default();
        let mut rig = CameraRig {
            rotation: Vec2::new(90.0, 0.0),
            ..CameraRig::default()
        };
        rig.apply(&mut cam);
        assert!(close(cam.direction, Vec3::X));

        rig.rotation = Vec2::new(0.0, 90.0);
        rig.apply(&mut cam);
        assert!(close(cam.direction, Vec3::NEG_Y));
    }

    #[test]
    fn test_basis_orthonormal() {
        let mut cam = Camera::default();
        let mut rig = CameraRig {
            rotation: Vec2::new(-37.0, 412.0),
            ..CameraRig::default()
        };
        rig.apply(&mut cam);
        assert_eq!(rig.rotation, Vec2::new(323.0, 52.0));
        assert!(cam.right.dot(cam.up).abs() < 1e-5);
        assert!(cam.right.dot(cam.direction).abs() < 1e-5);
        assert!((cam.direction.length() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_scroll_clamped() {
        let mut rig = CameraRig::default();
        rig.scroll(1.0);
        assert!((rig.speed - 1.2).abs() < 1e-6);
        for _ in 0..200 {
            rig.scroll(-1.0);
        }
        assert_eq!(rig.speed, SPEED_RANGE.0);
    }

    #[test]
    fn test_aim_light() {
        let cam = Camera::default();
        let mut light = AreaLight::default();
        aim_light(&mut light, &cam);
        assert_eq!(light.normal, cam.direction);
        assert!(close(light.position, Vec3::new(0.0, 1.0, 3.51)));
    }
}
