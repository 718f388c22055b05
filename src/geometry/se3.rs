//! SE(3) rigid transform stored as a unit quaternion plus a translation.
//!
//! Poses follow the host pipeline convention: `T_wc` maps points from the
//! camera frame into the world frame.

use nalgebra::{Matrix3, Matrix4, Rotation3, UnitQuaternion, Vector3};

/// Rigid body transform (rotation + translation).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SE3 {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
}

impl SE3 {
    /// Identity transform.
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Build from a rotation matrix and translation.
    ///
    /// The matrix is re-orthonormalized through the quaternion conversion.
    pub fn from_rt(rotation: &Matrix3<f64>, translation: Vector3<f64>) -> Self {
        let rot = Rotation3::from_matrix(rotation);
        Self {
            rotation: UnitQuaternion::from_rotation_matrix(&rot),
            translation,
        }
    }

    /// Build from a unit quaternion and translation.
    pub fn from_quaternion(rotation: UnitQuaternion<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Build from a homogeneous 4x4 matrix.
    pub fn from_matrix(m: &Matrix4<f64>) -> Self {
        let r: Matrix3<f64> = m.fixed_view::<3, 3>(0, 0).into_owned();
        let t = Vector3::new(m[(0, 3)], m[(1, 3)], m[(2, 3)]);
        Self::from_rt(&r, t)
    }

    /// Homogeneous 4x4 matrix.
    pub fn to_matrix(&self) -> Matrix4<f64> {
        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(self.rotation.to_rotation_matrix().matrix());
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        m
    }

    /// 3x3 rotation matrix.
    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        *self.rotation.to_rotation_matrix().matrix()
    }

    /// Inverse transform: `T⁻¹ = [Rᵀ | -Rᵀ t]`.
    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.inverse();
        Self {
            rotation,
            translation: -(rotation * self.translation),
        }
    }

    /// Composition `self * other` (apply `other` first).
    pub fn compose(&self, other: &SE3) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    /// Apply the transform to a point.
    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * p + self.translation
    }

    /// Motion from `previous` to `self`: `previous⁻¹ * self`.
    pub fn relative_to(&self, previous: &SE3) -> Self {
        previous.inverse().compose(self)
    }

    /// Extrinsic ZYX Euler angles of the rotation, returned as `(z, y, x)`.
    ///
    /// `R = Rz(z) * Ry(y) * Rx(x)`. At the `y = ±π/2` singularity the split
    /// between `z` and `x` is arbitrary.
    pub fn euler_zyx(&self) -> Vector3<f64> {
        let (roll, pitch, yaw) = self.rotation.euler_angles();
        Vector3::new(yaw, pitch, roll)
    }
}

impl Default for SE3 {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    fn sample_pose() -> SE3 {
        SE3::from_quaternion(
            UnitQuaternion::from_euler_angles(0.1, -0.2, 0.3),
            Vector3::new(1.0, 2.0, 3.0),
        )
    }

    #[test]
    fn test_inverse_composes_to_identity() {
        let t = sample_pose();
        let id = t.compose(&t.inverse());

        assert_relative_eq!(id.translation, Vector3::zeros(), epsilon = 1e-12);
        assert_relative_eq!(id.rotation.angle(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_matrix_roundtrip_preserves_points() {
        let t = sample_pose();
        let back = SE3::from_matrix(&t.to_matrix());
        let p = Vector3::new(-0.5, 4.0, 2.5);

        assert_relative_eq!(back.transform_point(&p), t.transform_point(&p), epsilon = 1e-10);
    }

    #[test]
    fn test_relative_to_identity_is_self() {
        let t = sample_pose();
        let rel = t.relative_to(&SE3::identity());

        assert_relative_eq!(rel.translation, t.translation, epsilon = 1e-12);
        assert_relative_eq!(rel.rotation.angle_to(&t.rotation), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_euler_zyx_pure_yaw() {
        let t = SE3::from_quaternion(
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), FRAC_PI_2),
            Vector3::zeros(),
        );
        let e = t.euler_zyx();

        assert_relative_eq!(e.x, FRAC_PI_2, epsilon = 1e-9);
        assert_relative_eq!(e.y, 0.0, epsilon = 1e-9);
        assert_relative_eq!(e.z, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_euler_zyx_reconstructs_rotation() {
        let t = sample_pose();
        let e = t.euler_zyx();
        let r = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), e.x)
            * UnitQuaternion::from_axis_angle(&Vector3::y_axis(), e.y)
            * UnitQuaternion::from_axis_angle(&Vector3::x_axis(), e.z);

        assert_relative_eq!(r.angle_to(&t.rotation), 0.0, epsilon = 1e-9);
    }
}
