//! Conversion of camera extrinsics between axis conventions.
//!
//! The calibration store uses the OpenCV/COLMAP convention: a world point
//! `X` (column vector) maps to camera coordinates as `R X + t`, with +x right,
//! +y down and +z forward. The reconstruction engine uses the PyTorch3D
//! convention: row vectors (`X^T R' + t'`) with +x left and +y up.
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/// World-to-camera rotation and translation of one camera.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extrinsics {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
}

const FLIP_XY: [f64; 3] = [-1.0, -1.0, 1.0];

impl Extrinsics {
    pub fn new(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Convert OpenCV/COLMAP extrinsics to the PyTorch3D convention.
    ///
    /// The rotation is transposed, then its first two columns and the first
    /// two translation components are negated. Applying this twice does not
    /// give back the input; use [`Extrinsics::pytorch3d_to_opencv`].
    pub fn opencv_to_pytorch3d(&self) -> Self {
        let flip = Matrix3::from_diagonal(&Vector3::from(FLIP_XY));
        Self {
            rotation: self.rotation.transpose() * flip,
            translation: flip * self.translation,
        }
    }

    /// Inverse of [`Extrinsics::opencv_to_pytorch3d`].
    pub fn pytorch3d_to_opencv(&self) -> Self {
        let flip = Matrix3::from_diagonal(&Vector3::from(FLIP_XY));
        Self {
            rotation: (self.rotation * flip).transpose(),
            translation: flip * self.translation,
        }
    }
}

/// Convert a whole batch of OpenCV/COLMAP extrinsics to PyTorch3D.
pub fn opencv_to_pytorch3d(batch: &[Extrinsics]) -> Vec<Extrinsics> {
    batch.iter().map(Extrinsics::opencv_to_pytorch3d).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Rotation3;

    #[test]
    fn test_identity_reference() {
        let converted = Extrinsics::new(Matrix3::identity(), Vector3::zeros()).opencv_to_pytorch3d();
        assert_eq!(
            converted.rotation,
            Matrix3::from_diagonal(&Vector3::new(-1.0, -1.0, 1.0))
        );
        assert_eq!(converted.translation, Vector3::zeros());
    }

    #[test]
    fn test_fixed_point() {
        // A quarter turn about z is unchanged by the conversion.
        let rot = *Rotation3::from_axis_angle(&Vector3::z_axis(), std::f64::consts::FRAC_PI_2)
            .matrix();
        let converted = Extrinsics::new(rot, Vector3::zeros()).opencv_to_pytorch3d();
        approx::assert_abs_diff_eq!(converted.rotation, rot, epsilon = 1e-12);
        assert_eq!(converted.translation, Vector3::zeros());
    }

    #[test]
    fn test_known_values() {
        #[rustfmt::skip]
        let rot = Matrix3::new(
            1.0, 2.0, 3.0,
            4.0, 5.0, 6.0,
            7.0, 8.0, 9.0,
        );
        let converted = Extrinsics::new(rot, Vector3::new(1.0, 2.0, 3.0)).opencv_to_pytorch3d();
        #[rustfmt::skip]
        let expected = Matrix3::new(
            -1.0, -4.0, 7.0,
            -2.0, -5.0, 8.0,
            -3.0, -6.0, 9.0,
        );
        assert_eq!(converted.rotation, expected);
        assert_eq!(converted.translation, Vector3::new(-1.0, -2.0, 3.0));
    }

    #[test]
    fn test_orthonormal_and_invertible() {
        let rot = *Rotation3::from_euler_angles(0.3, -1.1, 2.0).matrix();
        let orig = Extrinsics::new(rot, Vector3::new(0.5, -0.2, 4.0));
        let converted = orig.opencv_to_pytorch3d();
        approx::assert_abs_diff_eq!(
            converted.rotation * converted.rotation.transpose(),
            Matrix3::identity(),
            epsilon = 1e-12
        );
        approx::assert_relative_eq!(converted.rotation.determinant(), 1.0, epsilon = 1e-12);

        let back = converted.pytorch3d_to_opencv();
        approx::assert_abs_diff_eq!(back.rotation, orig.rotation, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(back.translation, orig.translation, epsilon = 1e-12);
    }

    #[test]
    fn test_projection_agrees() {
        // The same world point lands at the same camera-space location up to
        // the x/y flip.
        let rot = *Rotation3::from_euler_angles(0.1, 0.2, 0.3).matrix();
        let orig = Extrinsics::new(rot, Vector3::new(1.0, -2.0, 5.0));
        let converted = orig.opencv_to_pytorch3d();
        let world = Vector3::new(0.3, 0.7, -1.2);

        let cam_cv = orig.rotation * world + orig.translation;
        let cam_pt3d = (world.transpose() * converted.rotation).transpose() + converted.translation;
        approx::assert_abs_diff_eq!(
            cam_pt3d,
            Vector3::new(-cam_cv.x, -cam_cv.y, cam_cv.z),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_batch() {
        let batch = [
            Extrinsics::new(Matrix3::identity(), Vector3::new(1.0, 1.0, 1.0)),
            Extrinsics::new(Matrix3::identity(), Vector3::new(2.0, 2.0, 2.0)),
        ];
        let converted = opencv_to_pytorch3d(&batch);
        assert_eq!(converted.len(), 2);
        assert_eq!(converted[1].translation, Vector3::new(-2.0, -2.0, 2.0));
    }
}
