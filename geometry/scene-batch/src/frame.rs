use camino::Utf8PathBuf;
use nalgebra::{Matrix3, Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::convention::Extrinsics;
use crate::intrinsics::PixelIntrinsics;

/// Ground truth for one image as read from the calibration store, in the
/// OpenCV/COLMAP convention and original pixel units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
    pub focal_length: Vector2<f64>,
    pub principal_point: Vector2<f64>,
}

impl CalibrationRecord {
    pub fn extrinsics(&self) -> Extrinsics {
        Extrinsics::new(self.rotation, self.translation)
    }

    pub fn intrinsics(&self) -> PixelIntrinsics {
        PixelIntrinsics::new(self.focal_length, self.principal_point)
    }
}

/// One image of a sequence. Created when the scene is scanned and not
/// modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameRecord {
    pub image_path: Utf8PathBuf,
    /// Present when ground truth was requested.
    pub calibration: Option<CalibrationRecord>,
}

impl FrameRecord {
    pub fn image_name(&self) -> &str {
        self.image_path.file_name().unwrap_or(self.image_path.as_str())
    }
}

/// A camera in the PyTorch3D convention with intrinsics in pixels of the
/// prepared (cropped and resized) image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
    pub focal_length: Vector2<f64>,
    pub principal_point: Vector2<f64>,
}

impl Camera {
    pub fn from_parts(extrinsics: &Extrinsics, intrinsics: &PixelIntrinsics) -> Self {
        Self {
            rotation: extrinsics.rotation,
            translation: extrinsics.translation,
            focal_length: intrinsics.focal_length,
            principal_point: intrinsics.principal_point,
        }
    }

    /// Camera center in world coordinates.
    pub fn center(&self) -> Vector3<f64> {
        // X_cam = X_world R + T (row vectors), so the center is -T R^T.
        -(self.rotation * self.translation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center() {
        // Camera at (1, 2, 3) looking along +z with no rotation.
        let camera = Camera {
            rotation: Matrix3::identity(),
            translation: Vector3::new(-1.0, -2.0, -3.0),
            focal_length: Vector2::new(1.0, 1.0),
            principal_point: Vector2::zeros(),
        };
        assert_eq!(camera.center(), Vector3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_image_name() {
        let frame = FrameRecord {
            image_path: Utf8PathBuf::from("scene/images/001.jpg"),
            calibration: None,
        };
        assert_eq!(frame.image_name(), "001.jpg");
    }
}
