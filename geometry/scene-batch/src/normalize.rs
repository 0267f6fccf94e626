//! Normalization of a camera sequence into a canonical frame.
//!
//! All cameras are re-expressed relative to the first camera, which becomes
//! the identity pose at the origin. Translations are then divided by a single
//! scale computed from the spread of the remaining cameras. The result does
//! not depend on the rotation, translation or scale of the input world frame.
//!
//! Cameras are in the PyTorch3D (row vector) convention.
use serde::{Deserialize, Serialize};

use crate::frame::Camera;
use crate::{Result, SceneBatchError};

/// Statistic of the relative translation norms used as the sequence scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleStatistic {
    #[default]
    MeanNorm,
    MaxNorm,
    /// Norm of all relative translations stacked into one matrix.
    FrobeniusNorm,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedCameras {
    pub cameras: Vec<Camera>,
    /// The factor all relative translations were divided by.
    pub scale: f64,
}

/// Normalize a sequence of cameras.
///
/// Fails with [`SceneBatchError::ZeroNormalizationScale`] when the scale is
/// exactly zero (for example when all cameras coincide) and with
/// [`SceneBatchError::NonFiniteTranslation`] when a translation is not finite
/// afterwards. A single camera has no spread, so its scale is undefined and
/// it fails with the latter.
///
/// Focal lengths and principal points are passed through unchanged.
pub fn normalize_cameras(cameras: &[Camera], statistic: ScaleStatistic) -> Result<NormalizedCameras> {
    let first = cameras.first().ok_or(SceneBatchError::EmptyCameraSet)?;
    let r0_t = first.rotation.transpose();
    let t0 = first.translation;

    let mut relative: Vec<Camera> = cameras
        .iter()
        .map(|cam| {
            let rotation = r0_t * cam.rotation;
            // Row vector form: T' = T - T0 R0^T R.
            let translation = cam.translation - rotation.transpose() * t0;
            Camera {
                rotation,
                translation,
                ..*cam
            }
        })
        .collect();

    let norms: Vec<f64> = relative[1..].iter().map(|c| c.translation.norm()).collect();
    let scale = if norms.is_empty() {
        f64::NAN
    } else {
        match statistic {
            ScaleStatistic::MeanNorm => norms.iter().sum::<f64>() / norms.len() as f64,
            ScaleStatistic::MaxNorm => norms.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            ScaleStatistic::FrobeniusNorm => norms.iter().map(|n| n * n).sum::<f64>().sqrt(),
        }
    };
    tracing::debug!("camera normalization scale {scale}");

    if scale == 0.0 {
        return Err(SceneBatchError::ZeroNormalizationScale);
    }

    for (i, cam) in relative.iter_mut().enumerate() {
        cam.translation /= scale;
        if cam.translation.iter().any(|v| !v.is_finite()) {
            return Err(SceneBatchError::NonFiniteTranslation { camera: i });
        }
    }

    Ok(NormalizedCameras {
        cameras: relative,
        scale,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Matrix3, Rotation3, Vector2, Vector3};

    fn cam(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Camera {
        Camera {
            rotation,
            translation,
            focal_length: Vector2::new(300.0, 310.0),
            principal_point: Vector2::new(256.0, 250.0),
        }
    }

    #[test]
    fn test_known_scale() {
        let cameras = [
            cam(Matrix3::identity(), Vector3::new(1.0, 0.0, 0.0)),
            cam(Matrix3::identity(), Vector3::new(4.0, 4.0, 0.0)),
            cam(Matrix3::identity(), Vector3::new(1.0, 0.0, 5.0)),
        ];
        let normalized = normalize_cameras(&cameras, ScaleStatistic::MeanNorm).unwrap();
        assert_eq!(normalized.scale, 5.0);
        assert_eq!(normalized.cameras[0].translation, Vector3::zeros());
        assert_eq!(normalized.cameras[1].translation, Vector3::new(0.6, 0.8, 0.0));
        assert_eq!(normalized.cameras[2].translation, Vector3::new(0.0, 0.0, 1.0));

        let max = normalize_cameras(&cameras[..2], ScaleStatistic::MaxNorm).unwrap();
        assert_eq!(max.scale, 5.0);
    }

    #[test]
    fn test_mean_and_max_differ() {
        let cameras = [
            cam(Matrix3::identity(), Vector3::zeros()),
            cam(Matrix3::identity(), Vector3::new(2.0, 0.0, 0.0)),
            cam(Matrix3::identity(), Vector3::new(0.0, 4.0, 0.0)),
        ];
        let mean = normalize_cameras(&cameras, ScaleStatistic::MeanNorm).unwrap();
        assert_eq!(mean.scale, 3.0);
        let max = normalize_cameras(&cameras, ScaleStatistic::MaxNorm).unwrap();
        assert_eq!(max.scale, 4.0);
    }

    #[test]
    fn test_frobenius_norm() {
        let cameras = [
            cam(Matrix3::identity(), Vector3::new(1.0, 1.0, 1.0)),
            cam(Matrix3::identity(), Vector3::new(4.0, 1.0, 1.0)),
            cam(Matrix3::identity(), Vector3::new(1.0, 5.0, 1.0)),
        ];
        // relative translations (3, 0, 0) and (0, 4, 0)
        let normalized = normalize_cameras(&cameras, ScaleStatistic::FrobeniusNorm).unwrap();
        assert_eq!(normalized.scale, 5.0);
        assert_eq!(normalized.cameras[1].translation, Vector3::new(0.6, 0.0, 0.0));
        assert_eq!(normalized.cameras[2].translation, Vector3::new(0.0, 0.8, 0.0));

        let mean = normalize_cameras(&cameras, ScaleStatistic::MeanNorm).unwrap();
        assert_eq!(mean.scale, 3.5);

        let yaml = serde_yaml::to_string(&ScaleStatistic::FrobeniusNorm).unwrap();
        assert_eq!(yaml.trim(), "frobenius_norm");
    }

    #[test]
    fn test_degenerate_sequence() {
        #[rustfmt::skip]
        let rot = Matrix3::new(
            0.0, -1.0, 0.0,
            1.0, 0.0, 0.0,
            0.0, 0.0, 1.0,
        );
        let cameras = vec![cam(rot, Vector3::new(1.0, 2.0, 3.0)); 4];
        let err = normalize_cameras(&cameras, ScaleStatistic::MeanNorm).unwrap_err();
        assert!(matches!(err, SceneBatchError::ZeroNormalizationScale));
        assert_eq!(err.kind(), crate::ErrorKind::Geometry);
    }

    #[test]
    fn test_single_camera_is_not_finite() {
        let cameras = [cam(Matrix3::identity(), Vector3::new(1.0, 2.0, 3.0))];
        let err = normalize_cameras(&cameras, ScaleStatistic::MeanNorm).unwrap_err();
        assert!(matches!(err, SceneBatchError::NonFiniteTranslation { camera: 0 }));
    }

    #[test]
    fn test_empty() {
        let err = normalize_cameras(&[], ScaleStatistic::MeanNorm).unwrap_err();
        assert!(matches!(err, SceneBatchError::EmptyCameraSet));
    }

    #[test]
    fn test_first_camera_is_canonical_and_intrinsics_kept() {
        let cameras = [
            cam(*Rotation3::from_euler_angles(0.2, 0.1, 0.0).matrix(), Vector3::new(0.3, 0.1, 2.0)),
            cam(*Rotation3::from_euler_angles(-0.2, 0.4, 0.1).matrix(), Vector3::new(1.3, 0.2, 2.5)),
            cam(*Rotation3::from_euler_angles(0.0, 0.9, 0.3).matrix(), Vector3::new(-0.7, 0.0, 1.5)),
        ];
        let normalized = normalize_cameras(&cameras, ScaleStatistic::MeanNorm).unwrap();
        approx::assert_abs_diff_eq!(normalized.cameras[0].rotation, Matrix3::identity(), epsilon = 1e-12);
        approx::assert_abs_diff_eq!(normalized.cameras[0].translation, Vector3::zeros(), epsilon = 1e-12);
        for (orig, norm) in cameras.iter().zip(normalized.cameras.iter()) {
            assert_eq!(orig.focal_length, norm.focal_length);
            assert_eq!(orig.principal_point, norm.principal_point);
            approx::assert_abs_diff_eq!(
                norm.rotation * norm.rotation.transpose(),
                Matrix3::identity(),
                epsilon = 1e-12
            );
        }
        let mean_norm: f64 = normalized.cameras[1..]
            .iter()
            .map(|c| c.translation.norm())
            .sum::<f64>()
            / 2.0;
        approx::assert_relative_eq!(mean_norm, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_invariant_to_world_similarity() {
        let cameras = [
            cam(*Rotation3::from_euler_angles(0.2, 0.1, 0.0).matrix(), Vector3::new(0.3, 0.1, 2.0)),
            cam(*Rotation3::from_euler_angles(-0.2, 0.4, 0.1).matrix(), Vector3::new(1.3, 0.2, 2.5)),
            cam(*Rotation3::from_euler_angles(0.0, 0.9, 0.3).matrix(), Vector3::new(-0.7, 0.0, 1.5)),
        ];

        // New world coordinates Y = s (X Q + d) in row vector form. Each
        // camera then has R' = Q^T R and T' = s (T - R^T Q d).
        let q = *Rotation3::from_euler_angles(1.0, -0.5, 2.0).matrix();
        let d = Vector3::new(3.0, -1.0, 0.5);
        let s = 7.5;
        let moved: Vec<Camera> = cameras
            .iter()
            .map(|c| Camera {
                rotation: q.transpose() * c.rotation,
                translation: s * (c.translation - c.rotation.transpose() * q * d),
                ..*c
            })
            .collect();

        let a = normalize_cameras(&cameras, ScaleStatistic::MeanNorm).unwrap();
        let b = normalize_cameras(&moved, ScaleStatistic::MeanNorm).unwrap();
        approx::assert_relative_eq!(b.scale, a.scale * s, epsilon = 1e-9);
        for (ca, cb) in a.cameras.iter().zip(b.cameras.iter()) {
            approx::assert_abs_diff_eq!(ca.rotation, cb.rotation, epsilon = 1e-9);
            approx::assert_abs_diff_eq!(ca.translation, cb.translation, epsilon = 1e-9);
        }
    }
}
