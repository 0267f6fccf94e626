//! Carry pinhole intrinsics through a crop and a resize.
//!
//! Both adjustments work in pixel units. A crop shifts the principal point by
//! the crop origin and leaves the focal length alone; a resize scales focal
//! length and principal point by the per-axis size ratio.
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

/// Focal length and principal point, both in pixels, `(x, y)` order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelIntrinsics {
    pub focal_length: Vector2<f64>,
    pub principal_point: Vector2<f64>,
}

impl PixelIntrinsics {
    pub fn new(focal_length: Vector2<f64>, principal_point: Vector2<f64>) -> Self {
        Self {
            focal_length,
            principal_point,
        }
    }

    /// Intrinsics of the image cropped with `bbox_xywh = [x, y, w, h]`.
    pub fn cropped(&self, bbox_xywh: &[f64; 4]) -> Self {
        let offset = Vector2::new(bbox_xywh[0], bbox_xywh[1]);
        Self {
            focal_length: self.focal_length,
            principal_point: self.principal_point - offset,
        }
    }

    /// Intrinsics of the image resized from `original_size_wh` to
    /// `new_size_wh`.
    pub fn rescaled(&self, original_size_wh: &Vector2<f64>, new_size_wh: &Vector2<f64>) -> Self {
        let scale = new_size_wh.component_div(original_size_wh);
        Self {
            focal_length: self.focal_length.component_mul(&scale),
            principal_point: self.principal_point.component_mul(&scale),
        }
    }
}

/// Recompute intrinsics for a crop with box `[x, y, w, h]`.
pub fn adjust_camera_to_bbox_crop(
    focal_length: &Vector2<f64>,
    principal_point: &Vector2<f64>,
    bbox_xywh: &[f64; 4],
) -> (Vector2<f64>, Vector2<f64>) {
    let adjusted = PixelIntrinsics::new(*focal_length, *principal_point).cropped(bbox_xywh);
    (adjusted.focal_length, adjusted.principal_point)
}

/// Recompute intrinsics for a resize from `original_size_wh` to
/// `new_size_wh`.
pub fn adjust_camera_to_image_scale(
    focal_length: &Vector2<f64>,
    principal_point: &Vector2<f64>,
    original_size_wh: &Vector2<f64>,
    new_size_wh: &Vector2<f64>,
) -> (Vector2<f64>, Vector2<f64>) {
    let adjusted = PixelIntrinsics::new(*focal_length, *principal_point)
        .rescaled(original_size_wh, new_size_wh);
    (adjusted.focal_length, adjusted.principal_point)
}
