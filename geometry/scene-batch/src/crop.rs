//! Crop boxes and the crop descriptor stored alongside every prepared frame.
use serde::{Deserialize, Serialize};

use crate::{Result, SceneBatchError};

/// Axis-aligned integer box `[left, top, right, bottom]` in pixel coordinates.
///
/// The box may extend outside of the image. The right and bottom edges are
/// exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: i64,
    pub top: i64,
    pub right: i64,
    pub bottom: i64,
}

impl BoundingBox {
    pub fn new(left: i64, top: i64, right: i64, bottom: i64) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// The square box of side `max(width, height)` centered on the image.
    pub fn center_square(width: u32, height: u32) -> Self {
        let (width, height) = (i64::from(width), i64::from(height));
        let side = width.max(height);
        let left = (width - side).div_euclid(2);
        let top = (height - side).div_euclid(2);
        Self::new(left, top, left + side, top + side)
    }

    pub fn width(&self) -> i64 {
        self.right - self.left
    }

    pub fn height(&self) -> i64 {
        self.bottom - self.top
    }

    /// The box as `[x, y, width, height]`.
    pub fn to_xywh(&self) -> [f64; 4] {
        [
            self.left as f64,
            self.top as f64,
            self.width() as f64,
            self.height() as f64,
        ]
    }

    pub fn as_array(&self) -> [i64; 4] {
        [self.left, self.top, self.right, self.bottom]
    }
}

/// How the crop box of each frame is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CropMode {
    /// Square box of side `max(w, h)` centered on the image.
    #[default]
    CenterSquare,
    /// The same fixed box for every frame.
    ExplicitBox(BoundingBox),
}

impl CropMode {
    /// Resolve the crop box for an image and the side length the box was
    /// built from.
    pub fn resolve(&self, width: u32, height: u32) -> Result<(BoundingBox, u32)> {
        match self {
            CropMode::CenterSquare => Ok((
                BoundingBox::center_square(width, height),
                width.max(height),
            )),
            CropMode::ExplicitBox(bbox) => {
                if bbox.width() <= 0 || bbox.height() <= 0 {
                    return Err(SceneBatchError::InvalidBoundingBox { bbox: *bbox });
                }
                let side = bbox.width().max(bbox.height());
                let side =
                    u32::try_from(side).map_err(|_| SceneBatchError::InvalidBoundingBox {
                        bbox: *bbox,
                    })?;
                Ok((*bbox, side))
            }
        }
    }
}

/// Crop geometry of one frame, needed to map results back to the original
/// image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropDescriptor {
    pub orig_width: u32,
    pub orig_height: u32,
    /// Crop width in NDC-like units, independent of the absolute pixel size.
    pub crop_width_ndc: f64,
    /// `max(w, h) / min(w, h)`, always `>= 1`.
    pub scale_factor: f64,
    /// The crop box rescaled to the target resolution.
    pub bbox_after_resize: [f64; 4],
}

impl CropDescriptor {
    /// The flat row stored in the batch's `crop_params`:
    /// `[w, h, crop_width, scale, x0, y0, x1, y1]`.
    pub fn to_array(&self) -> [f32; 8] {
        let b = &self.bbox_after_resize;
        [
            self.orig_width as f32,
            self.orig_height as f32,
            self.crop_width_ndc as f32,
            self.scale_factor as f32,
            b[0] as f32,
            b[1] as f32,
            b[2] as f32,
            b[3] as f32,
        ]
    }
}

/// Center of `bbox` expressed in the image padded to a square of side
/// `max(w, h)`.
pub fn crop_center_in_square_frame(width: u32, height: u32, bbox: &BoundingBox) -> [f64; 2] {
    let (w, h) = (f64::from(width), f64::from(height));
    let length = w.max(h);
    [
        (bbox.left + bbox.right) as f64 / 2.0 + (length - w) / 2.0,
        (bbox.top + bbox.bottom) as f64 / 2.0 + (length - h) / 2.0,
    ]
}

/// Compute the crop descriptor of an image of size `width x height` cropped
/// with `bbox`, where `bbox` was built from a square of side `crop_dim` and
/// is resized to `img_size`.
pub fn calculate_crop_parameters(
    width: u32,
    height: u32,
    bbox: &BoundingBox,
    crop_dim: u32,
    img_size: u32,
) -> CropDescriptor {
    let (w, h) = (f64::from(width), f64::from(height));
    let length = w.max(h);
    let s = length / w.min(h);
    let crop_width_ndc = 2.0 * s * bbox.width() as f64 / length;
    let bbox_after_resize = bbox
        .as_array()
        .map(|v| v as f64 / f64::from(crop_dim) * f64::from(img_size));
    CropDescriptor {
        orig_width: width,
        orig_height: height,
        crop_width_ndc,
        scale_factor: s,
        bbox_after_resize,
    }
}
