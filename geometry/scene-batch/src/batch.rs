use camino::Utf8PathBuf;
use nalgebra::{Matrix3, Vector3};
use ndarray::{Array2, Array4};
use serde::Serialize;

use crate::frame::Camera;

/// Number of values per frame in [`Batch::crop_params`].
pub const CROP_PARAMS_LEN: usize = 8;

/// Ground-truth cameras of a batch, in the same frame order as the images.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraBatch {
    /// Rotations as read from the calibration store (OpenCV convention).
    pub raw_rotations: Vec<Matrix3<f64>>,
    pub raw_translations: Vec<Vector3<f64>>,
    /// Cameras in the PyTorch3D convention with intrinsics of the prepared
    /// images, normalized when requested.
    pub cameras: Vec<Camera>,
    /// Set when the cameras were normalized.
    pub normalization_scale: Option<f64>,
}

impl CameraBatch {
    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }
}

/// The prepared frames of one sequence.
#[derive(Debug, Clone)]
pub struct Batch {
    pub sequence_name: String,
    /// Number of frames in the whole sequence, not only in this batch.
    pub frame_count: usize,
    /// `N x 3 x S x S`, values in `[0, 1]`.
    pub images: Array4<f32>,
    /// `N x 1 x S x S`, present when the scene has a `masks` directory.
    pub masks: Option<Array4<f32>>,
    /// `N x 8`, one [`crate::CropDescriptor::to_array`] row per frame.
    pub crop_params: Array2<f32>,
    pub scene_root: Utf8PathBuf,
    pub cameras: Option<CameraBatch>,
}

impl Batch {
    /// Number of frames in this batch.
    pub fn len(&self) -> usize {
        self.images.shape()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
