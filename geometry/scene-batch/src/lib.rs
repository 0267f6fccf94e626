//! Preparation of multi-view image batches for learned 3D reconstruction.
//!
//! A scene directory of raw images (optionally with masks and a COLMAP
//! calibration store) is turned into a single [`Batch`]: every image is
//! square-cropped (padding where the crop box leaves the image), resized to
//! one target resolution and stacked into a `N x 3 x S x S` array, together
//! with per-frame crop descriptors that allow mapping model outputs back to
//! the original pixels.
//!
//! When ground truth is requested, camera intrinsics are carried through the
//! same crop and resize, extrinsics are converted from the OpenCV/COLMAP
//! convention to the PyTorch3D convention and the whole sequence is
//! optionally normalized into a canonical frame.
//!
//! ## Scene layout
//!
//! ```text
//! SCENE_DIR/
//!   images/      source images (the directory name is configurable)
//!   masks/       optional, one mask per image with the same file name
//!   sparse/0/    optional COLMAP reconstruction (text or binary)
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use scene_batch::{LoaderConfig, SceneLoader, SequenceSelector};
//!
//! let config = LoaderConfig::new("data/kitchen").with_ground_truth();
//! let loader = SceneLoader::new(config)?;
//! let (batch, image_paths) = loader.get_data(SequenceSelector::Index(0), None)?;
//! assert_eq!(batch.images.shape()[0], image_paths.len());
//! # Ok::<(), scene_batch::SceneBatchError>(())
//! ```
#![deny(rust_2018_idioms)]
use camino::Utf8PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SceneBatchError {
    #[error("scene directory must not be empty")]
    EmptySceneDir,
    #[error("scene directory \"{path}\" does not exist")]
    SceneDirNotFound { path: Utf8PathBuf },
    #[error("no images found in \"{dir}\"")]
    NoImages { dir: Utf8PathBuf },
    #[error("target resolution must be positive")]
    InvalidImageSize,
    #[error("unknown sequence \"{name}\"")]
    UnknownSequence { name: String },
    #[error("sequence index {index} out of range ({len} sequences)")]
    SequenceIndexOutOfRange { index: usize, len: usize },
    #[error("frame index {index} out of range ({len} frames)")]
    FrameIndexOutOfRange { index: usize, len: usize },
    #[error("no frames selected")]
    EmptySelection,
    #[error("invalid bounding box {bbox:?}")]
    InvalidBoundingBox { bbox: crop::BoundingBox },
    #[error("path is not valid UTF-8: {}", path.display())]
    NonUtf8Path { path: std::path::PathBuf },
    #[error("invalid configuration: {source}")]
    Config {
        #[from]
        source: serde_yaml::Error,
    },
    #[error("invalid glob pattern: {source}")]
    Glob {
        #[from]
        source: glob::PatternError,
    },
    #[error("IO error on \"{path}\": {source}")]
    Io {
        path: Utf8PathBuf,
        source: std::io::Error,
    },
    #[error("failed to read image \"{path}\": {source}")]
    ImageDecode {
        path: Utf8PathBuf,
        source: image::ImageError,
    },
    #[error("malformed calibration file \"{path}\": {msg}")]
    MalformedCalibration { path: Utf8PathBuf, msg: String },
    #[error("unsupported camera model \"{model}\"")]
    UnsupportedCameraModel { model: String },
    #[error("no calibration for image \"{image_name}\"")]
    MissingCalibration { image_name: String },
    #[error("invalid shape: {msg}")]
    InvalidShape { msg: String },
    #[error("ndarray shape error: {source}")]
    Shape {
        #[from]
        source: ndarray::ShapeError,
    },
    #[error("could not build worker pool: {source}")]
    WorkerPool {
        #[from]
        source: rayon::ThreadPoolBuildError,
    },
    #[error("no cameras to normalize")]
    EmptyCameraSet,
    #[error("error in normalizing cameras: camera scale was 0")]
    ZeroNormalizationScale,
    #[error("non-finite translation for camera {camera} after normalization")]
    NonFiniteTranslation { camera: usize },
}

/// Broad category of a [`SceneBatchError`], useful to decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller supplied bad paths or options.
    Configuration,
    /// A file could not be read or decoded.
    Io,
    /// The camera geometry is degenerate or numerically unusable.
    Geometry,
    /// Data required for the request is missing or inconsistent.
    Contract,
}

impl SceneBatchError {
    pub fn kind(&self) -> ErrorKind {
        use SceneBatchError::*;
        match self {
            EmptySceneDir
            | SceneDirNotFound { .. }
            | NoImages { .. }
            | InvalidImageSize
            | UnknownSequence { .. }
            | SequenceIndexOutOfRange { .. }
            | FrameIndexOutOfRange { .. }
            | EmptySelection
            | InvalidBoundingBox { .. }
            | NonUtf8Path { .. }
            | Config { .. }
            | Glob { .. } => ErrorKind::Configuration,
            Io { .. }
            | ImageDecode { .. }
            | MalformedCalibration { .. }
            | WorkerPool { .. } => ErrorKind::Io,
            EmptyCameraSet | ZeroNormalizationScale | NonFiniteTranslation { .. } => {
                ErrorKind::Geometry
            }
            UnsupportedCameraModel { .. }
            | MissingCalibration { .. }
            | InvalidShape { .. }
            | Shape { .. } => ErrorKind::Contract,
        }
    }

    pub(crate) fn io(path: impl Into<Utf8PathBuf>, source: std::io::Error) -> Self {
        SceneBatchError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<M> = std::result::Result<M, SceneBatchError>;

pub mod colmap;
pub mod convention;
pub mod crop;
pub mod image_ops;
pub mod intrinsics;
pub mod normalize;
pub mod pool;

mod batch;
pub use crate::batch::{Batch, CameraBatch, CROP_PARAMS_LEN};

mod config;
pub use crate::config::{CalibrationMode, LoaderConfig};

mod frame;
pub use crate::frame::{CalibrationRecord, Camera, FrameRecord};

mod loader;
pub use crate::loader::{SceneLoader, SequenceSelector};

pub use crate::convention::Extrinsics;
pub use crate::crop::{BoundingBox, CropDescriptor, CropMode};
