use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::crop::CropMode;
use crate::image_ops::Background;
use crate::normalize::ScaleStatistic;
use crate::{Result, SceneBatchError};

fn default_img_size() -> u32 {
    1024
}

fn default_true() -> bool {
    true
}

fn default_prefix() -> String {
    "images".to_string()
}

/// Where ground-truth cameras come from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationMode {
    /// No ground truth, only images are prepared.
    #[default]
    None,
    /// A COLMAP reconstruction directory such as `SCENE_DIR/sparse/0`.
    FromStore(Utf8PathBuf),
}

/// Options of a [`crate::SceneLoader`]. Built once and not changed by the
/// loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoaderConfig {
    pub scene_dir: Utf8PathBuf,
    /// Side of the square output images in pixels.
    #[serde(default = "default_img_size")]
    pub img_size: u32,
    #[serde(default = "default_true")]
    pub normalize_cameras: bool,
    #[serde(default)]
    pub scale_statistic: ScaleStatistic,
    #[serde(default = "default_true")]
    pub sort_by_filename: bool,
    /// Name of the image directory inside the scene directory.
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub calibration: CalibrationMode,
    #[serde(default)]
    pub crop_mode: CropMode,
    /// Pad images with white instead of black.
    #[serde(default)]
    pub white_background: bool,
    /// Limit on worker threads. The pool never exceeds
    /// [`crate::pool::MAX_WORKERS`] or the number of cores.
    #[serde(default)]
    pub num_workers: Option<usize>,
}

impl LoaderConfig {
    pub fn new(scene_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            scene_dir: scene_dir.into(),
            img_size: default_img_size(),
            normalize_cameras: true,
            scale_statistic: ScaleStatistic::default(),
            sort_by_filename: true,
            prefix: default_prefix(),
            calibration: CalibrationMode::None,
            crop_mode: CropMode::default(),
            white_background: false,
            num_workers: None,
        }
    }

    /// Read ground truth from `SCENE_DIR/sparse/0`.
    pub fn with_ground_truth(mut self) -> Self {
        self.calibration = CalibrationMode::FromStore(self.scene_dir.join("sparse").join("0"));
        self
    }

    pub fn from_yaml_path(path: impl AsRef<Utf8Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|e| SceneBatchError::io(path, e))?;
        let config: Self = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    pub fn background(&self) -> Background {
        if self.white_background {
            Background::White
        } else {
            Background::Black
        }
    }

    /// Checks which need no file system access.
    pub fn validate(&self) -> Result<()> {
        if self.scene_dir.as_str().trim().is_empty() {
            return Err(SceneBatchError::EmptySceneDir);
        }
        if self.img_size == 0 {
            return Err(SceneBatchError::InvalidImageSize);
        }
        Ok(())
    }
}
