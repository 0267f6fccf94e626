use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use nalgebra::Vector2;
use ndarray::{Array2, Array3, ArrayView3, Axis};

use crate::batch::{Batch, CROP_PARAMS_LEN, CameraBatch};
use crate::colmap::Reconstruction;
use crate::config::{CalibrationMode, LoaderConfig};
use crate::convention::{self, Extrinsics};
use crate::crop::{CropDescriptor, calculate_crop_parameters, crop_center_in_square_frame};
use crate::frame::{Camera, FrameRecord};
use crate::image_ops::{self, Background, SquareResize};
use crate::intrinsics::{
    PixelIntrinsics, adjust_camera_to_bbox_crop, adjust_camera_to_image_scale,
};
use crate::normalize::normalize_cameras;
use crate::pool::TaskPool;
use crate::{Result, SceneBatchError};

const MASK_DIR: &str = "masks";

/// Which sequence to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceSelector<'a> {
    /// Position in [`SceneLoader::sequence_list`].
    Index(usize),
    Name(&'a str),
}

/// Output of the per-frame worker.
struct PreparedFrame {
    image: Array3<f32>,
    mask: Option<Array3<f32>>,
    crop: CropDescriptor,
    intrinsics: Option<PixelIntrinsics>,
}

/// Scans a scene directory once and prepares batches from it on request.
#[derive(Debug)]
pub struct SceneLoader {
    config: LoaderConfig,
    have_mask: bool,
    sequences: BTreeMap<String, Vec<FrameRecord>>,
    sequence_list: Vec<String>,
}

impl SceneLoader {
    pub fn new(config: LoaderConfig) -> Result<Self> {
        config.validate()?;
        let scene_dir = &config.scene_dir;
        if !scene_dir.is_dir() {
            return Err(SceneBatchError::SceneDirNotFound {
                path: scene_dir.clone(),
            });
        }
        let sequence_name = scene_dir
            .file_name()
            .unwrap_or(scene_dir.as_str())
            .to_string();

        let image_dir = scene_dir.join(&config.prefix);
        let have_mask = scene_dir.join(MASK_DIR).is_dir();
        let image_paths = list_images(&image_dir, have_mask)?;
        if image_paths.is_empty() {
            return Err(SceneBatchError::NoImages { dir: image_dir });
        }

        let calibration = match &config.calibration {
            CalibrationMode::None => None,
            CalibrationMode::FromStore(store) => {
                Some(Reconstruction::read(store)?.calibration_by_name()?)
            }
        };

        let records = image_paths
            .into_iter()
            .map(|image_path| -> Result<FrameRecord> {
                let calibration = match &calibration {
                    None => None,
                    Some(by_name) => {
                        let name = image_path.file_name().unwrap_or(image_path.as_str());
                        let record = by_name.get(name).ok_or_else(|| {
                            SceneBatchError::MissingCalibration {
                                image_name: name.to_string(),
                            }
                        })?;
                        Some(*record)
                    }
                };
                Ok(FrameRecord {
                    image_path,
                    calibration,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::info!(
            "sequence \"{sequence_name}\": {} frames{}",
            records.len(),
            if have_mask { " with masks" } else { "" }
        );

        let mut sequences = BTreeMap::new();
        sequences.insert(sequence_name, records);
        let sequence_list = sequences.keys().cloned().collect();

        Ok(Self {
            config,
            have_mask,
            sequences,
            sequence_list,
        })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Number of sequences.
    pub fn len(&self) -> usize {
        self.sequence_list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence_list.is_empty()
    }

    pub fn sequence_list(&self) -> &[String] {
        &self.sequence_list
    }

    pub fn have_mask(&self) -> bool {
        self.have_mask
    }

    /// All frames of a sequence in scan order.
    pub fn frames(&self, selector: SequenceSelector<'_>) -> Result<&[FrameRecord]> {
        let (_, records) = self.resolve(selector)?;
        Ok(records)
    }

    /// The whole sequence at `index`.
    pub fn get(&self, index: usize) -> Result<(Batch, Vec<Utf8PathBuf>)> {
        self.get_data(SequenceSelector::Index(index), None)
    }

    /// Prepare a batch from a sequence, optionally restricted to the frames
    /// at `ids`.
    ///
    /// Returns the batch and the image paths in batch order.
    pub fn get_data(
        &self,
        selector: SequenceSelector<'_>,
        ids: Option<&[usize]>,
    ) -> Result<(Batch, Vec<Utf8PathBuf>)> {
        let (sequence_name, records) = self.resolve(selector)?;
        tracing::debug!("{sequence_name}: INIT");

        let mut selected: Vec<FrameRecord> = match ids {
            Some(ids) => ids
                .iter()
                .map(|&index| {
                    records.get(index).cloned().ok_or(
                        SceneBatchError::FrameIndexOutOfRange {
                            index,
                            len: records.len(),
                        },
                    )
                })
                .collect::<Result<_>>()?,
            None => records.to_vec(),
        };
        if selected.is_empty() {
            return Err(SceneBatchError::EmptySelection);
        }
        if self.config.sort_by_filename {
            selected.sort_by(|a, b| a.image_path.as_str().cmp(b.image_path.as_str()));
        }

        tracing::info!(
            "preparing {} of {} frames from sequence \"{sequence_name}\"",
            selected.len(),
            records.len()
        );
        let batch = self.prepare_batch(sequence_name, records.len(), &selected)?;
        let image_paths = selected.into_iter().map(|r| r.image_path).collect();
        Ok((batch, image_paths))
    }

    fn resolve(&self, selector: SequenceSelector<'_>) -> Result<(&str, &[FrameRecord])> {
        let name = match selector {
            SequenceSelector::Index(index) => self
                .sequence_list
                .get(index)
                .map(String::as_str)
                .ok_or(SceneBatchError::SequenceIndexOutOfRange {
                    index,
                    len: self.sequence_list.len(),
                })?,
            SequenceSelector::Name(name) => name,
        };
        let (name, records) = self.sequences.get_key_value(name).ok_or_else(|| {
            SceneBatchError::UnknownSequence {
                name: name.to_string(),
            }
        })?;
        Ok((name.as_str(), records.as_slice()))
    }

    fn prepare_batch(
        &self,
        sequence_name: &str,
        frame_count: usize,
        records: &[FrameRecord],
    ) -> Result<Batch> {
        tracing::debug!("{sequence_name}: LOADING");
        let pool = TaskPool::new(self.config.num_workers)?;
        let frames = pool.map_ordered(records, |record| self.load_frame(record))?;

        tracing::debug!("{sequence_name}: ASSEMBLING");
        let images = stack(frames.iter().map(|f| f.image.view()))?;
        let masks = if self.have_mask {
            let views = frames
                .iter()
                .zip(records)
                .map(|(f, r)| {
                    f.mask.as_ref().map(|m| m.view()).ok_or_else(|| {
                        SceneBatchError::InvalidShape {
                            msg: format!("no mask prepared for \"{}\"", r.image_path),
                        }
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Some(stack(views.into_iter())?)
        } else {
            None
        };
        let flat: Vec<f32> = frames.iter().flat_map(|f| f.crop.to_array()).collect();
        let crop_params = Array2::from_shape_vec((frames.len(), CROP_PARAMS_LEN), flat)?;

        // SCENE_DIR/<prefix>/<image>
        let scene_root = records
            .first()
            .and_then(|r| r.image_path.parent())
            .and_then(Utf8Path::parent)
            .map(Utf8Path::to_path_buf)
            .unwrap_or_default();

        let cameras = if records.iter().all(|r| r.calibration.is_some()) {
            tracing::debug!("{sequence_name}: NORMALIZING");
            let intrinsics: Vec<PixelIntrinsics> =
                frames.iter().filter_map(|f| f.intrinsics).collect();
            Some(self.prepare_gt_camera_batch(records, &intrinsics)?)
        } else {
            None
        };

        tracing::debug!("{sequence_name}: DONE");
        Ok(Batch {
            sequence_name: sequence_name.to_string(),
            frame_count,
            images,
            masks,
            crop_params,
            scene_root,
            cameras,
        })
    }

    /// Load, crop and resize one frame and carry its intrinsics along.
    fn load_frame(&self, record: &FrameRecord) -> Result<PreparedFrame> {
        let image = image_ops::load_rgb(&record.image_path)?;
        let (height, width, _) = image.dim();
        let (width, height) = (to_u32(width)?, to_u32(height)?);

        let img_size = self.config.img_size;
        let (bbox, crop_dim) = self.config.crop_mode.resolve(width, height)?;
        let crop = calculate_crop_parameters(width, height, &bbox, crop_dim, img_size);
        let center = crop_center_in_square_frame(width, height, &bbox);
        tracing::debug!(
            "{}: {width}x{height}, bbox {:?}, center ({:.1}, {:.1}), crop width {:.4}, scale {:.4}",
            record.image_name(),
            bbox.as_array(),
            center[0],
            center[1],
            crop.crop_width_ndc,
            crop.scale_factor
        );

        let resize = SquareResize::new(img_size);
        let image = image_ops::pad_and_resize(
            image.view(),
            &bbox,
            self.config.background(),
            Some(&resize),
        )?;

        let mask = if self.have_mask {
            let path = mask_path(&record.image_path);
            let mask = image_ops::load_mask(&path)?;
            Some(image_ops::pad_and_resize(
                mask.view(),
                &bbox,
                Background::Black,
                Some(&resize),
            )?)
        } else {
            None
        };

        let intrinsics = record.calibration.map(|calibration| {
            let original = calibration.intrinsics();
            let (fl, pp) = adjust_camera_to_bbox_crop(
                &original.focal_length,
                &original.principal_point,
                &bbox.to_xywh(),
            );
            let crop_size = Vector2::new(bbox.width() as f64, bbox.height() as f64);
            let target = Vector2::new(f64::from(img_size), f64::from(img_size));
            let (fl, pp) = adjust_camera_to_image_scale(&fl, &pp, &crop_size, &target);
            PixelIntrinsics::new(fl, pp)
        });

        Ok(PreparedFrame {
            image,
            mask,
            crop,
            intrinsics,
        })
    }

    fn prepare_gt_camera_batch(
        &self,
        records: &[FrameRecord],
        intrinsics: &[PixelIntrinsics],
    ) -> Result<CameraBatch> {
        let raw: Vec<Extrinsics> = records
            .iter()
            .map(|r| {
                r.calibration.as_ref().map(|c| c.extrinsics()).ok_or_else(|| {
                    SceneBatchError::MissingCalibration {
                        image_name: r.image_name().to_string(),
                    }
                })
            })
            .collect::<Result<_>>()?;
        if intrinsics.len() != raw.len() {
            return Err(SceneBatchError::InvalidShape {
                msg: format!(
                    "{} intrinsics for {} cameras",
                    intrinsics.len(),
                    raw.len()
                ),
            });
        }

        let converted = convention::opencv_to_pytorch3d(&raw);
        let cameras: Vec<Camera> = converted
            .iter()
            .zip(intrinsics)
            .map(|(e, k)| Camera::from_parts(e, k))
            .collect();
        for (record, camera) in records.iter().zip(&cameras) {
            let c = camera.center();
            tracing::debug!(
                "{}: camera center ({:.4}, {:.4}, {:.4})",
                record.image_name(),
                c.x,
                c.y,
                c.z
            );
        }

        let (cameras, normalization_scale) = if self.config.normalize_cameras {
            let normalized = normalize_cameras(&cameras, self.config.scale_statistic)?;
            (normalized.cameras, Some(normalized.scale))
        } else {
            (cameras, None)
        };

        Ok(CameraBatch {
            raw_rotations: raw.iter().map(|e| e.rotation).collect(),
            raw_translations: raw.iter().map(|e| e.translation).collect(),
            cameras,
            normalization_scale,
        })
    }
}

/// Regular files directly inside `dir`, sorted by path.
fn list_images(dir: &Utf8Path, have_mask: bool) -> Result<Vec<Utf8PathBuf>> {
    let pattern = format!("{}/*", glob::Pattern::escape(dir.as_str()));
    let mut paths = Vec::new();
    let mut skipped = 0usize;
    for entry in glob::glob(&pattern)? {
        let path = entry.map_err(|e| {
            let path = Utf8PathBuf::from_path_buf(e.path().to_path_buf())
                .unwrap_or_else(|p| Utf8PathBuf::from(p.to_string_lossy().into_owned()));
            SceneBatchError::io(path, e.into_error())
        })?;
        let path = Utf8PathBuf::from_path_buf(path)
            .map_err(|path| SceneBatchError::NonUtf8Path { path })?;
        if path.is_file() {
            paths.push(path);
        } else {
            skipped += 1;
        }
    }
    if skipped > 0 {
        if have_mask {
            tracing::warn!("{skipped} entries in \"{dir}\" are not files and have no masks");
        } else {
            tracing::debug!("skipping {skipped} entries in \"{dir}\" that are not files");
        }
    }
    paths.sort();
    Ok(paths)
}

/// `SCENE_DIR/<prefix>/name` maps to `SCENE_DIR/masks/name`.
fn mask_path(image_path: &Utf8Path) -> Utf8PathBuf {
    let name = image_path.file_name().unwrap_or(image_path.as_str());
    match image_path.parent().and_then(Utf8Path::parent) {
        Some(scene_dir) => scene_dir.join(MASK_DIR).join(name),
        None => Utf8PathBuf::from(MASK_DIR).join(name),
    }
}

fn to_u32(v: usize) -> Result<u32> {
    u32::try_from(v).map_err(|_| SceneBatchError::InvalidShape {
        msg: format!("image dimension {v} too large"),
    })
}

fn stack<'a>(views: impl Iterator<Item = ArrayView3<'a, f32>>) -> Result<ndarray::Array4<f32>> {
    let views: Vec<ArrayView3<'a, f32>> = views.collect();
    Ok(ndarray::stack(Axis(0), &views)?)
}
