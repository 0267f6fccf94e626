//! Minimal reader for COLMAP sparse reconstructions.
//!
//! Only cameras and image poses are read, from either the text
//! (`cameras.txt`, `images.txt`) or the binary (`cameras.bin`,
//! `images.bin`) format. Binary files are preferred when both are present.
//! 2D keypoints are skipped and `points3D` is never opened.
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use camino::{Utf8Path, Utf8PathBuf};
use nalgebra::{Matrix3, Matrix3x4, Quaternion, UnitQuaternion, Vector2, Vector3};

use crate::frame::CalibrationRecord;
use crate::{Result, SceneBatchError};

/// COLMAP camera models, with their numeric ids in the binary format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraModel {
    SimplePinhole,
    Pinhole,
    SimpleRadial,
    Radial,
    OpenCv,
    OpenCvFisheye,
    FullOpenCv,
    Fov,
    SimpleRadialFisheye,
    RadialFisheye,
    ThinPrismFisheye,
    RadTanThinPrismFisheye,
}

impl CameraModel {
    pub fn from_id(id: i32) -> Result<Self> {
        use CameraModel::*;
        Ok(match id {
            0 => SimplePinhole,
            1 => Pinhole,
            2 => SimpleRadial,
            3 => Radial,
            4 => OpenCv,
            5 => OpenCvFisheye,
            6 => FullOpenCv,
            7 => Fov,
            8 => SimpleRadialFisheye,
            9 => RadialFisheye,
            10 => ThinPrismFisheye,
            11 => RadTanThinPrismFisheye,
            _ => {
                return Err(SceneBatchError::UnsupportedCameraModel {
                    model: id.to_string(),
                });
            }
        })
    }

    pub fn from_name(name: &str) -> Result<Self> {
        use CameraModel::*;
        Ok(match name {
            "SIMPLE_PINHOLE" => SimplePinhole,
            "PINHOLE" => Pinhole,
            "SIMPLE_RADIAL" => SimpleRadial,
            "RADIAL" => Radial,
            "OPENCV" => OpenCv,
            "OPENCV_FISHEYE" => OpenCvFisheye,
            "FULL_OPENCV" => FullOpenCv,
            "FOV" => Fov,
            "SIMPLE_RADIAL_FISHEYE" => SimpleRadialFisheye,
            "RADIAL_FISHEYE" => RadialFisheye,
            "THIN_PRISM_FISHEYE" => ThinPrismFisheye,
            "RAD_TAN_THIN_PRISM_FISHEYE" => RadTanThinPrismFisheye,
            _ => {
                return Err(SceneBatchError::UnsupportedCameraModel {
                    model: name.to_string(),
                });
            }
        })
    }

    pub fn num_params(&self) -> usize {
        use CameraModel::*;
        match self {
            SimplePinhole => 3,
            Pinhole | SimpleRadial | SimpleRadialFisheye => 4,
            Radial | Fov | RadialFisheye => 5,
            OpenCv | OpenCvFisheye => 8,
            FullOpenCv | ThinPrismFisheye => 12,
            RadTanThinPrismFisheye => 16,
        }
    }

    /// Models with a single focal length parameter `f, cx, cy, ...`.
    fn single_focal(&self) -> bool {
        use CameraModel::*;
        matches!(
            self,
            SimplePinhole | SimpleRadial | Radial | SimpleRadialFisheye | RadialFisheye
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColmapCamera {
    pub camera_id: u32,
    pub model: CameraModel,
    pub width: u64,
    pub height: u64,
    pub params: Vec<f64>,
}

impl ColmapCamera {
    /// The 3x3 calibration matrix `[[fx, 0, cx], [0, fy, cy], [0, 0, 1]]`.
    pub fn calibration_matrix(&self) -> Matrix3<f64> {
        let p = &self.params;
        let (fx, fy, cx, cy) = if self.model.single_focal() {
            (p[0], p[0], p[1], p[2])
        } else {
            (p[0], p[1], p[2], p[3])
        };
        Matrix3::new(fx, 0.0, cx, 0.0, fy, cy, 0.0, 0.0, 1.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColmapImage {
    pub image_id: u32,
    /// `(qw, qx, qy, qz)`
    pub qvec: [f64; 4],
    pub tvec: [f64; 3],
    pub camera_id: u32,
    pub name: String,
}

impl ColmapImage {
    /// The 3x4 world-to-camera matrix `[R | t]`.
    pub fn cam_from_world(&self) -> Matrix3x4<f64> {
        let [w, x, y, z] = self.qvec;
        let rot = UnitQuaternion::from_quaternion(Quaternion::new(w, x, y, z)).to_rotation_matrix();
        let mut m = Matrix3x4::zeros();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(rot.matrix());
        m.set_column(3, &Vector3::from(self.tvec));
        m
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconstruction {
    pub cameras: BTreeMap<u32, ColmapCamera>,
    pub images: BTreeMap<u32, ColmapImage>,
}

impl Reconstruction {
    /// Read the reconstruction stored in `dir` (typically `sparse/0`).
    pub fn read(dir: &Utf8Path) -> Result<Self> {
        let (cameras, images) = if dir.join("cameras.bin").exists() {
            let cameras = read_cameras_bin(&dir.join("cameras.bin"))?;
            let images = read_images_bin(&dir.join("images.bin"))?;
            (cameras, images)
        } else {
            let cameras = read_cameras_text(&dir.join("cameras.txt"))?;
            let images = read_images_text(&dir.join("images.txt"))?;
            (cameras, images)
        };
        tracing::debug!(
            "read {} cameras and {} images from \"{dir}\"",
            cameras.len(),
            images.len()
        );
        Ok(Self { cameras, images })
    }

    /// Ground truth for every image, keyed by image name.
    pub fn calibration_by_name(&self) -> Result<BTreeMap<String, CalibrationRecord>> {
        let mut result = BTreeMap::new();
        for image in self.images.values() {
            let camera = self.cameras.get(&image.camera_id).ok_or_else(|| {
                SceneBatchError::MalformedCalibration {
                    path: Utf8PathBuf::from(&image.name),
                    msg: format!("image refers to unknown camera {}", image.camera_id),
                }
            })?;
            let extrinsic = image.cam_from_world();
            let intrinsic = camera.calibration_matrix();
            let record = CalibrationRecord {
                rotation: extrinsic.fixed_view::<3, 3>(0, 0).into_owned(),
                translation: extrinsic.column(3).into_owned(),
                focal_length: Vector2::new(intrinsic[(0, 0)], intrinsic[(1, 1)]),
                principal_point: Vector2::new(intrinsic[(0, 2)], intrinsic[(1, 2)]),
            };
            result.insert(image.name.clone(), record);
        }
        Ok(result)
    }
}

fn open(path: &Utf8Path) -> Result<BufReader<std::fs::File>> {
    let file = std::fs::File::open(path).map_err(|e| SceneBatchError::io(path, e))?;
    Ok(BufReader::new(file))
}

fn malformed(path: &Utf8Path, msg: impl Into<String>) -> SceneBatchError {
    SceneBatchError::MalformedCalibration {
        path: path.to_owned(),
        msg: msg.into(),
    }
}

fn parse_field<T: std::str::FromStr>(path: &Utf8Path, field: Option<&str>, what: &str) -> Result<T> {
    let field = field.ok_or_else(|| malformed(path, format!("missing {what}")))?;
    field
        .parse()
        .map_err(|_| malformed(path, format!("cannot parse {what} from \"{field}\"")))
}

/// Trimmed lines of a COLMAP text file without comments. Blank lines are
/// kept because an image without keypoints has an empty second line.
fn data_lines(path: &Utf8Path) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    for line in open(path)?.lines() {
        let line = line.map_err(|e| SceneBatchError::io(path, e))?;
        if line.trim_start().starts_with('#') {
            continue;
        }
        lines.push(line.trim().to_string());
    }
    Ok(lines)
}

pub fn read_cameras_text(path: &Utf8Path) -> Result<BTreeMap<u32, ColmapCamera>> {
    let mut cameras = BTreeMap::new();
    for line in data_lines(path)?.iter().filter(|l| !l.is_empty()) {
        let mut fields = line.split_whitespace();
        let camera_id: u32 = parse_field(path, fields.next(), "camera id")?;
        let model_name: String = parse_field(path, fields.next(), "camera model")?;
        let model = CameraModel::from_name(&model_name)?;
        let width = parse_field(path, fields.next(), "width")?;
        let height = parse_field(path, fields.next(), "height")?;
        let params = fields
            .map(|f| parse_field(path, Some(f), "camera parameter"))
            .collect::<Result<Vec<f64>>>()?;
        if params.len() != model.num_params() {
            return Err(malformed(
                path,
                format!(
                    "camera {camera_id}: expected {} parameters, found {}",
                    model.num_params(),
                    params.len()
                ),
            ));
        }
        cameras.insert(
            camera_id,
            ColmapCamera {
                camera_id,
                model,
                width,
                height,
                params,
            },
        );
    }
    Ok(cameras)
}

pub fn read_images_text(path: &Utf8Path) -> Result<BTreeMap<u32, ColmapImage>> {
    let mut images = BTreeMap::new();
    let lines = data_lines(path)?;
    let mut iter = lines.iter();
    while let Some(line) = iter.next() {
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        let image_id: u32 = parse_field(path, fields.next(), "image id")?;
        let mut qvec = [0.0; 4];
        for q in qvec.iter_mut() {
            *q = parse_field(path, fields.next(), "quaternion")?;
        }
        let mut tvec = [0.0; 3];
        for t in tvec.iter_mut() {
            *t = parse_field(path, fields.next(), "translation")?;
        }
        let camera_id = parse_field(path, fields.next(), "camera id")?;
        let name: String = parse_field(path, fields.next(), "image name")?;
        // Every image line is followed by its (possibly empty) keypoint line.
        let _points2d = iter.next();
        images.insert(
            image_id,
            ColmapImage {
                image_id,
                qvec,
                tvec,
                camera_id,
                name,
            },
        );
    }
    Ok(images)
}

fn read_err(path: &Utf8Path) -> impl Fn(std::io::Error) -> SceneBatchError + '_ {
    move |e| SceneBatchError::io(path, e)
}

pub fn read_cameras_bin(path: &Utf8Path) -> Result<BTreeMap<u32, ColmapCamera>> {
    let mut rdr = open(path)?;
    let num_cameras = rdr.read_u64::<LittleEndian>().map_err(read_err(path))?;
    let mut cameras = BTreeMap::new();
    for _ in 0..num_cameras {
        let camera_id = rdr.read_i32::<LittleEndian>().map_err(read_err(path))?;
        let model = CameraModel::from_id(rdr.read_i32::<LittleEndian>().map_err(read_err(path))?)?;
        let width = rdr.read_u64::<LittleEndian>().map_err(read_err(path))?;
        let height = rdr.read_u64::<LittleEndian>().map_err(read_err(path))?;
        let mut params = vec![0.0; model.num_params()];
        rdr.read_f64_into::<LittleEndian>(&mut params)
            .map_err(read_err(path))?;
        let camera_id = u32::try_from(camera_id)
            .map_err(|_| malformed(path, format!("negative camera id {camera_id}")))?;
        cameras.insert(
            camera_id,
            ColmapCamera {
                camera_id,
                model,
                width,
                height,
                params,
            },
        );
    }
    Ok(cameras)
}

pub fn read_images_bin(path: &Utf8Path) -> Result<BTreeMap<u32, ColmapImage>> {
    let mut rdr = open(path)?;
    let num_images = rdr.read_u64::<LittleEndian>().map_err(read_err(path))?;
    let mut images = BTreeMap::new();
    for _ in 0..num_images {
        let image_id = rdr.read_u32::<LittleEndian>().map_err(read_err(path))?;
        let mut qvec = [0.0; 4];
        rdr.read_f64_into::<LittleEndian>(&mut qvec)
            .map_err(read_err(path))?;
        let mut tvec = [0.0; 3];
        rdr.read_f64_into::<LittleEndian>(&mut tvec)
            .map_err(read_err(path))?;
        let camera_id = rdr.read_u32::<LittleEndian>().map_err(read_err(path))?;

        let mut name_bytes = Vec::new();
        rdr.read_until(0, &mut name_bytes).map_err(read_err(path))?;
        if name_bytes.pop() != Some(0) {
            return Err(malformed(path, "unterminated image name"));
        }
        let name = String::from_utf8(name_bytes)
            .map_err(|_| malformed(path, "image name is not UTF-8"))?;

        // Skip the keypoints: (x: f64, y: f64, point3D_id: i64) each.
        let num_points2d = rdr.read_u64::<LittleEndian>().map_err(read_err(path))?;
        let skip = num_points2d
            .checked_mul(24)
            .ok_or_else(|| malformed(path, "keypoint count overflows"))?;
        let skipped = std::io::copy(&mut (&mut rdr).take(skip), &mut std::io::sink())
            .map_err(read_err(path))?;
        if skipped != skip {
            return Err(malformed(path, "truncated keypoint data"));
        }

        images.insert(
            image_id,
            ColmapImage {
                image_id,
                qvec,
                tvec,
                camera_id,
                name,
            },
        );
    }
    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use std::io::Write;

    const CAMERAS_TXT: &str = "# Camera list with one line of data per camera:
#   CAMERA_ID, MODEL, WIDTH, HEIGHT, PARAMS[]
# Number of cameras: 2
1 PINHOLE 800 600 500.0 510.0 400.0 300.0
2 SIMPLE_RADIAL 600 800 450.0 300.0 400.0 0.01
";

    const IMAGES_TXT: &str = "# Image list with two lines of data per image:
#   IMAGE_ID, QW, QX, QY, QZ, TX, TY, TZ, CAMERA_ID, NAME
#   POINTS2D[] as (X, Y, POINT3D_ID)
1 1 0 0 0 0.5 0.25 2 1 a.png
10.0 20.0 -1 30.0 40.0 3
2 0.7071067811865476 0 0.7071067811865476 0 -1 0 3 2 b.png

";

    fn write(dir: &Utf8Path, name: &str, contents: &[u8]) {
        std::fs::File::create(dir.join(name))
            .unwrap()
            .write_all(contents)
            .unwrap();
    }

    fn tempdir() -> (tempfile::TempDir, Utf8PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        (tmp, path)
    }

    #[test]
    fn test_read_text() {
        let (_tmp, dir) = tempdir();
        write(&dir, "cameras.txt", CAMERAS_TXT.as_bytes());
        write(&dir, "images.txt", IMAGES_TXT.as_bytes());

        let recon = Reconstruction::read(&dir).unwrap();
        assert_eq!(recon.cameras.len(), 2);
        assert_eq!(recon.images.len(), 2);
        assert_eq!(recon.images[&2].name, "b.png");

        let calib = recon.calibration_by_name().unwrap();
        let a = &calib["a.png"];
        assert_eq!(a.rotation, Matrix3::identity());
        assert_eq!(a.translation, Vector3::new(0.5, 0.25, 2.0));
        assert_eq!(a.focal_length, Vector2::new(500.0, 510.0));
        assert_eq!(a.principal_point, Vector2::new(400.0, 300.0));

        let b = &calib["b.png"];
        assert_eq!(b.focal_length, Vector2::new(450.0, 450.0));
        assert_eq!(b.principal_point, Vector2::new(300.0, 400.0));
        // 90 degrees about y
        approx::assert_abs_diff_eq!(
            b.rotation,
            Matrix3::new(0.0, 0.0, 1.0, 0.0, 1.0, 0.0, -1.0, 0.0, 0.0),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_read_binary() {
        let (_tmp, dir) = tempdir();

        let mut cams = Vec::new();
        cams.write_u64::<LittleEndian>(1).unwrap();
        cams.write_i32::<LittleEndian>(7).unwrap();
        cams.write_i32::<LittleEndian>(0).unwrap(); // SIMPLE_PINHOLE
        cams.write_u64::<LittleEndian>(640).unwrap();
        cams.write_u64::<LittleEndian>(480).unwrap();
        for p in [600.0, 320.0, 240.0] {
            cams.write_f64::<LittleEndian>(p).unwrap();
        }
        write(&dir, "cameras.bin", &cams);

        let mut imgs = Vec::new();
        imgs.write_u64::<LittleEndian>(1).unwrap();
        imgs.write_u32::<LittleEndian>(3).unwrap();
        for q in [1.0, 0.0, 0.0, 0.0, 1.0, 2.0, 3.0] {
            imgs.write_f64::<LittleEndian>(q).unwrap();
        }
        imgs.write_u32::<LittleEndian>(7).unwrap();
        imgs.extend_from_slice(b"frame 001.jpg\0");
        imgs.write_u64::<LittleEndian>(2).unwrap();
        for _ in 0..2 {
            imgs.write_f64::<LittleEndian>(1.0).unwrap();
            imgs.write_f64::<LittleEndian>(2.0).unwrap();
            imgs.write_i64::<LittleEndian>(-1).unwrap();
        }
        write(&dir, "images.bin", &imgs);

        let recon = Reconstruction::read(&dir).unwrap();
        let calib = recon.calibration_by_name().unwrap();
        let rec = &calib["frame 001.jpg"];
        assert_eq!(rec.translation, Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(rec.focal_length, Vector2::new(600.0, 600.0));
        assert_eq!(rec.principal_point, Vector2::new(320.0, 240.0));
    }

    #[test]
    fn test_unknown_model() {
        let (_tmp, dir) = tempdir();
        write(&dir, "cameras.txt", b"1 FANCY 10 10 1 2 3\n");
        let err = read_cameras_text(&dir.join("cameras.txt")).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Contract);
    }

    #[test]
    fn test_wrong_param_count() {
        let (_tmp, dir) = tempdir();
        write(&dir, "cameras.txt", b"1 PINHOLE 10 10 1 2 3\n");
        let err = read_cameras_text(&dir.join("cameras.txt")).unwrap_err();
        assert!(matches!(err, SceneBatchError::MalformedCalibration { .. }));
    }

    #[test]
    fn test_missing_store() {
        let (_tmp, dir) = tempdir();
        let err = Reconstruction::read(&dir).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Io);
    }
}
