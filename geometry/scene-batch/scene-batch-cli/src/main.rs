use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use eyre::{self, WrapErr, Result};
use serde::Serialize;

use scene_batch::{Batch, CalibrationMode, CameraBatch, LoaderConfig, SceneLoader, SequenceSelector};

mod logging;

#[derive(Parser, Debug, Default)]
#[command(author, version, about)]
struct Cli {
    /// Scene directory containing the image directory and, optionally,
    /// `masks` and `sparse/0`. Overrides `scene_dir` in the config file.
    scene_dir: Option<Utf8PathBuf>,

    /// YAML loader configuration. Command line flags take precedence.
    #[arg(long)]
    config: Option<Utf8PathBuf>,

    /// Side length of the square output images.
    #[arg(long)]
    img_size: Option<u32>,

    /// Load ground-truth cameras from SCENE_DIR/sparse/0.
    #[arg(long)]
    load_gt: bool,

    /// Keep ground-truth cameras in their original frame.
    #[arg(long)]
    no_normalize: bool,

    /// Keep frames in the order given by `--ids`.
    #[arg(long)]
    no_sort: bool,

    /// Name of the image directory inside the scene directory.
    #[arg(long)]
    prefix: Option<String>,

    /// Pad with white instead of black.
    #[arg(long)]
    white_background: bool,

    /// Maximum number of worker threads.
    #[arg(long)]
    num_workers: Option<usize>,

    /// Sequence name. Defaults to the first sequence.
    #[arg(long)]
    sequence: Option<String>,

    /// Comma separated frame indices. Defaults to all frames.
    #[arg(long, value_delimiter = ',')]
    ids: Vec<usize>,

    /// Write a JSON summary of the prepared batch to this file.
    #[arg(long)]
    summary_json: Option<Utf8PathBuf>,

    /// Also write log messages to this file.
    #[arg(long)]
    log_file: Option<Utf8PathBuf>,
}

#[derive(Serialize)]
struct Summary<'a> {
    sequence_name: &'a str,
    frame_count: usize,
    image_paths: &'a [Utf8PathBuf],
    images_shape: &'a [usize],
    masks_shape: Option<&'a [usize]>,
    crop_params: Vec<Vec<f32>>,
    cameras: Option<&'a CameraBatch>,
}

impl<'a> Summary<'a> {
    fn new(batch: &'a Batch, image_paths: &'a [Utf8PathBuf]) -> Self {
        Self {
            sequence_name: &batch.sequence_name,
            frame_count: batch.frame_count,
            image_paths,
            images_shape: batch.images.shape(),
            masks_shape: batch.masks.as_ref().map(|m| m.shape()),
            crop_params: batch.crop_params.rows().into_iter().map(|r| r.to_vec()).collect(),
            cameras: batch.cameras.as_ref(),
        }
    }
}

/// Point `cfg` at another scene. A calibration store at the default
/// location inside the old scene moves along with it.
fn with_scene_dir(mut cfg: LoaderConfig, scene_dir: &Utf8Path) -> LoaderConfig {
    let old_default = CalibrationMode::FromStore(cfg.scene_dir.join("sparse").join("0"));
    let follow = cfg.calibration == old_default;
    cfg.scene_dir = scene_dir.to_path_buf();
    if follow {
        cfg = cfg.with_ground_truth();
    }
    cfg
}

fn loader_config(cli: &Cli) -> Result<LoaderConfig> {
    let mut cfg = match (&cli.config, &cli.scene_dir) {
        (Some(path), scene_dir) => {
            let mut cfg = LoaderConfig::from_yaml_path(path)
                .wrap_err_with(|| format!("reading config \"{path}\""))?;
            if let Some(scene_dir) = scene_dir {
                cfg = with_scene_dir(cfg, scene_dir);
            }
            cfg
        }
        (None, Some(scene_dir)) => LoaderConfig::new(scene_dir.clone()),
        (None, None) => eyre::bail!("either a scene directory or --config is required"),
    };
    if let Some(img_size) = cli.img_size {
        cfg.img_size = img_size;
    }
    if let Some(prefix) = &cli.prefix {
        cfg.prefix = prefix.clone();
    }
    if cli.load_gt && cfg.calibration == CalibrationMode::None {
        cfg = cfg.with_ground_truth();
    }
    if cli.no_normalize {
        cfg.normalize_cameras = false;
    }
    if cli.no_sort {
        cfg.sort_by_filename = false;
    }
    if cli.white_background {
        cfg.white_background = true;
    }
    if cli.num_workers.is_some() {
        cfg.num_workers = cli.num_workers;
    }
    Ok(cfg)
}

fn write_summary(path: &Utf8Path, summary: &Summary<'_>) -> Result<()> {
    let file = std::fs::File::create(path).wrap_err_with(|| format!("creating \"{path}\""))?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), summary)?;
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let cfg = loader_config(&cli)?;
    let scene_dir = cfg.scene_dir.clone();
    let loader =
        SceneLoader::new(cfg).wrap_err_with(|| format!("scanning scene \"{scene_dir}\""))?;

    let selector = match &cli.sequence {
        Some(name) => SequenceSelector::Name(name),
        None => SequenceSelector::Index(0),
    };
    let ids = if cli.ids.is_empty() {
        None
    } else {
        Some(cli.ids.as_slice())
    };
    let (batch, image_paths) = loader.get_data(selector, ids).wrap_err_with(|| {
        format!("preparing batch for sequence {selector:?} in \"{scene_dir}\"")
    })?;

    tracing::info!("images: {:?}", batch.images.shape());
    if let Some(masks) = &batch.masks {
        tracing::info!("masks: {:?}", masks.shape());
    }
    tracing::info!("crop params: {:?}", batch.crop_params.shape());
    if let Some(cameras) = &batch.cameras {
        match cameras.normalization_scale {
            Some(scale) => tracing::info!("{} cameras, normalized by {scale}", cameras.len()),
            None => tracing::info!("{} cameras", cameras.len()),
        }
    }

    if let Some(path) = &cli.summary_json {
        write_summary(path, &Summary::new(&batch, &image_paths))?;
        tracing::info!("summary saved to \"{path}\"");
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_file.as_deref())?;
    run(cli)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(tmp.path().join("cfg.yaml")).unwrap();
        std::fs::write(&path, "scene_dir: from_file\nimg_size: 256\nprefix: frames\n").unwrap();

        let cli = Cli::parse_from([
            "scene-batch",
            "--config",
            path.as_str(),
            "--img-size",
            "128",
            "--load-gt",
            "--no-normalize",
            "--ids",
            "3,1",
        ]);
        assert_eq!(cli.ids, vec![3, 1]);
        let cfg = loader_config(&cli).unwrap();
        assert_eq!(cfg.scene_dir.as_str(), "from_file");
        assert_eq!(cfg.img_size, 128);
        assert_eq!(cfg.prefix, "frames");
        assert!(!cfg.normalize_cameras);
        assert_eq!(
            cfg.calibration,
            CalibrationMode::FromStore(Utf8PathBuf::from("from_file/sparse/0"))
        );

        let cli = Cli::parse_from(["scene-batch", "elsewhere", "--config", path.as_str()]);
        assert_eq!(loader_config(&cli).unwrap().scene_dir.as_str(), "elsewhere");
    }

    #[test]
    fn test_scene_dir_argument_moves_calibration_store() {
        let tmp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(tmp.path().join("cfg.yaml")).unwrap();
        std::fs::write(
            &path,
            "scene_dir: from_file\ncalibration: !from_store from_file/sparse/0\n",
        )
        .unwrap();
        let cli = Cli::parse_from(["scene-batch", "elsewhere", "--config", path.as_str()]);
        let cfg = loader_config(&cli).unwrap();
        assert_eq!(cfg.scene_dir.as_str(), "elsewhere");
        assert_eq!(
            cfg.calibration,
            CalibrationMode::FromStore(Utf8PathBuf::from("elsewhere/sparse/0"))
        );

        // an explicit store somewhere else is kept
        std::fs::write(
            &path,
            "scene_dir: from_file\ncalibration: !from_store /data/recon/0\n",
        )
        .unwrap();
        let cfg = loader_config(&cli).unwrap();
        assert_eq!(cfg.scene_dir.as_str(), "elsewhere");
        assert_eq!(
            cfg.calibration,
            CalibrationMode::FromStore(Utf8PathBuf::from("/data/recon/0"))
        );
    }

    #[test]
    fn test_scene_dir_required() {
        assert!(loader_config(&Cli::default()).is_err());
        let cfg = loader_config(&Cli::parse_from(["scene-batch", "s"])).unwrap();
        assert_eq!(cfg, LoaderConfig::new("s"));
    }
}
