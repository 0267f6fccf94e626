//! Pixel array cropping, padding and resizing.
//!
//! Arrays are height-major: `H x W` for single channel data or `H x W x C`.
//! Resized output is channel-first (`C x S x S`), ready to be stacked into a
//! batch.
use camino::Utf8Path;
use image::{ImageBuffer, Luma, imageops::FilterType};
use ndarray::{Array, Array2, Array3, ArrayView, ArrayView3, Axis, RemoveAxis, Slice};

use crate::crop::BoundingBox;
use crate::{Result, SceneBatchError};

/// Value used to fill padded regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Background {
    #[default]
    Black,
    White,
}

impl Background {
    pub fn value(self) -> f32 {
        match self {
            Background::Black => 0.0,
            Background::White => 1.0,
        }
    }
}

/// Resize to a square output of `size x size` pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SquareResize {
    pub size: u32,
    pub filter: FilterType,
}

impl SquareResize {
    /// Triangle filtering, which antialiases when downscaling.
    pub fn new(size: u32) -> Self {
        Self {
            size,
            filter: FilterType::Triangle,
        }
    }

    /// Resize an `H x W x C` array, returning `C x size x size` clamped to
    /// `[0, 1]`.
    pub fn apply(&self, image: ArrayView3<'_, f32>) -> Result<Array3<f32>> {
        let (height, width, channels) = image.dim();
        let size = self.size as usize;
        let mut out = Array3::<f32>::zeros((channels, size, size));
        for c in 0..channels {
            let plane: Vec<f32> = image.index_axis(Axis(2), c).iter().copied().collect();
            let buf: ImageBuffer<Luma<f32>, Vec<f32>> =
                ImageBuffer::from_raw(width as u32, height as u32, plane).ok_or_else(|| {
                    SceneBatchError::InvalidShape {
                        msg: format!("cannot build {width}x{height} image plane"),
                    }
                })?;
            let resized = image::imageops::resize(&buf, self.size, self.size, self.filter);
            let resized = Array2::from_shape_vec((size, size), resized.into_raw())?;
            out.index_axis_mut(Axis(0), c).assign(&resized);
        }
        clamp_unit(&mut out);
        Ok(out)
    }
}

fn clamp_unit<D: ndarray::Dimension>(arr: &mut Array<f32, D>) {
    arr.mapv_inplace(|v| v.clamp(0.0, 1.0));
}

/// Crop `image` to `bbox`, padding instead of cropping along any axis where
/// the box is larger than the image.
///
/// Height is handled first, then width, so a box that is partly outside the
/// image along one axis and inside along the other is padded and cropped
/// respectively. When the box is larger than the image, padding is split
/// evenly with the extra pixel at the end. Otherwise the parts of the box
/// outside the image are filled with the background, so the output always
/// has the size of the box.
pub fn crop_to_bbox<D>(
    image: ArrayView<'_, f32, D>,
    bbox: &BoundingBox,
    background: Background,
) -> Result<Array<f32, D>>
where
    D: RemoveAxis,
{
    if image.ndim() < 2 {
        return Err(SceneBatchError::InvalidShape {
            msg: format!("expected at least 2 dimensions, got {}", image.ndim()),
        });
    }
    let bg = background.value();
    let rows = fit_axis(image, Axis(0), bbox.top, bbox.bottom, bg)?;
    fit_axis(rows.view(), Axis(1), bbox.left, bbox.right, bg)
}

fn fit_axis<D>(
    arr: ArrayView<'_, f32, D>,
    axis: Axis,
    start: i64,
    end: i64,
    bg: f32,
) -> Result<Array<f32, D>>
where
    D: RemoveAxis,
{
    let len = arr.len_of(axis) as i64;
    let new_len = end - start;
    if new_len > len {
        let before = (new_len - len) / 2;
        let after = new_len - len - before;
        pad_axis(arr, axis, before as usize, after as usize, bg)
    } else {
        let lo = start.clamp(0, len);
        let hi = end.clamp(lo, len);
        let inside = arr.slice_axis(axis, Slice::from(lo as isize..hi as isize));
        let before = (-start).clamp(0, new_len.max(0));
        let after = new_len.max(0) - before - (hi - lo);
        pad_axis(inside, axis, before as usize, after.max(0) as usize, bg)
    }
}

/// Add `before` and `after` slices of `bg` around `arr` along `axis`.
fn pad_axis<D>(
    arr: ArrayView<'_, f32, D>,
    axis: Axis,
    before: usize,
    after: usize,
    bg: f32,
) -> Result<Array<f32, D>>
where
    D: RemoveAxis,
{
    if before == 0 && after == 0 {
        return Ok(arr.to_owned());
    }
    let mut dim = arr.raw_dim();
    dim[axis.index()] = before;
    let pad_before = Array::from_elem(dim.clone(), bg);
    dim[axis.index()] = after;
    let pad_after = Array::from_elem(dim, bg);
    Ok(ndarray::concatenate(
        axis,
        &[pad_before.view(), arr.view(), pad_after.view()],
    )?)
}

/// Crop or pad `image` (`H x W x C`) to `bbox`, then resize it.
///
/// Without a resize the cropped array is only transposed to channel-first
/// order. The result is always clamped to `[0, 1]`.
pub fn pad_and_resize(
    image: ArrayView3<'_, f32>,
    bbox: &BoundingBox,
    background: Background,
    resize: Option<&SquareResize>,
) -> Result<Array3<f32>> {
    let cropped = crop_to_bbox(image, bbox, background)?;
    match resize {
        Some(resize) => resize.apply(cropped.view()),
        None => {
            let mut chw = cropped.permuted_axes([2, 0, 1]).as_standard_layout().to_owned();
            clamp_unit(&mut chw);
            Ok(chw)
        }
    }
}

/// Decode an image file as RGB with values in `[0, 1]`, shape `H x W x 3`.
pub fn load_rgb(path: &Utf8Path) -> Result<Array3<f32>> {
    let decoded = image::open(path).map_err(|source| SceneBatchError::ImageDecode {
        path: path.to_owned(),
        source,
    })?;
    let rgb = decoded.to_rgb32f();
    let (width, height) = rgb.dimensions();
    Ok(Array3::from_shape_vec(
        (height as usize, width as usize, 3),
        rgb.into_raw(),
    )?)
}

/// Decode a mask file as grayscale with values in `[0, 1]`, shape `H x W x 1`.
pub fn load_mask(path: &Utf8Path) -> Result<Array3<f32>> {
    let decoded = image::open(path).map_err(|source| SceneBatchError::ImageDecode {
        path: path.to_owned(),
        source,
    })?;
    let luma = decoded.to_luma32f();
    let (width, height) = luma.dimensions();
    Ok(Array3::from_shape_vec(
        (height as usize, width as usize, 1),
        luma.into_raw(),
    )?)
}
