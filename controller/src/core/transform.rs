//! Coordinate, image and value transforms between agent space and device space.
//!
//! All functions here are pure. Agent actions use normalized coordinates in
//! `[0, 1]`; the device works in pixels and may be rotated.

use anyhow::{Result, bail};

use crate::core::types::{Image, Orientation};

/// Map a normalized touch position to a pixel position on a `(width, height)` screen.
///
/// Each coordinate is `floor(normalized * dim)` clamped to `[0, dim - 1]`, so `1.0`
/// lands on the last pixel rather than one past it.
pub fn touch_position_to_pixel_position(
    touch_position: [f64; 2],
    (width, height): (usize, usize),
) -> (usize, usize) {
    (
        scale_and_clamp(touch_position[0], width),
        scale_and_clamp(touch_position[1], height),
    )
}

fn scale_and_clamp(normalized: f64, dim: usize) -> usize {
    let last = dim.saturating_sub(1);
    let scaled = (normalized * dim as f64).floor();
    if scaled.is_nan() || scaled <= 0.0 {
        return 0;
    }
    (scaled as usize).min(last)
}

/// Swap the first two axes of an image (rows become columns).
pub fn transpose_pixels<T: Clone>(image: &Image<T>) -> Image<T> {
    remap(image, image.width, image.height, |row, col| (col, row))
}

/// Rotate an image to match the device orientation.
///
/// Quarter turns swap height and width; channel depth never changes. `image`
/// must pass [`Image::validate`], otherwise pixel indexing panics.
pub fn orient_pixels<T: Clone>(image: &Image<T>, orientation: Orientation) -> Image<T> {
    let (height, width) = (image.height, image.width);
    match orientation {
        Orientation::Portrait0 => image.clone(),
        Orientation::Landscape90 => remap(image, width, height, |row, col| (height - 1 - col, row)),
        Orientation::Portrait180 => remap(image, height, width, |row, col| {
            (height - 1 - row, width - 1 - col)
        }),
        Orientation::Landscape270 => remap(image, width, height, |row, col| (col, width - 1 - row)),
    }
}

/// Build an `out_height x out_width` image whose pixel `(row, col)` is copied from
/// `source(row, col)` in the input.
fn remap<T: Clone>(
    image: &Image<T>,
    out_height: usize,
    out_width: usize,
    source: impl Fn(usize, usize) -> (usize, usize),
) -> Image<T> {
    let mut data = Vec::with_capacity(image.data.len());
    for row in 0..out_height {
        for col in 0..out_width {
            let (src_row, src_col) = source(row, col);
            data.extend_from_slice(image.pixel(src_row, src_col));
        }
    }
    Image {
        height: out_height,
        width: out_width,
        channels: image.channels,
        data,
    }
}

/// Integer element types an [`ArraySpec`] can describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntDtype {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
}

impl IntDtype {
    /// Smallest and largest representable values.
    pub fn natural_bounds(self) -> (i64, i64) {
        match self {
            IntDtype::I8 => (i8::MIN.into(), i8::MAX.into()),
            IntDtype::I16 => (i16::MIN.into(), i16::MAX.into()),
            IntDtype::I32 => (i32::MIN.into(), i32::MAX.into()),
            IntDtype::I64 => (i64::MIN, i64::MAX),
            IntDtype::U8 => (u8::MIN.into(), u8::MAX.into()),
            IntDtype::U16 => (u16::MIN.into(), u16::MAX.into()),
            IntDtype::U32 => (u32::MIN.into(), u32::MAX.into()),
        }
    }
}

/// A bound that is either shared by every element or given per element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bound {
    Scalar(i64),
    PerElement(Vec<i64>),
}

impl Bound {
    fn at(&self, index: usize) -> Result<i64> {
        match self {
            Bound::Scalar(value) => Ok(*value),
            Bound::PerElement(values) => match values.get(index) {
                Some(value) => Ok(*value),
                None => bail!(
                    "bound has {} elements but data has more (index {index})",
                    values.len()
                ),
            },
        }
    }
}

/// Describes integer data: its element type and optional explicit bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArraySpec {
    pub dtype: IntDtype,
    pub minimum: Option<Bound>,
    pub maximum: Option<Bound>,
}

impl ArraySpec {
    /// Spec with no explicit bounds; the dtype's natural range applies.
    pub fn unbounded(dtype: IntDtype) -> Self {
        Self {
            dtype,
            minimum: None,
            maximum: None,
        }
    }

    pub fn bounded(dtype: IntDtype, minimum: Bound, maximum: Bound) -> Self {
        Self {
            dtype,
            minimum: Some(minimum),
            maximum: Some(maximum),
        }
    }
}

/// Float element types produced by [`convert_int_to_float`].
pub trait FloatElement: Copy {
    fn from_f64(value: f64) -> Self;
}

impl FloatElement for f32 {
    fn from_f64(value: f64) -> Self {
        value as f32
    }
}

impl FloatElement for f64 {
    fn from_f64(value: f64) -> Self {
        value
    }
}

/// Linearly rescale integer data into `[0, 1]` using the spec's bounds.
///
/// Missing bounds fall back to the natural range of `spec.dtype`. The output element
/// type is chosen by `F`.
pub fn convert_int_to_float<F: FloatElement>(data: &[i64], spec: &ArraySpec) -> Result<Vec<F>> {
    let (natural_min, natural_max) = spec.dtype.natural_bounds();
    let minimum = spec
        .minimum
        .clone()
        .unwrap_or(Bound::Scalar(natural_min));
    let maximum = spec
        .maximum
        .clone()
        .unwrap_or(Bound::Scalar(natural_max));

    data.iter()
        .enumerate()
        .map(|(index, &value)| {
            let lo = minimum.at(index)? as f64;
            let hi = maximum.at(index)? as f64;
            if hi <= lo {
                bail!("empty range at index {index}: minimum {lo} >= maximum {hi}");
            }
            Ok(F::from_f64((value as f64 - lo) / (hi - lo)))
        })
        .collect()
}
