use crate::enums::Orientation;
use crate::error::{Geometry, SegmentationError};

use image::ImageBuffer;
use image::Luma;
use ndarray::Array3;
use ndarray::ArrayView2;
use ndarray::Zip;
use ndarray::s;
use num_traits::{Bounded, NumCast, Zero};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Voxel element types a [`Volume`] can hold.
pub trait Scalar:
    NumCast + Bounded + Zero + Copy + PartialOrd + Default + Debug + Send + Sync + 'static
{
    const INTEGRAL: bool;

    #[inline]
    fn as_f64(self) -> f64 {
        <f64 as NumCast>::from(self).unwrap_or(0.0)
    }

    /// Saturating conversion; integral types round to nearest.
    #[inline]
    fn from_f64(value: f64) -> Self {
        let value = if Self::INTEGRAL { value.round() } else { value };
        let lo = Self::min_value().as_f64();
        let hi = Self::max_value().as_f64();
        <Self as NumCast>::from(value.clamp(lo, hi)).unwrap_or_else(Self::zero)
    }
}

impl Scalar for u8 {
    const INTEGRAL: bool = true;
}
impl Scalar for u16 {
    const INTEGRAL: bool = true;
}
impl Scalar for i16 {
    const INTEGRAL: bool = true;
}
impl Scalar for f32 {
    const INTEGRAL: bool = false;
}

/// Axis-aligned box in absolute index space, `(x, y, z)` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub index: [usize; 3],
    pub size: [usize; 3],
}

impl Region {
    pub const fn new(index: [usize; 3], size: [usize; 3]) -> Self {
        Self { index, size }
    }

    /// One past the last index on each axis, `None` if that overflows.
    pub fn end(&self) -> Option<[usize; 3]> {
        Some([
            self.index[0].checked_add(self.size[0])?,
            self.index[1].checked_add(self.size[1])?,
            self.index[2].checked_add(self.size[2])?,
        ])
    }

    /// Number of voxels, `None` if that overflows.
    pub fn voxel_count(&self) -> Option<usize> {
        self.size.iter().try_fold(1usize, |acc, &n| acc.checked_mul(n))
    }

    pub fn is_empty(&self) -> bool {
        self.size.contains(&0)
    }

    /// Regions whose end overflows are never contained.
    pub fn contains(&self, other: &Region) -> bool {
        let (Some(end), Some(other_end)) = (self.end(), other.end()) else {
            return false;
        };
        (0..3).all(|axis| other.index[axis] >= self.index[axis] && other_end[axis] <= end[axis])
    }
}

/// A 3D scalar grid laid out `(depth, height, width)`, i.e. `(z, y, x)`.
///
/// `origin` is the absolute index of the first voxel, in `(x, y, z)` order,
/// so a cropped volume keeps addressing voxels the way its source did.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Volume<T> {
    pub data: Array3<T>,
    pub origin: [usize; 3],
    pub spacing: (f32, f32, f32),
}

impl<T: Scalar> Volume<T> {
    pub fn new(data: Array3<T>, spacing: (f32, f32, f32)) -> Self {
        Self::with_origin(data, [0, 0, 0], spacing)
    }

    pub fn with_origin(data: Array3<T>, origin: [usize; 3], spacing: (f32, f32, f32)) -> Self {
        Self {
            data,
            origin,
            spacing,
        }
    }

    /// Zero-filled volume covering `region`.
    pub fn zeros(region: Region, spacing: (f32, f32, f32)) -> Self {
        let [w, h, d] = region.size;
        Self::with_origin(Array3::zeros((d, h, w)), region.index, spacing)
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Size per axis in `(x, y, z)` order.
    pub fn extent(&self) -> [usize; 3] {
        let (depth, height, width) = self.dim();
        [width, height, depth]
    }

    /// The region this volume occupies in absolute index space.
    pub fn region(&self) -> Region {
        Region::new(self.origin, self.extent())
    }

    pub fn geometry(&self) -> Geometry {
        Geometry {
            origin: self.origin,
            extent: self.extent(),
        }
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<T> {
        &self.data
    }

    /// Sample at an absolute `(x, y, z)` index.
    pub fn get(&self, index: [usize; 3]) -> Option<T> {
        let [x, y, z] = index;
        let [ox, oy, oz] = self.origin;
        let local = (
            z.checked_sub(oz)?,
            y.checked_sub(oy)?,
            x.checked_sub(ox)?,
        );
        self.data.get(local).copied()
    }

    pub fn ensure_same_geometry<U: Scalar>(
        &self,
        other: &Volume<U>,
    ) -> Result<(), SegmentationError> {
        if self.origin != other.origin || self.dim() != other.dim() {
            return Err(SegmentationError::GeometryMismatch {
                left: self.geometry(),
                right: other.geometry(),
            });
        }
        Ok(())
    }

    pub fn map<U: Scalar>(&self, f: impl Fn(T) -> U + Sync + Send) -> Volume<U> {
        let data = Zip::from(&self.data).par_map_collect(|&v| f(v));
        Volume::with_origin(data, self.origin, self.spacing)
    }

    pub fn cast<U: Scalar>(&self) -> Volume<U> {
        self.map(|v| U::from_f64(v.as_f64()))
    }

    /// Voxel-wise combination of two volumes sharing origin and extent.
    pub fn zip_with<U: Scalar, V: Scalar>(
        &self,
        other: &Volume<U>,
        f: impl Fn(T, U) -> V + Sync + Send,
    ) -> Result<Volume<V>, SegmentationError> {
        self.ensure_same_geometry(other)?;
        let data = Zip::from(&self.data)
            .and(&other.data)
            .par_map_collect(|&a, &b| f(a, b));
        Ok(Volume::with_origin(data, self.origin, self.spacing))
    }

    pub fn add(&self, other: &Self) -> Result<Self, SegmentationError> {
        self.zip_with(other, |a, b| T::from_f64(a.as_f64() + b.as_f64()))
    }

    pub fn multiply(&self, other: &Self) -> Result<Self, SegmentationError> {
        self.zip_with(other, |a, b| T::from_f64(a.as_f64() * b.as_f64()))
    }

    /// Smallest and largest sample, `None` for an empty volume.
    pub fn min_max(&self) -> Option<(f64, f64)> {
        self.data
            .as_slice_memory_order()
            .map(|values| {
                values
                    .par_iter()
                    .map(|v| {
                        let v = v.as_f64();
                        (v, v)
                    })
                    .reduce_with(|a, b| (a.0.min(b.0), a.1.max(b.1)))
            })
            .unwrap_or_else(|| {
                self.data.iter().fold(None, |acc, v| {
                    let v = v.as_f64();
                    Some(match acc {
                        None => (v, v),
                        Some((lo, hi)) => (lo.min(v), hi.max(v)),
                    })
                })
            })
    }

    pub fn count_nonzero(&self) -> usize {
        self.data.iter().filter(|v| !v.is_zero()).count()
    }

    pub fn get_slice_from_axis(
        &self,
        index: usize,
        orientation: &Orientation,
    ) -> Option<ArrayView2<'_, T>> {
        if !self.is_valid_index(index, orientation) {
            return None;
        }
        let slice_result = match orientation {
            Orientation::Axial => self.data().slice(s![index, .., ..]),
            Orientation::Coronal => self.data().slice(s![.., index, ..]),
            Orientation::Sagittal => self.data().slice(s![.., .., index]),
        };
        Some(slice_result)
    }

    /// Render one slice as 8-bit grayscale, stretched over the volume's
    /// full intensity range so slices of one volume are comparable.
    pub fn slice_image(
        &self,
        index: usize,
        orientation: Orientation,
    ) -> Option<ImageBuffer<Luma<u8>, Vec<u8>>> {
        let (lo, hi) = self.min_max()?;
        let slice = self.get_slice_from_axis(index, &orientation)?;
        let scale = if hi > lo { 255.0 / (hi - lo) } else { 0.0 };
        let (height, width) = slice.dim();
        let pixel_data: Vec<u8> = slice
            .into_par_iter()
            .map(|&v| ((v.as_f64() - lo) * scale).clamp(0.0, 255.0) as u8)
            .collect();
        ImageBuffer::from_raw(width as u32, height as u32, pixel_data)
    }

    fn is_valid_index(&self, index: usize, orientation: &Orientation) -> bool {
        let dim = self.data.dim();
        let max_index = match orientation {
            Orientation::Axial => dim.0,
            Orientation::Coronal => dim.1,
            Orientation::Sagittal => dim.2,
        };
        index < max_index
    }
}
