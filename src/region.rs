use crate::error::SegmentationError;
use crate::volume::{Region, Scalar, Volume};

use ndarray::s;
use tracing::debug;

fn ensure_within(region: Region, bounds: Region) -> Result<(), SegmentationError> {
    if bounds.contains(&region) {
        Ok(())
    } else {
        Err(SegmentationError::RegionOutOfBounds { region, bounds })
    }
}

/// Copy `region` out of `volume`. The result keeps `region.index` as its
/// origin and carries no orientation beyond the identity axes.
pub fn extract<T: Scalar>(volume: &Volume<T>, region: Region) -> Result<Volume<T>, SegmentationError> {
    ensure_within(region, volume.region())?;
    let [x0, y0, z0] = local_start(volume, region);
    let [w, h, d] = region.size;
    let data = volume
        .data
        .slice(s![z0..z0 + d, y0..y0 + h, x0..x0 + w])
        .to_owned();
    debug!(?region, "extracted region");
    Ok(Volume::with_origin(data, region.index, volume.spacing))
}

/// Place `volume` into a zero-filled volume covering `target`.
pub fn embed<T: Scalar>(volume: &Volume<T>, target: Region) -> Result<Volume<T>, SegmentationError> {
    ensure_within(volume.region(), target)?;
    let mut out = Volume::zeros(target, volume.spacing);
    let [x0, y0, z0] = local_start(&out, volume.region());
    let (d, h, w) = volume.dim();
    out.data
        .slice_mut(s![z0..z0 + d, y0..y0 + h, x0..x0 + w])
        .assign(&volume.data);
    Ok(out)
}

fn local_start<T: Scalar>(volume: &Volume<T>, region: Region) -> [usize; 3] {
    std::array::from_fn(|axis| region.index[axis] - volume.origin[axis])
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn source() -> Volume<i16> {
        let data = Array3::from_shape_fn((4, 6, 8), |(z, y, x)| (z * 100 + y * 10 + x) as i16);
        Volume::new(data, (0.7, 0.7, 3.0))
    }

    #[test]
    fn extracted_region_keeps_absolute_indices() {
        let volume = source();
        let cropped = extract(&volume, Region::new([2, 1, 1], [5, 4, 3])).unwrap();
        assert_eq!(cropped.extent(), [5, 4, 3]);
        assert_eq!(cropped.origin, [2, 1, 1]);
        assert_eq!(cropped.get([2, 1, 1]), volume.get([2, 1, 1]));
        assert_eq!(cropped.get([6, 4, 3]), Some(346));
    }

    #[test]
    fn re_extracting_full_bounds_preserves_extent() {
        let volume = source();
        let region = Region::new([1, 2, 0], [6, 3, 4]);
        let cropped = extract(&volume, region).unwrap();
        let again = extract(&cropped, cropped.region()).unwrap();
        assert_eq!(again.extent(), region.size);
        assert_eq!(again, cropped);
    }

    #[test]
    fn out_of_bounds_region_is_rejected() {
        let volume = source();
        let err = extract(&volume, Region::new([4, 0, 0], [5, 1, 1])).unwrap_err();
        assert!(matches!(err, SegmentationError::RegionOutOfBounds { .. }));

        let cropped = extract(&volume, Region::new([2, 2, 1], [2, 2, 2])).unwrap();
        assert!(extract(&cropped, Region::new([1, 2, 1], [2, 2, 2])).is_err());
    }

    #[test]
    fn overflowing_region_is_out_of_bounds() {
        let volume = source();
        let err = extract(&volume, Region::new([2, 0, 0], [usize::MAX, 1, 1])).unwrap_err();
        assert!(matches!(err, SegmentationError::RegionOutOfBounds { .. }));
    }

    #[test]
    fn embed_zero_fills_outside_source() {
        let volume = source();
        let inner = extract(&volume, Region::new([2, 1, 1], [2, 2, 1])).unwrap();
        let target = Region::new([0, 0, 0], [8, 6, 4]);
        let embedded = embed(&inner, target).unwrap();
        assert_eq!(embedded.region(), target);
        assert_eq!(embedded.get([3, 2, 1]), volume.get([3, 2, 1]));
        assert_eq!(embedded.get([0, 0, 0]), Some(0));
        assert_eq!(embedded.count_nonzero(), 4);
        assert!(embed(&volume, Region::new([0, 0, 0], [2, 2, 2])).is_err());
    }
}
