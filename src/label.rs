use crate::error::SegmentationError;
use crate::volume::Volume;

use ndarray::{Array3, Axis};
use rayon::prelude::*;
use tracing::debug;

/// Neighbourhood radius of the denoising median filter on every axis.
pub const DENOISE_RADIUS: usize = 1;

/// Keep `feature` where `labels == label`, zero elsewhere. With `denoise`,
/// the mask is median filtered afterwards to drop isolated voxels.
pub fn extract_label(
    labels: &Volume<u8>,
    feature: &Volume<f32>,
    label: u8,
    denoise: bool,
) -> Result<Volume<f32>, SegmentationError> {
    let mask = labels.zip_with(feature, |class, value| {
        if class == label { value } else { 0.0 }
    })?;
    debug!(label, denoise, voxels = mask.count_nonzero(), "extracted label");
    if denoise {
        Ok(median_filter(&mask, DENOISE_RADIUS))
    } else {
        Ok(mask)
    }
}

/// Replace each voxel by the median of its `(2r+1)³` neighbourhood.
/// Borders replicate the nearest edge voxel.
pub fn median_filter(volume: &Volume<f32>, radius: usize) -> Volume<f32> {
    let data = &volume.data;
    let (depth, height, width) = data.dim();
    let r = radius as isize;
    let window = (2 * radius + 1).pow(3);
    let clamp = |i: usize, offset: isize, len: usize| {
        (i as isize + offset).clamp(0, len as isize - 1) as usize
    };

    let mut out = Array3::<f32>::zeros(data.raw_dim());
    // One scratch buffer per slice, reused for every voxel in it.
    out.axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(z, mut plane)| {
            let mut samples = Vec::with_capacity(window);
            for ((y, x), value) in plane.indexed_iter_mut() {
                samples.clear();
                for dz in -r..=r {
                    let zz = clamp(z, dz, depth);
                    for dy in -r..=r {
                        let yy = clamp(y, dy, height);
                        for dx in -r..=r {
                            samples.push(data[[zz, yy, clamp(x, dx, width)]]);
                        }
                    }
                }
                let mid = samples.len() / 2;
                let (_, median, _) = samples.select_nth_unstable_by(mid, f32::total_cmp);
                *value = *median;
            }
        });
    Volume::with_origin(out, volume.origin, volume.spacing)
}
