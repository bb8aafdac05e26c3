use crate::volume::{Scalar, Volume};

use serde::{Deserialize, Serialize};

/// Closed intensity interval `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntensityRange {
    pub min: f64,
    pub max: f64,
}

impl IntensityRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }
}

/// Linearly map `input` (the volume's own min/max when `None`) onto
/// `output`. A flat input maps every voxel to `output.min`.
pub fn rescale_intensity<T: Scalar, U: Scalar>(
    volume: &Volume<T>,
    input: Option<IntensityRange>,
    output: IntensityRange,
) -> Volume<U> {
    let input = input
        .or_else(|| {
            volume
                .min_max()
                .map(|(min, max)| IntensityRange::new(min, max))
        })
        .unwrap_or(output);
    let span = input.max - input.min;
    let scale = if span > 0.0 {
        (output.max - output.min) / span
    } else {
        0.0
    };
    volume.map(|v| U::from_f64(output.min + (v.as_f64() - input.min) * scale))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array3;

    #[test]
    fn uniform_mid_gray_lands_mid_background_band() {
        let volume = Volume::new(Array3::<f32>::from_elem((2, 2, 2), 128.0), (1.0, 1.0, 1.0));
        let background: Volume<f32> = rescale_intensity(
            &volume,
            Some(IntensityRange::new(0.0, 255.0)),
            IntensityRange::new(4.0, 255.0),
        );
        let midpoint = (4.0 + 255.0) / 2.0;
        for &v in background.data() {
            assert_abs_diff_eq!(v as f64, midpoint, epsilon = 1.0);
        }
    }

    #[test]
    fn own_range_is_stretched_to_output() {
        let data = Array3::from_shape_vec((1, 1, 3), vec![-1000i16, 0, 3000]).unwrap();
        let volume = Volume::new(data, (1.0, 1.0, 1.0));
        let normalized: Volume<i16> =
            rescale_intensity(&volume, None, IntensityRange::new(0.0, 255.0));
        assert_eq!(normalized.data().as_slice().unwrap(), &[0, 64, 255]);
    }

    #[test]
    fn flat_volume_maps_to_output_minimum() {
        let volume = Volume::new(Array3::<u16>::from_elem((1, 2, 2), 42), (1.0, 1.0, 1.0));
        let out: Volume<f32> = rescale_intensity(&volume, None, IntensityRange::new(4.0, 255.0));
        assert!(out.data().iter().all(|&v| v == 4.0));
    }
}
