//! Layering of segment masks over a background intensity band.
//!
//! Segment masks carry small label values while the background is
//! rescaled into a band that starts above every label, so a single scalar
//! transfer function can tell "tissue class N" from "raw intensity I".

use crate::error::SegmentationError;
use crate::intensity::{IntensityRange, rescale_intensity};
use crate::volume::{Scalar, Volume};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Segment values at or above this claim a voxel for the segment layer.
pub const GATE_THRESHOLD: f32 = 1.0;

/// Exclusive merge of two masks: `over` wins wherever it is non-zero and
/// `under` shows through elsewhere. Masks from independent passes may
/// claim the same voxel, and adding them would leave a value that is no
/// label at all.
pub fn merge_segments(
    under: &Volume<f32>,
    over: &Volume<f32>,
) -> Result<Volume<f32>, SegmentationError> {
    under.zip_with(over, |u, o| if o != 0.0 { o } else { u })
}

/// `0` where a segment claimed the voxel, `1` where background shows.
pub fn background_gate(segments: &Volume<f32>) -> Volume<u8> {
    segments.map(|v| u8::from(v < GATE_THRESHOLD))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Compositor {
    /// Intensity range of the volume fed as background. `None` uses the
    /// volume's own min/max.
    pub intensity_range: Option<IntensityRange>,
    /// Band the background is rescaled into; must start above every
    /// segment label.
    pub background_range: IntensityRange,
}

impl Default for Compositor {
    fn default() -> Self {
        Self {
            intensity_range: Some(IntensityRange::new(0.0, 255.0)),
            background_range: IntensityRange::new(4.0, 255.0),
        }
    }
}

impl Compositor {
    /// Rescaled background with claimed voxels zeroed out.
    pub fn masked_background<T: Scalar>(
        &self,
        intensity: &Volume<T>,
        gate: &Volume<u8>,
    ) -> Result<Volume<f32>, SegmentationError> {
        let background: Volume<f32> =
            rescale_intensity(intensity, self.intensity_range, self.background_range);
        background.zip_with(gate, |value, open| value * f32::from(open))
    }

    /// Merge `segments`, gate the background by them and add the two layers.
    ///
    /// Segments are given in ascending precedence: where several claim a
    /// voxel, the last one keeps it.
    pub fn compose<T: Scalar>(
        &self,
        segments: &[Volume<f32>],
        intensity: &Volume<T>,
    ) -> Result<Volume<f32>, SegmentationError> {
        let mut merged = Volume::<f32>::zeros(intensity.region(), intensity.spacing);
        for mask in segments {
            merged = merge_segments(&merged, mask)?;
        }
        let gate = background_gate(&merged);
        let background = self.masked_background(intensity, &gate)?;
        debug!(
            claimed = merged.count_nonzero(),
            background = background.count_nonzero(),
            "composited segments over background"
        );
        merged.add(&background)
    }
}
