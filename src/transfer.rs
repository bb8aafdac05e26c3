//! Colour and opacity transfer functions keyed on composite values.
//!
//! The composite volume reserves `0` for empty voxels, `1` for lungs, `3`
//! for skeleton and `[4, 255]` for background intensity. A renderer styles
//! each band by sampling these piecewise-linear functions.

use crate::enums::Tissue;

use serde::{Deserialize, Serialize};
use tracing::debug;

pub type Rgb = [f64; 3];

pub const BLACK: Rgb = [0.0, 0.0, 0.0];
pub const RED: Rgb = [1.0, 0.0, 0.0];
pub const VIOLET: Rgb = [1.0, 0.0, 1.0];
pub const BLUE: Rgb = [0.0, 0.0, 1.0];
pub const WHITE: Rgb = [1.0, 1.0, 1.0];

pub const LUNGS_VALUE: f64 = 1.0;
pub const SKELETON_VALUE: f64 = 3.0;
pub const BACKGROUND_BAND: (f64, f64) = (4.0, 255.0);

/// Sorted `(x, value)` control points with linear interpolation between
/// them and clamping outside.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Piecewise<V> {
    points: Vec<(f64, V)>,
}

pub trait Lerp: Copy {
    fn lerp(a: Self, b: Self, t: f64) -> Self;
}

impl Lerp for f64 {
    fn lerp(a: Self, b: Self, t: f64) -> Self {
        a + (b - a) * t
    }
}

impl Lerp for Rgb {
    fn lerp(a: Self, b: Self, t: f64) -> Self {
        std::array::from_fn(|i| <f64 as Lerp>::lerp(a[i], b[i], t))
    }
}

impl<V: Lerp> Piecewise<V> {
    pub fn new() -> Self {
        Self { points: Vec::new() }
    }

    /// Insert a point, replacing any existing point at the same `x`.
    pub fn add_point(&mut self, x: f64, value: V) {
        match self.points.binary_search_by(|(px, _)| px.total_cmp(&x)) {
            Ok(i) => self.points[i].1 = value,
            Err(i) => self.points.insert(i, (x, value)),
        }
    }

    /// Replace everything in `[x1, x2]` with a linear segment.
    pub fn add_segment(&mut self, x1: f64, v1: V, x2: f64, v2: V) {
        let (lo, hi) = if x1 <= x2 { (x1, x2) } else { (x2, x1) };
        self.points.retain(|(x, _)| *x < lo || *x > hi);
        self.add_point(x1, v1);
        self.add_point(x2, v2);
    }

    pub fn points(&self) -> &[(f64, V)] {
        &self.points
    }

    pub fn sample(&self, x: f64) -> Option<V> {
        let first = self.points.first()?;
        let last = self.points.last()?;
        if x <= first.0 {
            return Some(first.1);
        }
        if x >= last.0 {
            return Some(last.1);
        }
        let i = self.points.partition_point(|(px, _)| *px <= x);
        let (x0, v0) = self.points[i - 1];
        let (x1, v1) = self.points[i];
        Some(V::lerp(v0, v1, (x - x0) / (x1 - x0)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferFunction {
    pub color: Piecewise<Rgb>,
    pub opacity: Piecewise<f64>,
}

impl Default for TransferFunction {
    fn default() -> Self {
        let (lo, hi) = BACKGROUND_BAND;
        let mut color = Piecewise::new();
        color.add_point(0.0, BLACK);
        color.add_point(LUNGS_VALUE, RED);
        color.add_point(2.0, BLACK);
        color.add_point(SKELETON_VALUE, VIOLET);
        color.add_segment(lo, BLUE, hi, WHITE);

        let mut opacity = Piecewise::new();
        opacity.add_point(0.0, 0.0);
        opacity.add_point(LUNGS_VALUE, 0.05);
        opacity.add_point(2.0, 0.0);
        opacity.add_point(SKELETON_VALUE, 0.0);
        opacity.add_segment(lo, 0.0, hi, 0.01);

        Self { color, opacity }
    }
}

impl TransferFunction {
    /// Set the opacity of one tissue band from a percentage.
    ///
    /// The background keeps zero opacity at its low end and ramps up to
    /// the requested value at 255.
    pub fn set_opacity(&mut self, tissue: Tissue, percent: f64) {
        let alpha = (percent / 100.0).clamp(0.0, 1.0);
        match tissue {
            Tissue::Lungs => self.opacity.add_point(LUNGS_VALUE, alpha),
            Tissue::Skeleton => self.opacity.add_point(SKELETON_VALUE, alpha),
            Tissue::Background => {
                let (lo, hi) = BACKGROUND_BAND;
                self.opacity.add_segment(lo, 0.0, hi, alpha);
            }
        }
        debug!(?tissue, alpha, "opacity updated");
    }

    pub fn opacity_at(&self, value: f64) -> f64 {
        self.opacity.sample(value).unwrap_or(0.0)
    }

    pub fn color_at(&self, value: f64) -> Rgb {
        self.color.sample(value).unwrap_or(BLACK)
    }
}

fn ignore(_: f64) {}

/// A 0–100 % opacity control bound to one tissue band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpacitySlider {
    pub title: String,
    pub tissue: Tissue,
    pub range: (f64, f64),
    /// Normalized display coordinates of the slider's left end.
    pub position: (f64, f64),
    pub default_value: f64,
    /// Notified with the clamped value after every interaction.
    #[serde(skip, default = "default_callback")]
    pub callback: fn(f64),
}

fn default_callback() -> fn(f64) {
    ignore
}

impl OpacitySlider {
    pub fn new(title: impl Into<String>, tissue: Tissue, default_value: f64) -> Self {
        Self {
            title: title.into(),
            tissue,
            range: (0.0, 100.0),
            position: (0.05, 0.1),
            default_value,
            callback: ignore,
        }
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.position = (x, y);
        self
    }

    pub fn with_callback(mut self, callback: fn(f64)) -> Self {
        self.callback = callback;
        self
    }

    /// The three sliders of the viewer: lungs, skeleton, background.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("Lungs opacity %", Tissue::Lungs, 20.0).at(0.05, 0.1),
            Self::new("Skeleton opacity %", Tissue::Skeleton, 28.0).at(0.35, 0.1),
            Self::new("Background opacity %", Tissue::Background, 1.0).at(0.65, 0.1),
        ]
    }

    /// Apply a dragged value: clamp it, update the bound band, notify.
    pub fn interact(&self, value: f64, transfer: &mut TransferFunction) -> f64 {
        let value = value.clamp(self.range.0, self.range.1);
        transfer.set_opacity(self.tissue, value);
        (self.callback)(value);
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn default_bands_are_distinguishable() {
        let tf = TransferFunction::default();
        assert_eq!(tf.color_at(1.0), RED);
        assert_eq!(tf.color_at(3.0), VIOLET);
        assert_eq!(tf.color_at(4.0), BLUE);
        assert_eq!(tf.color_at(255.0), WHITE);
        assert_abs_diff_eq!(tf.opacity_at(0.0), 0.0);
        assert_abs_diff_eq!(tf.opacity_at(1.0), 0.05);
        assert_abs_diff_eq!(tf.opacity_at(255.0), 0.01);
    }

    #[test]
    fn add_point_replaces_existing() {
        let mut f = Piecewise::<f64>::new();
        f.add_point(1.0, 0.2);
        f.add_point(1.0, 0.7);
        assert_eq!(f.points(), &[(1.0, 0.7)]);
    }

    #[test]
    fn add_segment_clears_the_span() {
        let mut f = Piecewise::<f64>::new();
        for x in [0.0, 5.0, 10.0, 20.0] {
            f.add_point(x, 1.0);
        }
        f.add_segment(4.0, 0.0, 12.0, 0.5);
        let xs: Vec<f64> = f.points().iter().map(|p| p.0).collect();
        assert_eq!(xs, vec![0.0, 4.0, 12.0, 20.0]);
        assert_abs_diff_eq!(f.sample(8.0).unwrap(), 0.25);
    }

    static LAST: AtomicU64 = AtomicU64::new(0);

    fn record(value: f64) {
        LAST.store(value.to_bits(), Ordering::SeqCst);
    }

    #[test]
    fn slider_clamps_updates_and_notifies() {
        let mut tf = TransferFunction::default();
        let slider = OpacitySlider::new("Skeleton opacity %", Tissue::Skeleton, 28.0)
            .with_callback(record);

        assert_eq!(slider.interact(140.0, &mut tf), 100.0);
        assert_abs_diff_eq!(tf.opacity_at(SKELETON_VALUE), 1.0);
        assert_eq!(f64::from_bits(LAST.load(Ordering::SeqCst)), 100.0);

        slider.interact(28.0, &mut tf);
        assert_abs_diff_eq!(tf.opacity_at(SKELETON_VALUE), 0.28);
        assert_abs_diff_eq!(tf.opacity_at(LUNGS_VALUE), 0.05);
    }

    #[test]
    fn background_slider_rescales_the_band() {
        let mut tf = TransferFunction::default();
        let background = &OpacitySlider::defaults()[2];
        background.interact(50.0, &mut tf);
        assert_abs_diff_eq!(tf.opacity_at(255.0), 0.5);
        assert_abs_diff_eq!(tf.opacity_at(4.0), 0.0);
        assert_abs_diff_eq!(tf.opacity_at(SKELETON_VALUE), 0.0);
    }

    #[test]
    fn default_sliders_use_a_no_op_callback() {
        let mut tf = TransferFunction::default();
        for slider in OpacitySlider::defaults() {
            let value = slider.interact(slider.default_value, &mut tf);
            assert_eq!(value, slider.default_value);
        }
        assert_abs_diff_eq!(tf.opacity_at(LUNGS_VALUE), 0.2);
    }
}
