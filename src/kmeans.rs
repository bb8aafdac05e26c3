//! Scalar k-means over voxel intensities.
//!
//! Class identity is positional: class `i` starts at `seeds[i]` and keeps
//! index `i` after convergence, so callers can rely on a fixed seed list to
//! put the same structure in the same class every run.

use crate::error::SegmentationError;
use crate::region;
use crate::volume::{Region, Volume};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Initial class means, lowest first. With these seeds and the pipeline's
/// normalization, class 1 collects lung parenchyma and class 3 bone; see
/// [`crate::pipeline::LUNGS_LABEL`] and [`crate::pipeline::SKELETON_LABEL`].
pub const DEFAULT_SEEDS: [f64; 4] = [0.0, 70.0, 150.0, 250.0];

const CHUNK: usize = 1 << 14;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierParams {
    pub seeds: Vec<f64>,
    /// Largest per-class mean shift still counted as converged.
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for ClassifierParams {
    fn default() -> Self {
        Self {
            seeds: DEFAULT_SEEDS.to_vec(),
            tolerance: 1e-3,
            max_iterations: 100,
        }
    }
}

impl ClassifierParams {
    fn validate(&self) -> Result<(), SegmentationError> {
        if self.seeds.is_empty() || self.seeds.len() > usize::from(u8::MAX) + 1 {
            return Err(SegmentationError::DegenerateSeeds(format!(
                "{} seeds, expected 1..=256",
                self.seeds.len()
            )));
        }
        if let Some(seed) = self.seeds.iter().find(|s| !s.is_finite()) {
            return Err(SegmentationError::DegenerateSeeds(format!("non-finite seed {seed}")));
        }
        for (i, a) in self.seeds.iter().enumerate() {
            if self.seeds[i + 1..].contains(a) {
                return Err(SegmentationError::DegenerateSeeds(format!("duplicate seed {a}")));
            }
        }
        Ok(())
    }
}

/// Converged (or best available) class means.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansFit {
    pub means: Vec<f64>,
    pub iterations: usize,
    pub converged: bool,
}

impl KMeansFit {
    /// Index of the nearest mean; ties go to the lower class index.
    #[inline]
    pub fn nearest(&self, value: f64) -> usize {
        nearest(&self.means, value)
    }
}

#[inline]
fn nearest(means: &[f64], value: f64) -> usize {
    let mut best = 0;
    let mut best_distance = f64::INFINITY;
    for (class, mean) in means.iter().enumerate() {
        let distance = (value - mean).abs();
        if distance < best_distance {
            best = class;
            best_distance = distance;
        }
    }
    best
}

/// Per-class (sum, count) for one assignment pass.
fn accumulate(values: &[f32], means: &[f64]) -> (Vec<f64>, Vec<usize>) {
    let partials: Vec<_> = values
        .par_chunks(CHUNK)
        .map(|chunk| {
            let mut sums = vec![0.0; means.len()];
            let mut counts = vec![0usize; means.len()];
            for &v in chunk {
                let class = nearest(means, v as f64);
                sums[class] += v as f64;
                counts[class] += 1;
            }
            (sums, counts)
        })
        .collect();

    let mut sums = vec![0.0; means.len()];
    let mut counts = vec![0usize; means.len()];
    for (partial_sums, partial_counts) in partials {
        for class in 0..means.len() {
            sums[class] += partial_sums[class];
            counts[class] += partial_counts[class];
        }
    }
    (sums, counts)
}

/// Lloyd iterations over `values`, starting from `params.seeds`.
pub fn fit(values: &[f32], params: &ClassifierParams) -> Result<KMeansFit, SegmentationError> {
    params.validate()?;
    let mut means = params.seeds.clone();
    let mut converged = false;
    let mut iterations = 0;

    while iterations < params.max_iterations {
        iterations += 1;
        let (sums, counts) = accumulate(values, &means);
        let mut shift = 0.0f64;
        for class in 0..means.len() {
            // An emptied class keeps its previous mean.
            if counts[class] > 0 {
                let updated = sums[class] / counts[class] as f64;
                shift = shift.max((updated - means[class]).abs());
                means[class] = updated;
            }
        }
        debug!(iterations, shift, ?means, "k-means iteration");
        if shift <= params.tolerance {
            converged = true;
            break;
        }
    }

    if !converged {
        warn!(
            iterations,
            ?means,
            "k-means hit the iteration cap, using best available means"
        );
    }
    Ok(KMeansFit {
        means,
        iterations,
        converged,
    })
}

/// Cluster the intensities inside `region` and label each of its voxels
/// with its class index. The label volume covers exactly `region`.
pub fn classify(
    volume: &Volume<f32>,
    params: &ClassifierParams,
    region: Region,
) -> Result<Volume<u8>, SegmentationError> {
    if region.is_empty() {
        return Err(SegmentationError::EmptyRegion(region));
    }
    params.validate()?;
    let roi = region::extract(volume, region)?;
    let values = roi.data.as_standard_layout();
    let fit = fit(values.as_slice().unwrap_or_default(), params)?;
    debug!(?region, means = ?fit.means, converged = fit.converged, "classified region");
    Ok(roi.map(|v| fit.nearest(v as f64) as u8))
}
