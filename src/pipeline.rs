use crate::compositor::Compositor;
use crate::diffusion::{self, DiffusionParams};
use crate::error::SegmentationError;
use crate::intensity::{IntensityRange, rescale_intensity};
use crate::kmeans::{self, ClassifierParams};
use crate::label;
use crate::region;
use crate::source::VolumeSource;
use crate::volume::{Region, Scalar, Volume};

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{info, warn};
use web_time::Instant;

/// Class index of bone under [`kmeans::DEFAULT_SEEDS`] (seed 250).
pub const SKELETON_LABEL: u8 = 3;
/// Class index of lung parenchyma under [`kmeans::DEFAULT_SEEDS`] (seed 70).
pub const LUNGS_LABEL: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Load,
    Crop,
    Normalize,
    Smooth,
    Classify,
    ExtractLabel,
    Embed,
    Compose,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Load => "load",
            Stage::Crop => "crop",
            Stage::Normalize => "normalize",
            Stage::Smooth => "smooth",
            Stage::Classify => "classify",
            Stage::ExtractLabel => "extract label",
            Stage::Embed => "embed",
            Stage::Compose => "compose",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{stage} stage failed{}: {source}", in_pass(.pass))]
    Stage {
        stage: Stage,
        pass: Option<String>,
        #[source]
        source: SegmentationError,
    },
}

fn in_pass(pass: &Option<String>) -> String {
    pass.as_deref()
        .map(|name| format!(" in {name} pass"))
        .unwrap_or_default()
}

impl PipelineError {
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Stage { stage, .. } => *stage,
        }
    }
}

/// One labeled structure cut out of its own crop window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassConfig {
    pub name: String,
    pub region: Region,
    pub label: u8,
    pub denoise: bool,
}

impl PassConfig {
    pub fn skeleton() -> Self {
        Self {
            name: "skeleton".into(),
            region: Region::new([235, 420, 1], [410, 289, 27]),
            label: SKELETON_LABEL,
            denoise: false,
        }
    }

    pub fn lungs() -> Self {
        Self {
            name: "lungs".into(),
            region: Region::new([250, 450, 1], [380, 200, 27]),
            label: LUNGS_LABEL,
            denoise: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Anatomical window every later stage works inside.
    pub working_region: Region,
    /// Output range of normalization; also the input range the compositor
    /// rescales the background from.
    pub normalize_range: IntensityRange,
    pub diffusion: DiffusionParams,
    pub classifier: ClassifierParams,
    pub skeleton: PassConfig,
    pub lungs: PassConfig,
    pub compositor: Compositor,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            working_region: Region::new([235, 420, 1], [410, 290, 27]),
            normalize_range: IntensityRange::new(0.0, 255.0),
            diffusion: DiffusionParams::default(),
            classifier: ClassifierParams::default(),
            skeleton: PassConfig::skeleton(),
            lungs: PassConfig::lungs(),
            compositor: Compositor::default(),
        }
    }
}

fn timed<R>(
    stage: Stage,
    pass: Option<&str>,
    f: impl FnOnce() -> Result<R, SegmentationError>,
) -> Result<R, PipelineError> {
    let start = Instant::now();
    let result = f().map_err(|source| PipelineError::Stage {
        stage,
        pass: pass.map(str::to_owned),
        source,
    });
    match &result {
        Ok(_) => info!(%stage, pass, elapsed = ?start.elapsed(), "stage done"),
        Err(err) => warn!(%stage, pass, %err, "stage failed"),
    }
    result
}

pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run_source(&self, source: &dyn VolumeSource) -> Result<Volume<f32>, PipelineError> {
        let volume = timed(Stage::Load, None, || source.load())?;
        self.run(&volume)
    }

    /// Crop, normalize, smooth, segment both passes and composite. Nothing
    /// is returned unless every stage succeeds.
    pub fn run<T: Scalar>(&self, volume: &Volume<T>) -> Result<Volume<f32>, PipelineError> {
        let config = &self.config;
        info!(extent = ?volume.extent(), "segmentation started");

        let cropped = timed(Stage::Crop, None, || {
            region::extract(volume, config.working_region)
        })?;
        // Rescale on the integer grid first, then move to floats.
        let normalized: Volume<i16> = timed(Stage::Normalize, None, || {
            Ok(rescale_intensity(&cropped, None, config.normalize_range))
        })?;
        drop(cropped);
        let smoothed = timed(Stage::Smooth, None, || {
            Ok(diffusion::smooth(&normalized.cast(), &config.diffusion))
        })?;

        // Independent clustering per pass: the windows differ.
        let skeleton = self.segment_pass(&smoothed, &config.skeleton)?;
        let lungs = self.segment_pass(&smoothed, &config.lungs)?;
        drop(smoothed);

        // The background is the normalized volume, so its input range is
        // the normalize range whatever the compositor was configured with.
        let compositor = Compositor {
            intensity_range: Some(config.normalize_range),
            ..config.compositor
        };
        // Skeleton last: bone inside a lung window keeps its own label.
        let composite = timed(Stage::Compose, None, || {
            compositor.compose(&[lungs, skeleton], &normalized)
        })?;
        info!(extent = ?composite.extent(), "segmentation finished");
        Ok(composite)
    }

    /// Classify inside the pass window, keep the pass label and lay the mask
    /// back onto the working window. Mask values equal the label index.
    pub fn segment_pass(
        &self,
        smoothed: &Volume<f32>,
        pass: &PassConfig,
    ) -> Result<Volume<f32>, PipelineError> {
        let name = Some(pass.name.as_str());
        if usize::from(pass.label) >= self.config.classifier.seeds.len() {
            warn!(
                pass = %pass.name,
                label = pass.label,
                classes = self.config.classifier.seeds.len(),
                "pass label has no class, mask will be empty"
            );
        }

        let labels = timed(Stage::Classify, name, || {
            kmeans::classify(smoothed, &self.config.classifier, pass.region)
        })?;
        let mask = timed(Stage::ExtractLabel, name, || {
            label::extract_label(&labels, &labels.cast(), pass.label, pass.denoise)
        })?;
        timed(Stage::Embed, name, || region::embed(&mask, smoothed.region()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn small_config() -> PipelineConfig {
        PipelineConfig {
            working_region: Region::new([1, 1, 0], [10, 8, 4]),
            skeleton: PassConfig {
                region: Region::new([1, 1, 0], [10, 7, 4]),
                ..PassConfig::skeleton()
            },
            lungs: PassConfig {
                region: Region::new([2, 2, 0], [8, 6, 4]),
                ..PassConfig::lungs()
            },
            ..Default::default()
        }
    }

    #[test]
    fn default_regions_nest_inside_the_working_window() {
        let config = PipelineConfig::default();
        assert!(config.working_region.contains(&config.skeleton.region));
        assert!(config.working_region.contains(&config.lungs.region));
        assert_ne!(config.skeleton.region, config.lungs.region);
    }

    #[test]
    fn stage_errors_name_the_stage_and_pass() {
        let volume = Volume::new(Array3::<i16>::zeros((4, 10, 12)), (1.0, 1.0, 1.0));
        let mut config = small_config();
        config.lungs.region = Region::new([2, 2, 0], [8, 6, 5]);

        let err = Pipeline::new(config).run(&volume).unwrap_err();
        assert_eq!(err.stage(), Stage::Classify);
        assert!(err.to_string().contains("lungs pass"));
    }

    #[test]
    fn working_window_outside_the_volume_fails_at_crop() {
        let volume = Volume::new(Array3::<i16>::zeros((2, 2, 2)), (1.0, 1.0, 1.0));
        let err = Pipeline::new(PipelineConfig::default()).run(&volume).unwrap_err();
        assert_eq!(err.stage(), Stage::Crop);
    }

    #[test]
    fn config_round_trips_through_json() {
        let json = serde_json::to_string(&PipelineConfig::default()).unwrap();
        let parsed: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, PipelineConfig::default());

        let partial: PipelineConfig =
            serde_json::from_str(r#"{"diffusion": {"time_step": 0.01}}"#).unwrap();
        assert_eq!(partial.diffusion.time_step, 0.01);
        assert_eq!(partial.diffusion.iterations, 5);
        assert_eq!(partial.skeleton, PassConfig::skeleton());
    }
}
