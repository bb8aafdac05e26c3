use crate::enums::SortBy;
use crate::pipeline::PipelineConfig;
use crate::transfer::OpacitySlider;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub input: InputConfig,
    pub output: OutputConfig,
    pub pipeline: PipelineConfig,
    pub sliders: SliderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub dicom_dir: PathBuf,
    pub sort_by: SortBy,
    /// MetaImage copy of the loaded series, reused on later runs.
    pub cache: Option<PathBuf>,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            dicom_dir: PathBuf::from("data/dcms"),
            sort_by: SortBy::default(),
            cache: Some(PathBuf::from("data/3d_image.mha")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub volume: PathBuf,
    /// Middle axial slice of the composite as PNG.
    pub preview: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            volume: PathBuf::from("data/3d_image_seg.mha"),
            preview: Some(PathBuf::from("data/3d_image_seg.png")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SliderConfig(pub Vec<OpacitySlider>);

impl Default for SliderConfig {
    fn default() -> Self {
        Self(OpacitySlider::defaults())
    }
}

pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::Region;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{
                "input": { "dicom_dir": "scans/chest", "sort_by": "InstanceNumber" },
                "pipeline": { "lungs": { "name": "lungs", "region": { "index": [0, 0, 0], "size": [8, 8, 8] }, "label": 1, "denoise": false } }
            }"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.input.dicom_dir, PathBuf::from("scans/chest"));
        assert_eq!(config.input.sort_by, SortBy::InstanceNumber);
        assert_eq!(config.input.cache, InputConfig::default().cache);
        assert_eq!(config.pipeline.lungs.region, Region::new([0, 0, 0], [8, 8, 8]));
        assert!(!config.pipeline.lungs.denoise);
        assert_eq!(config.pipeline.skeleton.label, 3);
        assert_eq!(config.sliders.0.len(), 3);
    }

    #[test]
    fn malformed_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("broken.json"));
    }
}
