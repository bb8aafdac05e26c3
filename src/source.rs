//! Where the CT volume comes from. The pipeline only sees [`VolumeSource`].

use crate::enums::SortBy;
use crate::error::SegmentationError;
use crate::metaimage;
use crate::volume::Volume;
use crate::volume_loader::VolumeLoader;

use std::path::PathBuf;
use tracing::{info, warn};

pub trait VolumeSource {
    fn load(&self) -> Result<Volume<i16>, SegmentationError>;
}

/// A directory of `.dcm` slices belonging to one series.
#[derive(Debug, Clone)]
pub struct DicomSeriesSource {
    pub dir: PathBuf,
    pub sort_by: SortBy,
}

impl VolumeSource for DicomSeriesSource {
    fn load(&self) -> Result<Volume<i16>, SegmentationError> {
        Ok(VolumeLoader::load_from_directory(&self.dir, self.sort_by)?)
    }
}

/// A volume previously written as MetaImage.
#[derive(Debug, Clone)]
pub struct MetaImageSource {
    pub path: PathBuf,
}

impl VolumeSource for MetaImageSource {
    fn load(&self) -> Result<Volume<i16>, SegmentationError> {
        Ok(metaimage::read(&self.path)?)
    }
}

/// Reads `cache` when it exists, otherwise loads `fallback` and writes the
/// cache for the next run.
pub struct CachedSource<S> {
    pub cache: PathBuf,
    pub fallback: S,
}

impl<S: VolumeSource> VolumeSource for CachedSource<S> {
    fn load(&self) -> Result<Volume<i16>, SegmentationError> {
        if self.cache.is_file() {
            info!(cache = %self.cache.display(), "reading cached volume");
            return MetaImageSource {
                path: self.cache.clone(),
            }
            .load();
        }

        let volume = self.fallback.load()?;
        if let Some(parent) = self.cache.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SegmentationError::SourceUnavailable(e.into()))?;
        }
        match metaimage::write(&volume, &self.cache) {
            Ok(()) => info!(cache = %self.cache.display(), "cached volume"),
            Err(err) => warn!(%err, cache = %self.cache.display(), "could not write volume cache"),
        }
        Ok(volume)
    }
}

/// In-memory volume, mostly for tests and embedding callers.
impl VolumeSource for Volume<i16> {
    fn load(&self) -> Result<Volume<i16>, SegmentationError> {
        Ok(self.clone())
    }
}
