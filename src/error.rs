use thiserror::Error;

use crate::metaimage::MetaImageError;
use crate::volume::Region;
use crate::volume_loader::VolumeLoaderError;

/// Geometry of a volume as seen by the error reports: index origin and
/// extent, both in `(x, y, z)` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub origin: [usize; 3],
    pub extent: [usize; 3],
}

#[derive(Debug, Error)]
pub enum SegmentationError {
    #[error("region {region:?} exceeds volume bounds {bounds:?}")]
    RegionOutOfBounds { region: Region, bounds: Region },

    #[error("region {0:?} contains no voxels")]
    EmptyRegion(Region),

    #[error("degenerate class seeds: {0}")]
    DegenerateSeeds(String),

    #[error("volume geometry mismatch: {left:?} vs {right:?}")]
    GeometryMismatch { left: Geometry, right: Geometry },

    #[error("volume source unavailable: {0}")]
    SourceUnavailable(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl From<VolumeLoaderError> for SegmentationError {
    fn from(err: VolumeLoaderError) -> Self {
        Self::SourceUnavailable(Box::new(err))
    }
}

impl From<MetaImageError> for SegmentationError {
    fn from(err: MetaImageError) -> Self {
        Self::SourceUnavailable(Box::new(err))
    }
}
