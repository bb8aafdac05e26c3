//! # CT segmentation library
//!
//! This crate turns a CT DICOM series into a single labeled volume in
//! which the skeleton, the lungs and the remaining background can be
//! styled separately by a volume renderer.

//!
//! The series is loaded with the dicom-rs ecosystem (or from a cached
//! MetaImage file) and then runs through a batch pipeline:
//!  - Crop to an anatomical window
//!  - Normalize intensities to [0, 255] and smooth with anisotropic
//!    diffusion
//!  - Cluster intensities with k-means seeded at 0, 70, 150 and 250, once
//!    per structure inside its own window
//!  - Keep the lungs and skeleton classes (the lungs mask is median
//!    filtered)
//!  - Composite the masks over a background rescaled to [4, 255]
//!
//!  The output volume uses one scalar channel with fixed bands:
//!   - `0` empty
//!   - `1` lungs
//!   - `3` skeleton
//!   - `[4, 255]` background intensity
//!
//!  [`transfer`] holds the matching colour/opacity transfer functions and
//!  the opacity sliders a viewer exposes.
//!
//! # Examples
//!
//! ## Segmenting a DICOM directory
//!
//! ```no_run
//! # use ct_segment::{Pipeline, PipelineConfig, DicomSeriesSource, SortBy, metaimage};
//! # use std::path::PathBuf;
//! let source = DicomSeriesSource {
//!     dir: PathBuf::from("data/dcms"),
//!     sort_by: SortBy::ImagePositionPatient,
//! };
//! let composite = Pipeline::new(PipelineConfig::default())
//!     .run_source(&source)
//!     .expect("should have segmented the series");
//! metaimage::write(&composite, "data/3d_image_seg.mha").expect("should have written the result");
//! ```

pub mod compositor;
pub mod config;
pub mod diffusion;
pub mod enums;
pub mod error;
pub mod intensity;
pub mod kmeans;
pub mod label;
pub mod logging;
pub mod metaimage;
pub mod pipeline;
pub mod region;
pub mod source;
pub mod transfer;
pub mod volume;
pub mod volume_loader;

pub use enums::{Orientation, SortBy, Tissue};
pub use error::SegmentationError;
pub use pipeline::{Pipeline, PipelineConfig, PipelineError};
pub use source::{CachedSource, DicomSeriesSource, MetaImageSource, VolumeSource};
pub use volume::{Region, Volume};
pub use volume_loader::VolumeLoader;
