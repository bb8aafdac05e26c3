use std::path::PathBuf;
use std::process::ExitCode;

use ct_segment::{
    CachedSource, DicomSeriesSource, Orientation, Pipeline, VolumeSource,
    config::{AppConfig, load_config},
    logging::setup_logging,
    metaimage,
};
use tracing::{error, info};

fn run(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let dicom = DicomSeriesSource {
        dir: config.input.dicom_dir.clone(),
        sort_by: config.input.sort_by,
    };
    let source: Box<dyn VolumeSource> = match config.input.cache.clone() {
        Some(cache) => Box::new(CachedSource {
            cache,
            fallback: dicom,
        }),
        None => Box::new(dicom),
    };

    let composite = Pipeline::new(config.pipeline).run_source(source.as_ref())?;

    if let Some(parent) = config.output.volume.parent() {
        std::fs::create_dir_all(parent)?;
    }
    metaimage::write(&composite, &config.output.volume)?;
    info!(path = %config.output.volume.display(), "wrote composite volume");

    if let Some(preview) = &config.output.preview {
        let middle = composite.dim().0 / 2;
        if let Some(image) = composite.slice_image(middle, Orientation::Axial) {
            image.save(preview)?;
            info!(path = %preview.display(), slice = middle, "wrote preview");
        }
    }

    for slider in &config.sliders.0 {
        info!(title = %slider.title, default = slider.default_value, "opacity control");
    }
    Ok(())
}

fn main() -> ExitCode {
    setup_logging("info");

    let config = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => match load_config(&path) {
            Ok(config) => config,
            Err(err) => {
                error!(%err, "invalid configuration");
                return ExitCode::FAILURE;
            }
        },
        None => AppConfig::default(),
    };

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "segmentation aborted");
            ExitCode::FAILURE
        }
    }
}
