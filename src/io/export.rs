//! Export pipeline: turn composites into materialization jobs
//!
//! Jobs run out of process. An [`ExportBackend`] accepts a fully resolved
//! [`ExportJob`] and hands back a [`JobHandle`]; this module never tracks a
//! job after submission.

use crate::core::collection::ImageCollection;
use crate::io::metadata;
use crate::types::{CompositeError, CompositeResult, Geometry, RasterImage, Region};
use std::path::PathBuf;

/// Default pixel budget of a single export job
pub const DEFAULT_MAX_PIXELS: f64 = 1e13;

/// Handle returned by the job subsystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub id: String,
}

/// Fully resolved materialization request
#[derive(Debug, Clone)]
pub struct ExportJob {
    pub image: RasterImage,
    pub description: String,
    pub file_name_prefix: String,
    pub folder: String,
    pub crs: String,
    pub crs_transform: [f64; 6],
    pub scale: f64,
    pub region: Geometry,
    pub max_pixels: f64,
    pub skip_empty_tiles: bool,
}

/// Seam to the asynchronous job subsystem
pub trait ExportBackend: Send + Sync {
    /// Submit one job; returns once the subsystem has accepted it
    fn submit(&self, job: &ExportJob) -> CompositeResult<JobHandle>;
}

/// Export parameters
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Destination folder understood by the backend
    pub folder: String,
    /// Output scale; defaults to the nominal scale of the first band
    pub scale: Option<f64>,
    /// Output CRS; defaults to the CRS of the first band
    pub crs: Option<String>,
    /// Export region; defaults to the image footprint
    pub region: Option<Region>,
    /// Log each resolved job at info level
    pub verbose: bool,
    pub save_metadata: bool,
    pub metadata_folder: PathBuf,
    pub max_pixels: f64,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            folder: String::new(),
            scale: None,
            crs: None,
            region: None,
            verbose: false,
            save_metadata: true,
            metadata_folder: PathBuf::from("."),
            max_pixels: DEFAULT_MAX_PIXELS,
        }
    }
}

/// Accepted job and the outcome of its metadata sidecar
#[derive(Debug)]
pub struct ExportReceipt {
    pub handle: JobHandle,
    /// `None` when sidecars are disabled
    pub sidecar: Option<CompositeResult<PathBuf>>,
}

/// Outcome of a collection export
#[derive(Debug, Default)]
pub struct ExportSummary {
    pub submitted: Vec<JobHandle>,
    /// Image label and the error that stopped its submission
    pub failed: Vec<(String, CompositeError)>,
    /// Accepted jobs whose sidecar could not be written
    pub sidecar_failures: Vec<(String, CompositeError)>,
}

impl ExportSummary {
    /// Every image was submitted and every requested sidecar written
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.sidecar_failures.is_empty()
    }
}

/// Region geometry requested by the caller, falling back to the footprint
fn resolve_region(image: &RasterImage, requested: Option<&Region>) -> CompositeResult<(Geometry, bool)> {
    if let Some(region) = requested {
        match region.geometry() {
            Some(geometry) => return Ok((geometry.clone(), true)),
            None => log::warn!(
                "Export region for {} holds no geometry; using the image footprint",
                image.label()
            ),
        }
    }
    image
        .footprint()
        .map(|footprint| (footprint, false))
        .ok_or_else(|| CompositeError::Metadata(format!("image {} has no footprint", image.label())))
}

/// Submit one image for export and optionally write its metadata sidecar
///
/// Errors only when the job is not accepted. Once the backend holds the job
/// its handle is returned, and a sidecar failure is reported in the receipt.
pub fn export_image(
    backend: &dyn ExportBackend,
    image: &RasterImage,
    options: &ExportOptions,
) -> CompositeResult<ExportReceipt> {
    let id = image.id.as_deref().ok_or_else(|| {
        CompositeError::Metadata("cannot export an image without an identifier".to_string())
    })?;
    // metadata is read once and reused for the sidecar
    let info = metadata::image_info(image);
    let projection = image
        .projection()
        .ok_or_else(|| CompositeError::Metadata(format!("image {} has no bands", id)))?;

    let crs = options.crs.clone().unwrap_or_else(|| projection.crs.clone());
    let scale = options.scale.unwrap_or_else(|| projection.nominal_scale());
    let (region, explicit) = resolve_region(image, options.region.as_ref())?;
    let stem = metadata::sidecar_stem(id);

    let job = ExportJob {
        image: if explicit { image.clip(&region) } else { image.clone() },
        description: format!("Export_{}", stem),
        file_name_prefix: stem.clone(),
        folder: options.folder.clone(),
        crs,
        crs_transform: projection.transform.crs_transform(),
        scale,
        region,
        max_pixels: options.max_pixels,
        skip_empty_tiles: true,
    };

    if options.verbose {
        log::info!(
            "Export {}: folder='{}' crs={} scale={} max_pixels={:e}",
            job.description,
            job.folder,
            job.crs,
            job.scale,
            job.max_pixels
        );
    }

    let handle = backend.submit(&job)?;
    log::info!("Submitted {} as job {}", job.description, handle.id);

    let sidecar = options.save_metadata.then(|| {
        metadata::expand_image_meta(&info)
            .and_then(|text| metadata::write_sidecar(&options.metadata_folder, &stem, &text))
            .map_err(|e| {
                log::warn!("Job {} accepted but its sidecar was not written: {}", handle.id, e);
                e
            })
    });
    Ok(ExportReceipt { handle, sidecar })
}

/// Submit one job per image of `collection`, in enumeration order
///
/// An image that fails to evaluate or submit is logged and recorded; the
/// remaining images are still submitted. Images that fail to evaluate are
/// labelled by their position in the collection.
pub fn export_collection(
    backend: &dyn ExportBackend,
    collection: &ImageCollection,
    options: &ExportOptions,
) -> CompositeResult<ExportSummary> {
    let collection = match options.region.as_ref().and_then(Region::geometry) {
        Some(geometry) => collection.filter_bounds(geometry.clone()),
        None => collection.clone(),
    };

    log::info!("Exporting collection to '{}'", options.folder);

    let mut summary = ExportSummary::default();
    for (position, item) in collection.images().enumerate() {
        let image = match item {
            Ok(image) => image,
            Err(e) => {
                log::warn!("Image #{} could not be evaluated: {}", position, e);
                summary.failed.push((format!("#{}", position), e));
                continue;
            }
        };
        match export_image(backend, &image, options) {
            Ok(ExportReceipt { handle, sidecar }) => {
                if let Some(Err(e)) = sidecar {
                    summary.sidecar_failures.push((image.label(), e));
                }
                summary.submitted.push(handle);
            }
            Err(e) => {
                log::warn!("Export of {} failed: {}", image.label(), e);
                summary.failed.push((image.label(), e));
            }
        }
    }

    log::info!(
        "Export finished: {} submitted, {} failed, {} sidecars missing",
        summary.submitted.len(),
        summary.failed.len(),
        summary.sidecar_failures.len()
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Band, BoundingBox, GeoTransform, Projection};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingBackend {
        jobs: Mutex<Vec<ExportJob>>,
    }

    impl ExportBackend for RecordingBackend {
        fn submit(&self, job: &ExportJob) -> CompositeResult<JobHandle> {
            let mut jobs = self.jobs.lock().unwrap();
            jobs.push(job.clone());
            Ok(JobHandle { id: format!("job-{}", jobs.len()) })
        }
    }

    fn image(id: &str) -> RasterImage {
        let projection = Projection::new("EPSG:32610", GeoTransform::north_up(500.0, 1000.0, 30.0));
        RasterImage::from_bands(vec![Band::constant("NDVI", (4, 4), 0.5, projection)])
            .unwrap()
            .with_id(id)
    }

    fn options(dir: &std::path::Path) -> ExportOptions {
        ExportOptions {
            folder: "composites".to_string(),
            metadata_folder: dir.to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn test_export_image_resolves_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let backend = RecordingBackend::default();
        let receipt = export_image(&backend, &image("users/me/ndvi_2015"), &options(dir.path())).unwrap();
        assert_eq!(receipt.handle.id, "job-1");
        let sidecar = receipt.sidecar.unwrap().unwrap();
        assert_eq!(sidecar, dir.path().join("users_me_ndvi_2015.txt"));

        let jobs = backend.jobs.lock().unwrap();
        let job = &jobs[0];
        assert_eq!(job.description, "Export_users_me_ndvi_2015");
        assert_eq!(job.file_name_prefix, "users_me_ndvi_2015");
        assert_eq!(job.crs, "EPSG:32610");
        assert_eq!(job.scale, 30.0);
        assert_eq!(job.max_pixels, 1e13);
        assert!(job.skip_empty_tiles);
        assert_eq!(job.region.bounds().min_lon, 500.0);
        assert!(dir.path().join("users_me_ndvi_2015.txt").exists());
    }

    #[test]
    fn test_explicit_region_and_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let backend = RecordingBackend::default();
        let region = Geometry::rectangle(BoundingBox {
            min_lon: 500.0,
            max_lon: 560.0,
            min_lat: 880.0,
            max_lat: 1000.0,
        });
        let opts = ExportOptions {
            crs: Some("EPSG:4326".to_string()),
            scale: Some(10.0),
            region: Some(Region::from(region.clone())),
            save_metadata: false,
            ..options(dir.path())
        };
        let receipt = export_image(&backend, &image("a"), &opts).unwrap();
        assert!(receipt.sidecar.is_none());

        let jobs = backend.jobs.lock().unwrap();
        assert_eq!(jobs[0].crs, "EPSG:4326");
        assert_eq!(jobs[0].scale, 10.0);
        assert_eq!(jobs[0].region, region);
        // clipped to the two left columns
        assert_eq!(jobs[0].image.bands[0].valid_count(), 8);
        assert!(!dir.path().join("a.txt").exists());
    }

    #[test]
    fn test_anonymous_image_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let backend = RecordingBackend::default();
        let mut anonymous = image("x");
        anonymous.id = None;
        let result = export_image(&backend, &anonymous, &options(dir.path()));
        assert!(matches!(result, Err(CompositeError::Metadata(_))));
        assert!(backend.jobs.lock().unwrap().is_empty());
    }

    #[test]
    fn test_sidecar_failure_keeps_accepted_job() {
        let dir = tempfile::tempdir().unwrap();
        // a regular file where the sidecar folder should be
        let blocker = dir.path().join("not_a_folder");
        std::fs::write(&blocker, "x").unwrap();
        let backend = RecordingBackend::default();
        let opts = ExportOptions {
            metadata_folder: blocker.clone(),
            ..options(dir.path())
        };

        let receipt = export_image(&backend, &image("users/me/ndvi_2016"), &opts).unwrap();
        assert_eq!(receipt.handle.id, "job-1");
        assert!(matches!(receipt.sidecar, Some(Err(_))));
        assert_eq!(backend.jobs.lock().unwrap().len(), 1);

        let collection = ImageCollection::from_images(vec![image("b"), image("c")]);
        let summary = export_collection(&backend, &collection, &opts).unwrap();
        assert_eq!(summary.submitted.len(), 2);
        assert!(summary.failed.is_empty());
        assert_eq!(summary.sidecar_failures.len(), 2);
        assert_eq!(summary.sidecar_failures[0].0, "b");
        assert!(!summary.is_complete());
    }
}
