use landcomp::core::{harmonize, ImageCollection};
use landcomp::io::{export_collection, export_image, ExportBackend, ExportJob, ExportOptions, JobHandle};
use landcomp::types::{
    keys, Band, BoundingBox, CompositeError, CompositeResult, Feature, FeatureCollection,
    GeoTransform, Geometry, Projection, RasterImage, Region,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Records every submission and rejects the k-th one (1-based)
struct FlakyBackend {
    fail_on: Option<usize>,
    calls: AtomicUsize,
    accepted: Mutex<Vec<String>>,
}

impl FlakyBackend {
    fn new(fail_on: Option<usize>) -> Self {
        Self {
            fail_on,
            calls: AtomicUsize::new(0),
            accepted: Mutex::new(Vec::new()),
        }
    }
}

impl ExportBackend for FlakyBackend {
    fn submit(&self, job: &ExportJob) -> CompositeResult<JobHandle> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if Some(n) == self.fail_on {
            return Err(CompositeError::Export(format!("quota exceeded for {}", job.description)));
        }
        self.accepted.lock().unwrap().push(job.file_name_prefix.clone());
        Ok(JobHandle { id: format!("task-{}", n) })
    }
}

fn tile(id: &str, x0: f64) -> RasterImage {
    let projection = Projection::new("EPSG:4326", GeoTransform::north_up(x0, 10.0, 0.5));
    RasterImage::from_bands(vec![
        Band::constant("NDVI_median", (4, 4), 0.42, projection.clone()),
        Band::constant("NIR_median", (4, 4), 2875.0, projection),
    ])
    .unwrap()
    .with_id(id)
    .with_property(keys::SATELLITE, "LANDSAT_7")
    .with_property("CLOUD_COVER", 3)
}

/// Native Landsat 7 style scene tagged with `sensor`
fn native_scene(id: &str, sensor: &str, x0: f64) -> RasterImage {
    let projection = Projection::new("EPSG:4326", GeoTransform::north_up(x0, 10.0, 0.5));
    let mut bands: Vec<Band> = ["B1", "B2", "B3", "B4", "B5", "B7"]
        .iter()
        .map(|name| Band::constant(*name, (4, 4), 1200.0, projection.clone()))
        .collect();
    bands.push(Band::constant("pixel_qa", (4, 4), 66.0, projection.clone()));
    bands.push(Band::constant("radsat_qa", (4, 4), 0.0, projection));
    RasterImage::from_bands(bands)
        .unwrap()
        .with_id(id)
        .with_property(keys::SATELLITE, sensor)
}

fn tiles(n: usize) -> ImageCollection {
    ImageCollection::from_images((0..n).map(|i| tile(&format!("composites/tile_{}", i), i as f64)).collect())
}

#[test]
fn test_failed_job_does_not_abort_collection_export() -> anyhow::Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let backend = FlakyBackend::new(Some(2));
    let options = ExportOptions {
        folder: "landcomp".to_string(),
        metadata_folder: dir.path().to_path_buf(),
        ..Default::default()
    };

    let summary = export_collection(&backend, &tiles(5), &options)?;
    println!("Submitted {} jobs, {} failed", summary.submitted.len(), summary.failed.len());

    assert_eq!(backend.calls.load(Ordering::SeqCst), 5);
    assert_eq!(summary.submitted.len(), 4);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].0, "composites/tile_1");
    assert!(!summary.is_complete());
    assert_eq!(
        *backend.accepted.lock().unwrap(),
        vec!["composites_tile_0", "composites_tile_2", "composites_tile_3", "composites_tile_4"]
    );

    // sidecars only for accepted jobs
    assert!(dir.path().join("composites_tile_0.txt").exists());
    assert!(!dir.path().join("composites_tile_1.txt").exists());
    Ok(())
}

#[test]
fn test_unevaluable_image_does_not_abort_collection_export() -> anyhow::Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let backend = FlakyBackend::new(None);
    let options = ExportOptions {
        metadata_folder: dir.path().to_path_buf(),
        ..Default::default()
    };
    // the middle scene's sensor has no harmonization table
    let collection = ImageCollection::from_images(vec![
        native_scene("scenes/a", "LANDSAT_7", 0.0),
        native_scene("scenes/b", "SENTINEL_2", 1.0),
        native_scene("scenes/c", "LANDSAT_7", 2.0),
    ])
    .map("harmonize", |image| harmonize(&image));

    let summary = export_collection(&backend, &collection, &options)?;
    println!("Failures: {:?}", summary.failed);

    assert_eq!(summary.submitted.len(), 2);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].0, "#1");
    assert!(matches!(summary.failed[0].1, CompositeError::UnsupportedSensor(_)));
    assert_eq!(*backend.accepted.lock().unwrap(), vec!["scenes_a", "scenes_c"]);
    assert!(dir.path().join("scenes_c.txt").exists());
    Ok(())
}

#[test]
fn test_collection_export_filters_by_region() -> anyhow::Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let backend = FlakyBackend::new(None);
    let region = Geometry::rectangle(BoundingBox {
        min_lon: 0.1,
        max_lon: 1.5,
        min_lat: 8.5,
        max_lat: 9.5,
    });
    let options = ExportOptions {
        region: Some(Region::Geometry(region)),
        save_metadata: false,
        metadata_folder: dir.path().to_path_buf(),
        ..Default::default()
    };

    // tiles span [i, i + 2] in longitude
    let summary = export_collection(&backend, &tiles(4), &options)?;
    assert_eq!(summary.submitted.len(), 2);
    assert_eq!(
        *backend.accepted.lock().unwrap(),
        vec!["composites_tile_0", "composites_tile_1"]
    );
    Ok(())
}

#[test]
fn test_feature_collection_region_uses_first_feature() -> anyhow::Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let first = Geometry::rectangle(BoundingBox {
        min_lon: 0.0,
        max_lon: 1.0,
        min_lat: 9.0,
        max_lat: 10.0,
    });
    let features = FeatureCollection {
        id: Some("aoi".to_string()),
        features: vec![
            Feature {
                id: Some("0".to_string()),
                geometry: first.clone(),
                properties: Default::default(),
            },
            Feature {
                id: Some("1".to_string()),
                geometry: Geometry::Point([100.0, 100.0]),
                properties: Default::default(),
            },
        ],
        properties: Default::default(),
    };

    struct Capture(Mutex<Option<ExportJob>>);
    impl ExportBackend for Capture {
        fn submit(&self, job: &ExportJob) -> CompositeResult<JobHandle> {
            *self.0.lock().unwrap() = Some(job.clone());
            Ok(JobHandle { id: "only".to_string() })
        }
    }

    let backend = Capture(Mutex::new(None));
    let options = ExportOptions {
        region: Some(Region::FeatureCollection(features)),
        metadata_folder: dir.path().to_path_buf(),
        ..Default::default()
    };
    export_image(&backend, &tile("single", 0.0), &options)?;

    let job = backend.0.lock().unwrap().clone().unwrap();
    assert_eq!(job.region, first);
    assert_eq!(job.crs_transform, [0.5, 0.0, 0.0, 0.0, -0.5, 10.0]);
    // 2 x 2 of the 4 x 4 pixels have centres inside the first feature
    assert_eq!(job.image.band("NDVI_median")?.valid_count(), 4);
    Ok(())
}

#[test]
fn test_sidecar_format() -> anyhow::Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let backend = FlakyBackend::new(None);
    let options = ExportOptions {
        metadata_folder: dir.path().to_path_buf(),
        ..Default::default()
    };
    export_image(&backend, &tile("users/demo/composite_2015", 0.0), &options)?;

    let text = std::fs::read_to_string(dir.path().join("users_demo_composite_2015.txt"))?;
    println!("{}", text);
    let lines: Vec<&str> = text.lines().collect();
    assert!(lines.iter().any(|l| l.starts_with("Band: NDVI_median : {")));
    assert!(lines.iter().any(|l| l.starts_with("Band: NIR_median : {")));
    assert!(lines.contains(&"Property: CLOUD_COVER : 3"));
    assert!(lines.contains(&"Property: SATELLITE : LANDSAT_7"));
    assert!(lines.contains(&"id : users/demo/composite_2015"));
    assert!(lines.iter().any(|l| l.starts_with("Property: system:footprint : {")));
    Ok(())
}
