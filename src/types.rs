use chrono::{DateTime, TimeZone, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Real-valued pixel sample
pub type PixelValue = f64;

/// 2D pixel grid (row x column)
pub type PixelGrid = Array2<PixelValue>;

/// 2D validity mask, `true` where the pixel holds data
pub type ValidityMask = Array2<bool>;

/// Property bag attached to images and features
pub type Properties = BTreeMap<String, Value>;

/// Well-known property keys carried by images
pub mod keys {
    /// Acquisition time in milliseconds since the Unix epoch
    pub const TIME_START: &str = "system:time_start";
    /// Sensor identifier used for harmonization dispatch
    pub const SATELLITE: &str = "SATELLITE";
}

/// Canonical band schema shared by every harmonized image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CanonicalBand {
    Blue,
    Green,
    Red,
    Nir,
    Swir1,
    Swir2,
    PixelQa,
    RadsatQa,
}

impl CanonicalBand {
    pub const ALL: [CanonicalBand; 8] = [
        CanonicalBand::Blue,
        CanonicalBand::Green,
        CanonicalBand::Red,
        CanonicalBand::Nir,
        CanonicalBand::Swir1,
        CanonicalBand::Swir2,
        CanonicalBand::PixelQa,
        CanonicalBand::RadsatQa,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalBand::Blue => "BLUE",
            CanonicalBand::Green => "GREEN",
            CanonicalBand::Red => "RED",
            CanonicalBand::Nir => "NIR",
            CanonicalBand::Swir1 => "SWIR1",
            CanonicalBand::Swir2 => "SWIR2",
            CanonicalBand::PixelQa => "PIXEL_QA",
            CanonicalBand::RadsatQa => "RADSAT_QA",
        }
    }
}

impl std::fmt::Display for CanonicalBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Storage type reported for a band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Int16,
    Int32,
    Float32,
    Float64,
}

impl DataType {
    /// Convert a value into the range representable by this type.
    /// Integer types truncate toward zero and saturate.
    pub fn cast(&self, value: PixelValue) -> PixelValue {
        match self {
            DataType::Int16 => {
                num_traits::clamp(value.trunc(), i16::MIN as f64, i16::MAX as f64)
            }
            DataType::Int32 => {
                num_traits::clamp(value.trunc(), i32::MIN as f64, i32::MAX as f64)
            }
            DataType::Float32 => value as f32 as f64,
            DataType::Float64 => value,
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataType::Int16 => write!(f, "int16"),
            DataType::Int32 => write!(f, "int32"),
            DataType::Float32 => write!(f, "float"),
            DataType::Float64 => write!(f, "double"),
        }
    }
}

/// Geospatial bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

/// Geospatial transformation parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform with square pixels
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_size: f64) -> Self {
        Self {
            top_left_x,
            pixel_width: pixel_size,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -pixel_size,
        }
    }

    /// Coefficients as `[xScale, xShear, xTranslation, yShear, yScale, yTranslation]`
    pub fn crs_transform(&self) -> [f64; 6] {
        [
            self.pixel_width,
            self.rotation_x,
            self.top_left_x,
            self.rotation_y,
            self.pixel_height,
            self.top_left_y,
        ]
    }

    /// World coordinate of the centre of pixel (row, col)
    pub fn pixel_center(&self, row: usize, col: usize) -> [f64; 2] {
        let c = col as f64 + 0.5;
        let r = row as f64 + 0.5;
        [
            self.top_left_x + c * self.pixel_width + r * self.rotation_x,
            self.top_left_y + c * self.rotation_y + r * self.pixel_height,
        ]
    }
}

/// Coordinate reference system plus the pixel grid affine transform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub crs: String,
    pub transform: GeoTransform,
}

impl Projection {
    pub fn new(crs: impl Into<String>, transform: GeoTransform) -> Self {
        Self {
            crs: crs.into(),
            transform,
        }
    }

    /// Nominal scale in CRS units
    pub fn nominal_scale(&self) -> f64 {
        self.transform.pixel_width.abs()
    }
}

impl Default for Projection {
    fn default() -> Self {
        Self::new("EPSG:4326", GeoTransform::north_up(0.0, 0.0, 1.0))
    }
}

/// Vector geometry in the coordinates of its CRS
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Point([f64; 2]),
    /// Outer ring first, holes after. Rings need not be explicitly closed.
    Polygon(Vec<Vec<[f64; 2]>>),
}

/// Geometry with an attached property bag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: Option<String>,
    pub geometry: Geometry,
    #[serde(default)]
    pub properties: Properties,
}

/// Ordered set of features
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureCollection {
    pub id: Option<String>,
    pub features: Vec<Feature>,
    #[serde(default)]
    pub properties: Properties,
}

/// Area accepted wherever a clip or export region is expected
#[derive(Debug, Clone, PartialEq)]
pub enum Region {
    Geometry(Geometry),
    Feature(Feature),
    FeatureCollection(FeatureCollection),
}

impl Region {
    /// Geometry to use for the region; the first feature of a collection.
    pub fn geometry(&self) -> Option<&Geometry> {
        match self {
            Region::Geometry(geometry) => Some(geometry),
            Region::Feature(feature) => Some(&feature.geometry),
            Region::FeatureCollection(collection) => {
                collection.features.first().map(|f| &f.geometry)
            }
        }
    }
}

impl From<Geometry> for Region {
    fn from(geometry: Geometry) -> Self {
        Region::Geometry(geometry)
    }
}

/// Single named band of a raster image
#[derive(Debug, Clone)]
pub struct Band {
    pub name: String,
    pub data: PixelGrid,
    pub mask: ValidityMask,
    pub data_type: DataType,
    pub projection: Projection,
}

impl Band {
    /// Fully valid Float64 band
    pub fn new(name: impl Into<String>, data: PixelGrid, projection: Projection) -> Self {
        let mask = ValidityMask::from_elem(data.dim(), true);
        Self {
            name: name.into(),
            data,
            mask,
            data_type: DataType::Float64,
            projection,
        }
    }

    /// Band filled with a constant value
    pub fn constant(
        name: impl Into<String>,
        dim: (usize, usize),
        value: PixelValue,
        projection: Projection,
    ) -> Self {
        Self::new(name, PixelGrid::from_elem(dim, value), projection)
    }

    /// Reinterpret the band as `data_type`, casting every value
    pub fn with_data_type(mut self, data_type: DataType) -> Self {
        self.data.mapv_inplace(|v| data_type.cast(v));
        self.data_type = data_type;
        self
    }

    /// Replace the validity mask
    pub fn with_mask(mut self, mask: ValidityMask) -> CompositeResult<Self> {
        if mask.dim() != self.data.dim() {
            return Err(CompositeError::DimensionMismatch {
                expected: self.data.dim(),
                found: mask.dim(),
            });
        }
        self.mask = mask;
        Ok(self)
    }

    pub fn dim(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Pixel value, `None` when masked or out of bounds
    pub fn value(&self, row: usize, col: usize) -> Option<PixelValue> {
        match self.mask.get((row, col)) {
            Some(true) => self.data.get((row, col)).copied(),
            _ => None,
        }
    }

    pub fn is_valid(&self, row: usize, col: usize) -> bool {
        self.mask.get((row, col)).copied().unwrap_or(false)
    }

    pub fn valid_count(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }
}

/// Multi-band raster image with its property bag
#[derive(Debug, Clone, Default)]
pub struct RasterImage {
    pub id: Option<String>,
    pub bands: Vec<Band>,
    pub properties: Properties,
    pub footprint: Option<Geometry>,
}

impl RasterImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Image built from bands; names must be unique
    pub fn from_bands(bands: Vec<Band>) -> CompositeResult<Self> {
        let mut image = Self::new();
        for band in bands {
            image.push_band(band)?;
        }
        Ok(image)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_footprint(mut self, footprint: Geometry) -> Self {
        self.footprint = Some(footprint);
        self
    }

    /// Stamp the acquisition time property
    pub fn with_time_start(self, time: DateTime<Utc>) -> Self {
        self.with_property(keys::TIME_START, time.timestamp_millis())
    }

    /// Append a band in place, rejecting duplicate names
    pub fn push_band(&mut self, band: Band) -> CompositeResult<()> {
        if self.has_band(&band.name) {
            return Err(CompositeError::DuplicateBand(band.name));
        }
        self.bands.push(band);
        Ok(())
    }

    pub fn has_band(&self, name: &str) -> bool {
        self.bands.iter().any(|b| b.name == name)
    }

    /// Look up a band by name
    pub fn band(&self, name: &str) -> CompositeResult<&Band> {
        self.bands
            .iter()
            .find(|b| b.name == name)
            .ok_or_else(|| CompositeError::MissingBand {
                band: name.to_string(),
                image: self.label(),
            })
    }

    pub fn band_names(&self) -> Vec<String> {
        self.bands.iter().map(|b| b.name.clone()).collect()
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Acquisition time read from `system:time_start`
    pub fn acquisition_time(&self) -> Option<DateTime<Utc>> {
        let millis = self.properties.get(keys::TIME_START)?.as_i64()?;
        Utc.timestamp_millis_opt(millis).single()
    }

    /// Sensor identifier read from the `SATELLITE` property
    pub fn sensor_id(&self) -> Option<&str> {
        self.properties.get(keys::SATELLITE)?.as_str()
    }

    /// Human readable label for log and error messages
    pub fn label(&self) -> String {
        self.id.clone().unwrap_or_else(|| "<anonymous>".to_string())
    }

    /// Projection of the first band
    pub fn projection(&self) -> Option<&Projection> {
        self.bands.first().map(|b| &b.projection)
    }

    /// Declared footprint, or the rectangle covered by the first band
    pub fn footprint(&self) -> Option<Geometry> {
        if let Some(footprint) = &self.footprint {
            return Some(footprint.clone());
        }
        let band = self.bands.first()?;
        let (rows, cols) = band.dim();
        let t = &band.projection.transform;
        let corner = |row: f64, col: f64| {
            [
                t.top_left_x + col * t.pixel_width + row * t.rotation_x,
                t.top_left_y + col * t.rotation_y + row * t.pixel_height,
            ]
        };
        let (r, c) = (rows as f64, cols as f64);
        Some(Geometry::Polygon(vec![vec![
            corner(0.0, 0.0),
            corner(0.0, c),
            corner(r, c),
            corner(r, 0.0),
            corner(0.0, 0.0),
        ]]))
    }
}

/// Error types for compositing
#[derive(Debug, thiserror::Error)]
pub enum CompositeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Band '{band}' not found in image {image}")]
    MissingBand { band: String, image: String },

    #[error("Duplicate band name: {0}")]
    DuplicateBand(String),

    #[error("Unsupported sensor identifier: {0}")]
    UnsupportedSensor(String),

    #[error("Dimension mismatch: expected {expected:?}, found {found:?}")]
    DimensionMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Export error: {0}")]
    Export(String),
}

/// Result type for compositing operations
pub type CompositeResult<T> = Result<T, CompositeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int16_cast_truncates_and_saturates() {
        assert_eq!(DataType::Int16.cast(271.9), 271.0);
        assert_eq!(DataType::Int16.cast(-3.7), -3.0);
        assert_eq!(DataType::Int16.cast(1.0e6), 32767.0);
        assert_eq!(DataType::Int16.cast(-1.0e6), -32768.0);
    }

    #[test]
    fn test_duplicate_band_rejected() {
        let projection = Projection::default();
        let a = Band::constant("NIR", (2, 2), 1.0, projection.clone());
        let b = Band::constant("NIR", (2, 2), 2.0, projection);
        let result = RasterImage::from_bands(vec![a, b]);
        assert!(matches!(result, Err(CompositeError::DuplicateBand(_))));
    }

    #[test]
    fn test_missing_band_reports_image() {
        let image = RasterImage::new().with_id("LC08_001");
        match image.band("RED") {
            Err(CompositeError::MissingBand { band, image }) => {
                assert_eq!(band, "RED");
                assert_eq!(image, "LC08_001");
            }
            other => panic!("unexpected result: {:?}", other.map(|b| b.name.clone())),
        }
    }

    #[test]
    fn test_default_footprint_from_transform() {
        let projection = Projection::new("EPSG:32633", GeoTransform::north_up(100.0, 200.0, 30.0));
        let image =
            RasterImage::from_bands(vec![Band::constant("B1", (2, 3), 0.0, projection)]).unwrap();
        match image.footprint() {
            Some(Geometry::Polygon(rings)) => {
                assert_eq!(rings[0][0], [100.0, 200.0]);
                assert_eq!(rings[0][2], [190.0, 140.0]);
            }
            other => panic!("unexpected footprint {:?}", other),
        }
    }

    #[test]
    fn test_acquisition_time_round_trip() {
        let t = Utc.with_ymd_and_hms(2015, 7, 1, 10, 30, 0).unwrap();
        let image = RasterImage::new().with_time_start(t);
        assert_eq!(image.acquisition_time(), Some(t));
    }
}
