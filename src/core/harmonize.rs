//! Cross-sensor band harmonization
//!
//! Native Landsat surface-reflectance bands are renamed onto the canonical
//! schema. Landsat 8 (Roy et al. 2016, DOI 10.1016/j.rse.2015.12.024) and
//! Landsat 5 (Sulla-Menashe et al. 2016, DOI 10.1016/j.rse.2016.02.041) are
//! additionally rescaled to Landsat 7 reflectance with a linear transform.

use crate::types::{
    keys, CanonicalBand, CompositeError, CompositeResult, DataType, RasterImage, ValidityMask,
};
use ndarray::Zip;
use std::str::FromStr;

/// Bit of `PIXEL_QA` flagging a clear observation
pub const CLEAR_BIT: u32 = 1;

/// Linear correction from one native band to a canonical band
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandTransform {
    pub native: &'static str,
    pub canonical: CanonicalBand,
    pub gain: f64,
    pub offset: f64,
}

impl BandTransform {
    const fn new(native: &'static str, canonical: CanonicalBand, gain: f64, offset: f64) -> Self {
        Self {
            native,
            canonical,
            gain,
            offset,
        }
    }

    /// `round(value * gain + offset)`
    pub fn apply(&self, value: f64) -> f64 {
        (value * self.gain + self.offset).round()
    }
}

const LANDSAT8_TO_7: [BandTransform; 6] = [
    BandTransform::new("B2", CanonicalBand::Blue, 0.8850, 183.0),
    BandTransform::new("B3", CanonicalBand::Green, 0.9317, 123.0),
    BandTransform::new("B4", CanonicalBand::Red, 0.9372, 123.0),
    BandTransform::new("B5", CanonicalBand::Nir, 0.8339, 448.0),
    BandTransform::new("B6", CanonicalBand::Swir1, 0.8639, 306.0),
    BandTransform::new("B7", CanonicalBand::Swir2, 0.9165, 116.0),
];

const LANDSAT5_TO_7: [BandTransform; 6] = [
    BandTransform::new("B1", CanonicalBand::Blue, 0.91996, 37.0),
    BandTransform::new("B2", CanonicalBand::Green, 0.92764, 84.0),
    BandTransform::new("B3", CanonicalBand::Red, 0.8881, 98.0),
    BandTransform::new("B4", CanonicalBand::Nir, 0.95057, 38.0),
    BandTransform::new("B5", CanonicalBand::Swir1, 0.96525, 29.0),
    BandTransform::new("B7", CanonicalBand::Swir2, 0.99601, 20.0),
];

/// Landsat 7 is the calibration reference: rename only
const LANDSAT7_IDENTITY: [BandTransform; 6] = [
    BandTransform::new("B1", CanonicalBand::Blue, 1.0, 0.0),
    BandTransform::new("B2", CanonicalBand::Green, 1.0, 0.0),
    BandTransform::new("B3", CanonicalBand::Red, 1.0, 0.0),
    BandTransform::new("B4", CanonicalBand::Nir, 1.0, 0.0),
    BandTransform::new("B5", CanonicalBand::Swir1, 1.0, 0.0),
    BandTransform::new("B7", CanonicalBand::Swir2, 1.0, 0.0),
];

/// Quality bands copied through unchanged
const QUALITY_BANDS: [(&str, CanonicalBand); 2] = [
    ("pixel_qa", CanonicalBand::PixelQa),
    ("radsat_qa", CanonicalBand::RadsatQa),
];

/// Sensors with a known native band layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sensor {
    Landsat5,
    Landsat7,
    Landsat8,
}

impl Sensor {
    pub fn identifier(&self) -> &'static str {
        match self {
            Sensor::Landsat5 => "LANDSAT_5",
            Sensor::Landsat7 => "LANDSAT_7",
            Sensor::Landsat8 => "LANDSAT_8",
        }
    }

    /// Reflectance transforms onto the reference calibration
    pub fn transforms(&self) -> &'static [BandTransform; 6] {
        match self {
            Sensor::Landsat5 => &LANDSAT5_TO_7,
            Sensor::Landsat7 => &LANDSAT7_IDENTITY,
            Sensor::Landsat8 => &LANDSAT8_TO_7,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Sensor::Landsat7)
    }

    /// Sensor named by the image's `SATELLITE` property
    pub fn of_image(image: &RasterImage) -> CompositeResult<Sensor> {
        let id = image.sensor_id().ok_or_else(|| {
            CompositeError::UnsupportedSensor(format!(
                "image {} has no {} property",
                image.label(),
                keys::SATELLITE
            ))
        })?;
        id.parse()
    }
}

impl FromStr for Sensor {
    type Err = CompositeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "LANDSAT_5" => Ok(Sensor::Landsat5),
            "LANDSAT_7" => Ok(Sensor::Landsat7),
            "LANDSAT_8" => Ok(Sensor::Landsat8),
            other => Err(CompositeError::UnsupportedSensor(other.to_string())),
        }
    }
}

impl std::fmt::Display for Sensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.identifier())
    }
}

/// Map an image onto the canonical schema, correcting reflectance to the
/// reference sensor. Output bands are int16; properties and identity are kept.
pub fn harmonize(image: &RasterImage) -> CompositeResult<RasterImage> {
    let sensor = Sensor::of_image(image)?;
    log::debug!("Harmonizing {} as {}", image.label(), sensor);

    let mut bands = Vec::with_capacity(CanonicalBand::ALL.len());
    for t in sensor.transforms() {
        let native = image.band(t.native)?;
        let band = if sensor.is_reference() {
            native.clone()
        } else {
            let mut corrected = native.map_values(|v| Some(t.apply(v)));
            corrected.data_type = DataType::Float64;
            corrected
        };
        bands.push(band.renamed(t.canonical.as_str()).with_data_type(DataType::Int16));
    }
    for (native, canonical) in QUALITY_BANDS {
        let band = image.band(native)?.clone();
        bands.push(band.renamed(canonical.as_str()).with_data_type(DataType::Int16));
    }

    let mut out = RasterImage::from_bands(bands)?;
    out.id = image.id.clone();
    out.properties = image.properties.clone();
    out.footprint = image.footprint.clone();
    Ok(out)
}

/// Valid-pixel mask: `PIXEL_QA` clear bit set and no `RADSAT_QA` saturation
pub fn clear_pixel_mask(image: &RasterImage) -> CompositeResult<ValidityMask> {
    let qa = image.band(CanonicalBand::PixelQa.as_str())?;
    let radsat = image.band(CanonicalBand::RadsatQa.as_str())?;
    if qa.dim() != radsat.dim() {
        return Err(CompositeError::DimensionMismatch {
            expected: qa.dim(),
            found: radsat.dim(),
        });
    }

    let clear_flag = 1i64 << CLEAR_BIT;
    let mut mask = ValidityMask::from_elem(qa.dim(), false);
    Zip::from(&mut mask)
        .and(&qa.data)
        .and(&qa.mask)
        .and(&radsat.data)
        .and(&radsat.mask)
        .for_each(|m, &q, &q_valid, &r, &r_valid| {
            *m = q_valid && r_valid && (q as i64 & clear_flag) != 0 && r == 0.0;
        });
    Ok(mask)
}

/// Mask out every non-clear or saturated pixel in all bands
pub fn mask_clear(image: &RasterImage) -> CompositeResult<RasterImage> {
    let mask = clear_pixel_mask(image)?;
    image.update_mask(&mask)
}
