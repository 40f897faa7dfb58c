//! Spectral indices computed from the canonical band schema
//!
//! Every index function reads the canonical bands of an image, evaluates its
//! formula per pixel and returns a one-band image named after the index,
//! multiplied by `scale_factor`. Zero denominators yield no-data pixels.

use crate::core::band_math::safe_divide;
use crate::types::{Band, CompositeResult, DataType, PixelValue, RasterImage};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Parameters shared by the index formulas
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexParams {
    /// Multiplier applied to every index value
    pub scale_factor: f64,
    /// SAVI soil brightness correction `L`
    pub savi_const: f64,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            scale_factor: 1.0,
            savi_const: 0.5,
        }
    }
}

/// Supported derived indices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum IndexKind {
    /// Normalized Difference Vegetation Index
    Ndvi,
    /// Normalized Difference Wetness Index
    Ndwi,
    /// Normalized Burn Ratio
    Nbr,
    /// Visible Atmospherically Resistant Index
    Vari,
    /// Soil Adjusted Vegetation Index
    Savi,
    /// Enhanced Vegetation Index
    Evi,
}

impl IndexKind {
    pub const ALL: [IndexKind; 6] = [
        IndexKind::Ndvi,
        IndexKind::Ndwi,
        IndexKind::Nbr,
        IndexKind::Vari,
        IndexKind::Savi,
        IndexKind::Evi,
    ];

    /// Output band name
    pub fn name(&self) -> &'static str {
        match self {
            IndexKind::Ndvi => "NDVI",
            IndexKind::Ndwi => "NDWI",
            IndexKind::Nbr => "NBR",
            IndexKind::Vari => "VARI",
            IndexKind::Savi => "SAVI",
            IndexKind::Evi => "EVI",
        }
    }

    pub fn compute(&self, image: &RasterImage, params: &IndexParams) -> CompositeResult<RasterImage> {
        match self {
            IndexKind::Ndvi => ndvi(image, params.scale_factor),
            IndexKind::Ndwi => ndwi(image, params.scale_factor),
            IndexKind::Nbr => nbr(image, params.scale_factor),
            IndexKind::Vari => vari(image, params.scale_factor),
            IndexKind::Savi => savi(image, params.scale_factor, params.savi_const),
            IndexKind::Evi => evi(image, params.scale_factor),
        }
    }
}

impl std::fmt::Display for IndexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for IndexKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IndexKind::ALL
            .iter()
            .find(|k| k.name().eq_ignore_ascii_case(s.trim()))
            .copied()
            .ok_or_else(|| format!("unknown index '{}'", s))
    }
}

impl TryFrom<String> for IndexKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<IndexKind> for String {
    fn from(kind: IndexKind) -> Self {
        kind.name().to_string()
    }
}

fn single_band(image: &RasterImage, band: Band) -> CompositeResult<RasterImage> {
    let mut out = RasterImage::from_bands(vec![band])?;
    out.footprint = image.footprint.clone();
    Ok(out)
}

/// `(a - b) / (a + b) * scale_factor`
fn normalized_difference(
    image: &RasterImage,
    a: &str,
    b: &str,
    name: &str,
    scale_factor: f64,
) -> CompositeResult<RasterImage> {
    let band_a = image.band(a)?;
    let band_b = image.band(b)?;
    let band = band_a.zip_with(band_b, name, |x, y| {
        safe_divide(x - y, x + y).map(|v| v * scale_factor)
    })?;
    single_band(image, band)
}

/// `NDVI = (NIR - RED) / (NIR + RED)`
pub fn ndvi(image: &RasterImage, scale_factor: f64) -> CompositeResult<RasterImage> {
    normalized_difference(image, "NIR", "RED", "NDVI", scale_factor)
}

/// `NDWI = (NIR - SWIR2) / (NIR + SWIR2)`
pub fn ndwi(image: &RasterImage, scale_factor: f64) -> CompositeResult<RasterImage> {
    normalized_difference(image, "NIR", "SWIR2", "NDWI", scale_factor)
}

/// `NBR = (NIR - SWIR1) / (NIR + SWIR1)`
pub fn nbr(image: &RasterImage, scale_factor: f64) -> CompositeResult<RasterImage> {
    normalized_difference(image, "NIR", "SWIR1", "NBR", scale_factor)
}

/// `VARI = (RED - GREEN) / (RED + GREEN - BLUE)`
pub fn vari(image: &RasterImage, scale_factor: f64) -> CompositeResult<RasterImage> {
    let inputs = [image.band("RED")?, image.band("GREEN")?, image.band("BLUE")?];
    let band = Band::combine("VARI", &inputs, |v| {
        let (red, green, blue) = (v[0], v[1], v[2]);
        safe_divide(red - green, red + green - blue).map(|x| x * scale_factor)
    })?;
    single_band(image, band)
}

/// `SAVI = (NIR - RED) * (1 + L) / (NIR + RED + L)`, stored as int16
pub fn savi(image: &RasterImage, scale_factor: f64, savi_const: f64) -> CompositeResult<RasterImage> {
    let nir = image.band("NIR")?;
    let red = image.band("RED")?;
    let band = nir
        .zip_with(red, "SAVI", |n, r| {
            safe_divide((n - r) * (1.0 + savi_const), n + r + savi_const)
                .map(|x| x * scale_factor)
        })?
        .with_data_type(DataType::Int16);
    single_band(image, band)
}

/// `EVI = 2.5 * (NIR - RED) / (NIR + 6 RED - 7.5 BLUE + 1)`
pub fn evi(image: &RasterImage, scale_factor: f64) -> CompositeResult<RasterImage> {
    let inputs = [image.band("NIR")?, image.band("RED")?, image.band("BLUE")?];
    let band = Band::combine("EVI", &inputs, |v| {
        let (nir, red, blue) = (v[0], v[1], v[2]);
        safe_divide(nir - red, nir + 6.0 * red - 7.5 * blue + 1.0)
            .map(|x: PixelValue| 2.5 * x * scale_factor)
    })?;
    single_band(image, band)
}

/// Append the requested indices to `image`.
///
/// Indices are computed from a float copy of the image divided by
/// `params.scale_factor`, then appended to the untouched input. Names that
/// do not match a known index are skipped.
pub fn add_indices<S: AsRef<str>>(
    image: &RasterImage,
    index_list: &[S],
    params: &IndexParams,
) -> CompositeResult<RasterImage> {
    let unscaled = image.to_float().divide(params.scale_factor);
    let mut out = image.clone();

    for name in index_list {
        match name.as_ref().parse::<IndexKind>() {
            Ok(kind) => {
                let index_image = kind.compute(&unscaled, params)?;
                out = out.add_bands(&index_image)?;
            }
            Err(_) => log::debug!("Skipping unrecognised index '{}'", name.as_ref()),
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Projection;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn image(nir: f64, red: f64, green: f64, blue: f64, swir1: f64, swir2: f64) -> RasterImage {
        let p = Projection::default();
        RasterImage::from_bands(vec![
            Band::constant("BLUE", (1, 1), blue, p.clone()),
            Band::constant("GREEN", (1, 1), green, p.clone()),
            Band::constant("RED", (1, 1), red, p.clone()),
            Band::constant("NIR", (1, 1), nir, p.clone()),
            Band::constant("SWIR1", (1, 1), swir1, p.clone()),
            Band::constant("SWIR2", (1, 1), swir2, p),
        ])
        .unwrap()
    }

    fn pixel(image: &RasterImage, name: &str) -> Option<f64> {
        image.band(name).unwrap().value(0, 0)
    }

    #[test]
    fn test_ndvi_scaled() {
        let img = image(0.5, 0.1, 0.0, 0.0, 0.0, 0.0);
        let out = ndvi(&img, 10000.0).unwrap();
        assert_eq!(out.band_names(), vec!["NDVI"]);
        assert_abs_diff_eq!(pixel(&out, "NDVI").unwrap(), 0.4 / 0.6 * 10000.0, epsilon = 1e-6);
    }

    #[test]
    fn test_ndvi_zero_sum_is_no_data() {
        let img = image(0.0, 0.0, 0.0, 0.0, 0.0, 0.0);
        let out = ndvi(&img, 1.0).unwrap();
        let band = out.band("NDVI").unwrap();
        assert!(!band.is_valid(0, 0));
        assert!(!band.data[[0, 0]].is_nan());
    }

    #[test]
    fn test_ndvi_bounded() {
        let p = Projection::default();
        let nir = Band::new("NIR", array![[0.0, 1.0, 3000.0, 12.0]], p.clone());
        let red = Band::new("RED", array![[5.0, 0.0, 1000.0, 40.0]], p);
        let img = RasterImage::from_bands(vec![nir, red]).unwrap();
        let out = ndvi(&img, 2.0).unwrap();
        for v in out.band("NDVI").unwrap().data.iter() {
            assert!(*v >= -2.0 && *v <= 2.0);
        }
    }

    #[test]
    fn test_savi_truncates() {
        let img = image(4000.0, 2000.0, 0.0, 0.0, 0.0, 0.0);
        let out = savi(&img, 1.0, 0.5).unwrap();
        let band = out.band("SAVI").unwrap();
        assert_eq!(band.data_type, DataType::Int16);
        // 3000 / 6000.5 = 0.49995...
        assert_eq!(band.value(0, 0), Some(0.0));

        let scaled = savi(&img, 10000.0, 0.5).unwrap();
        assert_eq!(pixel(&scaled, "SAVI"), Some(4999.0));
    }

    #[test]
    fn test_evi_and_vari() {
        let img = image(0.4, 0.1, 0.08, 0.05, 0.2, 0.1);
        let e = evi(&img, 1.0).unwrap();
        let expected = 2.5 * 0.3 / (0.4 + 0.6 - 0.375 + 1.0);
        assert_abs_diff_eq!(pixel(&e, "EVI").unwrap(), expected, epsilon = 1e-12);

        let v = vari(&img, 1.0).unwrap();
        assert_abs_diff_eq!(pixel(&v, "VARI").unwrap(), 0.02 / 0.13, epsilon = 1e-12);
    }

    #[test]
    fn test_vari_zero_denominator() {
        let img = image(0.0, 0.1, 0.1, 0.2, 0.0, 0.0);
        let v = vari(&img, 1.0).unwrap();
        assert_eq!(pixel(&v, "VARI"), None);
    }

    #[test]
    fn test_add_indices_skips_unknown() {
        let img = image(4000.0, 2000.0, 1000.0, 500.0, 1500.0, 800.0);
        let params = IndexParams {
            scale_factor: 10000.0,
            savi_const: 0.5,
        };
        let out = add_indices(&img, &["ndvi", "bogus", "NBR"], &params).unwrap();
        assert_eq!(
            out.band_names(),
            vec!["BLUE", "GREEN", "RED", "NIR", "SWIR1", "SWIR2", "NDVI", "NBR"]
        );
        // original bands are appended to, not rescaled
        assert_eq!(pixel(&out, "NIR"), Some(4000.0));
        assert_abs_diff_eq!(pixel(&out, "NDVI").unwrap(), 10000.0 / 3.0, epsilon = 1e-6);
    }

    #[test]
    fn test_index_kind_parse() {
        assert_eq!("evi".parse::<IndexKind>(), Ok(IndexKind::Evi));
        assert!("NDSI".parse::<IndexKind>().is_err());
    }
}
