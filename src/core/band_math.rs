//! Per-pixel band algebra with no-data propagation
//!
//! Every operation returns a new value. A pixel that is masked in any input
//! stays masked in the output, and a kernel returning `None` (for instance a
//! division by zero) masks that pixel instead of producing NaN.

use crate::types::{
    Band, CompositeError, CompositeResult, DataType, Geometry, PixelValue, RasterImage,
    ValidityMask,
};
use ndarray::Zip;
use serde::{Deserialize, Serialize};

/// Divide, masking the pixel when the denominator is zero or the quotient
/// is not finite
pub fn safe_divide(numerator: PixelValue, denominator: PixelValue) -> Option<PixelValue> {
    if denominator == 0.0 {
        return None;
    }
    let q = numerator / denominator;
    q.is_finite().then_some(q)
}

impl Band {
    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Apply a unary kernel to every valid pixel
    pub fn map_values<F>(&self, f: F) -> Band
    where
        F: Fn(PixelValue) -> Option<PixelValue>,
    {
        let mut out = self.clone();
        Zip::from(&mut out.data)
            .and(&mut out.mask)
            .for_each(|v, m| {
                if *m {
                    match f(*v) {
                        Some(r) => *v = r,
                        None => {
                            *v = 0.0;
                            *m = false;
                        }
                    }
                }
            });
        out
    }

    /// Apply an n-ary kernel across bands of identical shape.
    /// The output takes the projection of the first input.
    pub fn combine<F>(name: &str, inputs: &[&Band], f: F) -> CompositeResult<Band>
    where
        F: Fn(&[PixelValue]) -> Option<PixelValue>,
    {
        let first = inputs
            .first()
            .ok_or_else(|| CompositeError::Processing("combine called without inputs".to_string()))?;
        let dim = first.dim();
        for band in inputs.iter().skip(1) {
            if band.dim() != dim {
                return Err(CompositeError::DimensionMismatch {
                    expected: dim,
                    found: band.dim(),
                });
            }
        }

        let mut out = Band::constant(name, dim, 0.0, first.projection.clone());
        let mut samples = vec![0.0; inputs.len()];
        for ((row, col), value) in out.data.indexed_iter_mut() {
            let mut valid = true;
            for (k, band) in inputs.iter().enumerate() {
                match band.value(row, col) {
                    Some(v) => samples[k] = v,
                    None => {
                        valid = false;
                        break;
                    }
                }
            }
            let result = if valid { f(&samples) } else { None };
            match result {
                Some(r) => *value = r,
                None => out.mask[[row, col]] = false,
            }
        }
        Ok(out)
    }

    /// Element-wise binary kernel
    pub fn zip_with<F>(&self, other: &Band, name: &str, f: F) -> CompositeResult<Band>
    where
        F: Fn(PixelValue, PixelValue) -> Option<PixelValue>,
    {
        Band::combine(name, &[self, other], |v| f(v[0], v[1]))
    }

    pub fn multiply(&self, factor: PixelValue) -> Band {
        let mut out = self.map_values(|v| Some(v * factor));
        out.data_type = DataType::Float64;
        out
    }

    /// Mask every pixel where `mask` is false, keeping existing no-data
    pub fn update_mask(&self, mask: &ValidityMask) -> CompositeResult<Band> {
        if mask.dim() != self.dim() {
            return Err(CompositeError::DimensionMismatch {
                expected: self.dim(),
                found: mask.dim(),
            });
        }
        let mut out = self.clone();
        Zip::from(&mut out.mask).and(mask).for_each(|m, &keep| *m = *m && keep);
        Ok(out)
    }

    /// Fill no-data pixels with `value` and mark them valid
    pub fn unmask(&self, value: PixelValue) -> Band {
        let fill = self.data_type.cast(value);
        let mut out = self.clone();
        Zip::from(&mut out.data).and(&mut out.mask).for_each(|v, m| {
            if !*m {
                *v = fill;
                *m = true;
            }
        });
        out
    }
}

/// Band subset with optional renaming, applied before compositing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandSelection {
    pub selectors: Vec<String>,
    #[serde(default)]
    pub names: Option<Vec<String>>,
}

impl BandSelection {
    pub fn new<S: AsRef<str>>(selectors: &[S]) -> Self {
        Self {
            selectors: selectors.iter().map(|s| s.as_ref().to_string()).collect(),
            names: None,
        }
    }

    pub fn renamed<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        self.names = Some(names.iter().map(|s| s.as_ref().to_string()).collect());
        self
    }

    pub fn apply(&self, image: &RasterImage) -> CompositeResult<RasterImage> {
        let selectors: Vec<&str> = self.selectors.iter().map(String::as_str).collect();
        match &self.names {
            Some(names) => {
                let names: Vec<&str> = names.iter().map(String::as_str).collect();
                image.select_renamed(&selectors, &names)
            }
            None => image.select(&selectors),
        }
    }
}

impl RasterImage {
    fn with_bands(&self, bands: Vec<Band>) -> RasterImage {
        RasterImage {
            id: self.id.clone(),
            bands,
            properties: self.properties.clone(),
            footprint: self.footprint.clone(),
        }
    }

    /// Apply a band transform to every band, keeping identity and properties
    pub fn map_bands<F>(&self, f: F) -> RasterImage
    where
        F: Fn(&Band) -> Band,
    {
        self.with_bands(self.bands.iter().map(f).collect())
    }

    fn try_map_bands<F>(&self, f: F) -> CompositeResult<RasterImage>
    where
        F: Fn(&Band) -> CompositeResult<Band>,
    {
        let bands = self.bands.iter().map(f).collect::<CompositeResult<Vec<_>>>()?;
        Ok(self.with_bands(bands))
    }

    /// Select bands by name, in the requested order
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> CompositeResult<RasterImage> {
        let bands = names
            .iter()
            .map(|n| self.band(n.as_ref()).cloned())
            .collect::<CompositeResult<Vec<_>>>()?;
        let mut out = self.with_bands(Vec::with_capacity(bands.len()));
        for band in bands {
            out.push_band(band)?;
        }
        Ok(out)
    }

    /// Select bands and rename them positionally
    pub fn select_renamed<S: AsRef<str>, T: AsRef<str>>(
        &self,
        names: &[S],
        new_names: &[T],
    ) -> CompositeResult<RasterImage> {
        if names.len() != new_names.len() {
            return Err(CompositeError::Configuration(format!(
                "{} band selectors but {} new names",
                names.len(),
                new_names.len()
            )));
        }
        self.select(names)?.rename(new_names)
    }

    /// Rename every band positionally
    pub fn rename<S: AsRef<str>>(&self, names: &[S]) -> CompositeResult<RasterImage> {
        if names.len() != self.bands.len() {
            return Err(CompositeError::Configuration(format!(
                "image has {} bands but {} names were given",
                self.bands.len(),
                names.len()
            )));
        }
        let mut out = self.with_bands(Vec::with_capacity(names.len()));
        for (band, name) in self.bands.iter().zip(names) {
            out.push_band(band.clone().renamed(name.as_ref()))?;
        }
        Ok(out)
    }

    /// Append the bands of `other`, keeping this image's properties
    pub fn add_bands(&self, other: &RasterImage) -> CompositeResult<RasterImage> {
        let mut out = self.clone();
        for band in &other.bands {
            out.push_band(band.clone())?;
        }
        Ok(out)
    }

    /// Drop the named bands; unknown names are ignored
    pub fn remove_bands<S: AsRef<str>>(&self, names: &[S]) -> RasterImage {
        let bands = self
            .bands
            .iter()
            .filter(|b| !names.iter().any(|n| n.as_ref() == b.name))
            .cloned()
            .collect();
        self.with_bands(bands)
    }

    pub fn multiply(&self, factor: PixelValue) -> RasterImage {
        self.map_bands(|b| b.multiply(factor))
    }

    /// Divide every band by a constant; a zero divisor masks everything
    pub fn divide(&self, divisor: PixelValue) -> RasterImage {
        self.map_bands(|b| {
            let mut out = b.map_values(|v| safe_divide(v, divisor));
            out.data_type = DataType::Float64;
            out
        })
    }

    /// Element-wise square of every band
    pub fn square(&self) -> RasterImage {
        self.map_bands(|b| {
            let mut out = b.map_values(|v| Some(v * v));
            out.data_type = DataType::Float64;
            out
        })
    }

    /// Element-wise square root; negative values become no-data
    pub fn sqrt(&self) -> RasterImage {
        self.map_bands(|b| {
            let mut out = b.map_values(|v| (v >= 0.0).then(|| v.sqrt()));
            out.data_type = DataType::Float64;
            out
        })
    }

    pub fn cast(&self, data_type: DataType) -> RasterImage {
        self.map_bands(|b| b.clone().with_data_type(data_type))
    }

    /// Reinterpret every band as floating point
    pub fn to_float(&self) -> RasterImage {
        self.cast(DataType::Float64)
    }

    /// AND a mask into every band
    pub fn update_mask(&self, mask: &ValidityMask) -> CompositeResult<RasterImage> {
        self.try_map_bands(|b| b.update_mask(mask))
    }

    pub fn unmask(&self, value: PixelValue) -> RasterImage {
        self.map_bands(|b| b.unmask(value))
    }

    /// Mask every pixel whose centre falls outside `region`
    pub fn clip(&self, region: &Geometry) -> RasterImage {
        let mut out = self.map_bands(|band| {
            let mut clipped = band.clone();
            let transform = band.projection.transform;
            for ((row, col), m) in clipped.mask.indexed_iter_mut() {
                if *m && !region.contains_point(transform.pixel_center(row, col)) {
                    *m = false;
                }
            }
            clipped
        });
        out.footprint = Some(region.clone());
        out
    }

    /// Lower-case every band name and append `_<suffix>`
    pub fn add_suffix(&self, suffix: &str) -> RasterImage {
        self.map_bands(|b| {
            let name = format!("{}_{}", b.name.to_lowercase(), suffix);
            b.clone().renamed(name)
        })
    }

    /// Select bands (the first one when `bands` is `None`) keeping properties
    pub fn band_with_properties(&self, bands: Option<&[&str]>) -> CompositeResult<RasterImage> {
        match bands {
            Some(names) => self.select(names),
            None => {
                let first = self.bands.first().ok_or_else(|| {
                    CompositeError::Processing(format!("image {} has no bands", self.label()))
                })?;
                Ok(self.with_bands(vec![first.clone()]))
            }
        }
    }

    /// Copy every property of `source` that this image does not already set
    pub fn copy_properties(mut self, source: &RasterImage) -> RasterImage {
        for (k, v) in &source.properties {
            self.properties.entry(k.clone()).or_insert_with(|| v.clone());
        }
        if self.footprint.is_none() {
            self.footprint = source.footprint.clone();
        }
        if self.id.is_none() {
            self.id = source.id.clone();
        }
        self
    }
}
