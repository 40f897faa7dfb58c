//! Temporal compositing
//!
//! Two modes are supported. Without a reference index every band is reduced
//! across the series with the configured [`Reducer`]. With a reference index
//! the reducer is applied to that band only, and each output pixel is copied
//! from the image whose reference value lies closest to the reduced value
//! (a per-pixel quality mosaic).

use crate::core::band_math::BandSelection;
use crate::core::collection::ImageCollection;
use crate::core::indices::{IndexKind, IndexParams};
use crate::core::reducer::Reducer;
use crate::types::{
    Band, CompositeError, CompositeResult, Geometry, PixelGrid, RasterImage, ValidityMask,
};
use serde::{Deserialize, Serialize};

/// Immutable compositing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositeConfig {
    /// Band driving the quality mosaic; `None` reduces every band directly
    pub reference_index: Option<String>,
    pub reducer: Reducer,
    /// Multiplier applied to every image before reduction
    pub scale_factor: f64,
    /// SAVI soil brightness parameter `L`
    #[serde(rename = "const")]
    pub savi_const: f64,
    /// Indices appended by the `add_indices` transform
    pub index_list: Vec<IndexKind>,
}

impl Default for CompositeConfig {
    fn default() -> Self {
        Self {
            reference_index: Some("NDVI".to_string()),
            reducer: Reducer::Median,
            scale_factor: 1.0,
            savi_const: 0.5,
            index_list: IndexKind::ALL.to_vec(),
        }
    }
}

impl CompositeConfig {
    /// Parse and validate a JSON configuration document
    pub fn from_json(text: &str) -> CompositeResult<Self> {
        let config: CompositeConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CompositeResult<()> {
        if !(self.scale_factor.is_finite() && self.scale_factor > 0.0) {
            return Err(CompositeError::Configuration(format!(
                "scale_factor must be positive, got {}",
                self.scale_factor
            )));
        }
        if !self.savi_const.is_finite() {
            return Err(CompositeError::Configuration(
                "SAVI constant must be finite".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_reducer(mut self, reducer: Reducer) -> Self {
        self.reducer = reducer;
        self
    }

    pub fn with_reference_index(mut self, index: Option<&str>) -> Self {
        self.reference_index = index.map(str::to_string);
        self
    }

    pub fn with_scale_factor(mut self, scale_factor: f64) -> Self {
        self.scale_factor = scale_factor;
        self
    }

    pub fn index_params(&self) -> IndexParams {
        IndexParams {
            scale_factor: self.scale_factor,
            savi_const: self.savi_const,
        }
    }
}

/// Per-call options of a composite
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompositeOptions {
    /// Clip the result to this region
    pub region: Option<Geometry>,
    /// Select (and optionally rename) bands before compositing
    pub bands: Option<BandSelection>,
}

/// Running state of the quality mosaic fold
struct MosaicState {
    best_score: PixelGrid,
    scored: ValidityMask,
    bands: Vec<Band>,
}

impl MosaicState {
    /// Empty mosaic shaped like `template`, every pixel no-data
    fn new(template: &RasterImage) -> CompositeResult<Self> {
        let first = template.bands.first().ok_or_else(|| {
            CompositeError::Processing(format!("image {} has no bands", template.label()))
        })?;
        let dim = first.dim();
        let bands = template
            .bands
            .iter()
            .map(|b| Band {
                data: PixelGrid::zeros(b.dim()),
                mask: ValidityMask::from_elem(b.dim(), false),
                ..b.clone()
            })
            .collect();
        Ok(Self {
            best_score: PixelGrid::from_elem(dim, f64::NEG_INFINITY),
            scored: ValidityMask::from_elem(dim, false),
            bands,
        })
    }

    /// Take every pixel where `score` beats the best seen so far
    fn update(&mut self, image: &RasterImage, score: &Band) -> CompositeResult<()> {
        if score.dim() != self.best_score.dim() {
            return Err(CompositeError::DimensionMismatch {
                expected: self.best_score.dim(),
                found: score.dim(),
            });
        }
        let sources = self
            .bands
            .iter()
            .map(|b| image.band(&b.name))
            .collect::<CompositeResult<Vec<_>>>()?;
        for (src, dst) in sources.iter().zip(&self.bands) {
            if src.dim() != dst.dim() {
                return Err(CompositeError::DimensionMismatch {
                    expected: dst.dim(),
                    found: src.dim(),
                });
            }
        }

        let (rows, cols) = score.dim();
        for row in 0..rows {
            for col in 0..cols {
                let Some(s) = score.value(row, col) else { continue };
                if self.scored[[row, col]] && s <= self.best_score[[row, col]] {
                    continue;
                }
                self.scored[[row, col]] = true;
                self.best_score[[row, col]] = s;
                for (src, dst) in sources.iter().zip(self.bands.iter_mut()) {
                    dst.data[[row, col]] = src.data[[row, col]];
                    dst.mask[[row, col]] = src.mask[[row, col]];
                }
            }
        }
        Ok(())
    }
}

/// Reduces an image collection to a single composite image
#[derive(Debug, Clone)]
pub struct TemporalCompositor {
    config: CompositeConfig,
}

impl TemporalCompositor {
    pub fn new(config: CompositeConfig) -> CompositeResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &CompositeConfig {
        &self.config
    }

    /// Build the composite of `collection`
    pub fn composite(
        &self,
        collection: &ImageCollection,
        options: &CompositeOptions,
    ) -> CompositeResult<RasterImage> {
        let reducer = self.config.reducer;
        log::info!(
            "Compositing with reducer {} (reference index: {:?}, scale factor: {})",
            reducer,
            self.config.reference_index,
            self.config.scale_factor
        );

        let scale_factor = self.config.scale_factor;
        let mut series = collection.map("scale", move |image| Ok(image.multiply(scale_factor)));
        if let Some(selection) = &options.bands {
            log::debug!("Restricting composite to bands {:?}", selection);
            series = series.select(selection.clone());
        }

        let composite = match &self.config.reference_index {
            Some(index) => self.quality_mosaic(&series, index)?,
            None => self.reduce_series(&series)?,
        };

        let out = match &options.region {
            Some(region) => composite.clip(region),
            None => composite,
        };
        log::info!("Composite completed with bands {:?}", out.band_names());
        Ok(out)
    }

    /// Reduce every band independently across the series
    fn reduce_series(
        &self,
        series: &ImageCollection,
    ) -> CompositeResult<RasterImage> {
        let reducer = self.config.reducer;
        let mut stacks: Vec<(String, Vec<Band>)> = Vec::new();

        for item in series.images() {
            let image = item?;
            let image = if reducer.squares_inputs() { image.square() } else { image };
            if stacks.is_empty() {
                stacks = image.bands.iter().map(|b| (b.name.clone(), Vec::new())).collect();
            }
            for (name, stack) in stacks.iter_mut() {
                stack.push(image.band(name)?.clone());
            }
        }

        if stacks.is_empty() {
            log::warn!("Compositing an empty collection; result has no bands");
            return Ok(RasterImage::new());
        }

        let suffix = reducer.output_suffix();
        let reduce = |(name, stack): &(String, Vec<Band>)| {
            let refs: Vec<&Band> = stack.iter().collect();
            reducer.reduce_bands(&format!("{}_{}", name, suffix), &refs)
        };

        #[cfg(feature = "parallel")]
        let bands = {
            use rayon::prelude::*;
            stacks.par_iter().map(reduce).collect::<CompositeResult<Vec<_>>>()?
        };
        #[cfg(not(feature = "parallel"))]
        let bands = stacks.iter().map(reduce).collect::<CompositeResult<Vec<_>>>()?;

        RasterImage::from_bands(bands)
    }

    /// Per-pixel selection of the observation closest to the reduced
    /// reference band
    fn quality_mosaic(
        &self,
        series: &ImageCollection,
        index: &str,
    ) -> CompositeResult<RasterImage> {
        let reducer = self.config.reducer;

        // pass 1: reference band only
        let mut reference_stack = Vec::new();
        for item in series.images() {
            reference_stack.push(item?.band(index)?.clone());
        }
        if reference_stack.is_empty() {
            log::warn!("Compositing an empty collection; result has no bands");
            return Ok(RasterImage::new());
        }
        let refs: Vec<&Band> = reference_stack.iter().collect();
        let reference = reducer.reduce_bands(index, &refs)?;
        log::debug!("Reference {} reduced with {} over {} images", index, reducer, refs.len());

        // pass 2: fold the series, tracking the best score per pixel
        let mut state: Option<MosaicState> = None;
        for item in series.images() {
            let image = item?;
            let score = image
                .band(index)?
                .zip_with(&reference, "quality", |v, r| Some(-(v - r).abs()))?;
            if state.is_none() {
                state = Some(MosaicState::new(&image)?);
            }
            if let Some(mosaic) = state.as_mut() {
                mosaic.update(&image, &score)?;
            }
        }

        match state {
            Some(mosaic) => RasterImage::from_bands(mosaic.bands),
            None => Ok(RasterImage::new()),
        }
    }
}

/// Square root of a `rms`/`diag` composite, giving physical units
pub fn finalize_rms(image: &RasterImage) -> RasterImage {
    image.sqrt()
}
