//! Lazy image collections and the collection builder
//!
//! An [`ImageCollection`] records its source images and an ordered list of
//! filter and map stages. Stages run per image only when the collection is
//! enumerated, so a collection can be iterated repeatedly without holding
//! every transformed image in memory.

use crate::core::band_math::BandSelection;
use crate::core::composite::CompositeConfig;
use crate::core::{harmonize, indices};
use crate::types::{CompositeError, CompositeResult, Geometry, RasterImage};
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Per-image transform closure
pub type ImageMap = Arc<dyn Fn(RasterImage) -> CompositeResult<RasterImage> + Send + Sync>;

/// Predicate evaluated against each image
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Footprint intersects the geometry
    Bounds(Geometry),
    /// Acquisition time in `[start, end)`
    DateRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    /// Acquisition day of year in `[start, end]`
    DayOfYear { start: u32, end: u32 },
}

impl Filter {
    /// Day-of-year filter, rejecting empty or wrapping windows
    pub fn day_of_year(start: u32, end: u32) -> CompositeResult<Filter> {
        if !(1..=366).contains(&start) || !(1..=366).contains(&end) {
            return Err(CompositeError::Configuration(format!(
                "day-of-year window [{}, {}] outside 1..=366",
                start, end
            )));
        }
        if start > end {
            return Err(CompositeError::Configuration(format!(
                "day-of-year window [{}, {}] wraps the year end; split it into two queries",
                start, end
            )));
        }
        Ok(Filter::DayOfYear { start, end })
    }

    pub fn matches(&self, image: &RasterImage) -> bool {
        match self {
            Filter::Bounds(geometry) => image
                .footprint()
                .map(|footprint| footprint.intersects(geometry))
                .unwrap_or(false),
            Filter::DateRange { start, end } => image
                .acquisition_time()
                .map(|t| t >= *start && t < *end)
                .unwrap_or(false),
            Filter::DayOfYear { start, end } => image
                .acquisition_time()
                .map(|t| {
                    let doy = t.ordinal();
                    // a window reaching day 365 also covers leap-year 31 December
                    doy >= *start && (doy <= *end || (*end >= 365 && doy == 366))
                })
                .unwrap_or(false),
        }
    }
}

#[derive(Clone)]
enum Stage {
    Filter(Filter),
    Map { label: String, f: ImageMap },
}

#[derive(Clone)]
enum Source {
    Images(Arc<Vec<RasterImage>>),
    Merged(Arc<Vec<ImageCollection>>),
}

/// Lazily evaluated, ordered series of images
#[derive(Clone)]
pub struct ImageCollection {
    source: Source,
    stages: Vec<Stage>,
}

impl fmt::Debug for ImageCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stages: Vec<String> = self
            .stages
            .iter()
            .map(|s| match s {
                Stage::Filter(filter) => format!("filter({:?})", filter),
                Stage::Map { label, .. } => format!("map({})", label),
            })
            .collect();
        let source = match &self.source {
            Source::Images(images) => format!("{} images", images.len()),
            Source::Merged(parts) => format!("merge of {} collections", parts.len()),
        };
        f.debug_struct("ImageCollection")
            .field("source", &source)
            .field("stages", &stages)
            .finish()
    }
}

impl ImageCollection {
    pub fn from_images(images: Vec<RasterImage>) -> Self {
        Self {
            source: Source::Images(Arc::new(images)),
            stages: Vec::new(),
        }
    }

    fn with_stage(&self, stage: Stage) -> Self {
        let mut out = self.clone();
        out.stages.push(stage);
        out
    }

    /// Concatenate two collections, this one first
    pub fn merge(&self, other: &ImageCollection) -> Self {
        Self {
            source: Source::Merged(Arc::new(vec![self.clone(), other.clone()])),
            stages: Vec::new(),
        }
    }

    pub fn filter(&self, filter: Filter) -> Self {
        self.with_stage(Stage::Filter(filter))
    }

    pub fn filter_bounds(&self, geometry: Geometry) -> Self {
        self.filter(Filter::Bounds(geometry))
    }

    /// Keep images acquired in `[start, end)`
    pub fn filter_date(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.filter(Filter::DateRange { start, end })
    }

    pub fn filter_day_of_year(&self, start: u32, end: u32) -> CompositeResult<Self> {
        Ok(self.filter(Filter::day_of_year(start, end)?))
    }

    /// Append a per-image transform
    pub fn map<F>(&self, label: &str, f: F) -> Self
    where
        F: Fn(RasterImage) -> CompositeResult<RasterImage> + Send + Sync + 'static,
    {
        self.with_stage(Stage::Map {
            label: label.to_string(),
            f: Arc::new(f),
        })
    }

    /// Restrict every image to a band subset
    pub fn select(&self, selection: BandSelection) -> Self {
        self.map("select", move |image| selection.apply(&image))
    }

    fn evaluate(&self, mut image: RasterImage) -> Option<CompositeResult<RasterImage>> {
        for stage in &self.stages {
            match stage {
                Stage::Filter(filter) => {
                    if !filter.matches(&image) {
                        return None;
                    }
                }
                Stage::Map { f, .. } => match f(image) {
                    Ok(next) => image = next,
                    Err(e) => return Some(Err(e)),
                },
            }
        }
        Some(Ok(image))
    }

    /// Enumerate the collection, evaluating stages image by image
    pub fn images(&self) -> Box<dyn Iterator<Item = CompositeResult<RasterImage>> + '_> {
        let upstream: Box<dyn Iterator<Item = CompositeResult<RasterImage>> + '_> = match &self.source {
            Source::Images(images) => Box::new(images.iter().cloned().map(Ok)),
            Source::Merged(parts) => Box::new(parts.iter().flat_map(|c| c.images())),
        };
        Box::new(upstream.filter_map(move |item| match item {
            Ok(image) => self.evaluate(image),
            Err(e) => Some(Err(e)),
        }))
    }

    /// Number of images after filtering
    pub fn size(&self) -> CompositeResult<usize> {
        self.images().try_fold(0, |n, item| item.map(|_| n + 1))
    }

    pub fn first(&self) -> CompositeResult<Option<RasterImage>> {
        self.images().next().transpose()
    }

    /// Materialize the whole collection
    pub fn to_list(&self) -> CompositeResult<Vec<RasterImage>> {
        self.images().collect()
    }
}

/// Named per-image transforms accepted by [`get_images`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransformKind {
    /// Canonical band schema with cross-sensor correction
    Harmonize,
    /// Mask non-clear and saturated pixels
    ClearMask,
    /// Append the configured spectral indices
    AddIndices,
}

impl TransformKind {
    pub fn name(&self) -> &'static str {
        match self {
            TransformKind::Harmonize => "harmonize",
            TransformKind::ClearMask => "clear_mask",
            TransformKind::AddIndices => "add_indices",
        }
    }

    /// Parse transform names, skipping unknown ones with a warning
    pub fn parse_list<S: AsRef<str>>(names: &[S]) -> Vec<TransformKind> {
        names
            .iter()
            .filter_map(|name| match name.as_ref().parse::<TransformKind>() {
                Ok(kind) => Some(kind),
                Err(e) => {
                    log::warn!("{}", e);
                    None
                }
            })
            .collect()
    }

    /// Bind this transform to a configuration
    pub fn bind(&self, config: &CompositeConfig) -> ImageMap {
        match self {
            TransformKind::Harmonize => Arc::new(|image: RasterImage| harmonize::harmonize(&image)),
            TransformKind::ClearMask => Arc::new(|image: RasterImage| harmonize::mask_clear(&image)),
            TransformKind::AddIndices => {
                let params = config.index_params();
                let index_list: Vec<String> =
                    config.index_list.iter().map(|k| k.name().to_string()).collect();
                Arc::new(move |image: RasterImage| indices::add_indices(&image, &index_list, &params))
            }
        }
    }
}

impl FromStr for TransformKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "harmonize" | "ls_sr_band_correction" => Ok(TransformKind::Harmonize),
            "clear_mask" | "ls_sr_only_clear" => Ok(TransformKind::ClearMask),
            "add_indices" => Ok(TransformKind::AddIndices),
            other => Err(format!("The transform '{}' is not implemented", other)),
        }
    }
}

impl fmt::Display for TransformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Filtering and transform parameters for [`get_images`]
#[derive(Debug, Clone, PartialEq)]
pub struct ImageQuery {
    pub bounds: Option<Geometry>,
    /// Whole calendar year, used when no date range is given
    pub year: Option<i32>,
    /// Absolute `[start, end)` range; takes precedence over `year`
    pub date_range: Option<(NaiveDate, NaiveDate)>,
    pub start_julian: u32,
    pub end_julian: u32,
    pub transforms: Vec<String>,
}

impl Default for ImageQuery {
    fn default() -> Self {
        Self {
            bounds: None,
            year: None,
            date_range: None,
            start_julian: 1,
            end_julian: 365,
            transforms: Vec::new(),
        }
    }
}

impl ImageQuery {
    /// Resolved `[start, end)` acquisition window, if any
    pub fn time_window(&self) -> CompositeResult<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        let (start, end) = match (self.date_range, self.year) {
            (Some(range), _) => range,
            (None, Some(year)) => {
                let start = NaiveDate::from_ymd_opt(year, 1, 1);
                let end = NaiveDate::from_ymd_opt(year + 1, 1, 1);
                match (start, end) {
                    (Some(s), Some(e)) => (s, e),
                    _ => {
                        return Err(CompositeError::Configuration(format!(
                            "year {} out of range",
                            year
                        )))
                    }
                }
            }
            (None, None) => return Ok(None),
        };
        Ok(Some((midnight_utc(start), midnight_utc(end))))
    }
}

fn midnight_utc(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

/// Build a lazy, filtered and transformed view of `source`
pub fn get_images(
    source: &ImageCollection,
    query: &ImageQuery,
    config: &CompositeConfig,
) -> CompositeResult<ImageCollection> {
    let doy = Filter::day_of_year(query.start_julian, query.end_julian)?;
    let transforms = TransformKind::parse_list(&query.transforms);
    log::debug!(
        "Building collection: bounds={} window={:?} doy=[{}, {}] transforms={:?}",
        query.bounds.is_some(),
        query.time_window()?,
        query.start_julian,
        query.end_julian,
        transforms
    );

    let mut coll = source.clone();
    if let Some(bounds) = &query.bounds {
        coll = coll.filter_bounds(bounds.clone());
    }
    if let Some((start, end)) = query.time_window()? {
        coll = coll.filter_date(start, end);
    }
    coll = coll.filter(doy);

    for kind in transforms {
        let f = kind.bind(config);
        coll = coll.map(kind.name(), move |image| f(image));
    }
    Ok(coll)
}
