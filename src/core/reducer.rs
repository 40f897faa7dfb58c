//! Temporal reducers: collapse a stack of co-registered bands to one band

use crate::types::{Band, CompositeError, CompositeResult, PixelValue, Projection, ValidityMask};
use ndarray::{Array2, Zip};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::OnceLock;

/// Statistical reduction applied per pixel across a series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Reducer {
    Mean,
    Median,
    Min,
    Max,
    Sum,
    /// Square every image, then take the mean
    RootMeanSquare,
    /// Square every image, then take the sum
    DiagonalSum,
    /// Percentile in [0, 100]
    Percentile(u8),
    /// Mean of the values between two percentiles, bounds ordered low to high
    IntervalMean { low: u8, high: u8 },
}

impl Default for Reducer {
    fn default() -> Self {
        Reducer::Median
    }
}

impl Reducer {
    /// Percentile reducer; bounds above 100 are rejected
    pub fn percentile(p: u8) -> CompositeResult<Reducer> {
        check_percentile(p)?;
        Ok(Reducer::Percentile(p))
    }

    /// Interval mean; inverted bounds are swapped
    pub fn interval_mean(low: u8, high: u8) -> CompositeResult<Reducer> {
        check_percentile(low)?;
        check_percentile(high)?;
        let (low, high) = if low > high { (high, low) } else { (low, high) };
        Ok(Reducer::IntervalMean { low, high })
    }

    /// Parse a reducer spec, degrading to the median on anything unrecognised
    pub fn resolve(spec: &str) -> Reducer {
        match spec.parse() {
            Ok(reducer) => reducer,
            Err(e) => {
                log::warn!("Supplied reducer '{}' is not implemented ({}). Using default: median", spec, e);
                Reducer::Median
            }
        }
    }

    /// Whether every input is squared before reduction
    pub fn squares_inputs(&self) -> bool {
        matches!(self, Reducer::RootMeanSquare | Reducer::DiagonalSum)
    }

    /// Suffix appended to reduced band names
    pub fn output_suffix(&self) -> String {
        match self {
            Reducer::Mean | Reducer::RootMeanSquare | Reducer::IntervalMean { .. } => "mean".to_string(),
            Reducer::Median => "median".to_string(),
            Reducer::Min => "min".to_string(),
            Reducer::Max => "max".to_string(),
            Reducer::Sum | Reducer::DiagonalSum => "sum".to_string(),
            Reducer::Percentile(p) => format!("p{}", p),
        }
    }

    /// Reduce the valid samples of one pixel. `values` is reordered in place.
    /// Returns `None` when there is nothing to reduce.
    pub fn reduce_values(&self, values: &mut [PixelValue]) -> Option<PixelValue> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        match self {
            Reducer::Mean | Reducer::RootMeanSquare => Some(values.iter().sum::<f64>() / n),
            Reducer::Sum | Reducer::DiagonalSum => Some(values.iter().sum()),
            Reducer::Min => values.iter().copied().reduce(f64::min),
            Reducer::Max => values.iter().copied().reduce(f64::max),
            Reducer::Median => {
                sort_values(values);
                Some(percentile_of_sorted(values, 50.0))
            }
            Reducer::Percentile(p) => {
                sort_values(values);
                Some(percentile_of_sorted(values, *p as f64))
            }
            Reducer::IntervalMean { low, high } => {
                sort_values(values);
                let lo = percentile_of_sorted(values, *low as f64);
                let hi = percentile_of_sorted(values, *high as f64);
                let (sum, count) = values
                    .iter()
                    .filter(|&&v| v >= lo && v <= hi)
                    .fold((0.0, 0usize), |(s, c), &v| (s + v, c + 1));
                if count == 0 {
                    // an interpolated interval can fall between two samples
                    Some((lo + hi) / 2.0)
                } else {
                    Some(sum / count as f64)
                }
            }
        }
    }

    /// Reduce a stack of bands pixel by pixel, masked samples excluded.
    /// Pixels with no valid sample are no-data in the output.
    pub fn reduce_bands(&self, name: &str, stack: &[&Band]) -> CompositeResult<Band> {
        let first = stack.first().ok_or_else(|| {
            CompositeError::Processing(format!("cannot reduce band '{}' over zero images", name))
        })?;
        let dim = first.dim();
        for band in stack.iter().skip(1) {
            if band.dim() != dim {
                return Err(CompositeError::DimensionMismatch {
                    expected: dim,
                    found: band.dim(),
                });
            }
        }

        let mut data = Array2::<PixelValue>::zeros(dim);
        let mut mask = ValidityMask::from_elem(dim, false);
        let kernel = |(row, col): (usize, usize), value: &mut PixelValue, valid: &mut bool| {
            let mut samples: Vec<PixelValue> =
                stack.iter().filter_map(|b| b.value(row, col)).collect();
            if let Some(r) = self.reduce_values(&mut samples) {
                *value = r;
                *valid = true;
            }
        };

        let zip = Zip::indexed(&mut data).and(&mut mask);
        #[cfg(feature = "parallel")]
        zip.par_for_each(kernel);
        #[cfg(not(feature = "parallel"))]
        zip.for_each(kernel);

        let projection: Projection = first.projection.clone();
        Band::new(name, data, projection).with_mask(mask)
    }
}

fn check_percentile(p: u8) -> CompositeResult<()> {
    if p > 100 {
        return Err(CompositeError::Configuration(format!(
            "percentile {} outside [0, 100]",
            p
        )));
    }
    Ok(())
}

fn sort_values(values: &mut [PixelValue]) {
    values.sort_by(|a, b| a.total_cmp(b));
}

/// Linear interpolation between closest ranks
fn percentile_of_sorted(sorted: &[PixelValue], p: f64) -> PixelValue {
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;
    sorted[lower] * (1.0 - weight) + sorted[upper] * weight
}

static PERCENTILE_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
static INTERVAL_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

/// Compiled reducer pattern, built on first use
fn pattern(cell: &'static OnceLock<Option<Regex>>, source: &str) -> CompositeResult<&'static Regex> {
    cell.get_or_init(|| Regex::new(source).ok())
        .as_ref()
        .ok_or_else(|| CompositeError::Configuration(format!("Regex error in '{}'", source)))
}

fn parse_bound(text: &str) -> CompositeResult<u8> {
    text.parse::<u8>()
        .map_err(|e| CompositeError::Configuration(format!("malformed percentile '{}': {}", text, e)))
}

impl FromStr for Reducer {
    type Err = CompositeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let spec = s.trim().to_lowercase();
        match spec.as_str() {
            "mean" => return Ok(Reducer::Mean),
            "median" => return Ok(Reducer::Median),
            "min" => return Ok(Reducer::Min),
            "max" => return Ok(Reducer::Max),
            "sum" => return Ok(Reducer::Sum),
            "rms" => return Ok(Reducer::RootMeanSquare),
            "diag" => return Ok(Reducer::DiagonalSum),
            _ => {}
        }

        let percentile = pattern(&PERCENTILE_PATTERN, r"^percentile_(\d+)$")?;
        if let Some(caps) = percentile.captures(&spec) {
            return Reducer::percentile(parse_bound(&caps[1])?);
        }

        let interval = pattern(&INTERVAL_PATTERN, r"^interval_mean_(\d+)_(\d+)$")?;
        if let Some(caps) = interval.captures(&spec) {
            return Reducer::interval_mean(parse_bound(&caps[1])?, parse_bound(&caps[2])?);
        }

        Err(CompositeError::Configuration(format!("unknown reducer '{}'", s)))
    }
}

impl std::fmt::Display for Reducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reducer::Mean => write!(f, "mean"),
            Reducer::Median => write!(f, "median"),
            Reducer::Min => write!(f, "min"),
            Reducer::Max => write!(f, "max"),
            Reducer::Sum => write!(f, "sum"),
            Reducer::RootMeanSquare => write!(f, "rms"),
            Reducer::DiagonalSum => write!(f, "diag"),
            Reducer::Percentile(p) => write!(f, "percentile_{}", p),
            Reducer::IntervalMean { low, high } => write!(f, "interval_mean_{}_{}", low, high),
        }
    }
}

impl From<String> for Reducer {
    fn from(spec: String) -> Self {
        Reducer::resolve(&spec)
    }
}

impl From<Reducer> for String {
    fn from(reducer: Reducer) -> Self {
        reducer.to_string()
    }
}
