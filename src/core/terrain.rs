//! Terrain bands derived from a digital elevation model
//!
//! Slope and aspect come from central differences over the 4-neighbour
//! stencil. A pixel is no-data when any stencil sample is no-data in the DEM.

use crate::types::{Band, CompositeError, CompositeResult, RasterImage, ValidityMask};
use ndarray::Array2;

/// Parameters for slope and aspect computation
#[derive(Debug, Clone)]
pub struct TerrainParams {
    /// DEM pixel spacing in elevation units (x, y); `None` reads it from the
    /// DEM transform
    pub pixel_spacing: Option<(f64, f64)>,
}

impl Default for TerrainParams {
    fn default() -> Self {
        Self { pixel_spacing: None }
    }
}

/// Slope and aspect grids with their shared validity mask
#[derive(Debug, Clone)]
pub struct SlopeAspect {
    /// Degrees from horizontal
    pub slope: Array2<f64>,
    /// Degrees clockwise from north
    pub aspect: Array2<f64>,
    pub valid: ValidityMask,
}

/// Compute slope and aspect from a DEM band
///
/// Border pixels take the value of their nearest interior pixel.
pub fn compute_slope_aspect(dem: &Band, params: &TerrainParams) -> CompositeResult<SlopeAspect> {
    let (rows, cols) = dem.dim();
    if rows < 3 || cols < 3 {
        return Err(CompositeError::Processing(format!(
            "DEM of {}x{} is too small for slope computation",
            rows, cols
        )));
    }

    let (dx_scale, dy_scale) = params.pixel_spacing.unwrap_or((
        dem.projection.transform.pixel_width.abs(),
        dem.projection.transform.pixel_height.abs(),
    ));
    if dx_scale <= 0.0 || dy_scale <= 0.0 {
        return Err(CompositeError::Configuration(
            "DEM pixel spacing must be positive".to_string(),
        ));
    }

    let mut slope = Array2::<f64>::zeros((rows, cols));
    let mut aspect = Array2::<f64>::zeros((rows, cols));
    let mut valid = ValidityMask::from_elem((rows, cols), false);
    let z = &dem.data;
    let m = &dem.mask;

    for i in 1..rows - 1 {
        for j in 1..cols - 1 {
            if !(m[[i, j]] && m[[i, j - 1]] && m[[i, j + 1]] && m[[i - 1, j]] && m[[i + 1, j]]) {
                continue;
            }
            valid[[i, j]] = true;

            // central differences; rows run north to south
            let dz_dx = (z[[i, j + 1]] - z[[i, j - 1]]) / (2.0 * dx_scale);
            let dz_dy = (z[[i - 1, j]] - z[[i + 1, j]]) / (2.0 * dy_scale);

            slope[[i, j]] = (dz_dx * dz_dx + dz_dy * dz_dy).sqrt().atan().to_degrees();

            // downslope direction, clockwise from north
            let a = (-dz_dx).atan2(-dz_dy).to_degrees();
            aspect[[i, j]] = if a < 0.0 { a + 360.0 } else { a };
        }
    }

    copy_edges(&mut slope);
    copy_edges(&mut aspect);
    copy_edges(&mut valid);
    // a border pixel borrows its neighbour's value but keeps its own no-data
    valid.zip_mut_with(m, |v, &own| *v = *v && own);

    Ok(SlopeAspect { slope, aspect, valid })
}

fn copy_edges<T: Copy>(grid: &mut Array2<T>) {
    let (rows, cols) = grid.dim();
    for j in 0..cols {
        let jj = j.clamp(1, cols - 2);
        grid[[0, j]] = grid[[1, jj]];
        grid[[rows - 1, j]] = grid[[rows - 2, jj]];
    }
    for i in 0..rows {
        let ii = i.clamp(1, rows - 2);
        grid[[i, 0]] = grid[[ii, 1]];
        grid[[i, cols - 1]] = grid[[ii, cols - 2]];
    }
}

/// Append `elevation`, `slope` and `aspect` bands derived from `dem`
pub fn add_elevation_bands(
    image: &RasterImage,
    dem: &Band,
    params: &TerrainParams,
) -> CompositeResult<RasterImage> {
    log::debug!("Adding terrain bands to {}", image.label());
    let terrain = compute_slope_aspect(dem, params)?;

    let elevation = dem.clone().renamed("elevation");
    let slope = Band {
        data: terrain.slope,
        mask: terrain.valid.clone(),
        ..dem.clone().renamed("slope")
    };
    let aspect = Band {
        data: terrain.aspect,
        mask: terrain.valid,
        ..dem.clone().renamed("aspect")
    };
    let topo = RasterImage::from_bands(vec![elevation, slope, aspect])?;
    image.add_bands(&topo)
}
