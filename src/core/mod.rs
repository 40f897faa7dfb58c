//! Core compositing modules

pub mod band_math;
pub mod collection;
pub mod composite;
pub mod geometry;
pub mod harmonize;
pub mod indices;
pub mod reducer;
pub mod terrain;

// Re-export main types
pub use band_math::{safe_divide, BandSelection};
pub use collection::{get_images, Filter, ImageCollection, ImageMap, ImageQuery, TransformKind};
pub use composite::{finalize_rms, CompositeConfig, CompositeOptions, TemporalCompositor};
pub use harmonize::{clear_pixel_mask, harmonize, mask_clear, BandTransform, Sensor};
pub use indices::{add_indices, IndexKind, IndexParams};
pub use reducer::Reducer;
pub use terrain::{add_elevation_bands, compute_slope_aspect, SlopeAspect, TerrainParams};
