//! landcomp: temporal compositing of multi-sensor optical satellite imagery
//!
//! This library builds lazily filtered image collections, harmonizes band
//! schemas across Landsat sensors, derives spectral indices, reduces a time
//! series to a single composite (statistically or as a per-pixel quality
//! mosaic) and submits the result to an export job subsystem.

pub mod types;
pub mod core;
pub mod io;

// Re-export main types and functions for easier access
pub use crate::types::{
    Band, BoundingBox, CanonicalBand, CompositeError, CompositeResult, DataType, Feature,
    FeatureCollection, GeoTransform, Geometry, Projection, RasterImage, Region,
};

pub use crate::core::{
    get_images, CompositeConfig, CompositeOptions, ImageCollection, ImageQuery, IndexKind,
    Reducer, TemporalCompositor,
};
pub use crate::io::{export_collection, export_image, ExportBackend, ExportOptions};
