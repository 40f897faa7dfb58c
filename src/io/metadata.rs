//! Metadata documents and their plain-text sidecar rendering
//!
//! Sidecars hold one `Key : Value` line per top-level entry. Image bands are
//! written as `Band: <id> : <descriptor>`, properties as
//! `Property: <key> : <value>`, and feature collections as one block per
//! feature between `---------------------` delimiter lines.

use crate::types::{
    CompositeError, CompositeResult, Feature, FeatureCollection, Geometry, RasterImage, Region,
};
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

pub const FEATURE_DELIMITER: &str = "---------------------";

/// Metadata document of an image: bands, projection and properties
pub fn image_info(image: &RasterImage) -> Value {
    let bands: Vec<Value> = image
        .bands
        .iter()
        .map(|b| {
            let (rows, cols) = b.dim();
            json!({
                "id": b.name,
                "data_type": b.data_type.to_string(),
                "dimensions": [cols, rows],
                "crs": b.projection.crs,
                "crs_transform": b.projection.transform.crs_transform(),
            })
        })
        .collect();

    let mut properties: Map<String, Value> = image
        .properties
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if let Some(footprint) = image.footprint() {
        if let Ok(geometry) = serde_json::to_value(footprint) {
            properties.insert("system:footprint".to_string(), geometry);
        }
    }

    let mut info = Map::new();
    info.insert("type".to_string(), json!("Image"));
    if let Some(id) = &image.id {
        info.insert("id".to_string(), json!(id));
    }
    info.insert("bands".to_string(), Value::Array(bands));
    info.insert("properties".to_string(), Value::Object(properties));
    Value::Object(info)
}

pub fn feature_info(feature: &Feature) -> Value {
    let mut info = Map::new();
    info.insert("type".to_string(), json!("Feature"));
    if let Some(id) = &feature.id {
        info.insert("id".to_string(), json!(id));
    }
    info.insert(
        "geometry".to_string(),
        serde_json::to_value(&feature.geometry).unwrap_or(Value::Null),
    );
    info.insert("properties".to_string(), json!(feature.properties));
    Value::Object(info)
}

pub fn feature_collection_info(collection: &FeatureCollection) -> Value {
    let mut info = Map::new();
    info.insert("type".to_string(), json!("FeatureCollection"));
    if let Some(id) = &collection.id {
        info.insert("id".to_string(), json!(id));
    }
    info.insert(
        "features".to_string(),
        Value::Array(collection.features.iter().map(feature_info).collect()),
    );
    info.insert("properties".to_string(), json!(collection.properties));
    Value::Object(info)
}

/// Metadata document of an export region, tagged with its kind
pub fn region_info(region: &Region) -> Value {
    match region {
        Region::Geometry(geometry) => {
            json!({ "type": "Geometry", "coordinates": geometry_coordinates(geometry) })
        }
        Region::Feature(feature) => feature_info(feature),
        Region::FeatureCollection(collection) => feature_collection_info(collection),
    }
}

fn geometry_coordinates(geometry: &Geometry) -> Value {
    serde_json::to_value(geometry)
        .ok()
        .and_then(|v| v.get("coordinates").cloned())
        .unwrap_or(Value::Null)
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn as_object<'a>(info: &'a Value, kind: &str) -> CompositeResult<&'a Map<String, Value>> {
    info.as_object()
        .ok_or_else(|| CompositeError::Metadata(format!("unsupported {} metadata document", kind)))
}

fn expand_properties(out: &mut String, properties: &Value) {
    if let Some(map) = properties.as_object() {
        for (k, v) in map {
            out.push_str(&format!("Property: {} : {}\n", k, render(v)));
        }
    }
}

/// Render an image metadata document
pub fn expand_image_meta(info: &Value) -> CompositeResult<String> {
    let mut out = String::new();
    for (k, v) in as_object(info, "image")? {
        match k.as_str() {
            "bands" => {
                for band in v.as_array().into_iter().flatten() {
                    let id = band.get("id").map(render).unwrap_or_default();
                    out.push_str(&format!("Band: {} : {}\n", id, band));
                }
            }
            "properties" => expand_properties(&mut out, v),
            _ => out.push_str(&format!("{} : {}\n", k, render(v))),
        }
    }
    Ok(out)
}

/// Render a feature metadata document
pub fn expand_feature_meta(info: &Value) -> CompositeResult<String> {
    let mut out = String::new();
    for (k, v) in as_object(info, "feature")? {
        match k.as_str() {
            "geometry" => {
                if let Some(geometry) = v.as_object() {
                    for (gk, gv) in geometry {
                        out.push_str(&format!("{}: {}\n", gk, render(gv)));
                    }
                }
            }
            "properties" => expand_properties(&mut out, v),
            _ => out.push_str(&format!("{} : {}\n", k, render(v))),
        }
    }
    Ok(out)
}

/// Render a feature collection metadata document
pub fn expand_feature_coll_meta(info: &Value) -> CompositeResult<String> {
    let mut out = format!("{}\n", FEATURE_DELIMITER);
    for (k, v) in as_object(info, "feature collection")? {
        match k.as_str() {
            "features" => {
                for feature in v.as_array().into_iter().flatten() {
                    out.push_str(&expand_feature_meta(feature)?);
                    out.push_str(FEATURE_DELIMITER);
                    out.push('\n');
                }
            }
            "properties" => expand_properties(&mut out, v),
            _ => out.push_str(&format!("{} : {}\n", k, render(v))),
        }
    }
    Ok(out)
}

/// File-name stem for an image: its identifier with slashes replaced
pub fn sidecar_stem(image_id: &str) -> String {
    image_id.replace('/', "_")
}

/// Write `<folder>/<stem>.txt`, returning the path
pub fn write_sidecar(folder: &Path, stem: &str, text: &str) -> CompositeResult<PathBuf> {
    fs::create_dir_all(folder)?;
    let path = folder.join(format!("{}.txt", stem));
    fs::write(&path, text)?;
    log::debug!("Wrote metadata sidecar {}", path.display());
    Ok(path)
}
