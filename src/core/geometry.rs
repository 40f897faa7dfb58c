//! Planar spatial predicates used by bounds filtering and clipping, plus
//! outward buffering of features

use crate::types::{BoundingBox, CompositeError, CompositeResult, Feature, FeatureCollection, Geometry};
use std::f64::consts::PI;

/// Segments used to approximate the circle swept around each vertex
const BUFFER_SEGMENTS: usize = 32;

impl BoundingBox {
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lon <= other.max_lon
            && other.min_lon <= self.max_lon
            && self.min_lat <= other.max_lat
            && other.min_lat <= self.max_lat
    }

    pub fn contains(&self, point: [f64; 2]) -> bool {
        point[0] >= self.min_lon
            && point[0] <= self.max_lon
            && point[1] >= self.min_lat
            && point[1] <= self.max_lat
    }
}

impl Geometry {
    /// Closed rectangle polygon covering a bounding box
    pub fn rectangle(bbox: BoundingBox) -> Self {
        Geometry::Polygon(vec![vec![
            [bbox.min_lon, bbox.min_lat],
            [bbox.max_lon, bbox.min_lat],
            [bbox.max_lon, bbox.max_lat],
            [bbox.min_lon, bbox.max_lat],
            [bbox.min_lon, bbox.min_lat],
        ]])
    }

    pub fn bounds(&self) -> BoundingBox {
        let mut bbox = BoundingBox {
            min_lon: f64::INFINITY,
            max_lon: f64::NEG_INFINITY,
            min_lat: f64::INFINITY,
            max_lat: f64::NEG_INFINITY,
        };
        for p in self.vertices() {
            bbox.min_lon = bbox.min_lon.min(p[0]);
            bbox.max_lon = bbox.max_lon.max(p[0]);
            bbox.min_lat = bbox.min_lat.min(p[1]);
            bbox.max_lat = bbox.max_lat.max(p[1]);
        }
        bbox
    }

    fn vertices(&self) -> Vec<[f64; 2]> {
        match self {
            Geometry::Point(p) => vec![*p],
            Geometry::Polygon(rings) => rings.iter().flatten().copied().collect(),
        }
    }

    fn edges(&self) -> Vec<([f64; 2], [f64; 2])> {
        match self {
            Geometry::Point(_) => Vec::new(),
            Geometry::Polygon(rings) => rings
                .iter()
                .filter(|ring| ring.len() > 1)
                .flat_map(|ring| {
                    let n = ring.len();
                    (0..n).map(move |i| (ring[i], ring[(i + 1) % n]))
                })
                .collect(),
        }
    }

    /// Point containment using the even-odd rule, so holes are excluded
    pub fn contains_point(&self, point: [f64; 2]) -> bool {
        match self {
            Geometry::Point(p) => *p == point,
            Geometry::Polygon(_) => {
                let [x, y] = point;
                let mut inside = false;
                for (a, b) in self.edges() {
                    if (a[1] > y) != (b[1] > y) {
                        let x_cross = a[0] + (y - a[1]) * (b[0] - a[0]) / (b[1] - a[1]);
                        if x < x_cross {
                            inside = !inside;
                        }
                    }
                }
                inside
            }
        }
    }

    /// True when the two geometries share at least one point
    pub fn intersects(&self, other: &Geometry) -> bool {
        if !self.bounds().intersects(&other.bounds()) {
            return false;
        }
        if other.vertices().iter().any(|&p| self.contains_point(p))
            || self.vertices().iter().any(|&p| other.contains_point(p))
        {
            return true;
        }
        let other_edges = other.edges();
        self.edges().iter().any(|&(a, b)| {
            other_edges
                .iter()
                .any(|&(c, d)| segments_intersect(a, b, c, d))
        })
    }
}

impl Geometry {
    /// Outward buffer by `width` CRS units
    ///
    /// The result is the convex hull of circles swept around every vertex,
    /// so concavities and holes are filled. A zero width returns the
    /// geometry unchanged.
    pub fn buffer(&self, width: f64) -> Geometry {
        if width == 0.0 {
            return self.clone();
        }
        let mut points: Vec<[f64; 2]> = self
            .vertices()
            .iter()
            .flat_map(|&[x, y]| {
                (0..BUFFER_SEGMENTS).map(move |k| {
                    let angle = 2.0 * PI * k as f64 / BUFFER_SEGMENTS as f64;
                    [x + width * angle.cos(), y + width * angle.sin()]
                })
            })
            .collect();
        let mut ring = convex_hull(&mut points);
        if let Some(&start) = ring.first() {
            ring.push(start);
        }
        Geometry::Polygon(vec![ring])
    }
}

impl FeatureCollection {
    /// Buffer every feature outward by `width`
    ///
    /// With `bounds` set each buffered geometry is replaced by its bounding
    /// rectangle. Identifiers and properties are kept.
    pub fn buffer(&self, width: f64, bounds: bool) -> CompositeResult<FeatureCollection> {
        if !width.is_finite() || width < 0.0 {
            return Err(CompositeError::Configuration(format!(
                "buffer width must be a non-negative number, got {}",
                width
            )));
        }
        let features = self
            .features
            .iter()
            .map(|feature| {
                let buffered = feature.geometry.buffer(width);
                Feature {
                    geometry: if bounds { Geometry::rectangle(buffered.bounds()) } else { buffered },
                    ..feature.clone()
                }
            })
            .collect();
        Ok(FeatureCollection {
            features,
            ..self.clone()
        })
    }
}

/// Counter-clockwise convex hull (monotone chain), open ring
fn convex_hull(points: &mut Vec<[f64; 2]>) -> Vec<[f64; 2]> {
    points.sort_by(|a, b| a[0].total_cmp(&b[0]).then(a[1].total_cmp(&b[1])));
    points.dedup();
    if points.len() < 3 {
        return points.clone();
    }

    let reversed: Vec<[f64; 2]> = points.iter().rev().copied().collect();
    let mut hull: Vec<[f64; 2]> = Vec::with_capacity(points.len() + 1);
    for pass in [&points[..], &reversed[..]] {
        let floor = hull.len();
        for &p in pass {
            while hull.len() >= floor + 2 && orientation(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0 {
                hull.pop();
            }
            hull.push(p);
        }
        // last point of each chain starts the next one
        hull.pop();
    }
    hull
}

fn orientation(a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> f64 {
    (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
}

fn on_segment(a: [f64; 2], b: [f64; 2], p: [f64; 2]) -> bool {
    p[0] >= a[0].min(b[0]) && p[0] <= a[0].max(b[0]) && p[1] >= a[1].min(b[1]) && p[1] <= a[1].max(b[1])
}

fn segments_intersect(a: [f64; 2], b: [f64; 2], c: [f64; 2], d: [f64; 2]) -> bool {
    let d1 = orientation(c, d, a);
    let d2 = orientation(c, d, b);
    let d3 = orientation(a, b, c);
    let d4 = orientation(a, b, d);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }

    (d1 == 0.0 && on_segment(c, d, a))
        || (d2 == 0.0 && on_segment(c, d, b))
        || (d3 == 0.0 && on_segment(a, b, c))
        || (d4 == 0.0 && on_segment(a, b, d))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(min: f64, max: f64) -> Geometry {
        Geometry::rectangle(BoundingBox {
            min_lon: min,
            max_lon: max,
            min_lat: min,
            max_lat: max,
        })
    }

    #[test]
    fn test_contains_point() {
        let g = square(0.0, 10.0);
        assert!(g.contains_point([5.0, 5.0]));
        assert!(!g.contains_point([11.0, 5.0]));
    }

    #[test]
    fn test_hole_excluded() {
        let outer = vec![[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0]];
        let hole = vec![[4.0, 4.0], [6.0, 4.0], [6.0, 6.0], [4.0, 6.0]];
        let g = Geometry::Polygon(vec![outer, hole]);
        assert!(!g.contains_point([5.0, 5.0]));
        assert!(g.contains_point([2.0, 2.0]));
    }

    #[test]
    fn test_crossing_polygons_intersect() {
        // Plus-sign arrangement: no vertex of either lies inside the other
        let horizontal = Geometry::rectangle(BoundingBox {
            min_lon: 0.0,
            max_lon: 10.0,
            min_lat: 4.0,
            max_lat: 6.0,
        });
        let vertical = Geometry::rectangle(BoundingBox {
            min_lon: 4.0,
            max_lon: 6.0,
            min_lat: 0.0,
            max_lat: 10.0,
        });
        assert!(horizontal.intersects(&vertical));
        assert!(!square(0.0, 1.0).intersects(&square(2.0, 3.0)));
    }

    #[test]
    fn test_point_in_polygon_intersects() {
        assert!(Geometry::Point([0.5, 0.5]).intersects(&square(0.0, 1.0)));
    }

    fn aoi(geometry: Geometry) -> FeatureCollection {
        let mut properties = crate::types::Properties::new();
        properties.insert("name".to_string(), serde_json::json!("site"));
        FeatureCollection {
            id: Some("aoi".to_string()),
            features: vec![Feature {
                id: Some("0".to_string()),
                geometry,
                properties,
            }],
            properties: Default::default(),
        }
    }

    #[test]
    fn test_buffered_point_bounds() {
        let out = aoi(Geometry::Point([100.0, 50.0])).buffer(15.0, true).unwrap();
        let feature = &out.features[0];
        assert_eq!(
            feature.geometry,
            Geometry::rectangle(BoundingBox {
                min_lon: 85.0,
                max_lon: 115.0,
                min_lat: 35.0,
                max_lat: 65.0,
            })
        );
        assert_eq!(feature.id.as_deref(), Some("0"));
        assert_eq!(feature.properties["name"], "site");
        assert_eq!(out.id.as_deref(), Some("aoi"));
    }

    #[test]
    fn test_buffered_polygon_grows_outward() {
        let out = aoi(square(0.0, 10.0)).buffer(2.0, false).unwrap();
        let g = &out.features[0].geometry;
        for p in [[0.0, 0.0], [10.0, 10.0], [-1.9, 5.0], [5.0, 11.9], [-1.0, -1.0]] {
            assert!(g.contains_point(p), "{:?} should be inside", p);
        }
        assert!(!g.contains_point([-2.5, 5.0]));
        assert!(!g.contains_point([-1.9, -1.9]));
        let b = g.bounds();
        assert!((b.min_lon + 2.0).abs() < 1e-9 && (b.max_lat - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_and_invalid_widths() {
        let original = aoi(square(0.0, 1.0));
        assert_eq!(original.buffer(0.0, false).unwrap(), original);
        assert!(original.buffer(-1.0, true).is_err());
        assert!(original.buffer(f64::NAN, true).is_err());
    }
}
