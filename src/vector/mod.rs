//! ベクタ地物の読み込みとタイル単位の切り出し

pub mod file;
pub mod tile_factory;

use std::collections::BTreeMap;
use std::fmt;

use crate::extents::Point;
use crate::info::Bounds;

pub use file::VectorFile;
pub use tile_factory::VectorTileFactory;

/// Leaf geometry kind of one extracted feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GeometryKind {
    Point,
    LineString,
    /// A ring of a polygon.
    Polygon,
}

impl GeometryKind {
    pub fn tag(self) -> &'static str {
        match self {
            GeometryKind::Point => "POINT",
            GeometryKind::LineString => "LINESTRING",
            GeometryKind::Polygon => "POLYGON",
        }
    }
}

impl fmt::Display for GeometryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// One leaf geometry with its attributes.
///
/// `points` are in the CRS the adapter transformed into, or in engine space once
/// mapped by the tile factory. `points_original` always keeps the CRS points.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorData {
    pub id: String,
    pub name: String,
    pub feature_class: String,
    pub kind: GeometryKind,
    pub points: Vec<Point>,
    pub points_original: Vec<Point>,
    pub bounds: Bounds,
    pub string_attributes: BTreeMap<String, String>,
    pub integer_attributes: BTreeMap<String, i32>,
    pub integer64_attributes: BTreeMap<String, i64>,
    pub double_attributes: BTreeMap<String, f64>,
}

impl VectorData {
    pub fn new(kind: GeometryKind) -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            feature_class: String::new(),
            kind,
            points: Vec::new(),
            points_original: Vec::new(),
            bounds: Bounds::default(),
            string_attributes: BTreeMap::new(),
            integer_attributes: BTreeMap::new(),
            integer64_attributes: BTreeMap::new(),
            double_attributes: BTreeMap::new(),
        }
    }

    /// Feature class without the trailing `" (<TAG>)"`.
    pub fn feature_class_without_tag(&self) -> &str {
        let suffix = format!(" ({})", self.kind.tag());
        self.feature_class
            .strip_suffix(suffix.as_str())
            .unwrap_or(&self.feature_class)
    }

    pub fn update_bounds(&mut self) {
        self.bounds = Bounds::around(&self.points).unwrap_or_default();
    }
}

/// Intersection of segments `a1-a2` and `b1-b2`, including the end points.
///
/// Parallel segments never intersect. When `b` is axis aligned the result lies
/// exactly on it.
pub fn segment_intersection_2d(a1: Point, a2: Point, b1: Point, b2: Point) -> Option<Point> {
    let dir_a = a2 - a1;
    let dir_b = b2 - b1;
    let denom = dir_a.x * dir_b.y - dir_a.y * dir_b.x;
    if denom == 0.0 {
        return None;
    }
    let diff = b1 - a1;
    let t = (diff.x * dir_b.y - diff.y * dir_b.x) / denom;
    let u = (diff.x * dir_a.y - diff.y * dir_a.x) / denom;
    if !(0.0..=1.0).contains(&t) || !(0.0..=1.0).contains(&u) {
        return None;
    }
    let mut hit = Point::new(a1.x + dir_a.x * t, a1.y + dir_a.y * t);
    // 軸平行な辺上に丸める
    if b1.y == b2.y {
        hit.y = b1.y;
    }
    if b1.x == b2.x {
        hit.x = b1.x;
    }
    Some(hit)
}
